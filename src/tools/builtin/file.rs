//! Workspace file tools

use crate::tools::{
    optional_bool, optional_str, optional_u64, required_str, truncate_output, ExecutionClass, Tool,
    ToolContext, ToolKind, ToolOutput, MAX_LINE_LENGTH, MAX_READ_LINES,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Maximum entries returned by list_files
const MAX_LIST_ENTRIES: usize = 1000;

/// Maximum matches returned by search_files
const MAX_SEARCH_MATCHES: usize = 200;

fn relative_display(workspace: &Path, path: &Path) -> String {
    path.strip_prefix(workspace)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn clip_line(line: &str) -> &str {
    if line.len() <= MAX_LINE_LENGTH {
        return line;
    }
    let mut end = MAX_LINE_LENGTH;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace. Lines are numbered from 1. Use offset/limit for large files."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "offset": {"type": "integer", "description": "First line to read (1-based)"},
                "limit": {"type": "integer", "description": "Maximum number of lines"}
            },
            "required": ["path"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(args, "path")?;
        let resolved = ctx.resolve_path(path)?;
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .with_context(|| format!("Failed to read {}", path))?;

        let offset = optional_u64(args, "offset").unwrap_or(1).max(1) as usize;
        let limit = optional_u64(args, "limit")
            .map(|l| l as usize)
            .unwrap_or(MAX_READ_LINES)
            .min(MAX_READ_LINES);

        let total = content.lines().count();
        let mut out = String::new();
        for (idx, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            out.push_str(&format!("{:>6}\t{}\n", idx + 1, clip_line(line)));
        }
        let shown_end = (offset - 1 + limit).min(total);
        if shown_end < total {
            out.push_str(&format!("... ({} more lines)\n", total - shown_end));
        }

        Ok(ToolOutput::success(truncate_output(out)))
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories under a workspace path, honoring .gitignore."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the workspace (default: .)"},
                "depth": {"type": "integer", "description": "Maximum depth (default: 3)"}
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let root = ctx.resolve_path(optional_str(args, "path").unwrap_or("."))?;
        let depth = optional_u64(args, "depth").unwrap_or(3) as usize;
        let workspace = ctx.workspace.clone();

        let entries = tokio::task::spawn_blocking(move || list_entries(&workspace, &root, depth))
            .await
            .context("list_files task panicked")??;

        if entries.is_empty() {
            return Ok(ToolOutput::success("(empty)"));
        }
        Ok(ToolOutput::success(truncate_output(entries.join("\n"))))
    }
}

fn list_entries(workspace: &Path, root: &Path, depth: usize) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .max_depth(Some(depth))
        .hidden(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let mut display = relative_display(workspace, entry.path());
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            display.push('/');
        }
        entries.push(display);
        if entries.len() >= MAX_LIST_ENTRIES {
            entries.push(format!("... (stopped at {} entries)", MAX_LIST_ENTRIES));
            break;
        }
    }
    entries.sort();
    Ok(entries)
}

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search workspace files for a regular expression. Returns path:line: text for each match."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression"},
                "path": {"type": "string", "description": "Directory or file to search (default: .)"}
            },
            "required": ["pattern"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let pattern = required_str(args, "pattern")?;
        let regex = regex::Regex::new(pattern)
            .with_context(|| format!("Invalid regex: {}", pattern))?;
        let root = ctx.resolve_path(optional_str(args, "path").unwrap_or("."))?;
        let workspace = ctx.workspace.clone();

        let matches = tokio::task::spawn_blocking(move || search(&workspace, &root, &regex))
            .await
            .context("search_files task panicked")??;

        if matches.is_empty() {
            return Ok(ToolOutput::success("No matches found"));
        }
        Ok(ToolOutput::success(truncate_output(matches.join("\n"))))
    }
}

fn search(workspace: &Path, root: &Path, regex: &regex::Regex) -> Result<Vec<String>> {
    let mut matches = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        // Binary or non-UTF-8 files are skipped
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let display = relative_display(workspace, entry.path());
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(format!("{}:{}: {}", display, idx + 1, clip_line(line.trim_end())));
                if matches.len() >= MAX_SEARCH_MATCHES {
                    matches.push(format!("... (stopped at {} matches)", MAX_SEARCH_MATCHES));
                    return Ok(matches);
                }
            }
        }
    }
    Ok(matches)
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace. Parent directories are created as needed."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the workspace"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        let resolved: PathBuf = ctx.resolve_path_for_write(path)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directories for {}", path))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .with_context(|| format!("Failed to write {}", path))?;

        tracing::info!(path = %path, bytes = content.len(), "File written");
        Ok(ToolOutput::success(format!("Wrote {} bytes to {}", content.len(), path)))
    }
}

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a workspace file. old_string must be unique unless replace_all is set. Returns a unified diff."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string", "description": "Exact text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence"}
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = required_str(args, "path")?;
        let old_string = required_str(args, "old_string")?;
        let new_string = required_str(args, "new_string")?;
        let replace_all = optional_bool(args, "replace_all");

        if old_string.is_empty() {
            return Ok(ToolOutput::error("old_string must not be empty"));
        }

        let resolved = ctx.resolve_path(path)?;
        let original = tokio::fs::read_to_string(&resolved)
            .await
            .with_context(|| format!("Failed to read {}", path))?;

        let count = original.matches(old_string).count();
        if count == 0 {
            return Ok(ToolOutput::error(format!("old_string not found in {}", path)));
        }
        if count > 1 && !replace_all {
            return Ok(ToolOutput::error(format!(
                "old_string occurs {} times in {}; provide more context or set replace_all",
                count, path
            )));
        }

        let updated = if replace_all {
            original.replace(old_string, new_string)
        } else {
            original.replacen(old_string, new_string, 1)
        };
        tokio::fs::write(&resolved, &updated)
            .await
            .with_context(|| format!("Failed to write {}", path))?;

        let diff = similar::TextDiff::from_lines(&original, &updated)
            .unified_diff()
            .context_radius(3)
            .header(path, path)
            .to_string();

        tracing::info!(path = %path, replacements = if replace_all { count } else { 1 }, "File edited");
        Ok(ToolOutput::success(truncate_output(diff)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_read_file_numbers_lines() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let out = ReadFileTool
            .execute(&serde_json::json!({"path": "a.txt"}), &ctx)
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.content.contains("     1\tone"));
        assert!(out.content.contains("     3\tthree"));
    }

    #[tokio::test]
    async fn test_read_file_offset_limit() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("a.txt"), "1\n2\n3\n4\n5\n").unwrap();

        let out = ReadFileTool
            .execute(&serde_json::json!({"path": "a.txt", "offset": 2, "limit": 2}), &ctx)
            .await
            .unwrap();
        assert!(out.content.contains("     2\t2"));
        assert!(out.content.contains("     3\t3"));
        assert!(!out.content.contains("     4\t4"));
        assert!(out.content.contains("(2 more lines)"));
    }

    #[tokio::test]
    async fn test_read_file_missing() {
        let (_dir, ctx) = setup();
        assert!(ReadFileTool
            .execute(&serde_json::json!({"path": "nope.txt"}), &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_files_respects_gitignore() {
        let (dir, ctx) = setup();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/out"), "bin").unwrap();

        let out = ListFilesTool.execute(&serde_json::json!({}), &ctx).await.unwrap();
        assert!(out.content.contains("src/"));
        assert!(out.content.contains("src/main.rs"));
        assert!(!out.content.contains("target"));
    }

    #[tokio::test]
    async fn test_search_files() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "// nothing here\n").unwrap();

        let out = SearchFilesTool
            .execute(&serde_json::json!({"pattern": "fn b\\w+"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "a.rs:2: fn beta() {}");

        let out = SearchFilesTool
            .execute(&serde_json::json!({"pattern": "zzz"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "No matches found");
    }

    #[tokio::test]
    async fn test_search_files_invalid_regex() {
        let (_dir, ctx) = setup();
        assert!(SearchFilesTool
            .execute(&serde_json::json!({"pattern": "("}), &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let (dir, ctx) = setup();
        let out = WriteFileTool
            .execute(&serde_json::json!({"path": "x/y/z.txt", "content": "hi"}), &ctx)
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("x/y/z.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_edit_file_unique_replace() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("f.txt"), "hello world\n").unwrap();

        let out = EditFileTool
            .execute(
                &serde_json::json!({"path": "f.txt", "old_string": "world", "new_string": "there"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.success);
        assert!(out.content.contains("-hello world"));
        assert!(out.content.contains("+hello there"));
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "hello there\n");
    }

    #[tokio::test]
    async fn test_edit_file_ambiguous_and_missing() {
        let (dir, ctx) = setup();
        std::fs::write(dir.path().join("f.txt"), "a a a").unwrap();

        let out = EditFileTool
            .execute(&serde_json::json!({"path": "f.txt", "old_string": "a", "new_string": "b"}), &ctx)
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.content.contains("occurs 3 times"));

        let out = EditFileTool
            .execute(&serde_json::json!({"path": "f.txt", "old_string": "q", "new_string": "b"}), &ctx)
            .await
            .unwrap();
        assert!(!out.success);

        let out = EditFileTool
            .execute(
                &serde_json::json!({"path": "f.txt", "old_string": "a", "new_string": "b", "replace_all": true}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "b b b");
    }
}
