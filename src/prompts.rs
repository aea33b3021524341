// Prompt Registry
//
// Every model-facing prompt is a compile-time `include_str!` of a file under
// `prompts/`:
//
//   prompts/
//   ├── default_system_prompt.md  : System prompt for the interactive shell
//   ├── mode_plan.md              : Directive appended in plan mode
//   ├── mode_build.md             : Directive appended in build mode
//   └── context_compact.md        : Context compaction / summarization

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../prompts/default_system_prompt.md");

/// Plan mode: investigate and propose, no side effects
pub const MODE_PLAN: &str = include_str!("../prompts/mode_plan.md");

/// Build mode: carry out the request
pub const MODE_BUILD: &str = include_str!("../prompts/mode_build.md");

/// User template for context compaction. Placeholder: `{conversation}`
pub const CONTEXT_COMPACT: &str = include_str!("../prompts/context_compact.md");

/// Prefix for compacted summary messages
pub const CONTEXT_SUMMARY_PREFIX: &str =
    "[Context Summary: The following is a summary of earlier conversation]\n\n";

/// Substitute `{key}` placeholders
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}
