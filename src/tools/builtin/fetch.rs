//! fetch_url tool

use crate::tools::{
    required_str, truncate_output, ExecutionClass, Tool, ToolContext, ToolKind, ToolOutput,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

const FETCH_TIMEOUT_SECS: u64 = 30;

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(concat!("a3s-shell/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

fn check_scheme(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        anyhow::bail!("Only http(s) URLs are supported: {}", url)
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the response body as text."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "http:// or https:// URL"}
            },
            "required": ["url"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Network
    }

    fn class(&self) -> ExecutionClass {
        ExecutionClass::Concurrent
    }

    async fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let url = required_str(args, "url")?;
        check_scheme(url)?;

        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to fetch {}", url))?;
            let status = response.status();
            let body = response.text().await.context("Failed to read response body")?;
            anyhow::Ok((status, body))
        };

        let (status, body) = request.await?;

        let content = truncate_output(format!("HTTP {}\n\n{}", status.as_u16(), body));
        if status.is_success() {
            Ok(ToolOutput::success(content))
        } else {
            Ok(ToolOutput::error(content))
        }
    }
}
