//! Chat-completion client for the planning LLM.
//!
//! Speaks the OpenRouter-compatible chat completions API. The reply is
//! treated as untrusted text: plan parsing and extraction both tolerate
//! surrounding prose and surface malformed payloads as errors rather
//! than panicking.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::LlmSettings;
use crate::errors::{PilotError, PilotResult};
use crate::llm::cache::ResponseCache;
use crate::plan::json_window;

const PLAN_PROMPT: &str = r#"You are an AI browser automation expert. Given the following command and page state, generate a structured plan of actions to accomplish the task.

IMPORTANT: Return ONLY the JSON object, no additional text or explanation.

For YouTube tasks, use these reliable selectors:
- Search box: "input[name='search_query']"
- Search button: "button#search-icon-legacy"
- Video links: "a#video-title"

Required JSON structure:
{
  "url": "<target URL>",
  "actions": [
    {"type": "navigate|click|type|wait|extract", "target": "<selector or description>", "value": "<url or text>", "wait_for": "<optional selector>", "press_enter": false}
  ],
  "extraction": {}
}
"#;

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    api_key: String,
    cache: Option<ResponseCache>,
}

impl LlmClient {
    /// Build a client from settings. The API key comes from the
    /// environment variable named in the settings.
    pub fn new(settings: &LlmSettings, cache: Option<ResponseCache>) -> PilotResult<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            PilotError::Config(format!(
                "{} environment variable is not set",
                settings.api_key_env
            ))
        })?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            api_key,
            cache,
        })
    }

    /// One completion round-trip, going through the response cache when
    /// one is configured.
    pub async fn complete(&self, prompt: &str) -> PilotResult<String> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lookup(prompt) {
                debug!(target: "llm", "serving completion from cache");
                return Ok(hit);
            }
        }

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/webpilot/webpilot")
            .header("X-Title", "WebPilot")
            .json(&body)
            .send()
            .await
            .map_err(|err| PilotError::Llm(err.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|err| PilotError::Llm(err.to_string()))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error");
            return Err(PilotError::Llm(format!("{status}: {message}")));
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PilotError::Llm("no content in completion".into()))?
            .to_string();

        if let Some(cache) = &self.cache {
            cache.store(prompt, &content);
        }

        info!(target: "llm", chars = content.len(), "completion received");
        Ok(content)
    }

    /// Ask for an action plan. Returns the raw reply; the caller runs it
    /// through `plan::parse_plan`.
    pub async fn plan(&self, command: &str, page_summary: &str) -> PilotResult<String> {
        let prompt = format!(
            "{PLAN_PROMPT}\nCommand: {command}\n\nCurrent page state:\n{page_summary}\n\nJSON response:"
        );
        self.complete(&prompt).await
    }

    /// Extract structured information from page content according to the
    /// plan's extraction directives.
    pub async fn extract(
        &self,
        content: &str,
        directives: &serde_json::Map<String, Value>,
    ) -> PilotResult<Value> {
        let plan = serde_json::to_string_pretty(directives)
            .map_err(|err| PilotError::Llm(err.to_string()))?;
        let prompt = format!(
            "Extract the following information from the content according to the plan.\nReturn ONLY the JSON object, no additional text or explanation.\n\nPlan:\n{plan}\n\nContent:\n{content}\n\nJSON response:"
        );

        let reply = self.complete(&prompt).await?;
        match json_window(&reply).and_then(|w| serde_json::from_str::<Value>(w).ok()) {
            Some(value) => Ok(value),
            None => Ok(json!({ "error": "failed to parse extracted information" })),
        }
    }

    /// Summarize extracted content.
    pub async fn summarize(&self, content: &str, max_chars: usize) -> PilotResult<String> {
        let prompt = format!(
            "Summarize the following content in a clear and concise way.\nKeep the summary under {max_chars} characters.\n\nContent:\n{content}\n\nSummary:"
        );
        self.complete(&prompt).await
    }
}
