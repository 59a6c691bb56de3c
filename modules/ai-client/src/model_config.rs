//! Model constraint table: the one place that knows context windows, output
//! limits, and provider quirks for a given model string. Scout/Planner/Writer
//! construct their LLM clients by asking this table, never by hand-coding
//! token-budget math against a model name.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("model '{model}' not found in the override table (bare: '{bare}'). The system cannot determine context_window / max_output_tokens for this model. Known models: {available}")]
pub struct ModelConfigError {
    model: String,
    bare: String,
    available: String,
}

/// Constraints and provider quirks for a specific LLM model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tool_calling: bool,
    /// Provider-specific request body overrides (e.g. disabling a "thinking" mode).
    pub extra_body: serde_json::Value,
}

impl ModelConfig {
    fn new(context_window: u32, max_output_tokens: u32, supports_tool_calling: bool) -> Self {
        Self {
            context_window,
            max_output_tokens,
            supports_tool_calling,
            extra_body: serde_json::Value::Null,
        }
    }

    fn with_extra_body(mut self, extra_body: serde_json::Value) -> Self {
        self.extra_body = extra_body;
        self
    }
}

const PROVIDER_PREFIXES: &[&str] = &[
    "openrouter/",
    "openai/",
    "ollama/",
    "ollama_chat/",
    "litellm_proxy/",
    "hosted_vllm/",
];

/// Strip a provider routing prefix like `openrouter/` or `ollama/`.
fn strip_provider_prefix(model: &str) -> &str {
    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = model.strip_prefix(prefix) {
            return rest;
        }
    }
    model
}

fn overrides() -> HashMap<&'static str, ModelConfig> {
    let mut m = HashMap::new();
    m.insert(
        "moonshotai/kimi-k2.5",
        ModelConfig::new(131_072, 8_192, true)
            .with_extra_body(serde_json::json!({"thinking": {"type": "disabled"}})),
    );
    m.insert(
        "moonshotai/kimi-k2-thinking",
        ModelConfig::new(131_072, 64_000, true),
    );
    m.insert("mistralai/devstral-2512", ModelConfig::new(131_072, 8_192, true));
    m.insert(
        "minimax/minimax-m2.1",
        ModelConfig::new(1_048_576, 16_384, true),
    );
    m.insert("qwen3-coder:30b", ModelConfig::new(32_768, 8_192, true));
    m.insert("mistral-small:24b", ModelConfig::new(32_768, 8_192, true));
    m.insert(
        "anthropic/claude-sonnet-4-20250514",
        ModelConfig::new(200_000, 64_000, true),
    );
    m.insert("claude-sonnet-4-20250514", ModelConfig::new(200_000, 64_000, true));
    m.insert("gpt-4o", ModelConfig::new(128_000, 16_384, true));
    m
}

/// Resolve the actual constraints for a model.
///
/// Resolution order: override table, then fail loudly. Unlike the Python
/// original there is no `litellm` registry fallback available in Rust; an
/// unknown model is always a configuration error rather than a guessed
/// default, matching the "no silent conservative defaults" requirement.
pub fn resolve_model_config(model: &str) -> Result<ModelConfig, ModelConfigError> {
    let bare = strip_provider_prefix(model);
    let table = overrides();
    if let Some(cfg) = table.get(bare) {
        return Ok(cfg.clone());
    }

    let mut available: Vec<&str> = table.keys().copied().collect();
    available.sort_unstable();
    Err(ModelConfigError {
        model: model.to_string(),
        bare: bare.to_string(),
        available: available.join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_provider_prefix_before_lookup() {
        let cfg = resolve_model_config("openrouter/moonshotai/kimi-k2.5").unwrap();
        assert_eq!(cfg.max_output_tokens, 8_192);
        assert_eq!(cfg.context_window, 131_072);
    }

    #[test]
    fn unknown_model_fails_loudly_not_silently() {
        let err = resolve_model_config("totally-unknown-model").unwrap_err();
        assert!(err.to_string().contains("totally-unknown-model"));
        assert!(err.to_string().contains("Known models"));
    }

    #[test]
    fn kimi_k2_5_disables_thinking_mode() {
        let cfg = resolve_model_config("moonshotai/kimi-k2.5").unwrap();
        assert_eq!(
            cfg.extra_body,
            serde_json::json!({"thinking": {"type": "disabled"}})
        );
    }

    #[test]
    fn kimi_k2_thinking_has_no_override_body() {
        let cfg = resolve_model_config("moonshotai/kimi-k2-thinking").unwrap();
        assert_eq!(cfg.extra_body, serde_json::Value::Null);
    }
}
