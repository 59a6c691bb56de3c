use std::env;

/// Per-tier LLM endpoint override: base URL and API key, both optional.
/// Falls back to the global `LLM_BASE_URL` / `LLM_API_KEY` pair when unset.
#[derive(Debug, Clone, Default)]
pub struct TierEndpoint {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl TierEndpoint {
    fn from_env(prefix: &str) -> Self {
        Self {
            base_url: env::var(format!("{prefix}_BASE_URL")).ok(),
            api_key: env::var(format!("{prefix}_API_KEY")).ok(),
        }
    }

    /// Resolve against the process-wide fallback pair.
    pub fn resolve<'a>(&'a self, fallback: &'a TierEndpoint) -> (Option<&'a str>, Option<&'a str>) {
        (
            self.base_url.as_deref().or(fallback.base_url.as_deref()),
            self.api_key.as_deref().or(fallback.api_key.as_deref()),
        )
    }
}

/// Configuration loaded from the environment. Each binary (pipeline, worker,
/// server) pulls only the fields relevant to it via a named constructor;
/// fields irrelevant to a given role are left at their zero value rather than
/// required, matching how the teacher workspace shapes its per-role configs.
#[derive(Debug, Clone)]
pub struct Config {
    // Content store
    pub database_url: String,

    // Model identifiers, possibly provider-prefixed (e.g. "openrouter/vendor/model")
    pub scout_model: String,
    pub planner_model: String,
    pub writer_model: String,

    // Per-tier endpoint overrides, falling back to `llm_fallback`
    pub scout_endpoint: TierEndpoint,
    pub planner_endpoint: TierEndpoint,
    pub writer_endpoint: TierEndpoint,
    pub llm_fallback: TierEndpoint,

    // Pool sizes
    pub scout_parallel: usize,
    pub writer_parallel: usize,

    // Webhook ingress
    pub github_webhook_secret: Option<String>,

    // Worker
    pub worker_poll_interval_secs: u64,

    // Server
    pub web_host: String,
    pub web_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            scout_model: String::new(),
            planner_model: String::new(),
            writer_model: String::new(),
            scout_endpoint: TierEndpoint::default(),
            planner_endpoint: TierEndpoint::default(),
            writer_endpoint: TierEndpoint::default(),
            llm_fallback: TierEndpoint::default(),
            scout_parallel: 4,
            writer_parallel: 3,
            github_webhook_secret: None,
            worker_poll_interval_secs: 10,
            web_host: "0.0.0.0".to_string(),
            web_port: 3000,
        }
    }
}

impl Config {
    /// Load configuration for a pipeline run: content store + the three
    /// model tiers + pool sizes. No web/worker fields are required.
    pub fn pipeline_from_env() -> anyhow::Result<Self> {
        enforce_git_pager();
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            scout_model: required_env("SCOUT_MODEL")?,
            planner_model: required_env("PLANNER_MODEL")?,
            writer_model: required_env("WRITER_MODEL")?,
            scout_endpoint: TierEndpoint::from_env("SCOUT"),
            planner_endpoint: TierEndpoint::from_env("PLANNER"),
            writer_endpoint: TierEndpoint::from_env("WRITER"),
            llm_fallback: TierEndpoint {
                base_url: env::var("LLM_BASE_URL").ok(),
                api_key: env::var("LLM_API_KEY").ok(),
            },
            scout_parallel: env_parsed("SCOUT_PARALLEL", 4)?,
            writer_parallel: env_parsed("WRITER_PARALLEL", 3)?,
            ..Self::default()
        })
    }

    /// Load configuration for the job worker: just the content store and
    /// the poll interval. The worker never talks to an LLM directly — it
    /// spawns the pipeline as a subprocess, which loads its own config.
    pub fn worker_from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            worker_poll_interval_secs: env_parsed("WORKER_POLL_INTERVAL_SECS", 10)?,
            ..Self::default()
        })
    }

    /// Load configuration for the webhook/REST server.
    pub fn server_from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env_parsed("WEB_PORT", 3000)?,
            github_webhook_secret: env::var("GITHUB_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            ..Self::default()
        })
    }

    /// Log character counts of sensitive values instead of the values
    /// themselves — enough to confirm a var is set without leaking it.
    pub fn log_redacted(&self) {
        tracing::info!(database_url_chars = self.database_url.len(), "database_url");
        for (name, value) in [
            ("scout_model", &self.scout_model),
            ("planner_model", &self.planner_model),
            ("writer_model", &self.writer_model),
        ] {
            if value.is_empty() {
                tracing::info!("{name} = (unset)");
            } else {
                tracing::info!(%value, "{name}");
            }
        }
        for (name, endpoint) in [
            ("scout_endpoint", &self.scout_endpoint),
            ("planner_endpoint", &self.planner_endpoint),
            ("writer_endpoint", &self.writer_endpoint),
            ("llm_fallback", &self.llm_fallback),
        ] {
            tracing::info!(
                "{name}: base_url={:?} api_key=({} chars)",
                endpoint.base_url,
                endpoint.api_key.as_ref().map(|k| k.len()).unwrap_or(0)
            );
        }
        if let Some(secret) = &self.github_webhook_secret {
            tracing::info!("github_webhook_secret = ({} chars)", secret.len());
        } else {
            tracing::info!("github_webhook_secret = (unset, verification disabled)");
        }
    }
}

/// Pin `GIT_PAGER` so agent-run git subprocesses never block on an
/// interactive pager.
fn enforce_git_pager() {
    // SAFETY: called once at process startup before any other thread reads
    // the environment; no concurrent env access is possible yet.
    unsafe {
        env::set_var("GIT_PAGER", "cat");
    }
}

fn required_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("{key} environment variable is required"))
}

fn env_parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a number: {e}")),
        Err(_) => Ok(default),
    }
}
