//! Runtime configuration for Loom.
//!
//! Loaded from `loom.toml` in the working directory with environment
//! overrides for secrets. Every section is optional; missing values fall
//! back to defaults so a bare `loom serve` works against local providers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Sandbox provider settings.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Base URL of the sandbox provider API.
    pub provider_url: String,
    /// Provider API key, taken from `SANDBOX_API_KEY` when present.
    pub api_key: Option<String>,
    /// Base image/template the sandbox is provisioned from.
    pub template: String,
    /// Port the generated app listens on inside the sandbox.
    pub app_port: u16,
    /// TTL for generation-run sandboxes, in seconds.
    pub generation_ttl_secs: u64,
    /// TTL for restart-workflow sandboxes, in seconds.
    pub restart_ttl_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            provider_url: "http://localhost:4780".to_string(),
            api_key: None,
            template: "node-22-vite".to_string(),
            app_port: 3000,
            generation_ttl_secs: 30 * 60,
            restart_ttl_secs: 10 * 60,
        }
    }
}

/// Model provider settings.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Base URL of the messages API.
    pub base_url: String,
    /// API key, taken from `ANTHROPIC_API_KEY` when present.
    pub api_key: Option<String>,
    /// Model used for the planning call.
    pub planner_model: String,
    /// Model used for the tool-using code agent and file generation.
    pub agent_model: String,
    /// Model used for short title/response calls.
    pub utility_model: String,
    /// Sampling temperature for the code agent. Deliberately elevated for
    /// variability in generated code; tune per deployment.
    pub agent_temperature: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
            planner_model: "claude-sonnet-4-20250514".to_string(),
            agent_model: "claude-sonnet-4-20250514".to_string(),
            utility_model: "claude-3-5-haiku-20241022".to_string(),
            agent_temperature: 0.9,
        }
    }
}

/// Orchestration limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// How many prior messages the continuity loader pulls in.
    pub history_window: usize,
    /// Hard cap on the plan manifest, regardless of what the model returns.
    pub max_plan_files: usize,
    /// Iteration budget for the agent network.
    pub max_iterations: u32,
    /// Build-verification probe timeout, in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            history_window: 5,
            max_plan_files: 5,
            max_iterations: 30,
            probe_timeout_secs: 10,
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub state_dir: PathBuf,
    pub dev_mode: bool,
    pub sandbox: SandboxSettings,
    pub models: ModelSettings,
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4700,
            db_path: PathBuf::from(".loom/loom.db"),
            state_dir: PathBuf::from(".loom"),
            dev_mode: false,
            sandbox: SandboxSettings::default(),
            models: ModelSettings::default(),
            limits: Limits::default(),
        }
    }
}

// Raw TOML structure for `loom.toml`. Everything optional; merged into
// defaults section by section.
#[derive(Debug, Deserialize)]
struct ConfigToml {
    server: Option<ServerSection>,
    sandbox: Option<SandboxSection>,
    models: Option<ModelsSection>,
    limits: Option<LimitsSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    port: Option<u16>,
    db_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    provider_url: Option<String>,
    template: Option<String>,
    app_port: Option<u16>,
    generation_ttl_secs: Option<u64>,
    restart_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsSection {
    base_url: Option<String>,
    planner_model: Option<String>,
    agent_model: Option<String>,
    utility_model: Option<String>,
    agent_temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct LimitsSection {
    history_window: Option<usize>,
    max_plan_files: Option<usize>,
    max_iterations: Option<u32>,
    probe_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from `loom.toml` in the given directory, then
    /// apply environment overrides. Returns defaults if the file is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("loom.toml");
        let mut config = Self::default();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let parsed: ConfigToml = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;
            config.apply(parsed);
        }

        config.apply_env(&std::env::vars().collect());
        Ok(config)
    }

    fn apply(&mut self, parsed: ConfigToml) {
        if let Some(server) = parsed.server {
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(db_path) = server.db_path {
                self.db_path = db_path;
            }
            if let Some(state_dir) = server.state_dir {
                self.state_dir = state_dir;
            }
        }
        if let Some(sandbox) = parsed.sandbox {
            if let Some(url) = sandbox.provider_url {
                self.sandbox.provider_url = url;
            }
            if let Some(template) = sandbox.template {
                self.sandbox.template = template;
            }
            if let Some(port) = sandbox.app_port {
                self.sandbox.app_port = port;
            }
            if let Some(ttl) = sandbox.generation_ttl_secs {
                self.sandbox.generation_ttl_secs = ttl;
            }
            if let Some(ttl) = sandbox.restart_ttl_secs {
                self.sandbox.restart_ttl_secs = ttl;
            }
        }
        if let Some(models) = parsed.models {
            if let Some(url) = models.base_url {
                self.models.base_url = url;
            }
            if let Some(model) = models.planner_model {
                self.models.planner_model = model;
            }
            if let Some(model) = models.agent_model {
                self.models.agent_model = model;
            }
            if let Some(model) = models.utility_model {
                self.models.utility_model = model;
            }
            if let Some(temp) = models.agent_temperature {
                self.models.agent_temperature = temp;
            }
        }
        if let Some(limits) = parsed.limits {
            if let Some(n) = limits.history_window {
                self.limits.history_window = n;
            }
            if let Some(n) = limits.max_plan_files {
                self.limits.max_plan_files = n;
            }
            if let Some(n) = limits.max_iterations {
                self.limits.max_iterations = n;
            }
            if let Some(n) = limits.probe_timeout_secs {
                self.limits.probe_timeout_secs = n;
            }
        }
    }

    fn apply_env(&mut self, vars: &BTreeMap<String, String>) {
        if let Some(key) = vars.get("ANTHROPIC_API_KEY") {
            self.models.api_key = Some(key.clone());
        }
        if let Some(key) = vars.get("SANDBOX_API_KEY") {
            self.sandbox.api_key = Some(key.clone());
        }
        if let Some(url) = vars.get("LOOM_SANDBOX_URL") {
            self.sandbox.provider_url = url.clone();
        }
        if let Some(url) = vars.get("LOOM_MODEL_URL") {
            self.models.base_url = url.clone();
        }
    }
}
