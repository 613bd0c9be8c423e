// Runner configuration for the execution core
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1MB
pub const DEFAULT_CONFIG_PATH: &str = "config/runner.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub file_extension: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-u".to_string()],
            file_extension: "py".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub interpreter: InterpreterConfig,
    pub timeout_ms: u64,
    pub scratch_dir: PathBuf,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
    /// Arm an alarm inside generated test programs as a second timeout layer
    pub in_program_timeout: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            scratch_dir: std::env::temp_dir(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            in_program_timeout: true,
        }
    }
}

impl RunnerConfig {
    /// Load runner configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runner config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: RunnerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config/runner.json when present, defaults otherwise, then apply
    /// environment overrides.
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let config = if default_path.exists() {
            Self::load(default_path)?
        } else {
            tracing::debug!("{} not found, using built-in defaults", DEFAULT_CONFIG_PATH);
            Self::default()
        };

        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply KATA_* overrides. The lookup is injected so tests do not have
    /// to touch the process environment.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup("KATA_INTERPRETER") {
            self.interpreter.command = command;
        }
        if let Some(timeout) = lookup("KATA_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .trim()
                .parse()
                .with_context(|| format!("Invalid KATA_TIMEOUT_MS: {}", timeout))?;
        }
        if let Some(dir) = lookup("KATA_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("KATA_IN_PROGRAM_TIMEOUT") {
            self.in_program_timeout = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interpreter.command.trim().is_empty() {
            bail!("Interpreter command cannot be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_source_bytes == 0 || self.max_output_bytes == 0 {
            bail!("Size limits must be greater than zero");
        }
        Ok(())
    }
}
