//! Runtime configuration.
//!
//! Sources, in order of precedence: CLI flags, a TOML config file, built-in
//! defaults. The OpenAI API key is deliberately not a setting; it comes
//! from the environment (`OPENAI_API_KEY`), loaded via dotenv in the
//! binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

/// Command line interface of the debugger core.
#[derive(Parser, Debug, Default)]
#[command(
    name = "marionette",
    about = "Interactive debugger core for autonomous LLM agents",
    version
)]
pub struct Cli {
    /// Path to a TOML config file. CLI flags take precedence over it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Hostname to bind both channels on.
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the agent (instrumentation API) connection.
    #[arg(long)]
    pub agent_port: Option<u16>,

    /// Port for the UI connection.
    #[arg(long)]
    pub ui_port: Option<u16>,

    /// LLM model used for breakpoint summarization.
    #[arg(long)]
    pub model: Option<String>,

    /// Directory run files and transcripts are written to.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Run files to load into history on startup.
    #[arg(short, long, num_args = 0..)]
    pub runs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    host: Option<String>,
    agent_port: Option<u16>,
    ui_port: Option<u16>,
    model: Option<String>,
    api_base: Option<String>,
    log_dir: Option<PathBuf>,
    runs: Vec<PathBuf>,
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub agent_port: u16,
    pub ui_port: u16,
    pub model: String,
    pub api_base: String,
    pub log_dir: PathBuf,
    pub runs: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            agent_port: 8765,
            ui_port: 4567,
            model: "gpt-5-nano".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            log_dir: PathBuf::from("logs"),
            runs: Vec::new(),
        }
    }
}

impl Settings {
    /// Resolve settings from the CLI and, if given, its config file.
    pub fn load(cli: Cli) -> anyhow::Result<Settings> {
        let mut settings = Settings::default();

        if let Some(path) = &cli.config {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            settings.apply_file(file);
            tracing::info!("loaded configuration from {}", path.display());
        }

        if let Some(host) = cli.host {
            settings.host = host;
        }
        if let Some(port) = cli.agent_port {
            settings.agent_port = port;
        }
        if let Some(port) = cli.ui_port {
            settings.ui_port = port;
        }
        if let Some(model) = cli.model {
            settings.model = model;
        }
        if let Some(log_dir) = cli.log_dir {
            settings.log_dir = log_dir;
        }
        if !cli.runs.is_empty() {
            settings.runs = cli.runs;
        }

        Ok(settings)
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.agent_port {
            self.agent_port = port;
        }
        if let Some(port) = file.ui_port {
            self.ui_port = port;
        }
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(api_base) = file.api_base {
            self.api_base = api_base;
        }
        if let Some(log_dir) = file.log_dir {
            self.log_dir = log_dir;
        }
        if !file.runs.is_empty() {
            self.runs = file.runs;
        }
    }

    pub fn agent_addr(&self) -> String {
        format!("{}:{}", self.host, self.agent_port)
    }

    pub fn ui_addr(&self) -> String {
        format!("{}:{}", self.host, self.ui_port)
    }
}
