pub mod config;
pub mod ops;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// TextBlast: segmented SMS newsletters with scheduled dispatch.
#[derive(Debug, Parser)]
#[command(name = "textblast", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the API server and run ticker (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Dispatch a newsletter to its current recipients now and print the report.
    Dispatch {
        /// Newsletter id.
        newsletter_id: Uuid,
    },
    /// Print delivery statistics as JSON.
    Stats {
        /// Restrict output to one newsletter.
        newsletter_id: Option<Uuid>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `TB_CONFIG` (or `config.toml`
/// by default). Returns the parsed [`Config`] and the path that was used.
///
/// A missing file yields the built-in defaults.
///
/// [`Config`]: tb_domain::config::Config
pub fn load_config() -> anyhow::Result<(tb_domain::config::Config, String)> {
    let config_path = std::env::var("TB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tb_domain::config::Config::default()
    };

    Ok((config, config_path))
}
