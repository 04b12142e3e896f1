//! Command-line arguments for the intake host.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Conversation intake host: reads `identity|message` lines on stdin and
/// writes one JSON turn outcome per line on stdout.
#[derive(Parser, Debug)]
#[command(name = "intake", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory holding the session database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Base URL for the offline checkout links.
    #[arg(long = "checkout-url", default_value = "https://pay.example.com/checkout")]
    pub checkout_url: String,

    /// Keep sessions in memory only.
    #[arg(long = "in-memory")]
    pub in_memory: bool,
}

impl CliArgs {
    /// Priority: --config flag > INTAKE_CONFIG env var > ./intake.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("INTAKE_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("intake.toml")
    }

    /// Returns `None` when the config file value should be used.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let args = CliArgs::parse_from([
            "intake",
            "--config",
            "/tmp/intake.toml",
            "-l",
            "debug",
            "--in-memory",
        ]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/intake.toml"));
        assert_eq!(args.resolve_log_level("info"), "debug");
        assert!(args.in_memory);
        assert!(args.resolve_data_dir().is_none());
    }

    #[test]
    fn test_log_level_falls_back_to_config() {
        let args = CliArgs::parse_from(["intake"]);
        assert_eq!(args.resolve_log_level("warn"), "warn");
        assert_eq!(args.checkout_url, "https://pay.example.com/checkout");
    }
}
