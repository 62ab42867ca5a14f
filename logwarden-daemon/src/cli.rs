//! CLI argument definitions for logwarden-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Logwarden log monitoring daemon.
///
/// Tails the configured log sources, matches lines against detection
/// rules and delivers alerts through the configured channels.
#[derive(Parser, Debug)]
#[command(name = "logwarden-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logwarden.toml configuration file.
    #[arg(short, long, default_value = "logwarden.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Print a default configuration file to stdout and exit.
    #[arg(long)]
    pub print_default_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        DaemonCli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["logwarden-daemon"]);
        assert_eq!(cli.config, PathBuf::from("logwarden.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
        assert!(!cli.print_default_config);
    }

    #[test]
    fn overrides_parse() {
        let cli = DaemonCli::parse_from([
            "logwarden-daemon",
            "--config",
            "/etc/logwarden/logwarden.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/logwarden/logwarden.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }
}
