pub mod toml_config;

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "blood-search")]
#[command(about = "Matches queued blood requests against nearby branch inventory once a day")]
pub struct CliConfig {
    #[arg(short, long, default_value = "blood-search.toml", help = "Path to the TOML configuration file")]
    pub config: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[arg(long, help = "Drain the queue once and exit instead of waiting for the daily schedule")]
    pub once: bool,

    #[arg(long, help = "Do not run database migrations on startup")]
    pub skip_migrations: bool,
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = CliConfig::parse_from(["blood-search"]);
        assert_eq!(cli.config, "blood-search.toml");
        assert!(!cli.verbose);
        assert!(!cli.once);
        assert!(!cli.skip_migrations);
    }

    #[test]
    fn test_cli_flags() {
        let cli = CliConfig::parse_from(["blood-search", "-c", "prod.toml", "--once", "--json-logs", "-v"]);
        assert_eq!(cli.config, "prod.toml");
        assert!(cli.once);
        assert!(cli.json_logs);
        assert!(cli.verbose);
    }
}
