use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tide-keypool",
    version,
    about = "API key pool with least-used selection and rate-limit aware retries",
    long_about = "Serves status and maintenance endpoints for the API key pools of the tide and weather providers, backed by Redis or process memory."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pub pretty_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the status server (default)
    Serve,

    /// Validate configuration and list the keys each pool resolves
    CheckConfig {
        /// Configuration file to validate
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["tide-keypool"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_check_config_takes_a_file() {
        let cli = Cli::try_parse_from(["tide-keypool", "check-config", "pools.yaml"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::CheckConfig {
                file: Some(PathBuf::from("pools.yaml"))
            })
        );
    }
}
