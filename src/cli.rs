use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// Fan, display and access point daemon for Raspberry Pi boards
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $PICPD_CONFIG, ~/.config/picpd/config.yml
    /// or /etc/picpd/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Overrides `common.log_level` from the config file
    #[arg(long = "log-level")]
    pub log_level: Option<LevelFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from(["picpd", "-c", "/tmp/picpd.yml", "-d", "--log-level", "debug"])
            .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/picpd.yml")));
        assert!(cli.daemonize);
        assert_eq!(cli.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn defaults_to_foreground() {
        let cli = Cli::try_parse_from(["picpd"]).unwrap();

        assert!(!cli.daemonize);
        assert_eq!(cli.config, None);
        assert_eq!(cli.log_level, None);
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["picpd", "--log-level", "loud"]).is_err());
    }
}
