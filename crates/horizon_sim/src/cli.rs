//! Command-line interface handling for the session simulator.
//!
//! Every option here overrides the matching value from the configuration file.

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the run duration in seconds
    pub duration_secs: Option<u64>,
    /// Optional override for the number of simulated users
    pub users: Option<u32>,
    /// Optional override for the number of simulated bots
    pub bots: Option<u32>,
    /// Print the final occupancy report as JSON
    pub stats_json: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    /// Builds the clap command definition.
    pub fn command() -> Command {
        Command::new("Horizon Session Simulator")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Drives many zone-system replicas through one in-memory session")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("horizon-sim.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("duration")
                    .short('d')
                    .long("duration")
                    .value_name("SECONDS")
                    .help("Stop the run after this many seconds (0 runs until Ctrl+C)")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("users")
                    .short('u')
                    .long("users")
                    .value_name("COUNT")
                    .help("Number of simulated users")
                    .value_parser(value_parser!(u32)),
            )
            .arg(
                Arg::new("bots")
                    .long("bots")
                    .value_name("COUNT")
                    .help("Number of simulated bots")
                    .value_parser(value_parser!(u32)),
            )
            .arg(
                Arg::new("stats-json")
                    .long("stats-json")
                    .help("Print the final occupancy report as JSON on stdout")
                    .action(ArgAction::SetTrue),
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("horizon-sim.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            duration_secs: matches.get_one::<u64>("duration").copied(),
            users: matches.get_one::<u32>("users").copied(),
            bots: matches.get_one::<u32>("bots").copied(),
            stats_json: matches.get_flag("stats-json"),
        }
    }

    /// Parses an explicit argument list.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(Self::command().try_get_matches_from(args)?))
    }
}
