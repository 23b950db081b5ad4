use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use geolog_core::config::TimePeriod;
use geolog_core::map::MapProvider;

#[derive(Parser)]
#[command(name = "geolog")]
#[command(about = "Record your location offline-first and sync it when the network is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample positions from a JSON-lines feed and record them
    Track {
        /// Position feed file (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,
        /// Take a single fix and exit
        #[arg(long)]
        once: bool,
        /// Minimum time between recorded samples, in milliseconds
        #[arg(long, value_name = "MS")]
        min_interval_ms: Option<u64>,
        /// Minimum movement between recorded samples, in meters
        #[arg(long, value_name = "METERS")]
        min_distance_m: Option<f64>,
    },
    /// Record one position given on the command line
    Log {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Altitude in meters
        #[arg(long, allow_hyphen_values = true)]
        altitude: Option<f64>,
    },
    /// Deliver queued samples to the backend now
    Sync,
    /// Show samples waiting for delivery
    Pending {
        /// Show dead-lettered samples instead
        #[arg(long)]
        dead: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return dead-lettered samples to the delivery queue
    Requeue,
    /// Delete delivered samples from the local history
    Prune {
        /// Keep samples delivered within this many days
        #[arg(long, value_name = "DAYS")]
        older_than_days: u32,
    },
    /// Route statistics for a time window
    Stats {
        /// Time window
        #[arg(long, value_enum, default_value_t = PeriodArg::Day)]
        period: PeriodArg,
        /// Use the local history instead of the server
        #[arg(long)]
        local: bool,
    },
    /// Render the route as an HTML map
    Map {
        /// Map provider (defaults to GEOLOG_MAP_PROVIDER, then leaflet)
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
        /// Time window
        #[arg(long, value_enum, default_value_t = PeriodArg::Day)]
        period: PeriodArg,
        /// Keep every N-th point
        #[arg(long, value_name = "N", default_value_t = 1)]
        detail: usize,
        /// Use the local history instead of the server
        #[arg(long)]
        local: bool,
        /// Output HTML path
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Manage the backend account
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PeriodArg {
    #[value(name = "15min")]
    FifteenMinutes,
    #[value(name = "1hour")]
    OneHour,
    #[value(name = "3hours")]
    ThreeHours,
    #[value(name = "9hours")]
    NineHours,
    Day,
    All,
}

impl From<PeriodArg> for TimePeriod {
    fn from(value: PeriodArg) -> Self {
        match value {
            PeriodArg::FifteenMinutes => Self::FifteenMinutes,
            PeriodArg::OneHour => Self::OneHour,
            PeriodArg::ThreeHours => Self::ThreeHours,
            PeriodArg::NineHours => Self::NineHours,
            PeriodArg::Day => Self::Day,
            PeriodArg::All => Self::All,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderArg {
    Leaflet,
    GoogleMaps,
}

impl From<ProviderArg> for MapProvider {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Leaflet => Self::Leaflet,
            ProviderArg::GoogleMaps => Self::GoogleMaps,
        }
    }
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Create an account and store the session in the keychain
    Register {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign in and store the session in the keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show who is signed in
    Status,
    /// Forget the stored session
    Logout,
}
