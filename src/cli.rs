use std::{
    env,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use commission_api::constants::{DOWNLOAD_PATH_ENV, MEGACLI_PATH_DEFAULT};

use crate::VERSION;

/// Build a RAID array out of the unconfigured drives of every MegaRAID
/// adapter that has no logical drive yet.
#[derive(Parser, Debug)]
#[clap(version = VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    #[clap(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// The command to execute, `run` when none was given.
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}

#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct MegaCliArgs {
    /// Path of the MegaCli64 utility
    #[clap(long, default_value = MEGACLI_PATH_DEFAULT)]
    pub megacli: PathBuf,

    /// Directory holding the downloaded MegaCli package, used when the
    /// utility is not installed yet
    #[clap(long, env = DOWNLOAD_PATH_ENV)]
    pub download_path: Option<PathBuf>,
}

impl Default for MegaCliArgs {
    fn default() -> Self {
        Self {
            megacli: MEGACLI_PATH_DEFAULT.into(),
            download_path: env::var_os(DOWNLOAD_PATH_ENV).map(PathBuf::from),
        }
    }
}

#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// RAID policy file, the built-in policy is used when omitted
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Only report what would be built
    #[clap(long)]
    pub dry_run: bool,

    /// Path to save the per-adapter report
    #[clap(short, long)]
    pub status: Option<PathBuf>,

    /// Path to save an eventual fatal error
    #[clap(short, long)]
    pub error: Option<PathBuf>,

    #[clap(flatten)]
    pub megacli: MegaCliArgs,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Build a RAID array on every adapter without logical drives (default)
    Run(RunArgs),

    /// Show what the RAID controller reports
    Show {
        /// What data to retrieve
        #[clap(default_value = "physical-drives")]
        kind: ShowKind,

        /// Path to save the resulting output
        #[clap(short, long)]
        outfile: Option<PathBuf>,

        #[clap(flatten)]
        megacli: MegaCliArgs,
    },

    /// Validate a RAID policy file
    Validate {
        /// Path to a RAID policy file
        #[clap(index = 1)]
        config: PathBuf,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Show { .. } => "show",
            Commands::Validate { .. } => "validate",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShowKind {
    Adapters,
    LogicalDrives,
    PhysicalDrives,
}
