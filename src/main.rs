use std::{panic, path::Path, process::ExitCode};

use anyhow::{Context, Error};
use clap::Parser;
use log::{debug, error, info};

use commission_api::{
    config::RaidPolicy,
    error::{CommissionError, CommissionResultExt, ControllerError, InternalError, ReportError},
};
use megaraid_commission::{
    cli::{Cli, Commands, MegaCliArgs, RunArgs, ShowKind},
    commission, install, output, Report, VERSION,
};
use osutils::megacli::MegaCli;

/// Install MegaCli if needed and return a handle on it.
fn megacli(args: &MegaCliArgs) -> Result<MegaCli, CommissionError> {
    install::ensure_megacli(&args.megacli, args.download_path.as_deref())
        .message("Failed to set up MegaCli")?;

    let megacli = MegaCli::new(&args.megacli);
    debug!("Using MegaCli at '{}'", megacli.path().display());
    Ok(megacli)
}

fn run(args: &RunArgs) -> Result<(), CommissionError> {
    let policy = match &args.config {
        Some(path) => RaidPolicy::load(path).message("Failed to load RAID policy"),
        None => Ok(RaidPolicy::default()),
    };

    let mut report = Report::default();
    let res = policy.and_then(|policy| {
        let megacli = megacli(&args.megacli)?;
        commission(&megacli, &policy, args.dry_run, &mut report)
    });

    // Save the report if requested, even a partial one after a failure
    if let Some(path) = &args.status {
        if let Err(e) = output::write_yaml(&report, Some(path.as_path())) {
            error!("Failed to write report: {e:?}");
        }
    }

    // Save the error if requested
    if let (Err(e), Some(path)) = (&res, &args.error) {
        if let Err(e2) = output::write_yaml(e, Some(path.as_path())) {
            error!("Failed to write error: {e2:?}");
        }
    }

    res
}

fn show(kind: ShowKind, outfile: Option<&Path>, args: &MegaCliArgs) -> Result<(), CommissionError> {
    let megacli = megacli(args)?;
    match kind {
        ShowKind::Adapters => {
            let adapters = megacli
                .adapters()
                .structured(ControllerError::ListAdapters)?;
            output::write_yaml(&adapters, outfile)
        }
        ShowKind::LogicalDrives => {
            let drives = megacli
                .logical_drives()
                .structured(ControllerError::ListLogicalDrives)?;
            output::write_yaml(&drives, outfile)
        }
        ShowKind::PhysicalDrives => {
            let drives = megacli
                .physical_drives()
                .structured(ControllerError::ListPhysicalDrives)?;
            output::write_yaml(&drives, outfile)
        }
    }
}

fn run_command(command: &Commands) -> Result<(), CommissionError> {
    // Log version ASAP
    info!("megaraid-commission version: {VERSION}");

    let res = panic::catch_unwind(|| match command {
        Commands::Run(args) => run(args),
        Commands::Show {
            kind,
            outfile,
            megacli,
        } => show(*kind, outfile.as_deref(), megacli),
        Commands::Validate { config } => RaidPolicy::load(config).map(|policy| {
            info!(
                "RAID policy is valid: RAID {} from {} to {} drives",
                policy.raid_level, policy.min_drives, policy.max_drives
            )
        }),
    });

    match res {
        Err(e) => Err(CommissionError::new(InternalError::Panic(format!("{e:?}")))),
        Ok(r) => r.message(format!("Failed to execute '{command}' command")),
    }
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    // Progress goes to stdout, where MAAS collects the script output
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(args.verbosity)
        .target(env_logger::Target::Stdout)
        .try_init()
        .context("Logger already registered")
}

fn main() -> ExitCode {
    // Parse args
    let args = Cli::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    if let Err(e) = run_command(&args.command()) {
        error!("megaraid-commission failed: {e:?}");
        return ExitCode::from(2);
    }

    ExitCode::SUCCESS
}
