use std::{path::Path, process::Command};

use anyhow::{Context, Error};
use log::info;

use crate::exe::RunAndCheck;

/// Converts an RPM package to a Debian package and installs it.
///
/// This function uses `alien --to-deb --install`, so it requires root
/// privileges and a working dpkg.
///
pub fn install(package: impl AsRef<Path>) -> Result<(), Error> {
    info!("Installing package '{}'", package.as_ref().display());

    Command::new("alien")
        .arg("--to-deb")
        .arg("--install")
        .arg(package.as_ref())
        .run_and_check()
        .context("Failed to run alien install")
}
