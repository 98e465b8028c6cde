use std::path::{Path, PathBuf};

use log::{debug, info};

use commission_api::{
    constants::MEGACLI_RPM_PATTERN,
    error::{CommissionError, ExecutionEnvironmentError, InternalError, ReportError},
};

/// Make sure the MegaCli utility is present at `megacli`, installing it from
/// the package MAAS downloaded into `download_path` when it is not.
pub fn ensure_megacli(megacli: &Path, download_path: Option<&Path>) -> Result<(), CommissionError> {
    if megacli.exists() {
        debug!("Found MegaCli at '{}'", megacli.display());
        return Ok(());
    }

    info!(
        "MegaCli not found at '{}', installing it",
        megacli.display()
    );

    let download_path = download_path
        .filter(|path| !path.as_os_str().is_empty())
        .structured(ExecutionEnvironmentError::DownloadPathUnset)?;

    let package = find_package(download_path)?;
    osutils::alien::install(&package).structured(ExecutionEnvironmentError::InstallMegaCli {
        package: package.to_string_lossy().to_string(),
    })?;

    if !megacli.exists() {
        return Err(CommissionError::new(
            ExecutionEnvironmentError::MegaCliMissingAfterInstall {
                path: megacli.to_string_lossy().to_string(),
            },
        ));
    }

    Ok(())
}

/// Find the MegaCli RPM inside the download directory. When several versions
/// are present, the first one in lexical order is used.
fn find_package(download_path: &Path) -> Result<PathBuf, CommissionError> {
    let pattern = download_path
        .join(MEGACLI_RPM_PATTERN)
        .to_string_lossy()
        .to_string();

    let mut packages = glob::glob(&pattern)
        .structured(InternalError::Internal("Invalid MegaCli package pattern"))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    packages.sort();

    packages
        .into_iter()
        .next()
        .structured(ExecutionEnvironmentError::MegaCliPackageNotFound { pattern })
}
