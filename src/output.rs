use std::path::Path;

use serde::Serialize;

use commission_api::error::{CommissionError, InternalError, ReportError};

/// Write `value` as YAML to `outfile`, or to stdout when no file is given.
pub fn write_yaml<T: Serialize>(value: &T, outfile: Option<&Path>) -> Result<(), CommissionError> {
    let yaml = serde_yaml::to_string(value).structured(InternalError::SerializeOutput)?;

    match outfile {
        Some(path) => std::fs::write(path, yaml).structured(InternalError::WriteOutput {
            path: path.to_string_lossy().to_string(),
        }),
        None => {
            print!("{yaml}");
            Ok(())
        }
    }
}
