use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::config::InvalidPolicyError;

/// The machine is not in a state where the vendor utility can be used.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEnvironmentError {
    #[error("'DOWNLOAD_PATH' environment variable is empty, cannot locate the MegaCli package")]
    DownloadPathUnset,
    #[error("Could not find a MegaCli package matching '{pattern}'")]
    MegaCliPackageNotFound { pattern: String },
    #[error("Failed to install MegaCli package '{package}'")]
    InstallMegaCli { package: String },
    #[error("MegaCli utility is still missing at '{path}' after installing its package")]
    MegaCliMissingAfterInstall { path: String },
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load RAID policy file from '{path}'")]
    LoadPolicy { path: String },
    #[error("Failed to parse RAID policy")]
    ParsePolicy,
    #[error("Invalid RAID policy: {0}")]
    InvalidPolicy(#[from] InvalidPolicyError),
}

/// The RAID controller could not be queried or refused a command.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerError {
    #[error("Failed to list RAID adapters")]
    ListAdapters,
    #[error("Failed to list logical drives")]
    ListLogicalDrives,
    #[error("Failed to list physical drives")]
    ListPhysicalDrives,
    #[error("Failed to create logical drive on adapter #{adapter_id}")]
    CreateLogicalDrive { adapter_id: u32 },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Failed to serialize output")]
    SerializeOutput,
    #[error("Failed to write output to '{path}'")]
    WriteOutput { path: String },
    #[error("Panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` is a user-meaningful category of failure.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The vendor utility is missing and cannot be installed.
    #[error(transparent)]
    ExecutionEnvironment(#[from] ExecutionEnvironmentError),

    /// A policy file or command line argument was invalid.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// The controller failed to report its state or to build an array.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// A bug or an uncategorized failure.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct CommissionErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct CommissionError(Box<CommissionErrorInner>);
impl CommissionError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        Self::with_source(kind, None)
    }

    #[track_caller]
    fn with_source(kind: impl Into<ErrorKind>, source: Option<anyhow::Error>) -> Self {
        CommissionError(Box::new(CommissionErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source,
            context: Vec::new(),
        }))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Adapter the failure happened on, when it is tied to one.
    pub fn adapter_id(&self) -> Option<u32> {
        match self.0.kind {
            ErrorKind::Controller(ControllerError::CreateLogicalDrive { adapter_id }) => {
                Some(adapter_id)
            }
            _ => None,
        }
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured CommissionError.
    fn structured(self, kind: K) -> Result<T, CommissionError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, CommissionError> {
        match self {
            Some(t) => Ok(t),
            None => Err(CommissionError::with_source(kind, None)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, CommissionError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(CommissionError::with_source(kind, Some(e.into()))),
        }
    }
}

pub trait CommissionResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, CommissionError>;
}

impl<T> CommissionResultExt<T> for Result<T, CommissionError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, CommissionError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Serialize for CommissionError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let inner = &self.0;
        let mut state = serializer.serialize_struct("commission-error", 7)?;
        state.serialize_field("category", <&str>::from(&inner.kind))?;
        state.serialize_field("message", &inner.kind.to_string())?;
        match inner.kind {
            ErrorKind::ExecutionEnvironment(ref e) => state.serialize_field("error", e)?,
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Controller(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("adapter-id", &self.adapter_id())?;

        // Outermost message first
        let context = inner
            .context
            .iter()
            .rev()
            .map(|(message, _)| message.as_ref())
            .collect::<Vec<_>>();
        state.serialize_field("context", &context)?;

        state.serialize_field(
            "location",
            &format!("{}:{}", inner.location.file(), inner.location.line()),
        )?;
        state.serialize_field("cause", &inner.source.as_ref().map(|e| format!("{e:?}")))?;
        state.end()
    }
}

/// Writes `text` as a numbered entry, indenting continuation lines.
fn write_entry(f: &mut std::fmt::Formatter<'_>, index: usize, text: &str) -> std::fmt::Result {
    for (i, line) in text.split('\n').enumerate() {
        if i == 0 {
            write!(f, "{: >5}: ", index)?;
        } else {
            f.write_str("\n       ")?;
        }
        f.write_str(line)?;
    }
    Ok(())
}

impl Debug for CommissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                write_entry(f, i, context)?;
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            let mut index = 0;
            while let Some(e) = source {
                write_entry(f, index, &e.to_string())?;
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
