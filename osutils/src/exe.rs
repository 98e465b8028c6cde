use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Output},
};

use anyhow::{anyhow, bail, Context, Error};
use log::trace;

use crate::crate_private::Sealed;

/// Extension for the result of running a process to check its status and
/// produce anyhow errors that carry everything the process printed.
///
/// This is a sealed trait, so it cannot be implemented outside of this crate.
pub trait OutputChecker: Sealed {
    fn is_success(&self) -> bool;

    /// Exit code of the process, if it exited normally.
    fn exit_code(&self) -> Option<i32>;

    /// Signal that terminated the process, if any.
    fn end_signal(&self) -> Option<i32>;

    fn output(&self) -> String;

    fn error_output(&self) -> String;

    /// All available output, for reporting or debugging.
    fn output_report(&self) -> String {
        let sections = [("stdout", self.output()), ("stderr", self.error_output())];
        sections
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(name, text)| format!("{name}:\n{text}\n"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Produce a string explaining the exit status of the process.
    fn explain_exit(&self) -> String {
        if let Some(code) = self.exit_code() {
            format!("process exited with status: {code}")
        } else if let Some(signal) = self.end_signal() {
            format!("process was terminated by signal: {signal}")
        } else {
            "process exited with unknown status".into()
        }
    }

    /// Check that the process exited successfully, otherwise produce an error.
    fn check(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }

        Err(match self.output_report() {
            s if !s.is_empty() => anyhow!("Process output:\n{}", s).context(self.explain_exit()),
            _ => anyhow!("(No output was captured)").context(self.explain_exit()),
        })
    }

    /// Check that the process exited successfully and return its stdout.
    fn check_output(&self) -> Result<String, Error> {
        self.check()?;
        Ok(self.output())
    }
}

impl Sealed for Output {}

impl OutputChecker for Output {
    fn is_success(&self) -> bool {
        self.status.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.status.signal()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into()
    }

    fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into()
    }
}

impl Sealed for Result<Output, std::io::Error> {}

impl OutputChecker for Result<Output, std::io::Error> {
    fn is_success(&self) -> bool {
        self.as_ref().is_ok_and(|output| output.is_success())
    }

    fn exit_code(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.exit_code())
    }

    fn end_signal(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.end_signal())
    }

    fn output(&self) -> String {
        self.as_ref()
            .map(|output| output.output())
            .unwrap_or_default()
    }

    fn error_output(&self) -> String {
        self.as_ref()
            .map(|output| output.error_output())
            .unwrap_or_default()
    }

    fn explain_exit(&self) -> String {
        match self {
            Ok(output) => output.explain_exit(),
            Err(e) => format!("Failed to execute process: {e}"),
        }
    }

    fn check(&self) -> Result<(), Error> {
        match self {
            Ok(output) => output.check(),
            Err(e) => bail!("Failed to execute process: {e}"),
        }
    }
}

pub trait RunAndCheck: Sealed {
    /// Run the command, failing if it does not exit successfully.
    fn run_and_check(&mut self) -> Result<(), Error>;

    /// Run the command and return its stdout, failing if it does not exit
    /// successfully.
    fn output_and_check(&mut self) -> Result<String, Error>;

    /// Render the command line for logs and error messages.
    fn render_command(&self) -> String;
}

impl Sealed for Command {}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        self.output_and_check().map(|_| ())
    }

    fn output_and_check(&mut self) -> Result<String, Error> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let result = self.output();
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            result.explain_exit(),
            result.output_report(),
        );
        result
            .check_output()
            .with_context(|| format!("Error when running: {rendered_command}"))
    }

    fn render_command(&self) -> String {
        std::iter::once(self.get_program().to_string_lossy())
            .chain(self.get_args().map(|arg| arg.to_string_lossy()))
            .map(|arg| {
                if arg.contains(' ') {
                    format!("'{arg}'")
                } else {
                    arg.into()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
