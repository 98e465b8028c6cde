pub mod cli;
pub mod commission;
pub mod controller;
pub mod install;
pub mod output;

pub use commission::{commission, AdapterReport, Outcome, Report};
pub use controller::Controller;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
