//! Conversion of behavioral task logs and electrophysiology recordings into
//! NWB containers.
//!
//! The pipeline per session is:
//!
//! 1. [`prepare::prepare_data`] parses the tab separated task log (and sync
//!    file) into a [`task::Task`] and saves it.
//! 2. [`convert::convert_data`] loads the task record, session metadata,
//!    spike and LFP files and writes one container per session.
//!
//! [`run::run_all_conversions`] applies both steps to every session found on
//! disk.

pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod io;
pub mod metadata;
pub mod nwb;
pub mod parser;
pub mod prepare;
pub mod reader;
pub mod run;
pub mod task;

pub use config::{Config, Settings};
pub use error::{ConvError, Result};
pub use events::{EventHandler, EventKind, EventTable};
pub use parser::{parse_lines_log, parse_lines_sync, process_session, Diagnostic, ParseReport};
pub use task::Task;
