//! SAM-QFS archiver configuration management
//!
//! The record model lives in [`sam_api_types`], the configuration
//! snapshot in [`sam_config`]. This crate adds the remote boundary: the
//! [`ArchiverDaemon`] trait, its error type, the [`EditSession`] that
//! decides what may be submitted and [`MemoryArchiver`], a daemon that
//! keeps everything in process.

pub use sam_api_types as api_types;
pub use sam_config as config;

mod error;
pub use error::{ArchiverError, ErrorKind, Response, ACTIVATE_ERRORS, ACTIVATE_WARNINGS};

mod remote;
pub use remote::ArchiverDaemon;

mod session;
pub use session::EditSession;

mod memory;
pub use memory::MemoryArchiver;
