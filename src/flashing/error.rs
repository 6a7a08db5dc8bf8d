use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Describes any error that happened during, or in preparation for, the
/// flashing procedure.
///
/// All of these are construction-time failures: the startup sequence is
/// aborted before a single step is returned. Failures of an individual step
/// during execution are the execution engine's concern and are described by
/// the step metadata instead.
#[derive(Debug, Error)]
pub enum FlashError {
    /// A required board setting is missing, empty or zero-valued.
    #[error("required setting `{key}` is missing or invalid: {problem}")]
    Configuration {
        /// The configuration key that was rejected.
        key: &'static str,
        /// Why the value was rejected.
        problem: &'static str,
    },

    /// The whole board configuration failed validation.
    #[error("invalid board configuration")]
    Config(#[from] ConfigError),

    /// A file required for programming does not exist.
    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A binary artifact does not look like what it claims to be.
    #[error("{}: {reason}", .path.display())]
    Format {
        /// The file that failed validation.
        path: PathBuf,
        /// What exactly was wrong with it.
        reason: String,
    },

    /// The loader stub's entry point lies outside its own image.
    #[error(
        "entry point {entry_point:#010x} lies outside the loader image {load_address:#010x}..{load_end:#010x}"
    )]
    InvalidEntryPoint {
        /// The entry point declared by the stub header.
        entry_point: u32,
        /// The address the stub image is loaded at.
        load_address: u32,
        /// One past the last byte of the loaded stub image.
        load_end: u32,
    },

    /// A region reached the stub protocol driver without a backing file.
    /// The restore command can only stream files, so in-memory regions must
    /// be materialized first.
    #[error("region at {offset:#x} has no backing file")]
    UnmaterializedRegion {
        /// Flash offset of the offending region.
        offset: u32,
    },

    /// A path that must be passed to the `restore` command contains
    /// whitespace. The command syntax cannot quote paths.
    #[error("path cannot contain whitespace: {}", .0.display())]
    UnusablePath(PathBuf),

    /// The stub never cleared the busy sentinel from its result word.
    #[error("the loader stub did not report completion within {}ms", .timeout.as_millis())]
    ProtocolTimeout {
        /// How long the result word was polled before giving up.
        timeout: Duration,
    },

    /// The user cancelled the operation through the progress interface.
    #[error("operation cancelled by the user")]
    Cancelled,

    /// Reading or writing a file failed.
    #[error("could not access {}", .path.display())]
    Io {
        /// The file that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The application ELF file could not be parsed.
    #[error("could not read ELF file")]
    Elf(#[from] object::read::Error),

    /// The serial bootloader reported a failure.
    #[error("serial bootloader error: {0}")]
    Bootloader(String),
}

impl FlashError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| FlashError::Io { path, source }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FlashError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
