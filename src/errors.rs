//! Error taxonomy for the whole pipeline.
//!
//! Each error class carries a different recovery contract:
//! - [`ValidationError`]: the offending item is skipped, the run continues.
//! - [`ReferenceError`]: the offending reference is left untouched and a
//!   warning is recorded; the surrounding item still syncs.
//! - [`RemoteOperationError`]: aborts the current pipeline stage.
//! - [`ArchiveFormatError`]: aborts a cartridge import before any output
//!   is written.
//! - [`ResourceDecodeError`]: the single resource is skipped and reported
//!   in the import summary.

use std::path::PathBuf;

use thiserror::Error;

/// A local source file that cannot be interpreted as valid course content.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field `{field}` in {path}")]
    MissingField { field: &'static str, path: PathBuf },

    #[error("malformed frontmatter in {path}: {reason}")]
    Frontmatter { path: PathBuf, reason: String },

    #[error("unrecognised content kind for {path}")]
    UnknownKind { path: PathBuf },

    #[error("unreadable source file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An asset reference inside authored markdown that cannot be pinned to
/// exactly one local file.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("asset reference `{reference}` is ambiguous ({} candidates: {})",
        candidates.len(),
        candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<PathBuf>,
    },

    #[error("asset reference `{reference}` could not be resolved from {item_dir}")]
    NotFound { reference: String, item_dir: PathBuf },
}

/// A failed call against the remote platform. Aborts the stage it
/// occurred in rather than continuing with half-applied state.
#[derive(Debug, Error)]
#[error("remote operation `{operation}` failed: {source}")]
pub struct RemoteOperationError {
    pub operation: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl RemoteOperationError {
    pub fn new(
        operation: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            operation: operation.into(),
            source,
        }
    }
}

/// A cartridge archive that cannot be trusted as a whole.
#[derive(Debug, Error)]
pub enum ArchiveFormatError {
    #[error("archive has no imsmanifest.xml at its root")]
    MissingManifest,

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("archive member `{name}` escapes the extraction root")]
    UnsafeMemberPath { name: String },

    #[error("archive member `{name}` exceeds the size cap ({size} bytes > {cap} bytes)")]
    MemberTooLarge { name: String, size: u64, cap: u64 },

    #[error("archive member `{name}` has a suspicious compression ratio ({ratio:.0}:1)")]
    SuspiciousCompression { name: String, ratio: f64 },

    #[error("total extracted size exceeds the archive cap ({total} bytes > {cap} bytes)")]
    ArchiveTooLarge { total: u64, cap: u64 },

    #[error("unreadable archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single cartridge resource that could not be decoded. The rest of
/// the import proceeds; these are surfaced in the import report.
#[derive(Debug, Error)]
#[error("resource `{identifier}` could not be decoded: {reason}")]
pub struct ResourceDecodeError {
    pub identifier: String,
    pub reason: String,
}

impl ResourceDecodeError {
    pub fn new(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a whole pipeline run (sync or import), as opposed to the
/// per-item errors above which are collected into reports.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteOperationError),

    #[error(transparent)]
    Archive(#[from] ArchiveFormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
