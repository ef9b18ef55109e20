//! # Error Types
//!
//! Error handling for symbol database loading, type registration and object
//! resolution.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Address, FileVersion};

/// Which part of a loaded database disagrees with the running binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind
{
    /// The 4-part product version of the executable.
    FileVersion,
    /// The library (binding) version the database was produced for.
    LibraryVersion,
    /// The content hash of the database.
    Hash,
}

impl fmt::Display for MismatchKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            MismatchKind::FileVersion => "file version",
            MismatchKind::LibraryVersion => "library version",
            MismatchKind::Hash => "hash",
        };
        write!(f, "{label}")
    }
}

/// Main error type for vidlib operations
///
/// ## Error Categories
///
/// 1. **Format errors**: UnsupportedFormatVersion, CorruptDatabase, Alias*, DuplicateVid, DuplicateVtable
/// 2. **Configuration errors**: Configuration (bad registrations, unknown ids)
/// 3. **Version drift**: VidNotFound, SignatureMismatch, FieldNotFound, MissingCachedValue,
///    VersionMismatch, Unresolved
/// 4. **Memory faults**: MemoryRead
/// 5. **Casts**: Cast
/// 6. **I/O errors**: Io
///
/// Expected absence (null address, unknown vtable) is never an error; those
/// lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum VidlibError
{
    /// The database file uses a format version this crate cannot read.
    #[error("Unsupported database format version {0} (supported: 2-3)")]
    UnsupportedFormatVersion(i32),

    /// The database stream ended early or contains invalid data.
    #[error("Corrupt database: {0}")]
    CorruptDatabase(String),

    /// Alias files redirected more times than allowed.
    ///
    /// This almost always means two alias files point at each other.
    #[error("Alias loading depth exceeded ({depth}) while loading {path}")]
    AliasDepthExceeded
    {
        /// Depth at which the alias was encountered
        depth: u32,
        /// File that contained the offending alias
        path: PathBuf,
    },

    /// An alias file rewrote to its own path.
    #[error("Alias in {0} points to the same file")]
    AliasSelfReference(PathBuf),

    /// The alias file's path does not contain its own version token.
    #[error("Unable to resolve alias: path {path} does not contain `{token}`")]
    AliasPathMismatch
    {
        /// Path of the alias file
        path: PathBuf,
        /// Version token that was searched for
        token: String,
    },

    /// Two functions/globals (or two types) share a non-zero VID.
    #[error("Duplicate {namespace} version independent id {vid}")]
    DuplicateVid
    {
        /// Which namespace the collision happened in
        namespace: &'static str,
        /// The colliding identifier
        vid: u64,
    },

    /// Two types share a non-zero vtable offset.
    #[error("Duplicate type vtable offset 0x{0:x}")]
    DuplicateVtable(u64),

    /// Invalid type registration or registry lookup.
    ///
    /// These are programming or plugin mismatches that must stop initialization:
    /// continuing would silently mis-resolve objects.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A VID is not present in the loaded database.
    ///
    /// Usually means the caller must be updated for the running binary version.
    #[error("Object with version independent id {0} was not found in the version database")]
    VidNotFound(u64),

    /// The bytes at a resolved address do not match the expected signature.
    #[error("Object with version independent id {vid} did not match byte signature at {address}")]
    SignatureMismatch
    {
        /// Identifier being resolved
        vid: u64,
        /// Address where the signature was checked
        address: Address,
    },

    /// A field id is missing from a type, or has no known offset.
    #[error("Field {field_id} of type {type_vid} was not found or has no offset")]
    FieldNotFound
    {
        /// VID of the owning type
        type_vid: u64,
        /// Field identifier within the type
        field_id: u32,
    },

    /// A version-specific cached value is a hole in this database.
    #[error("Version specific value {0} is not present in the version database")]
    MissingCachedValue(usize),

    /// The loaded database does not match the running binary.
    #[error("Version database {kind} mismatch: expected {expected}, have {actual}")]
    VersionMismatch
    {
        /// Which header field mismatched
        kind: MismatchKind,
        /// Value required by the running binary
        expected: String,
        /// Value found in the database
        actual: String,
    },

    /// A cached accessor failed to resolve.
    #[error("Trying to use {0} that failed to initialize; it is not supported in the current version")]
    Unresolved(String),

    /// No version database is loaded in the context.
    #[error("Version database is not loaded")]
    DatabaseNotLoaded,

    /// Reading foreign memory failed (bad pointer or unmapped page).
    #[error("Failed to read memory at {address}: {message}")]
    MemoryRead
    {
        /// Address of the failed read
        address: Address,
        /// Platform error description
        message: String,
    },

    /// A resolved object is not assignable to the requested contract.
    #[error("Unable to cast `{concrete}` to `{contract}`")]
    Cast
    {
        /// Requested contract
        contract: &'static str,
        /// Concrete type found at the address
        concrete: &'static str,
    },

    /// Invalid argument passed to a vidlib function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VidlibError
{
    /// Returns `true` for errors raised while reading or validating a database file.
    pub fn is_format_error(&self) -> bool
    {
        matches!(
            self,
            VidlibError::UnsupportedFormatVersion(_)
                | VidlibError::CorruptDatabase(_)
                | VidlibError::AliasDepthExceeded { .. }
                | VidlibError::AliasSelfReference(_)
                | VidlibError::AliasPathMismatch { .. }
                | VidlibError::DuplicateVid { .. }
                | VidlibError::DuplicateVtable(_)
        )
    }

    /// Returns `true` for errors caused by running against a different binary version.
    pub fn is_version_drift(&self) -> bool
    {
        matches!(
            self,
            VidlibError::VidNotFound(_)
                | VidlibError::SignatureMismatch { .. }
                | VidlibError::FieldNotFound { .. }
                | VidlibError::MissingCachedValue(_)
                | VidlibError::VersionMismatch { .. }
                | VidlibError::Unresolved(_)
        )
    }

    pub(crate) fn version_mismatch(kind: MismatchKind, expected: impl ToString, actual: impl ToString) -> Self
    {
        VidlibError::VersionMismatch {
            kind,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn file_version_mismatch(expected: FileVersion, actual: FileVersion) -> Self
    {
        Self::version_mismatch(MismatchKind::FileVersion, expected, actual)
    }
}

/// Convenience type alias for `Result<T, VidlibError>`
///
/// ```rust
/// use vidlib_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, VidlibError>;
