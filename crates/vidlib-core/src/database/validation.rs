//! Checking a loaded database against the running binary.

use tracing::warn;

use super::SymbolDatabase;
use crate::error::{MismatchKind, Result, VidlibError};
use crate::types::FileVersion;

/// What the running binary and the calling library require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedVersion
{
    /// Product version of the running executable
    pub file_version: FileVersion,
    /// Library version the caller was built against, if it cares
    pub library_version: Option<i32>,
    /// Required content hash; `None` or 0 disables the check
    pub hash: Option<u64>,
}

impl ExpectedVersion
{
    /// Only check the product version.
    pub fn file(file_version: FileVersion) -> Self
    {
        Self {
            file_version,
            library_version: None,
            hash: None,
        }
    }
}

impl SymbolDatabase
{
    /// Check that this database belongs to the running binary.
    ///
    /// Checks, in order, the product version (the one originally requested,
    /// so an alias file for the running version passes), the library version
    /// and the hash. The first mismatch is reported.
    ///
    /// ## Errors
    ///
    /// `VersionMismatch` with the [`MismatchKind`] of the failed check.
    pub fn validate(&self, expected: &ExpectedVersion) -> Result<()>
    {
        let result = self.check(expected);
        if let Err(err) = &result {
            warn!(error = %err, "Symbol database does not match the running binary");
        }
        result
    }

    fn check(&self, expected: &ExpectedVersion) -> Result<()>
    {
        let actual = self.requested_version();
        if actual != expected.file_version {
            return Err(VidlibError::file_version_mismatch(expected.file_version, actual));
        }

        if let Some(library_version) = expected.library_version {
            if library_version != self.library_version {
                return Err(VidlibError::version_mismatch(
                    MismatchKind::LibraryVersion,
                    library_version,
                    self.library_version,
                ));
            }
        }

        if let Some(hash) = expected.hash.filter(|hash| *hash != 0) {
            if hash != self.hash {
                return Err(VidlibError::version_mismatch(
                    MismatchKind::Hash,
                    format!("{hash:X}"),
                    format!("{:X}", self.hash),
                ));
            }
        }
        Ok(())
    }
}
