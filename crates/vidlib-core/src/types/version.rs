//! Four-part product version of the target executable.

use std::fmt;
use std::str::FromStr;

use crate::error::VidlibError;

/// Product version `major.minor.build.revision` of a target binary.
///
/// Database files are named after this version with `_` separators
/// (`Game.1_5_97_0.bin`), which is what alias redirection rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileVersion(pub [i32; 4]);

impl FileVersion
{
    /// Build a version from its four parts.
    pub const fn new(major: i32, minor: i32, build: i32, revision: i32) -> Self
    {
        Self([major, minor, build, revision])
    }

    /// The four parts in order.
    pub fn parts(&self) -> [i32; 4]
    {
        self.0
    }

    /// Token embedded in database file names, e.g. `1_5_97_0`.
    pub fn file_token(&self) -> String
    {
        let [a, b, c, d] = self.0;
        format!("{a}_{b}_{c}_{d}")
    }

    /// Parse a dotted product version string.
    ///
    /// Accepts one to four parts, each in `0..65536`; missing parts are zero.
    /// Versions that are all zero or exactly `1.0.0.0` are placeholders left by
    /// build tools and are rejected.
    ///
    /// ```rust
    /// use vidlib_core::types::FileVersion;
    ///
    /// assert_eq!(FileVersion::parse("1.5.97"), Some(FileVersion::new(1, 5, 97, 0)));
    /// assert_eq!(FileVersion::parse("1.0.0.0"), None);
    /// assert_eq!(FileVersion::parse("1.2.3.4.5"), None);
    /// ```
    pub fn parse(text: &str) -> Option<Self>
    {
        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return None;
        }

        let mut result = [0i32; 4];
        for (slot, part) in result.iter_mut().zip(&parts) {
            let value: i32 = part.parse().ok()?;
            if !(0..65536).contains(&value) {
                return None;
            }
            *slot = value;
        }

        Self::from_parts(result)
    }

    /// Validate raw numeric parts with the same placeholder rules as [`FileVersion::parse`].
    pub fn from_parts(parts: [i32; 4]) -> Option<Self>
    {
        let version = Self(parts);
        if version.is_placeholder() {
            None
        } else {
            Some(version)
        }
    }

    fn is_placeholder(&self) -> bool
    {
        let [a, rest @ ..] = self.0;
        rest.iter().all(|&part| part == 0) && (a == 0 || a == 1)
    }
}

impl fmt::Display for FileVersion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for FileVersion
{
    type Err = VidlibError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        Self::parse(s).ok_or_else(|| VidlibError::InvalidArgument(format!("invalid file version `{s}`")))
    }
}

impl From<[i32; 4]> for FileVersion
{
    fn from(parts: [i32; 4]) -> Self
    {
        Self(parts)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_file_token()
    {
        assert_eq!(FileVersion::new(1, 5, 97, 0).file_token(), "1_5_97_0");
    }

    #[test]
    fn test_parse_rejects_out_of_range_parts()
    {
        assert_eq!(FileVersion::parse("1.65536"), None);
        assert_eq!(FileVersion::parse("1.-2"), None);
        assert_eq!(FileVersion::parse("a.b"), None);
    }

    #[test]
    fn test_parse_rejects_placeholders()
    {
        assert_eq!(FileVersion::parse("0.0.0.0"), None);
        assert_eq!(FileVersion::parse("1"), None);
        assert_eq!(FileVersion::parse("2"), Some(FileVersion::new(2, 0, 0, 0)));
        assert_eq!(FileVersion::parse("1.0.0.1"), Some(FileVersion::new(1, 0, 0, 1)));
    }

    #[test]
    fn test_display_and_from_str()
    {
        let version: FileVersion = "1.6.640.0".parse().unwrap();
        assert_eq!(version.to_string(), "1.6.640.0");
        assert!("".parse::<FileVersion>().is_err());
    }
}
