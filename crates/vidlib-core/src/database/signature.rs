//! Byte signatures guarding resolved addresses.
//!
//! A signature is a list of hex bytes with `??`/`?` wildcards, e.g.
//! `48 8B 05 ?? ?? ?? ??`. Each enclosing `[...]` pair means "read a pointer
//! at the current address and continue at the pointee" before comparing, so
//! `[[E8 ??]]` checks the bytes two pointer hops away.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VidlibError};
use crate::memory::ReadMemory;
use crate::types::Address;

/// Parsed byte signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature
{
    derefs: usize,
    bytes: Vec<Option<u8>>,
}

impl Signature
{
    /// Parse signature text.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for unbalanced brackets, non-hex tokens or an empty
    /// pattern.
    ///
    /// ```
    /// use vidlib_core::database::Signature;
    ///
    /// let sig = Signature::parse("[E8 ?? ?? ?? ??]")?;
    /// assert_eq!(sig.derefs(), 1);
    /// assert_eq!(sig.len(), 5);
    /// assert!(sig.matches(&[0xE8, 1, 2, 3, 4]));
    /// # Ok::<(), vidlib_core::error::VidlibError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self>
    {
        let mut pattern = text.trim();
        let mut derefs = 0;
        while pattern.len() >= 2 && pattern.starts_with('[') && pattern.ends_with(']') {
            pattern = pattern[1..pattern.len() - 1].trim();
            derefs += 1;
        }
        if pattern.contains(['[', ']']) {
            return Err(VidlibError::InvalidArgument(format!("unbalanced brackets in signature `{text}`")));
        }

        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(None);
                continue;
            }
            let value = u8::from_str_radix(token, 16)
                .map_err(|err| VidlibError::InvalidArgument(format!("invalid signature token `{token}`: {err}")))?;
            bytes.push(Some(value));
        }

        if bytes.is_empty() {
            return Err(VidlibError::InvalidArgument("signature pattern is empty".to_string()));
        }

        Ok(Self { derefs, bytes })
    }

    /// Number of pointer hops before comparing.
    pub fn derefs(&self) -> usize
    {
        self.derefs
    }

    /// Number of bytes compared.
    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    /// Always `false`; parsing rejects empty patterns.
    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    /// Compare against `bytes`, honoring wildcards.
    pub fn matches(&self, bytes: &[u8]) -> bool
    {
        bytes.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(bytes)
                .all(|(expected, actual)| expected.map_or(true, |value| value == *actual))
    }

    /// Follow the pointer hops from `address` and compare the bytes there.
    ///
    /// ## Errors
    ///
    /// `MemoryRead` when a pointer or the compared bytes cannot be read.
    pub fn verify<M: ReadMemory + ?Sized>(&self, memory: &M, address: Address) -> Result<bool>
    {
        let mut target = address;
        for _ in 0..self.derefs {
            target = memory.read_pointer(target)?;
        }
        let actual = memory.read_bytes(target, self.bytes.len())?;
        Ok(self.matches(&actual))
    }
}

impl FromStr for Signature
{
    type Err = VidlibError;

    fn from_str(s: &str) -> Result<Self>
    {
        Self::parse(s)
    }
}

impl fmt::Display for Signature
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let body = self
            .bytes
            .iter()
            .map(|byte| match byte {
                Some(value) => format!("{value:02X}"),
                None => "??".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        write!(f, "{}{body}{}", "[".repeat(self.derefs), "]".repeat(self.derefs))
    }
}
