//! # Patch
//!
//! This module covers patches, immutable descriptions of byte-range overwrites, and the sets that
//! group them with hooks

pub mod set;

use std::borrow::Cow;
use std::mem;
use std::ops::Range;

pub use self::set::{Item, PatchSet};

/// `nop`
pub const NOP: u8 = 0x90;

/// Replacement bytes of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Explicit bytes
    Bytes(Vec<u8>),
    /// `len` repetitions of `byte`
    Fill {
        /// Repeated byte
        byte: u8,
        /// Number of repetitions
        len: usize,
    },
}

impl Payload {
    /// Number of bytes the payload covers
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Fill { len, .. } => *len,
        }
    }

    /// Returns true if the payload covers no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the payload to concrete bytes
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Bytes(bytes) => Cow::Borrowed(bytes),
            Self::Fill { byte, len } => Cow::Owned(vec![*byte; *len]),
        }
    }
}

/// Immutable description of one byte-range overwrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Name, unique within the owning set
    name: String,
    /// First byte overwritten
    address: usize,
    /// Replacement bytes
    payload: Payload,
    /// Bytes that must be present before the first write
    expected: Option<Vec<u8>>,
}

impl Patch {
    /// Overwrites `bytes.len()` bytes at `address`
    pub fn new(name: impl Into<String>, address: usize, bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_payload(name, address, Payload::Bytes(bytes.into()))
    }

    /// Overwrites `len` bytes at `address` with `byte`
    pub fn fill(name: impl Into<String>, address: usize, byte: u8, len: usize) -> Self {
        Self::with_payload(name, address, Payload::Fill { byte, len })
    }

    /// Overwrites `len` bytes at `address` with `nop`s
    pub fn nop(name: impl Into<String>, address: usize, len: usize) -> Self {
        Self::fill(name, address, NOP, len)
    }

    /// Overwrites the pointer stored at `address` (a vtable slot, a function table entry) with
    /// `value`
    pub fn pointer(name: impl Into<String>, address: usize, value: usize) -> Self {
        Self::new(name, address, value.to_le_bytes())
    }

    /// Builds a patch from an explicit payload
    pub fn with_payload(name: impl Into<String>, address: usize, payload: Payload) -> Self {
        Self {
            name: name.into(),
            address,
            payload,
            expected: None,
        }
    }

    /// Refuses to apply unless `bytes` are present at the address before the first write
    pub fn expect(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.expected = Some(bytes.into());
        self
    }

    /// Name of the patch
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First byte overwritten
    pub fn address(&self) -> usize {
        self.address
    }

    /// Replacement bytes
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Bytes required before the first write, if any
    pub fn expected(&self) -> Option<&[u8]> {
        self.expected.as_deref()
    }

    /// Addresses overwritten by the patch, clamped to the end of the address space
    pub fn range(&self) -> Range<usize> {
        self.address..self.address.saturating_add(self.payload.len())
    }
}

/// Size of a pointer in the host process
pub const POINTER_LEN: usize = mem::size_of::<usize>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_payload() {
        let patch = Patch::nop("GamepadFix", 0x60D7F2, 2);
        assert_eq!(patch.payload().bytes().as_ref(), [0x90, 0x90]);
        assert_eq!(patch.range(), 0x60D7F2..0x60D7F4);
    }

    #[test]
    fn test_pointer_payload() {
        let patch = Patch::pointer("MainMenuHook", 0x0169FCA8, 0x1234);
        let bytes = patch.payload().bytes();
        assert_eq!(bytes.len(), POINTER_LEN);
        assert_eq!(&bytes[..2], [0x34, 0x12]);
        assert!(bytes[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_empty_payload() {
        assert!(Patch::fill("Empty", 0x1000, 0x90, 0).payload().is_empty());
        assert!(Patch::new("Empty", 0x1000, Vec::new()).payload().is_empty());
        assert!(!Patch::new("NetworkFix", 0xAC34B0, [0xB6]).payload().is_empty());
    }
}
