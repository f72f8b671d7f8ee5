//! # Error
//!
//! Errors produced while registering, applying and reverting patch sets

use thiserror::Error;

use crate::alloc::AllocError;

/// Errors produced by the patch engine
#[derive(Debug, Error)]
pub enum Error {
    /// The pages covering the range could not be made accessible
    #[error("cannot access {len} bytes at {address:#x}")]
    AccessViolation {
        /// Start of the inaccessible range
        address: usize,
        /// Length of the access
        len: usize,
        /// Underlying protection error, if the access went through `region`
        #[source]
        cause: Option<region::Error>,
    },
    /// Two distinct items cover overlapping address ranges
    #[error("`{set}.{item}` at {address:#x} overlaps `{other_set}.{other_item}`")]
    PatchConflict {
        /// Set being registered
        set: String,
        /// Item of the set being registered
        item: String,
        /// Start of the conflicting item
        address: usize,
        /// Set that already owns the range
        other_set: String,
        /// Item that already owns the range
        other_item: String,
    },
    /// A set name is already registered, or an item name repeats within a set
    #[error("duplicate name `{set}{}`", .item.as_ref().map(|i| format!(".{i}")).unwrap_or_default())]
    DuplicateName {
        /// Set name
        set: String,
        /// Item name, if the collision is inside the set
        item: Option<String>,
    },
    /// An item's bytes run past the end of the address space
    #[error("`{set}.{item}` at {address:#x} runs past the end of the address space")]
    AddressOverflow {
        /// Set name
        set: String,
        /// Item name
        item: String,
        /// Start of the item
        address: usize,
    },
    /// Revert requested for an item that was never applied
    #[error("no snapshot recorded for `{set}.{item}`")]
    NoSnapshot {
        /// Set name
        set: String,
        /// Item name
        item: String,
    },
    /// Enable/disable requested while the set is mid-transition
    #[error("patch set `{0}` is already transitioning")]
    AlreadyTransitioning(String),
    /// No set with this name is registered
    #[error("patch set `{0}` is not registered")]
    NotRegistered(String),
    /// A patch resolves to zero bytes
    #[error("`{set}.{item}` has an empty payload")]
    EmptyPayload {
        /// Set name
        set: String,
        /// Item name
        item: String,
    },
    /// A hook description is malformed
    #[error("invalid hook `{set}.{item}`: {reason}")]
    InvalidHook {
        /// Set name
        set: String,
        /// Item name
        item: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// The bytes found before the first write differ from the expected bytes
    #[error("unexpected bytes at {address:#x} for `{set}.{item}`: found {found:02x?}")]
    UnexpectedBytes {
        /// Set name
        set: String,
        /// Item name
        item: String,
        /// Address of the item
        address: usize,
        /// Bytes actually present
        found: Vec<u8>,
    },
    /// A call detour was requested on something that is not a `call rel32`
    #[error("expected opcode {expected:#04x} at {address:#x}, found {found:#04x}")]
    UnexpectedOpcode {
        /// Address of the instruction
        address: usize,
        /// Opcode required by the hook kind
        expected: u8,
        /// Opcode actually present
        found: u8,
    },
    /// A pointer chain reached a null pointer or an offset past the end of the address space
    #[error("pointer chain broken at {address:#x}")]
    BrokenChain {
        /// Location the bad pointer was read from
        address: usize,
    },
    /// Memory read back after a write differs from what was written
    #[error("write at {address:#x} did not stick")]
    VerificationFailed {
        /// Address of the write
        address: usize,
    },
    /// Executable stub memory could not be allocated
    #[error("{0}")]
    Allocation(#[from] AllocError),
    /// A configuration file describes an impossible item
    #[error("invalid patch configuration: {0}")]
    Config(String),
    /// A configuration file is not valid TOML
    #[error("{0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Builds an [`Error::AccessViolation`] from a `region` failure
    pub(crate) fn access(address: usize, len: usize, cause: region::Error) -> Self {
        Self::AccessViolation {
            address,
            len,
            cause: Some(cause),
        }
    }

    /// Returns true if the error was raised before any memory was touched
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::PatchConflict { .. }
                | Self::DuplicateName { .. }
                | Self::EmptyPayload { .. }
                | Self::InvalidHook { .. }
                | Self::AddressOverflow { .. }
                | Self::NotRegistered(_)
                | Self::AlreadyTransitioning(_)
                | Self::Config(_)
                | Self::Toml(_)
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
