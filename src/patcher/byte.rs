//! This module contains byte snapshots, the record of what a location held before it was patched

use super::MemoryAccessor;
use crate::alloc::ExecutableMemory;
use crate::error::{Error, Result};

/// Original bytes of a patched location, captured before the first write.
///
/// Unlike a guard, a snapshot does not restore on drop: the manager keeps it for the lifetime of
/// the process so that repeated enable/disable cycles always restore the true baseline.
pub struct Snapshot {
    /// Location of the patch
    address: usize,
    /// Original data from `address`
    original: Vec<u8>,
    /// Executable stubs (trampolines, relays) that live code may jump into while the item is
    /// applied. Kept for as long as the snapshot.
    stubs: Vec<ExecutableMemory>,
    /// Address a hook branches to instead of its target, when the target is out of reach
    redirect: Option<usize>,
}

impl Snapshot {
    /// Captures `len` bytes at `address`
    ///
    /// # Safety
    ///
    /// `address` must be valid for `len` bytes
    pub unsafe fn capture<M: MemoryAccessor + ?Sized>(
        memory: &M,
        address: usize,
        len: usize,
    ) -> Result<Self> {
        let original = memory.read_vec(address, len)?;
        Ok(Self::from_bytes(address, original))
    }

    /// Creates a snapshot from bytes that were already read
    pub fn from_bytes(address: usize, original: Vec<u8>) -> Self {
        Self {
            address,
            original,
            stubs: Vec::new(),
            redirect: None,
        }
    }

    /// Location the snapshot was taken from
    pub fn address(&self) -> usize {
        self.address
    }

    /// Bytes present before the first write
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Keeps an executable stub alive alongside this snapshot
    pub(crate) fn keep(&mut self, stub: ExecutableMemory) {
        self.stubs.push(stub);
    }

    /// Routes a hook through `stub` instead of branching to its target directly
    pub(crate) fn redirect_through(&mut self, stub: ExecutableMemory) {
        self.redirect = Some(stub.as_ptr() as usize);
        self.keep(stub);
    }

    /// Address a hook should branch to instead of its target, if any
    pub(crate) fn redirect(&self) -> Option<usize> {
        self.redirect
    }

    /// Writes the original bytes back
    ///
    /// # Safety
    ///
    /// The caller must ensure that reverting to a pre-patched state is safe for the location
    pub unsafe fn restore<M: MemoryAccessor + ?Sized>(&self, memory: &M) -> Result<()> {
        write_verified(memory, self.address, &self.original)
    }
}

/// Writes `bytes` to `address` and reads them back to make sure the write landed
///
/// # Safety
///
/// See [`MemoryAccessor::write`]
pub unsafe fn write_verified<M: MemoryAccessor + ?Sized>(
    memory: &M,
    address: usize,
    bytes: &[u8],
) -> Result<()> {
    memory.write(address, bytes)?;
    if memory.read_vec(address, bytes.len())? != bytes {
        return Err(Error::VerificationFailed { address });
    }
    Ok(())
}
