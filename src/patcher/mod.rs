//! # Patcher
//!
//! This module covers memory accessors, which read and overwrite locations in memory regardless of
//! their page protection, and the snapshots used to restore them

pub mod byte;
pub mod mem;
#[cfg(test)]
pub(crate) mod mock;

use std::mem::{self as stdmem, MaybeUninit};
use std::slice;

use crate::error::{Error, Result};

/// Reads and writes absolute addresses in the current process
///
/// # Safety
///
/// Implementors must never perform a partial write: either every byte of a `write` lands, or none
/// does and an error is returned. Any protection change made to perform an access must be undone
/// before returning, on every exit path.
pub unsafe trait MemoryAccessor: Send + Sync {
    /// Copies `buf.len()` bytes starting at `address` into `buf`.
    ///
    /// # Safety
    ///
    /// `address` must be mapped for the full length of `buf` and safe to read concurrently with
    /// the rest of the process
    unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<()>;

    /// Copies `bytes` to `address`.
    ///
    /// # Safety
    ///
    /// `address` must be mapped for the full length of `bytes`, and the caller must ensure no code
    /// is currently executing or reading the bytes being changed in a way that could observe a
    /// torn instruction
    unsafe fn write(&self, address: usize, bytes: &[u8]) -> Result<()>;

    /// Reads `len` bytes into a new vector
    ///
    /// # Safety
    ///
    /// See [`MemoryAccessor::read`]
    unsafe fn read_vec(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }

    /// Follows a chain of pointers starting at `base`.
    ///
    /// For each offset, the pointer stored at the current address is read and the offset added to
    /// it. The address reached after the last offset is returned without being read, so
    /// `resolve_chain(global, &[0x8])` is the address of the field at `0x8` in the structure
    /// `global` points to.
    ///
    /// # Safety
    ///
    /// See [`MemoryAccessor::read`]; every link of the chain must be mapped
    unsafe fn resolve_chain(&self, base: usize, offsets: &[usize]) -> Result<usize> {
        let mut address = base;
        for offset in offsets {
            let mut buf = [0u8; stdmem::size_of::<usize>()];
            self.read(address, &mut buf)?;
            address = match usize::from_ne_bytes(buf) {
                0 => None,
                pointer => pointer.checked_add(*offset),
            }
            .ok_or(Error::BrokenChain { address })?;
        }
        Ok(address)
    }

    /// Reads a `T` stored at `address`
    ///
    /// # Safety
    ///
    /// See [`MemoryAccessor::read`]. Additionally, every bit pattern must be a valid `T`.
    unsafe fn read_value<T: Copy>(&self, address: usize) -> Result<T>
    where
        Self: Sized,
    {
        let mut value = MaybeUninit::<T>::zeroed();
        let buf = slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, stdmem::size_of::<T>());
        self.read(address, buf)?;
        Ok(value.assume_init())
    }

    /// Writes `value` to `address`
    ///
    /// # Safety
    ///
    /// See [`MemoryAccessor::write`]. `T` must not contain padding.
    unsafe fn write_value<T: Copy>(&self, address: usize, value: T) -> Result<()>
    where
        Self: Sized,
    {
        let bytes = slice::from_raw_parts(&value as *const T as *const u8, stdmem::size_of::<T>());
        self.write(address, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockMemory;
    use super::MemoryAccessor;
    use crate::error::Error;

    #[test]
    /// Typed reads and writes go through the byte interface little-endian
    fn test_typed_access() {
        let memory = MockMemory::new();
        memory.fill(0x244DE98, &[1, 0, 0, 0]);

        let value: u32 = unsafe { memory.read_value(0x244DE98).unwrap() };
        assert_eq!(value, 1);

        unsafe { memory.write_value(0x244DE98, 0xAABBCCDDu32).unwrap() };
        assert_eq!(memory.bytes(0x244DE98, 4), [0xDD, 0xCC, 0xBB, 0xAA]);

        let copy = unsafe { memory.read_vec(0x244DE98, 2).unwrap() };
        assert_eq!(copy, [0xDD, 0xCC]);
    }

    #[test]
    /// A global pointer to a structure, then a field inside it
    fn test_resolve_chain() {
        let memory = MockMemory::new();
        memory.fill(0x189E2E0, &0x5000usize.to_ne_bytes());
        memory.fill(0x5008, &0x6000usize.to_ne_bytes());

        unsafe {
            assert_eq!(memory.resolve_chain(0x189E2E0, &[]).unwrap(), 0x189E2E0);
            assert_eq!(memory.resolve_chain(0x189E2E0, &[0x8]).unwrap(), 0x5008);
            assert_eq!(memory.resolve_chain(0x189E2E0, &[0x8, 0x10]).unwrap(), 0x6010);
        }
    }

    #[test]
    fn test_resolve_chain_null() {
        let memory = MockMemory::new();
        memory.fill(0x189E2E0, &0x5000usize.to_ne_bytes());

        // nothing stored at 0x5000
        let err = unsafe { memory.resolve_chain(0x189E2E0, &[0x0, 0x4]) }.unwrap_err();
        assert!(matches!(err, Error::BrokenChain { address: 0x5000 }));
    }
}
