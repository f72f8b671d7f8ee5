//! This module contains the accessor for the live process, which adjusts page protections to read
//! and write memory that is normally inaccessible

use std::ptr;

use region::Protection;

use super::MemoryAccessor;
use crate::error::{Error, Result};

/// Accessor for the current process's own address space.
///
/// Before every access, the protection of each page in the range is queried. If any page lacks the
/// access needed, the whole range is switched to the union of its current protections and the
/// needed access, and a [`region::ProtectGuard`] restores every page's original protection when the
/// access is done, including when it fails halfway.
///
/// # Safety
///
/// As always, handing this accessor an address backed by a `&T` or `&mut T` can result in undefined
/// behavior because rust assumes `&T` will never change and `&mut T` will only be changed via that
/// reference. Target addresses **MUST** be memory not tracked by Rust.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl ProcessMemory {
    /// Creates a new accessor for the current process
    pub const fn new() -> Self {
        Self
    }
}

/// Makes `len` bytes at `address` accessible with at least `needed`.
///
/// Returns `None` if every page already allows the access, otherwise a guard that restores the
/// original protections when dropped.
unsafe fn unprotect(
    address: usize,
    len: usize,
    needed: Protection,
) -> Result<Option<region::ProtectGuard>> {
    let regions = region::query_range(address as *const u8, len)
        .map_err(|e| Error::access(address, len, e))?;

    let mut current = Protection::NONE;
    let mut sufficient = true;
    // first address not yet known to be mapped
    let mut next = address;
    for region in regions {
        let region = region.map_err(|e| Error::access(address, len, e))?;
        let span = region.as_range();
        if span.start > next {
            break;
        }
        next = next.max(span.end);
        sufficient &= region.protection().contains(needed);
        current |= region.protection();
    }
    if next < address + len {
        return Err(Error::access(address, len, region::Error::UnmappedRegion));
    }
    if sufficient {
        return Ok(None);
    }

    region::protect_with_handle(address as *const u8, len, current | needed)
        .map(Some)
        .map_err(|e| Error::access(address, len, e))
}

unsafe impl MemoryAccessor for ProcessMemory {
    unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let _guard = unprotect(address, buf.len(), Protection::READ)?;
        // Safety: caller must pass in an `address` that is mapped for the full length of `buf`
        ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        Ok(())
    }

    unsafe fn write(&self, address: usize, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        // nothing is copied unless every page could be made writable
        let _guard = unprotect(address, bytes.len(), Protection::READ_WRITE)?;
        ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use region::Protection;

    use crate::error::Error;
    use crate::patcher::mem::ProcessMemory;
    use crate::patcher::MemoryAccessor;

    /// Asserts that every page covering the range has exactly `protection`
    fn assert_protection(ptr: *const u8, size: usize, protection: Protection) {
        for region in region::query_range(ptr, size).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), protection);
        }
    }

    #[test]
    /// Test write and read-back on plain heap memory
    fn test_write() {
        let mut data = vec![1u8, 2, 3, 4].into_boxed_slice();
        let address = data.as_mut_ptr() as usize;
        let memory = ProcessMemory::new();

        unsafe { memory.write(address + 1, &[5, 5]).unwrap() };
        assert_eq!(unsafe { memory.read_vec(address, 4).unwrap() }, [1, 5, 5, 4]);
    }

    #[test]
    /// Read-only pages are writable through the accessor and stay read-only afterwards
    fn test_read_only_page() {
        let page = region::page::size();
        let mut alloc = region::alloc(page, Protection::READ_WRITE).unwrap();
        let ptr = alloc.as_mut_ptr::<u8>();
        unsafe { slice::from_raw_parts_mut(ptr, 4).copy_from_slice(b"1234") };
        unsafe { region::protect(ptr, page, Protection::READ).unwrap() };
        assert_protection(ptr, page, Protection::READ);

        let memory = ProcessMemory::new();
        unsafe { memory.write(ptr as usize, &[4, 3, 2, 1]).unwrap() };

        assert_eq!(unsafe { slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);
        assert_protection(ptr, page, Protection::READ);
    }

    #[test]
    /// Pages with no access at all can still be read and written, and are restored to no access
    fn test_no_access_page() {
        let page = region::page::size();
        let alloc = region::alloc(page, Protection::NONE).unwrap();
        let ptr = alloc.as_ptr::<u8>();
        let memory = ProcessMemory::new();

        unsafe { memory.write(ptr as usize + 8, &[0xE8, 1, 2, 3, 4]).unwrap() };
        assert_protection(ptr, page, Protection::NONE);

        let read = unsafe { memory.read_vec(ptr as usize + 8, 5).unwrap() };
        assert_eq!(read, [0xE8, 1, 2, 3, 4]);
        assert_protection(ptr, page, Protection::NONE);
    }

    #[test]
    /// A write that straddles two pages with different protections restores each one
    fn test_straddling_write() {
        let page = region::page::size();
        let alloc = region::alloc(page * 2, Protection::READ_WRITE).unwrap();
        let ptr = alloc.as_ptr::<u8>();
        unsafe { region::protect(ptr, page, Protection::READ).unwrap() };

        let memory = ProcessMemory::new();
        unsafe { memory.write(ptr as usize + page - 2, &[9, 9, 9, 9]).unwrap() };

        assert_protection(ptr, page, Protection::READ);
        assert_protection(unsafe { ptr.add(page) }, page, Protection::READ_WRITE);
        let read = unsafe { memory.read_vec(ptr as usize + page - 2, 4).unwrap() };
        assert_eq!(read, [9, 9, 9, 9]);
    }

    #[test]
    /// Unmapped addresses fail without faulting
    fn test_unmapped() {
        let memory = ProcessMemory::new();
        let err = unsafe { memory.write(0x1000, &[0x90]) }.unwrap_err();
        assert!(matches!(
            err,
            Error::AccessViolation {
                address: 0x1000,
                len: 1,
                ..
            }
        ));
    }
}
