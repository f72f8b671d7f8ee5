//! Allocates executable stubs near a given address
//!
//! The free-region search and pooling are taken from detour-rs with modifications:
//! https://github.com/darfink/detour-rs

// detour-rs - A cross-platform detour library written in Rust
// Copyright (C) 2017 Elliott Linder.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// ===============================================================================
//
// minhook-rs - A minimalist x86/x86-64 hooking library for Rust
// Copyright (C) 2015 Jascha Neutelings.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::ops::{Deref, DerefMut, Range};
use std::slice;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use slice_pool::sync::{SliceBox, SlicePool};
use thiserror::Error;

use crate::code::REL32_LEN;

pub mod search;

/// The furthest distance between a rel32 branch and its destination (2 GiB).
pub const NEAR_RANGE: usize = 0x8000_0000;

/// Addresses a stub may start at so that a rel32 branch placed at `origin` can land on it.
///
/// The displacement is relative to the end of the branch, so the lower bound sits `REL32_LEN`
/// bytes closer to the origin than [`NEAR_RANGE`].
pub fn reach(origin: usize) -> Range<usize> {
    origin.saturating_sub(NEAR_RANGE - REL32_LEN)..origin.saturating_add(NEAR_RANGE)
}

/// Errors that occur while allocating stubs
#[derive(Debug, Error)]
pub enum AllocError {
    /// Ran out of memory within reach of the origin
    #[error("no free memory within {NEAR_RANGE:#x} bytes of {origin:#x}")]
    OutOfMemory {
        /// Address the stub must be reachable from
        origin: usize,
    },
    /// Error while mapping a region
    #[error("mapping stub memory failed: {0}")]
    Map(String),
    /// Error while querying a memory region
    #[error("querying free memory failed: {0}")]
    Region(#[from] region::Error),
}

/// Read-, write- and executable memory handed out by [`allocate_near`].
///
/// Returned to its pool when dropped.
pub struct ExecutableMemory(SliceBox<u8>);

// Safety: the stub is plain bytes owned by this handle; the pool it came from synchronizes
// allocation and release internally.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl Deref for ExecutableMemory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for ExecutableMemory {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.0.deref_mut()
    }
}

/// A memory map usable as the backing store of a `SlicePool`
struct StubMap(mmap::MemoryMap);

impl AsRef<[u8]> for StubMap {
    fn as_ref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for StubMap {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

unsafe impl Send for StubMap {}
unsafe impl Sync for StubMap {}

/// Pools of executable pages, each reachable from some set of origins
struct NearAllocator {
    /// Mapped pools, never unmapped: stubs may be executing at any time
    pools: Vec<SlicePool<u8>>,
}

impl NearAllocator {
    /// Allocates `size` bytes within [`NEAR_RANGE`] of `origin`
    fn allocate(&mut self, origin: usize, size: usize) -> Result<SliceBox<u8>, AllocError> {
        let range = reach(origin);

        let reachable = |pool: &SlicePool<u8>| {
            let start = pool.as_ptr() as usize;
            range.contains(&start) && range.contains(&(start + pool.len() - 1))
        };
        if let Some(stub) = self
            .pools
            .iter()
            .filter(|pool| reachable(pool))
            .find_map(|pool| pool.alloc(size))
        {
            return Ok(stub);
        }

        let pool = Self::map_pool(&range, origin, size)?;
        let stub = pool.alloc(size).ok_or(AllocError::OutOfMemory { origin })?;
        self.pools.push(pool);
        Ok(stub)
    }

    /// Maps a new pool in the first free region found around `origin`
    fn map_pool(
        range: &Range<usize>,
        origin: usize,
        size: usize,
    ) -> Result<SlicePool<u8>, AllocError> {
        let page = region::page::size();
        let len = (size + page - 1) / page * page;

        // Try after the origin first (mostly because macOS cannot allocate memory before the
        // process's address).
        for candidate in search::after(origin, range.clone()).chain(search::before(origin, range.clone()))
        {
            let address = candidate?;
            if !range.contains(&(address + len - 1)) {
                continue;
            }
            match Self::map_at(address, len) {
                // the address is only a hint on some platforms
                Ok(map) if !range.contains(&(map.0.data() as usize)) => continue,
                Ok(map) => return Ok(SlicePool::new(map)),
                Err(mmap::MapError::ErrNoMem) => continue,
                Err(e) => return Err(AllocError::Map(e.to_string())),
            }
        }
        Err(AllocError::OutOfMemory { origin })
    }

    /// Maps `len` bytes of RWX memory at `address`
    fn map_at(address: usize, len: usize) -> Result<StubMap, mmap::MapError> {
        mmap::MemoryMap::new(
            len,
            &[
                mmap::MapOption::MapReadable,
                mmap::MapOption::MapWritable,
                mmap::MapOption::MapExecutable,
                mmap::MapOption::MapAddr(address as *const u8),
            ],
        )
        .map(StubMap)
    }
}

lazy_static! {
    static ref POOL: Mutex<NearAllocator> = Mutex::new(NearAllocator { pools: Vec::new() });
}

/// Allocates an executable buffer of `size` bytes reachable by a rel32 branch from `origin`
///
/// Note: the buffer's contents are unspecified until written
pub fn allocate_near(origin: usize, size: usize) -> Result<ExecutableMemory, AllocError> {
    POOL.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .allocate(origin, size)
        .map(ExecutableMemory)
}
