//! Walks the address space around an origin looking for unmapped pages
//!
//! Taken from detour-rs with modifications: https://github.com/darfink/detour-rs

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

use std::ops::Range;

/// Returns an iterator over free page addresses above `origin`, closest first.
pub fn after(origin: usize, range: Range<usize>) -> FreeRegions {
    FreeRegions::new(origin, range, Direction::Up)
}

/// Returns an iterator over free page addresses below `origin`, closest first.
pub fn before(origin: usize, range: Range<usize>) -> FreeRegions {
    FreeRegions::new(origin, range, Direction::Down)
}

/// Direction of the walk
#[derive(Clone, Copy)]
enum Direction {
    /// Towards higher addresses
    Up,
    /// Towards lower addresses
    Down,
}

/// Iterator yielding the start of each free page encountered during the walk
pub struct FreeRegions {
    /// Bounds of the walk
    range: Range<usize>,
    /// Direction of the walk
    direction: Direction,
    /// Next address to query
    cursor: usize,
}

impl FreeRegions {
    /// Starts a walk at the page containing `origin`
    fn new(origin: usize, range: Range<usize>, direction: Direction) -> Self {
        let page = region::page::size();
        Self {
            range,
            direction,
            cursor: origin - origin % page,
        }
    }

    /// Moves the cursor past the span `start..end` in the walk's direction
    fn step_from(&mut self, start: usize, end: usize) {
        let page = region::page::size();
        self.cursor = match self.direction {
            Direction::Up => end,
            Direction::Down => start.saturating_sub(page),
        };
    }
}

impl Iterator for FreeRegions {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let page = region::page::size();

        while self.cursor > 0 && self.range.contains(&self.cursor) {
            match region::query(self.cursor as *const u8) {
                Ok(mapped) => {
                    let span = mapped.as_range();
                    self.step_from(span.start, span.end);
                }
                Err(region::Error::UnmappedRegion) => {
                    let free = self.cursor;
                    self.step_from(free, free + page);
                    return Some(Ok(free));
                }
                Err(error) => {
                    // stop the walk; the error is reported once
                    self.cursor = 0;
                    return Some(Err(error));
                }
            }
        }

        None
    }
}
