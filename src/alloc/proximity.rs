//! Pools of executable memory placed within branch range of the code they serve
//!
//! Derived from detour-rs: https://github.com/darfink/detour-rs


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
use std::slice;

use slice_pool::sync::{SliceBox, SlicePool};
use thiserror::Error;

use super::search;

/// A slice handed out by one of the pools
pub type Allocation = SliceBox<u8>;

/// Errors that occur while creating proximity allocations
#[derive(Debug, Error)]
pub enum ProximityError {
    /// Ran out of memory within an acceptable proximity to the allocation location
    #[error("no executable memory available within range of {0:#x}")]
    OutOfMemory(usize),
    /// Error while memmapping a region
    #[error("mapping executable memory failed: {0}")]
    MmapError(String),
    /// Error while querying a memory region
    #[error("querying memory regions failed: {0}")]
    RegionError(#[from] region::Error),
}

/// Allocator keeping every pool it ever mapped until the pool empties
pub struct ProximityAllocator {
    /// Max distance away from the origin that the pool can be
    pub max_distance: usize,
    /// Memory pools used for allocations
    pub pools: Vec<SlicePool<u8>>,
}

impl ProximityAllocator {
    /// Creates an allocator without any pools
    pub fn new(max_distance: usize) -> Self {
        Self {
            max_distance,
            pools: Vec::new(),
        }
    }

    /// Allocates `size` bytes whose whole span lies within `max_distance` of `origin`
    pub fn allocate(&mut self, origin: usize, size: usize) -> Result<Allocation, ProximityError> {
        let range =
            origin.saturating_sub(self.max_distance)..origin.saturating_add(self.max_distance);

        if let Some(allocation) = self.allocate_existing(&range, size) {
            return Ok(allocation);
        }

        let pool = self.map_pool(&range, origin, size)?;
        let allocation = pool.alloc(size).ok_or(ProximityError::OutOfMemory(origin))?;
        self.pools.push(pool);
        Ok(allocation)
    }

    /// Releases the pool backing `value` once it holds no other allocations
    pub fn release(&mut self, value: &Allocation) {
        let address = value.as_ptr() as usize;
        let index = self.pools.iter().position(|pool| {
            let lower = pool.as_ptr() as usize;
            (lower..lower + pool.len()).contains(&address)
        });

        if let Some(index) = index {
            if self.pools[index].len() == 1 {
                self.pools.remove(index);
            }
        }
    }

    /// Tries every pool that lies entirely inside `range`
    fn allocate_existing(&mut self, range: &Range<usize>, size: usize) -> Option<Allocation> {
        self.pools
            .iter_mut()
            .filter(|pool| {
                let lower = pool.as_ptr() as usize;
                let upper = lower + pool.len();
                range.contains(&lower) && range.contains(&(upper - 1))
            })
            .find_map(|pool| pool.alloc(size))
    }

    /// Maps a new pool at the closest free address to `origin`
    fn map_pool(
        &mut self,
        range: &Range<usize>,
        origin: usize,
        size: usize,
    ) -> Result<SlicePool<u8>, ProximityError> {
        let page = region::page::size();
        let pool_size = size.div_ceil(page) * page;

        // Prefer addresses after the origin, some platforms refuse mappings below the image
        for candidate in
            search::after(origin, range.clone()).chain(search::before(origin, range.clone()))
        {
            let address = candidate?;
            if !range.contains(&(address + pool_size - 1)) {
                continue;
            }
            if let Ok(map) = Self::map_fixed(address, pool_size) {
                return Ok(SlicePool::new(map));
            }
        }
        Err(ProximityError::OutOfMemory(origin))
    }

    /// Maps read-, write- & executable memory at exactly `address`
    fn map_fixed(address: usize, size: usize) -> Result<ExecutableMap, ProximityError> {
        mmap::MemoryMap::new(
            size,
            &[
                mmap::MapOption::MapReadable,
                mmap::MapOption::MapWritable,
                mmap::MapOption::MapExecutable,
                mmap::MapOption::MapAddr(address as *const u8),
            ],
        )
        .map(ExecutableMap)
        .map_err(|e| match e {
            mmap::MapError::ErrNoMem => ProximityError::OutOfMemory(address),
            e => ProximityError::MmapError(e.to_string()),
        })
    }
}

/// Memory map viewed as a byte slice so `SlicePool` can carve it up
struct ExecutableMap(mmap::MemoryMap);

impl AsRef<[u8]> for ExecutableMap {
    fn as_ref(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for ExecutableMap {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

// The map is only reached through the allocator's mutex
unsafe impl Send for ExecutableMap {}
unsafe impl Sync for ExecutableMap {}
