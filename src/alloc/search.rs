//! Walks the address space outwards from an origin looking for unmapped pages
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

/// Free page-aligned addresses at or after `origin`, restricted to `range`
pub fn after(origin: usize, range: Range<usize>) -> FreeRegions {
    FreeRegions::new(origin, range, Direction::Up)
}

/// Free page-aligned addresses before `origin`, restricted to `range`
pub fn before(origin: usize, range: Range<usize>) -> FreeRegions {
    FreeRegions::new(origin, range, Direction::Down)
}

/// Which way the walk moves through the address space
#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Towards lower addresses
    Down,
    /// Towards higher addresses
    Up,
}

/// Iterator over unmapped addresses close to an origin
pub struct FreeRegions {
    /// Addresses the walk may visit
    range: Range<usize>,
    /// Walk direction
    direction: Direction,
    /// Next address to query
    cursor: usize,
}

impl FreeRegions {
    /// Starts a walk at `origin` rounded down to its page
    fn new(origin: usize, range: Range<usize>, direction: Direction) -> Self {
        let page = region::page::size();
        Self {
            range,
            direction,
            cursor: origin - origin % page,
        }
    }

    /// Moves the cursor one step, returning false once it leaves the address space
    fn step(&mut self, mapped: Option<Range<usize>>) -> bool {
        let page = region::page::size();
        let next = match (self.direction, mapped) {
            (Direction::Down, Some(r)) => r.start.checked_sub(page),
            (Direction::Up, Some(r)) => Some(r.end),
            (Direction::Down, None) => self.cursor.checked_sub(page),
            (Direction::Up, None) => self.cursor.checked_add(page),
        };
        match next {
            Some(next) => {
                self.cursor = next;
                true
            }
            None => {
                self.cursor = 0;
                false
            }
        }
    }
}

impl Iterator for FreeRegions {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor > 0 && self.range.contains(&self.cursor) {
            match region::query(self.cursor as *const u8) {
                Ok(mapped) => {
                    self.step(Some(mapped.as_range()));
                }
                Err(region::Error::UnmappedRegion) => {
                    let free = self.cursor;
                    self.step(None);
                    return Some(Ok(free));
                }
                Err(e) => {
                    self.step(None);
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Addresses yielded are unmapped and inside the requested range
    fn test_free_regions_are_unmapped() {
        let origin = test_free_regions_are_unmapped as usize;
        let range = origin.saturating_sub(0x4000_0000)..origin.saturating_add(0x4000_0000);

        let free = after(origin, range.clone())
            .filter_map(Result::ok)
            .next()
            .expect("no free page after the test binary");
        assert!(range.contains(&free));
        assert!(free > origin);
        assert!(matches!(
            region::query(free as *const u8),
            Err(region::Error::UnmappedRegion)
        ));
    }
}
