// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bounded write cursors over caller-owned byte storage.

#![forbid(unsafe_code)]
#![no_std]

/// A write cursor over a fixed, caller-owned byte slice.
///
/// Bytes are only ever appended; the filled region is `as_slice()` and everything past it is
/// unused capacity.
#[derive(Debug)]
pub struct BufferMut<'a> {
    buf: &'a mut [u8],
    buf_len: usize,
}

impl<'a> BufferMut<'a> {
    #[inline]
    pub fn new(slice: &'a mut [u8]) -> Self {
        Self {
            buf: slice,
            buf_len: 0,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.buf_len]
    }

    /// Extends the filled region by `len` zeroed bytes and returns them for in-place writing.
    ///
    /// Returns `None` (leaving the buffer untouched) if fewer than `len` bytes remain.
    #[inline]
    pub fn append_zeroed(&mut self, len: usize) -> Option<&mut [u8]> {
        let start = self.buf_len;
        let region = self.buf.get_mut(start..start.checked_add(len)?)?;
        region.fill(0);
        self.buf_len += len;
        Some(region)
    }

    /// The length of the filled region.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf_len == 0
    }

    /// The number of unused bytes in the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.buf_len
    }
}
