// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # General utility functions
//!
//! Checksum arithmetic shared by the network and transport layers, along with a handful of
//! slice helpers used throughout the layer implementations.

use std::net::Ipv4Addr;

/// Sums `bytes` as a sequence of big-endian 16-bit words.
///
/// A trailing odd byte is added as the high-order byte of a final word. The returned sum is
/// neither folded nor complemented; see [`fold_checksum()`].
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    let mut sum = chunks
        .by_ref()
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u32)
        .fold(0u32, u32::wrapping_add);

    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }

    sum
}

/// Folds the carries of a 32-bit checksum accumulator back into its low 16 bits.
///
/// Folding repeats until no bits remain above bit 15. The one's complement of the result is the
/// value stored in a checksum field.
#[inline]
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Computes the (unfolded) checksum contribution of an IPv4 pseudo-header.
///
/// `len` is the length of the transport segment and `protocol` its IPv4 protocol number.
pub fn pseudo_header_checksum(saddr: Ipv4Addr, daddr: Ipv4Addr, len: u32, protocol: u32) -> u32 {
    checksum(&saddr.octets())
        .wrapping_add(checksum(&daddr.octets()))
        .wrapping_add(protocol)
        .wrapping_add(len)
}

const CRC32_NIBBLE_TABLE: [u32; 16] = [
    0x4DBDF21C, 0x500AE278, 0x76D3D2D4, 0x6B64C2B0, 0x3B61B38C, 0x26D6A3E8, 0x000F9344,
    0x1DB88320, 0xA005713C, 0xBDB26158, 0x9B6B51F4, 0x86DC4190, 0xD6D930AC, 0xCB6E20C8,
    0xEDB71064, 0xF0000000,
];

/// Computes the IEEE 802.3 CRC-32 of `data`.
///
/// The table is indexed one nibble at a time (low nibble first), and has the initial and final
/// inversion of the usual formulation folded into its entries.
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |mut crc, &b| {
        crc = (crc >> 4) ^ CRC32_NIBBLE_TABLE[((crc ^ b as u32) & 0x0f) as usize];
        (crc >> 4) ^ CRC32_NIBBLE_TABLE[((crc ^ (b >> 4) as u32) & 0x0f) as usize]
    })
}

#[inline]
pub(crate) fn padded_length<const T: usize>(unpadded_len: usize) -> usize {
    unpadded_len + ((T - (unpadded_len % T)) % T)
}

/// Reads a big-endian `u64` at `start`. Panics if fewer than 8 bytes follow it.
#[inline]
pub(crate) fn be_u64(bytes: &[u8], start: usize) -> u64 {
    let mut word = [0; 8];
    word.copy_from_slice(&bytes[start..start + 8]);
    u64::from_be_bytes(word)
}

#[inline]
pub fn get_array<const T: usize>(bytes: &[u8], start: usize) -> Option<&[u8; T]> {
    bytes.get(start..start + T)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_odd_length() {
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn fold_all_ones_sum() {
        // 0x0001_fffe folds to 0xffff, which complements to zero.
        assert_eq!(fold_checksum(0x0001_fffe), 0xffff);
        assert_eq!(!fold_checksum(0x0001_fffe), 0);
        assert_eq!(fold_checksum(0x0002_fffe), 0x0001);
    }

    #[test]
    fn known_ipv4_header_checksum() {
        // Header from RFC 1071 style worked examples; checksum field zeroed.
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(!fold_checksum(checksum(&header)), 0xb861);
    }

    #[test]
    fn pseudo_header_sum() {
        let sum = pseudo_header_checksum(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            8,
            17,
        );
        assert_eq!(sum, 0x0a00 + 0x0001 + 0x0a00 + 0x0002 + 17 + 8);
    }

    #[test]
    fn crc32_golden_values() {
        assert_eq!(crc32(&[0, 0, 0, 0]), 0x2144_DF1C);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn padding_rounds_to_word() {
        assert_eq!(padded_length::<4>(0), 0);
        assert_eq!(padded_length::<4>(1), 4);
        assert_eq!(padded_length::<4>(8), 8);
        assert_eq!(padded_length::<4>(37), 40);
    }
}
