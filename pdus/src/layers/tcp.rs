// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Transmission Control Protocol header.

use core::cmp;

use bitflags::bitflags;

use crate::error::*;
use crate::layers::ip::{Ipv4, DATA_PROTO_TCP};
use crate::layers::traits::*;
use crate::layers::Raw;
use crate::utils;

/// The length of a TCP header with no options.
pub const TCP_HEADER_LEN: usize = 20;
/// The maximum number of (padded) option bytes a TCP header can carry.
pub const MAX_TCP_OPTIONS_LEN: usize = 40;

bitflags! {
    /// The control bits of a TCP header.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 0b_0000_0001;
        const SYN = 0b_0000_0010;
        const RST = 0b_0000_0100;
        const PSH = 0b_0000_1000;
        const ACK = 0b_0001_0000;
        const URG = 0b_0010_0000;
        const ECE = 0b_0100_0000;
        const CWR = 0b_1000_0000;
    }
}

/// A TCP (Transmission Control Protocol) segment.
///
/// Options are kept as raw bytes and padded with zeroes to a 4-byte boundary when written.
#[derive(Clone, Debug, Default)]
pub struct Tcp {
    sport: u16,
    dport: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    chksum: u16,
    urgent_ptr: u16,
    options: Vec<u8>,
    payload: Option<Box<dyn LayerObject>>,
}

impl Tcp {
    #[inline]
    pub fn new(sport: u16, dport: u16) -> Self {
        Tcp {
            sport,
            dport,
            window: 32678,
            ..Default::default()
        }
    }

    #[inline]
    pub fn sport(&self) -> u16 {
        self.sport
    }

    #[inline]
    pub fn set_sport(&mut self, sport: u16) {
        self.sport = sport;
    }

    #[inline]
    pub fn dport(&self) -> u16 {
        self.dport
    }

    #[inline]
    pub fn set_dport(&mut self, dport: u16) {
        self.dport = dport;
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    #[inline]
    pub fn set_seq(&mut self, seq: u32) {
        self.seq = seq;
    }

    #[inline]
    pub fn ack(&self) -> u32 {
        self.ack
    }

    #[inline]
    pub fn set_ack(&mut self, ack: u32) {
        self.ack = ack;
    }

    #[inline]
    pub fn flags(&self) -> TcpFlags {
        self.flags
    }

    #[inline]
    pub fn set_flags(&mut self, flags: TcpFlags) {
        self.flags = flags;
    }

    #[inline]
    pub fn window(&self) -> u16 {
        self.window
    }

    #[inline]
    pub fn set_window(&mut self, window: u16) {
        self.window = window;
    }

    #[inline]
    pub fn chksum(&self) -> u16 {
        self.chksum
    }

    #[inline]
    pub fn set_chksum(&mut self, chksum: u16) {
        self.chksum = chksum;
    }

    #[inline]
    pub fn urgent_ptr(&self) -> u16 {
        self.urgent_ptr
    }

    #[inline]
    pub fn set_urgent_ptr(&mut self, urgent_ptr: u16) {
        self.urgent_ptr = urgent_ptr;
    }

    /// The data offset (header length in 32-bit words) the segment will be serialized with.
    #[inline]
    pub fn data_offset(&self) -> u8 {
        (self.header_len() / 4) as u8
    }

    /// The raw option bytes, including any padding decoded with them.
    #[inline]
    pub fn options(&self) -> &[u8] {
        &self.options
    }

    /// Replaces the raw option bytes, failing if they would not fit in the header.
    pub fn set_options(&mut self, options: &[u8]) -> Result<(), ValidationError> {
        if utils::padded_length::<4>(options.len()) > MAX_TCP_OPTIONS_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "Tcp options would exceed the 40-byte option region",
            });
        }

        self.options = options.to_vec();
        Ok(())
    }
}

impl LayerName for Tcp {
    #[inline]
    fn name() -> &'static str {
        "Tcp"
    }
}

impl LayerLength for Tcp {
    #[inline]
    fn len(&self) -> usize {
        self.header_len() + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for Tcp {
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        if bytes.len() < TCP_HEADER_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode Tcp header",
            });
        }

        let header_len = (bytes[12] >> 4) as usize * 4;
        if header_len < TCP_HEADER_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "Tcp data offset field was less than the minimum header length",
            });
        }

        if header_len > bytes.len() {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes for the options declared by the Tcp data offset field",
            });
        }

        let tcp = Tcp {
            sport: u16::from_be_bytes([bytes[0], bytes[1]]),
            dport: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            flags: TcpFlags::from_bits_retain(bytes[13]),
            window: u16::from_be_bytes([bytes[14], bytes[15]]),
            chksum: u16::from_be_bytes([bytes[16], bytes[17]]),
            urgent_ptr: u16::from_be_bytes([bytes[18], bytes[19]]),
            options: bytes[TCP_HEADER_LEN..header_len].to_vec(),
            payload: None,
        };

        Ok((tcp, header_len))
    }
}

impl FromBytes for Tcp {
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let (mut tcp, header_len) = Self::from_bytes_current_layer(bytes)?;
        let rest = &bytes[header_len..];
        if !rest.is_empty() {
            tcp.payload = Some(Box::new(Raw::from_bytes(rest)?));
        }
        Ok(tcp)
    }
}

impl LayerObject for Tcp {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        TCP_HEADER_LEN + utils::padded_length::<4>(self.options.len())
    }

    #[inline]
    fn ip_data_protocol(&self) -> Option<u8> {
        Some(DATA_PROTO_TCP)
    }

    #[inline]
    fn can_set_payload(&self, _payload: &dyn LayerObject) -> bool {
        true
    }

    #[inline]
    fn payload(&self) -> Option<&dyn LayerObject> {
        self.payload.as_deref()
    }

    #[inline]
    fn payload_mut(&mut self) -> Option<&mut dyn LayerObject> {
        match self.payload.as_mut() {
            Some(payload) => Some(&mut **payload),
            None => None,
        }
    }

    #[inline]
    fn set_payload_unchecked(&mut self, payload: Box<dyn LayerObject>) {
        self.payload = Some(payload);
    }

    #[inline]
    fn remove_payload(&mut self) -> Option<Box<dyn LayerObject>> {
        self.payload.take()
    }

    fn write_serialization(&self, bytes: &mut [u8], parent: Option<&dyn LayerObject>) {
        let header_len = self.header_len();
        assert!(
            bytes.len() >= header_len,
            "insufficient buffer space to serialize Tcp header"
        );

        bytes[0..2].copy_from_slice(&self.sport.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dport.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.seq.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.ack.to_be_bytes());
        bytes[12] = self.data_offset() << 4;
        bytes[13] = self.flags.bits();
        bytes[14..16].copy_from_slice(&self.window.to_be_bytes());
        bytes[16..18].copy_from_slice(&self.chksum.to_be_bytes());
        bytes[18..20].copy_from_slice(&self.urgent_ptr.to_be_bytes());

        let options_end = TCP_HEADER_LEN + self.options.len();
        bytes[TCP_HEADER_LEN..options_end].copy_from_slice(&self.options);
        bytes[options_end..header_len].fill(0);

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(&mut bytes[header_len..], Some(self));
        }

        if self.chksum != 0 {
            return;
        }

        if let Some(ipv4) = parent.and_then(|p| p.as_any().downcast_ref::<Ipv4>()) {
            let segment = &bytes[..cmp::min(bytes.len(), self.len())];
            let sum = utils::pseudo_header_checksum(
                ipv4.saddr(),
                ipv4.daddr(),
                segment.len() as u32,
                DATA_PROTO_TCP as u32,
            )
            .wrapping_add(utils::checksum(segment));
            bytes[16..18].copy_from_slice(&(!utils::fold_checksum(sum)).to_be_bytes());
        }
    }

    fn matches_response(&self, bytes: &[u8]) -> bool {
        if bytes.len() < TCP_HEADER_LEN {
            return false;
        }

        let sport = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dport = u16::from_be_bytes([bytes[2], bytes[3]]);
        if self.sport != dport || self.dport != sport {
            return false;
        }

        let header_len = (bytes[12] >> 4) as usize * 4;
        match (self.payload.as_deref(), bytes.get(header_len..)) {
            (Some(payload), Some(rest)) => payload.matches_response(rest),
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let (mut tcp, header_len) = Self::from_bytes_current_layer(bytes)?;
        tcp.payload = clone_payload(self.payload.as_deref(), &bytes[header_len..])?;
        Ok(Box::new(tcp))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_padded_into_data_offset() {
        let mut tcp = Tcp::new(80, 443);
        tcp.set_flags(TcpFlags::SYN);
        tcp.set_options(&[2, 4, 0x05, 0xb4, 1]).unwrap();
        assert_eq!(tcp.header_len(), 28);

        let bytes = tcp.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[12], 7 << 4);
        assert_eq!(bytes[13], 0x02);
        assert_eq!(&bytes[20..28], &[2, 4, 0x05, 0xb4, 1, 0, 0, 0]);

        let decoded = Tcp::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.flags(), TcpFlags::SYN);
        assert_eq!(decoded.options(), &[2, 4, 0x05, 0xb4, 1, 0, 0, 0]);
        assert!(decoded.payload().is_none());
    }

    #[test]
    fn oversized_options_rejected() {
        let mut tcp = Tcp::new(1, 2);
        assert!(tcp.set_options(&[1; 41]).is_err());
        assert!(tcp.options().is_empty());
    }

    #[test]
    fn bad_data_offset() {
        let mut bytes = Tcp::new(1, 2).to_bytes();
        bytes[12] = 4 << 4;
        assert!(Tcp::from_bytes(&bytes).unwrap_err().is_malformed());

        bytes[12] = 6 << 4;
        assert!(Tcp::from_bytes(&bytes).unwrap_err().is_truncated());
    }
}
