// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The User Datagram Protocol header.

use core::cmp;

use crate::error::*;
use crate::layers::ip::{Ipv4, DATA_PROTO_UDP};
use crate::layers::traits::*;
use crate::layers::Raw;
use crate::utils;

/// The length of a UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// A UDP (User Datagram Protocol) packet.
///
/// The length field is derived from the payload when the packet is written. The checksum is
/// filled in at that point too (if left as 0) whenever the packet is enclosed in an [`Ipv4`]
/// header, since it covers the IPv4 pseudo-header.
#[derive(Clone, Debug, Default)]
pub struct Udp {
    sport: u16,
    dport: u16,
    chksum: u16,
    payload: Option<Box<dyn LayerObject>>,
}

impl Udp {
    #[inline]
    pub fn new(sport: u16, dport: u16) -> Self {
        Udp {
            sport,
            dport,
            chksum: 0,
            payload: None,
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

    /// The length field the packet will be serialized with.
    #[inline]
    pub fn length(&self) -> u16 {
        u16::try_from(self.len()).unwrap_or(u16::MAX)
    }

    #[inline]
    pub fn chksum(&self) -> u16 {
        self.chksum
    }

    #[inline]
    pub fn set_chksum(&mut self, chksum: u16) {
        self.chksum = chksum;
    }
}

impl LayerName for Udp {
    #[inline]
    fn name() -> &'static str {
        "Udp"
    }
}

impl LayerLength for Udp {
    #[inline]
    fn len(&self) -> usize {
        UDP_HEADER_LEN + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for Udp {
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        let Some(header) = utils::get_array::<UDP_HEADER_LEN>(bytes, 0) else {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode Udp header",
            });
        };

        let udp = Udp {
            sport: u16::from_be_bytes([header[0], header[1]]),
            dport: u16::from_be_bytes([header[2], header[3]]),
            chksum: u16::from_be_bytes([header[6], header[7]]),
            payload: None,
        };

        Ok((udp, UDP_HEADER_LEN))
    }
}

impl FromBytes for Udp {
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let (mut udp, header_len) = Self::from_bytes_current_layer(bytes)?;
        let rest = &bytes[header_len..];
        if !rest.is_empty() {
            udp.payload = Some(Box::new(Raw::from_bytes(rest)?));
        }
        Ok(udp)
    }
}

impl LayerObject for Udp {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        UDP_HEADER_LEN
    }

    #[inline]
    fn ip_data_protocol(&self) -> Option<u8> {
        Some(DATA_PROTO_UDP)
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
        assert!(
            bytes.len() >= UDP_HEADER_LEN,
            "insufficient buffer space to serialize Udp header"
        );

        bytes[0..2].copy_from_slice(&self.sport.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dport.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length().to_be_bytes());
        bytes[6..8].copy_from_slice(&self.chksum.to_be_bytes());

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(&mut bytes[UDP_HEADER_LEN..], Some(self));
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
                DATA_PROTO_UDP as u32,
            )
            .wrapping_add(utils::checksum(segment));

            // An all-zero checksum means "no checksum" in UDP
            let chksum = match !utils::fold_checksum(sum) {
                0 => 0xffff,
                c => c,
            };
            bytes[6..8].copy_from_slice(&chksum.to_be_bytes());
        }
    }

    fn matches_response(&self, bytes: &[u8]) -> bool {
        let Some(header) = utils::get_array::<UDP_HEADER_LEN>(bytes, 0) else {
            return false;
        };

        let sport = u16::from_be_bytes([header[0], header[1]]);
        let dport = u16::from_be_bytes([header[2], header[3]]);
        self.sport == dport
            && self.dport == sport
            && self
                .payload
                .as_deref()
                .map_or(true, |p| p.matches_response(&bytes[UDP_HEADER_LEN..]))
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let (mut udp, header_len) = Self::from_bytes_current_layer(bytes)?;
        udp.payload = clone_payload(self.payload.as_deref(), &bytes[header_len..])?;
        Ok(Box::new(udp))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}
