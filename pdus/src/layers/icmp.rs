// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Internet Control Message Protocol header.

use crate::error::*;
use crate::layers::ip::DATA_PROTO_ICMP;
use crate::layers::traits::*;
use crate::layers::Raw;
use crate::utils;

/// The length of an ICMP header.
pub const ICMP_HEADER_LEN: usize = 8;

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;

/// An ICMP (Internet Control Message Protocol) message.
///
/// The four bytes following the checksum are kept uninterpreted; for echo messages they hold the
/// identifier and sequence number.
#[derive(Clone, Debug, Default)]
pub struct Icmp {
    icmp_type: u8,
    code: u8,
    chksum: u16,
    rest_of_header: [u8; 4],
    payload: Option<Box<dyn LayerObject>>,
}

impl Icmp {
    #[inline]
    pub fn new(icmp_type: u8, code: u8) -> Self {
        Icmp {
            icmp_type,
            code,
            ..Default::default()
        }
    }

    /// Creates an Echo Request message.
    pub fn echo_request(id: u16, seq: u16) -> Self {
        let mut icmp = Icmp::new(ICMP_TYPE_ECHO_REQUEST, 0);
        icmp.set_id(id);
        icmp.set_seq(seq);
        icmp
    }

    #[inline]
    pub fn icmp_type(&self) -> u8 {
        self.icmp_type
    }

    #[inline]
    pub fn set_icmp_type(&mut self, icmp_type: u8) {
        self.icmp_type = icmp_type;
    }

    #[inline]
    pub fn code(&self) -> u8 {
        self.code
    }

    #[inline]
    pub fn set_code(&mut self, code: u8) {
        self.code = code;
    }

    #[inline]
    pub fn chksum(&self) -> u16 {
        self.chksum
    }

    #[inline]
    pub fn set_chksum(&mut self, chksum: u16) {
        self.chksum = chksum;
    }

    /// The echo identifier.
    #[inline]
    pub fn id(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[0], self.rest_of_header[1]])
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.rest_of_header[0..2].copy_from_slice(&id.to_be_bytes());
    }

    /// The echo sequence number.
    #[inline]
    pub fn seq(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[2], self.rest_of_header[3]])
    }

    #[inline]
    pub fn set_seq(&mut self, seq: u16) {
        self.rest_of_header[2..4].copy_from_slice(&seq.to_be_bytes());
    }

    #[inline]
    pub fn rest_of_header(&self) -> [u8; 4] {
        self.rest_of_header
    }

    #[inline]
    pub fn set_rest_of_header(&mut self, rest_of_header: [u8; 4]) {
        self.rest_of_header = rest_of_header;
    }
}

impl LayerName for Icmp {
    #[inline]
    fn name() -> &'static str {
        "Icmp"
    }
}

impl LayerLength for Icmp {
    #[inline]
    fn len(&self) -> usize {
        ICMP_HEADER_LEN + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for Icmp {
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        let Some(header) = utils::get_array::<ICMP_HEADER_LEN>(bytes, 0) else {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode Icmp header",
            });
        };

        let icmp = Icmp {
            icmp_type: header[0],
            code: header[1],
            chksum: u16::from_be_bytes([header[2], header[3]]),
            rest_of_header: [header[4], header[5], header[6], header[7]],
            payload: None,
        };

        Ok((icmp, ICMP_HEADER_LEN))
    }
}

impl FromBytes for Icmp {
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let (mut icmp, header_len) = Self::from_bytes_current_layer(bytes)?;
        let rest = &bytes[header_len..];
        if !rest.is_empty() {
            icmp.payload = Some(Box::new(Raw::from_bytes(rest)?));
        }
        Ok(icmp)
    }
}

impl LayerObject for Icmp {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        ICMP_HEADER_LEN
    }

    #[inline]
    fn ip_data_protocol(&self) -> Option<u8> {
        Some(DATA_PROTO_ICMP)
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

    /// The ICMP checksum only covers the message itself, so it is computed (when left as 0)
    /// whether or not the message is enclosed in another layer.
    fn write_serialization(&self, bytes: &mut [u8], _parent: Option<&dyn LayerObject>) {
        assert!(
            bytes.len() >= ICMP_HEADER_LEN,
            "insufficient buffer space to serialize Icmp header"
        );

        bytes[0] = self.icmp_type;
        bytes[1] = self.code;
        bytes[2..4].copy_from_slice(&self.chksum.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.rest_of_header);

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(&mut bytes[ICMP_HEADER_LEN..], Some(self));
        }

        if self.chksum == 0 {
            let message = &bytes[..self.len().min(bytes.len())];
            let chksum = !utils::fold_checksum(utils::checksum(message));
            bytes[2..4].copy_from_slice(&chksum.to_be_bytes());
        }
    }

    /// An Echo Request is answered by an Echo Reply carrying the same identifier and sequence
    /// number; other messages match any ICMP header.
    fn matches_response(&self, bytes: &[u8]) -> bool {
        let Some(header) = utils::get_array::<ICMP_HEADER_LEN>(bytes, 0) else {
            return false;
        };

        if self.icmp_type == ICMP_TYPE_ECHO_REQUEST
            && (header[0] != ICMP_TYPE_ECHO_REPLY || header[4..8] != self.rest_of_header)
        {
            return false;
        }

        self.payload
            .as_deref()
            .map_or(true, |p| p.matches_response(&bytes[ICMP_HEADER_LEN..]))
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let (mut icmp, header_len) = Self::from_bytes_current_layer(bytes)?;
        icmp.payload = clone_payload(self.payload.as_deref(), &bytes[header_len..])?;
        Ok(Box::new(icmp))
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
    fn echo_request_checksum() {
        let bytes = Icmp::echo_request(0x1234, 1).to_bytes();
        assert_eq!(bytes[0], ICMP_TYPE_ECHO_REQUEST);
        assert_eq!(&bytes[4..8], &[0x12, 0x34, 0, 1]);
        assert_eq!(utils::fold_checksum(utils::checksum(&bytes)), 0xffff);
    }

    #[test]
    fn echo_reply_matching() {
        let request = Icmp::echo_request(7, 9);
        assert!(request.matches_response(&[0, 0, 0, 0, 0, 7, 0, 9]));
        assert!(!request.matches_response(&[0, 0, 0, 0, 0, 7, 0, 10]));
        assert!(!request.matches_response(&[8, 0, 0, 0, 0, 7, 0, 9]));
    }
}
