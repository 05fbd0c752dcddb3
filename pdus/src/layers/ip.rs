// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Internet Protocol version 4 header and its option list.

use core::cmp;
use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::error::*;
use crate::layers::icmp::Icmp;
use crate::layers::tcp::Tcp;
use crate::layers::traits::*;
use crate::layers::udp::Udp;
use crate::layers::Raw;
use crate::sender::{self, PacketSender, SendError, SocketKind};
use crate::utils;

/// Internet Control Message Protocol.
pub const DATA_PROTO_ICMP: u8 = 0x01;
/// IPv4 encapsulated within IPv4.
pub const DATA_PROTO_IPIP: u8 = 0x04;
/// Transmission Control Protocol.
pub const DATA_PROTO_TCP: u8 = 0x06;
/// User Datagram Protocol.
pub const DATA_PROTO_UDP: u8 = 0x11;

/// The time-to-live newly constructed packets start out with.
pub const DEFAULT_TTL: u8 = 128;
/// The length of the fixed portion of an IPv4 header.
pub const IPV4_HEADER_LEN: usize = 20;
/// The maximum number of (padded) option bytes an IPv4 header can carry.
pub const MAX_OPTIONS_LEN: usize = 40;

bitflags! {
    /// The flags held in the upper three bits of the IPv4 fragmentation word.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Ipv4Flags: u16 {
        const RESERVED = 0b_1000_0000_0000_0000;
        const DONT_FRAGMENT = 0b_0100_0000_0000_0000;
        const MORE_FRAGMENTS = 0b_0010_0000_0000_0000;
    }
}

const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

/// The class of an IPv4 option, encoded in bits 5 and 6 of its type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionClass {
    Control,
    Reserved1,
    Measurement,
    Reserved3,
}

impl From<u8> for OptionClass {
    #[inline]
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => OptionClass::Control,
            1 => OptionClass::Reserved1,
            2 => OptionClass::Measurement,
            _ => OptionClass::Reserved3,
        }
    }
}

impl From<OptionClass> for u8 {
    #[inline]
    fn from(value: OptionClass) -> Self {
        match value {
            OptionClass::Control => 0,
            OptionClass::Reserved1 => 1,
            OptionClass::Measurement => 2,
            OptionClass::Reserved3 => 3,
        }
    }
}

/// The 5-bit number identifying an IPv4 option within its class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OptionNumber(u8);

impl OptionNumber {
    /// End of Option List.
    pub const END: Self = Self(0);
    /// No Operation.
    pub const NOOP: Self = Self(1);
    /// Security.
    pub const SEC: Self = Self(2);
    /// Loose Source and Record Route.
    pub const LSSR: Self = Self(3);
    /// Internet Timestamp.
    pub const TIMESTAMP: Self = Self(4);
    /// Extended Security.
    pub const EXTSEC: Self = Self(5);
    /// Record Route.
    pub const RR: Self = Self(7);
    /// Stream ID.
    pub const SID: Self = Self(8);
    /// Strict Source and Record Route.
    pub const SSRR: Self = Self(9);
    pub const MTUPROBE: Self = Self(11);
    pub const MTUREPLY: Self = Self(12);
    pub const EIP: Self = Self(17);
    /// Traceroute.
    pub const TR: Self = Self(18);
    pub const ADDEXT: Self = Self(19);
    /// Router Alert.
    pub const RTRALT: Self = Self(20);
    pub const SDB: Self = Self(21);
    pub const DPS: Self = Self(23);
    pub const UMP: Self = Self(24);
    /// Quick-Start.
    pub const QS: Self = Self(25);

    /// Creates an option number from the low 5 bits of `number`.
    #[inline]
    pub const fn new(number: u8) -> Self {
        Self(number & 0x1f)
    }

    #[inline]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Indicates whether options with this number are followed by a length byte on the wire.
    ///
    /// Unrecognized numbers are treated as single-byte options.
    #[inline]
    pub const fn has_length_field(&self) -> bool {
        matches!(
            self.0,
            2 | 3 | 4 | 5 | 7 | 8 | 9 | 11 | 12 | 17 | 18 | 19 | 20 | 21 | 23 | 24 | 25
        )
    }
}

/// A single entry in the IPv4 option list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Option {
    copied: bool,
    class: OptionClass,
    number: OptionNumber,
    data: Vec<u8>,
}

impl Ipv4Option {
    /// Creates a new option.
    ///
    /// `data` excludes the type and length bytes; the length byte is derived from it when the
    /// option is serialized.
    #[inline]
    pub fn new(copied: bool, class: OptionClass, number: OptionNumber, data: Vec<u8>) -> Self {
        Ipv4Option {
            copied,
            class,
            number,
            data,
        }
    }

    /// Decodes an option from its type byte and (possibly empty) data.
    #[inline]
    pub fn from_type(option_type: u8, data: Vec<u8>) -> Self {
        Ipv4Option {
            copied: option_type & 0x80 != 0,
            class: OptionClass::from(option_type >> 5),
            number: OptionNumber::new(option_type),
            data,
        }
    }

    /// Whether the option is copied into every fragment of a fragmented datagram.
    #[inline]
    pub fn copied(&self) -> bool {
        self.copied
    }

    #[inline]
    pub fn class(&self) -> OptionClass {
        self.class
    }

    #[inline]
    pub fn number(&self) -> OptionNumber {
        self.number
    }

    /// The full type byte of the option.
    #[inline]
    pub fn option_type(&self) -> u8 {
        (u8::from(self.copied) << 7) | (u8::from(self.class) << 5) | self.number.value()
    }

    /// The option's data, excluding its type and length bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn has_length_field(&self) -> bool {
        self.number.has_length_field()
    }

    /// The number of bytes the option occupies on the wire.
    #[inline]
    pub fn len(&self) -> usize {
        if self.has_length_field() {
            2 + self.data.len()
        } else {
            1
        }
    }

    /// Writes the option to the start of `bytes`, returning the number of bytes written.
    fn write(&self, bytes: &mut [u8]) -> usize {
        bytes[0] = self.option_type();
        if !self.has_length_field() {
            return 1;
        }

        let len = self.len();
        bytes[1] = len as u8;
        bytes[2..len].copy_from_slice(&self.data);
        len
    }

    /// Parses the option region of a header, returning the options and their total encoded length.
    ///
    /// Parsing halts at the first End of Option List type byte; anything following it is padding.
    fn parse_list(mut region: &[u8]) -> Result<(Vec<Ipv4Option>, usize), ValidationError> {
        let mut options = Vec::new();
        let mut options_size = 0;

        while let Some((&option_type, rest)) = region.split_first() {
            if option_type == 0 {
                break;
            }

            if !OptionNumber::new(option_type).has_length_field() {
                options.push(Ipv4Option::from_type(option_type, Vec::new()));
                options_size += 1;
                region = rest;
                continue;
            }

            let Some((&len, rest)) = rest.split_first() else {
                return Err(ValidationError {
                    layer: Ipv4::name(),
                    class: ValidationErrorClass::InsufficientBytes,
                    reason: "option length byte missing at end of Ipv4 option region",
                });
            };

            let len = len as usize;
            if len < 2 {
                return Err(ValidationError {
                    layer: Ipv4::name(),
                    class: ValidationErrorClass::InvalidSize,
                    reason: "Ipv4 option length field too small to cover its type and length bytes",
                });
            }

            let Some(data) = rest.get(..len - 2) else {
                return Err(ValidationError {
                    layer: Ipv4::name(),
                    class: ValidationErrorClass::InvalidSize,
                    reason: "Ipv4 option length field exceeded remaining bytes in option region",
                });
            };

            options.push(Ipv4Option::from_type(option_type, data.to_vec()));
            options_size += len;
            region = &rest[len - 2..];
        }

        Ok((options, options_size))
    }
}

/// An IPv4 (Internet Protocol version 4) packet.
///
/// Field values are held in host order and only converted to network order when serialized.
/// The header length and total length fields are not stored; they are derived from the option
/// list and payload whenever the packet is written.
#[derive(Clone, Debug)]
pub struct Ipv4 {
    version: u8,
    tos: u8,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    chksum: u16,
    saddr: Ipv4Addr,
    daddr: Ipv4Addr,
    options: Vec<Ipv4Option>,
    options_size: usize,
    padded_options_size: usize,
    payload: Option<Box<dyn LayerObject>>,
}

impl Ipv4 {
    /// Creates a new packet addressed from `saddr` to `daddr`, with no options or payload.
    pub fn new(daddr: Ipv4Addr, saddr: Ipv4Addr) -> Self {
        Ipv4 {
            version: 4,
            tos: 0,
            id: 1,
            frag_off: 0,
            ttl: DEFAULT_TTL,
            protocol: 0,
            chksum: 0,
            saddr,
            daddr,
            options: Vec::new(),
            options_size: 0,
            padded_options_size: 0,
            payload: None,
        }
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: u8) {
        self.version = version & 0x0f;
    }

    /// The header length, in 32-bit words, that the packet will be serialized with.
    #[inline]
    pub fn ihl(&self) -> u8 {
        (self.header_len() / 4) as u8
    }

    /// The Type of Service field (now split into DSCP and ECN).
    #[inline]
    pub fn tos(&self) -> u8 {
        self.tos
    }

    #[inline]
    pub fn set_tos(&mut self, tos: u8) {
        self.tos = tos;
    }

    /// The total length of the packet as it will be written: the header plus the whole payload.
    #[inline]
    pub fn total_length(&self) -> u16 {
        u16::try_from(self.len()).unwrap_or(u16::MAX)
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.id = id;
    }

    #[inline]
    pub fn flags(&self) -> Ipv4Flags {
        Ipv4Flags::from_bits_truncate(self.frag_off)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: Ipv4Flags) {
        self.frag_off = (self.frag_off & FRAGMENT_OFFSET_MASK) | flags.bits();
    }

    /// The fragment offset, in units of 8 bytes.
    #[inline]
    pub fn frag_offset(&self) -> u16 {
        self.frag_off & FRAGMENT_OFFSET_MASK
    }

    #[inline]
    pub fn set_frag_offset(&mut self, offset: u16) {
        self.frag_off = (self.frag_off & !FRAGMENT_OFFSET_MASK) | (offset & FRAGMENT_OFFSET_MASK);
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    /// The protocol number the packet will be serialized with.
    ///
    /// When the payload identifies its own protocol number, that number takes precedence over
    /// the one stored via [`set_protocol()`](Ipv4::set_protocol).
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.payload
            .as_deref()
            .and_then(|p| p.ip_data_protocol())
            .unwrap_or(self.protocol)
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: u8) {
        self.protocol = protocol;
    }

    /// The stored checksum. A value of 0 means the checksum is computed at serialization time.
    #[inline]
    pub fn chksum(&self) -> u16 {
        self.chksum
    }

    #[inline]
    pub fn set_chksum(&mut self, chksum: u16) {
        self.chksum = chksum;
    }

    #[inline]
    pub fn saddr(&self) -> Ipv4Addr {
        self.saddr
    }

    #[inline]
    pub fn set_saddr(&mut self, saddr: Ipv4Addr) {
        self.saddr = saddr;
    }

    #[inline]
    pub fn daddr(&self) -> Ipv4Addr {
        self.daddr
    }

    #[inline]
    pub fn set_daddr(&mut self, daddr: Ipv4Addr) {
        self.daddr = daddr;
    }

    #[inline]
    pub fn options(&self) -> &[Ipv4Option] {
        &self.options
    }

    /// The number of bytes the options occupy, excluding padding.
    #[inline]
    pub fn options_size(&self) -> usize {
        self.options_size
    }

    /// The number of bytes the options occupy once padded to a 4-byte boundary.
    #[inline]
    pub fn padded_options_size(&self) -> usize {
        self.padded_options_size
    }

    /// Appends `option` to the option list.
    ///
    /// Fails without modifying the packet if the padded options would exceed
    /// [`MAX_OPTIONS_LEN`] bytes, or if a single-byte option (END, NOOP or an unrecognized
    /// number) carries data.
    pub fn add_option(&mut self, option: Ipv4Option) -> Result<(), ValidationError> {
        if !option.number().has_length_field() && !option.data().is_empty() {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidValue,
                reason: "single-byte Ipv4 option cannot carry data",
            });
        }

        let options_size = self.options_size + option.len();
        let padded_options_size = utils::padded_length::<4>(options_size);
        if padded_options_size > MAX_OPTIONS_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "Ipv4 options would exceed the 40-byte option region",
            });
        }

        self.options.push(option);
        self.options_size = options_size;
        self.padded_options_size = padded_options_size;
        Ok(())
    }

    /// Removes every option from the packet.
    #[inline]
    pub fn clear_options(&mut self) {
        self.options.clear();
        self.options_size = 0;
        self.padded_options_size = 0;
    }

    /// Appends an End of Option List marker.
    #[inline]
    pub fn set_eol_option(&mut self) -> Result<(), ValidationError> {
        self.add_option(Ipv4Option::new(
            false,
            OptionClass::Control,
            OptionNumber::END,
            Vec::new(),
        ))
    }

    /// Appends a No Operation option.
    #[inline]
    pub fn set_noop_option(&mut self) -> Result<(), ValidationError> {
        self.add_option(Ipv4Option::new(
            false,
            OptionClass::Control,
            OptionNumber::NOOP,
            Vec::new(),
        ))
    }

    /// Appends a Security option carrying `data`.
    #[inline]
    pub fn set_sec_option(&mut self, data: &[u8]) -> Result<(), ValidationError> {
        self.add_option(Ipv4Option::new(
            true,
            OptionClass::Control,
            OptionNumber::SEC,
            data.to_vec(),
        ))
    }

    /// Returns the first option matching the given class and number.
    pub fn search_option(&self, class: OptionClass, number: OptionNumber) -> Option<&Ipv4Option> {
        self.options
            .iter()
            .find(|opt| opt.class == class && opt.number == number)
    }

    /// The kind of socket the packet must be sent through.
    #[inline]
    pub fn socket_kind(&self) -> SocketKind {
        match self.payload.as_deref().and_then(|p| p.ip_data_protocol()) {
            Some(DATA_PROTO_ICMP) => SocketKind::Icmp,
            _ => SocketKind::Ip,
        }
    }

    /// Serializes the packet and transmits it to its destination address through `sender`.
    pub fn send<S: PacketSender + ?Sized>(&self, sender: &mut S) -> Result<(), SendError> {
        let bytes = self.to_bytes();
        sender.send_l3(&bytes, self.daddr, self.socket_kind())?;
        Ok(())
    }

    /// Waits for a response to the packet, decoding it in the packet's own shape.
    ///
    /// Returns `Ok(None)` if `sender` times out before a matching response arrives.
    #[inline]
    pub fn recv_response<S: PacketSender + ?Sized>(
        &self,
        sender: &mut S,
    ) -> Result<Option<Box<dyn LayerObject>>, SendError> {
        sender::recv_matching(self, self.socket_kind(), sender)
    }

    /// Sends the packet and waits for its response.
    #[inline]
    pub fn send_recv<S: PacketSender + ?Sized>(
        &self,
        sender: &mut S,
    ) -> Result<Option<Box<dyn LayerObject>>, SendError> {
        self.send(sender)?;
        self.recv_response(sender)
    }
}

impl Default for Ipv4 {
    #[inline]
    fn default() -> Self {
        Ipv4::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)
    }
}

/// Decodes `bytes` into the payload layer identified by an IPv4 protocol number.
pub(crate) fn payload_from_protocol(
    protocol: u8,
    bytes: &[u8],
) -> Result<Box<dyn LayerObject>, ValidationError> {
    Ok(match protocol {
        DATA_PROTO_TCP => Box::new(Tcp::from_bytes(bytes)?),
        DATA_PROTO_UDP => Box::new(Udp::from_bytes(bytes)?),
        DATA_PROTO_ICMP => Box::new(Icmp::from_bytes(bytes)?),
        _ => {
            log::trace!("no decoder for Ipv4 protocol {protocol}, keeping payload as Raw");
            Box::new(Raw::from_bytes(bytes)?)
        }
    })
}

impl LayerName for Ipv4 {
    #[inline]
    fn name() -> &'static str {
        "Ipv4"
    }
}

impl LayerLength for Ipv4 {
    #[inline]
    fn len(&self) -> usize {
        self.header_len() + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for Ipv4 {
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        if bytes.len() < IPV4_HEADER_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode Ipv4 header",
            });
        }

        let header_len = (bytes[0] & 0x0f) as usize * 4;
        if header_len < IPV4_HEADER_LEN {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "Ipv4 header length field was less than the minimum header length",
            });
        }

        if header_len > bytes.len() {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes for the options declared by the Ipv4 header length field",
            });
        }

        let (options, options_size) = Ipv4Option::parse_list(&bytes[IPV4_HEADER_LEN..header_len])?;

        let ipv4 = Ipv4 {
            version: bytes[0] >> 4,
            tos: bytes[1],
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            frag_off: u16::from_be_bytes([bytes[6], bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            chksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            saddr: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
            daddr: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
            options,
            options_size,
            padded_options_size: header_len - IPV4_HEADER_LEN,
            payload: None,
        };

        Ok((ipv4, header_len))
    }
}

impl FromBytes for Ipv4 {
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let (mut ipv4, header_len) = Self::from_bytes_current_layer(bytes)?;
        let rest = &bytes[header_len..];
        if !rest.is_empty() {
            ipv4.payload = Some(payload_from_protocol(ipv4.protocol, rest)?);
        }
        Ok(ipv4)
    }
}

impl LayerObject for Ipv4 {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        IPV4_HEADER_LEN + self.padded_options_size
    }

    #[inline]
    fn ip_data_protocol(&self) -> Option<u8> {
        Some(DATA_PROTO_IPIP)
    }

    #[inline]
    fn can_set_payload(&self, payload: &dyn LayerObject) -> bool {
        payload.ip_data_protocol().is_some() || payload.as_any().is::<Raw>()
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
            "insufficient buffer space to serialize Ipv4 header"
        );

        let (header, rest) = bytes.split_at_mut(header_len);
        header[0] = (self.version << 4) | self.ihl();
        header[1] = self.tos;
        header[2..4].copy_from_slice(&self.total_length().to_be_bytes());
        header[4..6].copy_from_slice(&self.id.to_be_bytes());
        header[6..8].copy_from_slice(&self.frag_off.to_be_bytes());
        header[8] = self.ttl;
        header[9] = self.protocol();
        header[10..12].copy_from_slice(&self.chksum.to_be_bytes());
        header[12..16].copy_from_slice(&self.saddr.octets());
        header[16..20].copy_from_slice(&self.daddr.octets());

        let mut offset = IPV4_HEADER_LEN;
        for option in &self.options {
            offset += option.write(&mut header[offset..]);
        }
        header[offset..].fill(0);

        if parent.is_some() && self.chksum == 0 {
            let chksum = !utils::fold_checksum(utils::checksum(header));
            log::trace!("computed enclosed Ipv4 header checksum {chksum:#06x}");
            header[10..12].copy_from_slice(&chksum.to_be_bytes());
        }

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(rest, Some(self));
        }
    }

    fn matches_response(&self, bytes: &[u8]) -> bool {
        if bytes.len() < IPV4_HEADER_LEN {
            return false;
        }

        let saddr = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
        let daddr = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);
        if self.daddr != saddr || self.saddr != daddr {
            return false;
        }

        let header_len = (bytes[0] & 0x0f) as usize * 4;
        match (self.payload.as_deref(), bytes.get(header_len..)) {
            (_, None) => false,
            (Some(payload), Some(rest)) => {
                header_len >= IPV4_HEADER_LEN && payload.matches_response(rest)
            }
            (None, Some(_)) => header_len >= IPV4_HEADER_LEN,
        }
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let (mut ipv4, header_len) = Self::from_bytes_current_layer(bytes)?;

        let total_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if total_length < header_len {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "Ipv4 total length field was less than its header length",
            });
        }

        let end = cmp::min(bytes.len(), total_length);
        ipv4.payload = clone_payload(self.payload.as_deref(), &bytes[header_len..end])?;
        Ok(Box::new(ipv4))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use proptest::prelude::*;

    use super::*;
    use crate::layers::icmp::{ICMP_TYPE_ECHO_REPLY, ICMP_TYPE_ECHO_REQUEST};
    use crate::BufferMut;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn assert_same_header(expected: &Ipv4, actual: &Ipv4) {
        assert_eq!(expected.version(), actual.version());
        assert_eq!(expected.ihl(), actual.ihl());
        assert_eq!(expected.tos(), actual.tos());
        assert_eq!(expected.total_length(), actual.total_length());
        assert_eq!(expected.id(), actual.id());
        assert_eq!(expected.flags(), actual.flags());
        assert_eq!(expected.frag_offset(), actual.frag_offset());
        assert_eq!(expected.ttl(), actual.ttl());
        assert_eq!(expected.protocol(), actual.protocol());
        assert_eq!(expected.chksum(), actual.chksum());
        assert_eq!(expected.saddr(), actual.saddr());
        assert_eq!(expected.daddr(), actual.daddr());
        assert_eq!(expected.options(), actual.options());
        assert_eq!(expected.options_size(), actual.options_size());
        assert_eq!(expected.padded_options_size(), actual.padded_options_size());
    }

    /// A header with the given option region appended (ihl derived from its length).
    fn header_with_options(options: &[u8]) -> Vec<u8> {
        assert_eq!(options.len() % 4, 0);
        let mut bytes = Ipv4::new(SERVER, CLIENT).to_bytes();
        bytes[0] = 0x40 | ((IPV4_HEADER_LEN + options.len()) / 4) as u8;
        bytes.extend_from_slice(options);
        bytes
    }

    #[test]
    fn header_round_trip_with_options() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.set_tos(0x10);
        ipv4.set_id(0xbeef);
        ipv4.set_flags(Ipv4Flags::DONT_FRAGMENT);
        ipv4.set_frag_offset(12);
        ipv4.set_ttl(3);
        ipv4.set_protocol(200);
        ipv4.set_noop_option().unwrap();
        ipv4.set_sec_option(&[1, 2, 3, 4]).unwrap();
        assert_eq!(ipv4.options_size(), 7);
        assert_eq!(ipv4.padded_options_size(), 8);
        assert_eq!(ipv4.ihl(), 7);

        let bytes = ipv4.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[0], 0x47);
        assert_eq!(&bytes[20..28], &[0x01, 0x82, 6, 1, 2, 3, 4, 0]);

        let decoded = Ipv4::from_bytes(&bytes).unwrap();
        assert_same_header(&ipv4, &decoded);
        assert!(decoded.payload().is_none());

        let sec = decoded
            .search_option(OptionClass::Control, OptionNumber::SEC)
            .unwrap();
        assert!(sec.copied());
        assert_eq!(sec.data(), &[1, 2, 3, 4]);
        assert!(decoded
            .search_option(OptionClass::Measurement, OptionNumber::TIMESTAMP)
            .is_none());
    }

    #[test]
    fn enclosed_header_checksum_self_check() {
        let mut inner = Ipv4::new(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2));
        inner.set_sec_option(&[0xde, 0xad, 0xbe]).unwrap();
        inner.set_payload(Box::new(Raw::new(b"hi".to_vec()))).unwrap();
        let inner_len = inner.header_len();
        assert_eq!(inner_len, 28);

        let mut outer = Ipv4::new(SERVER, CLIENT);
        outer.set_payload(Box::new(inner)).unwrap();

        let bytes = outer.to_bytes();
        assert_eq!(bytes[9], DATA_PROTO_IPIP);
        // The outermost header is written without a parent, so its checksum stays as stored.
        assert_eq!(&bytes[10..12], &[0, 0]);

        let inner_header = &bytes[IPV4_HEADER_LEN..IPV4_HEADER_LEN + inner_len];
        assert_ne!(&inner_header[10..12], &[0, 0]);
        assert_eq!(utils::fold_checksum(utils::checksum(inner_header)), 0xffff);
    }

    #[test]
    fn preset_checksum_is_kept() {
        let mut inner = Ipv4::new(SERVER, CLIENT);
        inner.set_chksum(0x1234);
        let mut outer = Ipv4::new(SERVER, CLIENT);
        outer.set_payload(Box::new(inner)).unwrap();

        let bytes = outer.to_bytes();
        assert_eq!(&bytes[30..32], &[0x12, 0x34]);
    }

    #[test]
    fn total_length_with_transport_payload() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.set_payload(Box::new(Udp::new(5000, 53))).unwrap();

        let bytes = ipv4.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 28);
        assert_eq!(bytes[0] & 0x0f, 5);
        assert_eq!(bytes[9], DATA_PROTO_UDP);
    }

    #[test]
    fn option_length_past_region() {
        let bytes = header_with_options(&[0x82, 10, 0, 0]);
        let err = Ipv4::from_bytes(&bytes).unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(err.class, ValidationErrorClass::InvalidSize);
    }

    #[test]
    fn option_length_byte_missing() {
        let bytes = header_with_options(&[0x01, 0x01, 0x01, 0x82]);
        assert!(Ipv4::from_bytes(&bytes).unwrap_err().is_truncated());
    }

    #[test]
    fn option_length_below_minimum() {
        for len in [0, 1] {
            let bytes = header_with_options(&[0x82, len, 0, 0]);
            assert!(Ipv4::from_bytes(&bytes).unwrap_err().is_malformed());
        }
    }

    #[test]
    fn option_with_empty_data() {
        let bytes = header_with_options(&[0x94, 2, 0, 0]);
        let ipv4 = Ipv4::from_bytes(&bytes).unwrap();
        assert_eq!(ipv4.options().len(), 1);
        assert_eq!(ipv4.options()[0].number(), OptionNumber::RTRALT);
        assert!(ipv4.options()[0].data().is_empty());
        assert_eq!(ipv4.options_size(), 2);
    }

    #[test]
    fn end_of_list_stops_parsing() {
        let bytes = header_with_options(&[0x00, 0x82, 0xff, 0x07]);
        let ipv4 = Ipv4::from_bytes(&bytes).unwrap();
        assert!(ipv4.options().is_empty());
        assert_eq!(ipv4.options_size(), 0);
        assert_eq!(ipv4.padded_options_size(), 4);

        // Padding is rewritten as zeroes, never as the bytes that followed the marker.
        assert_eq!(&ipv4.to_bytes()[20..24], &[0, 0, 0, 0]);
    }

    #[test]
    fn fixed_header_bounds() {
        let bytes = Ipv4::new(SERVER, CLIENT).to_bytes();
        assert!(Ipv4::from_bytes(&bytes[..19]).unwrap_err().is_truncated());

        let mut short_ihl = bytes.clone();
        short_ihl[0] = 0x44;
        assert!(Ipv4::from_bytes(&short_ihl).unwrap_err().is_malformed());

        let mut long_ihl = bytes;
        long_ihl[0] = 0x46;
        assert!(Ipv4::from_bytes(&long_ihl).unwrap_err().is_truncated());
    }

    #[test]
    fn option_region_limit() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.set_sec_option(&[0; 38]).unwrap();
        assert_eq!(ipv4.padded_options_size(), MAX_OPTIONS_LEN);

        let err = ipv4.set_noop_option().unwrap_err();
        assert_eq!(err.class, ValidationErrorClass::InvalidSize);
        assert_eq!(ipv4.options().len(), 1);
        assert_eq!(ipv4.options_size(), 40);
        assert_eq!(ipv4.ihl(), 15);
    }

    #[test]
    fn single_byte_options_reject_data() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        let unrecognized = OptionNumber::new(6);
        let with_data = Ipv4Option::new(false, OptionClass::Control, unrecognized, vec![1, 2]);
        let err = ipv4.add_option(with_data).unwrap_err();
        assert_eq!(err.class, ValidationErrorClass::InvalidValue);

        let noop = Ipv4Option::new(false, OptionClass::Control, OptionNumber::NOOP, vec![9]);
        assert!(ipv4.add_option(noop).is_err());
        assert!(ipv4.options().is_empty());
        assert_eq!(ipv4.options_size(), 0);

        // Without data both are written as a lone type byte and decode back unchanged
        ipv4.add_option(Ipv4Option::new(false, OptionClass::Control, unrecognized, Vec::new()))
            .unwrap();
        ipv4.set_noop_option().unwrap();
        assert_eq!(ipv4.options_size(), 2);

        let bytes = ipv4.to_bytes();
        assert_eq!(&bytes[20..24], &[0x06, 0x01, 0, 0]);
        let decoded = Ipv4::from_bytes(&bytes).unwrap();
        assert_same_header(&ipv4, &decoded);
    }

    #[test]
    fn payload_dispatch_by_protocol() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.set_payload(Box::new(Tcp::new(1, 2))).unwrap();
        let decoded = Ipv4::from_bytes(&ipv4.to_bytes()).unwrap();
        assert!(decoded.get_layer::<Tcp>().is_some());

        ipv4.set_payload(Box::new(Icmp::echo_request(1, 1))).unwrap();
        let decoded = Ipv4::from_bytes(&ipv4.to_bytes()).unwrap();
        assert!(decoded.get_layer::<Icmp>().is_some());

        ipv4.set_payload(Box::new(Raw::new(vec![1, 2, 3]))).unwrap();
        ipv4.set_protocol(47);
        let bytes = ipv4.to_bytes();
        assert_eq!(bytes[9], 47);
        let decoded = Ipv4::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.get_layer::<Raw>().unwrap().data(), &[1, 2, 3]);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn malformed_payload_fails_whole_decode() {
        let mut bytes = Ipv4::new(SERVER, CLIENT).to_bytes();
        bytes[9] = DATA_PROTO_TCP;
        bytes.extend_from_slice(&[0; 10]);
        assert!(Ipv4::from_bytes(&bytes).unwrap_err().is_truncated());
    }

    #[test]
    fn chain_helpers() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.append_layer(Udp::new(1000, 2000)).unwrap();
        ipv4.append_layer(Raw::new(b"data".to_vec())).unwrap();
        assert!(ipv4.append_layer(Raw::new(vec![0])).is_err());
        assert_eq!(ipv4.len(), 20 + 8 + 4);

        ipv4.get_layer_mut::<Udp>().unwrap().set_dport(2001);
        assert_eq!(ipv4.get_layer::<Udp>().unwrap().dport(), 2001);
        assert!(ipv4.get_layer::<Tcp>().is_none());

        let removed = ipv4.remove_payload().unwrap();
        assert_eq!(removed.len(), 12);
        assert_eq!(ipv4.len(), 20);
    }

    #[test]
    fn to_bytes_into_checks_capacity() {
        let mut ipv4 = Ipv4::new(SERVER, CLIENT);
        ipv4.set_payload(Box::new(Udp::new(1, 2))).unwrap();

        let mut storage = [0u8; 27];
        let mut buf = BufferMut::new(&mut storage);
        let err = ipv4.to_bytes_into(&mut buf).unwrap_err();
        assert_eq!(err.required, 28);
        assert_eq!(err.available, 27);
        assert!(buf.is_empty());

        let mut storage = [0u8; 32];
        let mut buf = BufferMut::new(&mut storage);
        ipv4.to_bytes_into(&mut buf).unwrap();
        assert_eq!(buf.as_slice(), ipv4.to_bytes().as_slice());
    }

    #[test]
    #[should_panic]
    fn undersized_output_buffer_panics() {
        let ipv4 = Ipv4::new(SERVER, CLIENT);
        let mut bytes = [0u8; 10];
        ipv4.write_serialization(&mut bytes, None);
    }

    fn echo(request: bool, src: Ipv4Addr, dst: Ipv4Addr, id: u16, seq: u16) -> Ipv4 {
        let mut icmp = Icmp::echo_request(id, seq);
        if !request {
            icmp.set_icmp_type(ICMP_TYPE_ECHO_REPLY);
        }
        icmp.set_payload(Box::new(Raw::new(b"ping".to_vec()))).unwrap();

        let mut ipv4 = Ipv4::new(dst, src);
        ipv4.set_payload(Box::new(icmp)).unwrap();
        ipv4
    }

    #[test]
    fn response_matching() {
        let request = echo(true, CLIENT, SERVER, 0x42, 1);
        assert_eq!(request.socket_kind(), SocketKind::Icmp);

        let reply = echo(false, SERVER, CLIENT, 0x42, 1).to_bytes();
        assert!(request.matches_response(&reply));

        // Same direction as the request
        assert!(!request.matches_response(&echo(false, CLIENT, SERVER, 0x42, 1).to_bytes()));
        // Different echo sequence number
        assert!(!request.matches_response(&echo(false, SERVER, CLIENT, 0x42, 2).to_bytes()));
        assert!(!request.matches_response(&reply[..19]));

        let mut bad_ihl = reply.clone();
        bad_ihl[0] = 0x4f;
        assert!(!request.matches_response(&bad_ihl));
    }

    #[test]
    fn clone_packet_bounded_by_total_length() {
        let request = echo(true, CLIENT, SERVER, 7, 7);
        let mut reply = echo(false, SERVER, CLIENT, 7, 7).to_bytes();
        reply.extend_from_slice(&[0xee; 6]);

        let cloned = request.clone_packet(&reply).unwrap();
        let ipv4 = (*cloned).as_any().downcast_ref::<Ipv4>().unwrap();
        assert_eq!(ipv4.len(), 32);
        let icmp = ipv4.get_layer::<Icmp>().unwrap();
        assert_eq!(icmp.icmp_type(), ICMP_TYPE_ECHO_REPLY);
        assert_eq!(ipv4.get_layer::<Raw>().unwrap().data(), b"ping");

        let mut short_total = reply;
        short_total[2..4].copy_from_slice(&8u16.to_be_bytes());
        assert!(request.clone_packet(&short_total).unwrap_err().is_malformed());
    }

    #[derive(Default)]
    struct ScriptedSender {
        sent: Vec<(Vec<u8>, Ipv4Addr, SocketKind)>,
        replies: VecDeque<Vec<u8>>,
    }

    impl PacketSender for ScriptedSender {
        fn send_l3(&mut self, packet: &[u8], daddr: Ipv4Addr, kind: SocketKind) -> io::Result<()> {
            self.sent.push((packet.to_vec(), daddr, kind));
            Ok(())
        }

        fn recv_l3(&mut self, buf: &mut [u8], _kind: SocketKind) -> io::Result<usize> {
            let reply = self
                .replies
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
            buf[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    #[test]
    fn send_recv_skips_unrelated_traffic() {
        let request = echo(true, CLIENT, SERVER, 9, 1);
        let mut sender = ScriptedSender::default();
        sender.replies.push_back(echo(false, SERVER, CLIENT, 9, 2).to_bytes());
        sender.replies.push_back(echo(false, SERVER, CLIENT, 9, 1).to_bytes());

        let response = request.send_recv(&mut sender).unwrap().unwrap();
        let icmp = (*response)
            .as_any()
            .downcast_ref::<Ipv4>()
            .and_then(|ipv4| ipv4.get_layer::<Icmp>())
            .unwrap();
        assert_eq!(icmp.seq(), 1);

        assert_eq!(sender.sent.len(), 1);
        let (bytes, daddr, kind) = &sender.sent[0];
        assert_eq!(bytes, &request.to_bytes());
        assert_eq!(*daddr, SERVER);
        assert_eq!(*kind, SocketKind::Icmp);
        assert_eq!(bytes[20], ICMP_TYPE_ECHO_REQUEST);
    }

    #[test]
    fn recv_response_times_out() {
        let mut request = Ipv4::new(SERVER, CLIENT);
        request.set_payload(Box::new(Udp::new(1, 2))).unwrap();
        assert_eq!(request.socket_kind(), SocketKind::Ip);

        let mut sender = ScriptedSender::default();
        assert!(request.recv_response(&mut sender).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn serialized_header_decodes_identically(
            tos in any::<u8>(),
            id in any::<u16>(),
            frag_off in any::<u16>(),
            ttl in any::<u8>(),
            protocol in any::<u8>(),
            chksum in any::<u16>(),
            saddr in any::<[u8; 4]>(),
            daddr in any::<[u8; 4]>(),
            noops in 0usize..4,
            sec in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let mut ipv4 = Ipv4::new(Ipv4Addr::from(daddr), Ipv4Addr::from(saddr));
            ipv4.set_tos(tos);
            ipv4.set_id(id);
            ipv4.set_flags(Ipv4Flags::from_bits_truncate(frag_off));
            ipv4.set_frag_offset(frag_off);
            ipv4.set_ttl(ttl);
            ipv4.set_protocol(protocol);
            ipv4.set_chksum(chksum);
            for _ in 0..noops {
                ipv4.set_noop_option().unwrap();
            }
            ipv4.set_sec_option(&sec).unwrap();

            let decoded = Ipv4::from_bytes(&ipv4.to_bytes()).unwrap();
            assert_same_header(&ipv4, &decoded);
            prop_assert!(decoded.payload().is_none());
        }
    }
}
