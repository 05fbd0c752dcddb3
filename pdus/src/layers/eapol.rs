// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! EAPOL-Key frames, as exchanged during WEP and WPA/WPA2 key handshakes.
//!
//! Every frame starts with the same envelope (version, packet type and body length) followed by a
//! key descriptor type byte. The descriptor type selects one of two bodies:
//!
//! - [`Rc4Eapol`], the legacy descriptor used to distribute RC4 (WEP) keys.
//! - [`RsnEapol`], the descriptor used by the WPA and RSN (WPA2) four-way and group handshakes.
//!
//! [`Eapol::from_bytes()`] inspects the descriptor type and decodes the matching variant.

use core::cmp;

use bitflags::bitflags;

use crate::error::*;
use crate::layers::rsn::{RsnInformation, RSN_INFORMATION_TAG};
use crate::layers::traits::*;
use crate::utils;

/// The length of the envelope shared by all EAPOL frames.
pub const EAPOL_ENVELOPE_LEN: usize = 4;
/// The length of the envelope plus the key descriptor type byte.
pub const EAPOL_HEADER_LEN: usize = EAPOL_ENVELOPE_LEN + 1;
/// The length of the fixed RC4 key descriptor body.
pub const RC4_BODY_LEN: usize = 43;
/// The length of the fixed RSN/WPA key descriptor body.
pub const RSN_BODY_LEN: usize = 94;

pub const DESCRIPTOR_RC4: u8 = 1;
pub const DESCRIPTOR_RSN: u8 = 2;
pub const DESCRIPTOR_WPA: u8 = 254;

/// The EAPOL protocol version newly constructed frames carry.
pub const EAPOL_VERSION: u8 = 1;
/// The EAPOL packet type of an EAPOL-Key frame.
pub const EAPOL_PACKET_TYPE_KEY: u8 = 3;

/// The key length an [`RsnEapol`] frame advertises when it carries a raw key.
pub const RSN_RAW_KEY_LEN: u16 = 32;

/// The envelope and key descriptor type shared by every EAPOL-Key frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EapolHeader {
    version: u8,
    packet_type: u8,
    length: u16,
    descriptor_type: u8,
}

impl EapolHeader {
    /// Creates an EAPOL-Key envelope for the given descriptor type.
    #[inline]
    pub fn new(descriptor_type: u8) -> Self {
        EapolHeader {
            version: EAPOL_VERSION,
            packet_type: EAPOL_PACKET_TYPE_KEY,
            length: 0,
            descriptor_type,
        }
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    #[inline]
    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    #[inline]
    pub fn set_packet_type(&mut self, packet_type: u8) {
        self.packet_type = packet_type;
    }

    /// The stored body length. A value of 0 means the length is derived when the frame is written.
    #[inline]
    pub fn length(&self) -> u16 {
        self.length
    }

    #[inline]
    pub fn set_length(&mut self, length: u16) {
        self.length = length;
    }

    #[inline]
    pub fn descriptor_type(&self) -> u8 {
        self.descriptor_type
    }

    fn decode(bytes: &[u8], layer: &'static str) -> Result<Self, ValidationError> {
        let Some(header) = bytes.first_chunk::<EAPOL_HEADER_LEN>() else {
            return Err(ValidationError {
                layer,
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode EAPOL header",
            });
        };

        Ok(EapolHeader {
            version: header[0],
            packet_type: header[1],
            length: u16::from_be_bytes([header[2], header[3]]),
            descriptor_type: header[4],
        })
    }

    /// Writes the envelope for a frame whose header and body total `header_len` bytes.
    fn write(&self, bytes: &mut [u8], header_len: usize) {
        let length = match self.length {
            0 => u16::try_from(header_len - EAPOL_ENVELOPE_LEN).unwrap_or(u16::MAX),
            length => length,
        };

        bytes[0] = self.version;
        bytes[1] = self.packet_type;
        bytes[2..4].copy_from_slice(&length.to_be_bytes());
        bytes[4] = self.descriptor_type;
    }

    /// The end of the frame as bounded by the envelope's length field.
    #[inline]
    fn frame_end(bytes: &[u8]) -> usize {
        match bytes.get(2..4) {
            Some(&[hi, lo]) => cmp::min(
                bytes.len(),
                EAPOL_ENVELOPE_LEN + u16::from_be_bytes([hi, lo]) as usize,
            ),
            _ => bytes.len(),
        }
    }
}

fn check_descriptor(
    header: &EapolHeader,
    allowed: &[u8],
    layer: &'static str,
) -> Result<(), ValidationError> {
    if allowed.contains(&header.descriptor_type) {
        Ok(())
    } else {
        Err(ValidationError {
            layer,
            class: ValidationErrorClass::InvalidValue,
            reason: "EAPOL key descriptor type does not match the requested variant",
        })
    }
}

/// Compares the replay counter of a candidate response with our own.
#[inline]
fn replay_counter_matches(bytes: &[u8], offset: usize, replay_counter: u64) -> bool {
    bytes
        .get(offset..offset + 8)
        .map_or(false, |counter| counter == replay_counter.to_be_bytes())
}

// =============================================================================
//                               Dispatch
// =============================================================================

/// An EAPOL-Key frame of either descriptor family.
#[derive(Clone, Debug)]
pub enum Eapol {
    Rc4(Rc4Eapol),
    Rsn(RsnEapol),
}

impl Eapol {
    /// The envelope of the frame.
    #[inline]
    pub fn header(&self) -> &EapolHeader {
        match self {
            Eapol::Rc4(rc4) => rc4.header(),
            Eapol::Rsn(rsn) => rsn.header(),
        }
    }

    /// Converts the frame into a boxed layer, suitable for use as a payload.
    #[inline]
    pub fn into_layer(self) -> Box<dyn LayerObject> {
        match self {
            Eapol::Rc4(rc4) => Box::new(rc4),
            Eapol::Rsn(rsn) => Box::new(rsn),
        }
    }
}

impl LayerName for Eapol {
    #[inline]
    fn name() -> &'static str {
        "Eapol"
    }
}

impl FromBytes for Eapol {
    /// Decodes an EAPOL-Key frame, selecting the variant from its key descriptor type.
    ///
    /// An unrecognized descriptor type is rejected with
    /// [`InvalidValue`](ValidationErrorClass::InvalidValue).
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let header = EapolHeader::decode(bytes, Self::name())?;
        match header.descriptor_type {
            DESCRIPTOR_RC4 => Ok(Eapol::Rc4(Rc4Eapol::from_bytes(bytes)?)),
            DESCRIPTOR_RSN | DESCRIPTOR_WPA => Ok(Eapol::Rsn(RsnEapol::from_bytes(bytes)?)),
            other => {
                log::debug!("unrecognized EAPOL key descriptor type {other}");
                Err(ValidationError {
                    layer: Self::name(),
                    class: ValidationErrorClass::InvalidValue,
                    reason: "unrecognized EAPOL key descriptor type",
                })
            }
        }
    }
}

// =============================================================================
//                           RC4 Key Descriptor
// =============================================================================

/// An EAPOL-Key frame using the RC4 key descriptor.
#[derive(Clone, Debug)]
pub struct Rc4Eapol {
    header: EapolHeader,
    key_length: u16,
    replay_counter: u64,
    key_iv: [u8; 16],
    key_index: u8,
    key_flag: bool,
    key_sign: [u8; 16],
    key: Vec<u8>,
    payload: Option<Box<dyn LayerObject>>,
}

impl Rc4Eapol {
    pub fn new() -> Self {
        Rc4Eapol {
            header: EapolHeader::new(DESCRIPTOR_RC4),
            key_length: 0,
            replay_counter: 0,
            key_iv: [0; 16],
            key_index: 0,
            key_flag: false,
            key_sign: [0; 16],
            key: Vec::new(),
            payload: None,
        }
    }

    #[inline]
    pub fn header(&self) -> &EapolHeader {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut EapolHeader {
        &mut self.header
    }

    /// The key length field. When a key is set, the key's length is written instead.
    #[inline]
    pub fn key_length(&self) -> u16 {
        self.key_length
    }

    #[inline]
    pub fn set_key_length(&mut self, key_length: u16) {
        self.key_length = key_length;
    }

    #[inline]
    pub fn replay_counter(&self) -> u64 {
        self.replay_counter
    }

    #[inline]
    pub fn set_replay_counter(&mut self, replay_counter: u64) {
        self.replay_counter = replay_counter;
    }

    #[inline]
    pub fn key_iv(&self) -> &[u8; 16] {
        &self.key_iv
    }

    #[inline]
    pub fn set_key_iv(&mut self, key_iv: [u8; 16]) {
        self.key_iv = key_iv;
    }

    /// The 7-bit key index.
    #[inline]
    pub fn key_index(&self) -> u8 {
        self.key_index
    }

    #[inline]
    pub fn set_key_index(&mut self, key_index: u8) {
        self.key_index = key_index & 0x7f;
    }

    /// Whether the key is a unicast (`true`) or broadcast (`false`) key.
    #[inline]
    pub fn key_flag(&self) -> bool {
        self.key_flag
    }

    #[inline]
    pub fn set_key_flag(&mut self, key_flag: bool) {
        self.key_flag = key_flag;
    }

    #[inline]
    pub fn key_sign(&self) -> &[u8; 16] {
        &self.key_sign
    }

    #[inline]
    pub fn set_key_sign(&mut self, key_sign: [u8; 16]) {
        self.key_sign = key_sign;
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
    }
}

impl Default for Rc4Eapol {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl LayerName for Rc4Eapol {
    #[inline]
    fn name() -> &'static str {
        "Rc4Eapol"
    }
}

impl LayerLength for Rc4Eapol {
    #[inline]
    fn len(&self) -> usize {
        self.header_len() + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for Rc4Eapol {
    /// Decodes the frame's header and fixed body.
    ///
    /// The trailing key is only captured when the bytes following the body exactly match the
    /// key length field; otherwise the frame is taken to carry no key.
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        let header = EapolHeader::decode(bytes, Self::name())?;
        check_descriptor(&header, &[DESCRIPTOR_RC4], Self::name())?;

        let Some(body) = bytes
            .get(EAPOL_HEADER_LEN..)
            .and_then(|b| b.first_chunk::<RC4_BODY_LEN>())
        else {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode RC4 key descriptor body",
            });
        };

        let key_length = u16::from_be_bytes([body[0], body[1]]);
        let rest = &bytes[EAPOL_HEADER_LEN + RC4_BODY_LEN..];
        let key = if rest.len() == key_length as usize {
            rest.to_vec()
        } else {
            log::trace!(
                "Rc4Eapol key length {key_length} does not match {} trailing bytes, treating key as absent",
                rest.len()
            );
            Vec::new()
        };

        let mut key_iv = [0; 16];
        key_iv.copy_from_slice(&body[10..26]);
        let mut key_sign = [0; 16];
        key_sign.copy_from_slice(&body[27..43]);

        let consumed = EAPOL_HEADER_LEN + RC4_BODY_LEN + key.len();
        let rc4 = Rc4Eapol {
            header,
            key_length,
            replay_counter: utils::be_u64(body, 2),
            key_iv,
            key_index: body[26] & 0x7f,
            key_flag: body[26] & 0x80 != 0,
            key_sign,
            key,
            payload: None,
        };

        Ok((rc4, consumed))
    }
}

impl FromBytes for Rc4Eapol {
    #[inline]
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(Self::from_bytes_current_layer(bytes)?.0)
    }
}

impl LayerObject for Rc4Eapol {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        EAPOL_HEADER_LEN + RC4_BODY_LEN + self.key.len()
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

    fn write_serialization(&self, bytes: &mut [u8], _parent: Option<&dyn LayerObject>) {
        let header_len = self.header_len();
        assert!(
            bytes.len() >= header_len,
            "insufficient buffer space to serialize Rc4Eapol frame"
        );

        self.header.write(bytes, header_len);

        let key_length = if self.key.is_empty() {
            self.key_length
        } else {
            u16::try_from(self.key.len()).unwrap_or(u16::MAX)
        };

        let body = &mut bytes[EAPOL_HEADER_LEN..header_len];
        body[0..2].copy_from_slice(&key_length.to_be_bytes());
        body[2..10].copy_from_slice(&self.replay_counter.to_be_bytes());
        body[10..26].copy_from_slice(&self.key_iv);
        body[26] = (u8::from(self.key_flag) << 7) | (self.key_index & 0x7f);
        body[27..43].copy_from_slice(&self.key_sign);
        body[RC4_BODY_LEN..].copy_from_slice(&self.key);

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(&mut bytes[header_len..], Some(self));
        }
    }

    /// A response carries the same descriptor type and replay counter.
    fn matches_response(&self, bytes: &[u8]) -> bool {
        if bytes.get(4) != Some(&DESCRIPTOR_RC4)
            || !replay_counter_matches(bytes, EAPOL_HEADER_LEN + 2, self.replay_counter)
        {
            return false;
        }

        match self.payload.as_deref() {
            None => true,
            Some(payload) => Rc4Eapol::from_bytes_current_layer(bytes)
                .ok()
                .and_then(|(_, consumed)| bytes.get(consumed..))
                .map_or(false, |rest| payload.matches_response(rest)),
        }
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let bytes = &bytes[..EapolHeader::frame_end(bytes)];
        let (mut rc4, consumed) = Self::from_bytes_current_layer(bytes)?;
        rc4.payload = clone_payload(self.payload.as_deref(), &bytes[consumed..])?;
        Ok(Box::new(rc4))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}

// =============================================================================
//                         RSN/WPA Key Descriptor
// =============================================================================

bitflags! {
    /// The single-bit fields of the RSN key information word.
    ///
    /// The descriptor version (bits 0-2) and key index (bits 4-5) are multi-bit fields and are
    /// accessed through [`RsnEapol::key_descriptor_version()`] and [`RsnEapol::key_index()`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct KeyInformation: u16 {
        /// Pairwise key. Decoding only strips information element framing when this is set.
        const KEY_TYPE = 0x0008;
        const INSTALL = 0x0040;
        const KEY_ACK = 0x0080;
        const KEY_MIC = 0x0100;
        const SECURE = 0x0200;
        const ERROR = 0x0400;
        const REQUEST = 0x0800;
        const ENCRYPTED_KEY_DATA = 0x1000;

        const _ = !0;
    }
}

const KEY_DESCRIPTOR_VERSION_MASK: u16 = 0x0007;
const KEY_INDEX_MASK: u16 = 0x0030;

/// An EAPOL-Key frame using the RSN (or WPA) key descriptor.
///
/// The trailing key data is either a raw key or a serialized RSN information element. The two
/// forms differ on the wire: an information element is preceded by its tag and length bytes.
/// [`set_key()`](Self::set_key) and [`set_rsn_information()`](Self::set_rsn_information) select
/// the form and update [`KeyInformation::KEY_TYPE`] and the key length field to match.
///
/// A decoded frame keeps the form it arrived in. Key data that is not framed as an information
/// element (such as an encrypted key data block) stays unframed even when `KEY_TYPE` is set, so
/// decoding and re-serializing a frame reproduces its bytes.
#[derive(Clone, Debug)]
pub struct RsnEapol {
    header: EapolHeader,
    key_info: KeyInformation,
    key_length: u16,
    replay_counter: u64,
    nonce: [u8; 32],
    key_iv: [u8; 16],
    rsc: u64,
    id: u64,
    mic: [u8; 16],
    wpa_length: u16,
    key: Vec<u8>,
    /// `key` is written behind an information element tag and length byte; never set for key
    /// data longer than `u8::MAX` bytes.
    framed: bool,
    payload: Option<Box<dyn LayerObject>>,
}

impl RsnEapol {
    pub fn new() -> Self {
        RsnEapol {
            header: EapolHeader::new(DESCRIPTOR_RSN),
            key_info: KeyInformation::empty(),
            key_length: 0,
            replay_counter: 0,
            nonce: [0; 32],
            key_iv: [0; 16],
            rsc: 0,
            id: 0,
            mic: [0; 16],
            wpa_length: 0,
            key: Vec::new(),
            framed: false,
            payload: None,
        }
    }

    #[inline]
    pub fn header(&self) -> &EapolHeader {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut EapolHeader {
        &mut self.header
    }

    #[inline]
    pub fn key_information(&self) -> KeyInformation {
        self.key_info
    }

    #[inline]
    pub fn set_key_information(&mut self, key_info: KeyInformation) {
        self.key_info = key_info;
    }

    /// The key descriptor version (bits 0-2 of the key information word).
    #[inline]
    pub fn key_descriptor_version(&self) -> u8 {
        (self.key_info.bits() & KEY_DESCRIPTOR_VERSION_MASK) as u8
    }

    #[inline]
    pub fn set_key_descriptor_version(&mut self, version: u8) {
        let bits = (self.key_info.bits() & !KEY_DESCRIPTOR_VERSION_MASK)
            | (version as u16 & KEY_DESCRIPTOR_VERSION_MASK);
        self.key_info = KeyInformation::from_bits_retain(bits);
    }

    /// The group key index (bits 4-5 of the key information word).
    #[inline]
    pub fn key_index(&self) -> u8 {
        ((self.key_info.bits() & KEY_INDEX_MASK) >> 4) as u8
    }

    #[inline]
    pub fn set_key_index(&mut self, index: u8) {
        let bits =
            (self.key_info.bits() & !KEY_INDEX_MASK) | (((index as u16) << 4) & KEY_INDEX_MASK);
        self.key_info = KeyInformation::from_bits_retain(bits);
    }

    /// The key length field. Setting the key data also updates it.
    #[inline]
    pub fn key_length(&self) -> u16 {
        self.key_length
    }

    #[inline]
    pub fn set_key_length(&mut self, key_length: u16) {
        self.key_length = key_length;
    }

    #[inline]
    pub fn replay_counter(&self) -> u64 {
        self.replay_counter
    }

    #[inline]
    pub fn set_replay_counter(&mut self, replay_counter: u64) {
        self.replay_counter = replay_counter;
    }

    #[inline]
    pub fn nonce(&self) -> &[u8; 32] {
        &self.nonce
    }

    #[inline]
    pub fn set_nonce(&mut self, nonce: [u8; 32]) {
        self.nonce = nonce;
    }

    #[inline]
    pub fn key_iv(&self) -> &[u8; 16] {
        &self.key_iv
    }

    #[inline]
    pub fn set_key_iv(&mut self, key_iv: [u8; 16]) {
        self.key_iv = key_iv;
    }

    /// The key receive sequence counter.
    #[inline]
    pub fn rsc(&self) -> u64 {
        self.rsc
    }

    #[inline]
    pub fn set_rsc(&mut self, rsc: u64) {
        self.rsc = rsc;
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    #[inline]
    pub fn mic(&self) -> &[u8; 16] {
        &self.mic
    }

    #[inline]
    pub fn set_mic(&mut self, mic: [u8; 16]) {
        self.mic = mic;
    }

    /// The stored key data length field. When key data is set, the length is derived on write.
    #[inline]
    pub fn wpa_length(&self) -> u16 {
        self.wpa_length
    }

    #[inline]
    pub fn set_wpa_length(&mut self, wpa_length: u16) {
        self.wpa_length = wpa_length;
    }

    /// The trailing key data, excluding any information element tag and length bytes.
    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Sets the trailing key data to a raw key.
    ///
    /// This clears [`KeyInformation::KEY_TYPE`] and sets the key length field to
    /// [`RSN_RAW_KEY_LEN`].
    #[inline]
    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
        self.framed = false;
        self.key_length = RSN_RAW_KEY_LEN;
        self.key_info.remove(KeyInformation::KEY_TYPE);
    }

    /// Sets the trailing key data to a serialized RSN information element.
    ///
    /// This sets [`KeyInformation::KEY_TYPE`] and zeroes the key length field. Fails if the
    /// serialized element is too long to be described by its one-byte length field.
    pub fn set_rsn_information(&mut self, info: &RsnInformation) -> Result<(), ValidationError> {
        let serialized = info.serialize();
        if serialized.len() > u8::MAX as usize {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InvalidSize,
                reason: "RSN information element too long for its length field",
            });
        }

        self.key = serialized;
        self.framed = true;
        self.key_length = 0;
        self.key_info.insert(KeyInformation::KEY_TYPE);
        Ok(())
    }

    /// Decodes the trailing key data as an RSN information element, if the frame carries one.
    pub fn rsn_information(&self) -> Option<Result<RsnInformation, ValidationError>> {
        if self.has_element_framing() {
            Some(RsnInformation::from_bytes(&self.key))
        } else {
            None
        }
    }

    /// Indicates whether the key data is carried as an RSN information element.
    #[inline]
    pub fn has_element_framing(&self) -> bool {
        self.framed && !self.key.is_empty()
    }

    /// The WPA length field as it will be written.
    fn derived_wpa_length(&self) -> u16 {
        if self.key.is_empty() {
            return self.wpa_length;
        }

        let framing = if self.has_element_framing() { 2 } else { 0 };
        u16::try_from(self.key.len() + framing).unwrap_or(u16::MAX)
    }
}

impl Default for RsnEapol {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl LayerName for RsnEapol {
    #[inline]
    fn name() -> &'static str {
        "RsnEapol"
    }
}

impl LayerLength for RsnEapol {
    #[inline]
    fn len(&self) -> usize {
        self.header_len() + self.payload.as_ref().map_or(0, |p| p.len())
    }
}

impl FromBytesCurrent for RsnEapol {
    /// Decodes the frame's header and fixed body.
    ///
    /// The trailing key data is only captured when the bytes following the body exactly match
    /// the WPA length field. If the key type bit is set and the data is framed as an RSN
    /// information element, the tag and length bytes are stripped.
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        let header = EapolHeader::decode(bytes, Self::name())?;
        check_descriptor(&header, &[DESCRIPTOR_RSN, DESCRIPTOR_WPA], Self::name())?;

        let Some(body) = bytes
            .get(EAPOL_HEADER_LEN..)
            .and_then(|b| b.first_chunk::<RSN_BODY_LEN>())
        else {
            return Err(ValidationError {
                layer: Self::name(),
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode RSN key descriptor body",
            });
        };

        let key_info = KeyInformation::from_bits_retain(u16::from_be_bytes([body[0], body[1]]));
        let wpa_length = u16::from_be_bytes([body[92], body[93]]);

        let rest = &bytes[EAPOL_HEADER_LEN + RSN_BODY_LEN..];
        let (data, consumed) = if rest.len() == wpa_length as usize {
            (rest, rest.len())
        } else {
            log::trace!(
                "RsnEapol WPA length {wpa_length} does not match {} trailing bytes, treating key data as absent",
                rest.len()
            );
            (&rest[..0], 0)
        };

        let (key, framed) = match data {
            [RSN_INFORMATION_TAG, len, element @ ..]
                if key_info.contains(KeyInformation::KEY_TYPE) && *len as usize == element.len() =>
            {
                (element.to_vec(), true)
            }
            _ => (data.to_vec(), false),
        };

        let mut nonce = [0; 32];
        nonce.copy_from_slice(&body[12..44]);
        let mut key_iv = [0; 16];
        key_iv.copy_from_slice(&body[44..60]);
        let mut mic = [0; 16];
        mic.copy_from_slice(&body[76..92]);

        let rsn = RsnEapol {
            header,
            key_info,
            key_length: u16::from_be_bytes([body[2], body[3]]),
            replay_counter: utils::be_u64(body, 4),
            nonce,
            key_iv,
            rsc: utils::be_u64(body, 60),
            id: utils::be_u64(body, 68),
            mic,
            wpa_length,
            key,
            framed,
            payload: None,
        };

        Ok((rsn, EAPOL_HEADER_LEN + RSN_BODY_LEN + consumed))
    }
}

impl FromBytes for RsnEapol {
    #[inline]
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(Self::from_bytes_current_layer(bytes)?.0)
    }
}

impl LayerObject for RsnEapol {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        let framing = if self.has_element_framing() { 2 } else { 0 };
        EAPOL_HEADER_LEN + RSN_BODY_LEN + framing + self.key.len()
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

    fn write_serialization(&self, bytes: &mut [u8], _parent: Option<&dyn LayerObject>) {
        let header_len = self.header_len();
        assert!(
            bytes.len() >= header_len,
            "insufficient buffer space to serialize RsnEapol frame"
        );

        self.header.write(bytes, header_len);

        let wpa_length = self.derived_wpa_length();
        let body = &mut bytes[EAPOL_HEADER_LEN..header_len];
        body[0..2].copy_from_slice(&self.key_info.bits().to_be_bytes());
        body[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        body[4..12].copy_from_slice(&self.replay_counter.to_be_bytes());
        body[12..44].copy_from_slice(&self.nonce);
        body[44..60].copy_from_slice(&self.key_iv);
        body[60..68].copy_from_slice(&self.rsc.to_be_bytes());
        body[68..76].copy_from_slice(&self.id.to_be_bytes());
        body[76..92].copy_from_slice(&self.mic);
        body[92..94].copy_from_slice(&wpa_length.to_be_bytes());

        let mut offset = EAPOL_HEADER_LEN + RSN_BODY_LEN;
        if self.has_element_framing() {
            bytes[offset] = RSN_INFORMATION_TAG;
            bytes[offset + 1] = self.key.len() as u8; // framed key data fits in one byte
            offset += 2;
        }
        bytes[offset..header_len].copy_from_slice(&self.key);

        if let Some(payload) = self.payload.as_deref() {
            payload.write_serialization(&mut bytes[header_len..], Some(self));
        }
    }

    /// A response carries the same descriptor type and replay counter.
    fn matches_response(&self, bytes: &[u8]) -> bool {
        if bytes.get(4) != Some(&self.header.descriptor_type)
            || !replay_counter_matches(bytes, EAPOL_HEADER_LEN + 4, self.replay_counter)
        {
            return false;
        }

        match self.payload.as_deref() {
            None => true,
            Some(payload) => RsnEapol::from_bytes_current_layer(bytes)
                .ok()
                .and_then(|(_, consumed)| bytes.get(consumed..))
                .map_or(false, |rest| payload.matches_response(rest)),
        }
    }

    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        let bytes = &bytes[..EapolHeader::frame_end(bytes)];
        let (mut rsn, consumed) = Self::from_bytes_current_layer(bytes)?;
        rsn.payload = clone_payload(self.payload.as_deref(), &bytes[consumed..])?;
        Ok(Box::new(rsn))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::rsn::CipherSuite;

    fn rc4_frame(key_length: u16, trailing: &[u8]) -> Vec<u8> {
        let mut bytes = vec![EAPOL_VERSION, EAPOL_PACKET_TYPE_KEY, 0, 0, DESCRIPTOR_RC4];
        bytes.extend(key_length.to_be_bytes());
        bytes.extend(7u64.to_be_bytes());
        bytes.extend([0x11; 16]);
        bytes.push(0x80 | 3);
        bytes.extend([0x22; 16]);
        bytes.extend(trailing);
        let length = (bytes.len() - EAPOL_ENVELOPE_LEN) as u16;
        bytes[2..4].copy_from_slice(&length.to_be_bytes());
        bytes
    }

    #[test]
    fn rc4_key_captured_on_exact_length() {
        let bytes = rc4_frame(5, &[1, 2, 3, 4, 5]);
        let Eapol::Rc4(rc4) = Eapol::from_bytes(&bytes).unwrap() else {
            panic!("expected RC4 descriptor");
        };

        assert_eq!(rc4.key(), &[1, 2, 3, 4, 5]);
        assert_eq!(rc4.replay_counter(), 7);
        assert_eq!(rc4.key_index(), 3);
        assert!(rc4.key_flag());
        assert_eq!(rc4.key_iv(), &[0x11; 16]);
        assert_eq!(rc4.key_sign(), &[0x22; 16]);
        assert_eq!(rc4.to_bytes(), bytes);
    }

    #[test]
    fn rc4_key_absent_on_length_mismatch() {
        for trailing in [&[1u8, 2, 3, 4][..], &[1, 2, 3, 4, 5, 6][..]] {
            let rc4 = Rc4Eapol::from_bytes(&rc4_frame(5, trailing)).unwrap();
            assert!(rc4.key().is_empty());
            assert_eq!(rc4.key_length(), 5);
        }
    }

    #[test]
    fn rc4_key_length_follows_key() {
        let mut rc4 = Rc4Eapol::new();
        rc4.set_key_length(99);
        rc4.set_key(vec![0xaa; 13]);

        let bytes = rc4.to_bytes();
        assert_eq!(bytes.len(), EAPOL_HEADER_LEN + RC4_BODY_LEN + 13);
        assert_eq!(&bytes[0..2], &[EAPOL_VERSION, EAPOL_PACKET_TYPE_KEY]);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, bytes.len() - 4);
        assert_eq!(&bytes[5..7], &13u16.to_be_bytes());
    }

    #[test]
    fn rsn_raw_key_serialization() {
        let mut rsn = RsnEapol::new();
        rsn.set_key_information(KeyInformation::KEY_TYPE | KeyInformation::KEY_ACK);
        rsn.set_key(vec![0x5a; 16]);
        assert!(!rsn.key_information().contains(KeyInformation::KEY_TYPE));

        let bytes = rsn.to_bytes();
        let data_start = EAPOL_HEADER_LEN + RSN_BODY_LEN;
        assert_eq!(bytes.len(), data_start + 16);
        assert_eq!(&bytes[7..9], &RSN_RAW_KEY_LEN.to_be_bytes());
        assert_eq!(&bytes[97..99], &16u16.to_be_bytes());
        assert_eq!(&bytes[data_start..], &[0x5a; 16]);
    }

    #[test]
    fn rsn_information_element_serialization() {
        let info = RsnInformation::wpa2_psk();
        let element = info.serialize();
        let size = element.len();

        let mut rsn = RsnEapol::new();
        rsn.set_key_length(16);
        rsn.set_rsn_information(&info).unwrap();

        let bytes = rsn.to_bytes();
        let data_start = EAPOL_HEADER_LEN + RSN_BODY_LEN;
        assert_eq!(bytes.len(), data_start + 2 + size);
        assert_eq!(u16::from_be_bytes([bytes[5], bytes[6]]) & 0x0008, 0x0008);
        assert_eq!(&bytes[7..9], &[0, 0]);
        assert_eq!(&bytes[97..99], &(size as u16 + 2).to_be_bytes());
        assert_eq!(bytes[data_start], RSN_INFORMATION_TAG);
        assert_eq!(bytes[data_start + 1] as usize, size);
        assert_eq!(&bytes[data_start + 2..], element.as_slice());

        let Eapol::Rsn(decoded) = Eapol::from_bytes(&bytes).unwrap() else {
            panic!("expected RSN descriptor");
        };
        assert_eq!(decoded.key(), element.as_slice());
        assert!(decoded.has_element_framing());
        assert_eq!(decoded.rsn_information(), Some(Ok(info)));
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn rsn_oversized_information_element_rejected() {
        let mut info = RsnInformation::wpa2_psk();
        for _ in 0..70 {
            info.add_pairwise_suite(CipherSuite::CCMP);
        }

        let mut rsn = RsnEapol::new();
        rsn.set_key(vec![1, 2, 3]);
        let err = rsn.set_rsn_information(&info).unwrap_err();
        assert_eq!(err.class, ValidationErrorClass::InvalidSize);
        assert_eq!(rsn.key(), &[1, 2, 3]);
        assert!(!rsn.has_element_framing());
        assert!(!rsn.key_information().contains(KeyInformation::KEY_TYPE));
    }

    #[test]
    fn key_type_flag_alone_never_frames_key() {
        let mut rsn = RsnEapol::new();
        rsn.set_key(vec![0xab; 300]);
        rsn.set_key_information(rsn.key_information() | KeyInformation::KEY_TYPE);
        assert!(!rsn.has_element_framing());
        assert!(rsn.rsn_information().is_none());

        let bytes = rsn.to_bytes();
        let data_start = EAPOL_HEADER_LEN + RSN_BODY_LEN;
        assert_eq!(bytes.len(), data_start + 300);
        assert_eq!(&bytes[7..9], &RSN_RAW_KEY_LEN.to_be_bytes());
        assert_eq!(&bytes[97..99], &300u16.to_be_bytes());
        assert_eq!(&bytes[data_start..], &[0xab; 300][..]);

        let decoded = RsnEapol::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.key().len(), 300);
        assert!(!decoded.has_element_framing());
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn unframed_key_data_round_trips_with_key_type() {
        let info = KeyInformation::KEY_TYPE
            | KeyInformation::KEY_ACK
            | KeyInformation::KEY_MIC
            | KeyInformation::ENCRYPTED_KEY_DATA;

        // Encrypted key data, and key data that only resembles an element header
        let mut disguised = vec![RSN_INFORMATION_TAG, 5];
        disguised.resize(24, 0x13);
        for key_data in [vec![0x77; 24], disguised] {
            let mut bytes = RsnEapol::new().to_bytes();
            bytes[5..7].copy_from_slice(&info.bits().to_be_bytes());
            bytes[7..9].copy_from_slice(&16u16.to_be_bytes());
            bytes[97..99].copy_from_slice(&24u16.to_be_bytes());
            bytes.extend_from_slice(&key_data);
            let length = (bytes.len() - EAPOL_ENVELOPE_LEN) as u16;
            bytes[2..4].copy_from_slice(&length.to_be_bytes());
            assert_eq!(bytes.len(), 123);

            let decoded = RsnEapol::from_bytes(&bytes).unwrap();
            assert_eq!(decoded.key(), key_data.as_slice());
            assert_eq!(decoded.key_length(), 16);
            assert!(!decoded.has_element_framing());
            assert_eq!(decoded.to_bytes(), bytes);
        }
    }

    #[test]
    fn rsn_fields_round_trip() {
        let mut rsn = RsnEapol::new();
        rsn.header_mut().set_version(2);
        rsn.set_key_descriptor_version(2);
        rsn.set_key_index(1);
        rsn.set_replay_counter(0x0102_0304_0506_0708);
        rsn.set_nonce([0x33; 32]);
        rsn.set_key_iv([0x44; 16]);
        rsn.set_rsc(9);
        rsn.set_id(10);
        rsn.set_mic([0x55; 16]);

        let bytes = rsn.to_bytes();
        assert_eq!(bytes.len(), EAPOL_HEADER_LEN + RSN_BODY_LEN);

        let decoded = RsnEapol::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.header().version(), 2);
        assert_eq!(decoded.key_descriptor_version(), 2);
        assert_eq!(decoded.key_index(), 1);
        assert_eq!(decoded.replay_counter(), 0x0102_0304_0506_0708);
        assert_eq!(decoded.nonce(), &[0x33; 32]);
        assert_eq!(decoded.key_iv(), &[0x44; 16]);
        assert_eq!(decoded.rsc(), 9);
        assert_eq!(decoded.id(), 10);
        assert_eq!(decoded.mic(), &[0x55; 16]);
        assert!(decoded.key().is_empty());
    }

    #[test]
    fn wpa_descriptor_decodes_as_rsn() {
        let mut bytes = RsnEapol::new().to_bytes();
        bytes[4] = DESCRIPTOR_WPA;
        assert!(matches!(Eapol::from_bytes(&bytes), Ok(Eapol::Rsn(_))));
    }

    #[test]
    fn dispatch_errors() {
        let mut bytes = RsnEapol::new().to_bytes();
        bytes[4] = 7;
        let err = Eapol::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.class, ValidationErrorClass::InvalidValue);

        assert!(Eapol::from_bytes(&[1, 3, 0]).unwrap_err().is_truncated());
        assert!(Eapol::from_bytes(&rc4_frame(0, &[])[..40]).unwrap_err().is_truncated());
    }

    #[test]
    fn response_matches_replay_counter() {
        let mut request = RsnEapol::new();
        request.set_replay_counter(3);

        let mut reply = RsnEapol::new();
        reply.set_replay_counter(3);
        let mut bytes = reply.to_bytes();
        assert!(request.matches_response(&bytes));
        bytes[4] = DESCRIPTOR_WPA;
        assert!(!request.matches_response(&bytes));

        reply.set_replay_counter(4);
        assert!(!request.matches_response(&reply.to_bytes()));
        assert!(!request.matches_response(&rc4_frame(0, &[])));
    }

    #[test]
    fn clone_packet_ignores_trailing_padding() {
        let mut bytes = rc4_frame(2, &[9, 9]);
        bytes.extend([0; 6]);

        let template = Rc4Eapol::new();
        let cloned = template.clone_packet(&bytes).unwrap();
        let rc4 = (*cloned).as_any().downcast_ref::<Rc4Eapol>().unwrap();
        assert_eq!(rc4.key(), &[9, 9]);
        assert!(rc4.payload().is_none());
    }
}
