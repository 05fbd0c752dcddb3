// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The collection of protocol layers implemented by this library.
//!
//! Most communication protocols make use of multiple encapsulated layers of data, where each
//! layer performs a distinct purpose in relaying information from one peer to another. Each layer
//! is generalized here into a header and a payload, where the header contains data specific to
//! the operation of that layer and the payload is the next layer of data.
//!
//! Tightly related layers are each within their own modules: [`ip`] holds the IPv4 header and its
//! options, [`eapol`] the EAPOL-Key frame family, and [`tcp`], [`udp`] and [`icmp`] the transport
//! headers an IPv4 payload decodes into. The [`traits`] module contains the traits implemented
//! across all layers.

mod dev_traits;
pub mod eapol;
pub mod icmp;
pub mod ip;
pub mod rsn;
pub mod tcp;
pub mod traits;
pub mod udp;

use crate::error::*;
use crate::layers::traits::*;

/// A raw layer composed of unstructured bytes.
///
/// This type is used when inner layers cannot be inferred or interpreted from the header
/// enclosing them (such as an IPv4 payload with an unrecognized protocol number), or when payload
/// data is literally meant to be an opaque array of bytes. A [`Raw`] layer does not necessarily
/// indicate the presence of only one layer in its contained bytes; a tunneled packet decoded
/// through an unrecognized protocol number will simply be left as [`Raw`] bytes.
///
/// A [`Raw`] layer never carries a payload of its own.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Raw {
    data: Vec<u8>,
}

impl Raw {
    /// Creates a [`Raw`] layer holding `data`.
    #[inline]
    pub fn new(data: Vec<u8>) -> Self {
        Raw { data }
    }

    /// The bytes contained within the [`Raw`] layer.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// A mutable reference to the bytes contained within the [`Raw`] layer.
    #[inline]
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl LayerName for Raw {
    #[inline]
    fn name() -> &'static str {
        "Raw"
    }
}

impl LayerLength for Raw {
    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }
}

impl FromBytesCurrent for Raw {
    #[inline]
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        Ok((Raw::new(bytes.to_vec()), bytes.len()))
    }
}

impl FromBytes for Raw {
    #[inline]
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(Self::from_bytes_current_layer(bytes)?.0)
    }
}

impl LayerObject for Raw {
    #[inline]
    fn layer_name(&self) -> &'static str {
        Self::name()
    }

    #[inline]
    fn header_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn can_set_payload(&self, _payload: &dyn LayerObject) -> bool {
        false
    }

    #[inline]
    fn payload(&self) -> Option<&dyn LayerObject> {
        None
    }

    #[inline]
    fn payload_mut(&mut self) -> Option<&mut dyn LayerObject> {
        None
    }

    #[inline]
    fn set_payload_unchecked(&mut self, _payload: Box<dyn LayerObject>) {
        panic!("Raw layers cannot carry a payload");
    }

    #[inline]
    fn remove_payload(&mut self) -> Option<Box<dyn LayerObject>> {
        None
    }

    fn write_serialization(&self, bytes: &mut [u8], _parent: Option<&dyn LayerObject>) {
        assert!(
            bytes.len() >= self.data.len(),
            "insufficient buffer space to serialize Raw layer"
        );
        bytes[..self.data.len()].copy_from_slice(&self.data);
    }

    /// Raw bytes carry no discriminating fields, so any remaining bytes are accepted.
    #[inline]
    fn matches_response(&self, _bytes: &[u8]) -> bool {
        true
    }

    #[inline]
    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError> {
        Ok(Box::new(Raw::from_bytes(bytes)?))
    }

    #[inline]
    fn to_boxed_layer(&self) -> Box<dyn LayerObject> {
        Box::new(self.clone())
    }
}
