// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Traits used to provide protocol unit functionality.
//!
//! [`LayerObject`] is the object-safe core shared by every unit; it is what nested payloads are
//! stored as. The remaining traits are convenience front doors built on top of it.

use core::fmt;

pub use super::dev_traits::*;
use crate::error::*;
use pdus_common::BufferMut;

// =============================================================================
//                       User-Facing Traits (for `LayerObject`)
// =============================================================================

/// A trait for retrieving the current length (in bytes) of a protocol layer and its payload.
pub trait LayerLength {
    /// The length (in bytes) of the layer.
    ///
    /// This length includes the length of any sublayers (i.e. the length is equal to the layer's
    /// header plus its entire payload). It may change whenever a variable-length field is modified
    /// or a payload is attached.
    fn len(&self) -> usize;
}

/// An object-safe protocol unit, suitable for operations involving generic layer payloads.
///
/// Each unit exclusively owns zero or one nested unit, so a packet is a simple chain ordered
/// from the outermost header inwards.
pub trait LayerObject: AsAny + LayerLength + fmt::Debug {
    /// The name of the layer, usually (though not guaranteed to be) the same as the name of the
    /// struct.
    fn layer_name(&self) -> &'static str;

    /// The length (in bytes) of this layer's own header and body, excluding any payload.
    fn header_len(&self) -> usize;

    /// The protocol number an enclosing IPv4 header should carry for this layer.
    ///
    /// `None` leaves whatever protocol number the enclosing header already holds.
    #[inline]
    fn ip_data_protocol(&self) -> Option<u8> {
        None
    }

    /// Determines whether `payload` can be used as a payload for the layer.
    fn can_set_payload(&self, payload: &dyn LayerObject) -> bool;

    /// Returns the current layer's payload, or `None` if the layer has no payload.
    fn payload(&self) -> Option<&dyn LayerObject>;

    /// Returns a mutable reference to the current layer's payload, or `None` if the layer has no
    /// payload.
    fn payload_mut(&mut self) -> Option<&mut dyn LayerObject>;

    /// Indicates whether the current layer has a payload.
    #[inline]
    fn has_payload(&self) -> bool {
        self.payload().is_some()
    }

    /// Sets the payload of the current layer, returning an error if the payload type is
    /// incompatible with the current layer.
    ///
    /// Any previous payload is dropped.
    fn set_payload(&mut self, payload: Box<dyn LayerObject>) -> Result<(), ValidationError> {
        if !self.can_set_payload(payload.as_ref()) {
            Err(ValidationError {
                layer: self.layer_name(),
                class: ValidationErrorClass::InvalidPayloadLayer,
                reason: "requested payload layer type incompatible with the current layer",
            })
        } else {
            self.set_payload_unchecked(payload);
            Ok(())
        }
    }

    /// Sets the payload of the current layer without checking the payload type's compatibility.
    fn set_payload_unchecked(&mut self, payload: Box<dyn LayerObject>);

    /// Removes the layer's payload, returning `None` if the layer has no stored payload.
    fn remove_payload(&mut self) -> Option<Box<dyn LayerObject>>;

    /// Writes the layer followed by its payload into `bytes`.
    ///
    /// `parent` is the layer directly enclosing this one, if any; layers whose checksums cover
    /// fields of their parent (such as a transport pseudo-header) read them from it. Checksums
    /// that are computed automatically are only written into `bytes`, never into `self`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than [`header_len()`](LayerObject::header_len). Callers are
    /// expected to size `bytes` to [`len()`](LayerLength::len).
    fn write_serialization(&self, bytes: &mut [u8], parent: Option<&dyn LayerObject>);

    /// Determines whether `bytes` holds a response to the packet represented by this layer and its
    /// payload.
    ///
    /// Each layer compares its own discriminating fields (addresses, ports, identifiers) and, if
    /// those match, defers to its payload with the bytes following its header.
    fn matches_response(&self, bytes: &[u8]) -> bool;

    /// Decodes `bytes` as a packet shaped like this one.
    ///
    /// Unlike [`FromBytes::from_bytes()`], this uses the existing chain as a template: the bytes
    /// after this layer's header are decoded as whatever type this layer's payload is, recursively.
    /// This is how a response is decoded once [`matches_response()`] accepts it.
    ///
    /// [`matches_response()`]: LayerObject::matches_response
    fn clone_packet(&self, bytes: &[u8]) -> Result<Box<dyn LayerObject>, ValidationError>;

    /// Deep-copies the layer and its payload chain into a new boxed layer.
    fn to_boxed_layer(&self) -> Box<dyn LayerObject>;
}

impl Clone for Box<dyn LayerObject> {
    #[inline]
    fn clone(&self) -> Self {
        (**self).to_boxed_layer()
    }
}

/// A trait for serializing a layer (and its payload) into its binary representation.
pub trait ToBytes {
    /// Serializes the given layer into bytes stored in a vector.
    ///
    /// The outermost layer is serialized without a parent, so its own checksum (if it only
    /// covers itself when enclosed) is written exactly as stored.
    fn to_bytes(&self) -> Vec<u8>;

    /// Appends the serialized layer to `buf`, returning an error if `buf` lacks the space.
    fn to_bytes_into(&self, buf: &mut BufferMut<'_>) -> Result<(), SerializationError>;
}

impl<T: LayerObject + ?Sized> ToBytes for T {
    #[inline]
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; self.len()];
        self.write_serialization(&mut bytes, None);
        bytes
    }

    fn to_bytes_into(&self, buf: &mut BufferMut<'_>) -> Result<(), SerializationError> {
        let required = self.len();
        let available = buf.remaining();
        let region = buf
            .append_zeroed(required)
            .ok_or(SerializationError {
                layer: self.layer_name(),
                required,
                available,
            })?;
        self.write_serialization(region, None);
        Ok(())
    }
}

/// A trait for creating a layer (and its payload chain) from a byte slice.
pub trait FromBytes: Sized {
    /// Decodes `bytes` into a layer, inferring the types of any payload layers from the
    /// protocol discriminators in each header.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError>;
}

/// Chain navigation and composition helpers available on every concrete layer.
pub trait Layer: LayerObject + Sized {
    /// Appends `other` as the payload of the innermost layer in the chain.
    fn append_layer<T: LayerObject>(&mut self, other: T) -> Result<(), ValidationError> {
        append_innermost(self, Box::new(other))
    }

    /// Returns the first layer of type `T` in the chain, starting from (and including) `self`.
    fn get_layer<T: LayerObject>(&self) -> Option<&T> {
        let mut curr: Option<&dyn LayerObject> = Some(self);
        while let Some(layer) = curr {
            if let Some(found) = layer.as_any().downcast_ref::<T>() {
                return Some(found);
            }
            curr = layer.payload();
        }
        None
    }

    /// Returns a mutable reference to the first layer of type `T` in the chain.
    #[inline]
    fn get_layer_mut<T: LayerObject>(&mut self) -> Option<&mut T> {
        find_layer_mut(self)
    }
}

impl<L: LayerObject> Layer for L {}

fn append_innermost(
    layer: &mut dyn LayerObject,
    other: Box<dyn LayerObject>,
) -> Result<(), ValidationError> {
    match layer.payload_mut() {
        Some(payload) => append_innermost(payload, other),
        None => layer.set_payload(other),
    }
}

fn find_layer_mut<T: LayerObject>(layer: &mut dyn LayerObject) -> Option<&mut T> {
    if AsAny::as_any(&*layer).is::<T>() {
        return layer.as_any_mut().downcast_mut::<T>();
    }
    find_layer_mut(layer.payload_mut()?)
}

/// Decodes the bytes following a header using `template` as the expected payload type, or as
/// [`Raw`](super::Raw) bytes if there is no template.
///
/// Returns `None` when `bytes` is empty.
pub(crate) fn clone_payload(
    template: Option<&dyn LayerObject>,
    bytes: &[u8],
) -> Result<Option<Box<dyn LayerObject>>, ValidationError> {
    if bytes.is_empty() {
        return Ok(None);
    }

    match template {
        Some(template) => template.clone_packet(bytes).map(Some),
        None => Ok(Some(Box::new(super::Raw::from_bytes(bytes)?))),
    }
}
