// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Traits that are only needed for developing new protocol unit types.
//!
//!

use core::any;

use crate::error::ValidationError;

/// Allows the name of a protocol layer to be retrieved as a string.
///
/// This is an object-unsafe variant of
/// [`LayerObject::layer_name()`](super::traits::LayerObject::layer_name).
pub trait LayerName {
    /// The name of the layer, usually (though not guaranteed to be) the same as the name of the
    /// struct.
    fn name() -> &'static str;
}

/// Decodes only the outermost layer from a byte buffer, leaving any payload bytes uninterpreted.
///
/// This is the building block used by both full-chain decoding ([`FromBytes`]) and template-driven
/// response decoding ([`LayerObject::clone_packet()`]), which differ only in how the bytes
/// following the header are turned into a nested unit.
///
/// [`FromBytes`]: super::traits::FromBytes
/// [`LayerObject::clone_packet()`]: super::traits::LayerObject::clone_packet
pub trait FromBytesCurrent: Sized {
    /// Decodes the current layer's header from `bytes`, returning the layer (with no payload) and
    /// the number of bytes its header occupied.
    fn from_bytes_current_layer(bytes: &[u8]) -> Result<(Self, usize), ValidationError>;
}

/// Enables downcasting a `dyn` protocol unit into its concrete type.
pub trait AsAny: any::Any {
    /// Returns a reference to self as an [`Any`](any::Any) type.
    fn as_any(&self) -> &dyn any::Any;

    /// Returns a mutable reference to self as an [`Any`](any::Any) type.
    fn as_any_mut(&mut self) -> &mut dyn any::Any;
}

impl<T: any::Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn any::Any {
        self
    }

    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn any::Any {
        self
    }
}
