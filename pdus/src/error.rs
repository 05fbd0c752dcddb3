// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned when decoding or serializing protocol units.

use thiserror::Error;

/// An error encountered while decoding a protocol unit from bytes or attaching a payload to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("{layer}: {reason} ({class:?})")]
pub struct ValidationError {
    /// The name of the layer that failed validation.
    pub layer: &'static str,
    pub class: ValidationErrorClass,
    pub reason: &'static str,
}

impl ValidationError {
    /// Indicates that the buffer ended before a structurally required field.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.class == ValidationErrorClass::InsufficientBytes
    }

    /// Indicates that a length, offset or discriminant field held a value inconsistent with the
    /// rest of the buffer.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self.class,
            ValidationErrorClass::InvalidSize | ValidationErrorClass::InvalidValue
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValidationErrorClass {
    /// A payload layer was incompatible with the layer it was attached to.
    InvalidPayloadLayer,
    /// The buffer needs more bytes to be well-formed.
    InsufficientBytes,
    /// A size field conflicts with the actual composition of the buffer, or two size fields
    /// conflict.
    InvalidSize,
    /// A field held an unrecognized or disallowed value.
    InvalidValue,
}

/// An error returned when a caller-provided buffer cannot hold a serialized packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("{layer}: insufficient buffer space ({required} bytes required, {available} available)")]
pub struct SerializationError {
    pub layer: &'static str,
    pub required: usize,
    pub available: usize,
}
