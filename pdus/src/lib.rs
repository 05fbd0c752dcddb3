// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A library for crafting, decoding and matching layered network protocol units.
//!
//! Every protocol unit implements [`LayerObject`](layers::traits::LayerObject) and owns at most
//! one nested unit. Units are serialized outer-to-inner into a single contiguous buffer, decoded
//! from bytes by dispatching on protocol discriminators, and can test whether a received buffer
//! is a reply to a previously crafted packet.

#![allow(clippy::len_without_is_empty)]

pub mod error;
pub mod layers;
pub mod prelude;
pub mod sender;
pub mod utils;

pub use pdus_common::BufferMut;
