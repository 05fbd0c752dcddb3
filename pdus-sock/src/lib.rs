// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Raw-socket transmission of network-layer packets on Linux.
//!
//! [`RawSocket`] implements [`PacketSender`], so any packet built with `pdus` can be sent
//! through it and matched against the datagrams the kernel hands back:
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//!
//! use pdus::layers::icmp::Icmp;
//! use pdus::layers::ip::Ipv4;
//! use pdus::prelude::*;
//! use pdus_sock::RawSocket;
//!
//! let mut ping = Ipv4::new(Ipv4Addr::new(192, 0, 2, 1), Ipv4Addr::new(192, 0, 2, 100));
//! ping.set_payload(Box::new(Icmp::echo_request(1, 1))).unwrap();
//!
//! let mut socket = RawSocket::new();
//! let reply = ping.send_recv(&mut socket).unwrap();
//! ```

#![cfg(target_os = "linux")]

mod raw;

pub use raw::{RawSocket, RawSocketConfig, DEFAULT_RECV_TIMEOUT};
