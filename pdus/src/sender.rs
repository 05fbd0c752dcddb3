// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The boundary between packet construction and packet transmission.
//!
//! Layers never touch sockets directly. Instead, a [`PacketSender`] accepts fully serialized
//! network-layer packets and hands back received datagrams, and layers such as
//! [`Ipv4`](crate::layers::ip::Ipv4) use it to send themselves and to pick their responses out of
//! whatever traffic arrives.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::error::ValidationError;
use crate::layers::traits::LayerObject;

/// The largest datagram a response is received into.
pub const MAX_DATAGRAM_LEN: usize = 65535;

/// The kind of socket a network-layer packet is transmitted and received through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// A generic network-layer socket.
    Ip,
    /// A socket dedicated to ICMP messages.
    Icmp,
}

/// Transmits serialized network-layer packets and receives datagrams in return.
pub trait PacketSender {
    /// Sends `packet`, a complete serialized IPv4 datagram, towards `daddr`.
    fn send_l3(&mut self, packet: &[u8], daddr: Ipv4Addr, kind: SocketKind) -> io::Result<()>;

    /// Blocks until a datagram arrives on the socket of the given kind, copying it into `buf` and
    /// returning its length.
    ///
    /// Implementations that time out should return an error of kind
    /// [`WouldBlock`](io::ErrorKind::WouldBlock) or [`TimedOut`](io::ErrorKind::TimedOut).
    fn recv_l3(&mut self, buf: &mut [u8], kind: SocketKind) -> io::Result<usize>;
}

impl<S: PacketSender + ?Sized> PacketSender for &mut S {
    #[inline]
    fn send_l3(&mut self, packet: &[u8], daddr: Ipv4Addr, kind: SocketKind) -> io::Result<()> {
        (**self).send_l3(packet, daddr, kind)
    }

    #[inline]
    fn recv_l3(&mut self, buf: &mut [u8], kind: SocketKind) -> io::Result<usize> {
        (**self).recv_l3(buf, kind)
    }
}

/// An error encountered while sending a packet or decoding its response.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("packet transmission failed: {0}")]
    Io(#[from] io::Error),
    #[error("matching response could not be decoded: {0}")]
    Decode(#[from] ValidationError),
}

/// Receives datagrams until one matches `packet`, then decodes it in `packet`'s shape.
///
/// Returns `Ok(None)` once `sender` reports a timeout.
pub fn recv_matching<S: PacketSender + ?Sized>(
    packet: &dyn LayerObject,
    kind: SocketKind,
    sender: &mut S,
) -> Result<Option<Box<dyn LayerObject>>, SendError> {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        let received = match sender.recv_l3(&mut buf, kind) {
            Ok(0) => return Ok(None),
            Ok(received) => received.min(buf.len()),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                log::debug!("timed out waiting for {} response", packet.layer_name());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let datagram = &buf[..received];
        if packet.matches_response(datagram) {
            return Ok(Some(packet.clone_packet(datagram)?));
        }

        log::trace!(
            "discarding {received}-byte datagram not matching {}",
            packet.layer_name()
        );
    }
}
