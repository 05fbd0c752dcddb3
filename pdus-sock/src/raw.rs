// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::Ipv4Addr;
use std::time::Duration;
use std::{io, mem, ptr};

use pdus::sender::{PacketSender, SocketKind};

/// How long a receive blocks before reporting a timeout, unless configured otherwise.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Options applied to each socket a [`RawSocket`] opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSocketConfig {
    recv_timeout: Option<Duration>,
    recv_buffer_len: Option<usize>,
}

impl RawSocketConfig {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a receive waits for a datagram before timing out.
    ///
    /// `None` blocks indefinitely. Sub-microsecond durations are rounded up to one microsecond,
    /// since the kernel treats a zero timeout as "no timeout".
    #[inline]
    pub fn recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Requests a kernel receive buffer (`SO_RCVBUF`) of `len` bytes.
    #[inline]
    pub fn recv_buffer_len(mut self, len: usize) -> Self {
        self.recv_buffer_len = Some(len);
        self
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    #[inline]
    pub fn buffer_len(&self) -> Option<usize> {
        self.recv_buffer_len
    }
}

impl Default for RawSocketConfig {
    #[inline]
    fn default() -> Self {
        RawSocketConfig {
            recv_timeout: Some(DEFAULT_RECV_TIMEOUT),
            recv_buffer_len: None,
        }
    }
}

/// The distinct sockets a [`RawSocket`] may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SocketRole {
    /// `IPPROTO_RAW`: transmits any IPv4 datagram, but never receives.
    IpSend,
    /// A packet socket bound to `ETH_P_IP`, receiving whole IPv4 datagrams without their link
    /// header.
    IpRecv,
    /// `IPPROTO_ICMP`, used in both directions.
    Icmp,
}

impl SocketRole {
    #[inline]
    fn send(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Ip => SocketRole::IpSend,
            SocketKind::Icmp => SocketRole::Icmp,
        }
    }

    #[inline]
    fn recv(kind: SocketKind) -> Self {
        match kind {
            SocketKind::Ip => SocketRole::IpRecv,
            SocketKind::Icmp => SocketRole::Icmp,
        }
    }

    /// The `(domain, type, protocol)` triple passed to `socket()`.
    #[inline]
    fn params(self) -> (i32, i32, i32) {
        match self {
            SocketRole::IpSend => (libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW),
            SocketRole::IpRecv => (
                libc::AF_PACKET,
                libc::SOCK_DGRAM,
                (libc::ETH_P_IP as u16).to_be() as i32,
            ),
            SocketRole::Icmp => (libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_ICMP),
        }
    }
}

/// A single open socket.
struct SocketFd {
    fd: i32,
}

impl SocketFd {
    fn open(role: SocketRole, config: &RawSocketConfig) -> io::Result<SocketFd> {
        let (domain, ty, protocol) = role.params();
        let socket = match unsafe { libc::socket(domain, ty, protocol) } {
            ..=-1 => return Err(io::Error::last_os_error()),
            fd => SocketFd { fd },
        };

        // IPPROTO_RAW sockets always expect a caller-supplied IP header
        if role == SocketRole::Icmp {
            socket.set_option(libc::IPPROTO_IP, libc::IP_HDRINCL, &1i32)?;
        }

        if let Some(timeout) = config.recv_timeout {
            let timeout = timeout.max(Duration::from_micros(1));
            let timeval = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };
            socket.set_option(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeval)?;
        }

        if let Some(len) = config.recv_buffer_len {
            let len = i32::try_from(len).unwrap_or(i32::MAX);
            socket.set_option(libc::SOL_SOCKET, libc::SO_RCVBUF, &len)?;
        }

        log::debug!("opened {role:?} socket (fd {})", socket.fd);
        Ok(socket)
    }

    fn set_option<T>(&self, level: i32, name: i32, value: &T) -> io::Result<()> {
        // SAFETY: `value` points to `mem::size_of::<T>()` valid bytes for the duration of the call.
        if unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                ptr::addr_of!(*value) as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn send_to(&self, buf: &[u8], daddr: Ipv4Addr) -> io::Result<usize> {
        let sockaddr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from(daddr).to_be(),
            },
            sin_zero: [0u8; 8],
        };

        // SAFETY: `ptr::addr_of!(sockaddr)` will always yield a pointer to
        // `mem::size_of::<libc::sockaddr_in>()` valid bytes.
        match unsafe {
            libc::sendto(
                self.fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                ptr::addr_of!(sockaddr) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        } {
            ..=-1 => Err(io::Error::last_os_error()),
            sent => Ok(sent as usize),
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) } {
            ..=-1 => Err(io::Error::last_os_error()),
            recvd => Ok(recvd as usize),
        }
    }
}

impl Drop for SocketFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// A [`PacketSender`] backed by Linux raw IPv4 sockets.
///
/// Each socket is opened the first time it is needed and all of them are closed when the
/// `RawSocket` is dropped. ICMP packets are sent and received on a single `IPPROTO_ICMP` socket.
/// Other IPv4 packets are sent on an `IPPROTO_RAW` socket; since Linux never delivers datagrams
/// to such a socket, their responses are read from an `AF_PACKET` socket bound to IPv4 instead.
/// That socket sees every IPv4 datagram crossing the host (including outgoing ones), which
/// response matching filters out.
///
/// # Permissions
///
/// A program must have the `CAP_NET_RAW` capability in order to open raw sockets; otherwise,
/// sending or receiving will fail with `EPERM`.
pub struct RawSocket {
    config: RawSocketConfig,
    ip_send: Option<SocketFd>,
    ip_recv: Option<SocketFd>,
    icmp: Option<SocketFd>,
}

impl RawSocket {
    /// Creates a sender with the default configuration. No sockets are opened yet.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(RawSocketConfig::default())
    }

    #[inline]
    pub fn with_config(config: RawSocketConfig) -> Self {
        RawSocket {
            config,
            ip_send: None,
            ip_recv: None,
            icmp: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &RawSocketConfig {
        &self.config
    }

    /// Indicates whether any socket used for `kind` has been opened.
    #[inline]
    pub fn is_open(&self, kind: SocketKind) -> bool {
        match kind {
            SocketKind::Ip => self.ip_send.is_some() || self.ip_recv.is_some(),
            SocketKind::Icmp => self.icmp.is_some(),
        }
    }

    /// Closes every open socket. They are reopened on next use.
    pub fn close(&mut self) {
        self.ip_send = None;
        self.ip_recv = None;
        self.icmp = None;
    }

    fn socket(&mut self, role: SocketRole) -> io::Result<&SocketFd> {
        let slot = match role {
            SocketRole::IpSend => &mut self.ip_send,
            SocketRole::IpRecv => &mut self.ip_recv,
            SocketRole::Icmp => &mut self.icmp,
        };

        if slot.is_none() {
            *slot = Some(SocketFd::open(role, &self.config)?);
        }

        slot.as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "raw socket not open"))
    }
}

impl Default for RawSocket {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSender for RawSocket {
    fn send_l3(&mut self, packet: &[u8], daddr: Ipv4Addr, kind: SocketKind) -> io::Result<()> {
        let sent = self.socket(SocketRole::send(kind))?.send_to(packet, daddr)?;
        if sent != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("only {sent} of {} packet bytes were sent", packet.len()),
            ));
        }

        log::trace!("sent {sent} bytes to {daddr} over {kind:?} socket");
        Ok(())
    }

    fn recv_l3(&mut self, buf: &mut [u8], kind: SocketKind) -> io::Result<usize> {
        match self.socket(SocketRole::recv(kind))?.recv(buf) {
            Ok(recvd) => {
                log::trace!("received {recvd} bytes on {kind:?} socket");
                Ok(recvd)
            }
            Err(e) => {
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                    log::debug!("receive on {kind:?} socket timed out");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = RawSocketConfig::new();
        assert_eq!(config.timeout(), Some(DEFAULT_RECV_TIMEOUT));
        assert_eq!(config.buffer_len(), None);

        let config = config.recv_timeout(None).recv_buffer_len(1 << 20);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.buffer_len(), Some(1 << 20));
    }

    #[test]
    fn ip_responses_read_from_packet_socket() {
        assert_eq!(SocketRole::send(SocketKind::Ip), SocketRole::IpSend);
        assert_eq!(SocketRole::recv(SocketKind::Ip), SocketRole::IpRecv);
        assert_eq!(
            SocketRole::IpSend.params(),
            (libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW)
        );

        let (domain, ty, protocol) = SocketRole::IpRecv.params();
        assert_eq!((domain, ty), (libc::AF_PACKET, libc::SOCK_DGRAM));
        assert_eq!(u16::from_be(protocol as u16), libc::ETH_P_IP as u16);
    }

    #[test]
    fn icmp_uses_one_socket_both_ways() {
        assert_eq!(SocketRole::send(SocketKind::Icmp), SocketRole::Icmp);
        assert_eq!(SocketRole::recv(SocketKind::Icmp), SocketRole::Icmp);
        assert_eq!(
            SocketRole::Icmp.params(),
            (libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_ICMP)
        );
    }

    #[test]
    fn sockets_open_lazily() {
        let socket = RawSocket::with_config(RawSocketConfig::new().recv_timeout(None));
        assert!(!socket.is_open(SocketKind::Ip));
        assert!(!socket.is_open(SocketKind::Icmp));
        assert_eq!(socket.config().timeout(), None);
    }
}
