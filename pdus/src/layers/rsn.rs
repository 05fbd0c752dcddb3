// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Robust Security Network information element carried in EAPOL-Key frames.

use crate::error::*;

/// The element ID of an RSN information element.
pub const RSN_INFORMATION_TAG: u8 = 48;

const SUITE_OUI: u32 = 0x000f_ac00;

/// A cipher suite selector (OUI followed by a suite type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u32);

impl CipherSuite {
    pub const WEP_40: Self = Self(SUITE_OUI | 1);
    pub const TKIP: Self = Self(SUITE_OUI | 2);
    pub const CCMP: Self = Self(SUITE_OUI | 4);
    pub const WEP_104: Self = Self(SUITE_OUI | 5);
}

/// An authentication and key management suite selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AkmSuite(pub u32);

impl AkmSuite {
    /// IEEE 802.1X authentication.
    pub const PMKSA: Self = Self(SUITE_OUI | 1);
    /// Pre-shared key authentication.
    pub const PSK: Self = Self(SUITE_OUI | 2);
}

/// The body of an RSN information element: the security capabilities a station advertises.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsnInformation {
    version: u16,
    group_suite: CipherSuite,
    pairwise_suites: Vec<CipherSuite>,
    akm_suites: Vec<AkmSuite>,
    capabilities: u16,
}

impl RsnInformation {
    /// Creates an element with no pairwise or AKM suites.
    pub fn new(group_suite: CipherSuite) -> Self {
        RsnInformation {
            version: 1,
            group_suite,
            pairwise_suites: Vec::new(),
            akm_suites: Vec::new(),
            capabilities: 0,
        }
    }

    /// The element advertised by a WPA2-PSK network using CCMP throughout.
    pub fn wpa2_psk() -> Self {
        let mut info = RsnInformation::new(CipherSuite::CCMP);
        info.add_pairwise_suite(CipherSuite::CCMP);
        info.add_akm_suite(AkmSuite::PSK);
        info
    }

    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    #[inline]
    pub fn group_suite(&self) -> CipherSuite {
        self.group_suite
    }

    #[inline]
    pub fn set_group_suite(&mut self, suite: CipherSuite) {
        self.group_suite = suite;
    }

    #[inline]
    pub fn pairwise_suites(&self) -> &[CipherSuite] {
        &self.pairwise_suites
    }

    #[inline]
    pub fn add_pairwise_suite(&mut self, suite: CipherSuite) {
        self.pairwise_suites.push(suite);
    }

    #[inline]
    pub fn akm_suites(&self) -> &[AkmSuite] {
        &self.akm_suites
    }

    #[inline]
    pub fn add_akm_suite(&mut self, suite: AkmSuite) {
        self.akm_suites.push(suite);
    }

    #[inline]
    pub fn capabilities(&self) -> u16 {
        self.capabilities
    }

    #[inline]
    pub fn set_capabilities(&mut self, capabilities: u16) {
        self.capabilities = capabilities;
    }

    /// Serializes the element body (without its tag and length bytes).
    ///
    /// Counts, version and capabilities are little-endian; suite selectors are written OUI first.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            2 + 4 + 2 + 4 * self.pairwise_suites.len() + 2 + 4 * self.akm_suites.len() + 2,
        );
        bytes.extend(self.version.to_le_bytes());
        bytes.extend(self.group_suite.0.to_be_bytes());
        bytes.extend((self.pairwise_suites.len() as u16).to_le_bytes());
        for suite in &self.pairwise_suites {
            bytes.extend(suite.0.to_be_bytes());
        }
        bytes.extend((self.akm_suites.len() as u16).to_le_bytes());
        for suite in &self.akm_suites {
            bytes.extend(suite.0.to_be_bytes());
        }
        bytes.extend(self.capabilities.to_le_bytes());
        bytes
    }

    /// Decodes an element body (without its tag and length bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        let mut reader = SuiteReader { bytes };
        let version = reader.read_u16_le()?;
        let group_suite = CipherSuite(reader.read_suite()?);

        let pairwise_count = reader.read_u16_le()?;
        let pairwise_suites = (0..pairwise_count)
            .map(|_| reader.read_suite().map(CipherSuite))
            .collect::<Result<Vec<_>, _>>()?;

        let akm_count = reader.read_u16_le()?;
        let akm_suites = (0..akm_count)
            .map(|_| reader.read_suite().map(AkmSuite))
            .collect::<Result<Vec<_>, _>>()?;

        let capabilities = reader.read_u16_le()?;

        Ok(RsnInformation {
            version,
            group_suite,
            pairwise_suites,
            akm_suites,
            capabilities,
        })
    }
}

struct SuiteReader<'a> {
    bytes: &'a [u8],
}

impl SuiteReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], ValidationError> {
        let Some((field, rest)) = self.bytes.split_first_chunk::<N>() else {
            return Err(ValidationError {
                layer: "RsnInformation",
                class: ValidationErrorClass::InsufficientBytes,
                reason: "insufficient bytes available to decode RSN information element",
            });
        };
        self.bytes = rest;
        Ok(*field)
    }

    #[inline]
    fn read_u16_le(&mut self) -> Result<u16, ValidationError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    #[inline]
    fn read_suite(&mut self) -> Result<u32, ValidationError> {
        Ok(u32::from_be_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wpa2_psk_layout() {
        let bytes = RsnInformation::wpa2_psk().serialize();
        assert_eq!(
            bytes,
            vec![
                0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00,
                0x00, 0x0f, 0xac, 0x02, 0x00, 0x00,
            ]
        );
        assert_eq!(RsnInformation::from_bytes(&bytes).unwrap(), RsnInformation::wpa2_psk());
    }

    #[test]
    fn suite_count_past_end() {
        let mut bytes = RsnInformation::wpa2_psk().serialize();
        bytes[6] = 3;
        assert!(RsnInformation::from_bytes(&bytes).unwrap_err().is_truncated());
    }
}
