// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::device::Drive;
use crate::{Error, Result};

const DEVID_MAGIC: u16 = 0x6964;
const DEVID_REV: u8 = 1;

/// Persistent identity of a device, independent of the address it is attached at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceId {
    /// Derived from the drive GUID.
    Guid([u8; 16]),
    /// Derived from the drive EUI-64.
    Eui64(u64),
    /// Opaque identifier produced by the driver.
    Driver(Vec<u8>),
}

impl DeviceId {
    /// Builds an identifier from the unique identifiers of a drive, preferring the GUID.
    pub fn from_drive(drive: &Drive) -> Result<DeviceId> {
        if drive.guid.iter().any(|&b| b != 0) {
            return Ok(DeviceId::Guid(drive.guid));
        }
        match BigEndian::read_u64(&drive.eui64) {
            0 => Err(Error::NotSupported),
            eui => Ok(DeviceId::Eui64(eui)),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            DeviceId::Guid(_) => 1,
            DeviceId::Eui64(_) => 2,
            DeviceId::Driver(_) => 3,
        }
    }

    /// Encodes the identifier as `magic:u16 rev:u8 kind:u8 len:u16 payload`, big endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut eui = [0u8; 8];
        let payload: &[u8] = match self {
            DeviceId::Guid(guid) => guid,
            DeviceId::Eui64(v) => {
                BigEndian::write_u64(&mut eui, *v);
                &eui
            }
            DeviceId::Driver(id) => id,
        };

        let mut buf = vec![0u8; 6];
        BigEndian::write_u16(&mut buf[0..2], DEVID_MAGIC);
        buf[2] = DEVID_REV;
        buf[3] = self.kind();
        BigEndian::write_u16(&mut buf[4..6], payload.len() as u16);
        buf.extend_from_slice(payload);
        buf
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceId::Guid(guid) => {
                write!(f, "id1,guid@")?;
                for b in guid.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            DeviceId::Eui64(eui) => write!(f, "id1,eui@{:016x}", eui),
            DeviceId::Driver(id) => {
                write!(f, "id1,drv@")?;
                for b in id.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_drive() {
        let mut drive = Drive::default();
        assert!(matches!(
            DeviceId::from_drive(&drive),
            Err(Error::NotSupported)
        ));

        drive.eui64 = [0, 0, 0, 0, 0, 0, 0x12, 0x34];
        let id = DeviceId::from_drive(&drive).unwrap();
        assert_eq!(id, DeviceId::Eui64(0x1234));
        assert_eq!(id.to_string(), "id1,eui@0000000000001234");

        drive.guid[15] = 0xff;
        assert!(matches!(
            DeviceId::from_drive(&drive),
            Ok(DeviceId::Guid(_))
        ));
    }

    #[test]
    fn test_encode() {
        let id = DeviceId::Eui64(0x0102_0304_0506_0708);
        let buf = id.encode();
        assert_eq!(BigEndian::read_u16(&buf[0..2]), DEVID_MAGIC);
        assert_eq!(buf[2], DEVID_REV);
        assert_eq!(buf[3], 2);
        assert_eq!(BigEndian::read_u16(&buf[4..6]), 8);
        assert_eq!(&buf[6..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
