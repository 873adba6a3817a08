// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Drive capabilities, media geometry, and their validation.

use crate::{Error, Result};

/// The smallest logical block size a media may report.
pub const DEV_BSIZE: u32 = 512;

/// Static capabilities of a drive, as reported by the driver.
///
/// The members are public, in the same way the driver fills them in a single pass when
/// asked for them. Identification strings are informational and may be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Drive {
    /// Maximum number of outstanding transfers.
    pub qsize: u32,
    /// Maximum size of a single transfer, in bytes.
    pub maxxfer: u32,
    /// Whether the media can be removed.
    pub removable: bool,
    /// Whether the drive can be hot plugged.
    pub hotpluggable: bool,
    /// Target part of the drive address.
    pub target: u32,
    /// Logical unit part of the drive address.
    pub lun: u32,
    pub vendor: String,
    pub product: String,
    pub model: String,
    pub serial: String,
    pub revision: String,
    /// IEEE EUI-64 identifier, all zeroes when unknown.
    pub eui64: [u8; 8],
    /// GUID, all zeroes when unknown.
    pub guid: [u8; 16],
    /// Number of hardware queues transfers can be spread over. Zero is treated as one.
    pub qcount: u32,
    /// Required starting alignment of free space extents, in logical blocks. Must be >= 1.
    pub free_align: u64,
    /// Maximum number of extents in a free space request. 0 means no limit.
    pub max_free_seg: u64,
    /// Maximum number of blocks in a free space request. 0 means no limit.
    pub max_free_blks: u64,
    /// Maximum number of blocks in a single free space extent. 0 means no limit. When
    /// nonzero it can't exceed `max_free_blks`, which then also has to be nonzero.
    pub max_free_seg_blks: u64,
}

impl Drive {
    /// Returns the number of usable queues.
    pub fn queue_count(&self) -> u32 {
        self.qcount.max(1)
    }

    /// Checks the ordering between the per-extent and the total free space caps.
    pub fn free_caps_valid(&self) -> bool {
        if self.max_free_seg_blks == 0 {
            return true;
        }
        self.max_free_blks != 0 && self.max_free_seg_blks <= self.max_free_blks
    }

    /// Returns the textual address of the drive.
    ///
    /// Drives with an EUI-64 are addressed through it, the others through their target.
    pub fn address(&self) -> String {
        if self.eui64.iter().any(|&b| b != 0) {
            let mut s = String::from("w");
            for b in self.eui64.iter() {
                s.push_str(&format!("{:02X}", b));
            }
            format!("{},{:X}", s, self.lun)
        } else {
            format!("{:X},{:X}", self.target, self.lun)
        }
    }
}

/// Geometry of the media currently present in a drive.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Media {
    /// Number of logical blocks.
    pub nblks: u64,
    /// Logical block size in bytes.
    pub blksize: u32,
    pub readonly: bool,
    pub solidstate: bool,
    /// Physical block size in bytes, or 0 when the same as (or unknown beyond) `blksize`.
    pub pblksize: u32,
}

impl Media {
    /// Size of the media in bytes.
    pub fn capacity(&self) -> u64 {
        self.nblks.saturating_mul(u64::from(self.blksize))
    }
}

/// Validates the capabilities of a drive.
pub fn validate_drive(drive: &Drive) -> Result<()> {
    if drive.qsize == 0 {
        return Err(Error::InvalidCapabilities("queue depth must be nonzero"));
    }
    if drive.maxxfer == 0 {
        return Err(Error::InvalidCapabilities("maximum transfer size must be nonzero"));
    }
    if drive.free_align == 0 {
        return Err(Error::InvalidCapabilities("free space alignment must be nonzero"));
    }
    if !drive.free_caps_valid() {
        return Err(Error::InvalidCapabilities(
            "free space segment cap exceeds the total cap",
        ));
    }
    Ok(())
}

/// Validates a media geometry against the drive it was reported for.
pub fn validate_media(drive: &Drive, media: &Media) -> Result<()> {
    if !media.blksize.is_power_of_two() || media.blksize < DEV_BSIZE {
        return Err(Error::InvalidGeometry(
            "block size must be a power of two of at least 512",
        ));
    }
    if drive.maxxfer % media.blksize != 0 {
        return Err(Error::InvalidGeometry(
            "block size must divide the maximum transfer size",
        ));
    }
    if media.pblksize != 0 && (!media.pblksize.is_power_of_two() || media.pblksize < media.blksize)
    {
        return Err(Error::InvalidGeometry(
            "physical block size must be a power of two not less than the block size",
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn drive() -> Drive {
        Drive {
            qsize: 4,
            maxxfer: 65536,
            target: 0,
            lun: 0,
            vendor: "ACME".to_string(),
            product: "RAMDISK".to_string(),
            model: "ACME RAMDISK".to_string(),
            serial: "0001".to_string(),
            revision: "1.0".to_string(),
            qcount: 1,
            free_align: 1,
            ..Default::default()
        }
    }

    pub(crate) fn media() -> Media {
        Media {
            nblks: 1024,
            blksize: 512,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_drive() {
        let mut d = drive();
        assert!(validate_drive(&d).is_ok());

        d.max_free_blks = 50;
        d.max_free_seg_blks = 50;
        assert!(validate_drive(&d).is_ok());

        d.max_free_seg_blks = 100;
        assert!(matches!(
            validate_drive(&d),
            Err(Error::InvalidCapabilities(_))
        ));

        d.max_free_blks = 0;
        d.max_free_seg_blks = 10;
        assert!(matches!(
            validate_drive(&d),
            Err(Error::InvalidCapabilities(_))
        ));

        let mut d = drive();
        d.qsize = 0;
        assert!(validate_drive(&d).is_err());

        let mut d = drive();
        d.free_align = 0;
        assert!(validate_drive(&d).is_err());
    }

    #[test]
    fn test_validate_media() {
        let d = drive();
        let mut m = media();
        assert!(validate_media(&d, &m).is_ok());

        for &bs in [256u32, 768, 1000].iter() {
            m.blksize = bs;
            assert!(matches!(
                validate_media(&d, &m),
                Err(Error::InvalidGeometry(_))
            ));
        }

        // Power of two, but does not divide `maxxfer`.
        m.blksize = 131_072;
        assert!(validate_media(&d, &m).is_err());

        m.blksize = 4096;
        assert!(validate_media(&d, &m).is_ok());

        m.pblksize = 512;
        assert!(validate_media(&d, &m).is_err());
        m.pblksize = 6144;
        assert!(validate_media(&d, &m).is_err());
        m.pblksize = 8192;
        assert!(validate_media(&d, &m).is_ok());

        // Zero blocks is still valid media.
        m.nblks = 0;
        assert!(validate_media(&d, &m).is_ok());
    }

    #[test]
    fn test_address() {
        let mut d = drive();
        d.target = 0x1f;
        d.lun = 2;
        assert_eq!(d.address(), "1F,2");

        d.eui64 = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        assert_eq!(d.address(), "w0011223344556677,2");
    }

    #[test]
    fn test_queue_count() {
        let mut d = drive();
        d.qcount = 0;
        assert_eq!(d.queue_count(), 1);
        d.qcount = 8;
        assert_eq!(d.queue_count(), 8);
    }
}
