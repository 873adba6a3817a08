// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! A module that offers the driver-facing side of the framework: the operations a block
//! driver implements, and the handle the framework manages on its behalf.

mod devid;
pub(crate) mod drive;
mod handle;
mod host;
mod stats;

use std::convert::TryFrom;

use crate::block::Xfer;
use crate::{Error, Result};

pub use devid::DeviceId;
pub use drive::{validate_drive, validate_media, Drive, Media, DEV_BSIZE};
pub use handle::{Handle, HandleConfig};
pub use host::HostNode;
pub use stats::{ErrorCause, ErrorClass, ErrorStats, ErrorStatsSnapshot};

/// Ops version a driver declares when it implements everything below.
pub const OPS_VERSION_CURRENT: u32 = 2;

/// Versions of the driver operations the framework understands.
///
/// Version 1 added multiple hardware queues, version 2 free space requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpsVersion {
    V0 = 0,
    V1 = 1,
    V2 = 2,
}

impl TryFrom<u32> for OpsVersion {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(OpsVersion::V0),
            1 => Ok(OpsVersion::V1),
            2 => Ok(OpsVersion::V2),
            v => Err(Error::UnsupportedVersion(v)),
        }
    }
}

/// Information flags of an attached device.
///
/// These following consts are combined into the value returned by `Handle::info_flags`.
pub mod info_flags {
    pub const REMOVABLE: u32 = 1 << 0;
    pub const HOTPLUGGABLE: u32 = 1 << 1;
    pub const READ_ONLY: u32 = 1 << 2;
}

/// The operations a block driver provides.
///
/// The driver value itself is its private state; the framework owns it for the lifetime of
/// the handle and never looks inside. The transfer callbacks start an operation and return;
/// the driver completes the transfer with `Xfer::complete`, either before returning or later
/// from any thread. An error returned by a callback means the transfer was not started, and
/// the framework completes it with that error.
///
/// `drive_info` and `media_info` are called with the handle state locked, so they must not
/// call back into the handle.
pub trait BlkOps: Send + Sync {
    /// The ops version implemented by the driver.
    fn version(&self) -> u32 {
        OPS_VERSION_CURRENT
    }

    /// Describe the drive capabilities.
    fn drive_info(&self) -> Drive;

    /// Describe the media currently present, or fail if there is none.
    fn media_info(&self) -> Result<Media>;

    /// Produce the persistent identity of the device. By default it is derived from the
    /// drive GUID or EUI-64.
    fn devid_init(&self, node: &HostNode, drive: &Drive) -> Result<DeviceId> {
        let _ = node;
        DeviceId::from_drive(drive)
    }

    /// Flush the device write cache.
    fn sync_cache(&self, xfer: &Xfer) -> Result<()> {
        let _ = xfer;
        Err(Error::NotSupported)
    }

    fn read(&self, xfer: &Xfer) -> Result<()>;

    fn write(&self, xfer: &Xfer) -> Result<()>;

    /// Release the extents of `xfer.free()`. Only called for drivers declaring version 2.
    fn free_space(&self, xfer: &Xfer) -> Result<()> {
        let _ = xfer;
        Err(Error::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_version() {
        assert_eq!(OpsVersion::try_from(0).unwrap(), OpsVersion::V0);
        assert_eq!(
            OpsVersion::try_from(OPS_VERSION_CURRENT).unwrap(),
            OpsVersion::V2
        );
        assert!(matches!(
            OpsVersion::try_from(3),
            Err(Error::UnsupportedVersion(3))
        ));
        assert!(OpsVersion::V1 < OpsVersion::V2);
    }
}
