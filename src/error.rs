// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::result;

use thiserror::Error;
use vm_memory::GuestMemoryError;

use crate::device::ErrorClass;

/// Result alias used throughout the crate.
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the block device framework and by drivers completing transfers.
#[derive(Debug, Error)]
pub enum Error {
    /// The driver declared an ops version the framework does not know.
    #[error("unsupported ops version {0}")]
    UnsupportedVersion(u32),
    /// The drive capabilities reported by the driver are unusable.
    #[error("invalid drive capabilities: {0}")]
    InvalidCapabilities(&'static str),
    /// The media geometry reported by the driver is unusable.
    #[error("invalid media geometry: {0}")]
    InvalidGeometry(&'static str),
    /// No usable media is present.
    #[error("no media")]
    NoMedia,
    /// The request falls outside the media, is misaligned, or targets a missing queue.
    #[error("request out of range")]
    OutOfRange,
    /// The free space request violates the drive's constraints.
    #[error("invalid free space request: {0}")]
    InvalidDiscardRequest(&'static str),
    /// Transfers are still outstanding.
    #[error("device busy")]
    Busy,
    /// The dispatch queue is at its fixed depth.
    #[error("dispatch queue full")]
    WouldBlock,
    /// Write attempted against read-only media.
    #[error("media is read-only")]
    ReadOnly,
    /// The driver does not implement the operation.
    #[error("operation not supported")]
    NotSupported,
    /// The handle is not attached.
    #[error("handle not attached")]
    NotAttached,
    /// The handle is already attached.
    #[error("handle already attached")]
    AlreadyAttached,
    /// Another handle is already attached at this address.
    #[error("address {0} already in use")]
    AddressInUse(String),
    /// The transfer was completed before.
    #[error("transfer already completed")]
    AlreadyCompleted,
    /// The buffer cannot be described within the DMA attributes of the device.
    #[error("cannot bind dma buffer: {0}")]
    DmaBind(&'static str),
    /// The buffer is not backed by guest memory.
    #[error("guest memory error: {0}")]
    GuestMemory(GuestMemoryError),
    /// The driver failed the transfer, but the failure is recoverable by retrying.
    #[error("recovered error (errno {0})")]
    Recovered(i32),
    /// The driver failed the transfer.
    #[error("i/o error (errno {0})")]
    Io(i32),
    /// The link to the device failed.
    #[error("transport error (errno {0})")]
    Transport(i32),
}

impl Error {
    /// Returns the errno value equivalent to this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::UnsupportedVersion(_) => libc::ENOTSUP,
            Error::InvalidCapabilities(_) | Error::InvalidGeometry(_) => libc::EINVAL,
            Error::NoMedia => libc::ENXIO,
            Error::OutOfRange => libc::EINVAL,
            Error::InvalidDiscardRequest(_) => libc::EINVAL,
            Error::Busy => libc::EBUSY,
            Error::WouldBlock => libc::EAGAIN,
            Error::ReadOnly => libc::EROFS,
            Error::NotSupported => libc::ENOTSUP,
            Error::NotAttached => libc::ENXIO,
            Error::AlreadyAttached => libc::EBUSY,
            Error::AddressInUse(_) => libc::EEXIST,
            Error::AlreadyCompleted => libc::EALREADY,
            Error::DmaBind(_) => libc::EFAULT,
            Error::GuestMemory(_) => libc::EFAULT,
            Error::Recovered(e) | Error::Io(e) | Error::Transport(e) => *e,
        }
    }

    /// Statistics class of a transfer failing with this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Recovered(_) => ErrorClass::Soft,
            Error::Transport(_) => ErrorClass::Transport,
            _ => ErrorClass::Hard,
        }
    }
}
