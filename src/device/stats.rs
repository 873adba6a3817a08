// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Per-device error statistics.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::device::Drive;
use crate::Error;

/// Driver-reported cause of a transfer failure.
///
/// The discriminants are the raw cause codes drivers use when they report errors by number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCause {
    Media = 0,
    NotReady = 1,
    NoDevice = 2,
    Recoverable = 3,
    IllegalRequest = 4,
    /// Predictive failure analysis: the device expects to fail soon.
    PredictiveFailure = 5,
}

const NUM_CAUSES: usize = 6;

impl TryFrom<u32> for ErrorCause {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            0 => Ok(ErrorCause::Media),
            1 => Ok(ErrorCause::NotReady),
            2 => Ok(ErrorCause::NoDevice),
            3 => Ok(ErrorCause::Recoverable),
            4 => Ok(ErrorCause::IllegalRequest),
            5 => Ok(ErrorCause::PredictiveFailure),
            v => Err(v),
        }
    }
}

/// How a failed transfer is accounted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recovered transparently.
    Soft,
    /// The operation failed.
    Hard,
    /// The link to the device failed.
    Transport,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Ident {
    model: String,
    vendor: String,
    product: String,
    revision: String,
    serial: String,
    capacity: u64,
}

/// Error counters and descriptive fields of one device.
///
/// Counters are only ever incremented; they are updated from the completion path, which can
/// run concurrently with submissions, hence the atomics.
#[derive(Debug, Default)]
pub struct ErrorStats {
    soft: AtomicU64,
    hard: AtomicU64,
    transport: AtomicU64,
    causes: [AtomicU64; NUM_CAUSES],
    ident: Mutex<Ident>,
}

/// A point in time copy of an `ErrorStats` block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorStatsSnapshot {
    pub soft_errors: u64,
    pub hard_errors: u64,
    pub transport_errors: u64,
    pub media_errors: u64,
    pub not_ready_errors: u64,
    pub no_device_errors: u64,
    pub recoverable_errors: u64,
    pub illegal_request_errors: u64,
    pub predictive_failure_errors: u64,
    pub model: String,
    pub vendor: String,
    pub product: String,
    pub revision: String,
    pub serial: String,
    /// Capacity of the media in bytes, 0 without media.
    pub capacity: u64,
}

impl ErrorStats {
    /// Accounts for one failed transfer, with the cause reported for it, if any.
    pub(crate) fn record_failure(&self, err: &Error, cause: Option<ErrorCause>) {
        let counter = match err.class() {
            ErrorClass::Soft => &self.soft,
            ErrorClass::Hard => &self.hard,
            ErrorClass::Transport => &self.transport,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(cause) = cause {
            self.causes[cause as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_ident(&self, drive: &Drive) {
        let mut ident = self.ident.lock().unwrap();
        ident.model = if drive.model.is_empty() {
            format!("{} {}", drive.vendor, drive.product)
                .trim()
                .to_string()
        } else {
            drive.model.clone()
        };
        ident.vendor = drive.vendor.clone();
        ident.product = drive.product.clone();
        ident.revision = drive.revision.clone();
        ident.serial = drive.serial.clone();
    }

    pub(crate) fn set_capacity(&self, capacity: u64) {
        self.ident.lock().unwrap().capacity = capacity;
    }

    /// Number of transfers failed with the given class.
    pub fn count(&self, class: ErrorClass) -> u64 {
        match class {
            ErrorClass::Soft => self.soft.load(Ordering::Relaxed),
            ErrorClass::Hard => self.hard.load(Ordering::Relaxed),
            ErrorClass::Transport => self.transport.load(Ordering::Relaxed),
        }
    }

    /// Number of failed transfers attributed to the given cause.
    pub fn cause_count(&self, cause: ErrorCause) -> u64 {
        self.causes[cause as usize].load(Ordering::Relaxed)
    }

    /// Copies the current state of the statistics.
    pub fn snapshot(&self) -> ErrorStatsSnapshot {
        let ident = self.ident.lock().unwrap().clone();
        ErrorStatsSnapshot {
            soft_errors: self.count(ErrorClass::Soft),
            hard_errors: self.count(ErrorClass::Hard),
            transport_errors: self.count(ErrorClass::Transport),
            media_errors: self.cause_count(ErrorCause::Media),
            not_ready_errors: self.cause_count(ErrorCause::NotReady),
            no_device_errors: self.cause_count(ErrorCause::NoDevice),
            recoverable_errors: self.cause_count(ErrorCause::Recoverable),
            illegal_request_errors: self.cause_count(ErrorCause::IllegalRequest),
            predictive_failure_errors: self.cause_count(ErrorCause::PredictiveFailure),
            model: ident.model,
            vendor: ident.vendor,
            product: ident.product,
            revision: ident.revision,
            serial: ident.serial,
            capacity: ident.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_codes() {
        assert_eq!(ErrorCause::try_from(0), Ok(ErrorCause::Media));
        assert_eq!(ErrorCause::try_from(5), Ok(ErrorCause::PredictiveFailure));
        assert_eq!(ErrorCause::try_from(6), Err(6));
    }

    #[test]
    fn test_record_failure() {
        let stats = ErrorStats::default();

        stats.record_failure(&Error::Io(libc::EIO), Some(ErrorCause::Media));
        stats.record_failure(&Error::Transport(libc::EIO), None);
        stats.record_failure(&Error::Recovered(libc::EIO), Some(ErrorCause::Recoverable));

        let s = stats.snapshot();
        assert_eq!(s.hard_errors, 1);
        assert_eq!(s.transport_errors, 1);
        assert_eq!(s.soft_errors, 1);
        assert_eq!(s.media_errors, 1);
        assert_eq!(s.recoverable_errors, 1);
        assert_eq!(s.not_ready_errors, 0);
    }

    #[test]
    fn test_ident() {
        let stats = ErrorStats::default();
        let mut drive = crate::device::drive::tests::drive();
        drive.model.clear();
        stats.set_ident(&drive);
        stats.set_capacity(512 * 1024);

        let s = stats.snapshot();
        assert_eq!(s.model, "ACME RAMDISK");
        assert_eq!(s.vendor, "ACME");
        assert_eq!(s.serial, "0001");
        assert_eq!(s.capacity, 512 * 1024);
    }
}
