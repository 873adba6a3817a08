// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Free space (discard) extent lists.

use crate::device::{Drive, Media};
use crate::{Error, Result};

/// A run of logical blocks to release, relative to the offset of its list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeExtent {
    pub start: u64,
    pub length: u64,
}

/// The extents released by one free space request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeList {
    /// Block offset added to the start of every extent.
    pub offset: u64,
    pub extents: Vec<FreeExtent>,
}

impl FreeList {
    pub fn new(offset: u64) -> Self {
        FreeList {
            offset,
            extents: Vec::new(),
        }
    }

    /// Appends an extent of `length` blocks starting at `start`.
    pub fn extent(mut self, start: u64, length: u64) -> Self {
        self.extents.push(FreeExtent { start, length });
        self
    }

    /// Total number of blocks released, saturating on overflow.
    pub fn total_blocks(&self) -> u64 {
        self.extents
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.length))
    }

    /// Iterates over the extents as absolute `(start, length)` pairs.
    pub fn absolute(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let offset = self.offset;
        self.extents
            .iter()
            .map(move |e| (offset.saturating_add(e.start), e.length))
    }
}

/// Validates a free space request against the drive constraints and the media.
///
/// The drive caps are checked first, so a drive with inconsistent caps rejects every
/// request regardless of its contents.
pub fn validate_free(drive: &Drive, media: &Media, list: &FreeList) -> Result<()> {
    if !drive.free_caps_valid() {
        return Err(Error::InvalidDiscardRequest(
            "segment cap exceeds the total cap",
        ));
    }
    if list.extents.is_empty() {
        return Err(Error::InvalidDiscardRequest("no extents"));
    }
    if drive.max_free_seg != 0 && list.extents.len() as u64 > drive.max_free_seg {
        return Err(Error::InvalidDiscardRequest("too many extents"));
    }

    let align = drive.free_align.max(1);
    let mut total = 0u64;
    for e in list.extents.iter() {
        if e.length == 0 {
            return Err(Error::InvalidDiscardRequest("empty extent"));
        }
        let start = list
            .offset
            .checked_add(e.start)
            .ok_or(Error::InvalidDiscardRequest("extent beyond media"))?;
        if start % align != 0 {
            return Err(Error::InvalidDiscardRequest("misaligned extent"));
        }
        if drive.max_free_seg_blks != 0 && e.length > drive.max_free_seg_blks {
            return Err(Error::InvalidDiscardRequest("extent too long"));
        }
        match start.checked_add(e.length) {
            Some(end) if end <= media.nblks => {}
            _ => return Err(Error::InvalidDiscardRequest("extent beyond media")),
        }
        total = total.saturating_add(e.length);
    }

    if drive.max_free_blks != 0 && total > drive.max_free_blks {
        return Err(Error::InvalidDiscardRequest("too many blocks"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::drive::tests::{drive, media};

    #[test]
    fn test_inconsistent_caps() {
        let mut d = drive();
        d.max_free_seg_blks = 100;
        d.max_free_blks = 50;

        // Rejected no matter what the request looks like.
        for list in [
            FreeList::new(0).extent(0, 1),
            FreeList::new(0),
            FreeList::new(8).extent(0, 8).extent(100, 8),
        ]
        .iter()
        {
            assert!(matches!(
                validate_free(&d, &media(), list),
                Err(Error::InvalidDiscardRequest(_))
            ));
        }
    }

    #[test]
    fn test_limits() {
        let mut d = drive();
        d.free_align = 8;
        d.max_free_seg = 2;
        d.max_free_blks = 64;
        d.max_free_seg_blks = 32;
        let m = media();

        let ok = FreeList::new(8).extent(0, 32).extent(16, 8);
        assert!(validate_free(&d, &m, &ok).is_ok());
        assert_eq!(ok.total_blocks(), 40);
        assert_eq!(ok.absolute().collect::<Vec<_>>(), vec![(8, 32), (24, 8)]);

        let cases = vec![
            FreeList::new(0).extent(4, 8),
            FreeList::new(0).extent(0, 8).extent(8, 8).extent(16, 8),
            FreeList::new(0).extent(0, 33),
            FreeList::new(0).extent(0, 32).extent(32, 32).extent(64, 8),
            FreeList::new(0).extent(0, 0),
        ];
        for list in cases.iter() {
            assert!(matches!(
                validate_free(&d, &m, list),
                Err(Error::InvalidDiscardRequest(_))
            ));
        }

        d.max_free_seg = 0;
        let too_many = FreeList::new(0).extent(0, 32).extent(32, 32).extent(64, 8);
        assert!(matches!(
            validate_free(&d, &m, &too_many),
            Err(Error::InvalidDiscardRequest(_))
        ));
    }

    #[test]
    fn test_bounds() {
        let d = drive();
        let m = media();

        assert!(validate_free(&d, &m, &FreeList::new(1000).extent(0, 24)).is_ok());
        assert!(matches!(
            validate_free(&d, &m, &FreeList::new(1000).extent(0, 25)),
            Err(Error::InvalidDiscardRequest(_))
        ));
        assert!(matches!(
            validate_free(&d, &m, &FreeList::new(u64::MAX).extent(1, 1)),
            Err(Error::InvalidDiscardRequest(_))
        ));
    }
}
