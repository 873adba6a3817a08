// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Block requests, as submitted by the storage stack.

use vm_memory::GuestAddress;

use crate::block::{DirectBuf, FreeList};

/// Type of request from the storage stack to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    /// Read request.
    Read,
    /// Write request.
    Write,
    /// Flush the device write cache.
    SyncCache,
    /// Release blocks (discard).
    FreeSpace,
}

/// The memory a read or write request transfers to or from.
#[derive(Clone, Debug)]
pub enum IoBuf {
    /// `(address, length)` regions of guest memory, bound to DMA cookies on submission.
    Guest(Vec<(GuestAddress, usize)>),
    /// A host buffer handed to the driver as is.
    Direct(DirectBuf),
}

impl IoBuf {
    /// Total length of the buffer in bytes, or `None` if it overflows `usize`.
    pub fn len(&self) -> Option<usize> {
        match self {
            IoBuf::Guest(regions) => regions
                .iter()
                .try_fold(0usize, |acc, &(_, len)| acc.checked_add(len)),
            IoBuf::Direct(buf) => Some(buf.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Stores the necessary information for submitting a block request.
#[derive(Clone, Debug)]
pub struct Request {
    request_type: RequestType,
    /// First logical block of the request.
    blkno: u64,
    buf: Option<IoBuf>,
    free: Option<FreeList>,
    /// Index of the device queue the request goes to.
    qnum: u32,
}

impl Request {
    fn new(request_type: RequestType, blkno: u64) -> Self {
        Request {
            request_type,
            blkno,
            buf: None,
            free: None,
            qnum: 0,
        }
    }

    /// Reads `buf.len()` bytes starting at block `blkno` into `buf`.
    pub fn read(blkno: u64, buf: IoBuf) -> Self {
        Request {
            buf: Some(buf),
            ..Request::new(RequestType::Read, blkno)
        }
    }

    /// Writes the contents of `buf` starting at block `blkno`.
    pub fn write(blkno: u64, buf: IoBuf) -> Self {
        Request {
            buf: Some(buf),
            ..Request::new(RequestType::Write, blkno)
        }
    }

    pub fn sync_cache() -> Self {
        Request::new(RequestType::SyncCache, 0)
    }

    pub fn free_space(list: FreeList) -> Self {
        Request {
            free: Some(list),
            ..Request::new(RequestType::FreeSpace, 0)
        }
    }

    /// Directs the request to queue `qnum` of the device.
    pub fn on_queue(mut self, qnum: u32) -> Self {
        self.qnum = qnum;
        self
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn blkno(&self) -> u64 {
        self.blkno
    }

    pub fn buf(&self) -> Option<&IoBuf> {
        self.buf.as_ref()
    }

    pub fn qnum(&self) -> u32 {
        self.qnum
    }

    pub(crate) fn into_parts(self) -> (Option<IoBuf>, Option<FreeList>) {
        (self.buf, self.free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buf_len() {
        let guest = IoBuf::Guest(vec![(GuestAddress(0), 512), (GuestAddress(0x1000), 1024)]);
        assert_eq!(guest.len(), Some(1536));
        assert!(IoBuf::Direct(DirectBuf::new(0)).is_empty());

        let huge = IoBuf::Guest(vec![(GuestAddress(0), usize::MAX), (GuestAddress(0), 512)]);
        assert_eq!(huge.len(), None);
        assert!(!huge.is_empty());
    }

    #[test]
    fn test_builders() {
        let r = Request::read(8, IoBuf::Direct(DirectBuf::new(512))).on_queue(2);
        assert_eq!(r.request_type(), RequestType::Read);
        assert_eq!(r.blkno(), 8);
        assert_eq!(r.qnum(), 2);
        assert_eq!(r.buf().and_then(IoBuf::len), Some(512));

        let r = Request::free_space(FreeList::new(0).extent(0, 8));
        assert_eq!(r.request_type(), RequestType::FreeSpace);
        assert!(r.buf().is_none());
        let (_, free) = r.into_parts();
        assert_eq!(free.map(|l| l.total_blocks()), Some(8));
    }
}
