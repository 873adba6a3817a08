// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::convert::TryFrom;
use std::sync::Mutex;

use vm_memory::{Bytes, GuestAddressSpace};

use crate::block::{RequestType, Xfer, XferMem};
use crate::device::{BlkOps, Drive, ErrorCause, Media, OPS_VERSION_CURRENT};
use crate::{Error, Result};

/// A RAM backed block driver.
///
/// Transfers normally complete before the driver callback returns. A deferred disk instead
/// parks them until `complete_pending` is called, the way a driver with real hardware behind
/// it completes from its interrupt path. Polled transfers always complete right away.
pub struct MemDisk<M: GuestAddressSpace> {
    version: u32,
    drive: Drive,
    media: Mutex<Option<Media>>,
    data: Mutex<Vec<u8>>,
    // Guest memory for transfers bound to DMA cookies.
    mem: Option<M>,
    deferred: bool,
    pending: Mutex<Vec<Xfer>>,
    started: Mutex<Vec<(RequestType, u64, u32)>>,
    fail_next: Mutex<Option<(Error, Option<ErrorCause>)>>,
}

fn backing_len(media: Option<&Media>) -> usize {
    media.map_or(0, |m| usize::try_from(m.capacity()).unwrap_or(0))
}

impl<M: GuestAddressSpace> MemDisk<M> {
    /// Creates a zero filled disk, with `media` loaded unless it's `None`.
    pub fn new(drive: Drive, media: Option<Media>) -> Self {
        MemDisk {
            version: OPS_VERSION_CURRENT,
            drive,
            data: Mutex::new(vec![0u8; backing_len(media.as_ref())]),
            media: Mutex::new(media),
            mem: None,
            deferred: false,
            pending: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Gives the disk access to guest memory, for DMA bound transfers.
    pub fn with_memory(mut self, mem: M) -> Self {
        self.mem = Some(mem);
        self
    }

    /// Declares an older ops version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Makes the disk park transfers until `complete_pending`.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Swaps the media. The contents are preserved up to the new capacity.
    pub fn set_media(&self, media: Option<Media>) {
        let mut current = self.media.lock().unwrap();
        self.data
            .lock()
            .unwrap()
            .resize(backing_len(media.as_ref()), 0);
        *current = media;
    }

    /// Fails the next executed transfer with `err`, reporting `cause` first if present.
    pub fn fail_next(&self, err: Error, cause: Option<ErrorCause>) {
        *self.fail_next.lock().unwrap() = Some((err, cause));
    }

    /// `(type, blkno, qnum)` of every transfer handed to the disk so far, in order.
    pub fn started(&self) -> Vec<(RequestType, u64, u32)> {
        self.started.lock().unwrap().clone()
    }

    /// Number of parked transfers.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Executes and completes all the parked transfers. Returns how many there were.
    pub fn complete_pending(&self) -> usize {
        let xfers: Vec<Xfer> = self.pending.lock().unwrap().drain(..).collect();
        for xfer in xfers.iter() {
            if let Err(e) = self.execute(xfer) {
                warn!("mem disk: transfer {}: {}", xfer.id(), e);
            }
        }
        xfers.len()
    }

    /// Copies `len` bytes of the backing store starting at byte `offset`.
    pub fn contents(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = self.data.lock().unwrap();
        data.get(offset..offset + len)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    fn start(&self, xfer: &Xfer) -> Result<()> {
        self.started
            .lock()
            .unwrap()
            .push((xfer.request_type(), xfer.blkno(), xfer.qnum()));
        if self.deferred && !xfer.is_polled() {
            self.pending.lock().unwrap().push(xfer.clone());
            return Ok(());
        }
        self.execute(xfer)
    }

    fn execute(&self, xfer: &Xfer) -> Result<()> {
        let injected = self.fail_next.lock().unwrap().take();
        if let Some((err, cause)) = injected {
            if let Some(cause) = cause {
                xfer.report_error(cause)?;
            }
            return xfer.complete(Err(err));
        }

        let result = match xfer.request_type() {
            RequestType::Read => self.transfer(xfer, false),
            RequestType::Write => self.transfer(xfer, true),
            RequestType::SyncCache => Ok(()),
            RequestType::FreeSpace => self.release(xfer),
        };
        xfer.complete(result)
    }

    fn blksize(&self) -> Result<usize> {
        let media = self.media.lock().unwrap();
        media.map(|m| m.blksize as usize).ok_or(Error::NoMedia)
    }

    fn transfer(&self, xfer: &Xfer, write: bool) -> Result<()> {
        let blksize = self.blksize()?;
        let start = xfer.blkno() as usize * blksize;
        let len = xfer.nblks() as usize * blksize;

        let mut data = self.data.lock().unwrap();
        let region = data
            .get_mut(start..start + len)
            .ok_or(Error::Io(libc::EIO))?;

        match xfer.mem() {
            Some(XferMem::Direct(buf)) => {
                if write {
                    buf.copy_to(region);
                } else {
                    buf.copy_from(region);
                }
            }
            Some(XferMem::Dma(cookies)) => {
                let mem = self
                    .mem
                    .as_ref()
                    .ok_or(Error::DmaBind("no guest memory"))?
                    .memory();
                let mut offset = 0;
                for cookie in cookies.iter() {
                    let chunk = &mut region[offset..offset + cookie.len as usize];
                    let res = if write {
                        mem.read_slice(chunk, cookie.addr)
                    } else {
                        mem.write_slice(chunk, cookie.addr)
                    };
                    res.map_err(Error::GuestMemory)?;
                    offset += cookie.len as usize;
                }
            }
            None => return Err(Error::Io(libc::EINVAL)),
        }
        Ok(())
    }

    fn release(&self, xfer: &Xfer) -> Result<()> {
        let blksize = self.blksize()?;
        let list = xfer.free().ok_or(Error::Io(libc::EINVAL))?;

        let mut data = self.data.lock().unwrap();
        for (start, length) in list.absolute() {
            let from = start as usize * blksize;
            let to = from + length as usize * blksize;
            let region = data.get_mut(from..to).ok_or(Error::Io(libc::EIO))?;
            for b in region.iter_mut() {
                *b = 0;
            }
        }
        Ok(())
    }
}

impl<M: GuestAddressSpace + Send + Sync> BlkOps for MemDisk<M> {
    fn version(&self) -> u32 {
        self.version
    }

    fn drive_info(&self) -> Drive {
        self.drive.clone()
    }

    fn media_info(&self) -> Result<Media> {
        self.media.lock().unwrap().ok_or(Error::NoMedia)
    }

    fn sync_cache(&self, xfer: &Xfer) -> Result<()> {
        self.start(xfer)
    }

    fn read(&self, xfer: &Xfer) -> Result<()> {
        self.start(xfer)
    }

    fn write(&self, xfer: &Xfer) -> Result<()> {
        self.start(xfer)
    }

    fn free_space(&self, xfer: &Xfer) -> Result<()> {
        self.start(xfer)
    }
}
