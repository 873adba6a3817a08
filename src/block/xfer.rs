// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Transfer descriptors, as seen by drivers, and their completion.

use std::cmp;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};

use vmm_sys_util::eventfd::EventFd;

use crate::block::queue::DispatchQueue;
use crate::block::{DmaCookie, FreeList, RequestType};
use crate::device::{ErrorCause, ErrorStats};
use crate::{Error, Result};

/// Transfer flags.
pub mod xfer_flags {
    /// The transfer runs in polled mode: interrupts are not available and the driver must
    /// complete it before returning from its callback.
    pub const POLL: u32 = 1 << 0;
}

/// A host buffer shared between the submitter and the driver.
#[derive(Clone, Debug, Default)]
pub struct DirectBuf(Arc<Mutex<Vec<u8>>>);

impl DirectBuf {
    /// Creates a zeroed buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        DirectBuf::from(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `src` into the start of the buffer. Returns the number of bytes copied.
    pub fn copy_from(&self, src: &[u8]) -> usize {
        let mut buf = self.0.lock().unwrap();
        let n = cmp::min(buf.len(), src.len());
        buf[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Copies the start of the buffer into `dst`. Returns the number of bytes copied.
    pub fn copy_to(&self, dst: &mut [u8]) -> usize {
        let buf = self.0.lock().unwrap();
        let n = cmp::min(buf.len(), dst.len());
        dst[..n].copy_from_slice(&buf[..n]);
        n
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl From<Vec<u8>> for DirectBuf {
    fn from(v: Vec<u8>) -> Self {
        DirectBuf(Arc::new(Mutex::new(v)))
    }
}

/// Memory bound to a transfer: either a DMA scatter list, or a single host buffer.
#[derive(Clone, Debug)]
pub enum XferMem {
    Dma(Vec<DmaCookie>),
    Direct(DirectBuf),
}

/// Everything about a transfer that is known once its request has been validated and bound.
pub(crate) struct XferParams {
    pub request_type: RequestType,
    pub blkno: u64,
    pub nblks: u64,
    pub mem: Option<XferMem>,
    pub qnum: u32,
    pub free: Option<FreeList>,
}

struct DoneState {
    tx: Option<SyncSender<Result<()>>>,
    cause: Option<ErrorCause>,
}

// Completion side of a transfer, shared by all the clones of its descriptor.
struct Done {
    id: u64,
    state: Mutex<DoneState>,
    stats: Arc<ErrorStats>,
    // `None` for polled transfers, which bypass the dispatch queue.
    queue: Option<Arc<DispatchQueue>>,
    notify: Option<Arc<EventFd>>,
}

impl Done {
    fn finish(&self, result: Result<()>) -> Result<()> {
        let (tx, cause) = {
            let mut state = self.state.lock().unwrap();
            match state.tx.take() {
                Some(tx) => (tx, state.cause.take()),
                None => {
                    error!("transfer {} completed more than once", self.id);
                    return Err(Error::AlreadyCompleted);
                }
            }
        };

        match result {
            Ok(()) => debug!("transfer {} done", self.id),
            Err(ref e) => {
                debug!("transfer {} failed: {}", self.id, e);
                self.stats.record_failure(e, cause);
            }
        }

        if let Some(queue) = self.queue.as_ref() {
            queue.retire();
        }
        if let Some(evt) = self.notify.as_ref() {
            if let Err(e) = evt.write(1) {
                error!("Failed to signal completion: {:?}", e);
            }
        }
        // The submitter is allowed to drop its `Pending` without waiting.
        let _ = tx.send(result);
        Ok(())
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        let lost = self.state.get_mut().map(|s| s.tx.is_some()).unwrap_or(false);
        if lost {
            error!("transfer {} dropped without completion", self.id);
            let _ = self.finish(Err(Error::Io(libc::EIO)));
        }
    }
}

/// A transfer descriptor: one read, write, cache flush or free space operation handed to a
/// driver.
///
/// Clones share their completion, so a driver can keep a clone around and complete it later,
/// from any thread. Every descriptor must be completed exactly once; a descriptor whose last
/// clone goes away without completion fails with `EIO`.
#[derive(Clone)]
pub struct Xfer {
    request_type: RequestType,
    blkno: u64,
    nblks: u64,
    mem: Option<XferMem>,
    flags: u32,
    qnum: u32,
    free: Option<Arc<FreeList>>,
    done: Arc<Done>,
}

impl Xfer {
    pub(crate) fn new(
        id: u64,
        params: XferParams,
        flags: u32,
        stats: Arc<ErrorStats>,
        queue: Option<Arc<DispatchQueue>>,
        notify: Option<Arc<EventFd>>,
    ) -> (Xfer, Pending) {
        let (tx, rx) = mpsc::sync_channel(1);
        let done = Done {
            id,
            state: Mutex::new(DoneState {
                tx: Some(tx),
                cause: None,
            }),
            stats,
            queue,
            notify,
        };
        let xfer = Xfer {
            request_type: params.request_type,
            blkno: params.blkno,
            nblks: params.nblks,
            mem: params.mem,
            flags,
            qnum: params.qnum,
            free: params.free.map(Arc::new),
            done: Arc::new(done),
        };
        (xfer, Pending { id, rx })
    }

    /// Unique (per handle) identifier of the transfer.
    pub fn id(&self) -> u64 {
        self.done.id
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// First block of the transfer. For free space requests, the offset of the extent list.
    pub fn blkno(&self) -> u64 {
        self.blkno
    }

    /// Number of blocks transferred or released.
    pub fn nblks(&self) -> u64 {
        self.nblks
    }

    /// Memory bound to the transfer; `None` for cache flushes and free space requests.
    pub fn mem(&self) -> Option<&XferMem> {
        self.mem.as_ref()
    }

    /// Number of DMA cookies, 0 for other bindings.
    pub fn ndmac(&self) -> usize {
        match self.mem {
            Some(XferMem::Dma(ref cookies)) => cookies.len(),
            _ => 0,
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn is_polled(&self) -> bool {
        self.flags & xfer_flags::POLL != 0
    }

    /// Index of the device queue the transfer was submitted to.
    pub fn qnum(&self) -> u32 {
        self.qnum
    }

    /// Extents of a free space request.
    pub fn free(&self) -> Option<&FreeList> {
        self.free.as_deref()
    }

    /// Completes the transfer with `result`, waking up its submitter.
    ///
    /// Fails with `AlreadyCompleted` if the transfer was completed before.
    pub fn complete(&self, result: Result<()>) -> Result<()> {
        self.done.finish(result)
    }

    /// Records the cause of a failure of this transfer.
    ///
    /// The cause is accounted for only if the transfer eventually completes with an error;
    /// when reported more than once, the last cause wins.
    pub fn report_error(&self, cause: ErrorCause) -> Result<()> {
        let mut state = self.done.state.lock().unwrap();
        if state.tx.is_none() {
            warn!(
                "error {:?} reported for completed transfer {}",
                cause, self.done.id
            );
            return Err(Error::AlreadyCompleted);
        }
        state.cause = Some(cause);
        Ok(())
    }
}

/// The submitter's side of an accepted transfer.
#[derive(Debug)]
pub struct Pending {
    id: u64,
    rx: Receiver<Result<()>>,
}

impl Pending {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocks until the transfer completes and returns its status.
    pub fn wait(self) -> Result<()> {
        // Every descriptor sends its status before going away, so this can't disconnect.
        self.rx.recv().unwrap_or(Err(Error::Io(libc::EIO)))
    }

    /// Returns the status of the transfer if it has completed.
    pub fn try_wait(&self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Io(libc::EIO))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xfer(stats: Arc<ErrorStats>) -> (Xfer, Pending) {
        let params = XferParams {
            request_type: RequestType::Read,
            blkno: 0,
            nblks: 1,
            mem: Some(XferMem::Direct(DirectBuf::new(512))),
            qnum: 0,
            free: None,
        };
        Xfer::new(7, params, 0, stats, None, None)
    }

    #[test]
    fn test_complete_once() {
        let stats = Arc::new(ErrorStats::default());
        let (x, pending) = xfer(stats.clone());
        assert_eq!(x.id(), 7);
        assert!(pending.try_wait().is_none());

        x.complete(Ok(())).unwrap();
        assert!(matches!(x.complete(Ok(())), Err(Error::AlreadyCompleted)));
        assert!(matches!(
            x.clone().complete(Err(Error::Io(libc::EIO))),
            Err(Error::AlreadyCompleted)
        ));
        assert!(pending.wait().is_ok());
        assert_eq!(stats.snapshot().hard_errors, 0);
    }

    #[test]
    fn test_report_error() {
        let stats = Arc::new(ErrorStats::default());

        // The last reported cause is attributed to a failed transfer.
        let (x, pending) = xfer(stats.clone());
        x.report_error(ErrorCause::NotReady).unwrap();
        x.report_error(ErrorCause::Media).unwrap();
        x.complete(Err(Error::Io(libc::EIO))).unwrap();
        assert!(matches!(pending.wait(), Err(Error::Io(_))));
        let s = stats.snapshot();
        assert_eq!((s.hard_errors, s.media_errors, s.not_ready_errors), (1, 1, 0));

        // And dropped for a successful one.
        let (x, _pending) = xfer(stats.clone());
        x.report_error(ErrorCause::Recoverable).unwrap();
        x.complete(Ok(())).unwrap();
        assert_eq!(stats.snapshot().recoverable_errors, 0);
        assert!(matches!(
            x.report_error(ErrorCause::Media),
            Err(Error::AlreadyCompleted)
        ));
    }

    #[test]
    fn test_dropped_xfer() {
        let stats = Arc::new(ErrorStats::default());
        let (x, pending) = xfer(stats.clone());
        let clone = x.clone();
        drop(x);
        assert!(pending.try_wait().is_none());
        drop(clone);
        assert!(matches!(pending.wait(), Err(Error::Io(_))));
        assert_eq!(stats.snapshot().hard_errors, 1);
    }

    #[test]
    fn test_notify() {
        let evt = Arc::new(EventFd::new(vmm_sys_util::eventfd::EFD_NONBLOCK).unwrap());
        let params = XferParams {
            request_type: RequestType::SyncCache,
            blkno: 0,
            nblks: 0,
            mem: None,
            qnum: 0,
            free: None,
        };
        let (x, _pending) = Xfer::new(
            1,
            params,
            0,
            Arc::new(ErrorStats::default()),
            None,
            Some(evt.clone()),
        );
        x.complete(Ok(())).unwrap();
        assert_eq!(evt.read().unwrap(), 1);
    }

    #[test]
    fn test_direct_buf() {
        let buf = DirectBuf::new(4);
        let other = buf.clone();
        assert_eq!(other.copy_from(&[1, 2, 3, 4, 5]), 4);
        let mut out = [0u8; 2];
        assert_eq!(buf.copy_to(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(buf.to_vec(), vec![1, 2, 3, 4]);
    }
}
