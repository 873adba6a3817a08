// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::convert::TryFrom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use vm_memory::GuestAddressSpace;
use vmm_sys_util::eventfd::EventFd;

use crate::block::queue::DispatchQueue;
use crate::block::xfer::XferParams;
use crate::block::{
    validate_free, xfer_flags, DmaTemplate, IoBuf, Pending, Request, RequestType, SubmitPolicy,
    Xfer, XferMem,
};
use crate::device::{
    info_flags, validate_drive, validate_media, BlkOps, DeviceId, Drive, ErrorStats,
    ErrorStatsSnapshot, HostNode, Media, OpsVersion,
};
use crate::{Error, Result};

/// Configuration of a block device handle.
#[derive(Default)]
pub struct HandleConfig {
    /// Behavior of submissions against a full dispatch queue.
    pub policy: SubmitPolicy,
    /// Signalled once for every completed transfer.
    pub completion_evt: Option<EventFd>,
}

struct Attached {
    node: Arc<HostNode>,
    queue: Arc<DispatchQueue>,
    drive: Drive,
    // `None` while no usable media is present.
    media: Option<Media>,
}

#[derive(Default)]
struct HandleState {
    attached: Option<Attached>,
    address: Option<String>,
    devid: Option<DeviceId>,
}

/// The framework side of one block device.
///
/// A handle starts out unattached. Attaching it queries and validates the drive and its
/// media, makes it visible under a host node and sets up its dispatch queue; only then does
/// it accept transfers. A handle must be detached again before it is freed.
///
/// Statistics belong to the handle rather than to an attachment, so they survive a
/// detach/attach cycle.
pub struct Handle<D, M: GuestAddressSpace> {
    driver: D,
    version: OpsVersion,
    dma: Option<DmaTemplate<M>>,
    policy: SubmitPolicy,
    notify: Option<Arc<EventFd>>,
    stats: Arc<ErrorStats>,
    state: Mutex<HandleState>,
    next_id: AtomicU64,
}

impl<D: BlkOps, M: GuestAddressSpace> Handle<D, M> {
    /// Creates an unattached handle for `driver`.
    ///
    /// Without a DMA template the handle only accepts direct buffers.
    pub fn allocate(driver: D, dma: Option<DmaTemplate<M>>, config: HandleConfig) -> Result<Self> {
        let version = OpsVersion::try_from(driver.version())?;
        Ok(Handle {
            driver,
            version,
            dma,
            policy: config.policy,
            notify: config.completion_evt.map(Arc::new),
            stats: Arc::new(ErrorStats::default()),
            state: Mutex::new(HandleState::default()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Releases the handle and gives the driver state back.
    ///
    /// # Panics
    ///
    /// Panics if the handle is still attached.
    pub fn free(self) -> D {
        let state = self.state.into_inner().unwrap();
        assert!(
            state.attached.is_none(),
            "freeing an attached block device handle"
        );
        self.driver
    }

    fn query_media(&self, drive: &Drive) -> Result<Option<Media>> {
        match self.driver.media_info() {
            Ok(media) => {
                validate_media(drive, &media)?;
                Ok(Some(media))
            }
            Err(e) => {
                debug!("no media: {}", e);
                Ok(None)
            }
        }
    }

    /// Attaches the handle under `node`.
    pub fn attach(&self, node: &Arc<HostNode>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.attached.is_some() {
            return Err(Error::AlreadyAttached);
        }

        let mut drive = self.driver.drive_info();
        validate_drive(&drive)?;
        if self.version < OpsVersion::V1 && drive.qcount > 1 {
            debug!("ops version {:?} drives a single queue", self.version);
            drive.qcount = 1;
        }
        let media = self.query_media(&drive)?;

        let address = drive.address();
        node.claim(&address, self.stats.clone())?;

        state.devid = match self.driver.devid_init(node, &drive) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("{}: no device id: {}", address, e);
                None
            }
        };
        self.stats.set_ident(&drive);
        self.stats.set_capacity(media.map_or(0, |m| m.capacity()));

        let queue = Arc::new(DispatchQueue::new(
            drive.qsize,
            drive.queue_count(),
            self.policy,
        ));
        info!(
            "{}: attached {} (qsize {}, {} queues)",
            node.name(),
            address,
            queue.depth(),
            drive.queue_count()
        );

        state.address = Some(address);
        state.attached = Some(Attached {
            node: node.clone(),
            queue,
            drive,
            media,
        });
        Ok(())
    }

    /// Detaches the handle. Fails with `Busy` while transfers are outstanding.
    pub fn detach(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.attached.as_ref() {
            Some(attached) => attached.queue.close()?,
            None => return Err(Error::NotAttached),
        }

        if let Some(attached) = state.attached.take() {
            if let Some(address) = state.address.as_ref() {
                attached.node.release(address);
                info!("{}: detached {}", attached.node.name(), address);
            }
        }
        Ok(())
    }

    /// Re-reads the media after the driver noticed a change, e.g. an insertion or removal.
    ///
    /// Media failing validation is treated as absent until the next successful notification,
    /// and the validation error is returned.
    pub fn notify_state_change(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let attached = state.attached.as_mut().ok_or(Error::NotAttached)?;

        let media = match self.query_media(&attached.drive) {
            Ok(media) => media,
            Err(e) => {
                warn!("rejecting media: {}", e);
                attached.media = None;
                self.stats.set_capacity(0);
                return Err(e);
            }
        };
        if media != attached.media {
            info!("media changed: {:?}", media);
        }
        attached.media = media;
        self.stats.set_capacity(media.map_or(0, |m| m.capacity()));
        Ok(())
    }

    /// The textual address of the device, known from its first attachment on.
    pub fn address(&self) -> Option<String> {
        self.state.lock().unwrap().address.clone()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn version(&self) -> OpsVersion {
        self.version
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().unwrap().attached.is_some()
    }

    /// Drive capabilities, while attached.
    pub fn drive(&self) -> Option<Drive> {
        let state = self.state.lock().unwrap();
        state.attached.as_ref().map(|a| a.drive.clone())
    }

    /// Current media, while attached and present.
    pub fn media(&self) -> Option<Media> {
        let state = self.state.lock().unwrap();
        state.attached.as_ref().and_then(|a| a.media)
    }

    pub fn devid(&self) -> Option<DeviceId> {
        self.state.lock().unwrap().devid.clone()
    }

    /// The `info_flags` describing the device; 0 while unattached.
    pub fn info_flags(&self) -> u32 {
        let state = self.state.lock().unwrap();
        let attached = match state.attached.as_ref() {
            Some(attached) => attached,
            None => return 0,
        };
        let mut flags = 0;
        if attached.drive.removable {
            flags |= info_flags::REMOVABLE;
        }
        if attached.drive.hotpluggable {
            flags |= info_flags::HOTPLUGGABLE;
        }
        if attached.media.map_or(false, |m| m.readonly) {
            flags |= info_flags::READ_ONLY;
        }
        flags
    }

    /// Number of accepted transfers that have not completed yet.
    pub fn outstanding(&self) -> u32 {
        let state = self.state.lock().unwrap();
        state.attached.as_ref().map_or(0, |a| a.queue.outstanding())
    }

    pub fn stats(&self) -> ErrorStatsSnapshot {
        self.stats.snapshot()
    }

    fn bind(&self, buf: IoBuf) -> Result<XferMem> {
        match buf {
            IoBuf::Direct(buf) => Ok(XferMem::Direct(buf)),
            IoBuf::Guest(regions) => {
                let dma = self
                    .dma
                    .as_ref()
                    .ok_or(Error::DmaBind("device has no dma template"))?;
                dma.bind(&regions).map(XferMem::Dma)
            }
        }
    }

    // Validates `req` against the device and binds its memory.
    fn prepare(&self, attached: &Attached, req: Request) -> Result<XferParams> {
        let drive = &attached.drive;
        let request_type = req.request_type();
        let blkno = req.blkno();
        let qnum = req.qnum();
        if qnum >= drive.queue_count() {
            return Err(Error::OutOfRange);
        }
        let (buf, free) = req.into_parts();

        match request_type {
            RequestType::SyncCache => Ok(XferParams {
                request_type,
                blkno: 0,
                nblks: 0,
                mem: None,
                qnum,
                free: None,
            }),
            RequestType::FreeSpace => {
                if self.version < OpsVersion::V2 {
                    return Err(Error::NotSupported);
                }
                let media = attached.media.as_ref().ok_or(Error::NoMedia)?;
                if media.readonly {
                    return Err(Error::ReadOnly);
                }
                let list = free.ok_or(Error::InvalidDiscardRequest("missing extent list"))?;
                validate_free(drive, media, &list)?;
                Ok(XferParams {
                    request_type,
                    blkno: list.offset,
                    nblks: list.total_blocks(),
                    mem: None,
                    qnum,
                    free: Some(list),
                })
            }
            RequestType::Read | RequestType::Write => {
                let media = attached.media.as_ref().ok_or(Error::NoMedia)?;
                if request_type == RequestType::Write && media.readonly {
                    return Err(Error::ReadOnly);
                }
                let buf = buf.ok_or(Error::OutOfRange)?;
                let len = buf.len().ok_or(Error::OutOfRange)? as u64;
                let blksize = u64::from(media.blksize);
                if len == 0 || len % blksize != 0 || len > u64::from(drive.maxxfer) {
                    return Err(Error::OutOfRange);
                }
                let nblks = len / blksize;
                match blkno.checked_add(nblks) {
                    Some(end) if end <= media.nblks => {}
                    _ => return Err(Error::OutOfRange),
                }
                Ok(XferParams {
                    request_type,
                    blkno,
                    nblks,
                    mem: Some(self.bind(buf)?),
                    qnum,
                    free: None,
                })
            }
        }
    }

    // Hands `xfer` to the driver, completing it right away if the driver refuses it.
    fn start(&self, xfer: &Xfer) {
        let result = match xfer.request_type() {
            RequestType::Read => self.driver.read(xfer),
            RequestType::Write => self.driver.write(xfer),
            RequestType::SyncCache => self.driver.sync_cache(xfer),
            RequestType::FreeSpace => self.driver.free_space(xfer),
        };
        if let Err(e) = result {
            debug!("transfer {} not started: {}", xfer.id(), e);
            // This only fails when the driver completed the transfer before refusing it,
            // which has been logged already.
            let _ = xfer.complete(Err(e));
        }
    }

    /// Submits a request through the dispatch queue.
    ///
    /// Validation and binding errors are returned right away. Once accepted, the request is
    /// completed exactly once and its status is delivered through the returned `Pending`.
    pub fn submit(&self, req: Request) -> Result<Pending> {
        let state = self.state.lock().unwrap();
        let attached = state.attached.as_ref().ok_or(Error::NotAttached)?;
        let params = self.prepare(attached, req)?;
        let queue = attached.queue.clone();
        drop(state);

        queue.reserve()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let qnum = params.qnum;
        let (xfer, pending) = Xfer::new(
            id,
            params,
            0,
            self.stats.clone(),
            Some(queue.clone()),
            self.notify.clone(),
        );
        debug!(
            "transfer {}: {:?} blkno {} nblks {} queue {}",
            id,
            xfer.request_type(),
            xfer.blkno(),
            xfer.nblks(),
            qnum
        );

        queue.push(xfer);
        queue.dispatch(qnum, |xfer| self.start(xfer));
        Ok(pending)
    }

    /// Runs a request in polled mode, on the calling thread, bypassing the dispatch queue.
    ///
    /// This is meant for contexts such as system dumps, where interrupts are unavailable and
    /// nothing else runs; the exclusive borrow guarantees no other thread uses the handle
    /// meanwhile. The driver must complete the transfer before returning from its callback.
    pub fn submit_polled(&mut self, req: Request) -> Result<()> {
        let state = self.state.lock().unwrap();
        let attached = state.attached.as_ref().ok_or(Error::NotAttached)?;
        let params = self.prepare(attached, req)?;
        drop(state);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (xfer, pending) = Xfer::new(
            id,
            params,
            xfer_flags::POLL,
            self.stats.clone(),
            None,
            self.notify.clone(),
        );
        self.start(&xfer);

        match pending.try_wait() {
            Some(result) => result,
            None => {
                error!("polled transfer {} not completed by the driver", id);
                let _ = xfer.complete(Err(Error::Io(libc::EIO)));
                Err(Error::Io(libc::EIO))
            }
        }
    }
}
