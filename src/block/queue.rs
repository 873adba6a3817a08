// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, TryLockError};

use crate::block::Xfer;
use crate::{Error, Result};

/// What a submitter does when the dispatch queue of a device is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Fail the submission with `Error::WouldBlock`.
    WouldBlock,
    /// Wait until a transfer completes.
    Block,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        SubmitPolicy::WouldBlock
    }
}

struct QueueState {
    /// Accepted transfers that have not completed yet, dispatched or not.
    outstanding: u32,
    /// Accepted transfers not yet handed to the driver, per queue index.
    waitq: Vec<VecDeque<Xfer>>,
    closed: bool,
}

/// The dispatch queue of an attached device.
///
/// Depth is fixed when the device attaches. Transfers reach the driver in submission order
/// per queue index; there is no ordering across queue indexes.
pub(crate) struct DispatchQueue {
    depth: u32,
    policy: SubmitPolicy,
    state: Mutex<QueueState>,
    space: Condvar,
    // Held while handing transfers of one queue index to the driver.
    dispatching: Vec<Mutex<()>>,
}

impl DispatchQueue {
    pub fn new(depth: u32, qcount: u32, policy: SubmitPolicy) -> Self {
        let qcount = qcount.max(1) as usize;
        DispatchQueue {
            depth,
            policy,
            state: Mutex::new(QueueState {
                outstanding: 0,
                waitq: (0..qcount).map(|_| VecDeque::new()).collect(),
                closed: false,
            }),
            space: Condvar::new(),
            dispatching: (0..qcount).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn outstanding(&self) -> u32 {
        self.state.lock().unwrap().outstanding
    }

    /// Takes one slot of the queue, for a transfer about to be pushed.
    pub fn reserve(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(Error::NotAttached);
            }
            if state.outstanding < self.depth {
                state.outstanding += 1;
                return Ok(());
            }
            match self.policy {
                SubmitPolicy::WouldBlock => return Err(Error::WouldBlock),
                SubmitPolicy::Block => state = self.space.wait(state).unwrap(),
            }
        }
    }

    /// Appends a transfer, which must own a slot, to the tail of its queue.
    pub fn push(&self, xfer: Xfer) {
        let mut state = self.state.lock().unwrap();
        let q = xfer.qnum() as usize;
        state.waitq[q].push_back(xfer);
    }

    /// Releases the slot of a completed transfer.
    pub fn retire(&self) {
        let mut state = self.state.lock().unwrap();
        if state.outstanding == 0 {
            error!("dispatch queue: completion without outstanding transfers");
            return;
        }
        state.outstanding -= 1;
        self.space.notify_one();
    }

    /// Closes the queue to new transfers. Fails with `Busy` while transfers are outstanding.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.outstanding > 0 {
            return Err(Error::Busy);
        }
        state.closed = true;
        Ok(())
    }

    fn pop(&self, qnum: usize) -> Option<Xfer> {
        self.state.lock().unwrap().waitq[qnum].pop_front()
    }

    /// Hands the waiting transfers of queue `qnum` to `start`, head first.
    ///
    /// `start` runs without the queue state locked, so it may complete transfers or submit new
    /// ones. When another thread is already dispatching this queue index, that thread picks up
    /// whatever was pushed before it finishes.
    pub fn dispatch<F: FnMut(&Xfer)>(&self, qnum: u32, mut start: F) {
        let q = qnum as usize;
        loop {
            let guard = match self.dispatching[q].try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(e)) => e.into_inner(),
            };
            while let Some(xfer) = self.pop(q) {
                start(&xfer);
            }
            drop(guard);

            // A transfer pushed while we were dropping the guard would be stranded otherwise.
            if self.state.lock().unwrap().waitq[q].is_empty() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::block::xfer::XferParams;
    use crate::block::{Pending, RequestType};
    use crate::device::ErrorStats;

    fn xfer(queue: &Arc<DispatchQueue>, id: u64, qnum: u32) -> (Xfer, Pending) {
        let params = XferParams {
            request_type: RequestType::SyncCache,
            blkno: 0,
            nblks: 0,
            mem: None,
            qnum,
            free: None,
        };
        Xfer::new(
            id,
            params,
            0,
            Arc::new(ErrorStats::default()),
            Some(queue.clone()),
            None,
        )
    }

    #[test]
    fn test_depth() {
        let queue = Arc::new(DispatchQueue::new(2, 1, SubmitPolicy::WouldBlock));
        assert_eq!(queue.depth(), 2);
        queue.reserve().unwrap();
        queue.reserve().unwrap();
        assert!(matches!(queue.reserve(), Err(Error::WouldBlock)));
        assert_eq!(queue.outstanding(), 2);

        queue.retire();
        queue.reserve().unwrap();
        assert!(matches!(queue.close(), Err(Error::Busy)));

        queue.retire();
        queue.retire();
        queue.close().unwrap();
        assert!(matches!(queue.reserve(), Err(Error::NotAttached)));
    }

    #[test]
    fn test_dispatch_order() {
        let queue = Arc::new(DispatchQueue::new(8, 2, SubmitPolicy::WouldBlock));
        let mut held = Vec::new();
        for (id, qnum) in [(0u64, 0u32), (1, 1), (2, 0), (3, 1), (4, 0)].iter() {
            queue.reserve().unwrap();
            let (x, p) = xfer(&queue, *id, *qnum);
            queue.push(x);
            held.push(p);
        }

        let mut seen = Vec::new();
        queue.dispatch(0, |x| {
            seen.push(x.id());
            x.complete(Ok(())).unwrap();
        });
        assert_eq!(seen, vec![0, 2, 4]);
        assert_eq!(queue.outstanding(), 2);

        seen.clear();
        queue.dispatch(1, |x| {
            seen.push(x.id());
            x.complete(Ok(())).unwrap();
        });
        assert_eq!(seen, vec![1, 3]);
        assert_eq!(queue.outstanding(), 0);
        for p in held {
            assert!(p.wait().is_ok());
        }
    }

    #[test]
    fn test_block_policy() {
        let queue = Arc::new(DispatchQueue::new(1, 1, SubmitPolicy::Block));
        queue.reserve().unwrap();

        let q = queue.clone();
        let waiter = thread::spawn(move || q.reserve());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.outstanding(), 1);

        queue.retire();
        waiter.join().unwrap().unwrap();
        assert_eq!(queue.outstanding(), 1);
    }
}
