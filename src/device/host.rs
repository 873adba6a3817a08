// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::device::{ErrorStats, ErrorStatsSnapshot};
use crate::{Error, Result};

/// The node of the host environment that block devices attach under.
///
/// It keeps the addresses of its attached children unique and exposes the statistics of each
/// of them while attached.
#[derive(Debug)]
pub struct HostNode {
    name: String,
    children: Mutex<BTreeMap<String, Arc<ErrorStats>>>,
}

impl HostNode {
    pub fn new<S: Into<String>>(name: S) -> Self {
        HostNode {
            name: name.into(),
            children: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn claim(&self, address: &str, stats: Arc<ErrorStats>) -> Result<()> {
        let mut children = self.children.lock().unwrap();
        if children.contains_key(address) {
            return Err(Error::AddressInUse(address.to_string()));
        }
        children.insert(address.to_string(), stats);
        Ok(())
    }

    pub(crate) fn release(&self, address: &str) {
        if self.children.lock().unwrap().remove(address).is_none() {
            warn!("{}: release of unknown address {}", self.name, address);
        }
    }

    /// Addresses of the devices currently attached under this node.
    pub fn addresses(&self) -> Vec<String> {
        self.children.lock().unwrap().keys().cloned().collect()
    }

    /// Statistics of the device attached at `address`.
    pub fn stats(&self, address: &str) -> Option<ErrorStatsSnapshot> {
        self.children
            .lock()
            .unwrap()
            .get(address)
            .map(|stats| stats.snapshot())
    }
}
