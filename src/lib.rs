// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! A generic block device framework.
//!
//! Drivers describe their drive and media and implement the transfer operations of
//! [`BlkOps`](device/trait.BlkOps.html). The framework wraps each driver in a
//! [`Handle`](device/struct.Handle.html), which validates what the driver reports, turns
//! requests from the storage stack into transfer descriptors bound to DMA cookies or host
//! buffers, dispatches them within the depth of the device queue, and accounts for their
//! completion.

#[macro_use]
extern crate log;

pub mod block;
pub mod device;
pub mod devices;
mod error;

pub use block::{IoBuf, Pending, Request, RequestType, Xfer};
pub use device::{BlkOps, Drive, Handle, HandleConfig, HostNode, Media};
pub use error::{Error, Result};
