// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Block requests and transfers: validation, memory binding, dispatch and completion.

mod dma;
mod free;
pub(crate) mod queue;
mod request;
pub(crate) mod xfer;

pub use dma::{bind, DmaAttr, DmaCookie, DmaTemplate};
pub use free::{validate_free, FreeExtent, FreeList};
pub use queue::SubmitPolicy;
pub use request::{IoBuf, Request, RequestType};
pub use xfer::{xfer_flags, DirectBuf, Pending, Xfer, XferMem};
