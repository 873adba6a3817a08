// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Block drivers built on top of the framework.

mod mem_disk;

pub use mem_disk::MemDisk;
