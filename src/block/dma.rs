// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
//
// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Binding of guest memory buffers to DMA cookies.

use std::cmp;

use vm_memory::{GuestAddress, GuestAddressSpace, GuestMemory, GuestMemoryError};

use crate::{Error, Result};

/// DMA constraints of a device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DmaAttr {
    /// Lowest address the device can reach.
    pub addr_lo: u64,
    /// Highest address the device can reach (inclusive).
    pub addr_hi: u64,
    /// Maximum length of a single cookie.
    pub seg_max: u32,
    /// Maximum number of cookies describing one transfer.
    pub sgl_len: u32,
    /// Required alignment of the start of each buffer region.
    pub align: u64,
}

impl Default for DmaAttr {
    fn default() -> Self {
        DmaAttr {
            addr_lo: 0,
            addr_hi: u64::MAX,
            seg_max: u32::MAX,
            sgl_len: 256,
            align: 1,
        }
    }
}

/// One physically contiguous piece of a DMA buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DmaCookie {
    pub addr: GuestAddress,
    pub len: u32,
}

/// The memory a device performs DMA against, together with the device's DMA constraints.
pub struct DmaTemplate<M: GuestAddressSpace> {
    pub mem: M,
    pub attr: DmaAttr,
}

impl<M: GuestAddressSpace> DmaTemplate<M> {
    pub fn new(mem: M, attr: DmaAttr) -> Self {
        DmaTemplate { mem, attr }
    }

    /// Binds `regions` to cookies usable by the device.
    pub fn bind(&self, regions: &[(GuestAddress, usize)]) -> Result<Vec<DmaCookie>> {
        bind(&*self.mem.memory(), &self.attr, regions)
    }
}

/// Describes the `(address, length)` regions of a buffer as a list of cookies honoring `attr`.
///
/// Regions are split when longer than `attr.seg_max`. Empty regions are skipped.
pub fn bind<M: GuestMemory>(
    mem: &M,
    attr: &DmaAttr,
    regions: &[(GuestAddress, usize)],
) -> Result<Vec<DmaCookie>> {
    if attr.seg_max == 0 || attr.sgl_len == 0 {
        return Err(Error::DmaBind("empty dma attributes"));
    }
    let align = cmp::max(attr.align, 1);
    let mut cookies = Vec::new();

    for &(addr, len) in regions {
        if len == 0 {
            continue;
        }
        let len = len as u64;

        // Check that the whole region is backed by guest memory.
        let last = addr
            .0
            .checked_add(len - 1)
            .map(GuestAddress)
            .ok_or(Error::GuestMemory(GuestMemoryError::InvalidGuestAddress(
                addr,
            )))?;
        if !mem.address_in_range(addr) || !mem.address_in_range(last) {
            return Err(Error::GuestMemory(GuestMemoryError::InvalidGuestAddress(
                addr,
            )));
        }

        if addr.0 < attr.addr_lo || last.0 > attr.addr_hi {
            return Err(Error::DmaBind("buffer outside of the dma window"));
        }
        if addr.0 % align != 0 {
            return Err(Error::DmaBind("misaligned buffer"));
        }

        let mut offset = 0;
        while offset < len {
            let chunk = cmp::min(len - offset, u64::from(attr.seg_max));
            if cookies.len() == attr.sgl_len as usize {
                return Err(Error::DmaBind("too many cookies"));
            }
            cookies.push(DmaCookie {
                addr: GuestAddress(addr.0 + offset),
                // `chunk` is bounded by `seg_max`, so this can't truncate.
                len: chunk as u32,
            });
            offset += chunk;
        }
    }

    if cookies.is_empty() {
        return Err(Error::DmaBind("empty buffer"));
    }
    Ok(cookies)
}

#[cfg(test)]
mod tests {
    use super::*;

    use vm_memory::GuestMemoryMmap;

    fn mem() -> GuestMemoryMmap<()> {
        GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), 0x10_0000)]).unwrap()
    }

    #[test]
    fn test_bind_split() {
        let mem = mem();
        let attr = DmaAttr {
            seg_max: 0x1000,
            ..Default::default()
        };

        let cookies = bind(
            &mem,
            &attr,
            &[(GuestAddress(0x1000), 0x2800), (GuestAddress(0x8000), 0x200)],
        )
        .unwrap();
        assert_eq!(
            cookies,
            vec![
                DmaCookie {
                    addr: GuestAddress(0x1000),
                    len: 0x1000
                },
                DmaCookie {
                    addr: GuestAddress(0x2000),
                    len: 0x1000
                },
                DmaCookie {
                    addr: GuestAddress(0x3000),
                    len: 0x800
                },
                DmaCookie {
                    addr: GuestAddress(0x8000),
                    len: 0x200
                },
            ]
        );
    }

    #[test]
    fn test_bind_limits() {
        let mem = mem();

        let attr = DmaAttr {
            seg_max: 0x1000,
            sgl_len: 2,
            ..Default::default()
        };
        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0), 0x3000)]),
            Err(Error::DmaBind(_))
        ));

        let attr = DmaAttr {
            addr_hi: 0xffff,
            ..Default::default()
        };
        assert!(bind(&mem, &attr, &[(GuestAddress(0xf000), 0x1000)]).is_ok());
        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0xf000), 0x1001)]),
            Err(Error::DmaBind(_))
        ));

        let attr = DmaAttr {
            align: 0x200,
            ..Default::default()
        };
        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0x100), 0x200)]),
            Err(Error::DmaBind(_))
        ));
    }

    #[test]
    fn test_bind_outside_memory() {
        let mem = mem();
        let attr = DmaAttr::default();

        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0xf_f000), 0x2000)]),
            Err(Error::GuestMemory(_))
        ));
        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0x20_0000), 0x200)]),
            Err(Error::GuestMemory(_))
        ));
        assert!(matches!(
            bind(&mem, &attr, &[(GuestAddress(0), 0)]),
            Err(Error::DmaBind(_))
        ));
    }
}
