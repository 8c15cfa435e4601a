//! Memory access for reading and writing target memory on behalf of the
//! host.
//!
//! The engine never dereferences host-supplied addresses itself.  All
//! access goes through a [`MemoryAccessor`], injected when the engine is
//! created.
//!
//! # Possible implementations
//!
//! - On the target itself: direct volatile access, see [`RamAccessor`]
//! - For tests and PC-based simulation: a window of bytes at a fixed base
//!   address, see [`BufferAccessor`]
//! - On a hosted OS: an accessor restricted to a set of registered
//!   variables, or one backed by a debug interface
//!
//! # Address Space
//!
//! Addresses are absolute, as they appear in the target's memory map.
//! Multi-byte values are exchanged as little-endian byte sequences.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Memory accessor trait.
pub trait MemoryAccessor {
    /// Read `buf.len()` bytes starting at `addr`.
    ///
    /// Reads of 1, 2, 4 or 8 bytes are value reads, and should be performed
    /// as a single access of that width where the target supports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessFault`] if any part of the range is not
    /// readable.  Nothing is guaranteed about `buf` in that case.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `addr`.
    ///
    /// As for [`Self::read()`], writes of 1, 2, 4 or 8 bytes are value
    /// writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessFault`] if any part of the range is not
    /// writable, in which case no part of it may have been written.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

impl<T: MemoryAccessor + ?Sized> MemoryAccessor for &mut T {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }
}

/// Width of a value written or logged by the host
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    U8 = 1,
    U16 = 2,
    U32 = 4,
    U64 = 8,
}

impl DataWidth {
    /// Decode a size code from the wire.  8-byte values are only accepted
    /// if `wide` is set.
    pub fn from_code(code: u8, wide: bool) -> Result<Self> {
        match code {
            1 => Ok(DataWidth::U8),
            2 => Ok(DataWidth::U16),
            4 => Ok(DataWidth::U32),
            8 if wide => Ok(DataWidth::U64),
            _ => Err(Error::InvalidSize),
        }
    }

    /// Width in bytes
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// Direct memory access, for use on the target.
///
/// Value-sized, naturally aligned accesses use a single volatile access of
/// that width.  Anything else is performed byte by byte.
#[derive(Clone, Copy)]
pub struct RamAccessor;

impl RamAccessor {
    /// Create a new RamAccessor.
    ///
    /// # Safety
    ///
    /// The host can then read and write any address.  The caller must
    /// ensure that every address the authenticated host may supply is valid
    /// for the access width requested, on a target where a `u32` address
    /// is a real pointer.
    pub const unsafe fn new() -> Self {
        Self {}
    }
}

impl MemoryAccessor for RamAccessor {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let ptr = addr as usize;
        // SAFETY: validity of host addresses is the obligation taken on in
        // `RamAccessor::new()`
        unsafe {
            match buf.len() {
                2 if ptr % 2 == 0 => {
                    let value = core::ptr::read_volatile(ptr as *const u16);
                    buf.copy_from_slice(&value.to_le_bytes());
                }
                4 if ptr % 4 == 0 => {
                    let value = core::ptr::read_volatile(ptr as *const u32);
                    buf.copy_from_slice(&value.to_le_bytes());
                }
                8 if ptr % 8 == 0 => {
                    let value = core::ptr::read_volatile(ptr as *const u64);
                    buf.copy_from_slice(&value.to_le_bytes());
                }
                _ => {
                    for (i, byte) in buf.iter_mut().enumerate() {
                        *byte = core::ptr::read_volatile((ptr + i) as *const u8);
                    }
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let ptr = addr as usize;
        // SAFETY: as for read()
        unsafe {
            match data.len() {
                2 if ptr % 2 == 0 => {
                    let value = u16::from_le_bytes([data[0], data[1]]);
                    core::ptr::write_volatile(ptr as *mut u16, value);
                }
                4 if ptr % 4 == 0 => {
                    let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    core::ptr::write_volatile(ptr as *mut u32, value);
                }
                8 if ptr % 8 == 0 => {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(data);
                    core::ptr::write_volatile(ptr as *mut u64, u64::from_le_bytes(bytes));
                }
                _ => {
                    for (i, byte) in data.iter().enumerate() {
                        core::ptr::write_volatile((ptr + i) as *mut u8, *byte);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Simulated memory: `N` bytes mapped at `base`.  Any access that is not
/// wholly inside `[base, base + N)` faults.
#[derive(Debug, Clone)]
pub struct BufferAccessor<const N: usize> {
    base: u32,
    mem: [u8; N],
}

impl<const N: usize> BufferAccessor<N> {
    /// Create zero-filled memory at `base`
    pub const fn new(base: u32) -> Self {
        Self { base, mem: [0; N] }
    }

    /// Copy `data` into memory at `addr`
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.write(addr, data)
    }

    /// Borrow `len` bytes at `addr`
    pub fn peek(&self, addr: u32, len: usize) -> Result<&[u8]> {
        let start = self.offset(addr, len)?;
        Ok(&self.mem[start..start + len])
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize> {
        let start = addr.checked_sub(self.base).ok_or(Error::AccessFault)? as usize;
        match start.checked_add(len) {
            Some(end) if end <= N => Ok(start),
            _ => Err(Error::AccessFault),
        }
    }
}

impl<const N: usize> MemoryAccessor for BufferAccessor<N> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = self.offset(addr, data.len())?;
        self.mem[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
