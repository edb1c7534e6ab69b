//! Memory-mapped registers and byte-granular I/O over word-only buses.
#[cfg(test)]
mod test;

use std::marker::PhantomData;

use vr4300::PhysAddr;

use crate::hw;

/// A value that fits a 32-bit register.
pub trait RegValue: Copy {
    fn from_raw(raw: u32) -> Self;
    fn to_raw(self) -> u32;
}

impl RegValue for u32 {
    #[inline(always)]
    fn from_raw(raw: u32) -> Self {
        raw
    }

    #[inline(always)]
    fn to_raw(self) -> u32 {
        self
    }
}

impl RegValue for PhysAddr {
    #[inline(always)]
    fn from_raw(raw: u32) -> Self {
        PhysAddr(raw)
    }

    #[inline(always)]
    fn to_raw(self) -> u32 {
        self.value()
    }
}

/// Implements [`RegValue`] for 32-bit bitos structs.
macro_rules! reg_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::mmio::RegValue for $ty {
                #[inline(always)]
                fn from_raw(raw: u32) -> Self {
                    <$ty>::from_bits(raw)
                }

                #[inline(always)]
                fn to_raw(self) -> u32 {
                    self.to_bits()
                }
            }
        )*
    };
}

pub(crate) use reg_value;

/// A 32-bit register at a fixed physical address.
pub struct Reg<T = u32> {
    addr: PhysAddr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Reg<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Reg<T> {}

impl<T: RegValue> Reg<T> {
    pub const fn at(addr: u32) -> Self {
        Self {
            addr: PhysAddr(addr),
            _marker: PhantomData,
        }
    }

    #[inline(always)]
    pub const fn addr(&self) -> PhysAddr {
        self.addr
    }

    #[inline(always)]
    pub fn load(&self) -> T {
        T::from_raw(hw::get().load(self.addr))
    }

    #[inline(always)]
    pub fn store(&self, value: T) {
        hw::get().store(self.addr, value.to_raw());
    }

    /// Loads the register, passes it through `f` and stores the result.
    pub fn modify(&self, f: impl FnOnce(T) -> T) {
        self.store(f(self.load()));
    }
}

/// A bus that only supports aligned 32-bit accesses.
pub trait Bus {
    fn load(&self, addr: PhysAddr) -> u32;
    fn store(&self, addr: PhysAddr, value: u32);
}

/// The system bus, accessed without any additional synchronization.
pub struct SysAd;

impl Bus for SysAd {
    #[inline(always)]
    fn load(&self, addr: PhysAddr) -> u32 {
        hw::get().load(addr)
    }

    #[inline(always)]
    fn store(&self, addr: PhysAddr, value: u32) {
        hw::get().store(addr, value);
    }
}

/// Copies `data` to `addr` on `bus`. Words only partially covered by `data` are read first and
/// merged, so write-only ranges may misbehave at unaligned edges.
pub fn write_io_on(bus: &impl Bus, addr: PhysAddr, mut data: &[u8]) {
    let mut addr = addr.value();
    while !data.is_empty() {
        let word = PhysAddr(addr & !0x3);
        let offset = (addr & 0x3) as usize;
        let n = (4 - offset).min(data.len());

        let mut bytes = if n == 4 {
            [0; 4]
        } else {
            bus.load(word).to_be_bytes()
        };

        bytes[offset..offset + n].copy_from_slice(&data[..n]);
        bus.store(word, u32::from_be_bytes(bytes));

        addr += n as u32;
        data = &data[n..];
    }
}

/// Copies from `addr` on `bus` into `out`. Every access is a whole-word load.
pub fn read_io_on(bus: &impl Bus, addr: PhysAddr, mut out: &mut [u8]) {
    let mut addr = addr.value();
    while !out.is_empty() {
        let word = PhysAddr(addr & !0x3);
        let offset = (addr & 0x3) as usize;
        let n = (4 - offset).min(out.len());

        let bytes = bus.load(word).to_be_bytes();
        out[..n].copy_from_slice(&bytes[offset..offset + n]);

        addr += n as u32;
        out = &mut out[n..];
    }
}

/// Copies `data` to `addr` on the system bus.
pub fn write_io(addr: PhysAddr, data: &[u8]) {
    write_io_on(&SysAd, addr, data);
}

/// Copies from `addr` on the system bus into `out`.
pub fn read_io(addr: PhysAddr, out: &mut [u8]) {
    read_io_on(&SysAd, addr, out);
}
