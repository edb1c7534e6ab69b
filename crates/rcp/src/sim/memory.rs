//! RDRAM model.
//!
//! Host allocations made through the simulated backend are given a physical address so that
//! simulated DMA engines can reach them.
use std::alloc::Layout;
use std::collections::BTreeMap;

use vr4300::PhysAddr;

const RDRAM_START: u32 = 0x0010_0000;
const RDRAM_END: u32 = 0x0080_0000;

#[derive(Debug, Clone, Copy)]
struct Region {
    phys: u32,
    len: usize,
}

#[derive(Default)]
pub struct Memory {
    /// Regions keyed by host address.
    by_host: BTreeMap<usize, Region>,
    /// Host addresses keyed by physical address.
    by_phys: BTreeMap<u32, usize>,
    cursor: u32,
}

impl Memory {
    fn find_gap(&self, size: u32, align: u32) -> Option<u32> {
        let fits = |start: u32| -> Option<u32> {
            let start = start.next_multiple_of(align);
            let end = start.checked_add(size)?;
            if end > RDRAM_END {
                return None;
            }

            // first region at or after `start`, and the last one before it
            let after = self.by_phys.range(start..).next();
            let before = self.by_phys.range(..start).next_back();

            if let Some((&phys, _)) = after
                && phys < end
            {
                return None;
            }

            if let Some((&phys, host)) = before {
                let len = self.by_host[host].len as u32;
                if phys + len > start {
                    return None;
                }
            }

            Some(start)
        };

        // next-fit: try after the cursor, then after every region end
        let mut candidates = std::iter::once(self.cursor.max(RDRAM_START))
            .chain(std::iter::once(RDRAM_START))
            .chain(
                self.by_phys
                    .iter()
                    .map(|(&phys, host)| phys + self.by_host[host].len as u32),
            );

        candidates.find_map(fits)
    }

    pub fn alloc(&mut self, layout: Layout) -> *mut u8 {
        let Some(phys) = self.find_gap(layout.size() as u32, layout.align() as u32) else {
            return std::ptr::null_mut();
        };

        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return ptr;
        }

        let region = Region {
            phys,
            len: layout.size(),
        };
        self.by_host.insert(ptr as usize, region);
        self.by_phys.insert(phys, ptr as usize);
        self.cursor = phys + layout.size() as u32;

        ptr
    }

    pub unsafe fn dealloc(&mut self, ptr: *mut u8, layout: Layout) {
        if let Some(region) = self.by_host.remove(&(ptr as usize)) {
            self.by_phys.remove(&region.phys);
        }

        unsafe { std::alloc::dealloc(ptr, layout) };
    }

    pub fn physical(&self, ptr: *const u8) -> Option<PhysAddr> {
        let addr = ptr as usize;
        let (&host, region) = self.by_host.range(..=addr).next_back()?;
        let offset = addr - host;
        (offset < region.len).then(|| PhysAddr(region.phys + offset as u32))
    }

    /// Returns a host pointer to `len` bytes at `addr`. Panics if the range isn't backed by a
    /// single allocation.
    pub fn host(&self, addr: PhysAddr, len: usize) -> *mut u8 {
        let addr = addr.value();
        let found = self
            .by_phys
            .range(..=addr)
            .next_back()
            .and_then(|(&phys, &host)| {
                let region = self.by_host[&host];
                let offset = (addr - phys) as usize;
                (offset + len <= region.len).then_some(host + offset)
            });

        match found {
            Some(host) => host as *mut u8,
            None => panic!("sim: access to unmapped rdram at {}+{len}", PhysAddr(addr)),
        }
    }

    pub fn read(&self, addr: PhysAddr, out: &mut [u8]) {
        let ptr = self.host(addr, out.len());
        unsafe { std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), out.len()) };
    }

    pub fn write(&self, addr: PhysAddr, data: &[u8]) {
        let ptr = self.host(addr, data.len());
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
    }

    /// Reads a word as the CPU stored it.
    pub fn read_u32(&self, addr: PhysAddr) -> u32 {
        let mut bytes = [0; 4];
        self.read(addr, &mut bytes);
        u32::from_ne_bytes(bytes)
    }

    /// Reads a double word as the CPU stored it.
    pub fn read_u64(&self, addr: PhysAddr) -> u64 {
        let mut bytes = [0; 8];
        self.read(addr, &mut bytes);
        u64::from_ne_bytes(bytes)
    }

    pub fn write_u32(&self, addr: PhysAddr, value: u32) {
        self.write(addr, &value.to_ne_bytes());
    }

    pub fn write_u16(&self, addr: PhysAddr, value: u16) {
        self.write(addr, &value.to_ne_bytes());
    }

    pub fn is_mapped(&self, addr: PhysAddr, len: usize) -> bool {
        let addr = addr.value();
        self.by_phys
            .range(..=addr)
            .next_back()
            .is_some_and(|(&phys, host)| (addr - phys) as usize + len <= self.by_host[host].len)
    }
}
