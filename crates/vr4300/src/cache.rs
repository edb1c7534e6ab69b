//! Data cache maintenance.
//!
//! Every operation works on whole cache lines. Callers that don't own the complete lines of a
//! range must not invalidate it, since unrelated dirty data sharing the lines would be lost.

use crate::CACHE_LINE;

/// `cache` instruction operations on the primary data cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    HitInvalidate = 0x11,
    HitWritebackInvalidate = 0x15,
    HitWriteback = 0x19,
}

/// Returns the addresses of every cache line touched by the range `[addr, addr + len)`.
pub fn lines(addr: usize, len: usize) -> impl Iterator<Item = usize> {
    let start = addr & !(CACHE_LINE - 1);
    let end = if len == 0 { start } else { addr + len };
    (start..end).step_by(CACHE_LINE)
}

#[cfg(target_arch = "mips")]
#[inline(always)]
unsafe fn line_op<const OP: u8>(line: usize) {
    unsafe {
        std::arch::asm!(
            "cache {op}, 0({addr})",
            op = const OP,
            addr = in(reg) line,
            options(nostack, preserves_flags),
        );
    }
}

#[cfg(target_arch = "mips")]
unsafe fn apply<const OP: u8>(addr: usize, len: usize) {
    for line in lines(addr, len) {
        unsafe { line_op::<OP>(line) };
    }

    unsafe { std::arch::asm!("sync", options(nostack, preserves_flags)) };
}

// hosts keep their caches coherent with every agent that can observe memory, so a fence is all
// that's needed to order the accesses.
#[cfg(not(target_arch = "mips"))]
unsafe fn apply<const OP: u8>(_addr: usize, _len: usize) {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Writes every dirty line in `[addr, addr + len)` back to memory.
///
/// # Safety
/// The range must be mapped through KSEG0.
pub unsafe fn writeback(addr: *const u8, len: usize) {
    unsafe { apply::<{ Op::HitWriteback as u8 }>(addr as usize, len) }
}

/// Discards every line in `[addr, addr + len)` without writing it back.
///
/// # Safety
/// The range must be mapped through KSEG0 and the caller must own every line it touches.
pub unsafe fn invalidate(addr: *mut u8, len: usize) {
    unsafe { apply::<{ Op::HitInvalidate as u8 }>(addr as usize, len) }
}

/// Writes back and then discards every line in `[addr, addr + len)`.
///
/// # Safety
/// The range must be mapped through KSEG0.
pub unsafe fn writeback_invalidate(addr: *mut u8, len: usize) {
    unsafe { apply::<{ Op::HitWritebackInvalidate as u8 }>(addr as usize, len) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_ranges() {
        assert_eq!(lines(0x100, 0).count(), 0);
        assert_eq!(lines(0x100, 1).collect::<Vec<_>>(), vec![0x100]);
        assert_eq!(lines(0x10F, 2).collect::<Vec<_>>(), vec![0x100, 0x110]);
        assert_eq!(lines(0x100, 0x40).count(), 4);
    }
}
