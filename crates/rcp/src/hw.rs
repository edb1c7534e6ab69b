//! Hardware backends.
//!
//! The drivers never touch the bus directly. They go through the [`Hardware`] installed at boot,
//! which maps physical addresses to register accesses, translates pointers into the physical
//! addresses DMA engines expect and performs cache maintenance.
use std::alloc::Layout;
use std::sync::OnceLock;

use vr4300::PhysAddr;

/// A backend that gives access to the RCP.
pub trait Hardware: Send + Sync {
    /// Loads a 32-bit word from the physical address `addr`.
    fn load(&self, addr: PhysAddr) -> u32;

    /// Stores a 32-bit word to the physical address `addr`.
    fn store(&self, addr: PhysAddr, value: u32);

    /// Translates a pointer into RDRAM into its physical address. Returns `None` if the pointer
    /// isn't reachable by the RCP.
    fn physical(&self, ptr: *const u8) -> Option<PhysAddr>;

    /// Returns an alias of `ptr` through which accesses bypass the data cache.
    fn uncached(&self, ptr: *mut u8) -> *mut u8;

    /// Writes dirty cache lines in the range back to memory.
    fn writeback(&self, ptr: *const u8, len: usize);

    /// Discards cache lines in the range.
    fn invalidate(&self, ptr: *mut u8, len: usize);

    /// Allocates zeroed memory that DMA engines can reach. Returns null on failure.
    fn alloc(&self, layout: Layout) -> *mut u8;

    /// Releases memory returned by [`Hardware::alloc`].
    ///
    /// # Safety
    /// `ptr` must come from [`Hardware::alloc`] with the same `layout`.
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout);

    /// Masks the RCP interrupt for the current thread of execution. Returns a token to pass to
    /// [`Hardware::restore_interrupts`].
    fn mask_interrupts(&self) -> bool;

    /// Undoes the matching [`Hardware::mask_interrupts`].
    fn restore_interrupts(&self, token: bool);
}

static BACKEND: OnceLock<&'static dyn Hardware> = OnceLock::new();

/// Installs the hardware backend. Returns `false` if a backend was already installed, in which
/// case `hw` is ignored.
pub fn install(hw: &'static dyn Hardware) -> bool {
    let mut installed = false;
    BACKEND.get_or_init(|| {
        installed = true;
        hw
    });

    if installed {
        tracing::debug!("hardware backend installed");
    }

    installed
}

/// Returns the installed hardware backend.
///
/// On the console the native backend is installed on first use.
#[inline]
pub fn get() -> &'static dyn Hardware {
    #[cfg(target_arch = "mips")]
    {
        *BACKEND.get_or_init(|| &native::Native)
    }

    #[cfg(not(target_arch = "mips"))]
    {
        match BACKEND.get() {
            Some(hw) => *hw,
            None => panic!("no hardware backend installed"),
        }
    }
}

#[cfg(target_arch = "mips")]
mod native {
    use std::alloc::Layout;

    use vr4300::{Address, PhysAddr, cache, cop0};

    use super::Hardware;

    /// Direct access to the console.
    pub struct Native;

    impl Hardware for Native {
        #[inline(always)]
        fn load(&self, addr: PhysAddr) -> u32 {
            let ptr = addr.uncached().value() as usize as *const u32;
            unsafe { ptr.read_volatile() }
        }

        #[inline(always)]
        fn store(&self, addr: PhysAddr, value: u32) {
            let ptr = addr.uncached().value() as usize as *mut u32;
            unsafe { ptr.write_volatile(value) }
        }

        fn physical(&self, ptr: *const u8) -> Option<PhysAddr> {
            Address(ptr as usize as u32).physical()
        }

        fn uncached(&self, ptr: *mut u8) -> *mut u8 {
            match self.physical(ptr) {
                Some(phys) => phys.uncached().value() as usize as *mut u8,
                None => ptr,
            }
        }

        fn writeback(&self, ptr: *const u8, len: usize) {
            unsafe { cache::writeback(ptr, len) }
        }

        fn invalidate(&self, ptr: *mut u8, len: usize) {
            unsafe { cache::invalidate(ptr, len) }
        }

        fn alloc(&self, layout: Layout) -> *mut u8 {
            unsafe { std::alloc::alloc_zeroed(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            unsafe { std::alloc::dealloc(ptr, layout) }
        }

        fn mask_interrupts(&self) -> bool {
            cop0::disable_interrupts()
        }

        fn restore_interrupts(&self, token: bool) {
            cop0::restore_interrupts(token);
        }
    }
}
