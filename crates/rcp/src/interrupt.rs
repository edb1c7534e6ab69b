//! MIPS interface (MI) and the RCP interrupt demultiplexer.
//!
//! Every RCP interrupt source shares the same CPU interrupt line. The demultiplexer reads the
//! pending register and calls the handler registered for each pending, unmasked source.
//! Handlers run in interrupt context while holding a [`CriticalSection`]: they must not block.
use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;

use bitos::bitos;
use strum::FromRepr;

use crate::hw;
use crate::mmio::{Reg, reg_value};

/// An interrupt source of the RCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Source {
    /// RSP break or software interrupt.
    Sp = 0,
    /// SI DMA to or from PIF RAM finished.
    Si = 1,
    /// Playback of an audio buffer started.
    Ai = 2,
    /// Vertical interrupt line reached.
    Vi = 3,
    /// PI DMA finished.
    Pi = 4,
    /// RDP full sync.
    Dp = 5,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Sp,
        Source::Si,
        Source::Ai,
        Source::Vi,
        Source::Pi,
        Source::Dp,
    ];
}

/// A set of interrupt sources, laid out the way the pending and mask registers read.
#[bitos(32)]
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Sources {
    #[bits(0)]
    pub sp: bool,
    #[bits(1)]
    pub si: bool,
    #[bits(2)]
    pub ai: bool,
    #[bits(3)]
    pub vi: bool,
    #[bits(4)]
    pub pi: bool,
    #[bits(5)]
    pub dp: bool,
}

impl Sources {
    pub fn all() -> Sources {
        Sources::from_bits(0x3F)
    }

    pub fn contains(self, source: Source) -> bool {
        self.to_bits() & (1 << source as u32) != 0
    }

    pub fn is_empty(self) -> bool {
        self.to_bits() & 0x3F == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Source> {
        Source::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// Encodes this set the way the mask register expects it on writes: two bits per source, the
    /// low one clears and the high one sets.
    fn write_mask(self, set: bool) -> u32 {
        self.iter()
            .map(|s| 1 << (2 * s as u32 + set as u32))
            .fold(0, |acc, bit| acc | bit)
    }
}

impl From<Source> for Sources {
    fn from(value: Source) -> Self {
        Sources::from_bits(1 << value as u32)
    }
}

impl std::ops::BitOr for Sources {
    type Output = Sources;

    fn bitor(self, rhs: Self) -> Self::Output {
        Sources::from_bits(self.to_bits() | rhs.to_bits())
    }
}

impl std::ops::BitAnd for Sources {
    type Output = Sources;

    fn bitand(self, rhs: Self) -> Self::Output {
        Sources::from_bits(self.to_bits() & rhs.to_bits())
    }
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        macro_rules! debug {
            ($($ident:ident),*) => {
                $(
                    if self.$ident() {
                        set.entry(&stringify!($ident));
                    }
                )*
            };
        }

        debug! { sp, si, ai, vi, pi, dp }

        set.finish()
    }
}

#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Mode {
    #[bits(0..7)]
    pub init_length: u8,
    #[bits(7)]
    pub init: bool,
    #[bits(8)]
    pub ebus: bool,
    #[bits(9)]
    pub upper: bool,
}

/// Write view of the mode register.
#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ModeWrite {
    #[bits(0..7)]
    pub init_length: u8,
    #[bits(7)]
    pub clear_init: bool,
    #[bits(8)]
    pub set_init: bool,
    #[bits(9)]
    pub clear_ebus: bool,
    #[bits(10)]
    pub set_ebus: bool,
    /// Acknowledges the DP interrupt.
    #[bits(11)]
    pub clear_dp: bool,
    #[bits(12)]
    pub clear_upper: bool,
    #[bits(13)]
    pub set_upper: bool,
}

reg_value!(Sources, Mode, ModeWrite);

pub const BASE: u32 = 0x0430_0000;

pub mod regs {
    use super::*;

    pub const MODE: Reg<Mode> = Reg::at(BASE);
    pub const MODE_WRITE: Reg<ModeWrite> = Reg::at(BASE);
    pub const VERSION: Reg = Reg::at(BASE + 0x04);
    pub const PENDING: Reg<Sources> = Reg::at(BASE + 0x08);
    pub const MASK: Reg<Sources> = Reg::at(BASE + 0x0C);
    pub const MASK_WRITE: Reg = Reg::at(BASE + 0x0C);
}

/// Proof that the RCP interrupt is masked for the current thread of execution.
pub struct CriticalSection {
    _not_send: PhantomData<*const ()>,
}

impl CriticalSection {
    /// # Safety
    /// The RCP interrupt must be masked, or the caller must be the interrupt handler, for the
    /// whole lifetime of the token.
    pub unsafe fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

struct Restore(bool);

impl Drop for Restore {
    fn drop(&mut self) {
        hw::get().restore_interrupts(self.0);
    }
}

/// Runs `f` with the RCP interrupt masked.
pub fn free<R>(f: impl FnOnce(&CriticalSection) -> R) -> R {
    let _restore = Restore(hw::get().mask_interrupts());
    let cs = unsafe { CriticalSection::new() };
    f(&cs)
}

/// State shared between thread mode and interrupt handlers. It can only be borrowed inside a
/// critical section.
pub struct IrqCell<T> {
    inner: RefCell<T>,
}

// SAFETY: access is serialized by critical sections
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    pub fn borrow<'a>(&'a self, _cs: &'a CriticalSection) -> Ref<'a, T> {
        self.inner.borrow()
    }

    pub fn borrow_mut<'a>(&'a self, _cs: &'a CriticalSection) -> RefMut<'a, T> {
        self.inner.borrow_mut()
    }

    pub fn replace(&self, cs: &CriticalSection, value: T) -> T {
        std::mem::replace(&mut *self.borrow_mut(cs), value)
    }
}

/// An interrupt handler.
pub type Handler = fn(&CriticalSection);

static HANDLERS: IrqCell<[Option<Handler>; 6]> = IrqCell::new([None; 6]);

/// Registers the handler of `source`, replacing the previous one.
pub fn set_handler(source: Source, handler: Handler) {
    free(|cs| HANDLERS.borrow_mut(cs)[source as usize] = Some(handler));
}

/// Returns the handler registered for `source`.
pub fn handler(source: Source) -> Option<Handler> {
    free(|cs| HANDLERS.borrow(cs)[source as usize])
}

/// Unmasks the given sources.
pub fn enable(sources: impl Into<Sources>) {
    let sources = sources.into();
    tracing::trace!("enabling interrupts {sources:?}");
    regs::MASK_WRITE.store(sources.write_mask(true));
}

/// Masks the given sources.
pub fn disable(sources: impl Into<Sources>) {
    let sources = sources.into();
    tracing::trace!("disabling interrupts {sources:?}");
    regs::MASK_WRITE.store(sources.write_mask(false));
}

/// Sources that are currently asserted, masked or not.
pub fn pending() -> Sources {
    regs::PENDING.load()
}

/// Sources that are currently unmasked.
pub fn enabled() -> Sources {
    regs::MASK.load()
}

/// Calls the handler of every pending and unmasked source.
///
/// # Panics
/// Panics if a raised source has no handler.
pub fn dispatch(cs: &CriticalSection) {
    let raised = pending() & enabled();
    for source in raised.iter() {
        let handler = HANDLERS.borrow(cs)[source as usize];
        match handler {
            Some(handler) => handler(cs),
            None => panic!("unhandled interrupt {source:?}"),
        }
    }
}
