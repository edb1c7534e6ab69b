//! Drivers for the Reality Co-Processor (RCP) of the N64 and the peripherals hanging off it.
//!
//! Every register access goes through a [`hw::Hardware`] backend. On the console itself this is
//! plain volatile access through KSEG1; elsewhere the [`sim`] backend models the RCP closely
//! enough to exercise the drivers.

pub mod audio;
pub mod carts;
pub mod cpu;
pub mod hw;
pub mod interrupt;
pub mod mmio;
pub mod periph;
pub mod rdp;
pub mod rsp;
pub mod rspq;
pub mod serial;
pub mod sync;
pub mod texture;
pub mod video;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use vr4300::{Address, CACHE_LINE, PhysAddr};
