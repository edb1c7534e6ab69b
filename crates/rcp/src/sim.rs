//! Host model of the RCP.
//!
//! The model is good enough to drive every driver in this crate from a regular test binary:
//! RDRAM is backed by host allocations, DMA engines complete synchronously and co-processors
//! are emulated at a high level. Interrupts are delivered by a dedicated thread which takes the
//! same lock thread-mode critical sections take, so handlers never run concurrently with one.
pub mod bus;
pub mod memory;
pub mod pif;
pub mod queue;
pub mod raster;

use std::alloc::Layout;
use std::cell::{Cell, RefCell};
use std::sync::{Condvar, Mutex, MutexGuard, Once, OnceLock, PoisonError};
use std::time::Duration;

use vr4300::PhysAddr;

pub use bus::State;
pub use pif::{Controller, Pak};

use crate::hw::{self, Hardware};
use crate::interrupt;

/// The simulated console.
pub struct Sim {
    state: Mutex<State>,
    raised: Condvar,
    exclusive: Mutex<()>,
}

/// Held while interrupts are masked, both by thread-mode critical sections and by the interrupt
/// thread while it dispatches.
static IRQ_LOCK: Mutex<()> = Mutex::new(());

static SIM: OnceLock<Sim> = OnceLock::new();
static START: Once = Once::new();

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

impl Sim {
    /// Installs the simulated console as the hardware backend and starts its interrupt and timer
    /// threads. Subsequent calls return the same instance.
    pub fn install() -> &'static Sim {
        let sim = SIM.get_or_init(|| Sim {
            state: Mutex::new(State::new()),
            raised: Condvar::new(),
            exclusive: Mutex::new(()),
        });

        START.call_once(|| {
            if !hw::install(sim) {
                panic!("sim: another hardware backend is installed");
            }

            std::thread::Builder::new()
                .name("sim-irq".into())
                .spawn(move || sim.irq_thread())
                .expect("failed to spawn interrupt thread");

            std::thread::Builder::new()
                .name("sim-timer".into())
                .spawn(move || sim.timer_thread())
                .expect("failed to spawn timer thread");

            tracing::debug!("simulated rcp started");
        });

        sim
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the model.
    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state);
        self.notify_if_raised(&state);
        result
    }

    fn notify_if_raised(&self, state: &State) {
        if !(state.mi.pending & state.mi.mask).is_empty() {
            self.raised.notify_all();
        }
    }

    fn irq_thread(&self) {
        loop {
            {
                let mut state = self.lock();
                while (state.mi.pending & state.mi.mask).is_empty() {
                    state = self
                        .raised
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }

            interrupt::free(interrupt::dispatch);
        }
    }

    fn timer_thread(&self) {
        loop {
            std::thread::sleep(Duration::from_millis(1));
            self.with(|state| state.tick());
        }
    }

    /// Inserts a cartridge ROM.
    pub fn set_rom(&self, rom: Vec<u8>) {
        self.with(|state| state.cart.rom = rom);
    }

    /// Returns and clears everything written to the ISViewer.
    pub fn take_isviewer_output(&self) -> Vec<u8> {
        self.with(|state| std::mem::take(&mut state.cart.log))
    }

    /// Connects or disconnects a controller.
    pub fn set_controller(&self, port: usize, controller: Option<Controller>) {
        self.with(|state| state.pif.ports[port] = controller);
    }

    /// Inserts an EEPROM of `size` bytes (512 or 2048), or removes it.
    pub fn set_eeprom(&self, size: Option<usize>) {
        self.with(|state| state.pif.eeprom = size.map(|size| vec![0; size]));
    }
}

impl Hardware for Sim {
    fn load(&self, addr: PhysAddr) -> u32 {
        self.with(|state| state.load(addr.value()))
    }

    fn store(&self, addr: PhysAddr, value: u32) {
        self.with(|state| state.store(addr.value(), value));
    }

    fn physical(&self, ptr: *const u8) -> Option<PhysAddr> {
        self.lock().memory.physical(ptr)
    }

    fn uncached(&self, ptr: *mut u8) -> *mut u8 {
        ptr
    }

    fn writeback(&self, _ptr: *const u8, _len: usize) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }

    fn invalidate(&self, _ptr: *mut u8, _len: usize) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }

    fn alloc(&self, layout: Layout) -> *mut u8 {
        self.lock().memory.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.lock().memory.dealloc(ptr, layout) }
    }

    fn mask_interrupts(&self) -> bool {
        let depth = DEPTH.get();
        if depth == 0 {
            let guard = IRQ_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            GUARD.with_borrow_mut(|slot| *slot = Some(guard));
        }

        DEPTH.set(depth + 1);
        depth == 0
    }

    fn restore_interrupts(&self, token: bool) {
        let depth = DEPTH.get() - 1;
        DEPTH.set(depth);
        if depth == 0 {
            debug_assert!(token);
            GUARD.with_borrow_mut(|slot| *slot = None);
        }
    }
}

/// Serializes tests that use devices with global driver state.
pub fn exclusive() -> MutexGuard<'static, ()> {
    Sim::install()
        .exclusive
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
