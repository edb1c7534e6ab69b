//! Primitives to hand data between threads and interrupt handlers.
#[cfg(test)]
mod test;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU8, AtomicUsize, Ordering};
use std::thread::Thread;
use std::time::{Duration, Instant};

use crate::interrupt::{self, CriticalSection, IrqCell};

/// A one-bit latch threads can wait on. Signalling is wait-free, so interrupt handlers may do it.
pub struct Note {
    flag: AtomicBool,
    waiters: IrqCell<Vec<Thread>>,
}

impl Note {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            waiters: IrqCell::new(Vec::new()),
        }
    }

    /// Sets the latch and wakes every waiter.
    pub fn signal(&self, cs: &CriticalSection) {
        self.flag.store(true, Ordering::Release);
        for thread in self.waiters.borrow_mut(cs).drain(..) {
            thread.unpark();
        }
    }

    /// Like [`Note::signal`], for callers in thread mode.
    pub fn notify(&self) {
        interrupt::free(|cs| self.signal(cs));
    }

    /// Resets the latch.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Blocks until the latch is set or `timeout` elapses. Returns whether the latch was set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let set = interrupt::free(|cs| {
                if self.flag.load(Ordering::Acquire) {
                    return true;
                }

                let current = std::thread::current();
                let mut waiters = self.waiters.borrow_mut(cs);
                if !waiters.iter().any(|t| t.id() == current.id()) {
                    waiters.push(current);
                }

                false
            });

            if set {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            std::thread::park_timeout(deadline - now);
        }
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

const UNPUBLISHED: i8 = -1;

/// Passes values from a single writer thread to a single interrupt handler using a double buffer.
///
/// The reader sees at most one update per read, and always the most recent one.
pub struct IntrInput<T> {
    slots: [IrqCell<Option<T>>; 2],
    published: AtomicI8,
    next: AtomicU8,
    current: AtomicU8,
}

impl<T: Clone + Send> IntrInput<T> {
    pub const fn new() -> Self {
        Self {
            slots: [IrqCell::new(None), IrqCell::new(None)],
            published: AtomicI8::new(UNPUBLISHED),
            next: AtomicU8::new(0),
            current: AtomicU8::new(0),
        }
    }

    /// Stores `value` for the reader to pick up.
    pub fn put(&self, value: T) {
        let stale = interrupt::free(|cs| {
            let next = self.next.load(Ordering::Relaxed);
            *self.slots[next as usize].borrow_mut(cs) = Some(value);
            self.published.store(next as i8, Ordering::Release);
            self.next.store(1 - next, Ordering::Relaxed);

            // the slot that's not published can't be read anymore before it's written again
            self.slots[1 - next as usize].borrow_mut(cs).take()
        });

        drop(stale);
    }

    /// Returns the latest value and whether it was updated since the last call.
    pub fn get(&self, cs: &CriticalSection) -> (Option<T>, bool) {
        let published = self.published.swap(UNPUBLISHED, Ordering::AcqRel);
        let updated = published != UNPUBLISHED;
        if updated {
            self.current.store(published as u8, Ordering::Relaxed);
        }

        let current = self.current.load(Ordering::Relaxed);
        (self.slots[current as usize].borrow(cs).clone(), updated)
    }

    /// Whether the reader picked up the value put last.
    pub fn consumed(&self) -> bool {
        self.published.load(Ordering::Acquire) == UNPUBLISHED
    }

    /// Returns the value most recently put, for use by the writer.
    pub fn read(&self) -> Option<T> {
        interrupt::free(|cs| {
            let last = 1 - self.next.load(Ordering::Relaxed);
            self.slots[last as usize].borrow(cs).clone()
        })
    }
}

impl<T: Clone + Send> Default for IntrInput<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded queue with many producer threads and a single consumer running in interrupt context.
///
/// Indices grow monotonically and wrap on overflow, so all `N` slots are usable. `N` must be a
/// power of two.
pub struct IntrQueue<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    start: AtomicUsize,
    end: AtomicUsize,
    write_reserved: AtomicUsize,
}

// SAFETY: a slot is only accessed by the producer that reserved it until it is published, and by
// the single consumer afterwards
unsafe impl<T: Send, const N: usize> Sync for IntrQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Send for IntrQueue<T, N> {}

impl<T, const N: usize> IntrQueue<T, N> {
    pub const fn new() -> Self {
        const { assert!(N.is_power_of_two()) };
        Self {
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            write_reserved: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let end = self.end.load(Ordering::Acquire);
        let start = self.start.load(Ordering::Acquire);
        end.wrapping_sub(start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `value`. Returns it back if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        loop {
            let end = self.end.load(Ordering::Acquire);
            let start = self.start.load(Ordering::Acquire);
            if end.wrapping_sub(start) >= N {
                return Err(value);
            }

            // only one producer may hold a reservation at a time
            let next = end.wrapping_add(1);
            if self
                .write_reserved
                .compare_exchange_weak(end, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                std::hint::spin_loop();
                continue;
            }

            unsafe { (*self.slots[end % N].get()).write(value) };

            if self
                .end
                .compare_exchange(end, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                panic!("intr queue corrupted");
            }

            return Ok(());
        }
    }

    /// Returns the oldest value without removing it.
    pub fn peek<'a>(&'a self, _cs: &'a CriticalSection) -> Option<&'a T> {
        let start = self.start.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        if start == end {
            return None;
        }

        Some(unsafe { (*self.slots[start % N].get()).assume_init_ref() })
    }

    /// Returns the oldest value without removing it, for the consumer to update in place.
    #[allow(clippy::mut_from_ref)]
    pub fn peek_mut<'a>(&'a self, _cs: &'a CriticalSection) -> Option<&'a mut T> {
        let start = self.start.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        if start == end {
            return None;
        }

        // SAFETY: published slots belong to the single consumer
        Some(unsafe { (*self.slots[start % N].get()).assume_init_mut() })
    }

    /// Removes the oldest value.
    pub fn pop(&self, _cs: &CriticalSection) -> Option<T> {
        let start = self.start.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        if start == end {
            return None;
        }

        let value = unsafe { (*self.slots[start % N].get()).assume_init_read() };
        if self
            .start
            .compare_exchange(start, start.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            panic!("multiple intr queue readers");
        }

        Some(value)
    }
}

impl<T, const N: usize> Default for IntrQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for IntrQueue<T, N> {
    fn drop(&mut self) {
        let start = *self.start.get_mut();
        let end = *self.end.get_mut();
        let mut index = start;
        while index != end {
            unsafe { self.slots[index % N].get_mut().assume_init_drop() };
            index = index.wrapping_add(1);
        }
    }
}
