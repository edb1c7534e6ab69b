use std::any::Any;
use std::sync::Arc;

/// Keeps objects alive while the hardware may still reference them.
///
/// Pinning an object stores a strong reference to it until [`Pinner::unpin`]. Dropping a pinner
/// that still holds pins is a bug, since whatever was pinned for is likely still running.
#[derive(Default)]
pub struct Pinner {
    pins: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Pinner {
    pub const fn new() -> Self {
        Self { pins: Vec::new() }
    }

    /// Pins `obj`. Pinning an object that's already pinned is a no-op.
    pub fn pin<T: Any + Send + Sync>(&mut self, obj: &Arc<T>) {
        let addr = Arc::as_ptr(obj).cast::<()>();
        if self
            .pins
            .iter()
            .any(|pin| Arc::as_ptr(pin).cast::<()>() == addr)
        {
            return;
        }

        self.pins.push(obj.clone());
    }

    /// Pins every object in `objs`.
    pub fn pin_slice<T: Any + Send + Sync>(&mut self, objs: &[Arc<T>]) {
        for obj in objs {
            self.pin(obj);
        }
    }

    /// Releases every pin.
    pub fn unpin(&mut self) {
        self.pins.clear();
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl Drop for Pinner {
    fn drop(&mut self) {
        if !self.pins.is_empty() && !std::thread::panicking() {
            panic!("memory leak: pinner dropped with {} pins", self.pins.len());
        }
    }
}
