//! Flashcart probing.
//!
//! None of this is needed to boot on a flashcart. It gives access to the extra features some
//! carts have, like a logging channel to the host.
pub mod isviewer;

use std::io::Write;

/// A cart with a channel to the host.
pub trait Cart: Write + Send {
    /// Human readable name of the cart.
    fn name(&self) -> &'static str;
}

/// Returns the first cart that responds to probing.
pub fn probe_all() -> Option<Box<dyn Cart>> {
    if let Some(isviewer) = isviewer::IsViewer::probe() {
        tracing::info!("found {}", isviewer.name());
        return Some(Box::new(isviewer));
    }

    tracing::debug!("no cart with a host channel found");
    None
}
