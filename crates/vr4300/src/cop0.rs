//! System control coprocessor.
use bitos::bitos;

/// The `Status` register (`$12`).
#[bitos(32)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    /// Global interrupt enable.
    #[bits(0)]
    pub interrupts: bool,
    #[bits(1)]
    pub exception_level: bool,
    #[bits(2)]
    pub error_level: bool,
    /// Interrupt mask. Bit 2 of the mask is the RCP line.
    #[bits(8..16)]
    pub interrupt_mask: u8,
    #[bits(26)]
    pub fr: bool,
    #[bits(28)]
    pub cop0_usable: bool,
    #[bits(29)]
    pub cop1_usable: bool,
}

#[cfg(target_arch = "mips")]
mod native {
    use super::Status;

    #[inline(always)]
    pub fn status() -> Status {
        let value: u32;
        unsafe {
            std::arch::asm!("mfc0 {0}, $12", out(reg) value, options(nomem, nostack));
        }
        Status::from_bits(value)
    }

    #[inline(always)]
    pub fn set_status(status: Status) {
        unsafe {
            std::arch::asm!(
                "mtc0 {0}, $12",
                "nop",
                in(reg) status.to_bits(),
                options(nomem, nostack),
            );
        }
    }

    /// Clears the global interrupt enable bit and returns whether it was set.
    #[inline(always)]
    pub fn disable_interrupts() -> bool {
        let status = status();
        set_status(status.with_interrupts(false));
        status.interrupts()
    }

    /// Restores the global interrupt enable bit to `enabled`.
    #[inline(always)]
    pub fn restore_interrupts(enabled: bool) {
        if enabled {
            set_status(status().with_interrupts(true));
        }
    }
}

#[cfg(target_arch = "mips")]
pub use native::*;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_fields() {
        let status = Status::from_bits(0x2000_FF01);
        assert!(status.interrupts());
        assert!(status.cop1_usable());
        assert_eq!(status.interrupt_mask(), 0xFF);
        assert_eq!(status.with_interrupts(false).to_bits(), 0x2000_FF00);
    }
}
