//! Interrupt lines and handler binding.

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;

/// SAM4S interrupt numbers of the peripherals driven by this crate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Interrupt {
    PIOA = 11,
    PIOB = 12,
    PIOC = 13,
    SPI = 21,
}

// Safety: the discriminants are the device's NVIC line numbers.
unsafe impl InterruptNumber for Interrupt {
    fn number(self) -> u16 {
        self as u16
    }
}

/// Number of priority bits implemented by the SAM4S NVIC.
pub const PRIORITY_BITS: u8 = 4;

/// Per-line control at the interrupt controller, independent of the peripheral's own
/// interrupt enable bits. Both must be set for an interrupt to be delivered.
pub trait InterruptLine: Sync {
    fn enable(&self);
    fn disable(&self);
    fn unpend(&self);
    /// `priority` is the logical level, `0..(1 << PRIORITY_BITS)`.
    fn set_priority(&self, priority: u8);
}

/// An NVIC line.
#[derive(Debug, Copy, Clone)]
pub struct NvicLine(Interrupt);

impl NvicLine {
    pub const fn new(irq: Interrupt) -> Self {
        Self(irq)
    }

    pub const fn interrupt(&self) -> Interrupt {
        self.0
    }
}

impl InterruptLine for NvicLine {
    fn enable(&self) {
        // Safety: unmasking is only unsafe with respect to mask-based critical sections, and the
        // drivers only unmask lines whose handler state is fully initialized.
        unsafe { NVIC::unmask(self.0) };
    }

    fn disable(&self) {
        NVIC::mask(self.0);
    }

    fn unpend(&self) {
        NVIC::unpend(self.0);
    }

    fn set_priority(&self, priority: u8) {
        // Note(steal): only the priority register of our own line is written.
        let mut nvic = unsafe { cortex_m::Peripherals::steal() }.NVIC;
        unsafe { nvic.set_priority(self.0, priority << (8 - PRIORITY_BITS)) };
    }
}

/// Type-level interrupts and handler bindings.
///
/// Drivers that depend on an interrupt take an `impl Binding<I, H>` token. The token is a type
/// generated by [crate::bind_interrupts], which also defines the vector that calls `H`, so a
/// driver cannot be brought up with its vector unbound.
pub mod typelevel {
    /// An interrupt vector, as a type.
    pub trait Interrupt: 'static {
        const IRQ: super::Interrupt;

        fn line() -> super::NvicLine {
            super::NvicLine::new(Self::IRQ)
        }
    }

    macro_rules! interrupts {
        ($($irq:ident),* $(,)?) => {
            $(
                #[allow(non_camel_case_types)]
                #[derive(Debug)]
                pub enum $irq {}

                impl Interrupt for $irq {
                    const IRQ: super::Interrupt = super::Interrupt::$irq;
                }
            )*
        };
    }

    interrupts!(PIOA, PIOB, PIOC, SPI);

    /// Interrupt-context entry point of a driver.
    ///
    /// Implementations must not block or allocate.
    pub trait Handler<I: Interrupt> {
        /// Safety: only called from the vector of `I`.
        unsafe fn on_interrupt();
    }

    /// Proof that the vector of `I` calls `H`.
    ///
    /// Safety: implement only through [crate::bind_interrupts], or for a vector that really does
    /// call `H::on_interrupt`.
    pub unsafe trait Binding<I: Interrupt, H: Handler<I>> {}
}
