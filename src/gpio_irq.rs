//! Per-pin interrupt hooks for the PIO banks.
//!
//! A [Bank] holds one hook slot per pin. [Bank::register] installs a hook and arms the pin's
//! trigger. When the bank's interrupt fires, [Bank::on_interrupt] reads the pending flags once and
//! invokes the hook of every pending pin whose interrupt is enabled, in ascending pin order.

use core::marker::PhantomData;
use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::gpio::{pin_mask, Bank, Error, Level, PIN_COUNT};
use crate::interrupt::typelevel::{self, Handler};
use crate::regs::{self, Registers};

/// Edge selection for edge-triggered pins.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// Both edges. The additional interrupt modes are left disabled for the pin.
    Any,
    Falling,
    Rising,
}

/// Trigger condition of a pin interrupt.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Edge(Edge),
    Level(Level),
}

/// Callback run when a registered pin fires.
///
/// Receives the pin index within its bank. Hooks normally run in the bank's interrupt handler.
/// Flags flushed by [Bank::register] are delivered from the registering context inside a
/// critical section. Either way the bank's handler cannot preempt a hook. Must not block.
pub trait InterruptHook: Sync {
    fn on_interrupt(&self, pin: u8);
}

impl<F: Fn(u8) + Sync> InterruptHook for F {
    fn on_interrupt(&self, pin: u8) {
        self(pin)
    }
}

pub(crate) type Hook = &'static dyn InterruptHook;

/// Iterator over the set bit positions of a word, lowest first.
struct BitIter(u32);

impl Iterator for BitIter {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.trailing_zeros() {
            32 => None,
            b => {
                self.0 &= !(1 << b);
                Some(b as u8)
            }
        }
    }
}

impl<R: Registers> Bank<R> {
    /// Install `hook` for `pin` and arm its interrupt with the given trigger.
    ///
    /// Replaces any previous hook of the pin. Flags already latched in the bank's status register
    /// are consumed by this call; those of other enabled pins are delivered to their hooks before
    /// returning, the one of `pin` itself is discarded.
    pub fn register(&self, pin: u8, mode: Mode, hook: Hook) -> Result<(), Error> {
        let mask = pin_mask(pin)?;

        // Note(cs): the hook table, the trigger registers and the clear-on-read status register
        // must not be observed half-updated by the bank's interrupt handler.
        critical_section::with(|cs| {
            self.regs().write(regs::pio::IDR, mask);

            let hooks = self.hooks.borrow(cs);
            let mut table = hooks.get();
            table[pin as usize] = Some(hook);
            hooks.set(table);

            self.unprotected(|r| {
                match mode {
                    Mode::Edge(Edge::Any) => r.write(regs::pio::AIMDR, mask),
                    Mode::Edge(edge) => {
                        r.write(regs::pio::AIMER, mask);
                        r.write(regs::pio::ESR, mask);
                        match edge {
                            Edge::Rising => r.write(regs::pio::REHLSR, mask),
                            _ => r.write(regs::pio::FELLSR, mask),
                        }
                    }
                    Mode::Level(level) => {
                        r.write(regs::pio::AIMER, mask);
                        r.write(regs::pio::LSR, mask);
                        match level {
                            Level::High => r.write(regs::pio::REHLSR, mask),
                            Level::Low => r.write(regs::pio::FELLSR, mask),
                        }
                    }
                }
            });

            let flushed = self.regs().read(regs::pio::ISR) & self.regs().read(regs::pio::IMR);
            self.regs().write(regs::pio::IER, mask);
            self.dispatch(flushed);
        });

        Ok(())
    }

    /// Disarm `pin`'s interrupt. The hook stays installed until replaced.
    pub fn unregister(&self, pin: u8) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        self.regs().write(regs::pio::IDR, mask);
        Ok(())
    }

    /// Bank interrupt handler: dispatch `ISR & IMR`.
    ///
    /// The status register is read exactly once, which also acknowledges every latched flag.
    pub fn on_interrupt(&self) {
        let pending = self.regs().read(regs::pio::ISR) & self.regs().read(regs::pio::IMR);
        self.dispatch(pending);
    }

    fn dispatch(&self, pending: u32) {
        let table = critical_section::with(|cs| self.hooks.borrow(cs).get());

        for pin in BitIter(pending) {
            match table[pin as usize] {
                Some(hook) => hook.on_interrupt(pin),
                None => {
                    self.unhandled.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "defmt")]
                    defmt::warn!("P{}{}: interrupt without hook", self.port(), pin);
                }
            }
        }
    }

    /// Number of pending, enabled pins of this bank that had no hook installed when serviced.
    pub fn unhandled_count(&self) -> u32 {
        self.unhandled.load(Ordering::Relaxed)
    }
}

/// Bank interrupt handler, servicing the matching bank in [crate::peripherals].
pub struct InterruptHandler<I> {
    _irq: PhantomData<I>,
}

macro_rules! bank_handler {
    ($($irq:ident),*) => {
        $(
            impl Handler<typelevel::$irq> for InterruptHandler<typelevel::$irq> {
                unsafe fn on_interrupt() {
                    crate::peripherals::$irq.on_interrupt();
                }
            }
        )*
    };
}

bank_handler!(PIOA, PIOB, PIOC);

/// Hook that wakes a task, for awaiting a pin interrupt.
pub struct PinSignal {
    signal: Signal<CriticalSectionRawMutex, u8>,
}

impl PinSignal {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Wait for the next interrupt, returning the pin that fired.
    pub async fn wait(&self) -> u8 {
        self.signal.wait().await
    }

    pub fn signaled(&self) -> bool {
        self.signal.signaled()
    }

    pub fn reset(&self) {
        self.signal.reset();
    }
}

impl Default for PinSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHook for PinSignal {
    fn on_interrupt(&self, pin: u8) {
        self.signal.signal(pin);
    }
}

const _: () = assert!(PIN_COUNT == u32::BITS as usize);
