#![cfg_attr(not(test), no_std)]

//! Embassy-style peripheral layer for the SAM4S: PIO pins with per-pin interrupt hooks, clock
//! setup, and a PDC-backed SPI master with an async transfer engine.

pub mod delay;
pub mod efc;
pub mod gpio;
pub mod gpio_irq;
pub mod ili9341;
pub mod interrupt;
pub mod pmc;
pub mod regs;
pub mod spi;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use crate::gpio::{Bank, Port};
use crate::interrupt::typelevel::{self, Binding, Interrupt as _};
use crate::interrupt::{Interrupt, InterruptLine, NvicLine};
use crate::pmc::{Clocks, Pmc};
use crate::regs::{Mmio, Registers};
use crate::spi::Spi;

#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub clocks: pmc::Config,
}

/// Drivers over the on-chip register blocks.
///
/// The interrupt handlers of [gpio_irq::InterruptHandler] and [spi::InterruptHandler] service
/// these instances.
pub mod peripherals {
    use super::*;

    // Safety: the bases are the SAM4S register blocks and these are the only drivers created over
    // them by this crate.
    pub static PIOA: Bank<Mmio> = Bank::new(Port::A, unsafe { Mmio::new(regs::pio::PIOA_BASE) });
    pub static PIOB: Bank<Mmio> = Bank::new(Port::B, unsafe { Mmio::new(regs::pio::PIOB_BASE) });
    pub static PIOC: Bank<Mmio> = Bank::new(Port::C, unsafe { Mmio::new(regs::pio::PIOC_BASE) });
    pub static SPI: Spi<Mmio, NvicLine> =
        Spi::new(unsafe { Mmio::new(regs::spi::BASE) }, NvicLine::new(Interrupt::SPI));

    /// Safety: at most one driver may exist per register block.
    pub const unsafe fn pmc() -> Pmc<Mmio> {
        Pmc::new(Mmio::new(regs::pmc::BASE))
    }
}

/// Bring up flash, clocks and the PIO controllers.
///
/// Expects the reset clock configuration. The bank interrupt lines are unmasked here, so `irqs`
/// must bind all three PIO vectors (see [bind_interrupts]).
pub fn init(
    config: Config,
    _irqs: impl Binding<typelevel::PIOA, gpio_irq::InterruptHandler<typelevel::PIOA>>
        + Binding<typelevel::PIOB, gpio_irq::InterruptHandler<typelevel::PIOB>>
        + Binding<typelevel::PIOC, gpio_irq::InterruptHandler<typelevel::PIOC>>,
) -> Clocks {
    // Safety: init runs once, before any driver touches these blocks.
    let efc = unsafe { Mmio::new(regs::efc::BASE) };
    let pmc = unsafe { peripherals::pmc() };
    let lines = [typelevel::PIOA::line(), typelevel::PIOB::line(), typelevel::PIOC::line()];

    init_with(&config, &efc, &pmc, &lines)
}

/// [init] over arbitrary register blocks and interrupt lines.
pub fn init_with<E: Registers, P: Registers, L: InterruptLine>(
    config: &Config,
    efc: &E,
    pmc: &Pmc<P>,
    pio_lines: &[L; 3],
) -> Clocks {
    // Wait states must be in place before the master clock speeds up.
    efc::configure(efc, config.clocks.clocks().master_clk);
    let clocks = pmc.init(&config.clocks);

    for port in [Port::A, Port::B, Port::C] {
        pmc.enable_peripheral_clock(port.peripheral_id());
    }

    for line in pio_lines {
        line.unpend();
        line.enable();
    }

    clocks
}

/// Define the interrupt vectors and a binding token proving them.
///
/// ```rust,ignore
/// use embassy_sam4s::{bind_interrupts, gpio_irq, spi};
///
/// bind_interrupts!(struct Irqs {
///     PIOA => gpio_irq::InterruptHandler<embassy_sam4s::interrupt::typelevel::PIOA>;
///     PIOB => gpio_irq::InterruptHandler<embassy_sam4s::interrupt::typelevel::PIOB>;
///     PIOC => gpio_irq::InterruptHandler<embassy_sam4s::interrupt::typelevel::PIOC>;
///     SPI => spi::InterruptHandler;
/// });
///
/// let clocks = embassy_sam4s::init(Default::default(), Irqs);
/// embassy_sam4s::peripherals::SPI.init(&spi::Config::default(), &pmc, Irqs)?;
/// ```
#[macro_export]
macro_rules! bind_interrupts {
    ($vis:vis struct $name:ident {
        $(
            $(#[cfg($cond_irq:meta)])?
            $irq:ident => $(
                $(#[cfg($cond_handler:meta)])?
                $handler:ty
            ),*;
        )*
    }) => {
        #[derive(Copy, Clone)]
        $vis struct $name;

        $(
            #[allow(non_snake_case)]
            #[no_mangle]
            $(#[cfg($cond_irq)])?
            unsafe extern "C" fn $irq() {
                $(
                    $(#[cfg($cond_handler)])?
                    <$handler as $crate::interrupt::typelevel::Handler<$crate::interrupt::typelevel::$irq>>::on_interrupt();
                )*
            }

            $(#[cfg($cond_irq)])?
            $crate::bind_interrupts!(@inner
                $(
                    $(#[cfg($cond_handler)])?
                    unsafe impl $crate::interrupt::typelevel::Binding<$crate::interrupt::typelevel::$irq, $handler> for $name {}
                )*
            );
        )*
    };
    (@inner $($t:tt)*) => {
        $($t)*
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::gpio_irq::{Edge, Mode};
    use crate::interrupt::typelevel::Handler;
    use crate::mock::{MockLine, MockRegisters};

    static BANK: Bank<MockRegisters> = Bank::new(Port::B, MockRegisters::new());
    static SPI_ENGINE: Spi<MockRegisters, MockLine> = Spi::new(MockRegisters::new(), MockLine::new());
    static HITS: AtomicU32 = AtomicU32::new(0);

    struct BankHandler;

    impl Handler<typelevel::PIOB> for BankHandler {
        unsafe fn on_interrupt() {
            BANK.on_interrupt();
        }
    }

    struct SpiHandler;

    impl Handler<typelevel::PIOB> for SpiHandler {
        unsafe fn on_interrupt() {
            SPI_ENGINE.on_interrupt();
        }
    }

    bind_interrupts!(struct Irqs {
        PIOB => BankHandler, SpiHandler;
    });

    fn bound<I: typelevel::Interrupt, H: Handler<I>>(_irqs: impl Binding<I, H>) -> bool {
        true
    }

    #[test]
    fn bound_vectors_dispatch() {
        static HOOK: fn(u8) = |pin| {
            HITS.fetch_add(1 << pin, Ordering::SeqCst);
        };
        assert!(bound::<typelevel::PIOB, BankHandler>(Irqs));
        assert!(bound::<typelevel::PIOB, SpiHandler>(Irqs));

        BANK.register(4, Mode::Edge(Edge::Falling), &HOOK).unwrap();
        // Plain register file: mirror the IER write into the mask.
        BANK.regs().set(regs::pio::IMR, 1 << 4);

        BANK.regs().set(regs::pio::ISR, 1 << 4);
        unsafe { PIOB() };
        assert_eq!(HITS.load(Ordering::SeqCst), 1 << 4);
        // Nothing in flight on the engine sharing the vector.
        assert_eq!(SPI_ENGINE.regs().value(regs::spi::CR), regs::spi::CR_SPIDIS);
        assert!(!SPI_ENGINE.is_busy());

        BANK.regs().set(regs::pio::ISR, 1 << 4);
        unsafe { PIOB() };
        assert_eq!(HITS.load(Ordering::SeqCst), 2 << 4);
    }

    #[test]
    fn init_sequence() {
        let efc = MockRegisters::new();
        let pmc = Pmc::new(MockRegisters::new());
        pmc.regs().set(regs::pmc::SR, u32::MAX);
        let lines = [MockLine::new(), MockLine::new(), MockLine::new()];

        let clocks = init_with(&Config::default(), &efc, &pmc, &lines);

        assert_eq!(clocks.master_clk, 100_000_000);
        assert_eq!(efc.value(regs::efc::FMR) >> regs::efc::FMR_FWS_SHIFT & 0xF, 5);
        assert_eq!(
            pmc.regs().writes_to(regs::pmc::PCER0).as_slice(),
            &[1 << 11, 1 << 12, 1 << 13]
        );
        assert!(lines.iter().all(|l| l.is_enabled() && l.unpends() == 1));
    }
}
