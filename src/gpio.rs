//! Parallel I/O (PIO) pin control.
//!
//! Each of the three PIO controllers is represented by one [Bank], which owns the register block
//! and the bank's interrupt dispatch state (see [crate::gpio_irq]). The chip's banks are the
//! statics in [crate::peripherals], shared by reference.

use core::cell::Cell;
use core::convert::Infallible;
use core::sync::atomic::AtomicU32;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::gpio_irq::Hook;
use crate::regs::{self, Registers};

/// Number of pins per bank.
pub const PIN_COUNT: usize = 32;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Pin index outside `0..32`.
    InvalidPin(u8),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidPin(pin) => write!(f, "invalid pin index {pin}"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
}

impl Port {
    pub const fn base(self) -> usize {
        match self {
            Port::A => regs::pio::PIOA_BASE,
            Port::B => regs::pio::PIOB_BASE,
            Port::C => regs::pio::PIOC_BASE,
        }
    }

    pub const fn peripheral_id(self) -> crate::pmc::PeripheralId {
        match self {
            Port::A => crate::pmc::PeripheralId::PIOA,
            Port::B => crate::pmc::PeripheralId::PIOB,
            Port::C => crate::pmc::PeripheralId::PIOC,
        }
    }

    pub const fn interrupt(self) -> crate::interrupt::Interrupt {
        match self {
            Port::A => crate::interrupt::Interrupt::PIOA,
            Port::B => crate::interrupt::Interrupt::PIOB,
            Port::C => crate::interrupt::Interrupt::PIOC,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl From<Level> for bool {
    fn from(value: Level) -> Self {
        match value {
            Level::Low => false,
            Level::High => true,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        match value {
            false => Level::Low,
            true => Level::High,
        }
    }
}

/// Pin multiplexer selection.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Function {
    /// Controlled by the PIO itself.
    Gpio,
    PeripheralA,
    PeripheralB,
    PeripheralC,
    PeripheralD,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Input glitch/debounce filter.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Filter {
    None,
    Glitch,
    Debounce,
}

pub(crate) const fn pin_mask(pin: u8) -> Result<u32, Error> {
    if (pin as usize) < PIN_COUNT {
        Ok(1 << pin)
    } else {
        Err(Error::InvalidPin(pin))
    }
}

/// One PIO controller.
pub struct Bank<R> {
    port: Port,
    regs: R,
    pub(crate) hooks: Mutex<CriticalSectionRawMutex, Cell<[Option<Hook>; PIN_COUNT]>>,
    pub(crate) unhandled: AtomicU32,
}

impl<R: Registers> Bank<R> {
    pub const fn new(port: Port, regs: R) -> Self {
        Self {
            port,
            regs,
            hooks: Mutex::new(Cell::new([None; PIN_COUNT])),
            unhandled: AtomicU32::new(0),
        }
    }

    pub const fn port(&self) -> Port {
        self.port
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Run `f` with the bank's write protection lifted.
    ///
    /// Note(cs): pins of a bank share the protection register and the read-modify-write
    /// selection registers.
    pub(crate) fn unprotected<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        critical_section::with(|_| {
            self.regs.write(regs::pio::WPMR, regs::pio::WPKEY);
            let result = f(&self.regs);
            self.regs.write(regs::pio::WPMR, regs::pio::WPKEY | regs::pio::WPEN);
            result
        })
    }

    pub fn set_function(&self, pin: u8, function: Function) -> Result<(), Error> {
        let mask = pin_mask(pin)?;

        let (sel1, sel2) = match function {
            Function::Gpio => {
                self.unprotected(|r| r.write(regs::pio::PER, mask));
                return Ok(());
            }
            Function::PeripheralA => (false, false),
            Function::PeripheralB => (true, false),
            Function::PeripheralC => (false, true),
            Function::PeripheralD => (true, true),
        };

        self.unprotected(|r| {
            r.write(regs::pio::PDR, mask);
            r.modify(regs::pio::ABCDSR1, |v| if sel1 { v | mask } else { v & !mask });
            r.modify(regs::pio::ABCDSR2, |v| if sel2 { v | mask } else { v & !mask });
        });
        Ok(())
    }

    pub fn enable_output(&self, pin: u8) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        self.unprotected(|r| r.write(regs::pio::OER, mask));
        Ok(())
    }

    pub fn disable_output(&self, pin: u8) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        self.unprotected(|r| r.write(regs::pio::ODR, mask));
        Ok(())
    }

    /// Drive level of an output pin. SODR/CODR are not write protected.
    pub fn set_level(&self, pin: u8, level: Level) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        match level {
            Level::Low => self.regs.write(regs::pio::CODR, mask),
            Level::High => self.regs.write(regs::pio::SODR, mask),
        }
        Ok(())
    }

    pub fn is_high(&self, pin: u8) -> Result<bool, Error> {
        let mask = pin_mask(pin)?;
        Ok(self.regs.read(regs::pio::PDSR) & mask != 0)
    }

    pub fn is_set_high(&self, pin: u8) -> Result<bool, Error> {
        let mask = pin_mask(pin)?;
        Ok(self.regs.read(regs::pio::ODSR) & mask != 0)
    }

    pub fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        self.unprotected(|r| match pull {
            Pull::Up => {
                r.write(regs::pio::PPDDR, mask);
                r.write(regs::pio::PUER, mask);
            }
            Pull::Down => {
                r.write(regs::pio::PUDR, mask);
                r.write(regs::pio::PPDER, mask);
            }
            Pull::None => {
                r.write(regs::pio::PUDR, mask);
                r.write(regs::pio::PPDDR, mask);
            }
        });
        Ok(())
    }

    pub fn set_filter(&self, pin: u8, filter: Filter) -> Result<(), Error> {
        let mask = pin_mask(pin)?;
        self.unprotected(|r| match filter {
            Filter::None => r.write(regs::pio::IFDR, mask),
            Filter::Glitch => {
                r.write(regs::pio::IFER, mask);
                r.write(regs::pio::IFSCDR, mask);
            }
            Filter::Debounce => {
                r.write(regs::pio::IFER, mask);
                r.write(regs::pio::IFSCER, mask);
            }
        });
        Ok(())
    }
}

/// Push-pull output driver for one pin.
pub struct Output<'d, R> {
    bank: &'d Bank<R>,
    pin: u8,
}

impl<'d, R: Registers> Output<'d, R> {
    pub fn new(bank: &'d Bank<R>, pin: u8, level: Level) -> Result<Self, Error> {
        bank.set_level(pin, level)?;
        bank.set_function(pin, Function::Gpio)?;
        bank.enable_output(pin)?;

        Ok(Self { bank, pin })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn set_low(&mut self) {
        // The pin index was validated in the constructor.
        let _ = self.bank.set_level(self.pin, Level::Low);
    }

    pub fn set_high(&mut self) {
        let _ = self.bank.set_level(self.pin, Level::High);
    }

    pub fn set_level(&mut self, level: Level) {
        let _ = self.bank.set_level(self.pin, level);
    }

    #[must_use]
    pub fn is_set_high(&self) -> bool {
        self.bank.is_set_high(self.pin).unwrap_or(false)
    }

    #[must_use]
    pub fn is_set_low(&self) -> bool {
        !self.is_set_high()
    }

    pub fn toggle(&mut self) {
        let level = Level::from(!self.is_set_high());
        self.set_level(level);
    }
}

/// Input driver for one pin.
pub struct Input<'d, R> {
    bank: &'d Bank<R>,
    pin: u8,
}

impl<'d, R: Registers> Input<'d, R> {
    pub fn new(bank: &'d Bank<R>, pin: u8, pull: Pull) -> Result<Self, Error> {
        bank.set_function(pin, Function::Gpio)?;
        bank.disable_output(pin)?;
        bank.set_pull(pin, pull)?;

        Ok(Self { bank, pin })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn set_filter(&mut self, filter: Filter) {
        let _ = self.bank.set_filter(self.pin, filter);
    }

    #[must_use]
    pub fn is_high(&self) -> bool {
        self.bank.is_high(self.pin).unwrap_or(false)
    }

    #[must_use]
    pub fn is_low(&self) -> bool {
        !self.is_high()
    }
}

impl<R> embedded_hal::digital::ErrorType for Output<'_, R> {
    type Error = Infallible;
}

impl<R: Registers> embedded_hal::digital::OutputPin for Output<'_, R> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Output::set_low(self);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Output::set_high(self);
        Ok(())
    }
}

impl<R: Registers> embedded_hal::digital::StatefulOutputPin for Output<'_, R> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(Output::is_set_high(self))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(Output::is_set_low(self))
    }
}

impl<R> embedded_hal::digital::ErrorType for Input<'_, R> {
    type Error = Infallible;
}

impl<R: Registers> embedded_hal::digital::InputPin for Input<'_, R> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(Input::is_high(self))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(Input::is_low(self))
    }
}
