//! Serial Peripheral Interface (SPI) master.
//!
//! Transfers run on the PDC: the transmit and receive buffers are handed to the DMA channel, the
//! controller is started, and the calling task sleeps until the completion interrupt. One transfer
//! owns the controller at a time; concurrent callers queue on an async lock. Chip selects are
//! encoded per word (see [ControlWord]), so one engine serves up to four devices.

use core::cell::Cell;
use core::future::Future;
use core::sync::atomic::{compiler_fence, AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_hal_internal::drop::OnDrop;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};

use crate::gpio::{self, Bank, Function, Port};
use crate::interrupt::typelevel::{self, Binding, Handler};
use crate::interrupt::{InterruptLine, PRIORITY_BITS};
use crate::pmc::{Clocks, PeripheralId, Pmc};
use crate::regs::{self, Registers};

mod device;
mod word;

pub use device::Device;
pub use word::{word, ChipSelect, ControlWord, ReceiveBuffer, TransferRequest, TRANSFER_CAPACITY};

/// SPI error
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Chip select index outside `0..4`.
    InvalidChipSelect(u8),
    /// More words than fit in one transfer.
    TransferTooLong { len: usize, capacity: usize },
    /// Transfer without words.
    EmptyTransfer,
    /// Serial clock divisor outside `1..=255`.
    InvalidBaudRate { divisor: u32 },
    /// Bits per transfer outside `8..=16`.
    InvalidWordSize(u8),
    /// Interrupt priority above the implemented levels.
    InvalidPriority(u8),
    /// The deadline passed to [Spi::transceive_until] elapsed first.
    Timeout,
    /// Pin routing failed.
    Pin(gpio::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidChipSelect(cs) => write!(f, "invalid chip select {cs}"),
            Error::TransferTooLong { len, capacity } => {
                write!(f, "transfer of {len} words exceeds capacity of {capacity}")
            }
            Error::EmptyTransfer => write!(f, "empty transfer"),
            Error::InvalidBaudRate { divisor } => write!(f, "serial clock divisor {divisor} outside 1..=255"),
            Error::InvalidWordSize(bits) => write!(f, "{bits} bits per transfer unsupported"),
            Error::InvalidPriority(prio) => write!(f, "interrupt priority {prio} unsupported"),
            Error::Timeout => write!(f, "transfer timed out"),
            Error::Pin(e) => write!(f, "pin routing: {e}"),
        }
    }
}

impl From<gpio::Error> for Error {
    fn from(value: gpio::Error) -> Self {
        Error::Pin(value)
    }
}

impl embedded_hal::spi::Error for Error {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

/// Bus pins, all on PIOA peripheral A.
const SPCK: u8 = 14;
const MOSI: u8 = 13;
const MISO: u8 = 12;

macro_rules! npcs_pins {
    ($(#[$attr:meta])* $name:ident { $($pin:ident => ($port:ident, $n:literal, $func:ident)),+ $(,)? }) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum $name {
            $($pin,)+
        }

        impl $name {
            /// Port, pin index and multiplexer function of this pin.
            pub const fn location(self) -> (Port, u8, Function) {
                match self {
                    $($name::$pin => (Port::$port, $n, Function::$func),)+
                }
            }
        }
    };
}

npcs_pins!(
    /// Pins that can carry NPCS0.
    Npcs0Pin { PA11 => (A, 11, PeripheralA) }
);
npcs_pins!(
    /// Pins that can carry NPCS1.
    Npcs1Pin {
        PA9 => (A, 9, PeripheralB),
        PA31 => (A, 31, PeripheralA),
        PB14 => (B, 14, PeripheralA),
        PC4 => (C, 4, PeripheralB),
    }
);
npcs_pins!(
    /// Pins that can carry NPCS2.
    Npcs2Pin {
        PA10 => (A, 10, PeripheralB),
        PA30 => (A, 30, PeripheralB),
        PB2 => (B, 2, PeripheralB),
    }
);
npcs_pins!(
    /// Pins that can carry NPCS3.
    Npcs3Pin {
        PA3 => (A, 3, PeripheralB),
        PA5 => (A, 5, PeripheralB),
        PA22 => (A, 22, PeripheralB),
    }
);

/// Chip select routing. `None` leaves the line unrouted.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Pins {
    pub npcs0: Option<Npcs0Pin>,
    pub npcs1: Option<Npcs1Pin>,
    pub npcs2: Option<Npcs2Pin>,
    pub npcs3: Option<Npcs3Pin>,
}

/// SPI master configuration.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Logical NVIC priority, `0..16`.
    pub interrupt_priority: u8,
    pub pins: Pins,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interrupt_priority: 5,
            pins: Pins::default(),
        }
    }
}

/// Per chip select timing and framing.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub chip_select: ChipSelect,
    pub mode: Mode,
    /// Serial clock frequency in Hz.
    pub frequency: u32,
    /// Range: 8..=16
    pub bits_per_transfer: u8,
    /// MCK cycles from chip select assertion to the first clock edge (`DLYBS`).
    pub delay_before_clock: u8,
    /// 32 MCK cycle units between consecutive words (`DLYBCT`).
    pub delay_between_transfers: u8,
    /// Hold the chip select asserted until a word with the last-transfer flag (`CSAAT`).
    pub keep_asserted: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            chip_select: ChipSelect::Cs0,
            mode: MODE_0,
            frequency: 1_000_000,
            bits_per_transfer: 8,
            delay_before_clock: 0,
            delay_between_transfers: 0,
            keep_asserted: true,
        }
    }
}

impl DeviceConfig {
    /// `SPI_CSRx` value for this device at the given master clock.
    pub fn csr(&self, master_clk: u32) -> Result<u32, Error> {
        if !(8..=16).contains(&self.bits_per_transfer) {
            return Err(Error::InvalidWordSize(self.bits_per_transfer));
        }

        // Best-effort divisor selection, rounded up.
        let divisor = match self.frequency {
            0 => 0,
            f => master_clk.div_ceil(f),
        };
        if !(1..=255).contains(&divisor) {
            return Err(Error::InvalidBaudRate { divisor });
        }

        let mut csr = ((self.bits_per_transfer as u32 - 8) << regs::spi::CSR_BITS_SHIFT)
            | (divisor << regs::spi::CSR_SCBR_SHIFT)
            | ((self.delay_before_clock as u32) << regs::spi::CSR_DLYBS_SHIFT)
            | ((self.delay_between_transfers as u32) << regs::spi::CSR_DLYBCT_SHIFT);

        if self.mode.polarity == Polarity::IdleHigh {
            csr |= regs::spi::CSR_CPOL;
        }
        if self.mode.phase == Phase::CaptureOnFirstTransition {
            csr |= regs::spi::CSR_NCPHA;
        }
        if self.keep_asserted {
            csr |= regs::spi::CSR_CSAAT;
        }

        Ok(csr)
    }
}

/// Mux the bus pins and the routed chip selects to the SPI controller.
pub fn route_pins<P: Registers>(pins: &Pins, pioa: &Bank<P>, piob: &Bank<P>, pioc: &Bank<P>) -> Result<(), Error> {
    let bank = |port| match port {
        Port::A => pioa,
        Port::B => piob,
        Port::C => pioc,
    };

    for pin in [SPCK, MOSI, MISO] {
        pioa.set_function(pin, Function::PeripheralA)?;
    }

    let selects = [
        pins.npcs0.map(Npcs0Pin::location),
        pins.npcs1.map(Npcs1Pin::location),
        pins.npcs2.map(Npcs2Pin::location),
        pins.npcs3.map(Npcs3Pin::location),
    ];
    for (port, pin, function) in selects.into_iter().flatten() {
        bank(port).set_function(pin, function)?;
    }

    Ok(())
}

/// SPI interrupt handler, servicing [crate::peripherals::SPI].
pub struct InterruptHandler;

impl Handler<typelevel::SPI> for InterruptHandler {
    unsafe fn on_interrupt() {
        crate::peripherals::SPI.on_interrupt();
    }
}

/// SPI transfer engine.
///
/// The controller's instance is [crate::peripherals::SPI]; [Spi::init] requires its vector to be
/// bound to [InterruptHandler] with [crate::bind_interrupts].
pub struct Spi<R, L> {
    regs: R,
    line: L,
    /// Serializes transfers. Waiters are not served in FIFO order: whichever waiter is polled
    /// first after a release acquires the controller.
    lock: Mutex<CriticalSectionRawMutex, ()>,
    done: Signal<CriticalSectionRawMutex, ()>,
    in_flight: AtomicBool,
    callback: BlockingMutex<CriticalSectionRawMutex, Cell<Option<fn()>>>,
}

impl<R: Registers, L: InterruptLine> Spi<R, L> {
    pub const fn new(regs: R, line: L) -> Self {
        Self {
            regs,
            line,
            lock: Mutex::new(()),
            done: Signal::new(),
            in_flight: AtomicBool::new(false),
            callback: BlockingMutex::new(Cell::new(None)),
        }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    /// Whether a transfer is waiting for its completion interrupt.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Configure the controller as master with variable peripheral select.
    ///
    /// The interrupt line stays masked; each transfer unmasks it while it runs.
    pub fn init<P: Registers>(
        &self,
        config: &Config,
        pmc: &Pmc<P>,
        _irqs: impl Binding<typelevel::SPI, InterruptHandler>,
    ) -> Result<(), Error> {
        if config.interrupt_priority >= 1 << PRIORITY_BITS {
            return Err(Error::InvalidPriority(config.interrupt_priority));
        }

        self.line.disable();
        self.line.unpend();
        self.line.set_priority(config.interrupt_priority);

        pmc.enable_peripheral_clock(PeripheralId::SPI);

        let r = &self.regs;
        r.write(regs::spi::CR, regs::spi::CR_SPIEN);
        r.write(regs::spi::MR, regs::spi::MR_MSTR | regs::spi::MR_PS | regs::spi::MR_MODFDIS);
        r.write(regs::spi::IDR, u32::MAX);
        r.write(regs::spi::IER, regs::spi::SR_ENDRX);
        r.write(regs::spi::PTCR, regs::spi::PTCR_RXTEN | regs::spi::PTCR_TXTEN);

        #[cfg(feature = "defmt")]
        defmt::debug!("spi: master enabled, priority {}", config.interrupt_priority);

        Ok(())
    }

    /// Program the chip select register of one device.
    ///
    /// Call during setup, before transfers to that chip select are issued.
    pub fn configure_device(&self, config: &DeviceConfig, clocks: &Clocks) -> Result<(), Error> {
        let csr = config.csr(clocks.master_clk)?;
        self.regs.write(regs::spi::csr(config.chip_select.index()), csr);
        Ok(())
    }

    /// Transmit `request` and return the words received meanwhile.
    ///
    /// Waits for the controller if another transfer is running, then until the completion
    /// interrupt. There is no timeout: without the interrupt the future stays pending. Dropping
    /// the future stops the transfer.
    pub async fn transceive(&self, request: TransferRequest) -> Result<ReceiveBuffer, Error> {
        self.transceive_until(request, core::future::pending::<()>()).await
    }

    /// Like [Spi::transceive], but gives up with [Error::Timeout] once `deadline` completes.
    ///
    /// The deadline covers the wait for the controller as well as the transfer.
    pub async fn transceive_until(
        &self,
        request: TransferRequest,
        deadline: impl Future,
    ) -> Result<ReceiveBuffer, Error> {
        if request.is_empty() {
            return Err(Error::EmptyTransfer);
        }

        let mut deadline = core::pin::pin!(deadline);
        let _bus = match select(self.lock.lock(), deadline.as_mut()).await {
            Either::First(bus) => bus,
            Either::Second(_) => return Err(Error::Timeout),
        };

        self.run(request, deadline).await
    }

    /// Run one transfer. The caller holds `self.lock` and `request` is not empty.
    async fn run(&self, request: TransferRequest, deadline: impl Future) -> Result<ReceiveBuffer, Error> {
        let len = request.len();
        let mut rx = ReceiveBuffer::zeroed(len);

        self.done.reset();
        critical_section::with(|cs| self.callback.borrow(cs).set(request.callback));
        self.in_flight.store(true, Ordering::Release);

        #[cfg(feature = "defmt")]
        defmt::trace!("spi: transfer of {} words", len);

        // Buffers must be fully written before the PDC may read them.
        compiler_fence(Ordering::SeqCst);

        let r = &self.regs;
        r.write_address(regs::spi::RPR, rx.words.as_mut_ptr() as usize);
        r.write(regs::spi::RCR, len as u32);
        r.write_address(regs::spi::TPR, request.words.as_ptr() as usize);
        r.write(regs::spi::TCR, len as u32);

        let guard = OnDrop::new(|| self.abort());

        // ENDRX of the previous transfer may have left the line pending.
        self.line.unpend();
        self.line.enable();
        r.write(regs::spi::CR, regs::spi::CR_SPIEN);

        match select(self.done.wait(), deadline).await {
            Either::First(()) => {
                guard.defuse();
                compiler_fence(Ordering::SeqCst);
                Ok(rx)
            }
            Either::Second(_) => {
                drop(guard);
                Err(Error::Timeout)
            }
        }
    }

    /// Stop an abandoned transfer so the PDC no longer touches its buffers.
    fn abort(&self) {
        // Note(cs): must not interleave with the completion interrupt.
        critical_section::with(|cs| {
            self.line.disable();
            self.in_flight.store(false, Ordering::Release);
            self.regs.write(regs::spi::CR, regs::spi::CR_SPIDIS);
            self.regs.write(regs::spi::TCR, 0);
            self.regs.write(regs::spi::RCR, 0);
            self.callback.borrow(cs).set(None);
            self.done.reset();
        });

        #[cfg(feature = "defmt")]
        defmt::warn!("spi: transfer abandoned");
    }

    /// SPI interrupt handler.
    ///
    /// On `ENDRX` runs the pending callback and resumes the waiting task, then stops the
    /// controller and masks the line. While a transfer runs, any other interrupt leaves it alone.
    /// Without a transfer the controller is stopped and the line masked.
    pub fn on_interrupt(&self) {
        // Reading the status register acknowledges the interrupt.
        let status = self.regs.read(regs::spi::SR);

        if status & regs::spi::SR_ENDRX == 0 && self.in_flight.load(Ordering::Acquire) {
            #[cfg(feature = "defmt")]
            defmt::trace!("spi: interrupt during transfer, status {:#x}", status);
            return;
        }

        if self.in_flight.swap(false, Ordering::AcqRel) {
            let callback = critical_section::with(|cs| self.callback.borrow(cs).take());
            if let Some(callback) = callback {
                callback();
            }
            self.done.signal(());
        }

        self.regs.write(regs::spi::CR, regs::spi::CR_SPIDIS);
        self.line.disable();
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::AtomicU32;

    use embassy_futures::join::{join, join3};
    use embassy_futures::{block_on, yield_now};

    use super::*;
    use crate::mock::{complete_next_transfer, loopback, payloads, MockLine, MockRegisters};

    struct Irqs;

    // Safety: the tests call `on_interrupt` themselves.
    unsafe impl Binding<typelevel::SPI, InterruptHandler> for Irqs {}

    fn spi() -> Spi<MockRegisters, MockLine> {
        Spi::new(MockRegisters::spi(), MockLine::new())
    }

    fn request(cs: ChipSelect, payloads: &[u16]) -> TransferRequest {
        let mut request = TransferRequest::new();
        for p in payloads {
            request.push(cs.word(false, *p)).unwrap();
        }
        request.mark_last();
        request
    }

    #[test]
    fn init_registers() {
        let spi = spi();
        let pmc = Pmc::new(MockRegisters::new());
        spi.init(&Config::default(), &pmc, Irqs).unwrap();

        let r = spi.regs();
        assert_eq!(r.value(regs::spi::MR), 0b1_0011);
        assert_eq!(r.value(regs::spi::IMR), regs::spi::SR_ENDRX);
        assert_eq!(r.value(regs::spi::PTCR), (1 << 8) | 1);
        assert_eq!(pmc.regs().value(regs::pmc::PCER0), 1 << 21);

        assert!(!spi.line().is_enabled());
        assert_eq!(spi.line().unpends(), 1);
        assert_eq!(spi.line().priority(), 5);
    }

    #[test]
    fn init_rejects_unimplemented_priority() {
        let spi = spi();
        let pmc = Pmc::new(MockRegisters::new());
        let config = Config {
            interrupt_priority: 16,
            ..Config::default()
        };
        assert_eq!(spi.init(&config, &pmc, Irqs), Err(Error::InvalidPriority(16)));
        assert!(spi.regs().log().is_empty());
    }

    #[test]
    fn chip_select_register() {
        let config = DeviceConfig {
            chip_select: ChipSelect::Cs1,
            bits_per_transfer: 9,
            frequency: 10_000_000,
            delay_before_clock: 4,
            delay_between_transfers: 2,
            ..DeviceConfig::default()
        };
        // Mode 0 samples on the first edge, so NCPHA is set.
        let expected = regs::spi::CSR_NCPHA | regs::spi::CSR_CSAAT | (1 << 4) | (10 << 8) | (4 << 16) | (2 << 24);
        assert_eq!(config.csr(100_000_000), Ok(expected));

        let spi = spi();
        let clocks = Clocks {
            main_clk: 12_000_000,
            plla_clk: Some(100_000_000),
            master_clk: 100_000_000,
        };
        spi.configure_device(&config, &clocks).unwrap();
        assert_eq!(spi.regs().value(regs::spi::csr(1)), expected);
    }

    #[test]
    fn chip_select_register_modes() {
        let mode3 = DeviceConfig {
            mode: embedded_hal::spi::MODE_3,
            keep_asserted: false,
            ..DeviceConfig::default()
        };
        let csr = mode3.csr(8_000_000).unwrap();
        assert_eq!(csr & 0b11, regs::spi::CSR_CPOL);
        assert_eq!(csr & regs::spi::CSR_CSAAT, 0);
        assert_eq!(csr >> 8 & 0xFF, 8);
    }

    #[test]
    fn baud_divisor_rounds_up() {
        let config = DeviceConfig {
            frequency: 3_000_000,
            ..DeviceConfig::default()
        };
        assert_eq!(config.csr(100_000_000).unwrap() >> 8 & 0xFF, 34);
    }

    #[test]
    fn invalid_device_configs() {
        let slow = DeviceConfig {
            frequency: 100_000,
            ..DeviceConfig::default()
        };
        assert_eq!(slow.csr(100_000_000), Err(Error::InvalidBaudRate { divisor: 1000 }));

        let zero = DeviceConfig {
            frequency: 0,
            ..DeviceConfig::default()
        };
        assert_eq!(zero.csr(100_000_000), Err(Error::InvalidBaudRate { divisor: 0 }));

        let wide = DeviceConfig {
            bits_per_transfer: 17,
            ..DeviceConfig::default()
        };
        assert_eq!(wide.csr(100_000_000), Err(Error::InvalidWordSize(17)));
    }

    #[test]
    fn pin_routing() {
        let pioa = Bank::new(Port::A, MockRegisters::pio());
        let piob = Bank::new(Port::B, MockRegisters::pio());
        let pioc = Bank::new(Port::C, MockRegisters::pio());
        let pins = Pins {
            npcs0: Some(Npcs0Pin::PA11),
            npcs1: Some(Npcs1Pin::PC4),
            npcs2: Some(Npcs2Pin::PB2),
            npcs3: None,
        };

        route_pins(&pins, &pioa, &piob, &pioc).unwrap();

        assert_eq!(
            pioa.regs().writes_to(regs::pio::PDR).as_slice(),
            &[1 << 14, 1 << 13, 1 << 12, 1 << 11]
        );
        assert_eq!(pioa.regs().value(regs::pio::ABCDSR1), 0);
        assert_eq!(pioc.regs().value(regs::pio::PDR), 1 << 4);
        assert_eq!(pioc.regs().value(regs::pio::ABCDSR1), 1 << 4);
        assert_eq!(piob.regs().value(regs::pio::ABCDSR1), 1 << 2);
    }

    #[test]
    fn transfer_programs_pdc_and_returns_received_words() {
        let spi = spi();
        let words = request(ChipSelect::Cs1, &[0x2A, 0x100, 0x1EF]);

        let (rx, sent) = block_on(join(spi.transceive(words), complete_next_transfer(&spi, |w| !w & 0xFFFF)));
        let rx = rx.unwrap();

        assert_eq!(sent.as_slice(), &[(1 << 16) | 0x2A, (1 << 16) | 0x100, (1 << 24) | (1 << 16) | 0x1EF]);
        assert_eq!(rx.len(), 3);
        assert_eq!(payloads(&rx).as_slice(), &[!0x2Au16, !0x100, !0x1EF]);

        let r = spi.regs();
        assert_eq!(r.writes_to(regs::spi::TCR).first(), Some(&3));
        assert_eq!(r.writes_to(regs::spi::RCR).first(), Some(&3));
        assert_eq!(r.value(regs::spi::CR), regs::spi::CR_SPIDIS);
        assert!(!spi.line().is_enabled());
        assert!(!spi.is_busy());
    }

    #[test]
    fn empty_transfer_is_rejected() {
        let spi = spi();
        assert_eq!(
            block_on(spi.transceive(TransferRequest::new())).unwrap_err(),
            Error::EmptyTransfer
        );
        assert!(spi.regs().log().is_empty());
        assert_eq!(spi.line().enables(), 0);
    }

    #[test]
    fn transfers_are_serialized() {
        let spi = spi();
        let a = request(ChipSelect::Cs0, &[0xA]);
        let b = request(ChipSelect::Cs2, &[0xB, 0xC]);

        let (ra, rb, ()) = block_on(join3(spi.transceive(a), spi.transceive(b), async {
            let first = complete_next_transfer(&spi, loopback).await;
            // The second caller has not touched the controller yet.
            assert_eq!(spi.regs().writes_to(regs::spi::TPR).len(), 1);
            assert_eq!(first.as_slice(), &[(1 << 24) | 0xA]);

            let second = complete_next_transfer(&spi, loopback).await;
            assert_eq!(second.as_slice(), &[(3 << 16) | 0xB, (1 << 24) | (3 << 16) | 0xC]);
        }));

        assert_eq!(payloads(&ra.unwrap()).as_slice(), &[0xA]);
        assert_eq!(payloads(&rb.unwrap()).as_slice(), &[0xB, 0xC]);
        assert_eq!(spi.line().enables(), 2);
    }

    #[test]
    fn callback_runs_once_before_completion() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn callback() {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let spi = spi();
        let words = request(ChipSelect::Cs0, &[1]).with_callback(callback);

        let (rx, _) = block_on(join(spi.transceive(words), async {
            complete_next_transfer(&spi, loopback).await;
            assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        }));
        rx.unwrap();

        // A later spurious interrupt neither repeats the callback nor posts completion.
        spi.regs().set(regs::spi::SR, regs::spi::SR_ENDRX);
        spi.on_interrupt();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn spurious_interrupt() {
        let spi = spi();
        spi.regs().set(regs::spi::SR, regs::spi::SR_TXEMPTY);

        spi.on_interrupt();

        assert_eq!(spi.regs().reads_of(regs::spi::SR), 1);
        assert_eq!(spi.regs().value(regs::spi::SR), 0);
        assert_eq!(spi.regs().value(regs::spi::CR), regs::spi::CR_SPIDIS);
        assert_eq!(spi.line().disables(), 1);

        // No stale completion is left behind for the next transfer.
        let (rx, sent) = block_on(join(
            spi.transceive(request(ChipSelect::Cs3, &[7])),
            complete_next_transfer(&spi, loopback),
        ));
        assert_eq!(rx.unwrap().len(), 1);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn interrupt_without_endrx_leaves_transfer_running() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn callback() {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let spi = spi();
        let words = request(ChipSelect::Cs2, &[1, 2, 3]).with_callback(callback);
        let returned = AtomicBool::new(false);

        let (rx, ()) = block_on(join(
            async {
                let rx = spi.transceive(words).await;
                returned.store(true, Ordering::SeqCst);
                rx
            },
            async {
                while !spi.line().is_enabled() {
                    yield_now().await;
                }

                // The PDC is mid-transfer when an unrelated event hits the vector.
                spi.regs().set(regs::spi::SR, regs::spi::SR_TXEMPTY);
                spi.on_interrupt();
                for _ in 0..8 {
                    yield_now().await;
                }

                assert!(!returned.load(Ordering::SeqCst));
                assert!(spi.is_busy());
                assert!(spi.line().is_enabled());
                assert_eq!(spi.regs().value(regs::spi::CR), regs::spi::CR_SPIEN);
                assert_eq!(spi.regs().value(regs::spi::RCR), 3);
                assert_eq!(CALLS.load(Ordering::SeqCst), 0);

                complete_next_transfer(&spi, loopback).await;
            },
        ));

        assert_eq!(payloads(&rx.unwrap()).as_slice(), &[1, 2, 3]);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stays_pending_without_interrupt() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn callback() {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let spi = spi();
        let words = request(ChipSelect::Cs0, &[1, 2]).with_callback(callback);

        let outcome = block_on(select(spi.transceive(words), async {
            for _ in 0..16 {
                yield_now().await;
            }
        }));
        assert!(matches!(outcome, Either::Second(())));

        // Dropping the pending transfer stopped the controller and the PDC.
        let r = spi.regs();
        assert_eq!(r.value(regs::spi::CR), regs::spi::CR_SPIDIS);
        assert_eq!(r.value(regs::spi::TCR), 0);
        assert_eq!(r.value(regs::spi::RCR), 0);
        assert!(!spi.line().is_enabled());
        assert!(!spi.is_busy());

        spi.on_interrupt();
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deadline() {
        let spi = spi();
        let result = block_on(spi.transceive_until(request(ChipSelect::Cs0, &[1]), yield_now()));

        assert_eq!(result.unwrap_err(), Error::Timeout);
        assert_eq!(spi.regs().value(regs::spi::CR), regs::spi::CR_SPIDIS);
        assert!(!spi.line().is_enabled());

        // The controller is usable again.
        let (rx, _) = block_on(join(
            spi.transceive(request(ChipSelect::Cs0, &[2])),
            complete_next_transfer(&spi, loopback),
        ));
        assert_eq!(payloads(&rx.unwrap()).as_slice(), &[2]);
    }

    #[test]
    fn display_window_transfer() {
        let spi = spi();
        let mut words = TransferRequest::new();
        crate::ili9341::address_window(&mut words, ChipSelect::Cs1, 0, 0, 0, 0).unwrap();
        for payload in [0x2C, 0x1F8, 0x11F] {
            words.push(ChipSelect::Cs1.word(false, payload)).unwrap();
        }
        words.mark_last();

        let (rx, sent) = block_on(join(spi.transceive(words), complete_next_transfer(&spi, loopback)));

        let rx = rx.unwrap();
        assert_eq!(sent.len(), 13);
        assert_eq!(rx.len(), 13);
        assert_eq!(sent[10], (1 << 16) | 0x2C);
        assert_eq!(sent[12], (1 << 24) | (1 << 16) | 0x11F);
        assert_eq!(payloads(&rx)[11], 0x1F8);
    }
}
