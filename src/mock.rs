//! Register and interrupt-line doubles for host testing.
//!
//! [MockRegisters] keeps a plain register file and a log of every access, with opt-in hardware
//! behaviour: clear-on-read status registers and set/clear/status register triples such as
//! `PIO_IER`/`PIO_IDR`/`PIO_IMR`.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::interrupt::InterruptLine;
use crate::regs::{self, Registers};
use crate::spi::{ReceiveBuffer, Spi, TRANSFER_CAPACITY};

const WORDS: usize = 128;
const LOG_DEPTH: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Read(usize),
    Write(usize, u32),
}

struct State {
    words: [u32; WORDS],
    addresses: [usize; WORDS],
    log: heapless::Vec<Access, LOG_DEPTH>,
    clear_on_read: heapless::Vec<usize, 4>,
    set_clear: heapless::Vec<(usize, usize, usize), 4>,
}

pub struct MockRegisters {
    state: Mutex<CriticalSectionRawMutex, RefCell<State>>,
}

impl MockRegisters {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                words: [0; WORDS],
                addresses: [0; WORDS],
                log: heapless::Vec::new(),
                clear_on_read: heapless::Vec::new(),
                set_clear: heapless::Vec::new(),
            })),
        }
    }

    /// Registers behaving like a SAM4S PIO bank.
    pub fn pio() -> Self {
        let mock = Self::new();
        mock.clear_on_read(regs::pio::ISR);
        mock.set_clear(regs::pio::IER, regs::pio::IDR, regs::pio::IMR);
        mock
    }

    /// Registers behaving like the SAM4S SPI block.
    pub fn spi() -> Self {
        let mock = Self::new();
        mock.clear_on_read(regs::spi::SR);
        mock.set_clear(regs::spi::IER, regs::spi::IDR, regs::spi::IMR);
        mock
    }

    /// Make reads of `offset` return the value and then clear it.
    pub fn clear_on_read(&self, offset: usize) {
        self.state.lock(|s| {
            let _ = s.borrow_mut().clear_on_read.push(offset);
        });
    }

    /// Writes to `set` OR into `status`, writes to `clear` mask out of `status`.
    pub fn set_clear(&self, set: usize, clear: usize, status: usize) {
        self.state.lock(|s| {
            let _ = s.borrow_mut().set_clear.push((set, clear, status));
        });
    }

    /// Current register content, without logging a read.
    pub fn value(&self, offset: usize) -> u32 {
        self.state.lock(|s| s.borrow().words[offset / 4])
    }

    /// Full-width address last written through [Registers::write_address].
    pub fn address(&self, offset: usize) -> usize {
        self.state.lock(|s| s.borrow().addresses[offset / 4])
    }

    /// Set a register as the hardware would, without logging a write.
    pub fn set(&self, offset: usize, value: u32) {
        self.state.lock(|s| s.borrow_mut().words[offset / 4] = value);
    }

    pub fn log(&self) -> heapless::Vec<Access, LOG_DEPTH> {
        self.state.lock(|s| s.borrow().log.clone())
    }

    pub fn clear_log(&self) {
        self.state.lock(|s| s.borrow_mut().log.clear());
    }

    /// Values written to `offset`, oldest first.
    pub fn writes_to(&self, offset: usize) -> heapless::Vec<u32, LOG_DEPTH> {
        self.log()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(o, v) if o == offset => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.log().iter().filter(|a| **a == Access::Read(offset)).count()
    }
}

impl Default for MockRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers for MockRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let _ = s.log.push(Access::Read(offset));
            let value = s.words[offset / 4];
            if s.clear_on_read.contains(&offset) {
                s.words[offset / 4] = 0;
            }
            value
        })
    }

    fn write(&self, offset: usize, value: u32) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let _ = s.log.push(Access::Write(offset, value));
            s.words[offset / 4] = value;
            let triples = s.set_clear.clone();
            for (set, clear, status) in triples {
                if offset == set {
                    s.words[status / 4] |= value;
                } else if offset == clear {
                    s.words[status / 4] &= !value;
                }
            }
        });
    }

    fn write_address(&self, offset: usize, address: usize) {
        self.write(offset, address as u32);
        self.state.lock(|s| s.borrow_mut().addresses[offset / 4] = address);
    }
}

/// Interrupt line that records what the drivers did to it.
pub struct MockLine {
    enabled: AtomicBool,
    enables: AtomicU32,
    disables: AtomicU32,
    unpends: AtomicU32,
    priority: AtomicU8,
}

impl MockLine {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            enables: AtomicU32::new(0),
            disables: AtomicU32::new(0),
            unpends: AtomicU32::new(0),
            priority: AtomicU8::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enables(&self) -> u32 {
        self.enables.load(Ordering::Acquire)
    }

    pub fn disables(&self) -> u32 {
        self.disables.load(Ordering::Acquire)
    }

    pub fn unpends(&self) -> u32 {
        self.unpends.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Acquire)
    }
}

impl Default for MockLine {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLine for MockLine {
    fn enable(&self) {
        self.enables.fetch_add(1, Ordering::AcqRel);
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        self.disables.fetch_add(1, Ordering::AcqRel);
        self.enabled.store(false, Ordering::Release);
    }

    fn unpend(&self) {
        self.unpends.fetch_add(1, Ordering::AcqRel);
    }

    fn set_priority(&self, priority: u8) {
        self.priority.store(priority, Ordering::Release);
    }
}

/// Wait until `spi` has started a transfer, play the PDC's part and raise the completion
/// interrupt.
///
/// Each received word is `respond(transmitted word)`. Returns the transmitted words.
pub async fn complete_next_transfer(
    spi: &Spi<MockRegisters, MockLine>,
    respond: impl Fn(u32) -> u32,
) -> heapless::Vec<u32, TRANSFER_CAPACITY> {
    while !(spi.line().is_enabled() && spi.regs().value(regs::spi::CR) == regs::spi::CR_SPIEN) {
        embassy_futures::yield_now().await;
    }

    let regs = spi.regs();
    let len = regs.value(regs::spi::TCR) as usize;
    assert_eq!(len, regs.value(regs::spi::RCR) as usize);

    let tx = regs.address(regs::spi::TPR) as *const u32;
    let rx = regs.address(regs::spi::RPR) as *mut u32;

    let mut sent = heapless::Vec::new();
    for i in 0..len {
        // Safety: the engine keeps both buffers alive until the completion interrupt.
        unsafe {
            let word = tx.add(i).read_volatile();
            rx.add(i).write_volatile(respond(word));
            let _ = sent.push(word);
        }
    }

    regs.set(regs::spi::TCR, 0);
    regs.set(regs::spi::RCR, 0);
    regs.set(regs::spi::SR, regs::spi::SR_ENDRX | regs::spi::SR_TXEMPTY);
    spi.on_interrupt();
    sent
}

/// Loopback of the payload bits, as with MOSI wired to MISO.
pub fn loopback(word: u32) -> u32 {
    word & 0xFFFF
}

/// Convenience for tests that only need the received payloads.
pub fn payloads(rx: &ReceiveBuffer) -> heapless::Vec<u16, TRANSFER_CAPACITY> {
    rx.iter().map(|w| *w as u16).collect()
}
