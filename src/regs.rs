//! Register access for the SAM4S peripheral blocks used by this crate.
//!
//! Drivers talk to hardware through [Registers], a 32-bit read/write contract at a byte offset
//! from the block base. [Mmio] is the volatile implementation for the real chip; the host tests
//! use `crate::mock::MockRegisters`.

/// 32-bit register access at a byte offset from a peripheral base.
pub trait Registers: Sync {
    /// Read the register at `offset`.
    ///
    /// Some registers (`SPI_SR`, `PIO_ISR`) clear their flags on read.
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`.
    fn write(&self, offset: usize, value: u32);

    /// Write a bus address to a PDC pointer register.
    fn write_address(&self, offset: usize, address: usize) {
        self.write(offset, address as u32);
    }

    /// Read-modify-write. Callers sharing a register with other contexts must hold a critical section.
    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

/// Memory-mapped register block at a fixed base address.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Safety: `base` must be the address of a peripheral register block that is valid for the
    /// `'static` lifetime, and the caller must not create conflicting drivers for the same block.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }
}

impl Registers for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // Safety: the constructor guarantees `base` points at a live register block.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&self, offset: usize, value: u32) {
        // Safety: the constructor guarantees `base` points at a live register block.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

/// SPI controller with its PDC channel.
pub mod spi {
    pub const BASE: usize = 0x4000_8000;

    pub const CR: usize = 0x00;
    pub const MR: usize = 0x04;
    pub const SR: usize = 0x10;
    pub const IER: usize = 0x14;
    pub const IDR: usize = 0x18;
    pub const IMR: usize = 0x1C;

    pub const fn csr(n: usize) -> usize {
        0x30 + 4 * n
    }

    // PDC
    pub const RPR: usize = 0x100;
    pub const RCR: usize = 0x104;
    pub const TPR: usize = 0x108;
    pub const TCR: usize = 0x10C;
    pub const PTCR: usize = 0x120;

    pub const CR_SPIEN: u32 = 1 << 0;
    pub const CR_SPIDIS: u32 = 1 << 1;

    pub const MR_MSTR: u32 = 1 << 0;
    pub const MR_PS: u32 = 1 << 1;
    pub const MR_PCSDEC: u32 = 1 << 2;
    pub const MR_MODFDIS: u32 = 1 << 4;

    pub const SR_ENDRX: u32 = 1 << 4;
    pub const SR_TXEMPTY: u32 = 1 << 9;

    pub const PTCR_RXTEN: u32 = 1 << 0;
    pub const PTCR_RXTDIS: u32 = 1 << 1;
    pub const PTCR_TXTEN: u32 = 1 << 8;
    pub const PTCR_TXTDIS: u32 = 1 << 9;

    pub const CSR_CPOL: u32 = 1 << 0;
    pub const CSR_NCPHA: u32 = 1 << 1;
    pub const CSR_CSAAT: u32 = 1 << 3;
    pub const CSR_BITS_SHIFT: u32 = 4;
    pub const CSR_SCBR_SHIFT: u32 = 8;
    pub const CSR_DLYBS_SHIFT: u32 = 16;
    pub const CSR_DLYBCT_SHIFT: u32 = 24;
}

/// Parallel I/O controller, identical layout for PIOA, PIOB and PIOC.
pub mod pio {
    pub const PIOA_BASE: usize = 0x400E_0E00;
    pub const PIOB_BASE: usize = 0x400E_1000;
    pub const PIOC_BASE: usize = 0x400E_1200;

    pub const PER: usize = 0x00;
    pub const PDR: usize = 0x04;
    pub const OER: usize = 0x10;
    pub const ODR: usize = 0x14;
    pub const IFER: usize = 0x20;
    pub const IFDR: usize = 0x24;
    pub const SODR: usize = 0x30;
    pub const CODR: usize = 0x34;
    pub const ODSR: usize = 0x38;
    pub const PDSR: usize = 0x3C;
    pub const IER: usize = 0x40;
    pub const IDR: usize = 0x44;
    pub const IMR: usize = 0x48;
    pub const ISR: usize = 0x4C;
    pub const PUDR: usize = 0x60;
    pub const PUER: usize = 0x64;
    pub const ABCDSR1: usize = 0x70;
    pub const ABCDSR2: usize = 0x74;
    pub const IFSCDR: usize = 0x80;
    pub const IFSCER: usize = 0x84;
    pub const PPDDR: usize = 0x90;
    pub const PPDER: usize = 0x94;
    pub const AIMER: usize = 0xB0;
    pub const AIMDR: usize = 0xB4;
    pub const ESR: usize = 0xC0;
    pub const LSR: usize = 0xC4;
    pub const FELLSR: usize = 0xD0;
    pub const REHLSR: usize = 0xD4;
    pub const WPMR: usize = 0xE4;

    pub const WPKEY: u32 = 0x5049_4F << 8;
    pub const WPEN: u32 = 1;
}

/// Power management controller.
pub mod pmc {
    pub const BASE: usize = 0x400E_0400;

    pub const PCER0: usize = 0x10;
    pub const PCDR0: usize = 0x14;
    pub const PCSR0: usize = 0x18;
    pub const CKGR_MOR: usize = 0x20;
    pub const CKGR_PLLAR: usize = 0x28;
    pub const MCKR: usize = 0x30;
    pub const SR: usize = 0x68;
    pub const WPMR: usize = 0xE4;
    pub const PCER1: usize = 0x100;
    pub const PCDR1: usize = 0x104;
    pub const PCSR1: usize = 0x108;

    pub const MOR_KEY: u32 = 0x37 << 16;
    pub const MOR_MOSCXTEN: u32 = 1 << 0;
    pub const MOR_MOSCXTBY: u32 = 1 << 1;
    pub const MOR_MOSCRCEN: u32 = 1 << 3;
    pub const MOR_MOSCRCF_SHIFT: u32 = 4;
    pub const MOR_MOSCRCF_MASK: u32 = 0x7 << 4;
    pub const MOR_MOSCXTST_SHIFT: u32 = 8;
    pub const MOR_MOSCXTST_MASK: u32 = 0xFF << 8;
    pub const MOR_MOSCSEL: u32 = 1 << 24;

    pub const PLLAR_ONE: u32 = 1 << 29;
    pub const PLLAR_MULA_SHIFT: u32 = 16;
    pub const PLLAR_PLLACOUNT_SHIFT: u32 = 8;

    pub const MCKR_CSS_MASK: u32 = 0x3;
    pub const MCKR_PRES_SHIFT: u32 = 4;
    pub const MCKR_PRES_MASK: u32 = 0x7 << 4;

    pub const SR_MOSCXTS: u32 = 1 << 0;
    pub const SR_LOCKA: u32 = 1 << 1;
    pub const SR_MCKRDY: u32 = 1 << 3;
    pub const SR_MOSCSELS: u32 = 1 << 16;
    pub const SR_MOSCRCS: u32 = 1 << 17;

    pub const WPKEY: u32 = 0x504D_43 << 8;
    pub const WPEN: u32 = 1;
}

/// Enhanced embedded flash controller.
pub mod efc {
    pub const BASE: usize = 0x400E_0A00;

    pub const FMR: usize = 0x00;

    pub const FMR_FWS_SHIFT: u32 = 8;
    pub const FMR_CLOE: u32 = 1 << 26;
}
