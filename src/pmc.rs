//! Power Management Controller
//!
//! Peripheral clock gating and the main clock, PLLA and master clock setup.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::regs::{self, Registers};

const MAX_PERIPHERAL_ID: u8 = 47;
const MAX_MASTER_CLOCK: u32 = 120_000_000;
/// Slow clock cycles x8 to wait for PLLA lock.
const PLLA_COUNT: u32 = 0x3F;
/// Slow clock cycles x8 to wait for the crystal to start.
const XTAL_STARTUP: u32 = 0xFF;
const SLOW_CLOCK: u32 = 32_768;

/// Frozen clock frequencies
static CLOCKS: Mutex<CriticalSectionRawMutex, Cell<Option<Clocks>>> = Mutex::new(Cell::new(None));

fn set_clocks(clocks: Clocks) {
    #[cfg(feature = "defmt")]
    defmt::debug!("pmc: {:?}", clocks);
    CLOCKS.lock(|c| c.set(Some(clocks)));
}

/// Clock frequencies frozen by the last [Pmc::init], if any.
pub fn clocks() -> Option<Clocks> {
    CLOCKS.lock(Cell::get)
}

/// Peripheral identifier, equal to the peripheral's interrupt number.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralId(u8);

impl PeripheralId {
    pub const PIOA: Self = Self(11);
    pub const PIOB: Self = Self(12);
    pub const PIOC: Self = Self(13);
    pub const SPI: Self = Self(21);

    pub const fn new(id: u8) -> Option<Self> {
        if id <= MAX_PERIPHERAL_ID {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    /// Enable, disable and status register offsets plus the bit within them.
    const fn registers(self) -> (usize, usize, usize, u32) {
        if self.0 < 32 {
            (regs::pmc::PCER0, regs::pmc::PCDR0, regs::pmc::PCSR0, 1 << self.0)
        } else {
            (regs::pmc::PCER1, regs::pmc::PCDR1, regs::pmc::PCSR1, 1 << (self.0 - 32))
        }
    }
}

/// Main clock source.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MainClock {
    Rc4Mhz,
    Rc8Mhz,
    Rc12Mhz,
    /// External crystal of the given frequency.
    Crystal { hz: u32 },
}

impl MainClock {
    pub const fn frequency(self) -> u32 {
        match self {
            MainClock::Rc4Mhz => 4_000_000,
            MainClock::Rc8Mhz => 8_000_000,
            MainClock::Rc12Mhz => 12_000_000,
            MainClock::Crystal { hz } => hz,
        }
    }
}

/// PLLA as `main * mul / div`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Plla {
    /// Range: 2..=63
    pub mul: u8,
    /// Range: 1..=255
    pub div: u8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterClockSource {
    Slow = 0,
    Main = 1,
    Plla = 2,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    Div1 = 0,
    Div2 = 1,
    Div4 = 2,
    Div8 = 3,
    Div16 = 4,
    Div32 = 5,
    Div64 = 6,
    Div3 = 7,
}

impl Prescaler {
    pub const fn div_value(self) -> u32 {
        match self {
            Prescaler::Div3 => 3,
            p => 1 << p as u32,
        }
    }
}

/// Clock config parameters
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    pub main_clock: MainClock,
    /// PLLA, disabled when `None`.
    pub plla: Option<Plla>,
    pub master_clock_source: MasterClockSource,
    pub prescaler: Prescaler,
}

impl Default for Config {
    /// 100 MHz from the internal 12 MHz RC oscillator.
    fn default() -> Self {
        Self {
            main_clock: MainClock::Rc12Mhz,
            plla: Some(Plla { mul: 25, div: 3 }),
            master_clock_source: MasterClockSource::Plla,
            prescaler: Prescaler::Div1,
        }
    }
}

/// Frozen clock frequencies
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    pub main_clk: u32,
    pub plla_clk: Option<u32>,
    /// MCK, clocking the processor and the peripherals.
    pub master_clk: u32,
}

impl Config {
    /// Frequencies this configuration produces.
    ///
    /// Panics on configurations the hardware cannot run.
    pub fn clocks(&self) -> Clocks {
        let main_clk = self.main_clock.frequency();
        if let MainClock::Crystal { hz } = self.main_clock {
            assert!((3_000_000..=20_000_000).contains(&hz), "Crystal must be 3..=20 MHz");
        }

        let plla_clk = self.plla.map(|plla| {
            assert!((2..=63).contains(&plla.mul), "PLLA multiplier must be in 2..=63");
            assert!(plla.div >= 1, "PLLA divider must be at least 1");
            let clk = (main_clk as u64 * plla.mul as u64 / plla.div as u64) as u32;
            assert!((80_000_000..=240_000_000).contains(&clk), "PLLA output must be 80..=240 MHz");
            clk
        });

        let source_clk = match self.master_clock_source {
            MasterClockSource::Slow => SLOW_CLOCK,
            MasterClockSource::Main => main_clk,
            MasterClockSource::Plla => plla_clk.unwrap_or_else(|| panic!("PLLA selected as master clock but disabled")),
        };
        let master_clk = source_clk / self.prescaler.div_value();
        assert!(master_clk <= MAX_MASTER_CLOCK, "Max MCK speed is 120 MHz");

        Clocks {
            main_clk,
            plla_clk,
            master_clk,
        }
    }
}

pub struct Pmc<R> {
    regs: R,
}

impl<R: Registers> Pmc<R> {
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Note(cs): the write protection is shared by every PMC user.
    fn unprotected<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        critical_section::with(|_| {
            self.regs.write(regs::pmc::WPMR, regs::pmc::WPKEY);
            let result = f(&self.regs);
            self.regs.write(regs::pmc::WPMR, regs::pmc::WPKEY | regs::pmc::WPEN);
            result
        })
    }

    fn wait_for(&self, flag: u32) {
        while self.regs.read(regs::pmc::SR) & flag == 0 {}
    }

    pub fn enable_peripheral_clock(&self, id: PeripheralId) {
        let (enable, _, status, bit) = id.registers();
        self.unprotected(|r| {
            if r.read(status) & bit == 0 {
                r.write(enable, bit);
            }
        });
    }

    pub fn disable_peripheral_clock(&self, id: PeripheralId) {
        let (_, disable, status, bit) = id.registers();
        self.unprotected(|r| {
            if r.read(status) & bit != 0 {
                r.write(disable, bit);
            }
        });
    }

    pub fn is_peripheral_clock_enabled(&self, id: PeripheralId) -> bool {
        let (_, _, status, bit) = id.registers();
        self.regs.read(status) & bit != 0
    }

    /// Switch the clock tree to `config` and freeze the resulting frequencies.
    ///
    /// Flash wait states must already cover the new master clock, see [crate::efc].
    pub fn init(&self, config: &Config) -> Clocks {
        let clocks = config.clocks();

        self.unprotected(|r| {
            match config.main_clock {
                MainClock::Crystal { .. } => {
                    r.modify(regs::pmc::CKGR_MOR, |v| {
                        (v & !(regs::pmc::MOR_MOSCXTBY | regs::pmc::MOR_MOSCXTST_MASK))
                            | regs::pmc::MOR_KEY
                            | regs::pmc::MOR_MOSCXTEN
                            | (XTAL_STARTUP << regs::pmc::MOR_MOSCXTST_SHIFT)
                    });
                    self.wait_for(regs::pmc::SR_MOSCXTS);

                    r.modify(regs::pmc::CKGR_MOR, |v| v | regs::pmc::MOR_KEY | regs::pmc::MOR_MOSCSEL);
                    self.wait_for(regs::pmc::SR_MOSCSELS);

                    r.modify(regs::pmc::CKGR_MOR, |v| {
                        (v & !(regs::pmc::MOR_MOSCRCEN | regs::pmc::MOR_MOSCRCF_MASK)) | regs::pmc::MOR_KEY
                    });
                }
                rc => {
                    let moscrcf = match rc {
                        MainClock::Rc4Mhz => 0,
                        MainClock::Rc8Mhz => 1,
                        _ => 2,
                    };
                    r.modify(regs::pmc::CKGR_MOR, |v| v | regs::pmc::MOR_KEY | regs::pmc::MOR_MOSCRCEN);
                    self.wait_for(regs::pmc::SR_MOSCRCS);

                    r.modify(regs::pmc::CKGR_MOR, |v| {
                        (v & !regs::pmc::MOR_MOSCRCF_MASK)
                            | regs::pmc::MOR_KEY
                            | (moscrcf << regs::pmc::MOR_MOSCRCF_SHIFT)
                    });
                    self.wait_for(regs::pmc::SR_MOSCRCS);

                    r.modify(regs::pmc::CKGR_MOR, |v| (v & !regs::pmc::MOR_MOSCSEL) | regs::pmc::MOR_KEY);
                }
            }

            // Stop the PLL first so the new settings relock.
            r.write(regs::pmc::CKGR_PLLAR, regs::pmc::PLLAR_ONE);
            if let Some(plla) = config.plla {
                r.write(
                    regs::pmc::CKGR_PLLAR,
                    regs::pmc::PLLAR_ONE
                        | ((plla.mul as u32 - 1) << regs::pmc::PLLAR_MULA_SHIFT)
                        | (PLLA_COUNT << regs::pmc::PLLAR_PLLACOUNT_SHIFT)
                        | plla.div as u32,
                );
                self.wait_for(regs::pmc::SR_LOCKA);
            }

            let css = config.master_clock_source as u32;
            let pres = (config.prescaler as u32) << regs::pmc::MCKR_PRES_SHIFT;
            let set_css = || {
                r.modify(regs::pmc::MCKR, |v| (v & !regs::pmc::MCKR_CSS_MASK) | css);
                self.wait_for(regs::pmc::SR_MCKRDY);
            };
            let set_pres = || {
                r.modify(regs::pmc::MCKR, |v| (v & !regs::pmc::MCKR_PRES_MASK) | pres);
                self.wait_for(regs::pmc::SR_MCKRDY);
            };

            // The prescaler goes first when switching to the PLL so MCK never overshoots.
            if config.master_clock_source == MasterClockSource::Plla {
                set_pres();
                set_css();
            } else {
                set_css();
                set_pres();
            }
        });

        set_clocks(clocks);
        clocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Access, MockRegisters};

    const READY: u32 = regs::pmc::SR_MOSCXTS
        | regs::pmc::SR_LOCKA
        | regs::pmc::SR_MCKRDY
        | regs::pmc::SR_MOSCSELS
        | regs::pmc::SR_MOSCRCS;

    fn pmc() -> Pmc<MockRegisters> {
        let pmc = Pmc::new(MockRegisters::new());
        pmc.regs().set(regs::pmc::SR, READY);
        pmc
    }

    #[test]
    fn peripheral_ids() {
        assert_eq!(PeripheralId::new(47).map(PeripheralId::id), Some(47));
        assert_eq!(PeripheralId::new(48), None);
        assert_eq!(PeripheralId::SPI.id(), crate::interrupt::Interrupt::SPI as u8);
    }

    #[test]
    fn low_ids_use_bank_zero() {
        let pmc = pmc();
        pmc.enable_peripheral_clock(PeripheralId::SPI);

        assert_eq!(pmc.regs().writes_to(regs::pmc::PCER0).as_slice(), &[1 << 21]);
        assert!(pmc.regs().writes_to(regs::pmc::PCER1).is_empty());
        assert_eq!(
            pmc.regs().writes_to(regs::pmc::WPMR).as_slice(),
            &[0x504D_4300, 0x504D_4301]
        );
    }

    #[test]
    fn high_ids_use_bank_one() {
        let pmc = pmc();
        let id = PeripheralId::new(34).unwrap();
        pmc.enable_peripheral_clock(id);
        assert_eq!(pmc.regs().writes_to(regs::pmc::PCER1).as_slice(), &[1 << 2]);

        pmc.regs().set(regs::pmc::PCSR1, 1 << 2);
        assert!(pmc.is_peripheral_clock_enabled(id));
        pmc.disable_peripheral_clock(id);
        assert_eq!(pmc.regs().writes_to(regs::pmc::PCDR1).as_slice(), &[1 << 2]);
        assert!(pmc.regs().writes_to(regs::pmc::PCDR0).is_empty());
    }

    #[test]
    fn enabled_clock_is_not_written_again() {
        let pmc = pmc();
        pmc.regs().set(regs::pmc::PCSR0, 1 << 11);
        pmc.enable_peripheral_clock(PeripheralId::PIOA);
        assert!(pmc.regs().writes_to(regs::pmc::PCER0).is_empty());
    }

    #[test]
    fn default_config_runs_at_100mhz() {
        let clocks = Config::default().clocks();
        assert_eq!(clocks.main_clk, 12_000_000);
        assert_eq!(clocks.plla_clk, Some(100_000_000));
        assert_eq!(clocks.master_clk, 100_000_000);
    }

    #[test]
    fn plla_ratio_multiplies_before_dividing() {
        let config = Config {
            main_clock: MainClock::Crystal { hz: 16_000_000 },
            plla: Some(Plla { mul: 20, div: 3 }),
            ..Config::default()
        };
        let clocks = config.clocks();
        assert_eq!(clocks.plla_clk, Some(106_666_666));
        assert_eq!(clocks.master_clk, 106_666_666);
    }

    #[test]
    fn prescaler_values() {
        assert_eq!(Prescaler::Div1.div_value(), 1);
        assert_eq!(Prescaler::Div64.div_value(), 64);
        assert_eq!(Prescaler::Div3.div_value(), 3);
    }

    #[test]
    #[should_panic(expected = "Max MCK speed")]
    fn master_clock_limit() {
        let config = Config {
            plla: Some(Plla { mul: 20, div: 1 }),
            ..Config::default()
        };
        config.clocks();
    }

    #[test]
    #[should_panic(expected = "PLLA selected")]
    fn plla_source_requires_plla() {
        let config = Config {
            plla: None,
            ..Config::default()
        };
        config.clocks();
    }

    #[test]
    fn init_programs_pll_then_master_clock() {
        let pmc = pmc();
        let clocks = pmc.init(&Config::default());

        assert_eq!(clocks.master_clk, 100_000_000);
        assert!(super::clocks().is_some());

        let pllar = pmc.regs().writes_to(regs::pmc::CKGR_PLLAR);
        assert_eq!(pllar[0], regs::pmc::PLLAR_ONE);
        assert_eq!(pllar[1], regs::pmc::PLLAR_ONE | (24 << 16) | (0x3F << 8) | 3);

        // Prescaler before source when switching to PLLA.
        let mckr = pmc.regs().writes_to(regs::pmc::MCKR);
        assert_eq!(mckr.as_slice(), &[0, 2]);

        let mor = pmc.regs().value(regs::pmc::CKGR_MOR);
        assert_eq!(mor & regs::pmc::MOR_MOSCRCF_MASK, 2 << 4);
        assert_eq!(mor & regs::pmc::MOR_MOSCSEL, 0);
        assert_eq!(pmc.regs().value(regs::pmc::WPMR), regs::pmc::WPKEY | regs::pmc::WPEN);
    }

    #[test]
    fn crystal_without_pll() {
        let pmc = pmc();
        let config = Config {
            main_clock: MainClock::Crystal { hz: 12_000_000 },
            plla: None,
            master_clock_source: MasterClockSource::Main,
            prescaler: Prescaler::Div2,
        };
        let clocks = pmc.init(&config);
        assert_eq!(clocks.master_clk, 6_000_000);

        let mor = pmc.regs().value(regs::pmc::CKGR_MOR);
        assert_ne!(mor & regs::pmc::MOR_MOSCSEL, 0);
        assert_ne!(mor & regs::pmc::MOR_MOSCXTEN, 0);
        assert_eq!(mor & regs::pmc::MOR_MOSCRCEN, 0);

        assert_eq!(pmc.regs().writes_to(regs::pmc::CKGR_PLLAR).as_slice(), &[regs::pmc::PLLAR_ONE]);
        // Source before prescaler otherwise.
        assert_eq!(pmc.regs().writes_to(regs::pmc::MCKR).as_slice(), &[1, 1 | (1 << 4)]);
        assert!(!pmc.regs().log().contains(&Access::Write(regs::pmc::MCKR, 2)));
    }
}
