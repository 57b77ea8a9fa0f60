//! Busy-wait delay
//!
//! Counts core cycles, so the CPU blocks for at least the requested time but longer when
//! interrupts preempt the loop.

/// Blocking delay driver calibrated to the core clock.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Delay {
    cpu_hz: u32,
}

impl Delay {
    pub const fn new(cpu_hz: u32) -> Self {
        Self { cpu_hz }
    }

    /// Delay driver for the frozen master clock.
    pub fn from_clocks(clocks: &crate::pmc::Clocks) -> Self {
        Self::new(clocks.master_clk)
    }

    /// Core cycles covering `ns` nanoseconds, rounded up.
    pub const fn cycles(&self, ns: u32) -> u32 {
        let cycles = (ns as u64 * self.cpu_hz as u64).div_ceil(1_000_000_000);
        if cycles > u32::MAX as u64 {
            u32::MAX
        } else {
            cycles as u32
        }
    }
}

impl embedded_hal::delay::DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        cortex_m::asm::delay(self.cycles(ns));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_counts() {
        let delay = Delay::new(100_000_000);
        assert_eq!(delay.cycles(0), 0);
        assert_eq!(delay.cycles(1), 1);
        assert_eq!(delay.cycles(10), 1);
        assert_eq!(delay.cycles(1_000), 100);
        assert_eq!(delay.cycles(1_000_000_000), 100_000_000);
    }

    #[test]
    fn slow_clock() {
        let delay = Delay::new(4_000_000);
        assert_eq!(delay.cycles(1_000), 4);
        assert_eq!(delay.cycles(u32::MAX), 17_179_870);
    }
}
