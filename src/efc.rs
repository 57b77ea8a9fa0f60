//! Enhanced Embedded Flash Controller (EEFC) wait states.

use crate::regs::{self, Registers};

/// Upper bounds (exclusive) of the master clock for 0, 1, 2, 3 and 4 wait states.
const FWS_THRESHOLDS: [u32; 5] = [20_000_000, 40_000_000, 60_000_000, 80_000_000, 100_000_000];

/// Flash wait states needed at `master_clk` Hz.
pub const fn wait_states(master_clk: u32) -> u32 {
    let mut fws = 0;
    while fws < FWS_THRESHOLDS.len() {
        if master_clk < FWS_THRESHOLDS[fws] {
            return fws as u32;
        }
        fws += 1;
    }
    FWS_THRESHOLDS.len() as u32
}

/// Program the wait states for `master_clk` with code loop optimization enabled.
///
/// Must run before the master clock is raised.
pub fn configure(regs: &impl Registers, master_clk: u32) {
    let fws = wait_states(master_clk);

    #[cfg(feature = "defmt")]
    defmt::debug!("efc: {} wait states for {} Hz", fws, master_clk);

    regs.write(regs::efc::FMR, (fws << regs::efc::FMR_FWS_SHIFT) | regs::efc::FMR_CLOE);
}
