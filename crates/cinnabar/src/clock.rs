//! Clock domains of the two processors.

use common::Cycles;

/// EE clock, in Hz.
pub const EE_FREQUENCY: u64 = 294_912_000;
/// IOP clock, in Hz.
pub const IOP_FREQUENCY: u64 = 36_864_000;
/// EE cycles per IOP cycle.
pub const EE_PER_IOP: u64 = EE_FREQUENCY / IOP_FREQUENCY;

static_assertions::const_assert_eq!(EE_FREQUENCY % IOP_FREQUENCY, 0);

/// Converts IOP cycles to EE cycles. Exact.
#[inline(always)]
pub const fn iop_to_ee(cycles: u64) -> u64 {
    cycles * EE_PER_IOP
}

/// Converts EE cycles to IOP cycles, carrying the remainder between calls so that no fraction of
/// a cycle is ever lost.
#[derive(Debug, Clone, Default)]
pub struct ClockDomain {
    /// EE cycles not yet accounted for in the IOP domain, scaled by the IOP frequency.
    remainder: u128,
}

impl ClockDomain {
    pub fn ee_to_iop(&mut self, ee: Cycles) -> Cycles {
        let scaled = u128::from(ee.value()) * u128::from(IOP_FREQUENCY) + self.remainder;
        let iop = scaled / u128::from(EE_FREQUENCY);
        self.remainder = scaled % u128::from(EE_FREQUENCY);

        Cycles(iop as u64)
    }

    #[inline(always)]
    pub fn iop_to_ee(&self, iop: Cycles) -> Cycles {
        Cycles(iop_to_ee(iop.value()))
    }

    pub fn reset(&mut self) {
        self.remainder = 0;
    }
}
