//! Interrupt controllers of both processors.
//!
//! Status bits are only ever set by [`raise`](EeIntc::raise) and only ever cleared by software
//! acknowledgement. The two controllers differ in how their mask registers are written, which is
//! real hardware behaviour.

use strum::{FromRepr, VariantArray};
use tracing::trace;

/// Interrupt sources of the EE interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, VariantArray)]
#[repr(u8)]
pub enum EeInterrupt {
    Gs = 0,
    Sbus = 1,
    VBlankStart = 2,
    VBlankEnd = 3,
    Vif0 = 4,
    Vif1 = 5,
    Vu0 = 6,
    Vu1 = 7,
    Ipu = 8,
    Timer0 = 9,
    Timer1 = 10,
    Timer2 = 11,
    Timer3 = 12,
    Sfifo = 13,
    Vu0Watchdog = 14,
}

/// Interrupt sources of the IOP interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, VariantArray)]
#[repr(u8)]
pub enum IopInterrupt {
    VBlank = 0,
    Gpu = 1,
    Cdvd = 2,
    Dma = 3,
    Timer0 = 4,
    Timer1 = 5,
    Timer2 = 6,
    Sio0 = 7,
    Sio1 = 8,
    Spu2 = 9,
    Pio = 10,
    EVBlank = 11,
    Dvd = 12,
    Pcmcia = 13,
    Timer3 = 14,
    Timer4 = 15,
    Timer5 = 16,
    Sio2 = 17,
}

const EE_SOURCES_MASK: u32 = (1 << EeInterrupt::VARIANTS.len() as u32) - 1;
const IOP_SOURCES_MASK: u32 = (1 << IopInterrupt::VARIANTS.len() as u32) - 1;

/// The EE interrupt controller (`I_STAT`/`I_MASK`).
#[derive(Debug, Clone)]
pub struct EeIntc {
    pub stat: u32,
    pub mask: u32,
    pub master_enable: bool,
}

impl Default for EeIntc {
    fn default() -> Self {
        Self {
            stat: 0,
            mask: 0,
            master_enable: true,
        }
    }
}

impl EeIntc {
    /// Whether an interrupt is pending to the EE.
    #[inline(always)]
    pub fn pending(&self) -> bool {
        (self.stat & self.mask) != 0 && self.master_enable
    }

    /// Raises the given source. Returns whether the pending line went from low to high.
    pub fn raise(&mut self, source: EeInterrupt) -> bool {
        let was_pending = self.pending();
        self.stat |= 1 << source as u32;

        let rising = !was_pending && self.pending();
        trace!(?source, rising, "raised EE interrupt");
        rising
    }

    /// Clears the given status bits.
    #[inline(always)]
    pub fn acknowledge(&mut self, bits: u32) {
        self.stat &= !bits;
    }

    /// `I_STAT` write: every set bit acknowledges that source.
    pub fn write_stat(&mut self, value: u32) {
        self.acknowledge(value);
    }

    /// `I_MASK` write: every set bit toggles that source's mask bit.
    pub fn write_mask(&mut self, value: u32) {
        self.mask ^= value & EE_SOURCES_MASK;
    }
}

/// The IOP interrupt controller (`I_STAT`/`I_MASK`/`I_CTRL`).
#[derive(Debug, Clone)]
pub struct IopIntc {
    pub stat: u32,
    pub mask: u32,
    pub master_enable: bool,
}

impl Default for IopIntc {
    fn default() -> Self {
        Self {
            stat: 0,
            mask: 0,
            master_enable: true,
        }
    }
}

impl IopIntc {
    /// Whether an interrupt is pending to the IOP.
    #[inline(always)]
    pub fn pending(&self) -> bool {
        (self.stat & self.mask) != 0 && self.master_enable
    }

    /// Raises the given source. Returns whether the pending line went from low to high.
    pub fn raise(&mut self, source: IopInterrupt) -> bool {
        let was_pending = self.pending();
        self.stat |= 1 << source as u32;

        let rising = !was_pending && self.pending();
        trace!(?source, rising, "raised IOP interrupt");
        rising
    }

    /// Clears the given status bits.
    #[inline(always)]
    pub fn acknowledge(&mut self, bits: u32) {
        self.stat &= !bits;
    }

    /// `I_STAT` write: the status is ANDed with the written value, so zero bits acknowledge.
    pub fn write_stat(&mut self, value: u32) {
        self.acknowledge(!value);
    }

    /// `I_MASK` write: a plain store.
    pub fn write_mask(&mut self, value: u32) {
        self.mask = value & IOP_SOURCES_MASK;
    }

    /// `I_CTRL` read. Returns the current master enable and disables delivery until software
    /// writes it back.
    pub fn read_ctrl(&mut self) -> u32 {
        let value = u32::from(self.master_enable);
        self.master_enable = false;
        value
    }

    /// `I_CTRL` write.
    pub fn write_ctrl(&mut self, value: u32) {
        self.master_enable = value & 1 != 0;
    }
}
