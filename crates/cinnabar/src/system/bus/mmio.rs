use super::ConstTrick;
use crate::system::dmac::{
    ee::{self, EeChannel},
    iop::{self, IopChannel},
};
use common::Address;

/// Width of every register, in bytes.
const REGISTER_LEN: u32 = 4;

macro_rules! registers {
    ($name:ident; $($addr:expr, $reg:ident);* $(;)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($reg),*
        }

        impl $name {
            #[inline(always)]
            pub const fn address(self) -> Address {
                match self {
                    $(Self::$reg => Address($addr)),*
                }
            }

            /// Given a physical address, returns the register at that address and the offset
            /// into it.
            pub fn find(addr: u32) -> Option<(Self, usize)> {
                match addr {
                    $(
                        $addr..ConstTrick::<{ $addr + REGISTER_LEN }>::OUTPUT => {
                            Some((Self::$reg, (addr - $addr) as usize))
                        }
                    )*
                    _ => None,
                }
            }
        }
    };
}

registers! {
    EeRegister;

    // DMA controller
    0x1000_E000, DmaCtrl;
    0x1000_E010, DmaStat;
    0x1000_E020, DmaPcr;
    0x1000_E030, DmaSqwc;
    0x1000_E040, DmaRbsr;
    0x1000_E050, DmaRbor;
    0x1000_E060, DmaStadr;
    0x1000_F520, DmaEnableR;
    0x1000_F590, DmaEnableW;

    // Interrupt controller
    0x1000_F000, IntcStat;
    0x1000_F010, IntcMask;

    // Sub-system interface
    0x1000_F200, SifMscom;
    0x1000_F210, SifSmcom;
    0x1000_F220, SifMsflg;
    0x1000_F230, SifSmflg;
    0x1000_F240, SifCtrl;
    0x1000_F260, SifBd6;
}

registers! {
    IopRegister;

    // Sub-system interface
    0x1D00_0000, SifMscom;
    0x1D00_0010, SifSmcom;
    0x1D00_0020, SifMsflg;
    0x1D00_0030, SifSmflg;
    0x1D00_0040, SifCtrl;
    0x1D00_0060, SifBd6;

    // Interrupt controller
    0x1F80_1070, IntcStat;
    0x1F80_1074, IntcMask;
    0x1F80_1078, IntcCtrl;

    // DMA controller
    0x1F80_10F0, DmaDpcr;
    0x1F80_10F4, DmaDicr;
    0x1F80_1570, DmaDpcr2;
    0x1F80_1574, DmaDicr2;
}

/// A decoded EE register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EeMmio {
    Control(EeRegister),
    Channel(EeChannel, ee::ChannelRegister),
}

impl EeMmio {
    /// Given a physical address, returns the register at that address and the offset into it.
    pub fn find(addr: u32) -> Option<(Self, usize)> {
        if let Some((reg, offset)) = EeRegister::find(addr) {
            return Some((Self::Control(reg), offset));
        }

        if !(0x1000_8000..0x1000_E000).contains(&addr) {
            return None;
        }

        let offset = addr & 0xF;
        if offset >= REGISTER_LEN {
            return None;
        }

        let ch = EeChannel::from_base(addr & !0xFF)?;
        let reg = ee::ChannelRegister::from_offset(addr & 0xF0)?;
        Some((Self::Channel(ch, reg), offset as usize))
    }
}

/// A decoded IOP register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IopMmio {
    Control(IopRegister),
    Channel(IopChannel, iop::ChannelRegister),
}

impl IopMmio {
    /// Given a physical address, returns the register at that address and the offset into it.
    pub fn find(addr: u32) -> Option<(Self, usize)> {
        if let Some((reg, offset)) = IopRegister::find(addr) {
            return Some((Self::Control(reg), offset));
        }

        if !(0x1F80_1080..0x1F80_10F0).contains(&addr) && !(0x1F80_1500..0x1F80_1570).contains(&addr)
        {
            return None;
        }

        let ch = IopChannel::from_base(addr & !0xF)?;
        let reg = iop::ChannelRegister::from_offset(addr & 0xC)?;
        Some((Self::Channel(ch, reg), (addr & 0x3) as usize))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ee_decode() {
        assert_eq!(
            EeMmio::find(0x1000_E010),
            Some((EeMmio::Control(EeRegister::DmaStat), 0))
        );
        assert_eq!(
            EeMmio::find(0x1000_F222),
            Some((EeMmio::Control(EeRegister::SifMsflg), 2))
        );
        assert_eq!(
            EeMmio::find(0x1000_C020),
            Some((EeMmio::Channel(EeChannel::Sif0, ee::ChannelRegister::Qwc), 0))
        );
        assert_eq!(
            EeMmio::find(0x1000_D480),
            Some((EeMmio::Channel(EeChannel::SprTo, ee::ChannelRegister::Sadr), 0))
        );

        // gaps
        assert_eq!(EeMmio::find(0x1000_C060), None);
        assert_eq!(EeMmio::find(0x1000_C014), None);
        assert_eq!(EeMmio::find(0x1000_F250), None);
    }

    #[test]
    fn iop_decode() {
        assert_eq!(
            IopMmio::find(0x1F80_1078),
            Some((IopMmio::Control(IopRegister::IntcCtrl), 0))
        );
        assert_eq!(
            IopMmio::find(0x1F80_1528),
            Some((IopMmio::Channel(IopChannel::Sif0, iop::ChannelRegister::Chcr), 0))
        );
        assert_eq!(
            IopMmio::find(0x1F80_10B5),
            Some((IopMmio::Channel(IopChannel::Cdvd, iop::ChannelRegister::Bcr), 1))
        );
        assert_eq!(IopRegister::DmaDicr2.address(), Address(0x1F80_1574));
        assert_eq!(IopMmio::find(0x1F80_1100), None);
    }
}
