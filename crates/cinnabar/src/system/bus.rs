//! Address decoding of both processors' buses.

mod mmio;

use crate::{
    Fault,
    system::{
        System,
        dmac::{ee, iop},
        mem::{BIOS_LEN, EE_RAM_LEN, IOP_RAM_LEN, SCRATCHPAD_LEN},
        sif::MailboxRegister,
    },
};
use common::{Address, Primitive};
use tracing::{debug, warn};

pub use mmio::{EeMmio, EeRegister, IopMmio, IopRegister};

/// Mask from a KSEG address to its physical address.
const PHYSICAL_MASK: u32 = 0x1FFF_FFFF;
const EE_MMIO_LEN: usize = 0x1_0000;
const IOP_SIF_LEN: usize = 0x100;
const IOP_MMIO_LEN: usize = 0x1000;

/// Allows the usage of const values in patterns. It's a neat trick!
struct ConstTrick<const N: u32>;
impl<const N: u32> ConstTrick<N> {
    const OUTPUT: u32 = N;
}

macro_rules! map {
    ($offset:ident, $match_addr:expr; $($addr:expr, $size:expr => $block:expr,)* @default => $default:expr $(,)?) => {
        match $match_addr.value() {
            $(
                $addr..=ConstTrick::<{ $addr + (($size) as u32 - 1) }>::OUTPUT => {
                    #[allow(unused_assignments)]
                    {
                        $offset = ($match_addr.value() - $addr) as usize;
                    }
                    $block
                }
            )*
            _ => $default
        }
    };
}

/// What a flat register is backed by.
enum Target<D> {
    IntcStat,
    IntcMask,
    IntcCtrl,
    Mailbox(MailboxRegister),
    Dma(D),
}

impl EeRegister {
    fn target(self) -> Target<ee::ControlRegister> {
        match self {
            Self::DmaCtrl => Target::Dma(ee::ControlRegister::Ctrl),
            Self::DmaStat => Target::Dma(ee::ControlRegister::Stat),
            Self::DmaPcr => Target::Dma(ee::ControlRegister::Pcr),
            Self::DmaSqwc => Target::Dma(ee::ControlRegister::Sqwc),
            Self::DmaRbsr => Target::Dma(ee::ControlRegister::Rbsr),
            Self::DmaRbor => Target::Dma(ee::ControlRegister::Rbor),
            Self::DmaStadr => Target::Dma(ee::ControlRegister::Stadr),
            Self::DmaEnableR => Target::Dma(ee::ControlRegister::EnableR),
            Self::DmaEnableW => Target::Dma(ee::ControlRegister::EnableW),
            Self::IntcStat => Target::IntcStat,
            Self::IntcMask => Target::IntcMask,
            Self::SifMscom => Target::Mailbox(MailboxRegister::Mscom),
            Self::SifSmcom => Target::Mailbox(MailboxRegister::Smcom),
            Self::SifMsflg => Target::Mailbox(MailboxRegister::Msflg),
            Self::SifSmflg => Target::Mailbox(MailboxRegister::Smflg),
            Self::SifCtrl => Target::Mailbox(MailboxRegister::Ctrl),
            Self::SifBd6 => Target::Mailbox(MailboxRegister::Bd6),
        }
    }
}

impl IopRegister {
    fn target(self) -> Target<iop::ControlRegister> {
        match self {
            Self::SifMscom => Target::Mailbox(MailboxRegister::Mscom),
            Self::SifSmcom => Target::Mailbox(MailboxRegister::Smcom),
            Self::SifMsflg => Target::Mailbox(MailboxRegister::Msflg),
            Self::SifSmflg => Target::Mailbox(MailboxRegister::Smflg),
            Self::SifCtrl => Target::Mailbox(MailboxRegister::Ctrl),
            Self::SifBd6 => Target::Mailbox(MailboxRegister::Bd6),
            Self::IntcStat => Target::IntcStat,
            Self::IntcMask => Target::IntcMask,
            Self::IntcCtrl => Target::IntcCtrl,
            Self::DmaDpcr => Target::Dma(iop::ControlRegister::Dpcr),
            Self::DmaDicr => Target::Dma(iop::ControlRegister::Dicr),
            Self::DmaDpcr2 => Target::Dma(iop::ControlRegister::Dpcr2),
            Self::DmaDicr2 => Target::Dma(iop::ControlRegister::Dicr2),
        }
    }
}

/// Registers only accept whole, aligned words.
fn check_register_write<P: Primitive>(addr: Address, offset: usize) -> Result<(), Fault> {
    if offset != 0 || size_of::<P>() < 4 {
        return Err(Fault::Unimplemented {
            what: "narrow or misaligned register write",
            value: addr.value(),
        });
    }

    Ok(())
}

/// Reads a primitive from a memory region. An access running past the end of the region is
/// unmapped.
fn read_region<P: Primitive>(region: &[u8], offset: usize, addr: Address) -> Result<P, Fault> {
    match region.get(offset..offset + size_of::<P>()) {
        Some(bytes) => Ok(P::read_le_bytes(bytes)),
        None => Err(Fault::Unmapped {
            addr,
            size: size_of::<P>(),
            write: false,
        }),
    }
}

fn write_region<P: Primitive>(
    region: &mut [u8],
    offset: usize,
    addr: Address,
    value: P,
) -> Result<(), Fault> {
    match region.get_mut(offset..offset + size_of::<P>()) {
        Some(bytes) => {
            value.write_le_bytes(bytes);
            Ok(())
        }
        None => Err(Fault::Unmapped {
            addr,
            size: size_of::<P>(),
            write: true,
        }),
    }
}

impl System {
    /// Reads a primitive from the given EE address.
    pub fn ee_read<P: Primitive>(&mut self, addr: Address) -> Result<P, Fault> {
        let offset: usize;
        map! {
            offset, addr;
            0x7000_0000, SCRATCHPAD_LEN => read_region(&self.mem.scratchpad[..], offset, addr),
            @default => self.ee_read_physical(addr.masked(PHYSICAL_MASK)),
        }
    }

    fn ee_read_physical<P: Primitive>(&mut self, addr: Address) -> Result<P, Fault> {
        let offset: usize;
        map! {
            offset, addr;
            0x0000_0000, EE_RAM_LEN => read_region(&self.mem.ee_ram[..], offset, addr),
            0x1000_0000, EE_MMIO_LEN => self.ee_read_mmio(addr),
            0x1C00_0000, IOP_RAM_LEN => read_region(&self.mem.iop_ram[..], offset, addr),
            0x1FC0_0000, BIOS_LEN => read_region(&self.mem.bios[..], offset, addr),
            @default => Err(Fault::Unmapped {
                addr,
                size: size_of::<P>(),
                write: false,
            }),
        }
    }

    fn ee_read_mmio<P: Primitive>(&mut self, addr: Address) -> Result<P, Fault> {
        let Some((reg, offset)) = EeMmio::find(addr.value()) else {
            return Err(Fault::UnmappedRegister { addr });
        };

        let value = match reg {
            EeMmio::Control(control) => match control.target() {
                Target::IntcStat => self.ee_intc.stat,
                Target::IntcMask => self.ee_intc.mask,
                Target::IntcCtrl => {
                    return Err(Fault::UnmappedRegister { addr });
                }
                Target::Mailbox(mailbox) => self.sif.mailbox.read(mailbox),
                Target::Dma(dma) => self.ee_dmac.read_control(dma),
            },
            EeMmio::Channel(ch, reg) => self.ee_dmac.read_channel(ch, reg),
        };

        debug!(?reg, offset, "read 0x{value:08X}");
        Ok(P::read_le_bytes(&value.to_le_bytes()[offset..]))
    }

    /// Writes a primitive to the given EE address.
    pub fn ee_write<P: Primitive>(&mut self, addr: Address, value: P) -> Result<(), Fault> {
        let offset: usize;
        map! {
            offset, addr;
            0x7000_0000, SCRATCHPAD_LEN => {
                write_region(&mut self.mem.scratchpad[..], offset, addr, value)
            },
            @default => self.ee_write_physical(addr.masked(PHYSICAL_MASK), value),
        }
    }

    fn ee_write_physical<P: Primitive>(&mut self, addr: Address, value: P) -> Result<(), Fault> {
        let offset: usize;
        map! {
            offset, addr;
            0x0000_0000, EE_RAM_LEN => write_region(&mut self.mem.ee_ram[..], offset, addr, value),
            0x1000_0000, EE_MMIO_LEN => self.ee_write_mmio(addr, value),
            0x1C00_0000, IOP_RAM_LEN => {
                write_region(&mut self.mem.iop_ram[..], offset, addr, value)
            },
            0x1FC0_0000, BIOS_LEN => {
                warn!("ignoring write of 0x{value:X} to boot ROM at {addr}");
                Ok(())
            },
            @default => Err(Fault::Unmapped {
                addr,
                size: size_of::<P>(),
                write: true,
            }),
        }
    }

    fn ee_write_mmio<P: Primitive>(&mut self, addr: Address, value: P) -> Result<(), Fault> {
        let Some((reg, offset)) = EeMmio::find(addr.value()) else {
            return Err(Fault::UnmappedRegister { addr });
        };

        check_register_write::<P>(addr, offset)?;
        let value = value.low_word();
        debug!(?reg, "write 0x{value:08X}");

        match reg {
            EeMmio::Control(control) => match control.target() {
                Target::IntcStat => self.ee_intc.write_stat(value),
                Target::IntcMask => self.ee_intc.write_mask(value),
                Target::IntcCtrl => return Err(Fault::UnmappedRegister { addr }),
                Target::Mailbox(mailbox) => self.sif.mailbox.ee_write(mailbox, value),
                Target::Dma(dma) => self.ee_dma_write_control(dma, value)?,
            },
            EeMmio::Channel(ch, reg) => self.ee_dma_write_channel(ch, reg, value)?,
        }

        Ok(())
    }

    /// Reads a primitive from the given IOP address.
    pub fn iop_read<P: Primitive>(&mut self, addr: Address) -> Result<P, Fault> {
        let addr = addr.masked(PHYSICAL_MASK);
        let offset: usize;
        map! {
            offset, addr;
            0x0000_0000, IOP_RAM_LEN => read_region(&self.mem.iop_ram[..], offset, addr),
            0x1D00_0000, IOP_SIF_LEN => self.iop_read_mmio(addr),
            0x1F80_1000, IOP_MMIO_LEN => self.iop_read_mmio(addr),
            0x1FC0_0000, BIOS_LEN => read_region(&self.mem.bios[..], offset, addr),
            @default => Err(Fault::Unmapped {
                addr,
                size: size_of::<P>(),
                write: false,
            }),
        }
    }

    fn iop_read_mmio<P: Primitive>(&mut self, addr: Address) -> Result<P, Fault> {
        let Some((reg, offset)) = IopMmio::find(addr.value()) else {
            return Err(Fault::UnmappedRegister { addr });
        };

        let value = match reg {
            IopMmio::Control(control) => match control.target() {
                Target::IntcStat => self.iop_intc.stat,
                Target::IntcMask => self.iop_intc.mask,
                Target::IntcCtrl => self.iop_intc.read_ctrl(),
                Target::Mailbox(mailbox) => self.sif.mailbox.read(mailbox),
                Target::Dma(dma) => self.iop_dmac.read_control(dma),
            },
            IopMmio::Channel(ch, reg) => self.iop_dmac.read_channel(ch, reg),
        };

        debug!(?reg, offset, "read 0x{value:08X}");
        Ok(P::read_le_bytes(&value.to_le_bytes()[offset..]))
    }

    /// Writes a primitive to the given IOP address.
    pub fn iop_write<P: Primitive>(&mut self, addr: Address, value: P) -> Result<(), Fault> {
        let addr = addr.masked(PHYSICAL_MASK);
        let offset: usize;
        map! {
            offset, addr;
            0x0000_0000, IOP_RAM_LEN => {
                write_region(&mut self.mem.iop_ram[..], offset, addr, value)
            },
            0x1D00_0000, IOP_SIF_LEN => self.iop_write_mmio(addr, value),
            0x1F80_1000, IOP_MMIO_LEN => self.iop_write_mmio(addr, value),
            0x1FC0_0000, BIOS_LEN => {
                warn!("ignoring write of 0x{value:X} to boot ROM at {addr}");
                Ok(())
            },
            @default => Err(Fault::Unmapped {
                addr,
                size: size_of::<P>(),
                write: true,
            }),
        }
    }

    fn iop_write_mmio<P: Primitive>(&mut self, addr: Address, value: P) -> Result<(), Fault> {
        let Some((reg, offset)) = IopMmio::find(addr.value()) else {
            return Err(Fault::UnmappedRegister { addr });
        };

        check_register_write::<P>(addr, offset)?;
        let value = value.low_word();
        debug!(?reg, "write 0x{value:08X}");

        match reg {
            IopMmio::Control(control) => match control.target() {
                Target::IntcStat => self.iop_intc.write_stat(value),
                Target::IntcMask => self.iop_intc.write_mask(value),
                Target::IntcCtrl => self.iop_intc.write_ctrl(value),
                Target::Mailbox(mailbox) => self.sif.mailbox.iop_write(mailbox, value),
                Target::Dma(dma) => self.iop_dma_write_control(dma, value)?,
            },
            IopMmio::Channel(ch, reg) => self.iop_dma_write_channel(ch, reg, value)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules};

    fn system() -> System {
        System::new(Modules::default(), Config::default())
    }

    #[test]
    fn kseg_mirrors() {
        let mut sys = system();
        sys.ee_write::<u32>(Address(0x8000_1000), 0xDEAD_BEEF)
            .unwrap();

        assert_eq!(sys.ee_read::<u32>(Address(0x0000_1000)).unwrap(), 0xDEAD_BEEF);
        assert_eq!(sys.ee_read::<u32>(Address(0xA000_1000)).unwrap(), 0xDEAD_BEEF);
        assert_eq!(sys.ee_read::<u16>(Address(0x0000_1002)).unwrap(), 0xDEAD);
    }

    #[test]
    fn iop_ram_is_shared() {
        let mut sys = system();
        sys.ee_write::<u64>(Address(0x1C00_0100), 0x0123_4567_89AB_CDEF)
            .unwrap();

        assert_eq!(sys.iop_read::<u32>(Address(0x8000_0100)).unwrap(), 0x89AB_CDEF);
        assert_eq!(sys.iop_read::<u32>(Address(0x0000_0104)).unwrap(), 0x0123_4567);
    }

    #[test]
    fn scratchpad_is_not_masked() {
        let mut sys = system();
        sys.ee_write::<u128>(Address(0x7000_3FF0), u128::MAX).unwrap();
        assert_eq!(sys.mem.scratchpad[0x3FFF], 0xFF);
        assert!(sys.ee_read::<u8>(Address(0x1000_3FF0)).is_err());
    }

    #[test]
    fn bios_writes_are_ignored() {
        let mut sys = system();
        sys.ee_write::<u32>(Address(0xBFC0_0000), 0xFFFF_FFFF)
            .unwrap();
        assert_eq!(sys.ee_read::<u32>(Address(0xBFC0_0000)).unwrap(), 0);
    }

    #[test]
    fn unmapped_accesses_are_faults() {
        let mut sys = system();
        assert!(matches!(
            sys.ee_read::<u32>(Address(0x1400_0000)),
            Err(Fault::Unmapped {
                size: 4,
                write: false,
                ..
            })
        ));
        assert!(matches!(
            sys.iop_write::<u8>(Address(0x1F40_0000), 0),
            Err(Fault::Unmapped { write: true, .. })
        ));
        assert!(matches!(
            sys.ee_read::<u32>(Address(0x1000_F300)),
            Err(Fault::UnmappedRegister { .. })
        ));
    }

    #[test]
    fn register_access_widths() {
        let mut sys = system();
        sys.ee_write::<u32>(Address(0x1000_F200), 0xAABB_CCDD)
            .unwrap();

        assert_eq!(sys.ee_read::<u8>(Address(0x1000_F201)).unwrap(), 0xCC);
        assert_eq!(sys.ee_read::<u16>(Address(0x1000_F202)).unwrap(), 0xAABB);
        assert_eq!(sys.ee_read::<u64>(Address(0x1000_F200)).unwrap(), 0xAABB_CCDD);

        // wider writes keep the low word
        sys.ee_write::<u64>(Address(0x1000_F200), 0x1111_2222_3333_4444)
            .unwrap();
        assert_eq!(sys.iop_read::<u32>(Address(0x1D00_0000)).unwrap(), 0x3333_4444);

        // narrower writes aren't modelled
        assert!(matches!(
            sys.ee_write::<u16>(Address(0x1000_F200), 0),
            Err(Fault::Unimplemented { .. })
        ));
    }

    #[test]
    fn mailbox_is_shared() {
        let mut sys = system();
        sys.iop_write::<u32>(Address(0x1D00_0030), 0x0002_0000)
            .unwrap();
        assert_eq!(sys.ee_read::<u32>(Address(0x1000_F230)).unwrap(), 0x0002_0000);

        sys.ee_write::<u32>(Address(0x1000_F230), 0x0002_0000)
            .unwrap();
        assert_eq!(sys.iop_read::<u32>(Address(0x1D00_0030)).unwrap(), 0);

        // control reads always have the fixed bits set
        assert_eq!(
            sys.ee_read::<u32>(Address(0x1000_F240)).unwrap() & 0xF000_0102,
            0xF000_0102
        );
    }

    #[test]
    fn iop_ctrl_read_disables_delivery() {
        let mut sys = system();
        assert_eq!(sys.iop_read::<u32>(Address(0x1F80_1078)).unwrap(), 1);
        assert_eq!(sys.iop_read::<u32>(Address(0x1F80_1078)).unwrap(), 0);

        sys.iop_write::<u32>(Address(0x1F80_1078), 1).unwrap();
        assert!(sys.iop_intc.master_enable);
    }

    #[test]
    fn accesses_past_a_region_end_are_faults() {
        let mut sys = system();
        let ram_tail = Address(EE_RAM_LEN as u32 - 4);
        assert!(matches!(
            sys.ee_write::<u64>(ram_tail, 0x1122_3344_5566_7788),
            Err(Fault::Unmapped {
                size: 8,
                write: true,
                ..
            })
        ));
        assert!(matches!(
            sys.ee_read::<u64>(ram_tail),
            Err(Fault::Unmapped {
                size: 8,
                write: false,
                ..
            })
        ));

        // nothing was written
        assert_eq!(sys.ee_read::<u32>(ram_tail).unwrap(), 0);

        let scratchpad_tail = Address(0x7000_0000 + SCRATCHPAD_LEN as u32 - 8);
        assert!(matches!(
            sys.ee_write::<u128>(scratchpad_tail, u128::MAX),
            Err(Fault::Unmapped { size: 16, .. })
        ));
        assert!(sys.ee_read::<u128>(scratchpad_tail).is_err());
        assert_eq!(sys.ee_read::<u64>(scratchpad_tail).unwrap(), 0);

        assert!(sys.iop_read::<u64>(Address(IOP_RAM_LEN as u32 - 2)).is_err());
    }
}
