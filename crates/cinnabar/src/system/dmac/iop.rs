//! IOP DMA controller.

use crate::{
    Fault, clock,
    system::{
        System,
        dmac::{Burst, tag::IopTag},
        intc::IopInterrupt,
        sif::{Direction, QWORD_WORDS},
    },
};
use bitos::{
    bitos,
    integer::{u3, u7},
};
use common::{Address, Primitive};
use static_assertions::const_assert_eq;
use strum::{FromRepr, VariantArray};
use tracing::{debug, error, trace, warn};

/// How many words a channel moves per burst.
pub const BURST_WORDS: u32 = 32;
/// How many IOP cycles a burst takes.
pub const BURST_IOP_CYCLES: u64 = 32;

const BURST_CYCLES: i64 = clock::iop_to_ee(BURST_IOP_CYCLES) as i64;
const ADDR_MASK: u32 = 0x00FF_FFFF;
const RAM_MASK: u32 = 0x001F_FFFC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, VariantArray)]
#[repr(u8)]
pub enum IopChannel {
    MdecIn = 0,
    MdecOut = 1,
    Sif2 = 2,
    Cdvd = 3,
    Spu1 = 4,
    Pio = 5,
    Otc = 6,
    Spu2 = 7,
    Dev9 = 8,
    Sif0 = 9,
    Sif1 = 10,
    Sio2In = 11,
    Sio2Out = 12,
    Ch13 = 13,
}

const_assert_eq!(IopChannel::VARIANTS.len(), 14);

impl IopChannel {
    /// Base address of the channel's registers.
    pub const fn base(self) -> u32 {
        let index = self as u32;
        if index < 7 {
            0x1F80_1080 + index * 0x10
        } else {
            0x1F80_1500 + (index - 7) * 0x10
        }
    }

    pub fn from_base(base: u32) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|ch| ch.base() == base)
    }

    /// Recovers a channel from the channel number of a scheduled event.
    pub fn from_event(channel: u32) -> Option<Self> {
        u8::try_from(channel).ok().and_then(Self::from_repr)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::MdecIn => "MDEC_IN",
            Self::MdecOut => "MDEC_OUT",
            Self::Sif2 => "IOP_SIF2",
            Self::Cdvd => "CDVD",
            Self::Spu1 => "SPU1",
            Self::Pio => "PIO",
            Self::Otc => "OTC",
            Self::Spu2 => "SPU2",
            Self::Dev9 => "DEV9",
            Self::Sif0 => "IOP_SIF0",
            Self::Sif1 => "IOP_SIF1",
            Self::Sio2In => "SIO2_IN",
            Self::Sio2Out => "SIO2_OUT",
            Self::Ch13 => "IOP_CH13",
        }
    }

    #[inline(always)]
    pub const fn is_sif(self) -> bool {
        matches!(self, Self::Sif0 | Self::Sif1 | Self::Sif2)
    }

    /// Index of the enable bit in DPCR/DPCR2 and the flag bit in DICR/DICR2.
    #[inline(always)]
    const fn slot(self) -> u32 {
        let index = self as u32;
        if index < 7 { index } else { index - 7 }
    }
}

/// Per-channel registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRegister {
    Madr,
    Bcr,
    Chcr,
    Tadr,
}

impl ChannelRegister {
    pub fn from_offset(offset: u32) -> Option<Self> {
        Some(match offset {
            0x0 => Self::Madr,
            0x4 => Self::Bcr,
            0x8 => Self::Chcr,
            0xC => Self::Tadr,
            _ => return None,
        })
    }
}

/// Controller-wide registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Dpcr,
    Dicr,
    Dpcr2,
    Dicr2,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Burst = 0b00,
    Slice = 0b01,
    LinkedList = 0b10,
    Chain = 0b11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Chcr {
    #[bits(0)]
    pub from_ram: bool,
    #[bits(1)]
    pub backward: bool,
    #[bits(8)]
    pub chopping: bool,
    #[bits(9..11)]
    pub sync: SyncMode,
    #[bits(16..19)]
    pub chop_dma: u3,
    #[bits(20..23)]
    pub chop_cpu: u3,
    #[bits(24)]
    pub start: bool,
    #[bits(28)]
    pub trigger: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Bcr {
    #[bits(0..16)]
    pub size: u16,
    #[bits(16..32)]
    pub count: u16,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Dicr {
    #[bits(15)]
    pub force: bool,
    #[bits(16..23)]
    pub enable: u7,
    #[bits(23)]
    pub master_enable: bool,
    #[bits(24..31)]
    pub flags: u7,
    #[bits(31)]
    pub master_flag: bool,
}

impl Dicr {
    #[inline(always)]
    fn raised(&self) -> u8 {
        self.flags().value() & self.enable().value()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Channel {
    pub madr: u32,
    pub bcr: Bcr,
    pub chcr: Chcr,
    pub tadr: u32,
    /// Words left in the current block.
    pub remaining: u32,
    pub drq: bool,
    pub tag_end: bool,
}

#[derive(Debug, Clone)]
pub struct IopDmac {
    pub channels: [Channel; 14],
    pub dpcr: u32,
    pub dpcr2: u32,
    pub dicr: Dicr,
    pub dicr2: Dicr,
}

impl Default for IopDmac {
    fn default() -> Self {
        Self {
            channels: std::array::from_fn(|i| Channel {
                drq: IopChannel::VARIANTS[i] != IopChannel::Sif1,
                ..Default::default()
            }),
            dpcr: 0x0765_4321,
            dpcr2: 0x0765_4321,
            dicr: Dicr::default(),
            dicr2: Dicr::default(),
        }
    }
}

impl IopDmac {
    #[inline(always)]
    pub fn channel(&self, ch: IopChannel) -> &Channel {
        &self.channels[ch as usize]
    }

    #[inline(always)]
    pub fn channel_mut(&mut self, ch: IopChannel) -> &mut Channel {
        &mut self.channels[ch as usize]
    }

    pub fn enabled(&self, ch: IopChannel) -> bool {
        let dpcr = if (ch as u8) < 7 { self.dpcr } else { self.dpcr2 };
        dpcr & (1 << (ch.slot() * 4 + 3)) != 0
    }

    /// The full gating condition of a channel.
    pub fn gate(&self, ch: IopChannel) -> bool {
        let channel = self.channel(ch);
        channel.drq && channel.chcr.start() && self.enabled(ch)
    }

    fn dicr_of(&mut self, ch: IopChannel) -> &mut Dicr {
        if (ch as u8) < 7 {
            &mut self.dicr
        } else {
            &mut self.dicr2
        }
    }

    /// Recomputes the master flag. Returns whether it went from low to high.
    fn update_master_flag(&mut self) -> bool {
        let was = self.dicr.master_flag();
        let raised = self.dicr.raised() | self.dicr2.raised();
        let now = self.dicr.force() || (self.dicr.master_enable() && raised != 0);

        self.dicr.set_master_flag(now);
        now && !was
    }

    /// Flags the completion of a channel. Returns whether the master flag rose.
    pub fn flag_completion(&mut self, ch: IopChannel) -> bool {
        let bit = 1 << ch.slot();
        let dicr = self.dicr_of(ch);
        if dicr.enable().value() & bit != 0 {
            let flags = dicr.flags().value() | bit;
            dicr.set_flags(u7::new(flags));
        }

        self.update_master_flag()
    }

    /// `DICR` write: flags are cleared by writing 1, the master flag is read only. Returns
    /// whether the master flag rose.
    pub fn write_dicr(&mut self, value: u32) -> bool {
        let written = Dicr::from_bits(value);
        let flags = self.dicr.flags().value() & !written.flags().value();

        self.dicr = written
            .with_flags(u7::new(flags))
            .with_master_flag(self.dicr.master_flag());

        self.update_master_flag()
    }

    /// `DICR2` write: like `DICR`, without the master bits.
    pub fn write_dicr2(&mut self, value: u32) -> bool {
        let written = Dicr::from_bits(value);
        let flags = self.dicr2.flags().value() & !written.flags().value();

        self.dicr2 = written
            .with_flags(u7::new(flags))
            .with_force(false)
            .with_master_enable(false)
            .with_master_flag(false);

        self.update_master_flag()
    }

    pub fn read_channel(&self, ch: IopChannel, reg: ChannelRegister) -> u32 {
        let channel = self.channel(ch);
        match reg {
            ChannelRegister::Madr => channel.madr,
            ChannelRegister::Bcr => channel.bcr.to_bits(),
            ChannelRegister::Chcr => channel.chcr.to_bits(),
            ChannelRegister::Tadr => channel.tadr,
        }
    }

    pub fn read_control(&self, reg: ControlRegister) -> u32 {
        match reg {
            ControlRegister::Dpcr => self.dpcr,
            ControlRegister::Dicr => self.dicr.to_bits(),
            ControlRegister::Dpcr2 => self.dpcr2,
            ControlRegister::Dicr2 => self.dicr2.to_bits(),
        }
    }
}

/// Words moved by a non-chain transfer.
fn block_words(ch: IopChannel, chcr: Chcr, bcr: Bcr) -> u32 {
    let size = u32::from(bcr.size());
    let words = match chcr.sync() {
        SyncMode::Burst if size == 0 => 0x10000,
        SyncMode::Burst => size,
        SyncMode::Slice => size * u32::from(bcr.count()),
        SyncMode::LinkedList | SyncMode::Chain => 0,
    };

    if ch.is_sif() {
        words.next_multiple_of(QWORD_WORDS as u32)
    } else {
        words
    }
}

/// Checks that a channel being started is configured in a way that can be emulated.
fn validate(ch: IopChannel, chcr: Chcr) -> Result<(), Fault> {
    let unimplemented = |what| Fault::Unimplemented {
        what,
        value: chcr.to_bits(),
    };

    let contradiction = |reason| Fault::ContradictoryControl {
        channel: ch.name(),
        reason,
    };

    if chcr.chopping() {
        return Err(unimplemented("chopped DMA"));
    }

    match ch {
        IopChannel::Sif0 if !chcr.from_ram() => Err(contradiction("SIF0 can only read from RAM")),
        IopChannel::Sif1 if chcr.from_ram() => Err(contradiction("SIF1 can only write to RAM")),
        IopChannel::Sif0 | IopChannel::Sif1 if chcr.sync() == SyncMode::LinkedList => {
            Err(unimplemented("linked list DMA"))
        }
        IopChannel::Sif0 | IopChannel::Sif1 => Ok(()),
        _ => Err(unimplemented("DMA on IOP channel without a peripheral model")),
    }
}

impl System {
    /// Whether a channel has a continuation or completion pending.
    pub fn iop_dma_running(&self, ch: IopChannel) -> bool {
        self.scheduler
            .is_scheduled(self.events.iop_dma_continue, ch as u32)
            || self
                .scheduler
                .is_scheduled(self.events.iop_dma_complete, ch as u32)
    }

    /// Sets the DRQ line of a channel. A rising edge on a started, idle channel schedules its
    /// continuation.
    pub fn set_iop_drq(&mut self, ch: IopChannel, drq: bool) {
        let channel = self.iop_dmac.channel_mut(ch);
        let rising = drq && !channel.drq;
        channel.drq = drq;

        let start = channel.chcr.start();
        if rising && start && !self.iop_dma_running(ch) {
            trace!(channel = ch.name(), "DRQ raised, resuming transfer");
            self.scheduler
                .schedule(self.events.iop_dma_continue, ch as u32, 0);
        }
    }

    /// Runs a burst on `ch` if it isn't running yet and its gating condition holds.
    pub fn iop_dma_check_running(&mut self, ch: IopChannel) -> Result<(), Fault> {
        if self.iop_dma_running(ch) {
            return Ok(());
        }

        self.iop_dma_run(ch)
    }

    fn iop_dma_run(&mut self, ch: IopChannel) -> Result<(), Fault> {
        if !self.iop_dmac.gate(ch) {
            trace!(channel = ch.name(), "channel is gated");
            return Ok(());
        }

        let burst = self.iop_dma_burst(ch)?;

        // FIFO traffic during the burst may have scheduled a resume of this very channel
        self.scheduler
            .cancel(self.events.iop_dma_continue, ch as u32);

        let handle = match burst {
            Burst::Stalled => {
                trace!(channel = ch.name(), "channel stalled");
                self.set_iop_drq(ch, false);
                return Ok(());
            }
            Burst::Continue => self.events.iop_dma_continue,
            Burst::Done => self.events.iop_dma_complete,
        };

        self.scheduler.schedule(handle, ch as u32, BURST_CYCLES);
        Ok(())
    }

    fn iop_dma_burst(&mut self, ch: IopChannel) -> Result<Burst, Fault> {
        let mut fetched = false;
        let channel = *self.iop_dmac.channel(ch);
        if channel.remaining == 0 {
            if channel.chcr.sync() != SyncMode::Chain || channel.tag_end {
                return Ok(Burst::Done);
            }

            let ready = if ch == IopChannel::Sif0 {
                self.iop_dma_sif0_tag()?
            } else {
                self.iop_dma_sif1_tag()?
            };

            if !ready {
                return Ok(Burst::Stalled);
            }

            fetched = true;
        }

        let moved = self.iop_dma_transfer(ch)?;
        let channel = self.iop_dmac.channel(ch);
        if moved == 0 && !fetched && channel.remaining != 0 {
            return Ok(Burst::Stalled);
        }

        let finished = channel.remaining == 0
            && (channel.chcr.sync() != SyncMode::Chain || channel.tag_end);

        Ok(if finished {
            Burst::Done
        } else {
            Burst::Continue
        })
    }

    /// Reads the SIF0 chain tag at `TADR` and forwards its EE half. Returns `false` if the
    /// channel has to wait.
    fn iop_dma_sif0_tag(&mut self) -> Result<bool, Fault> {
        if self.sif.sif0.free() < QWORD_WORDS {
            return Ok(false);
        }

        let tadr = self.iop_dmac.channel(IopChannel::Sif0).tadr;
        let mut words = [0; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.iop_dma_read_word(tadr.wrapping_add(4 * i as u32));
        }

        let tag = IopTag { words };
        for word in tag.ee_tag() {
            self.sif_write(Direction::Sif0, word)?;
        }

        let channel = self.iop_dmac.channel_mut(IopChannel::Sif0);
        channel.madr = tag.addr();
        channel.remaining = tag.words();
        channel.tadr = tadr.wrapping_add(16) & ADDR_MASK;
        channel.tag_end = tag.is_end();

        debug!(
            channel = IopChannel::Sif0.name(),
            madr = %Address(channel.madr),
            words = channel.remaining,
            end = channel.tag_end,
            "chain tag"
        );

        Ok(true)
    }

    /// Pops the SIF1 chain tag. Returns `false` if the channel has to wait.
    fn iop_dma_sif1_tag(&mut self) -> Result<bool, Fault> {
        if self.sif.sif1.occupancy() < QWORD_WORDS {
            return Ok(false);
        }

        let mut words = [0; 4];
        for word in &mut words {
            *word = self.sif_read(Direction::Sif1)?;
        }

        let tag = IopTag { words };
        let channel = self.iop_dmac.channel_mut(IopChannel::Sif1);
        channel.madr = tag.addr();
        channel.remaining = tag.words();
        channel.tag_end = tag.is_end();

        debug!(
            channel = IopChannel::Sif1.name(),
            madr = %Address(channel.madr),
            words = channel.remaining,
            end = channel.tag_end,
            "chain tag"
        );

        Ok(true)
    }

    /// Moves at most one burst of data. Returns how many words were moved.
    fn iop_dma_transfer(&mut self, ch: IopChannel) -> Result<u32, Fault> {
        let channel = *self.iop_dmac.channel(ch);
        let step = if channel.chcr.backward() {
            4u32.wrapping_neg()
        } else {
            4
        };

        let addr = |i: u32| channel.madr.wrapping_add(step.wrapping_mul(i));
        let moved = match ch {
            IopChannel::Sif0 => {
                let words = self
                    .sif
                    .sif0
                    .producer_burst(BURST_WORDS as usize, channel.remaining as usize)
                    as u32;

                for i in 0..words {
                    let word = self.iop_dma_read_word(addr(i));
                    self.sif_write(Direction::Sif0, word)?;
                }

                words
            }
            IopChannel::Sif1 => {
                let words = self
                    .sif
                    .sif1
                    .consumer_burst(BURST_WORDS as usize, channel.remaining as usize)
                    as u32;

                for i in 0..words {
                    let word = self.sif_read(Direction::Sif1)?;
                    self.iop_dma_write_word(addr(i), word);
                }

                words
            }
            _ => {
                return Err(Fault::Unimplemented {
                    what: "DMA on IOP channel without a peripheral model",
                    value: ch.base(),
                });
            }
        };

        let channel = self.iop_dmac.channel_mut(ch);
        channel.madr = addr(moved) & ADDR_MASK;
        channel.remaining -= moved;

        trace!(
            channel = ch.name(),
            moved,
            remaining = channel.remaining,
            "IOP DMA burst"
        );

        Ok(moved)
    }

    fn iop_dma_read_word(&self, addr: u32) -> u32 {
        u32::read_le_bytes(&self.mem.iop_ram[(addr & RAM_MASK) as usize..])
    }

    fn iop_dma_write_word(&mut self, addr: u32, value: u32) {
        value.write_le_bytes(&mut self.mem.iop_ram[(addr & RAM_MASK) as usize..]);
    }

    fn iop_dma_write_chcr(&mut self, ch: IopChannel, value: u32) -> Result<(), Fault> {
        let new = Chcr::from_bits(value);
        let old = self.iop_dmac.channel(ch).chcr;

        if old.start() && self.iop_dma_running(ch) {
            if new.start() {
                warn!(
                    channel = ch.name(),
                    "ignoring CHCR write 0x{value:08X} during transfer"
                );
                return Ok(());
            }

            debug!(channel = ch.name(), "transfer stopped by software");
            self.scheduler
                .cancel(self.events.iop_dma_continue, ch as u32);
            self.scheduler
                .cancel(self.events.iop_dma_complete, ch as u32);
            self.iop_dmac.channel_mut(ch).chcr = new;
            return Ok(());
        }

        if new.start() {
            validate(ch, new)?;
        }

        let channel = self.iop_dmac.channel_mut(ch);
        channel.chcr = new;
        if !new.start() {
            return Ok(());
        }

        if !old.start() {
            channel.tag_end = false;
            channel.remaining = block_words(ch, new, channel.bcr);
            debug!(
                channel = ch.name(),
                sync = ?new.sync(),
                madr = %Address(channel.madr),
                words = channel.remaining,
                tadr = %Address(channel.tadr),
                "transfer started"
            );
        }

        self.iop_dma_check_running(ch)
    }

    pub fn iop_dma_write_channel(
        &mut self,
        ch: IopChannel,
        reg: ChannelRegister,
        value: u32,
    ) -> Result<(), Fault> {
        let channel = self.iop_dmac.channel_mut(ch);
        match reg {
            ChannelRegister::Madr => channel.madr = value & ADDR_MASK,
            ChannelRegister::Bcr => channel.bcr = Bcr::from_bits(value),
            ChannelRegister::Chcr => return self.iop_dma_write_chcr(ch, value),
            ChannelRegister::Tadr => channel.tadr = value & ADDR_MASK,
        }

        Ok(())
    }

    pub fn iop_dma_write_control(
        &mut self,
        reg: ControlRegister,
        value: u32,
    ) -> Result<(), Fault> {
        let rising = match reg {
            ControlRegister::Dpcr => {
                self.iop_dmac.dpcr = value;
                false
            }
            ControlRegister::Dpcr2 => {
                self.iop_dmac.dpcr2 = value;
                false
            }
            ControlRegister::Dicr => self.iop_dmac.write_dicr(value),
            ControlRegister::Dicr2 => self.iop_dmac.write_dicr2(value),
        };

        if rising {
            self.iop_intc.raise(IopInterrupt::Dma);
        }

        // gating might have changed for any channel
        for ch in IopChannel::VARIANTS.iter().copied() {
            self.iop_dma_check_running(ch)?;
        }

        Ok(())
    }
}

/// Event handler: next burst of a channel.
pub(crate) fn continue_transfer(sys: &mut System, channel: u32, _late: u64) -> Result<(), Fault> {
    let Some(ch) = IopChannel::from_event(channel) else {
        error!(channel, "continuation for unknown IOP DMA channel");
        return Ok(());
    };

    sys.iop_dma_run(ch)
}

/// Event handler: end of a channel's transfer.
pub(crate) fn complete_transfer(sys: &mut System, channel: u32, _late: u64) -> Result<(), Fault> {
    let Some(ch) = IopChannel::from_event(channel) else {
        error!(channel, "completion for unknown IOP DMA channel");
        return Ok(());
    };

    let chcr = &mut sys.iop_dmac.channel_mut(ch).chcr;
    chcr.set_start(false);
    chcr.set_trigger(false);

    let rising = sys.iop_dmac.flag_completion(ch);
    debug!(channel = ch.name(), rising, "transfer complete");

    if rising {
        sys.iop_intc.raise(IopInterrupt::Dma);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules};

    fn chcr(sync: SyncMode) -> Chcr {
        Chcr::default().with_sync(sync)
    }

    fn bcr(size: u16, count: u16) -> Bcr {
        Bcr::default().with_size(size).with_count(count)
    }

    #[test]
    fn block_word_counts() {
        let burst = chcr(SyncMode::Burst);
        let slice = chcr(SyncMode::Slice);

        assert_eq!(block_words(IopChannel::Spu2, burst, bcr(0, 0)), 0x10000);
        assert_eq!(block_words(IopChannel::Spu2, burst, bcr(3, 9)), 3);
        assert_eq!(block_words(IopChannel::Spu2, slice, bcr(0, 5)), 0);
        assert_eq!(block_words(IopChannel::Spu2, slice, bcr(16, 5)), 80);

        // SIF channels move whole quadwords
        assert_eq!(block_words(IopChannel::Sif0, burst, bcr(2, 0)), 4);
        assert_eq!(block_words(IopChannel::Sif1, slice, bcr(3, 3)), 12);
        assert_eq!(block_words(IopChannel::Sif1, chcr(SyncMode::Chain), bcr(3, 3)), 0);
    }

    #[test]
    fn channel_bases() {
        assert_eq!(IopChannel::MdecIn.base(), 0x1F80_1080);
        assert_eq!(IopChannel::Otc.base(), 0x1F80_10E0);
        assert_eq!(IopChannel::Spu2.base(), 0x1F80_1500);
        assert_eq!(IopChannel::Sif0.base(), 0x1F80_1520);
        assert_eq!(IopChannel::from_base(0x1F80_1530), Some(IopChannel::Sif1));
        assert_eq!(IopChannel::from_base(0x1F80_1534), None);
    }

    #[test]
    fn completion_flags_respect_enable() {
        let mut dmac = IopDmac::default();

        // not enabled: no flag, no master flag
        assert!(!dmac.flag_completion(IopChannel::Sif0));
        assert_eq!(dmac.dicr2.flags().value(), 0);

        dmac.write_dicr(1 << 23);
        dmac.write_dicr2(1 << (16 + 2));
        assert!(dmac.flag_completion(IopChannel::Sif0));
        assert_eq!(dmac.dicr2.flags().value(), 1 << 2);
        assert!(dmac.dicr.master_flag());

        // already high: no second edge
        assert!(!dmac.flag_completion(IopChannel::Sif0));

        // acknowledging the flag drops the master flag
        dmac.write_dicr2((1 << (16 + 2)) | (1 << (24 + 2)));
        assert_eq!(dmac.dicr2.flags().value(), 0);
        assert!(!dmac.dicr.master_flag());
    }

    #[test]
    fn force_sets_master_flag() {
        let mut dmac = IopDmac::default();
        assert!(dmac.write_dicr(1 << 15));
        assert!(dmac.dicr.master_flag());

        // the master flag is read only
        assert!(!dmac.write_dicr((1 << 15) | (1 << 31)));
        dmac.write_dicr(0);
        assert!(!dmac.dicr.master_flag());
    }

    #[test]
    fn dpcr_enable_bits() {
        let mut dmac = IopDmac::default();
        assert!(!dmac.enabled(IopChannel::Sif0));

        dmac.dpcr2 = 1 << (2 * 4 + 3);
        assert!(dmac.enabled(IopChannel::Sif0));
        assert!(!dmac.enabled(IopChannel::Sif1));
        assert!(!dmac.enabled(IopChannel::Sif2));
    }

    #[test]
    fn invalid_starts_are_faults() {
        let mut sys = System::new(Modules::default(), Config::default());
        let start = 1 << 24;

        // SIF0 must read from RAM
        let result = sys.iop_write::<u32>(Address(IopChannel::Sif0.base() + 8), start);
        assert!(matches!(
            result,
            Err(Fault::ContradictoryControl {
                channel: "IOP_SIF0",
                ..
            })
        ));

        // SIF1 must write to RAM
        let result = sys.iop_write::<u32>(Address(IopChannel::Sif1.base() + 8), start | 1);
        assert!(matches!(
            result,
            Err(Fault::ContradictoryControl {
                channel: "IOP_SIF1",
                ..
            })
        ));

        let result = sys.iop_write::<u32>(Address(IopChannel::Cdvd.base() + 8), start);
        assert!(matches!(result, Err(Fault::Unimplemented { .. })));

        let linked = start | 1 | (0b10 << 9);
        let result = sys.iop_write::<u32>(Address(IopChannel::Sif0.base() + 8), linked);
        assert!(matches!(result, Err(Fault::Unimplemented { .. })));

        // without the start bit, nothing is validated
        sys.iop_write::<u32>(Address(IopChannel::Cdvd.base() + 8), 1)
            .unwrap();
    }

    #[test]
    fn sif1_chain_stalls_until_ee_pushes() {
        let mut sys = System::new(Modules::default(), Config::default());
        sys.iop_write::<u32>(Address(0x1F80_1570), 1 << (3 * 4 + 3))
            .unwrap();

        // chain mode, to RAM, start
        sys.iop_write::<u32>(Address(IopChannel::Sif1.base() + 8), (1 << 24) | (0b11 << 9))
            .unwrap();
        assert!(!sys.iop_dma_running(IopChannel::Sif1));

        // tag: 4 words to 0x2000, end of chain
        for word in [0x8000_2000, 4, 0, 0, 0xA, 0xB, 0xC, 0xD] {
            sys.sif_write(Direction::Sif1, word).unwrap();
        }

        assert!(sys.iop_dma_running(IopChannel::Sif1));
        for _ in 0..4 {
            sys.scheduler.advance(BURST_CYCLES as u64);
            sys.process_events().unwrap();
        }

        assert!(!sys.iop_dmac.channel(IopChannel::Sif1).chcr.start());
        let words: Vec<u32> = (0..4)
            .map(|i| u32::read_le_bytes(&sys.mem.iop_ram[0x2000 + i * 4..]))
            .collect();
        assert_eq!(words, [0xA, 0xB, 0xC, 0xD]);
        assert_eq!(sys.sif.sif1.occupancy(), 0);
    }
}
