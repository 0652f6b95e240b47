//! EE DMA controller.

use crate::{
    Fault,
    modules::PeripheralPath,
    system::{
        System,
        dmac::{
            Burst,
            tag::{DestTagId, EeTag, SourceTagId},
        },
        sif::{Direction, QWORD_WORDS},
    },
};
use bitos::{
    bitos,
    integer::{u2, u3, u10},
};
use common::{Address, Primitive};
use static_assertions::const_assert_eq;
use strum::{FromRepr, VariantArray};
use tinyvec::ArrayVec;
use tracing::{debug, error, trace, warn};

/// How many quadwords a channel moves per burst.
pub const BURST_QWC: u32 = 8;
/// How many EE cycles a burst takes.
pub const BURST_CYCLES: i64 = 64;

/// `MADR` bit selecting the scratchpad.
const SPR_SELECT: u32 = 1 << 31;
const SPR_MASK: u32 = 0x3FF0;
const RAM_MASK: u32 = 0x01FF_FFF0;
/// `D_ENABLEW` bit holding every channel.
const SUSPEND: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, VariantArray)]
#[repr(u8)]
pub enum EeChannel {
    Vif0 = 0,
    Vif1 = 1,
    Gif = 2,
    IpuFrom = 3,
    IpuTo = 4,
    Sif0 = 5,
    Sif1 = 6,
    Sif2 = 7,
    SprFrom = 8,
    SprTo = 9,
}

const_assert_eq!(EeChannel::VARIANTS.len(), 10);

impl EeChannel {
    /// Base address of the channel's registers.
    pub const fn base(self) -> u32 {
        match self {
            Self::Vif0 => 0x1000_8000,
            Self::Vif1 => 0x1000_9000,
            Self::Gif => 0x1000_A000,
            Self::IpuFrom => 0x1000_B000,
            Self::IpuTo => 0x1000_B400,
            Self::Sif0 => 0x1000_C000,
            Self::Sif1 => 0x1000_C400,
            Self::Sif2 => 0x1000_C800,
            Self::SprFrom => 0x1000_D000,
            Self::SprTo => 0x1000_D400,
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
            Self::Vif0 => "VIF0",
            Self::Vif1 => "VIF1",
            Self::Gif => "GIF",
            Self::IpuFrom => "IPU_FROM",
            Self::IpuTo => "IPU_TO",
            Self::Sif0 => "SIF0",
            Self::Sif1 => "SIF1",
            Self::Sif2 => "SIF2",
            Self::SprFrom => "SPR_FROM",
            Self::SprTo => "SPR_TO",
        }
    }

    const fn default_drq(self) -> bool {
        !matches!(self, Self::Sif0 | Self::Sif2 | Self::IpuFrom | Self::IpuTo)
    }

    /// The peripheral fed by this channel, if it's one of the peripheral paths.
    pub const fn path(self) -> Option<PeripheralPath> {
        Some(match self {
            Self::Vif0 => PeripheralPath::Vif0,
            Self::Vif1 => PeripheralPath::Vif1,
            Self::Gif => PeripheralPath::Gif,
            Self::IpuTo => PeripheralPath::IpuTo,
            _ => return None,
        })
    }
}

/// Per-channel registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRegister {
    Chcr,
    Madr,
    Qwc,
    Tadr,
    Asr0,
    Asr1,
    Sadr,
}

impl ChannelRegister {
    pub fn from_offset(offset: u32) -> Option<Self> {
        Some(match offset {
            0x00 => Self::Chcr,
            0x10 => Self::Madr,
            0x20 => Self::Qwc,
            0x30 => Self::Tadr,
            0x40 => Self::Asr0,
            0x50 => Self::Asr1,
            0x80 => Self::Sadr,
            _ => return None,
        })
    }
}

/// Controller-wide registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Ctrl,
    Stat,
    Pcr,
    Sqwc,
    Rbsr,
    Rbor,
    Stadr,
    EnableR,
    EnableW,
}

#[bitos(1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EeDirection {
    ToMemory = 0,
    FromMemory = 1,
}

#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal = 0b00,
    Chain = 0b01,
    Interleave = 0b10,
    Reserved = 0b11,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Chcr {
    #[bits(0)]
    pub direction: EeDirection,
    #[bits(2..4)]
    pub mode: Mode,
    /// Call stack pointer.
    #[bits(4..6)]
    pub asp: u2,
    /// Tag transfer enable.
    #[bits(6)]
    pub tte: bool,
    /// Tag interrupt enable.
    #[bits(7)]
    pub tie: bool,
    #[bits(8)]
    pub start: bool,
    #[bits(16..32)]
    pub tag: u16,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Ctrl {
    #[bits(0)]
    pub dmae: bool,
    #[bits(1)]
    pub rele: bool,
    #[bits(2..4)]
    pub mfifo_drain: u2,
    #[bits(4..6)]
    pub stall_source: u2,
    #[bits(6..8)]
    pub stall_drain: u2,
    #[bits(8..11)]
    pub release_cycle: u3,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    /// Channel interrupt status.
    #[bits(0..10)]
    pub cis: u10,
    #[bits(13)]
    pub sis: bool,
    #[bits(14)]
    pub meis: bool,
    #[bits(15)]
    pub beis: bool,
    /// Channel interrupt mask.
    #[bits(16..26)]
    pub cim: u10,
    #[bits(29)]
    pub sim: bool,
    #[bits(30)]
    pub meim: bool,
}

#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Pcr {
    #[bits(0..10)]
    pub cpc: u10,
    /// Per-channel enable, only honoured when `pce` is set.
    #[bits(16..26)]
    pub cde: u10,
    #[bits(31)]
    pub pce: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Channel {
    pub chcr: Chcr,
    pub madr: u32,
    /// Quadwords left in the current block.
    pub qwc: u32,
    pub tadr: u32,
    pub asr: [u32; 2],
    pub sadr: u32,
    pub drq: bool,
    pub tag_end: bool,
}

#[derive(Debug, Clone)]
pub struct EeDmac {
    pub channels: [Channel; 10],
    pub ctrl: Ctrl,
    pub stat: Stat,
    pub pcr: Pcr,
    pub sqwc: u32,
    pub rbsr: u32,
    pub rbor: u32,
    pub stadr: u32,
    pub enable: u32,
}

impl Default for EeDmac {
    fn default() -> Self {
        Self {
            channels: std::array::from_fn(|i| Channel {
                drq: EeChannel::VARIANTS[i].default_drq(),
                ..Default::default()
            }),
            ctrl: Ctrl::default(),
            stat: Stat::default(),
            pcr: Pcr::default(),
            sqwc: 0,
            rbsr: 0,
            rbor: 0,
            stadr: 0,
            enable: 0x1201,
        }
    }
}

impl EeDmac {
    #[inline(always)]
    pub fn channel(&self, ch: EeChannel) -> &Channel {
        &self.channels[ch as usize]
    }

    #[inline(always)]
    pub fn channel_mut(&mut self, ch: EeChannel) -> &mut Channel {
        &mut self.channels[ch as usize]
    }

    /// Whether the controller as a whole is allowed to move data.
    pub fn enabled(&self) -> bool {
        self.ctrl.dmae() && self.enable & SUSPEND == 0
    }

    pub fn priority_allows(&self, ch: EeChannel) -> bool {
        !self.pcr.pce() || self.pcr.cde().value() & (1 << ch as u16) != 0
    }

    /// The full gating condition of a channel.
    pub fn gate(&self, ch: EeChannel) -> bool {
        let channel = self.channel(ch);
        channel.drq && channel.chcr.start() && self.enabled() && self.priority_allows(ch)
    }

    /// State of the INT1 line to the EE.
    pub fn int1(&self) -> bool {
        let stat = self.stat;
        (stat.cis().value() & stat.cim().value()) != 0
            || (stat.sis() && stat.sim())
            || (stat.meis() && stat.meim())
            || stat.beis()
    }

    /// `D_STAT` write: status bits are cleared by writing 1, mask bits are toggled by writing 1.
    pub fn write_stat(&mut self, value: u32) {
        let written = Stat::from_bits(value);
        let stat = self.stat;

        self.stat = stat
            .with_cis(u10::new(stat.cis().value() & !written.cis().value()))
            .with_sis(stat.sis() && !written.sis())
            .with_meis(stat.meis() && !written.meis())
            .with_beis(stat.beis() && !written.beis())
            .with_cim(u10::new(stat.cim().value() ^ written.cim().value()))
            .with_sim(stat.sim() ^ written.sim())
            .with_meim(stat.meim() ^ written.meim());
    }

    pub fn read_channel(&self, ch: EeChannel, reg: ChannelRegister) -> u32 {
        let channel = self.channel(ch);
        match reg {
            ChannelRegister::Chcr => channel.chcr.to_bits(),
            ChannelRegister::Madr => channel.madr,
            ChannelRegister::Qwc => channel.qwc,
            ChannelRegister::Tadr => channel.tadr,
            ChannelRegister::Asr0 => channel.asr[0],
            ChannelRegister::Asr1 => channel.asr[1],
            ChannelRegister::Sadr => channel.sadr,
        }
    }

    pub fn read_control(&self, reg: ControlRegister) -> u32 {
        match reg {
            ControlRegister::Ctrl => self.ctrl.to_bits(),
            ControlRegister::Stat => self.stat.to_bits(),
            ControlRegister::Pcr => self.pcr.to_bits(),
            ControlRegister::Sqwc => self.sqwc,
            ControlRegister::Rbsr => self.rbsr,
            ControlRegister::Rbor => self.rbor,
            ControlRegister::Stadr => self.stadr,
            ControlRegister::EnableR | ControlRegister::EnableW => self.enable,
        }
    }
}

#[inline(always)]
fn split_qword(qword: u128) -> [u32; 4] {
    EeTag::from_qword(qword).words
}

#[inline(always)]
fn join_words(words: [u32; 4]) -> u128 {
    words
        .iter()
        .rev()
        .fold(0, |acc, &word| (acc << 32) | u128::from(word))
}

#[inline(always)]
fn targets_scratchpad(addr: u32) -> bool {
    addr & SPR_SELECT != 0 || addr & 0xF000_0000 == 0x7000_0000
}

/// Checks that a channel being started is configured in a way that can be emulated.
fn validate(ch: EeChannel, chcr: Chcr) -> Result<(), Fault> {
    let contradiction = |reason| Fault::ContradictoryControl {
        channel: ch.name(),
        reason,
    };

    match (ch, chcr.direction()) {
        (EeChannel::Sif0, EeDirection::FromMemory) => {
            return Err(contradiction("SIF0 can only write to memory"));
        }
        (EeChannel::Sif1, EeDirection::ToMemory) => {
            return Err(contradiction("SIF1 can only read from memory"));
        }
        _ => (),
    }

    let unimplemented = |what| Fault::Unimplemented {
        what,
        value: chcr.to_bits(),
    };

    match (ch, chcr.mode()) {
        (_, Mode::Interleave) => Err(unimplemented("interleaved DMA")),
        (EeChannel::SprFrom, Mode::Chain) => Err(unimplemented("scratchpad destination chain")),
        (EeChannel::IpuFrom | EeChannel::Sif2, _) => Err(unimplemented("DMA on IPU_FROM or SIF2")),
        _ if ch.path().is_some() && chcr.direction() == EeDirection::ToMemory => {
            Err(unimplemented("peripheral to memory DMA"))
        }
        _ => Ok(()),
    }
}

impl System {
    /// Whether a channel has a continuation or completion pending.
    pub fn ee_dma_running(&self, ch: EeChannel) -> bool {
        self.scheduler
            .is_scheduled(self.events.ee_dma_continue, ch as u32)
            || self
                .scheduler
                .is_scheduled(self.events.ee_dma_complete, ch as u32)
    }

    /// Sets the DRQ line of a channel. A rising edge on a started, idle channel schedules its
    /// continuation.
    pub fn set_ee_drq(&mut self, ch: EeChannel, drq: bool) {
        let channel = self.ee_dmac.channel_mut(ch);
        let rising = drq && !channel.drq;
        channel.drq = drq;

        let start = channel.chcr.start();
        if rising && start && !self.ee_dma_running(ch) {
            trace!(channel = ch.name(), "DRQ raised, resuming transfer");
            self.scheduler
                .schedule(self.events.ee_dma_continue, ch as u32, 0);
        }
    }

    /// Runs a burst on `ch` if it isn't running yet and its gating condition holds.
    pub fn ee_dma_check_running(&mut self, ch: EeChannel) -> Result<(), Fault> {
        if self.ee_dma_running(ch) {
            return Ok(());
        }

        self.ee_dma_run(ch)
    }

    fn ee_dma_run(&mut self, ch: EeChannel) -> Result<(), Fault> {
        if !self.ee_dmac.gate(ch) {
            trace!(channel = ch.name(), "channel is gated");
            return Ok(());
        }

        let burst = self.ee_dma_burst(ch)?;

        // FIFO traffic during the burst may have scheduled a resume of this very channel
        self.scheduler
            .cancel(self.events.ee_dma_continue, ch as u32);

        let handle = match burst {
            Burst::Stalled => {
                trace!(channel = ch.name(), "channel stalled");
                self.set_ee_drq(ch, false);
                return Ok(());
            }
            Burst::Continue => self.events.ee_dma_continue,
            Burst::Done => self.events.ee_dma_complete,
        };

        self.scheduler.schedule(handle, ch as u32, BURST_CYCLES);
        Ok(())
    }

    fn ee_dma_burst(&mut self, ch: EeChannel) -> Result<Burst, Fault> {
        let mut fetched = false;
        let channel = *self.ee_dmac.channel(ch);
        if channel.qwc == 0 {
            if channel.chcr.mode() != Mode::Chain || channel.tag_end {
                return Ok(Burst::Done);
            }

            let ready = if ch == EeChannel::Sif0 {
                self.ee_dma_dest_tag(ch)?
            } else {
                self.ee_dma_source_tag(ch)?
            };

            if !ready {
                return Ok(Burst::Stalled);
            }

            fetched = true;
        }

        let moved = self.ee_dma_transfer(ch)?;
        let channel = self.ee_dmac.channel(ch);
        if moved == 0 && !fetched && channel.qwc != 0 {
            return Ok(Burst::Stalled);
        }

        let finished =
            channel.qwc == 0 && (channel.chcr.mode() == Mode::Normal || channel.tag_end);

        Ok(if finished {
            Burst::Done
        } else {
            Burst::Continue
        })
    }

    /// Reads the source chain tag at `TADR`. Returns `false` if the channel has to wait.
    fn ee_dma_source_tag(&mut self, ch: EeChannel) -> Result<bool, Fault> {
        let channel = *self.ee_dmac.channel(ch);
        let tag = EeTag::from_qword(self.ee_dma_read_qword(channel.tadr));

        let mut forwarded: ArrayVec<[u32; 4]> = ArrayVec::new();
        if ch == EeChannel::Sif1 && channel.chcr.tte() {
            forwarded.extend([tag.words[2], tag.words[3], 0, 0]);
            if self.sif.sif1.free() < forwarded.len() {
                return Ok(false);
            }
        }

        let qwc = tag.qwc();
        let next = channel.tadr.wrapping_add(16);
        let after_data = next.wrapping_add(qwc * 16);

        let mut chcr = channel.chcr;
        let mut asr = channel.asr;
        let (madr, tadr, mut end) = match tag.source_id() {
            SourceTagId::Refe => (tag.addr(), next, true),
            SourceTagId::Cnt => (next, after_data, false),
            SourceTagId::Next => (next, tag.addr(), false),
            SourceTagId::Ref | SourceTagId::Refs => (tag.addr(), next, false),
            SourceTagId::Call => {
                let asp = chcr.asp().value();
                if asp >= 2 {
                    return Err(Fault::CallStackOverflow {
                        channel: ch.name(),
                    });
                }

                asr[asp as usize] = after_data;
                chcr.set_asp(u2::new(asp + 1));
                (next, tag.addr(), false)
            }
            SourceTagId::Ret => {
                let asp = chcr.asp().value();
                if asp == 0 {
                    (next, channel.tadr, true)
                } else {
                    chcr.set_asp(u2::new(asp - 1));
                    (next, asr[asp as usize - 1], false)
                }
            }
            SourceTagId::End => (next, channel.tadr, true),
        };

        if tag.irq() && chcr.tie() {
            end = true;
        }

        chcr.set_tag(tag.chcr_tag());
        debug!(
            channel = ch.name(),
            id = ?tag.source_id(),
            qwc,
            madr = %Address(madr),
            tadr = %Address(tadr),
            end,
            "source chain tag"
        );

        *self.ee_dmac.channel_mut(ch) = Channel {
            chcr,
            madr,
            qwc,
            tadr,
            asr,
            tag_end: end,
            ..channel
        };

        for word in forwarded {
            self.sif_write(Direction::Sif1, word)?;
        }

        Ok(true)
    }

    /// Pops a destination chain tag from the SIF0 FIFO. Returns `false` if the channel has to
    /// wait.
    fn ee_dma_dest_tag(&mut self, ch: EeChannel) -> Result<bool, Fault> {
        if self.sif.sif0.occupancy() < QWORD_WORDS {
            return Ok(false);
        }

        let mut words = [0; 4];
        for word in &mut words {
            *word = self.sif_read(Direction::Sif0)?;
        }

        let tag = EeTag { words };
        let Some(id) = tag.dest_id() else {
            return Err(Fault::InvalidTag {
                channel: ch.name(),
                tag: words[0],
            });
        };

        let channel = self.ee_dmac.channel_mut(ch);
        channel.qwc = tag.qwc();
        channel.madr = tag.addr();
        channel.chcr.set_tag(tag.chcr_tag());
        channel.tag_end = id == DestTagId::End || (tag.irq() && channel.chcr.tie());

        debug!(
            channel = ch.name(),
            ?id,
            qwc = channel.qwc,
            madr = %Address(channel.madr),
            end = channel.tag_end,
            "destination chain tag"
        );

        Ok(true)
    }

    /// Moves at most one burst of data. Returns how many quadwords were moved.
    fn ee_dma_transfer(&mut self, ch: EeChannel) -> Result<u32, Fault> {
        let channel = *self.ee_dmac.channel(ch);
        let budget = BURST_QWC.min(channel.qwc);
        if budget == 0 {
            return Ok(0);
        }

        let moved = match (ch, ch.path()) {
            (EeChannel::SprFrom | EeChannel::SprTo, _) => {
                for i in 0..budget {
                    let madr = channel.madr.wrapping_add(i * 16);
                    let sadr = (channel.sadr + i * 16) & SPR_MASK;
                    if ch == EeChannel::SprFrom {
                        let qword = u128::read_le_bytes(&self.mem.scratchpad[sadr as usize..]);
                        self.ee_dma_write_qword(madr, qword);
                    } else {
                        let qword = self.ee_dma_read_qword(madr);
                        qword.write_le_bytes(&mut self.mem.scratchpad[sadr as usize..]);
                    }
                }

                let channel = self.ee_dmac.channel_mut(ch);
                channel.sadr = (channel.sadr + budget * 16) & SPR_MASK;
                budget
            }
            (EeChannel::Sif0, _) => {
                let words = self.sif.sif0.consumer_burst(
                    BURST_QWC as usize * QWORD_WORDS,
                    channel.qwc as usize * QWORD_WORDS,
                );

                let count = (words / QWORD_WORDS) as u32;
                for i in 0..count {
                    let mut qword = [0; 4];
                    for word in &mut qword {
                        *word = self.sif_read(Direction::Sif0)?;
                    }

                    self.ee_dma_write_qword(channel.madr.wrapping_add(i * 16), join_words(qword));
                }

                count
            }
            (EeChannel::Sif1, _) => {
                let words = self.sif.sif1.producer_burst(
                    BURST_QWC as usize * QWORD_WORDS,
                    channel.qwc as usize * QWORD_WORDS,
                );

                let count = (words / QWORD_WORDS) as u32;
                for i in 0..count {
                    let qword = self.ee_dma_read_qword(channel.madr.wrapping_add(i * 16));
                    for word in split_qword(qword) {
                        self.sif_write(Direction::Sif1, word)?;
                    }
                }

                count
            }
            (_, Some(path)) => {
                let data: Vec<u128> = (0..budget)
                    .map(|i| self.ee_dma_read_qword(channel.madr.wrapping_add(i * 16)))
                    .collect();

                self.modules.peripheral.receive(path, &data);
                budget
            }
            (_, None) => {
                return Err(Fault::Unimplemented {
                    what: "DMA on IPU_FROM or SIF2",
                    value: ch.base(),
                });
            }
        };

        let channel = self.ee_dmac.channel_mut(ch);
        channel.madr = channel.madr.wrapping_add(moved * 16);
        channel.qwc -= moved;

        trace!(
            channel = ch.name(),
            moved,
            remaining = channel.qwc,
            "EE DMA burst"
        );

        Ok(moved)
    }

    fn ee_dma_read_qword(&self, addr: u32) -> u128 {
        if targets_scratchpad(addr) {
            u128::read_le_bytes(&self.mem.scratchpad[(addr & SPR_MASK) as usize..])
        } else {
            u128::read_le_bytes(&self.mem.ee_ram[(addr & RAM_MASK) as usize..])
        }
    }

    fn ee_dma_write_qword(&mut self, addr: u32, value: u128) {
        if targets_scratchpad(addr) {
            value.write_le_bytes(&mut self.mem.scratchpad[(addr & SPR_MASK) as usize..]);
        } else {
            value.write_le_bytes(&mut self.mem.ee_ram[(addr & RAM_MASK) as usize..]);
        }
    }

    fn ee_dma_write_chcr(&mut self, ch: EeChannel, value: u32) -> Result<(), Fault> {
        let new = Chcr::from_bits(value);
        let old = self.ee_dmac.channel(ch).chcr;

        if new.mode() == Mode::Reserved {
            error!(channel = ch.name(), "reserved DMA mode");
            return Err(Fault::ReservedEncoding {
                register: "D_CHCR",
                value,
            });
        }

        if old.start() && self.ee_dma_running(ch) {
            if new.start() {
                warn!(
                    channel = ch.name(),
                    "ignoring CHCR write 0x{value:08X} during transfer"
                );
                return Ok(());
            }

            debug!(channel = ch.name(), "transfer stopped by software");
            self.scheduler
                .cancel(self.events.ee_dma_continue, ch as u32);
            self.scheduler
                .cancel(self.events.ee_dma_complete, ch as u32);
            self.ee_dmac.channel_mut(ch).chcr = new;
            return Ok(());
        }

        if new.start() {
            validate(ch, new)?;
        }

        let channel = self.ee_dmac.channel_mut(ch);
        channel.chcr = new;
        if !new.start() {
            return Ok(());
        }

        if !old.start() {
            channel.tag_end = false;
            debug!(
                channel = ch.name(),
                mode = ?new.mode(),
                madr = %Address(channel.madr),
                qwc = channel.qwc,
                tadr = %Address(channel.tadr),
                "transfer started"
            );
        }

        self.ee_dma_check_running(ch)
    }

    pub fn ee_dma_write_channel(
        &mut self,
        ch: EeChannel,
        reg: ChannelRegister,
        value: u32,
    ) -> Result<(), Fault> {
        let channel = self.ee_dmac.channel_mut(ch);
        match reg {
            ChannelRegister::Chcr => return self.ee_dma_write_chcr(ch, value),
            ChannelRegister::Madr => channel.madr = value & !0xF,
            ChannelRegister::Qwc => channel.qwc = value & 0xFFFF,
            ChannelRegister::Tadr => channel.tadr = value & !0xF,
            ChannelRegister::Asr0 => channel.asr[0] = value & !0xF,
            ChannelRegister::Asr1 => channel.asr[1] = value & !0xF,
            ChannelRegister::Sadr => channel.sadr = value & SPR_MASK,
        }

        Ok(())
    }

    pub fn ee_dma_write_control(&mut self, reg: ControlRegister, value: u32) -> Result<(), Fault> {
        match reg {
            ControlRegister::Ctrl => self.ee_dmac.ctrl = Ctrl::from_bits(value),
            ControlRegister::Stat => {
                let was = self.ee_dmac.int1();
                self.ee_dmac.write_stat(value);

                let now = self.ee_dmac.int1();
                if was != now {
                    debug!(int1 = now, "INT1 changed by D_STAT write");
                }

                return Ok(());
            }
            ControlRegister::Pcr => self.ee_dmac.pcr = Pcr::from_bits(value),
            ControlRegister::Sqwc => self.ee_dmac.sqwc = value,
            ControlRegister::Rbsr => self.ee_dmac.rbsr = value,
            ControlRegister::Rbor => self.ee_dmac.rbor = value,
            ControlRegister::Stadr => self.ee_dmac.stadr = value,
            ControlRegister::EnableR => {
                warn!("ignoring write 0x{value:08X} to D_ENABLER");
                return Ok(());
            }
            ControlRegister::EnableW => self.ee_dmac.enable = value,
        }

        // gating might have changed for any channel
        for ch in EeChannel::VARIANTS.iter().copied() {
            self.ee_dma_check_running(ch)?;
        }

        Ok(())
    }
}

/// Event handler: next burst of a channel.
pub(crate) fn continue_transfer(sys: &mut System, channel: u32, _late: u64) -> Result<(), Fault> {
    let Some(ch) = EeChannel::from_event(channel) else {
        error!(channel, "continuation for unknown EE DMA channel");
        return Ok(());
    };

    sys.ee_dma_run(ch)
}

/// Event handler: end of a channel's transfer.
pub(crate) fn complete_transfer(sys: &mut System, channel: u32, _late: u64) -> Result<(), Fault> {
    let Some(ch) = EeChannel::from_event(channel) else {
        error!(channel, "completion for unknown EE DMA channel");
        return Ok(());
    };

    let was = sys.ee_dmac.int1();
    sys.ee_dmac.channel_mut(ch).chcr.set_start(false);

    let cis = sys.ee_dmac.stat.cis().value() | (1 << ch as u16);
    sys.ee_dmac.stat.set_cis(u10::new(cis));

    let now = sys.ee_dmac.int1();
    debug!(channel = ch.name(), int1 = now, "transfer complete");
    if now && !was {
        trace!("INT1 asserted");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules};

    fn system() -> System {
        let mut sys = System::new(Modules::default(), Config::default());
        sys.ee_write::<u32>(Address(0x1000_E000), 1).unwrap();
        sys
    }

    fn run(sys: &mut System, cycles: u64) {
        sys.scheduler.advance(cycles);
        sys.process_events().unwrap();
    }

    fn fill_scratchpad(sys: &mut System, qwords: u32) {
        for i in 0..qwords {
            let value = 0x0123_4567_89AB_CDEF_0000_0000_0000_0000u128 | u128::from(i);
            value.write_le_bytes(&mut sys.mem.scratchpad[i as usize * 16..]);
        }
    }

    #[test]
    fn bursts_yield_between_continuations() {
        const QWC: u32 = 20;
        const DEST: u32 = 0x0010_0000;

        let mut sys = system();
        fill_scratchpad(&mut sys, QWC);

        let base = EeChannel::SprFrom.base();
        sys.ee_write::<u32>(Address(base + 0x80), 0).unwrap();
        sys.ee_write::<u32>(Address(base + 0x10), DEST).unwrap();
        sys.ee_write::<u32>(Address(base + 0x20), QWC).unwrap();
        sys.ee_write::<u32>(Address(base), 0x100).unwrap();

        // first burst runs synchronously with the start write
        let channel = sys.ee_dmac.channel(EeChannel::SprFrom);
        assert_eq!(channel.qwc, QWC - BURST_QWC);
        assert!(sys.ee_dma_running(EeChannel::SprFrom));

        let bursts = QWC.div_ceil(BURST_QWC) as u64;
        let cost = BURST_CYCLES as u64;
        for k in 1..bursts {
            run(&mut sys, cost - 1);
            let moved = QWC - sys.ee_dmac.channel(EeChannel::SprFrom).qwc;
            assert_eq!(moved, (k as u32 * BURST_QWC).min(QWC));

            run(&mut sys, 1);
            let moved = QWC - sys.ee_dmac.channel(EeChannel::SprFrom).qwc;
            assert_eq!(moved, ((k as u32 + 1) * BURST_QWC).min(QWC));
        }

        // everything moved, completion is one more burst away
        run(&mut sys, cost - 1);
        assert!(sys.ee_dmac.channel(EeChannel::SprFrom).chcr.start());
        run(&mut sys, 1);
        assert!(!sys.ee_dmac.channel(EeChannel::SprFrom).chcr.start());
        assert!(!sys.ee_dma_running(EeChannel::SprFrom));
        assert_eq!(sys.scheduler.now(), bursts * cost);

        let len = QWC as usize * 16;
        assert_eq!(
            &sys.mem.ee_ram[DEST as usize..][..len],
            &sys.mem.scratchpad[..len]
        );
    }

    #[test]
    fn source_chain_follows_call_and_ret() {
        let mut sys = system();

        let tag = |id: u32, qwc: u32, addr: u32| {
            u128::from(qwc | (id << 28)) | (u128::from(addr) << 32)
        };

        let mut put = |addr: u32, value: u128| {
            value.write_le_bytes(&mut sys.mem.ee_ram[addr as usize..]);
        };

        put(0x000, tag(1, 1, 0)); // cnt
        put(0x010, 0xAAAA);
        put(0x020, tag(5, 1, 0x100)); // call
        put(0x030, 0xBBBB);
        put(0x100, tag(6, 1, 0)); // ret
        put(0x110, 0xCCCC);
        put(0x040, tag(7, 1, 0)); // end
        put(0x050, 0xDDDD);

        let base = EeChannel::SprTo.base();
        sys.ee_write::<u32>(Address(base + 0x30), 0).unwrap();
        sys.ee_write::<u32>(Address(base + 0x80), 0).unwrap();
        sys.ee_write::<u32>(Address(base), 0x105).unwrap();

        for _ in 0..8 {
            run(&mut sys, BURST_CYCLES as u64);
        }

        let channel = sys.ee_dmac.channel(EeChannel::SprTo);
        assert!(!channel.chcr.start());
        assert_eq!(channel.chcr.asp().value(), 0);

        let spr: Vec<u128> = (0..4)
            .map(|i| u128::read_le_bytes(&sys.mem.scratchpad[i * 16..]))
            .collect();
        assert_eq!(spr, [0xAAAA, 0xBBBB, 0xCCCC, 0xDDDD]);
    }

    #[test]
    fn call_stack_overflow_is_a_fault() {
        let mut sys = system();
        for i in 0..3u32 {
            let tag = u128::from(5u32 << 28) | (u128::from((i + 1) * 0x100) << 32);
            tag.write_le_bytes(&mut sys.mem.ee_ram[(i * 0x100) as usize..]);
        }

        let base = EeChannel::SprTo.base();
        sys.ee_write::<u32>(Address(base + 0x30), 0).unwrap();
        sys.ee_write::<u32>(Address(base), 0x105).unwrap();

        run(&mut sys, BURST_CYCLES as u64);
        sys.scheduler.advance(BURST_CYCLES as u64);
        assert!(matches!(
            sys.process_events(),
            Err(Fault::CallStackOverflow { channel: "SPR_TO" })
        ));
    }

    #[test]
    fn reserved_mode_is_a_fault() {
        let mut sys = system();
        let result = sys.ee_write::<u32>(Address(EeChannel::Gif.base()), 0x10D);
        assert!(matches!(result, Err(Fault::ReservedEncoding { .. })));
    }

    #[test]
    fn sif_direction_contradiction_is_a_fault() {
        let mut sys = system();
        let result = sys.ee_write::<u32>(Address(EeChannel::Sif0.base()), 0x101);
        assert!(matches!(
            result,
            Err(Fault::ContradictoryControl { channel: "SIF0", .. })
        ));

        let result = sys.ee_write::<u32>(Address(EeChannel::Sif1.base()), 0x100);
        assert!(matches!(
            result,
            Err(Fault::ContradictoryControl { channel: "SIF1", .. })
        ));
    }

    #[test]
    fn priority_control_gates_channels() {
        let mut sys = system();
        fill_scratchpad(&mut sys, 4);

        // enable priority control with no channels allowed
        sys.ee_write::<u32>(Address(0x1000_E020), 1 << 31).unwrap();

        let base = EeChannel::SprFrom.base();
        sys.ee_write::<u32>(Address(base + 0x10), 0x2000).unwrap();
        sys.ee_write::<u32>(Address(base + 0x20), 4).unwrap();
        sys.ee_write::<u32>(Address(base), 0x100).unwrap();

        assert!(!sys.ee_dma_running(EeChannel::SprFrom));
        assert_eq!(sys.ee_dmac.channel(EeChannel::SprFrom).qwc, 4);

        let allow = (1 << 31) | (1 << (16 + EeChannel::SprFrom as u32));
        sys.ee_write::<u32>(Address(0x1000_E020), allow).unwrap();
        assert_eq!(sys.ee_dmac.channel(EeChannel::SprFrom).qwc, 0);
        assert!(sys.ee_dma_running(EeChannel::SprFrom));
    }

    #[test]
    fn completion_raises_int1_through_mask() {
        let mut sys = system();
        let base = EeChannel::SprFrom.base();
        sys.ee_write::<u32>(Address(base + 0x20), 1).unwrap();
        sys.ee_write::<u32>(Address(base), 0x100).unwrap();
        run(&mut sys, 2 * BURST_CYCLES as u64);

        let bit = 1 << EeChannel::SprFrom as u32;
        assert_eq!(sys.ee_read::<u32>(Address(0x1000_E010)).unwrap() & 0x3FF, bit);
        assert!(!sys.ee_interrupt_pending());

        // toggle the channel's mask bit on
        sys.ee_write::<u32>(Address(0x1000_E010), bit << 16).unwrap();
        assert!(sys.ee_interrupt_pending());

        // acknowledge
        sys.ee_write::<u32>(Address(0x1000_E010), bit).unwrap();
        assert!(!sys.ee_interrupt_pending());
        assert_eq!(sys.ee_dmac.stat.cim().value(), bit as u16);
    }

    #[test]
    fn join_and_split_are_inverse() {
        let words = [0x1111_1111, 0x2222_2222, 0x3333_3333, 0x4444_4444];
        let qword = join_words(words);
        assert_eq!(qword, 0x4444_4444_3333_3333_2222_2222_1111_1111);
        assert_eq!(split_qword(qword), words);
    }

    #[test]
    fn peripheral_channels_feed_their_path() {
        use crate::modules::{PeripheralModule, PeripheralPath};
        use std::sync::{Arc, Mutex};

        type Received = Arc<Mutex<Vec<(PeripheralPath, u128)>>>;
        struct Recorder(Received);
        impl PeripheralModule for Recorder {
            fn receive(&mut self, path: PeripheralPath, data: &[u128]) {
                self.0.lock().unwrap().extend(data.iter().map(|q| (path, *q)));
            }
        }

        let received = Received::default();
        let mut sys = System::new(
            Modules {
                peripheral: Box::new(Recorder(received.clone())),
            },
            Config::default(),
        );
        sys.ee_write::<u32>(Address(0x1000_E000), 1).unwrap();

        const QWC: u32 = 10;
        for i in 0..QWC {
            sys.ee_write::<u128>(Address(0x4000 + i * 16), u128::from(i) << 64)
                .unwrap();
        }

        let base = EeChannel::Gif.base();
        sys.ee_write::<u32>(Address(base + 0x10), 0x4000).unwrap();
        sys.ee_write::<u32>(Address(base + 0x20), QWC).unwrap();
        sys.ee_write::<u32>(Address(base), 0x101).unwrap();
        assert_eq!(received.lock().unwrap().len(), BURST_QWC as usize);

        // the last two quadwords, then completion
        run(&mut sys, BURST_CYCLES as u64);
        assert_eq!(sys.ee_dmac.channel(EeChannel::Gif).qwc, 0);
        assert!(sys.ee_dmac.channel(EeChannel::Gif).chcr.start());
        run(&mut sys, BURST_CYCLES as u64);
        assert!(!sys.ee_dmac.channel(EeChannel::Gif).chcr.start());

        let received = received.lock().unwrap();
        let expected: Vec<_> = (0..QWC)
            .map(|i| (PeripheralPath::Gif, u128::from(i) << 64))
            .collect();
        assert_eq!(*received, expected);

        // channels without a peripheral model refuse to start
        let base = EeChannel::IpuFrom.base();
        assert!(matches!(
            sys.ee_write::<u32>(Address(base), 0x100),
            Err(Fault::Unimplemented { .. })
        ));
        assert!(!sys.ee_dma_running(EeChannel::IpuFrom));
    }
}
