//! Sub-system interface: the FIFO pair and mailbox registers connecting the EE and the IOP.
//!
//! The FIFOs are only ever touched by the DMA engines. Every push and pop recomputes the DRQ
//! lines of the producing and consuming channels, which is how back-pressure is expressed.

use crate::{
    Fault,
    system::{
        System,
        dmac::{ee::EeChannel, iop::IopChannel},
    },
};
use static_assertions::const_assert;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Capacity of each FIFO, in words.
pub const FIFO_CAPACITY: usize = 32;
/// Producers get their DRQ back once occupancy drops below this many words.
pub const LOW_WATER: usize = 16;
/// Words in a quadword, the transfer granule of both ends.
pub const QWORD_WORDS: usize = 4;

const_assert!(FIFO_CAPACITY % QWORD_WORDS == 0);
const_assert!(LOW_WATER < FIFO_CAPACITY);

/// Direction of a FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// IOP to EE.
    Sif0,
    /// EE to IOP.
    Sif1,
}

/// A bounded word queue.
#[derive(Debug, Clone)]
pub struct Fifo {
    direction: Direction,
    words: VecDeque<u32>,
}

impl Fifo {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            words: VecDeque::with_capacity(FIFO_CAPACITY),
        }
    }

    pub fn push(&mut self, word: u32) -> Result<(), Fault> {
        if self.words.len() >= FIFO_CAPACITY {
            return Err(Fault::FifoOverflow {
                fifo: self.direction,
            });
        }

        trace!(fifo = ?self.direction, "push 0x{word:08X}");
        self.words.push_back(word);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, Fault> {
        let word = self.words.pop_front().ok_or(Fault::FifoUnderflow {
            fifo: self.direction,
        })?;

        trace!(fifo = ?self.direction, "pop 0x{word:08X}");
        Ok(word)
    }

    #[inline(always)]
    pub fn occupancy(&self) -> usize {
        self.words.len()
    }

    #[inline(always)]
    pub fn free(&self) -> usize {
        FIFO_CAPACITY - self.words.len()
    }

    /// How many words a producer may push in one burst.
    #[inline(always)]
    pub fn producer_burst(&self, cap: usize, remaining: usize) -> usize {
        cap.min(remaining).min(self.free())
    }

    /// How many words a consumer may pop in one burst.
    #[inline(always)]
    pub fn consumer_burst(&self, cap: usize, remaining: usize) -> usize {
        cap.min(remaining).min(self.occupancy())
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().copied()
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

/// Mailbox registers shared by both processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxRegister {
    /// Main-to-sub command.
    Mscom,
    /// Sub-to-main command.
    Smcom,
    /// Main-to-sub flags.
    Msflg,
    /// Sub-to-main flags.
    Smflg,
    Ctrl,
    Bd6,
}

#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub mscom: u32,
    pub smcom: u32,
    pub msflg: u32,
    pub smflg: u32,
    pub ctrl: u32,
    pub bd6: u32,
}

impl Mailbox {
    pub fn read(&self, reg: MailboxRegister) -> u32 {
        match reg {
            MailboxRegister::Mscom => self.mscom,
            MailboxRegister::Smcom => self.smcom,
            MailboxRegister::Msflg => self.msflg,
            MailboxRegister::Smflg => self.smflg,
            MailboxRegister::Ctrl => self.ctrl | 0xF000_0102,
            MailboxRegister::Bd6 => self.bd6,
        }
    }

    pub fn ee_write(&mut self, reg: MailboxRegister, value: u32) {
        match reg {
            MailboxRegister::Mscom => self.mscom = value,
            MailboxRegister::Smcom => warn!("ignoring EE write 0x{value:08X} to SMCOM"),
            MailboxRegister::Msflg => self.msflg |= value,
            MailboxRegister::Smflg => self.smflg &= !value,
            MailboxRegister::Ctrl => self.ctrl = (self.ctrl & !0x100) | (value & 0x100),
            MailboxRegister::Bd6 => self.bd6 = value,
        }
    }

    pub fn iop_write(&mut self, reg: MailboxRegister, value: u32) {
        match reg {
            MailboxRegister::Mscom => warn!("ignoring IOP write 0x{value:08X} to MSCOM"),
            MailboxRegister::Smcom => self.smcom = value,
            MailboxRegister::Msflg => self.msflg &= !value,
            MailboxRegister::Smflg => self.smflg |= value,
            MailboxRegister::Ctrl => self.ctrl = (self.ctrl & !0xF0) | (value & 0xF0),
            MailboxRegister::Bd6 => self.bd6 = value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sif {
    pub sif0: Fifo,
    pub sif1: Fifo,
    pub mailbox: Mailbox,
}

impl Default for Sif {
    fn default() -> Self {
        Self {
            sif0: Fifo::new(Direction::Sif0),
            sif1: Fifo::new(Direction::Sif1),
            mailbox: Mailbox::default(),
        }
    }
}

impl Sif {
    #[inline(always)]
    pub fn fifo(&self, direction: Direction) -> &Fifo {
        match direction {
            Direction::Sif0 => &self.sif0,
            Direction::Sif1 => &self.sif1,
        }
    }

    #[inline(always)]
    pub fn fifo_mut(&mut self, direction: Direction) -> &mut Fifo {
        match direction {
            Direction::Sif0 => &mut self.sif0,
            Direction::Sif1 => &mut self.sif1,
        }
    }

    pub fn occupancy(&self, direction: Direction) -> usize {
        self.fifo(direction).occupancy()
    }
}

impl System {
    /// Pushes a word from the producing DMA engine of `direction`.
    pub(crate) fn sif_write(&mut self, direction: Direction, word: u32) -> Result<(), Fault> {
        self.sif.fifo_mut(direction).push(word)?;
        self.sif_update_drq(direction);
        Ok(())
    }

    /// Pops a word for the consuming DMA engine of `direction`.
    pub(crate) fn sif_read(&mut self, direction: Direction) -> Result<u32, Fault> {
        let word = self.sif.fifo_mut(direction).pop()?;
        self.sif_update_drq(direction);
        Ok(word)
    }

    /// Recomputes the DRQ lines of both ends of a FIFO.
    pub(crate) fn sif_update_drq(&mut self, direction: Direction) {
        let fifo = self.sif.fifo(direction);
        let occupancy = fifo.occupancy();
        let free = fifo.free();

        let producer_drq = |current: bool| {
            if free < QWORD_WORDS {
                false
            } else if occupancy < LOW_WATER {
                true
            } else {
                current
            }
        };

        let consumer_drq = occupancy >= QWORD_WORDS;
        match direction {
            Direction::Sif0 => {
                let current = self.iop_dmac.channel(IopChannel::Sif0).drq;
                self.set_iop_drq(IopChannel::Sif0, producer_drq(current));
                self.set_ee_drq(EeChannel::Sif0, consumer_drq);
            }
            Direction::Sif1 => {
                let current = self.ee_dmac.channel(EeChannel::Sif1).drq;
                self.set_ee_drq(EeChannel::Sif1, producer_drq(current));
                self.set_iop_drq(IopChannel::Sif1, consumer_drq);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, Modules};

    #[test]
    fn overflow_is_a_fault() {
        let mut fifo = Fifo::new(Direction::Sif1);
        for word in 0..FIFO_CAPACITY as u32 {
            fifo.push(word).unwrap();
        }

        assert_eq!(fifo.free(), 0);
        assert!(matches!(
            fifo.push(0xDEAD),
            Err(Fault::FifoOverflow {
                fifo: Direction::Sif1
            })
        ));

        // nothing was dropped or reordered
        assert!(fifo.iter().eq(0..FIFO_CAPACITY as u32));
    }

    #[test]
    fn underflow_is_a_fault() {
        let mut fifo = Fifo::new(Direction::Sif0);
        assert!(matches!(fifo.pop(), Err(Fault::FifoUnderflow { .. })));

        fifo.push(7).unwrap();
        assert_eq!(fifo.pop().unwrap(), 7);
        assert!(fifo.pop().is_err());
    }

    #[test]
    fn burst_sizing_is_a_three_way_min() {
        let mut fifo = Fifo::new(Direction::Sif0);
        for _ in 0..20 {
            fifo.push(0).unwrap();
        }

        assert_eq!(fifo.producer_burst(32, 100), 12);
        assert_eq!(fifo.producer_burst(8, 100), 8);
        assert_eq!(fifo.producer_burst(32, 4), 4);

        assert_eq!(fifo.consumer_burst(32, 100), 20);
        assert_eq!(fifo.consumer_burst(8, 100), 8);
        assert_eq!(fifo.consumer_burst(32, 3), 3);
    }

    #[test]
    fn mailbox_flag_semantics() {
        let mut mailbox = Mailbox::default();

        mailbox.ee_write(MailboxRegister::Msflg, 0b0101);
        mailbox.ee_write(MailboxRegister::Msflg, 0b0010);
        assert_eq!(mailbox.read(MailboxRegister::Msflg), 0b0111);
        mailbox.iop_write(MailboxRegister::Msflg, 0b0001);
        assert_eq!(mailbox.read(MailboxRegister::Msflg), 0b0110);

        mailbox.iop_write(MailboxRegister::Smflg, 0x8000_0000);
        mailbox.ee_write(MailboxRegister::Smflg, 0x8000_0000);
        assert_eq!(mailbox.read(MailboxRegister::Smflg), 0);

        mailbox.ee_write(MailboxRegister::Smcom, 0x1234);
        mailbox.iop_write(MailboxRegister::Smcom, 0x5678);
        assert_eq!(mailbox.read(MailboxRegister::Smcom), 0x5678);
    }

    #[test]
    fn draining_below_low_water_gives_the_producer_its_drq_back() {
        let mut sys = System::new(Modules::default(), Config::default());
        let producer = |sys: &System| sys.ee_dmac.channel(EeChannel::Sif1).drq;
        let consumer = |sys: &System| sys.iop_dmac.channel(IopChannel::Sif1).drq;

        assert!(producer(&sys));
        assert!(!consumer(&sys));

        for word in 0..29 {
            sys.sif_write(Direction::Sif1, word).unwrap();
        }

        // less than a quadword of room left
        assert!(!producer(&sys));
        assert!(consumer(&sys));

        // above the low-water mark the producer stays stalled
        for _ in 0..12 {
            sys.sif_read(Direction::Sif1).unwrap();
        }
        assert_eq!(sys.sif.occupancy(Direction::Sif1), 17);
        assert!(!producer(&sys));

        // at the mark, still stalled
        sys.sif_read(Direction::Sif1).unwrap();
        assert_eq!(sys.sif.occupancy(Direction::Sif1), LOW_WATER);
        assert!(!producer(&sys));

        sys.sif_read(Direction::Sif1).unwrap();
        assert!(producer(&sys));

        for _ in 0..13 {
            sys.sif_read(Direction::Sif1).unwrap();
        }
        assert_eq!(sys.sif.occupancy(Direction::Sif1), 2);
        assert!(!consumer(&sys));
    }
}
