//! State of the emulator.

pub mod bus;
pub mod dmac;
pub mod intc;
pub mod mem;
pub mod scheduler;
pub mod sif;
pub mod video;

use crate::{
    Fault,
    modules::{NopPeripheralModule, PeripheralModule},
    system::{
        dmac::{ee::EeDmac, iop::IopDmac},
        intc::{EeIntc, IopIntc},
        mem::{Bios, Memory},
        scheduler::{EventHandle, Scheduler},
        sif::Sif,
        video::Video,
    },
};
use tracing::{debug, info};
use twox_hash::XxHash3_64;
use zerocopy::IntoBytes;

pub type Callback = Box<dyn FnMut() + Send + Sync + 'static>;

/// System configuration.
#[derive(Default)]
pub struct Config {
    pub bios: Option<Bios>,
    pub vsync_callback: Option<Callback>,
}

/// System modules.
pub struct Modules {
    pub peripheral: Box<dyn PeripheralModule>,
}

impl Default for Modules {
    fn default() -> Self {
        Self {
            peripheral: Box::new(NopPeripheralModule),
        }
    }
}

/// Handles of the events every component schedules.
#[derive(Debug, Clone, Copy)]
pub struct Events {
    pub ee_dma_continue: EventHandle,
    pub ee_dma_complete: EventHandle,
    pub iop_dma_continue: EventHandle,
    pub iop_dma_complete: EventHandle,
    pub vblank_start: EventHandle,
    pub vblank_end: EventHandle,
}

impl Events {
    fn register(scheduler: &mut Scheduler<System>) -> Self {
        Self {
            ee_dma_continue: scheduler.register(dmac::ee::continue_transfer),
            ee_dma_complete: scheduler.register(dmac::ee::complete_transfer),
            iop_dma_continue: scheduler.register(dmac::iop::continue_transfer),
            iop_dma_complete: scheduler.register(dmac::iop::complete_transfer),
            vblank_start: scheduler.register(video::vblank_start),
            vblank_end: scheduler.register(video::vblank_end),
        }
    }
}

/// System state.
pub struct System {
    /// System configuration.
    pub config: Config,
    /// System modules.
    pub modules: Modules,
    /// Scheduler for events.
    pub scheduler: Scheduler<System>,
    /// Handles of registered events.
    pub events: Events,
    /// Memory regions.
    pub mem: Memory,
    pub ee_intc: EeIntc,
    pub iop_intc: IopIntc,
    pub ee_dmac: EeDmac,
    pub iop_dmac: IopDmac,
    pub sif: Sif,
    pub video: Video,
}

impl System {
    pub fn new(modules: Modules, config: Config) -> Self {
        let mut scheduler = Scheduler::default();
        let events = Events::register(&mut scheduler);

        let mut system = System {
            mem: Memory::new(config.bios.as_ref()),
            config,
            modules,
            scheduler,
            events,
            ee_intc: EeIntc::default(),
            iop_intc: IopIntc::default(),
            ee_dmac: EeDmac::default(),
            iop_dmac: IopDmac::default(),
            sif: Sif::default(),
            video: Video::default(),
        };

        system.video_arm();
        system
    }

    /// Dispatches every event whose deadline has been reached, in deadline order.
    pub fn process_events(&mut self) -> Result<(), Fault> {
        while let Some(due) = self.scheduler.pop() {
            (due.handler)(self, due.channel, due.late)?;
        }

        Ok(())
    }

    /// Whether an interrupt is pending to the EE: either from its interrupt controller or from
    /// the DMA controller's INT1 line.
    pub fn ee_interrupt_pending(&self) -> bool {
        self.ee_intc.pending() || self.ee_dmac.int1()
    }

    /// Whether an interrupt is pending to the IOP.
    pub fn iop_interrupt_pending(&self) -> bool {
        self.iop_intc.pending()
    }

    /// Restores the power-on state. The boot ROM is kept.
    pub fn reset(&mut self) {
        info!("resetting system");

        self.mem.clear_volatile();
        self.scheduler.reset();
        self.ee_intc = EeIntc::default();
        self.iop_intc = IopIntc::default();
        self.ee_dmac = EeDmac::default();
        self.iop_dmac = IopDmac::default();
        self.sif = Sif::default();
        self.video = Video::default();

        self.video_arm();
    }

    /// A digest of all emulated state, for comparing runs.
    pub fn fingerprint(&self) -> u64 {
        let mut state = Vec::with_capacity(2048);
        let mut words = |values: &[u32]| {
            for value in values {
                state.extend_from_slice(&value.to_le_bytes());
            }
        };

        words(&[
            self.ee_intc.stat,
            self.ee_intc.mask,
            u32::from(self.ee_intc.master_enable),
            self.iop_intc.stat,
            self.iop_intc.mask,
            u32::from(self.iop_intc.master_enable),
        ]);

        let dmac = &self.ee_dmac;
        for channel in &dmac.channels {
            words(&[
                channel.chcr.to_bits(),
                channel.madr,
                channel.qwc,
                channel.tadr,
                channel.asr[0],
                channel.asr[1],
                channel.sadr,
                u32::from(channel.drq),
                u32::from(channel.tag_end),
            ]);
        }

        words(&[
            dmac.sqwc,
            dmac.rbsr,
            dmac.rbor,
            dmac.stadr,
            dmac.enable,
        ]);

        let dmac = &self.iop_dmac;
        for channel in &dmac.channels {
            words(&[
                channel.madr,
                channel.chcr.to_bits(),
                channel.bcr.to_bits(),
                channel.tadr,
                channel.remaining,
                u32::from(channel.drq),
                u32::from(channel.tag_end),
            ]);
        }

        words(&[self.iop_dmac.dpcr, self.iop_dmac.dpcr2]);

        let mailbox = &self.sif.mailbox;
        words(&[
            mailbox.mscom,
            mailbox.smcom,
            mailbox.msflg,
            mailbox.smflg,
            mailbox.ctrl,
            mailbox.bd6,
        ]);

        for direction in [sif::Direction::Sif0, sif::Direction::Sif1] {
            let fifo = self.sif.fifo(direction);
            words(&[fifo.occupancy() as u32]);
            words(&fifo.iter().collect::<Vec<_>>());
        }

        state.extend_from_slice(self.ee_dmac.ctrl.as_bytes());
        state.extend_from_slice(self.ee_dmac.stat.as_bytes());
        state.extend_from_slice(self.ee_dmac.pcr.as_bytes());
        state.extend_from_slice(self.iop_dmac.dicr.as_bytes());
        state.extend_from_slice(self.iop_dmac.dicr2.as_bytes());
        state.extend_from_slice(&self.scheduler.now().to_le_bytes());
        for event in self.scheduler.pending() {
            state.extend_from_slice(&event.cycle.to_le_bytes());
            state.extend_from_slice(&event.handle.index().to_le_bytes());
            state.extend_from_slice(&event.channel.to_le_bytes());
            state.extend_from_slice(&event.period.to_le_bytes());
        }

        state.extend_from_slice(&self.video.frames.to_le_bytes());

        for region in [
            &self.mem.ee_ram[..],
            &self.mem.iop_ram[..],
            &self.mem.scratchpad[..],
        ] {
            state.extend_from_slice(&XxHash3_64::oneshot(region).to_le_bytes());
        }

        let digest = XxHash3_64::oneshot(&state);
        debug!("fingerprint 0x{digest:016X}");
        digest
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::Address;

    #[test]
    fn reset_restores_power_on_state() {
        let bios = Bios::new(vec![0x42; 64]).unwrap();
        let mut sys = System::new(
            Modules::default(),
            Config {
                bios: Some(bios),
                ..Default::default()
            },
        );

        let pristine = sys.fingerprint();

        sys.ee_write::<u32>(Address(0x100), 7).unwrap();
        sys.ee_write::<u32>(Address(0x1000_F010), 0b100).unwrap();
        sys.iop_write::<u32>(Address(0x1D00_0010), 9).unwrap();
        sys.scheduler.advance(1000);
        sys.process_events().unwrap();
        assert_ne!(sys.fingerprint(), pristine);

        sys.reset();
        assert_eq!(sys.fingerprint(), pristine);
        assert_eq!(sys.mem.bios[0], 0x42);
        assert!(sys.scheduler.is_scheduled(sys.events.vblank_start, 0));
    }

    #[test]
    fn ee_pending_includes_int1() {
        let mut sys = System::new(Modules::default(), Config::default());
        assert!(!sys.ee_interrupt_pending());

        sys.ee_dmac.stat.set_beis(true);
        assert!(sys.ee_interrupt_pending());
        assert!(!sys.ee_intc.pending());
    }

    #[test]
    fn fingerprint_covers_pending_events() {
        let a = System::new(Modules::default(), Config::default());
        let mut b = System::new(Modules::default(), Config::default());
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.scheduler.schedule(b.events.ee_dma_complete, 5, 10_000);
        assert_ne!(a.fingerprint(), b.fingerprint());

        b.scheduler.cancel(b.events.ee_dma_complete, 5);
        assert_eq!(a.fingerprint(), b.fingerprint());

        // same events, shifted deadline
        b.scheduler.schedule_repeating(
            b.events.vblank_start,
            0,
            video::VBLANK_START as i64 + 1,
            video::FRAME_CYCLES,
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
