pub mod clock;
pub mod cores;
pub mod fault;
pub mod modules;
pub mod runner;
pub mod system;

use crate::{
    clock::ClockDomain,
    cores::{Cores, Executed},
    system::{Modules, System},
};
use tracing::{error, warn};

pub use common::{self, Address, Cycles, Primitive};
pub use fault::Fault;

/// Longest slice of EE cycles executed between two event drains.
const MAX_TICK: Cycles = Cycles(4096);

/// The Cinnabar emulator.
pub struct Cinnabar {
    /// System state.
    pub system: System,
    /// Cores of the emulator.
    cores: Cores,
    /// Converts elapsed EE time into IOP time.
    clock: ClockDomain,
}

impl Cinnabar {
    pub fn new(cores: Cores, modules: Modules, config: system::Config) -> Self {
        Self {
            system: System::new(modules, config),
            cores,
            clock: ClockDomain::default(),
        }
    }

    /// Runs the IOP for the time the EE just spent, then moves time forward and drains every due
    /// event. Interrupts raised by events are only visible to the cores on the next slice.
    fn settle(&mut self, ee: Executed) -> Result<Executed, Fault> {
        let iop_cycles = self.clock.ee_to_iop(ee.cycles);
        if iop_cycles > Cycles::ZERO {
            self.cores.iop.exec(&mut self.system, iop_cycles)?;
        }

        self.system.scheduler.advance(ee.cycles.value());
        self.system.process_events()?;

        Ok(ee)
    }

    fn slice(&mut self, cycles: Cycles, breakpoints: &[Address]) -> Result<Executed, Fault> {
        let ee = self.cores.ee.exec(&mut self.system, cycles, breakpoints)?;
        self.settle(ee)
    }

    /// Runs one tick of `instructions` EE instructions. An EE instruction takes one EE cycle.
    pub fn tick(&mut self, instructions: u32) -> Result<Executed, Fault> {
        self.slice(Cycles(u64::from(instructions)), &[])
            .inspect_err(|fault| error!(%fault, "emulation fault"))
    }

    /// Advances emulation by the specified number of EE cycles.
    pub fn exec(&mut self, cycles: Cycles, breakpoints: &[Address]) -> Result<Executed, Fault> {
        let mut executed = Executed::default();
        while executed.cycles < cycles {
            // how many EE cycles can we execute?
            let remaining = cycles - executed.cycles;
            let until_next_event =
                Cycles(self.system.scheduler.until_next().unwrap_or(u64::MAX).max(1));
            let can_execute = until_next_event.min(remaining).min(MAX_TICK);

            let e = self
                .slice(can_execute, breakpoints)
                .inspect_err(|fault| error!(%fault, "emulation fault"))?;

            executed.instructions += e.instructions;
            executed.cycles += e.cycles;
            executed.hit_breakpoint = e.hit_breakpoint;

            if e.hit_breakpoint {
                break;
            }

            if e.cycles == Cycles::ZERO {
                warn!("EE core made no progress");
                break;
            }
        }

        Ok(executed)
    }

    /// Runs exactly one EE instruction.
    pub fn step(&mut self) -> Result<Executed, Fault> {
        let ee = self
            .cores
            .ee
            .step(&mut self.system)
            .inspect_err(|fault| error!(%fault, "emulation fault"))?;

        self.settle(ee)
            .inspect_err(|fault| error!(%fault, "emulation fault"))
    }

    /// Restores the power-on state of the system.
    pub fn reset(&mut self) {
        self.system.reset();
        self.clock.reset();
    }
}
