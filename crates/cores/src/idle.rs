use cinnabar::{
    Address, Cycles, Fault,
    cores::{EeCore, Executed, IopCore},
    system::System,
};

/// A core that retires every instruction it is asked to without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleCore;

#[inline(always)]
fn retire(cycles: Cycles) -> Executed {
    Executed {
        instructions: cycles.value().min(u64::from(u32::MAX)) as u32,
        cycles,
        hit_breakpoint: false,
    }
}

impl EeCore for IdleCore {
    fn exec(&mut self, _: &mut System, cycles: Cycles, _: &[Address]) -> Result<Executed, Fault> {
        Ok(retire(cycles))
    }

    fn step(&mut self, _: &mut System) -> Result<Executed, Fault> {
        Ok(retire(Cycles(1)))
    }
}

impl IopCore for IdleCore {
    fn exec(&mut self, _: &mut System, cycles: Cycles) -> Result<Executed, Fault> {
        Ok(retire(cycles))
    }
}
