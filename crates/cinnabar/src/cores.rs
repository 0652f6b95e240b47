use crate::{Fault, system::System};
use common::{Address, Cycles};

#[derive(Debug, Default, Clone, Copy)]
pub struct Executed {
    /// How many instructions have been executed.
    pub instructions: u32,
    /// How many cycles have been executed, in the core's own clock domain.
    pub cycles: Cycles,
    /// Whether a breakpoint was hit.
    pub hit_breakpoint: bool,
}

/// Trait for EE cores.
///
/// Cores must check [`System::ee_interrupt_pending`] before every instruction, and only there.
pub trait EeCore: Send {
    /// Drives the EE forward by approximately the given number of `cycles`, stopping at any
    /// address in `breakpoints`.
    fn exec(
        &mut self,
        sys: &mut System,
        cycles: Cycles,
        breakpoints: &[Address],
    ) -> Result<Executed, Fault>;

    /// Steps the EE, i.e. runs exactly 1 instruction.
    fn step(&mut self, sys: &mut System) -> Result<Executed, Fault>;
}

/// Trait for IOP cores.
///
/// Cores must check [`System::iop_interrupt_pending`] before every instruction, and only there.
pub trait IopCore: Send {
    /// Drives the IOP forward by the given number of IOP `cycles`.
    fn exec(&mut self, sys: &mut System, cycles: Cycles) -> Result<Executed, Fault>;
}

/// Cores that emulate the processors.
pub struct Cores {
    pub ee: Box<dyn EeCore>,
    pub iop: Box<dyn IopCore>,
}
