//! A core that runs a fixed script of bus operations, one per instruction.
//!
//! Useful to drive the system the way guest software would, without an instruction set.

use cinnabar::{
    Address, Cycles, Fault, Primitive,
    cores::{EeCore, Executed, IopCore},
    system::System,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Half,
    Word,
    Double,
    Quad,
}

/// A value of one of the bus access widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Byte(u8),
    Half(u16),
    Word(u32),
    Double(u64),
    Quad(u128),
}

impl Value {
    pub fn width(self) -> Width {
        match self {
            Self::Byte(_) => Width::Byte,
            Self::Half(_) => Width::Half,
            Self::Word(_) => Width::Word,
            Self::Double(_) => Width::Double,
            Self::Quad(_) => Width::Quad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Write(Address, Value),
    /// Reads a value and records it in the [`Outcome`].
    Read(Address, Width),
    /// Reads a value and records a [`Mismatch`] if it's not the expected one.
    Expect(Address, Value),
    /// Does nothing for the given number of instructions, at least one.
    Idle(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub addr: Address,
    pub expected: Value,
    pub found: Value,
}

/// What a script observed while running.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub reads: Vec<(Address, Value)>,
    pub mismatches: Vec<Mismatch>,
    /// How many times the interrupt pending line went from low to high.
    pub interrupts: u32,
    /// Whether every operation has been executed.
    pub finished: bool,
}

/// The bus a script runs against.
trait Bus {
    const NAME: &'static str;

    fn read<P: Primitive>(sys: &mut System, addr: Address) -> Result<P, Fault>;
    fn write<P: Primitive>(sys: &mut System, addr: Address, value: P) -> Result<(), Fault>;
    fn interrupt_pending(sys: &System) -> bool;
}

struct EeBus;

impl Bus for EeBus {
    const NAME: &'static str = "EE";

    #[inline(always)]
    fn read<P: Primitive>(sys: &mut System, addr: Address) -> Result<P, Fault> {
        sys.ee_read(addr)
    }

    #[inline(always)]
    fn write<P: Primitive>(sys: &mut System, addr: Address, value: P) -> Result<(), Fault> {
        sys.ee_write(addr, value)
    }

    #[inline(always)]
    fn interrupt_pending(sys: &System) -> bool {
        sys.ee_interrupt_pending()
    }
}

struct IopBus;

impl Bus for IopBus {
    const NAME: &'static str = "IOP";

    #[inline(always)]
    fn read<P: Primitive>(sys: &mut System, addr: Address) -> Result<P, Fault> {
        sys.iop_read(addr)
    }

    #[inline(always)]
    fn write<P: Primitive>(sys: &mut System, addr: Address, value: P) -> Result<(), Fault> {
        sys.iop_write(addr, value)
    }

    #[inline(always)]
    fn interrupt_pending(sys: &System) -> bool {
        sys.iop_interrupt_pending()
    }
}

fn read<B: Bus>(sys: &mut System, addr: Address, width: Width) -> Result<Value, Fault> {
    Ok(match width {
        Width::Byte => Value::Byte(B::read(sys, addr)?),
        Width::Half => Value::Half(B::read(sys, addr)?),
        Width::Word => Value::Word(B::read(sys, addr)?),
        Width::Double => Value::Double(B::read(sys, addr)?),
        Width::Quad => Value::Quad(B::read(sys, addr)?),
    })
}

fn write<B: Bus>(sys: &mut System, addr: Address, value: Value) -> Result<(), Fault> {
    match value {
        Value::Byte(v) => B::write(sys, addr, v),
        Value::Half(v) => B::write(sys, addr, v),
        Value::Word(v) => B::write(sys, addr, v),
        Value::Double(v) => B::write(sys, addr, v),
        Value::Quad(v) => B::write(sys, addr, v),
    }
}

/// A core that executes a script of [`Op`]s and then idles. Implements both [`EeCore`] and
/// [`IopCore`], running against the bus of whichever processor it drives.
///
/// The program counter of a script is the index of its next operation times four.
pub struct ScriptCore {
    ops: Vec<Op>,
    index: usize,
    idle: u32,
    pending: bool,
    outcome: Arc<Mutex<Outcome>>,
}

impl ScriptCore {
    pub fn new(ops: Vec<Op>) -> Self {
        Self {
            ops,
            index: 0,
            idle: 0,
            pending: false,
            outcome: Arc::default(),
        }
    }

    /// A handle to what the script observes. Remains valid after the core is handed over to the
    /// emulator.
    pub fn outcome(&self) -> Arc<Mutex<Outcome>> {
        self.outcome.clone()
    }

    pub fn pc(&self) -> Address {
        Address(self.index as u32 * 4)
    }

    fn record(&self) -> MutexGuard<'_, Outcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes one instruction. Returns whether the program counter moved.
    fn instruction<B: Bus>(&mut self, sys: &mut System) -> Result<bool, Fault> {
        let pending = B::interrupt_pending(sys);
        if pending && !self.pending {
            debug!(bus = B::NAME, pc = %self.pc(), "interrupt observed");
            self.record().interrupts += 1;
        }
        self.pending = pending;

        if self.idle > 0 {
            self.idle -= 1;
            return Ok(false);
        }

        let Some(&op) = self.ops.get(self.index) else {
            return Ok(false);
        };

        self.index += 1;
        match op {
            Op::Write(addr, value) => write::<B>(sys, addr, value)?,
            Op::Read(addr, width) => {
                let value = read::<B>(sys, addr, width)?;
                self.record().reads.push((addr, value));
            }
            Op::Expect(addr, expected) => {
                let found = read::<B>(sys, addr, expected.width())?;
                if found != expected {
                    warn!(bus = B::NAME, %addr, ?expected, ?found, "unexpected value");
                    self.record().mismatches.push(Mismatch {
                        addr,
                        expected,
                        found,
                    });
                }
            }
            Op::Idle(count) => self.idle = count.saturating_sub(1),
        }

        if self.index == self.ops.len() {
            debug!(bus = B::NAME, "script finished");
            self.record().finished = true;
        }

        Ok(true)
    }

    fn run<B: Bus>(
        &mut self,
        sys: &mut System,
        cycles: Cycles,
        breakpoints: &[Address],
    ) -> Result<Executed, Fault> {
        let mut executed = Executed::default();
        while executed.cycles < cycles {
            let moved = self.instruction::<B>(sys)?;
            executed.instructions += 1;
            executed.cycles += Cycles(1);

            if moved && breakpoints.contains(&self.pc()) {
                executed.hit_breakpoint = true;
                break;
            }
        }

        Ok(executed)
    }
}

impl EeCore for ScriptCore {
    fn exec(
        &mut self,
        sys: &mut System,
        cycles: Cycles,
        breakpoints: &[Address],
    ) -> Result<Executed, Fault> {
        self.run::<EeBus>(sys, cycles, breakpoints)
    }

    fn step(&mut self, sys: &mut System) -> Result<Executed, Fault> {
        self.run::<EeBus>(sys, Cycles(1), &[])
    }
}

impl IopCore for ScriptCore {
    fn exec(&mut self, sys: &mut System, cycles: Cycles) -> Result<Executed, Fault> {
        self.run::<IopBus>(sys, cycles, &[])
    }
}
