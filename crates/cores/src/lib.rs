//! Processor cores for the cinnabar emulator.

mod idle;
mod script;

pub use idle::IdleCore;
pub use script::{Mismatch, Op, Outcome, ScriptCore, Value, Width};
