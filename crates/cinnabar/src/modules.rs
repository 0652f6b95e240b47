//! Emulator modules.
//!
//! Modules receive data from the system core for peripherals that aren't emulated here, such as
//! the graphics synthesizer or the vector units.

/// A peripheral path fed by the EE DMA controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralPath {
    Vif0,
    Vif1,
    Gif,
    IpuTo,
}

/// Trait for peripheral modules.
pub trait PeripheralModule: Send {
    /// Receives quadwords sent through `path`.
    fn receive(&mut self, path: PeripheralPath, data: &[u128]);
}

/// An implementation of [`PeripheralModule`] which does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NopPeripheralModule;

impl PeripheralModule for NopPeripheralModule {
    fn receive(&mut self, _: PeripheralPath, _: &[u128]) {}
}
