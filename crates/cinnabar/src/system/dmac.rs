//! DMA engines of both processors.
//!
//! A channel never runs a transfer to completion in one go. It moves one burst, then schedules
//! its own continuation (or completion) on the event queue. A pending continuation or completion
//! event is what marks a channel as running: there's no separate flag.

pub mod ee;
pub mod iop;
pub mod tag;

/// Outcome of a single burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Burst {
    /// Nothing could be moved. The channel waits for its DRQ to rise again.
    Stalled,
    /// Data was moved and the transfer isn't over yet.
    Continue,
    /// The transfer is over.
    Done,
}
