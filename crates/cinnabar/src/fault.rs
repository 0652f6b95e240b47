//! Fatal emulation conditions.

use crate::system::sif::Direction;
use common::Address;
use easyerr::Error;

/// A fatal condition detected during emulation. Faults are never recovered from: they propagate
/// up to the driver, which stops emulation and reports them.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("unmapped access to {addr} ({size} bytes, write: {write})")]
    Unmapped {
        addr: Address,
        size: usize,
        write: bool,
    },
    #[error("access to unknown register at {addr}")]
    UnmappedRegister { addr: Address },
    #[error("unimplemented: {what} (0x{value:08X})")]
    Unimplemented { what: &'static str, value: u32 },
    #[error("reserved encoding 0x{value:08X} written to {register}")]
    ReservedEncoding { register: &'static str, value: u32 },
    #[error("contradictory control on DMA channel {channel}: {reason}")]
    ContradictoryControl {
        channel: &'static str,
        reason: &'static str,
    },
    #[error("push into full {fifo:?} FIFO")]
    FifoOverflow { fifo: Direction },
    #[error("pop from empty {fifo:?} FIFO")]
    FifoUnderflow { fifo: Direction },
    #[error("DMA call stack overflow on channel {channel}")]
    CallStackOverflow { channel: &'static str },
    #[error("invalid DMA tag 0x{tag:08X} on channel {channel}")]
    InvalidTag { channel: &'static str, tag: u32 },
}
