//! A SIF0 transfer driven entirely through the buses, the way guest software sets one up.

use cinnabar::{
    Address,
    system::dmac::{ee::EeChannel, iop::IopChannel},
};
use cores::{Op, Value};

pub const WORDS: [u32; 2] = [0xDEAD_BEEF, 0x0123_4567];
pub const SOURCE: u32 = 0x1000;
pub const TARGET: u32 = 0x0010_0000;
const TAG: u32 = 0x0F00;

fn word(addr: u32, value: u32) -> Op {
    Op::Write(Address(addr), Value::Word(value))
}

/// Enables the EE DMAC and starts SIF0 in destination chain mode.
pub fn ee_script() -> Vec<Op> {
    vec![
        word(0x1000_E000, 1),
        word(EeChannel::Sif0.base(), 0x104),
    ]
}

/// Writes the source words and a chain tag, then starts IOP SIF0 with its completion interrupt
/// enabled.
pub fn iop_script() -> Vec<Op> {
    let sif0 = IopChannel::Sif0.base();
    vec![
        word(SOURCE, WORDS[0]),
        word(SOURCE + 4, WORDS[1]),
        word(TAG, 0x8000_0000 | SOURCE),
        word(TAG + 4, WORDS.len() as u32),
        word(TAG + 8, 0x7000_0001),
        word(TAG + 12, TARGET),
        word(0x1F80_1074, 1 << 3),
        word(0x1F80_1570, 1 << (2 * 4 + 3)),
        word(0x1F80_1574, 1 << (16 + 2)),
        word(0x1F80_10F4, 1 << 23),
        word(sif0 + 0xC, TAG),
        word(sif0 + 0x8, (1 << 24) | (0b11 << 9) | 1),
    ]
}
