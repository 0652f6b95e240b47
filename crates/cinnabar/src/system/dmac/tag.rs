//! DMA tag formats.

use bitos::{
    bitos,
    integer::{u2, u3, u24},
};
use strum::FromRepr;

/// Source chain tag identifiers of the EE DMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceTagId {
    /// Transfer from `ADDR`, then end.
    Refe = 0,
    /// Transfer the data following the tag, next tag follows the data.
    Cnt = 1,
    /// Transfer the data following the tag, next tag at `ADDR`.
    Next = 2,
    /// Transfer from `ADDR`, next tag follows this one.
    Ref = 3,
    /// Like `Ref`, with stall control.
    Refs = 4,
    /// Like `Next`, pushing the address after the data onto the call stack.
    Call = 5,
    /// Transfer the data following the tag, next tag popped from the call stack.
    Ret = 6,
    /// Transfer the data following the tag, then end.
    End = 7,
}

/// Destination chain tag identifiers of the EE DMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum DestTagId {
    Cnts = 0,
    Cnt = 1,
    End = 7,
}

/// First word of an EE DMA tag.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EeTagHeader {
    #[bits(0..16)]
    pub qwc: u16,
    #[bits(26..28)]
    pub pce: u2,
    #[bits(28..31)]
    pub id: u3,
    #[bits(31)]
    pub irq: bool,
}

/// A full EE DMA tag, as a quadword split into words.
#[derive(Debug, Clone, Copy)]
pub struct EeTag {
    pub words: [u32; 4],
}

impl EeTag {
    pub fn from_qword(qword: u128) -> Self {
        Self {
            words: std::array::from_fn(|i| (qword >> (32 * i)) as u32),
        }
    }

    #[inline(always)]
    pub fn header(&self) -> EeTagHeader {
        EeTagHeader::from_bits(self.words[0])
    }

    #[inline(always)]
    pub fn qwc(&self) -> u32 {
        u32::from(self.header().qwc())
    }

    #[inline(always)]
    pub fn irq(&self) -> bool {
        self.header().irq()
    }

    /// Address field. Bit 31 selects the scratchpad.
    #[inline(always)]
    pub fn addr(&self) -> u32 {
        self.words[1] & !0xF
    }

    /// Upper half of the header word, mirrored into `CHCR.TAG`.
    #[inline(always)]
    pub fn chcr_tag(&self) -> u16 {
        (self.words[0] >> 16) as u16
    }

    #[inline(always)]
    pub fn source_id(&self) -> SourceTagId {
        match self.header().id().value() {
            0 => SourceTagId::Refe,
            1 => SourceTagId::Cnt,
            2 => SourceTagId::Next,
            3 => SourceTagId::Ref,
            4 => SourceTagId::Refs,
            5 => SourceTagId::Call,
            6 => SourceTagId::Ret,
            _ => SourceTagId::End,
        }
    }

    #[inline(always)]
    pub fn dest_id(&self) -> Option<DestTagId> {
        DestTagId::from_repr(self.header().id().value())
    }
}

/// First word of an IOP DMA chain tag.
#[bitos(32)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IopTagHeader {
    #[bits(0..24)]
    pub addr: u24,
    #[bits(30)]
    pub irq: bool,
    #[bits(31)]
    pub end: bool,
}

/// A four word IOP DMA chain tag. The last two words carry the EE side tag on SIF0.
#[derive(Debug, Clone, Copy)]
pub struct IopTag {
    pub words: [u32; 4],
}

impl IopTag {
    #[inline(always)]
    pub fn header(&self) -> IopTagHeader {
        IopTagHeader::from_bits(self.words[0])
    }

    #[inline(always)]
    pub fn addr(&self) -> u32 {
        self.header().addr().value()
    }

    /// Word count, rounded up to whole quadwords.
    #[inline(always)]
    pub fn words(&self) -> u32 {
        (self.words[1] & 0x00FF_FFFF).next_multiple_of(4)
    }

    /// Whether this is the last tag of the chain.
    #[inline(always)]
    pub fn is_end(&self) -> bool {
        self.header().irq() || self.header().end()
    }

    /// The tag forwarded to the EE.
    #[inline(always)]
    pub fn ee_tag(&self) -> [u32; 4] {
        [self.words[2], self.words[3], 0, 0]
    }
}
