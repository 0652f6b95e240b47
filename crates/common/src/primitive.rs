use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Trait for memory primitives.
///
/// A primitive is any of the access widths the buses support: bytes, half-words, words, double
/// words and quadwords. That is, [`u8`], [`u16`], [`u32`], [`u64`], [`u128`] and their signed
/// counterparts.
pub trait Primitive:
    std::fmt::Debug
    + std::fmt::UpperHex
    + Copy
    + Immutable
    + FromBytes
    + IntoBytes
    + Default
    + Send
    + Sync
    + 'static
{
    /// Reads a value of this primitive from the bytes of a buffer (in little endian). If `buf`
    /// does not contain enough data, it's going to be completed with zeros.
    fn read_le_bytes(buf: &[u8]) -> Self;

    /// Writes this primitive to the given buffer (in little endian). If `buf` is not big enough,
    /// remaining bytes are going to be silently dropped.
    fn write_le_bytes(self, buf: &mut [u8]);

    /// Truncates this primitive to its low 32 bits, zero-extending narrower ones.
    fn low_word(self) -> u32;

    /// Builds this primitive from a 32-bit value, truncating or zero-extending it.
    fn from_word(value: u32) -> Self;
}

macro_rules! impl_primitive {
    ($($type:ty),*) => {
        $(
            impl Primitive for $type {
                #[inline(always)]
                fn read_le_bytes(buf: &[u8]) -> Self {
                    const SELF_SIZE: usize = size_of::<$type>();

                    if let Some(bytes) = buf.first_chunk::<SELF_SIZE>() {
                        return <$type>::from_le_bytes(*bytes);
                    }

                    let mut bytes = [0u8; SELF_SIZE];
                    bytes[..buf.len()].copy_from_slice(buf);
                    <$type>::from_le_bytes(bytes)
                }

                #[inline(always)]
                fn write_le_bytes(self, buf: &mut [u8]) {
                    const SELF_SIZE: usize = size_of::<$type>();

                    let bytes = self.to_le_bytes();
                    let len = buf.len().min(SELF_SIZE);
                    buf[..len].copy_from_slice(&bytes[..len]);
                }

                #[inline(always)]
                fn low_word(self) -> u32 {
                    u32::read_le_bytes(&self.to_le_bytes())
                }

                #[inline(always)]
                fn from_word(value: u32) -> Self {
                    Self::read_le_bytes(&value.to_le_bytes())
                }
            }
        )*
    };
}

impl_primitive! {
    u8,
    u16,
    u32,
    u64,
    u128,

    i8,
    i16,
    i32,
    i64,
    i128
}
