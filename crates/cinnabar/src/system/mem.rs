//! Memory of the system.

use common::util::boxed_array;
use easyerr::{Error, ResultExt};
use std::path::Path;

pub const EE_RAM_LEN: usize = 32 * bytesize::MIB as usize;
pub const IOP_RAM_LEN: usize = 2 * bytesize::MIB as usize;
pub const SCRATCHPAD_LEN: usize = 16 * bytesize::KIB as usize;
pub const BIOS_LEN: usize = 4 * bytesize::MIB as usize;

#[derive(Debug, Error)]
pub enum BiosError {
    #[error("boot ROM image is {len} bytes long, larger than the 4 MiB ROM")]
    TooLarge { len: usize },
    #[error(transparent)]
    Io { source: std::io::Error },
}

/// A boot ROM image.
#[derive(Debug, Clone)]
pub struct Bios(Vec<u8>);

impl Bios {
    pub fn new(data: Vec<u8>) -> Result<Self, BiosError> {
        if data.len() > BIOS_LEN {
            return Err(BiosError::TooLarge { len: data.len() });
        }

        Ok(Self(data))
    }

    pub fn open(path: &Path) -> Result<Self, BiosError> {
        let data = std::fs::read(path).context(BiosCtx::Io)?;
        Self::new(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub struct Memory {
    pub ee_ram: Box<[u8; EE_RAM_LEN]>,
    pub iop_ram: Box<[u8; IOP_RAM_LEN]>,
    pub scratchpad: Box<[u8; SCRATCHPAD_LEN]>,
    pub bios: Box<[u8; BIOS_LEN]>,
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").finish_non_exhaustive()
    }
}

impl Memory {
    pub fn new(bios: Option<&Bios>) -> Self {
        let mut bios_region = boxed_array(0);
        if let Some(bios) = bios {
            let data = bios.as_bytes();
            bios_region[..data.len()].copy_from_slice(data);
        }

        Self {
            ee_ram: boxed_array(0),
            iop_ram: boxed_array(0),
            scratchpad: boxed_array(0),
            bios: bios_region,
        }
    }

    /// Clears every region except the boot ROM.
    pub fn clear_volatile(&mut self) {
        self.ee_ram.fill(0);
        self.iop_ram.fill(0);
        self.scratchpad.fill(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bios_size_limit() {
        assert!(Bios::new(vec![0; BIOS_LEN]).is_ok());
        assert!(matches!(
            Bios::new(vec![0; BIOS_LEN + 1]),
            Err(BiosError::TooLarge { len }) if len == BIOS_LEN + 1
        ));
    }

    #[test]
    fn bios_survives_clear() {
        let bios = Bios::new(vec![0xAB; 16]).unwrap();
        let mut mem = Memory::new(Some(&bios));
        mem.ee_ram[0] = 1;
        mem.clear_volatile();

        assert_eq!(mem.ee_ram[0], 0);
        assert_eq!(&mem.bios[..16], &[0xAB; 16]);
        assert_eq!(mem.bios[16], 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = Bios::open(Path::new("/nonexistent/cinnabar/bios.bin"));
        assert!(matches!(result, Err(BiosError::Io { .. })));
    }
}
