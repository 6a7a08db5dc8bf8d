//! Loader-stub binary parsing.
//!
//! The loader stub is a small program placed into target RAM that performs
//! erase and program operations on command. Its binary starts with a fixed
//! 24-byte little-endian header describing where the image wants to live and
//! where its parameter area and data buffer are.

use std::fs;
use std::path::{Path, PathBuf};

use super::FlashError;

/// Magic value at the start of every loader stub binary (`b"FLSH"`).
pub const STUB_MAGIC: u32 = 0x4853_4C46;

/// Size of the fixed stub header preceding the executable image.
pub const STUB_HEADER_SIZE: usize = 24;

/// A loader stub binary with its header decoded.
///
/// Parsed once per sequence build and read-only afterwards. The parameter
/// area consists of four consecutive words: command, arg1, arg2 and result.
#[derive(Debug, Clone)]
pub struct ParsedStub {
    /// The raw stub binary, header included.
    pub image: Vec<u8>,
    /// RAM address the stub image must be loaded at.
    pub load_address: u32,
    /// Address execution starts at.
    pub entry_point: u32,
    /// Base address of the four-word parameter area.
    pub parameter_area: u32,
    /// RAM buffer the stub reads payload data from.
    pub data_buffer: u32,
    /// Capacity of the data buffer in bytes.
    pub data_buffer_size: u32,
    /// Where the stub binary was loaded from.
    pub path: PathBuf,
}

impl ParsedStub {
    /// Reads and validates a stub binary.
    pub fn from_file(path: &Path) -> Result<Self, FlashError> {
        let image = fs::read(path).map_err(FlashError::io(path))?;
        Self::parse(image, path)
    }

    fn parse(image: Vec<u8>, path: &Path) -> Result<Self, FlashError> {
        if image.len() < STUB_HEADER_SIZE {
            return Err(FlashError::format(
                path,
                format!("stub image too small ({} bytes)", image.len()),
            ));
        }

        let word = |offset: usize| {
            u32::from_le_bytes(image[offset..offset + 4].try_into().unwrap())
        };

        if word(0) != STUB_MAGIC {
            return Err(FlashError::format(path, "stub signature mismatch"));
        }

        let load_address = word(4);
        let entry_point = word(8);
        let parameter_area = word(12);
        let data_buffer = word(16);
        let data_buffer_size = word(20) as i32;

        let load_end = load_address.wrapping_add(image.len() as u32);
        if entry_point < load_address || entry_point >= load_end {
            return Err(FlashError::InvalidEntryPoint {
                entry_point,
                load_address,
                load_end,
            });
        }

        if data_buffer_size <= 0 {
            return Err(FlashError::format(
                path,
                format!("unusable stub data buffer size {data_buffer_size}"),
            ));
        }

        tracing::debug!(
            "Parsed loader stub {}: load {:#010x}, entry {:#010x}, {} byte data buffer",
            path.display(),
            load_address,
            entry_point,
            data_buffer_size,
        );

        Ok(ParsedStub {
            image,
            load_address,
            entry_point,
            parameter_area,
            data_buffer,
            data_buffer_size: data_buffer_size as u32,
            path: path.to_owned(),
        })
    }

    /// Address of the command word.
    pub fn command_address(&self) -> u32 {
        self.parameter_area
    }

    /// Address of the first argument word.
    pub fn arg1_address(&self) -> u32 {
        self.parameter_area + 4
    }

    /// Address of the second argument word.
    pub fn arg2_address(&self) -> u32 {
        self.parameter_area + 8
    }

    /// Address of the result word the caller polls for completion.
    pub fn result_address(&self) -> u32 {
        self.parameter_area + 12
    }

    /// The memory expression the execution engine re-reads to detect
    /// completion of an invocation.
    pub fn result_expression(&self) -> String {
        format!("*((unsigned *)0x{:x})", self.result_address())
    }
}
