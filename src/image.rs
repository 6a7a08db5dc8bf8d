//! Contract with the application-image builder.
//!
//! Turning an ELF file into the byte layout the boot ROM expects (image
//! headers, segment tables, checksums) is its own component. Region planning
//! only needs to ask it a few questions and have it persist finished images
//! to disk, so that surface is captured here as a trait the planner consumes.

use std::path::Path;

use crate::config::FlashSettings;
use crate::flashing::FlashError;

/// A flash-resident ELF section, already resolved to its flash offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSection {
    /// Offset in flash where the section contents must be programmed.
    pub flash_offset: u32,
    /// The raw section contents.
    pub data: Vec<u8>,
}

/// Builds bootable binary images from an application ELF file.
///
/// Implementations write finished images to the paths they are given and
/// report the resulting sizes; planning never interprets the image bytes
/// itself.
pub trait AppImageBuilder {
    /// Classifies the application image.
    ///
    /// Returns 0 for a plain, non-bootloader image; any other value selects
    /// a bootloader-based (OTA) slot.
    fn detect_app_mode(&self, elf_path: &Path) -> Result<u8, FlashError>;

    /// Writes the plain (non-bootloader) base image and returns its size.
    fn write_plain_image(
        &self,
        elf_path: &Path,
        settings: &FlashSettings,
        output: &Path,
    ) -> Result<u32, FlashError>;

    /// The flash-resident sections of a plain image, each with its declared
    /// flash offset.
    fn flash_sections(&self, elf_path: &Path) -> Result<Vec<FlashSection>, FlashError>;

    /// Writes the bootloader-based (OTA) application image and returns the
    /// flash offset it declares for itself along with its size.
    fn write_ota_image(
        &self,
        elf_path: &Path,
        settings: &FlashSettings,
        app_mode: u8,
        output: &Path,
    ) -> Result<(u32, u32), FlashError>;

    /// Writes the ESP32 application image and returns its size.
    fn write_esp32_image(
        &self,
        elf_path: &Path,
        settings: &FlashSettings,
        output: &Path,
    ) -> Result<u32, FlashError>;
}
