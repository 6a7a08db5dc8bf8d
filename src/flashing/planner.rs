//! Region planning.
//!
//! Planning turns an application ELF plus the board configuration into the
//! complete list of [`ProgrammableRegion`]s that must land in flash to make
//! the device bootable. Planning computes and persists derived artifacts
//! (patched bootloader copies, generated images) but programs nothing; the
//! result is consumed by the stub protocol driver or the serial path.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DebugConfig;
use crate::image::AppImageBuilder;

use super::progress::FlashProgress;
use super::FlashError;

/// Fixed flash offset of the ESP32 second-stage bootloader.
pub const ESP32_BOOTLOADER_OFFSET: u32 = 0x1000;

/// Fixed flash offset of the ESP32 partition table.
pub const ESP32_PARTITION_TABLE_OFFSET: u32 = 0x8000;

/// First byte of every ESP image header.
const IMAGE_HEADER_SIGNATURE: u8 = 0xe9;

/// Where the bytes of a region come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSource {
    /// A file on disk.
    File(PathBuf),
    /// An in-memory buffer, not yet persisted.
    Buffer(Vec<u8>),
}

/// A contiguous byte range in the target's flash address space plus the data
/// that must occupy it.
///
/// Regions handed to the protocol driver must not overlap in the target
/// address space; this is the caller's responsibility and only diagnosed with
/// a warning (see [`warn_on_overlap`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammableRegion {
    /// Flash offset the data must be programmed at.
    pub offset: u32,
    /// Number of bytes to program.
    pub size: u32,
    /// The bytes themselves.
    pub source: RegionSource,
}

impl ProgrammableRegion {
    /// Creates a region backed by an existing file, taking the size from
    /// the file itself.
    pub fn from_file(offset: u32, path: impl Into<PathBuf>) -> Result<Self, FlashError> {
        let path = path.into();
        let metadata = fs::metadata(&path).map_err(|_| FlashError::MissingFile(path.clone()))?;
        Ok(ProgrammableRegion {
            offset,
            size: metadata.len() as u32,
            source: RegionSource::File(path),
        })
    }

    /// Creates a region backed by an in-memory buffer.
    pub fn from_buffer(offset: u32, data: Vec<u8>) -> Self {
        ProgrammableRegion {
            offset,
            size: data.len() as u32,
            source: RegionSource::Buffer(data),
        }
    }

    /// The file backing this region, if it has one.
    pub fn file(&self) -> Option<&Path> {
        match &self.source {
            RegionSource::File(path) => Some(path),
            RegionSource::Buffer(_) => None,
        }
    }

    /// The region's bytes, read from disk if file-backed.
    pub fn bytes(&self) -> Result<Cow<'_, [u8]>, FlashError> {
        match &self.source {
            RegionSource::File(path) => {
                let data = fs::read(path).map_err(FlashError::io(path.clone()))?;
                Ok(Cow::Owned(data))
            }
            RegionSource::Buffer(data) => Ok(Cow::Borrowed(data)),
        }
    }

    /// Persists a buffer-backed region beside the application image so the
    /// debugger's restore command can stream it.
    ///
    /// File-backed regions are returned unchanged.
    pub fn into_file_backed(self, artifact_base: &Path) -> Result<Self, FlashError> {
        match self.source {
            RegionSource::File(_) => Ok(self),
            RegionSource::Buffer(data) => {
                let path = artifact_path(artifact_base, self.offset);
                fs::write(&path, &data).map_err(FlashError::io(path.clone()))?;
                Ok(ProgrammableRegion {
                    offset: self.offset,
                    size: self.size,
                    source: RegionSource::File(path),
                })
            }
        }
    }
}

/// Name of a generated artifact programmed at `offset`, placed beside the
/// application image.
fn artifact_path(base: &Path, offset: u32) -> PathBuf {
    sibling(base, &format!("-0x{offset:05x}.bin"))
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Patches the SPI flash parameters into an image header in place.
///
/// Byte 2 carries the flash mode code, byte 3 the size code in the high
/// nibble and the frequency code in the low nibble. The header is validated
/// first: at least 16 bytes long and starting with the 0xE9 signature.
fn patch_image_header(
    data: &mut [u8],
    path: &Path,
    config: &DebugConfig,
) -> Result<(), FlashError> {
    if data.len() < 16 {
        return Err(FlashError::format(
            path,
            format!("bootloader image too small ({} bytes)", data.len()),
        ));
    }
    if data[0] != IMAGE_HEADER_SIGNATURE {
        return Err(FlashError::format(path, "invalid bootloader signature"));
    }

    let size_code = config.flash.size.map(|s| s.code()).unwrap_or(0);
    data[2] = config.flash.mode.code();
    data[3] = (size_code << 4) | config.flash.frequency.code();
    Ok(())
}

/// Plans the regions for a bootloader + partition-table target (ESP32).
///
/// Produces exactly three regions: the (optionally patched) bootloader at its
/// fixed offset, the partition table verbatim at its fixed offset, and the
/// generated application image at the configured application offset.
pub fn plan_bootloader_regions(
    config: &DebugConfig,
    elf_path: &Path,
    image: &dyn AppImageBuilder,
    patch_bootloader: bool,
) -> Result<Vec<ProgrammableRegion>, FlashError> {
    let app_offset = match config.esp32_app_offset {
        Some(offset) if offset != 0 => offset,
        _ => {
            return Err(FlashError::Configuration {
                key: crate::config::keys::ESP32_APP_OFFSET,
                problem: "application flash offset not defined",
            })
        }
    };

    let partition_table = config
        .esp32_partition_table
        .as_deref()
        .ok_or(FlashError::Configuration {
            key: crate::config::keys::ESP32_PARTITION_TABLE,
            problem: "partition table file not defined",
        })?;
    let bootloader = config
        .esp32_bootloader
        .as_deref()
        .ok_or(FlashError::Configuration {
            key: crate::config::keys::ESP32_BOOTLOADER,
            problem: "bootloader file not defined",
        })?;

    if !partition_table.exists() {
        return Err(FlashError::MissingFile(partition_table.to_owned()));
    }
    if !bootloader.exists() {
        return Err(FlashError::MissingFile(bootloader.to_owned()));
    }

    let mut bootloader_contents =
        fs::read(bootloader).map_err(FlashError::io(bootloader.to_owned()))?;
    if patch_bootloader {
        patch_image_header(&mut bootloader_contents, bootloader, config)?;
    }

    // The bootloader and partition table offsets are fixed by the SDK.
    let bootloader_copy = sibling(elf_path, "-bootloader.bin");
    fs::write(&bootloader_copy, &bootloader_contents)
        .map_err(FlashError::io(bootloader_copy.clone()))?;

    let mut regions = vec![
        ProgrammableRegion {
            offset: ESP32_BOOTLOADER_OFFSET,
            size: bootloader_contents.len() as u32,
            source: RegionSource::File(bootloader_copy),
        },
        ProgrammableRegion::from_file(ESP32_PARTITION_TABLE_OFFSET, partition_table)?,
    ];

    let app_image = sibling(elf_path, "-esp32.bin");
    let size = image.write_esp32_image(elf_path, &config.flash, &app_image)?;
    regions.push(ProgrammableRegion {
        offset: app_offset,
        size,
        source: RegionSource::File(app_image),
    });

    tracing::debug!("Planned {} ESP32 regions", regions.len());
    Ok(regions)
}

/// Plans the regions for a bootloader-less or OTA-capable target (ESP8266).
///
/// The detected application image kind is reported to the user through
/// `progress`.
pub fn plan_raw_regions(
    config: &DebugConfig,
    elf_path: &Path,
    image: &dyn AppImageBuilder,
    progress: &FlashProgress,
) -> Result<Vec<ProgrammableRegion>, FlashError> {
    delete_stale_artifacts(elf_path);

    let mut regions = Vec::new();

    if let Some(init_data_address) = config.effective_init_data_address() {
        let init_file = config
            .init_data_file
            .clone()
            .unwrap_or_else(|| config.board_root.join("esp_init_data_default.bin"));
        if !init_file.exists() {
            return Err(FlashError::MissingFile(init_file));
        }
        regions.push(ProgrammableRegion::from_file(init_data_address, init_file)?);
    }

    for resource in &config.flash_resources {
        regions.push(ProgrammableRegion::from_file(
            resource.offset,
            resource.path.clone(),
        )?);
    }

    let app_mode = image.detect_app_mode(elf_path)?;
    if app_mode == 0 {
        progress.message("Detected a plain application image".to_owned())?;

        let base_image = artifact_path(elf_path, 0);
        let size = image.write_plain_image(elf_path, &config.flash, &base_image)?;
        regions.push(ProgrammableRegion {
            offset: 0,
            size,
            source: RegionSource::File(base_image),
        });

        for section in image.flash_sections(elf_path)? {
            let path = artifact_path(elf_path, section.flash_offset);
            fs::write(&path, &section.data).map_err(FlashError::io(path.clone()))?;
            regions.push(ProgrammableRegion {
                offset: section.flash_offset,
                size: section.data.len() as u32,
                source: RegionSource::File(path),
            });
        }
    } else {
        tracing::debug!("Application uses bootloader slot {app_mode}");
        progress.message(format!(
            "Detected an application image for bootloader slot {app_mode}"
        ))?;

        let bootloader = config
            .esp8266_bootloader
            .as_deref()
            .ok_or(FlashError::Configuration {
                key: crate::config::keys::ESP8266_BOOTLOADER,
                problem: "bootloader image path not defined for an OTA image",
            })?;
        if !bootloader.exists() {
            return Err(FlashError::MissingFile(bootloader.to_owned()));
        }

        let mut data = fs::read(bootloader).map_err(FlashError::io(bootloader.to_owned()))?;
        patch_image_header(&mut data, bootloader, config)?;

        let bootloader_copy = artifact_path(elf_path, 0);
        fs::write(&bootloader_copy, &data).map_err(FlashError::io(bootloader_copy.clone()))?;
        regions.push(ProgrammableRegion {
            offset: 0,
            size: data.len() as u32,
            source: RegionSource::File(bootloader_copy),
        });

        let app_image_tmp = sibling(elf_path, "-app.bin");
        let (app_offset, size) =
            image.write_ota_image(elf_path, &config.flash, app_mode, &app_image_tmp)?;
        let app_image = artifact_path(elf_path, app_offset);
        fs::rename(&app_image_tmp, &app_image).map_err(FlashError::io(app_image.clone()))?;
        regions.push(ProgrammableRegion {
            offset: app_offset,
            size,
            source: RegionSource::File(app_image),
        });
    }

    tracing::debug!("Planned {} ESP8266 regions", regions.len());
    Ok(regions)
}

/// Deletes generated `<app>-0x....bin` artifacts left over from previous
/// sessions, so stale images are never programmed by accident.
fn delete_stale_artifacts(elf_path: &Path) {
    let (Some(dir), Some(file_name)) = (elf_path.parent(), elf_path.file_name()) else {
        return;
    };
    let prefix = format!("{}-0x", file_name.to_string_lossy());

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(middle) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".bin"))
        else {
            continue;
        };
        if !middle.is_empty() && middle.chars().all(|c| c.is_ascii_hexdigit()) {
            tracing::debug!("Removing stale artifact {}", entry.path().display());
            let _ = fs::remove_file(entry.path());
        }
    }
}

/// Logs a warning when regions overlap in the target address space.
///
/// Overlap is the caller's responsibility to avoid; the plan is still
/// accepted unchanged.
pub fn warn_on_overlap(regions: &[ProgrammableRegion]) {
    let mut sorted: Vec<_> = regions.iter().map(|r| (r.offset, r.size)).collect();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (offset, size) = pair[0];
        let (next_offset, _) = pair[1];
        if offset as u64 + size as u64 > next_offset as u64 {
            tracing::warn!(
                "Programmable regions overlap: {:#x}+{:#x} runs into {:#x}",
                offset,
                size,
                next_offset
            );
        }
    }
}
