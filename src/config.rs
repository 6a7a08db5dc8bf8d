//! Typed board configuration.
//!
//! The embedding tool hands us a flat string dictionary describing the board,
//! the project and the debug method. This module validates that dictionary in
//! a single pass and produces a [`DebugConfig`] with explicit required and
//! optional fields, so the rest of the crate never does stringly-typed
//! lookups. All problems found during the pass are aggregated into one
//! [`ConfigError`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration keys consumed by this crate.
pub mod keys {
    /// Root directory of the board support package.
    pub const BOARD_ROOT: &str = "sys.board_root";
    /// Directory of the user project.
    pub const PROJECT_DIR: &str = "sys.project_dir";
    /// Root directory of the toolchain. Informational only.
    pub const TOOLCHAIN_ROOT: &str = "sys.toolchain_root";

    /// "1" if the target boots from flash, "0" for a RAM-only image.
    pub const LOAD_FROM_FLASH: &str = "flash.load_from_flash";
    /// SPI flash size class, e.g. "4M" or "32M-C2".
    pub const FLASH_SIZE: &str = "flash.size";
    /// SPI flash mode: "qio", "qout", "dio" or "dout".
    pub const FLASH_MODE: &str = "flash.mode";
    /// SPI flash frequency: "40m", "26m", "20m" or "80m".
    pub const FLASH_FREQUENCY: &str = "flash.frequency";
    /// Sector size passed to the stub's program operation.
    pub const PROGRAM_SECTOR_SIZE: &str = "flash.program_sector_size";
    /// Sector size passed to the stub's erase operation.
    pub const ERASE_SECTOR_SIZE: &str = "flash.erase_sector_size";
    /// Explicit flash offset of the init-data region. Zero disables it.
    pub const INIT_DATA_ADDRESS: &str = "flash.init_data_address";
    /// File programmed into the init-data region.
    pub const INIT_DATA_FILE: &str = "flash.init_data_file";

    /// Partition table file programmed at its fixed offset.
    pub const ESP32_PARTITION_TABLE: &str = "esp32.partition_table";
    /// Second-stage bootloader file programmed at its fixed offset.
    pub const ESP32_BOOTLOADER: &str = "esp32.bootloader";
    /// Flash offset of the application partition.
    pub const ESP32_APP_OFFSET: &str = "esp32.app_offset";

    /// Vendor bootloader used for OTA-capable ESP8266 images.
    pub const ESP8266_BOOTLOADER: &str = "esp8266.bootloader";

    /// Reset strategy after flashing: "soft", "hard" or "jump-to-entry".
    pub const RESET_MODE: &str = "debug.reset_mode";

    /// Serial port of the bootloader connection.
    pub const SERIAL_PORT: &str = "serial.port";
    /// Baud rate used once the program is running.
    pub const SERIAL_BAUD: &str = "serial.baud";
    /// Baud rate used while talking to the ROM bootloader.
    pub const SERIAL_BOOTLOADER_BAUD: &str = "serial.bootloader_baud";
}

/// Aggregated result of the configuration validation pass.
#[derive(Debug, Default, Error)]
pub struct ConfigError {
    /// Required keys that were absent or empty.
    pub missing: Vec<&'static str>,
    /// Keys whose value could not be parsed, with the offending value.
    pub invalid: Vec<(&'static str, String)>,
}

impl ConfigError {
    fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid board configuration:")?;
        for key in &self.missing {
            write!(f, " missing `{key}`;")?;
        }
        for (key, value) in &self.invalid {
            write!(f, " cannot parse `{key}` = {value:?};")?;
        }
        Ok(())
    }
}

/// SPI flash size classes of the ESP8266 image header.
///
/// The names follow the vendor convention of sizes in megabits; the `C1`/`C2`
/// suffixes select alternate sector layouts of the same capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashSize {
    /// 4 Mbit (512 KB).
    Size4M,
    /// 8 Mbit (1 MB).
    Size8M,
    /// 16 Mbit (2 MB).
    Size16M,
    /// 16 Mbit, alternate layout.
    Size16MC1,
    /// 32 Mbit (4 MB).
    Size32M,
    /// 32 Mbit, alternate layout 1.
    Size32MC1,
    /// 32 Mbit, alternate layout 2.
    Size32MC2,
}

impl FlashSize {
    /// The size code stored in the high nibble of image header byte 3.
    pub fn code(self) -> u8 {
        match self {
            FlashSize::Size4M => 0,
            FlashSize::Size8M => 2,
            FlashSize::Size16M => 3,
            FlashSize::Size32M => 4,
            FlashSize::Size16MC1 => 5,
            FlashSize::Size32MC1 => 6,
            FlashSize::Size32MC2 => 7,
        }
    }

    /// The default flash offset of the RF init-data block for this size.
    ///
    /// The init data lives in the last sectors of the flash, so the address
    /// follows directly from the capacity.
    pub fn default_init_data_address(self) -> u32 {
        match self {
            FlashSize::Size4M => 0x7c000,
            FlashSize::Size8M => 0xfc000,
            FlashSize::Size16M | FlashSize::Size16MC1 => 0x1fc000,
            FlashSize::Size32M | FlashSize::Size32MC1 | FlashSize::Size32MC2 => 0x3fc000,
        }
    }
}

impl FromStr for FlashSize {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "4M" => Ok(FlashSize::Size4M),
            "8M" => Ok(FlashSize::Size8M),
            "16M" => Ok(FlashSize::Size16M),
            "16M-C1" => Ok(FlashSize::Size16MC1),
            "32M" => Ok(FlashSize::Size32M),
            "32M-C1" => Ok(FlashSize::Size32MC1),
            "32M-C2" => Ok(FlashSize::Size32MC2),
            _ => Err(()),
        }
    }
}

/// SPI flash access mode stored in image header byte 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashMode {
    /// Quad I/O.
    Qio,
    /// Quad output.
    Qout,
    /// Dual I/O.
    Dio,
    /// Dual output.
    Dout,
}

impl FlashMode {
    /// The mode code stored in image header byte 2.
    pub fn code(self) -> u8 {
        match self {
            FlashMode::Qio => 0,
            FlashMode::Qout => 1,
            FlashMode::Dio => 2,
            FlashMode::Dout => 3,
        }
    }
}

impl FromStr for FlashMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qio" => Ok(FlashMode::Qio),
            "qout" => Ok(FlashMode::Qout),
            "dio" => Ok(FlashMode::Dio),
            "dout" => Ok(FlashMode::Dout),
            _ => Err(()),
        }
    }
}

/// SPI flash frequency stored in the low nibble of image header byte 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashFrequency {
    /// 40 MHz.
    F40,
    /// 26 MHz.
    F26,
    /// 20 MHz.
    F20,
    /// 80 MHz.
    F80,
}

impl FlashFrequency {
    /// The frequency code stored in the low nibble of image header byte 3.
    pub fn code(self) -> u8 {
        match self {
            FlashFrequency::F40 => 0,
            FlashFrequency::F26 => 1,
            FlashFrequency::F20 => 2,
            FlashFrequency::F80 => 0xf,
        }
    }
}

impl FromStr for FlashFrequency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "40m" => Ok(FlashFrequency::F40),
            "26m" => Ok(FlashFrequency::F26),
            "20m" => Ok(FlashFrequency::F20),
            "80m" => Ok(FlashFrequency::F80),
            _ => Err(()),
        }
    }
}

/// Strategy for resuming code execution after flashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetMode {
    /// Point the CPU at the ROM soft-reset vector.
    Soft,
    /// Issue a plain reset through the debug probe.
    Hard,
    /// Restore RAM sections from the ELF and jump to its entry point.
    JumpToEntry,
}

impl FromStr for ResetMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "soft" => Ok(ResetMode::Soft),
            "hard" => Ok(ResetMode::Hard),
            "jump-to-entry" | "jump_to_entry" => Ok(ResetMode::JumpToEntry),
            _ => Err(()),
        }
    }
}

/// The SPI flash parameters stamped into image headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSettings {
    /// Flash access mode.
    pub mode: FlashMode,
    /// Flash clock frequency.
    pub frequency: FlashFrequency,
    /// Flash size class, if known.
    pub size: Option<FlashSize>,
}

impl Default for FlashSettings {
    fn default() -> Self {
        FlashSettings {
            mode: FlashMode::Qio,
            frequency: FlashFrequency::F40,
            size: None,
        }
    }
}

/// Serial transport settings for the bootloader path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port name, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Baud rate used by the running program.
    pub baud: u32,
    /// Baud rate used while talking to the ROM bootloader.
    pub bootloader_baud: u32,
}

/// An extra user-declared flash resource.
///
/// Resources arrive already resolved to a file and an offset; planning only
/// verifies that the file still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashResource {
    /// The file to program.
    pub path: PathBuf,
    /// The flash offset it must land at.
    pub offset: u32,
}

/// Validated board configuration.
///
/// Built once per debug session through [`DebugConfig::from_key_values`] and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Root directory of the board support package.
    pub board_root: PathBuf,
    /// Directory of the user project.
    pub project_dir: PathBuf,
    /// Root directory of the toolchain, if provided.
    pub toolchain_root: Option<PathBuf>,

    /// Whether the target boots from flash at all.
    pub load_from_flash: bool,
    /// SPI flash parameters.
    pub flash: FlashSettings,
    /// Sector size passed to the stub's program operation.
    pub program_sector_size: u32,
    /// Sector size passed to the stub's erase operation.
    pub erase_sector_size: u32,
    /// Explicit init-data flash offset. Zero disables the init-data region.
    pub init_data_address: Option<u32>,
    /// Init-data file override. Defaults to the copy shipped with the board
    /// package.
    pub init_data_file: Option<PathBuf>,

    /// ESP32 partition table file.
    pub esp32_partition_table: Option<PathBuf>,
    /// ESP32 second-stage bootloader file.
    pub esp32_bootloader: Option<PathBuf>,
    /// Flash offset of the ESP32 application partition.
    pub esp32_app_offset: Option<u32>,

    /// Vendor bootloader for OTA-capable ESP8266 images.
    pub esp8266_bootloader: Option<PathBuf>,

    /// Extra user-declared flash resources, appended verbatim to the plan.
    pub flash_resources: Vec<FlashResource>,

    /// Reset strategy after flashing.
    pub reset_mode: ResetMode,

    /// Serial transport settings, when the serial bootloader path is used.
    pub serial: Option<SerialSettings>,
}

/// Default sector size for both erase and program stub operations.
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

impl DebugConfig {
    /// Validates the raw key/value dictionary and builds the typed
    /// configuration.
    ///
    /// All missing required keys and unparseable values are collected into a
    /// single [`ConfigError`] so the user sees every problem at once.
    pub fn from_key_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut errors = ConfigError::default();

        let get = |key: &'static str| values.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let required_path = |key, errors: &mut ConfigError| match get(key) {
            Some(v) => PathBuf::from(v),
            None => {
                errors.missing.push(key);
                PathBuf::new()
            }
        };

        let board_root = required_path(keys::BOARD_ROOT, &mut errors);
        let project_dir = required_path(keys::PROJECT_DIR, &mut errors);

        let mut number = |key| match get(key) {
            Some(v) => match parse_number(v) {
                Some(n) => Some(n),
                None => {
                    errors.invalid.push((key, v.to_owned()));
                    None
                }
            },
            None => None,
        };

        let program_sector_size = number(keys::PROGRAM_SECTOR_SIZE).unwrap_or(DEFAULT_SECTOR_SIZE);
        let erase_sector_size = number(keys::ERASE_SECTOR_SIZE).unwrap_or(DEFAULT_SECTOR_SIZE);
        let init_data_address = number(keys::INIT_DATA_ADDRESS);
        let esp32_app_offset = number(keys::ESP32_APP_OFFSET);
        let serial_baud = number(keys::SERIAL_BAUD);
        let serial_bootloader_baud = number(keys::SERIAL_BOOTLOADER_BAUD);

        fn parsed<T: FromStr<Err = ()>>(
            key: &'static str,
            value: Option<&str>,
            errors: &mut ConfigError,
        ) -> Option<T> {
            let value = value?;
            match value.parse() {
                Ok(v) => Some(v),
                Err(()) => {
                    errors.invalid.push((key, value.to_owned()));
                    None
                }
            }
        }

        let size = parsed(keys::FLASH_SIZE, get(keys::FLASH_SIZE), &mut errors);
        let mode: Option<FlashMode> = parsed(keys::FLASH_MODE, get(keys::FLASH_MODE), &mut errors);
        let frequency: Option<FlashFrequency> =
            parsed(keys::FLASH_FREQUENCY, get(keys::FLASH_FREQUENCY), &mut errors);
        let reset_mode: Option<ResetMode> =
            parsed(keys::RESET_MODE, get(keys::RESET_MODE), &mut errors);

        let serial = get(keys::SERIAL_PORT).map(|port| SerialSettings {
            port: port.to_owned(),
            baud: serial_baud.unwrap_or(115_200),
            bootloader_baud: serial_bootloader_baud.unwrap_or(74_880),
        });

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(DebugConfig {
            board_root,
            project_dir,
            toolchain_root: get(keys::TOOLCHAIN_ROOT).map(PathBuf::from),
            load_from_flash: get(keys::LOAD_FROM_FLASH) == Some("1"),
            flash: FlashSettings {
                mode: mode.unwrap_or(FlashMode::Qio),
                frequency: frequency.unwrap_or(FlashFrequency::F40),
                size,
            },
            program_sector_size,
            erase_sector_size,
            init_data_address,
            init_data_file: get(keys::INIT_DATA_FILE).map(PathBuf::from),
            esp32_partition_table: get(keys::ESP32_PARTITION_TABLE).map(PathBuf::from),
            esp32_bootloader: get(keys::ESP32_BOOTLOADER).map(PathBuf::from),
            esp32_app_offset,
            esp8266_bootloader: get(keys::ESP8266_BOOTLOADER).map(PathBuf::from),
            flash_resources: Vec::new(),
            reset_mode: reset_mode.unwrap_or(ResetMode::Hard),
            serial,
        })
    }

    /// The flash offset of the init-data region, if one should be programmed.
    ///
    /// An explicit address takes precedence over the [`FlashSize`] default;
    /// an explicit zero, or an unknown flash size without an override,
    /// disables the region.
    pub fn effective_init_data_address(&self) -> Option<u32> {
        match self.init_data_address {
            Some(0) => None,
            Some(address) => Some(address),
            None => self.flash.size.map(FlashSize::default_init_data_address),
        }
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
