//! # esp-debug-flash
//!
//! Debugger-driven flash programming and startup sequences for ESP8266 and
//! ESP32 class targets.
//!
//! The crate prepares everything a debug session needs to take a freshly
//! attached target to a runnable program: it plans which binary blobs must
//! land at which flash offsets, emits the command protocol that drives a
//! small loader stub in target RAM to erase and program those regions, and
//! assembles the full reset/flash/jump sequence as an immutable list of
//! steps. The steps themselves are opaque debugger operations; executing them
//! against a live target is the embedding tool's job.
//!
//! The usual entry point is [`flashing::StartupSequenceBuilder`]:
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! use esp_debug_flash::config::DebugConfig;
//! use esp_debug_flash::flashing::StartupSequenceBuilder;
//! # use esp_debug_flash::image::AppImageBuilder;
//! # fn demo(values: HashMap<String, String>, image: &dyn AppImageBuilder,
//! #     ui: &dyn esp_debug_flash::flashing::UserInterface)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let config = DebugConfig::from_key_values(&values)?;
//! let sequence = StartupSequenceBuilder::new(&config, Path::new("app.elf"), image)
//!     .program_flash(true)
//!     .build(ui)?;
//! # Ok(()) }
//! ```
//!
//! Targets reached over a serial link instead of a debug probe are programmed
//! through [`serial::program_over_serial`] with the same region plan.

#![warn(missing_docs)]

pub mod config;
pub mod flashing;
pub mod image;
pub mod serial;

pub use config::{DebugConfig, ResetMode};
pub use flashing::{FlashError, ProgrammableRegion, StartStep, StartupSequence};
