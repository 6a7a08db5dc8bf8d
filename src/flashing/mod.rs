//! Flash programming under debugger control.
//!
//! The general flow is as follows:
//!
//! 1. [`plan_raw_regions`] or [`plan_bootloader_regions`] turns the
//!    application image plus the board configuration into a list of
//!    [`ProgrammableRegion`]s.
//! 2. [`ParsedStub`] decodes the loader stub that will perform the actual
//!    erase and program operations in target RAM.
//! 3. [`StubFlasher`] emits the debugger command steps that drive one stub
//!    invocation per erase or program chunk.
//! 4. [`StartupSequenceBuilder`] wraps all of the above,
//!    together with reset handling, into one immutable [`StartupSequence`]
//!    for the execution engine.
//!
//! While an invocation runs, its result word is watched with
//! [`poll_result_word`]; progress and cancellation cross the thread boundary
//! through [`FlashProgress`].

mod error;
mod flasher;
mod planner;
mod poll;
mod progress;
mod sequence;
mod stub;

pub use error::FlashError;
pub use flasher::{
    StubFlasher, BUSY_SENTINEL, COMMAND_ERASE, COMMAND_INITIALIZE, COMMAND_PROGRAM,
};
pub use planner::{
    plan_bootloader_regions, plan_raw_regions, warn_on_overlap, ProgrammableRegion, RegionSource,
    ESP32_BOOTLOADER_OFFSET, ESP32_PARTITION_TABLE_OFFSET,
};
pub use poll::poll_result_word;
pub use progress::{Cancelled, FlashProgress, ProgressEvent, UserInterface};
pub use sequence::{StartStep, StartupSequence, StartupSequenceBuilder};
pub use stub::{ParsedStub, STUB_HEADER_SIZE, STUB_MAGIC};
