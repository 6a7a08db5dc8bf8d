//! The stub invocation protocol.
//!
//! The loader stub is operated through a request/response mini-protocol
//! conducted entirely with debugger primitives: stage data in RAM, point the
//! CPU at the stub entry, write the command and argument words, mark the
//! result word busy and resume. The caller then polls the result word until
//! the stub overwrites the busy sentinel (see [`super::poll`]).
//!
//! This module only *emits* the command steps; it never talks to the target
//! itself.

use std::path::Path;

use crate::flashing::planner::ProgrammableRegion;
use crate::flashing::sequence::StartStep;
use crate::flashing::stub::ParsedStub;

use super::FlashError;

/// Value written to the result word before resuming the stub. Completion is
/// detected by the word changing to anything else.
pub const BUSY_SENTINEL: u32 = u32::MAX;

/// Stub command code: erase a flash range.
pub const COMMAND_ERASE: u32 = 1;
/// Stub command code: program staged data.
pub const COMMAND_PROGRAM: u32 = 2;
/// Stub command code: initialize with sector-size parameters.
pub const COMMAND_INITIALIZE: u32 = 0;

/// Payload data staged into the stub's data buffer for one invocation.
struct Payload<'a> {
    /// File the payload window is streamed from.
    path: &'a Path,
    /// Offset of the window within the file.
    offset: u32,
    /// Unaligned window size in bytes.
    size: u32,
}

/// Emits the debugger steps that drive one loader stub.
///
/// Every emitted step is retryable: a failed invocation can simply be
/// re-issued because each invocation re-establishes the full CPU state.
pub struct StubFlasher<'a> {
    stub: &'a ParsedStub,
}

impl<'a> StubFlasher<'a> {
    /// Creates a driver for a parsed stub.
    pub fn new(stub: &'a ParsedStub) -> Self {
        StubFlasher { stub }
    }

    /// The initialization invocation.
    ///
    /// This is the first invocation of a sequence, so it also streams the
    /// stub image itself into RAM before starting it.
    pub fn initialization_step(
        &self,
        program_sector_size: u32,
        erase_sector_size: u32,
    ) -> Result<StartStep, FlashError> {
        self.invocation(
            COMMAND_INITIALIZE,
            program_sector_size,
            erase_sector_size,
            None,
            true,
            None,
        )
    }

    /// The erase + program invocations covering one region.
    ///
    /// One erase over the whole region, then program invocations that
    /// partition it into chunks of at most the stub's data buffer size.
    pub fn program_region(
        &self,
        region: &ProgrammableRegion,
    ) -> Result<Vec<StartStep>, FlashError> {
        let path = region.file().ok_or(FlashError::UnmaterializedRegion {
            offset: region.offset,
        })?;

        let mut steps = vec![self.invocation(
            COMMAND_ERASE,
            region.offset,
            region.size,
            None,
            false,
            Some(format!(
                "Failed to erase the flash region starting at 0x{:x}",
                region.offset
            )),
        )?];

        let mut offset = 0;
        while offset < region.size {
            let chunk = (region.size - offset).min(self.stub.data_buffer_size);
            // The stub expects the declared size rounded up to a whole word,
            // while the staged data and the advance use the unaligned size.
            let aligned_chunk = chunk.div_ceil(4) * 4;

            steps.push(self.invocation(
                COMMAND_PROGRAM,
                region.offset + offset,
                aligned_chunk,
                Some(Payload {
                    path,
                    offset,
                    size: chunk,
                }),
                false,
                Some(format!(
                    "Failed to program the flash region starting at 0x{:x}, offset 0x{:x}, size 0x{:x}",
                    region.offset, offset, chunk
                )),
            )?);
            offset += chunk;
        }

        tracing::debug!(
            "Region 0x{:x}+0x{:x}: 1 erase and {} program invocations",
            region.offset,
            region.size,
            steps.len() - 1
        );
        Ok(steps)
    }

    /// Builds one full stub invocation step.
    ///
    /// The commands form an atomic batch; they are never interleaved with
    /// another invocation's commands.
    fn invocation(
        &self,
        command: u32,
        arg1: u32,
        arg2: u32,
        payload: Option<Payload<'_>>,
        load_self: bool,
        error_message: Option<String>,
    ) -> Result<StartStep, FlashError> {
        let stub = self.stub;
        let mut commands = Vec::new();

        if load_self {
            commands.push(format!(
                "restore {} binary 0x{:x} 0 0x{:x}",
                restore_path(&stub.path)?,
                stub.load_address,
                stub.image.len()
            ));
        }

        let progress_weight = payload.as_ref().map(|p| p.size).unwrap_or(0);
        if let Some(payload) = &payload {
            // Stage the window so that after the stub's processing offset the
            // payload lands exactly at the data buffer.
            commands.push(format!(
                "restore {} binary 0x{:x} 0x{:x} 0x{:x}",
                restore_path(payload.path)?,
                stub.data_buffer.wrapping_sub(payload.offset),
                payload.offset,
                payload.offset + payload.size
            ));
        }

        commands.push("flushregs".to_owned());
        commands.push(format!("set $epc2=0x{:x}", stub.entry_point));
        commands.push("set $ps=0x20".to_owned());
        commands.push("set $sp=$$DEBUG:INITIAL_STACK_POINTER$$".to_owned());
        commands.push(format!(
            "set *((unsigned *)0x{:x})={}",
            stub.command_address(),
            command
        ));
        commands.push(format!(
            "set *((unsigned *)0x{:x})={}",
            stub.arg1_address(),
            arg1
        ));
        commands.push(format!(
            "set *((unsigned *)0x{:x})={}",
            stub.arg2_address(),
            arg2
        ));
        // The busy sentinel must land in the result word before the resume,
        // otherwise completion polling could observe a stale value.
        commands.push(format!(
            "set *((unsigned *)0x{:x})={}",
            stub.result_address(),
            BUSY_SENTINEL
        ));
        commands.push("set $intclear=-1".to_owned());
        commands.push("set $intenable=0".to_owned());
        commands.push("set $eps2=0x20".to_owned());
        commands.push("set $icountlevel=0".to_owned());
        commands.push("-exec-continue".to_owned());

        Ok(StartStep {
            commands,
            progress_weight,
            result_expression: Some(stub.result_expression()),
            error_message,
            check_result_strictly: false,
            retryable: true,
        })
    }
}

/// Converts a path into the form the `restore` command accepts.
///
/// The command syntax cannot quote paths, so whitespace anywhere in the path
/// is fatal. Backslashes are normalized to forward slashes.
pub(crate) fn restore_path(path: &Path) -> Result<String, FlashError> {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.chars().any(char::is_whitespace) {
        return Err(FlashError::UnusablePath(path.to_owned()));
    }
    Ok(text)
}
