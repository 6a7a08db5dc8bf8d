//! Startup sequence construction.
//!
//! The startup sequence is the ordered list of debugger steps that takes a
//! freshly attached target to a runnable program: reset and quiesce the CPU,
//! optionally program flash through the loader stub, then establish the CPU
//! state the chosen reset strategy requires. The sequence is built once per
//! session and handed to the execution engine as an immutable value; this
//! module never talks to the target itself.

use std::path::{Path, PathBuf};

use object::elf::{FileHeader32, SHF_ALLOC, SHT_PROGBITS};
use object::read::elf::{FileHeader, SectionHeader};
use object::Endianness;

use crate::config::{DebugConfig, ResetMode};
use crate::flashing::flasher::{restore_path, StubFlasher};
use crate::flashing::planner::{self, ProgrammableRegion};
use crate::flashing::progress::{FlashProgress, UserInterface};
use crate::flashing::stub::ParsedStub;
use crate::image::AppImageBuilder;

use super::FlashError;

/// Peripheral word the loader stub reports its status through. Cleared before
/// the first invocation so a previous session cannot leak a stale value.
const STUB_STATUS_WORD: u32 = 0x6000_0900;

/// ROM address the soft reset strategy jumps to.
const ROM_SOFT_RESET_ENTRY: &str = "0x40000080";

/// File name of the loader stub, relative to a search root.
const STUB_RELATIVE_PATH: &str = "flashprog/esp8266-flash-stub.bin";

/// Base of the data RAM window eligible for section restore.
const DATA_RAM_BASE: u32 = 0x3FFE_8000;
/// Size of the data RAM window.
const DATA_RAM_SIZE: u32 = 80 * 1024;
/// Base of the instruction RAM window eligible for section restore.
const INSTRUCTION_RAM_BASE: u32 = 0x4010_0000;
/// Size of the instruction RAM window.
const INSTRUCTION_RAM_SIZE: u32 = 32 * 1024;

/// One unit of execution of the startup sequence.
///
/// The commands are opaque to this crate; the execution engine runs them
/// strictly in order and uses the metadata to decide how a failure is
/// handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartStep {
    /// The textual debugger operations, executed as an atomic batch.
    pub commands: Vec<String>,
    /// Contribution of this step to the overall progress total.
    pub progress_weight: u32,
    /// Memory expression polled for completion, if the step runs the stub.
    pub result_expression: Option<String>,
    /// User-visible message when this step fails.
    pub error_message: Option<String>,
    /// Whether a failure of this step aborts the whole sequence.
    pub check_result_strictly: bool,
    /// Whether the execution engine may re-issue this step after a failure.
    pub retryable: bool,
}

impl StartStep {
    /// A plain step carrying commands and no completion metadata.
    fn from_commands(commands: Vec<String>) -> Self {
        StartStep {
            commands,
            progress_weight: 0,
            result_expression: None,
            error_message: None,
            check_result_strictly: false,
            retryable: false,
        }
    }
}

/// A complete startup sequence, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupSequence {
    /// The steps, in execution order.
    pub steps: Vec<StartStep>,
    /// Expression of the initial hardware breakpoint, when the reset
    /// strategy lands directly on application code.
    pub initial_breakpoint_expression: Option<String>,
}

/// Builds the [`StartupSequence`] for one debug session.
pub struct StartupSequenceBuilder<'a> {
    config: &'a DebugConfig,
    elf_path: &'a Path,
    image: &'a dyn AppImageBuilder,
    program_flash: bool,
    external_regions: Option<Vec<ProgrammableRegion>>,
    stub_fallback_dir: Option<&'a Path>,
    progress: Option<&'a FlashProgress>,
}

impl<'a> StartupSequenceBuilder<'a> {
    /// Creates a builder for the given application and board configuration.
    pub fn new(
        config: &'a DebugConfig,
        elf_path: &'a Path,
        image: &'a dyn AppImageBuilder,
    ) -> Self {
        StartupSequenceBuilder {
            config,
            elf_path,
            image,
            program_flash: false,
            external_regions: None,
            stub_fallback_dir: None,
            progress: None,
        }
    }

    /// Requests flash programming as part of the sequence.
    pub fn program_flash(mut self, program: bool) -> Self {
        self.program_flash = program;
        self
    }

    /// Supplies an externally computed region list.
    ///
    /// Takes precedence over the built-in planner, for environments that
    /// derive the regions from their own build system variables.
    pub fn regions(mut self, regions: Vec<ProgrammableRegion>) -> Self {
        self.external_regions = Some(regions);
        self
    }

    /// Adds a directory searched for the loader stub after the board root.
    pub fn stub_fallback_dir(mut self, dir: &'a Path) -> Self {
        self.stub_fallback_dir = Some(dir);
        self
    }

    /// Reports informational messages and planning progress through the
    /// given handler.
    pub fn progress(mut self, progress: &'a FlashProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builds the startup sequence.
    ///
    /// Fails fast: any configuration, file or format problem aborts before a
    /// single step is returned.
    pub fn build(self, ui: &dyn UserInterface) -> Result<StartupSequence, FlashError> {
        let mut steps = vec![baseline_reset_step()];
        let mut initial_breakpoint_expression = None;

        if !self.config.load_from_flash {
            // RAM-only image: nothing to program, load everything through
            // the debugger and point the CPU at the entry.
            tracing::info!("Target boots from RAM, loading the full image");
            steps.push(StartStep::from_commands(to_commands(&[
                "load",
                "set $ps=0x20",
                "set $epc2=$$DEBUG:ENTRY_POINT$$",
                "set $sp=$$DEBUG:INITIAL_STACK_POINTER$$",
                "set $vecbase=0x40000000",
                "$$DEBUG:INTERRUPT_DISABLE$$",
                "set $ccompare=0",
                "set $intclear=-1",
                "set $intenable=0",
                "set $eps2=0x20",
                "set $icountlevel=0",
            ])));
            return Ok(StartupSequence {
                steps,
                initial_breakpoint_expression,
            });
        }

        if self.program_flash {
            let stub = ParsedStub::from_file(&self.locate_stub()?)?;
            let empty_progress = FlashProgress::empty();
            let progress = self.progress.unwrap_or(&empty_progress);

            let regions = match self.external_regions {
                Some(regions) => regions,
                None => {
                    planner::plan_raw_regions(self.config, self.elf_path, self.image, progress)?
                }
            };
            planner::warn_on_overlap(&regions);

            let flasher = StubFlasher::new(&stub);

            steps.push(StartStep::from_commands(vec![
                format!("print *((int *)0x{STUB_STATUS_WORD:x})"),
                format!("set *((int *)0x{STUB_STATUS_WORD:x})=0"),
            ]));
            steps.push(flasher.initialization_step(
                self.config.program_sector_size,
                self.config.erase_sector_size,
            )?);

            tracing::info!("Programming {} flash regions", regions.len());
            for region in &regions {
                steps.extend(flasher.program_region(region)?);
            }
        }

        let mut reset_mode = self.config.reset_mode;
        if reset_mode == ResetMode::Soft {
            // Best-effort probe: the soft reset vector cannot start OTA
            // images. Any failure here keeps the configured mode unchanged.
            if let Ok(app_mode) = self.image.detect_app_mode(self.elf_path) {
                if app_mode != 0
                    && ui.confirm(
                        "The soft reset mechanism is not compatible with OTA images. \
                         Use the jump-to-entry reset instead?",
                    )
                {
                    reset_mode = ResetMode::Hard;
                }
            }
        }

        match reset_mode {
            ResetMode::Soft | ResetMode::JumpToEntry => {
                let entry = if reset_mode == ResetMode::JumpToEntry {
                    steps.extend(ram_section_restore_steps(self.elf_path)?);
                    "$$DEBUG:ENTRY_POINT$$"
                } else {
                    ROM_SOFT_RESET_ENTRY
                };

                steps.push(StartStep::from_commands(to_commands(&[
                    "set $ps=0x20",
                    &format!("set $epc2={entry}"),
                    "set $sp=$$DEBUG:INITIAL_STACK_POINTER$$",
                    "set $vecbase=0x40000000",
                    "$$DEBUG:INTERRUPT_DISABLE$$",
                    "set $intclear=-1",
                    "set $intenable=0",
                    "set $eps2=0x20",
                    "set $icountlevel=0",
                ])));
                initial_breakpoint_expression = Some("*$$DEBUG:ENTRY_POINT$$".to_owned());
            }
            ResetMode::Hard => {
                steps.push(StartStep::from_commands(to_commands(&["mon reset halt"])));
            }
        }

        Ok(StartupSequence {
            steps,
            initial_breakpoint_expression,
        })
    }

    /// Finds the loader stub under the board root, then under the fallback
    /// directory.
    fn locate_stub(&self) -> Result<PathBuf, FlashError> {
        let mut stub = self.config.board_root.join(STUB_RELATIVE_PATH);
        if !stub.exists() {
            if let Some(dir) = self.stub_fallback_dir {
                stub = dir.join(STUB_RELATIVE_PATH);
            }
        }
        if !stub.exists() {
            return Err(FlashError::MissingFile(stub));
        }
        Ok(stub)
    }
}

/// The step every sequence starts with: reset, halt and quiesce the CPU so
/// neither the watchdog nor a pending interrupt can disturb what follows.
fn baseline_reset_step() -> StartStep {
    StartStep::from_commands(to_commands(&[
        "mon reset halt",
        "-exec-next-instruction",
        "set $wdtcfg=0",
        "set $vecbase=0x40000000",
        "$$DEBUG:INTERRUPT_DISABLE$$",
        "set $ccompare=0",
        "set $intclear=-1",
        "set $intenable=0",
        "set $eps2=0x20",
        "set $icountlevel=0",
    ]))
}

fn to_commands(commands: &[&str]) -> Vec<String> {
    commands.iter().map(|c| (*c).to_owned()).collect()
}

/// Whether a section at this address survives a reset-less restart and must
/// therefore be restored from the ELF before jumping to the entry point.
fn in_ram_window(address: u32) -> bool {
    (address >= DATA_RAM_BASE && address < DATA_RAM_BASE + DATA_RAM_SIZE)
        || (address >= INSTRUCTION_RAM_BASE && address <= INSTRUCTION_RAM_BASE + INSTRUCTION_RAM_SIZE)
}

/// One restore step per allocatable, data-bearing ELF section placed in RAM.
///
/// These steps must succeed; a partially restored RAM image would start
/// executing garbage, so they are strict and not retryable.
fn ram_section_restore_steps(elf_path: &Path) -> Result<Vec<StartStep>, FlashError> {
    let data = std::fs::read(elf_path).map_err(FlashError::io(elf_path))?;
    let elf = FileHeader32::<Endianness>::parse(&*data)?;
    let endian = elf.endian()?;
    let sections = elf.sections(endian, &*data)?;

    let path = restore_path(elf_path)?;
    let mut steps = Vec::new();

    for section in sections.iter() {
        if section.sh_type(endian) != SHT_PROGBITS {
            continue;
        }
        if section.sh_flags(endian) & SHF_ALLOC == 0 {
            continue;
        }
        let size = section.sh_size(endian);
        let address = section.sh_addr(endian);
        if size == 0 || !in_ram_window(address) {
            continue;
        }

        let file_offset = section.sh_offset(endian);
        let name = String::from_utf8_lossy(sections.section_name(endian, section)?).into_owned();
        tracing::debug!("Restoring the {name} section at {address:#010x} ({size} bytes)");

        steps.push(StartStep {
            commands: vec![format!(
                "restore {} binary 0x{:x} 0x{:x} 0x{:x}",
                path,
                address.wrapping_sub(file_offset),
                file_offset,
                file_offset + size
            )],
            progress_weight: 0,
            result_expression: None,
            error_message: Some(format!("Failed to program the {name} section")),
            check_result_strictly: true,
            retryable: false,
        });
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use pretty_assertions::assert_eq;

    use crate::config::{keys, FlashSettings};
    use crate::flashing::stub::STUB_MAGIC;
    use crate::image::FlashSection;

    use super::*;

    /// Image collaborator whose only supported question is the app mode.
    struct ModeOnlyImage(Result<u8, ()>);

    impl AppImageBuilder for ModeOnlyImage {
        fn detect_app_mode(&self, elf_path: &Path) -> Result<u8, FlashError> {
            self.0.map_err(|()| FlashError::MissingFile(elf_path.to_owned()))
        }

        fn write_plain_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            _output: &Path,
        ) -> Result<u32, FlashError> {
            unreachable!("plain image requested")
        }

        fn flash_sections(&self, _elf_path: &Path) -> Result<Vec<FlashSection>, FlashError> {
            unreachable!("flash sections requested")
        }

        fn write_ota_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            _app_mode: u8,
            _output: &Path,
        ) -> Result<(u32, u32), FlashError> {
            unreachable!("OTA image requested")
        }

        fn write_esp32_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            _output: &Path,
        ) -> Result<u32, FlashError> {
            unreachable!("ESP32 image requested")
        }
    }

    /// Image collaborator producing a plain base image of a fixed size.
    struct PlainImage {
        size: u32,
    }

    impl AppImageBuilder for PlainImage {
        fn detect_app_mode(&self, _elf_path: &Path) -> Result<u8, FlashError> {
            Ok(0)
        }

        fn write_plain_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            output: &Path,
        ) -> Result<u32, FlashError> {
            fs::write(output, vec![0u8; self.size as usize]).map_err(FlashError::io(output))?;
            Ok(self.size)
        }

        fn flash_sections(&self, _elf_path: &Path) -> Result<Vec<FlashSection>, FlashError> {
            Ok(Vec::new())
        }

        fn write_ota_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            _app_mode: u8,
            _output: &Path,
        ) -> Result<(u32, u32), FlashError> {
            unreachable!("OTA image requested")
        }

        fn write_esp32_image(
            &self,
            _elf_path: &Path,
            _settings: &FlashSettings,
            _output: &Path,
        ) -> Result<u32, FlashError> {
            unreachable!("ESP32 image requested")
        }
    }

    struct CannedUi(bool);

    impl UserInterface for CannedUi {
        fn confirm(&self, _message: &str) -> bool {
            self.0
        }
    }

    fn config_from(entries: &[(&str, &str)]) -> DebugConfig {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DebugConfig::from_key_values(&map).unwrap()
    }

    fn flash_config(board_root: &Path, reset_mode: &str) -> DebugConfig {
        config_from(&[
            (keys::BOARD_ROOT, board_root.to_str().unwrap()),
            (keys::PROJECT_DIR, board_root.to_str().unwrap()),
            (keys::LOAD_FROM_FLASH, "1"),
            (keys::RESET_MODE, reset_mode),
        ])
    }

    fn write_stub(board_root: &Path) {
        let dir = board_root.join("flashprog");
        fs::create_dir_all(&dir).unwrap();
        let mut image = Vec::new();
        image.extend_from_slice(&STUB_MAGIC.to_le_bytes());
        image.extend_from_slice(&0x4010_0000u32.to_le_bytes());
        image.extend_from_slice(&0x4010_0010u32.to_le_bytes());
        image.extend_from_slice(&0x4010_1000u32.to_le_bytes());
        image.extend_from_slice(&0x4010_2000u32.to_le_bytes());
        image.extend_from_slice(&4096u32.to_le_bytes());
        image.resize(64, 0);
        fs::write(dir.join("esp8266-flash-stub.bin"), image).unwrap();
    }

    struct TestSection {
        name: &'static str,
        sh_type: u32,
        flags: u32,
        addr: u32,
        size: u32,
        data: &'static [u8],
    }

    /// Hand-assembles a minimal 32-bit little-endian ELF with the given
    /// sections, a leading null section and a trailing string table.
    fn build_elf(sections: &[TestSection]) -> Vec<u8> {
        fn push_u16(out: &mut Vec<u8>, v: u16) {
            out.extend_from_slice(&v.to_le_bytes());
        }
        fn push_u32(out: &mut Vec<u8>, v: u32) {
            out.extend_from_slice(&v.to_le_bytes());
        }

        // Section contents directly follow the 52 byte file header.
        let mut contents = Vec::new();
        let mut offsets = Vec::new();
        for section in sections {
            offsets.push(52 + contents.len() as u32);
            contents.extend_from_slice(section.data);
        }

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in sections {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(section.name.as_bytes());
            strtab.push(0);
        }
        let strtab_name_offset = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab\0");

        let strtab_offset = 52 + contents.len() as u32;
        let mut shoff = strtab_offset + strtab.len() as u32;
        shoff += (4 - shoff % 4) % 4;
        let section_count = sections.len() as u16 + 2;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.resize(16, 0);
        push_u16(&mut out, 2); // ET_EXEC
        push_u16(&mut out, 94); // EM_XTENSA
        push_u32(&mut out, 1);
        push_u32(&mut out, 0x4010_0000); // e_entry
        push_u32(&mut out, 0); // e_phoff
        push_u32(&mut out, shoff);
        push_u32(&mut out, 0); // e_flags
        push_u16(&mut out, 52); // e_ehsize
        push_u16(&mut out, 0); // e_phentsize
        push_u16(&mut out, 0); // e_phnum
        push_u16(&mut out, 40); // e_shentsize
        push_u16(&mut out, section_count);
        push_u16(&mut out, section_count - 1); // e_shstrndx

        out.extend_from_slice(&contents);
        out.extend_from_slice(&strtab);
        out.resize(shoff as usize, 0);

        let mut header = |name: u32, sh_type: u32, flags: u32, addr: u32, off: u32, size: u32| {
            push_u32(&mut out, name);
            push_u32(&mut out, sh_type);
            push_u32(&mut out, flags);
            push_u32(&mut out, addr);
            push_u32(&mut out, off);
            push_u32(&mut out, size);
            push_u32(&mut out, 0); // sh_link
            push_u32(&mut out, 0); // sh_info
            push_u32(&mut out, 1); // sh_addralign
            push_u32(&mut out, 0); // sh_entsize
        };

        header(0, 0, 0, 0, 0, 0);
        for (i, section) in sections.iter().enumerate() {
            header(
                name_offsets[i],
                section.sh_type,
                section.flags,
                section.addr,
                offsets[i],
                section.size,
            );
        }
        header(strtab_name_offset, 3, 0, 0, strtab_offset, strtab.len() as u32);
        out
    }

    #[test]
    fn ram_only_target_takes_the_load_branch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_from(&[
            (keys::BOARD_ROOT, dir.path().to_str().unwrap()),
            (keys::PROJECT_DIR, dir.path().to_str().unwrap()),
        ]);
        let image = ModeOnlyImage(Ok(0));

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .program_flash(true)
            .build(&CannedUi(false))
            .unwrap();

        assert_eq!(sequence.steps.len(), 2);
        assert_eq!(sequence.steps[0].commands[0], "mon reset halt");
        assert_eq!(sequence.steps[1].commands[0], "load");
        assert_eq!(sequence.initial_breakpoint_expression, None);
        // The flash branch contributes nothing to a RAM-only sequence.
        assert!(!sequence
            .steps
            .iter()
            .flat_map(|s| &s.commands)
            .any(|c| c.starts_with("restore")));
    }

    #[test]
    fn flash_branch_orders_status_clear_init_erase_program() {
        let dir = tempfile::tempdir().unwrap();
        write_stub(dir.path());
        let payload = dir.path().join("region.bin");
        fs::write(&payload, vec![0u8; 100]).unwrap();

        let config = flash_config(dir.path(), "hard");
        let image = ModeOnlyImage(Ok(0));
        let region = ProgrammableRegion::from_file(0x2000, payload).unwrap();

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .program_flash(true)
            .regions(vec![region])
            .build(&CannedUi(false))
            .unwrap();

        // Baseline, status clear, init, erase, one program chunk, hard reset.
        assert_eq!(sequence.steps.len(), 6);
        assert_eq!(
            sequence.steps[1].commands,
            vec![
                "print *((int *)0x60000900)".to_owned(),
                "set *((int *)0x60000900)=0".to_owned(),
            ]
        );
        assert!(sequence.steps[2].commands[0].contains("esp8266-flash-stub.bin"));
        assert!(sequence.steps[3]
            .error_message
            .as_deref()
            .unwrap()
            .contains("erase"));
        assert_eq!(sequence.steps[4].progress_weight, 100);
        assert_eq!(sequence.steps[5].commands, vec!["mon reset halt".to_owned()]);
        assert_eq!(sequence.initial_breakpoint_expression, None);
    }

    #[test]
    fn flash_branch_plans_regions_when_none_are_supplied() {
        let dir = tempfile::tempdir().unwrap();
        write_stub(dir.path());
        let elf_path = dir.path().join("app.elf");
        fs::write(&elf_path, b"elf").unwrap();

        let config = flash_config(dir.path(), "hard");
        let image = PlainImage { size: 100 };

        let messages = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = messages.clone();
        let progress = FlashProgress::new(move |event| {
            if let crate::flashing::ProgressEvent::Message(text) = event {
                sink.borrow_mut().push(text);
            }
            Ok(())
        });

        let sequence = StartupSequenceBuilder::new(&config, &elf_path, &image)
            .program_flash(true)
            .progress(&progress)
            .build(&CannedUi(false))
            .unwrap();

        // Baseline, status clear, init, erase, one program chunk, hard reset.
        assert_eq!(sequence.steps.len(), 6);
        assert_eq!(sequence.steps[4].progress_weight, 100);
        assert!(sequence.steps[4].commands[0].contains("app.elf-0x00000.bin"));
        assert_eq!(
            *messages.borrow(),
            vec!["Detected a plain application image".to_owned()]
        );
    }

    #[test]
    fn missing_stub_aborts_with_the_searched_path() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("region.bin");
        fs::write(&payload, vec![0u8; 16]).unwrap();

        let config = flash_config(dir.path(), "hard");
        let image = ModeOnlyImage(Ok(0));
        let region = ProgrammableRegion::from_file(0, payload).unwrap();

        let err = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .program_flash(true)
            .regions(vec![region])
            .build(&CannedUi(false))
            .unwrap_err();

        match err {
            FlashError::MissingFile(path) => {
                assert!(path.ends_with("flashprog/esp8266-flash-stub.bin"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stub_is_found_in_the_fallback_directory() {
        let board = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        write_stub(fallback.path());
        let payload = board.path().join("region.bin");
        fs::write(&payload, vec![0u8; 16]).unwrap();

        let config = flash_config(board.path(), "hard");
        let image = ModeOnlyImage(Ok(0));
        let region = ProgrammableRegion::from_file(0, payload).unwrap();

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .program_flash(true)
            .regions(vec![region])
            .stub_fallback_dir(fallback.path())
            .build(&CannedUi(false))
            .unwrap();

        assert!(sequence.steps[2].commands[0].starts_with("restore"));
    }

    #[test]
    fn soft_reset_points_the_cpu_at_the_rom_vector() {
        let dir = tempfile::tempdir().unwrap();
        let config = flash_config(dir.path(), "soft");
        let image = ModeOnlyImage(Ok(0));

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .build(&CannedUi(false))
            .unwrap();

        assert_eq!(sequence.steps.len(), 2);
        assert!(sequence.steps[1]
            .commands
            .contains(&"set $epc2=0x40000080".to_owned()));
        assert_eq!(
            sequence.initial_breakpoint_expression.as_deref(),
            Some("*$$DEBUG:ENTRY_POINT$$")
        );
    }

    #[test]
    fn soft_reset_falls_back_to_hard_for_ota_images_on_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let config = flash_config(dir.path(), "soft");
        let image = ModeOnlyImage(Ok(1));

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .build(&CannedUi(true))
            .unwrap();

        assert_eq!(
            sequence.steps.last().unwrap().commands,
            vec!["mon reset halt".to_owned()]
        );
        assert_eq!(sequence.initial_breakpoint_expression, None);
    }

    #[test]
    fn soft_reset_is_kept_when_the_fallback_is_declined() {
        let dir = tempfile::tempdir().unwrap();
        let config = flash_config(dir.path(), "soft");
        let image = ModeOnlyImage(Ok(1));

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .build(&CannedUi(false))
            .unwrap();

        assert!(sequence.steps[1]
            .commands
            .contains(&"set $epc2=0x40000080".to_owned()));
    }

    #[test]
    fn soft_reset_probe_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let config = flash_config(dir.path(), "soft");
        let image = ModeOnlyImage(Err(()));

        let sequence = StartupSequenceBuilder::new(&config, Path::new("/tmp/app.elf"), &image)
            .build(&CannedUi(true))
            .unwrap();

        assert!(sequence.steps[1]
            .commands
            .contains(&"set $epc2=0x40000080".to_owned()));
    }

    #[test]
    fn jump_to_entry_restores_only_ram_resident_data_sections() {
        let dir = tempfile::tempdir().unwrap();
        let elf_path = dir.path().join("app.elf");
        let elf = build_elf(&[
            TestSection {
                name: ".data",
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | 1,
                addr: 0x3FFE_9000,
                size: 8,
                data: &[0xaa; 8],
            },
            TestSection {
                name: ".rom_code",
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | 4,
                addr: 0x4000_0000,
                size: 4,
                data: &[0xbb; 4],
            },
            TestSection {
                name: ".bss",
                sh_type: 8, // SHT_NOBITS
                flags: SHF_ALLOC | 1,
                addr: 0x3FFE_9800,
                size: 16,
                data: &[],
            },
        ]);
        fs::write(&elf_path, elf).unwrap();

        let config = flash_config(dir.path(), "jump-to-entry");
        let image = ModeOnlyImage(Ok(0));

        let sequence = StartupSequenceBuilder::new(&config, &elf_path, &image)
            .build(&CannedUi(false))
            .unwrap();

        // Baseline, one section restore, register setup.
        assert_eq!(sequence.steps.len(), 3);
        let restore = &sequence.steps[1];
        assert_eq!(
            restore.commands,
            vec![format!(
                "restore {} binary 0x3ffe8fcc 0x34 0x3c",
                elf_path.display()
            )]
        );
        assert!(restore.check_result_strictly);
        assert!(!restore.retryable);
        assert_eq!(
            restore.error_message.as_deref(),
            Some("Failed to program the .data section")
        );

        assert!(sequence.steps[2]
            .commands
            .contains(&"set $epc2=$$DEBUG:ENTRY_POINT$$".to_owned()));
        assert_eq!(
            sequence.initial_breakpoint_expression.as_deref(),
            Some("*$$DEBUG:ENTRY_POINT$$")
        );
    }

    #[test]
    fn ram_windows_have_the_documented_bounds() {
        assert!(in_ram_window(0x3FFE_8000));
        assert!(in_ram_window(0x3FFE_9000));
        assert!(!in_ram_window(0x3FFE_8000 + 80 * 1024));
        assert!(!in_ram_window(0x4000_0000));
        assert!(in_ram_window(0x4010_0000));
        // The instruction RAM window includes its upper bound.
        assert!(in_ram_window(0x4010_0000 + 32 * 1024));
        assert!(!in_ram_window(0x4010_0000 + 32 * 1024 + 1));
    }
}
