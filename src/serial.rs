//! Serial bootloader programming path.
//!
//! Some targets are programmed through the ROM serial bootloader instead of
//! debugger register pokes. The wire protocol lives behind the
//! [`BootloaderClient`] trait; this module only orchestrates a session:
//! synchronize, stream every region keyed by its flash offset, then command
//! the target to run the loaded image.

use crate::flashing::{FlashError, FlashProgress, ProgrammableRegion};

/// Minimal contract with a serial ROM bootloader implementation.
pub trait BootloaderClient {
    /// Establishes communication with the bootloader.
    fn synchronize(&mut self) -> Result<(), FlashError>;

    /// Writes one region's bytes at the given flash offset.
    ///
    /// `block_written` is invoked after every transferred block with the
    /// number of bytes written so far and the region total; an error returned
    /// from it must abort the transfer.
    fn write_region(
        &mut self,
        offset: u32,
        data: &[u8],
        block_written: &mut dyn FnMut(u64, u64) -> Result<(), FlashError>,
    ) -> Result<(), FlashError>;

    /// Starts the loaded image.
    fn run(&mut self, use_alternate_framing: bool) -> Result<(), FlashError>;
}

/// Programs a set of regions through the serial bootloader.
///
/// Regions are streamed in order. The framing variant passed to
/// [`BootloaderClient::run`] is inferred from the image placed at offset
/// zero: its header byte 2 holding the dual-I/O mode code selects the
/// alternate framing. Progress events are a synchronous rendezvous; a
/// cancellation answer aborts before the next region starts.
pub fn program_over_serial(
    client: &mut dyn BootloaderClient,
    regions: &[ProgrammableRegion],
    progress: &FlashProgress,
) -> Result<(), FlashError> {
    let result = program_inner(client, regions, progress);
    if result.is_err() {
        progress.failed_programming();
    }
    result
}

fn program_inner(
    client: &mut dyn BootloaderClient,
    regions: &[ProgrammableRegion],
    progress: &FlashProgress,
) -> Result<(), FlashError> {
    client.synchronize()?;
    tracing::info!("Synchronized with the serial bootloader");

    let total: u64 = regions.iter().map(|r| r.size as u64).sum();
    progress.started_programming(total)?;

    let mut use_alternate_framing = false;
    let mut written_before: u64 = 0;

    for region in regions {
        let data = region.bytes()?;
        if region.offset == 0 && data.len() > 2 && data[2] == 2 {
            use_alternate_framing = true;
        }

        progress.region_started(region.offset, region.size)?;
        tracing::debug!(
            "Writing {} bytes at 0x{:x} over serial",
            data.len(),
            region.offset
        );

        client.write_region(region.offset, &data, &mut |written, _region_total| {
            progress.block_written(written_before + written, total)
        })?;

        written_before += region.size as u64;
        progress.region_finished(region.offset)?;
    }

    client.run(use_alternate_framing)?;
    progress.finished_programming()?;
    Ok(())
}
