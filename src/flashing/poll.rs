//! Completion polling for stub invocations.
//!
//! After an invocation resumes the stub, the only way to observe completion
//! is to re-read the result word until it no longer holds the busy sentinel.
//! This is an explicit bounded retry loop with backoff, never a blocking
//! wait, so it stays cancellable and turns a hung stub into a reported
//! timeout instead of a stuck session.

use std::thread;
use std::time::{Duration, Instant};

use super::flasher::BUSY_SENTINEL;
use super::FlashError;

/// Longest pause between two consecutive reads of the result word.
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Polls the stub result word until the busy sentinel clears.
///
/// `read_word` re-reads the result word through the debugger; `cancelled` is
/// checked before every read. Returns the stub's result value, or
/// [`FlashError::ProtocolTimeout`] when the sentinel never clears within
/// `timeout`, or [`FlashError::Cancelled`].
pub fn poll_result_word(
    mut read_word: impl FnMut() -> Result<u32, FlashError>,
    timeout: Duration,
    mut cancelled: impl FnMut() -> bool,
) -> Result<u32, FlashError> {
    let start = Instant::now();
    let mut backoff = Duration::from_millis(1);

    loop {
        if cancelled() {
            return Err(FlashError::Cancelled);
        }

        let value = read_word()?;
        if value != BUSY_SENTINEL {
            return Ok(value);
        }

        if start.elapsed() >= timeout {
            tracing::warn!(
                "Stub result word still busy after {}ms",
                timeout.as_millis()
            );
            return Err(FlashError::ProtocolTimeout { timeout });
        }

        thread::sleep(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
