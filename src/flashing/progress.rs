//! Progress reporting and cancellation.
//!
//! Programming runs on the thread driving the target while the user
//! interface lives elsewhere. Events cross that boundary as a synchronous
//! rendezvous: the producing thread blocks inside [`FlashProgress`] until the
//! handler returns, and the handler can answer with [`Cancelled`] to unwind
//! every in-flight region loop cleanly. No stub invocation is ever left
//! half-issued, because invocations are emitted as atomic command batches.

use super::FlashError;

/// The user asked to abort through the progress surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Yes/no confirmation surface of the embedding tool.
pub trait UserInterface {
    /// Asks the user a yes/no question and blocks until it is answered.
    fn confirm(&self, message: &str) -> bool;
}

/// A structure to manage progress reporting of the programming procedure.
///
/// Stores a handler closure which is called for every event. The call is the
/// rendezvous point with the interface-owning thread; returning
/// `Err(Cancelled)` aborts the procedure with [`FlashError::Cancelled`].
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent) -> Result<(), Cancelled>>,
}

impl FlashProgress {
    /// Creates a new `FlashProgress` with a given `handler`.
    pub fn new(handler: impl Fn(ProgressEvent) -> Result<(), Cancelled> + 'static) -> Self {
        FlashProgress {
            handler: Box::new(handler),
        }
    }

    /// A progress reporter that swallows all events.
    pub fn empty() -> Self {
        FlashProgress::new(|_| Ok(()))
    }

    fn emit(&self, event: ProgressEvent) -> Result<(), FlashError> {
        (self.handler)(event).map_err(|Cancelled| FlashError::Cancelled)
    }

    /// Programming started; `total_bytes` is the sum of all region sizes.
    pub(crate) fn started_programming(&self, total_bytes: u64) -> Result<(), FlashError> {
        self.emit(ProgressEvent::StartedProgramming { total_bytes })
    }

    /// A region is about to be written.
    pub(crate) fn region_started(&self, offset: u32, size: u32) -> Result<(), FlashError> {
        self.emit(ProgressEvent::RegionStarted { offset, size })
    }

    /// A block within the current region has been written.
    pub(crate) fn block_written(&self, written: u64, total: u64) -> Result<(), FlashError> {
        self.emit(ProgressEvent::BlockWritten { written, total })
    }

    /// The current region has been fully written. This is the rendezvous
    /// before the next region starts.
    pub(crate) fn region_finished(&self, offset: u32) -> Result<(), FlashError> {
        self.emit(ProgressEvent::RegionFinished { offset })
    }

    /// Programming finished successfully.
    pub(crate) fn finished_programming(&self) -> Result<(), FlashError> {
        self.emit(ProgressEvent::FinishedProgramming)
    }

    /// Programming failed. Cancellation answers are ignored at this point.
    pub(crate) fn failed_programming(&self) {
        let _ = self.emit(ProgressEvent::FailedProgramming);
    }

    /// An informational message for the user.
    pub(crate) fn message(&self, text: String) -> Result<(), FlashError> {
        self.emit(ProgressEvent::Message(text))
    }
}

/// Possible events during the programming procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Programming started.
    StartedProgramming {
        /// The sum of all region sizes in bytes.
        total_bytes: u64,
    },
    /// A region is about to be written.
    RegionStarted {
        /// Flash offset of the region.
        offset: u32,
        /// Size of the region in bytes.
        size: u32,
    },
    /// A block of the current region has been written.
    BlockWritten {
        /// Bytes written so far, across all regions.
        written: u64,
        /// Total bytes to write.
        total: u64,
    },
    /// The current region has been fully written.
    RegionFinished {
        /// Flash offset of the region.
        offset: u32,
    },
    /// Programming failed.
    FailedProgramming,
    /// Programming finished successfully.
    FinishedProgramming,
    /// An informational message for the user.
    Message(String),
}
