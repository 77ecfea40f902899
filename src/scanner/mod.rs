// Historical event retrieval over block ranges
pub mod progress;
pub mod range;
pub mod transfers;

pub use progress::{CandidateOutcome, NoProgress, Progress, ProgressSink, TracingProgress};
pub use range::{BlockRange, RangeEventScanner};
pub use transfers::{transfer_event, TransferEvent};
