//! CI engine: status checks, waiting with progress, failure classification.

pub mod classifier;
pub mod history;
pub mod monitor;
pub mod status;

pub use classifier::{
    CIFailureCategory, CIFailureReason, ClassifiedCIResult, FailureClassifier,
    classify_cancelled_job,
};
pub use history::CIFailureHistory;
pub use monitor::{CiMonitor, CiProgress, CiWaitOutcome, WaitOptions};
pub use status::{CIJobDetail, CIResult, CIStatus, CiCounts, JobState};
