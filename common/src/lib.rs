pub mod grid;
pub mod job;
pub mod merge;
pub mod metadata;
pub mod observed;
pub mod patch;
pub mod settings;
pub mod window;

pub use job::{
    correlation_key, AckStatus, Job, JobDispatch, JobId, JobRequest, QueueStatus, QueuedJob,
    RunType, SourceCategory, SpecVariant,
};
pub use settings::{Settings, Timing, DEFAULT_CONSTANTS_FILE};
pub use window::{RunWindow, WindowError};
