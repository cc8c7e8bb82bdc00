//! Request-path services and the background expiry reaper

pub mod download;
pub mod reaper;
pub mod upload;

pub use download::DownloadGateway;
pub use reaper::{ExpiryReaper, ReaperHandle, SweepReport};
pub use upload::UploadPipeline;
