//! Download queue processing

mod downloader;
mod manager;
mod state;
mod task;

pub use downloader::{Downloader, SpotdlDownloader};
pub use manager::DownloadManager;
pub use task::RequestReconciler;
