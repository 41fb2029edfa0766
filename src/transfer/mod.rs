pub mod downloader;
pub mod uploader;

pub use downloader::{Downloader, PullReport};
pub use uploader::Uploader;
