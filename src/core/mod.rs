pub mod config;
pub mod downloader;
pub mod feed;
pub mod selector;
pub mod storage;
pub mod sync;
