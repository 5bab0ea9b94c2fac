pub mod models;
pub mod seen;

pub use seen::{SeenStore, StoreError};

/// File name used when the configuration does not name a state file.
pub const DEFAULT_STATE_FILE: &str = ".newsfeed-dl-state.json";
