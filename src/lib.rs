mod batch;
mod batch_function;
mod cache;
mod cell;
mod config;
mod error;
mod loader;
#[cfg(feature = "stats")]
mod stats;
mod thunk;

pub use batch_function::{BatchFunction, BatchResult};
pub use config::{LoaderConfig, DEFAULT_WAIT};
pub use error::LoadError;
pub use loader::Loader;
#[cfg(feature = "stats")]
pub use stats::LoaderStats;
pub use thunk::{Thunk, ThunkAll};
