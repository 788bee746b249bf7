//! Background tasks.

pub mod key_refresh;

pub use key_refresh::{FetchError, KeyRefreshWorker, WorkerError};
