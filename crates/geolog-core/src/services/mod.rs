//! Service layer over the local database

mod queue;

pub use queue::{SampleQueue, DEFAULT_MAX_ATTEMPTS};
