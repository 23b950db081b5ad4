pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod log;
pub mod map;
pub mod stats;
pub mod sync;
pub mod track;
