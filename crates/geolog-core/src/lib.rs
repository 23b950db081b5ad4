//! geolog-core - Core library for Geologger
//!
//! This crate contains the offline-first location pipeline shared by the
//! Geologger clients: sample capture and throttling, the durable local queue,
//! batch reconciliation with the backend, and the wire models both sides speak.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod map;
pub mod models;
pub mod sampler;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{LocationRecord, LocationSample, SampleId};
