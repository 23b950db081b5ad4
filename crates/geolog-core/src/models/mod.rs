//! Data models for Geologger

mod record;
mod sample;

pub use record::{
    CreateLocationRequest, LocationRecord, SyncLocationInput, SyncLocationsRequest,
    SyncLocationsResponse,
};
pub use sample::{validate_coordinates, LocationSample, SampleId};
