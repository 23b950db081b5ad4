use std::path::Path;

use geolog_core::config::ClientConfig;
use geolog_core::sync::LocationRecorder;
use geolog_core::util::now_millis;
use geolog_core::LocationSample;

use crate::commands::common::{authorized_api, open_queue, require_session};
use crate::commands::track::describe_outcome;
use crate::error::CliError;

/// Record one position. Tries the backend first and queues on failure.
pub async fn run_log(
    lat: f64,
    lng: f64,
    altitude: Option<f64>,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let session = require_session(config)?;
    let sample = LocationSample::new(&session.user.id, lat, lng, altitude, now_millis());
    sample.validate()?;

    let queue = open_queue(db_path, config).await?;
    let api = authorized_api(config, &session)?;
    let outcome = LocationRecorder::new(api, queue).record(&sample).await?;
    println!("{}", describe_outcome(&sample, &outcome));
    Ok(())
}
