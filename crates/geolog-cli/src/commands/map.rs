use std::path::{Path, PathBuf};

use geolog_core::config::{ClientConfig, TimePeriod};
use geolog_core::geo::thin_route;
use geolog_core::map::{MapConfig, MapProvider};

use crate::commands::common::{load_route, Route};
use crate::error::CliError;

pub struct MapOptions {
    pub provider: Option<MapProvider>,
    pub period: TimePeriod,
    pub detail: usize,
    pub local: bool,
    pub output: PathBuf,
}

pub async fn run_map(
    options: MapOptions,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    if options.detail == 0 {
        return Err(CliError::InvalidArgument(
            "--detail must be at least 1".to_string(),
        ));
    }

    let provider = options.provider.unwrap_or(config.map_provider);
    let map_config = MapConfig {
        title: format!("Route: {}", options.period.label()),
        zoom: None,
        center: None,
        api_key: config.google_maps_api_key.clone(),
    };

    let route = load_route(config, db_path, options.period, options.local).await?;
    let (html, shown) = match &route {
        Route::Remote(points) => {
            let thinned = thin_route(points, options.detail);
            (provider.render(&thinned, &map_config)?, thinned.len())
        }
        Route::Local(points) => {
            let thinned = thin_route(points, options.detail);
            (provider.render(&thinned, &map_config)?, thinned.len())
        }
    };

    if let Some(parent) = options.output.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&options.output, html).await?;
    println!(
        "Wrote {} map with {shown} of {} point(s) to {}",
        provider.name(),
        route.len(),
        options.output.display()
    );
    Ok(())
}
