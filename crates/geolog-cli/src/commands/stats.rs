use std::path::Path;

use geolog_core::config::{ClientConfig, TimePeriod};
use geolog_core::geo::{format_distance, format_duration, format_speed, route_stats, RouteStats};

use crate::commands::common::{load_route, Route};
use crate::error::CliError;

pub async fn run_stats(
    period: TimePeriod,
    local: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let route = load_route(config, db_path, period, local).await?;
    let stats = match &route {
        Route::Remote(points) => route_stats(points),
        Route::Local(points) => route_stats(points),
    };

    for line in format_stats_lines(period, &stats) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_stats_lines(period: TimePeriod, stats: &RouteStats) -> Vec<String> {
    vec![
        format!("Period:        {}", period.label()),
        format!("Points:        {}", stats.points_count),
        format!("Distance:      {}", format_distance(stats.total_distance_m)),
        format!("Duration:      {}", format_duration(stats.total_time_s)),
        format!("Average speed: {}", format_speed(stats.average_speed_mps)),
    ]
}
