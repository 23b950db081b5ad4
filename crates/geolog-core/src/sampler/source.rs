//! Position sources feeding the sampler.

use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::models::validate_coordinates;
use crate::util::{compact_text, now_millis};

/// A raw fix as reported by a position source, before throttling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPosition {
    pub lat: f64,
    pub lng: f64,
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Failures reported while acquiring a position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("Timed out waiting for a position fix")]
    Timeout,
    #[error("Position source unavailable: {0}")]
    SourceUnavailable(String),
}

/// A stream of position fixes.
pub trait PositionSource: Send + 'static {
    /// Wait for the next fix. `None` means the source has ended.
    fn next_position(
        &mut self,
    ) -> impl Future<Output = Option<Result<RawPosition, CaptureError>>> + Send;
}

#[derive(Debug, Deserialize)]
struct PositionLine {
    lat: Option<f64>,
    lng: Option<f64>,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
}

/// Reads newline-delimited JSON fixes from any async reader.
///
/// Each line is either a fix (`{"lat":..,"lng":..,"altitude":..,"timestamp":..}`,
/// altitude and timestamp optional) or an error report
/// (`{"error":"permission_denied"|"unavailable"|"timeout"}`). Malformed lines
/// are reported as [`CaptureError::PositionUnavailable`] and reading continues.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    finished: bool,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            finished: false,
        }
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    /// Read fixes from a file or FIFO.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|error| {
            CaptureError::SourceUnavailable(format!("{}: {error}", path.display()))
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R> PositionSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_position(&mut self) -> Option<Result<RawPosition, CaptureError>> {
        if self.finished {
            return None;
        }

        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return Some(parse_line(line));
                }
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(CaptureError::SourceUnavailable(error.to_string())));
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Result<RawPosition, CaptureError> {
    let parsed: PositionLine = serde_json::from_str(line).map_err(|error| {
        CaptureError::PositionUnavailable(format!(
            "malformed fix `{}`: {error}",
            compact_text(line)
        ))
    })?;

    if let Some(code) = parsed.error {
        return Err(match code.trim() {
            "permission_denied" | "denied" => CaptureError::PermissionDenied,
            "timeout" => CaptureError::Timeout,
            other => CaptureError::PositionUnavailable(other.to_string()),
        });
    }

    let (Some(lat), Some(lng)) = (parsed.lat, parsed.lng) else {
        return Err(CaptureError::PositionUnavailable(
            "fix is missing lat or lng".to_string(),
        ));
    };
    validate_coordinates(lat, lng, parsed.altitude)
        .map_err(|error| CaptureError::PositionUnavailable(error.to_string()))?;

    Ok(RawPosition {
        lat,
        lng,
        altitude: parsed.altitude,
        timestamp: parsed.timestamp.unwrap_or_else(now_millis),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn source(input: &str) -> JsonLinesSource<Cursor<Vec<u8>>> {
        JsonLinesSource::new(Cursor::new(input.as_bytes().to_vec()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_fixes_until_end_of_input() {
        let mut source = source(
            "{\"lat\":50.45,\"lng\":30.52,\"timestamp\":\"2024-05-01T10:00:00Z\"}\n\n\
             {\"lat\":50.46,\"lng\":30.53,\"altitude\":180.5}\n",
        );

        let first = source.next_position().await.unwrap().unwrap();
        assert!((first.lat - 50.45).abs() < f64::EPSILON);
        assert_eq!(first.altitude, None);
        assert_eq!(first.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let second = source.next_position().await.unwrap().unwrap();
        assert_eq!(second.altitude, Some(180.5));

        assert!(source.next_position().await.is_none());
        assert!(source.next_position().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_lines_do_not_end_the_stream() {
        let mut source = source("not json\n{\"lat\":95.0,\"lng\":0.0}\n{\"lat\":1.0,\"lng\":2.0}\n");

        assert!(matches!(
            source.next_position().await,
            Some(Err(CaptureError::PositionUnavailable(_)))
        ));
        assert!(matches!(
            source.next_position().await,
            Some(Err(CaptureError::PositionUnavailable(_)))
        ));
        assert!(matches!(source.next_position().await, Some(Ok(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_lines_map_to_capture_errors() {
        let mut source = source(
            "{\"error\":\"permission_denied\"}\n{\"error\":\"timeout\"}\n{\"error\":\"no satellites\"}\n",
        );

        assert_eq!(
            source.next_position().await,
            Some(Err(CaptureError::PermissionDenied))
        );
        assert_eq!(source.next_position().await, Some(Err(CaptureError::Timeout)));
        assert_eq!(
            source.next_position().await,
            Some(Err(CaptureError::PositionUnavailable(
                "no satellites".to_string()
            )))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_file_is_source_unavailable() {
        let result = JsonLinesSource::open("/nonexistent/geolog/fixes.jsonl").await;
        assert!(matches!(result, Err(CaptureError::SourceUnavailable(_))));
    }
}
