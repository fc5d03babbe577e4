//! Waveform acquisition from an FDSN dataselect service.
//!
//! All windows of one call go into a single POST request, one line per
//! stream: `NET STA LOC CHA START END`, with `--` for an empty location.
//! The service answers with concatenated miniSEED records, or 204 when it
//! has no data.

use std::time::Duration;

use repick_core::waveform::split_records;
use repick_core::{Record, WaveformError, WaveformRequest, WaveformSource};
use tracing::debug;

/// Path of the dataselect query endpoint below the service base URL.
const DATASELECT_PATH: &str = "fdsnws/dataselect/1/query";

/// Time format of request lines.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Errors from talking to the dataselect service.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// The HTTP request failed.
    #[error("dataselect request failed: {source}")]
    Http {
        /// The underlying HTTP error.
        #[from]
        source: reqwest::Error,
    },

    /// The service answered with an unexpected status.
    #[error("dataselect returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// Blocking dataselect client.
#[derive(Debug, Clone)]
pub struct FdsnWaveformSource {
    http: reqwest::blocking::Client,
    url: String,
}

impl FdsnWaveformSource {
    /// Client for the service at `base_url`, giving up after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AcquisitionError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/{DATASELECT_PATH}", base_url.trim_end_matches('/')),
        })
    }

    fn fetch_bytes(&self, requests: &[WaveformRequest]) -> Result<Vec<u8>, AcquisitionError> {
        let response = self
            .http
            .post(&self.url)
            .body(request_body(requests))
            .send()?;
        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(AcquisitionError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// POST body for `requests`.
pub fn request_body(requests: &[WaveformRequest]) -> String {
    requests
        .iter()
        .map(|r| {
            format!(
                "{} {} {} {} {} {}\n",
                r.stream.network_code,
                r.stream.station_code,
                r.stream.location_or_dashes(),
                r.stream.channel_code,
                r.start.format(TIME_FORMAT),
                r.end.format(TIME_FORMAT),
            )
        })
        .collect()
}

impl WaveformSource for FdsnWaveformSource {
    fn fetch(&self, requests: &[WaveformRequest]) -> Result<Vec<Record>, WaveformError> {
        let bytes = self
            .fetch_bytes(requests)
            .map_err(|e| WaveformError::Source {
                message: e.to_string(),
            })?;
        let records = split_records(&bytes)?;
        debug!(
            requests = requests.len(),
            bytes = bytes.len(),
            records = records.len(),
            "Dataselect response"
        );
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use repick_types::WaveformStreamId;

    use super::*;

    #[test]
    fn one_line_per_window() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 2, 0).single().unwrap();
        let requests = vec![
            WaveformRequest {
                stream: WaveformStreamId::new("GE", "UGM", "", "BHZ"),
                start,
                end,
            },
            WaveformRequest {
                stream: WaveformStreamId::new("GE", "SANI", "00", "HHN"),
                start,
                end,
            },
        ];
        assert_eq!(
            request_body(&requests),
            "GE UGM -- BHZ 2024-05-01T12:00:00.000000 2024-05-01T12:02:00.000000\n\
             GE SANI 00 HHN 2024-05-01T12:00:00.000000 2024-05-01T12:02:00.000000\n"
        );
    }

    #[test]
    fn endpoint_is_joined_to_base_url() {
        let source = FdsnWaveformSource::new("http://geofon.example/", Duration::from_secs(5)).unwrap();
        assert_eq!(source.url, "http://geofon.example/fdsnws/dataselect/1/query");
    }
}
