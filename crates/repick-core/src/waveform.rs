//! Waveform records, miniSEED splitting, request planning, and the
//! completeness filter applied before export.
//!
//! Records are kept as raw miniSEED bytes; only the fixed header is decoded.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use repick_types::time::{offset_seconds, seconds_between};
use repick_types::{Pick, StreamGroup, WaveformStreamId};
use tracing::{debug, warn};

/// Fixed header length of a miniSEED 2 record.
const FIXED_HEADER_LEN: usize = 48;

/// Record length assumed when no blockette 1000 is present.
pub const DEFAULT_RECORD_LENGTH: usize = 512;

/// Blockette type carrying the record length.
const BLOCKETTE_1000: u16 = 1000;

/// Activity flag bit telling that the time correction is already applied.
const TIME_CORRECTION_APPLIED: u8 = 0x02;

/// Minimum number of channels a station group needs to be kept.
pub const MIN_COMPONENTS: usize = 3;

/// Errors from decoding or acquiring waveform data.
#[derive(Debug, thiserror::Error)]
pub enum WaveformError {
    /// The byte stream ended inside a record.
    #[error("truncated miniSEED record at offset {offset}")]
    Truncated {
        /// Byte offset of the incomplete record.
        offset: usize,
    },

    /// A fixed header could not be decoded.
    #[error("invalid miniSEED header at offset {offset}: {reason}")]
    InvalidHeader {
        /// Byte offset of the record.
        offset: usize,
        /// What was wrong.
        reason: String,
    },

    /// The waveform source failed.
    #[error("waveform source failed: {message}")]
    Source {
        /// Description from the source.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One miniSEED record with its decoded header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stream the record belongs to.
    pub stream: WaveformStreamId,
    /// Time of the first sample.
    pub start: DateTime<Utc>,
    /// Time one sample interval after the last sample.
    pub end: DateTime<Utc>,
    /// Samples per second; zero for records without samples.
    pub sample_rate: f64,
    /// Number of samples.
    pub sample_count: u16,
    /// Raw record bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Big,
    Little,
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

fn read_u16(bytes: &[u8], offset: usize, order: ByteOrder) -> Option<u16> {
    let raw = read_array::<2>(bytes, offset)?;
    Some(match order {
        ByteOrder::Big => u16::from_be_bytes(raw),
        ByteOrder::Little => u16::from_le_bytes(raw),
    })
}

fn read_i16(bytes: &[u8], offset: usize, order: ByteOrder) -> Option<i16> {
    let raw = read_array::<2>(bytes, offset)?;
    Some(match order {
        ByteOrder::Big => i16::from_be_bytes(raw),
        ByteOrder::Little => i16::from_le_bytes(raw),
    })
}

fn read_i32(bytes: &[u8], offset: usize, order: ByteOrder) -> Option<i32> {
    let raw = read_array::<4>(bytes, offset)?;
    Some(match order {
        ByteOrder::Big => i32::from_be_bytes(raw),
        ByteOrder::Little => i32::from_le_bytes(raw),
    })
}

fn read_code(bytes: &[u8], offset: usize, len: usize) -> Option<String> {
    let raw = bytes.get(offset..offset.checked_add(len)?)?;
    Some(String::from_utf8_lossy(raw).trim().to_owned())
}

/// The header year is plausible in one byte order only.
fn detect_byte_order(bytes: &[u8]) -> Option<ByteOrder> {
    let plausible = |year: u16| (1900..=2100).contains(&year);
    if read_u16(bytes, 20, ByteOrder::Big).is_some_and(plausible) {
        Some(ByteOrder::Big)
    } else if read_u16(bytes, 20, ByteOrder::Little).is_some_and(plausible) {
        Some(ByteOrder::Little)
    } else {
        None
    }
}

/// Nominal sample rate from the header factor and multiplier.
fn sample_rate(factor: i16, multiplier: i16) -> f64 {
    let f = f64::from(factor);
    let m = f64::from(multiplier);
    match (factor.signum(), multiplier.signum()) {
        (0, _) | (_, 0) => 0.0,
        (1, 1) => f * m,
        (1, _) => -f / m,
        (_, 1) => -m / f,
        _ => 1.0 / (f * m),
    }
}

fn btime(bytes: &[u8], order: ByteOrder) -> Option<DateTime<Utc>> {
    let year = read_u16(bytes, 20, order)?;
    let day = read_u16(bytes, 22, order)?;
    let hour = *bytes.get(24)?;
    let minute = *bytes.get(25)?;
    let second = *bytes.get(26)?;
    let fraction = read_u16(bytes, 28, order)?;
    let naive = NaiveDate::from_yo_opt(i32::from(year), u32::from(day))?.and_hms_opt(
        u32::from(hour),
        u32::from(minute),
        u32::from(second.min(59)),
    )?;
    naive
        .and_utc()
        .checked_add_signed(Duration::microseconds(i64::from(fraction).saturating_mul(100)))
}

/// Record length from blockette 1000, if the header chain has one.
fn blockette_record_length(bytes: &[u8], order: ByteOrder) -> Option<usize> {
    let count = *bytes.get(39)?;
    let mut offset = usize::from(read_u16(bytes, 46, order)?);
    for _ in 0..count {
        if offset < FIXED_HEADER_LEN {
            return None;
        }
        let kind = read_u16(bytes, offset, order)?;
        if kind == BLOCKETTE_1000 {
            let exponent = *bytes.get(offset.checked_add(6)?)?;
            return 1_usize.checked_shl(u32::from(exponent));
        }
        let next = usize::from(read_u16(bytes, offset.checked_add(2)?, order)?);
        if next <= offset {
            return None;
        }
        offset = next;
    }
    None
}

impl Record {
    /// Decode the record at the start of `bytes`, taking as many bytes as
    /// its record length says.
    pub fn parse(bytes: &[u8]) -> Result<Self, WaveformError> {
        Self::parse_at(bytes, 0)
    }

    fn parse_at(bytes: &[u8], offset: usize) -> Result<Self, WaveformError> {
        let invalid = |reason: &str| WaveformError::InvalidHeader {
            offset,
            reason: reason.to_owned(),
        };
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(WaveformError::Truncated { offset });
        }
        let order = detect_byte_order(bytes).ok_or_else(|| invalid("implausible start year"))?;

        let station = read_code(bytes, 8, 5).ok_or_else(|| invalid("station code"))?;
        let location = read_code(bytes, 13, 2).ok_or_else(|| invalid("location code"))?;
        let channel = read_code(bytes, 15, 3).ok_or_else(|| invalid("channel code"))?;
        let network = read_code(bytes, 18, 2).ok_or_else(|| invalid("network code"))?;

        let mut start = btime(bytes, order).ok_or_else(|| invalid("start time"))?;
        let sample_count = read_u16(bytes, 30, order).ok_or_else(|| invalid("sample count"))?;
        let factor = read_i16(bytes, 32, order).ok_or_else(|| invalid("rate factor"))?;
        let multiplier = read_i16(bytes, 34, order).ok_or_else(|| invalid("rate multiplier"))?;
        let activity = *bytes.get(36).ok_or_else(|| invalid("activity flags"))?;
        let correction = read_i32(bytes, 40, order).ok_or_else(|| invalid("time correction"))?;
        if activity & TIME_CORRECTION_APPLIED == 0 && correction != 0 {
            start = start
                .checked_add_signed(Duration::microseconds(
                    i64::from(correction).saturating_mul(100),
                ))
                .unwrap_or(start);
        }

        let record_length = blockette_record_length(bytes, order).unwrap_or(DEFAULT_RECORD_LENGTH);
        if record_length < FIXED_HEADER_LEN {
            return Err(invalid("record length below header size"));
        }
        let data = bytes
            .get(..record_length)
            .ok_or(WaveformError::Truncated { offset })?
            .to_vec();

        let rate = sample_rate(factor, multiplier);
        let end = if rate > 0.0 {
            offset_seconds(start, f64::from(sample_count) / rate)
        } else {
            start
        };

        Ok(Self {
            stream: WaveformStreamId::new(network, station, location, channel),
            start,
            end,
            sample_rate: rate,
            sample_count,
            data,
        })
    }

    /// Length of the raw record in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a record without bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split a concatenated miniSEED byte stream into records.
pub fn split_records(bytes: &[u8]) -> Result<Vec<Record>, WaveformError> {
    let mut records = Vec::new();
    let mut offset = 0_usize;
    while offset < bytes.len() {
        let rest = bytes
            .get(offset..)
            .ok_or(WaveformError::Truncated { offset })?;
        let record = Record::parse_at(rest, offset)?;
        offset = offset
            .checked_add(record.len())
            .ok_or(WaveformError::Truncated { offset })?;
        records.push(record);
    }
    Ok(records)
}

/// Group records by stream.
pub fn by_stream(records: Vec<Record>) -> BTreeMap<WaveformStreamId, Vec<Record>> {
    let mut streams: BTreeMap<WaveformStreamId, Vec<Record>> = BTreeMap::new();
    for record in records {
        streams.entry(record.stream.clone()).or_default().push(record);
    }
    streams
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A time window on one stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WaveformRequest {
    /// Full stream ID with component.
    pub stream: WaveformStreamId,
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

/// Anything that can deliver records for a set of windows.
pub trait WaveformSource {
    /// Fetch records for `requests`. Streams without data are simply
    /// missing from the result.
    fn fetch(&self, requests: &[WaveformRequest]) -> Result<Vec<Record>, WaveformError>;
}

/// Windows to request for `picks`: `[t - before, t + after]` on every
/// component of the pick's group listed in `components`.
///
/// Picks whose vertical stream is already `available` are skipped, as are
/// groups absent from `components` (blacklisted or unknown stations).
pub fn plan_requests<'a>(
    picks: impl IntoIterator<Item = &'a Pick>,
    components: &BTreeMap<StreamGroup, String>,
    available: impl Fn(&WaveformStreamId) -> bool,
    before: f64,
    after: f64,
) -> Vec<WaveformRequest> {
    let mut planned: BTreeMap<WaveformStreamId, WaveformRequest> = BTreeMap::new();
    let mut seen_groups = BTreeSet::new();
    for pick in picks {
        let vertical = pick.waveform_id.with_vertical();
        if available(&vertical) {
            continue;
        }
        let group = vertical.group();
        let Some(letters) = components.get(&group) else {
            debug!(pick_id = %pick.id, group = %group, "No inventory streams for pick");
            continue;
        };
        if !seen_groups.insert(group.clone()) {
            continue;
        }
        let start = offset_seconds(pick.time, -before);
        let end = offset_seconds(pick.time, after);
        for component in letters.chars() {
            let stream = group.stream(component);
            debug!(stream = %stream, %start, %end, "Waveform request");
            planned.insert(
                stream.clone(),
                WaveformRequest { stream, start, end },
            );
        }
    }
    planned.into_values().collect()
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

/// Sort records by start time and drop records whose start and end equal
/// those of the previous one.
pub fn prepare(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    records.dedup_by(|next, prev| next.start == prev.start && next.end == prev.end);
    records
}

/// Whether consecutive records leave a gap or overlap larger than
/// `tolerance` seconds. Records must be prepared.
pub fn is_gappy(records: &[Record], tolerance: f64) -> bool {
    records
        .windows(2)
        .any(|pair| match pair {
            [prev, next] => seconds_between(next.start, prev.end).abs() > tolerance,
            _ => false,
        })
}

/// Prepare every stream and drop gappy streams.
pub fn drop_gappy_streams(
    waveforms: BTreeMap<WaveformStreamId, Vec<Record>>,
    tolerance: f64,
) -> BTreeMap<WaveformStreamId, Vec<Record>> {
    waveforms
        .into_iter()
        .filter_map(|(stream, records)| {
            let records = prepare(records);
            if is_gappy(&records, tolerance) {
                warn!(stream = %stream, "Gappy stream ignored");
                None
            } else {
                Some((stream, records))
            }
        })
        .collect()
}

/// Remove all streams of `(network, station, location)` groups with fewer
/// than three channels. Returns the removed stream IDs.
pub fn drop_incomplete_groups(
    waveforms: &mut BTreeMap<WaveformStreamId, Vec<Record>>,
) -> Vec<WaveformStreamId> {
    let mut groups: BTreeMap<(String, String, String), Vec<WaveformStreamId>> = BTreeMap::new();
    for stream in waveforms.keys() {
        groups
            .entry((
                stream.network_code.clone(),
                stream.station_code.clone(),
                stream.location_code.clone(),
            ))
            .or_default()
            .push(stream.clone());
    }

    let mut removed = Vec::new();
    for streams in groups.into_values() {
        if streams.len() >= MIN_COMPONENTS {
            continue;
        }
        for stream in streams {
            warn!(stream = %stream, "Incomplete stream ignored");
            waveforms.remove(&stream);
            removed.push(stream);
        }
    }
    removed
}

/// Test helpers for building miniSEED bytes.
#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Datelike, Timelike};

    use super::*;

    /// A big-endian 512-byte record with blockette 1000.
    #[allow(
        clippy::arithmetic_side_effects,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn mseed_record(stream: &str, start: DateTime<Utc>, samples: u16, rate: i16) -> Vec<u8> {
        let id = WaveformStreamId::parse(stream).unwrap_or_default();
        let mut bytes = vec![0_u8; DEFAULT_RECORD_LENGTH];
        let mut put = |offset: usize, value: &[u8]| {
            for (i, b) in value.iter().enumerate() {
                if let Some(slot) = bytes.get_mut(offset + i) {
                    *slot = *b;
                }
            }
        };
        put(0, b"000001D ");
        put(8, format!("{:<5}", id.station_code).as_bytes());
        put(13, format!("{:<2}", id.location_code).as_bytes());
        put(15, format!("{:<3}", id.channel_code).as_bytes());
        put(18, format!("{:<2}", id.network_code).as_bytes());
        put(20, &(start.year() as u16).to_be_bytes());
        put(22, &(start.ordinal() as u16).to_be_bytes());
        put(24, &[start.hour() as u8, start.minute() as u8, start.second() as u8, 0]);
        put(28, &((start.timestamp_subsec_micros() / 100) as u16).to_be_bytes());
        put(30, &samples.to_be_bytes());
        put(32, &rate.to_be_bytes());
        put(34, &1_i16.to_be_bytes());
        put(39, &[1]);
        put(44, &64_u16.to_be_bytes());
        put(46, &48_u16.to_be_bytes());
        put(48, &BLOCKETTE_1000.to_be_bytes());
        put(50, &0_u16.to_be_bytes());
        put(52, &[11, 1, 9, 0]);
        bytes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use repick_types::{EvaluationMode, PickId};

    use super::fixtures::mseed_record;
    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap()
    }

    fn record(stream: &str, start: f64, seconds: u16) -> Record {
        Record::parse(&mseed_record(stream, offset_seconds(t0(), start), seconds * 20, 20)).unwrap()
    }

    #[test]
    fn parses_fixed_header() {
        let bytes = mseed_record("GE.UGM..BHZ", offset_seconds(t0(), 1.5), 400, 20);
        let record = Record::parse(&bytes).unwrap();
        assert_eq!(record.stream.stream_key(), "GE.UGM.--.BHZ");
        assert_eq!(record.start, offset_seconds(t0(), 1.5));
        assert_eq!(record.end, offset_seconds(t0(), 21.5));
        assert!((record.sample_rate - 20.0).abs() < f64::EPSILON);
        assert_eq!(record.len(), 512);
    }

    #[test]
    fn splits_concatenated_records() {
        let mut bytes = mseed_record("GE.UGM..BHZ", t0(), 200, 20);
        bytes.extend(mseed_record("GE.UGM..BHN", t0(), 200, 20));
        let records = split_records(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(by_stream(records).len(), 2);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = mseed_record("GE.UGM..BHZ", t0(), 200, 20);
        let result = split_records(bytes.get(..300).unwrap());
        assert!(matches!(result, Err(WaveformError::Truncated { offset: 0 })));
    }

    #[test]
    fn sample_rate_follows_factor_and_multiplier() {
        assert!((sample_rate(20, 1) - 20.0).abs() < f64::EPSILON);
        assert!((sample_rate(1, -10) - 0.1).abs() < f64::EPSILON);
        assert!((sample_rate(-10, 1) - 0.1).abs() < f64::EPSILON);
        assert!((sample_rate(0, 1)).abs() < f64::EPSILON);
    }

    #[test]
    fn prepare_sorts_and_removes_duplicates() {
        let records = vec![
            record("GE.UGM..BHZ", 10.0, 10),
            record("GE.UGM..BHZ", 0.0, 10),
            record("GE.UGM..BHZ", 10.0, 10),
        ];
        let prepared = prepare(records);
        assert_eq!(prepared.len(), 2);
        assert!(prepared.first().unwrap().start < prepared.get(1).unwrap().start);
    }

    #[test]
    fn gap_tolerance_is_in_seconds() {
        let retained = vec![record("GE.UGM..BHZ", 0.0, 10), record("GE.UGM..BHZ", 10.99, 10)];
        assert!(!is_gappy(&retained, 1.0));
        let dropped = vec![record("GE.UGM..BHZ", 0.0, 10), record("GE.UGM..BHZ", 11.01, 10)];
        assert!(is_gappy(&dropped, 1.0));
    }

    #[test]
    fn incomplete_groups_are_removed() {
        let mut waveforms = by_stream(vec![
            record("GE.AAA..BHZ", 0.0, 10),
            record("GE.AAA..BHN", 0.0, 10),
            record("GE.BBB..BHZ", 0.0, 10),
            record("GE.BBB..BHN", 0.0, 10),
            record("GE.BBB..BHE", 0.0, 10),
        ]);
        let removed = drop_incomplete_groups(&mut waveforms);
        assert_eq!(removed.len(), 2);
        assert_eq!(waveforms.len(), 3);
        assert!(waveforms.keys().all(|s| s.station_code == "BBB"));
    }

    #[test]
    fn plans_one_window_per_component() {
        let pick = Pick {
            id: PickId::new("p1"),
            time: t0(),
            waveform_id: WaveformStreamId::new("GE", "UGM", "", "BH"),
            phase_hint: None,
            evaluation_mode: EvaluationMode::Manual,
            method_id: None,
            creation_info: None,
            comments: Vec::new(),
        };
        let components = BTreeMap::from([(StreamGroup::new("GE", "UGM", "", "BH"), "ZNE".to_owned())]);
        let requests = plan_requests([&pick], &components, |_| false, 60.0, 30.0);
        assert_eq!(requests.len(), 3);
        let first = requests.first().unwrap();
        assert_eq!(first.start, offset_seconds(t0(), -60.0));
        assert_eq!(first.end, offset_seconds(t0(), 30.0));

        let none = plan_requests([&pick], &components, |s| s.channel_code == "BHZ", 60.0, 30.0);
        assert!(none.is_empty());
    }
}
