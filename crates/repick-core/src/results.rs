//! Reading re-picker result files.
//!
//! The external picker writes a YAML list per work item. Each entry refers
//! to the pick it was asked to refine (`publicID`) and carries the refined
//! time, stream, model name, and confidence.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use repick_types::time::pick_id_timestamp;
use repick_types::{Comment, EvaluationMode, PHASE_P, Pick, PickId, WaveformStreamId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Method tag stored on every re-picked pick.
pub const RESULT_METHOD: &str = "DL";

/// Comment ID carrying the model name.
pub const MODEL_COMMENT: &str = "dlmodel";

/// Comment ID carrying the confidence.
pub const CONFIDENCE_COMMENT: &str = "confidence";

/// Errors from reading a result file.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    /// The file could not be read.
    #[error("failed to read results file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The file is not a valid result list.
    #[error("failed to parse results file: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },
}

/// One entry of a result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepickResult {
    /// ID of the pick that was refined.
    #[serde(rename = "publicID")]
    pub public_id: PickId,
    /// Refined arrival time.
    pub time: DateTime<Utc>,
    /// Network code.
    pub network_code: String,
    /// Station code.
    pub station_code: String,
    /// Location code, `--` for empty.
    #[serde(default)]
    pub location_code: String,
    /// Channel code, possibly only band and instrument.
    pub channel_code: String,
    /// Name of the picking model.
    pub model: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Three-letter method tag for a model name.
pub fn method_tag(model: &str) -> &'static str {
    match model.to_lowercase().as_str() {
        "eqt" | "eqtransformer" => "EQT",
        "phn" | "phasenet" => "PHN",
        _ => "XYZ",
    }
}

impl RepickResult {
    /// Stream of the result, completed to the vertical component.
    pub fn stream(&self) -> WaveformStreamId {
        WaveformStreamId::new(
            &*self.network_code,
            &*self.station_code,
            &*self.location_code,
            &*self.channel_code,
        )
        .with_vertical()
    }

    /// ID of the pick built from this result:
    /// `YYYYMMDD.HHMMSS.ff-<MTH>-N.S.L.CC`.
    pub fn pick_id(&self) -> PickId {
        PickId::new(format!(
            "{}-{}-{}",
            pick_id_timestamp(self.time),
            method_tag(&self.model),
            self.stream().group()
        ))
    }

    /// The automatic `P` pick carrying this result.
    pub fn to_pick(&self) -> Pick {
        Pick {
            id: self.pick_id(),
            time: self.time,
            waveform_id: self.stream(),
            phase_hint: Some(PHASE_P.to_owned()),
            evaluation_mode: EvaluationMode::Automatic,
            method_id: Some(RESULT_METHOD.to_owned()),
            creation_info: None,
            comments: vec![
                Comment {
                    id: MODEL_COMMENT.to_owned(),
                    text: self.model.clone(),
                },
                Comment {
                    id: CONFIDENCE_COMMENT.to_owned(),
                    text: format!("{:.3}", self.confidence),
                },
            ],
        }
    }
}

/// Picks built from one result file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepickBatch {
    /// New picks keyed by their ID.
    pub picks: BTreeMap<PickId, Pick>,
    /// ID of the refined pick for each new pick.
    pub originals: BTreeMap<PickId, PickId>,
}

impl RepickBatch {
    /// Returns `true` when the batch holds no pick.
    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    /// Number of picks.
    pub fn len(&self) -> usize {
        self.picks.len()
    }
}

/// Build picks from parsed results. Results below `min_confidence` are
/// dropped; of several results mapping to the same pick ID the one with
/// the highest confidence is kept.
pub fn build_batch(results: &[RepickResult], min_confidence: f64) -> RepickBatch {
    let mut best: BTreeMap<PickId, &RepickResult> = BTreeMap::new();
    for result in results {
        if result.confidence < min_confidence {
            debug!(
                pick_id = %result.public_id,
                confidence = result.confidence,
                "Result below confidence threshold"
            );
            continue;
        }
        let id = result.pick_id();
        match best.get(&id) {
            Some(kept) if result.confidence <= kept.confidence => {}
            _ => {
                best.insert(id, result);
            }
        }
    }

    let mut batch = RepickBatch::default();
    for (id, result) in best {
        batch.originals.insert(id.clone(), result.public_id.clone());
        batch.picks.insert(id, result.to_pick());
    }
    batch
}

/// Parse a YAML result list.
pub fn parse_results(contents: &str) -> Result<Vec<RepickResult>, ResultsError> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yml::from_str(contents)?)
}

/// Read a result file and build its picks.
pub fn read_results(path: &Path, min_confidence: f64) -> Result<RepickBatch, ResultsError> {
    let contents = std::fs::read_to_string(path)?;
    let results = parse_results(&contents)?;
    let batch = build_batch(&results, min_confidence);
    debug!(
        path = %path.display(),
        entries = results.len(),
        picks = batch.len(),
        "Results read"
    );
    Ok(batch)
}
