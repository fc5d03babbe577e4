//! File-based exchange with the external re-picker.
//!
//! Layout below the working directory:
//!
//! - `events/<eventID>/waveforms/<N.S.L.C>.mseed` raw records per stream
//! - `events/<eventID>/in/<timestamp>.yaml` manifest of picks to refine
//! - `spool/<timestamp>.yaml` symlink to a manifest not yet processed
//! - `outgoing/*.yaml` result files written by the picker
//! - `sent/` result files moved here after publication
//!
//! A result file is moved to `sent/` only after it was published, so a
//! failed publication is retried on the next poll.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use repick_types::{EventId, Pick, WaveformStreamId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::workspace::EventWorkspace;

/// Errors from reading or writing the exchange directories.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// A filesystem operation failed.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was attempted.
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A manifest could not be serialized.
    #[error("failed to serialize manifest: {source}")]
    Yaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> HandoffError {
    let path = path.to_path_buf();
    move |source| HandoffError::Io {
        action,
        path,
        source,
    }
}

/// One pick in a work manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Pick ID.
    #[serde(rename = "publicID")]
    pub public_id: String,
    /// Network code.
    pub network_code: String,
    /// Station code.
    pub station_code: String,
    /// Location code, `--` for empty.
    pub location_code: String,
    /// Channel code.
    pub channel_code: String,
    /// Pick time, RFC 3339.
    pub time: String,
    /// Phase hint.
    pub phase_hint: String,
    /// Dotted stream key of the vertical component.
    #[serde(rename = "streamID")]
    pub stream_id: String,
}

impl ManifestEntry {
    /// Manifest entry for `pick`.
    pub fn from_pick(pick: &Pick) -> Self {
        let stream = pick.waveform_id.with_vertical();
        Self {
            public_id: pick.id.to_string(),
            network_code: stream.network_code.clone(),
            station_code: stream.station_code.clone(),
            location_code: stream.location_or_dashes().to_owned(),
            channel_code: stream.channel_code.clone(),
            time: pick
                .time
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            phase_hint: pick
                .phase_hint
                .clone()
                .unwrap_or_else(|| repick_types::PHASE_P.to_owned()),
            stream_id: stream.stream_key(),
        }
    }
}

/// What one export wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Waveform files written.
    pub waveform_files: usize,
    /// Manifest written, if any picks were new.
    pub manifest: Option<PathBuf>,
}

/// The exchange directories below one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    events: PathBuf,
    spool: PathBuf,
    outgoing: PathBuf,
    sent: PathBuf,
}

impl Handoff {
    /// Exchange directories below `working_dir`.
    pub fn new(working_dir: &Path) -> Self {
        Self {
            events: working_dir.join("events"),
            spool: working_dir.join("spool"),
            outgoing: working_dir.join("outgoing"),
            sent: working_dir.join("sent"),
        }
    }

    /// Create all directories.
    pub fn create_dirs(&self) -> Result<(), HandoffError> {
        for dir in [&self.events, &self.spool, &self.outgoing, &self.sent] {
            std::fs::create_dir_all(dir).map_err(io_error("create", dir))?;
        }
        Ok(())
    }

    /// Directory holding results written by the picker.
    pub fn outgoing_dir(&self) -> &Path {
        &self.outgoing
    }

    /// Directory holding published result files.
    pub fn sent_dir(&self) -> &Path {
        &self.sent
    }

    /// Directory holding pending manifest links.
    pub fn spool_dir(&self) -> &Path {
        &self.spool
    }

    /// Directory of one event.
    pub fn event_dir(&self, event_id: &EventId) -> PathBuf {
        self.events.join(event_id.as_str())
    }

    /// Waveform file of one stream of an event.
    pub fn waveform_path(&self, event_id: &EventId, stream: &WaveformStreamId) -> PathBuf {
        self.event_dir(event_id)
            .join("waveforms")
            .join(format!("{}.mseed", stream.stream_key()))
    }

    /// Whether the waveform file of `stream` was already written.
    pub fn has_waveform(&self, event_id: &EventId, stream: &WaveformStreamId) -> bool {
        self.waveform_path(event_id, stream).exists()
    }

    /// Write the workspace's waveforms and, when it has new picks, a
    /// manifest plus its spool link. Existing waveform files are kept.
    pub fn export(
        &self,
        event_id: &EventId,
        workspace: &EventWorkspace,
        now: DateTime<Utc>,
    ) -> Result<ExportSummary, HandoffError> {
        let mut summary = ExportSummary::default();

        let waveform_dir = self.event_dir(event_id).join("waveforms");
        std::fs::create_dir_all(&waveform_dir).map_err(io_error("create", &waveform_dir))?;
        for (stream, records) in &workspace.waveforms {
            let path = self.waveform_path(event_id, stream);
            if path.exists() {
                continue;
            }
            let bytes: Vec<u8> = records.iter().flat_map(|r| r.data.iter().copied()).collect();
            std::fs::write(&path, bytes).map_err(io_error("write", &path))?;
            summary.waveform_files = summary.waveform_files.saturating_add(1);
        }

        if !workspace.new_picks.is_empty() {
            let entries: Vec<ManifestEntry> = workspace
                .new_picks
                .values()
                .map(ManifestEntry::from_pick)
                .collect();
            let in_dir = self.event_dir(event_id).join("in");
            std::fs::create_dir_all(&in_dir).map_err(io_error("create", &in_dir))?;
            let name = format!("{}.yaml", now.format("%Y%m%d-%H%M%S-%6f"));
            let manifest = in_dir.join(&name);
            std::fs::write(&manifest, serde_yml::to_string(&entries)?)
                .map_err(io_error("write", &manifest))?;
            let link = self.spool.join(&name);
            link_manifest(&manifest, &link)?;
            info!(
                event_id = %event_id,
                picks = entries.len(),
                manifest = %manifest.display(),
                "Work item exported"
            );
            summary.manifest = Some(manifest);
        }

        debug!(
            event_id = %event_id,
            waveform_files = summary.waveform_files,
            "Workspace exported"
        );
        Ok(summary)
    }

    /// Result files in `outgoing/`, in name order.
    pub fn poll_outgoing(&self) -> Result<Vec<PathBuf>, HandoffError> {
        let entries = std::fs::read_dir(&self.outgoing).map_err(io_error("list", &self.outgoing))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Move a published result file to `sent/`.
    pub fn mark_sent(&self, path: &Path) -> Result<PathBuf, HandoffError> {
        let name = path.file_name().unwrap_or(path.as_os_str());
        let target = self.sent.join(name);
        std::fs::rename(path, &target).map_err(io_error("rename", path))?;
        debug!(from = %path.display(), to = %target.display(), "Result file moved to sent");
        Ok(target)
    }
}

#[cfg(unix)]
fn link_manifest(manifest: &Path, link: &Path) -> Result<(), HandoffError> {
    let target = std::fs::canonicalize(manifest).map_err(io_error("resolve", manifest))?;
    std::os::unix::fs::symlink(target, link).map_err(io_error("link", link))
}

#[cfg(not(unix))]
fn link_manifest(manifest: &Path, link: &Path) -> Result<(), HandoffError> {
    std::fs::copy(manifest, link)
        .map(|_| ())
        .map_err(io_error("copy", link))
}
