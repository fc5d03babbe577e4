//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `repick-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure and a
//! loader that reads the file. Every field has a default, so an empty file
//! is a valid configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use repick_types::StreamGroup;
use serde::Deserialize;
use tracing::warn;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is present but unusable.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `repick-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepickConfig {
    /// Settings shared by all programs.
    #[serde(default)]
    pub common: CommonConfig,

    /// Repicking workflow settings.
    #[serde(default)]
    pub picking: PickingConfig,

    /// Association and relocation settings.
    #[serde(default)]
    pub relocation: RelocationConfig,

    /// Real-time client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Streams configured for picking, as `NET.STA.LOC.CC` (`--` for an
    /// empty location).
    #[serde(default)]
    pub streams: Vec<String>,

    /// Infrastructure connection strings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RepickConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NATS_URL` overrides `infrastructure.nats_url`
    /// - `FDSNWS_URL` overrides `infrastructure.fdsnws_url`
    /// - `REPICK_WORKING_DIR` overrides `common.working_dir`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. Environment overrides are
    /// not applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Override infrastructure settings with environment variables when
    /// set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.infrastructure.nats_url = val;
        }
        if let Ok(val) = std::env::var("FDSNWS_URL") {
            self.infrastructure.fdsnws_url = val;
        }
        if let Ok(val) = std::env::var("REPICK_WORKING_DIR") {
            self.common.working_dir = PathBuf::from(val);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("relocation.max_residual", self.relocation.max_residual),
            ("relocation.max_rms", self.relocation.max_rms),
            ("relocation.max_delta", self.relocation.max_delta),
            ("client.gap_tolerance", self.client.gap_tolerance),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field: field.to_owned(),
                    reason: format!("must be positive, got {value}"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.picking.min_confidence) {
            return Err(ConfigError::Invalid {
                field: "picking.min_confidence".to_owned(),
                reason: "must be within [0, 1]".to_owned(),
            });
        }
        Ok(())
    }

    /// The configured picking streams as station/channel groups. Malformed
    /// entries are skipped with a warning.
    pub fn configured_streams(&self) -> BTreeSet<StreamGroup> {
        self.streams
            .iter()
            .filter_map(|entry| {
                let group = StreamGroup::parse(entry);
                if group.is_none() {
                    warn!(entry = %entry, "Ignoring malformed stream entry");
                }
                group
            })
            .collect()
    }
}

/// Settings shared by all programs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommonConfig {
    /// Root of the working directory tree (`events/`, `spool/`,
    /// `outgoing/`, `sent/`).
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Velocity model for travel-time predictions.
    #[serde(default = "default_earth_model")]
    pub earth_model: String,

    /// Stations excluded from waveform requests, as `NET.STA`.
    #[serde(default)]
    pub station_blacklist: Vec<String>,
}

impl CommonConfig {
    /// The blacklist as `(network, station)` pairs. Entries without a dot
    /// are ignored.
    pub fn blacklist_pairs(&self) -> Vec<(String, String)> {
        self.station_blacklist
            .iter()
            .filter_map(|entry| {
                let (net, sta) = entry.split_once('.')?;
                Some((net.to_owned(), sta.to_owned()))
            })
            .collect()
    }
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            earth_model: default_earth_model(),
            station_blacklist: Vec::new(),
        }
    }
}

/// Repicking workflow settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PickingConfig {
    /// Seconds of waveform requested before each pick.
    #[serde(default = "default_window_seconds")]
    pub before_p: f64,

    /// Seconds of waveform requested after each pick.
    #[serde(default = "default_window_seconds")]
    pub after_p: f64,

    /// Whether to synthesize predicted picks for unpicked stations.
    #[serde(default = "default_true")]
    pub try_unpicked_stations: bool,

    /// Whether manual picks are submitted for repicking.
    #[serde(default)]
    pub repick_manual_picks: bool,

    /// Repick results below this confidence are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Author stamped on published repicks; picks by this author are
    /// recognized as repick products.
    #[serde(default = "default_pick_author")]
    pub pick_author: String,

    /// Messaging group repicks are published to.
    #[serde(default = "default_target_group")]
    pub target_group: String,

    /// Name of the picker model, recorded in the workspace manifest.
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            before_p: default_window_seconds(),
            after_p: default_window_seconds(),
            try_unpicked_stations: true,
            repick_manual_picks: false,
            min_confidence: default_min_confidence(),
            pick_author: default_pick_author(),
            target_group: default_target_group(),
            model_name: default_model_name(),
        }
    }
}

/// A rectangular region in which origins are relocated at a fixed depth.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixedDepthRegion {
    /// Southern boundary in degrees.
    pub min_latitude: f64,
    /// Northern boundary in degrees.
    pub max_latitude: f64,
    /// Western boundary in degrees.
    pub min_longitude: f64,
    /// Eastern boundary in degrees.
    pub max_longitude: f64,
    /// Depth in km.
    pub depth: f64,
}

impl FixedDepthRegion {
    /// Whether the point lies inside the region (boundaries included).
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

/// Association and relocation settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelocationConfig {
    /// Minimum hypocentre depth in km.
    #[serde(default = "default_min_depth")]
    pub min_depth: f64,

    /// Residual ceiling in seconds for association and relocation.
    #[serde(default = "default_max_residual")]
    pub max_residual: f64,

    /// RMS ceiling in seconds for accepting a relocation.
    #[serde(default = "default_max_rms")]
    pub max_rms: f64,

    /// Largest station distance in degrees.
    #[serde(default = "default_max_delta")]
    pub max_delta: f64,

    /// Authors whose picks are used for relocation.
    #[serde(default = "default_pick_authors")]
    pub pick_authors: Vec<String>,

    /// Seconds after origin time before an event is relocated.
    #[serde(default = "default_min_delay")]
    pub min_delay: f64,

    /// Minimum number of arrivals of a relocation worth publishing.
    #[serde(default = "default_min_arrivals")]
    pub min_arrivals: usize,

    /// Author stamped on relocated origins.
    #[serde(default = "default_relocator_author")]
    pub author: String,

    /// Agency stamped on relocated origins.
    #[serde(default = "default_agency")]
    pub agency: String,

    /// Depth in km assumed when no better information exists.
    #[serde(default = "default_min_depth")]
    pub default_depth: f64,

    /// Regions relocated at a fixed depth.
    #[serde(default = "default_fixed_depth_regions")]
    pub fixed_depth_regions: Vec<FixedDepthRegion>,
}

impl RelocationConfig {
    /// Fixed depth of the first region containing the point.
    pub fn region_depth(&self, latitude: f64, longitude: f64) -> Option<f64> {
        self.fixed_depth_regions
            .iter()
            .find(|r| r.contains(latitude, longitude))
            .map(|r| r.depth)
    }
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            min_depth: default_min_depth(),
            max_residual: default_max_residual(),
            max_rms: default_max_rms(),
            max_delta: default_max_delta(),
            pick_authors: default_pick_authors(),
            min_delay: default_min_delay(),
            min_arrivals: default_min_arrivals(),
            author: default_relocator_author(),
            agency: default_agency(),
            default_depth: default_min_depth(),
            fixed_depth_regions: default_fixed_depth_regions(),
        }
    }
}

/// Real-time client settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Origins with picks by these authors are not considered.
    #[serde(default)]
    pub ignored_authors: Vec<String>,

    /// Origins from these agencies are skipped.
    #[serde(default)]
    pub ignored_agencies: Vec<String>,

    /// Agencies whose origins are processed even without arrivals.
    #[serde(default)]
    pub empty_origin_agencies: Vec<String>,

    /// Whether manual origins are processed.
    #[serde(default = "default_true")]
    pub process_manual_origins: bool,

    /// Waveform request timeout in seconds.
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,

    /// Period of the control-loop timer in milliseconds.
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,

    /// Hours after origin time before a workspace is evicted.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Largest tolerated timing gap between records, in seconds.
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance: f64,

    /// Agency stamped on published repicks.
    #[serde(default = "default_agency")]
    pub agency: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ignored_authors: Vec::new(),
            ignored_agencies: Vec::new(),
            empty_origin_agencies: Vec::new(),
            process_manual_origins: true,
            stream_timeout_secs: default_stream_timeout_secs(),
            timer_interval_ms: default_timer_interval_ms(),
            retention_hours: default_retention_hours(),
            gap_tolerance: default_gap_tolerance(),
            agency: default_agency(),
        }
    }
}

/// Infrastructure connection strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS messaging URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Base URL of the FDSN web services host.
    #[serde(default = "default_fdsnws_url")]
    pub fdsnws_url: String,

    /// Station inventory file (JSON or YAML).
    #[serde(default = "default_inventory_path")]
    pub inventory_path: PathBuf,

    /// Subject prefix for inbound and outbound catalog messages.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            fdsnws_url: default_fdsnws_url(),
            inventory_path: default_inventory_path(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp/repick")
}

fn default_earth_model() -> String {
    "iasp91".to_owned()
}

const fn default_window_seconds() -> f64 {
    60.0
}

const fn default_min_confidence() -> f64 {
    0.4
}

fn default_pick_author() -> String {
    "dlpicker".to_owned()
}

fn default_target_group() -> String {
    "MLTEST".to_owned()
}

fn default_model_name() -> String {
    "eqtransformer".to_owned()
}

const fn default_min_depth() -> f64 {
    10.0
}

const fn default_max_residual() -> f64 {
    2.5
}

const fn default_max_rms() -> f64 {
    1.7
}

const fn default_max_delta() -> f64 {
    105.0
}

fn default_pick_authors() -> Vec<String> {
    vec!["dlpicker".to_owned()]
}

const fn default_min_delay() -> f64 {
    1200.0
}

const fn default_min_arrivals() -> usize {
    5
}

fn default_relocator_author() -> String {
    "dl-reloc".to_owned()
}

fn default_agency() -> String {
    "GFZ".to_owned()
}

fn default_fixed_depth_regions() -> Vec<FixedDepthRegion> {
    // Induced seismicity in the SW Poland copper mining district.
    vec![FixedDepthRegion {
        min_latitude: 50.0,
        max_latitude: 52.0,
        min_longitude: 15.0,
        max_longitude: 20.0,
        depth: 1.0,
    }]
}

const fn default_stream_timeout_secs() -> u64 {
    5
}

const fn default_timer_interval_ms() -> u64 {
    1000
}

const fn default_retention_hours() -> u64 {
    30
}

const fn default_gap_tolerance() -> f64 {
    1.0
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_fdsnws_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_inventory_path() -> PathBuf {
    PathBuf::from("inventory.yaml")
}

fn default_subject_prefix() -> String {
    "repick".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}
