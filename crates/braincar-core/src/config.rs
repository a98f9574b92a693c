//! Configuration for the BrainCar pipeline, channel and vehicle receiver.
//!
//! Every option has a default; a TOML file only needs the keys it changes.
//!
//! ```toml
//! [pipeline]
//! sampling_rate = 256.0
//! window_seconds = 1.0
//! features = "short_form"
//! smoothing_window = 5
//! amplitude_threshold = 0.16
//! evaluation = { mode = "sliding" }
//!
//! [channel]
//! endpoint = "172.20.10.2:5000"
//!
//! [receiver]
//! bind = "0.0.0.0:5000"
//! debounce_depth = 3
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::protocol::{LineFormat, WireFormat};
use crate::types::BlinkAction;

/// Default stabilizer for normalization and log features.
pub const DEFAULT_EPSILON: f64 = 1e-8;

// ============================================================================
// Frequency bands and feature sets
// ============================================================================

/// A named frequency band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Band name, referenced by feature definitions
    pub name: String,
    /// Lower edge in Hz (inclusive)
    pub low_hz: f64,
    /// Upper edge in Hz (inclusive)
    pub high_hz: f64,
}

impl Band {
    /// Create a band.
    #[must_use]
    pub fn new(name: &str, low_hz: f64, high_hz: f64) -> Self {
        Self { name: name.to_string(), low_hz, high_hz }
    }

    /// Delta, theta, alpha and beta.
    #[must_use]
    pub fn default_table() -> Vec<Self> {
        vec![
            Self::new("delta", 1.0, 4.0),
            Self::new("theta", 4.0, 8.0),
            Self::new("alpha", 8.0, 13.0),
            Self::new("beta", 13.0, 30.0),
        ]
    }
}

/// One entry of the feature vector, in output order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Absolute band power
    BandPower {
        /// Band name
        band: String,
    },
    /// `numerator / (denominator + epsilon)`
    Ratio {
        /// Numerator band name
        numerator: String,
        /// Denominator band name
        denominator: String,
        /// Additive stabilizer on the denominator
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
    /// Band power over total power of all bands (plus the set epsilon)
    Normalized {
        /// Band name
        band: String,
    },
    /// `ln(power + epsilon)`
    LogPower {
        /// Band name
        band: String,
    },
    /// Population variance of the window samples
    Variance,
}

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

impl FeatureKind {
    fn band_power(band: &str) -> Self {
        Self::BandPower { band: band.to_string() }
    }

    fn ratio(numerator: &str, denominator: &str, epsilon: f64) -> Self {
        Self::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            epsilon,
        }
    }

    /// Band names this feature depends on.
    #[must_use]
    pub fn bands(&self) -> Vec<&str> {
        match self {
            Self::BandPower { band } | Self::Normalized { band } | Self::LogPower { band } => {
                vec![band.as_str()]
            }
            Self::Ratio { numerator, denominator, .. } => {
                vec![numerator.as_str(), denominator.as_str()]
            }
            Self::Variance => Vec::new(),
        }
    }
}

/// Band table plus ordered feature list a classifier was trained against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Frequency bands to integrate
    pub bands: Vec<Band>,
    /// Output features, in vector order
    pub features: Vec<FeatureKind>,
    /// Stabilizer for total-power normalization and logs
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl FeatureSet {
    /// 15 features: 4 band powers, 3 ratios, 4 normalized, 4 log powers.
    #[must_use]
    pub fn long_form() -> Self {
        let names = ["delta", "theta", "alpha", "beta"];
        let mut features: Vec<FeatureKind> =
            names.iter().map(|b| FeatureKind::band_power(b)).collect();
        features.push(FeatureKind::ratio("theta", "alpha", DEFAULT_EPSILON));
        features.push(FeatureKind::ratio("alpha", "beta", DEFAULT_EPSILON));
        features.push(FeatureKind::ratio("theta", "beta", DEFAULT_EPSILON));
        features.extend(names.iter().map(|b| FeatureKind::Normalized { band: (*b).to_string() }));
        features.extend(names.iter().map(|b| FeatureKind::LogPower { band: (*b).to_string() }));

        Self { bands: Band::default_table(), features, epsilon: DEFAULT_EPSILON }
    }

    /// 7 features: 4 band powers, variance, alpha/beta, theta/beta.
    #[must_use]
    pub fn short_form() -> Self {
        let mut features: Vec<FeatureKind> = ["delta", "theta", "alpha", "beta"]
            .iter()
            .map(|b| FeatureKind::band_power(b))
            .collect();
        features.push(FeatureKind::Variance);
        features.push(FeatureKind::ratio("alpha", "beta", 1e-6));
        features.push(FeatureKind::ratio("theta", "beta", 1e-6));

        Self { bands: Band::default_table(), features, epsilon: DEFAULT_EPSILON }
    }

    /// Feature vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.features.len()
    }

    /// Index of a band in the table.
    #[must_use]
    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.bands.iter().position(|b| b.name == name)
    }

    /// Check band edges and that every feature refers to a known band.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.features.is_empty() {
            return Err(ConfigError::invalid("pipeline.features", "feature list is empty"));
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::invalid("pipeline.features.epsilon", "must be > 0"));
        }

        let mut seen = HashSet::new();
        for band in &self.bands {
            if !seen.insert(band.name.as_str()) {
                return Err(ConfigError::invalid(
                    "pipeline.features.bands",
                    format!("duplicate band {:?}", band.name),
                ));
            }
            if !(band.low_hz >= 0.0 && band.low_hz < band.high_hz) {
                return Err(ConfigError::invalid(
                    "pipeline.features.bands",
                    format!("band {:?} needs 0 <= low < high", band.name),
                ));
            }
        }

        for feature in &self.features {
            for name in feature.bands() {
                if self.band_index(name).is_none() {
                    return Err(ConfigError::invalid(
                        "pipeline.features.features",
                        format!("unknown band {name:?}"),
                    ));
                }
            }
            if let FeatureKind::Ratio { epsilon, .. } = feature {
                if !(*epsilon > 0.0) {
                    return Err(ConfigError::invalid(
                        "pipeline.features.features",
                        "ratio epsilon must be > 0",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Named feature-set presets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeaturePreset {
    /// See [`FeatureSet::long_form`]
    LongForm,
    /// See [`FeatureSet::short_form`]
    ShortForm,
}

/// Either a preset name or a full custom feature set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureSpec {
    /// `features = "long_form"`
    Preset(FeaturePreset),
    /// `[pipeline.features]` table
    Custom(FeatureSet),
}

impl FeatureSpec {
    /// Concrete feature set.
    #[must_use]
    pub fn resolve(&self) -> FeatureSet {
        match self {
            Self::Preset(FeaturePreset::LongForm) => FeatureSet::long_form(),
            Self::Preset(FeaturePreset::ShortForm) => FeatureSet::short_form(),
            Self::Custom(set) => set.clone(),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// When a full window is handed to feature extraction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvaluationPolicy {
    /// Every new sample once the window is full (lowest latency)
    #[default]
    Sliding,
    /// Once per window length of new samples (non-overlapping windows)
    Batched,
    /// Every `every` new samples once the window is full
    Hop {
        /// Samples between evaluations
        every: usize,
    },
}

impl EvaluationPolicy {
    /// Samples between evaluations for a window of `window_len`.
    #[must_use]
    pub fn stride(self, window_len: usize) -> usize {
        match self {
            Self::Sliding => 1,
            Self::Batched => window_len.max(1),
            Self::Hop { every } => every.max(1),
        }
    }
}

/// Linear mapping of raw ADC counts to roughly `[-1, 1]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdcNormalization {
    /// ADC reading that maps to zero
    pub center: f64,
    /// ADC distance that maps to one
    pub half_range: f64,
}

impl AdcNormalization {
    /// 10-bit ADC (0..=1023) centred at 512.
    pub const TEN_BIT: Self = Self { center: 512.0, half_range: 512.0 };

    /// Normalize one raw reading.
    #[inline]
    #[must_use]
    pub fn apply(self, raw: f64) -> f64 {
        (raw - self.center) / self.half_range
    }
}

/// Producer-side pipeline parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sample rate of the source in Hz
    pub sampling_rate: f64,
    /// Analysis window length in seconds
    pub window_seconds: f64,
    /// When full windows are evaluated
    pub evaluation: EvaluationPolicy,
    /// Feature set the classifier was trained against
    pub features: FeatureSpec,
    /// Majority-vote window K
    pub smoothing_window: usize,
    /// Peak amplitude above which a window is a blink (`None` disables)
    pub amplitude_threshold: Option<f64>,
    /// Optional raw-ADC normalization applied to every window
    pub normalization: Option<AdcNormalization>,
    /// Directive a blink maps to
    pub blink_action: BlinkAction,
    /// Token vocabulary on the wire
    pub wire_format: WireFormat,
}

/// Longest window accepted, in seconds.
pub const MAX_WINDOW_SECONDS: f64 = 60.0;

/// Longest window accepted, in samples.
pub const MAX_WINDOW_SAMPLES: usize = 1 << 20;

impl PipelineConfig {
    /// 256 Hz, 1 s windows, 7 features, blink override at 0.16 after
    /// 10-bit normalization.
    #[must_use]
    pub fn short_form_profile() -> Self {
        Self {
            sampling_rate: 256.0,
            window_seconds: 1.0,
            evaluation: EvaluationPolicy::Sliding,
            features: FeatureSpec::Preset(FeaturePreset::ShortForm),
            smoothing_window: 5,
            amplitude_threshold: Some(0.16),
            normalization: Some(AdcNormalization::TEN_BIT),
            blink_action: BlinkAction::TurnRight,
            wire_format: WireFormat::Directives,
        }
    }

    /// 10 Hz, 2 s windows, 15 features, no blink override.
    #[must_use]
    pub fn long_form_profile() -> Self {
        Self {
            sampling_rate: 10.0,
            window_seconds: 2.0,
            features: FeatureSpec::Preset(FeaturePreset::LongForm),
            amplitude_threshold: None,
            normalization: None,
            ..Self::short_form_profile()
        }
    }

    /// Window length W in samples.
    #[must_use]
    pub fn window_len(&self) -> usize {
        let len = (self.sampling_rate * self.window_seconds).round();
        if len.is_finite() && len > 0.0 {
            len as usize
        } else {
            0
        }
    }

    /// Validate ranges and the feature set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first out-of-range option.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.sampling_rate > 0.0 && self.sampling_rate.is_finite()) {
            return Err(ConfigError::invalid("pipeline.sampling_rate", "must be a positive number"));
        }
        let samples = self.sampling_rate * self.window_seconds;
        if !(self.window_seconds <= MAX_WINDOW_SECONDS && samples <= MAX_WINDOW_SAMPLES as f64) {
            return Err(ConfigError::invalid(
                "pipeline.window_seconds",
                format!(
                    "window must span at most {MAX_WINDOW_SECONDS} s and {MAX_WINDOW_SAMPLES} samples"
                ),
            ));
        }
        if self.window_len() < 2 {
            return Err(ConfigError::invalid(
                "pipeline.window_seconds",
                format!("window must hold at least 2 samples, got {}", self.window_len()),
            ));
        }
        if self.smoothing_window == 0 {
            return Err(ConfigError::invalid("pipeline.smoothing_window", "must be >= 1"));
        }
        if let EvaluationPolicy::Hop { every: 0 } = self.evaluation {
            return Err(ConfigError::invalid("pipeline.evaluation.every", "must be >= 1"));
        }
        if let Some(threshold) = self.amplitude_threshold {
            if !(threshold > 0.0) {
                return Err(ConfigError::invalid("pipeline.amplitude_threshold", "must be > 0"));
            }
        }
        if let Some(norm) = self.normalization {
            if norm.half_range == 0.0 || !norm.half_range.is_finite() {
                return Err(ConfigError::invalid(
                    "pipeline.normalization.half_range",
                    "must be finite and non-zero",
                ));
            }
        }
        self.features.resolve().validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::short_form_profile()
    }
}

// ============================================================================
// Sample source
// ============================================================================

/// Where samples are read from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Serial port (requires the `usb` feature)
    Serial,
    /// Recorded text file
    File,
    /// Standard input
    #[default]
    Stdin,
}

/// Sample source parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source kind
    pub kind: SourceKind,
    /// Serial port path
    pub port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// File path for [`SourceKind::File`]
    pub path: Option<PathBuf>,
    /// Line layout
    pub line_format: LineFormat,
    /// Delay between samples when replaying a file
    pub pace_ms: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Stdin,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            path: None,
            line_format: LineFormat::Value,
            pace_ms: None,
        }
    }
}

// ============================================================================
// Command channel (sender side)
// ============================================================================

/// How the sender retries after losing the vehicle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Attempts per outage before giving up (0 = never reconnect)
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, delay_ms: 2000 }
    }
}

/// Sender-side channel parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Vehicle address, `host:port`
    pub endpoint: String,
    /// Bound on a single connect attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// Reconnection policy
    pub reconnect: ReconnectPolicy,
    /// Directives buffered between producer and channel task
    pub queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5000".to_string(),
            connect_timeout_ms: 3000,
            reconnect: ReconnectPolicy::default(),
            queue_depth: 64,
        }
    }
}

// ============================================================================
// Vehicle receiver
// ============================================================================

/// Right-turn maneuver parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnManeuver {
    /// Steering servo angle in degrees (positive = right)
    pub steer_angle_deg: i16,
    /// Wheel speed during the turn (0-100)
    pub speed: u8,
    /// Turn duration in milliseconds
    pub duration_ms: u64,
}

impl Default for TurnManeuver {
    fn default() -> Self {
        Self { steer_angle_deg: 35, speed: 30, duration_ms: 400 }
    }
}

/// Vehicle-side receiver parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Listen address
    pub bind: String,
    /// Debounce depth N
    pub debounce_depth: usize,
    /// Force stop after this long without a token (`None` disables)
    pub command_timeout_ms: Option<u64>,
    /// Forward speed for `GO` (0-100)
    pub drive_speed: u8,
    /// Maneuver for `TURN_RIGHT`
    pub turn: TurnManeuver,
    /// Exit after the first session instead of accepting again
    pub accept_once: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            debounce_depth: 3,
            command_timeout_ms: Some(3000),
            drive_speed: 40,
            turn: TurnManeuver::default(),
            accept_once: false,
        }
    }
}

impl ReceiverConfig {
    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first out-of-range option.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.debounce_depth == 0 {
            return Err(ConfigError::invalid("receiver.debounce_depth", "must be >= 1"));
        }
        if self.command_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("receiver.command_timeout_ms", "must be > 0"));
        }
        if self.drive_speed > 100 || self.turn.speed > 100 {
            return Err(ConfigError::invalid("receiver.drive_speed", "speeds are 0-100"));
        }
        Ok(())
    }
}

// ============================================================================
// Top level
// ============================================================================

/// Complete configuration file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BraincarConfig {
    /// Producer pipeline
    pub pipeline: PipelineConfig,
    /// Sample source
    pub source: SourceConfig,
    /// Command channel
    pub channel: ChannelConfig,
    /// Vehicle receiver
    pub receiver: ReceiverConfig,
}

impl BraincarConfig {
    /// Parse a TOML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.pipeline.validate()?;
        self.receiver.validate()?;
        if self.channel.queue_depth == 0 {
            return Err(ConfigError::invalid("channel.queue_depth", "must be >= 1"));
        }
        Ok(())
    }
}
