//! Core domain types for the BrainCar pipeline
//!
//! Labels produced by the classifier stage, directives sent to the vehicle,
//! and the classification record that flows between them.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Mental-state labels
// ============================================================================

/// Mental-state label for one analysis window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Subject is concentrating
    Focused,
    /// Subject is not concentrating
    Unfocused,
    /// Large-amplitude eye-blink artifact (never produced by the classifier)
    Blink,
    /// Anything the model emitted that is not one of the above
    Unknown,
}

impl Label {
    /// Lowercase name, matching the class names models are trained with.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Focused => "focused",
            Self::Unfocused => "unfocused",
            Self::Blink => "blink",
            Self::Unknown => "unknown",
        }
    }

    /// Map a model class name onto a label.
    ///
    /// Matching is case-insensitive. Unrecognized names become
    /// [`Label::Unknown`] rather than an error so a foreign model still runs
    /// (and resolves to stop downstream).
    #[must_use]
    pub fn from_class_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "focused" | "focus" => Self::Focused,
            "unfocused" | "unfocus" => Self::Unfocused,
            "blink" => Self::Blink,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Label {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_class_name(s))
    }
}

// ============================================================================
// Vehicle directives
// ============================================================================

/// Control directive for the vehicle.
///
/// `Stop` is the fail-safe: unknown labels, unknown tokens and lost
/// connections all resolve to it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Directive {
    /// Drive forward
    Go,
    /// No motion
    #[default]
    Stop,
    /// Short right-turn maneuver, then straighten and halt
    TurnRight,
    /// Unrecognized input; actuated as stop
    Unknown,
}

impl Directive {
    /// Whether this directive results in any wheel motion.
    #[inline]
    #[must_use]
    pub const fn is_motion(self) -> bool {
        matches!(self, Self::Go | Self::TurnRight)
    }

    /// Resolve to something an actuator can execute (`Unknown` → `Stop`).
    #[inline]
    #[must_use]
    pub const fn resolve(self) -> Self {
        match self {
            Self::Unknown => Self::Stop,
            other => other,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Go => "GO",
            Self::Stop => "STOP",
            Self::TurnRight => "TURN_RIGHT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// What a blink should do to the vehicle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkAction {
    /// Run the right-turn maneuver
    #[default]
    TurnRight,
    /// Treat a blink as a stop (no maneuver)
    Stop,
}

impl BlinkAction {
    /// Directive a blink maps to.
    #[inline]
    #[must_use]
    pub const fn directive(self) -> Directive {
        match self {
            Self::TurnRight => Directive::TurnRight,
            Self::Stop => Directive::Stop,
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Where a classification came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Classifier inference on the feature vector
    Model,
    /// Amplitude override short-circuited the classifier
    AmplitudeOverride,
}

/// Result of classifying one window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Predicted label
    pub label: Label,
    /// Maximum class probability in `[0, 1]` (1.0 for overrides)
    pub confidence: f64,
    /// Where the label came from
    pub source: ClassificationSource,
}

impl Classification {
    /// Classification produced by the model.
    #[must_use]
    pub fn from_model(label: Label, confidence: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            source: ClassificationSource::Model,
        }
    }

    /// Blink produced by the amplitude override.
    #[must_use]
    pub fn blink() -> Self {
        Self {
            label: Label::Blink,
            confidence: 1.0,
            source: ClassificationSource::AmplitudeOverride,
        }
    }
}

/// One completed producer cycle, as published to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Index of the evaluated window since the pipeline started
    pub window_index: u64,
    /// Raw per-window classification
    pub classification: Classification,
    /// Majority-vote label after this window
    pub smoothed: Label,
    /// Directive derived from the smoothed label
    pub directive: Directive,
}
