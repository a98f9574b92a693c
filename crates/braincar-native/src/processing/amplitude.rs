//! Blink detection by peak amplitude
//!
//! Eye blinks swamp the EEG with a large, slow deflection. A window whose
//! peak absolute amplitude exceeds the threshold is labelled a blink before
//! the classifier ever sees it.

use braincar_core::types::Label;

/// Peak-amplitude blink override.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AmplitudeOverride {
    threshold: Option<f64>,
}

impl AmplitudeOverride {
    /// Override firing strictly above `threshold`.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold: Some(threshold) }
    }

    /// Override that never fires.
    #[must_use]
    pub fn disabled() -> Self {
        Self { threshold: None }
    }

    /// Build from an optional threshold.
    #[must_use]
    pub fn from_threshold(threshold: Option<f64>) -> Self {
        Self { threshold }
    }

    /// Configured threshold
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// `Some(Label::Blink)` if the window's peak exceeds the threshold.
    #[must_use]
    pub fn check(&self, window: &[f64]) -> Option<Label> {
        let threshold = self.threshold?;
        (peak_amplitude(window) > threshold).then_some(Label::Blink)
    }
}

/// Largest absolute sample value, 0 for an empty window.
#[must_use]
pub fn peak_amplitude(window: &[f64]) -> f64 {
    window.iter().fold(0.0_f64, |peak, s| peak.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_amplitude() {
        assert!((peak_amplitude(&[0.1, -0.3, 0.2]) - 0.3).abs() < f64::EPSILON);
        assert!(peak_amplitude(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fires_strictly_above() {
        let o = AmplitudeOverride::new(0.16);
        assert_eq!(o.check(&[0.0, 0.1, -0.15]), None);
        assert_eq!(o.check(&[0.0, 0.16]), None);
        assert_eq!(o.check(&[0.0, -0.2, 0.05]), Some(Label::Blink));
    }

    #[test]
    fn test_disabled_never_fires() {
        let o = AmplitudeOverride::disabled();
        assert_eq!(o.check(&[1e9]), None);
        assert_eq!(AmplitudeOverride::from_threshold(None), o);
    }
}
