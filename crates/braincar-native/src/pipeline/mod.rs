//! Producer pipeline
//!
//! One sample in, at most one [`CycleReport`] out:
//!
//! ```text
//! sample ─► normalize ─► WindowBuffer ─► amplitude override ─┐
//!                                    └─► features ─► model ──┴─► smoother ─► mapper
//! ```
//!
//! The [`Pipeline`] owns every piece of per-session state. Nothing here is
//! shared between threads; [`producer`] drives it from a blocking task and
//! publishes the results.

pub mod mapper;
pub mod producer;

use thiserror::Error;

use braincar_core::config::{AdcNormalization, PipelineConfig};
use braincar_core::error::ConfigError;
use braincar_core::filter::MajorityFilter;
use braincar_core::protocol::{encode_token, WireFormat};
use braincar_core::types::{Classification, CycleReport, Label};

use crate::ml::{Classifier, ClassifierError, FeatureExtractor};
use crate::processing::{AmplitudeOverride, WindowBuffer, WindowSnapshot};

pub use mapper::CommandMapper;
pub use producer::{run_producer, ProducerExit, RunFlag};

/// Errors building a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Feature set and model disagree on the vector length
    #[error("Feature set produces {features} features but the model expects {model}")]
    DimensionMismatch {
        /// Extractor output length
        features: usize,
        /// Classifier input length
        model: usize,
    },
}

/// Counters for one pipeline session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Samples pushed
    pub samples: u64,
    /// Windows evaluated
    pub windows: u64,
    /// Windows labelled by the amplitude override
    pub overrides: u64,
    /// Windows the classifier rejected
    pub rejected: u64,
}

/// Per-session producer state.
pub struct Pipeline {
    window: WindowBuffer,
    normalization: Option<AdcNormalization>,
    amplitude: AmplitudeOverride,
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    smoother: MajorityFilter<Label>,
    mapper: CommandMapper,
    wire_format: WireFormat,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build a pipeline around a trained classifier.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] for an invalid configuration and
    /// [`PipelineError::DimensionMismatch`] when the model was trained on a
    /// different feature set.
    pub fn new(config: &PipelineConfig, classifier: Box<dyn Classifier>) -> Result<Self, PipelineError> {
        config.validate()?;

        let extractor = FeatureExtractor::new(&config.features.resolve(), config.sampling_rate)?;
        if extractor.dimension() != classifier.dimension() {
            return Err(PipelineError::DimensionMismatch {
                features: extractor.dimension(),
                model: classifier.dimension(),
            });
        }

        tracing::info!(
            sampling_rate = config.sampling_rate,
            window = config.window_len(),
            features = extractor.dimension(),
            smoothing = config.smoothing_window,
            threshold = ?config.amplitude_threshold,
            "Pipeline ready"
        );

        Ok(Self {
            window: WindowBuffer::new(config.window_len(), config.evaluation),
            normalization: config.normalization,
            amplitude: AmplitudeOverride::from_threshold(config.amplitude_threshold),
            extractor,
            classifier,
            smoother: MajorityFilter::new(config.smoothing_window),
            mapper: CommandMapper::new(config.blink_action),
            wire_format: config.wire_format,
            stats: PipelineStats::default(),
        })
    }

    /// Push one raw sample.
    ///
    /// Returns a report when the sample completed an evaluation point and the
    /// window could be classified. A window the classifier rejects produces
    /// no report and leaves the smoother untouched.
    pub fn push_sample(&mut self, raw: f64) -> Option<CycleReport> {
        self.stats.samples += 1;
        let sample = self.normalization.map_or(raw, |n| n.apply(raw));
        let snapshot = self.window.push(sample)?;
        self.evaluate(&snapshot)
    }

    /// Classify, smooth and map one full window.
    pub fn evaluate(&mut self, snapshot: &WindowSnapshot) -> Option<CycleReport> {
        self.stats.windows += 1;
        let classification = match self.classify(snapshot.samples()) {
            Ok(c) => c,
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(window = snapshot.index(), "Classifier rejected window: {}", e);
                return None;
            }
        };

        let smoothed = self.smoother.smooth(classification.label);
        let directive = self.mapper.map(smoothed);
        tracing::debug!(
            window = snapshot.index(),
            raw = %classification.label,
            confidence = classification.confidence,
            smoothed = %smoothed,
            directive = %directive,
            "Cycle"
        );

        Some(CycleReport { window_index: snapshot.index(), classification, smoothed, directive })
    }

    /// Override first, model only when the override stays quiet.
    fn classify(&mut self, window: &[f64]) -> Result<Classification, ClassifierError> {
        if self.amplitude.check(window).is_some() {
            self.stats.overrides += 1;
            return Ok(Classification::blink());
        }
        let features = self.extractor.extract(window);
        let prediction = self.classifier.predict(features.as_slice())?;
        Ok(Classification::from_model(prediction.label, prediction.confidence))
    }

    /// Wire token for a report under the configured vocabulary.
    #[must_use]
    pub fn token(&self, report: &CycleReport) -> &'static str {
        encode_token(self.wire_format, report.smoothed, report.directive)
    }

    /// Session counters
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Forget buffered samples and label history.
    pub fn reset(&mut self) {
        self.window.clear();
        self.smoother.reset();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use braincar_core::config::EvaluationPolicy;
    use braincar_core::filter::RunFilter;
    use braincar_core::protocol::decode_token;
    use braincar_core::types::{BlinkAction, ClassificationSource, Directive};

    use crate::ml::{ClassifierResult, Prediction};

    /// Model that always answers with one label.
    pub(crate) struct Constant {
        pub label: Label,
        pub dimension: usize,
    }

    impl Classifier for Constant {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction> {
            crate::ml::classifier::check_input(features, self.dimension)?;
            Ok(Prediction { label: self.label, confidence: 0.9, probabilities: Vec::new() })
        }
    }

    /// 8-sample batched windows on raw [-1, 1] samples, blink threshold 0.16.
    pub(crate) fn small_config() -> PipelineConfig {
        PipelineConfig {
            sampling_rate: 8.0,
            window_seconds: 1.0,
            evaluation: EvaluationPolicy::Batched,
            normalization: None,
            ..PipelineConfig::short_form_profile()
        }
    }

    pub(crate) fn constant(label: Label) -> Box<dyn Classifier> {
        Box::new(Constant { label, dimension: 7 })
    }

    fn quiet_window(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect()
    }

    #[test]
    fn test_no_report_until_window_full() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        for s in quiet_window(7) {
            assert!(p.push_sample(s).is_none());
        }
        let report = p.push_sample(0.0).unwrap();
        assert_eq!(report.window_index, 0);
        assert_eq!(report.smoothed, Label::Focused);
        assert_eq!(report.directive, Directive::Go);
        assert_eq!(p.token(&report), "GO");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let model = Box::new(Constant { label: Label::Focused, dimension: 15 });
        assert!(matches!(
            Pipeline::new(&small_config(), model),
            Err(PipelineError::DimensionMismatch { features: 7, model: 15 })
        ));
    }

    #[test]
    fn test_override_short_circuits_model() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        let mut window = quiet_window(8);
        window[3] = -0.5;
        let report = window.into_iter().find_map(|s| p.push_sample(s)).unwrap();
        assert_eq!(report.classification.label, Label::Blink);
        assert_eq!(report.classification.source, ClassificationSource::AmplitudeOverride);
        assert_eq!(p.stats().overrides, 1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Unfocused)).unwrap();
        let mut window = quiet_window(8);
        window[0] = 0.16;
        let report = window.into_iter().find_map(|s| p.push_sample(s)).unwrap();
        assert_eq!(report.classification.label, Label::Unfocused);
    }

    #[test]
    fn test_normalization_applied_before_override() {
        let config = PipelineConfig { normalization: Some(AdcNormalization::TEN_BIT), ..small_config() };
        let mut p = Pipeline::new(&config, constant(Label::Focused)).unwrap();

        // 512 +- 50 counts is about 0.1 normalized: quiet.
        let calm: Vec<f64> = (0..8).map(|i| if i % 2 == 0 { 562.0 } else { 462.0 }).collect();
        let report = calm.into_iter().find_map(|s| p.push_sample(s)).unwrap();
        assert_eq!(report.classification.label, Label::Focused);

        // 1000 counts is about 0.95 normalized: blink.
        let mut spike = vec![512.0; 8];
        spike[5] = 1000.0;
        let report = spike.into_iter().find_map(|s| p.push_sample(s)).unwrap();
        assert_eq!(report.classification.label, Label::Blink);
    }

    #[test]
    fn test_rejected_window_leaves_smoother_alone() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        for s in quiet_window(8) {
            p.push_sample(s);
        }
        let mut poisoned = quiet_window(8);
        poisoned[2] = f64::NAN;
        assert!(poisoned.into_iter().all(|s| p.push_sample(s).is_none()));
        assert_eq!(p.stats().rejected, 1);
        assert_eq!(p.stats().windows, 2);
    }

    #[test]
    fn test_labels_wire_format() {
        let config = PipelineConfig { wire_format: WireFormat::Labels, ..small_config() };
        let mut p = Pipeline::new(&config, constant(Label::Unfocused)).unwrap();
        let report = quiet_window(8).into_iter().find_map(|s| p.push_sample(s)).unwrap();
        assert_eq!(p.token(&report), "UNFOCUS");
    }

    #[test]
    fn test_isolated_blink_never_reaches_vehicle() {
        // Sustained unfocus with a blink spike in the fifth window.
        let mut p = Pipeline::new(&small_config(), constant(Label::Unfocused)).unwrap();
        let mut samples = Vec::new();
        for w in 0..10 {
            let mut window = quiet_window(8);
            if w == 4 {
                window[4] = 0.9;
            }
            samples.extend(window);
        }

        let reports: Vec<CycleReport> = samples.into_iter().filter_map(|s| p.push_sample(s)).collect();
        assert_eq!(reports.len(), 10);

        let raw: Vec<Label> = reports.iter().map(|r| r.classification.label).collect();
        assert_eq!(raw[4], Label::Blink);
        assert!(raw.iter().enumerate().all(|(i, l)| i == 4 || *l == Label::Unfocused));
        assert!(reports.iter().all(|r| r.smoothed == Label::Unfocused));

        let mut debounce = RunFilter::new(3);
        let actuated: Vec<Directive> = reports
            .iter()
            .filter_map(|r| debounce.observe(decode_token(p.token(r))))
            .collect();
        assert_eq!(actuated, [Directive::Stop]);
    }

    #[test]
    fn test_sustained_blinks_turn() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Unfocused)).unwrap();
        let mut last = None;
        for _ in 0..5 {
            let mut window = quiet_window(8);
            window[0] = 0.5;
            last = window.into_iter().filter_map(|s| p.push_sample(s)).last();
        }
        let report = last.unwrap();
        assert_eq!(report.smoothed, Label::Blink);
        assert_eq!(report.directive, Directive::TurnRight);
        assert_eq!(p.token(&report), "TURN_RIGHT");
    }

    #[test]
    fn test_blink_as_stop_on_labels_wire() {
        let config = PipelineConfig {
            wire_format: WireFormat::Labels,
            blink_action: BlinkAction::Stop,
            ..small_config()
        };
        let mut p = Pipeline::new(&config, constant(Label::Unfocused)).unwrap();
        let mut debounce = RunFilter::new(3);
        let mut actuated = Vec::new();
        for _ in 0..5 {
            let mut window = quiet_window(8);
            window[0] = 0.5;
            let reports: Vec<_> = window.into_iter().filter_map(|s| p.push_sample(s)).collect();
            for report in reports {
                actuated.extend(debounce.observe(decode_token(p.token(&report))));
            }
        }
        assert!(!actuated.contains(&Directive::TurnRight));
        assert_eq!(actuated, [Directive::Stop]);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut p = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        for s in quiet_window(12) {
            p.push_sample(s);
        }
        p.reset();
        assert!(quiet_window(7).into_iter().all(|s| p.push_sample(s).is_none()));
    }
}
