//! Feature extraction for mental-state classification
//!
//! Turns one EEG window into the fixed-order feature vector a classifier was
//! trained against: Welch band powers, then whatever ratios, normalized
//! powers, log powers and variance the [`FeatureSet`] lists.

use braincar_core::config::{FeatureKind, FeatureSet};
use braincar_core::error::{ConfigError, ConfigResult};

use crate::processing::welch::WelchEstimator;

/// Feature vector for ML classification
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureVector {
    values: Vec<f64>,
    band_powers: Vec<f64>,
}

impl FeatureVector {
    /// Features in classifier order
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Raw band powers, in band-table order
    #[must_use]
    pub fn band_powers(&self) -> &[f64] {
        &self.band_powers
    }

    /// Dimension
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume into the flat feature array
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }
}

/// Feature terms with band names resolved to indices.
#[derive(Clone, Debug)]
enum Term {
    Power(usize),
    Ratio { num: usize, den: usize, epsilon: f64 },
    Normalized(usize),
    LogPower(usize),
    Variance,
}

/// Feature extractor for one configured feature set.
pub struct FeatureExtractor {
    welch: WelchEstimator,
    bands: Vec<(f64, f64)>,
    terms: Vec<Term>,
    epsilon: f64,
}

impl FeatureExtractor {
    /// Create an extractor for `set` at `sample_rate` Hz.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the set references unknown bands
    /// or has invalid band edges.
    pub fn new(set: &FeatureSet, sample_rate: f64) -> ConfigResult<Self> {
        set.validate()?;

        let index = |name: &str| {
            set.band_index(name).ok_or_else(|| ConfigError::Invalid {
                field: "pipeline.features",
                reason: format!("unknown band {name:?}"),
            })
        };

        let terms = set
            .features
            .iter()
            .map(|feature| {
                Ok(match feature {
                    FeatureKind::BandPower { band } => Term::Power(index(band)?),
                    FeatureKind::Ratio { numerator, denominator, epsilon } => Term::Ratio {
                        num: index(numerator)?,
                        den: index(denominator)?,
                        epsilon: *epsilon,
                    },
                    FeatureKind::Normalized { band } => Term::Normalized(index(band)?),
                    FeatureKind::LogPower { band } => Term::LogPower(index(band)?),
                    FeatureKind::Variance => Term::Variance,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            welch: WelchEstimator::new(sample_rate),
            bands: set.bands.iter().map(|b| (b.low_hz, b.high_hz)).collect(),
            terms,
            epsilon: set.epsilon,
        })
    }

    /// Output dimension
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.terms.len()
    }

    /// Sample rate in Hz
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.welch.sample_rate()
    }

    /// Extract the feature vector of one window.
    ///
    /// Deterministic: the same window always yields bit-identical output.
    /// Every feature is finite for finite input, including all-zero bands.
    pub fn extract(&mut self, window: &[f64]) -> FeatureVector {
        let psd = self.welch.estimate(window);
        let band_powers: Vec<f64> =
            self.bands.iter().map(|&(low, high)| psd.band_power(low, high)).collect();
        let total = band_powers.iter().sum::<f64>() + self.epsilon;

        let values = self
            .terms
            .iter()
            .map(|term| match *term {
                Term::Power(i) => band_powers[i],
                Term::Ratio { num, den, epsilon } => band_powers[num] / (band_powers[den] + epsilon),
                Term::Normalized(i) => band_powers[i] / total,
                Term::LogPower(i) => (band_powers[i] + self.epsilon).ln(),
                Term::Variance => variance(window),
            })
            .collect();

        FeatureVector { values, band_powers }
    }
}

/// One-shot extraction without keeping an extractor around.
///
/// # Errors
///
/// Same as [`FeatureExtractor::new`].
pub fn extract_features(window: &[f64], sample_rate: f64, set: &FeatureSet) -> ConfigResult<FeatureVector> {
    Ok(FeatureExtractor::new(set, sample_rate)?.extract(window))
}

/// Population variance, 0 for fewer than one sample.
fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n
}
