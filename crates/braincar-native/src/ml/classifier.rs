//! Classifier capability
//!
//! The pipeline only needs `predict`. Any trained model that can map a
//! feature vector to a label and class probabilities plugs in behind
//! [`Classifier`]; loading and training happen elsewhere.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use braincar_core::types::Label;

/// Classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Feature vector has the wrong length
    #[error("Feature dimension mismatch: got {got}, model expects {expected}")]
    DimensionMismatch {
        /// Length received
        got: usize,
        /// Length the model was trained with
        expected: usize,
    },

    /// Feature vector contains NaN or infinity
    #[error("Non-finite feature at index {index}")]
    NonFinite {
        /// First offending position
        index: usize,
    },

    /// Model file could not be read
    #[error("Failed to read model: {0}")]
    Io(#[from] std::io::Error),

    /// Model file is malformed
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Model JSON could not be parsed
    #[error("Model parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for classifier operations
pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Output of one inference call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Most probable label
    pub label: Label,
    /// Probability of `label`, in `[0, 1]`
    pub confidence: f64,
    /// Per-class probabilities, in model class order
    pub probabilities: Vec<(String, f64)>,
}

/// Inference-only classifier.
///
/// Implementations must be stateless per call and deterministic. Temporal
/// smoothing belongs to the pipeline, not the model.
pub trait Classifier: Send + Sync {
    /// Feature dimension the model expects.
    fn dimension(&self) -> usize;

    /// Classify one feature vector.
    ///
    /// # Errors
    ///
    /// Returns a [`ClassifierError`] for malformed input. The pipeline treats
    /// that as "no prediction" for the window.
    fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction> {
        (**self).predict(features)
    }
}

/// Reject vectors of the wrong length or with non-finite entries.
///
/// # Errors
///
/// [`ClassifierError::DimensionMismatch`] or [`ClassifierError::NonFinite`].
pub fn check_input(features: &[f64], expected: usize) -> ClassifierResult<()> {
    if features.len() != expected {
        return Err(ClassifierError::DimensionMismatch { got: features.len(), expected });
    }
    if let Some(index) = features.iter().position(|x| !x.is_finite()) {
        return Err(ClassifierError::NonFinite { index });
    }
    Ok(())
}

// ============================================================================
// Standardization
// ============================================================================

/// Per-feature standardization `(x - mean) / scale`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Per-feature mean
    pub mean: Vec<f64>,
    /// Per-feature standard deviation
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Create a scaler, checking that both vectors have the same length.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::InvalidModel`] on a length mismatch.
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> ClassifierResult<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    pub(crate) fn validate(&self) -> ClassifierResult<()> {
        if self.mean.len() != self.scale.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "scaler mean has {} entries, scale has {}",
                self.mean.len(),
                self.scale.len()
            )));
        }
        Ok(())
    }

    /// Number of features
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one vector. A zero scale leaves the centred value as is.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::DimensionMismatch`] or [`ClassifierError::NonFinite`].
    pub fn transform(&self, features: &[f64]) -> ClassifierResult<Vec<f64>> {
        check_input(features, self.dimension())?;
        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s
            })
            .collect())
    }
}

/// Scaler in front of another classifier.
pub struct ScaledClassifier<C> {
    scaler: StandardScaler,
    inner: C,
}

impl<C: Classifier> ScaledClassifier<C> {
    /// Wrap `inner` with `scaler`.
    ///
    /// # Errors
    ///
    /// [`ClassifierError::InvalidModel`] if the dimensions disagree.
    pub fn new(scaler: StandardScaler, inner: C) -> ClassifierResult<Self> {
        if scaler.dimension() != inner.dimension() {
            return Err(ClassifierError::InvalidModel(format!(
                "scaler dimension {} != classifier dimension {}",
                scaler.dimension(),
                inner.dimension()
            )));
        }
        Ok(Self { scaler, inner })
    }
}

impl<C: Classifier> Classifier for ScaledClassifier<C> {
    fn dimension(&self) -> usize {
        self.scaler.dimension()
    }

    fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction> {
        let scaled = self.scaler.transform(features)?;
        self.inner.predict(&scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Classifier for Echo {
        fn dimension(&self) -> usize {
            2
        }

        fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction> {
            check_input(features, 2)?;
            let label = if features[0] > 0.0 { Label::Focused } else { Label::Unfocused };
            Ok(Prediction { label, confidence: 1.0, probabilities: Vec::new() })
        }
    }

    #[test]
    fn test_check_input() {
        assert!(check_input(&[1.0, 2.0], 2).is_ok());
        assert!(matches!(
            check_input(&[1.0], 2),
            Err(ClassifierError::DimensionMismatch { got: 1, expected: 2 })
        ));
        assert!(matches!(
            check_input(&[1.0, f64::NAN], 2),
            Err(ClassifierError::NonFinite { index: 1 })
        ));
    }

    #[test]
    fn test_scaler_transform() {
        let s = StandardScaler::new(vec![1.0, 10.0], vec![2.0, 0.0]).unwrap();
        assert_eq!(s.transform(&[3.0, 12.0]).unwrap(), vec![1.0, 2.0]);
        assert!(StandardScaler::new(vec![0.0], vec![]).is_err());
    }

    #[test]
    fn test_scaled_classifier() {
        let scaler = StandardScaler::new(vec![5.0, 0.0], vec![1.0, 1.0]).unwrap();
        let model = ScaledClassifier::new(scaler, Echo).unwrap();
        assert_eq!(model.predict(&[6.0, 0.0]).unwrap().label, Label::Focused);
        assert_eq!(model.predict(&[4.0, 0.0]).unwrap().label, Label::Unfocused);
        assert!(model.predict(&[4.0]).is_err());

        let boxed: Box<dyn Classifier> = Box::new(model);
        assert_eq!(boxed.dimension(), 2);
    }
}
