//! k-nearest-neighbour classifier loaded from a JSON model file
//!
//! ```json
//! {
//!   "k": 5,
//!   "classes": ["focused", "unfocused"],
//!   "samples": [[0.1, 0.2, ...], ...],
//!   "labels": ["focused", "unfocused", ...],
//!   "scaler": { "mean": [...], "scale": [...] }
//! }
//! ```
//!
//! `scaler` is optional. Probabilities are neighbour vote shares, as in a
//! uniformly weighted k-NN.

use std::path::Path;

use serde::{Deserialize, Serialize};

use braincar_core::types::Label;

use super::classifier::{
    check_input, Classifier, ClassifierError, ClassifierResult, Prediction, ScaledClassifier,
    StandardScaler,
};

/// Serialized k-NN model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    /// Neighbours consulted per prediction
    pub k: usize,
    /// Class names; ties resolve to the earlier class
    pub classes: Vec<String>,
    /// Reference feature vectors (already scaled if a scaler is present)
    pub samples: Vec<Vec<f64>>,
    /// Class name of each reference vector
    pub labels: Vec<String>,
    /// Optional standardization applied to incoming features
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
}

/// Euclidean k-NN classifier.
#[derive(Clone, Debug)]
pub struct KnnClassifier {
    k: usize,
    classes: Vec<String>,
    samples: Vec<Vec<f64>>,
    targets: Vec<usize>,
    dimension: usize,
}

impl KnnClassifier {
    /// Build a classifier from model parts (scaler ignored).
    ///
    /// # Errors
    ///
    /// [`ClassifierError::InvalidModel`] for empty or inconsistent models.
    pub fn from_model(model: &KnnModel) -> ClassifierResult<Self> {
        let invalid = |msg: String| Err(ClassifierError::InvalidModel(msg));

        if model.k == 0 {
            return invalid("k must be >= 1".to_string());
        }
        if model.classes.is_empty() {
            return invalid("no classes".to_string());
        }
        if model.samples.is_empty() {
            return invalid("no reference samples".to_string());
        }
        if model.samples.len() != model.labels.len() {
            return invalid(format!(
                "{} samples but {} labels",
                model.samples.len(),
                model.labels.len()
            ));
        }

        let dimension = model.samples[0].len();
        if dimension == 0 {
            return invalid("reference samples are empty".to_string());
        }
        if let Some(i) = model.samples.iter().position(|s| s.len() != dimension) {
            return invalid(format!("sample {i} has {} features, expected {dimension}", model.samples[i].len()));
        }

        let targets = model
            .labels
            .iter()
            .map(|name| {
                model
                    .classes
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| ClassifierError::InvalidModel(format!("label {name:?} not in classes")))
            })
            .collect::<ClassifierResult<Vec<_>>>()?;

        Ok(Self {
            k: model.k.min(model.samples.len()),
            classes: model.classes.clone(),
            samples: model.samples.clone(),
            targets,
            dimension,
        })
    }

    /// Class names in model order
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Effective neighbour count
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }
}

impl Classifier for KnnClassifier {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn predict(&self, features: &[f64]) -> ClassifierResult<Prediction> {
        check_input(features, self.dimension)?;

        let mut distances: Vec<(f64, usize)> = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let d: f64 = s.iter().zip(features).map(|(a, b)| (a - b) * (a - b)).sum();
                (d, i)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut votes = vec![0usize; self.classes.len()];
        for &(_, i) in distances.iter().take(self.k) {
            votes[self.targets[i]] += 1;
        }

        // First maximum wins, so ties go to the earlier class.
        let mut best = 0;
        for (i, &v) in votes.iter().enumerate() {
            if v > votes[best] {
                best = i;
            }
        }

        let k = self.k as f64;
        let probabilities: Vec<(String, f64)> = self
            .classes
            .iter()
            .zip(&votes)
            .map(|(c, &v)| (c.clone(), v as f64 / k))
            .collect();

        Ok(Prediction {
            label: Label::from_class_name(&self.classes[best]),
            confidence: votes[best] as f64 / k,
            probabilities,
        })
    }
}

/// Build the classifier described by `model`, with its scaler if present.
///
/// # Errors
///
/// [`ClassifierError::InvalidModel`] for inconsistent models.
pub fn build(model: &KnnModel) -> ClassifierResult<Box<dyn Classifier>> {
    let knn = KnnClassifier::from_model(model)?;
    match &model.scaler {
        Some(scaler) => {
            scaler.validate()?;
            Ok(Box::new(ScaledClassifier::new(scaler.clone(), knn)?))
        }
        None => Ok(Box::new(knn)),
    }
}

/// Load a JSON k-NN model from disk.
///
/// # Errors
///
/// I/O, parse, or model-consistency errors.
pub fn load(path: &Path) -> ClassifierResult<Box<dyn Classifier>> {
    let text = std::fs::read_to_string(path)?;
    let model: KnnModel = serde_json::from_str(&text)?;
    tracing::info!(
        path = %path.display(),
        k = model.k,
        samples = model.samples.len(),
        classes = ?model.classes,
        "Loaded k-NN model"
    );
    build(&model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> KnnModel {
        KnnModel {
            k: 3,
            classes: vec!["focused".into(), "unfocused".into()],
            samples: vec![
                vec![0.0, 0.0],
                vec![0.1, 0.0],
                vec![0.0, 0.1],
                vec![5.0, 5.0],
                vec![5.1, 5.0],
                vec![5.0, 5.1],
            ],
            labels: ["focused", "focused", "focused", "unfocused", "unfocused", "unfocused"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            scaler: None,
        }
    }

    #[test]
    fn test_nearest_cluster_wins() {
        let knn = KnnClassifier::from_model(&model()).unwrap();
        let p = knn.predict(&[0.05, 0.05]).unwrap();
        assert_eq!(p.label, Label::Focused);
        assert!((p.confidence - 1.0).abs() < f64::EPSILON);

        let p = knn.predict(&[4.9, 4.9]).unwrap();
        assert_eq!(p.label, Label::Unfocused);
        assert_eq!(p.probabilities[0], ("focused".to_string(), 0.0));
    }

    #[test]
    fn test_vote_share_confidence() {
        let mut m = model();
        m.k = 5;
        let knn = KnnClassifier::from_model(&m).unwrap();
        let p = knn.predict(&[0.0, 0.0]).unwrap();
        assert_eq!(p.label, Label::Focused);
        assert!((p.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_tie_goes_to_first_class() {
        let mut m = model();
        m.k = 6;
        let knn = KnnClassifier::from_model(&m).unwrap();
        assert_eq!(knn.predict(&[2.5, 2.5]).unwrap().label, Label::Focused);
    }

    #[test]
    fn test_k_clamped_to_samples() {
        let mut m = model();
        m.k = 100;
        assert_eq!(KnnClassifier::from_model(&m).unwrap().k(), 6);
    }

    #[test]
    fn test_rejects_bad_input() {
        let knn = KnnClassifier::from_model(&model()).unwrap();
        assert!(knn.predict(&[1.0]).is_err());
        assert!(knn.predict(&[f64::INFINITY, 0.0]).is_err());
    }

    #[test]
    fn test_rejects_bad_models() {
        let mut m = model();
        m.labels[0] = "drowsy".into();
        assert!(KnnClassifier::from_model(&m).is_err());

        let mut m = model();
        m.samples[2].push(1.0);
        assert!(KnnClassifier::from_model(&m).is_err());

        let mut m = model();
        m.k = 0;
        assert!(KnnClassifier::from_model(&m).is_err());
    }

    #[test]
    fn test_build_with_scaler() {
        let mut m = model();
        m.scaler = Some(StandardScaler { mean: vec![100.0, 100.0], scale: vec![10.0, 10.0] });
        let clf = build(&m).unwrap();
        // (150 - 100) / 10 = 5 -> unfocused cluster
        assert_eq!(clf.predict(&[150.0, 150.0]).unwrap().label, Label::Unfocused);
        assert_eq!(clf.predict(&[100.0, 100.0]).unwrap().label, Label::Focused);
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&model()).unwrap()).unwrap();
        let clf = load(&path).unwrap();
        assert_eq!(clf.dimension(), 2);
        assert!(load(&dir.path().join("missing.json")).is_err());
    }
}
