//! Machine learning inference for mental-state decoding
//!
//! Feature extraction plus the classifier capability. Training is out of
//! scope; models arrive already fitted.

pub mod classifier;
pub mod features;
pub mod knn;

pub use classifier::{
    Classifier, ClassifierError, ClassifierResult, Prediction, ScaledClassifier, StandardScaler,
};
pub use features::{FeatureExtractor, FeatureVector};
pub use knn::{KnnClassifier, KnnModel};
