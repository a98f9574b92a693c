//! BrainCar Native - host signal processing, inference and vehicle link
//!
//! This crate turns a single-channel EEG stream into driving commands:
//! - Windowing and Welch spectral features
//! - Blink detection by peak amplitude
//! - Classifier inference with majority-vote smoothing
//! - TCP command channel to the vehicle, and the vehicle's receiver
//!
//! # Modules
//!
//! - [`processing`]: Windowing, Welch PSD and the amplitude override
//! - [`ml`]: Feature extraction and classifiers
//! - [`pipeline`]: Per-window cycle and the blocking producer loop
//! - [`bridge`]: Sample sources, command channel and receiver

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod bridge;
pub mod ml;
pub mod pipeline;
pub mod processing;

// Re-export key types
pub use bridge::{ActuatorServer, CommandChannel, SampleSource, SimulatedActuator};
pub use ml::{Classifier, FeatureExtractor, KnnClassifier};
pub use pipeline::{Pipeline, PipelineError, RunFlag};
pub use processing::{WelchEstimator, WindowBuffer};
