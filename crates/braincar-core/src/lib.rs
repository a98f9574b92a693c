//! BrainCar Core - shared types, wire protocol and temporal filters
//!
//! This crate holds everything both ends of the BrainCar link agree on: the
//! EEG host that classifies mental state, and the vehicle that acts on it.
//!
//! # Modules
//!
//! - [`types`]: Labels, directives and classification records
//! - [`protocol`]: Command tokens on the wire and sample-line parsing
//! - [`filter`]: Majority-vote and consecutive-run filters
//! - [`config`]: Pipeline, channel and receiver configuration
//! - [`error`]: Configuration and protocol errors
//!
//! # Example
//!
//! ```rust
//! use braincar_core::filter::RunFilter;
//! use braincar_core::protocol::decode_token;
//! use braincar_core::types::Directive;
//!
//! let mut debounce = RunFilter::new(3);
//! let fired: Vec<_> = ["GO", "go", "GO"]
//!     .into_iter()
//!     .filter_map(|t| debounce.observe(decode_token(t)))
//!     .collect();
//! assert_eq!(fired, [Directive::Go]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{
    AdcNormalization, Band, BraincarConfig, ChannelConfig, EvaluationPolicy, FeatureKind,
    FeatureSet, PipelineConfig, ReceiverConfig, ReconnectPolicy, SourceConfig,
};
pub use error::{ConfigError, ProtocolError};
pub use filter::{MajorityFilter, RunFilter};
pub use protocol::{decode_token, encode_token, LineFormat, WireFormat};
pub use types::{BlinkAction, Classification, CycleReport, Directive, Label};
