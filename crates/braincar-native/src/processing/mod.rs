//! Signal processing
//!
//! - [`window`]: Sliding sample window with an explicit evaluation policy
//! - [`welch`]: Welch PSD estimation and trapezoidal band power
//! - [`amplitude`]: Peak-amplitude blink override

pub mod amplitude;
pub mod welch;
pub mod window;

pub use amplitude::AmplitudeOverride;
pub use welch::{Psd, WelchEstimator};
pub use window::{WindowBuffer, WindowSnapshot};
