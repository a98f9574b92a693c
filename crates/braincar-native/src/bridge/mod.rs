//! Bridges between the pipeline and the outside world
//!
//! - [`source`]: EEG samples in, from serial (requires `usb` feature), file or stdin
//! - [`channel`]: Command tokens out, over TCP to the vehicle
//! - [`receiver`]: The vehicle end of that link, with debouncing
//! - [`actuator`]: Motor and steering seam the receiver drives
//!
//! ```rust,ignore
//! use braincar_native::bridge::{ActuatorServer, SimulatedActuator};
//!
//! let mut server = ActuatorServer::bind(&config.receiver, SimulatedActuator::new()).await?;
//! server.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

pub mod actuator;
pub mod channel;
pub mod receiver;
pub mod source;

pub use actuator::{Actuator, Motion, SimulatedActuator, VehicleController};
pub use channel::{
    run_channel, ChannelError, ChannelResult, ChannelStats, CommandChannel, ConnectionState,
};
pub use receiver::{ActuatorServer, ReceiverStats, ServerError, ServerResult, SessionEnd};
pub use source::{open_source, LineSource, SampleSource, SourceError};
