//! Vehicle actuation
//!
//! [`Actuator`] is the hardware seam: two instantaneous setters, the way a
//! steering servo and a motor driver are commanded. [`VehicleController`]
//! turns directives into timed sequences of those calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use braincar_core::config::{ReceiverConfig, TurnManeuver};
use braincar_core::types::Directive;

/// Motor and steering outputs.
pub trait Actuator: Send {
    /// Steering servo angle in degrees, 0 = straight, positive = right.
    fn set_steering(&mut self, angle_deg: i16);

    /// Forward wheel speed 0-100; 0 stops the vehicle.
    fn set_speed(&mut self, speed: u8);

    /// Motors off, wheels straight.
    fn stop(&mut self) {
        self.set_speed(0);
        self.set_steering(0);
    }
}

/// One output change, as recorded by [`SimulatedActuator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Motion {
    /// Steering change
    Steering(i16),
    /// Speed change
    Speed(u8),
}

/// Actuator without hardware: logs every change and keeps a shared history.
#[derive(Clone, Debug, Default)]
pub struct SimulatedActuator {
    history: Arc<Mutex<Vec<Motion>>>,
}

impl SimulatedActuator {
    /// New actuator with an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every change so far.
    #[must_use]
    pub fn history(&self) -> Vec<Motion> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Current speed (0 before any command).
    #[must_use]
    pub fn speed(&self) -> u8 {
        self.history()
            .iter()
            .rev()
            .find_map(|m| match m {
                Motion::Speed(s) => Some(*s),
                Motion::Steering(_) => None,
            })
            .unwrap_or(0)
    }

    fn record(&self, motion: Motion) {
        if let Ok(mut history) = self.history.lock() {
            history.push(motion);
        }
    }
}

impl Actuator for SimulatedActuator {
    fn set_steering(&mut self, angle_deg: i16) {
        tracing::info!("Steering {}°", angle_deg);
        self.record(Motion::Steering(angle_deg));
    }

    fn set_speed(&mut self, speed: u8) {
        if speed == 0 {
            tracing::info!("Motors stopped");
        } else {
            tracing::info!("Forward at {}", speed);
        }
        self.record(Motion::Speed(speed));
    }
}

/// Executes directives on an [`Actuator`].
pub struct VehicleController<A> {
    actuator: A,
    drive_speed: u8,
    turn: TurnManeuver,
    current: Directive,
}

impl<A: Actuator> VehicleController<A> {
    /// Controller using the receiver's speeds and turn maneuver.
    pub fn new(actuator: A, config: &ReceiverConfig) -> Self {
        Self { actuator, drive_speed: config.drive_speed, turn: config.turn, current: Directive::Stop }
    }

    /// Last executed directive
    pub fn current(&self) -> Directive {
        self.current
    }

    /// Underlying actuator
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Carry out one confirmed directive.
    ///
    /// `TURN_RIGHT` is a timed maneuver that ends stopped with the wheels
    /// straight. Unknown directives stop.
    pub async fn execute(&mut self, directive: Directive) {
        match directive.resolve() {
            Directive::Go => {
                tracing::info!("GO");
                self.actuator.set_speed(self.drive_speed);
                self.current = Directive::Go;
            }
            Directive::TurnRight => {
                tracing::info!("TURN_RIGHT");
                self.actuator.set_steering(self.turn.steer_angle_deg);
                self.actuator.set_speed(self.turn.speed);
                tokio::time::sleep(Duration::from_millis(self.turn.duration_ms)).await;
                self.actuator.set_speed(0);
                self.actuator.set_steering(0);
                self.current = Directive::TurnRight;
            }
            Directive::Stop | Directive::Unknown => {
                tracing::info!("STOP");
                self.actuator.set_speed(0);
                self.current = Directive::Stop;
            }
        }
    }

    /// Fail-safe stop: speed 0, wheels straight.
    pub fn stop_now(&mut self) {
        self.actuator.stop();
        self.current = Directive::Stop;
    }
}
