//! Smoothed label → vehicle directive

use braincar_core::types::{BlinkAction, Directive, Label};

/// Fixed lookup from label to directive.
///
/// Anything not explicitly enumerated maps to [`Directive::Stop`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandMapper {
    blink: BlinkAction,
}

impl CommandMapper {
    /// Mapper with the given blink behaviour.
    #[must_use]
    pub fn new(blink: BlinkAction) -> Self {
        Self { blink }
    }

    /// Map one label.
    #[must_use]
    pub fn map(&self, label: Label) -> Directive {
        match label {
            Label::Focused => Directive::Go,
            Label::Blink => self.blink.directive(),
            Label::Unfocused | Label::Unknown => Directive::Stop,
        }
    }
}
