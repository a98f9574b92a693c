//! Wire protocol between the classifier host and the vehicle
//!
//! The control plane is a plain-text, newline-terminated stream of uppercase
//! tokens, one command per message, flowing from sender to receiver only.
//!
//! ```text
//! GO\n
//! GO\n
//! TURN_RIGHT\n
//! STOP\n
//! ```
//!
//! Two token vocabularies exist. [`WireFormat::Directives`] sends the
//! directive itself; [`WireFormat::Labels`] passes the smoothed label through
//! (`FOCUS`, `UNFOCUS`, `BLINK`) and lets the vehicle map it. The receiver
//! always accepts both, and anything else decodes to [`Directive::Stop`].
//!
//! This module also parses sample lines coming off the EEG serial link.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Directive, Label};

/// Token terminator on the wire
pub const TOKEN_TERMINATOR: u8 = b'\n';

/// Token vocabulary the sender uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `GO` / `STOP` / `TURN_RIGHT`
    #[default]
    Directives,
    /// `FOCUS` / `UNFOCUS` / `BLINK`
    Labels,
}

/// Encode one outgoing command as a wire token (without terminator).
///
/// In [`WireFormat::Labels`] mode, labels without a passthrough token are
/// sent as `STOP`. `BLINK` decodes to a turn on the vehicle, so it is only
/// sent when the blink actually maps to [`Directive::TurnRight`].
#[must_use]
pub fn encode_token(format: WireFormat, label: Label, directive: Directive) -> &'static str {
    match format {
        WireFormat::Directives => match directive.resolve() {
            Directive::Go => "GO",
            Directive::TurnRight => "TURN_RIGHT",
            Directive::Stop | Directive::Unknown => "STOP",
        },
        WireFormat::Labels => match label {
            Label::Focused => "FOCUS",
            Label::Unfocused => "UNFOCUS",
            Label::Blink if directive.resolve() == Directive::TurnRight => "BLINK",
            Label::Blink | Label::Unknown => "STOP",
        },
    }
}

/// Decode one received token.
///
/// Case-insensitive. Returns [`Directive::Stop`] for any token outside the
/// recognized set so a corrupted or foreign stream can never fail open.
#[must_use]
pub fn decode_token(token: &str) -> Directive {
    match token.trim().to_ascii_uppercase().as_str() {
        "GO" | "FOCUS" => Directive::Go,
        "STOP" | "UNFOCUS" => Directive::Stop,
        "TURN_RIGHT" | "BLINK" => Directive::TurnRight,
        _ => Directive::Stop,
    }
}

/// Whether `token` is in the recognized vocabulary.
#[must_use]
pub fn is_recognized(token: &str) -> bool {
    matches!(
        token.trim().to_ascii_uppercase().as_str(),
        "GO" | "FOCUS" | "STOP" | "UNFOCUS" | "TURN_RIGHT" | "BLINK"
    )
}

/// Longest token kept while waiting for its delimiter.
pub const MAX_TOKEN_LEN: usize = 64;

/// Incremental tokenizer for the receiver's byte stream.
///
/// Any ASCII whitespace ends a token, so a TCP read may carry several
/// messages or half of one. Only the trailing partial token is buffered; a
/// run longer than [`MAX_TOKEN_LEN`] is reported once (it decodes to STOP)
/// and the rest of it is skipped up to the next delimiter.
#[derive(Debug, Default)]
pub struct TokenSplitter {
    partial: Vec<u8>,
    overlong: bool,
}

impl TokenSplitter {
    /// Empty splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes and collect the tokens they complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &b in bytes {
            if b.is_ascii_whitespace() {
                if let Some(token) = self.take() {
                    out.push(token);
                }
                self.overlong = false;
            } else if !self.overlong {
                self.partial.push(b);
                if self.partial.len() > MAX_TOKEN_LEN {
                    out.extend(self.take());
                    self.overlong = true;
                }
            }
        }
        out
    }

    /// Flush the pending token at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.overlong = false;
        self.take()
    }

    /// Bytes currently buffered
    #[must_use]
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn take(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let token = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(token)
    }
}

// ============================================================================
// Sample lines
// ============================================================================

/// Layout of one text line from the sample source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineFormat {
    /// The whole trimmed line is the sample value
    Value,
    /// Comma/whitespace separated fields; the sample is field `index`
    Column {
        /// Zero-based field index
        index: usize,
    },
}

impl Default for LineFormat {
    fn default() -> Self {
        Self::Value
    }
}

impl LineFormat {
    /// `counter,value` lines as produced by the EEG pill firmware.
    pub const COUNTER_VALUE: Self = Self::Column { index: 1 };

    /// Parse a sample value out of one line.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for empty lines, missing columns and
    /// non-numeric or non-finite values. Callers skip such lines.
    pub fn parse(self, line: &str) -> Result<f64, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let field = match self {
            Self::Value => line.to_string(),
            Self::Column { index } => {
                let normalized = line.replace(',', " ");
                let fields: Vec<&str> = normalized.split_whitespace().collect();
                fields
                    .get(index)
                    .map(|s| (*s).to_string())
                    .ok_or(ProtocolError::MissingColumn { index, fields: fields.len() })?
            }
        };

        match field.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ProtocolError::InvalidSample(field)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_tokens() {
        assert_eq!(decode_token("GO"), Directive::Go);
        assert_eq!(decode_token("go"), Directive::Go);
        assert_eq!(decode_token("Focus"), Directive::Go);
        assert_eq!(decode_token("STOP"), Directive::Stop);
        assert_eq!(decode_token("UNFOCUS"), Directive::Stop);
        assert_eq!(decode_token("blink"), Directive::TurnRight);
        assert_eq!(decode_token("TURN_RIGHT"), Directive::TurnRight);
    }

    #[test]
    fn test_decode_unknown_is_stop() {
        for token in ["", "FORWARD", "G0", "UNKNOWN", "\u{fffd}"] {
            assert_eq!(decode_token(token), Directive::Stop, "token {token:?}");
        }
        assert!(!is_recognized("FORWARD"));
        assert!(is_recognized("turn_right"));
    }

    #[test]
    fn test_encode_directive_format() {
        let f = WireFormat::Directives;
        assert_eq!(encode_token(f, Label::Focused, Directive::Go), "GO");
        assert_eq!(encode_token(f, Label::Blink, Directive::TurnRight), "TURN_RIGHT");
        assert_eq!(encode_token(f, Label::Unknown, Directive::Unknown), "STOP");
    }

    #[test]
    fn test_encode_label_format() {
        let f = WireFormat::Labels;
        assert_eq!(encode_token(f, Label::Focused, Directive::Go), "FOCUS");
        assert_eq!(encode_token(f, Label::Unfocused, Directive::Stop), "UNFOCUS");
        assert_eq!(encode_token(f, Label::Blink, Directive::TurnRight), "BLINK");
        assert_eq!(encode_token(f, Label::Unknown, Directive::Stop), "STOP");
    }

    #[test]
    fn test_label_format_blink_as_stop() {
        // A blink configured as a no-op must not decode to a turn downstream.
        let token = encode_token(WireFormat::Labels, Label::Blink, Directive::Stop);
        assert_eq!(token, "STOP");
        assert_eq!(decode_token(token), Directive::Stop);
    }

    #[test]
    fn test_tokens_split_coalesced_reads() {
        let mut splitter = TokenSplitter::new();
        assert_eq!(splitter.push(b"GO\nGO\r\n STOP\n"), ["GO", "GO", "STOP"]);
        assert_eq!(splitter.push(b"GO GO GO "), ["GO", "GO", "GO"]);
    }

    #[test]
    fn test_tokens_span_reads() {
        let mut splitter = TokenSplitter::new();
        assert!(splitter.push(b"TURN_").is_empty());
        assert_eq!(splitter.pending(), 5);
        assert_eq!(splitter.push(b"RIGHT\tGO"), ["TURN_RIGHT"]);
        assert_eq!(splitter.finish().as_deref(), Some("GO"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_overlong_token_is_bounded() {
        let mut splitter = TokenSplitter::new();
        let garbage = vec![b'X'; 10 * MAX_TOKEN_LEN];
        let got = splitter.push(&garbage);
        assert_eq!(got.len(), 1);
        assert_eq!(decode_token(&got[0]), Directive::Stop);
        assert_eq!(splitter.pending(), 0);

        // Tokens after the next delimiter are read normally.
        assert_eq!(splitter.push(b"XX GO\n"), ["GO"]);
    }

    #[test]
    fn test_line_format_value() {
        assert_eq!(LineFormat::Value.parse(" 512.5\r\n"), Ok(512.5));
        assert_eq!(LineFormat::Value.parse(""), Err(ProtocolError::Empty));
        assert!(matches!(LineFormat::Value.parse("abc"), Err(ProtocolError::InvalidSample(_))));
        assert!(matches!(LineFormat::Value.parse("NaN"), Err(ProtocolError::InvalidSample(_))));
    }

    #[test]
    fn test_line_format_counter_value() {
        let f = LineFormat::COUNTER_VALUE;
        assert_eq!(f.parse("133,-0.001280"), Ok(-0.001_280));
        assert_eq!(f.parse("133, -0.001280"), Ok(-0.001_280));
        assert_eq!(f.parse("133 -0.001280"), Ok(-0.001_280));
        assert_eq!(f.parse("133"), Err(ProtocolError::MissingColumn { index: 1, fields: 1 }));
    }
}
