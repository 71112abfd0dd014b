//! AMF3 codec error types
//!
//! Error types for encoding and decoding AMF3 values.

use std::fmt;

/// Error type for AMF3 encode/decode operations
#[derive(Debug, Clone, PartialEq)]
pub enum AmfError {
    /// The stream was exhausted mid-decode. Non-fatal at the top level: it
    /// signals the end of a sequence of elements to `Decoder::decode_all`.
    EndOfStream,
    /// A U29 value was out of the representable range.
    Overflow,
    /// A semantic violation of the wire rules (empty dict key, a
    /// time-of-day value with no date component, an externalizable class
    /// with no registered callback).
    Encode(String),
    /// The wire stream was malformed, or an object carried an unknown
    /// encoding tag.
    Decode(String),
    /// A decoded reference index has no registered target in the context.
    UnknownReference(u32),
    /// A class name was not found in the alias registry (fatal only in
    /// strict mode).
    UnknownClassAlias(String),
    /// Recursion went past the nesting guard.
    NestingTooDeep,
    /// A string payload was not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::EndOfStream => write!(f, "unexpected end of AMF3 stream"),
            AmfError::Overflow => write!(f, "U29 value out of range"),
            AmfError::Encode(msg) => write!(f, "AMF3 encode error: {}", msg),
            AmfError::Decode(msg) => write!(f, "AMF3 decode error: {}", msg),
            AmfError::UnknownReference(idx) => write!(f, "unknown reference index: {}", idx),
            AmfError::UnknownClassAlias(name) => write!(f, "unknown class alias: {}", name),
            AmfError::NestingTooDeep => write!(f, "AMF3 value nested too deeply"),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 in AMF3 string"),
        }
    }
}

impl std::error::Error for AmfError {}
