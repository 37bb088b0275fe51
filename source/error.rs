// Error taxonomy from the "ERROR HANDLING DESIGN" section: K1 input-protocol errors, K2 state
// errors, K3 fatal transport errors, K4 parser errors. Every variant carries enough context to
// reproduce the log line a teardown emits (username, global_id, cur_args where applicable); the
// caller (session.rs) is responsible for attaching that context since this type has no idea what
// session it came from.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
  InputProtocol,
  State,
  Transport,
  Parser,
}

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
  #[error("unexpected BYE while not logging out")]
  UnexpectedBye,

  #[error("VANISHED received without QRESYNC enabled")]
  VanishedWithoutQresync,

  #[error("VANISHED referenced UID {uid} which could not be resolved to a slot")]
  UnknownVanishedUid { uid: u64 },

  #[error("EXPUNGE for sequence {seq} exceeds current length {len}")]
  SeqTooHigh { seq: u64, len: usize },

  #[error("EXISTS reported {n} which is lower than the current length {previous_len}")]
  ExistsRegressed { n: u64, previous_len: usize },

  #[error("EXPUNGE of sequence {seq} is out of range")]
  ExpungeOutOfRange { seq: u64 },

  #[error("EXPUNGE of sequence {seq} while fetch_refcount > 0")]
  ExpungeReferenced { seq: u64 },

  #[error("EXPUNGE of UID {uid} does not match any known or unknown slot")]
  ExpungeUidNotFound { uid: u64 },

  #[error("tagged reply {tag} did not match any in-flight command")]
  UnexpectedTaggedReply { tag: String },

  #[error("server sent BAD reply for tag {tag}")]
  BadReply { tag: String },

  #[error("server sent an untagged BAD: {0}")]
  UntaggedBad(String),

  #[error("malformed arguments: {0}")]
  MalformedArgs(String),

  #[error("parser error: {0}")]
  Parser(String),

  #[error("input buffer overflow")]
  BufferOverflow,

  #[error("connection closed by peer")]
  Eof,

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl ProtocolError {
  pub fn kind(&self) -> Kind {
    match self {
      ProtocolError::UnexpectedBye
      | ProtocolError::VanishedWithoutQresync
      | ProtocolError::UnknownVanishedUid { .. }
      | ProtocolError::SeqTooHigh { .. }
      | ProtocolError::ExistsRegressed { .. }
      | ProtocolError::ExpungeOutOfRange { .. }
      | ProtocolError::ExpungeReferenced { .. }
      | ProtocolError::ExpungeUidNotFound { .. }
      | ProtocolError::UnexpectedTaggedReply { .. }
      | ProtocolError::BadReply { .. }
      | ProtocolError::UntaggedBad(_)
      | ProtocolError::MalformedArgs(_) => Kind::InputProtocol,
      ProtocolError::Parser(_) => Kind::Parser,
      ProtocolError::BufferOverflow | ProtocolError::Eof | ProtocolError::Io(_) => Kind::Transport,
    }
  }

  /// Whether this error, by itself, requires tearing down the owning session. K2 state errors
  /// (not modeled as a distinct variant set here, see `log_state_error`) are the exception:
  /// they're logged without this being consulted.
  pub fn fatal(&self) -> bool {
    !matches!(
      self,
      ProtocolError::ExpungeUidNotFound { .. }
        | ProtocolError::ExistsRegressed { .. }
        | ProtocolError::SeqTooHigh { .. }
    )
  }
}

/// Replaces the original's signed-integer callback convention ("< 0 means the session is
/// already being destroyed, do not continue") with an explicit enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  Continue,
  Destroying,
}

impl Disposition {
  pub fn is_destroying(self) -> bool {
    matches!(self, Disposition::Destroying)
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Kind::InputProtocol => "input-protocol",
      Kind::State => "state",
      Kind::Transport => "transport",
      Kind::Parser => "parser",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expunge_uid_not_found_is_nonfatal() {
    assert!(!ProtocolError::ExpungeUidNotFound { uid: 5 }.fatal());
  }

  #[test]
  fn bad_reply_is_input_protocol_kind() {
    assert_eq!(Kind::InputProtocol, ProtocolError::BadReply { tag: "1.1".into() }.kind());
  }
}
