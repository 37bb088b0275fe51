// Component C8. Verbatim wire-byte capture for post-mortem diagnosis, one file per session.
// Never consulted by the protocol state machine itself; `session.rs` just calls `record_in`/
// `record_out` alongside its normal framing work, the way the teacher's `Stream::inner_input`
// logs a debug line next to every write without that logging affecting control flow.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug)]
pub struct RawlogSink {
  file: std::fs::File,
}

impl RawlogSink {
  /// Opens `<dir>/rawlog.<global_id>`, created exclusively (truncating a stale leftover from a
  /// prior run at the same global_id) with mode 0600 (§6 "Rawlog file").
  pub fn create(dir: &Path, global_id: u64) -> std::io::Result<Self> {
    let path = dir.join(format!("rawlog.{global_id}"));
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let file = options.open(path)?;
    Ok(Self { file })
  }

  pub fn record_in(&mut self, bytes: &[u8]) {
    self.record(b'<', bytes);
  }

  pub fn record_out(&mut self, bytes: &[u8]) {
    self.record(b'>', bytes);
  }

  fn record(&mut self, direction: u8, bytes: &[u8]) {
    if bytes.is_empty() {
      return;
    }
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let header = format!("{} {}.{:06} ", direction as char, now.as_secs(), now.subsec_micros());
    // A write can fail (disk full, ENOSPC); the rawlog is diagnostics-only, never load-bearing
    // for the protocol state machine, so a failure here is logged and otherwise swallowed.
    if let Err(error) = self.file.write_all(header.as_bytes()).and_then(|_| self.file.write_all(bytes)) {
      log::warn!("rawlog write failed: {error}");
      return;
    }
    if !bytes.ends_with(b"\n") {
      let _ = self.file.write_all(b">>\n");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn creates_a_file_named_after_the_global_id() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = RawlogSink::create(dir.path(), 7).unwrap();
    sink.record_in(b"* 1 EXISTS\r\n");
    sink.record_out(b"1.1 NOOP\r\n");
    let contents = std::fs::read_to_string(dir.path().join("rawlog.7")).unwrap();
    assert!(contents.contains("* 1 EXISTS"));
    assert!(contents.contains("1.1 NOOP"));
  }

  #[test]
  fn incomplete_writes_get_a_continuation_marker() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = RawlogSink::create(dir.path(), 1).unwrap();
    sink.record_in(b"partial, no newline yet");
    let contents = std::fs::read_to_string(dir.path().join("rawlog.1")).unwrap();
    assert!(contents.ends_with(">>\n"));
  }
}
