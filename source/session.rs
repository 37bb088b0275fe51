// Component C6. Owns one client's connection state and drives the protocol state machine
// described by the lifecycle in the client-session design: connect/banner/input loop/dispatch/
// output loop/delay/disconnect. The reactor (reactor.rs) owns the actual fd and calls `feed()`
// on every readable tick and `drain_output()` on every writable tick; this module never touches
// a socket directly, the same separation the teacher keeps between `imap::Stream` (framing) and
// the `sync::Open` trait (transport).

use std::rc::Rc;
use std::cell::RefCell;

use crate::args::Arg;
use crate::collaborators::{MessageSource, Planner};
use crate::commands::{Command, CommandRegistry, CommandState};
use crate::dispatch::{self, OkCode, UntaggedOutcome};
use crate::error::{Disposition, ProtocolError};
use crate::mailbox::CacheKey;
use crate::parser::{Flags, Parser, Status};
use crate::rng::Rng;
use crate::mailbox::View;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
  NonAuth,
  Auth,
  Selected,
  Logout,
}

const RESPONSE_FLAGS: Flags = Flags { literal_size: true, atom_allchars: true };

pub struct Session {
  pub idx: usize,
  pub global_id: u64,
  pub username: String,
  pub login_state: LoginState,
  pub capabilities: std::collections::HashSet<String>,
  pub raw_capabilities: Vec<String>,
  pub postlogin_capability: bool,
  pub qresync_enabled: bool,
  pub view: View,
  pub storage: Rc<RefCell<Storage>>,
  pub commands: CommandRegistry,
  pub inflight_limit: usize,
  pub uidvalidity: u32,
  pub highest_modseq: u64,

  parser: Parser,
  input: Vec<u8>,
  consumed: usize,
  output: Vec<u8>,
  literal_left: u64,

  pub qresync_select_cache: Option<CacheKey>,
  pub rawlog: Option<crate::rawlog::RawlogSink>,

  pub last_io: std::time::Instant,
  pub refcount: u32,
  pub delayed: bool,
  pending_destroy: bool,
}

impl Session {
  pub fn new(idx: usize, global_id: u64, username: String, max_inline_literal_size: u64, inflight_limit: usize) -> Self {
    let storage = Storage::new();
    Self {
      idx,
      global_id,
      username,
      login_state: LoginState::NonAuth,
      capabilities: std::collections::HashSet::new(),
      raw_capabilities: Vec::new(),
      postlogin_capability: false,
      qresync_enabled: false,
      view: View::new(storage.clone()),
      storage,
      commands: CommandRegistry::new(global_id),
      inflight_limit,
      uidvalidity: 0,
      highest_modseq: 0,
      parser: Parser::new(max_inline_literal_size),
      input: Vec::new(),
      consumed: 0,
      output: Vec::new(),
      literal_left: 0,
      qresync_select_cache: None,
      rawlog: None,
      last_io: std::time::Instant::now(),
      refcount: 0,
      delayed: false,
      pending_destroy: false,
    }
  }

  /// Session lifecycle step 4.6.4: assigns a tag, records the command, and queues
  /// `"<tag> <cmdline>\r\n"` for the output loop to flush.
  pub fn send(&mut self, cmdline: Vec<u8>, state: CommandState, expect_bad: bool) -> u64 {
    let tag = self.commands.send(cmdline.clone(), state, expect_bad);
    self.output.extend_from_slice(tag.render().as_bytes());
    self.output.push(b' ');
    self.output.extend_from_slice(&cmdline);
    self.output.extend_from_slice(b"\r\n");
    if let Some(rawlog) = &mut self.rawlog {
      rawlog.record_out(tag.render().as_bytes());
      rawlog.record_out(b" ");
      rawlog.record_out(&cmdline);
      rawlog.record_out(b"\r\n");
    }
    tag.tag_number
  }

  pub fn send_append(&mut self, mailbox: &[u8], flags: &[u8], body: Vec<u8>) -> u64 {
    let mut cmdline = b"APPEND ".to_vec();
    cmdline.extend_from_slice(mailbox);
    if !flags.is_empty() {
      cmdline.push(b' ');
      cmdline.extend_from_slice(flags);
    }
    cmdline.extend_from_slice(format!(" {{{}}}", body.len()).as_bytes());
    let tag = self.send(cmdline, CommandState::Append, false);
    self.commands.attach_append_body(tag, body);
    tag
  }

  /// Whether more commands may be pipelined right now, bookkeeping the original's
  /// `delayed_commands` limit exposes as a size-limit on pipelining depth.
  pub fn may_send_more(&self) -> bool {
    self.commands.len() < self.inflight_limit
  }

  pub fn drain_output(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.output)
  }

  pub fn has_output(&self) -> bool {
    !self.output.is_empty()
  }

  /// Session lifecycle step 6: suspends reads. The reactor consults this to decide whether to
  /// keep the read watcher armed; re-arming on timer expiry is the reactor's job.
  pub fn delay(&mut self) {
    self.delayed = true;
  }

  pub fn resume(&mut self) {
    self.delayed = false;
  }

  /// Session lifecycle step 3's random-disconnect fault-injection hook, consulted once per input
  /// tick with the configured probability.
  pub fn maybe_inject_disconnect(&mut self, rng: &mut dyn Rng, probability: f64) -> bool {
    probability > 0.0 && rng.gen_bool(probability)
  }

  pub fn incref(&mut self) {
    self.refcount += 1;
  }

  /// Returns `Disposition::Destroying` once refcount has dropped to zero and a destroy was
  /// requested while it was held, so the caller can bail instead of touching a half-torn-down
  /// session (§5 "Refcount guards against self-destruction inside a callback").
  pub fn decref(&mut self) -> Disposition {
    self.refcount = self.refcount.saturating_sub(1);
    if self.refcount == 0 && self.pending_destroy {
      Disposition::Destroying
    } else {
      Disposition::Continue
    }
  }

  fn request_destroy(&mut self) -> Disposition {
    self.pending_destroy = true;
    if self.refcount == 0 {
      Disposition::Destroying
    } else {
      Disposition::Continue
    }
  }

  fn compact(&mut self) {
    self.input.copy_within(self.consumed.., 0);
    self.input.truncate(self.input.len() - self.consumed);
    self.consumed = 0;
  }

  /// Session lifecycle step 3: feeds freshly-read bytes into the session. Bytes belonging to an
  /// oversize literal skip are discarded before they ever touch `self.input`, matching the
  /// parser's "never buffer the body" contract for the steady-state streaming case; a single
  /// feed() call that already contains an entire literal's body (as in a test transcript fed in
  /// one shot) is still handled correctly by `drain_parsed`, which advances past it without
  /// interpreting it, at the cost of transiently holding it in memory for that one call — an
  /// accepted simplification given the "no strict memory accounting" non-goal.
  pub fn feed(
    &mut self,
    mut bytes: &[u8],
    planner: &mut dyn Planner,
    message_source: &mut dyn MessageSource,
  ) -> Result<Disposition, ProtocolError> {
    self.last_io = std::time::Instant::now();
    if self.literal_left > 0 {
      let take = (self.literal_left as usize).min(bytes.len());
      self.literal_left -= take as u64;
      bytes = &bytes[take..];
      if self.literal_left > 0 {
        return Ok(Disposition::Continue);
      }
      self.parser.continue_after_skip();
    }
    if !bytes.is_empty() {
      self.input.extend_from_slice(bytes);
      if let Some(rawlog) = &mut self.rawlog {
        rawlog.record_in(bytes);
      }
    }
    self.drain_parsed(planner, message_source)
  }

  fn drain_parsed(
    &mut self,
    planner: &mut dyn Planner,
    message_source: &mut dyn MessageSource,
  ) -> Result<Disposition, ProtocolError> {
    loop {
      let (consumed, status) = self.parser.read_args(&self.input[self.consumed..], RESPONSE_FLAGS);
      self.consumed += consumed;
      match status {
        Status::NeedMore => {
          self.compact();
          return Ok(Disposition::Continue);
        }
        Status::Literal(n) => {
          let available = self.input.len() - self.consumed;
          let take = (n as usize).min(available);
          self.consumed += take;
          let remaining = n - take as u64;
          if remaining > 0 {
            self.literal_left = remaining;
            self.compact();
            return Ok(Disposition::Continue);
          }
          self.parser.continue_after_skip();
        }
        Status::Complete(args) => {
          match self.dispatch_args(args, planner, message_source)? {
            Disposition::Destroying => return Ok(Disposition::Destroying),
            Disposition::Continue => {}
          }
        }
        Status::Error { message, fatal } => {
          if fatal {
            return Err(ProtocolError::Parser(message));
          }
          log::warn!("recoverable parser error for {}: {}", self.username, message);
          self.parser.reset();
        }
      }
      if self.consumed == self.input.len() {
        self.compact();
        return Ok(Disposition::Continue);
      }
    }
  }

  /// Session lifecycle step 4: routes one fully-parsed response line. `+` invokes the in-flight
  /// APPEND's continuation; `*` goes to the untagged dispatcher; anything else must parse as a
  /// tag matching an in-flight command.
  fn dispatch_args(
    &mut self,
    args: Vec<Arg>,
    planner: &mut dyn Planner,
    message_source: &mut dyn MessageSource,
  ) -> Result<Disposition, ProtocolError> {
    let Some(first) = args.first() else {
      return Err(ProtocolError::MalformedArgs("empty response line".into()));
    };

    if first.is_atom("+") {
      self.handle_continuation(message_source);
      return Ok(Disposition::Continue);
    }

    if first.is_atom("*") {
      return self.handle_untagged(&args[1..]);
    }

    let Some(tag_bytes) = first.as_bytes() else {
      return Err(ProtocolError::MalformedArgs("response line has neither '+', '*' nor a tag".into()));
    };
    let tag_number = crate::commands::Tag::parse(tag_bytes, self.global_id)?;
    let kind = args
      .get(1)
      .and_then(Arg::as_bytes)
      .ok_or_else(|| ProtocolError::MalformedArgs("tagged reply missing OK/NO/BAD".into()))?;

    self.incref();
    let command = self.commands.finish(tag_number)?;
    let ok = kind.eq_ignore_ascii_case(b"OK");
    let is_bad = kind.eq_ignore_ascii_case(b"BAD");
    self.apply_tagged_state_transitions(&command, ok);
    planner.cmd_reply_finish(self, &command);
    let disposition = self.decref();
    if is_bad && !command.expect_bad && !disposition.is_destroying() {
      let tag = crate::commands::Tag { global_id: self.global_id, tag_number };
      return Err(ProtocolError::BadReply { tag: tag.render() });
    }
    Ok(disposition)
  }

  fn handle_continuation(&mut self, message_source: &mut dyn MessageSource) {
    let _ = message_source; // the body was captured at send time; kept for symmetry with the trait.
    let Some(command) = self.commands.last_mut() else { return };
    let Some(append) = command.append.as_mut() else { return };
    let chunk = append.take(8192);
    self.output.extend_from_slice(&chunk);
    if append.is_done() {
      self.output.extend_from_slice(b"\r\n");
    }
  }

  fn apply_tagged_state_transitions(&mut self, command: &Command, ok: bool) {
    if !ok {
      return;
    }
    match command.state {
      CommandState::Login => self.login_state = LoginState::Auth,
      CommandState::Select => self.login_state = LoginState::Selected,
      CommandState::Logout => self.login_state = LoginState::Logout,
      _ => {}
    }
  }

  fn handle_untagged(&mut self, rest: &[Arg]) -> Result<Disposition, ProtocolError> {
    if rest.first().map(|a| a.is_atom("BYE")).unwrap_or(false) {
      let logging_out = self.login_state == LoginState::Logout;
      self.login_state = LoginState::NonAuth;
      if !logging_out {
        return Err(ProtocolError::UnexpectedBye);
      }
      return Ok(self.request_destroy());
    }

    let selected = self.login_state == LoginState::Selected;
    let has_cache = self.qresync_select_cache.is_some();
    let (outcome, code) =
      dispatch::dispatch_untagged(rest, &mut self.view, selected, self.qresync_enabled, has_cache)?;

    match code {
      OkCode::None => {}
      OkCode::UidValidity(v) => self.uidvalidity = v,
      OkCode::HighestModSeq(m) => self.highest_modseq = m,
    }

    match outcome {
      UntaggedOutcome::Applied => {}
      UntaggedOutcome::Bye => unreachable!("handled above"),
      UntaggedOutcome::QresyncEnabled => self.qresync_enabled = true,
      UntaggedOutcome::Capability(caps) => {
        self.raw_capabilities = caps.clone();
        self.capabilities = caps.into_iter().collect();
        if self.login_state != LoginState::NonAuth {
          self.postlogin_capability = true;
        }
      }
    }
    Ok(Disposition::Continue)
  }

  /// First-read banner handling (lifecycle step 2): `* OK [CAPABILITY ...] greeting` sets the
  /// capability list directly; any other greeting leaves capabilities empty for the caller to
  /// follow up with an explicit `CAPABILITY` command.
  pub fn parse_banner(&mut self, line: &[Arg]) -> bool {
    if line.len() < 2 || !line[0].is_atom("*") || !line[1].is_atom("OK") {
      return false;
    }
    let Some(code) = dispatch::resp_text_code(&line[2..]) else { return false };
    if code.first().map(|a| a.is_atom("CAPABILITY")).unwrap_or(false) {
      let caps: Vec<String> =
        code[1..].iter().filter_map(Arg::as_bytes).map(|b| String::from_utf8_lossy(b).into_owned()).collect();
      self.raw_capabilities = caps.clone();
      self.capabilities = caps.into_iter().collect();
      return true;
    }
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collaborators::InMemoryOfflineCache;

  struct NoopPlanner;
  impl Planner for NoopPlanner {
    fn send_more_commands(&mut self, _session: &mut Session) -> usize {
      0
    }
    fn cmd_reply_finish(&mut self, _session: &mut Session, _command: &Command) {}
  }

  struct NoopSource;
  impl MessageSource for NoopSource {
    fn next_message(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
      None
    }
  }

  fn new_session() -> Session {
    let mut session = Session::new(0, 1, "alice".into(), 4096, 10);
    session.send(b"SELECT INBOX".to_vec(), CommandState::Select, false);
    session
  }

  #[test]
  fn scenario_1_basic_select() {
    let mut session = new_session();
    let mut planner = NoopPlanner;
    let mut source = NoopSource;
    let input = b"* 3 EXISTS\r\n* 0 RECENT\r\n* FLAGS (\\Seen \\Deleted)\r\n* OK [UIDVALIDITY 42] x\r\n1.1 OK SELECT\r\n";
    let disposition = session.feed(input, &mut planner, &mut source).unwrap();
    assert_eq!(Disposition::Continue, disposition);
    assert_eq!(3, session.view.uidmap.len());
    assert_eq!(0, session.view.recent_count);
    assert!(session.view.flags_vocabulary.contains("\\Seen"));
    assert!(session.view.flags_vocabulary.contains("\\Deleted"));
    assert_eq!(LoginState::Selected, session.login_state);
    assert!(session.commands.is_empty());
  }

  #[test]
  fn scenario_7_tag_mismatch() {
    let mut session = Session::new(0, 1, "alice".into(), 4096, 10);
    let mut planner = NoopPlanner;
    let mut source = NoopSource;
    let err = session.feed(b"9.9 OK FOO\r\n", &mut planner, &mut source).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedTaggedReply { .. }));
  }

  #[test]
  fn scenario_6_oversize_literal_skip() {
    let mut session = Session::new(0, 1, "alice".into(), 4, 10);
    session.send(b"FETCH 1 BODY[]".to_vec(), CommandState::Fetch, false);
    session.view.exists(1).unwrap();
    session.view.begin_fetch(&[1]);
    let mut planner = NoopPlanner;
    let mut source = NoopSource;
    let input = b"* 1 FETCH (BODY[] {10}\r\n0123456789)\r\n1.2 OK FETCH\r\n";
    session.feed(input, &mut planner, &mut source).unwrap();
    assert_eq!(0, session.view.messages[0].fetch_refcount);
    assert!(session.commands.is_empty());
  }

  #[test]
  fn unexpected_bye_is_an_error() {
    let mut session = new_session();
    let mut planner = NoopPlanner;
    let mut source = NoopSource;
    let err = session.feed(b"* BYE idling too long\r\n", &mut planner, &mut source).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedBye));
  }

  #[test]
  fn bye_during_logout_tears_down_cleanly() {
    let mut session = new_session();
    session.login_state = LoginState::Logout;
    let mut planner = NoopPlanner;
    let mut source = NoopSource;
    let disposition = session.feed(b"* BYE logging out\r\n", &mut planner, &mut source).unwrap();
    assert_eq!(Disposition::Destroying, disposition);
  }

  #[test]
  fn offline_cache_round_trips_through_the_view() {
    let mut session = new_session();
    session.view.uidmap = vec![1, 2, 3];
    session.view.messages = (0..3).map(|_| Default::default()).collect();
    session.view.known_uid_count = 3;
    let cache = InMemoryOfflineCache::new();
    let key = CacheKey { user: session.username.clone(), mailbox: "INBOX".into(), uidvalidity: 1 };
    session.view.save_offline_cache(&key, &cache);
    let mut fresh = View::new(Storage::new());
    assert!(fresh.load_offline_cache(&key, &cache));
    assert_eq!(session.view.uidmap, fresh.uidmap);
  }
}
