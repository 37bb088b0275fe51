// Integration coverage for the seven end-to-end scenarios and the quantified invariants. Drives
// a `Session` directly with literal server transcripts rather than a real socket, the same way
// the teacher's own `tests/` crate swaps a `sync::Open` implementation for something test-only
// instead of going over the network.

use test_log::test;

use imaptest_sim::collaborators::{MessageSource, Planner};
use imaptest_sim::commands::{Command, CommandState};
use imaptest_sim::error::{Disposition, ProtocolError};
use imaptest_sim::mailbox::MessageSlot;
use imaptest_sim::session::{LoginState, Session};

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

fn selecting_session() -> Session {
  let mut session = Session::new(0, 1, "alice".into(), 4096, 10);
  session.send(b"SELECT INBOX".to_vec(), CommandState::Select, false);
  session
}

#[test]
fn scenario_1_basic_select() {
  let mut session = selecting_session();
  let input = b"* 3 EXISTS\r\n* 0 RECENT\r\n* FLAGS (\\Seen \\Deleted)\r\n* OK [UIDVALIDITY 42] x\r\n1.1 OK SELECT\r\n";
  let disposition = session.feed(input, &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(Disposition::Continue, disposition);
  assert_eq!(3, session.view.uidmap.len());
  assert_eq!(0, session.view.recent_count);
  assert!(session.view.flags_vocabulary.contains("\\Seen"));
  assert!(session.view.flags_vocabulary.contains("\\Deleted"));
  assert_eq!(42, session.uidvalidity);
  assert_eq!(LoginState::Selected, session.login_state);
  assert!(session.commands.is_empty());
}

#[test]
fn scenario_2_expunge_of_unknown_slot() {
  let mut session = selecting_session();
  session.view.uidmap = vec![10, 0, 20];
  session.view.messages = vec![MessageSlot::default(), MessageSlot::default(), MessageSlot::default()];
  session.view.known_uid_count = 2;
  session.feed(b"* 2 EXPUNGE\r\n", &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(vec![10, 20], session.view.uidmap);
  assert_eq!(2, session.view.known_uid_count);
}

#[test]
fn scenario_3_expunge_of_referenced_message_is_an_error() {
  let mut session = selecting_session();
  session.view.uidmap = vec![10];
  session.view.messages = vec![MessageSlot { fetch_refcount: 1, ..Default::default() }];
  session.view.known_uid_count = 1;
  let err = session.feed(b"* 1 EXPUNGE\r\n", &mut NoopPlanner, &mut NoopSource).unwrap_err();
  assert!(matches!(err, ProtocolError::ExpungeReferenced { seq: 1 }));
  assert!(err.fatal());
}

#[test]
fn scenario_4_vanished_without_qresync_is_an_error() {
  let mut session = selecting_session();
  let err = session.feed(b"* VANISHED 5:7\r\n", &mut NoopPlanner, &mut NoopSource).unwrap_err();
  assert!(matches!(err, ProtocolError::VanishedWithoutQresync));
}

#[test]
fn scenario_5_vanished_earlier_with_cache_removes_uids() {
  let mut session = selecting_session();
  session.qresync_enabled = true;
  session.qresync_select_cache = Some(imaptest_sim::mailbox::CacheKey {
    user: "alice".into(),
    mailbox: "INBOX".into(),
    uidvalidity: 1,
  });
  session.view.uidmap = vec![5, 6, 7, 8];
  session.view.messages = (0..4).map(|_| MessageSlot::default()).collect();
  session.view.known_uid_count = 4;
  session.feed(b"* VANISHED (EARLIER) 6,8\r\n", &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(vec![5, 7], session.view.uidmap);
}

#[test]
fn scenario_6_oversize_literal_skip() {
  let mut session = Session::new(0, 1, "alice".into(), 4, 10);
  session.send(b"FETCH 1 BODY[]".to_vec(), CommandState::Fetch, false);
  session.view.exists(1).unwrap();
  session.view.begin_fetch(&[1]);
  let input = b"* 1 FETCH (BODY[] {10}\r\n0123456789)\r\n1.2 OK FETCH\r\n";
  session.feed(input, &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(0, session.view.messages[0].fetch_refcount);
  assert!(session.commands.is_empty());
}

#[test]
fn scenario_7_tag_mismatch() {
  let mut session = Session::new(0, 1, "alice".into(), 4096, 10);
  let err = session.feed(b"9.9 OK FOO\r\n", &mut NoopPlanner, &mut NoopSource).unwrap_err();
  assert!(matches!(err, ProtocolError::UnexpectedTaggedReply { .. }));
}

/// Quantified invariant: `len(uidmap) == len(messages)` holds after every dispatch, including
/// ones that shrink the view (EXPUNGE) or regress it (a lower EXISTS).
#[test]
fn invariant_uidmap_and_messages_stay_the_same_length() {
  let mut session = selecting_session();
  session.feed(b"* 5 EXISTS\r\n1.1 OK SELECT\r\n", &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(session.view.uidmap.len(), session.view.messages.len());
  let mut session = Session::new(0, 1, "alice".into(), 4096, 10);
  session.view.exists(5).unwrap();
  session.view.uidmap = vec![1, 2, 3, 4, 5];
  session.view.known_uid_count = 5;
  let _ = session.view.exists(2);
  assert_eq!(session.view.uidmap.len(), session.view.messages.len());
}

/// Quantified invariant: known UIDs stay strictly increasing with sequence number.
#[test]
fn invariant_known_uids_are_strictly_increasing() {
  let mut session = selecting_session();
  session.view.uidmap = vec![0, 10, 0, 20, 30];
  session.view.messages = (0..5).map(|_| MessageSlot::default()).collect();
  session.view.known_uid_count = 3;
  let known: Vec<u64> = session.view.uidmap.iter().copied().filter(|&uid| uid != 0).collect();
  assert!(known.windows(2).all(|pair| pair[0] < pair[1]));
}

/// Quantified invariant: an in-flight command's tag always parses as `<global_id>.<n>` with
/// `0 < n <= tag_counter`.
#[test]
fn invariant_tags_parse_within_the_counter_range() {
  let mut session = Session::new(0, 7, "alice".into(), 4096, 10);
  session.send(b"NOOP".to_vec(), CommandState::Noop, false);
  session.send(b"NOOP".to_vec(), CommandState::Noop, false);
  assert_eq!(2, session.commands.tag_counter());
  for command in [session.commands.lookup(1).unwrap(), session.commands.lookup(2).unwrap()] {
    assert_eq!(7, session.commands.global_id());
    assert!(command.tag_number > 0 && command.tag_number <= session.commands.tag_counter());
  }
}

/// Quantified invariant: after a VANISHED applied under QRESYNC, none of the listed UIDs remain
/// in the view (whether they were removed by this response or already absent).
#[test]
fn invariant_vanished_uids_are_absent_afterward() {
  let mut session = selecting_session();
  session.qresync_enabled = true;
  session.view.uidmap = vec![5, 6, 7, 8];
  session.view.messages = (0..4).map(|_| MessageSlot::default()).collect();
  session.view.known_uid_count = 4;
  session.feed(b"* VANISHED 6,8,99\r\n", &mut NoopPlanner, &mut NoopSource).unwrap();
  for uid in [6u64, 8, 99] {
    assert!(!session.view.uidmap.contains(&uid));
  }
}

/// Quantified invariant: applying the same EXPUNGE twice is an explicit error the second time,
/// never a silent no-op.
#[test]
fn invariant_repeated_expunge_is_an_error_not_a_noop() {
  let mut session = selecting_session();
  session.view.uidmap = vec![10, 20];
  session.view.messages = vec![MessageSlot::default(), MessageSlot::default()];
  session.view.known_uid_count = 2;
  session.feed(b"* 1 EXPUNGE\r\n", &mut NoopPlanner, &mut NoopSource).unwrap();
  assert_eq!(vec![20], session.view.uidmap);
  let err = session.feed(b"* 2 EXPUNGE\r\n", &mut NoopPlanner, &mut NoopSource);
  assert!(err.is_err());
}
