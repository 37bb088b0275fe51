// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1
// https://www.rfc-editor.org/rfc/rfc4315 - UIDPLUS
// https://www.rfc-editor.org/rfc/rfc7162 - Quick Mailbox Resynchronization (QRESYNC/CONDSTORE)
// https://www.rfc-editor.org/rfc/rfc7888 - LITERAL+

pub mod args;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod parser;
pub mod pool;
pub mod rawlog;
pub mod reactor;
pub mod rng;
pub mod session;
pub mod storage;

pub use config::Arguments;

use std::net::TcpStream;

use anyhow::Context as _;

use collaborators::{CheckpointCoordinator, MessageSource, Planner, SessionSnapshot};
use commands::Command;
use reactor::{Reactor, ReactorHost};
use rng::{Rng, ThreadRng};
use session::Session;

/// A planner that keeps a session idling on NOOP and never pipelines more than one command at a
/// time, standing in for the real command planner (explicitly an external collaborator, §1) so
/// the binary is runnable on its own.
struct NoopPlanner;

impl Planner for NoopPlanner {
  fn send_more_commands(&mut self, session: &mut Session) -> usize {
    if !session.may_send_more() || !session.commands.is_empty() {
      return 0;
    }
    session.send(b"NOOP".to_vec(), commands::CommandState::Noop, false);
    1
  }

  fn cmd_reply_finish(&mut self, _session: &mut Session, _command: &Command) {}
}

struct NoopMessageSource;

impl MessageSource for NoopMessageSource {
  fn next_message(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
    None
  }
}

/// Logs divergence instead of comparing it, standing in for the real checkpoint coordinator;
/// §4.9 defines the contract precisely, but comparing snapshots across sessions is explicitly the
/// coordinator's job, out of scope for the core.
struct LoggingCheckpointCoordinator;

impl CheckpointCoordinator for LoggingCheckpointCoordinator {
  fn session_quiesced(&self, snapshot: &SessionSnapshot) {
    log::debug!(
      "session {} ({}) quiesced with {} known messages",
      snapshot.idx,
      snapshot.username,
      snapshot.uidmap.len()
    );
  }

  fn session_torn_down(&self, idx: usize, clean: bool) {
    if clean {
      log::info!("session {idx} torn down");
    } else {
      log::warn!("session {idx} torn down mid-checkpoint");
    }
  }
}

struct Host {
  planner: NoopPlanner,
  source: NoopMessageSource,
}

impl ReactorHost for Host {
  fn planner(&mut self, _idx: usize) -> &mut dyn Planner {
    &mut self.planner
  }

  fn message_source(&mut self, _idx: usize) -> &mut dyn MessageSource {
    &mut self.source
  }
}

fn connect(arguments: &Arguments) -> anyhow::Result<TcpStream> {
  let stream = TcpStream::connect((arguments.ip.as_str(), arguments.port))
    .with_context(|| format!("couldn't connect to {}:{}", arguments.ip, arguments.port))?;
  stream.set_nonblocking(true)?;
  Ok(stream)
}

fn attach_rawlog(arguments: &Arguments, pool: &mut pool::Pool, idx: usize) {
  if !arguments.rawlog {
    return;
  }
  let Some(session) = pool.session_mut(idx) else { return };
  let global_id = session.global_id;
  match rawlog::RawlogSink::create(std::path::Path::new(&arguments.rawlog_directory), global_id) {
    Ok(sink) => session.rawlog = Some(sink),
    Err(error) => log::warn!("couldn't create rawlog for session {idx}: {error}"),
  }
}

/// Library entry point: the parsed `Config` (here, `Arguments`) is already constructed by
/// `main.rs`; this function never touches argv. Wires the reactor, the client pool, and the
/// default collaborators together and runs the event loop until the pool empties.
pub fn run(arguments: &Arguments) -> anyhow::Result<()> {
  let mut rng = ThreadRng::new();
  let mut pool = pool::Pool::new(arguments.clients, arguments.pool_config());
  let mut reactor = Reactor::new();
  let coordinator = LoggingCheckpointCoordinator;
  let mut host = Host { planner: NoopPlanner, source: NoopMessageSource };

  for idx in 0..arguments.clients {
    pool.spawn_or_stall(idx, &mut rng);
    attach_rawlog(arguments, &mut pool, idx);
    let stream = connect(arguments)?;
    reactor.io_add(idx, Box::new(stream));
    // §4.6 step 2 asks the planner for initial commands once the banner is read; the default
    // planner here has no banner-dependent state, so it is asked immediately instead.
    if let Some(session) = pool.session_mut(idx) {
      host.planner(idx).send_more_commands(session);
    }
  }

  loop {
    if pool.is_empty() && reactor.is_empty() {
      break;
    }
    let torn_down = reactor
      .poll_once(&mut pool, &mut host, &mut rng, arguments.disconnect_probability)
      .context("poll(2) failed")?;
    for idx in torn_down {
      reactor.io_remove(idx);
      pool.teardown(idx, &coordinator, &mut rng);
      if arguments.disconnect_quit {
        log::info!("disconnect-quit: exiting after first teardown");
        return Ok(());
      }
      if pool.session(idx).is_some() {
        attach_rawlog(arguments, &mut pool, idx);
        match connect(arguments) {
          Ok(stream) => reactor.io_add(idx, Box::new(stream)),
          Err(error) => log::warn!("couldn't reconnect session {idx}: {error}"),
        }
      }
    }
    if !pool.is_running() {
      break;
    }
  }
  Ok(())
}
