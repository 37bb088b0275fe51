// Component A3. The single-threaded, cooperative event loop described in section 5: one
// `poll(2)` call drives every session's read/write readiness and a sorted set of delay timers,
// nothing here ever blocks on more than one fd at a time and nothing crosses a thread boundary.
// The teacher has no direct precedent for this (its `sync::pull` workers block one thread per
// connection); this loop is built directly against `libc::poll`, the lowest-level crate already
// in the aligned dependency stack, rather than pulling in an async runtime the rest of the crate
// doesn't use.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use crate::collaborators::{CheckpointCoordinator, MessageSource, Planner};
use crate::error::Disposition;
use crate::pool::Pool;
use crate::rng::Rng;

/// A readable, writable, fd-bearing connection. Implemented by `TcpStream` directly; tests swap
/// in an in-memory double (§8 "the reactor and TCP layer are swapped for a trait object in
/// tests", mirroring the teacher's own `sync::Open` generic-over-transport pattern).
pub trait Transport: Read + Write + AsRawFd {}
impl<T: Read + Write + AsRawFd> Transport for T {}

/// Per-session collaborators the reactor must reach on every readable tick. The pool owns the
/// sessions; whoever owns the planner/message-source policy (the binary's `run()`) implements
/// this so the reactor never has to know what a planner even is beyond the trait.
pub trait ReactorHost {
  fn planner(&mut self, idx: usize) -> &mut dyn Planner;
  fn message_source(&mut self, idx: usize) -> &mut dyn MessageSource;
}

struct Slot {
  transport: Box<dyn Transport>,
}

/// Drives readiness for every registered fd plus a min-heap of delay timers (§4.6 step 6: "the
/// reactor... re-arms the read watcher on timer expiry").
pub struct Reactor {
  slots: BTreeMap<usize, Slot>,
  timers: BTreeMap<usize, Instant>,
  read_buf: [u8; 65536],
}

impl Default for Reactor {
  fn default() -> Self {
    Self::new()
  }
}

impl Reactor {
  pub fn new() -> Self {
    Self { slots: BTreeMap::new(), timers: BTreeMap::new(), read_buf: [0u8; 65536] }
  }

  pub fn io_add(&mut self, idx: usize, transport: Box<dyn Transport>) {
    self.slots.insert(idx, Slot { transport });
  }

  pub fn io_remove(&mut self, idx: usize) -> Option<Box<dyn Transport>> {
    self.timers.remove(&idx);
    self.slots.remove(&idx).map(|slot| slot.transport)
  }

  pub fn timeout_add(&mut self, idx: usize, at: Instant) {
    self.timers.insert(idx, at);
  }

  pub fn timeout_remove(&mut self, idx: usize) {
    self.timers.remove(&idx);
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  fn next_timeout(&self, now: Instant) -> Option<Duration> {
    self.timers.values().map(|at| at.saturating_duration_since(now)).min()
  }

  /// One iteration: `poll(2)` for up to the soonest timer (or indefinitely with none pending),
  /// then services whichever fds came back readable/writable and whichever timers expired.
  /// Returns the set of idx whose session asked to be torn down this tick, so the caller can run
  /// `Pool::teardown` for each (the reactor itself never touches `Pool`'s reconnect policy).
  pub fn poll_once(
    &mut self,
    pool: &mut Pool,
    host: &mut dyn ReactorHost,
    rng: &mut dyn Rng,
    disconnect_probability: f64,
  ) -> io::Result<Vec<usize>> {
    let now = Instant::now();
    for (&idx, &at) in self.timers.clone().iter() {
      if at <= now {
        self.timers.remove(&idx);
        if let Some(session) = pool.session_mut(idx) {
          session.resume();
        }
      }
    }

    if self.slots.is_empty() {
      return Ok(Vec::new());
    }

    let idxs: Vec<usize> = self.slots.keys().copied().collect();
    let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(idxs.len());
    for &idx in &idxs {
      let slot = &self.slots[&idx];
      let delayed = pool.session(idx).map(|s| s.delayed).unwrap_or(true);
      let wants_write = pool.session(idx).map(|s| s.has_output()).unwrap_or(false);
      let mut events = 0;
      if !delayed {
        events |= libc::POLLIN;
      }
      if wants_write {
        events |= libc::POLLOUT;
      }
      pollfds.push(libc::pollfd { fd: slot.transport.as_raw_fd(), events, revents: 0 });
    }

    let timeout_ms = match self.next_timeout(now) {
      Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
      None => -1,
    };
    let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
      let error = io::Error::last_os_error();
      if error.kind() == io::ErrorKind::Interrupted {
        return Ok(Vec::new());
      }
      return Err(error);
    }

    let mut torn_down = Vec::new();
    for (&idx, pollfd) in idxs.iter().zip(pollfds.iter()) {
      if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        torn_down.push(idx);
        continue;
      }
      if pollfd.revents & libc::POLLOUT != 0 {
        if let Err(error) = self.flush_writes(idx, pool) {
          log::warn!("write failed for session {idx}: {error}");
          torn_down.push(idx);
          continue;
        }
      }
      if pollfd.revents & libc::POLLIN != 0 {
        match self.service_readable(idx, pool, host, rng, disconnect_probability) {
          Ok(true) => {}
          Ok(false) => torn_down.push(idx),
          Err(error) => {
            log::warn!("protocol error for session {idx}: {error}");
            torn_down.push(idx);
          }
        }
      }
    }
    Ok(torn_down)
  }

  fn flush_writes(&mut self, idx: usize, pool: &mut Pool) -> io::Result<()> {
    let Some(session) = pool.session_mut(idx) else { return Ok(()) };
    if !session.has_output() {
      return Ok(());
    }
    let bytes = session.drain_output();
    let Some(slot) = self.slots.get_mut(&idx) else { return Ok(()) };
    slot.transport.write_all(&bytes)
  }

  /// Session lifecycle step 3: read, random-disconnect fault injection, `feed()`. Returns `Ok
  /// (false)` for a clean EOF or a session-requested teardown, never for a protocol error (those
  /// surface as `Err`).
  fn service_readable(
    &mut self,
    idx: usize,
    pool: &mut Pool,
    host: &mut dyn ReactorHost,
    rng: &mut dyn Rng,
    disconnect_probability: f64,
  ) -> Result<bool, crate::error::ProtocolError> {
    let Some(slot) = self.slots.get_mut(&idx) else { return Ok(false) };
    let read = match slot.transport.read(&mut self.read_buf) {
      Ok(0) => return Ok(false),
      Ok(n) => n,
      Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(true),
      Err(error) => {
        log::warn!("read failed for session {idx}: {error}");
        return Ok(false);
      }
    };
    let Some(session) = pool.session_mut(idx) else { return Ok(false) };
    if session.maybe_inject_disconnect(rng, disconnect_probability) {
      return Ok(false);
    }
    let planner = host.planner(idx);
    let message_source = host.message_source(idx);
    let disposition = session.feed(&self.read_buf[..read], planner, message_source)?;
    if disposition == Disposition::Destroying {
      return Ok(false);
    }
    // §4.6 step 2/4: once a tick's input has been applied, give the planner a chance to enqueue
    // more work before the next readiness wait.
    host.planner(idx).send_more_commands(session);
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::os::unix::net::UnixStream;

  struct NoopHost;
  impl ReactorHost for NoopHost {
    fn planner(&mut self, _idx: usize) -> &mut dyn Planner {
      unimplemented!("not exercised by these tests")
    }
    fn message_source(&mut self, _idx: usize) -> &mut dyn MessageSource {
      unimplemented!("not exercised by these tests")
    }
  }

  #[test]
  fn empty_reactor_polls_without_blocking() {
    let mut reactor = Reactor::new();
    let mut pool = Pool::new(0, crate::pool::PoolConfig {
      username_template: "u{}@d{}".into(),
      user_rand: 1,
      domain_rand: 1,
      mailbox_template: "INBOX".into(),
      max_inline_literal_size: 4096,
      inflight_limit: 10,
      reconnect: true,
    });
    let mut host = NoopHost;
    let mut rng = crate::rng::DeterministicRng::new([0], false);
    let torn_down = reactor.poll_once(&mut pool, &mut host, &mut rng, 0.0).unwrap();
    assert!(torn_down.is_empty());
  }

  #[test]
  fn hangup_on_the_peer_side_is_reported_as_torn_down() {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    drop(b);
    let mut reactor = Reactor::new();
    reactor.io_add(0, Box::new(a));
    let mut pool = Pool::new(1, crate::pool::PoolConfig {
      username_template: "u{}@d{}".into(),
      user_rand: 1,
      domain_rand: 1,
      mailbox_template: "INBOX".into(),
      max_inline_literal_size: 4096,
      inflight_limit: 10,
      reconnect: true,
    });
    let mut rng = crate::rng::DeterministicRng::new([0], false);
    pool.spawn_or_stall(0, &mut rng);
    let mut host = NoopHost;
    let torn_down = reactor.poll_once(&mut pool, &mut host, &mut rng, 0.0).unwrap();
    assert_eq!(vec![0], torn_down);
  }
}
