// Component C7. Owns the index-addressable session table and the backpressure/reconnect rules
// around it. No socket or reactor code lives here — `reactor.rs` drives readiness and calls into
// `Pool` only to create or tear down a slot, the same separation the teacher keeps between
// `sync::pull::run`'s worker pool and the `imap::Stream` each worker owns individually.

use std::collections::VecDeque;

use crate::collaborators::CheckpointCoordinator;
use crate::rng::Rng;
use crate::session::Session;
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct PoolConfig {
  pub username_template: String,
  pub user_rand: u32,
  pub domain_rand: u32,
  pub mailbox_template: String,
  pub max_inline_literal_size: u64,
  pub inflight_limit: usize,
  pub reconnect: bool,
}

/// Substitutes the two numeric placeholders (`{}`) in `username_template` with values drawn
/// uniformly from `0..=user_rand` / `0..=domain_rand` (§6 "USER_RAND, DOMAIN_RAND — inclusive
/// upper bounds for substitution").
fn render_username(template: &str, user_rand: u32, domain_rand: u32, rng: &mut dyn Rng) -> String {
  let user = rng.gen_range(0, user_rand);
  let domain = rng.gen_range(0, domain_rand);
  template.replacen("{}", &user.to_string(), 1).replacen("{}", &domain.to_string(), 1)
}

/// `mailbox` name template with optional per-idx `%d` marker (§6).
fn render_mailbox(template: &str, idx: usize) -> String {
  if template.contains("%d") {
    template.replace("%d", &idx.to_string())
  } else {
    template.to_string()
  }
}

pub struct Pool {
  config: PoolConfig,
  sessions: Vec<Option<Session>>,
  mailboxes: Vec<String>,
  stalled: VecDeque<usize>,
  pub stalled_flag: bool,
  pub disconnect_clients: bool,
  pub no_new_clients: bool,
  global_id_counter: u64,
  pub total_disconnects: u64,
  running: bool,
}

impl Pool {
  pub fn new(capacity: usize, config: PoolConfig) -> Self {
    Self {
      config,
      sessions: (0..capacity).map(|_| None).collect(),
      mailboxes: vec![String::new(); capacity],
      stalled: VecDeque::new(),
      stalled_flag: false,
      disconnect_clients: false,
      no_new_clients: false,
      global_id_counter: 0,
      total_disconnects: 0,
      running: true,
    }
  }

  pub fn capacity(&self) -> usize {
    self.sessions.len()
  }

  pub fn session(&self, idx: usize) -> Option<&Session> {
    self.sessions.get(idx).and_then(|s| s.as_ref())
  }

  pub fn session_mut(&mut self, idx: usize) -> Option<&mut Session> {
    self.sessions.get_mut(idx).and_then(|s| s.as_mut())
  }

  pub fn is_empty(&self) -> bool {
    self.sessions.iter().all(Option::is_none)
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub fn mailbox_for(&self, idx: usize) -> &str {
    &self.mailboxes[idx]
  }

  /// Creates a session at `idx` immediately, unless the pool is currently `stalled_flag`, in
  /// which case `idx` is queued and created later (§4.7 "stall/resume gate").
  pub fn spawn_or_stall(&mut self, idx: usize, rng: &mut dyn Rng) {
    if self.stalled_flag {
      self.stalled.push_back(idx);
      return;
    }
    self.spawn(idx, rng);
  }

  fn spawn(&mut self, idx: usize, rng: &mut dyn Rng) {
    self.global_id_counter += 1;
    let username =
      render_username(&self.config.username_template, self.config.user_rand, self.config.domain_rand, rng);
    self.mailboxes[idx] = render_mailbox(&self.config.mailbox_template, idx);
    let session =
      Session::new(idx, self.global_id_counter, username, self.config.max_inline_literal_size, self.config.inflight_limit);
    self.sessions[idx] = Some(session);
  }

  /// Up to 100 uniform-random probes for a live slot, then a linear scan (§4.7
  /// `random_idx`). Calling this on an empty pool is a logic error in the caller.
  pub fn random_idx(&self, rng: &mut dyn Rng) -> Option<usize> {
    if self.capacity() == 0 {
      return None;
    }
    for _ in 0..100 {
      let idx = rng.gen_range(0, (self.capacity() - 1) as u32) as usize;
      if self.sessions[idx].is_some() {
        return Some(idx);
      }
    }
    self.sessions.iter().position(Option::is_some)
  }

  /// Removes the session at `idx`, notifies the checkpoint coordinator, and (subject to the
  /// backpressure flags) immediately reconnects the freed slot plus up to three stalled slots
  /// (§4.7 "On session teardown").
  pub fn teardown(&mut self, idx: usize, coordinator: &dyn CheckpointCoordinator, rng: &mut dyn Rng) {
    let Some(session) = self.sessions[idx].take() else { return };
    let clean = !Storage::checkpoint_in_progress(&session.storage);
    if !clean {
      Storage::fail_checkpoint(&session.storage);
    }
    coordinator.session_torn_down(idx, clean);
    self.total_disconnects += 1;
    drop(session);

    if self.running && !self.no_new_clients && !self.disconnect_clients && self.config.reconnect {
      self.spawn_or_stall(idx, rng);
      for _ in 0..3 {
        let Some(next_idx) = self.stalled.pop_front() else { break };
        self.spawn_or_stall(next_idx, rng);
      }
    }

    if self.disconnect_clients && self.is_empty() {
      self.running = false;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rng::DeterministicRng;

  struct NoopCoordinator;
  impl CheckpointCoordinator for NoopCoordinator {
    fn session_quiesced(&self, _snapshot: &crate::collaborators::SessionSnapshot) {}
    fn session_torn_down(&self, _idx: usize, _clean: bool) {}
  }

  fn config() -> PoolConfig {
    PoolConfig {
      username_template: "user{}@domain{}".into(),
      user_rand: 100,
      domain_rand: 10,
      mailbox_template: "INBOX%d".into(),
      max_inline_literal_size: 4096,
      inflight_limit: 10,
      reconnect: true,
    }
  }

  #[test]
  fn spawn_fills_the_slot_and_renders_templates() {
    let mut pool = Pool::new(4, config());
    let mut rng = DeterministicRng::new([7, 2], false);
    pool.spawn_or_stall(1, &mut rng);
    assert_eq!("user7@domain2", pool.session(1).unwrap().username);
    assert_eq!("INBOX1", pool.mailbox_for(1));
  }

  #[test]
  fn stalled_pool_queues_instead_of_spawning() {
    let mut pool = Pool::new(4, config());
    pool.stalled_flag = true;
    let mut rng = DeterministicRng::new([1, 1], false);
    pool.spawn_or_stall(0, &mut rng);
    assert!(pool.session(0).is_none());
  }

  #[test]
  fn teardown_reconnects_freed_slot_by_default() {
    let mut pool = Pool::new(4, config());
    let mut rng = DeterministicRng::new([1, 1, 2, 2], false);
    pool.spawn_or_stall(0, &mut rng);
    let coordinator = NoopCoordinator;
    pool.teardown(0, &coordinator, &mut rng);
    assert!(pool.session(0).is_some());
    assert_eq!(1, pool.total_disconnects);
  }

  #[test]
  fn teardown_stops_the_loop_once_empty_when_disconnecting() {
    let mut pool = Pool::new(1, config());
    let mut rng = DeterministicRng::new([1, 1], false);
    pool.spawn_or_stall(0, &mut rng);
    pool.disconnect_clients = true;
    let coordinator = NoopCoordinator;
    pool.teardown(0, &coordinator, &mut rng);
    assert!(!pool.is_running());
  }
}
