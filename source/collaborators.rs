// External interfaces (spec section 6) the core drives but never implements business logic for:
// the command planner, the APPEND message source, the offline cache, and the checkpoint
// coordinator. The teacher keeps exactly this kind of seam as a trait (`sync::Open`, generic over
// the transport) rather than hardcoding a concrete type, so collaborators here follow the same
// shape: small traits, no default methods hiding policy, implementors own all the "what should
// happen" decisions.

use crate::commands::Command;
use crate::mailbox::CacheKey;
use crate::session::Session;

/// Decides which commands to send next and is notified when one finishes. Must not block: every
/// method is called from inside the reactor's readiness callback.
pub trait Planner {
  fn send_more_commands(&mut self, session: &mut Session) -> usize;
  fn cmd_reply_finish(&mut self, session: &mut Session, command: &Command);
}

/// Supplies APPEND payloads as (header bytes, body bytes) pairs.
pub trait MessageSource {
  fn next_message(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// Key/value store for a view's serialized state, keyed by (user, mailbox, uidvalidity).
pub trait OfflineCache {
  fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;
  fn put(&self, key: &CacheKey, blob: Vec<u8>);
}

/// A cheap, owned, read-only projection of a view, handed to the checkpoint coordinator so it
/// can compare sessions without borrowing into the pool.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
  pub idx: usize,
  pub username: String,
  pub uidmap: Vec<u64>,
  pub flags_vocabulary: Vec<String>,
  pub recent_count: u64,
}

/// Notified as sessions quiesce (no in-flight commands) and as they tear down, so an external
/// comparator can flag divergence between replicas of the same mailbox.
pub trait CheckpointCoordinator {
  fn session_quiesced(&self, snapshot: &SessionSnapshot);
  fn session_torn_down(&self, idx: usize, clean: bool);
}

/// An in-memory `OfflineCache` used by tests and as a default when no real cache is wired up.
#[derive(Debug, Default)]
pub struct InMemoryOfflineCache(std::cell::RefCell<std::collections::HashMap<CacheKey, Vec<u8>>>);

impl InMemoryOfflineCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl OfflineCache for InMemoryOfflineCache {
  fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
    self.0.borrow().get(key).cloned()
  }

  fn put(&self, key: &CacheKey, blob: Vec<u8>) {
    self.0.borrow_mut().insert(key.clone(), blob);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn in_memory_cache_round_trips() {
    let cache = InMemoryOfflineCache::new();
    let key = CacheKey { user: "u".into(), mailbox: "INBOX".into(), uidvalidity: 1 };
    assert_eq!(None, cache.get(&key));
    cache.put(&key, vec![1, 2, 3]);
    assert_eq!(Some(vec![1, 2, 3]), cache.get(&key));
  }
}
