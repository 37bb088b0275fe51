// https://www.rfc-editor.org/rfc/rfc3501#section-7 - Server Responses
// https://www.rfc-editor.org/rfc/rfc4549 - Synchronization Operations for Disconnected IMAP4 Clients
//
// The per-session replica of one selected mailbox (data model section 3, component C3).
// Mutations here are the only place sequence-number bookkeeping happens; the untagged dispatcher
// (dispatch.rs) decides *which* operation a server line calls for, this module decides what that
// operation actually does to the view.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::args::Arg;
use crate::error::ProtocolError;
use crate::storage::{MessageState, Storage};

#[derive(Debug, Clone, Default)]
pub struct MessageSlot {
  pub state: Option<Rc<RefCell<MessageState>>>,
  pub flags: Vec<String>,
  pub modseq: u64,
  pub fetch_refcount: u32,
}

#[derive(Debug)]
pub struct View {
  pub uidmap: Vec<u64>,
  pub messages: Vec<MessageSlot>,
  pub known_uid_count: usize,
  pub recent_count: u64,
  pub last_thread_reply: Vec<u8>,
  pub flags_vocabulary: HashSet<String>,
  pub storage: Rc<RefCell<Storage>>,
}

impl View {
  pub fn new(storage: Rc<RefCell<Storage>>) -> Self {
    Self {
      uidmap: Vec::new(),
      messages: Vec::new(),
      known_uid_count: 0,
      recent_count: 0,
      last_thread_reply: Vec::new(),
      flags_vocabulary: HashSet::new(),
      storage,
    }
  }

  fn assert_invariants(&self) {
    debug_assert_eq!(self.uidmap.len(), self.messages.len());
    debug_assert_eq!(self.known_uid_count, self.uidmap.iter().filter(|&&uid| uid != 0).count());
  }

  /// `view.exists(n)` (dispatch table, numeric + EXISTS).
  pub fn exists(&mut self, n: u64) -> Result<(), ProtocolError> {
    let n = n as usize;
    let previous_len = self.uidmap.len();
    if n < previous_len {
      self.uidmap.truncate(n);
      self.messages.truncate(n);
      self.known_uid_count = self.uidmap.iter().filter(|&&uid| uid != 0).count();
      self.assert_invariants();
      return Err(ProtocolError::ExistsRegressed { n: n as u64, previous_len });
    }
    self.uidmap.resize(n, 0);
    self.messages.resize_with(n, MessageSlot::default);
    self.assert_invariants();
    Ok(())
  }

  /// `view.expunge(seq)`. `seq` is 1-based.
  pub fn expunge(&mut self, seq: u64) -> Result<(), ProtocolError> {
    let Some(idx) = (seq as usize).checked_sub(1) else {
      return Err(ProtocolError::ExpungeOutOfRange { seq });
    };
    if idx >= self.uidmap.len() {
      return Err(ProtocolError::ExpungeOutOfRange { seq });
    }
    if self.messages[idx].fetch_refcount > 0 {
      return Err(ProtocolError::ExpungeReferenced { seq });
    }
    let uid = self.uidmap.remove(idx);
    let slot = self.messages.remove(idx);
    if uid != 0 {
      self.known_uid_count -= 1;
      drop(slot);
      Storage::forget_message(&self.storage, uid);
    }
    self.assert_invariants();
    Ok(())
  }

  /// `view.expunge_uid(uid)`: VANISHED's single-UID resolution rule, including the
  /// cannot-tell-which-physical-message fallback onto an unknown (UID 0) slot.
  pub fn expunge_uid(&mut self, uid: u64) -> Result<(), ProtocolError> {
    let lowest_ge = self.uidmap.iter().position(|&have| have != 0 && have >= uid);
    if let Some(i) = lowest_ge {
      if self.uidmap[i] == uid {
        return self.expunge((i + 1) as u64);
      }
      if let Some(unknown) = self.uidmap[..i].iter().position(|&have| have == 0) {
        return self.expunge((unknown + 1) as u64);
      }
      return Err(ProtocolError::ExpungeUidNotFound { uid });
    }
    if let Some(unknown) = self.uidmap.iter().position(|&have| have == 0) {
      return self.expunge((unknown + 1) as u64);
    }
    Err(ProtocolError::ExpungeUidNotFound { uid })
  }

  /// `view.expunge_uids(set)`: expunges every *known* UID present in `uids`, highest sequence
  /// number first so earlier indices stay valid as later ones are removed.
  pub fn expunge_uids(&mut self, uids: &[u64]) -> Result<(), ProtocolError> {
    let set: HashSet<u64> = uids.iter().copied().collect();
    let mut seqs: Vec<usize> = self
      .uidmap
      .iter()
      .enumerate()
      .filter(|(_, &uid)| uid != 0 && set.contains(&uid))
      .map(|(i, _)| i + 1)
      .collect();
    seqs.sort_unstable_by(|a, b| b.cmp(a));
    for seq in seqs {
      self.expunge(seq as u64)?;
    }
    Ok(())
  }

  /// `view.set_flags(args)`: records the mailbox's flag vocabulary from a FLAGS response's
  /// parenthesized list contents.
  pub fn set_flags(&mut self, flags: &[Arg]) {
    self.flags_vocabulary.clear();
    for flag in flags {
      if let Some(bytes) = flag.as_bytes() {
        self.flags_vocabulary.insert(String::from_utf8_lossy(bytes).into_owned());
      }
    }
  }

  /// Marks `seqs` as having an outstanding FETCH, bumping `fetch_refcount` so invariant I3 can
  /// reject a concurrent EXPUNGE. Called when a FETCH command is sent.
  pub fn begin_fetch(&mut self, seqs: &[u64]) {
    for &seq in seqs {
      if let Some(slot) = (seq as usize).checked_sub(1).and_then(|i| self.messages.get_mut(i)) {
        slot.fetch_refcount += 1;
      }
    }
  }

  /// Applies one untagged `FETCH` response's data items to sequence number `seq`, updating
  /// flags/UID/body/modseq and clearing the outstanding-fetch mark for it.
  pub fn apply_fetch(&mut self, seq: u64, items: &[Arg]) -> Result<(), ProtocolError> {
    let Some(idx) = (seq as usize).checked_sub(1) else {
      return Err(ProtocolError::ExpungeOutOfRange { seq });
    };
    if idx >= self.messages.len() {
      return Err(ProtocolError::ExpungeOutOfRange { seq });
    }
    // Most data items are a flat `key value` pair, but `BODY[section]<partial>` tokenizes as
    // `BODY`, `[`, zero or more section atoms, `]`, an optional `<n>` partial marker, then the
    // value — the `[`/`]` brackets are their own tokens, not part of the `BODY` atom.
    let mut uid = None;
    let mut i = 0;
    while i < items.len() {
      let key = &items[i];
      if key.is_atom("UID") {
        uid = items.get(i + 1).and_then(Arg::as_u64);
        i += 2;
      } else if key.is_atom("FLAGS") {
        let flags = items
          .get(i + 1)
          .and_then(Arg::as_list)
          .unwrap_or(&[])
          .iter()
          .filter_map(Arg::as_bytes)
          .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
          .collect();
        self.messages[idx].flags = flags;
        i += 2;
      } else if key.is_atom("MODSEQ") {
        if let Some(n) = items.get(i + 1).and_then(Arg::as_list).and_then(|list| list.first()).and_then(Arg::as_u64) {
          self.messages[idx].modseq = n;
        }
        i += 2;
      } else if key.is_atom("BODY") {
        let mut j = i + 1;
        if items.get(j).map(|arg| arg.is_atom("[")).unwrap_or(false) {
          j += 1;
          while j < items.len() && !items[j].is_atom("]") {
            j += 1;
          }
          j += 1;
        }
        if items.get(j).and_then(Arg::as_bytes).map(|bytes| bytes.starts_with(b"<")).unwrap_or(false) {
          j += 1;
        }
        if let Some(body) = items.get(j).and_then(Arg::as_bytes) {
          if let Some(uid) = uid.or(if self.uidmap[idx] != 0 { Some(self.uidmap[idx]) } else { None }) {
            let state = Storage::message(&self.storage, uid);
            state.borrow_mut().body = Some(body.to_vec());
          }
        }
        i = j + 1;
      } else {
        i += 2;
      }
    }
    if let Some(uid) = uid {
      if self.uidmap[idx] == 0 {
        self.uidmap[idx] = uid;
        self.known_uid_count += 1;
      }
      self.messages[idx].state = Some(Storage::message(&self.storage, uid));
    }
    self.messages[idx].fetch_refcount = self.messages[idx].fetch_refcount.saturating_sub(1);
    self.assert_invariants();
    Ok(())
  }

  pub fn save_offline_cache(&self, key: &CacheKey, cache: &dyn crate::collaborators::OfflineCache) {
    let blob = OfflineCacheBlob {
      uidmap: self.uidmap.clone(),
      known_uid_count: self.known_uid_count,
      recent_count: self.recent_count,
      flags_vocabulary: self.flags_vocabulary.iter().cloned().collect(),
    };
    if let Ok(bytes) = serde_json::to_vec(&blob) {
      cache.put(key, bytes);
    }
  }

  pub fn load_offline_cache(&mut self, key: &CacheKey, cache: &dyn crate::collaborators::OfflineCache) -> bool {
    let Some(bytes) = cache.get(key) else { return false };
    let Ok(blob) = serde_json::from_slice::<OfflineCacheBlob>(&bytes) else { return false };
    self.uidmap = blob.uidmap;
    self.messages = self.uidmap.iter().map(|_| MessageSlot::default()).collect();
    self.known_uid_count = blob.known_uid_count;
    self.recent_count = blob.recent_count;
    self.flags_vocabulary = blob.flags_vocabulary.into_iter().collect();
    true
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
  pub user: String,
  pub mailbox: String,
  pub uidvalidity: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OfflineCacheBlob {
  uidmap: Vec<u64>,
  known_uid_count: usize,
  recent_count: u64,
  flags_vocabulary: Vec<String>,
}
