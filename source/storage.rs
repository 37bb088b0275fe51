// "Storage and M as shared reference-counted records with explicit release; views hold
// non-owning references only" (DESIGN NOTES). The event loop is single-threaded (section 5: "no
// parallelism and no cross-thread shared state; therefore no locks exist in the core"), so plain
// `Rc<RefCell<_>>` is the correct sharing primitive here, not `Arc<Mutex<_>>` — there is nothing
// in this codebase that crosses a thread boundary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Message state shared across every session's view of the same mailbox, keyed by UID. Created
/// on first FETCH, destroyed implicitly once no view still references it (the last `Rc` drops).
#[derive(Debug, Clone)]
pub struct MessageState {
  pub uid: u64,
  pub headers: Option<Vec<u8>>,
  pub body: Option<Vec<u8>>,
  /// Flags as observed at the last checkpoint, used by the (external) checkpoint coordinator to
  /// compare sessions; the core only ever writes this, never interprets it.
  pub flags_at_last_checkpoint: Vec<String>,
}

impl MessageState {
  pub fn new(uid: u64) -> Self {
    Self { uid, headers: None, body: None, flags_at_last_checkpoint: Vec::new() }
  }
}

/// Cross-session facts about one mailbox. Reference-counted: a session keeps one `Rc<RefCell<_>>`
/// for as long as its view is selected on that mailbox, and drops it when the view is freed.
#[derive(Debug, Default)]
pub struct Storage {
  pub seen_all_recent: bool,
  messages_by_uid: HashMap<u64, Rc<RefCell<MessageState>>>,
  checkpoint_in_progress: bool,
}

impl Storage {
  pub fn new() -> Rc<RefCell<Self>> {
    Rc::new(RefCell::new(Self::default()))
  }

  /// Returns the shared state for `uid`, creating it on first access (first FETCH).
  pub fn message(this: &Rc<RefCell<Self>>, uid: u64) -> Rc<RefCell<MessageState>> {
    let mut storage = this.borrow_mut();
    storage
      .messages_by_uid
      .entry(uid)
      .or_insert_with(|| Rc::new(RefCell::new(MessageState::new(uid))))
      .clone()
  }

  /// Drops the shared record for `uid`; called once a view has fully expunged it and no other
  /// view is expected to reference it again. A genuinely still-referenced `Rc` simply survives
  /// until its other holders drop it too.
  pub fn forget_message(this: &Rc<RefCell<Self>>, uid: u64) {
    this.borrow_mut().messages_by_uid.remove(&uid);
  }

  pub fn begin_checkpoint(this: &Rc<RefCell<Self>>) {
    this.borrow_mut().checkpoint_in_progress = true;
  }

  pub fn checkpoint_in_progress(this: &Rc<RefCell<Self>>) -> bool {
    this.borrow().checkpoint_in_progress
  }

  /// "If a teardown occurs with a checkpoint in progress, signal a negative-checkpoint result to
  /// the storage before releasing it" (pool lifecycle).
  pub fn fail_checkpoint(this: &Rc<RefCell<Self>>) {
    this.borrow_mut().checkpoint_in_progress = false;
  }

  pub fn finish_checkpoint(this: &Rc<RefCell<Self>>) {
    this.borrow_mut().checkpoint_in_progress = false;
  }
}

/// A non-owning handle a view can upgrade when it needs to touch shared storage without itself
/// holding the mailbox alive (not currently used outside tests, but documents the ownership rule
/// from the data model: "views hold non-owning references only" applies to M, not to storage
/// itself, which the view *does* own a strong reference to for its lifetime).
pub type WeakStorage = Weak<RefCell<Storage>>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn message_state_is_shared_across_lookups() {
    let storage = Storage::new();
    let a = Storage::message(&storage, 42);
    let b = Storage::message(&storage, 42);
    assert!(Rc::ptr_eq(&a, &b));
  }

  #[test]
  fn forgetting_a_message_drops_the_shared_slot() {
    let storage = Storage::new();
    let state = Storage::message(&storage, 1);
    Storage::forget_message(&storage, 1);
    assert_eq!(1, Rc::strong_count(&state));
  }
}
