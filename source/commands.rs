// Component C4. Tracks outstanding tagged commands for one session and matches tagged replies
// back to them. Per the design notes ("prefer a variant type with per-state data over a function
// pointer plus opaque context"), a `Command` carries no stored closure; `state` is a closed enum
// and the tagged-reply handling in dispatch.rs matches on it directly, the way the teacher
// matches on its own `Select`/`Append`/`Store`/`Move` enums rather than boxing callbacks.

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
  Login,
  Select,
  Fetch,
  Store,
  Expunge,
  Append,
  Copy,
  Move,
  Logout,
  Noop,
  Checkpoint,
  Search,
  Thread,
  Capability,
  Enable,
  Other,
}

/// Bookkeeping for an APPEND whose literal body is being streamed across several writable
/// ticks (session lifecycle step 5). `remaining_body` holds whatever hasn't been written to the
/// output stream yet; `vsize_left` mirrors its length for quick inspection without borrowing it.
#[derive(Debug, Clone, Default)]
pub struct AppendProgress {
  pub vsize_left: u64,
  pub remaining_body: Vec<u8>,
}

impl AppendProgress {
  pub fn new(body: Vec<u8>) -> Self {
    Self { vsize_left: body.len() as u64, remaining_body: body }
  }

  /// Takes up to `max` bytes off the front of the remaining body, for one continuation write.
  pub fn take(&mut self, max: usize) -> Vec<u8> {
    let take = max.min(self.remaining_body.len());
    let chunk = self.remaining_body.drain(..take).collect();
    self.vsize_left = self.remaining_body.len() as u64;
    chunk
  }

  pub fn is_done(&self) -> bool {
    self.remaining_body.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct Command {
  pub tag_number: u64,
  pub state: CommandState,
  pub cmdline: Vec<u8>,
  pub expect_bad: bool,
  pub append: Option<AppendProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
  Ok,
  No,
  Bad,
  Continue,
}

/// `"<global_id>.<tag_number>"`, assigned on every `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub global_id: u64,
  pub tag_number: u64,
}

impl Tag {
  pub fn render(&self) -> String {
    format!("{}.{}", self.global_id, self.tag_number)
  }

  /// Parses `"<global_id>.<n>"` and checks the prefix against `expected_global_id` (I6).
  pub fn parse(text: &[u8], expected_global_id: u64) -> Result<u64, ProtocolError> {
    let text = std::str::from_utf8(text)
      .map_err(|_| ProtocolError::UnexpectedTaggedReply { tag: String::from_utf8_lossy(text).into_owned() })?;
    let (prefix, suffix) = text
      .split_once('.')
      .ok_or_else(|| ProtocolError::UnexpectedTaggedReply { tag: text.to_string() })?;
    let global_id: u64 = prefix
      .parse()
      .map_err(|_| ProtocolError::UnexpectedTaggedReply { tag: text.to_string() })?;
    let tag_number: u64 = suffix
      .parse()
      .map_err(|_| ProtocolError::UnexpectedTaggedReply { tag: text.to_string() })?;
    if global_id != expected_global_id {
      return Err(ProtocolError::UnexpectedTaggedReply { tag: text.to_string() });
    }
    Ok(tag_number)
  }
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
  global_id: u64,
  tag_counter: u64,
  commands: Vec<Command>,
}

impl CommandRegistry {
  pub fn new(global_id: u64) -> Self {
    Self { global_id, tag_counter: 0, commands: Vec::new() }
  }

  pub fn global_id(&self) -> u64 {
    self.global_id
  }

  pub fn tag_counter(&self) -> u64 {
    self.tag_counter
  }

  /// Assigns a tag and links the command; returns the tag so the caller can render the full
  /// wire line (`"<tag> <cmdline>\r\n"`).
  pub fn send(&mut self, cmdline: Vec<u8>, state: CommandState, expect_bad: bool) -> Tag {
    self.tag_counter += 1;
    let tag_number = self.tag_counter;
    let append = matches!(state, CommandState::Append).then(AppendProgress::default);
    self.commands.push(Command { tag_number, state, cmdline, expect_bad, append });
    Tag { global_id: self.global_id, tag_number }
  }

  pub fn lookup(&self, tag_number: u64) -> Option<&Command> {
    self.commands.iter().find(|c| c.tag_number == tag_number)
  }

  pub fn lookup_mut(&mut self, tag_number: u64) -> Option<&mut Command> {
    self.commands.iter_mut().find(|c| c.tag_number == tag_number)
  }

  /// Attaches the message body an APPEND will stream out across subsequent `+` continuations.
  /// Called once, right after `send`, by whoever sent the command (the planner knows the body;
  /// the registry itself never talks to a `MessageSource`).
  pub fn attach_append_body(&mut self, tag_number: u64, body: Vec<u8>) {
    if let Some(command) = self.lookup_mut(tag_number) {
      command.append = Some(AppendProgress::new(body));
    }
  }

  /// The most recently linked command, invoked by a `+` continuation reply.
  pub fn last(&self) -> Option<&Command> {
    self.commands.last()
  }

  pub fn last_mut(&mut self) -> Option<&mut Command> {
    self.commands.last_mut()
  }

  /// Unlinks and frees `tag_number`'s command, matching it against a parsed tagged reply. I6.
  pub fn finish(&mut self, tag_number: u64) -> Result<Command, ProtocolError> {
    let pos = self
      .commands
      .iter()
      .position(|c| c.tag_number == tag_number)
      .ok_or_else(|| ProtocolError::UnexpectedTaggedReply {
        tag: Tag { global_id: self.global_id, tag_number }.render(),
      })?;
    Ok(self.commands.remove(pos))
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }

  pub fn len(&self) -> usize {
    self.commands.len()
  }
}
