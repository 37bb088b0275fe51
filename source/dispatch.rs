// Component C5. Routes one untagged response (the args tree with the leading `*` already
// stripped) into mutations on the mailbox view. Dispatch table from the untagged-dispatcher
// section; VANISHED gets its own documented resolution rule.

use crate::args::Arg;
use crate::error::ProtocolError;
use crate::mailbox::View;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedOutcome {
  Applied,
  Bye,
  QresyncEnabled,
  /// Raw capability atoms; the session decides whether this counts as the post-login
  /// capability list (it knows `login_state`, this module doesn't).
  Capability(Vec<String>),
}

/// `[CODE ...]` immediately after an `OK`/`NO`/`BAD` status atom, if present: `[` and `]` are
/// always tokenized as standalone one-byte atoms (see parser.rs), so the code's tokens sit
/// between them.
pub(crate) fn resp_text_code(rest: &[Arg]) -> Option<&[Arg]> {
  if !rest.first()?.is_atom("[") {
    return None;
  }
  let close = rest.iter().position(|a| a.is_atom("]"))?;
  Some(&rest[1..close])
}

fn parse_uid_set(bytes: &[u8]) -> Result<Vec<u64>, ProtocolError> {
  let text = std::str::from_utf8(bytes)
    .map_err(|_| ProtocolError::MalformedArgs("UID set is not valid UTF-8".into()))?;
  let bad = || ProtocolError::MalformedArgs(format!("malformed UID set {text:?}"));
  let mut uids = Vec::new();
  for part in text.split(',') {
    if let Some((lo, hi)) = part.split_once(':') {
      let lo: u64 = lo.parse().map_err(|_| bad())?;
      let hi: u64 = hi.parse().map_err(|_| bad())?;
      let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
      uids.extend(lo..=hi);
    } else {
      uids.push(part.parse().map_err(|_| bad())?);
    }
  }
  Ok(uids)
}

/// Applies `* OK [CODE ...] text` response codes directly to the view, the ones that are
/// meaningful to a mailbox replica (PERMANENTFLAGS); UIDVALIDITY/HIGHESTMODSEQ are reported back
/// to the caller since they belong on the session, not the view (data model section 3 keeps them
/// off `View`).
pub enum OkCode {
  None,
  UidValidity(u32),
  HighestModSeq(u64),
}

fn apply_ok_code(code: &[Arg], view: &mut View) -> OkCode {
  let Some(name) = code.first() else { return OkCode::None };
  if name.is_atom("PERMANENTFLAGS") {
    if let Some(flags) = code.get(1).and_then(Arg::as_list) {
      view.set_flags(flags);
    }
    OkCode::None
  } else if name.is_atom("UIDVALIDITY") {
    code.get(1).and_then(Arg::as_u64).map(|n| OkCode::UidValidity(n as u32)).unwrap_or(OkCode::None)
  } else if name.is_atom("HIGHESTMODSEQ") {
    code.get(1).and_then(Arg::as_u64).map(OkCode::HighestModSeq).unwrap_or(OkCode::None)
  } else {
    OkCode::None
  }
}

pub fn dispatch_untagged(
  rest: &[Arg],
  view: &mut View,
  selected: bool,
  qresync_enabled: bool,
  has_qresync_cache: bool,
) -> Result<(UntaggedOutcome, OkCode), ProtocolError> {
  let Some(first) = rest.first() else {
    return Err(ProtocolError::MalformedArgs("empty untagged response".into()));
  };

  if let Some(n) = first.as_u64() {
    let keyword = rest.get(1).ok_or_else(|| ProtocolError::MalformedArgs("missing response keyword".into()))?;
    if keyword.is_atom("EXISTS") {
      view.exists(n)?;
      return Ok((UntaggedOutcome::Applied, OkCode::None));
    }
    if keyword.is_atom("EXPUNGE") {
      // Open question (c): report "seq too high" and still attempt the expunge on the same tick.
      if n as usize > view.uidmap.len() && selected {
        log::warn!("seq too high: EXPUNGE {n} with {} known messages", view.uidmap.len());
      }
      view.expunge(n)?;
      return Ok((UntaggedOutcome::Applied, OkCode::None));
    }
    if keyword.is_atom("RECENT") {
      view.recent_count = n;
      if n as usize == view.uidmap.len() {
        view.storage.borrow_mut().seen_all_recent = true;
      }
      return Ok((UntaggedOutcome::Applied, OkCode::None));
    }
    if keyword.is_atom("FETCH") {
      let items = rest.get(2).and_then(Arg::as_list).ok_or_else(|| {
        ProtocolError::MalformedArgs(format!("FETCH {n} has no attribute list"))
      })?;
      view.apply_fetch(n, items)?;
      return Ok((UntaggedOutcome::Applied, OkCode::None));
    }
    return Err(ProtocolError::MalformedArgs(format!("unrecognized numeric response {n}")));
  }

  if first.is_atom("BYE") {
    return Ok((UntaggedOutcome::Bye, OkCode::None));
  }

  if first.is_atom("FLAGS") {
    let flags = rest
      .get(1)
      .and_then(Arg::as_list)
      .ok_or_else(|| ProtocolError::MalformedArgs("FLAGS without a list".into()))?;
    view.set_flags(flags);
    return Ok((UntaggedOutcome::Applied, OkCode::None));
  }

  if first.is_atom("CAPABILITY") {
    let caps = rest[1..]
      .iter()
      .filter_map(Arg::as_bytes)
      .map(|b| String::from_utf8_lossy(b).into_owned())
      .collect();
    return Ok((UntaggedOutcome::Capability(caps), OkCode::None));
  }

  if first.is_atom("SEARCH") {
    // Forwarded to the (external) search-result collector; not modeled on View.
    return Ok((UntaggedOutcome::Applied, OkCode::None));
  }

  if first.is_atom("ENABLED") {
    let mut outcome = UntaggedOutcome::Applied;
    for atom in &rest[1..] {
      if atom.is_atom("QRESYNC") {
        outcome = UntaggedOutcome::QresyncEnabled;
      }
    }
    return Ok((outcome, OkCode::None));
  }

  if first.is_atom("VANISHED") {
    if !qresync_enabled {
      return Err(ProtocolError::VanishedWithoutQresync);
    }
    let earlier = rest.get(1).and_then(Arg::as_list).map(|l| l.iter().any(|a| a.is_atom("EARLIER"))).unwrap_or(false);
    let set_index = if earlier { 2 } else { 1 };
    let set_bytes = rest
      .get(set_index)
      .and_then(Arg::as_bytes)
      .ok_or_else(|| ProtocolError::MalformedArgs("VANISHED without a UID set".into()))?;
    let uids = parse_uid_set(set_bytes)?;
    if earlier && !has_qresync_cache {
      return Ok((UntaggedOutcome::Applied, OkCode::None));
    }
    if view.known_uid_count == view.uidmap.len() {
      view.expunge_uids(&uids)?;
    } else {
      for uid in uids {
        view.expunge_uid(uid)?;
      }
    }
    return Ok((UntaggedOutcome::Applied, OkCode::None));
  }

  if first.is_atom("THREAD") {
    view.last_thread_reply = rest[1..].iter().filter_map(Arg::as_bytes).flat_map(|b| b.iter().copied()).collect();
    return Ok((UntaggedOutcome::Applied, OkCode::None));
  }

  if first.is_atom("OK") {
    let code = resp_text_code(&rest[1..]).map(|code| apply_ok_code(code, view)).unwrap_or(OkCode::None);
    return Ok((UntaggedOutcome::Applied, code));
  }

  if first.is_atom("NO") {
    return Ok((UntaggedOutcome::Applied, OkCode::None));
  }

  if first.is_atom("BAD") {
    let text = rest[1..]
      .iter()
      .filter_map(Arg::as_bytes)
      .map(|b| String::from_utf8_lossy(b).into_owned())
      .collect::<Vec<_>>()
      .join(" ");
    return Err(ProtocolError::UntaggedBad(text));
  }

  Err(ProtocolError::MalformedArgs(format!("unrecognized untagged keyword {first:?}")))
}
