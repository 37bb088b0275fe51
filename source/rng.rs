// "Random choices... abstract behind an injectable RNG interface so tests are deterministic"
// (DESIGN NOTES). Username suffixes, the random-disconnect fault-injection hook, and the 30%
// chance to persist an offline cache on mailbox close all go through this trait instead of
// calling `rand` directly, the way the teacher isolates credential handling behind the `Open`
// trait rather than hardcoding `TcpStream` everywhere.

use rand::Rng as _;
use rand::SeedableRng as _;

pub trait Rng {
  fn gen_range(&mut self, low: u32, high_inclusive: u32) -> u32;
  fn gen_bool(&mut self, probability: f64) -> bool;
}

pub struct ThreadRng(rand::rngs::StdRng);

impl ThreadRng {
  pub fn new() -> Self {
    Self(rand::rngs::StdRng::from_entropy())
  }
}

impl Default for ThreadRng {
  fn default() -> Self {
    Self::new()
  }
}

impl Rng for ThreadRng {
  fn gen_range(&mut self, low: u32, high_inclusive: u32) -> u32 {
    self.0.gen_range(low..=high_inclusive)
  }

  fn gen_bool(&mut self, probability: f64) -> bool {
    self.0.gen_bool(probability.clamp(0.0, 1.0))
  }
}

/// A seeded RNG for deterministic tests; `gen_range` walks a fixed cycle and `gen_bool` is
/// driven by an explicit always/never switch rather than a real distribution, so test authors
/// can assert on exact outcomes.
pub struct DeterministicRng {
  next_range_values: std::collections::VecDeque<u32>,
  always_true: bool,
}

impl DeterministicRng {
  pub fn new(range_values: impl IntoIterator<Item = u32>, always_true: bool) -> Self {
    Self { next_range_values: range_values.into_iter().collect(), always_true }
  }
}

impl Rng for DeterministicRng {
  fn gen_range(&mut self, low: u32, high_inclusive: u32) -> u32 {
    self.next_range_values.pop_front().unwrap_or(low).clamp(low, high_inclusive)
  }

  fn gen_bool(&mut self, _probability: f64) -> bool {
    self.always_true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic_rng_replays_configured_values() {
    let mut rng = DeterministicRng::new([3, 7], false);
    assert_eq!(3, rng.gen_range(0, 100));
    assert_eq!(7, rng.gen_range(0, 100));
    assert!(!rng.gen_bool(1.0));
  }
}
