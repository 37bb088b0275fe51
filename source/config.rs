// Component A2. CLI/config parsing, explicitly out of scope for the protocol core (section 1)
// but still needed to run the thing; kept in its own module rather than folded into `lib.rs`
// because the teacher does the same (`sin::Arguments` is its own top-level `clap::Args`).

use std::num;
use std::time::Duration;

fn parse_duration_ms(argument: &str) -> Result<Duration, num::ParseIntError> {
  Ok(Duration::from_millis(argument.parse()?))
}

#[derive(clap::Args, Debug, Clone)]
#[group(skip)]
pub struct Arguments {
  #[arg(long = "ip", help = "Server address")]
  pub ip: String,
  #[arg(long = "port", help = "Server port")]
  pub port: u16,

  #[arg(long = "clients", help = "Number of simulated clients to run concurrently", default_value_t = 16)]
  pub clients: usize,

  #[arg(
    long = "username-template",
    help = "Username template with two `{}` substitutions: user, domain",
    default_value_t = String::from("user{}@domain{}.test")
  )]
  pub username_template: String,
  #[arg(long = "user-rand", help = "Inclusive upper bound for the username substitution", default_value_t = 1000)]
  pub user_rand: u32,
  #[arg(long = "domain-rand", help = "Inclusive upper bound for the domain substitution", default_value_t = 10)]
  pub domain_rand: u32,

  #[arg(
    long = "mailbox",
    help = "Mailbox name template; a `%d` marker is replaced with the client's pool index",
    default_value_t = String::from("INBOX")
  )]
  pub mailbox: String,

  #[arg(long = "rawlog", help = "Capture every inbound/outbound byte per session to rawlog.<global_id>", default_value_t = false)]
  pub rawlog: bool,
  #[arg(long = "rawlog-directory", help = "Directory rawlog files are written to", default_value_t = String::from("."))]
  pub rawlog_directory: String,

  #[arg(long = "no-tracking", help = "Suppress FETCH metadata updates (cheaper, less useful for checkpointing)", default_value_t = false)]
  pub no_tracking: bool,

  #[arg(long = "error-quit", help = "Exit the process on the first protocol error", default_value_t = false)]
  pub error_quit: bool,
  #[arg(long = "disconnect-quit", help = "Exit the process on the first session teardown", default_value_t = false)]
  pub disconnect_quit: bool,

  #[arg(long = "disconnect-probability", help = "Per-tick probability (0.0-1.0) of injecting a random disconnect", default_value_t = 0.0)]
  pub disconnect_probability: f64,

  #[arg(long = "max-inline-literal-size", help = "Literals at or under this size are buffered inline", default_value_t = 4096)]
  pub max_inline_literal_size: u64,
  #[arg(long = "max-inflight-commands", help = "How many unanswered tagged commands a session may pipeline", default_value_t = 10)]
  pub max_inflight_commands: usize,

  #[arg(long = "no-reconnect", help = "Do not recreate a session at a freed slot after teardown", default_value_t = false)]
  pub no_reconnect: bool,

  #[arg(long = "delay-ms", value_parser = parse_duration_ms, help = "Artificial per-command delay (milliseconds) to model slow clients")]
  pub delay: Option<Duration>,

  #[arg(long = "interruption", help = "Internal testing facility", hide = true)]
  pub interruption: Option<Interruption>,
}

/// Matches the teacher's `Interruption` pattern (a hidden, testing-only fault-injection enum) —
/// here it names points in the session lifecycle rather than the maildir sync pipeline.
#[derive(Copy, Clone, Debug, PartialEq, clap::ValueEnum)]
pub enum Interruption {
  DropAfterLogin,
  StallBeforeSelect,
  CorruptAppendLiteral,
}

impl std::fmt::Display for Interruption {
  fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(formatter, "{self:?}")
  }
}

impl Arguments {
  pub fn pool_config(&self) -> crate::pool::PoolConfig {
    crate::pool::PoolConfig {
      username_template: self.username_template.clone(),
      user_rand: self.user_rand,
      domain_rand: self.domain_rand,
      mailbox_template: self.mailbox.clone(),
      max_inline_literal_size: self.max_inline_literal_size,
      inflight_limit: self.max_inflight_commands,
      reconnect: !self.no_reconnect,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory as _;

  #[derive(clap::Parser)]
  struct Wrapper {
    #[clap(flatten)]
    arguments: Arguments,
  }

  #[test]
  fn the_clap_schema_is_well_formed() {
    Wrapper::command().debug_assert();
  }

  #[test]
  fn pool_config_carries_the_template_fields_through() {
    let wrapper = Wrapper {
      arguments: Arguments {
        ip: "127.0.0.1".into(),
        port: 143,
        clients: 4,
        username_template: "user{}@domain{}".into(),
        user_rand: 7,
        domain_rand: 3,
        mailbox: "INBOX%d".into(),
        rawlog: false,
        rawlog_directory: ".".into(),
        no_tracking: false,
        error_quit: false,
        disconnect_quit: false,
        disconnect_probability: 0.0,
        max_inline_literal_size: 4096,
        max_inflight_commands: 10,
        no_reconnect: false,
        delay: None,
        interruption: None,
      },
    };
    let config = wrapper.arguments.pool_config();
    assert_eq!("user{}@domain{}", config.username_template);
    assert_eq!(7, config.user_rand);
    assert!(config.reconnect);
  }
}
