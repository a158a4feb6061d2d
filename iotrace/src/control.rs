//! Line-oriented control protocol.
//!
//! One command per line: the first ASCII-whitespace-delimited word is the command,
//! the trimmed remainder its argument.
//!
//! | command                                | argument            |
//! |----------------------------------------|---------------------|
//! | `add`                                  | `<path> [count]`    |
//! | `remove`                               | `<path>`            |
//! | `start` `stop` `reset` `timereset`     | `<handle>`          |
//! | `status` `log`                         | `<handle>`          |
//! | `list`                                 |                     |
//!
//! A handle is a registered path or a `<device>_<inode>` identity.
//!
//! `add` takes its optional count from the end of the argument: when the
//! argument ends with ASCII whitespace followed by ASCII digits, those digits are
//! the count. A file whose name ends with a space and digits can therefore
//! only be added with an explicit count (`add "/tmp/run 2" 10` style quoting
//! is not supported).

use crate::registry::{AddOutcome, Registry, RemoveOutcome};
use crate::resolve::IdentityResolver;
use crate::resource::MonitoredResource;
use crate::types::{Error, Result};
use log::{info, warn};
use std::sync::Arc;

/// Longest accepted command line: a full path plus the command word and a count.
pub const MAX_COMMAND_LEN: usize = libc::PATH_MAX as usize + 19;

/// Log capacity used when `add` has no count.
pub const DEFAULT_MAX_EVENTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { path: String, count: Option<usize> },
    Remove { path: String },
    Start { handle: String },
    Stop { handle: String },
    Reset { handle: String },
    TimeReset { handle: String },
    Status { handle: String },
    Log { handle: String },
    List,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        if line.len() > MAX_COMMAND_LEN {
            return Err(Error::CommandTooLong(line.len()));
        }

        let line = line.trim_start_matches(is_space);
        if line.is_empty() {
            return Err(Error::Command("command required".to_owned()));
        }

        let (word, arg) = match line.find(is_space) {
            Some(end) => (&line[..end], line[end..].trim_matches(is_space)),
            None => (line, ""),
        };

        let required = |what: &str| -> Result<String> {
            if arg.is_empty() {
                Err(Error::Command(format!("{word}: {what} required")))
            } else {
                Ok(arg.to_owned())
            }
        };

        let command = match word {
            "add" => {
                let arg = required("file path")?;
                let (path, count) = split_count(&arg)?;
                Self::Add {
                    path: path.to_owned(),
                    count,
                }
            }
            "remove" => Self::Remove {
                path: required("file path")?,
            },
            "start" => Self::Start {
                handle: required("log handle")?,
            },
            "stop" => Self::Stop {
                handle: required("log handle")?,
            },
            "reset" => Self::Reset {
                handle: required("log handle")?,
            },
            "timereset" => Self::TimeReset {
                handle: required("log handle")?,
            },
            "status" => Self::Status {
                handle: required("log handle")?,
            },
            "log" => Self::Log {
                handle: required("log handle")?,
            },
            "list" if arg.is_empty() => Self::List,
            "list" => return Err(Error::Command(format!("list: unexpected argument '{arg}'"))),
            other => return Err(Error::Command(format!("unrecognized command: {other}"))),
        };

        Ok(command)
    }
}

/// Command separators are ASCII whitespace only.
fn is_space(c: char) -> bool {
    c.is_ascii_whitespace()
}

/// Splits `<path> [space digits]` into the path and the optional count.
fn split_count(arg: &str) -> Result<(&str, Option<usize>)> {
    let head = arg.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &arg[head.len()..];
    let path = head.trim_end_matches(is_space);

    if digits.is_empty() || path.is_empty() || path.len() == head.len() {
        return Ok((arg, None));
    }

    let count = digits
        .parse::<u32>()
        .map_err(|_| Error::Command(format!("add: invalid event count '{digits}'")))?;

    Ok((path, Some(count as usize)))
}

/// Result of one command.
pub enum Reply {
    Lines(Vec<String>),
    /// The log of a resource, streamed by the caller.
    Log(Arc<MonitoredResource>),
    Rejected(String),
}

impl Reply {
    fn line(line: impl Into<String>) -> Self {
        Self::Lines(vec![line.into()])
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Executes control commands against a registry.
pub struct Controller<R> {
    registry: Arc<Registry>,
    resolver: R,
    default_capacity: usize,
}

impl<R: IdentityResolver> Controller<R> {
    pub fn new(registry: Arc<Registry>, resolver: R, default_capacity: usize) -> Self {
        Self {
            registry,
            resolver,
            default_capacity,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match Command::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(err) => {
                warn!("rejected command '{}': {err}", line.trim());
                Reply::Rejected(err.to_string())
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Reply {
        match self.try_execute(command).await {
            Ok(reply) => reply,
            Err(err) => Reply::Rejected(err.to_string()),
        }
    }

    async fn try_execute(&self, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Add { path, count } => {
                let capacity = count.unwrap_or(self.default_capacity);
                if capacity == 0 {
                    return Err(Error::ZeroCapacity);
                }

                let resolved = self.resolver.resolve(&path).await?;
                let identity = resolved.identity.clone();
                let outcome = self
                    .registry
                    .add(resolved.identity, &resolved.canonical_path, capacity)?;

                Reply::line(match outcome {
                    AddOutcome::Created => format!("created {identity}"),
                    AddOutcome::AliasAdded => format!("alias added {identity}"),
                    AddOutcome::AlreadyMonitored => format!("already monitored {identity}"),
                })
            }
            Command::Remove { path } => match self.registry.remove_alias(&path)? {
                RemoveOutcome::AliasRemoved => Reply::line("alias removed"),
                RemoveOutcome::ResourceDestroyed => Reply::line("resource destroyed"),
            },
            Command::Start { handle } => {
                let resource = self.registry.lookup(&handle)?;
                resource.enable();
                info!("{}: started", resource.identity());
                Reply::Lines(Vec::new())
            }
            Command::Stop { handle } => {
                let resource = self.registry.lookup(&handle)?;
                resource.disable();
                info!("{}: stopped", resource.identity());
                Reply::Lines(Vec::new())
            }
            Command::Reset { handle } => {
                let resource = self.registry.lookup(&handle)?;
                resource.reset(false, self.registry.now());
                Reply::Lines(Vec::new())
            }
            Command::TimeReset { handle } => {
                let resource = self.registry.lookup(&handle)?;
                resource.reset(true, self.registry.now());
                Reply::Lines(Vec::new())
            }
            Command::Status { handle } => {
                let resource = self.registry.lookup(&handle)?;
                Reply::line(resource.status().to_string())
            }
            Command::Log { handle } => Reply::Log(self.registry.lookup(&handle)?),
            Command::List => Reply::Lines(
                self.registry
                    .listing()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ),
        };

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resolve::Resolved;
    use crate::resource::Identity;
    use crate::types::event::{Actor, IoAccess, Level};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FakeResolver {
        known: HashMap<String, Identity>,
    }

    impl IdentityResolver for FakeResolver {
        async fn resolve(&self, path: &str) -> Result<Resolved> {
            let identity = self.known.get(path).cloned().ok_or_else(|| {
                Error::PathNotFound(
                    path.to_owned(),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )
            })?;
            Ok(Resolved {
                identity,
                canonical_path: path.to_owned(),
            })
        }
    }

    fn controller() -> (Controller<FakeResolver>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
        let registry = Arc::new(Registry::with_clock(clock.clone()));
        let known = HashMap::from([
            ("/tmp/f".to_owned(), Identity::new("sda1", 12)),
            ("/tmp/link".to_owned(), Identity::new("sda1", 12)),
            ("/srv/run 2".to_owned(), Identity::new("sdb", 3)),
        ]);
        (
            Controller::new(registry, FakeResolver { known }, DEFAULT_MAX_EVENTS),
            clock,
        )
    }

    fn lines(reply: Reply) -> Vec<String> {
        match reply {
            Reply::Lines(lines) => lines,
            Reply::Log(resource) => resource.snapshot().map(|r| r.to_string()).collect(),
            Reply::Rejected(reason) => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            Command::parse("  add /tmp/f\n").unwrap(),
            Command::Add {
                path: "/tmp/f".to_owned(),
                count: None
            }
        );
        assert_eq!(
            Command::parse("add /tmp/f 500").unwrap(),
            Command::Add {
                path: "/tmp/f".to_owned(),
                count: Some(500)
            }
        );
        assert_eq!(
            Command::parse("add /tmp/my file\t7").unwrap(),
            Command::Add {
                path: "/tmp/my file".to_owned(),
                count: Some(7)
            }
        );
        assert_eq!(
            Command::parse("remove /tmp/with space").unwrap(),
            Command::Remove {
                path: "/tmp/with space".to_owned()
            }
        );
        assert_eq!(
            Command::parse("timereset sda1_12").unwrap(),
            Command::TimeReset {
                handle: "sda1_12".to_owned()
            }
        );
        assert_eq!(Command::parse("list").unwrap(), Command::List);
    }

    #[test]
    fn trailing_digits_rule() {
        // Digits glued to the name are part of the path.
        assert_eq!(
            Command::parse("add /tmp/log2024").unwrap(),
            Command::Add {
                path: "/tmp/log2024".to_owned(),
                count: None
            }
        );
        // A path made only of digits is a path.
        assert_eq!(
            Command::parse("add 42").unwrap(),
            Command::Add {
                path: "42".to_owned(),
                count: None
            }
        );
        // A name ending in "space digits" is read as name + count.
        assert_eq!(
            Command::parse("add /srv/run 2").unwrap(),
            Command::Add {
                path: "/srv/run".to_owned(),
                count: Some(2)
            }
        );
        assert_eq!(
            Command::parse("add /srv/run 2 16").unwrap(),
            Command::Add {
                path: "/srv/run 2".to_owned(),
                count: Some(16)
            }
        );
        // Non-ASCII spaces belong to the name.
        assert_eq!(
            Command::parse("add /srv/run\u{3000}2\t16").unwrap(),
            Command::Add {
                path: "/srv/run\u{3000}2".to_owned(),
                count: Some(16)
            }
        );
        assert_eq!(
            Command::parse("add /srv/run\u{a0}2").unwrap(),
            Command::Add {
                path: "/srv/run\u{a0}2".to_owned(),
                count: None
            }
        );
    }

    #[test]
    fn malformed_commands() {
        assert!(matches!(Command::parse(""), Err(Error::Command(_))));
        assert!(matches!(Command::parse("   "), Err(Error::Command(_))));
        assert!(matches!(Command::parse("add"), Err(Error::Command(_))));
        assert!(matches!(Command::parse("stop "), Err(Error::Command(_))));
        assert!(matches!(Command::parse("frobnicate x"), Err(Error::Command(_))));
        assert!(matches!(Command::parse("addx /tmp/f"), Err(Error::Command(_))));
        assert!(matches!(Command::parse("list all"), Err(Error::Command(_))));
        assert!(matches!(
            Command::parse("add /tmp/f 99999999999"),
            Err(Error::Command(_))
        ));

        let long = format!("add /{}", "a".repeat(MAX_COMMAND_LEN));
        assert!(matches!(
            Command::parse(&long),
            Err(Error::CommandTooLong(_))
        ));
    }

    #[tokio::test]
    async fn add_alias_and_remove() {
        let (ctl, _) = controller();

        assert_eq!(lines(ctl.handle_line("add /tmp/f 5").await), vec!["created sda1_12"]);
        assert_eq!(
            lines(ctl.handle_line("add /tmp/f").await),
            vec!["already monitored sda1_12"]
        );
        assert_eq!(
            lines(ctl.handle_line("add /tmp/link 100").await),
            vec!["alias added sda1_12"]
        );
        assert_eq!(lines(ctl.handle_line("list").await), vec!["sda1_12 /tmp/f /tmp/link"]);
        assert_eq!(
            lines(ctl.handle_line("status sda1_12").await),
            vec!["1 1.000000000 5 0"]
        );

        assert_eq!(lines(ctl.handle_line("remove /tmp/f").await), vec!["alias removed"]);
        assert_eq!(
            lines(ctl.handle_line("remove /tmp/link").await),
            vec!["resource destroyed"]
        );
        assert!(ctl.handle_line("remove /tmp/f").await.is_rejected());
        assert!(ctl.registry().is_empty());
    }

    #[tokio::test]
    async fn default_capacity_and_zero_count() {
        let (ctl, _) = controller();

        assert!(ctl.handle_line("add /tmp/f 0").await.is_rejected());
        assert!(ctl.registry().is_empty());

        ctl.handle_line("add /tmp/f").await;
        assert_eq!(
            ctl.registry().lookup("/tmp/f").unwrap().capacity(),
            DEFAULT_MAX_EVENTS
        );
    }

    #[tokio::test]
    async fn explicit_count_for_digit_suffixed_names() {
        let (ctl, _) = controller();

        // Read as "/srv/run" with count 2, which the resolver does not know.
        assert!(ctl.handle_line("add /srv/run 2").await.is_rejected());

        assert_eq!(
            lines(ctl.handle_line("add /srv/run 2 4").await),
            vec!["created sdb_3"]
        );
    }

    #[tokio::test]
    async fn resolution_failure_has_no_side_effects() {
        let (ctl, _) = controller();
        let reply = ctl.handle_line("add /nope").await;
        match reply {
            Reply::Rejected(reason) => assert!(reason.contains("/nope")),
            _ => panic!("expected rejection"),
        }
        assert!(ctl.registry().is_empty());
    }

    #[tokio::test]
    async fn start_stop_reset_timereset() {
        let (ctl, clock) = controller();
        ctl.handle_line("add /tmp/f 3").await;
        let id = Identity::new("sda1", 12);
        let write = || {
            ctl.registry()
                .record_event(&id, IoAccess::write(Level::Vfs, 0, 1), Actor::new("dd", 2))
        };

        assert!(write());
        lines(ctl.handle_line("stop /tmp/f").await);
        assert!(!write());
        assert_eq!(
            lines(ctl.handle_line("status /tmp/f").await),
            vec!["0 1.000000000 3 1"]
        );

        lines(ctl.handle_line("start sda1_12").await);
        assert!(write());
        lines(ctl.handle_line("reset /tmp/f").await);
        assert_eq!(
            lines(ctl.handle_line("status /tmp/f").await),
            vec!["1 1.000000000 3 0"]
        );

        clock.advance(Duration::from_secs(2));
        lines(ctl.handle_line("timereset /tmp/f").await);
        assert_eq!(
            lines(ctl.handle_line("status /tmp/f").await),
            vec!["1 3.000000000 3 0"]
        );

        assert!(ctl.handle_line("stop /tmp/other").await.is_rejected());
    }

    #[tokio::test]
    async fn log_reply() {
        let (ctl, clock) = controller();
        ctl.handle_line("add /tmp/f 3").await;
        clock.advance(Duration::from_millis(1));
        ctl.registry().record_event(
            &Identity::new("sda1", 12),
            IoAccess::read(Level::Block, 64, 8),
            Actor::new("kworker/0:1", 0),
        );

        assert_eq!(
            lines(ctl.handle_line("log /tmp/f").await),
            vec!["0.001000000;R;64;4096;BLK;kworker/0:1;0"]
        );
    }
}
