//! Transport-agnostic command surface.
//!
//! The chat gateway delivers one line of text plus a [`CommandContext`];
//! this layer parses it, authorizes it, mutates the supervisor or the
//! session pool, and returns a structured [`Reply`] for the gateway to
//! render however it likes.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tracing::{info, warn};

use crate::api::ProfileSource;
use crate::config::ConfigService;
use crate::credentials::SessionPool;
use crate::supervisor::MonitorSupervisor;
use crate::utils::{format_elapsed, parse_handles};
use crate::watch::WatchDirection;

/// Pause bounds between items of a batch add, milliseconds.
const BATCH_DELAY_MS: (u64, u64) = (3_000, 6_000);

/// Parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start watching one or more handles in `direction`.
    Watch {
        direction: WatchDirection,
        handles: Vec<String>,
    },
    /// Stop watching a handle; `None` stops it in both directions.
    Remove {
        handle: String,
        direction: Option<WatchDirection>,
    },
    /// Stop every watch; `None` clears both directions.
    RemoveAll { direction: Option<WatchDirection> },
    List,
    SetInterval { min_secs: u64, max_secs: u64 },
    ToggleScreenshot,
    AddSession { token: String },
    RemoveSession { id_or_prefix: String },
    ListSessions,
    Status,
    Help,
}

impl Command {
    /// Parse one command line. An optional `!` prefix is tolerated;
    /// anything unrecognized becomes [`Command::Help`].
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        let line = line.strip_prefix('!').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let rest: Vec<&str> = parts.collect();

        match verb.as_str() {
            "unban" if !rest.is_empty() => Command::Watch {
                direction: WatchDirection::AwaitingRecovery,
                handles: parse_handles(&rest.join(" ")),
            },
            "ban" if !rest.is_empty() => Command::Watch {
                direction: WatchDirection::AwaitingBan,
                handles: parse_handles(&rest.join(" ")),
            },
            "remove" if !rest.is_empty() => Command::Remove {
                handle: rest[0].to_string(),
                direction: rest.get(1).and_then(|d| parse_direction(d)),
            },
            "removeall" => Command::RemoveAll {
                direction: rest.first().and_then(|d| parse_direction(d)),
            },
            "list" => Command::List,
            "interval" if rest.len() == 2 => {
                match (rest[0].parse::<u64>(), rest[1].parse::<u64>()) {
                    (Ok(min_secs), Ok(max_secs)) => Command::SetInterval { min_secs, max_secs },
                    _ => Command::Help,
                }
            }
            "screenshot" => Command::ToggleScreenshot,
            "addsession" if rest.len() == 1 => Command::AddSession {
                token: rest[0].to_string(),
            },
            "removesession" if rest.len() == 1 => Command::RemoveSession {
                id_or_prefix: rest[0].to_string(),
            },
            "sessions" => Command::ListSessions,
            "status" => Command::Status,
            _ => Command::Help,
        }
    }

    /// Whether the command requires a privileged actor.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Command::RemoveAll { .. }
                | Command::SetInterval { .. }
                | Command::ToggleScreenshot
                | Command::AddSession { .. }
                | Command::RemoveSession { .. }
                | Command::ListSessions
        )
    }
}

fn parse_direction(word: &str) -> Option<WatchDirection> {
    match word.to_lowercase().as_str() {
        "ban" => Some(WatchDirection::AwaitingBan),
        "recovery" | "unban" => Some(WatchDirection::AwaitingRecovery),
        _ => None,
    }
}

/// Who issued the command and where replies (and outcome notifications
/// for new watches) should be routed.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub actor: String,
    pub target: String,
}

/// Structured command reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub title: String,
    pub body: String,
    pub ok: bool,
}

impl Reply {
    fn success(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ok: true,
        }
    }

    fn failure(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ok: false,
        }
    }
}

const HELP_TEXT: &str = "\
unban <handles>          watch banned handles for recovery
ban <handles>            watch active handles for a ban
remove <handle> [dir]    stop watching a handle
removeall [dir]          stop every watch (admin)
list                     show active watches
status                   show watch and session counts
interval <min> <max>     set the poll window in seconds (admin)
screenshot               toggle card rendering (admin)
addsession <token>       add a session token (admin)
removesession <prefix>   remove a session token (admin)
sessions                 list session tokens (admin)";

/// Executes parsed commands against the running services.
pub struct CommandHandler {
    supervisor: Arc<MonitorSupervisor>,
    config: Arc<ConfigService>,
    sessions: Arc<SessionPool>,
    source: Arc<dyn ProfileSource>,
    batch_delay_ms: (u64, u64),
}

impl CommandHandler {
    pub fn new(
        supervisor: Arc<MonitorSupervisor>,
        config: Arc<ConfigService>,
        sessions: Arc<SessionPool>,
        source: Arc<dyn ProfileSource>,
    ) -> Self {
        Self {
            supervisor,
            config,
            sessions,
            source,
            batch_delay_ms: BATCH_DELAY_MS,
        }
    }

    /// Parse and execute one command line.
    pub async fn execute(&self, line: &str, ctx: &CommandContext) -> Reply {
        let command = Command::parse(line);

        if command.is_privileged() && !self.config.is_admin(&ctx.actor) {
            warn!(actor = %ctx.actor, ?command, "Unauthorized command rejected");
            return Reply::failure("Unauthorized", "This command requires admin access.");
        }

        match command {
            Command::Watch { direction, handles } => self.watch(direction, handles, ctx).await,
            Command::Remove { handle, direction } => self.remove(&handle, direction),
            Command::RemoveAll { direction } => self.remove_all(direction),
            Command::List => self.list(),
            Command::SetInterval { min_secs, max_secs } => self.set_interval(min_secs, max_secs),
            Command::ToggleScreenshot => self.toggle_screenshot(),
            Command::AddSession { token } => self.add_session(&token),
            Command::RemoveSession { id_or_prefix } => self.remove_session(&id_or_prefix),
            Command::ListSessions => self.list_sessions(),
            Command::Status => self.status(),
            Command::Help => Reply::success("Commands", HELP_TEXT),
        }
    }

    /// Admit handles one at a time: ceiling check, reachability probe,
    /// persist, spawn. Batches pause between items.
    async fn watch(
        &self,
        direction: WatchDirection,
        handles: Vec<String>,
        ctx: &CommandContext,
    ) -> Reply {
        if handles.is_empty() {
            return Reply::failure("No handles", "Provide at least one handle.");
        }

        let batch = handles.len() > 1;
        let mut lines = Vec::with_capacity(handles.len());
        let mut admitted = 0usize;

        for (i, handle) in handles.iter().enumerate() {
            if batch && i > 0 {
                tokio::time::sleep(batch_delay(self.batch_delay_ms)).await;
            }

            let registry = self.supervisor.registry(direction);
            if registry.contains(handle) {
                lines.push(format!("@{handle}: already watched"));
                continue;
            }
            if registry.len() >= self.config.max_watch() {
                lines.push(format!("@{handle}: watch limit reached"));
                continue;
            }

            // Reachability probe; a transport-dead endpoint refuses the add
            // rather than admitting a watch that can never observe anything.
            let probe = self.source.fetch(handle).await;
            if probe.status.is_none() {
                lines.push(format!("@{handle}: unreachable, not added"));
                continue;
            }

            match self
                .supervisor
                .start(handle, direction, &ctx.target, &ctx.actor)
            {
                Ok(()) => {
                    admitted += 1;
                    lines.push(format!("@{handle}: watching for {direction}"));
                }
                Err(e) => lines.push(format!("@{handle}: {e}")),
            }
        }

        info!(admitted, requested = handles.len(), %direction, "Watch command handled");
        Reply {
            title: format!("Watch ({direction})"),
            body: lines.join("\n"),
            ok: admitted > 0,
        }
    }

    fn remove(&self, handle: &str, direction: Option<WatchDirection>) -> Reply {
        let directions: Vec<WatchDirection> = match direction {
            Some(d) => vec![d],
            None => WatchDirection::ALL.to_vec(),
        };

        let mut removed = Vec::new();
        for direction in directions {
            match self.supervisor.stop(handle, direction) {
                Ok(true) => removed.push(direction.to_string()),
                Ok(false) => {}
                Err(e) => return Reply::failure("Remove failed", e.to_string()),
            }
        }

        if removed.is_empty() {
            Reply::failure("Not watched", format!("@{handle} is not being watched."))
        } else {
            Reply::success(
                "Removed",
                format!("@{handle} removed from: {}", removed.join(", ")),
            )
        }
    }

    fn remove_all(&self, direction: Option<WatchDirection>) -> Reply {
        let directions: Vec<WatchDirection> = match direction {
            Some(d) => vec![d],
            None => WatchDirection::ALL.to_vec(),
        };

        let mut total = 0;
        for direction in directions {
            match self.supervisor.stop_all(direction) {
                Ok(removed) => total += removed.len(),
                Err(e) => return Reply::failure("Remove failed", e.to_string()),
            }
        }
        Reply::success("Removed all", format!("Stopped {total} watches."))
    }

    fn list(&self) -> Reply {
        let mut lines = Vec::new();
        for direction in WatchDirection::ALL {
            let entries = self.supervisor.registry(direction).entries();
            if entries.is_empty() {
                continue;
            }
            lines.push(format!("{direction} ({}):", entries.len()));
            for (handle, entry) in entries {
                lines.push(format!(
                    "  @{handle} since {} ({})",
                    entry.started_at.format("%Y-%m-%d %H:%M UTC"),
                    format_elapsed(Duration::from_secs(entry.elapsed_secs()))
                ));
            }
        }

        if lines.is_empty() {
            Reply::success("Watches", "Nothing is being watched.")
        } else {
            Reply::success("Watches", lines.join("\n"))
        }
    }

    fn set_interval(&self, min_secs: u64, max_secs: u64) -> Reply {
        match self.config.set_poll_window(min_secs, max_secs) {
            Ok(()) => Reply::success(
                "Interval updated",
                format!("Polls now run every {min_secs}-{max_secs}s."),
            ),
            Err(e) => Reply::failure("Invalid interval", e.to_string()),
        }
    }

    fn toggle_screenshot(&self) -> Reply {
        match self.config.toggle_screenshots() {
            Ok(enabled) => Reply::success(
                "Screenshots",
                if enabled {
                    "Card rendering enabled."
                } else {
                    "Card rendering disabled."
                },
            ),
            Err(e) => Reply::failure("Toggle failed", e.to_string()),
        }
    }

    fn add_session(&self, token: &str) -> Reply {
        match self.sessions.add(token) {
            Ok(true) => Reply::success(
                "Session added",
                format!("Pool now holds {} tokens.", self.sessions.count()),
            ),
            Ok(false) => Reply::failure("Duplicate", "That session is already in the pool."),
            Err(e) => Reply::failure("Add failed", e.to_string()),
        }
    }

    fn remove_session(&self, id_or_prefix: &str) -> Reply {
        match self.sessions.remove(id_or_prefix) {
            Ok(true) => Reply::success(
                "Session removed",
                format!("Pool now holds {} tokens.", self.sessions.count()),
            ),
            Ok(false) => Reply::failure(
                "Not removed",
                "No unique session matches that id or prefix.",
            ),
            Err(e) => Reply::failure("Remove failed", e.to_string()),
        }
    }

    fn list_sessions(&self) -> Reply {
        let masked = self.sessions.masked();
        if masked.is_empty() {
            return Reply::success("Sessions", "Pool is empty (fallback token in use).");
        }
        let body = masked
            .iter()
            .enumerate()
            .map(|(i, token)| format!("{}. {token}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        Reply::success(format!("Sessions ({})", masked.len()), body)
    }

    fn status(&self) -> Reply {
        let (min_secs, max_secs) = self.config.poll_window();
        let body = format!(
            "Ban watches: {}\nRecovery watches: {}\nSessions: {}\nPoll window: {min_secs}-{max_secs}s\nScreenshots: {}",
            self.supervisor.registry(WatchDirection::AwaitingBan).len(),
            self.supervisor
                .registry(WatchDirection::AwaitingRecovery)
                .len(),
            self.sessions.count(),
            if self.config.generate_screenshots() {
                "on"
            } else {
                "off"
            }
        );
        Reply::success("Status", body)
    }
}

fn batch_delay(bounds: (u64, u64)) -> Duration {
    let (min_ms, max_ms) = bounds;
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_commands() {
        assert_eq!(
            Command::parse("unban @Alice, bob"),
            Command::Watch {
                direction: WatchDirection::AwaitingRecovery,
                handles: vec!["alice".to_string(), "bob".to_string()],
            }
        );
        assert_eq!(
            Command::parse("!ban carol"),
            Command::Watch {
                direction: WatchDirection::AwaitingBan,
                handles: vec!["carol".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_remove() {
        assert_eq!(
            Command::parse("remove alice"),
            Command::Remove {
                handle: "alice".to_string(),
                direction: None,
            }
        );
        assert_eq!(
            Command::parse("remove alice recovery"),
            Command::Remove {
                handle: "alice".to_string(),
                direction: Some(WatchDirection::AwaitingRecovery),
            }
        );
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            Command::parse("interval 60 120"),
            Command::SetInterval {
                min_secs: 60,
                max_secs: 120,
            }
        );
        // Malformed numbers fall through to help.
        assert_eq!(Command::parse("interval x y"), Command::Help);
    }

    #[test]
    fn test_unknown_is_help() {
        assert_eq!(Command::parse(""), Command::Help);
        assert_eq!(Command::parse("frobnicate"), Command::Help);
        assert_eq!(Command::parse("unban"), Command::Help);
    }

    #[test]
    fn test_privileged_commands() {
        assert!(Command::parse("sessions").is_privileged());
        assert!(Command::parse("interval 1 2").is_privileged());
        assert!(Command::parse("screenshot").is_privileged());
        assert!(Command::parse("removeall").is_privileged());
        assert!(!Command::parse("list").is_privileged());
        assert!(!Command::parse("unban alice").is_privileged());
        assert!(!Command::parse("status").is_privileged());
    }
}
