//! Watch directions and the response-classification heuristic.
//!
//! [`classify`] is a pure function from one fetch observation to a
//! [`Classification`]; it never consults history and never performs I/O, so
//! the full behavioral table is unit-testable in isolation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::format_count;

/// Whether a handle is being observed for a ban or for recovery from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchDirection {
    /// Watching an active account, waiting for it to be banned.
    AwaitingBan,
    /// Watching a banned/suspended account, waiting for it to recover.
    AwaitingRecovery,
}

impl WatchDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchDirection::AwaitingBan => "ban",
            WatchDirection::AwaitingRecovery => "recovery",
        }
    }

    /// Both directions, for startup resume loops.
    pub const ALL: [WatchDirection; 2] =
        [WatchDirection::AwaitingBan, WatchDirection::AwaitingRecovery];
}

impl std::fmt::Display for WatchDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one fetch observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The account is observably in its current state; keep watching.
    Active,
    /// The watched-for event happened; monitoring ends.
    Terminal,
    /// The observation is inconclusive (rate limit, auth failure,
    /// transport error); keep watching.
    Indeterminate,
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Classification::Terminal)
    }
}

/// Whether a status code is an authentication-class error (feeds the
/// supervisor's cooldown counter; 429 deliberately does not).
pub fn is_auth_error(status: Option<u16>) -> bool {
    matches!(status, Some(400) | Some(401))
}

/// Extract the user record from a profile payload, if present.
///
/// The endpoint nests the record under `data.user`; a missing, null,
/// non-object, or empty-object value means no record.
fn user_record(payload: &Value) -> Option<&Value> {
    let user = payload.get("data")?.get("user")?;
    match user.as_object() {
        Some(fields) if !fields.is_empty() => Some(user),
        _ => None,
    }
}

/// Classify one fetch observation for a tracked handle.
///
/// Ban detection treats a 404, an empty or user-less 200 body, and a
/// username mismatch all as terminal: the endpoint is observed to return
/// 200 with an empty body for banned accounts. Recovery detection is
/// stricter in the opposite way: while banned, partial or malformed
/// bodies are the expected default, so only a well-formed user record
/// counts as terminal.
pub fn classify(
    direction: WatchDirection,
    expected_handle: &str,
    status: Option<u16>,
    payload: Option<&Value>,
) -> Classification {
    match direction {
        WatchDirection::AwaitingBan => classify_ban(expected_handle, status, payload),
        WatchDirection::AwaitingRecovery => classify_recovery(status, payload),
    }
}

fn classify_ban(
    expected_handle: &str,
    status: Option<u16>,
    payload: Option<&Value>,
) -> Classification {
    match status {
        Some(404) => Classification::Terminal,
        Some(200) => {
            let Some(payload) = payload else {
                return Classification::Terminal;
            };
            let Some(user) = user_record(payload) else {
                return Classification::Terminal;
            };
            let username = user
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if username.is_empty() {
                return Classification::Terminal;
            }
            if username.eq_ignore_ascii_case(expected_handle) {
                Classification::Active
            } else {
                Classification::Terminal
            }
        }
        _ => Classification::Indeterminate,
    }
}

fn classify_recovery(_status: Option<u16>, payload: Option<&Value>) -> Classification {
    // A well-formed user record is unambiguous evidence of an active
    // account, whatever the status code said.
    match payload.and_then(user_record) {
        Some(_) => Classification::Terminal,
        None => Classification::Indeterminate,
    }
}

/// Profile fields extracted from a payload for notification rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    pub avatar_url: Option<String>,
}

impl ProfileSnapshot {
    /// Extract a snapshot from a payload, or `None` without a user record.
    pub fn from_payload(payload: Option<&Value>) -> Option<Self> {
        let user = payload.and_then(user_record)?;

        let count_of = |field: &str| {
            user.get(field)
                .and_then(|edge| edge.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        let string_of = |field: &str| {
            user.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            username: string_of("username"),
            full_name: string_of("full_name"),
            biography: string_of("biography"),
            followers: count_of("edge_followed_by"),
            following: count_of("edge_follow"),
            posts: count_of("edge_owner_to_timeline_media"),
            avatar_url: string_of("profile_pic_url_hd").or_else(|| string_of("profile_pic_url")),
        })
    }

    /// One-line `Followers: x | Following: y | Posts: z` summary.
    pub fn counts_line(&self) -> String {
        format!(
            "Followers: {} | Following: {} | Posts: {}",
            format_count(self.followers),
            format_count(self.following),
            format_count(self.posts)
        )
    }
}
