//! Rotating pool of session credentials.
//!
//! Every polling task draws its cookie token from one shared [`SessionPool`].
//! Rotation is monotonic round-robin; when the cursor wraps back to index 0
//! the cycle is treated as exhausted and the fallback token is served until
//! the next rotation restarts the cycle. All cursor mutation happens under a
//! single mutex so concurrent rotation requests from fetch paths can never
//! race to the same index or double-advance.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Result;
use crate::utils::fs::{atomic_write_json, load_json};

/// Durable pool format: `{"sessions": [token, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionFile {
    sessions: Vec<String>,
}

#[derive(Debug, Clone)]
struct PoolState {
    sessions: Vec<String>,
    cursor: usize,
    /// Token served to fetchers; tracks the cursor except while exhausted.
    current: String,
}

/// Shared, rotating pool of session tokens with a fallback.
pub struct SessionPool {
    path: PathBuf,
    fallback: String,
    state: Mutex<PoolState>,
}

impl SessionPool {
    /// Load the pool from `path`. An absent file yields an empty pool with
    /// the fallback token active.
    pub fn load(path: impl AsRef<Path>, fallback: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fallback = fallback.into();

        let sessions = match load_json::<SessionFile>(&path)? {
            Some(file) => file.sessions,
            None => {
                warn!(path = %path.display(), "Session file not found, using fallback token");
                Vec::new()
            }
        };

        let current = sessions.first().cloned().unwrap_or_else(|| fallback.clone());

        if !sessions.is_empty() {
            info!(count = sessions.len(), "Loaded session pool");
        }

        Ok(Self {
            path,
            fallback,
            state: Mutex::new(PoolState {
                sessions,
                cursor: 0,
                current,
            }),
        })
    }

    /// The token fetchers should currently present.
    pub fn current(&self) -> String {
        self.state.lock().current.clone()
    }

    /// Advance the cursor and return the new current token.
    ///
    /// A wrap back to index 0 marks the cycle exhausted: the fallback token
    /// is served until the following rotation.
    pub fn rotate(&self) -> String {
        let mut state = self.state.lock();

        if state.sessions.is_empty() {
            warn!("No sessions available, using fallback token");
            state.current = self.fallback.clone();
            return state.current.clone();
        }

        state.cursor = (state.cursor + 1) % state.sessions.len();
        state.current = state.sessions[state.cursor].clone();

        info!(
            position = state.cursor + 1,
            total = state.sessions.len(),
            "Rotated session"
        );

        if state.cursor == 0 {
            warn!("Session pool exhausted this cycle, using fallback token");
            state.current = self.fallback.clone();
        }

        state.current.clone()
    }

    /// Append a token. Returns `false` (and persists nothing) on duplicates.
    pub fn add(&self, token: impl Into<String>) -> Result<bool> {
        let token = token.into();
        let mut state = self.state.lock();

        if state.sessions.contains(&token) {
            warn!("Session already exists");
            return Ok(false);
        }

        let mut updated = state.clone();
        updated.sessions.push(token.clone());
        if updated.sessions.len() == 1 {
            updated.cursor = 0;
            updated.current = token;
        }
        self.persist(&updated)?;
        *state = updated;

        info!(total = state.sessions.len(), "Added session");
        Ok(true)
    }

    /// Remove a token by exact value or unambiguous prefix.
    ///
    /// A prefix matching two or more stored tokens is refused (no mutation),
    /// so a short prefix can never delete the wrong credential.
    pub fn remove(&self, id_or_prefix: &str) -> Result<bool> {
        let mut state = self.state.lock();

        let matches: Vec<usize> = state
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| *s == id_or_prefix || s.starts_with(id_or_prefix))
            .map(|(i, _)| i)
            .collect();

        match matches.len() {
            0 => {
                warn!("Session not found");
                return Ok(false);
            }
            1 => {}
            n => {
                warn!(matches = n, "Ambiguous session prefix, refusing removal");
                return Ok(false);
            }
        }

        let idx = matches[0];
        let mut updated = state.clone();
        let removed = updated.sessions.remove(idx);

        if updated.sessions.is_empty() {
            updated.cursor = 0;
            updated.current = self.fallback.clone();
        } else {
            if idx < updated.cursor {
                updated.cursor -= 1;
            }
            if updated.current == removed {
                updated.cursor %= updated.sessions.len();
                updated.current = updated.sessions[updated.cursor].clone();
            }
        }

        self.persist(&updated)?;
        *state = updated;

        info!(remaining = state.sessions.len(), "Removed session");
        Ok(true)
    }

    /// Number of stored tokens (excluding the fallback).
    pub fn count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Stored tokens with the middle elided, for display.
    pub fn masked(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .iter()
            .map(|s| {
                // Slice by characters, not bytes; tokens may be multibyte.
                let chars: Vec<char> = s.chars().collect();
                if chars.len() > 20 {
                    let head: String = chars[..10].iter().collect();
                    let tail: String = chars[chars.len() - 10..].iter().collect();
                    format!("{head}...{tail}")
                } else {
                    s.clone()
                }
            })
            .collect()
    }

    /// Reset the cursor back to the first token.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if !state.sessions.is_empty() {
            state.cursor = 0;
            state.current = state.sessions[0].clone();
            info!("Reset session rotation to first token");
        }
    }

    fn persist(&self, state: &PoolState) -> Result<()> {
        atomic_write_json(
            &self.path,
            &SessionFile {
                sessions: state.sessions.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(tokens: &[&str]) -> (tempfile::TempDir, SessionPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SessionPool::load(dir.path().join("sessions.json"), "fallback-token").unwrap();
        for token in tokens {
            assert!(pool.add(*token).unwrap());
        }
        (dir, pool)
    }

    #[test]
    fn test_empty_pool_serves_fallback() {
        let (_dir, pool) = pool_with(&[]);
        assert_eq!(pool.current(), "fallback-token");
        assert_eq!(pool.rotate(), "fallback-token");
        assert_eq!(pool.count(), 0);
    }

    #[test]
    fn test_rotation_is_cyclic_with_single_wrap_exhaustion() {
        let (_dir, pool) = pool_with(&["aaa", "bbb", "ccc"]);
        assert_eq!(pool.current(), "aaa");

        assert_eq!(pool.rotate(), "bbb");
        assert_eq!(pool.rotate(), "ccc");
        // Wrap: cursor returns to 0 and the fallback is served.
        assert_eq!(pool.rotate(), "fallback-token");
        // The next rotation restarts the cycle.
        assert_eq!(pool.rotate(), "bbb");
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let (_dir, pool) = pool_with(&["aaa"]);
        assert!(!pool.add("aaa").unwrap());
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn test_remove_by_exact_and_prefix() {
        let (_dir, pool) = pool_with(&["alpha-token", "beta-token"]);
        assert!(pool.remove("beta-token").unwrap());
        assert!(pool.remove("alp").unwrap());
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.current(), "fallback-token");
    }

    #[test]
    fn test_remove_refuses_ambiguous_prefix() {
        let (_dir, pool) = pool_with(&["token-one", "token-two"]);
        assert!(!pool.remove("token-").unwrap());
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn test_remove_missing_is_false() {
        let (_dir, pool) = pool_with(&["aaa"]);
        assert!(!pool.remove("zzz").unwrap());
    }

    #[test]
    fn test_remove_before_cursor_shifts_it() {
        let (_dir, pool) = pool_with(&["aaa", "bbb", "ccc"]);
        pool.rotate(); // cursor -> bbb
        assert!(pool.remove("aaa").unwrap());
        // Current token is unchanged by removing an earlier entry.
        assert_eq!(pool.current(), "bbb");
        assert_eq!(pool.rotate(), "ccc");
    }

    #[test]
    fn test_remove_current_repoints() {
        let (_dir, pool) = pool_with(&["aaa", "bbb", "ccc"]);
        pool.rotate(); // bbb
        assert!(pool.remove("bbb").unwrap());
        assert_eq!(pool.current(), "ccc");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        {
            let pool = SessionPool::load(&path, "fb").unwrap();
            pool.add("aaa").unwrap();
            pool.add("bbb").unwrap();
        }
        let pool = SessionPool::load(&path, "fb").unwrap();
        assert_eq!(pool.count(), 2);
        assert_eq!(pool.current(), "aaa");
    }

    #[test]
    fn test_masked() {
        let (_dir, pool) = pool_with(&["0123456789abcdefghijklmnop", "short"]);
        let masked = pool.masked();
        assert_eq!(masked[0], "0123456789...ghijklmnop");
        assert_eq!(masked[1], "short");
    }

    #[test]
    fn test_masked_handles_multibyte_tokens() {
        let (_dir, pool) = pool_with(&["€€€€€€€€€€€€€€€€€€€€€", "abc€def"]);
        let masked = pool.masked();
        assert_eq!(masked[0], "€€€€€€€€€€...€€€€€€€€€€");
        assert_eq!(masked[1], "abc€def");
    }

    #[test]
    fn test_reset() {
        let (_dir, pool) = pool_with(&["aaa", "bbb"]);
        pool.rotate();
        pool.reset();
        assert_eq!(pool.current(), "aaa");
    }
}
