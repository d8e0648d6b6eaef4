//! The one conversation timeline shared by every caller.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use warden_core::{CallerEntry, HistoryEntry, SessionId, SessionSnapshot};

/// Participants named in the context block.
const CONTEXT_PARTICIPANTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    pub history_cap: usize,
    pub caller_cap: usize,
    pub idle_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            history_cap: 8,
            caller_cap: 10,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Bounded history plus recent callers. Eviction is FIFO on both.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    message_count: u64,
    history: VecDeque<HistoryEntry>,
    recent_callers: VecDeque<CallerEntry>,
    limits: SessionLimits,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: SessionId,
    pub message_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Distinct display names among recent callers, oldest first.
    pub participants: Vec<String>,
    pub history_len: usize,
    pub duration_minutes: i64,
    pub idle_seconds: i64,
}

impl ConversationSession {
    pub fn new(limits: SessionLimits, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            started_at: now,
            last_activity_at: now,
            message_count: 0,
            history: VecDeque::with_capacity(limits.history_cap),
            recent_callers: VecDeque::with_capacity(limits.caller_cap),
            limits,
        }
    }

    /// Rebuild from a snapshot, dropping the oldest entries beyond the caps.
    pub fn restore(snapshot: SessionSnapshot, limits: SessionLimits) -> Self {
        let mut history: VecDeque<HistoryEntry> = snapshot.history.into();
        while history.len() > limits.history_cap {
            history.pop_front();
        }
        let mut recent_callers: VecDeque<CallerEntry> = snapshot.recent_callers.into();
        while recent_callers.len() > limits.caller_cap {
            recent_callers.pop_front();
        }
        Self {
            id: snapshot.session_id,
            started_at: snapshot.started_at,
            last_activity_at: snapshot.last_activity_at.max(snapshot.started_at),
            message_count: snapshot.message_count,
            history,
            recent_callers,
            limits,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            message_count: self.message_count,
            history: self.history.iter().cloned().collect(),
            recent_callers: self.recent_callers.iter().cloned().collect(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Committed turns.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn recent_callers(&self) -> impl Iterator<Item = &CallerEntry> {
        self.recent_callers.iter()
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (now - self.last_activity_at).to_std() {
            Ok(idle) => idle > self.limits.idle_timeout,
            // `now` is before the last activity (clock went backwards).
            Err(_) => false,
        }
    }

    /// Record an incoming message and return the context block for it.
    pub fn append_and_build_context(
        &mut self,
        caller_id: &str,
        display_name: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> String {
        self.push_caller(CallerEntry {
            caller_id: caller_id.to_string(),
            display_name: display_name.to_string(),
            timestamp: now,
        });
        self.push_history(HistoryEntry::new(display_name, message));
        self.touch(now);
        self.build_context()
    }

    /// Record the reply that completes a turn.
    pub fn append_reply(&mut self, speaker: &str, reply: &str, now: DateTime<Utc>) {
        self.push_history(HistoryEntry::new(speaker, reply));
        self.message_count += 1;
        self.touch(now);
    }

    /// Session facts followed by the shared history, newest line last.
    pub fn build_context(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Shared session");
        let _ = writeln!(out, "- Started: {}", fmt_time(self.started_at));
        let _ = writeln!(out, "- Messages exchanged: {}", self.message_count);
        let participants = self.participants(CONTEXT_PARTICIPANTS);
        if !participants.is_empty() {
            let _ = writeln!(out, "- Recent participants: {}", participants.join(", "));
        }
        let _ = writeln!(out, "- Last activity: {}", fmt_time(self.last_activity_at));
        out.push('\n');
        let _ = writeln!(out, "## Conversation (shared by all participants)");
        let lines: Vec<String> = self
            .history
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.text))
            .collect();
        out.push_str(&lines.join("\n"));
        out
    }

    pub fn stats(&self, now: DateTime<Utc>) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            message_count: self.message_count,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            participants: self.participants(self.limits.caller_cap),
            history_len: self.history.len(),
            duration_minutes: (now - self.started_at).num_minutes().max(0),
            idle_seconds: (now - self.last_activity_at).num_seconds().max(0),
        }
    }

    /// Distinct display names among the last `window` callers.
    fn participants(&self, window: usize) -> Vec<String> {
        let skip = self.recent_callers.len().saturating_sub(window);
        let mut names: Vec<String> = Vec::new();
        for caller in self.recent_callers.iter().skip(skip) {
            if !names.contains(&caller.display_name) {
                names.push(caller.display_name.clone());
            }
        }
        names
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.limits.history_cap == 0 {
            return;
        }
        if self.history.len() == self.limits.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    fn push_caller(&mut self, entry: CallerEntry) {
        if self.limits.caller_cap == 0 {
            return;
        }
        if self.recent_callers.len() == self.limits.caller_cap {
            self.recent_callers.pop_front();
        }
        self.recent_callers.push_back(entry);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn session() -> ConversationSession {
        ConversationSession::new(SessionLimits::default(), t(0))
    }

    #[test]
    fn history_is_capped_fifo() {
        let mut s = session();
        for i in 0..11 {
            s.append_and_build_context("u1", "Alice", &format!("m{i}"), t(i));
        }
        let texts: Vec<_> = s.history().map(|e| e.text.as_str()).collect();
        assert_eq!(texts.len(), 8);
        assert_eq!(texts.first(), Some(&"m3"));
        assert_eq!(texts.last(), Some(&"m10"));
    }

    #[test]
    fn callers_are_capped_fifo() {
        let mut s = session();
        for i in 0..13 {
            s.append_and_build_context(&format!("u{i}"), &format!("User{i}"), "hi", t(i));
        }
        let ids: Vec<_> = s.recent_callers().map(|c| c.caller_id.as_str()).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], "u3");
        assert_eq!(ids[9], "u12");
    }

    #[test]
    fn two_callers_in_completion_order() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "hello", t(1));
        s.append_reply("assistant", "hi Alice", t(2));
        s.append_and_build_context("b", "Bob", "hey", t(3));
        s.append_reply("assistant", "hi Bob", t(4));

        let lines: Vec<_> = s.history().map(|e| format!("{}: {}", e.speaker, e.text)).collect();
        assert_eq!(
            lines,
            vec!["Alice: hello", "assistant: hi Alice", "Bob: hey", "assistant: hi Bob"]
        );
        let callers: Vec<_> = s.recent_callers().map(|c| c.caller_id.as_str()).collect();
        assert_eq!(callers, vec!["a", "b"]);
        assert_eq!(s.message_count(), 2);
    }

    #[test]
    fn context_lists_participants_and_ends_with_message() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "hello", t(1));
        s.append_reply("assistant", "hi", t(2));
        let ctx = s.append_and_build_context("b", "Bob", "what's new?", t(3));

        assert!(ctx.contains("- Messages exchanged: 1"));
        assert!(ctx.contains("- Recent participants: Alice, Bob"));
        assert!(ctx.contains("Alice: hello\nassistant: hi\nBob: what's new?"));
        assert_eq!(ctx.lines().last(), Some("Bob: what's new?"));
    }

    #[test]
    fn last_activity_never_moves_backwards() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "one", t(100));
        s.append_reply("assistant", "r", t(50));
        assert_eq!(s.last_activity_at(), t(100));
    }

    #[test]
    fn expiry_uses_idle_timeout() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "one", t(10));
        assert!(!s.is_expired(t(10 + 30 * 60)));
        assert!(s.is_expired(t(10 + 30 * 60 + 1)));
        assert!(!s.is_expired(t(0)));
    }

    #[test]
    fn restore_of_snapshot_is_identity() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "hello", t(1));
        s.append_reply("assistant", "hi", t(2));
        let restored = ConversationSession::restore(s.snapshot(), s.limits());
        assert_eq!(restored, s);
    }

    #[test]
    fn restore_trims_to_smaller_caps() {
        let mut s = session();
        for i in 0..8 {
            s.append_and_build_context(&format!("u{i}"), "N", &format!("m{i}"), t(i));
        }
        let limits = SessionLimits {
            history_cap: 3,
            caller_cap: 2,
            ..SessionLimits::default()
        };
        let restored = ConversationSession::restore(s.snapshot(), limits);
        let texts: Vec<_> = restored.history().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m5", "m6", "m7"]);
        let ids: Vec<_> = restored.recent_callers().map(|c| c.caller_id.as_str()).collect();
        assert_eq!(ids, vec!["u6", "u7"]);
    }

    #[test]
    fn stats_report_unique_participants() {
        let mut s = session();
        s.append_and_build_context("a", "Alice", "1", t(60));
        s.append_and_build_context("b", "Bob", "2", t(120));
        s.append_and_build_context("a", "Alice", "3", t(180));
        let stats = s.stats(t(600));
        assert_eq!(stats.participants, vec!["Alice", "Bob"]);
        assert_eq!(stats.duration_minutes, 10);
        assert_eq!(stats.idle_seconds, 420);
        assert_eq!(stats.history_len, 3);
    }
}
