//! Conversation history with bounded prompting view
//!
//! An append-only-with-eviction ordered log of turns. Insertion order is
//! chronological and meaningful. The sequence retained for prompting never
//! exceeds `max_history` turns; the oldest turns are evicted first, whole
//! turns only, and the most recent user turn is always preserved.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{Role, Turn};

pub struct ConversationHistory {
    /// Unique conversation ID
    pub id: String,
    turns: Vec<Turn>,
    max_history: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationHistory {
    pub fn new(max_history: usize) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: Vec::new(),
            max_history: max_history.max(1),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn, evicting from the front if the bound is exceeded.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
        self.evict();
    }

    /// Read-only bounded projection: the retained turns, oldest-first.
    /// Never mutates state.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// The prompt context for a pending user turn: the bounded snapshot with
    /// the not-yet-committed user turn at the end, re-bounded to
    /// `max_history` entries.
    pub fn prompt_with(&self, pending: &Turn) -> Vec<Turn> {
        let mut context = self.snapshot();
        context.push(pending.clone());
        while context.len() > self.max_history {
            context.remove(0);
        }
        context
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Whole-turn FIFO eviction. The most recent user turn is never evicted,
    /// even when it has reached the front of the log.
    fn evict(&mut self) {
        while self.turns.len() > self.max_history {
            let last_user = self.turns.iter().rposition(|t| t.role == Role::User);
            let victim = if last_user == Some(0) { 1 } else { 0 };
            let evicted = self.turns.remove(victim);
            debug!("Evicted {} turn from history", evicted.role);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, text: &str) -> Turn {
        match role {
            Role::User => Turn::user(text),
            Role::Assistant => Turn::assistant(text),
        }
    }

    #[test]
    fn test_history_bound_keeps_most_recent_in_order() {
        // maxHistory=4, 6 appends -> snapshot is turns 3..6 in order.
        let mut history = ConversationHistory::new(4);
        for i in 1..=6 {
            let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
            history.append(turn(role, &format!("turn {}", i)));
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 4);
        let contents: Vec<&str> = snapshot.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4", "turn 5", "turn 6"]);
    }

    #[test]
    fn test_most_recent_user_turn_survives_eviction() {
        // With max_history=1, appending user then assistant must keep the
        // user turn: the assistant turn is the eviction victim.
        let mut history = ConversationHistory::new(1);
        history.append(Turn::user("hello"));
        history.append(Turn::assistant("hi there"));

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, Role::User);
        assert_eq!(snapshot[0].content, "hello");
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let mut history = ConversationHistory::new(4);
        history.append(Turn::user("hello"));
        let mut snapshot = history.snapshot();
        snapshot.clear();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_prompt_with_is_bounded() {
        let mut history = ConversationHistory::new(2);
        history.append(Turn::user("a"));
        history.append(Turn::assistant("b"));

        let pending = Turn::user("c");
        let prompt = history.prompt_with(&pending);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].content, "b");
        assert_eq!(prompt[1].content, "c");
        // prompt_with never committed anything
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new(4);
        history.append(Turn::user("hello"));
        history.append(Turn::assistant("hi"));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_bound_clamped_to_one() {
        let mut history = ConversationHistory::new(0);
        history.append(Turn::user("hello"));
        assert_eq!(history.snapshot().len(), 1);
    }
}
