//! Session conversation log.
//!
//! Append-only for the lifetime of a session. The full log is kept for
//! display; only a bounded suffix is sent to the backend as context.

use crate::types::Turn;

#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    turns: Vec<Turn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The last `n` turns, oldest first.
    pub fn recent_window(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn all(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn store_with(n: usize) -> ConversationStore {
        let mut store = ConversationStore::new();
        for i in 0..n {
            if i % 2 == 0 {
                store.append(Turn::user(format!("q{i}")));
            } else {
                store.append(Turn::assistant(format!("a{i}")));
            }
        }
        store
    }

    #[test]
    fn empty_store() {
        let store = ConversationStore::new();
        assert!(store.is_empty());
        assert!(store.recent_window(8).is_empty());
    }

    #[test]
    fn window_smaller_than_log_returns_suffix() {
        let store = store_with(11);
        let window = store.recent_window(8);
        assert_eq!(window.len(), 8);
        assert_eq!(window, &store.all()[3..]);
        assert_eq!(window[0].text, "a3");
        assert_eq!(window[7].text, "q10");
    }

    #[test]
    fn window_never_exceeds_bound() {
        for n in 0..20 {
            let store = store_with(n);
            let window = store.recent_window(8);
            assert!(window.len() <= 8);
            assert_eq!(window.len(), n.min(8));
            assert_eq!(window.last(), store.all().last());
        }
    }

    #[test]
    fn preserves_insertion_order() {
        let store = store_with(3);
        let roles: Vec<Role> = store.all().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn zero_window_is_empty() {
        assert!(store_with(4).recent_window(0).is_empty());
    }
}
