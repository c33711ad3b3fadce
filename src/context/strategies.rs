//! Truncation strategies for fitting a message list into a token budget.
//!
//! Every strategy preserves the relative order of surviving messages and
//! returns its input unchanged when nothing needs to go. Strategies are
//! synchronous and composable; compaction (which consults an LLM) lives
//! in its own module.

use std::collections::HashSet;

use tracing::debug;

use super::tokens::TokenCounter;
use crate::llm::{Message, Role};

/// Tokens a single message contributes to a list total (reply priming
/// excluded, since it is paid once per list).
fn message_cost(counter: &dyn TokenCounter, message: &Message) -> usize {
    counter.count_message(message).saturating_sub(2)
}

/// A strategy that reduces a message list to fit a token budget.
pub trait TruncationStrategy: Send + Sync {
    /// Produce a (possibly shorter) list that fits the budget.
    fn truncate(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Message>;
}

/// Keep the last N messages, optionally pinning system messages at the
/// front.
pub struct SlidingWindowStrategy {
    window_size: usize,
    preserve_system: bool,
}

impl SlidingWindowStrategy {
    pub fn new(window_size: usize, preserve_system: bool) -> Self {
        SlidingWindowStrategy {
            window_size,
            preserve_system,
        }
    }
}

impl Default for SlidingWindowStrategy {
    fn default() -> Self {
        Self::new(50, true)
    }
}

impl TruncationStrategy for SlidingWindowStrategy {
    fn truncate(
        &self,
        messages: &[Message],
        _budget: usize,
        _counter: &dyn TokenCounter,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        if !self.preserve_system {
            let start = messages.len().saturating_sub(self.window_size);
            return messages[start..].to_vec();
        }

        let (system, rest): (Vec<_>, Vec<_>) = messages
            .iter()
            .cloned()
            .partition(|m| m.role == Role::System);

        let start = rest.len().saturating_sub(self.window_size);
        let mut result = system;
        result.extend_from_slice(&rest[start..]);
        result
    }
}

/// Drop the oldest non-system messages until the list fits the budget.
/// If the system messages alone exceed the budget, only they survive.
pub struct TokenBudgetStrategy {
    preserve_system: bool,
}

impl TokenBudgetStrategy {
    pub fn new(preserve_system: bool) -> Self {
        TokenBudgetStrategy { preserve_system }
    }
}

impl Default for TokenBudgetStrategy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TruncationStrategy for TokenBudgetStrategy {
    fn truncate(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }
        if counter.count_messages(messages) <= budget {
            return messages.to_vec();
        }

        let (system, rest): (Vec<_>, Vec<_>) = if self.preserve_system {
            messages
                .iter()
                .cloned()
                .partition(|m| m.role == Role::System)
        } else {
            (Vec::new(), messages.to_vec())
        };

        let system_cost: usize = system.iter().map(|m| message_cost(counter, m)).sum();
        if system_cost + 2 > budget {
            debug!("System messages alone exceed budget, dropping the rest");
            return system;
        }

        // Walk from the newest message, keeping while it still fits.
        let mut kept = Vec::new();
        let mut total = system_cost;
        for message in rest.iter().rev() {
            let cost = message_cost(counter, message);
            if total + cost + 2 > budget {
                break;
            }
            total += cost;
            kept.push(message.clone());
        }
        kept.reverse();

        let mut result = system;
        result.extend(kept);
        result
    }
}

/// Keep the first P and last Q messages, replacing the omitted middle
/// with a synthetic marker. The tail shrinks further while the result
/// stays over budget.
pub struct SmartTruncationStrategy {
    preserve_first: usize,
    preserve_last: usize,
    preserve_system: bool,
}

impl SmartTruncationStrategy {
    pub fn new(preserve_first: usize, preserve_last: usize, preserve_system: bool) -> Self {
        SmartTruncationStrategy {
            preserve_first,
            preserve_last,
            preserve_system,
        }
    }

    fn marker(omitted: usize) -> Message {
        Message::user(format!("[{} messages omitted]", omitted))
    }
}

impl Default for SmartTruncationStrategy {
    fn default() -> Self {
        Self::new(2, 10, true)
    }
}

impl TruncationStrategy for SmartTruncationStrategy {
    fn truncate(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let (system, rest): (Vec<_>, Vec<_>) = if self.preserve_system {
            messages
                .iter()
                .cloned()
                .partition(|m| m.role == Role::System)
        } else {
            (Vec::new(), messages.to_vec())
        };

        if rest.len() <= self.preserve_first + self.preserve_last {
            let mut result = system;
            result.extend(rest);
            return result;
        }

        let head = &rest[..self.preserve_first];
        let mut tail_len = self.preserve_last;

        loop {
            let omitted = rest.len() - self.preserve_first - tail_len;
            let mut candidate = system.clone();
            candidate.extend_from_slice(head);
            candidate.push(Self::marker(omitted));
            candidate.extend_from_slice(&rest[rest.len() - tail_len..]);

            if counter.count_messages(&candidate) <= budget || tail_len <= 1 {
                return candidate;
            }
            tail_len -= 1;
        }
    }
}

/// Keep messages by role or explicit preserve flag, then fill the rest
/// of the budget from the most recent removable messages.
pub struct SelectiveStrategy {
    preserve_roles: HashSet<Role>,
    preserve_marked: bool,
}

impl SelectiveStrategy {
    pub fn new(preserve_roles: HashSet<Role>, preserve_marked: bool) -> Self {
        SelectiveStrategy {
            preserve_roles,
            preserve_marked,
        }
    }

    fn is_preserved(&self, message: &Message) -> bool {
        self.preserve_roles.contains(&message.role) || (self.preserve_marked && message.preserve)
    }
}

impl Default for SelectiveStrategy {
    fn default() -> Self {
        let mut roles = HashSet::new();
        roles.insert(Role::System);
        Self::new(roles, true)
    }
}

impl TruncationStrategy for SelectiveStrategy {
    fn truncate(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }
        if counter.count_messages(messages) <= budget {
            return messages.to_vec();
        }

        // Indices of messages that must survive.
        let mut keep: HashSet<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| self.is_preserved(m))
            .map(|(i, _)| i)
            .collect();

        let mut total: usize = keep
            .iter()
            .map(|&i| message_cost(counter, &messages[i]))
            .sum();

        // Fill remaining budget from the most recent removable messages.
        for (i, message) in messages.iter().enumerate().rev() {
            if keep.contains(&i) {
                continue;
            }
            let cost = message_cost(counter, message);
            if total + cost + 2 > budget {
                continue;
            }
            total += cost;
            keep.insert(i);
        }

        messages
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, m)| m.clone())
            .collect()
    }
}

/// Apply strategies in order, stopping as soon as the list fits.
pub struct CompositeStrategy {
    strategies: Vec<Box<dyn TruncationStrategy>>,
}

impl CompositeStrategy {
    pub fn new(strategies: Vec<Box<dyn TruncationStrategy>>) -> Self {
        CompositeStrategy { strategies }
    }
}

impl TruncationStrategy for CompositeStrategy {
    fn truncate(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<Message> {
        let mut current = messages.to_vec();
        for strategy in &self.strategies {
            if counter.count_messages(&current) <= budget {
                break;
            }
            current = strategy.truncate(&current, budget, counter);
        }
        current
    }
}
