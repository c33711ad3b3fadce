//! Context compaction: replacing the middle of a conversation with an
//! LLM-produced summary, and capping oversized tool results.
//!
//! Compaction must never make things worse: if the summary would exceed
//! the remaining budget, or the LLM call fails, the input is returned
//! unchanged.

use std::sync::Arc;

use tracing::{debug, warn};

use super::tokens::TokenCounter;
use crate::llm::{GenerationOptions, LlmProvider, Message, Role};

/// Prefix attached to every compaction summary message.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]";

/// Summarises the middle of a conversation into a single message.
pub struct ContextCompactor {
    llm: Arc<dyn LlmProvider>,
    max_summary_tokens: u32,
    min_messages_to_summarize: usize,
}

impl ContextCompactor {
    /// Create a compactor with default limits.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self::with_limits(llm, 500, 3)
    }

    /// Create a compactor with explicit limits.
    pub fn with_limits(
        llm: Arc<dyn LlmProvider>,
        max_summary_tokens: u32,
        min_messages_to_summarize: usize,
    ) -> Self {
        ContextCompactor {
            llm,
            max_summary_tokens,
            min_messages_to_summarize,
        }
    }

    /// Compact `messages` to fit `budget`, preserving the system prefix
    /// and the `preserve_last` most recent messages.
    pub async fn compact(
        &self,
        messages: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
        preserve_last: usize,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let (system, rest): (Vec<_>, Vec<_>) = messages
            .iter()
            .cloned()
            .partition(|m| m.role == Role::System);

        if rest.len() <= preserve_last {
            return messages.to_vec();
        }
        let split = rest.len() - preserve_last;
        let (middle, tail) = rest.split_at(split);

        if middle.len() < self.min_messages_to_summarize {
            debug!(
                "Only {} summarisable messages, below minimum {}",
                middle.len(),
                self.min_messages_to_summarize
            );
            return messages.to_vec();
        }

        let summary = match self.summarize_messages(middle).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Compaction summarisation failed, keeping original: {}", e);
                return messages.to_vec();
            }
        };

        let summary_message = Message::user(format!("{} {}", SUMMARY_PREFIX, summary));

        // The summary must actually fit in what the kept messages leave over.
        let mut kept: Vec<Message> = system.clone();
        kept.extend_from_slice(tail);
        let remaining = budget.saturating_sub(counter.count_messages(&kept));
        if counter.count_message(&summary_message) > remaining {
            debug!("Summary would exceed remaining budget, keeping original");
            return messages.to_vec();
        }

        let mut result = system;
        result.push(summary_message);
        result.extend_from_slice(tail);
        result
    }

    /// Ask the LLM to summarise a span of messages.
    pub async fn summarize_messages(&self, messages: &[Message]) -> crate::Result<String> {
        let transcript = format_for_summary(messages);
        let prompt = format!(
            "Summarize the following conversation concisely, keeping decisions, \
             facts, file paths, and unresolved questions. Respond with the summary \
             text only.\n\n---\n{}\n---",
            transcript
        );

        let options = GenerationOptions {
            max_tokens: Some(self.max_summary_tokens),
            ..GenerationOptions::precise()
        };

        let response = self
            .llm
            .generate(&[Message::user(prompt)], &[], &options)
            .await?;
        Ok(response.content)
    }
}

/// Format messages as `role: content` lines, truncating long bodies.
fn format_for_summary(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let text = m.text();
            let body = if text.chars().count() > 500 {
                let cut: String = text.chars().take(500).collect();
                format!("{}...", cut)
            } else {
                text
            };
            format!("{}: {}", m.role, body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Caps oversized tool results, preferring to cut at a line or word
/// boundary and recording how many tokens were removed.
pub struct ToolResultCompactor {
    max_result_tokens: usize,
    truncation_message: String,
}

impl ToolResultCompactor {
    /// Create a compactor with the default marker text.
    pub fn new(max_result_tokens: usize) -> Self {
        Self::with_marker(
            max_result_tokens,
            "\n[truncated: {removed} tokens removed]".to_string(),
        )
    }

    /// Create a compactor with a custom marker. `{removed}` is replaced
    /// by the number of tokens cut.
    pub fn with_marker(max_result_tokens: usize, truncation_message: String) -> Self {
        ToolResultCompactor {
            max_result_tokens,
            truncation_message,
        }
    }

    /// Truncate a raw result string to the cap.
    pub fn compact_result(&self, text: &str, counter: &dyn TokenCounter) -> String {
        if text.is_empty() {
            return String::new();
        }

        let total = counter.count(text);
        if total <= self.max_result_tokens {
            return text.to_string();
        }

        // Proportional cut by bytes, then nudged back to a boundary.
        let keep_ratio = self.max_result_tokens as f64 / total as f64;
        let target = ((text.len() as f64) * keep_ratio) as usize;
        let target = floor_char_boundary(text, target.min(text.len()));

        let cut = find_break_point(text, target);
        let kept = &text[..cut];

        let removed = total.saturating_sub(counter.count(kept));
        let marker = self
            .truncation_message
            .replace("{removed}", &removed.to_string());

        format!("{}{}", kept, marker)
    }

    /// Truncate a tool message's content; other roles pass through
    /// unchanged, and all other fields are preserved.
    pub fn compact_message(&self, message: &Message, counter: &dyn TokenCounter) -> Message {
        if message.role != Role::Tool {
            return message.clone();
        }

        let text = message.text();
        let compacted = self.compact_result(&text, counter);
        if compacted == text {
            return message.clone();
        }

        let mut result = message.clone();
        result.content = compacted.into();
        result
    }
}

impl Default for ToolResultCompactor {
    fn default() -> Self {
        Self::new(2000)
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Prefer breaking at a newline, then whitespace, within a lookback
/// window of the cut point.
fn find_break_point(text: &str, target: usize) -> usize {
    if target == 0 || target >= text.len() {
        return target;
    }

    let window_start = floor_char_boundary(text, target.saturating_sub(200));
    let slice = &text[window_start..target];

    if let Some(pos) = slice.rfind('\n') {
        return window_start + pos + 1;
    }
    if let Some(pos) = slice.rfind(char::is_whitespace) {
        return window_start + pos + 1;
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokens::ApproximateCounter;
    use crate::error::{Error, ProviderError};
    use crate::llm::{LlmResponse, LlmStream, ToolDefinition};
    use async_trait::async_trait;

    /// Provider fake that returns a fixed summary (or an error).
    struct FixedProvider {
        summary: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn default_model(&self) -> &str {
            "test/model"
        }

        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerationOptions,
        ) -> crate::Result<LlmResponse> {
            match self.summary {
                Some(ref summary) => Ok(LlmResponse {
                    id: "r".into(),
                    model: "test/model".into(),
                    content: summary.clone(),
                    finish_reason: Some("stop".into()),
                    tool_calls: vec![],
                    usage: None,
                }),
                None => Err(Error::Provider(ProviderError::ServerError("down".into()))),
            }
        }

        async fn generate_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _options: &GenerationOptions,
        ) -> crate::Result<LlmStream> {
            unimplemented!("not used by compaction")
        }
    }

    fn compactor_with(summary: Option<&str>) -> ContextCompactor {
        ContextCompactor::with_limits(
            Arc::new(FixedProvider {
                summary: summary.map(String::from),
            }),
            500,
            3,
        )
    }

    fn numbered(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| Message::user(format!("Message {}", i)))
            .collect()
    }

    #[tokio::test]
    async fn compact_empty() {
        let compactor = compactor_with(Some("summary"));
        let counter = ApproximateCounter::new();
        assert!(compactor.compact(&[], 1000, &counter, 5).await.is_empty());
    }

    #[tokio::test]
    async fn compact_too_few_messages_unchanged() {
        let compactor = compactor_with(Some("summary"));
        let counter = ApproximateCounter::new();
        let messages = numbered(2);

        let result = compactor.compact(&messages, 1000, &counter, 1).await;
        assert_eq!(result, messages);
    }

    #[tokio::test]
    async fn compact_preserves_recent() {
        let compactor = compactor_with(Some("summary of earlier talk"));
        let counter = ApproximateCounter::new();
        let messages = numbered(20);

        let result = compactor.compact(&messages, 100000, &counter, 5).await;
        for i in 15..20 {
            assert!(result.iter().any(|m| m.text() == format!("Message {}", i)));
        }
    }

    #[tokio::test]
    async fn compact_creates_one_summary_message() {
        let compactor = compactor_with(Some("summary of earlier talk"));
        let counter = ApproximateCounter::new();

        let result = compactor.compact(&numbered(20), 100000, &counter, 5).await;
        let summaries: Vec<_> = result
            .iter()
            .filter(|m| m.text().starts_with(SUMMARY_PREFIX))
            .collect();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn compact_keeps_system_prefix() {
        let compactor = compactor_with(Some("summary"));
        let counter = ApproximateCounter::new();
        let mut messages = vec![Message::system("You are helpful")];
        messages.extend(numbered(20));

        let result = compactor.compact(&messages, 100000, &counter, 3).await;
        assert_eq!(result[0].role, Role::System);
        assert_eq!(result[0].text(), "You are helpful");
    }

    #[tokio::test]
    async fn compact_llm_failure_returns_original() {
        let compactor = compactor_with(None);
        let counter = ApproximateCounter::new();
        let messages = numbered(20);

        let result = compactor.compact(&messages, 1000, &counter, 5).await;
        assert_eq!(result, messages);
    }

    #[tokio::test]
    async fn compact_oversized_summary_returns_original() {
        let huge = "word ".repeat(5000);
        let compactor = compactor_with(Some(&huge));
        let counter = ApproximateCounter::new();
        let messages = numbered(20);

        let result = compactor.compact(&messages, 10, &counter, 5).await;
        assert_eq!(result, messages);
    }

    #[test]
    fn format_truncates_long_content() {
        let messages = vec![Message::user("x".repeat(600))];
        let formatted = format_for_summary(&messages);
        assert!(formatted.len() < 600 + 50);
        assert!(formatted.contains("..."));
    }

    #[test]
    fn format_labels_roles() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi!")];
        let formatted = format_for_summary(&messages);
        assert!(formatted.contains("user: Hello"));
        assert!(formatted.contains("assistant: Hi!"));
    }

    #[test]
    fn tool_result_empty_unchanged() {
        let compactor = ToolResultCompactor::new(100);
        let counter = ApproximateCounter::new();
        assert_eq!(compactor.compact_result("", &counter), "");
    }

    #[test]
    fn tool_result_small_unchanged() {
        let compactor = ToolResultCompactor::new(1000);
        let counter = ApproximateCounter::new();
        assert_eq!(compactor.compact_result("Small result", &counter), "Small result");
    }

    #[test]
    fn tool_result_truncates_large() {
        let compactor = ToolResultCompactor::new(100);
        let counter = ApproximateCounter::new();
        let text = "word ".repeat(1000);

        let result = compactor.compact_result(&text, &counter);
        assert!(result.len() < text.len());
        assert!(result.to_lowercase().contains("truncated"));
    }

    #[test]
    fn tool_result_reports_removed_tokens() {
        let compactor = ToolResultCompactor::new(100);
        let counter = ApproximateCounter::new();
        let text = "word ".repeat(1000);
        let total = counter.count(&text);

        let result = compactor.compact_result(&text, &counter);
        let marker_start = result.rfind("[truncated:").expect("marker present");
        let reported: usize = result[marker_start..]
            .trim_start_matches("[truncated:")
            .trim_end_matches(']')
            .trim()
            .trim_end_matches(" tokens removed")
            .trim()
            .parse()
            .expect("numeric removed count");

        let kept = counter.count(&result[..marker_start]);
        let actual_removed = total - kept;
        // Reported within 5% of actual.
        let tolerance = (actual_removed as f64 * 0.05).ceil() as usize;
        assert!(
            reported.abs_diff(actual_removed) <= tolerance,
            "reported {} vs actual {}",
            reported,
            actual_removed
        );
    }

    #[test]
    fn tool_result_custom_marker() {
        let compactor =
            ToolResultCompactor::with_marker(50, "\n[CUT: {removed} gone]".to_string());
        let counter = ApproximateCounter::new();
        let text = "word ".repeat(500);

        let result = compactor.compact_result(&text, &counter);
        assert!(result.contains("[CUT:"));
        assert!(result.contains("gone]"));
    }

    #[test]
    fn tool_result_breaks_at_whitespace() {
        let compactor = ToolResultCompactor::new(50);
        let counter = ApproximateCounter::new();
        let text = "word1 word2 word3 word4 word5 ".repeat(100);

        let result = compactor.compact_result(&text, &counter);
        let kept = &result[..result.rfind("[truncated:").unwrap()];
        // The cut lands just after whitespace, never mid-word.
        assert!(kept.ends_with(|c: char| c.is_whitespace()));
    }

    #[test]
    fn message_non_tool_unchanged() {
        let compactor = ToolResultCompactor::new(10);
        let counter = ApproximateCounter::new();
        let message = Message::user("x".repeat(5000));

        assert_eq!(compactor.compact_message(&message, &counter), message);
    }

    #[test]
    fn message_small_tool_unchanged() {
        let compactor = ToolResultCompactor::new(1000);
        let counter = ApproximateCounter::new();
        let message = Message::tool("call_1", "Small output");

        assert_eq!(compactor.compact_message(&message, &counter), message);
    }

    #[test]
    fn message_large_tool_truncated_fields_preserved() {
        let compactor = ToolResultCompactor::new(50);
        let counter = ApproximateCounter::new();
        let mut message = Message::tool("call_123", "word ".repeat(500));
        message.name = Some("read_file".to_string());

        let result = compactor.compact_message(&message, &counter);
        assert!(result.text().len() < message.text().len());
        assert!(result.text().to_lowercase().contains("truncated"));
        assert_eq!(result.tool_call_id.as_deref(), Some("call_123"));
        assert_eq!(result.name.as_deref(), Some("read_file"));
    }
}
