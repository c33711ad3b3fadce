//! Token counting for context budgeting.
//!
//! Two counter implementations plus a caching wrapper: a BPE-backed
//! counter for models with a known encoding, and an approximate counter
//! used as the universal fallback. Counts are estimates used for
//! budgeting, not billing.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::Message;

/// Per-message token overhead (role framing, separators).
const MESSAGE_OVERHEAD: usize = 4;

/// Tokens reserved for reply priming.
const REPLY_PRIMING: usize = 2;

/// Overhead per tool call beyond its name and arguments.
const TOOL_CALL_OVERHEAD: usize = 10;

/// Counts tokens in text and message lists.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a plain text string.
    fn count(&self, text: &str) -> usize;

    /// Count tokens across a message list, including per-message and
    /// reply-priming overhead.
    fn count_messages(&self, messages: &[Message]) -> usize;

    /// Count a single message (with overheads).
    fn count_message(&self, message: &Message) -> usize {
        self.count_messages(std::slice::from_ref(message))
    }
}

/// Shared message-walk used by both concrete counters: the only thing
/// that differs between them is how text is counted.
fn count_messages_with(count: &dyn Fn(&str) -> usize, messages: &[Message]) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut total = 0;
    for message in messages {
        total += MESSAGE_OVERHEAD;
        total += count(&message.text());

        if let Some(ref name) = message.name {
            total += count(name);
        }

        if let Some(ref tool_calls) = message.tool_calls {
            for call in tool_calls {
                total += count(&call.function.name);
                total += count(&call.function.arguments);
                total += TOOL_CALL_OVERHEAD;
            }
        }
    }

    total + REPLY_PRIMING
}

/// Approximate counter: word count times a per-word ratio plus
/// punctuation weighted per character. Within ~50% of a real tokenizer
/// on English prose and code, which is enough for budgeting.
#[derive(Debug, Clone)]
pub struct ApproximateCounter {
    tokens_per_word: f64,
    tokens_per_char: f64,
}

impl ApproximateCounter {
    /// Create a counter with explicit ratios.
    pub fn with_ratios(tokens_per_word: f64, tokens_per_char: f64) -> Self {
        ApproximateCounter {
            tokens_per_word,
            tokens_per_char,
        }
    }

    /// Create a counter with the default ratios (1.3 / 0.25).
    pub fn new() -> Self {
        Self::with_ratios(1.3, 0.25)
    }
}

impl Default for ApproximateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for ApproximateCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let words = text.split_whitespace().count();
        let punct_chars = text.chars().filter(|c| c.is_ascii_punctuation()).count();

        (words as f64 * self.tokens_per_word).ceil() as usize
            + (punct_chars as f64 * self.tokens_per_char).ceil() as usize
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        count_messages_with(&|text| self.count(text), messages)
    }
}

/// BPE-backed counter using the model's tiktoken encoding.
///
/// Falls back to the approximate formula when no encoding is known for
/// the model.
pub struct BpeCounter {
    bpe: Option<tiktoken_rs::CoreBPE>,
    fallback: ApproximateCounter,
}

impl BpeCounter {
    /// Create a counter for a specific model.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok();
        if bpe.is_none() {
            debug!("No BPE encoding available for {}, using approximation", model);
        }
        BpeCounter {
            bpe,
            fallback: ApproximateCounter::new(),
        }
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.bpe {
            Some(ref bpe) => bpe.encode_with_special_tokens(text).len(),
            None => self.fallback.count(text),
        }
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        count_messages_with(&|text| self.count(text), messages)
    }
}

/// Cache statistics exposed by [`CachingCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Cache hits since creation or last clear
    pub hits: u64,
    /// Cache misses since creation or last clear
    pub misses: u64,
    /// Current number of cached entries
    pub size: usize,
    /// Hit rate as a whole percentage
    pub hit_rate_percent: u64,
}

/// Thread-safe LRU cache over another counter's `count(text)`.
///
/// `count_messages` delegates straight through: message lists mutate
/// every turn, so caching them would only churn the cache.
pub struct CachingCounter {
    counter: Box<dyn TokenCounter>,
    cache: Mutex<LruCache<String, usize>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachingCounter {
    /// Wrap a counter with an LRU cache of the given capacity.
    pub fn new(counter: Box<dyn TokenCounter>, max_cache_size: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_cache_size)
            .ok_or_else(|| Error::InvalidInput("cache size must be positive".to_string()))?;
        Ok(CachingCounter {
            counter,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.cache.lock().expect("counter cache poisoned").len(),
            hit_rate_percent: if total == 0 { 0 } else { hits * 100 / total },
        }
    }

    /// Drop all cached entries and reset statistics.
    pub fn clear(&self) {
        self.cache.lock().expect("counter cache poisoned").clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl TokenCounter for CachingCounter {
    fn count(&self, text: &str) -> usize {
        {
            let mut cache = self.cache.lock().expect("counter cache poisoned");
            if let Some(&tokens) = cache.get(text) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return tokens;
            }
        }

        // Count outside the lock; duplicate work on a race is harmless.
        let tokens = self.counter.count(text);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.cache
            .lock()
            .expect("counter cache poisoned")
            .put(text.to_string(), tokens);
        tokens
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        self.counter.count_messages(messages)
    }
}

/// Model families with a known tiktoken encoding.
const BPE_MODEL_FAMILIES: &[&str] = &["gpt", "claude", "anthropic", "o1", "o3"];

/// Build the counter for a model: BPE-backed for known families,
/// approximate otherwise, always behind a cache.
pub fn counter_for_model(model: &str) -> CachingCounter {
    let lowered = model.to_lowercase();
    let inner: Box<dyn TokenCounter> = if BPE_MODEL_FAMILIES
        .iter()
        .any(|family| lowered.contains(family))
    {
        Box::new(BpeCounter::for_model(model))
    } else {
        Box::new(ApproximateCounter::new())
    };

    CachingCounter::new(inner, 4096).expect("default cache size is positive")
}
