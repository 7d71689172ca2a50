//! Token budgeting for gateway prompts
//!
//! Gateway requests fail with quota errors when prompts get too large for
//! the account's credit or the model's limit. Prompts are estimated before
//! sending and trimmed to a budget; actual usage reported by the gateway is
//! accumulated per model.
//!
//! The estimate follows cl100k_base patterns closely enough for budgeting:
//! - ~4 characters per token for regular words, short words are 1 token
//! - JSON punctuation usually becomes separate tokens
//! - numbers take roughly 1 token per 3 digits

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Estimate token count for a string
pub fn estimate_tokens(text: &str) -> u64 {
    let mut tokens = 0u64;
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if matches!(c, '"' | '{' | '}' | '[' | ']' | ':' | ',') {
            tokens += 1;
            chars.next();
        } else if c.is_ascii_digit() {
            let mut len = 0u64;
            while chars
                .next_if(|&n| n.is_ascii_digit() || matches!(n, '.' | 'e' | 'E'))
                .is_some()
            {
                len += 1;
            }
            tokens += len.div_ceil(3);
        } else if c.is_alphanumeric() || c == '_' {
            let mut len = 0u64;
            while chars
                .next_if(|&n| n.is_alphanumeric() || matches!(n, '_' | '-'))
                .is_some()
            {
                len += 1;
            }
            tokens += if len <= 4 { 1 } else { len.div_ceil(4) };
        } else {
            tokens += 1;
            chars.next();
        }
    }

    tokens
}

/// Trim `text` so its estimate fits `budget`
///
/// Cuts on line boundaries and appends a marker naming how many lines were
/// dropped or shortened. The first line that no longer fits is cut at a char
/// boundary, so a single long line (compact JSON) still keeps its head.
/// Text that already fits is returned unchanged.
pub fn fit_to_budget(text: &str, budget: u64) -> String {
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut whole = 0usize;
    let mut used = 0u64;
    // reserve room for the marker line
    let limit = budget.saturating_sub(24);

    for line in &lines {
        let cost = estimate_tokens(line) + 1;
        if used + cost > limit {
            let head = longest_prefix_within(line, limit.saturating_sub(used + 1));
            if !head.is_empty() {
                kept.push(head);
            }
            break;
        }
        used += cost;
        whole += 1;
        kept.push(*line);
    }

    // a shortened line counts as truncated
    let dropped = lines.len() - whole;
    tracing::warn!(
        budget,
        dropped_lines = dropped,
        "Prompt exceeds token budget, truncating"
    );

    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("… (truncated {dropped} lines to fit the token budget)"));
    out
}

/// Longest char-boundary prefix of `line` whose estimate fits `budget`
fn longest_prefix_within(line: &str, budget: u64) -> &str {
    let bounds: Vec<usize> = line
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(line.len()))
        .collect();
    let (mut lo, mut hi) = (0usize, bounds.len() - 1);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if estimate_tokens(&line[..bounds[mid]]) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    &line[..bounds[lo]]
}

/// Token usage reported by the gateway for one model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Accumulated usage across all models
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total_tokens: u64,
    pub models: HashMap<String, ModelUsage>,
}

/// Shared usage ledger, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    stats: Arc<RwLock<UsageSnapshot>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) {
        let mut stats = self.stats.write().await;
        stats.total_tokens += prompt_tokens + completion_tokens;
        let entry = stats.models.entry(model.to_string()).or_default();
        entry.requests += 1;
        entry.prompt_tokens += prompt_tokens;
        entry.completion_tokens += completion_tokens;
    }

    pub async fn snapshot(&self) -> UsageSnapshot {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   \n"), 0);
    }

    #[test]
    fn test_estimate_tokens_words() {
        // short words are one token each
        assert_eq!(estimate_tokens("use the tool"), 3);
        // "implementation" is 14 chars -> 4 tokens
        assert_eq!(estimate_tokens("implementation"), 4);
    }

    #[test]
    fn test_estimate_tokens_json() {
        let json = r#"{"name":"Header","width":1440}"#;
        // punctuation, words and one number all contribute
        assert!(estimate_tokens(json) >= 12);
    }

    #[test]
    fn test_fit_to_budget_passthrough() {
        let text = "small prompt";
        assert_eq!(fit_to_budget(text, 100), text);
    }

    #[test]
    fn test_fit_to_budget_truncates_on_lines() {
        let text = (0..200)
            .map(|i| format!("- **FRAME**: Block number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = fit_to_budget(&text, 120);
        assert!(estimate_tokens(&trimmed) <= 120);
        assert!(trimmed.starts_with("- **FRAME**: Block number 0"));
        assert!(trimmed.contains("truncated"));
        for (i, line) in trimmed.lines().filter(|l| !l.starts_with('…')).enumerate() {
            assert!(format!("- **FRAME**: Block number {i}").starts_with(line));
        }
    }

    #[test]
    fn test_fit_to_budget_cuts_inside_long_line() {
        let nodes: Vec<serde_json::Value> = (0..2000)
            .map(|i| serde_json::json!({"id": format!("1:{i}"), "name": format!("Layer {i}"), "type": "FRAME"}))
            .collect();
        let compact = serde_json::json!({ "children": nodes }).to_string();
        assert!(!compact.contains('\n'));

        let trimmed = fit_to_budget(&compact, 6000);
        assert!(estimate_tokens(&trimmed) <= 6000);
        assert!(trimmed.len() > 1000);
        assert!(trimmed.starts_with(r#"{"children":[{"#));
        assert!(trimmed.ends_with("… (truncated 1 lines to fit the token budget)"));
    }

    #[test]
    fn test_fit_to_budget_multibyte_cut() {
        let line = "é".repeat(4000);
        let trimmed = fit_to_budget(&line, 100);
        let head = trimmed.lines().next().unwrap_or_default();
        assert!(!head.is_empty());
        assert!(head.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_usage_ledger_accumulates() {
        let ledger = UsageLedger::new();
        ledger.record("openai/gpt-4o", 100, 50).await;
        ledger.record("openai/gpt-4o", 10, 5).await;
        ledger.record("openai/gpt-3.5-turbo", 1, 1).await;

        let snap = ledger.snapshot().await;
        assert_eq!(snap.total_tokens, 167);
        let gpt4o = &snap.models["openai/gpt-4o"];
        assert_eq!(gpt4o.requests, 2);
        assert_eq!(gpt4o.prompt_tokens, 110);
        assert_eq!(gpt4o.completion_tokens, 55);
    }
}
