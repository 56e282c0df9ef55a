//! Language-model reduction of oversized queries before embedding.
//!
//! A long query usually carries a lot of benign scaffolding around the few
//! lines that matter. [`Simplifier`] asks the chat model to keep only the
//! security-relevant lines, or to answer [`CLEAN_SENTINEL`] when there are
//! none. Any failure falls back to the original text.

use std::sync::Arc;

use crate::chat::ChatModel;

/// Reply meaning "nothing security-relevant here".
pub const CLEAN_SENTINEL: &str = "CLEAN_CODE";

const SYSTEM_PROMPT: &str = "You are a code security analysis expert.";

const USER_PROMPT: &str = "The following code may contain malicious or security-relevant \
logic mixed with ordinary code. Return only the minimal lines that implement the malicious \
or security-relevant behaviour, verbatim, without explanation. If there is none, reply with \
exactly CLEAN_CODE.\n\nCode:\n";

pub struct Simplifier {
    chat: Arc<dyn ChatModel>,
    threshold: usize,
}

impl Simplifier {
    pub fn new(chat: Arc<dyn ChatModel>, threshold: usize) -> Self {
        Self { chat, threshold }
    }

    /// Queries longer than this many characters are simplified.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn applies_to(&self, code: &str) -> bool {
        code.chars().count() > self.threshold
    }

    /// Reduce `code` if it is over the threshold; otherwise return it as is.
    pub async fn simplify(&self, code: &str) -> String {
        if !self.applies_to(code) {
            return code.to_string();
        }
        let prompt = format!("{}{}", USER_PROMPT, code);
        match self.chat.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                let cleaned = clean_reply(&reply);
                tracing::debug!(
                    before = code.chars().count(),
                    after = cleaned.chars().count(),
                    "query simplified"
                );
                cleaned
            }
            Err(e) => {
                tracing::warn!("query simplification failed, using original: {:#}", e);
                code.to_string()
            }
        }
    }
}

/// Trim, drop a surrounding Markdown fence, and map the sentinel to `""`.
pub fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim().to_string();
    if text.starts_with("```") {
        let mut lines: Vec<&str> = text.lines().collect();
        if lines.first().is_some_and(|l| l.starts_with("```")) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.starts_with("```")) {
            lines.pop();
        }
        text = lines.join("\n").trim().to_string();
    }
    if text == CLEAN_SENTINEL {
        return String::new();
    }
    text
}
