//! Scripted reasoning service for exercising the router without network access.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::reasoning::{ReasoningError, ReasoningService};

/// Replays canned replies in order and records every prompt it receives.
/// Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedReasoner {
    replies: Arc<Mutex<VecDeque<Result<String, ReasoningError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<Result<String, ReasoningError>>) -> Self {
        Self { replies: Arc::new(Mutex::new(replies.into())), prompts: Arc::default() }
    }

    pub fn replying<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl ReasoningService for ScriptedReasoner {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, prompt: &str, _stop: &[&str]) -> Result<String, ReasoningError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        next.unwrap_or_else(|| Err(ReasoningError::Unavailable("script exhausted".into())))
    }
}
