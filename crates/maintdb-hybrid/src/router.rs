//! Bounded Thought/Action/Observation loop.
//!
//! Each call to the reasoning service is one step. A step either ends the
//! interaction with a final answer, or runs a tool and feeds its output back
//! as an observation. Unparseable output and unknown tools become
//! observations too, so the service can correct itself. The loop makes at
//! most `max_steps` calls, plus one recovery call when the last budgeted
//! step was a parse error or named an unknown tool.
use std::sync::Arc;
use tracing::{debug, info, warn};

use maintdb_core::config::{ReasoningSettings, Settings};
use maintdb_core::traits::RecordStore;
use maintdb_vector::SemanticSearch;

use crate::parser::{parse_step, ParsedStep};
use crate::prompt::{self, OBSERVATION_STOP};
use crate::reasoning::{GeminiClient, ReasoningError, ReasoningService, RetryPolicy, RetryingReasoner};
use crate::tools::{default_registry, ToolError, ToolRegistry};

pub const DEFAULT_MAX_STEPS: usize = 3;
pub const MAX_OBSERVATION_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Tool { name: String, input: String },
    ParseError { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStep {
    pub number: usize,
    pub thought: String,
    pub action: StepAction,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Answer(String),
    Exhausted { steps: usize },
    Disabled(String),
    Unavailable(String),
    QuotaExceeded(String),
    ServiceError(String),
    EmptyQuery,
}

impl Outcome {
    fn from_service_error(err: ReasoningError) -> Self {
        match err {
            ReasoningError::Quota(msg) => Outcome::QuotaExceeded(msg),
            ReasoningError::Unavailable(msg) => Outcome::Unavailable(msg),
            ReasoningError::Rejected(msg) | ReasoningError::InvalidResponse(msg) => Outcome::ServiceError(msg),
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Outcome::Answer(_))
    }

    /// Human-readable text for this outcome of `query`.
    pub fn render(&self, query: &str) -> String {
        let fallback = format!(
            "Suggestion: use `maintdb semantic \"{}\"` for a direct search without the reasoning service.",
            query.trim()
        );
        match self {
            Outcome::Answer(answer) => answer.clone(),
            Outcome::Exhausted { steps } => {
                format!("Error: no final answer after {steps} reasoning steps.\n\n{fallback}")
            }
            Outcome::Disabled(reason) => format!(
                "Error: the query router is not configured ({reason}). Check GEMINI_API_KEY and the record store connection."
            ),
            Outcome::Unavailable(msg) => format!("Error: reasoning service unavailable. {msg}\n\n{fallback}"),
            Outcome::QuotaExceeded(msg) => format!("Error: reasoning service quota exceeded. {msg}\n\n{fallback}"),
            Outcome::ServiceError(msg) => format!("Error in search: {msg}"),
            Outcome::EmptyQuery => "Please enter a question about the maintenance records.".to_string(),
        }
    }
}

/// Full record of one routed query.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub query: String,
    pub steps: Vec<RouterStep>,
    /// Calls made to the reasoning service, including the one that ended the loop.
    pub service_calls: usize,
    pub outcome: Outcome,
}

impl Interaction {
    pub fn render(&self) -> String {
        self.outcome.render(&self.query)
    }
}

enum RouterState {
    Ready { reasoner: Box<dyn ReasoningService>, registry: ToolRegistry },
    Disabled(String),
}

pub struct QueryRouter {
    state: RouterState,
    table: String,
    max_steps: usize,
}

impl QueryRouter {
    pub fn new(reasoner: Box<dyn ReasoningService>, registry: ToolRegistry, table: impl Into<String>) -> Self {
        Self { state: RouterState::Ready { reasoner, registry }, table: table.into(), max_steps: DEFAULT_MAX_STEPS }
    }

    /// A router that answers every query with a configuration error.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self { state: RouterState::Disabled(reason.into()), table: String::new(), max_steps: DEFAULT_MAX_STEPS }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Gemini-backed router over the default tool catalog. A missing API key
    /// or an unbuildable client leaves the router disabled instead of failing.
    pub fn from_settings(settings: &Settings, store: Arc<dyn RecordStore>, search: Arc<SemanticSearch>) -> Self {
        let reasoning = &settings.reasoning;
        let Some(api_key) = reasoning.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            warn!("GEMINI_API_KEY not set; query router disabled");
            return Self::disabled("GEMINI_API_KEY is not set");
        };
        let client = match GeminiClient::new(reasoning, api_key.to_string()) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "query router disabled");
                return Self::disabled(e.to_string());
            }
        };
        let reasoner = RetryingReasoner::new(client, retry_policy(reasoning));
        let table = store.table_name().to_string();
        info!(model = %reasoning.model, max_steps = settings.router.max_steps, "query router ready");
        Self::new(Box::new(reasoner), default_registry(store, search), table).with_max_steps(settings.router.max_steps)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, RouterState::Ready { .. })
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Answer text for `query`. Never fails: every terminal state renders to a string.
    pub fn search(&self, query: &str) -> String {
        self.run(query).render()
    }

    pub fn run(&self, query: &str) -> Interaction {
        let mut interaction =
            Interaction { query: query.to_string(), steps: Vec::new(), service_calls: 0, outcome: Outcome::EmptyQuery };
        let (reasoner, registry) = match &self.state {
            RouterState::Ready { reasoner, registry } => (reasoner, registry),
            RouterState::Disabled(reason) => {
                interaction.outcome = Outcome::Disabled(reason.clone());
                return interaction;
            }
        };
        let question = query.trim();
        if question.is_empty() {
            return interaction;
        }

        let mut scratchpad = String::new();
        let mut recovery_granted = false;
        while interaction.service_calls < self.max_steps + usize::from(recovery_granted) {
            let text = prompt::render(registry, &self.table, question, &scratchpad);
            let output = match reasoner.complete(&text, &[OBSERVATION_STOP]) {
                Ok(output) => output,
                Err(e) => {
                    warn!(error = %e, model = reasoner.model_name(), "reasoning service failed");
                    interaction.outcome = Outcome::from_service_error(e);
                    return interaction;
                }
            };
            interaction.service_calls += 1;
            let number = interaction.service_calls;

            let (thought, action, observation) = match parse_step(&output) {
                ParsedStep::FinalAnswer { answer, .. } => {
                    info!(step = number, "final answer");
                    interaction.outcome = Outcome::Answer(answer);
                    return interaction;
                }
                ParsedStep::Action { thought, tool, input } => {
                    info!(step = number, tool = %tool, "router step");
                    let observation = match registry.invoke(&tool, &input) {
                        Ok(out) => out,
                        Err(e) => {
                            debug!(step = number, tool = %tool, error = %e, "tool failed");
                            // An unregistered tool name is malformed output, not a tool failure.
                            if matches!(e, ToolError::UnknownTool { .. }) && number == self.max_steps {
                                recovery_granted = true;
                            }
                            e.to_string()
                        }
                    };
                    (thought, StepAction::Tool { name: tool, input }, observation)
                }
                ParsedStep::ParseError { message } => {
                    warn!(step = number, error = %message, "unparseable reasoning output");
                    if number == self.max_steps {
                        recovery_granted = true;
                    }
                    let observation = format!(
                        "{message}. Respond with \"Thought:\", \"Action:\" and \"Action Input:\", or with \"Final Answer:\"."
                    );
                    (String::new(), StepAction::ParseError { message }, observation)
                }
            };

            let observation = truncate_observation(observation);
            prompt::push_step(&mut scratchpad, &output, &observation);
            interaction.steps.push(RouterStep { number, thought, action, observation });
        }

        warn!(steps = interaction.service_calls, "step budget exhausted");
        interaction.outcome = Outcome::Exhausted { steps: interaction.service_calls };
        interaction
    }
}

fn retry_policy(settings: &ReasoningSettings) -> RetryPolicy {
    RetryPolicy { max_retries: settings.max_retries, ..RetryPolicy::default() }
}

fn truncate_observation(text: String) -> String {
    let total = text.chars().count();
    if total <= MAX_OBSERVATION_CHARS {
        return text;
    }
    let head: String = text.chars().take(MAX_OBSERVATION_CHARS).collect();
    format!("{head}...\n[truncated, {total} total chars]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_observations_are_capped() {
        let long = "x".repeat(MAX_OBSERVATION_CHARS + 10);
        let out = truncate_observation(long);
        assert!(out.starts_with(&"x".repeat(MAX_OBSERVATION_CHARS)));
        assert!(out.ends_with("...\n[truncated, 4010 total chars]"));
        assert_eq!(truncate_observation("short".into()), "short");
    }

    #[test]
    fn quota_outcome_suggests_direct_search() {
        let text = Outcome::QuotaExceeded("429 Too Many Requests".into()).render("smoke detector ");
        assert!(text.starts_with("Error: reasoning service quota exceeded. 429 Too Many Requests"));
        assert!(text.contains("maintdb semantic \"smoke detector\""));
    }

    #[test]
    fn disabled_router_mentions_the_key() {
        let router = QueryRouter::disabled("GEMINI_API_KEY is not set");
        assert!(!router.is_enabled());
        let text = router.search("ADD-002");
        assert!(text.starts_with("Error: the query router is not configured"));
        assert!(text.contains("GEMINI_API_KEY"));
    }
}
