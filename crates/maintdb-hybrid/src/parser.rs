//! Parser for one reasoning-service turn in the Thought/Action/Final Answer format.
//!
//! `parse_step` is pure: the router decides what to do with each outcome.
use regex::Regex;
use std::sync::LazyLock;

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)").expect("action pattern")
});
static ACTION_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)").expect("action-only pattern"));

pub const FINAL_ANSWER: &str = "Final Answer:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStep {
    Action { thought: String, tool: String, input: String },
    FinalAnswer { thought: String, answer: String },
    ParseError { message: String },
}

pub fn parse_step(text: &str) -> ParsedStep {
    let has_final = text.contains(FINAL_ANSWER);
    if let Some(caps) = ACTION_RE.captures(text) {
        if has_final {
            return ParsedStep::ParseError {
                message: "Parsing LLM output produced both a final answer and a parse-able action".to_string(),
            };
        }
        let whole = caps.get(0).map_or(0, |m| m.start());
        let tool = clean_tool_name(caps.get(1).map_or("", |m| m.as_str()));
        let input = clean_input(caps.get(2).map_or("", |m| m.as_str()));
        if tool.is_empty() {
            return ParsedStep::ParseError { message: "Invalid Format: Missing tool name after 'Action:'".to_string() };
        }
        return ParsedStep::Action { thought: thought_of(&text[..whole]), tool, input };
    }
    if let Some(pos) = text.find(FINAL_ANSWER) {
        let answer = text[pos + FINAL_ANSWER.len()..].trim().to_string();
        if answer.is_empty() {
            return ParsedStep::ParseError { message: "Invalid Format: 'Final Answer:' is empty".to_string() };
        }
        return ParsedStep::FinalAnswer { thought: thought_of(&text[..pos]), answer };
    }
    if !ACTION_ONLY_RE.is_match(text) {
        return ParsedStep::ParseError { message: "Invalid Format: Missing 'Action:' after 'Thought:'".to_string() };
    }
    ParsedStep::ParseError { message: "Invalid Format: Missing 'Action Input:' after 'Action:'".to_string() }
}

fn thought_of(prefix: &str) -> String {
    let t = prefix.trim();
    t.strip_prefix("Thought:").unwrap_or(t).trim().to_string()
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '"' || c == '`' || c == '\'' || c == '*').trim().to_string()
}

fn clean_input(raw: &str) -> String {
    // Output past a hallucinated observation belongs to no step.
    let raw = raw.split("\nObservation").next().unwrap_or(raw);
    let t = raw.trim();
    let t = t.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(t);
    t.trim().to_string()
}
