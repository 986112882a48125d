use std::sync::Arc;

use maintdb_core::memory::MemoryStore;
use maintdb_core::traits::RecordStore;
use maintdb_core::types::NewDocument;
use maintdb_embed::FakeEmbedder;
use maintdb_hybrid::reasoning::ReasoningError;
use maintdb_hybrid::testing::ScriptedReasoner;
use maintdb_hybrid::{default_registry, Outcome, QueryRouter, StepAction};
use maintdb_vector::{BackfillPipeline, SemanticSearch};

const DIM: usize = 384;

fn doc(add: &str, reg: &str, technician: &str, discrepancy: &str) -> NewDocument {
    NewDocument {
        add_number: add.to_string(),
        aircraft_registration: reg.to_string(),
        technician: Some(technician.to_string()),
        discrepancy: Some(discrepancy.to_string()),
        ..Default::default()
    }
}

fn fleet() -> (Arc<dyn RecordStore>, Arc<SemanticSearch>) {
    let store = Arc::new(MemoryStore::new("documents", DIM));
    store
        .insert(vec![
            doc("ADD-001", "N450MX", "Ortega", "smoke detector intermittent fault"),
            doc("ADD-002", "N451MX", "Medina", "left landing light inoperative"),
            doc("ADD-003", "N452MX", "Ruiz", "hydraulic pump leaking fluid"),
            doc("ADD-004", "N453MX", "Castro", "lavatory faucet drips"),
        ])
        .expect("insert");
    let embedder = Arc::new(FakeEmbedder::new(DIM));
    BackfillPipeline::new(store.clone(), embedder.clone()).run().expect("backfill");
    let search = Arc::new(SemanticSearch::new(store.clone(), embedder));
    (store, search)
}

fn router(script: &ScriptedReasoner) -> QueryRouter {
    let (store, search) = fleet();
    QueryRouter::new(Box::new(script.clone()), default_registry(store, search), "documents")
}

const LIST_TABLES: &str = " I should see what is there.\nAction: list_tables\nAction Input: ";

#[test]
fn add_number_routes_through_structured_query() {
    let script = ScriptedReasoner::replying([
        " The user gave an ADD number, I should look it up.\nAction: query_records\nAction Input: SELECT * FROM documents WHERE add_number LIKE '%ADD-002%'",
        " I now know the final answer\nFinal Answer: ADD-002 on N451MX: left landing light inoperative, reported by Medina.",
    ]);
    let interaction = router(&script).run("ADD-002");

    assert_eq!(interaction.outcome, Outcome::Answer("ADD-002 on N451MX: left landing light inoperative, reported by Medina.".into()));
    assert_eq!(interaction.steps.len(), 1);
    let step = &interaction.steps[0];
    assert!(matches!(&step.action, StepAction::Tool { name, .. } if name == "query_records"));
    assert!(step.observation.starts_with("1 record(s):"));
    assert!(step.observation.contains("add_number: ADD-002") && step.observation.contains("technician: Medina"));

    let prompts = script.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].ends_with("Question: ADD-002\nThought:"));
    assert!(prompts[1].contains("\nObservation: 1 record(s):"));
    assert!(prompts[1].ends_with("\nThought: "));
}

#[test]
fn unknown_add_number_is_reported_as_no_match() {
    let script = ScriptedReasoner::replying([
        "Action: query_records\nAction Input: SELECT * FROM documents WHERE add_number LIKE '%ADD-999%'",
        "Final Answer: No results found for your query.",
    ]);
    let interaction = router(&script).run("ADD-999");
    assert_eq!(interaction.steps[0].observation, "No records matched the query.");
    assert_eq!(interaction.render(), "No results found for your query.");
}

#[test]
fn concept_query_uses_semantic_search() {
    let script = ScriptedReasoner::replying([
        " This is a technical concept.\nAction: semantic_search\nAction Input: smoke detector problems",
        "Final Answer: ADD-001 (Ortega) reports an intermittent smoke detector fault.",
    ]);
    let interaction = router(&script).run("smoke detector problems");
    assert!(interaction.outcome.is_answer());
    let observation = &interaction.steps[0].observation;
    assert!(observation.starts_with("Found "), "{observation}");
    assert!(observation.contains("1. ADD: ADD-001"), "{observation}");
}

#[test]
fn loop_stops_at_the_step_budget() {
    let script = ScriptedReasoner::replying(vec![LIST_TABLES; 10]);
    let interaction = router(&script).run("anything");

    assert_eq!(interaction.outcome, Outcome::Exhausted { steps: 3 });
    assert_eq!(interaction.service_calls, 3);
    assert_eq!(interaction.steps.len(), 3);
    assert_eq!(script.remaining(), 7);
    assert!(interaction.render().contains("maintdb semantic \"anything\""));
}

#[test]
fn budget_follows_configuration() {
    let script = ScriptedReasoner::replying(vec![LIST_TABLES; 10]);
    let interaction = router(&script).with_max_steps(5).run("anything");
    assert_eq!(interaction.outcome, Outcome::Exhausted { steps: 5 });
}

#[test]
fn early_parse_error_is_fed_back_and_counted() {
    let script = ScriptedReasoner::replying(["I think the answer is ADD-002", "Final Answer: ADD-002 was written by Medina."]);
    let interaction = router(&script).run("who wrote ADD-002?");

    assert!(interaction.outcome.is_answer());
    assert_eq!(interaction.service_calls, 2);
    assert!(matches!(&interaction.steps[0].action, StepAction::ParseError { message } if message.starts_with("Invalid Format")));
    let prompts = script.prompts();
    assert!(prompts[1].contains("I think the answer is ADD-002\nObservation: Invalid Format: Missing 'Action:'"));
}

#[test]
fn parse_error_on_last_step_grants_one_recovery_call() {
    let script = ScriptedReasoner::replying([LIST_TABLES, LIST_TABLES, "gibberish", "Final Answer: documents is the only table."]);
    let interaction = router(&script).run("which tables exist?");

    assert_eq!(interaction.outcome, Outcome::Answer("documents is the only table.".into()));
    assert_eq!(interaction.service_calls, 4);
}

#[test]
fn repeated_parse_errors_never_exceed_budget_plus_one() {
    let script = ScriptedReasoner::replying(vec!["no format at all"; 10]);
    let interaction = router(&script).run("ADD-002");

    assert_eq!(interaction.outcome, Outcome::Exhausted { steps: 4 });
    assert_eq!(script.prompts().len(), 4);
    assert!(interaction.steps.iter().all(|s| matches!(s.action, StepAction::ParseError { .. })));
}

#[test]
fn unknown_tool_becomes_an_observation() {
    let script = ScriptedReasoner::replying([
        "Action: sql_db_query\nAction Input: SELECT * FROM documents",
        "Action: query_records\nAction Input: SELECT COUNT(*) FROM documents",
        "Final Answer: There are 4 reports.",
    ]);
    let interaction = router(&script).run("how many reports?");

    assert_eq!(
        interaction.steps[0].observation,
        "sql_db_query is not a valid tool, try one of [list_tables, describe_records, query_records, semantic_search]."
    );
    assert_eq!(interaction.steps[1].observation, "Count: 4");
    assert!(interaction.outcome.is_answer());
}

#[test]
fn unknown_tool_on_last_step_grants_one_recovery_call() {
    let script = ScriptedReasoner::replying([
        LIST_TABLES,
        LIST_TABLES,
        "Action: sql_db_query\nAction Input: SELECT 1",
        "Final Answer: documents is the only table.",
    ]);
    let interaction = router(&script).run("which tables exist?");

    assert_eq!(interaction.outcome, Outcome::Answer("documents is the only table.".into()));
    assert_eq!(interaction.service_calls, 4);
    assert!(interaction.steps[2].observation.starts_with("sql_db_query is not a valid tool"));
}

#[test]
fn unknown_tools_never_exceed_budget_plus_one() {
    let script = ScriptedReasoner::replying(vec!["Action: sql_db_query\nAction Input: SELECT 1"; 10]);
    let interaction = router(&script).run("ADD-002");
    assert_eq!(interaction.outcome, Outcome::Exhausted { steps: 4 });
    assert_eq!(script.remaining(), 6);
}

#[test]
fn invalid_structured_query_becomes_an_observation() {
    let script = ScriptedReasoner::replying([
        "Action: query_records\nAction Input: SELECT * FROM documents WHERE pilot = 'Medina'",
        "Final Answer: No results found for your query.",
    ]);
    let interaction = router(&script).run("Medina");
    assert!(interaction.steps[0].observation.starts_with("Error: unknown column 'pilot'"));
}

#[test]
fn quota_failure_suggests_direct_search() {
    let script = ScriptedReasoner::new(vec![Err(ReasoningError::Quota("429 RESOURCE_EXHAUSTED".into()))]);
    let interaction = router(&script).run("smoke detector");

    assert_eq!(interaction.outcome, Outcome::QuotaExceeded("429 RESOURCE_EXHAUSTED".into()));
    assert_eq!(interaction.service_calls, 0);
    let text = interaction.render();
    assert!(text.starts_with("Error: reasoning service quota exceeded."));
    assert!(text.contains("maintdb semantic \"smoke detector\""));
}

#[test]
fn unreachable_service_ends_the_interaction() {
    let script = ScriptedReasoner::new(vec![
        Ok(LIST_TABLES.to_string()),
        Err(ReasoningError::Unavailable("connection refused".into())),
    ]);
    let interaction = router(&script).run("ADD-002");
    assert_eq!(interaction.outcome, Outcome::Unavailable("connection refused".into()));
    assert_eq!(interaction.steps.len(), 1);
    assert!(interaction.render().starts_with("Error: reasoning service unavailable. connection refused"));
}

#[test]
fn blank_query_makes_no_calls() {
    let script = ScriptedReasoner::replying(["Final Answer: never"]);
    let interaction = router(&script).run("   ");
    assert_eq!(interaction.outcome, Outcome::EmptyQuery);
    assert!(script.prompts().is_empty());
}

#[test]
fn router_without_api_key_is_disabled() {
    let (store, search) = fleet();
    let settings = maintdb_core::config::Settings::default();
    let router = QueryRouter::from_settings(&settings, store, search);
    assert!(!router.is_enabled());
    assert!(router.search("ADD-002").contains("GEMINI_API_KEY"));
}

#[test]
fn prompt_lists_tools_and_routing_rules() {
    let script = ScriptedReasoner::replying(["Final Answer: ok"]);
    router(&script).run("Ortega");
    let prompt = &script.prompts()[0];
    assert!(prompt.contains("Tool names: list_tables, describe_records, query_records, semantic_search"));
    assert!(prompt.contains("semantic_search: Search by technical concept"));
    assert!(prompt.contains("NEVER invent records."));
}
