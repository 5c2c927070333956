//! End-to-end scenarios over the public API, with in-memory collaborators.

use async_trait::async_trait;
use provena_cli::auth::{AuthSession, MemoryStore};
use provena_cli::config::AuthConfig;
use provena_cli::registry::api::{Candidate, ItemSubType, RegistryApiError};
use provena_cli::registry::{InvokeError, InvokeOutcome};
use provena_cli::workflow::{
    EngineReply, OperationInvoker, Phase, RegistrySearch, SchemaRegistry, WorkflowEngine,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct StubSearch {
    candidates: Vec<Candidate>,
}

#[async_trait]
impl RegistrySearch for StubSearch {
    async fn search(
        &self,
        _query: &str,
        _subtype: Option<ItemSubType>,
        _limit: usize,
    ) -> Result<Vec<Candidate>, RegistryApiError> {
        Ok(self.candidates.clone())
    }
}

#[derive(Default)]
struct RecordingInvoker {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingInvoker {
    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationInvoker for RecordingInvoker {
    async fn call(&self, operation: &str, arguments: &Value) -> Result<InvokeOutcome, InvokeError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), arguments.clone()));
        Ok(InvokeOutcome {
            id: Some("10378.1/424242".to_string()),
            handle_url: Some("https://hdl.handle.net/10378.1/424242".to_string()),
            raw: json!({"status": {"success": true}, "created_item": {"id": "10378.1/424242"}}),
        })
    }
}

fn engine_with(
    search: Arc<dyn RegistrySearch>,
    invoker: Arc<dyn OperationInvoker>,
) -> WorkflowEngine {
    WorkflowEngine::new(Arc::new(SchemaRegistry::builtin()), search, invoker)
}

#[tokio::test]
async fn create_person_walkthrough_registers_six_fields() {
    let invoker = Arc::new(RecordingInvoker::default());
    let search = Arc::new(StubSearch { candidates: vec![] });
    let mut engine = engine_with(search, invoker.clone());

    engine.start("create_person").unwrap();
    engine.submit("MCP").await.unwrap();
    engine.submit("Robot").await.unwrap();
    engine.submit("mcprobot@botmail.com").await.unwrap();
    engine.submit("skip").await.unwrap(); // display_name defaults to "MCP Robot"
    engine.submit("skip").await.unwrap(); // orcid stays absent
    engine.submit("true").await.unwrap(); // ethics_approved
    let reply = engine.submit("skip").await.unwrap(); // user_metadata defaults to {}

    let rendered = match reply {
        EngineReply::Summary { rendered, .. } => rendered,
        other => panic!("expected summary, got {:?}", other),
    };
    assert_eq!(engine.phase(), Some(Phase::AwaitingConfirmation));
    assert!(rendered.contains("display_name: \"MCP Robot\""));

    let summary_args = engine.arguments().unwrap();
    let fields = summary_args.as_object().unwrap();
    assert_eq!(fields.len(), 6);
    assert_eq!(fields["first_name"], json!("MCP"));
    assert_eq!(fields["last_name"], json!("Robot"));
    assert_eq!(fields["email"], json!("mcprobot@botmail.com"));
    assert_eq!(fields["display_name"], json!("MCP Robot"));
    assert_eq!(fields["ethics_approved"], json!(true));
    assert_eq!(fields["user_metadata"], json!({}));

    let reply = engine.confirm(true).await.unwrap();
    match reply {
        EngineReply::Completed { outcome } => {
            assert_eq!(
                outcome.handle_url.as_deref(),
                Some("https://hdl.handle.net/10378.1/424242")
            );
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "create_person");
    // Byte-for-byte the object the summary displayed.
    assert_eq!(calls[0].1, summary_args);
}

#[tokio::test]
async fn declining_the_summary_makes_no_call() {
    let invoker = Arc::new(RecordingInvoker::default());
    let search = Arc::new(StubSearch { candidates: vec![] });
    let mut engine = engine_with(search, invoker.clone());

    engine.start("create_organisation").unwrap();
    engine.submit("Hogwarts School").await.unwrap();
    engine.submit("skip").await.unwrap();
    engine.submit("skip").await.unwrap();
    let reply = engine.submit("skip").await.unwrap();
    assert!(matches!(reply, EngineReply::Summary { .. }));

    let reply = engine.confirm(false).await.unwrap();
    assert!(matches!(reply, EngineReply::Cancelled));
    assert!(invoker.calls().is_empty());
    assert!(!engine.is_active());
}

#[tokio::test]
async fn single_search_match_is_presented_not_auto_chosen() {
    let invoker = Arc::new(RecordingInvoker::default());
    let search = Arc::new(StubSearch {
        candidates: vec![Candidate {
            id: "10378.1/9090".to_string(),
            label: "Hogwarts School".to_string(),
            subtype: Some("ORGANISATION".to_string()),
            score: 11.0,
        }],
    });
    let mut engine = engine_with(search, invoker.clone());

    engine.start("create_dataset").unwrap();
    engine.submit("Owl census").await.unwrap();
    engine.submit("Annual owl census data").await.unwrap();

    let reply = engine.submit("hogwarts").await.unwrap();
    match reply {
        EngineReply::Candidates { field, candidates, .. } => {
            assert_eq!(field, "publisher_id");
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].label, "Hogwarts School");
        }
        other => panic!("expected a candidate listing, got {:?}", other),
    }
    // Nothing stored until the explicit pick.
    let args = engine.arguments().unwrap();
    assert!(!args.as_object().unwrap().contains_key("publisher_id"));

    engine.submit("1").await.unwrap();
    assert_eq!(
        engine.arguments().unwrap()["publisher_id"],
        json!("10378.1/9090")
    );
}

#[tokio::test]
async fn callback_with_wrong_state_is_rejected_and_store_untouched() {
    let store = Arc::new(MemoryStore::new());
    let session = AuthSession::new(AuthConfig::default(), store.clone());

    let attempt = session.begin_login("default").await.unwrap();
    let forged = format!("{}?code=stolen&state=attacker-state", attempt.redirect_uri());

    let poke = tokio::spawn(async move {
        let _ = reqwest::get(forged).await;
    });

    let result = session
        .await_callback(attempt, Duration::from_secs(5))
        .await;
    poke.await.unwrap();

    assert!(result.is_err());
    assert!(store.is_empty());

    // The listener was torn down, so a fresh login can start.
    assert!(session.begin_login("default").await.is_ok());
}
