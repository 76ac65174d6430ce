mod common;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use backon::ExponentialBuilder;
use common::{Scratch, write_file};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabula::api::chat_api::ChatApi;
use tabula::config::FALLBACK_ANSWER;
use tabula::db::sqlite::{QueryHandle, TableStore};
use tabula::service::sql_agent::{
    LIST_TABLES_TOOL, QUERY_TOOL, SCHEMA_TOOL, SqlAgent, run_tool,
};
use tabula::types::chat::FunctionCall;
use tabula::{ConflictPolicy, QaCapability, QueryFacade, TabulaError, ingest};
use tokio::net::TcpListener;
use url::Url;

/// Scripted completions endpoint: pops one reply per request and keeps the request bodies.
#[derive(Clone, Default)]
struct MockLlm {
    replies: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockLlm {
    fn new(replies: Vec<(StatusCode, Value)>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn completions(State(mock): State<MockLlm>, Json(body): Json<Value>) -> impl IntoResponse {
    mock.requests.lock().unwrap().push(body);
    let (status, reply) = mock
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, json!({"detail": "script exhausted"})));
    (status, Json(reply))
}

async fn serve_mock(mock: MockLlm) -> Url {
    let app = Router::new()
        .route("/openai/v1/chat/completions", post(completions))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/openai/v1/chat/completions")).unwrap()
}

fn fast_retry() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(10))
        .with_max_times(2)
}

fn agent_for(url: Url) -> SqlAgent {
    let api = ChatApi::new(reqwest::Client::new(), url, "test-key").with_retry_policy(fast_retry());
    SqlAgent::new(api, "llama-3.1-70b-versatile", 0.0)
}

fn tool_call_reply(id: &str, name: &str, arguments: Value) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "id": "chatcmpl-tool",
            "model": "llama-3.1-70b-versatile",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": arguments.to_string()}
                    }]
                }
            }]
        }),
    )
}

fn answer_reply(text: &str) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "id": "chatcmpl-final",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": text}
            }]
        }),
    )
}

async fn students_db(scratch: &Scratch) -> QueryHandle {
    let dir = scratch.upload_dir();
    write_file(&dir, "students.csv", b"name,score\nAnn,91.5\nBen,78\n");
    write_file(&dir, "courses.csv", b"course,credits\nmath,4\n");
    let store = TableStore::open(&scratch.database_path()).await.unwrap();
    ingest(&dir, &store, ConflictPolicy::Replace).await.unwrap();
    store.close().await;
    QueryHandle::open(&scratch.database_path()).await.unwrap()
}

fn call(name: &str, arguments: Value) -> FunctionCall {
    FunctionCall {
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

#[tokio::test]
async fn agent_runs_requested_query_and_returns_final_answer() {
    let scratch = Scratch::new("agent-loop");
    let db = students_db(&scratch).await;
    let mock = MockLlm::new(vec![
        tool_call_reply(
            "call_1",
            QUERY_TOOL,
            json!({"query": "SELECT COUNT(*) FROM students"}),
        ),
        answer_reply("There are 2 students."),
    ]);
    let agent = agent_for(serve_mock(mock.clone()).await);

    let answer = agent.ask("How many students are there?", &db, &[]).await.unwrap();
    assert_eq!(answer, "There are 2 students.");

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["model"], json!("llama-3.1-70b-versatile"));
    assert_eq!(requests[0]["tools"].as_array().map(Vec::len), Some(3));
    let messages = requests[1]["messages"].as_array().unwrap();
    let tool_msg = messages.last().unwrap();
    assert_eq!(tool_msg["role"], json!("tool"));
    assert_eq!(tool_msg["tool_call_id"], json!("call_1"));
    assert_eq!(tool_msg["content"], json!("[(2,)]"));
    db.close().await;
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let scratch = Scratch::new("agent-retry");
    let db = students_db(&scratch).await;
    let mock = MockLlm::new(vec![
        (StatusCode::SERVICE_UNAVAILABLE, json!({"detail": "overloaded"})),
        answer_reply("Two tables."),
    ]);
    let agent = agent_for(serve_mock(mock.clone()).await);

    let answer = agent.ask("How many tables?", &db, &[]).await.unwrap();

    assert_eq!(answer, "Two tables.");
    assert_eq!(mock.requests().len(), 2);
    db.close().await;
}

#[tokio::test]
async fn auth_failure_is_not_retried_and_facade_falls_back() {
    let scratch = Scratch::new("agent-auth");
    let db = students_db(&scratch).await;
    let mock = MockLlm::new(vec![(
        StatusCode::UNAUTHORIZED,
        json!({"error": {"message": "Invalid API Key", "type": "invalid_request_error", "code": "invalid_api_key"}}),
    )]);
    let url = serve_mock(mock.clone()).await;

    let err = agent_for(url.clone()).ask("anything", &db, &[]).await.unwrap_err();
    assert!(matches!(err, TabulaError::LlmServerError(_)));
    assert_eq!(mock.requests().len(), 1);

    let facade = QueryFacade::new(Arc::new(agent_for(url)), false);
    assert_eq!(facade.answer("anything", &db, &[]).await, FALLBACK_ANSWER);
    db.close().await;
}

#[tokio::test]
async fn agent_gives_up_after_iteration_limit() {
    let scratch = Scratch::new("agent-limit");
    let db = students_db(&scratch).await;
    let mock = MockLlm::new(vec![
        tool_call_reply("call_1", LIST_TABLES_TOOL, json!({})),
        tool_call_reply("call_2", LIST_TABLES_TOOL, json!({})),
        answer_reply("too late"),
    ]);
    let agent = agent_for(serve_mock(mock.clone()).await).with_limits(2, 10);

    let err = agent.ask("loop forever", &db, &[]).await.unwrap_err();

    assert!(matches!(err, TabulaError::QueryFailure(_)));
    assert_eq!(mock.requests().len(), 2);
    db.close().await;
}

#[tokio::test]
async fn tools_run_against_the_database() {
    let scratch = Scratch::new("agent-tools");
    let db = students_db(&scratch).await;

    assert_eq!(run_tool(&db, &call(LIST_TABLES_TOOL, json!({}))).await, "courses, students");

    let schema = run_tool(&db, &call(SCHEMA_TOOL, json!({"table_names": "students"}))).await;
    assert!(schema.contains("CREATE TABLE"));
    assert!(schema.contains("3 rows from students table:"));
    assert!(schema.contains("name\tscore"));
    assert!(schema.contains("Ann\t91.5"));

    let rows = run_tool(
        &db,
        &call(QUERY_TOOL, json!({"query": "SELECT name FROM students ORDER BY score DESC"})),
    )
    .await;
    assert_eq!(rows, "[('Ann',), ('Ben',)]");
    db.close().await;
}

#[tokio::test]
async fn tool_errors_come_back_as_text() {
    let scratch = Scratch::new("agent-tool-errors");
    let db = students_db(&scratch).await;

    let unknown = run_tool(&db, &call("drop_everything", json!({}))).await;
    assert!(unknown.starts_with("Error: drop_everything is not a valid tool"));

    let missing = run_tool(&db, &call(SCHEMA_TOOL, json!({"table_names": "teachers"}))).await;
    assert!(missing.starts_with("Error:"));
    assert!(missing.contains("teachers"));

    let bad_sql = run_tool(&db, &call(QUERY_TOOL, json!({"query": "SELEC nonsense"}))).await;
    assert!(bad_sql.starts_with("Error:"));

    let write = run_tool(&db, &call(QUERY_TOOL, json!({"query": "DROP TABLE students"}))).await;
    assert!(write.starts_with("Error:"));
    assert!(db.list_tables().await.unwrap().contains("students"));
    db.close().await;
}
