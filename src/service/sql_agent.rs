//! Tool-calling SQL agent over an OpenAI-compatible chat model.
//!
//! The model plans; this module only runs the three database tools it may call
//! and feeds their output back until the model replies without tool calls.

use crate::api::chat_api::{ChatApi, build_http_client};
use crate::config::Config;
use crate::db::models::CellValue;
use crate::db::sqlite::{QueryHandle, QueryRows};
use crate::error::TabulaError;
use crate::service::qa::QaCapability;
use crate::types::chat::{ChatMessage, FunctionCall, FunctionSpec, ToolSpec};
use crate::types::conversation::{ChatTurn, Speaker};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

pub const LIST_TABLES_TOOL: &str = "sql_db_list_tables";
pub const SCHEMA_TOOL: &str = "sql_db_schema";
pub const QUERY_TOOL: &str = "sql_db_query";

const SAMPLE_ROWS: usize = 3;
const MAX_CELL_CHARS: usize = 300;

pub struct SqlAgent {
    api: ChatApi,
    model: String,
    temperature: f32,
    max_iterations: usize,
    top_k: usize,
}

impl SqlAgent {
    pub fn new(api: ChatApi, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            api,
            model: model.into(),
            temperature,
            max_iterations: 15,
            top_k: 10,
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, top_k: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.top_k = top_k;
        self
    }

    pub fn from_config(cfg: &Config) -> Result<Self, TabulaError> {
        let client = build_http_client(&cfg.llm)?;
        let api = ChatApi::new(client, cfg.chat_completions_url()?, cfg.llm.api_key.clone());
        Ok(Self::new(api, cfg.llm.model.clone(), cfg.llm.temperature)
            .with_limits(cfg.llm.max_iterations, cfg.llm.top_k))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an agent that answers questions about a SQLite database.\n\
             Look at the available tables first, then inspect the schema of the relevant ones.\n\
             Write a syntactically correct SQLite query, run it, and answer from its result.\n\
             Unless the user asks for a specific number of rows, limit queries to at most {} results.\n\
             Only select the columns needed to answer; never select every column of a table.\n\
             If a query fails, rewrite it and try again.\n\
             Never run INSERT, UPDATE, DELETE, DROP or any other statement that changes data.\n\
             If the question cannot be answered from the database, say that you don't know.",
            self.top_k
        )
    }
}

#[async_trait]
impl QaCapability for SqlAgent {
    async fn ask(
        &self,
        question: &str,
        db: &QueryHandle,
        history: &[ChatTurn],
    ) -> Result<String, TabulaError> {
        let tools = tool_specs();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt()));
        messages.extend(history.iter().map(|turn| match turn.speaker {
            Speaker::Human => ChatMessage::user(turn.content.clone()),
            Speaker::Ai => ChatMessage::assistant(turn.content.clone()),
        }));
        messages.push(ChatMessage::user(question));

        for step in 1..=self.max_iterations {
            let reply = self
                .api
                .complete(&self.model, self.temperature, &messages, &tools)
                .await?
                .into_first_message()
                .ok_or_else(|| TabulaError::QueryFailure("completion had no choices".into()))?;

            let calls = reply.requested_tools().to_vec();
            if calls.is_empty() {
                info!(step, "agent finished");
                return reply
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| TabulaError::QueryFailure("model returned no answer".into()));
            }

            messages.push(reply);
            for call in calls {
                debug!(step, tool = %call.function.name, args = %call.function.arguments, "running tool");
                let output = run_tool(db, &call.function).await;
                messages.push(ChatMessage::tool_result(call.id, output));
            }
        }

        Err(TabulaError::QueryFailure(format!(
            "agent stopped after {} iterations without an answer",
            self.max_iterations
        )))
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    let function = |name, description: &str, parameters| ToolSpec {
        kind: "function",
        function: FunctionSpec {
            name,
            description: description.to_string(),
            parameters,
        },
    };
    vec![
        function(
            LIST_TABLES_TOOL,
            "List the tables in the database as a comma-separated string.",
            json!({"type": "object", "properties": {}}),
        ),
        function(
            SCHEMA_TOOL,
            "Get the schema and sample rows of the given tables. Call the table \
             listing tool first to be sure the tables exist.",
            json!({
                "type": "object",
                "properties": {
                    "table_names": {
                        "type": "string",
                        "description": "Comma-separated list of tables, e.g. 'table1, table2'"
                    }
                },
                "required": ["table_names"]
            }),
        ),
        function(
            QUERY_TOOL,
            "Run a SQLite query and get the result rows. On error the message is \
             returned; rewrite the query and try again.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "A detailed and correct SQL query."}
                },
                "required": ["query"]
            }),
        ),
    ]
}

/// Run one tool call. Failures are returned as `Error: ...` text for the model to read.
pub async fn run_tool(db: &QueryHandle, call: &FunctionCall) -> String {
    let args: Value = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => return format!("Error: arguments are not valid JSON: {e}"),
        }
    };
    let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();

    let result = match call.name.as_str() {
        LIST_TABLES_TOOL => db
            .list_tables()
            .await
            .map(|tables| tables.into_iter().collect::<Vec<_>>().join(", ")),
        SCHEMA_TOOL => describe_tables(db, arg("table_names")).await,
        QUERY_TOOL => db.fetch(arg("query")).await.map(|rows| render_rows(&rows)),
        other => {
            return format!(
                "Error: {other} is not a valid tool, try one of [{QUERY_TOOL}, {SCHEMA_TOOL}, {LIST_TABLES_TOOL}]."
            );
        }
    };
    result.unwrap_or_else(|e| format!("Error: {e}"))
}

async fn describe_tables(db: &QueryHandle, table_names: &str) -> Result<String, TabulaError> {
    let requested: Vec<&str> = table_names
        .split(',')
        .map(|t| t.trim().trim_matches(|c| c == '"' || c == '`' || c == '\''))
        .filter(|t| !t.is_empty())
        .collect();
    let existing = db.list_tables().await?;
    let missing: Vec<&str> = requested
        .iter()
        .copied()
        .filter(|t| !existing.contains(*t))
        .collect();
    if requested.is_empty() || !missing.is_empty() {
        return Err(TabulaError::QueryFailure(format!(
            "table_names {{{}}} not found in database",
            missing.join(", ")
        )));
    }

    let mut sections = Vec::with_capacity(requested.len());
    for table in requested {
        let ddl = db.table_ddl(table).await?.unwrap_or_default();
        let sample = db.sample_rows(table, SAMPLE_ROWS).await?;
        let mut section = format!("{ddl}\n\n/*\n{SAMPLE_ROWS} rows from {table} table:\n");
        section.push_str(&sample.columns.join("\t"));
        for row in &sample.rows {
            section.push('\n');
            section.push_str(
                &row.iter()
                    .map(|c| truncate(&render_plain(c)))
                    .collect::<Vec<_>>()
                    .join("\t"),
            );
        }
        section.push_str("\n*/");
        sections.push(section);
    }
    Ok(sections.join("\n\n"))
}

/// Rows as a list of tuples, e.g. `[('Alice', 90), ('Bob', None)]`; empty result is empty text.
pub fn render_rows(rows: &QueryRows) -> String {
    if rows.rows.is_empty() {
        return String::new();
    }
    let tuples = rows
        .rows
        .iter()
        .map(|row| {
            let cells = row.iter().map(render_literal).collect::<Vec<_>>();
            if cells.len() == 1 {
                format!("({},)", cells[0])
            } else {
                format!("({})", cells.join(", "))
            }
        })
        .collect::<Vec<_>>();
    format!("[{}]", tuples.join(", "))
}

fn render_literal(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(s) => format!("'{}'", truncate(s).replace('\\', "\\\\").replace('\'', "\\'")),
        other => render_plain(other),
    }
}

fn render_plain(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "None".to_string(),
        CellValue::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
        CellValue::Integer(i) => i.to_string(),
        CellValue::Real(f) => format!("{f:?}"),
        CellValue::Text(s) => s.clone(),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_CELL_CHARS {
        return s.to_string();
    }
    let cut: String = s.chars().take(MAX_CELL_CHARS).collect();
    format!("{cut}...")
}
