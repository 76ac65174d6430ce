use crate::ingest::IngestReport;
use crate::middleware::session::Session;
use crate::router::TabulaState;
use crate::service::uploads::UploadedFile;
use crate::service::workspace_actor::ResetSummary;
use crate::types::conversation::ChatTurn;
use crate::TabulaError;
use axum::{
    Json,
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

pub const UPLOAD_SUCCESS: &str = "CSV files have been converted to SQLite database!";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: IngestReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TablesResponse {
    pub tables: BTreeSet<String>,
}

/// POST /upload -> save multipart files, ingest them and start a fresh chat.
pub async fn upload_handler(
    State(state): State<TabulaState>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Response, TabulaError> {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        let Some(name) = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        files.push(UploadedFile {
            name,
            bytes: bytes.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(TabulaError::BadRequest(
            "Please upload CSV files before saving.".to_string(),
        ));
    }

    info!(session = %session.id, count = files.len(), "upload received");
    let report = state.workspace.ingest(session.id.clone(), files).await?;
    let body = UploadResponse {
        message: UPLOAD_SUCCESS.to_string(),
        report,
    };
    Ok((session.jar, Json(body)).into_response())
}

/// POST /chat -> answer a question about the uploaded data.
pub async fn chat_handler(
    State(state): State<TabulaState>,
    session: Session,
    Json(req): Json<ChatRequest>,
) -> Result<Response, TabulaError> {
    let question = req.message.trim();
    if question.is_empty() {
        return Err(TabulaError::BadRequest("message must not be empty".to_string()));
    }
    let answer = state.workspace.ask(session.id.clone(), question).await?;
    Ok((session.jar, Json(ChatResponse { answer })).into_response())
}

/// GET /history -> the session's conversation so far.
pub async fn history_handler(
    State(state): State<TabulaState>,
    session: Session,
) -> Result<Response, TabulaError> {
    let turns: Vec<ChatTurn> = state.workspace.history(session.id.clone()).await?;
    Ok((session.jar, Json(turns)).into_response())
}

/// GET /tables -> table names currently in the database.
pub async fn tables_handler(
    State(state): State<TabulaState>,
) -> Result<Json<TablesResponse>, TabulaError> {
    let tables = state.workspace.list_tables().await?;
    Ok(Json(TablesResponse { tables }))
}

/// POST /reset -> clear the chat and delete the database and uploads.
pub async fn reset_handler(
    State(state): State<TabulaState>,
    session: Session,
) -> Result<Response, TabulaError> {
    let summary: ResetSummary = state.workspace.reset(session.id.clone()).await?;
    info!(
        session = %session.id,
        database_deleted = summary.database_deleted,
        files_removed = summary.files_removed,
        "workspace reset"
    );
    Ok((session.jar, Json(summary)).into_response())
}
