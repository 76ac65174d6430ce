use crate::config::{Config, GREETING, NO_DATABASE_NOTICE};
use crate::db::sqlite::{QueryHandle, TableStore};
use crate::error::TabulaError;
use crate::ingest::{self, ConflictPolicy, IngestReport};
use crate::service::qa::QueryFacade;
use crate::service::sql_agent::SqlAgent;
use crate::service::uploads::{self, UploadedFile};
use crate::types::conversation::ChatTurn;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type SessionId = String;

/// Histories kept in memory before the least recently active one is dropped.
pub const MAX_SESSIONS: usize = 1024;

/// Everything the workspace needs, passed in explicitly at spawn time.
#[derive(Clone)]
pub struct WorkspaceContext {
    pub upload_dir: PathBuf,
    pub database_path: PathBuf,
    pub on_conflict: ConflictPolicy,
    pub facade: QueryFacade,
}

impl WorkspaceContext {
    pub fn from_config(cfg: &Config) -> Result<Self, TabulaError> {
        let agent = SqlAgent::from_config(cfg)?;
        Ok(Self {
            upload_dir: cfg.upload_dir.clone(),
            database_path: cfg.database_path.clone(),
            on_conflict: cfg.on_conflict,
            facade: QueryFacade::new(Arc::new(agent), cfg.llm.forward_history),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResetSummary {
    pub database_deleted: bool,
    pub files_removed: usize,
}

/// Public messages handled by the workspace actor.
#[derive(Debug)]
pub enum WorkspaceMessage {
    /// Save uploads, ingest the upload directory and reopen the query handle.
    Ingest(
        SessionId,
        Vec<UploadedFile>,
        RpcReplyPort<Result<IngestReport, TabulaError>>,
    ),
    /// Answer a question and record both turns in the session history.
    Ask(SessionId, String, RpcReplyPort<String>),
    History(SessionId, RpcReplyPort<Vec<ChatTurn>>),
    ListTables(RpcReplyPort<Result<BTreeSet<String>, TabulaError>>),
    /// Clear the session chat, delete the database file and every upload.
    Reset(SessionId, RpcReplyPort<ResetSummary>),
}

/// Handle for interacting with the workspace actor.
#[derive(Clone)]
pub struct WorkspaceHandle {
    actor: ActorRef<WorkspaceMessage>,
}

impl WorkspaceHandle {
    pub async fn ingest(
        &self,
        session: impl Into<SessionId>,
        files: Vec<UploadedFile>,
    ) -> Result<IngestReport, TabulaError> {
        ractor::call!(self.actor, WorkspaceMessage::Ingest, session.into(), files)
            .map_err(|e| TabulaError::RactorError(format!("Ingest RPC failed: {e}")))?
    }

    pub async fn ask(
        &self,
        session: impl Into<SessionId>,
        question: impl Into<String>,
    ) -> Result<String, TabulaError> {
        ractor::call!(
            self.actor,
            WorkspaceMessage::Ask,
            session.into(),
            question.into()
        )
        .map_err(|e| TabulaError::RactorError(format!("Ask RPC failed: {e}")))
    }

    pub async fn history(&self, session: impl Into<SessionId>) -> Result<Vec<ChatTurn>, TabulaError> {
        ractor::call!(self.actor, WorkspaceMessage::History, session.into())
            .map_err(|e| TabulaError::RactorError(format!("History RPC failed: {e}")))
    }

    pub async fn list_tables(&self) -> Result<BTreeSet<String>, TabulaError> {
        ractor::call!(self.actor, WorkspaceMessage::ListTables)
            .map_err(|e| TabulaError::RactorError(format!("ListTables RPC failed: {e}")))?
    }

    pub async fn reset(&self, session: impl Into<SessionId>) -> Result<ResetSummary, TabulaError> {
        ractor::call!(self.actor, WorkspaceMessage::Reset, session.into())
            .map_err(|e| TabulaError::RactorError(format!("Reset RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

struct WorkspaceState {
    ctx: WorkspaceContext,
    handle: Option<QueryHandle>,
    sessions: HashMap<SessionId, Vec<ChatTurn>>,
}

/// Owns the upload directory, the database file and session histories.
/// Messages are handled one at a time, so ingestion never overlaps a query.
struct WorkspaceActor;

#[ractor::async_trait]
impl Actor for WorkspaceActor {
    type Msg = WorkspaceMessage;
    type State = WorkspaceState;
    type Arguments = WorkspaceContext;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        ctx: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tokio::fs::create_dir_all(&ctx.upload_dir)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("create upload dir failed: {e}")))?;

        info!(
            upload_dir = %ctx.upload_dir.display(),
            database = %ctx.database_path.display(),
            on_conflict = ?ctx.on_conflict,
            "WorkspaceActor started"
        );

        Ok(WorkspaceState {
            ctx,
            handle: None,
            sessions: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkspaceMessage::Ingest(session, files, rp) => {
                let result = self.handle_ingest(state, session, files).await;
                let _ = rp.send(result);
            }
            WorkspaceMessage::Ask(session, question, rp) => {
                let answer = self.handle_ask(state, session, question).await;
                let _ = rp.send(answer);
            }
            WorkspaceMessage::History(session, rp) => {
                let turns = state.sessions.get(&session).cloned().unwrap_or_default();
                let _ = rp.send(turns);
            }
            WorkspaceMessage::ListTables(rp) => {
                let _ = rp.send(self.handle_list_tables(state).await);
            }
            WorkspaceMessage::Reset(session, rp) => {
                let summary = self.handle_reset(state, session).await;
                let _ = rp.send(summary);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(handle) = state.handle.take() {
            handle.close().await;
        }
        Ok(())
    }
}

impl WorkspaceActor {
    async fn handle_ingest(
        &self,
        state: &mut WorkspaceState,
        session: SessionId,
        files: Vec<UploadedFile>,
    ) -> Result<IngestReport, TabulaError> {
        if files.is_empty() {
            return Err(TabulaError::BadRequest(
                "Please upload CSV files before saving.".to_string(),
            ));
        }
        uploads::save_uploads(&state.ctx.upload_dir, &files).await?;

        let report = self.reingest(state).await?;
        *session_history(&mut state.sessions, &session) = vec![ChatTurn::ai(GREETING)];

        info!(
            tables = report.tables.len(),
            failures = report.failures.len(),
            "CSV files have been converted to SQLite database"
        );
        Ok(report)
    }

    /// Rebuild the database from the upload directory and reopen the query handle.
    /// On failure the previous database, if still on disk, is reopened.
    async fn reingest(&self, state: &mut WorkspaceState) -> Result<IngestReport, TabulaError> {
        if let Some(previous) = state.handle.take() {
            previous.close().await;
        }

        match rebuild(&state.ctx).await {
            Ok((report, handle)) => {
                state.handle = Some(handle);
                Ok(report)
            }
            Err(e) => {
                state.handle = reopen_existing(&state.ctx.database_path).await;
                Err(e)
            }
        }
    }

    async fn handle_ask(
        &self,
        state: &mut WorkspaceState,
        session: SessionId,
        question: String,
    ) -> String {
        let history = session_history(&mut state.sessions, &session);
        let prior = history.clone();
        history.push(ChatTurn::human(question.clone()));

        let Some(db) = state.handle.as_ref() else {
            return NO_DATABASE_NOTICE.to_string();
        };
        let answer = state.ctx.facade.answer(&question, db, &prior).await;

        state
            .sessions
            .entry(session)
            .or_default()
            .push(ChatTurn::ai(answer.clone()));
        answer
    }

    async fn handle_list_tables(
        &self,
        state: &WorkspaceState,
    ) -> Result<BTreeSet<String>, TabulaError> {
        if let Some(db) = state.handle.as_ref() {
            return db.list_tables().await;
        }
        if !state.ctx.database_path.is_file() {
            return Ok(BTreeSet::new());
        }
        let db = QueryHandle::open(&state.ctx.database_path).await?;
        let tables = db.list_tables().await;
        db.close().await;
        tables
    }

    async fn handle_reset(&self, state: &mut WorkspaceState, session: SessionId) -> ResetSummary {
        state.sessions.remove(&session);

        if let Some(db) = state.handle.take() {
            db.close().await;
        }

        let path = &state.ctx.database_path;
        let database_deleted = match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Database file deleted successfully");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to delete the database file");
                false
            }
        };

        let files_removed = uploads::clear_dir(&state.ctx.upload_dir);
        ResetSummary {
            database_deleted,
            files_removed,
        }
    }
}

async fn rebuild(ctx: &WorkspaceContext) -> Result<(IngestReport, QueryHandle), TabulaError> {
    let store = TableStore::open(&ctx.database_path).await?;
    let report = ingest::ingest(&ctx.upload_dir, &store, ctx.on_conflict).await;
    store.close().await;
    let report = report?;
    let handle = QueryHandle::open(&ctx.database_path).await?;
    Ok((report, handle))
}

async fn reopen_existing(path: &Path) -> Option<QueryHandle> {
    if !path.is_file() {
        return None;
    }
    match QueryHandle::open(path).await {
        Ok(handle) => {
            info!(path = %path.display(), "reopened previous database");
            Some(handle)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to reopen previous database");
            None
        }
    }
}

/// History of `session`, evicting the least recently active session when full.
fn session_history<'a>(
    sessions: &'a mut HashMap<SessionId, Vec<ChatTurn>>,
    session: &SessionId,
) -> &'a mut Vec<ChatTurn> {
    if !sessions.contains_key(session) && sessions.len() >= MAX_SESSIONS {
        let idle = sessions
            .iter()
            .min_by_key(|(_, turns)| turns.last().map(|t| t.at))
            .map(|(id, _)| id.clone());
        if let Some(idle) = idle {
            debug!(session = %idle, "evicting idle session");
            sessions.remove(&idle);
        }
    }
    sessions.entry(session.clone()).or_default()
}

/// Spawn the workspace actor and return a handle.
pub async fn spawn(ctx: WorkspaceContext) -> Result<WorkspaceHandle, TabulaError> {
    let (actor, _jh) = Actor::spawn(None, WorkspaceActor, ctx)
        .await
        .map_err(|e| TabulaError::RactorError(format!("failed to spawn WorkspaceActor: {e}")))?;
    Ok(WorkspaceHandle { actor })
}
