use crate::handlers::workspace::{
    chat_handler, history_handler, reset_handler, tables_handler, upload_handler,
};
use crate::service::workspace_actor::WorkspaceHandle;
use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;

#[derive(Clone)]
pub struct TabulaState {
    pub workspace: WorkspaceHandle,
    key: Key,
}

impl TabulaState {
    /// `cookie_secret` must be at least 64 bytes; without one a random key is used.
    pub fn new(workspace: WorkspaceHandle, cookie_secret: Option<&str>) -> Self {
        let key = cookie_secret
            .map(|secret| Key::from(secret.as_bytes()))
            .unwrap_or_else(Key::generate);
        Self { workspace, key }
    }
}

impl FromRef<TabulaState> for Key {
    fn from_ref(state: &TabulaState) -> Self {
        state.key.clone()
    }
}

pub fn tabula_router(state: TabulaState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/chat", post(chat_handler))
        .route("/history", get(history_handler))
        .route("/tables", get(tables_handler))
        .route("/reset", post(reset_handler))
        .with_state(state)
}
