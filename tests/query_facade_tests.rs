mod common;

use common::{FailingCapability, Scratch, SilentCapability, TableListCapability, write_file};
use std::sync::Arc;
use tabula::config::FALLBACK_ANSWER;
use tabula::db::sqlite::{QueryHandle, TableStore};
use tabula::types::conversation::ChatTurn;
use tabula::{ConflictPolicy, QueryFacade, ingest};

async fn populated_handle(scratch: &Scratch) -> QueryHandle {
    let dir = scratch.upload_dir();
    write_file(&dir, "a.csv", b"id\n1\n");
    write_file(&dir, "b.csv", b"id\n2\n");
    let store = TableStore::open(&scratch.database_path()).await.unwrap();
    ingest(&dir, &store, ConflictPolicy::Replace).await.unwrap();
    store.close().await;
    QueryHandle::open(&scratch.database_path()).await.unwrap()
}

#[tokio::test]
async fn failing_capability_yields_fallback_answer() {
    let scratch = Scratch::new("facade-failing");
    let db = populated_handle(&scratch).await;
    let facade = QueryFacade::new(Arc::new(FailingCapability), false);

    let answer = facade.answer("how many rows?", &db, &[]).await;

    assert_eq!(answer, FALLBACK_ANSWER);
    db.close().await;
}

#[tokio::test]
async fn blank_answer_yields_fallback_answer() {
    let scratch = Scratch::new("facade-silent");
    let db = populated_handle(&scratch).await;
    let facade = QueryFacade::new(Arc::new(SilentCapability), false);

    assert_eq!(facade.answer("anything?", &db, &[]).await, FALLBACK_ANSWER);
    db.close().await;
}

#[tokio::test]
async fn answer_is_returned_verbatim() {
    let scratch = Scratch::new("facade-verbatim");
    let db = populated_handle(&scratch).await;
    let facade = QueryFacade::new(Arc::new(TableListCapability), false);

    let answer = facade.answer("which tables?", &db, &[]).await;

    assert_eq!(answer, "which tables? -> tables=a,b history=0");
    db.close().await;
}

#[tokio::test]
async fn history_is_forwarded_only_when_enabled() {
    let scratch = Scratch::new("facade-history");
    let db = populated_handle(&scratch).await;
    let history = vec![ChatTurn::ai("hello"), ChatTurn::human("hi")];

    let without = QueryFacade::new(Arc::new(TableListCapability), false)
        .answer("q", &db, &history)
        .await;
    let with = QueryFacade::new(Arc::new(TableListCapability), true)
        .answer("q", &db, &history)
        .await;

    assert!(without.ends_with("history=0"));
    assert!(with.ends_with("history=2"));
    db.close().await;
}
