//! Transaction scenarios through repositories and the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docstore_core::{Document, DocumentSchema, IndexDefinition};
use docstore_server::{
    DocumentRepository, ErrorLabel, Labeled, MemoryStore, Namespace, RepositoryError,
    SessionDriver, StoreDriver, TransactionCoordinator, TransactionError, TransactionGroup,
    TransactionState,
};
use serde_json::json;

fn repository(store: &Arc<MemoryStore>) -> Arc<DocumentRepository> {
    Arc::new(DocumentRepository::new(
        Arc::clone(store) as Arc<dyn StoreDriver>,
        Namespace::new("docstore_c1", "note"),
        "c1",
        "note",
        DocumentSchema::with_indices(vec![IndexDefinition::ascending(&["title"])]),
    ))
}

fn coordinator(store: &Arc<MemoryStore>) -> Arc<TransactionCoordinator> {
    Arc::new(TransactionCoordinator::new(
        Arc::clone(store) as Arc<dyn SessionDriver>
    ))
}

fn note(id: &str, title: &str) -> Document {
    Document::new(id, "note", "owner").with_data("title", json!(title))
}

fn all_titles() -> serde_json::Value {
    json!({ "where": [["title", ">", ""]], "orderBy": [["title", "asc"]] })
}

/// A delete inside an aborted transaction leaves the document in place.
#[tokio::test]
async fn delete_in_aborted_transaction_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let repo = repository(&store);
    repo.store(&note("n1", "first"), None).await.unwrap();

    let tx = coordinator(&store);
    let handle = tx.start().await.unwrap();
    assert!(repo.delete("n1", Some(&handle)).await.unwrap());
    assert!(repo.find(&all_titles(), Some(&handle)).await.unwrap().is_empty());
    tx.abort().await.unwrap();

    assert_eq!(tx.state(), TransactionState::Aborted);
    assert_eq!(repo.find(&all_titles(), None).await.unwrap(), vec!["n1"]);
}

fn is_stale<T>(result: Result<T, RepositoryError>) -> bool {
    matches!(
        result,
        Err(RepositoryError::Transaction(TransactionError::StaleHandle { .. }))
    )
}

/// Handles of ended transactions are refused instead of autocommitting.
#[tokio::test]
async fn ended_transaction_handle_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let repo = repository(&store);
    let tx = coordinator(&store);

    let aborted = tx.start().await.unwrap();
    tx.abort().await.unwrap();
    assert!(is_stale(repo.store(&note("n1", "late"), Some(&aborted)).await));
    assert!(repo.find(&all_titles(), None).await.unwrap().is_empty());

    let committed = tx.start().await.unwrap();
    repo.store(&note("n1", "kept"), Some(&committed)).await.unwrap();
    tx.commit().await.unwrap();
    assert!(is_stale(repo.delete("n1", Some(&committed)).await));
    assert!(is_stale(repo.fetch("n1", Some(&committed)).await));
    assert!(is_stale(repo.find(&all_titles(), Some(&committed)).await));

    // The restarted transaction shares the session but not the handle.
    let current = tx.start().await.unwrap();
    assert_eq!(current.session(), committed.session());
    assert!(is_stale(repo.store(&note("n2", "late"), Some(&committed)).await));
    repo.store(&note("n2", "current"), Some(&current)).await.unwrap();
    tx.abort().await.unwrap();

    assert_eq!(repo.find(&all_titles(), None).await.unwrap(), vec!["n1"]);
    let kept = repo.fetch("n1", None).await.unwrap().unwrap();
    assert_eq!(kept.data["title"], json!("kept"));
}

/// Commits failing N times with an unknown result succeed on attempt N+1.
#[tokio::test]
async fn commit_survives_unknown_results() {
    let store = Arc::new(MemoryStore::new());
    let repo = repository(&store);
    store.fail_next_commits(ErrorLabel::UnknownTransactionCommitResult, 3);

    let tx = coordinator(&store);
    let handle = tx.start().await.unwrap();
    repo.store(&note("n1", "first"), Some(&handle)).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(repo.find(&all_titles(), None).await.unwrap(), vec!["n1"]);
    assert_eq!(store.session_count(), 1);
}

/// A write conflict is retried on the same session until the holder commits.
#[tokio::test]
async fn write_conflict_is_retried_until_lock_is_released() {
    let store = Arc::new(MemoryStore::new());
    let repo = repository(&store);

    let holder = coordinator(&store);
    let holder_handle = holder.start().await.unwrap();
    repo.store(&note("n1", "holder"), Some(&holder_handle)).await.unwrap();

    let waiter = coordinator(&store);
    let waiter_handle = waiter.start().await.unwrap();
    let conflict = repo
        .store(&note("n1", "waiter"), Some(&waiter_handle))
        .await
        .unwrap_err();
    assert!(conflict.has_label(ErrorLabel::TransientTransactionError));

    let attempts = Arc::new(AtomicUsize::new(0));
    let task = tokio::spawn({
        let (repo, waiter, attempts) = (Arc::clone(&repo), Arc::clone(&waiter), Arc::clone(&attempts));
        async move {
            waiter
                .run(|h| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let repo = Arc::clone(&repo);
                    async move { repo.store(&note("n1", "waiter"), Some(&h)).await }
                })
                .await
        }
    });

    tokio::task::yield_now().await;
    holder.commit().await.unwrap();
    task.await.unwrap().unwrap();
    waiter.commit().await.unwrap();

    assert!(attempts.load(Ordering::SeqCst) >= 1);
    assert_eq!(store.session_count(), 2);
    let stored = repo.fetch("n1", None).await.unwrap().unwrap();
    assert_eq!(stored.data["title"], json!("waiter"));
}

#[tokio::test]
async fn transaction_group_commits_every_member() {
    let store = Arc::new(MemoryStore::new());
    let notes = repository(&store);
    let mut group = TransactionGroup::new();
    group.insert("a", coordinator(&store));
    group.insert("b", coordinator(&store));

    group.start_all().await.unwrap();
    notes
        .store(&note("n1", "from a"), Some(&group.handle("a").unwrap()))
        .await
        .unwrap();
    notes
        .store(&note("n2", "from b"), Some(&group.handle("b").unwrap()))
        .await
        .unwrap();
    assert!(notes.find(&all_titles(), None).await.unwrap().is_empty());

    group.commit_all().await.unwrap();
    assert_eq!(notes.find(&all_titles(), None).await.unwrap(), vec!["n1", "n2"]);
}
