//! In-memory [`StoreDriver`] with sessions and multi-document transactions.
//!
//! Committed data lives behind one [`RwLock`] so a commit applies its whole
//! write set atomically. Each open transaction keeps a private write set
//! layered over committed data; documents it writes are locked in a
//! [`DashMap`] until the transaction ends, and a second writer gets a
//! transient write conflict.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use docstore_core::{CompiledQuery, IndexSpec, Value};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{BackendError, ErrorLabel};
use crate::storage::engine::{Namespace, SessionDriver, SessionId, StoreDriver};
use crate::storage::matcher::{compare_documents, lookup, Matcher};
use crate::storage::record::StoredDocument;

type DocumentKey = (Namespace, String);

/// Pending writes of one transaction; `None` marks a delete.
type WriteSet = BTreeMap<DocumentKey, Option<StoredDocument>>;

#[derive(Debug, Default)]
struct Collection {
    documents: BTreeMap<String, StoredDocument>,
    indexes: Vec<IndexSpec>,
}

#[derive(Debug, Default)]
struct Session {
    transaction: Option<WriteSet>,
}

/// In-memory backing store.
pub struct MemoryStore {
    collections: RwLock<BTreeMap<Namespace, Collection>>,
    sessions: DashMap<SessionId, Session>,
    write_locks: DashMap<DocumentKey, SessionId>,
    commit_faults: Mutex<VecDeque<BackendError>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            sessions: DashMap::new(),
            write_locks: DashMap::new(),
            commit_faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Makes the next `times` commits fail with a driver error carrying
    /// `label`. The transaction stays open, so the commit can be retried.
    pub fn fail_next_commits(&self, label: ErrorLabel, times: usize) {
        let mut faults = self.commit_faults.lock();
        for _ in 0..times {
            faults.push_back(BackendError::labeled("injected commit failure", &[label]));
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Names of all collections in `database`.
    #[must_use]
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.collections
            .read()
            .keys()
            .filter(|ns| ns.database == database)
            .map(|ns| ns.collection.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Sessions and locks
    // -----------------------------------------------------------------------

    /// Resolves `session` to the session id whose transaction scopes the
    /// operation, or `None` for an autocommit operation. A session without
    /// an open transaction is an error, never an autocommit.
    fn active_transaction(
        &self,
        session: Option<SessionId>,
    ) -> Result<Option<SessionId>, BackendError> {
        let Some(id) = session else {
            return Ok(None);
        };
        let entry = self
            .sessions
            .get(&id)
            .ok_or(BackendError::NoSuchSession(id))?;
        if entry.transaction.is_none() {
            return Err(BackendError::NoTransaction(id));
        }
        Ok(Some(id))
    }

    fn take_write_set(&self, session: SessionId) -> Result<WriteSet, BackendError> {
        let mut entry = self
            .sessions
            .get_mut(&session)
            .ok_or(BackendError::NoSuchSession(session))?;
        entry
            .transaction
            .take()
            .ok_or(BackendError::NoTransaction(session))
    }

    fn lock(&self, ns: &Namespace, id: &str, owner: SessionId) -> Result<(), BackendError> {
        match self.write_locks.entry((ns.clone(), id.to_string())) {
            Entry::Occupied(e) if *e.get() != owner => Err(BackendError::WriteConflict {
                namespace: ns.to_string(),
                id: id.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(owner);
                Ok(())
            }
        }
    }

    fn release_locks(&self, owner: SessionId) {
        self.write_locks.retain(|_, holder| *holder != owner);
    }

    fn stage(&self, session: SessionId, key: DocumentKey, document: Option<StoredDocument>) {
        if let Some(mut entry) = self.sessions.get_mut(&session) {
            if let Some(writes) = entry.transaction.as_mut() {
                writes.insert(key, document);
            }
        }
    }

    /// Runs a single-document write outside any transaction, holding the
    /// document lock for its duration.
    fn autocommit<T>(
        &self,
        ns: &Namespace,
        id: &str,
        apply: impl FnOnce(&mut BTreeMap<Namespace, Collection>) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let owner = SessionId::new();
        self.lock(ns, id, owner)?;
        let result = apply(&mut self.collections.write());
        self.write_locks.remove(&(ns.clone(), id.to_string()));
        result
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Documents of `ns` as seen by `transaction`.
    fn view(&self, ns: &Namespace, transaction: Option<SessionId>) -> BTreeMap<String, StoredDocument> {
        let mut documents = self
            .collections
            .read()
            .get(ns)
            .map(|c| c.documents.clone())
            .unwrap_or_default();
        if let Some(entry) = transaction.and_then(|id| self.sessions.get(&id)) {
            if let Some(writes) = &entry.transaction {
                overlay(&mut documents, writes, ns);
            }
        }
        documents
    }

    fn get(&self, ns: &Namespace, id: &str, transaction: Option<SessionId>) -> Option<StoredDocument> {
        let key = (ns.clone(), id.to_string());
        if let Some(entry) = transaction.and_then(|s| self.sessions.get(&s)) {
            if let Some(staged) = entry.transaction.as_ref().and_then(|w| w.get(&key)) {
                return staged.clone();
            }
        }
        self.collections
            .read()
            .get(ns)
            .and_then(|c| c.documents.get(id).cloned())
    }

    fn indexes(&self, ns: &Namespace) -> Vec<IndexSpec> {
        self.collections
            .read()
            .get(ns)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    /// Applies a committed write set atomically after re-checking unique
    /// indices against the resulting state.
    fn apply(&self, writes: &WriteSet) -> Result<(), BackendError> {
        let mut collections = self.collections.write();

        let touched: BTreeSet<&Namespace> = writes.keys().map(|(ns, _)| ns).collect();
        for ns in touched {
            let existing = collections.get(ns);
            let mut view = existing.map(|c| c.documents.clone()).unwrap_or_default();
            overlay(&mut view, writes, ns);
            let indexes = existing.map(|c| c.indexes.as_slice()).unwrap_or_default();
            for ((wns, _), staged) in writes {
                if let (true, Some(document)) = (wns == ns, staged) {
                    check_unique(ns, indexes, &view, document)?;
                }
            }
        }

        for ((ns, id), document) in writes {
            let collection = collections.entry(ns.clone()).or_default();
            match document {
                Some(document) => {
                    collection.documents.insert(id.clone(), document.clone());
                }
                None => {
                    collection.documents.remove(id);
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn overlay(documents: &mut BTreeMap<String, StoredDocument>, writes: &WriteSet, ns: &Namespace) {
    for ((wns, id), staged) in writes {
        if wns != ns {
            continue;
        }
        match staged {
            Some(document) => {
                documents.insert(id.clone(), document.clone());
            }
            None => {
                documents.remove(id);
            }
        }
    }
}

/// Key of `body` in a compound index, or `None` when the partial filter
/// excludes it (some key path is missing).
fn index_key(body: &Value, spec: &IndexSpec) -> Option<Vec<Value>> {
    spec.partial_filter_paths()
        .map(|path| {
            let found = lookup(body, path);
            match found.as_slice() {
                [] => None,
                [single] => Some((*single).clone()),
                many => Some(Value::Array(many.iter().map(|v| (*v).clone()).collect())),
            }
        })
        .collect()
}

fn check_unique(
    ns: &Namespace,
    indexes: &[IndexSpec],
    documents: &BTreeMap<String, StoredDocument>,
    document: &StoredDocument,
) -> Result<(), BackendError> {
    for spec in indexes.iter().filter(|s| s.unique) {
        let Some(key) = index_key(&document.body, spec) else {
            continue;
        };
        let duplicate = documents
            .values()
            .filter(|other| other.id != document.id)
            .filter_map(|other| index_key(&other.body, spec))
            .any(|other| {
                other.len() == key.len()
                    && other.iter().zip(&key).all(|(a, b)| a.canonical_cmp(b).is_eq())
            });
        if duplicate {
            return Err(BackendError::DuplicateKey {
                namespace: ns.to_string(),
                index: spec.name.clone(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Driver implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl SessionDriver for MemoryStore {
    async fn start_session(&self) -> Result<SessionId, BackendError> {
        let id = SessionId::new();
        self.sessions.insert(id, Session::default());
        debug!(session = %id, "session started");
        Ok(id)
    }

    async fn start_transaction(&self, session: SessionId) -> Result<(), BackendError> {
        let mut entry = self
            .sessions
            .get_mut(&session)
            .ok_or(BackendError::NoSuchSession(session))?;
        if entry.transaction.is_some() {
            return Err(BackendError::TransactionInProgress(session));
        }
        entry.transaction = Some(WriteSet::new());
        debug!(session = %session, "transaction started");
        Ok(())
    }

    async fn commit_transaction(&self, session: SessionId) -> Result<(), BackendError> {
        self.active_transaction(Some(session))?;
        if let Some(fault) = self.commit_faults.lock().pop_front() {
            return Err(fault);
        }
        let writes = self.take_write_set(session)?;
        let result = self.apply(&writes);
        self.release_locks(session);
        debug!(session = %session, writes = writes.len(), ok = result.is_ok(), "transaction committed");
        result
    }

    async fn abort_transaction(&self, session: SessionId) -> Result<(), BackendError> {
        let writes = self.take_write_set(session)?;
        self.release_locks(session);
        debug!(session = %session, discarded = writes.len(), "transaction aborted");
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> Result<(), BackendError> {
        self.sessions
            .remove(&session)
            .ok_or(BackendError::NoSuchSession(session))?;
        self.release_locks(session);
        debug!(session = %session, "session ended");
        Ok(())
    }
}

#[async_trait]
impl StoreDriver for MemoryStore {
    async fn create_collection(&self, ns: &Namespace) -> Result<bool, BackendError> {
        let mut collections = self.collections.write();
        if collections.contains_key(ns) {
            return Ok(false);
        }
        collections.insert(ns.clone(), Collection::default());
        debug!(namespace = %ns, "collection created");
        Ok(true)
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, BackendError> {
        let dropped = self.collections.write().remove(ns).is_some();
        debug!(namespace = %ns, dropped, "collection dropped");
        Ok(dropped)
    }

    async fn drop_database(&self, database: &str) -> Result<bool, BackendError> {
        let mut collections = self.collections.write();
        let before = collections.len();
        collections.retain(|ns, _| ns.database != database);
        Ok(collections.len() != before)
    }

    async fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<(), BackendError> {
        let mut collections = self.collections.write();
        let collection = collections.entry(ns.clone()).or_default();
        if spec.unique {
            for document in collection.documents.values() {
                check_unique(ns, std::slice::from_ref(spec), &collection.documents, document)?;
            }
        }
        collection.indexes.retain(|existing| existing.name != spec.name);
        collection.indexes.push(spec.clone());
        debug!(namespace = %ns, index = %spec.name, unique = spec.unique, "index created");
        Ok(())
    }

    async fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexSpec>, BackendError> {
        Ok(self.indexes(ns))
    }

    async fn replace_one(
        &self,
        ns: &Namespace,
        document: StoredDocument,
        session: Option<SessionId>,
    ) -> Result<(), BackendError> {
        let Some(transaction) = self.active_transaction(session)? else {
            return self.autocommit(ns, &document.id.clone(), |collections| {
                let collection = collections.entry(ns.clone()).or_default();
                check_unique(ns, &collection.indexes, &collection.documents, &document)?;
                collection.documents.insert(document.id.clone(), document);
                Ok(())
            });
        };

        self.lock(ns, &document.id, transaction)?;
        let view = self.view(ns, Some(transaction));
        check_unique(ns, &self.indexes(ns), &view, &document)?;
        self.stage(transaction, (ns.clone(), document.id.clone()), Some(document));
        Ok(())
    }

    async fn delete_one(
        &self,
        ns: &Namespace,
        id: &str,
        session: Option<SessionId>,
    ) -> Result<bool, BackendError> {
        let Some(transaction) = self.active_transaction(session)? else {
            return self.autocommit(ns, id, |collections| {
                Ok(collections
                    .get_mut(ns)
                    .and_then(|c| c.documents.remove(id))
                    .is_some())
            });
        };

        self.lock(ns, id, transaction)?;
        let existed = self.get(ns, id, Some(transaction)).is_some();
        if existed {
            self.stage(transaction, (ns.clone(), id.to_string()), None);
        }
        Ok(existed)
    }

    async fn find_one(
        &self,
        ns: &Namespace,
        id: &str,
        session: Option<SessionId>,
    ) -> Result<Option<StoredDocument>, BackendError> {
        let transaction = self.active_transaction(session)?;
        Ok(self.get(ns, id, transaction))
    }

    async fn find_ids(
        &self,
        ns: &Namespace,
        query: &CompiledQuery,
        session: Option<SessionId>,
    ) -> Result<Vec<String>, BackendError> {
        let transaction = self.active_transaction(session)?;
        let matcher = Matcher::new(&query.filter)?;
        let view = self.view(ns, transaction);

        let mut hits: Vec<&StoredDocument> = view
            .values()
            .filter(|d| matcher.matches(&d.body))
            .collect();
        hits.sort_by(|a, b| compare_documents(&a.body, &b.body, &query.sort));

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| d.id.clone())
            .collect())
    }
}
