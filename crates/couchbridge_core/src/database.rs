//! Database handle and request/response operations.

use crate::config::DbOptions;
use crate::error::{CoreError, CoreResult, ResetStage};
use crate::options::{
    deletion_payload, put_payload, AllDocsOptions, GetOptions, QueryOptions,
};
use crate::store::{DocumentStore, StoreConnector};
use crate::translate;
use crate::types::{
    ChangeRecord, DatabaseInfo, Document, DocumentRef, Options, PutResponse, QueryResult, ID_FIELD,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle to one opened document store.
///
/// Each operation normalizes its request, performs exactly one store call
/// and translates the outcome. Nothing is retried. Clones share the same
/// store and observe the same `destroy`.
///
/// ```rust,ignore
/// let db = Database::open(connector, "todos", DbOptions::default())?;
/// let written = db.put(doc, None).await?;
/// let fetched = db.get(&written.id, &GetOptions::new().conflicts(true)).await?;
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    options: DbOptions,
    store: Arc<dyn DocumentStore>,
    connector: Arc<dyn StoreConnector>,
    destroyed: AtomicBool,
}

impl Database {
    /// Opens the store `name` through `connector`.
    pub fn open(
        connector: Arc<dyn StoreConnector>,
        name: impl Into<String>,
        options: DbOptions,
    ) -> CoreResult<Self> {
        let name = name.into();
        debug!(db = %name, "opening database");
        let store = connector.open(&name, options.to_options())?;
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                options,
                store,
                connector,
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &DbOptions {
        &self.inner.options
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// The connector that opened this database.
    pub fn connector(&self) -> &Arc<dyn StoreConnector> {
        &self.inner.connector
    }

    /// Returns true once `destroy` has succeeded through any clone.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Fails fast when the handle was destroyed.
    pub fn ensure_open(&self) -> CoreResult<()> {
        if self.is_destroyed() {
            return Err(CoreError::DatabaseDestroyed {
                name: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    fn log_failure<T>(&self, op: &'static str, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(CoreError::Store(err)) = &result {
            debug!(
                db = %self.inner.name,
                op,
                status = ?err.status,
                name = %err.name,
                "store call failed"
            );
        }
        result
    }

    /// Store name and update sequence.
    pub async fn info(&self) -> CoreResult<DatabaseInfo> {
        self.ensure_open()?;
        let result = self
            .inner
            .store
            .info()
            .await
            .map_err(CoreError::from)
            .and_then(|payload| translate::info(&payload));
        self.log_failure("info", result)
    }

    /// Deletes the store. Every later call through this handle fails.
    pub async fn destroy(&self) -> CoreResult<()> {
        self.ensure_open()?;
        debug!(db = %self.inner.name, "destroying database");
        let result = self.inner.store.destroy().await.map_err(CoreError::from);
        if result.is_ok() {
            self.inner.destroyed.store(true, Ordering::SeqCst);
        }
        self.log_failure("destroy", result.map(|_| ()))
    }

    /// Destroys the store and opens an empty one under the same name.
    ///
    /// A failed destroy stops before reopening. The fresh store must answer
    /// an `all_docs` call before it is returned.
    pub async fn destructive_reset(&self) -> CoreResult<Database> {
        let name = self.inner.name.clone();
        let fail = |stage, source| CoreError::DestructiveReset {
            name: name.clone(),
            stage,
            source: Box::new(source),
        };

        self.destroy().await.map_err(|e| fail(ResetStage::Destroy, e))?;
        let fresh = Database::open(
            Arc::clone(&self.inner.connector),
            self.inner.name.clone(),
            self.inner.options.clone(),
        )
        .map_err(|e| fail(ResetStage::Reopen, e))?;
        fresh
            .all_docs(&AllDocsOptions::default())
            .await
            .map_err(|e| fail(ResetStage::Verify, e))?;
        debug!(db = %self.inner.name, "database reset");
        Ok(fresh)
    }

    /// Fetches a document with the metadata requested in `options`.
    pub async fn get(&self, id: &str, options: &GetOptions) -> CoreResult<ChangeRecord> {
        self.ensure_open()?;
        debug!(db = %self.inner.name, id, "get");
        let result = self
            .inner
            .store
            .get(id, options.to_options())
            .await
            .map_err(CoreError::from)
            .and_then(translate::document);
        self.log_failure("get", result)
    }

    /// Writes `doc`. `rev`, when given, replaces the payload's `_rev`.
    pub async fn put(&self, doc: Document, rev: Option<&str>) -> CoreResult<PutResponse> {
        self.ensure_open()?;
        self.write(put_payload(doc, rev)).await
    }

    /// Writes `doc` under a store-generated id.
    pub async fn post(&self, doc: Document) -> CoreResult<PutResponse> {
        self.ensure_open()?;
        debug!(db = %self.inner.name, "post");
        let result = self
            .inner
            .store
            .post(doc, Options::new())
            .await
            .map_err(CoreError::from)
            .and_then(|payload| translate::put_response(&payload));
        self.log_failure("post", result)
    }

    /// Deletes the document `doc` refers to through its `_id` and `_rev`.
    /// `rev`, when given, wins over `_rev`.
    pub async fn remove(&self, doc: &Document, rev: Option<&str>) -> CoreResult<PutResponse> {
        let target = DocumentRef::from_document(doc, rev)
            .ok_or_else(|| CoreError::invalid_document("document to remove has no _id"))?;
        self.remove_ref(&target).await
    }

    /// Deletes the document `id`.
    pub async fn remove_by_id(&self, id: &str, rev: Option<&str>) -> CoreResult<PutResponse> {
        let target = DocumentRef {
            id: id.to_string(),
            rev: rev.map(str::to_string),
        };
        self.remove_ref(&target).await
    }

    async fn remove_ref(&self, target: &DocumentRef) -> CoreResult<PutResponse> {
        self.ensure_open()?;
        self.write(deletion_payload(target)).await
    }

    async fn write(&self, doc: Document) -> CoreResult<PutResponse> {
        debug!(db = %self.inner.name, id = ?doc.get(ID_FIELD), "put");
        let result = self
            .inner
            .store
            .put(doc, Options::new())
            .await
            .map_err(CoreError::from)
            .and_then(|payload| translate::put_response(&payload));
        self.log_failure("put", result)
    }

    /// Lists documents by id.
    pub async fn all_docs(&self, options: &AllDocsOptions) -> CoreResult<QueryResult> {
        self.ensure_open()?;
        debug!(db = %self.inner.name, "all_docs");
        let result = self
            .inner
            .store
            .all_docs(options.to_options())
            .await
            .map_err(CoreError::from)
            .and_then(|payload| translate::all_docs(&payload));
        self.log_failure("all_docs", result)
    }

    /// Runs a view query.
    pub async fn query(&self, options: &QueryOptions) -> CoreResult<QueryResult> {
        self.ensure_open()?;
        debug!(db = %self.inner.name, view = ?options.fun.name(), "query");
        let result = self
            .inner
            .store
            .query(&options.fun, options.to_options())
            .await
            .map_err(CoreError::from)
            .and_then(|payload| translate::query(&payload));
        self.log_failure("query", result)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
