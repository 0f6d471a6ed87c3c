//! Connection options for opening a database.

use crate::types::Options;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Storage adapter requested from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adapter {
    /// Browser IndexedDB.
    Idb,
    /// LevelDB on disk.
    LevelDb,
    /// Browser WebSQL.
    WebSql,
    /// Remote CouchDB over HTTP.
    Http,
    /// Volatile in-memory store.
    Memory,
}

impl Adapter {
    /// Name the store knows the adapter by.
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::Idb => "idb",
            Adapter::LevelDb => "leveldb",
            Adapter::WebSql => "websql",
            Adapter::Http => "http",
            Adapter::Memory => "memory",
        }
    }
}

/// Transport tuning for HTTP adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AjaxOptions {
    /// Allow HTTP caching of GET requests.
    pub cache: Option<bool>,
    /// Extra request headers.
    pub headers: Option<BTreeMap<String, String>>,
    /// Send cookies cross-origin.
    pub with_credentials: Option<bool>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl AjaxOptions {
    fn to_options(&self) -> Option<Options> {
        let mut ajax = Map::new();
        if let Some(cache) = self.cache {
            ajax.insert("cache".into(), Value::Bool(cache));
        }
        if let Some(headers) = &self.headers {
            let headers = headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                .collect();
            ajax.insert("headers".into(), Value::Object(headers));
        }
        if let Some(with_credentials) = self.with_credentials {
            ajax.insert("withCredentials".into(), Value::Bool(with_credentials));
        }
        if let Some(timeout) = self.timeout {
            ajax.insert("timeout".into(), Value::from(timeout.as_millis() as u64));
        }
        (!ajax.is_empty()).then_some(ajax)
    }
}

/// Options for opening a database.
///
/// Every field is optional; only the ones set reach the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbOptions {
    /// Storage adapter.
    pub adapter: Option<Adapter>,
    /// Basic-auth user name.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// HTTP transport tuning.
    pub ajax: AjaxOptions,
    /// Compact after every write.
    pub auto_compaction: Option<bool>,
    /// Maximum revisions kept per document.
    pub revs_limit: Option<u32>,
    /// Do not create the remote database if it is missing.
    pub skip_setup: Option<bool>,
}

impl DbOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the adapter.
    #[must_use]
    pub fn adapter(mut self, adapter: Adapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets HTTP caching.
    #[must_use]
    pub fn cache(mut self, value: bool) -> Self {
        self.ajax.cache = Some(value);
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ajax
            .headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Sets cross-origin credential sending.
    #[must_use]
    pub fn with_credentials(mut self, value: bool) -> Self {
        self.ajax.with_credentials = Some(value);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.ajax.timeout = Some(timeout);
        self
    }

    /// Sets auto compaction.
    #[must_use]
    pub fn auto_compaction(mut self, value: bool) -> Self {
        self.auto_compaction = Some(value);
        self
    }

    /// Sets the revision retention limit.
    #[must_use]
    pub fn revs_limit(mut self, limit: u32) -> Self {
        self.revs_limit = Some(limit);
        self
    }

    /// Sets the skip-setup flag.
    #[must_use]
    pub fn skip_setup(mut self, value: bool) -> Self {
        self.skip_setup = Some(value);
        self
    }

    /// Builds the store's option object.
    pub fn to_options(&self) -> Options {
        let mut options = Map::new();
        if let Some(adapter) = &self.adapter {
            options.insert("adapter".into(), Value::from(adapter.as_str()));
        }
        let mut auth = Map::new();
        if let Some(username) = &self.username {
            auth.insert("username".into(), Value::from(username.as_str()));
        }
        if let Some(password) = &self.password {
            auth.insert("password".into(), Value::from(password.as_str()));
        }
        if !auth.is_empty() {
            options.insert("auth".into(), Value::Object(auth));
        }
        if let Some(ajax) = self.ajax.to_options() {
            options.insert("ajax".into(), Value::Object(ajax));
        }
        if let Some(auto_compaction) = self.auto_compaction {
            options.insert("auto_compaction".into(), Value::Bool(auto_compaction));
        }
        if let Some(revs_limit) = self.revs_limit {
            options.insert("revs_limit".into(), Value::from(revs_limit));
        }
        if let Some(skip_setup) = self.skip_setup {
            options.insert("skip_setup".into(), Value::Bool(skip_setup));
        }
        options
    }
}
