//! # Query Descriptions
//!
//! Purpose: Describe secondary-index (view) queries and structured statement
//! queries independently of any store.
//!
//! ## Design Principles
//! 1. **Builder Style**: `ViewQuery::new(design, view).stale(..).key(..)`
//!    mirrors how views are addressed on the cluster.
//! 2. **Explicit Promotion**: raw statement strings become [`N1qlQuery`] via
//!    `From`, so `query("SELECT ...")` and `query(view)` share one entry point.

use serde_json::Value;

/// Index freshness requested by a view query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stale {
    /// Serve whatever the index currently holds.
    Ok,
    /// Rebuild the index, then serve.
    Before,
    /// Serve the current index, then rebuild it.
    #[default]
    After,
}

/// A predicate-based query against one view of a design document.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub design: String,
    pub view: String,
    pub stale: Stale,
    pub include_docs: bool,
    pub key: Option<Value>,
    pub keys: Option<Vec<Value>>,
    pub start_key: Option<Value>,
    pub end_key: Option<Value>,
    pub inclusive_end: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl ViewQuery {
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        ViewQuery {
            design: design.into(),
            view: view.into(),
            stale: Stale::default(),
            include_docs: false,
            key: None,
            keys: None,
            start_key: None,
            end_key: None,
            inclusive_end: true,
            descending: false,
            skip: 0,
            limit: None,
        }
    }

    pub fn stale(mut self, stale: Stale) -> Self {
        self.stale = stale;
        self
    }

    pub fn include_docs(mut self, include: bool) -> Self {
        self.include_docs = include;
        self
    }

    /// Restricts rows to those emitted with exactly `key`.
    pub fn key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    pub fn keys(mut self, keys: Vec<Value>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn range(mut self, start: Option<Value>, end: Option<Value>, inclusive_end: bool) -> Self {
        self.start_key = start;
        self.end_key = end;
        self.inclusive_end = inclusive_end;
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A structured statement executed by the query service.
#[derive(Debug, Clone, PartialEq)]
pub struct N1qlQuery {
    pub statement: String,
}

impl N1qlQuery {
    pub fn from_string(statement: impl Into<String>) -> Self {
        N1qlQuery {
            statement: statement.into(),
        }
    }
}

/// Either kind of query accepted by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    View(ViewQuery),
    N1ql(N1qlQuery),
}

impl Query {
    /// Whether hits are read back by default when the caller did not say.
    pub fn populates_by_default(&self) -> bool {
        matches!(self, Query::View(_))
    }
}

impl From<ViewQuery> for Query {
    fn from(query: ViewQuery) -> Self {
        Query::View(query)
    }
}

impl From<N1qlQuery> for Query {
    fn from(query: N1qlQuery) -> Self {
        Query::N1ql(query)
    }
}

impl From<&str> for Query {
    fn from(statement: &str) -> Self {
        Query::N1ql(N1qlQuery::from_string(statement))
    }
}

impl From<String> for Query {
    fn from(statement: String) -> Self {
        Query::N1ql(N1qlQuery::from_string(statement))
    }
}

/// One view to bring up to date after a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewIndexRequest {
    pub design: String,
    pub view: String,
}

impl ViewIndexRequest {
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        ViewIndexRequest {
            design: design.into(),
            view: view.into(),
        }
    }

    /// Zero-result query that forces the index to rebuild before answering.
    pub fn forcing_query(&self) -> ViewQuery {
        ViewQuery::new(self.design.clone(), self.view.clone())
            .stale(Stale::Before)
            .include_docs(false)
            .key(Value::Array(Vec::new()))
    }
}
