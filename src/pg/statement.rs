//! Prepared statement management and caching.
//!
//! - `PreparedStatement`: a server-side prepared statement with its
//!   parameter types and result columns
//! - `StatementCache`: per-connection LRU cache keyed by SQL text

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::protocol::FieldDescription;
use super::types::Oid;

/// Column descriptions shared between a cached statement and its results.
pub type SharedColumns = Arc<Vec<FieldDescription>>;

/// Default number of statements kept per connection.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement that has been parsed and described by the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name (e.g. "pgprobe_s0")
    pub name: String,
    pub query: String,
    /// From ParameterDescription
    pub param_types: Vec<Oid>,
    /// From RowDescription; empty when the statement returns no rows
    pub columns: SharedColumns,
}

impl PreparedStatement {
    pub fn new(name: String, query: String) -> Self {
        Self {
            name,
            query,
            param_types: Vec::new(),
            columns: Arc::new(Vec::new()),
        }
    }

    pub fn set_param_types(&mut self, types: Vec<Oid>) {
        self.param_types = types;
    }

    pub fn set_columns(&mut self, columns: Vec<FieldDescription>) {
        self.columns = Arc::new(columns);
    }

    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

// ============================================================================
// Statement Cache (O(1) LRU)
// ============================================================================

/// LRU cache of prepared statements for one connection.
///
/// Inserting past capacity evicts the least recently used statement and
/// hands its name back so the caller can close it on the server.
pub struct StatementCache {
    cache: LruCache<String, Arc<PreparedStatement>>,
    next_id: u32,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            next_id: 0,
        }
    }

    /// Look up a statement and mark it as recently used.
    pub fn get(&mut self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.get(query).map(Arc::clone)
    }

    #[inline]
    pub fn contains(&self, query: &str) -> bool {
        self.cache.contains(query)
    }

    /// Insert a statement, returning the name of the statement it displaced:
    /// either the LRU entry evicted for room or an older entry for the same SQL.
    pub fn insert(&mut self, statement: Arc<PreparedStatement>) -> Option<String> {
        let query = statement.query.clone();
        self.cache
            .push(query, statement)
            .map(|(_, displaced)| displaced.name.clone())
    }

    pub fn remove(&mut self, query: &str) -> Option<Arc<PreparedStatement>> {
        self.cache.pop(query)
    }

    /// Generate a statement name unique to this connection.
    pub fn next_statement_name(&mut self) -> String {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        format!("pgprobe_s{id}")
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
