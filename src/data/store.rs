//! Record stores
//!
//! A [`DataStore`] lists the identifier universe and fetches raw records by
//! identifier. Implementations are expected to return records in request
//! order, but the partitioner never relies on it: it re-sorts every fetch
//! against the request list.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Sort direction for identifier listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// Sort key for identifier listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Dotted field path (e.g. `"date.year"`)
    pub field: String,
    /// Direction
    #[serde(default)]
    pub order: SortOrder,
}

/// Filter/sort/limit applied when listing identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    /// Field-equality filter; every entry must match
    pub filter: Option<Map<String, Value>>,
    /// Sort applied before `limit`
    pub sort: Option<SortSpec>,
    /// Maximum number of identifiers
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Require `field == value`.
    #[must_use]
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter
            .get_or_insert_with(Map::new)
            .insert(field.into(), value.into());
        self
    }

    /// Sort by a field.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            order,
        });
        self
    }

    /// Cap the number of identifiers.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Backing store for raw records.
pub trait DataStore {
    /// Opaque, stable, comparable record key
    type Id: Clone + Eq + Hash + Debug;
    /// Raw record as stored
    type Record;

    /// List identifiers matching `query`, in store order (or sorted).
    ///
    /// # Errors
    ///
    /// Returns `Error::DataFetch` if the store is unavailable.
    fn list_identifiers(&self, query: &ListQuery) -> Result<Vec<Self::Id>>;

    /// Fetch records for `ids`, each paired with its identifier.
    ///
    /// Should return them in the order of `ids`; unknown ids are omitted.
    ///
    /// # Errors
    ///
    /// Returns `Error::DataFetch` if the store is unavailable.
    fn fetch_by_identifiers(&self, ids: &[Self::Id]) -> Result<Vec<(Self::Id, Self::Record)>>;
}

/// In-memory record store using a lock-free concurrent hashmap.
///
/// Records keep their insertion sequence. Like a database `$in` query,
/// [`fetch_by_identifiers`](DataStore::fetch_by_identifiers) answers in
/// *storage* order rather than request order.
pub struct MemoryDataStore<K, R>
where
    K: Eq + Hash,
{
    records: DashMap<K, (u64, R)>,
    next_seq: AtomicU64,
}

impl<K, R> MemoryDataStore<K, R>
where
    K: Clone + Eq + Hash + Debug,
    R: Clone + Serialize,
{
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Create a store from `(id, record)` pairs, keeping their order.
    #[must_use]
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, R)>,
    {
        let store = Self::new();
        for (id, record) in records {
            store.insert(id, record);
        }
        store
    }

    /// Insert or replace a record. Replacing keeps the original position.
    pub fn insert(&self, id: K, record: R) {
        if let Some(mut existing) = self.records.get_mut(&id) {
            existing.1 = record;
            return;
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.records.insert(id, (seq, record));
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn in_storage_order(&self) -> Vec<(u64, K, R)> {
        let mut rows: Vec<(u64, K, R)> = self
            .records
            .iter()
            .map(|entry| {
                let (seq, record) = entry.value();
                (*seq, entry.key().clone(), record.clone())
            })
            .collect();
        rows.sort_by_key(|(seq, _, _)| *seq);
        rows
    }
}

impl<K, R> Default for MemoryDataStore<K, R>
where
    K: Clone + Eq + Hash + Debug,
    R: Clone + Serialize,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, R> DataStore for MemoryDataStore<K, R>
where
    K: Clone + Eq + Hash + Debug,
    R: Clone + Serialize,
{
    type Id = K;
    type Record = R;

    fn list_identifiers(&self, query: &ListQuery) -> Result<Vec<K>> {
        let needs_document = query.filter.is_some() || query.sort.is_some();

        let mut rows: Vec<(K, Option<Value>)> = Vec::with_capacity(self.len());
        for (_, id, record) in self.in_storage_order() {
            let document = if needs_document {
                Some(serde_json::to_value(&record)?)
            } else {
                None
            };
            if let (Some(filter), Some(doc)) = (&query.filter, &document) {
                if !matches_filter(doc, filter) {
                    continue;
                }
            }
            rows.push((id, document));
        }

        if let Some(sort) = &query.sort {
            rows.sort_by(|a, b| {
                let ordering = compare_fields(
                    a.1.as_ref().and_then(|d| lookup(d, &sort.field)),
                    b.1.as_ref().and_then(|d| lookup(d, &sort.field)),
                );
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let mut ids: Vec<K> = rows.into_iter().map(|(id, _)| id).collect();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn fetch_by_identifiers(&self, ids: &[K]) -> Result<Vec<(K, R)>> {
        let wanted: FxHashSet<&K> = ids.iter().collect();
        Ok(self
            .in_storage_order()
            .into_iter()
            .filter(|(_, id, _)| wanted.contains(id))
            .map(|(_, id, record)| (id, record))
            .collect())
    }
}

/// Resolve a dotted path inside a JSON document.
fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |value, key| value.get(key))
}

fn matches_filter(document: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(path, expected)| lookup(document, path) == Some(expected))
}

/// Missing fields sort first; numbers compare numerically, strings lexically.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
