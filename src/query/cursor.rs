use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::projection::Projection;
use super::types::{Order, SortSpec, parse_sort};
use crate::errors::DbError;
use crate::value::compare::{compare_bson, values_equal};
use crate::value::path::candidates;

/// Produces a fresh snapshot of the matched documents each time it is called.
pub type DatasetFactory = Arc<dyn Fn() -> Result<Vec<Document>, DbError> + Send + Sync>;

/// A lazy, finite sequence of documents.
///
/// Nothing runs until the first `next`/`try_next`; at that point the factory is called once and
/// sort, skip, limit and projection are applied. Cloning yields an independent cursor that
/// re-runs the factory from scratch, and [`Cursor::rewind`] restarts this one.
///
/// The [`Iterator`] impl cannot report failures: a query error is logged and ends iteration.
/// Use [`Cursor::try_next`] or [`Cursor::to_vec`] to see the error.
pub struct Cursor {
    factory: DatasetFactory,
    sorts: Vec<Vec<SortSpec>>,
    skip: usize,
    limit: usize,
    projection: Option<Projection>,
    buffer: Option<VecDeque<Document>>,
}

impl Cursor {
    pub fn new(factory: DatasetFactory) -> Self {
        Self { factory, sorts: Vec::new(), skip: 0, limit: 0, projection: None, buffer: None }
    }

    /// A cursor over a fixed result set, such as aggregation output.
    pub fn from_documents(docs: Vec<Document>) -> Self {
        let docs = Arc::new(docs);
        Self::new(Arc::new(move || Ok(docs.as_ref().clone())))
    }

    /// Sorts by the given keys, first key outermost. Chained calls re-sort the previous order,
    /// so the key applied last becomes the outermost.
    #[must_use]
    pub fn sort(mut self, keys: Vec<SortSpec>) -> Self {
        if !keys.is_empty() {
            self.sorts.push(keys);
        }
        self
    }

    /// # Errors
    /// See [`parse_sort`].
    pub fn sort_by(self, spec: &Document) -> Result<Self, DbError> {
        let keys = parse_sort(spec)?;
        Ok(self.sort(keys))
    }

    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Zero means unbounded.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }

    #[must_use]
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Forgets any buffered results; the next read re-runs the query.
    pub fn rewind(&mut self) {
        self.buffer = None;
    }

    /// True until the cursor has been started and drained.
    #[must_use]
    pub fn alive(&self) -> bool {
        self.buffer.as_ref().is_none_or(|b| !b.is_empty())
    }

    fn sorted_snapshot(&self) -> Result<Vec<Document>, DbError> {
        let mut docs = (self.factory)()?;
        for keys in &self.sorts {
            docs.sort_by(|a, b| compare_for_sort(a, b, keys));
        }
        Ok(docs)
    }

    fn window<T>(&self, items: Vec<T>) -> Vec<T> {
        let take = if self.limit == 0 { usize::MAX } else { self.limit };
        items.into_iter().skip(self.skip).take(take).collect()
    }

    fn materialize(&mut self) -> Result<&mut VecDeque<Document>, DbError> {
        if self.buffer.is_none() {
            let docs = self.window(self.sorted_snapshot()?);
            let docs: VecDeque<Document> = match &self.projection {
                Some(p) => docs.iter().map(|d| p.apply(d)).collect(),
                None => docs.into(),
            };
            self.buffer = Some(docs);
        }
        Ok(self.buffer.get_or_insert_with(VecDeque::new))
    }

    /// # Errors
    /// Whatever the underlying query raised when it first ran.
    pub fn try_next(&mut self) -> Result<Option<Document>, DbError> {
        Ok(self.materialize()?.pop_front())
    }

    /// Drains the remaining documents.
    ///
    /// # Errors
    /// See [`Cursor::try_next`].
    pub fn to_vec(mut self) -> Result<Vec<Document>, DbError> {
        Ok(self.materialize()?.drain(..).collect())
    }

    /// Counts matches from scratch, ignoring skip/limit unless asked.
    ///
    /// # Errors
    /// See [`Cursor::try_next`].
    pub fn count(&self, with_limit_and_skip: bool) -> Result<usize, DbError> {
        let docs = (self.factory)()?;
        Ok(if with_limit_and_skip { self.window(docs).len() } else { docs.len() })
    }

    /// Distinct values of `key` across the cursor's documents; array values contribute their
    /// elements.
    ///
    /// # Errors
    /// See [`Cursor::try_next`].
    pub fn distinct(&self, key: &str) -> Result<Vec<Bson>, DbError> {
        let docs = self.window(self.sorted_snapshot()?);
        Ok(distinct_values(&docs, key))
    }
}

pub(crate) fn distinct_values(docs: &[Document], key: &str) -> Vec<Bson> {
    let mut out: Vec<Bson> = Vec::new();
    let mut push = |v: &Bson| {
        if !out.iter().any(|seen| values_equal(seen, v)) {
            out.push(v.clone());
        }
    };
    for doc in docs {
        for cand in candidates(doc, key).into_iter().flatten() {
            match cand {
                Bson::Array(items) => items.iter().for_each(&mut push),
                other => push(other),
            }
        }
    }
    out
}

/// The value a document sorts by for one key: arrays contribute their smallest element
/// ascending and their largest descending. `None` (missing) sorts before everything.
fn sort_value<'a>(doc: &'a Document, field: &str, order: Order) -> Option<&'a Bson> {
    let mut flat: Vec<&Bson> = Vec::new();
    for cand in candidates(doc, field).into_iter().flatten() {
        match cand {
            Bson::Array(items) if !items.is_empty() => flat.extend(items.iter()),
            other => flat.push(other),
        }
    }
    match order {
        Order::Asc => flat.into_iter().min_by(|a, b| compare_bson(a, b)),
        Order::Desc => flat.into_iter().max_by(|a, b| compare_bson(a, b)),
    }
}

pub(crate) fn compare_for_sort(a: &Document, b: &Document, keys: &[SortSpec]) -> Ordering {
    for key in keys {
        let ord = match (sort_value(a, &key.field, key.order), sort_value(b, &key.field, key.order)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_bson(x, y),
        };
        let ord = if key.order == Order::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl Clone for Cursor {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            sorts: self.sorts.clone(),
            skip: self.skip,
            limit: self.limit,
            projection: self.projection.clone(),
            buffer: None,
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("sorts", &self.sorts)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("started", &self.buffer.is_some())
            .finish_non_exhaustive()
    }
}

/// Errors end the iteration; see [`Cursor::try_next`] for the fallible form.
impl Iterator for Cursor {
    type Item = Document;
    fn next(&mut self) -> Option<Self::Item> {
        match self.try_next() {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("cursor aborted: {e}");
                self.buffer = Some(VecDeque::new());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn cursor(docs: Vec<Document>) -> Cursor {
        Cursor::from_documents(docs)
    }

    fn ids(c: Cursor) -> Vec<i32> {
        c.map(|d| d.get_i32("_id").unwrap()).collect()
    }

    #[test]
    fn sort_skip_limit() {
        let docs = (1..=5).map(|i| doc! {"_id": i, "v": 10 - i}).collect();
        let c = cursor(docs).sort(vec![SortSpec::asc("v")]).skip(1).limit(2);
        assert_eq!(ids(c), vec![4, 3]);
    }

    #[test]
    fn last_sort_is_outermost_and_stable() {
        let docs = vec![
            doc! {"_id": 1, "a": 2, "b": 1},
            doc! {"_id": 2, "a": 1, "b": 1},
            doc! {"_id": 3, "a": 1, "b": 0},
        ];
        let c = cursor(docs).sort(vec![SortSpec::asc("a")]).sort(vec![SortSpec::asc("b")]);
        assert_eq!(ids(c), vec![3, 2, 1]);
    }

    #[test]
    fn missing_sorts_before_null_and_arrays_use_extremes() {
        let docs = vec![
            doc! {"_id": 1, "v": [5, 1]},
            doc! {"_id": 2, "v": Bson::Null},
            doc! {"_id": 3},
            doc! {"_id": 4, "v": 3},
        ];
        assert_eq!(ids(cursor(docs.clone()).sort(vec![SortSpec::asc("v")])), vec![3, 2, 1, 4]);
        assert_eq!(ids(cursor(docs).sort(vec![SortSpec::desc("v")])), vec![1, 4, 2, 3]);
    }

    #[test]
    fn exhausted_cursor_stays_exhausted_but_clone_restarts() {
        let mut c = cursor(vec![doc! {"_id": 1}]);
        let fresh = c.clone();
        assert!(c.next().is_some());
        assert!(c.next().is_none());
        assert!(c.next().is_none());
        assert!(!c.alive());
        assert_eq!(Cursor::count(&fresh, true).unwrap(), 1);
        assert_eq!(ids(fresh), vec![1]);
    }

    #[test]
    fn factory_errors_surface_through_try_next() {
        let mut c = Cursor::new(Arc::new(|| Err(DbError::operation_failure(2, "boom"))));
        assert!(c.try_next().is_err());
        assert!(c.next().is_none());
        assert!(!c.alive());
    }

    #[test]
    fn rewind_reruns_the_factory() {
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = runs.clone();
        let mut c = Cursor::new(Arc::new(move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![doc! {"_id": i32::try_from(n).unwrap()}])
        }));
        assert_eq!(c.next().unwrap(), doc! {"_id": 0});
        assert!(c.next().is_none());
        c.rewind();
        assert!(c.alive());
        assert_eq!(c.next().unwrap(), doc! {"_id": 1});
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_flattens_arrays() {
        let docs = vec![doc! {"t": ["a", "b"]}, doc! {"t": "a"}, doc! {"t": 1}, doc! {"t": 1.0}];
        assert_eq!(cursor(docs).distinct("t").unwrap(), vec![Bson::from("a"), Bson::from("b"), Bson::Int32(1)]);
    }
}
