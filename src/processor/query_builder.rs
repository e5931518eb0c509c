use lru::LruCache;

use crate::processor::aggregator::{AggregateRow, aggregate};
use crate::processor::ranker::{ScopedSelection, TopNSelection, top_n, top_n_scoped};
use crate::processor::record::{EmissionTable, RegionFilter};
use crate::processor::{GroupDim, Measure, ProcessorError, RankBy};
use std::cell::RefCell;

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub enum QueryKey {
    Aggregate {
        filter: RegionFilter,
        group_by: Vec<GroupDim>,
    },
    TopN {
        filter: RegionFilter,
        rank_by: RankBy,
        measure: Measure,
        n: usize,
        scope_by: Option<GroupDim>,
    },
}

use std::num::NonZeroUsize;
use std::rc::Rc;

/// LRU cache of query results for one table.
///
/// The cache remembers the table it was filled from; using it with a
/// different table (e.g. after a reload) empties it first.
#[derive(Debug)]
pub struct QueryCache {
    cache: RefCell<LruCache<QueryKey, QueryResult>>,
    bound: RefCell<Option<EmissionTable>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_capacity(NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            cache: RefCell::new(LruCache::new(capacity)),
            bound: RefCell::new(None),
        }
    }

    pub fn get(&self, table: &EmissionTable, key: &QueryKey) -> Option<QueryResult> {
        self.bind(table);
        self.cache.borrow_mut().get(key).cloned()
    }

    pub fn put(&self, table: &EmissionTable, key: QueryKey, value: QueryResult) {
        self.bind(table);
        self.cache.borrow_mut().put(key, value);
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
        self.bound.borrow_mut().take();
    }

    fn bind(&self, table: &EmissionTable) {
        let mut bound = self.bound.borrow_mut();
        let same = bound.as_ref().is_some_and(|b| b.same_rows(table));
        if !same {
            self.cache.borrow_mut().clear();
            *bound = Some(table.clone());
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Query results
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Grouped sums/means
    Aggregate(Vec<AggregateRow>),
    /// Global top-N
    TopN(TopNSelection),
    /// Top-N per outer group
    ScopedTopN(ScopedSelection),
}

/// Fluent front-end over the aggregator and ranker
///
/// ```rust
/// # use emissions_processor::processor::{GroupDim, Measure, RankBy, record::EmissionTable};
/// let table = EmissionTable::default();
/// let yearly = table.query().group_by(GroupDim::Year).execute().unwrap();
/// let top = table
///     .query()
///     .top(RankBy::Country, Measure::SumKilotons, 5)
///     .scoped_by(GroupDim::Region)
///     .execute()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: EmissionTable,
    cache: Option<Rc<QueryCache>>,
    filter: RegionFilter,
    group_by_columns: Vec<GroupDim>,
    rank: Option<(RankBy, Measure, usize)>,
    scope_by: Option<GroupDim>,
}

impl QueryBuilder {
    pub fn new(table: EmissionTable, cache: Option<Rc<QueryCache>>) -> Self {
        Self {
            table,
            cache,
            filter: RegionFilter::All,
            group_by_columns: Vec::new(),
            rank: None,
            scope_by: None,
        }
    }

    /// Restrict the query to one region
    pub fn region(mut self, filter: RegionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Add a single group-by dimension
    pub fn group_by(mut self, dim: GroupDim) -> Self {
        self.group_by_columns.push(dim);
        self
    }

    /// Add multiple group-by dimensions, outermost first
    pub fn group_by_multi(mut self, dims: &[GroupDim]) -> Self {
        self.group_by_columns.extend_from_slice(dims);
        self
    }

    /// Rank entities instead of returning every group
    pub fn top(mut self, rank_by: RankBy, measure: Measure, n: usize) -> Self {
        self.rank = Some((rank_by, measure, n));
        self
    }

    /// Rank within each group of `dim`
    pub fn scoped_by(mut self, dim: GroupDim) -> Self {
        self.scope_by = Some(dim);
        self
    }

    /// Disable caching
    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn execute(self) -> Result<QueryResult, ProcessorError> {
        let key = self.key()?;

        if let Some(cache) = &self.cache {
            if let Some(result) = cache.get(&self.table, &key) {
                return Ok(result);
            }
        }

        let table = self.table.filter_region(&self.filter);
        let result = match &key {
            QueryKey::Aggregate { group_by, .. } => QueryResult::Aggregate(aggregate(&table, group_by)?),
            QueryKey::TopN {
                rank_by,
                measure,
                n,
                scope_by: None,
                ..
            } => QueryResult::TopN(top_n(&table, *rank_by, *measure, *n)?),
            QueryKey::TopN {
                rank_by,
                measure,
                n,
                scope_by: Some(scope),
                ..
            } => QueryResult::ScopedTopN(top_n_scoped(&table, *rank_by, *measure, *n, *scope)?),
        };

        if let Some(cache) = &self.cache {
            cache.put(&self.table, key, result.clone());
        }
        Ok(result)
    }

    fn key(&self) -> Result<QueryKey, ProcessorError> {
        match (self.rank, self.group_by_columns.is_empty(), self.scope_by) {
            (None, _, None) => Ok(QueryKey::Aggregate {
                filter: self.filter.clone(),
                group_by: self.group_by_columns.clone(),
            }),
            (Some((rank_by, measure, n)), true, scope_by) => Ok(QueryKey::TopN {
                filter: self.filter.clone(),
                rank_by,
                measure,
                n,
                scope_by,
            }),
            (Some(_), false, _) => Err(ProcessorError::InvalidArgument(
                "group_by cannot be combined with top; use scoped_by".into(),
            )),
            (None, _, Some(_)) => Err(ProcessorError::InvalidArgument(
                "scoped_by requires top".into(),
            )),
        }
    }
}

impl EmissionTable {
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new(self.clone(), None)
    }

    pub fn query_with_cache(&self, cache: &Rc<QueryCache>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), Some(Rc::clone(cache)))
    }
}
