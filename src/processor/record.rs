use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

/// One row of the canonical emissions table
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionRecord {
    pub country: Arc<str>,
    pub region: Arc<str>,
    pub date: NaiveDate,
    pub kilotons_co2: f64,
    pub tons_per_capita: f64,
}

impl EmissionRecord {
    pub fn year(&self) -> i32 {
        self.date.year()
    }
}

/// Immutable, date-ordered sequence of records.
///
/// Cloning is cheap: the rows live behind an `Arc` and are never mutated,
/// every filter produces a new table.
#[derive(Debug, Clone, Default)]
pub struct EmissionTable {
    records: Arc<[EmissionRecord]>,
}

impl EmissionTable {
    /// Wraps records that are already in canonical order
    pub fn from_sorted(records: Vec<EmissionRecord>) -> Self {
        EmissionTable {
            records: records.into(),
        }
    }

    /// Builds a table from rows in arbitrary order, applying the
    /// canonical stable date sort
    pub fn from_records(mut records: Vec<EmissionRecord>) -> Self {
        records.sort_by_key(|r| r.date);
        Self::from_sorted(records)
    }

    pub fn records(&self) -> &[EmissionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EmissionRecord> {
        self.records.iter()
    }

    /// Narrows the table to one region. `RegionFilter::All` shares the
    /// underlying rows; an unknown region yields an empty table.
    pub fn filter_region(&self, filter: &RegionFilter) -> EmissionTable {
        match filter {
            RegionFilter::All => self.clone(),
            RegionFilter::Region(name) => self.filter(|r| *r.region == **name),
        }
    }

    /// Keeps only rows whose country is in `countries`
    pub fn filter_countries(&self, countries: &HashSet<Arc<str>>) -> EmissionTable {
        self.filter(|r| countries.contains(&r.country))
    }

    pub fn filter<F>(&self, predicate: F) -> EmissionTable
    where
        F: Fn(&EmissionRecord) -> bool,
    {
        EmissionTable::from_sorted(
            self.records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        )
    }

    /// Distinct non-empty regions in first-appearance order
    pub fn regions(&self) -> Vec<Arc<str>> {
        distinct(self.records.iter().map(|r| &r.region))
    }

    /// Distinct non-empty countries in first-appearance order
    pub fn countries(&self) -> Vec<Arc<str>> {
        distinct(self.records.iter().map(|r| &r.country))
    }

    /// Whether both handles share the same underlying rows
    pub fn same_rows(&self, other: &EmissionTable) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }

    /// Sum of `kilotons_co2`, missing values skipped
    pub fn total_kilotons(&self) -> f64 {
        self.records
            .iter()
            .map(|r| r.kilotons_co2)
            .filter(|kt| !kt.is_nan())
            .sum()
    }
}

impl<'a> IntoIterator for &'a EmissionTable {
    type Item = &'a EmissionRecord;
    type IntoIter = std::slice::Iter<'a, EmissionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a Arc<str>>) -> Vec<Arc<str>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if !v.is_empty() && seen.insert(&**v) {
            out.push(Arc::clone(v));
        }
    }
    out
}

/// Externally supplied region selection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RegionFilter {
    /// No filter, every region
    #[default]
    All,
    Region(Arc<str>),
}

impl RegionFilter {
    /// Maps a selection label onto a filter. The sentinel label (e.g.
    /// `World`) means no filter; any other value selects that region,
    /// whether or not it exists in the data.
    pub fn from_selection(selection: &str, all_label: &str) -> Self {
        if selection == all_label {
            RegionFilter::All
        } else {
            RegionFilter::Region(Arc::from(selection))
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RegionFilter::All)
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionFilter::All => f.write_str("<all regions>"),
            RegionFilter::Region(name) => f.write_str(name),
        }
    }
}
