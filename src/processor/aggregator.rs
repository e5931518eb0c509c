use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::processor::{
    GroupDim, ProcessorError,
    record::{EmissionRecord, EmissionTable},
};

/// One component of a group key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// Region or country name
    Name(Arc<str>),
    Year(i32),
    Date(NaiveDate),
}

impl KeyPart {
    pub fn as_name(&self) -> Option<&Arc<str>> {
        match self {
            KeyPart::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_year(&self) -> Option<i32> {
        match self {
            KeyPart::Year(year) => Some(*year),
            KeyPart::Date(date) => Some(date.year()),
            KeyPart::Name(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            KeyPart::Date(date) => Some(*date),
            _ => None,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Name(name) => f.write_str(name),
            KeyPart::Year(year) => write!(f, "{year}"),
            KeyPart::Date(date) => write!(f, "{date}"),
        }
    }
}

/// Values of the grouping dimensions, in the order they were requested
pub type GroupKey = Vec<KeyPart>;

/// Sums and means of the two measures over one group. Missing (NaN)
/// measure values are skipped by both reductions.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: GroupKey,
    pub sum_kilotons: f64,
    /// NaN when no record of the group has a per-capita value
    pub mean_tons_per_capita: f64,
    /// Number of records in the group
    pub rows: usize,
    /// Records that contributed to `mean_tons_per_capita`
    pub per_capita_rows: usize,
}

impl AggregateRow {
    /// Name at key position `pos`, if that dimension is region or country
    pub fn name(&self, pos: usize) -> Option<&Arc<str>> {
        self.key.get(pos).and_then(KeyPart::as_name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Acc {
    sum_kilotons: f64,
    sum_per_capita: f64,
    per_capita_count: usize,
    count: usize,
}

impl Acc {
    /// Adds one record
    fn push_record(&mut self, kilotons: f64, per_capita: f64) {
        if !kilotons.is_nan() {
            self.sum_kilotons += kilotons;
        }
        if !per_capita.is_nan() {
            self.sum_per_capita += per_capita;
            self.per_capita_count += 1;
        }
        self.count += 1;
    }

    /// Adds an already reduced group
    fn push_row(&mut self, row: &AggregateRow) {
        if !row.sum_kilotons.is_nan() {
            self.sum_kilotons += row.sum_kilotons;
        }
        if row.per_capita_rows > 0 {
            self.sum_per_capita += row.mean_tons_per_capita * row.per_capita_rows as f64;
            self.per_capita_count += row.per_capita_rows;
        }
        self.count += row.rows;
    }

    fn finish(self, key: GroupKey) -> AggregateRow {
        AggregateRow {
            key,
            sum_kilotons: self.sum_kilotons,
            mean_tons_per_capita: if self.per_capita_count == 0 {
                f64::NAN
            } else {
                self.sum_per_capita / self.per_capita_count as f64
            },
            rows: self.count,
            per_capita_rows: self.per_capita_count,
        }
    }
}

/// Insertion-ordered accumulator map: groups come out in the order their
/// keys were first seen
#[derive(Debug, Default)]
struct Groups {
    index: HashMap<GroupKey, usize>,
    accs: Vec<(GroupKey, Acc)>,
}

impl Groups {
    fn entry(&mut self, key: GroupKey) -> &mut Acc {
        let idx = match self.index.get(&key).copied() {
            Some(i) => i,
            None => {
                let i = self.accs.len();
                self.index.insert(key.clone(), i);
                self.accs.push((key, Acc::default()));
                i
            }
        };
        &mut self.accs[idx].1
    }

    fn finish(self) -> Vec<AggregateRow> {
        self.accs
            .into_iter()
            .map(|(key, acc)| acc.finish(key))
            .collect()
    }
}

/// Groups `table` by `group_by` and reduces both measures per group:
/// sum of `kilotons_co2` and unweighted mean of `tons_per_capita`, both
/// over the non-NaN values only.
///
/// Rows come out in first-appearance order of their keys while scanning the
/// table; nothing is sorted. An empty table gives an empty result, an empty
/// `group_by` a single grand-total row.
///
/// # Errors
/// [`ProcessorError::MissingGroupKey`] if a record has an empty region or
/// country and that dimension is part of `group_by`.
///
/// # Example
/// ```rust
/// # use emissions_processor::processor::{GroupDim, aggregator::aggregate, record::EmissionTable};
/// let table = EmissionTable::default();
/// let rows = aggregate(&table, &[GroupDim::Region, GroupDim::Year]).unwrap();
/// assert!(rows.is_empty());
/// ```
pub fn aggregate(
    table: &EmissionTable,
    group_by: &[GroupDim],
) -> Result<Vec<AggregateRow>, ProcessorError> {
    let mut groups = Groups::default();

    for (row, record) in table.iter().enumerate() {
        let key = group_by
            .iter()
            .map(|dim| key_part(record, *dim, row))
            .collect::<Result<GroupKey, _>>()?;
        groups
            .entry(key)
            .push_record(record.kilotons_co2, record.tons_per_capita);
    }

    Ok(groups.finish())
}

/// Re-groups aggregated rows onto a subset of their key positions.
///
/// Sums add up and means are combined weighted by each row's count of
/// per-capita values, so the result equals aggregating the source table
/// directly by the kept dimensions.
pub fn reaggregate(
    rows: &[AggregateRow],
    keep: &[usize],
) -> Result<Vec<AggregateRow>, ProcessorError> {
    let mut groups = Groups::default();

    for row in rows {
        let key = keep
            .iter()
            .map(|&pos| {
                row.key.get(pos).cloned().ok_or_else(|| {
                    ProcessorError::InvalidArgument(format!(
                        "key position {} out of range for a {}-part key",
                        pos,
                        row.key.len()
                    ))
                })
            })
            .collect::<Result<GroupKey, _>>()?;
        groups.entry(key).push_row(row);
    }

    Ok(groups.finish())
}

fn key_part(record: &EmissionRecord, dim: GroupDim, row: usize) -> Result<KeyPart, ProcessorError> {
    let name = |value: &Arc<str>| {
        if value.trim().is_empty() {
            Err(ProcessorError::MissingGroupKey {
                row,
                dimension: dim,
            })
        } else {
            Ok(KeyPart::Name(Arc::clone(value)))
        }
    };

    match dim {
        GroupDim::Region => name(&record.region),
        GroupDim::Country => name(&record.country),
        GroupDim::Year => Ok(KeyPart::Year(record.year())),
        GroupDim::Date => Ok(KeyPart::Date(record.date)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::record::tests::record;

    fn table() -> EmissionTable {
        EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", 1.0, 0.1),
            record("Peru", "Americas", "2000-01-01", 2.0, 0.2),
            record("Brazil", "Americas", "2000-06-01", 10.0, 1.0),
            record("Chad", "Africa", "2001-01-01", 3.0, 0.3),
            record("Peru", "Americas", "2001-01-01", 4.0, 0.6),
        ])
    }

    fn names(rows: &[AggregateRow], pos: usize) -> Vec<String> {
        rows.iter().map(|r| r.key[pos].to_string()).collect()
    }

    #[test]
    fn test_region_totals_conserve_mass() {
        let table = table();
        let rows = aggregate(&table, &[GroupDim::Region]).unwrap();
        let total: f64 = rows.iter().map(|r| r.sum_kilotons).sum();
        assert_eq!(total, table.total_kilotons());
        assert_eq!(names(&rows, 0), vec!["Africa", "Americas"]);

        let americas = &rows[1];
        assert_eq!(americas.sum_kilotons, 16.0);
        assert_eq!(americas.rows, 3);
        assert!((americas.mean_tons_per_capita - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_table() {
        let rows = aggregate(&EmissionTable::default(), &[GroupDim::Country]).unwrap();
        assert!(rows.is_empty());
        let rows = aggregate(&EmissionTable::default(), &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_grand_total() {
        let rows = aggregate(&table(), &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].key.is_empty());
        assert_eq!(rows[0].sum_kilotons, 20.0);
    }

    #[test]
    fn test_year_groups_ignore_day() {
        let by_year = aggregate(&table(), &[GroupDim::Year]).unwrap();
        assert_eq!(names(&by_year, 0), vec!["2000", "2001"]);
        assert_eq!(by_year[0].sum_kilotons, 13.0);

        let by_date = aggregate(&table(), &[GroupDim::Date]).unwrap();
        assert_eq!(by_date.len(), 3);
        assert_eq!(by_date[1].key[0], KeyPart::Date(NaiveDate::from_ymd_opt(2000, 6, 1).unwrap()));
    }

    #[test]
    fn test_missing_group_key() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", 1.0, 0.1),
            record("Nowhere", "", "2000-01-01", 1.0, 0.1),
        ]);
        let err = aggregate(&table, &[GroupDim::Region]).unwrap_err();
        assert!(matches!(
            err,
            ProcessorError::MissingGroupKey {
                row: 1,
                dimension: GroupDim::Region
            }
        ));
        // The empty region only matters when grouping by region
        assert_eq!(aggregate(&table, &[GroupDim::Country]).unwrap().len(), 2);
    }

    #[test]
    fn test_regional_yearly_reaggregates_to_yearly() {
        let table = table();
        let regional_yearly = aggregate(&table, &[GroupDim::Year, GroupDim::Region]).unwrap();
        let yearly = aggregate(&table, &[GroupDim::Year]).unwrap();
        let rolled_up = reaggregate(&regional_yearly, &[0]).unwrap();

        assert_eq!(rolled_up.len(), yearly.len());
        for (a, b) in rolled_up.iter().zip(&yearly) {
            assert_eq!(a.key, b.key);
            assert!((a.sum_kilotons - b.sum_kilotons).abs() < 1e-9);
            assert!((a.mean_tons_per_capita - b.mean_tons_per_capita).abs() < 1e-12);
            assert_eq!(a.rows, b.rows);
        }
    }

    #[test]
    fn test_missing_measures_are_skipped() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", f64::NAN, 0.1),
            record("Kenya", "Africa", "2000-01-01", 4.0, f64::NAN),
            record("Chad", "Africa", "2001-01-01", 7.0, 0.3),
        ]);
        let rows = aggregate(&table, &[GroupDim::Region]).unwrap();
        assert_eq!(rows[0].sum_kilotons, 11.0);
        assert!((rows[0].mean_tons_per_capita - 0.2).abs() < 1e-12);
        assert_eq!(rows[0].rows, 3);
        assert_eq!(rows[0].per_capita_rows, 2);
    }

    #[test]
    fn test_all_missing_group() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", f64::NAN, f64::NAN),
            record("Peru", "Americas", "2000-01-01", 5.0, 1.0),
        ]);
        let rows = aggregate(&table, &[GroupDim::Country]).unwrap();
        assert_eq!(rows[0].sum_kilotons, 0.0);
        assert!(rows[0].mean_tons_per_capita.is_nan());
        assert_eq!(rows[0].per_capita_rows, 0);
    }

    #[test]
    fn test_reaggregate_with_missing_per_capita() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", 1.0, f64::NAN),
            record("Kenya", "Africa", "2000-01-01", 2.0, 0.4),
            record("Peru", "Americas", "2000-01-01", 3.0, 1.0),
            record("Brazil", "Americas", "2000-01-01", 4.0, 2.0),
        ]);
        let by_region = aggregate(&table, &[GroupDim::Year, GroupDim::Region]).unwrap();
        let rolled_up = reaggregate(&by_region, &[0]).unwrap();
        let direct = aggregate(&table, &[GroupDim::Year]).unwrap();

        assert_eq!(rolled_up[0].sum_kilotons, direct[0].sum_kilotons);
        assert!((rolled_up[0].mean_tons_per_capita - direct[0].mean_tons_per_capita).abs() < 1e-12);
        assert!((direct[0].mean_tons_per_capita - 3.4 / 3.0).abs() < 1e-12);
        assert_eq!(rolled_up[0].per_capita_rows, 3);
    }

    #[test]
    fn test_reaggregate_rejects_bad_position() {
        let rows = aggregate(&table(), &[GroupDim::Region]).unwrap();
        assert!(matches!(
            reaggregate(&rows, &[3]),
            Err(ProcessorError::InvalidArgument(_))
        ));
    }
}
