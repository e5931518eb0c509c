use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;


use crate::processor::{
    GroupDim, Measure, ProcessorError, RankBy,
    aggregator::{AggregateRow, KeyPart, aggregate},
    record::EmissionTable,
};

/// An entity and its aggregated measure
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntity {
    pub entity: Arc<str>,
    pub value: f64,
}

/// Up to N entities, highest value first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopNSelection {
    pub entries: Vec<RankedEntity>,
}

impl TopNSelection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RankedEntity> {
        self.entries.iter()
    }

    /// Entity names in rank order
    pub fn entities(&self) -> Vec<Arc<str>> {
        self.entries.iter().map(|e| Arc::clone(&e.entity)).collect()
    }

    /// The selected entities as a set, for filtering the source table
    pub fn entity_set(&self) -> HashSet<Arc<str>> {
        self.entries.iter().map(|e| Arc::clone(&e.entity)).collect()
    }
}

/// One independent selection per outer group, scopes in first-appearance
/// order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopedSelection {
    pub scopes: Vec<(KeyPart, TopNSelection)>,
}

impl ScopedSelection {
    pub fn get(&self, scope: &KeyPart) -> Option<&TopNSelection> {
        self.scopes
            .iter()
            .find(|(key, _)| key == scope)
            .map(|(_, selection)| selection)
    }

    /// Selection for a named scope (region or country)
    pub fn get_named(&self, scope: &str) -> Option<&TopNSelection> {
        self.scopes
            .iter()
            .find(|(key, _)| key.as_name().is_some_and(|name| &**name == scope))
            .map(|(_, selection)| selection)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Selects the `n` entities with the highest `measure`
///
/// Entities are aggregated by `rank_by` (sum for kilotons, mean for per
/// capita) and stable-sorted descending, so equal values keep the order in
/// which the entities first appear in `table`. Fewer than `n` entities are
/// returned as-is.
///
/// # Example
/// ```rust
/// # use emissions_processor::processor::{Measure, RankBy, ranker::top_n, record::EmissionTable};
/// let top = top_n(&EmissionTable::default(), RankBy::Country, Measure::SumKilotons, 5).unwrap();
/// assert!(top.is_empty());
/// ```
pub fn top_n(
    table: &EmissionTable,
    rank_by: RankBy,
    measure: Measure,
    n: usize,
) -> Result<TopNSelection, ProcessorError> {
    check_n(n)?;
    let rows = aggregate(table, &[rank_by.into()])?;
    Ok(select(&rows, 0, measure, n))
}

/// Like [`top_n`], computed independently within each `scope_by` group
/// (e.g. the top countries of every region)
pub fn top_n_scoped(
    table: &EmissionTable,
    rank_by: RankBy,
    measure: Measure,
    n: usize,
    scope_by: GroupDim,
) -> Result<ScopedSelection, ProcessorError> {
    check_n(n)?;
    let rows = aggregate(table, &[scope_by, rank_by.into()])?;

    let mut index: HashMap<&KeyPart, usize> = HashMap::new();
    let mut partitions: Vec<(KeyPart, Vec<AggregateRow>)> = Vec::new();
    for row in &rows {
        let scope = &row.key[0];
        let idx = *index.entry(scope).or_insert_with(|| {
            partitions.push((scope.clone(), Vec::new()));
            partitions.len() - 1
        });
        partitions[idx].1.push(row.clone());
    }

    Ok(ScopedSelection {
        scopes: partitions
            .into_iter()
            .map(|(scope, rows)| (scope, select(&rows, 1, measure, n)))
            .collect(),
    })
}

fn check_n(n: usize) -> Result<(), ProcessorError> {
    if n == 0 {
        return Err(ProcessorError::InvalidArgument(
            "top-n count must be positive".into(),
        ));
    }
    Ok(())
}

fn select(rows: &[AggregateRow], entity_pos: usize, measure: Measure, n: usize) -> TopNSelection {
    let mut ranked: Vec<RankedEntity> = rows
        .iter()
        .filter_map(|row| {
            row.name(entity_pos).map(|entity| RankedEntity {
                entity: Arc::clone(entity),
                value: measure.of(row),
            })
        })
        .collect();

    // `sort_by` is stable: ties keep first-appearance order
    ranked.sort_by(|a, b| descending(a.value, b.value));
    ranked.truncate(n);

    TopNSelection { entries: ranked }
}

/// Descending order with NaN last
fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::record::tests::record;

    fn entities(selection: &TopNSelection) -> Vec<String> {
        selection.iter().map(|e| e.entity.to_string()).collect()
    }

    #[test]
    fn test_ties_keep_first_appearance() {
        let table = EmissionTable::from_records(vec![
            record("B", "Europe", "2000-01-01", 100.0, 1.0),
            record("A", "Europe", "2000-01-01", 100.0, 1.0),
            record("C", "Europe", "2000-01-01", 50.0, 1.0),
        ]);
        let top = top_n(&table, RankBy::Country, Measure::SumKilotons, 2).unwrap();
        assert_eq!(entities(&top), vec!["B", "A"]);

        let table = EmissionTable::from_records(vec![
            record("A", "Europe", "2000-01-01", 100.0, 1.0),
            record("B", "Europe", "2000-01-01", 100.0, 1.0),
            record("C", "Europe", "2000-01-01", 50.0, 1.0),
        ]);
        let top = top_n(&table, RankBy::Country, Measure::SumKilotons, 2).unwrap();
        assert_eq!(entities(&top), vec!["A", "B"]);
    }

    #[test]
    fn test_fewer_entities_than_n() {
        let table = EmissionTable::from_records(vec![
            record("A", "Europe", "2000-01-01", 1.0, 1.0),
            record("B", "Europe", "2000-01-01", 3.0, 1.0),
            record("C", "Asia", "2000-01-01", 2.0, 1.0),
            record("A", "Europe", "2001-01-01", 5.0, 1.0),
        ]);
        let top = top_n(&table, RankBy::Country, Measure::SumKilotons, 10).unwrap();
        assert_eq!(entities(&top), vec!["A", "B", "C"]);
        assert_eq!(top.entries[0].value, 6.0);
    }

    #[test]
    fn test_per_capita_uses_mean() {
        let table = EmissionTable::from_records(vec![
            record("A", "Europe", "2000-01-01", 1.0, 1.0),
            record("A", "Europe", "2001-01-01", 1.0, 3.0),
            record("B", "Europe", "2000-01-01", 1.0, 2.5),
        ]);
        let top = top_n(&table, RankBy::Country, Measure::MeanPerCapita, 1).unwrap();
        assert_eq!(entities(&top), vec!["B"]);
    }

    #[test]
    fn test_rank_regions() {
        let table = EmissionTable::from_records(vec![
            record("A", "Europe", "2000-01-01", 1.0, 1.0),
            record("B", "Asia", "2000-01-01", 4.0, 1.0),
            record("C", "Europe", "2000-01-01", 2.0, 1.0),
        ]);
        let top = top_n(&table, RankBy::Region, Measure::SumKilotons, 5).unwrap();
        assert_eq!(entities(&top), vec!["Asia", "Europe"]);
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let table = EmissionTable::from_records(
            (0..40)
                .map(|i| {
                    let country = format!("C{}", i % 9);
                    record(&country, "R", "2000-01-01", (i % 4) as f64, 1.0)
                })
                .collect(),
        );
        let first = top_n(&table, RankBy::Country, Measure::SumKilotons, 5).unwrap();
        let second = top_n(&table, RankBy::Country, Measure::SumKilotons, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scoped_one_per_region() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", 1.0, 0.1),
            record("Peru", "Americas", "2000-01-01", 2.0, 0.2),
            record("Brazil", "Americas", "2000-01-01", 10.0, 1.0),
            record("Egypt", "Africa", "2000-01-01", 3.0, 0.3),
            record("China", "Asia", "2000-01-01", 500.0, 3.0),
        ]);
        let scoped = top_n_scoped(
            &table,
            RankBy::Country,
            Measure::SumKilotons,
            1,
            GroupDim::Region,
        )
        .unwrap();

        assert_eq!(scoped.len(), 3);
        for (_, selection) in &scoped.scopes {
            assert_eq!(selection.len(), 1);
        }
        assert_eq!(entities(scoped.get_named("Africa").unwrap()), vec!["Egypt"]);
        assert_eq!(entities(scoped.get_named("Americas").unwrap()), vec!["Brazil"]);
        assert_eq!(entities(scoped.get_named("Asia").unwrap()), vec!["China"]);
        assert!(scoped.get_named("Europe").is_none());
    }

    #[test]
    fn test_zero_n_is_rejected() {
        let err = top_n(&EmissionTable::default(), RankBy::Country, Measure::SumKilotons, 0);
        assert!(matches!(err, Err(ProcessorError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_value_does_not_drop_entity() {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", f64::NAN, 0.1),
            record("Peru", "Americas", "2000-01-01", 5.0, 0.2),
            record("Chad", "Africa", "2001-01-01", 7.0, 0.1),
        ]);
        let top = top_n(&table, RankBy::Country, Measure::SumKilotons, 1).unwrap();
        assert_eq!(top.entries[0].entity.as_ref(), "Chad");
        assert_eq!(top.entries[0].value, 7.0);
    }

    #[test]
    fn test_nan_sorts_last() {
        assert_eq!(descending(f64::NAN, 1.0), Ordering::Greater);
        assert_eq!(descending(2.0, 1.0), Ordering::Less);
    }
}
