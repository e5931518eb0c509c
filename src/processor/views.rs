//! Named views handed to the presentation layer.
//!
//! Every view is derived from the canonical table narrowed by the current
//! [`RegionFilter`]. Views are independent: one failing is logged and
//! recorded in the [`ViewSet`], the others are still computed.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::processor::{
    GroupDim, Measure, ProcessorError, RankBy,
    aggregator::{AggregateRow, aggregate},
    ranker::{ScopedSelection, TopNSelection, top_n, top_n_scoped},
    record::{EmissionTable, RegionFilter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewName {
    Headline,
    RegionalTotals,
    YearlyTotals,
    RegionalYearlyTotals,
    CountryTotals,
    Choropleth,
    RegionCountryTreemap,
    TopEmitters,
    TopEmittersPerCapita,
    TopEmittersByRegion,
    TopEmittersPerCapitaByRegion,
    TopEmittersSeries,
    TopEmittersPerCapitaSeries,
}

impl ViewName {
    pub const ALL: [ViewName; 13] = [
        ViewName::Headline,
        ViewName::RegionalTotals,
        ViewName::YearlyTotals,
        ViewName::RegionalYearlyTotals,
        ViewName::CountryTotals,
        ViewName::Choropleth,
        ViewName::RegionCountryTreemap,
        ViewName::TopEmitters,
        ViewName::TopEmittersPerCapita,
        ViewName::TopEmittersByRegion,
        ViewName::TopEmittersPerCapitaByRegion,
        ViewName::TopEmittersSeries,
        ViewName::TopEmittersPerCapitaSeries,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewName::Headline => "headline",
            ViewName::RegionalTotals => "regional_totals",
            ViewName::YearlyTotals => "yearly_totals",
            ViewName::RegionalYearlyTotals => "regional_yearly_totals",
            ViewName::CountryTotals => "country_totals",
            ViewName::Choropleth => "choropleth",
            ViewName::RegionCountryTreemap => "region_country_treemap",
            ViewName::TopEmitters => "top_emitters",
            ViewName::TopEmittersPerCapita => "top_emitters_per_capita",
            ViewName::TopEmittersByRegion => "top_emitters_by_region",
            ViewName::TopEmittersPerCapitaByRegion => "top_emitters_per_capita_by_region",
            ViewName::TopEmittersSeries => "top_emitters_series",
            ViewName::TopEmittersPerCapitaSeries => "top_emitters_per_capita_series",
        }
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headline figures for the current selection
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlineRow {
    /// Region name, or the all-regions label
    pub scope: Arc<str>,
    pub sum_kilotons: f64,
    /// Mean of the per-region means
    pub mean_tons_per_capita: f64,
}

/// One point of a top-N time series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub entity: Arc<str>,
    pub value: f64,
}

/// Computed contents of a view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewTable {
    Headline(Vec<HeadlineRow>),
    Totals {
        dims: Vec<GroupDim>,
        rows: Vec<AggregateRow>,
    },
    TopN {
        measure: Measure,
        selection: TopNSelection,
    },
    ScopedTopN {
        measure: Measure,
        selection: ScopedSelection,
    },
    Series {
        measure: Measure,
        points: Vec<SeriesPoint>,
    },
}

impl ViewTable {
    /// Number of output rows
    pub fn len(&self) -> usize {
        match self {
            ViewTable::Headline(rows) => rows.len(),
            ViewTable::Totals { rows, .. } => rows.len(),
            ViewTable::TopN { selection, .. } => selection.len(),
            ViewTable::ScopedTopN { selection, .. } => {
                selection.scopes.iter().map(|(_, s)| s.len()).sum()
            }
            ViewTable::Series { points, .. } => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum ViewOutcome {
    Ready(ViewTable),
    Failed(ProcessorError),
}

/// All views for one region selection
#[derive(Debug)]
pub struct ViewSet {
    pub filter: RegionFilter,
    pub views: Vec<(ViewName, ViewOutcome)>,
}

impl ViewSet {
    pub fn outcome(&self, name: ViewName) -> Option<&ViewOutcome> {
        self.views
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, outcome)| outcome)
    }

    /// The view's table, `None` if it failed
    pub fn get(&self, name: ViewName) -> Option<&ViewTable> {
        match self.outcome(name) {
            Some(ViewOutcome::Ready(table)) => Some(table),
            _ => None,
        }
    }

    pub fn ready(&self) -> impl Iterator<Item = (ViewName, &ViewTable)> {
        self.views.iter().filter_map(|(name, outcome)| match outcome {
            ViewOutcome::Ready(table) => Some((*name, table)),
            ViewOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (ViewName, &ProcessorError)> {
        self.views.iter().filter_map(|(name, outcome)| match outcome {
            ViewOutcome::Failed(err) => Some((*name, err)),
            ViewOutcome::Ready(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSettings {
    /// Entities kept by every top-N view
    pub top_n: usize,
    /// Selection label meaning "no region filter"
    pub all_label: String,
    /// Compute views on the rayon pool
    pub parallel: bool,
}

impl Default for ViewSettings {
    fn default() -> Self {
        ViewSettings {
            top_n: 5,
            all_label: "World".to_string(),
            parallel: true,
        }
    }
}

/// Builds the named views from the canonical table
#[derive(Debug, Clone)]
pub struct ViewAssembler {
    table: EmissionTable,
    settings: ViewSettings,
}

impl ViewAssembler {
    pub fn new(table: EmissionTable, settings: ViewSettings) -> Self {
        ViewAssembler { table, settings }
    }

    pub fn table(&self) -> &EmissionTable {
        &self.table
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    /// Selectable options: the all-regions label, then every region in
    /// first-appearance order
    pub fn regions(&self) -> Vec<String> {
        std::iter::once(self.settings.all_label.clone())
            .chain(self.table.regions().iter().map(|r| r.to_string()))
            .collect()
    }

    /// Maps a selection label onto a filter
    pub fn filter_for(&self, selection: &str) -> RegionFilter {
        RegionFilter::from_selection(selection, &self.settings.all_label)
    }

    /// Computes every view for `filter`
    pub fn assemble(&self, filter: &RegionFilter) -> ViewSet {
        let filtered = self.table.filter_region(filter);

        let compute = |name: ViewName| {
            let outcome = match self.compute(name, &filtered, filter) {
                Ok(table) => {
                    debug!(view = name.as_str(), rows = table.len(), "view ready");
                    ViewOutcome::Ready(table)
                }
                Err(err) => {
                    warn!(view = name.as_str(), %filter, error = %err, "view computation failed");
                    ViewOutcome::Failed(err)
                }
            };
            (name, outcome)
        };

        let views: Vec<(ViewName, ViewOutcome)> = if self.settings.parallel {
            ViewName::ALL.par_iter().map(|name| compute(*name)).collect()
        } else {
            ViewName::ALL.iter().map(|name| compute(*name)).collect()
        };

        ViewSet {
            filter: filter.clone(),
            views,
        }
    }

    /// Computes a single view for `filter`
    pub fn view(&self, name: ViewName, filter: &RegionFilter) -> Result<ViewTable, ProcessorError> {
        self.compute(name, &self.table.filter_region(filter), filter)
    }

    fn compute(
        &self,
        name: ViewName,
        filtered: &EmissionTable,
        filter: &RegionFilter,
    ) -> Result<ViewTable, ProcessorError> {
        let n = self.settings.top_n;
        let totals = |dims: &[GroupDim]| -> Result<ViewTable, ProcessorError> {
            Ok(ViewTable::Totals {
                dims: dims.to_vec(),
                rows: aggregate(filtered, dims)?,
            })
        };

        match name {
            ViewName::Headline => self.headline(filtered, filter),
            ViewName::RegionalTotals => totals(&[GroupDim::Region]),
            ViewName::YearlyTotals => totals(&[GroupDim::Year]),
            ViewName::RegionalYearlyTotals => totals(&[GroupDim::Year, GroupDim::Region]),
            ViewName::CountryTotals | ViewName::Choropleth => totals(&[GroupDim::Country]),
            ViewName::RegionCountryTreemap => totals(&[GroupDim::Region, GroupDim::Country]),
            ViewName::TopEmitters => ranking(filtered, Measure::SumKilotons, n),
            ViewName::TopEmittersPerCapita => ranking(filtered, Measure::MeanPerCapita, n),
            ViewName::TopEmittersByRegion => scoped_ranking(filtered, Measure::SumKilotons, n),
            ViewName::TopEmittersPerCapitaByRegion => {
                scoped_ranking(filtered, Measure::MeanPerCapita, n)
            }
            ViewName::TopEmittersSeries => series(filtered, Measure::SumKilotons, n),
            ViewName::TopEmittersPerCapitaSeries => series(filtered, Measure::MeanPerCapita, n),
        }
    }

    fn headline(
        &self,
        filtered: &EmissionTable,
        filter: &RegionFilter,
    ) -> Result<ViewTable, ProcessorError> {
        if filtered.is_empty() {
            return Ok(ViewTable::Headline(Vec::new()));
        }

        let regions = aggregate(filtered, &[GroupDim::Region])?;
        // Regions without any per-capita value do not count
        let means: Vec<f64> = regions
            .iter()
            .map(|r| r.mean_tons_per_capita)
            .filter(|m| !m.is_nan())
            .collect();
        let mean_of_means = if means.is_empty() {
            f64::NAN
        } else {
            means.iter().sum::<f64>() / means.len() as f64
        };

        let scope: Arc<str> = match filter {
            RegionFilter::All => Arc::from(self.settings.all_label.as_str()),
            RegionFilter::Region(name) => Arc::clone(name),
        };

        Ok(ViewTable::Headline(vec![HeadlineRow {
            scope,
            sum_kilotons: filtered.total_kilotons(),
            mean_tons_per_capita: mean_of_means,
        }]))
    }
}

fn ranking(table: &EmissionTable, measure: Measure, n: usize) -> Result<ViewTable, ProcessorError> {
    Ok(ViewTable::TopN {
        measure,
        selection: top_n(table, RankBy::Country, measure, n)?,
    })
}

fn scoped_ranking(
    table: &EmissionTable,
    measure: Measure,
    n: usize,
) -> Result<ViewTable, ProcessorError> {
    Ok(ViewTable::ScopedTopN {
        measure,
        selection: top_n_scoped(table, RankBy::Country, measure, n, GroupDim::Region)?,
    })
}

/// Per-date values of the top-`n` countries by `measure`
fn series(table: &EmissionTable, measure: Measure, n: usize) -> Result<ViewTable, ProcessorError> {
    let top = top_n(table, RankBy::Country, measure, n)?;
    let subset = table.filter_countries(&top.entity_set());
    let rows = aggregate(&subset, &[GroupDim::Date, GroupDim::Country])?;

    let points = rows
        .iter()
        .filter_map(|row| {
            Some(SeriesPoint {
                date: row.key.first()?.as_date()?,
                entity: Arc::clone(row.name(1)?),
                value: measure.of(row),
            })
        })
        .collect();

    Ok(ViewTable::Series { measure, points })
}
