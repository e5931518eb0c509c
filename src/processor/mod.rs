use std::fmt;

use thiserror::Error;

pub mod aggregator;
pub mod export;
pub mod loader;
pub mod query_builder;
pub mod ranker;
pub mod record;
pub mod views;

/// Error type used across the crate
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Schema/parse error: {0}")]
    Parse(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Unparseable temporal field. Aborts the load.
    #[error("Malformed date at row {row}: {value:?}")]
    MalformedDate { row: usize, value: String },

    /// Non-numeric measure field. Aborts the load.
    #[error("Malformed measure in column '{column}' at row {row}: {value:?}")]
    MalformedMeasure {
        row: usize,
        column: String,
        value: String,
    },

    /// Empty grouping key encountered during aggregation. `row` is the
    /// position in the table that was aggregated, not the source line.
    #[error("Missing {dimension} group key at row {row}")]
    MissingGroupKey { row: usize, dimension: GroupDim },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow2::error::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Summary of a successful load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub rows_loaded: usize,
    pub regions: usize,
    pub countries: usize,
    pub first_date: Option<chrono::NaiveDate>,
    pub last_date: Option<chrono::NaiveDate>,
}

/// Grouping dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupDim {
    Region,
    Country,
    /// Calendar year derived from the record date
    Year,
    /// Full date granularity
    Date,
}

impl GroupDim {
    pub fn column_name(self) -> &'static str {
        match self {
            GroupDim::Region => "region",
            GroupDim::Country => "country",
            GroupDim::Year => "year",
            GroupDim::Date => "date",
        }
    }
}

impl fmt::Display for GroupDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Entity dimension a ranking is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankBy {
    Region,
    Country,
}

impl From<RankBy> for GroupDim {
    fn from(rank_by: RankBy) -> Self {
        match rank_by {
            RankBy::Region => GroupDim::Region,
            RankBy::Country => GroupDim::Country,
        }
    }
}

/// Measure reductions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    /// Sum of `kilotons_co2`
    SumKilotons,
    /// Unweighted mean of `tons_per_capita`
    MeanPerCapita,
}

impl Measure {
    pub fn column_name(self) -> &'static str {
        match self {
            Measure::SumKilotons => "sum_kilotons",
            Measure::MeanPerCapita => "mean_tons_per_capita",
        }
    }

    /// Picks this measure's value out of an aggregated row
    pub fn of(self, row: &aggregator::AggregateRow) -> f64 {
        match self {
            Measure::SumKilotons => row.sum_kilotons,
            Measure::MeanPerCapita => row.mean_tons_per_capita,
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}
