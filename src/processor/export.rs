//! Stable, column-oriented renditions of the views: Arrow chunks, Parquet
//! files and JSON records.

use arrow2::{
    array::{Array, Float64Array, Int32Array, Utf8Array},
    chunk::Chunk,
    datatypes::{DataType, Field, Schema},
    io::parquet::write::{
        CompressionOptions, Encoding, FileWriter, RowGroupIterator, Version, WriteOptions,
        transverse,
    },
};
use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value, json};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

use crate::processor::{
    GroupDim, ProcessorError,
    aggregator::KeyPart,
    views::{ViewName, ViewSet, ViewTable},
};

/// Days between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

static WRITE_OPTIONS: WriteOptions = WriteOptions {
    write_statistics: true,
    compression: CompressionOptions::Uncompressed,
    version: Version::V2,
    data_pagesize_limit: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Parquet,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Parquet => "parquet",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" => Ok(ExportFormat::Parquet),
            "json" => Ok(ExportFormat::Json),
            other => Err(ProcessorError::InvalidArgument(format!(
                "unknown export format '{other}'"
            ))),
        }
    }
}

/// Output columns of a view
enum ColumnData {
    Utf8(Vec<String>),
    Int32(Vec<i32>),
    Date32(Vec<i32>),
    Float64(Vec<f64>),
}

impl ColumnData {
    fn data_type(&self) -> DataType {
        match self {
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Int32(_) => DataType::Int32,
            ColumnData::Date32(_) => DataType::Date32,
            ColumnData::Float64(_) => DataType::Float64,
        }
    }

    fn into_array(self) -> Box<dyn Array> {
        match self {
            ColumnData::Utf8(values) => Utf8Array::<i32>::from_slice(&values).boxed(),
            ColumnData::Int32(values) => Int32Array::from_vec(values).boxed(),
            ColumnData::Date32(values) => Int32Array::from_vec(values).to(DataType::Date32).boxed(),
            ColumnData::Float64(values) => Float64Array::from_vec(values).boxed(),
        }
    }

    fn json_at(&self, idx: usize) -> Value {
        match self {
            ColumnData::Utf8(values) => json!(values[idx]),
            ColumnData::Int32(values) => json!(values[idx]),
            ColumnData::Date32(values) => json!(from_days(values[idx]).map(|d| d.to_string())),
            ColumnData::Float64(values) => json!(values[idx]),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Int32(v) | ColumnData::Date32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
        }
    }
}

fn to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

fn key_column(dim: GroupDim, parts: impl Iterator<Item = Option<KeyPart>>) -> ColumnData {
    match dim {
        GroupDim::Region | GroupDim::Country => ColumnData::Utf8(
            parts
                .map(|p| p.map(|k| k.to_string()).unwrap_or_default())
                .collect(),
        ),
        GroupDim::Year => ColumnData::Int32(
            parts
                .map(|p| p.and_then(|k| k.as_year()).unwrap_or_default())
                .collect(),
        ),
        GroupDim::Date => ColumnData::Date32(
            parts
                .map(|p| p.and_then(|k| k.as_date()).map(to_days).unwrap_or_default())
                .collect(),
        ),
    }
}

/// Named columns of a view, in their documented order
fn columns(table: &ViewTable) -> Vec<(&'static str, ColumnData)> {
    match table {
        ViewTable::Headline(rows) => vec![
            ("scope", ColumnData::Utf8(rows.iter().map(|r| r.scope.to_string()).collect())),
            ("sum_kilotons", ColumnData::Float64(rows.iter().map(|r| r.sum_kilotons).collect())),
            (
                "mean_tons_per_capita",
                ColumnData::Float64(rows.iter().map(|r| r.mean_tons_per_capita).collect()),
            ),
        ],
        ViewTable::Totals { dims, rows } => {
            let mut out: Vec<(&'static str, ColumnData)> = dims
                .iter()
                .enumerate()
                .map(|(pos, dim)| {
                    (
                        dim.column_name(),
                        key_column(*dim, rows.iter().map(|r| r.key.get(pos).cloned())),
                    )
                })
                .collect();
            out.push(("sum_kilotons", ColumnData::Float64(rows.iter().map(|r| r.sum_kilotons).collect())));
            out.push((
                "mean_tons_per_capita",
                ColumnData::Float64(rows.iter().map(|r| r.mean_tons_per_capita).collect()),
            ));
            out
        }
        ViewTable::TopN { selection, .. } => vec![
            ("entity", ColumnData::Utf8(selection.iter().map(|e| e.entity.to_string()).collect())),
            ("value", ColumnData::Float64(selection.iter().map(|e| e.value).collect())),
        ],
        ViewTable::ScopedTopN { selection, .. } => {
            let mut scope = Vec::new();
            let mut entity = Vec::new();
            let mut value = Vec::new();
            for (key, ranked) in &selection.scopes {
                for e in ranked.iter() {
                    scope.push(key.to_string());
                    entity.push(e.entity.to_string());
                    value.push(e.value);
                }
            }
            vec![
                ("scope", ColumnData::Utf8(scope)),
                ("entity", ColumnData::Utf8(entity)),
                ("value", ColumnData::Float64(value)),
            ]
        }
        ViewTable::Series { measure, points } => vec![
            ("date", ColumnData::Date32(points.iter().map(|p| to_days(p.date)).collect())),
            ("entity", ColumnData::Utf8(points.iter().map(|p| p.entity.to_string()).collect())),
            (measure.column_name(), ColumnData::Float64(points.iter().map(|p| p.value).collect())),
        ],
    }
}

/// Converts a view into an Arrow schema and chunk
pub fn to_arrow(table: &ViewTable) -> Result<(Schema, Chunk<Box<dyn Array>>), ProcessorError> {
    let columns = columns(table);

    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, data)| Field::new(*name, data.data_type(), false))
        .collect();
    let arrays: Vec<Box<dyn Array>> = columns
        .into_iter()
        .map(|(_, data)| data.into_array())
        .collect();

    Ok((Schema::from(fields), Chunk::try_new(arrays)?))
}

/// Converts a view into JSON records keyed by the documented column names
pub fn to_json(table: &ViewTable) -> Value {
    let columns = columns(table);
    let rows = columns.first().map_or(0, |(_, data)| data.len());

    Value::Array(
        (0..rows)
            .map(|idx| {
                let mut record = Map::new();
                for (name, data) in &columns {
                    record.insert(name.to_string(), data.json_at(idx));
                }
                Value::Object(record)
            })
            .collect(),
    )
}

/// Writes a view as a single row group Parquet file
pub fn write_parquet(table: &ViewTable, path: &Path) -> Result<(), ProcessorError> {
    let (schema, chunk) = to_arrow(table)?;

    let encodings = schema
        .fields
        .iter()
        .map(|f| transverse(&f.data_type, |_| Encoding::Plain))
        .collect();
    let row_groups =
        RowGroupIterator::try_new(vec![Ok(chunk)].into_iter(), &schema, WRITE_OPTIONS, encodings)?;

    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, schema, WRITE_OPTIONS)?;
    for group in row_groups {
        writer.write(group?)?;
    }
    writer.end(None)?;
    Ok(())
}

pub fn write_json(table: &ViewTable, path: &Path) -> Result<(), ProcessorError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &to_json(table))?;
    Ok(())
}

/// Writes every successfully computed view of `views` into `dir`, one file
/// per view named after it. Returns the written paths.
pub fn write_views(
    views: &ViewSet,
    dir: &Path,
    format: ExportFormat,
) -> Result<Vec<(ViewName, PathBuf)>, ProcessorError> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::new();
    for (name, table) in views.ready() {
        let path = dir.join(format!("{}.{}", name.as_str(), format.extension()));
        match format {
            ExportFormat::Parquet => write_parquet(table, &path)?,
            ExportFormat::Json => write_json(table, &path)?,
        }
        info!(view = name.as_str(), rows = table.len(), path = %path.display(), "exported view");
        written.push((name, path));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::record::{EmissionTable, RegionFilter, tests::record};
    use crate::processor::views::{ViewAssembler, ViewSettings};

    fn views() -> ViewSet {
        let table = EmissionTable::from_records(vec![
            record("Chad", "Africa", "2000-01-01", 1.0, 0.1),
            record("Peru", "Americas", "2000-01-01", 2.0, 0.2),
            record("Chad", "Africa", "2001-01-01", 3.0, 0.3),
        ]);
        ViewAssembler::new(table, ViewSettings::default()).assemble(&RegionFilter::All)
    }

    fn field_names(schema: &Schema) -> Vec<&str> {
        schema.fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_documented_schemas() {
        let views = views();
        let expect = [
            (ViewName::Headline, vec!["scope", "sum_kilotons", "mean_tons_per_capita"]),
            (ViewName::RegionalTotals, vec!["region", "sum_kilotons", "mean_tons_per_capita"]),
            (ViewName::YearlyTotals, vec!["year", "sum_kilotons", "mean_tons_per_capita"]),
            (
                ViewName::RegionalYearlyTotals,
                vec!["year", "region", "sum_kilotons", "mean_tons_per_capita"],
            ),
            (ViewName::CountryTotals, vec!["country", "sum_kilotons", "mean_tons_per_capita"]),
            (ViewName::TopEmitters, vec!["entity", "value"]),
            (ViewName::TopEmittersByRegion, vec!["scope", "entity", "value"]),
            (ViewName::TopEmittersSeries, vec!["date", "entity", "sum_kilotons"]),
            (
                ViewName::TopEmittersPerCapitaSeries,
                vec!["date", "entity", "mean_tons_per_capita"],
            ),
        ];
        for (name, fields) in expect {
            let (schema, chunk) = to_arrow(views.get(name).unwrap()).unwrap();
            assert_eq!(field_names(&schema), fields, "{name}");
            assert_eq!(chunk.len(), views.get(name).unwrap().len(), "{name}");
        }
    }

    #[test]
    fn test_year_and_date_types() {
        let views = views();
        let (schema, _) = to_arrow(views.get(ViewName::YearlyTotals).unwrap()).unwrap();
        assert_eq!(schema.fields[0].data_type, DataType::Int32);
        let (schema, _) = to_arrow(views.get(ViewName::TopEmittersSeries).unwrap()).unwrap();
        assert_eq!(schema.fields[0].data_type, DataType::Date32);
    }

    #[test]
    fn test_json_records() {
        let views = views();
        let value = to_json(views.get(ViewName::TopEmittersSeries).unwrap());
        assert_eq!(value[0]["date"], json!("2000-01-01"));
        assert_eq!(value[0]["entity"], json!("Chad"));
        assert_eq!(value[0]["sum_kilotons"], json!(1.0));
    }

    #[test]
    fn test_days_round_trip_epoch() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(to_days(epoch), 0);
        assert_eq!(from_days(0), Some(epoch));
    }

    #[test]
    fn test_write_views() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_views(&views(), dir.path(), ExportFormat::Json).unwrap();
        assert_eq!(written.len(), ViewName::ALL.len());
        assert!(dir.path().join("regional_totals.json").exists());

        let written = write_views(&views(), dir.path(), ExportFormat::Parquet).unwrap();
        assert!(written.iter().all(|(_, p)| p.metadata().unwrap().len() > 0));
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("Parquet".parse::<ExportFormat>().unwrap(), ExportFormat::Parquet);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
