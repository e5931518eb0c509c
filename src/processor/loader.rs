use chrono::{NaiveDate, NaiveDateTime};
use lru::LruCache;
use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use rayon::prelude::*;
use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fs::File,
    hash::{DefaultHasher, Hash, Hasher},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};
use tracing::{debug, info};

use crate::processor::{
    LoadSummary, ProcessorError,
    record::{EmissionRecord, EmissionTable},
};

pub const COUNTRY_COLUMN: &str = "Country";
pub const REGION_COLUMN: &str = "Region";
pub const DATE_COLUMN: &str = "Date";
pub const KILOTONS_COLUMN: &str = "Kilotons of Co2";
pub const PER_CAPITA_COLUMN: &str = "Metric Tons Per Capita";

/// Date layouts accepted for the `Date` column, tried in order
// Month-first before day-first for ambiguous dashed dates
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m-%d-%Y", "%d-%m-%Y", "%m/%d/%Y"];
// Measure cells read as a missing value
const MISSING_MEASURES: [&[u8]; 4] = [b"", b"NA", b"N/A", b"null"];
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Positions of the contract columns inside a source row
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    country: usize,
    region: usize,
    date: usize,
    kilotons: usize,
    per_capita: usize,
}

/// Loads an emissions CSV into the canonical date-ordered table
///
/// The file is memory mapped and its data lines are parsed in parallel,
/// newline-aligned chunks. Any unparseable date or non-numeric measure
/// aborts the whole load.
///
/// # Errors
/// - [`ProcessorError::MissingColumn`] if a contract column is absent
/// - [`ProcessorError::MalformedDate`] for an unparseable `Date` value
/// - [`ProcessorError::MalformedMeasure`] for a non-numeric measure value
///
/// # Example
/// ```no_run
/// # use emissions_processor::processor::loader::load_csv;
/// let (table, summary) = load_csv("emissions.csv".as_ref()).unwrap();
/// println!("{} rows, {} regions", summary.rows_loaded, summary.regions);
/// ```
pub fn load_csv(path: &Path) -> Result<(EmissionTable, LoadSummary), ProcessorError> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(ProcessorError::Parse("missing header line".into()));
    }
    let mmap = unsafe { Mmap::map(&file)? };
    load_bytes(&mmap)
}

/// Same as [`load_csv`] over an in-memory CSV buffer
pub fn load_bytes(buf: &[u8]) -> Result<(EmissionTable, LoadSummary), ProcessorError> {
    let buf = buf.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buf);
    if buf.trim_ascii().is_empty() {
        return Err(ProcessorError::Parse("missing header line".into()));
    }

    // Parse header
    let header_end = memchr(b'\n', buf).unwrap_or(buf.len());
    let columns = resolve_columns(&buf[..header_end])?;

    let data = buf.get(header_end + 1..).unwrap_or(&[]);

    // Find chunk boundaries (split by newlines)
    let num_threads = rayon::current_num_threads();
    let chunks = find_chunk_boundaries(data, num_threads);

    // Line number of each chunk's first line; the header is line 1
    let line_counts: Vec<usize> = chunks
        .par_iter()
        .map(|(start, end)| memchr_iter(b'\n', &data[*start..*end]).count())
        .collect();
    let mut first_lines = Vec::with_capacity(chunks.len());
    let mut next_line = 2;
    for count in &line_counts {
        first_lines.push(next_line);
        next_line += count;
    }

    let batch_results: Vec<Result<Vec<EmissionRecord>, ProcessorError>> = chunks
        .par_iter()
        .zip(first_lines.par_iter())
        .map(|((start, end), first_line)| parse_chunk(&data[*start..*end], columns, *first_line))
        .collect();

    // Chunks are in file order, so the first error is the earliest row
    let mut records = Vec::new();
    for batch in batch_results {
        records.extend(batch?);
    }

    // Stable: rows with equal dates keep their input order
    records.par_sort_by_key(|r| r.date);

    let table = EmissionTable::from_sorted(records);
    let summary = summarize(&table);
    info!(
        rows = summary.rows_loaded,
        regions = summary.regions,
        countries = summary.countries,
        first_date = ?summary.first_date,
        last_date = ?summary.last_date,
        "loaded emissions table"
    );
    Ok((table, summary))
}

fn resolve_columns(header_line: &[u8]) -> Result<ColumnIndex, ProcessorError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(header_line);
    let mut header = csv::StringRecord::new();
    if !reader.read_record(&mut header)? {
        return Err(ProcessorError::Parse("missing header line".into()));
    }

    let headers: Vec<&str> = header.iter().map(str::trim).collect();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| ProcessorError::MissingColumn(name.to_string()))
    };

    Ok(ColumnIndex {
        country: find(COUNTRY_COLUMN)?,
        region: find(REGION_COLUMN)?,
        date: find(DATE_COLUMN)?,
        kilotons: find(KILOTONS_COLUMN)?,
        per_capita: find(PER_CAPITA_COLUMN)?,
    })
}

fn find_chunk_boundaries(data: &[u8], num_chunks: usize) -> Vec<(usize, usize)> {
    if data.is_empty() || num_chunks == 0 {
        return vec![];
    }

    let chunk_size = data.len() / num_chunks;
    let mut boundaries = Vec::with_capacity(num_chunks);
    let mut start = 0;

    for i in 0..num_chunks - 1 {
        let mut end = ((i + 1) * chunk_size).max(start);

        // Find next newline
        end = match memchr(b'\n', &data[end..]) {
            Some(offset) => end + offset + 1, // Include the newline
            None => data.len(),
        };

        if start < end {
            boundaries.push((start, end));
        }
        start = end;
    }

    // Last chunk gets everything remaining
    if start < data.len() {
        boundaries.push((start, data.len()));
    }

    boundaries
}

fn parse_chunk(
    chunk: &[u8],
    columns: ColumnIndex,
    first_line: usize, // Absolute line number of the chunk's first line
) -> Result<Vec<EmissionRecord>, ProcessorError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(chunk);

    let mut records = Vec::with_capacity(chunk.len() / 48 + 1);
    let mut names: HashMap<String, Arc<str>> = HashMap::new();
    let mut row = csv::ByteRecord::new();

    while reader.read_byte_record(&mut row)? {
        let line = first_line + row.position().map_or(1, |p| p.line() as usize) - 1;

        let field = |idx: usize, column: &str| {
            row.get(idx).map(<[u8]>::trim_ascii).ok_or_else(|| {
                ProcessorError::Parse(format!(
                    "row {}: missing '{}' field ({} fields)",
                    line,
                    column,
                    row.len()
                ))
            })
        };

        let raw_date = field(columns.date, DATE_COLUMN)?;
        let date = std::str::from_utf8(raw_date)
            .ok()
            .and_then(parse_date)
            .ok_or_else(|| ProcessorError::MalformedDate {
                row: line,
                value: String::from_utf8_lossy(raw_date).into_owned(),
            })?;

        let kilotons_co2 = parse_measure(field(columns.kilotons, KILOTONS_COLUMN)?, KILOTONS_COLUMN, line)?;
        let tons_per_capita =
            parse_measure(field(columns.per_capita, PER_CAPITA_COLUMN)?, PER_CAPITA_COLUMN, line)?;

        let country = intern(&mut names, field(columns.country, COUNTRY_COLUMN)?);
        let region = intern(&mut names, field(columns.region, REGION_COLUMN)?);

        records.push(EmissionRecord {
            country,
            region,
            date,
            kilotons_co2,
            tons_per_capita,
        });
    }

    Ok(records)
}

/// Parses the `Date` column into a calendar date
///
/// Accepts ISO dates, `mm-dd-yyyy` (then `dd-mm-yyyy` when the month-first
/// reading is invalid), `mm/dd/yyyy`, ISO date-times and a bare four digit
/// year (taken as 1 January).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Some(datetime.date());
    }
    if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse::<i32>()
            .ok()
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
    }
    None
}

/// Empty and `NA`-style cells are missing values and come back as NaN
fn parse_measure(raw: &[u8], column: &str, line: usize) -> Result<f64, ProcessorError> {
    if MISSING_MEASURES.contains(&raw) {
        return Ok(f64::NAN);
    }
    fast_float::parse::<f64, _>(raw).map_err(|_| ProcessorError::MalformedMeasure {
        row: line,
        column: column.to_string(),
        value: String::from_utf8_lossy(raw).into_owned(),
    })
}

fn intern(names: &mut HashMap<String, Arc<str>>, raw: &[u8]) -> Arc<str> {
    let value = String::from_utf8_lossy(raw);
    if let Some(name) = names.get(value.as_ref()) {
        return Arc::clone(name);
    }
    let name: Arc<str> = Arc::from(value.as_ref());
    names.insert(value.into_owned(), Arc::clone(&name));
    name
}

fn summarize(table: &EmissionTable) -> LoadSummary {
    let regions: HashSet<&str> = table
        .iter()
        .filter(|r| !r.region.is_empty())
        .map(|r| &*r.region)
        .collect();
    let countries: HashSet<&str> = table
        .iter()
        .filter(|r| !r.country.is_empty())
        .map(|r| &*r.country)
        .collect();

    LoadSummary {
        rows_loaded: table.len(),
        regions: regions.len(),
        countries: countries.len(),
        first_date: table.records().first().map(|r| r.date),
        last_date: table.records().last().map(|r| r.date),
    }
}

/// Identity and content of a source file at the time it was loaded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    len: u64,
    modified: Option<SystemTime>,
    fingerprint: u64,
}

#[derive(Debug)]
struct CachedTable {
    key: SourceKey,
    table: EmissionTable,
}

/// Bounded cache of loaded tables, keyed by source path and validated
/// against the source's length, modification time and content hash.
///
/// A table is only reloaded when its source changed or after an explicit
/// [`TableCache::invalidate`] / [`TableCache::clear`].
#[derive(Debug)]
pub struct TableCache {
    cache: RefCell<LruCache<PathBuf, CachedTable>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::with_capacity(NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            cache: RefCell::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached table for `path`, loading it when absent or when
    /// the file no longer matches what was loaded
    pub fn get_or_load(&self, path: &Path) -> Result<EmissionTable, ProcessorError> {
        let cache_path = path.canonicalize()?;
        let file = File::open(&cache_path)?;
        let metadata = file.metadata()?;
        if metadata.len() == 0 {
            return Err(ProcessorError::Parse("missing header line".into()));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        let mut hasher = DefaultHasher::new();
        mmap[..].hash(&mut hasher);
        let key = SourceKey {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            fingerprint: hasher.finish(),
        };

        if let Some(cached) = self.cache.borrow_mut().get(&cache_path) {
            if cached.key == key {
                debug!(path = %cache_path.display(), "table cache hit");
                return Ok(cached.table.clone());
            }
        }

        debug!(path = %cache_path.display(), "table cache miss");
        let (table, _) = load_bytes(&mmap)?;
        self.cache.borrow_mut().put(
            cache_path,
            CachedTable {
                key,
                table: table.clone(),
            },
        );
        Ok(table)
    }

    /// Drops the entry for `path`. Returns whether one was present.
    pub fn invalidate(&self, path: &Path) -> bool {
        let cache_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.cache.borrow_mut().pop(&cache_path).is_some()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new()
    }
}
