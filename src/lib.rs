//! # emissions_processor
//!
//! `emissions_processor` turns a flat table of national CO₂ emissions into the
//! aggregate views a dashboard draws: totals by region, by year, by country,
//! their combinations, and top-N emitter rankings. It supports:
//!
//! - Memory-mapped CSV loading, parsed in parallel chunks with Rayon
//! - Typed, immutable, date-ordered records
//! - Grouped sums/means keyed by region, country, year or full date
//! - Deterministic top-N selection, globally or per region
//! - Cached queries and a source-keyed table cache
//! - Arrow, Parquet and JSON export of every view
//!
//! # Views
//!
//! - **Totals**: regional, yearly, regional×yearly, per country, region→country
//! - **Rankings**: top emitters by kilotons or per capita, optionally per region
//! - **Series**: per-date values restricted to the top emitters
//!
//! # Example
//!
//! ```rust,no_run
//! use emissions_processor::processor::{
//!     loader::load_csv,
//!     views::{ViewAssembler, ViewName, ViewSettings},
//! };
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (table, _summary) = load_csv(Path::new("emissions.csv"))?;
//!     let assembler = ViewAssembler::new(table, ViewSettings::default());
//!
//!     // Views for a single region
//!     let views = assembler.assemble(&assembler.filter_for("Europe"));
//!     if let Some(top) = views.get(ViewName::TopEmitters) {
//!         println!("{:?}", top);
//!     }
//!     for (name, err) in views.failures() {
//!         eprintln!("{name} unavailable: {err}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod processor;
