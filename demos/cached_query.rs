use std::rc::Rc;
use std::time::Instant;

use crate::utils::sample_csv_path;
use emissions_processor::processor::{
    GroupDim, Measure, RankBy, loader::load_csv, query_builder::QueryCache,
};
mod utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = sample_csv_path();
    let (table, _) = load_csv(&path)?;
    let cache = Rc::new(QueryCache::new());

    // First run (aggregation + ranking)
    let start = Instant::now();
    let result = table
        .query_with_cache(&cache)
        .top(RankBy::Country, Measure::SumKilotons, 3)
        .scoped_by(GroupDim::Region)
        .execute()?;
    println!("First run: {:?}, elapsed: {:?}", result, start.elapsed());

    // Second run (served from the cache)
    let start = Instant::now();
    let cached = table
        .query_with_cache(&cache)
        .top(RankBy::Country, Measure::SumKilotons, 3)
        .scoped_by(GroupDim::Region)
        .execute()?;
    println!("Cached run: {:?}, elapsed: {:?}", cached, start.elapsed());

    Ok(())
}
