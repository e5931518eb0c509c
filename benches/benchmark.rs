use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use emissions_processor::processor::{
    GroupDim, Measure, RankBy,
    loader::load_csv,
    query_builder::QueryCache,
    ranker::top_n,
    record::RegionFilter,
    views::{ViewAssembler, ViewSettings},
};
use jemallocator::Jemalloc;
use rand::Rng;
use std::{io::Write, rc::Rc};
use tempfile::NamedTempFile;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const REGIONS: [&str; 5] = ["Africa", "Americas", "Asia", "Europe", "Oceania"];
const COUNTRIES_PER_REGION: usize = 40;
const YEARS: i32 = 60;

/// Synthetic table shaped like the real source: one row per country per year
fn synthetic_csv() -> (NamedTempFile, u64) {
    let mut tmp = NamedTempFile::new().unwrap();
    let mut rng = rand::rng();
    let mut rows = 0u64;

    writeln!(tmp, "Country,Region,Date,Kilotons of Co2,Metric Tons Per Capita").unwrap();
    for year in 1960..1960 + YEARS {
        for region in REGIONS {
            for c in 0..COUNTRIES_PER_REGION {
                writeln!(
                    tmp,
                    "{region} {c},{region},01-01-{year},{:.2},{:.2}",
                    rng.random_range(10.0..5_000_000.0_f64),
                    rng.random_range(0.01..30.0_f64),
                )
                .unwrap();
                rows += 1;
            }
        }
    }
    tmp.flush().unwrap();
    (tmp, rows)
}

fn pipeline(c: &mut Criterion) {
    let (tmp, rows) = synthetic_csv();
    let path = tmp.path();

    let mut group = c.benchmark_group("EmissionsPipeline");
    group.sample_size(10);
    group.throughput(Throughput::Elements(rows));

    group.bench_function("load_csv", |b| {
        b.iter(|| load_csv(path).unwrap());
    });

    let (table, _) = load_csv(path).unwrap();

    group.bench_function("top_n_countries", |b| {
        b.iter(|| top_n(&table, RankBy::Country, Measure::SumKilotons, 5).unwrap());
    });

    group.bench_function("group_by_region_year", |b| {
        b.iter(|| {
            table
                .query()
                .group_by_multi(&[GroupDim::Year, GroupDim::Region])
                .no_cache()
                .execute()
                .unwrap()
        });
    });

    group.bench_function("group_by_region_year_cached", |b| {
        let cache = Rc::new(QueryCache::new());
        b.iter(|| {
            table
                .query_with_cache(&cache)
                .group_by_multi(&[GroupDim::Year, GroupDim::Region])
                .execute()
                .unwrap()
        });
    });

    for parallel in [false, true] {
        let assembler = ViewAssembler::new(
            table.clone(),
            ViewSettings {
                parallel,
                ..ViewSettings::default()
            },
        );
        let name = if parallel {
            "assemble_all_views_parallel"
        } else {
            "assemble_all_views_sequential"
        };
        group.bench_function(name, |b| {
            b.iter(|| assembler.assemble(&RegionFilter::All));
        });
    }

    group.finish();
}

criterion_group!(benches, pipeline);
criterion_main!(benches);
