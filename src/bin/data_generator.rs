use rand::Rng;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

const REGIONS: [(&str, &[&str]); 5] = [
    ("Africa", &["Algeria", "Chad", "Egypt", "Kenya", "Nigeria", "South Africa"]),
    ("Americas", &["Argentina", "Brazil", "Canada", "Mexico", "Peru", "United States"]),
    ("Asia", &["China", "India", "Indonesia", "Japan", "\"Korea, Rep.\"", "Vietnam"]),
    ("Europe", &["France", "Germany", "Italy", "Poland", "Spain", "United Kingdom"]),
    ("Oceania", &["Australia", "Fiji", "New Zealand", "Papua New Guinea"]),
];

/// Writes a synthetic emissions table in the source layout.
///
/// Usage: `data_generator [path] [first_year] [last_year]`
fn main() -> std::io::Result<()> {
    let mut args = env::args().skip(1);
    let path = args
        .next()
        .unwrap_or_else(|| "data/Carbon_(CO2)_Emissions_by_Country.csv".to_string());
    let first_year: i32 = args.next().and_then(|y| y.parse().ok()).unwrap_or(1990);
    let last_year: i32 = args.next().and_then(|y| y.parse().ok()).unwrap_or(2019);

    if let Some(parent) = Path::new(&path).parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);

    writeln!(
        writer,
        "Country,Region,Date,Kilotons of Co2,Metric Tons Per Capita"
    )?;

    let mut rng = rand::rng();
    let mut rows = 0usize;
    for year in first_year..=last_year {
        for (region, countries) in REGIONS {
            for country in countries {
                let kilotons = rng.random_range(100.0..10_000_000.0_f64);
                let per_capita = rng.random_range(0.05..25.0_f64);
                writeln!(
                    writer,
                    "{},{},01-01-{},{:.2},{:.2}",
                    country, region, year, kilotons, per_capita
                )?;
                rows += 1;
            }
        }
    }
    writer.flush()?;

    println!("Sample CSV generated: {} ({} rows)", path, rows);
    Ok(())
}
