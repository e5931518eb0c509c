use std::path::PathBuf;

/// CSV given as the first argument, else the generated sample under `data/`
/// (`cargo run --bin data_generator` writes it).
pub fn sample_csv_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("data")
                .join("Carbon_(CO2)_Emissions_by_Country.csv")
        })
}
