use crate::utils::sample_csv_path;
use emissions_processor::processor::{
    loader::load_csv,
    views::{ViewAssembler, ViewName, ViewSettings, ViewTable},
};
mod utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = sample_csv_path();
    let (table, summary) = load_csv(&path)?;
    println!(
        "Loaded {} rows ({} regions, {} countries)",
        summary.rows_loaded, summary.regions, summary.countries
    );

    let assembler = ViewAssembler::new(table, ViewSettings::default());
    for option in assembler.regions() {
        let views = assembler.assemble(&assembler.filter_for(&option));

        if let Some(ViewTable::TopN { selection, .. }) = views.get(ViewName::TopEmitters) {
            let names: Vec<String> = selection
                .iter()
                .map(|e| format!("{} ({:.0} kt)", e.entity, e.value))
                .collect();
            println!("{option}: {}", names.join(", "));
        }
        for (name, err) in views.failures() {
            println!("{option}: {name} unavailable: {err}");
        }
    }

    Ok(())
}
