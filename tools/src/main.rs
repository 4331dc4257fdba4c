//! stocktake-runner: headless batch runner for the stocktake analytics engine.
//!
//! Usage:
//!   stocktake-runner --input stocktake.csv --out reports
//!   stocktake-runner --input stocktake.csv --config analysis.json --delimiter ';'
//!   stocktake-runner --synthetic --seed 12345 --stores 8 --periods 26 --out reports

use anyhow::{Context, Result};
use std::env;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use stocktake_core::{
    config::AnalysisConfig,
    engine::AnalysisEngine,
    normalizer::RawRecord,
    report::AnalysisOutput,
    synthetic::{self, CorpusShape},
};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let synthetic_mode = args.iter().any(|a| a == "--synthetic");
    let defaults = CorpusShape::default();
    let seed = parse_arg(&args, "--seed", defaults.seed);
    let stores = parse_arg(&args, "--stores", defaults.stores);
    let periods = parse_arg(&args, "--periods", defaults.periods);
    let delimiter = parse_arg(&args, "--delimiter", ',');
    let input = flag_value(&args, "--input");
    let config_path = flag_value(&args, "--config");
    let out_dir = flag_value(&args, "--out").unwrap_or("./reports");

    let config = match config_path {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    let engine = AnalysisEngine::new(config)?;

    let (source, raw) = if synthetic_mode {
        let shape = CorpusShape {
            seed,
            stores,
            periods,
        };
        (
            format!("synthetic (seed {seed}, {stores} stores × {periods} periods)"),
            synthetic::generate(shape),
        )
    } else {
        let path = input.context("either --input <csv> or --synthetic is required")?;
        (path.to_string(), load_csv_file(path, delimiter)?)
    };

    println!("stocktake-runner");
    println!("  source:    {source}");
    println!("  rows:      {}", raw.len());
    println!("  config:    {}", config_path.unwrap_or("(defaults)"));
    println!("  out:       {out_dir}");
    println!();

    let output = engine.run(&raw);
    write_reports(&output, Path::new(out_dir))?;
    print_summary(&output);
    Ok(())
}

/// Read raw rows from a delimited file with a header line.
fn load_csv<R: Read>(reader: R, delimiter: char) -> Result<Vec<RawRecord>> {
    let delimiter = u8::try_from(delimiter).context("delimiter must be a single ASCII character")?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line_num, result) in csv_reader.deserialize().enumerate() {
        let record: RawRecord =
            result.with_context(|| format!("CSV parse error at line {}", line_num + 2))?;
        records.push(record);
    }
    Ok(records)
}

fn load_csv_file(path: &str, delimiter: char) -> Result<Vec<RawRecord>> {
    let file = File::open(path).with_context(|| format!("Cannot open {path}"))?;
    load_csv(file, delimiter)
}

fn write_reports(output: &AnalysisOutput, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Cannot create {}", out_dir.display()))?;
    for (name, json) in output.report_files()? {
        let path = out_dir.join(name);
        fs::write(&path, json).with_context(|| format!("Cannot write {}", path.display()))?;
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(output: &AnalysisOutput) {
    let quality = &output.cleaned.quality;
    let summary = &output.fraud.assessment.summary;

    println!("=== RUN SUMMARY ===");
    println!("  rows:           {}", quality.total_rows);
    println!("  valid:          {}", quality.valid_rows);
    println!("  rejected:       {}", quality.invalid_rows);
    println!("  stores:         {}", output.kpi.core.stores);
    println!("  high risk:      {} ({:.1}%)", summary.high_risk_records, summary.high_risk_rate * 100.0);
    println!("  mean score:     {:.2}", summary.mean_score);
    println!("  kpi anomalies:  {}", output.kpi.anomalies.len());

    println!();
    println!("=== PATTERNS ===");
    match output.fraud.mining.report() {
        Some(report) => {
            println!(
                "  {} itemsets, {} rules over {} transactions",
                report.itemsets.len(),
                report.rules.len(),
                report.transactions
            );
            for rule in &report.suspicious_rules {
                println!("  ! {rule}");
            }
        }
        None => println!("  (Not enough transactions to mine)"),
    }

    println!();
    println!("=== RECOMMENDATIONS ===");
    if output.recommendations.is_empty() {
        println!("  (None)");
    }
    for item in &output.recommendations {
        println!("  [{:?}] {}", item.priority, item.message);
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_headers_and_quoted_european_values_load() {
        let data = "\
Store,Period Start,Period End,Beginning Inventory,Shipment,Transfer In,Transfer Out,RTV,Sales,Ending Inventory
S1,01/01/2024,07/01/2024,\"3.343,00\",\"120,00\",\"0,00\",\"10,00\",\"2,00\",\"400,00\",\"3.051,00\"
";
        let rows = load_csv(data.as_bytes(), ',').unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].store, "S1");
        assert_eq!(rows[0].beginning_inventory, "3.343,00");
        assert_eq!(rows[0].shipment.as_deref(), Some("120,00"));
    }

    #[test]
    fn semicolon_files_load() {
        let data = "\
store;period_start;beginning_inventory;transfer_in;transfer_out;rtv;sales;ending_inventory
S2;2024-02-05;1.000,00;0;0;0;50,5;949,5
";
        let rows = load_csv(data.as_bytes(), ';').unwrap();
        assert_eq!(rows[0].period_end, None);
        assert_eq!(rows[0].sales, "50,5");
    }
}
