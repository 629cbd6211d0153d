use stagegate::catalog::Dataset;
use stagegate::catalog::types::Row;
use stagegate::config::{GateConfig, validate_config};
use stagegate::storage::file::is_store_dir;
use stagegate::storage::{FileRowStore, RowStore};
use stagegate::validation::{
    SchemaRuleEvaluator, ValidationLimits, ValidationState, run_validation,
};
use std::fs;
use std::path::Path;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "validate" => cmd_validate(&args[2..]),
        "store" => match args.get(2).map(String::as_str) {
            Some("inspect") => cmd_store_inspect(&args[3..]),
            Some(other) => Err(format!("unknown store command: {other}")),
            None => Err("missing store subcommand".into()),
        },
        other => {
            print_usage();
            Err(format!("unknown top-level command: {other}"))
        }
    }
}

/// Dry-runs validation of a JSON row file against a dataset definition.
/// Exits non-zero when the report is `failed`.
fn cmd_validate(args: &[String]) -> Result<(), String> {
    let dataset_path = parse_flag_value(args, "--dataset").ok_or("--dataset is required")?;
    let rows_path = parse_flag_value(args, "--rows").ok_or("--rows is required")?;
    let config = GateConfig::default().with_sample_rows(parse_sample_rows(args)?);

    let dataset: Dataset = serde_json::from_slice(
        &fs::read(&dataset_path).map_err(|e| format!("read {dataset_path}: {e}"))?,
    )
    .map_err(|e| format!("parse dataset: {e}"))?;
    let rows = load_rows(Path::new(&rows_path))?;

    let report = run_validation(
        &SchemaRuleEvaluator,
        &dataset,
        &rows,
        ValidationLimits {
            sample_rows: config.validation_sample_rows,
            max_rows: config.max_staged_rows,
        },
    );
    let rendered =
        serde_json::to_string_pretty(&report).map_err(|e| format!("encode report: {e}"))?;
    println!("{rendered}");
    if report.state == ValidationState::Failed {
        return Err(format!("validation failed: {}", report.summary()));
    }
    Ok(())
}

fn cmd_store_inspect(args: &[String]) -> Result<(), String> {
    let dir = parse_flag_value(args, "--dir").ok_or("--dir is required")?;
    let dir = Path::new(&dir);
    if !is_store_dir(dir) {
        return Err(format!("{} is not a store directory", dir.display()));
    }
    let mut config = GateConfig::default();
    if let Some(key) = parse_hmac_key_hex(args)? {
        config = config.with_hmac_key(key);
    }
    let store = FileRowStore::open(dir, &config).map_err(|e| format!("open store: {e}"))?;
    println!("generation\t{}", store.generation());
    for (name, rows) in store.table_summaries() {
        println!("{name}\t{rows}");
    }
    let staging = store
        .list_tables(None)
        .map_err(|e| format!("list tables: {e}"))?
        .into_iter()
        .filter(|t| t.is_staging())
        .count();
    println!("staging_tables\t{staging}");
    Ok(())
}

/// Reads a JSON array of flat objects.
fn load_rows(path: &Path) -> Result<Vec<Row>, String> {
    let bytes = fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let parsed: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("parse rows: {e}"))?;
    let items = parsed
        .as_array()
        .ok_or("rows file must contain a JSON array")?;
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            item.as_object()
                .map(Row::from_json_object)
                .ok_or_else(|| format!("row {idx} is not a JSON object"))
        })
        .collect()
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

/// `--sample n` limits validation to the first `n` rows; every row by default.
fn parse_sample_rows(args: &[String]) -> Result<usize, String> {
    let Some(raw) = parse_flag_value(args, "--sample") else {
        return Ok(usize::MAX);
    };
    let rows = raw
        .parse::<usize>()
        .map_err(|e| format!("invalid --sample: {e}"))?;
    validate_config(&GateConfig::default().with_sample_rows(rows))
        .map_err(|e| format!("invalid --sample: {e}"))?;
    Ok(rows)
}

fn parse_hmac_key_hex(args: &[String]) -> Result<Option<Vec<u8>>, String> {
    let Some(hex_key) = parse_flag_value(args, "--hmac-key-hex") else {
        return Ok(None);
    };
    hex::decode(hex_key)
        .map(Some)
        .map_err(|e| format!("invalid --hmac-key-hex: {e}"))
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  stagegate validate --dataset <dataset.json> --rows <rows.json> [--sample <n>]");
    eprintln!("  stagegate store inspect --dir <store-dir> [--hmac-key-hex <hex>]");
}

#[cfg(test)]
mod tests {
    use super::parse_sample_rows;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sample_defaults_to_every_row() {
        assert_eq!(parse_sample_rows(&args(&["--rows", "r.json"])), Ok(usize::MAX));
        assert_eq!(parse_sample_rows(&args(&["--sample", "25"])), Ok(25));
    }

    #[test]
    fn zero_sample_is_rejected() {
        let err = parse_sample_rows(&args(&["--sample", "0"])).expect_err("zero");
        assert!(err.starts_with("invalid --sample"), "{err}");
        assert!(parse_sample_rows(&args(&["--sample", "many"])).is_err());
    }
}
