//! CLI tool for stamping a batch of PDFs with spreadsheet records

use pdf_stamper::{run_batch, BatchSession, FieldSchema, InjectionConfig, InputDocument};
use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <spreadsheet> <output.zip> <pdf_file>... [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <file.json>   Injection configuration");
    eprintln!("  --preset <name>        vertical (default), horizontal or anchored");
    eprintln!("  --json                 Print the summary as JSON");
    process::exit(1);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("pdf-stamp");

    let mut positional = Vec::new();
    let mut config_path = None;
    let mut preset = "vertical".to_string();
    let mut json_output = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config_path = Some(iter.next().unwrap_or_else(|| usage(program)).clone()),
            "--preset" => preset = iter.next().unwrap_or_else(|| usage(program)).clone(),
            "--json" => json_output = true,
            _ => positional.push(arg.clone()),
        }
    }

    if positional.len() < 3 {
        usage(program);
    }

    let config = match config_path {
        Some(path) => match InjectionConfig::load(&path) {
            Ok(config) => config,
            Err(e) => fail(json_output, &format!("{}: {}", path, e)),
        },
        None => match preset.as_str() {
            "vertical" => InjectionConfig::vertical(),
            "horizontal" => InjectionConfig::horizontal(),
            "anchored" => InjectionConfig::anchored(),
            other => fail(json_output, &format!("unknown preset {:?}", other)),
        },
    };

    let start = Instant::now();

    let workbook = match fs::read(&positional[0]) {
        Ok(bytes) => bytes,
        Err(e) => fail(json_output, &format!("{}: {}", positional[0], e)),
    };
    let session = match BatchSession::from_workbook(&workbook, config, &FieldSchema::default()) {
        Ok(session) => session,
        Err(e) => fail(json_output, &e.to_string()),
    };

    if !json_output {
        println!("Records loaded: {}", session.store().len());
        for (field, column) in session.mapping().slots() {
            match column {
                Some(c) => println!("  {} <- column {}", field, c),
                None => println!("  {} <- (unmapped)", field),
            }
        }
        println!();
    }

    let mut items = Vec::new();
    for path in &positional[2..] {
        let filename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        match fs::read(path) {
            Ok(bytes) => items.push(InputDocument::new(filename, bytes)),
            Err(e) => fail(json_output, &format!("{}: {}", path, e)),
        }
    }

    let session = run_batch(session, &items, |p| {
        if !json_output {
            println!("[{}/{}] {}", p.current, p.total, p.filename);
        }
    });

    let archive = match session.archive() {
        Ok(Some(bytes)) => bytes,
        Ok(None) => Vec::new(),
        Err(e) => fail(json_output, &e.to_string()),
    };
    if let Err(e) = fs::write(&positional[1], &archive) {
        fail(json_output, &format!("{}: {}", positional[1], e));
    }

    let summary = match session.latest_report() {
        Some(report) => report.summary(),
        None => fail(json_output, "no batch report"),
    };
    let elapsed = start.elapsed();

    if json_output {
        match serde_json::to_string(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => fail(true, &e.to_string()),
        }
    } else {
        println!();
        println!("Batch Results");
        println!("=============");
        println!("Processed: {}", summary.total);
        println!("Stamped:   {}", summary.success);
        println!("Unmatched: {}", summary.unmatched);
        println!("Failed:    {}", summary.failed);
        for name in &summary.unmatched_files {
            println!("  no record: {}", name);
        }
        for error in &summary.errors {
            println!("  error: {}: {}", error.filename, error.message);
        }
        println!();
        println!("Archive: {} ({} bytes)", positional[1], archive.len());
        println!("Time: {}ms", elapsed.as_millis());
    }
}

fn fail(json_output: bool, message: &str) -> ! {
    if json_output {
        println!("{}", serde_json::json!({ "error": message }));
    } else {
        eprintln!("Error: {}", message);
    }
    process::exit(1);
}
