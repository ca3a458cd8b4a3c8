//! CLI tool for locating field markers and suggesting insertion points

use pdf_stamper::{analyze_document, InjectionConfig, Marker};
use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <pdf_file> [--page N] [--config file.json] [--json]", args[0]);
        process::exit(1);
    }

    let pdf_path = &args[1];
    let json_output = args.iter().any(|a| a == "--json");
    let page: u32 = args
        .iter()
        .position(|a| a == "--page")
        .and_then(|i| args.get(i + 1))
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);

    // Markers come from the config's fields; fixed-mode configs carry none
    let mut config = InjectionConfig::anchored();
    if let Some(path) = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
    {
        match InjectionConfig::load(path) {
            Ok(loaded) if loaded.fields.iter().any(|f| !f.markers.is_empty()) => config = loaded,
            Ok(_) => log::warn!("{} has no markers; using the default ones", path),
            Err(e) => {
                eprintln!("Error: {}: {}", path, e);
                process::exit(1);
            }
        }
    }

    let markers: Vec<(String, Marker)> = config
        .fields
        .iter()
        .map(|f| (f.name.clone(), Marker::new(&f.markers)))
        .collect();

    let result = fs::read(pdf_path)
        .map_err(pdf_stamper::StampError::from)
        .and_then(|bytes| analyze_document(&bytes, &markers, page));

    match result {
        Ok(reports) => {
            if json_output {
                match serde_json::to_string_pretty(&reports) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        println!(r#"{{"error":"{}"}}"#, e);
                        process::exit(1);
                    }
                }
            } else {
                println!("Anchor Analysis");
                println!("===============");
                println!("File: {}", pdf_path);
                println!("Page: {}", page);
                println!();
                for report in &reports {
                    match &report.found {
                        Some(m) => {
                            println!("{}:", report.field);
                            println!("  box: x0={:.1} y0={:.1} w={:.1} h={:.1}", m.x0, m.y0, m.width, m.height);
                            println!("  suggested: ({:.1}, {:.1})", m.suggested.x, m.suggested.y);
                        }
                        None => println!("{}: not found", report.field),
                    }
                }
            }
        }
        Err(e) => {
            if json_output {
                println!(r#"{{"error":"{}"}}"#, e);
            } else {
                eprintln!("Error: {}", e);
            }
            process::exit(1);
        }
    }
}
