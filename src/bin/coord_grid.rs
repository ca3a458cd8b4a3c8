//! CLI tool for overlaying a coordinate grid on every page of a PDF

use pdf_stamper::coordinate_grid;
use std::env;
use std::fs;
use std::process;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: {} <input.pdf> <output.pdf>", args[0]);
        process::exit(1);
    }

    let result = fs::read(&args[1])
        .map_err(pdf_stamper::StampError::from)
        .and_then(|bytes| coordinate_grid(&bytes))
        .and_then(|output| fs::write(&args[2], output).map_err(Into::into));

    match result {
        Ok(()) => {
            println!("Grid written to {}", args[2]);
            println!("Labels every 50pt; red dots mark the REF points");
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
