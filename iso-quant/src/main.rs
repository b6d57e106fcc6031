//! Isoform quantification
//! Alejandro Gonzales-Irribarren, 2025
//!
//! Estimates the expression of every annotated transcript from a
//! coordinate-sorted set of BED12 read alignments. Reads are routed to
//! the disjoint locus that owns them, each locus is turned into a small
//! linear program over its splicing graph and solved independently, and
//! per-transcript estimates are written next to a per-locus report and a
//! run summary.

use clap::{self, Parser};
use config::ArgCheck;
use log::{error, info, Level};
use simple_logger::init_with_level;

use iso_quant::{quantify, Args};

fn main() {
    let start = std::time::Instant::now();
    let args: Args = Args::parse();

    let level = if args.verbose {
        Level::Debug
    } else {
        Level::Info
    };
    if let Err(e) = init_with_level(level) {
        eprintln!("Cannot initialize logger: {}", e);
    }

    args.check().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    quantify(args).unwrap_or_else(|e| {
        error!("{:#}", e);
        std::process::exit(1);
    });

    let elapsed = start.elapsed();
    info!("Elapsed time: {:.3?}", elapsed);
}
