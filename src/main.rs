//! expctl - state-expiry last-access CLI tool
//!
//! Queries the last-access store and manages the range cache from the
//! command line.

use expiry_indexer::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
