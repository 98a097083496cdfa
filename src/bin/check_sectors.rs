use market_dashboard::sectors::{Sector, SectorMembership};
use std::env;
use std::path::PathBuf;

fn main() {
    let dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/sectors"));

    println!("Sector membership in {}:", dir.display());

    match SectorMembership::load_dir(&dir) {
        Ok(membership) => {
            for sector in Sector::ALL {
                let symbols = membership.symbols(sector);
                if symbols.is_empty() {
                    println!("{}: (none, will publish neutral card)", sector);
                } else {
                    println!("{}: {} symbols, e.g. {}", sector, symbols.len(), symbols[0]);
                }
            }
            println!("Total: {} unique symbols", membership.symbol_count());
        }
        Err(e) => {
            println!("Error - {}", e);
        }
    }
}
