//! Sector membership, per-sector aggregation and market-wide breadth ratios.
//!
//! The dashboard always publishes exactly one card per canonical sector, in
//! the fixed order of [`Sector::ALL`]. Sectors without members or without any
//! flags are emitted with neutral 50.0 percentages and zero counts.

use crate::error::{DashboardError, Result};
use crate::flags::FlagCounts;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

/// Neutral value published when a ratio has a zero denominator
pub const NEUTRAL_PCT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sector {
    #[serde(rename = "Information Technology")]
    InformationTechnology,
    #[serde(rename = "Materials")]
    Materials,
    #[serde(rename = "Health Care")]
    HealthCare,
    #[serde(rename = "Communication Services")]
    CommunicationServices,
    #[serde(rename = "Real Estate")]
    RealEstate,
    #[serde(rename = "Energy")]
    Energy,
    #[serde(rename = "Consumer Staples")]
    ConsumerStaples,
    #[serde(rename = "Consumer Discretionary")]
    ConsumerDiscretionary,
    #[serde(rename = "Financials")]
    Financials,
    #[serde(rename = "Utilities")]
    Utilities,
    #[serde(rename = "Industrials")]
    Industrials,
}

impl Sector {
    /// Published order of sector cards
    pub const ALL: [Sector; 11] = [
        Sector::InformationTechnology,
        Sector::Materials,
        Sector::HealthCare,
        Sector::CommunicationServices,
        Sector::RealEstate,
        Sector::Energy,
        Sector::ConsumerStaples,
        Sector::ConsumerDiscretionary,
        Sector::Financials,
        Sector::Utilities,
        Sector::Industrials,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Sector::InformationTechnology => "Information Technology",
            Sector::Materials => "Materials",
            Sector::HealthCare => "Health Care",
            Sector::CommunicationServices => "Communication Services",
            Sector::RealEstate => "Real Estate",
            Sector::Energy => "Energy",
            Sector::ConsumerStaples => "Consumer Staples",
            Sector::ConsumerDiscretionary => "Consumer Discretionary",
            Sector::Financials => "Financials",
            Sector::Utilities => "Utilities",
            Sector::Industrials => "Industrials",
        }
    }

    /// Growth-sensitive sectors on the risk-on side of the tilt
    pub fn is_offensive(&self) -> bool {
        matches!(
            self,
            Sector::InformationTechnology
                | Sector::CommunicationServices
                | Sector::ConsumerDiscretionary
                | Sector::Industrials
                | Sector::Materials
                | Sector::Financials
        )
    }

    pub fn is_defensive(&self) -> bool {
        matches!(
            self,
            Sector::ConsumerStaples | Sector::Utilities | Sector::HealthCare | Sector::RealEstate
        )
    }

    /// Resolve a raw label ("tech", "health-care", "Consumer_Staples") to its
    /// canonical sector
    pub fn canonicalize(raw: &str) -> Option<Sector> {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let sector = match key.as_str() {
            "information technology" | "info tech" | "infotech" | "technology" | "tech" | "it" => {
                Sector::InformationTechnology
            }
            "materials" | "material" | "basic materials" => Sector::Materials,
            "health care" | "healthcare" | "health" => Sector::HealthCare,
            "communication services" | "communications" | "communication" | "comm services"
            | "telecom" | "telecommunications" => Sector::CommunicationServices,
            "real estate" | "realestate" | "reits" | "reit" => Sector::RealEstate,
            "energy" => Sector::Energy,
            "consumer staples" | "staples" | "consumer defensive" => Sector::ConsumerStaples,
            "consumer discretionary" | "discretionary" | "consumer disc" | "consumer cyclical" => {
                Sector::ConsumerDiscretionary
            }
            "financials" | "financial" | "finance" | "financial services" => Sector::Financials,
            "utilities" | "utility" => Sector::Utilities,
            "industrials" | "industrial" => Sector::Industrials,
            _ => return None,
        };
        Some(sector)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sector → member symbols
#[derive(Debug, Clone, Default)]
pub struct SectorMembership {
    members: BTreeMap<Sector, Vec<String>>,
}

impl SectorMembership {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Sector, Vec<S>)>,
        S: Into<String>,
    {
        let mut membership = SectorMembership::default();
        for (sector, symbols) in pairs {
            for symbol in symbols {
                membership.insert(sector, symbol.into());
            }
        }
        membership
    }

    pub fn insert(&mut self, sector: Sector, symbol: String) {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return;
        }
        let list = self.members.entry(sector).or_default();
        if !list.contains(&symbol) {
            list.push(symbol);
        }
    }

    /// Load one delimited file per sector from `dir`. Each file needs a
    /// `Symbol` header column; the sector comes from the file stem.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DashboardError::MalformedConfig(format!(
                "sectors directory {} does not exist",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
            })
            .collect();
        paths.sort();

        let mut membership = SectorMembership::default();
        for path in paths {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let Some(sector) = Sector::canonicalize(stem) else {
                warn!("Skipping {}: '{}' is not a known sector", path.display(), stem);
                continue;
            };

            let symbols = read_symbol_file(&path)?;
            debug!("{} -> {} ({} symbols)", path.display(), sector, symbols.len());
            for symbol in symbols {
                membership.insert(sector, symbol);
            }
        }

        if membership.members.is_empty() {
            return Err(DashboardError::MalformedConfig(format!(
                "no sector membership files found in {}",
                dir.display()
            )));
        }

        info!(
            "Loaded {} sectors, {} symbols from {}",
            membership.members.len(),
            membership.symbol_count(),
            dir.display()
        );
        Ok(membership)
    }

    pub fn symbols(&self, sector: Sector) -> &[String] {
        self.members.get(&sector).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every member symbol, sorted and deduplicated
    pub fn all_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.members.values().flatten().cloned().collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn sector_count(&self) -> usize {
        self.members.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.all_symbols().len()
    }
}

fn read_symbol_file(path: &Path) -> Result<Vec<String>> {
    let malformed = |msg: String| DashboardError::MalformedConfig(format!("{}: {}", path.display(), msg));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| malformed(e.to_string()))?;

    let headers = reader.headers().map_err(|e| malformed(e.to_string()))?.clone();
    let column = headers
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case("symbol"))
        .ok_or_else(|| malformed("missing 'Symbol' header".to_string()))?;

    let mut symbols = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| malformed(e.to_string()))?;
        if let Some(symbol) = record.get(column).filter(|s| !s.is_empty()) {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

/// Canonical per-sector aggregation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorCard {
    pub sector: Sector,
    pub breadth_pct: f64,
    pub momentum_pct: f64,
    pub nh: u32,
    pub nl: u32,
    pub up: u32,
    pub down: u32,
}

impl SectorCard {
    pub fn neutral(sector: Sector) -> Self {
        Self::from_counts(sector, FlagCounts::default())
    }

    /// Published percentages are rounded to 2 decimals; `breadth()` and
    /// `momentum()` recompute the exact ratio from the counts.
    pub fn from_counts(sector: Sector, counts: FlagCounts) -> Self {
        Self {
            sector,
            breadth_pct: round2(ratio_pct(counts.nh, counts.nl).unwrap_or(NEUTRAL_PCT)),
            momentum_pct: round2(ratio_pct(counts.up, counts.down).unwrap_or(NEUTRAL_PCT)),
            nh: counts.nh,
            nl: counts.nl,
            up: counts.up,
            down: counts.down,
        }
    }

    /// Breadth only when there is at least one new high or low
    pub fn breadth(&self) -> Option<f64> {
        ratio_pct(self.nh, self.nl)
    }

    pub fn momentum(&self) -> Option<f64> {
        ratio_pct(self.up, self.down)
    }

    pub fn counts(&self) -> FlagCounts {
        FlagCounts {
            nh: self.nh,
            nl: self.nl,
            up: self.up,
            down: self.down,
        }
    }
}

/// `100 * a / (a + b)`, `None` when both are zero
pub fn ratio_pct(a: u32, b: u32) -> Option<f64> {
    let total = a + b;
    if total == 0 {
        None
    } else {
        Some(100.0 * a as f64 / total as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Breadth with the neutral default applied
pub fn breadth_pct(nh: u32, nl: u32) -> f64 {
    ratio_pct(nh, nl).unwrap_or(NEUTRAL_PCT)
}

/// Roll per-symbol counts up into one card per canonical sector. Symbols with
/// no entry in `counts` (failed or skipped) contribute nothing.
pub fn aggregate_sectors(
    membership: &SectorMembership,
    counts: &HashMap<String, FlagCounts>,
) -> Vec<SectorCard> {
    Sector::ALL
        .iter()
        .map(|&sector| {
            let mut total = FlagCounts::default();
            for symbol in membership.symbols(sector) {
                if let Some(c) = counts.get(symbol) {
                    total.add(*c);
                }
            }
            SectorCard::from_counts(sector, total)
        })
        .collect()
}

fn totals(cards: &[SectorCard]) -> FlagCounts {
    let mut total = FlagCounts::default();
    for card in cards {
        total.add(card.counts());
    }
    total
}

/// Market-wide breadth from summed new highs/lows
pub fn market_breadth(cards: &[SectorCard]) -> Option<f64> {
    let t = totals(cards);
    ratio_pct(t.nh, t.nl)
}

/// Market-wide momentum from summed up/down streaks
pub fn market_momentum(cards: &[SectorCard]) -> Option<f64> {
    let t = totals(cards);
    ratio_pct(t.up, t.down)
}

/// Share of sectors (with any breadth signal) whose breadth is above 50
pub fn rising_pct(cards: &[SectorCard]) -> Option<f64> {
    let with_signal: Vec<f64> = cards.iter().filter_map(SectorCard::breadth).collect();
    if with_signal.is_empty() {
        return None;
    }
    let rising = with_signal.iter().filter(|b| **b > NEUTRAL_PCT).count();
    Some(100.0 * rising as f64 / with_signal.len() as f64)
}

/// Risk-on tilt: offensive sectors with breadth above 50 plus defensive
/// sectors with breadth below 50, over all offensive/defensive sectors that
/// carry a breadth signal
pub fn risk_on_pct(cards: &[SectorCard]) -> Option<f64> {
    let mut considered = 0usize;
    let mut risk_on = 0usize;

    for card in cards {
        let Some(breadth) = card.breadth() else {
            continue;
        };
        if card.sector.is_offensive() {
            considered += 1;
            if breadth > NEUTRAL_PCT {
                risk_on += 1;
            }
        } else if card.sector.is_defensive() {
            considered += 1;
            if breadth < NEUTRAL_PCT {
                risk_on += 1;
            }
        }
    }

    if considered == 0 {
        None
    } else {
        Some(100.0 * risk_on as f64 / considered as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_aliases() {
        assert_eq!(Sector::canonicalize("healthcare"), Some(Sector::HealthCare));
        assert_eq!(Sector::canonicalize("health-care"), Some(Sector::HealthCare));
        assert_eq!(Sector::canonicalize("Health_Care"), Some(Sector::HealthCare));
        assert_eq!(Sector::canonicalize("tech"), Some(Sector::InformationTechnology));
        assert_eq!(Sector::canonicalize("  Consumer Staples "), Some(Sector::ConsumerStaples));
        assert_eq!(Sector::canonicalize("crypto"), None);
    }

    #[test]
    fn test_offensive_defensive_are_disjoint() {
        for sector in Sector::ALL {
            assert!(!(sector.is_offensive() && sector.is_defensive()), "{}", sector);
        }
        assert!(!Sector::Energy.is_offensive() && !Sector::Energy.is_defensive());
    }

    #[test]
    fn test_breadth_neutral_default() {
        assert_eq!(breadth_pct(0, 0), 50.0);
        assert_eq!(breadth_pct(3, 1), 75.0);
        assert_eq!(ratio_pct(0, 0), None);
    }

    #[test]
    fn test_card_percentages_are_rounded() {
        let card = SectorCard::from_counts(Sector::Energy, FlagCounts { nh: 2, nl: 1, up: 1, down: 2 });
        assert_eq!(card.breadth_pct, 66.67);
        assert_eq!(card.momentum_pct, 33.33);
        assert_eq!(card.breadth(), Some(200.0 / 3.0));

        let json = serde_json::to_string(&card).unwrap();
        assert!(json.contains("\"breadth_pct\":66.67"), "{}", json);
    }

    #[test]
    fn test_aggregate_always_eleven_cards() {
        let membership = SectorMembership::from_pairs([(Sector::Energy, vec!["XOM"])]);
        let cards = aggregate_sectors(&membership, &HashMap::new());

        assert_eq!(cards.len(), 11);
        let order: Vec<Sector> = cards.iter().map(|c| c.sector).collect();
        assert_eq!(order, Sector::ALL.to_vec());
        assert!(cards.iter().all(|c| c.breadth_pct == 50.0 && c.nh == 0));
    }

    #[test]
    fn test_risk_on() {
        let mut cards: Vec<SectorCard> = Sector::ALL.iter().map(|s| SectorCard::neutral(*s)).collect();
        assert_eq!(risk_on_pct(&cards), None);

        // tech strong, utilities weak -> fully risk-on
        cards[0] = SectorCard::from_counts(Sector::InformationTechnology, FlagCounts { nh: 3, nl: 1, up: 0, down: 0 });
        cards[9] = SectorCard::from_counts(Sector::Utilities, FlagCounts { nh: 0, nl: 2, up: 0, down: 0 });
        assert_eq!(risk_on_pct(&cards), Some(100.0));

        // staples strong too -> half
        cards[6] = SectorCard::from_counts(Sector::ConsumerStaples, FlagCounts { nh: 2, nl: 0, up: 0, down: 0 });
        assert!((risk_on_pct(&cards).unwrap() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rising_pct_ignores_silent_sectors() {
        let mut cards: Vec<SectorCard> = Sector::ALL.iter().map(|s| SectorCard::neutral(*s)).collect();
        cards[5] = SectorCard::from_counts(Sector::Energy, FlagCounts { nh: 2, nl: 1, up: 0, down: 0 });
        cards[9] = SectorCard::from_counts(Sector::Utilities, FlagCounts { nh: 0, nl: 2, up: 0, down: 0 });
        assert_eq!(rising_pct(&cards), Some(50.0));
    }
}
