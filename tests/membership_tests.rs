use anyhow::Result;
use market_dashboard::error::DashboardError;
use market_dashboard::sectors::{Sector, SectorMembership};
use std::fs;

#[cfg(test)]
mod membership_tests {
    use super::*;

    #[test]
    fn test_load_dir_canonicalizes_file_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("healthcare.csv"), "Symbol,Name\nUNH,UnitedHealth\njnj,J&J\n")?;
        fs::write(dir.path().join("Tech.csv"), "Name,Symbol\nApple,AAPL\nMicrosoft,MSFT\n,\n")?;
        fs::write(dir.path().join("energy.csv"), "symbol\nXOM\nXOM\n")?;
        fs::write(dir.path().join("crypto.csv"), "Symbol\nBTC\n")?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let membership = SectorMembership::load_dir(dir.path())?;

        assert_eq!(membership.sector_count(), 3);
        assert_eq!(membership.symbols(Sector::HealthCare), ["UNH", "JNJ"]);
        assert_eq!(membership.symbols(Sector::InformationTechnology), ["AAPL", "MSFT"]);
        assert_eq!(membership.symbols(Sector::Energy), ["XOM"]);
        assert!(membership.symbols(Sector::Utilities).is_empty());
        assert!(!membership.all_symbols().contains(&"BTC".to_string()));
        assert_eq!(membership.symbol_count(), 5);

        Ok(())
    }

    #[test]
    fn test_missing_dir_is_malformed_config() {
        let err = SectorMembership::load_dir(std::path::Path::new("/nonexistent/sectors")).unwrap_err();
        assert!(matches!(err, DashboardError::MalformedConfig(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_symbol_header_is_malformed_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("utilities.csv"), "Ticker\nNEE\n")?;

        let err = SectorMembership::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, DashboardError::MalformedConfig(_)));
        Ok(())
    }

    #[test]
    fn test_empty_dir_is_malformed_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = SectorMembership::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, DashboardError::MalformedConfig(_)));
        Ok(())
    }
}
