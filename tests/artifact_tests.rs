use anyhow::Result;
use market_dashboard::artifact::{
    Artifact, ArtifactMeta, BuildMode, LookbackParams, Metrics, qa_report, read_artifact,
    read_previous_lights, validate_artifact, write_artifact,
};
use market_dashboard::flags::FlagCounts;
use market_dashboard::scoring::{CompositeScorer, ScoreInputs, ScoringPolicy};
use market_dashboard::sectors::{Sector, SectorCard, SectorMembership, aggregate_sectors};
use market_dashboard::signals::{EngineLights, Light};
use std::collections::HashMap;
use std::fs;

#[cfg(test)]
mod artifact_tests {
    use super::*;

    fn build_artifact() -> Result<Artifact> {
        let membership = SectorMembership::from_pairs([
            (Sector::Energy, vec!["XOM", "CVX"]),
            (Sector::InformationTechnology, vec!["AAPL"]),
        ]);
        let mut counts = HashMap::new();
        counts.insert("XOM".to_string(), FlagCounts { nh: 1, nl: 0, up: 1, down: 0 });
        counts.insert("CVX".to_string(), FlagCounts { nh: 0, nl: 1, up: 0, down: 0 });
        counts.insert("AAPL".to_string(), FlagCounts { nh: 1, nl: 0, up: 0, down: 1 });
        let cards = aggregate_sectors(&membership, &counts);

        let scorer = CompositeScorer::new(ScoringPolicy::default())?;
        let composite = scorer.score(&ScoreInputs {
            breadth_pct: 66.7,
            ema_sign: 1,
            ..ScoreInputs::default()
        });

        let mut lights = EngineLights::new();
        lights.insert(
            "overallBull".to_string(),
            Light {
                active: false,
                last_changed: "2024-03-14T20:00:00Z".to_string(),
            },
        );

        Ok(Artifact {
            sector_cards: cards,
            metrics: Metrics {
                breadth_pct: 200.0 / 3.0,
                momentum_pct: 50.0,
                rising_pct: Some(50.0),
                risk_on_pct: Some(100.0),
                ema_sign: 1,
                squeeze_psi: Some(72.5),
                squeeze_expansion_pct: Some(27.5),
                ..Metrics::default()
            },
            composite_score: composite,
            engine_lights: lights,
            meta: ArtifactMeta {
                generated_at_utc: "2024-03-15T15:30:00Z".to_string(),
                source: "out/dashboard_1d.json".to_string(),
                timeframe: "1d".to_string(),
                mode: BuildMode::Baseline,
                benchmark: "SPY".to_string(),
                lookback_params: LookbackParams {
                    lookback_bars: 260,
                    flag_lookback: 20,
                    streak_len: 3,
                    ema_span: 50,
                    psi_length: 20,
                    posture_saturation_pct: 2.0,
                },
                symbols_requested: 3,
                symbols_failed: vec![],
                degraded: vec!["ema_posture".to_string()],
            },
        })
    }

    #[test]
    fn test_round_trip_preserves_order_and_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("dashboard_1d.json");
        let artifact = build_artifact()?;

        write_artifact(&path, &artifact)?;
        let first_bytes = fs::read_to_string(&path)?;
        let reread = read_artifact(&path)?;

        assert_eq!(reread, artifact);
        let names: Vec<Sector> = reread.sector_cards.iter().map(|c| c.sector).collect();
        assert_eq!(names, Sector::ALL.to_vec());

        // rewriting what was read back is byte-identical
        write_artifact(&path, &reread)?;
        assert_eq!(fs::read_to_string(&path)?, first_bytes);

        // no temp files left beside the artifact
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        Ok(())
    }

    #[test]
    fn test_schema_field_names() -> Result<()> {
        let doc = serde_json::to_value(build_artifact()?)?;

        let keys: Vec<&str> = doc.as_object().unwrap().keys().map(String::as_str).collect();
        for key in ["sectorCards", "metrics", "compositeScore", "engineLights", "meta"] {
            assert!(keys.contains(&key), "missing {}", key);
        }

        let energy = &doc["sectorCards"][5];
        assert_eq!(energy["sector"], "Energy");
        assert_eq!(energy["nh"], 1);
        assert_eq!(energy["breadth_pct"], 50.0);

        assert_eq!(doc["sectorCards"][0]["sector"], "Information Technology");
        assert!(doc["metrics"]["smi"].is_null());
        assert_eq!(doc["compositeScore"]["state"], "neutral");
        assert!(doc["compositeScore"]["rawScore"].is_number());
        assert_eq!(doc["engineLights"]["overallBull"]["lastChanged"], "2024-03-14T20:00:00Z");
        assert_eq!(doc["meta"]["generatedAtUtc"], "2024-03-15T15:30:00Z");
        assert_eq!(doc["meta"]["lookbackParams"]["emaSpan"], 50);
        assert!(validate_artifact(&doc).is_empty());

        Ok(())
    }

    #[test]
    fn test_qa_report_on_published_artifact() -> Result<()> {
        let artifact = build_artifact()?;
        let report = qa_report(&artifact, 0.01);
        assert!(report.passed(), "{}", report);
        assert_eq!(report.checks.len(), 4);
        Ok(())
    }

    #[test]
    fn test_previous_lights() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("prev.json");
        assert!(read_previous_lights(&path).is_none());

        write_artifact(&path, &build_artifact()?)?;
        let lights = read_previous_lights(&path).unwrap();
        assert!(!lights["overallBull"].active);

        fs::write(&path, r#"{"engineLights": "garbage"}"#)?;
        assert!(read_previous_lights(&path).is_none());
        Ok(())
    }

    #[test]
    fn test_neutral_card_shape() {
        let card = SectorCard::neutral(Sector::Utilities);
        assert_eq!(card.breadth_pct, 50.0);
        assert_eq!(card.momentum_pct, 50.0);
        assert_eq!(card.breadth(), None);
    }
}
