use market_dashboard::indicators::squeeze_psi;
use market_dashboard::scoring::{CompositeScorer, Guardrail, MarketState, ScoreInputs, ScoringPolicy};
use market_dashboard::sectors::breadth_pct;
use proptest::prelude::*;

fn any_pct() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => -50.0f64..150.0,
        1 => proptest::num::f64::ANY,
    ]
}

fn any_inputs() -> impl Strategy<Value = ScoreInputs> {
    (any_pct(), any_pct(), any_pct(), any_pct(), any_pct(), any_pct(), -1i8..=1).prop_map(
        |(breadth, momentum, posture, squeeze, liquidity, risk_on, ema_sign)| ScoreInputs {
            breadth_pct: breadth,
            momentum_pct: momentum,
            posture_pct: posture,
            squeeze_expansion_pct: squeeze,
            liquidity_pct: liquidity,
            risk_on_pct: risk_on,
            ema_sign,
        },
    )
}

fn any_policy() -> impl Strategy<Value = ScoringPolicy> {
    (any::<bool>(), any::<bool>()).prop_map(|(band, dead_zone)| ScoringPolicy {
        guardrail: if band { Guardrail::StateBand } else { Guardrail::None },
        dead_zone_breaker: dead_zone,
        ..ScoringPolicy::default()
    })
}

/// Random walk with steps of at least 0.5 so the envelope never collapses
fn price_path() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((0.5f64..5.0, any::<bool>()), 30..80).prop_map(|steps| {
        let mut price = 500.0;
        steps
            .into_iter()
            .map(|(size, up)| {
                price += if up { size } else { -size };
                price
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn breadth_matches_formula(nh in 0u32..10_000, nl in 0u32..10_000) {
        let breadth = breadth_pct(nh, nl);
        if nh + nl == 0 {
            prop_assert_eq!(breadth, 50.0);
        } else {
            let expected = 100.0 * nh as f64 / (nh + nl) as f64;
            prop_assert!((breadth - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn score_stays_in_range(inputs in any_inputs(), policy in any_policy()) {
        let result = CompositeScorer::new(policy).unwrap().score(&inputs);
        prop_assert!((0.0..=100.0).contains(&result.score), "score {}", result.score);
        prop_assert!((0.0..=100.0).contains(&result.raw_score));
    }

    #[test]
    fn state_requires_ema_confirmation(inputs in any_inputs(), policy in any_policy()) {
        let result = CompositeScorer::new(policy).unwrap().score(&inputs);
        match result.state {
            MarketState::Bull => {
                prop_assert!(result.ema_sign > 0);
                prop_assert!(result.raw_score >= 60.0);
            }
            MarketState::Bear => {
                prop_assert!(result.ema_sign < 0);
                prop_assert!(result.raw_score < 60.0);
            }
            MarketState::Neutral => {}
        }
    }

    #[test]
    fn unguarded_score_is_classified_score(inputs in any_inputs()) {
        let result = CompositeScorer::new(ScoringPolicy::default()).unwrap().score(&inputs);
        prop_assert_eq!(result.score, result.raw_score);
        if result.state == MarketState::Bull {
            prop_assert!(result.score >= 60.0);
        }
    }

    #[test]
    fn squeeze_is_scale_invariant(closes in price_path(), k in 0.01f64..100.0) {
        let scaled: Vec<f64> = closes.iter().map(|c| c * k).collect();
        let a = squeeze_psi(&closes, 50.0, 20);
        let b = squeeze_psi(&scaled, 50.0, 20);
        match (a, b) {
            (Some(a), Some(b)) => prop_assert!((a - b).abs() < 1e-6, "{} vs {}", a, b),
            (None, None) => {}
            other => prop_assert!(false, "definedness differs: {:?}", other),
        }
    }
}
