//! End-to-end simulation scenarios over the public engine API.

use chrono::{DateTime, Utc};
use liveops_core::config::{BanditAlgorithm, LinkFunction};
use liveops_core::types::{
    Campaign, CampaignType, Segment, SegmentMix, SegmentMixEntry, SegmentVariantModifier,
    SimulationResult, Variant, VariantId, CONTEXT_DIM,
};
use liveops_rl_engine::{run, BanditPolicy, EngineSettings, Policy, SimulationDriver, SimulationPlan};

fn variant(id: VariantId, name: &str, base_ctr: f64) -> Variant {
    Variant {
        id,
        tutorial_id: 1,
        name: name.to_string(),
        base_ctr,
        base_params_weights: None,
    }
}

fn campaign(campaign_type: CampaignType) -> Campaign {
    Campaign {
        id: 7,
        tutorial_id: 1,
        campaign_type,
        duration: 60,
        start_time: Some(DateTime::<Utc>::UNIX_EPOCH),
        end_time: None,
        segment_mix_id: (campaign_type == CampaignType::SegmentedMab).then_some(1),
    }
}

fn two_arm_plan() -> SimulationPlan {
    SimulationPlan::new(
        campaign(CampaignType::Mab),
        vec![variant(1, "A", 0.9), variant(2, "B", 0.1)],
    )
}

fn segment(id: u32, name: &str) -> Segment {
    Segment {
        id,
        name: name.to_string(),
        description: None,
        segment_ctr_modifier: 0.0,
    }
}

fn modifier(segment_id: u32, variant_id: VariantId, performance_modifier: f64) -> SegmentVariantModifier {
    SegmentVariantModifier {
        segment_id,
        variant_id,
        performance_modifier,
    }
}

fn segmented_plan() -> SimulationPlan {
    let mix = SegmentMix {
        id: 1,
        name: "whales-and-minnows".to_string(),
        entries: vec![
            SegmentMixEntry {
                segment_id: 100,
                percentage: 60.0,
            },
            SegmentMixEntry {
                segment_id: 200,
                percentage: 40.0,
            },
        ],
    };
    SimulationPlan::new(
        campaign(CampaignType::SegmentedMab),
        vec![variant(1, "A", 0.5), variant(2, "B", 0.5)],
    )
    .with_segments(
        mix,
        vec![segment(100, "whales"), segment(200, "minnows")],
        vec![
            modifier(100, 1, 0.1),
            modifier(100, 2, -0.1),
            modifier(200, 1, -0.1),
            modifier(200, 2, 0.1),
        ],
    )
}

fn contextual_plan(link: LinkFunction) -> SimulationPlan {
    let mut a = variant(1, "A", 0.3);
    a.base_params_weights = Some(vec![0.9, 0.9, 0.9, 0.9, 0.05, 0.05, 0.05]);
    let mut b = variant(2, "B", 0.3);
    b.base_params_weights = Some(vec![0.05, 0.05, 0.05, 0.05, 0.9, 0.9, 0.9]);
    SimulationPlan::new(campaign(CampaignType::ContextualMab), vec![a, b]).with_settings(EngineSettings {
        link,
        ..EngineSettings::default()
    })
}

fn count(result: &SimulationResult, id: VariantId) -> u64 {
    result.variant_counts.get(&id).copied().unwrap_or(0)
}

#[test]
fn test_two_arm_campaign_favours_better_variant() {
    let result = run(&two_arm_plan(), 1000, 42).unwrap();

    assert!(result.completed);
    assert_eq!(result.total_impressions, 1000);
    assert!(count(&result, 1) > count(&result, 2));
    assert!(result.cumulative_regret_mab < result.cumulative_regret_uniform);
    // Uniform baseline is analytic: (0.9 - 0.5) per impression.
    assert!((result.cumulative_regret_uniform - 400.0).abs() < 1e-6);
    assert_eq!(result.true_ctrs.get(&1), Some(&0.9));
}

#[test]
fn test_ucb1_also_favours_better_variant() {
    let plan = two_arm_plan().with_settings(EngineSettings {
        algorithm: BanditAlgorithm::Ucb1,
        ..EngineSettings::default()
    });
    let result = run(&plan, 1000, 42).unwrap();
    assert!(count(&result, 1) > count(&result, 2));
    assert!(result.cumulative_regret_mab < result.cumulative_regret_uniform);
}

#[test]
fn test_segmented_campaign_learns_per_segment_winner() {
    let result = run(&segmented_plan(), 5000, 42).unwrap();

    assert_eq!(result.campaign_type, CampaignType::SegmentedMab);
    let first = &result.per_segment_regret[&1];
    let second = &result.per_segment_regret[&2];
    assert_eq!(first.impressions + second.impressions, 5000);
    assert!(first.impressions > second.impressions);

    let first_a = first.variant_counts.get(&1).copied().unwrap_or(0);
    let first_b = first.variant_counts.get(&2).copied().unwrap_or(0);
    assert!(first_a > first_b, "segment 1: A={first_a} B={first_b}");

    let second_a = second.variant_counts.get(&1).copied().unwrap_or(0);
    let second_b = second.variant_counts.get(&2).copied().unwrap_or(0);
    assert!(second_b > second_a, "segment 2: A={second_a} B={second_b}");

    let per_segment_mab: f64 = result.per_segment_regret.values().map(|s| s.mab_regret).sum();
    assert!((per_segment_mab - result.cumulative_regret_mab).abs() < 1e-6);
}

#[test]
fn test_segmented_campaign_splits_winners_at_1000_impressions() {
    let result = run(&segmented_plan(), 1000, 42).unwrap();

    let first = &result.per_segment_regret[&1];
    let second = &result.per_segment_regret[&2];
    assert_eq!(first.impressions + second.impressions, 1000);
    assert!(
        first.variant_counts.get(&1) > first.variant_counts.get(&2),
        "segment 1: {:?}",
        first.variant_counts
    );
    assert!(
        second.variant_counts.get(&2) > second.variant_counts.get(&1),
        "segment 2: {:?}",
        second.variant_counts
    );
}

#[test]
fn test_regret_grows_sublinearly() {
    let plan = SimulationPlan::new(
        campaign(CampaignType::Mab),
        vec![variant(1, "A", 0.8), variant(2, "B", 0.5), variant(3, "C", 0.2)],
    );
    let short = run(&plan, 100, 42).unwrap();
    let long = run(&plan, 10_000, 42).unwrap();

    let short_rate = short.cumulative_regret_mab / 100.0;
    let long_rate = long.cumulative_regret_mab / 10_000.0;
    assert!(long_rate < short_rate, "{long_rate} >= {short_rate}");
    assert!(long.cumulative_regret_mab < 0.1 * long.cumulative_regret_uniform);
}

#[test]
fn test_cold_start_serves_each_variant_once() {
    let plan = SimulationPlan::new(
        campaign(CampaignType::Mab),
        vec![variant(9, "C", 0.9), variant(3, "A", 0.1), variant(5, "B", 0.5)],
    );
    let mut driver = SimulationDriver::new(&plan, 10, 1).unwrap();
    let first: Vec<_> = (0..3)
        .map(|_| driver.step().unwrap().map(|i| i.variant_id))
        .collect();
    assert_eq!(first, vec![Some(3), Some(5), Some(9)]);
}

#[test]
fn test_same_seed_is_reproducible() {
    for plan in [two_arm_plan(), segmented_plan(), contextual_plan(LinkFunction::Logistic)] {
        let a = run(&plan, 2000, 1234).unwrap();
        let b = run(&plan, 2000, 1234).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}

#[test]
fn test_result_survives_json_round_trip() {
    let result = run(&segmented_plan(), 500, 3).unwrap();
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"SEGMENTED_MAB\""));
    let back: SimulationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}

#[test]
fn test_contextual_campaign_beats_uniform() {
    let result = run(&contextual_plan(LinkFunction::ScaledDot), 5000, 42).unwrap();
    assert_eq!(result.campaign_type, CampaignType::ContextualMab);
    assert!(result.per_segment_regret.is_empty());
    assert!(result.cumulative_regret_mab >= 0.0);
    assert!(result.cumulative_regret_mab < result.cumulative_regret_uniform);
}

#[test]
fn test_contextual_logistic_run_completes() {
    let mut driver = SimulationDriver::new(&contextual_plan(LinkFunction::Logistic), 1000, 5).unwrap();
    while !driver.is_finished() {
        driver.advance(128, || true).unwrap();
    }
    let impressions = driver.drain_impressions();
    assert_eq!(impressions.len(), 1000);
    assert!(impressions
        .iter()
        .all(|i| i.context.as_ref().map(Vec::len) == Some(CONTEXT_DIM)));

    let result = driver.snapshot();
    assert!(result.completed);
    assert_eq!(result.variant_counts.values().sum::<u64>(), 1000);

    match driver.policy() {
        Policy::Contextual(linucb) => {
            assert_eq!(linucb.pulls(1) + linucb.pulls(2), 1000);
            let total: f64 = linucb.feature_importance().iter().map(|f| f.importance).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        other => panic!("unexpected policy {:?}", other.campaign_type()),
    }
}

#[test]
fn test_policy_rejects_update_without_choose() {
    let mut driver = SimulationDriver::new(&two_arm_plan(), 5, 0).unwrap();
    driver.step().unwrap();
    let mut policy = driver.policy().clone();
    let opportunity = liveops_rl_engine::Opportunity::Plain;
    assert!(policy.update(1, true, &opportunity).is_err());
}
