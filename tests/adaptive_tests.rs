use backdrop::adaptive::{AdaptiveController, Adjustment};
use backdrop::config::AdaptiveConfig;
use backdrop::stats::PerformanceSample;

#[test]
fn sustained_overload_coarsens() {
    let mut controller = AdaptiveController::new(AdaptiveConfig::default());
    let downsample = controller.downsample();
    let skip = controller.frame_skip();

    let budget = controller.config().budget_ms();
    for _ in 0..5 {
        controller.observe(&PerformanceSample::total(budget * 2.0));
    }
    assert!(controller.downsample() > downsample || controller.frame_skip() > skip);
}

#[test]
fn comfortable_latency_never_coarsens() {
    let mut controller = AdaptiveController::new(AdaptiveConfig::default());
    let downsample = controller.downsample();

    for _ in 0..10 {
        let adjustment = controller.observe(&PerformanceSample::total(5.0));
        assert!(!matches!(adjustment, Adjustment::Tightened { .. }));
    }
    assert!(controller.downsample() <= downsample);
}

#[test]
fn knobs_stay_within_bounds() {
    let config = AdaptiveConfig::default();
    let mut controller = AdaptiveController::new(config.clone());

    for _ in 0..200 {
        controller.observe(&PerformanceSample::total(500.0));
    }
    assert_eq!(controller.downsample(), config.max_downsample);
    assert_eq!(controller.frame_skip(), config.max_frame_skip);

    for _ in 0..2000 {
        controller.observe(&PerformanceSample::total(1.0));
    }
    assert!((controller.downsample() - config.min_downsample).abs() < 1e-4);
    assert_eq!(controller.frame_skip(), config.min_frame_skip);
}

#[test]
fn narrowed_bounds_clamp_current_value() {
    let mut controller = AdaptiveController::new(AdaptiveConfig::default());
    controller.set_downsample_bounds(3.0, 4.0);
    assert_eq!(controller.downsample(), 3.0);
}

#[test]
fn disabled_controller_holds_knobs() {
    let mut controller = AdaptiveController::new(AdaptiveConfig {
        enabled: false,
        ..AdaptiveConfig::default()
    });
    let downsample = controller.downsample();
    for _ in 0..20 {
        assert_eq!(
            controller.observe(&PerformanceSample::total(900.0)),
            Adjustment::Unchanged
        );
    }
    assert_eq!(controller.downsample(), downsample);
}
