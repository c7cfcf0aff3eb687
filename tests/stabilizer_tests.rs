use backdrop::config::StabilizerConfig;
use backdrop::stabilizer::TemporalStabilizer;
use backdrop::AlphaMatte;

#[test]
fn constant_input_converges() {
    let mut stabilizer = TemporalStabilizer::new(StabilizerConfig::default());
    stabilizer.apply(&AlphaMatte::filled(8, 8, 0.0));

    let target = AlphaMatte::filled(8, 8, 0.6);
    let mut out = AlphaMatte::filled(8, 8, 0.0);
    for _ in 0..30 {
        out = stabilizer.apply(&target);
    }
    assert!(out.data().iter().all(|v| (v - 0.6).abs() < 1e-4));
}

#[test]
fn alternating_input_stays_in_range() {
    let mut stabilizer = TemporalStabilizer::new(StabilizerConfig::default());
    let zero = AlphaMatte::filled(4, 4, 0.0);
    let one = AlphaMatte::filled(4, 4, 1.0);

    for i in 0..400 {
        let raw = if i % 2 == 0 { &zero } else { &one };
        let out = stabilizer.apply(raw);
        assert!(out.data().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn out_of_range_raw_values_are_clamped() {
    let mut stabilizer = TemporalStabilizer::new(StabilizerConfig::default());
    let raw = AlphaMatte::new(2, 1, vec![-0.5, 1.5]).unwrap();
    let out = stabilizer.apply(&raw);
    assert_eq!(out.data(), &[0.0, 1.0]);
}

#[test]
fn hard_reset_after_interval() {
    let interval = 10;
    let mut stabilizer = TemporalStabilizer::new(StabilizerConfig {
        reset_interval: interval,
        ..StabilizerConfig::default()
    });

    for i in 0..interval {
        let value = if i % 2 == 0 { 0.2 } else { 0.9 };
        stabilizer.apply(&AlphaMatte::filled(4, 4, value));
    }
    assert_eq!(stabilizer.frames_since_reset(), interval);

    let raw = AlphaMatte::new(2, 2, vec![0.1, 0.4, 0.7, 1.0]).unwrap();
    // A dimension change would also reset; keep the size to test the interval.
    let raw = AlphaMatte::new(4, 4, raw.data().iter().cycle().take(16).copied().collect()).unwrap();
    let out = stabilizer.apply(&raw);

    assert_eq!(stabilizer.previous(), Some(&raw));
    assert_eq!(out, raw);
    assert_eq!(stabilizer.frames_since_reset(), 1);
}

#[test]
fn explicit_reset_discards_history() {
    let mut stabilizer = TemporalStabilizer::new(StabilizerConfig::default());
    stabilizer.apply(&AlphaMatte::filled(4, 4, 1.0));
    stabilizer.reset();
    assert!(stabilizer.previous().is_none());

    let out = stabilizer.apply(&AlphaMatte::filled(4, 4, 0.0));
    assert!(out.data().iter().all(|v| *v == 0.0));
}
