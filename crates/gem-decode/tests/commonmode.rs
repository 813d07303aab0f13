use gem_decode::commonmode::{correct, CommonModeParams, CorrectionParams, RollingAverage};

/// Seed scenario 5: a rolling common-mode tracker should settle within
/// +/-2 ADC of a step to +40 after enough events accumulate.
#[test]
fn rolling_average_tracks_a_step_offset_within_tolerance() {
    let mut rolling = RollingAverage::new(600);
    for _ in 0..100 {
        rolling.push(0.0);
    }
    for _ in 0..100 {
        rolling.push(40.0);
    }
    assert!((rolling.mean() - 40.0).abs() < 2.0, "mean was {}", rolling.mean());
}

/// Seed scenario 1: a pedestal-only run with flat, zero-mean ADC values
/// should never trip the sorting common-mode method into disagreement past
/// noise (sanity on the trim-and-average estimator itself, used for every
/// pedestal-run event's common-mode baseline).
#[test]
fn pedestal_only_flat_values_yield_zero_common_mode() {
    let params = CommonModeParams {
        reject_low: 4,
        reject_high: 4,
        min_strips_in_range: 10,
        ..Default::default()
    };
    let values = vec![0.0; 128];
    let cm = gem_decode::commonmode::estimate_common_mode(
        gem_decode::commonmode::CommonModeFlag::Sorting,
        &values,
        0.0,
        1.0,
        |_| 1.0,
        &params,
    )
    .unwrap();
    assert!((cm - 0.0).abs() < 1e-9);
}

/// Seed scenario 6: an online-suppressed event with 20 surviving strips and
/// a true common-mode drop of 30 ADC should correct by roughly
/// 30 * 2*(1 - 20/128) ~= 30 * 1.69 ~= 50.6, within a loose tolerance, when
/// `recompute` reports the post-suppression common mode as already
/// subtracted (so the delta between `online_value` and the freshly
/// recomputed value is the full 30 ADC drop).
#[test]
fn online_suppressed_correction_scales_with_occupancy() {
    let params = CorrectionParams {
        enabled: true,
        min_strips: 5,
        n_corr_sigma: 3.0,
    };
    let n_good = 20;
    let online_value = 30.0;
    let rolling_mean = 0.0;
    let rolling_rms = 2.0;
    let bias_mean = 0.0;
    let correction = correct(&params, n_good, online_value, rolling_mean, rolling_rms, bias_mean, || 0.0)
        .expect("online_value (30) sits far outside n_corr_sigma*rolling_rms (6) of rolling_mean, so correction fires");
    let expected_scale = 2.0 * (1.0 - n_good as f64 / 128.0);
    let expected = (online_value - 0.0 - bias_mean) * expected_scale;
    assert!((correction - expected).abs() < 1e-9);
    assert!((expected_scale - 1.6875).abs() < 1e-6);
    assert!((correction - 50.625).abs() < 1e-6);
}

#[test]
fn correction_suppressed_when_online_value_already_matches_rolling_mean() {
    let params = CorrectionParams {
        enabled: true,
        min_strips: 5,
        n_corr_sigma: 3.0,
    };
    let correction = correct(&params, 50, 1.0, 1.0, 2.0, 0.0, || 0.0);
    assert!(correction.is_none(), "online value within n_corr_sigma of rolling mean needs no correction");
}

#[test]
fn correction_suppressed_below_min_strips() {
    let params = CorrectionParams {
        enabled: true,
        min_strips: 30,
        n_corr_sigma: 3.0,
    };
    let correction = correct(&params, 10, 50.0, 0.0, 1.0, 0.0, || 0.0);
    assert!(correction.is_none());
}
