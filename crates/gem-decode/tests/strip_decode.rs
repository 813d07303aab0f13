use gem_decode::geometry::Axis;
use gem_decode::strip::{decode_strip, EdgeSamplePolicy, StripDecodeParams};

fn params() -> StripDecodeParams {
    StripDecodeParams {
        sample_period: 24.0,
        deconv_tau: 50.0,
        n_samples: 6,
        zero_suppress_nsigma: 5.0,
        zero_suppress_enabled: true,
        edge_policy: EdgeSamplePolicy::Allow,
        ts_chi2_cut: None,
        deconvolution_enabled: false,
        deconv_threshold_sample: 50.0,
        record_negative_polarity: true,
    }
}

/// Seed scenario 2: isolated hit on one strip, samples (5, 60, 180, 220, 140, 40).
#[test]
fn isolated_hit_is_retained_with_expected_sum() {
    let samples = vec![5.0, 60.0, 180.0, 220.0, 140.0, 40.0];
    let record = decode_strip(
        Axis::U,
        100,
        samples.clone(),
        samples,
        1.0,
        10.0,
        None,
        &params(),
    );
    assert!(record.keep);
    assert_eq!(record.strip, 100);
    assert!((record.sum - 645.0).abs() < 1e-9);
    assert_eq!(record.max_sample_index, 3);
}

#[test]
fn flat_pedestal_level_strip_is_zero_suppressed() {
    let samples = vec![2.0, -1.0, 3.0, 0.0, -2.0, 1.0];
    let record = decode_strip(Axis::U, 5, samples.clone(), samples, 1.0, 10.0, None, &params());
    assert!(!record.keep);
}

#[test]
fn negative_polarity_strip_is_flagged_but_not_kept() {
    let samples = vec![-5.0, -60.0, -180.0, -220.0, -140.0, -40.0];
    let record = decode_strip(Axis::U, 7, samples.clone(), samples, 1.0, 10.0, None, &params());
    assert!(record.is_negative);
    assert!(!record.keep);
}

#[test]
fn gain_scales_every_reported_amplitude_field() {
    let samples = vec![5.0, 60.0, 180.0, 220.0, 140.0, 40.0];
    let unity = decode_strip(Axis::U, 100, samples.clone(), samples.clone(), 1.0, 10.0, None, &params());
    let doubled = decode_strip(Axis::U, 100, samples.clone(), samples, 2.0, 10.0, None, &params());
    assert!((doubled.sum - 2.0 * unity.sum).abs() < 1e-9);
    assert!((doubled.max_sample_value - 2.0 * unity.max_sample_value).abs() < 1e-9);
}

#[test]
fn edge_reject_both_drops_a_strip_peaking_in_the_last_sample() {
    let samples = vec![5.0, 10.0, 20.0, 40.0, 80.0, 220.0];
    let mut p = params();
    p.edge_policy = EdgeSamplePolicy::RejectBoth;
    let record = decode_strip(Axis::U, 3, samples.clone(), samples, 1.0, 10.0, None, &params());
    assert!(record.keep);
    let rejected = decode_strip(Axis::U, 3, vec![5.0, 10.0, 20.0, 40.0, 80.0, 220.0], vec![5.0, 10.0, 20.0, 40.0, 80.0, 220.0], 1.0, 10.0, None, &p);
    assert!(!rejected.keep);
}
