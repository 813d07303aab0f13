use gem_decode::cluster1d::{find_clusters, ClusterFinderParams, ClusterStripInput};

fn base_params() -> ClusterFinderParams {
    use gem_decode::cluster1d::FilterMode;
    ClusterFinderParams {
        pitch: 0.4,
        n_strips: 256,
        offset: 0.0,
        max_sep: 3,
        max_sep_pos: 2,
        threshold_sample: 50.0,
        threshold_stripsum: 250.0,
        threshold_clustersum: 500.0,
        peak_prominence_min_sigma: 3.0,
        peak_prominence_min_fraction: 0.0,
        sigma_sum: 60.0,
        sigma_hit_shape: 0.3,
        use_strip_timing_cut: false,
        strip_t0: 0.0,
        strip_t_window: 1000.0,
        add_strip_t_cut: 1000.0,
        add_strip_corr_cut: -1.0,
        use_deconv_combo_for_clustering: false,
        filter_sum_mode: FilterMode::Soft,
        filter_strip_count_mode: FilterMode::Soft,
    }
}

fn strip<'a>(record_index: usize, strip: i32, sum: f64, max_sample_value: f64, samples: &'a [f64]) -> ClusterStripInput<'a> {
    ClusterStripInput {
        record_index,
        strip,
        clustering_quantity: sum,
        max_sample_value,
        sum,
        t_mean: 0.0,
        shaped_samples: samples,
        deconv_samples: samples,
        deconv_combo_max: max_sample_value,
    }
}

/// Seed scenario 2: a single isolated strip becomes a single one-strip cluster.
#[test]
fn isolated_strip_becomes_single_strip_cluster() {
    let samples = [5.0, 60.0, 180.0, 220.0, 140.0, 40.0];
    let inputs = vec![strip(0, 100, 645.0, 220.0, &samples)];
    let (clusters, stats) = find_clusters(inputs, &base_params(), None);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].n_strips, 1);
    assert_eq!(clusters[0].istripmax, 100);
    assert!((clusters[0].sum - 645.0).abs() < 1e-9);
    assert_eq!(stats.total_found, 0, "single-strip clusters don't count toward total_found (needs >= 2 strips)");
}

/// Seed scenario 4: two local maxima (sums 1000 and 800) separated by a
/// valley of sum 300. Under minsigma=3 (bar 180) the smaller peak's
/// prominence of 500 survives, yielding 2 clusters; under minfraction=0.7
/// (bar 0.7*800=560) it is pruned, yielding 1.
fn overlapping_profile() -> Vec<f64> {
    // strips 38..=48, values per index offset from 38
    vec![
        50.0, 100.0, 400.0, 700.0, 1000.0, 600.0, 300.0, 500.0, 800.0, 400.0, 100.0,
    ]
}

fn overlapping_inputs(samples: &[[f64; 1]]) -> Vec<ClusterStripInput> {
    let values = overlapping_profile();
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| strip(i, 38 + i as i32, v, v, &samples[i]))
        .collect()
}

#[test]
fn prominence_minsigma_bar_yields_two_clusters() {
    let samples: Vec<[f64; 1]> = vec![[0.0]; 11];
    let inputs = overlapping_inputs(&samples);
    let mut params = base_params();
    params.peak_prominence_min_sigma = 3.0;
    params.sigma_sum = 60.0;
    params.peak_prominence_min_fraction = 0.0;
    params.threshold_stripsum = 0.0;
    let (clusters, _) = find_clusters(inputs, &params, None);
    assert_eq!(clusters.len(), 2, "both peaks (1000 and 800) should survive an easy prominence bar");
}

#[test]
fn prominence_minfraction_bar_prunes_the_smaller_peak() {
    let samples: Vec<[f64; 1]> = vec![[0.0]; 11];
    let inputs = overlapping_inputs(&samples);
    let mut params = base_params();
    params.peak_prominence_min_sigma = 3.0;
    params.sigma_sum = 60.0;
    params.peak_prominence_min_fraction = 0.7;
    params.threshold_stripsum = 0.0;
    let (clusters, _) = find_clusters(inputs, &params, None);
    assert_eq!(clusters.len(), 1, "peak 800's prominence 500 fails the 0.7*800=560 fraction bar");
    assert_eq!(clusters[0].istripmax, 38 + 4);
}

#[test]
fn constraint_window_drops_clusters_outside_it() {
    let samples = [5.0, 60.0, 180.0, 220.0, 140.0, 40.0];
    let inputs = vec![strip(0, 100, 645.0, 220.0, &samples)];
    let (clusters, _) = find_clusters(inputs, &base_params(), Some((0.0, 1.0)));
    assert_eq!(clusters.len(), 1);
    assert!(!clusters[0].in_constraint);
}
