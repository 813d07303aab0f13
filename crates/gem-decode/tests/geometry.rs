use gem_decode::geometry::{strip_center, UvXyTransform};

#[test]
fn uv_to_xy_roundtrips_through_xy_to_uv() {
    let transform = UvXyTransform::new(30f64.to_radians(), -30f64.to_radians()).unwrap();
    let (x, y) = (12.5, -7.3);
    let (u, v) = transform.xy_to_uv(x, y);
    let (x2, y2) = transform.uv_to_xy(u, v);
    assert!((x2 - x).abs() < 1e-9, "x: {x2} vs {x}");
    assert!((y2 - y).abs() < 1e-9, "y: {y2} vs {y}");
}

#[test]
fn degenerate_parallel_axes_are_rejected() {
    let err = UvXyTransform::new(30f64.to_radians(), 30f64.to_radians());
    assert!(err.is_err());
}

#[test]
fn strip_center_spacing_matches_pitch_regardless_of_offset() {
    let c0 = strip_center(100, 256, 0.4, -51.2);
    let c1 = strip_center(101, 256, 0.4, -51.2);
    assert!((c1 - c0 - 0.4).abs() < 1e-9);
}
