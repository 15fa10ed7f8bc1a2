//! Median filter for hydrometer noise (bubbles on the float, knocks).

/// Running median with a centred window of `width` samples.
///
/// The window is truncated at the ends of the series rather than padded,
/// so edge samples are the median of the neighbours that exist. An even
/// truncated window takes the mean of its two middle values. `width < 2`
/// returns the input unchanged.
pub fn median_filter(values: &[f64], width: usize) -> Vec<f64> {
    if width < 2 || values.len() < 2 {
        return values.to_vec();
    }
    let half = width / 2;
    let mut window: Vec<f64> = Vec::with_capacity(width);

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            window.clear();
            window.extend_from_slice(&values[lo..hi]);
            window.sort_by(f64::total_cmp);
            let n = window.len();
            if n % 2 == 1 {
                window[n / 2]
            } else {
                (window[n / 2 - 1] + window[n / 2]) / 2.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_single_sample_spikes() {
        let y = [1.050, 1.049, 1.030, 1.048, 1.047, 1.046, 1.045];
        let s = median_filter(&y, 5);
        assert!((s[2] - 1.048).abs() < 1e-12);
        assert!(s.iter().all(|v| *v > 1.040));
    }

    #[test]
    fn edges_use_truncated_window() {
        let y = [5.0, 1.0, 3.0, 4.0, 2.0];
        let s = median_filter(&y, 5);
        // [5,1,3] -> 3 ; [5,1,3,4] -> 3.5
        assert!((s[0] - 3.0).abs() < 1e-12);
        assert!((s[1] - 3.5).abs() < 1e-12);
        assert!((s[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn monotone_interior_is_unchanged() {
        let y: Vec<f64> = (0..20).map(|i| 1.060 - 0.001 * f64::from(i)).collect();
        let s = median_filter(&y, 5);
        for i in 2..18 {
            assert!((s[i] - y[i]).abs() < 1e-12);
        }
        assert_eq!(s.len(), y.len());
    }
}
