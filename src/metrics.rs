//! Validation metrics.
//!
//! The fit procedure reports Spearman rank correlation between the model's
//! predictions and the true held-out measurements as its quality signal.

/// Spearman rank correlation between two equal-length slices.
///
/// Ties receive their average rank. Returns 0.0 when fewer than two samples
/// are given or when either side has no rank variance.
pub fn spearman_rank_correlation(a: &[f32], b: &[f32]) -> f64 {
    assert_eq!(
        a.len(),
        b.len(),
        "slices must have equal length, got {} and {}",
        a.len(),
        b.len()
    );
    if a.len() < 2 {
        return 0.0;
    }

    let ra = average_ranks(a);
    let rb = average_ranks(b);

    // Pearson correlation of the ranks.
    let n = a.len() as f64;
    let mean_a = ra.iter().sum::<f64>() / n;
    let mean_b = rb.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = ra[i] - mean_a;
        let db = rb[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a < 1e-12 || var_b < 1e-12 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

/// 1-based ranks with ties assigned the average rank of their group.
fn average_ranks(values: &[f32]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| {
        values[i]
            .partial_cmp(&values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; values.len()];
    let mut pos = 0;
    while pos < order.len() {
        let mut end = pos + 1;
        while end < order.len() && values[order[end]] == values[order[pos]] {
            end += 1;
        }
        // Average of the 1-based ranks pos+1 ..= end.
        let avg = (pos + 1 + end) as f64 / 2.0;
        for &idx in &order[pos..end] {
            ranks[idx] = avg;
        }
        pos = end;
    }
    ranks
}
