use anyhow::{Result, anyhow};
use statrs::statistics::Statistics;

/// Pearson correlation between two equally sized series.
///
/// Returns 0.0 when either series has zero variance.
pub fn pearson_correlation(series1: &[f64], series2: &[f64]) -> Result<f64> {
    if series1.len() != series2.len() {
        return Err(anyhow!("Series must have same length"));
    }

    if series1.len() < 2 {
        return Err(anyhow!("Need at least 2 points for correlation"));
    }

    let mean1 = series1.mean();
    let mean2 = series2.mean();

    let mut cov = 0.0;
    let mut var1 = 0.0;
    let mut var2 = 0.0;

    for (a, b) in series1.iter().zip(series2.iter()) {
        let diff1 = a - mean1;
        let diff2 = b - mean2;
        cov += diff1 * diff2;
        var1 += diff1 * diff1;
        var2 += diff2 * diff2;
    }

    if var1 > 0.0 && var2 > 0.0 {
        Ok(cov / (var1.sqrt() * var2.sqrt()))
    } else {
        Ok(0.0)
    }
}

/// Correlation of a series against its own bar index `0..len`
pub fn index_correlation(series: &[f64]) -> Result<f64> {
    let index: Vec<f64> = (0..series.len()).map(|i| i as f64).collect();
    pearson_correlation(series, &index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_correlation() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson_correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_index_correlation() {
        let falling = vec![5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((index_correlation(&falling).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_series_is_zero() {
        let flat = vec![3.0; 6];
        assert_eq!(index_correlation(&flat).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0]).is_err());
    }
}
