/// Divides `numerator` by `denominator`, returning `None` when the denominator is zero
/// or the quotient is not finite.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// Fractional change from `previous` to `current`, measured against `|previous|`.
pub fn fractional_change(previous: f64, current: f64) -> Option<f64> {
    ratio(current - previous, previous.abs())
}

/// Relative comparison with an absolute floor so that values near zero compare sanely.
pub fn approx_eq(a: f64, b: f64, relative_tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= relative_tolerance * scale
}

/// Sums values in a canonical order so the result does not depend on input order.
pub fn order_independent_sum(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));

    // Neumaier compensated summation
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &value in values.iter() {
        let t = sum + value;
        if sum.abs() >= value.abs() {
            compensation += (sum - t) + value;
        } else {
            compensation += (value - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). Needs at least two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// True when every value equals the first within a relative tolerance.
pub fn is_constant(values: &[f64]) -> bool {
    match values.first() {
        Some(&first) => values.iter().all(|&v| approx_eq(v, first, 1e-12)),
        None => true,
    }
}
