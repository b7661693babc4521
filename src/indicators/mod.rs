// Pure numerical primitives over close-price series.
//
// All functions take a chronological slice (oldest first) and evaluate at the
// last element. They return None when the window does not fit; divisions by
// zero yield the neutral output for the indicator (0 for slopes and z-scores,
// 0.5 for %B) so downstream signals degrade to NEUTRAL instead of NaN.

/// Annualization factor for daily observations.
pub const TRADING_DAYS: f64 = 252.0;

/// Arithmetic mean of the last `n` values.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    Some(tail.iter().sum::<f64>() / n as f64)
}

/// Rate of change over `n` sessions: `values[t] / values[t-n] - 1`.
pub fn roc(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n + 1 {
        return None;
    }
    let last = values[values.len() - 1];
    let base = values[values.len() - 1 - n];
    if base == 0.0 {
        return Some(0.0);
    }
    Some(last / base - 1.0)
}

/// Sample standard deviation (n−1 denominator).
pub fn stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Log returns of consecutive values.
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Annualized standard deviation of the last `n` daily log returns.
pub fn realized_vol(values: &[f64], n: usize) -> Option<f64> {
    if n < 2 || values.len() < n + 1 {
        return None;
    }
    let returns = log_returns(&values[values.len() - n - 1..]);
    stdev(&returns).map(|s| s * TRADING_DAYS.sqrt())
}

/// Relative Strength Index with Wilder's smoothing, classical 0–100 range.
pub fn rsi(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n + 1 {
        return None;
    }
    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for w in values.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    // Seed with a simple average, then apply Wilder's smoothing.
    let mut avg_gain = gains[..n].iter().sum::<f64>() / n as f64;
    let mut avg_loss = losses[..n].iter().sum::<f64>() / n as f64;
    for i in n..gains.len() {
        avg_gain = ((n as f64 - 1.0) * avg_gain + gains[i]) / n as f64;
        avg_loss = ((n as f64 - 1.0) * avg_loss + losses[i]) / n as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Bollinger %B: position of the last price inside the `SMA ± k·stdev` band.
/// A zero-width band yields the neutral 0.5.
pub fn bollinger_pct_b(values: &[f64], n: usize, k: f64) -> Option<f64> {
    if values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    let mid = sma(tail, n)?;
    let sd = stdev(tail)?;
    let upper = mid + k * sd;
    let lower = mid - k * sd;
    if upper == lower {
        return Some(0.5);
    }
    Some((values[values.len() - 1] - lower) / (upper - lower))
}

/// OLS slope of the last `n` values regressed on indices 0..n−1.
pub fn linreg_slope(values: &[f64], n: usize) -> Option<f64> {
    if n < 2 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = tail.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in tail.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        return Some(0.0);
    }
    Some(num / den)
}

/// Standard score of `value` against a reference window.
/// Zero dispersion yields the neutral 0.
pub fn zscore(value: f64, window: &[f64]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let sd = stdev(window)?;
    if sd == 0.0 {
        return Some(0.0);
    }
    Some((value - mean) / sd)
}
