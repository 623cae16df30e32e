//! Indicator formulas (spec §4.9, "Indicator semantics (exact)").
//!
//! Pure functions over price/volume slices — no I/O, no locking — so the
//! cache and pipeline layers can call them freely from a `rayon` pool.
//! Grounded on the teacher's preference for small, independently testable
//! numeric helpers (see `signals/quality.rs::RollingStats`), generalized
//! here from a single running statistic to the full indicator set the spec
//! requires.

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct BollingerBands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct VolumeSummary {
    pub current: f64,
    pub avg: f64,
    pub ratio: f64,
}

/// Classic Wilder RSI over the last `n + 1` closes. Returns 50 on
/// insufficient history, 100 when average loss is zero.
pub fn rsi(closes: &[f64], n: usize) -> f64 {
    if closes.len() < n + 1 {
        return 50.0;
    }
    let window = &closes[closes.len() - (n + 1)..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in window.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gain_sum += diff;
        } else {
            loss_sum += -diff;
        }
    }
    let avg_gain = gain_sum / n as f64;
    let avg_loss = loss_sum / n as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// EMA value at every index from `n - 1` onward, seeded by the SMA of the
/// first `n` samples. `None` before the seed index or when there aren't
/// enough samples at all.
fn ema_series(values: &[f64], n: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if values.len() < n || n == 0 {
        return out;
    }
    let seed = values[..n].iter().sum::<f64>() / n as f64;
    out[n - 1] = Some(seed);
    let k = 2.0 / (n as f64 + 1.0);
    let mut ema = seed;
    for (i, value) in values.iter().enumerate().skip(n) {
        ema = (value - ema) * k + ema;
        out[i] = Some(ema);
    }
    out
}

/// The final EMA(n) value over `values`. Falls back to the plain mean when
/// there are fewer than `n` samples so callers get a defined number instead
/// of having to special-case an empty indicator.
pub fn ema(values: &[f64], n: usize) -> f64 {
    match ema_series(values, n).into_iter().flatten().last() {
        Some(v) => v,
        None if !values.is_empty() => values.iter().sum::<f64>() / values.len() as f64,
        None => 0.0,
    }
}

/// MACD(12, 26, 9): EMA12 - EMA26, signal = EMA9 of the MACD history,
/// histogram = MACD - signal. Zeroed when fewer than 26 samples.
pub fn macd(closes: &[f64]) -> Macd {
    if closes.len() < 26 {
        return Macd::default();
    }
    let ema12 = ema_series(closes, 12);
    let ema26 = ema_series(closes, 26);
    let macd_line: Vec<f64> = ema12
        .iter()
        .zip(ema26.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        })
        .collect();

    let signal = ema(&macd_line, 9);
    let macd_value = *macd_line.last().unwrap_or(&0.0);
    Macd {
        macd: macd_value,
        signal,
        histogram: macd_value - signal,
    }
}

/// Bollinger(n, k): middle = SMA(n), bands = middle ± k·σ over the same
/// window, width = (upper - lower) / middle · 100. Degenerate (all zero)
/// when fewer than `n` samples.
pub fn bollinger(closes: &[f64], n: usize, k: f64) -> BollingerBands {
    if closes.len() < n || n == 0 {
        return BollingerBands::default();
    }
    let window = &closes[closes.len() - n..];
    let middle = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / n as f64;
    let sigma = variance.sqrt();
    let upper = middle + k * sigma;
    let lower = middle - k * sigma;
    let width = if middle != 0.0 {
        (upper - lower) / middle * 100.0
    } else {
        0.0
    };
    BollingerBands {
        middle,
        upper,
        lower,
        width,
    }
}

/// current = last sample, avg = mean of the window, ratio = current / avg.
pub fn volume_summary(volumes: &[f64]) -> VolumeSummary {
    if volumes.is_empty() {
        return VolumeSummary::default();
    }
    let current = *volumes.last().unwrap();
    let avg = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let ratio = if avg != 0.0 { current / avg } else { 0.0 };
    VolumeSummary { current, avg, ratio }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_defaults_to_50_with_insufficient_history() {
        assert_eq!(rsi(&[1.0, 2.0], 14), 50.0);
    }

    #[test]
    fn rsi_is_100_when_all_gains() {
        let closes: Vec<f64> = (1..=15).map(|i| i as f64).collect();
        assert_eq!(rsi(&closes, 14), 100.0);
    }

    #[test]
    fn rsi_is_0_when_all_losses() {
        let closes: Vec<f64> = (1..=15).rev().map(|i| i as f64).collect();
        assert!(rsi(&closes, 14) < 1.0);
    }

    #[test]
    fn ema_seeds_with_sma_of_first_n() {
        let values = vec![1.0, 2.0, 3.0];
        let result = ema(&values, 3);
        assert!((result - 2.0).abs() < 1e-9);
    }

    #[test]
    fn macd_is_zeroed_under_26_samples() {
        let closes: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let m = macd(&closes);
        assert_eq!(m.macd, 0.0);
        assert_eq!(m.signal, 0.0);
    }

    #[test]
    fn bollinger_is_degenerate_under_window() {
        let b = bollinger(&[1.0, 2.0], 20, 2.0);
        assert_eq!(b.middle, 0.0);
    }

    #[test]
    fn bollinger_flat_series_has_zero_width() {
        let closes = vec![100.0; 20];
        let b = bollinger(&closes, 20, 2.0);
        assert_eq!(b.middle, 100.0);
        assert_eq!(b.width, 0.0);
    }

    #[test]
    fn volume_ratio_above_one_signals_surge() {
        let volumes = vec![10.0, 10.0, 10.0, 40.0];
        let v = volume_summary(&volumes);
        assert_eq!(v.current, 40.0);
        assert!(v.ratio > 1.0);
    }
}
