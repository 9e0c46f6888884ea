//! Stateless statistical primitives for the indicator stage.
//!
//! Every function is a pure batch transformation over a slice ordered
//! oldest-first, operating on the trailing `window` points. Nothing here
//! allocates per call beyond what the return value needs, so the functions
//! are safe to call concurrently from any number of instrument evaluations.

use crate::types::IndicatorError;

/// Standard-deviation multiplier for Bollinger bands.
pub const BOLLINGER_STD_MULTIPLIER: f64 = 2.0;

/// Upper, middle and lower Bollinger bands at the last point of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// `(upper − lower) / middle`, or `None` when the middle band is zero.
    pub fn width(&self) -> Option<f64> {
        if self.middle == 0.0 {
            None
        } else {
            Some((self.upper - self.lower) / self.middle)
        }
    }
}

fn tail(series: &[f64], window: usize) -> Result<&[f64], IndicatorError> {
    if window == 0 || series.len() < window {
        return Err(IndicatorError::InsufficientData {
            needed: window.max(1),
            available: series.len(),
        });
    }
    Ok(&series[series.len() - window..])
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std_of(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Arithmetic mean of the last `window` points.
pub fn moving_average(series: &[f64], window: usize) -> Result<f64, IndicatorError> {
    Ok(mean_of(tail(series, window)?))
}

/// Population standard deviation of the last `window` points.
pub fn standard_deviation(series: &[f64], window: usize) -> Result<f64, IndicatorError> {
    let values = tail(series, window)?;
    Ok(population_std_of(values, mean_of(values)))
}

/// Mean and population standard deviation of a whole slice.
///
/// Returns `None` for an empty slice.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = mean_of(values);
    Some((mean, population_std_of(values, mean)))
}

/// Bollinger bands over the last `window` points.
pub fn bollinger_bands(series: &[f64], window: usize, num_std: f64) -> Result<BollingerBands, IndicatorError> {
    let values = tail(series, window)?;
    let middle = mean_of(values);
    let std = population_std_of(values, middle);
    Ok(BollingerBands {
        upper: middle + num_std * std,
        middle,
        lower: middle - num_std * std,
    })
}

/// True when the normalised band width is below `width_threshold`.
///
/// A zero middle band makes the width undefined; that is reported as no squeeze.
pub fn bollinger_squeeze(series: &[f64], window: usize, width_threshold: f64) -> Result<bool, IndicatorError> {
    let bands = bollinger_bands(series, window, BOLLINGER_STD_MULTIPLIER)?;
    Ok(bands.width().map(|w| w < width_threshold).unwrap_or(false))
}

/// Z-score of the last point against the last `window` points.
///
/// `Ok(None)` when the window has zero dispersion.
pub fn z_score(series: &[f64], window: usize) -> Result<Option<f64>, IndicatorError> {
    let values = tail(series, window)?;
    let mean = mean_of(values);
    let std = population_std_of(values, mean);
    if std == 0.0 {
        return Ok(None);
    }
    let last = values[values.len() - 1];
    Ok(Some((last - mean) / std))
}

/// Relative strength index over the last `period` price changes.
///
/// Uses simple averages of gains and losses. A window with no losses reads
/// 100; a flat window has no defined RSI.
pub fn rsi(series: &[f64], period: usize) -> Result<Option<f64>, IndicatorError> {
    let values = tail(series, period + 1)?;
    let (gains, losses) = values.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            (g + delta, l)
        } else {
            (g, l - delta)
        }
    });
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_gain == 0.0 && avg_loss == 0.0 {
        return Ok(None);
    }
    if avg_loss == 0.0 {
        return Ok(Some(100.0));
    }
    let rs = avg_gain / avg_loss;
    Ok(Some(100.0 - 100.0 / (1.0 + rs)))
}
