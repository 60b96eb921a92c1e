//! Weighted range splitting
//!
//! A range of `n` indices is cut into contiguous chunks, one per weight,
//! with chunk `i` holding `ceil(n * w[i])` indices. The final chunk absorbs
//! whatever is left, so chunks never overlap and never leave gaps. Ranges
//! with fewer indices than weights, and unbounded ranges, stay whole.

use crate::error::ConfigError;
use crate::span::StepSpan;

/// Scale weights so they sum to 1
pub fn normalize_weights(weights: &[f64]) -> Result<Vec<f64>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidWeights {
        weights: weights.to_vec(),
        reason: reason.into(),
    };
    if weights.is_empty() {
        return Err(invalid("at least one weight is required"));
    }
    if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
        return Err(invalid("weights must be finite and positive"));
    }
    let total: f64 = weights.iter().sum();
    if !total.is_finite() {
        return Err(invalid("weights overflow when summed"));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// Split `span` into one chunk per normalized weight
pub fn plan(span: &StepSpan, weights: &[f64]) -> Result<Vec<StepSpan>, ConfigError> {
    let count = span.count();
    if span.is_unbounded() || weights.len() <= 1 || count < weights.len() as u128 {
        return Ok(vec![*span]);
    }

    let mut chunks = Vec::with_capacity(weights.len());
    let mut next: u128 = 0;
    for (i, weight) in weights.iter().enumerate() {
        let remaining = count - next;
        if remaining == 0 {
            break;
        }
        let size = if i + 1 == weights.len() {
            remaining
        } else {
            // Shave float noise so 100 * 0.5 never rounds up to 51
            let ideal = (count as f64 * weight - 1e-9).ceil().max(1.0) as u128;
            ideal.min(remaining)
        };

        let (Some(begin), Some(end)) = (span.nth(next), span.nth(next + size - 1)) else {
            break;
        };
        chunks.push(StepSpan::new(begin, Some(end), span.step())?);
        next += size;
    }
    Ok(chunks)
}
