//! Index spans
//!
//! A [`StepSpan`] is the closed arithmetic sequence `begin, begin+step, …`
//! bounded by `end`. An unbounded span has its end pinned to `i64::MAX`
//! (or `i64::MIN` for a negative step). [`WorkedSpan`] tracks the
//! contiguous interval of indices a job has visited so far.

use std::fmt;

use crate::error::ConfigError;

/// Begin/end/step triple describing a closed index range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpan {
    begin: i64,
    end: i64,
    step: i64,
    unbounded: bool,
}

impl StepSpan {
    /// Create a span; `end = None` leaves it unbounded in the step's direction
    pub fn new(begin: i64, end: Option<i64>, step: i64) -> Result<Self, ConfigError> {
        let (end, unbounded) = match end {
            Some(end) => (end, false),
            None if step > 0 => (i64::MAX, true),
            None if step < 0 => (i64::MIN, true),
            None => {
                return Err(ConfigError::InvalidSpan {
                    begin,
                    end: begin,
                    step,
                    reason: "an unbounded span needs a non-zero step".into(),
                })
            }
        };

        let invalid = |reason: &str| ConfigError::InvalidSpan {
            begin,
            end,
            step,
            reason: reason.into(),
        };
        if step == 0 && begin != end {
            return Err(invalid("step 0 is only valid for a single index"));
        }
        if begin < end && step < 0 {
            return Err(invalid("step must be positive when begin < end"));
        }
        if begin > end && step > 0 {
            return Err(invalid("step must be negative when begin > end"));
        }

        Ok(Self {
            begin,
            end,
            step,
            unbounded,
        })
    }

    /// Span walking back from `from` towards `to` with the step negated
    ///
    /// Callers guarantee `to` lies behind `from` in this span's direction.
    pub(crate) fn reversed_between(&self, from: i64, to: i64) -> Self {
        Self {
            begin: from,
            end: to,
            step: -self.step,
            unbounded: false,
        }
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }

    pub fn min(&self) -> i64 {
        self.begin.min(self.end)
    }

    pub fn max(&self) -> i64 {
        self.begin.max(self.end)
    }

    /// True if `index` lies within `min..=max`; the step grid is not checked
    pub fn contains(&self, index: i64) -> bool {
        (self.min()..=self.max()).contains(&index)
    }

    /// Number of integers in `min..=max`
    pub fn width(&self) -> u128 {
        (self.max() as i128 - self.min() as i128 + 1) as u128
    }

    /// Number of indices the step visits from begin to end
    pub fn count(&self) -> u128 {
        if self.step == 0 {
            return 1;
        }
        (self.max() as i128 - self.min() as i128) as u128 / self.step.unsigned_abs() as u128 + 1
    }

    /// The `n`th index of the sequence, if it lies within the span
    pub fn nth(&self, n: u128) -> Option<i64> {
        if n >= self.count() {
            return None;
        }
        let index = self.begin as i128 + n as i128 * self.step as i128;
        i64::try_from(index).ok()
    }

    /// Iterate the visited indices in order
    pub fn indices(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.count()).map_while(|n| self.nth(n))
    }
}

impl fmt::Display for StepSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unbounded {
            write!(f, "{}.. step {}", self.begin, self.step)
        } else {
            write!(f, "{}..={} step {}", self.begin, self.end, self.step)
        }
    }
}

/// Contiguous interval of indices visited so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkedSpan {
    bounds: Option<(i64, i64)>,
}

impl WorkedSpan {
    /// Widen the interval to include `index`
    pub fn extend(&mut self, index: i64) {
        self.bounds = Some(match self.bounds {
            None => (index, index),
            Some((min, max)) => (min.min(index), max.max(index)),
        });
    }

    pub fn min(&self) -> Option<i64> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<i64> {
        self.bounds.map(|(_, max)| max)
    }

    /// Number of integers in the interval
    pub fn width(&self) -> u128 {
        self.bounds
            .map(|(min, max)| (max as i128 - min as i128 + 1) as u128)
            .unwrap_or(0)
    }

    /// Fraction of `full` covered, ignoring the step
    pub fn fraction_of(&self, full: &StepSpan) -> f64 {
        (self.width() as f64 / full.width() as f64).clamp(0.0, 1.0)
    }
}
