//! Leap offset sequence
//!
//! While leaping a job probes at cumulative offsets drawn from
//! `base^0, base^0, base^1, base^1, base^2, …` (each power repeated
//! `repeat` times). With the defaults that is `1, 1, 2, 2, 4, 4, 8, 8, …`,
//! so the distance covered roughly doubles every two probes.

use crate::error::ConfigError;

pub const DEFAULT_BASE: i64 = 2;
pub const DEFAULT_REPEAT: u32 = 2;

/// Parameters of the leap offset sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpPolicy {
    base: i64,
    repeat: u32,
}

impl Default for JumpPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            repeat: DEFAULT_REPEAT,
        }
    }
}

impl JumpPolicy {
    pub fn new(base: i64, repeat: u32) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidJump {
            base,
            repeat,
            reason: reason.into(),
        };
        if base < 1 {
            return Err(invalid("base must be at least 1"));
        }
        if repeat == 0 {
            return Err(invalid("repeat must be at least 1"));
        }
        Ok(Self { base, repeat })
    }

    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Fresh offset sequence; ends once an offset would overflow `i64`
    pub fn offsets(&self) -> JumpOffsets {
        JumpOffsets {
            base: self.base,
            repeat: self.repeat,
            next: Some(1),
            emitted: 0,
        }
    }
}

/// Iterator over leap offsets
#[derive(Debug, Clone)]
pub struct JumpOffsets {
    base: i64,
    repeat: u32,
    next: Option<i64>,
    emitted: u32,
}

impl Iterator for JumpOffsets {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let offset = self.next?;
        self.emitted += 1;
        if self.emitted == self.repeat {
            self.emitted = 0;
            self.next = offset.checked_mul(self.base);
        }
        Some(offset)
    }
}
