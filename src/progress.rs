//! Consumer-side progress accounting.

use std::fmt;

/// How far the consumer got through a run.
///
/// Only the consumer side writes this; everybody else reads snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    /// Items the consumer accepted so far
    pub consumed: u64,
    /// Items the producer will emit in total
    pub total: u64,
}

impl Progress {
    /// Nothing consumed yet out of `total`
    pub fn new(total: u64) -> Self {
        Self { consumed: 0, total }
    }

    /// `(consumed / total) * 100`, truncated, clamped to 100
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = u128::from(self.consumed) * 100 / u128::from(self.total);
        percent.min(100) as u8
    }

    /// Whether every produced item reached the consumer
    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.total
    }

    pub(crate) fn advance(&mut self) {
        self.consumed += 1;
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({}%)", self.consumed, self.total, self.percent())
    }
}
