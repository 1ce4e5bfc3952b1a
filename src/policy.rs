//! Overload policies applied by the mediator when the producer outpaces the consumer.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// What happens to an item that arrives while the consumer is still busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BackpressurePolicy {
    /// Keep every pending item in an unbounded queue. Nothing is lost,
    /// memory grows with the backlog.
    #[default]
    Buffer,
    /// One in-flight slot. Items offered while it is occupied are discarded.
    Drop,
    /// One "last value" cell. Every offer overwrites whatever is pending.
    Latest,
}

impl BackpressurePolicy {
    /// All policies, in the order the playground demonstrates them
    pub const ALL: [BackpressurePolicy; 3] = [
        BackpressurePolicy::Buffer,
        BackpressurePolicy::Drop,
        BackpressurePolicy::Latest,
    ];

    /// Lowercase name used for parsing, logging and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpressurePolicy::Buffer => "buffer",
            BackpressurePolicy::Drop => "drop",
            BackpressurePolicy::Latest => "latest",
        }
    }

    /// Whether the policy may discard items under contention
    pub fn is_lossy(&self) -> bool {
        !matches!(self, BackpressurePolicy::Buffer)
    }
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackpressurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(BackpressurePolicy::Buffer),
            "drop" => Ok(BackpressurePolicy::Drop),
            "latest" => Ok(BackpressurePolicy::Latest),
            other => Err(Error::invalid_argument(format!(
                "unknown backpressure policy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("BUFFER".parse::<BackpressurePolicy>().unwrap(), BackpressurePolicy::Buffer);
        assert_eq!(" Drop ".parse::<BackpressurePolicy>().unwrap(), BackpressurePolicy::Drop);
        assert_eq!("latest".parse::<BackpressurePolicy>().unwrap(), BackpressurePolicy::Latest);
    }

    #[test]
    fn test_parse_unknown_policy() {
        let err = "error".parse::<BackpressurePolicy>().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_lossy() {
        assert!(!BackpressurePolicy::Buffer.is_lossy());
        assert!(BackpressurePolicy::Drop.is_lossy());
        assert!(BackpressurePolicy::Latest.is_lossy());
    }
}
