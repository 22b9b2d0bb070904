use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one local version of a container.
///
/// Ordered by creation time, with a sequence number breaking ties between
/// versions created within the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId {
    pub timestamp: u64,
    pub sequence: u32,
}

impl VersionId {
    pub fn new(timestamp: u64, sequence: u32) -> Self {
        Self {
            timestamp,
            sequence,
        }
    }

    /// The id following `previous` at time `now`.
    ///
    /// Always strictly greater than `previous`, even if the clock went backwards.
    pub fn next(previous: Option<VersionId>, now: u64) -> Self {
        match previous {
            Some(prev) if now <= prev.timestamp => Self::new(prev.timestamp, prev.sequence + 1),
            _ => Self::new(now, 0),
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.timestamp, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_millisecond_bumps_sequence() {
        let first = VersionId::next(None, 1000);
        let second = VersionId::next(Some(first), 1000);
        let third = VersionId::next(Some(second), 999);
        let fourth = VersionId::next(Some(third), 1001);

        assert_eq!(first, VersionId::new(1000, 0));
        assert_eq!(second, VersionId::new(1000, 1));
        assert_eq!(third, VersionId::new(1000, 2));
        assert_eq!(fourth, VersionId::new(1001, 0));
        assert!(first < second && second < third && third < fourth);
    }

    #[test]
    fn displays_as_timestamp_and_sequence() {
        assert_eq!(VersionId::new(1704067200000, 7).to_string(), "1704067200000.7");
    }
}
