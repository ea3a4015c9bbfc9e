use std::str::FromStr;

use ahash::HashSet;
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The relay port range, both ends inclusive.
///
/// The server SHOULD only allocate ports from the range 49152 - 65535
/// (the Dynamic and/or Private Port range), unless it knows that other
/// applications running on the same host will not be impacted. It
/// SHOULD NOT allocate ports in the range 0 - 1023 to discourage
/// clients from using TURN to run standard services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn size(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 49152,
            end: 65535,
        }
    }
}

impl From<std::ops::RangeInclusive<u16>> for PortRange {
    fn from(range: std::ops::RangeInclusive<u16>) -> Self {
        assert!(range.start() <= range.end());

        Self {
            start: *range.start(),
            end: *range.end(),
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or(PortRangeParseError(s.to_string()))?;

        let (start, end) = (start.parse()?, end.parse()?);
        if start > end {
            return Err(PortRangeParseError(s.to_string()));
        }

        Ok(Self { start, end })
    }
}

#[cfg(feature = "serde")]
impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))
    }
}

/// Relay port pool.
///
/// Ports are handed out starting from a random position so that the
/// relay port of one allocation tells an off-path attacker nothing
/// about the next one, which is what makes blind traffic injection
/// against the five-tuple hard.
pub struct PortAllocator {
    range: PortRange,
    used: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default())
    }
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            used: HashSet::default(),
            range,
        }
    }

    pub fn capacity(&self) -> usize {
        self.range.size()
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Take a free port out of the pool.
    pub fn alloc(&mut self) -> Option<u16> {
        let span = self.range.size();
        if self.used.len() >= span {
            return None;
        }

        // Random probe, then a linear walk from there. The pool is
        // nearly empty in any healthy deployment, so the walk is
        // almost always zero steps.
        let start = rand::rng().random_range(0..span);
        for i in 0..span {
            let port = self.range.start + ((start + i) % span) as u16;
            if self.used.insert(port) {
                return Some(port);
            }
        }

        None
    }

    /// Hand a port back to the pool.
    pub fn restore(&mut self, port: u16) {
        assert!(self.range.contains(port));
        self.used.remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_range() {
        assert_eq!(
            "50000..50010".parse::<PortRange>().unwrap(),
            PortRange::from(50000..=50010)
        );

        assert!("50010..50000".parse::<PortRange>().is_err());
        assert!("50000".parse::<PortRange>().is_err());
    }

    #[test]
    fn alloc_and_restore() {
        let mut pool = PortAllocator::new(PortRange::from(50000..=50003));
        assert_eq!(pool.capacity(), 4);

        let mut ports = Vec::new();
        while let Some(port) = pool.alloc() {
            assert!(pool.range.contains(port));
            ports.push(port);
        }

        assert_eq!(pool.len(), 4);
        assert_eq!(pool.alloc(), None);

        pool.restore(ports[0]);
        assert_eq!(pool.alloc(), Some(ports[0]));
    }

    #[test]
    fn alloc_never_repeats_until_restored() {
        let mut pool = PortAllocator::default();

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
    }
}
