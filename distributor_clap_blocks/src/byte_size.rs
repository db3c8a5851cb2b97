//! Config for byte sizes such as the cache capacity.
use std::{ops::Deref, str::FromStr};

/// Parsable number of bytes.
///
/// Accepts a plain number of bytes or a number followed by a decimal (`KB`, `MB`, `GB`, `TB`) or
/// binary (`KiB`, `MiB`, `GiB`, `TiB`) unit. Units are case insensitive and may be separated from
/// the number by whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(u64);

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
];

impl ByteSize {
    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl Deref for ByteSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let number: u64 = number
            .parse()
            .map_err(|_| format!("Cannot parse byte size '{s}': expected a number of bytes"))?;

        let unit = unit.trim().to_ascii_lowercase();
        let multiplier = if unit.is_empty() {
            1
        } else {
            UNITS
                .iter()
                .find(|(name, _)| *name == unit)
                .map(|(_, multiplier)| *multiplier)
                .ok_or_else(|| format!("Cannot parse byte size '{s}': unknown unit '{unit}'"))?
        };

        number
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("Cannot parse byte size '{s}': too large"))
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> u64 {
        ByteSize::from_str(s).unwrap().bytes()
    }

    #[test]
    fn test_byte_size() {
        assert_eq!(parse("0"), 0);
        assert_eq!(parse("1234"), 1234);
        assert_eq!(parse("10B"), 10);
        assert_eq!(parse("5KB"), 5_000);
        assert_eq!(parse("5 MB"), 5_000_000);
        assert_eq!(parse("2GB"), 2_000_000_000);
        assert_eq!(parse("1TB"), 1_000_000_000_000);
        assert_eq!(parse("4KiB"), 4096);
        assert_eq!(parse("10GiB"), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse("1tib"), 1 << 40);
    }

    #[test]
    fn test_invalid_byte_size() {
        assert_eq!(
            ByteSize::from_str("GiB").unwrap_err(),
            "Cannot parse byte size 'GiB': expected a number of bytes"
        );
        assert_eq!(
            ByteSize::from_str("3 parsecs").unwrap_err(),
            "Cannot parse byte size '3 parsecs': unknown unit 'parsecs'"
        );
        assert_eq!(
            ByteSize::from_str("-1").unwrap_err(),
            "Cannot parse byte size '-1': expected a number of bytes"
        );
        assert_eq!(
            ByteSize::from_str("100000000TiB").unwrap_err(),
            "Cannot parse byte size '100000000TiB': too large"
        );
    }
}
