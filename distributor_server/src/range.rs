//! Single byte ranges of `Range: bytes=...` requests

use std::fmt;

/// A byte range as a client asked for it, before it is checked against the object size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// `bytes=<start>-` or `bytes=<start>-<end>`
    From { start: u64, end: Option<u64> },
    /// `bytes=-<len>`: the last `len` bytes
    Suffix { len: u64 },
}

impl RangeRequest {
    /// Parse the value of a `Range` header.
    ///
    /// Only a single range in bytes is supported. Anything else, including malformed values and
    /// multiple ranges, yields `None` and the whole object is served.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return Some(Self::Suffix {
                len: end.parse().ok()?,
            });
        }
        let start = start.parse().ok()?;
        let end = match end {
            "" => None,
            end => Some(end.parse().ok()?),
        };
        if end.is_some_and(|end| end < start) {
            return None;
        }
        Some(Self::From { start, end })
    }

    /// The part of an object of `size` bytes this request covers, `None` when it covers nothing
    pub fn resolve(self, size: u64) -> Option<ByteRange> {
        let last = size.checked_sub(1)?;
        match self {
            Self::From { start, .. } if start > last => None,
            Self::From { start, end } => Some(ByteRange {
                start,
                end: end.map_or(last, |end| end.min(last)),
            }),
            Self::Suffix { len: 0 } => None,
            Self::Suffix { len } => Some(ByteRange {
                start: size.saturating_sub(len),
                end: last,
            }),
        }
    }
}

/// An inclusive, non-empty range of bytes within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `Content-Range` header for this range of an object of `size` bytes
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_single_ranges() {
        assert_eq!(
            RangeRequest::parse("bytes=0-499"),
            Some(RangeRequest::From {
                start: 0,
                end: Some(499)
            })
        );
        assert_eq!(
            RangeRequest::parse("bytes=500-"),
            Some(RangeRequest::From {
                start: 500,
                end: None
            })
        );
        assert_eq!(
            RangeRequest::parse(" bytes= -200 "),
            Some(RangeRequest::Suffix { len: 200 })
        );
    }

    #[test]
    fn unsupported_ranges_are_ignored() {
        for value in [
            "",
            "bytes",
            "bytes=",
            "bytes=-",
            "items=0-1",
            "bytes=0-1,5-6",
            "bytes=5-1",
            "bytes=a-b",
            "bytes=1-2-3",
        ] {
            assert_eq!(RangeRequest::parse(value), None, "{value:?}");
        }
    }

    #[test]
    fn resolve_against_object_size() {
        let from = |start, end| RangeRequest::From { start, end };
        assert_eq!(
            from(0, Some(9)).resolve(100),
            Some(ByteRange { start: 0, end: 9 })
        );
        // clamped to the end of the object
        assert_eq!(
            from(90, Some(1000)).resolve(100),
            Some(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            from(10, None).resolve(100),
            Some(ByteRange { start: 10, end: 99 })
        );
        assert_eq!(from(100, None).resolve(100), None);
        assert_eq!(from(0, None).resolve(0), None);

        assert_eq!(
            RangeRequest::Suffix { len: 10 }.resolve(100),
            Some(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            RangeRequest::Suffix { len: 1000 }.resolve(100),
            Some(ByteRange { start: 0, end: 99 })
        );
        assert_eq!(RangeRequest::Suffix { len: 0 }.resolve(100), None);
    }

    #[test]
    fn content_range() {
        let range = ByteRange { start: 10, end: 19 };
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }
}
