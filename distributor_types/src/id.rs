use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest identifier accepted for objects, buckets and families
const MAX_ID_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidId {
    #[error("{kind} id must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} id exceeds {MAX_ID_LEN} characters")]
    TooLong { kind: &'static str },

    #[error("{kind} id {id:?} contains invalid character {invalid:?}")]
    InvalidCharacter {
        kind: &'static str,
        id: String,
        invalid: char,
    },
}

/// Object, bucket and family ids end up in file names and URL paths, so they are restricted to a
/// conservative alphabet. Buckets additionally use `:` to separate family and index.
fn validate(kind: &'static str, s: &str, extra: &[char]) -> Result<(), InvalidId> {
    if s.is_empty() {
        return Err(InvalidId::Empty { kind });
    }
    if s.len() > MAX_ID_LEN {
        return Err(InvalidId::TooLong { kind });
    }
    if let Some(invalid) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_' || extra.contains(c)))
    {
        return Err(InvalidId::InvalidCharacter {
            kind,
            id: s.to_string(),
            invalid,
        });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $kind:literal, $extra:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                validate($kind, s, $extra)?;
                Ok(Self(Arc::from(s)))
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidId;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                validate($kind, &s, $extra)?;
                Ok(Self(Arc::from(s)))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifies a content object for its whole lifetime
    ObjectId,
    "object",
    &[]
);

string_id!(
    /// Identifies a storage or distribution bucket, e.g. `0:3`
    BucketId,
    "bucket",
    &[':']
);

string_id!(
    /// Identifies a distribution bucket family
    FamilyId,
    "family",
    &[]
);

/// Identifies a worker operating distribution buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl FromStr for WorkerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
