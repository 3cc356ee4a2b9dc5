//! Strongly-typed identifiers for domain entities.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn value(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(raw.parse()?))
            }
        }
    };
}

define_id!(PipelineRunId, "run");
define_id!(ModificationId, "mod");

/// Case-insensitive pipeline name.
///
/// Equality, hashing and ordering use the lowercased form; `Display` keeps
/// the casing the name was declared with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PipelineName {
    original: String,
    folded: String,
}

impl PipelineName {
    pub fn new(name: impl Into<String>) -> Self {
        let original = name.into();
        let folded = original.to_lowercase();
        Self { original, folded }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// The lowercased form used for comparisons.
    pub fn to_lower(&self) -> &str {
        &self.folded
    }
}

impl From<String> for PipelineName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for PipelineName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<PipelineName> for String {
    fn from(name: PipelineName) -> Self {
        name.original
    }
}

impl PartialEq for PipelineName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for PipelineName {}

impl Hash for PipelineName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for PipelineName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PipelineName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl fmt::Display for PipelineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Content-derived identity of a material source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
