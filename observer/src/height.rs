//! Ledger block heights.
//!
//! Every state-changing protocol event is stamped with a `<chain>:<height>` coordinate. Only the
//! numeric segment is ordered; the chain segment identifies the ledger (or epoch) and must simply
//! be present.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Separator between the chain and height segments.
const SEPARATOR: char = ':';

/// How a new observation must relate to the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The new height may equal the previous one (e.g. a redelivered or derived update).
    Monotonic,
    /// The new height must be greater (the observation reflects a new action).
    Strict,
}

/// A parsed `<chain>:<height>` coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockHeight {
    chain: String,
    height: u64,
}

impl BlockHeight {
    /// Create a new [BlockHeight].
    pub fn new(chain: impl Into<String>, height: u64) -> Self {
        Self {
            chain: chain.into(),
            height,
        }
    }

    /// The chain (or epoch) segment.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// The numeric segment.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Returns whether `self` is an acceptable successor of `previous` under `advance`.
    pub fn follows(&self, previous: &BlockHeight, advance: Advance) -> bool {
        match advance {
            Advance::Monotonic => self.height >= previous.height,
            Advance::Strict => self.height > previous.height,
        }
    }
}

impl FromStr for BlockHeight {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = s.split(SEPARATOR);
        let (Some(chain), Some(height), None) = (segments.next(), segments.next(), segments.next())
        else {
            return Err(Error::InvalidBlockHeight(s.to_string()));
        };
        if chain.is_empty() || height.is_empty() {
            return Err(Error::InvalidBlockHeight(s.to_string()));
        }

        // `u64::from_str` accepts a leading `+`, which is not a ledger coordinate
        if !height.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidBlockHeight(s.to_string()));
        }
        let height = height
            .parse::<u64>()
            .map_err(|_| Error::InvalidBlockHeight(s.to_string()))?;
        Ok(Self::new(chain, height))
    }
}

impl TryFrom<String> for BlockHeight {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockHeight> for String {
    fn from(value: BlockHeight) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.chain, SEPARATOR, self.height)
    }
}
