//! Bandwidth limits.
//!
//! A limit is either `Unlimited` or a positive number of bytes per second.
//! Zero and "absent" both normalise to `Unlimited`; there is no way to ask
//! for zero throughput.
//!
//! Burst follows the rate: one second worth of tokens, clamped to
//! [`MAX_BURST`] so token arithmetic never overflows.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Largest burst a finite limit will derive.
pub const MAX_BURST: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum Limit {
    /// Never throttled.
    #[default]
    Unlimited,
    BytesPerSec(NonZeroU64),
}

impl Limit {
    /// `0` means unlimited.
    pub const fn from_bytes_per_sec(bytes_per_sec: u64) -> Self {
        match NonZeroU64::new(bytes_per_sec) {
            Some(n) => Limit::BytesPerSec(n),
            None => Limit::Unlimited,
        }
    }

    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Refill rate in tokens per second. `INFINITY` when unlimited.
    pub fn rate(&self) -> f64 {
        match self {
            Limit::Unlimited => f64::INFINITY,
            Limit::BytesPerSec(n) => n.get() as f64,
        }
    }

    /// Bucket capacity for this limit. `0` when unlimited.
    pub fn burst(&self) -> u64 {
        match self {
            Limit::Unlimited => 0,
            Limit::BytesPerSec(n) => n.get().min(MAX_BURST),
        }
    }

    /// Bytes per second, `None` when unlimited.
    pub fn bytes_per_sec(&self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::BytesPerSec(n) => Some(n.get()),
        }
    }
}

impl From<u64> for Limit {
    fn from(bytes_per_sec: u64) -> Self {
        Limit::from_bytes_per_sec(bytes_per_sec)
    }
}

impl From<Option<u64>> for Limit {
    fn from(bytes_per_sec: Option<u64>) -> Self {
        bytes_per_sec.map_or(Limit::Unlimited, Limit::from_bytes_per_sec)
    }
}

impl From<NonZeroU64> for Limit {
    fn from(bytes_per_sec: NonZeroU64) -> Self {
        Limit::BytesPerSec(bytes_per_sec)
    }
}

impl From<Limit> for u64 {
    fn from(limit: Limit) -> Self {
        limit.bytes_per_sec().unwrap_or(0)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::BytesPerSec(n) => write!(f, "{n} B/s"),
        }
    }
}
