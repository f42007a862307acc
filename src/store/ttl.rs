//! TTL Module
//!
//! A validated, strictly positive time-to-live in whole seconds.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CacheError, Result};

/// Time-to-live in seconds, always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Ttl(u64);

impl Ttl {
    /// Validates `seconds`; zero and negative values are rejected.
    pub fn from_secs(seconds: i64) -> Result<Self> {
        u64::try_from(seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Ttl)
            .ok_or_else(|| CacheError::InvalidTtl(format!("{} is not a positive number of seconds", seconds)))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Explicit TTL when given (validated), the default otherwise.
    pub fn resolve(explicit: Option<i64>, default: Option<Ttl>) -> Result<Option<Ttl>> {
        match explicit {
            Some(seconds) => Ttl::from_secs(seconds).map(Some),
            None => Ok(default),
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resolve() {
        let default = Ttl::from_secs(60).ok();
        assert_eq!(Ttl::resolve(None, default).unwrap(), default);
        assert_eq!(Ttl::resolve(Some(5), default).unwrap(), Ttl::from_secs(5).ok());
        assert_eq!(Ttl::resolve(None, None).unwrap(), None);
        assert!(matches!(Ttl::resolve(Some(0), default), Err(CacheError::InvalidTtl(_))));
    }

    proptest! {
        #[test]
        fn prop_positive_seconds_accepted(secs in 1i64..=i64::MAX) {
            prop_assert_eq!(Ttl::from_secs(secs).unwrap().as_secs(), secs as u64);
        }

        #[test]
        fn prop_non_positive_seconds_rejected(secs in i64::MIN..=0) {
            prop_assert!(matches!(Ttl::from_secs(secs), Err(CacheError::InvalidTtl(_))));
        }
    }
}
