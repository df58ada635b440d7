//! Client-side rate limits for the LLM endpoint.
//!
//! The task queue already limits how many worker invocations run at once,
//! but a single burst of page tasks can still exceed a model provider's
//! request quota. Limits are written as "count/period", e.g. "10/s" or
//! "300/m".

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// The period over which a rate limit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPeriod {
    Second,
    Minute,
}

impl RateLimitPeriod {
    fn as_duration(self) -> Duration {
        match self {
            RateLimitPeriod::Second => Duration::from_secs(1),
            RateLimitPeriod::Minute => Duration::from_secs(60),
        }
    }
}

/// A request rate limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of requests allowed per period.
    pub max_requests: usize,
    /// The period over which `max_requests` applies.
    pub per_period: RateLimitPeriod,
}

impl RateLimit {
    /// Build a [`RateLimiter`] enforcing this limit. The bucket starts
    /// full, so a worker that restarts mid-burst may briefly exceed the
    /// nominal rate.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(self.max_requests)
            .max(self.max_requests)
            .interval(self.per_period.as_duration())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.per_period {
            RateLimitPeriod::Second => "s",
            RateLimitPeriod::Minute => "m",
        };
        write!(f, "{}/{}", self.max_requests, period)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let (count, period) = s
                .split_once('/')
                .ok_or_else(|| anyhow!("expected \"count/period\""))?;
            let max_requests = count.parse::<usize>()?;
            let per_period = match period {
                "s" => RateLimitPeriod::Second,
                "m" => RateLimitPeriod::Minute,
                other => return Err(anyhow!("unsupported period: {:?}", other)),
            };
            Ok(Self {
                max_requests,
                per_period,
            })
        };
        parse(s).with_context(|| format!("failed to parse rate limit: {s:?}"))
    }
}
