//! Smoke checks and the suites built from them.

use std::thread::sleep;
use std::time::Duration;

use log::debug;

use crate::client::{Backend, CacheClient};
use crate::errors::{SmokeError, SmokeResult};

/// One smoke check. Every variant is a short sequence of `set`/`get` calls
/// followed by a literal comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Check {
    /// Write `value` under `key` and read it back.
    RoundTrip { key: String, value: String },
    /// Like `RoundTrip`, but wait `delay` between the write and the read.
    DelayedRoundTrip {
        key: String,
        value: String,
        delay: Duration,
    },
    /// `key` must not be present.
    Missing { key: String },
    /// Read `key` and report whatever comes back.
    Probe { key: String },
    /// Write `{prefix}0 .. {prefix}{count-1}`, each holding its own name, then
    /// read every one of them back in order.
    Bulk { prefix: String, count: usize },
}

/// How many writes and reads a check made.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub writes: usize,
    pub reads: usize,
    /// The value read, for checks that read a single key.
    pub observed: Option<String>,
}

impl Check {
    pub fn round_trip(key: impl Into<String>, value: impl Into<String>) -> Self {
        Check::RoundTrip {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delayed_round_trip(
        key: impl Into<String>,
        value: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Check::DelayedRoundTrip {
            key: key.into(),
            value: value.into(),
            delay,
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Check::Missing { key: key.into() }
    }

    pub fn probe(key: impl Into<String>) -> Self {
        Check::Probe { key: key.into() }
    }

    pub fn bulk(prefix: impl Into<String>, count: usize) -> Self {
        Check::Bulk {
            prefix: prefix.into(),
            count,
        }
    }

    /// A short label for reports.
    pub fn name(&self) -> String {
        match self {
            Check::RoundTrip { key, .. } => format!("set/get {key}"),
            Check::DelayedRoundTrip { key, delay, .. } => {
                format!("set/get {key} after {}ms", delay.as_millis())
            }
            Check::Missing { key } => format!("missing {key}"),
            Check::Probe { key } => format!("probe {key}"),
            Check::Bulk { prefix, count } => match count {
                0 => format!("bulk {prefix}* (empty)"),
                n => format!("bulk {prefix}0..{prefix}{}", n - 1),
            },
        }
    }

    pub fn run<C: CacheClient + ?Sized>(&self, client: &mut C) -> SmokeResult<CheckOutcome> {
        let mut outcome = CheckOutcome::default();
        self.run_counted(client, &mut outcome)?;
        Ok(outcome)
    }

    /// Runs the check, counting into `outcome` as it goes so that a failed
    /// check still shows how far it got.
    pub fn run_counted<C: CacheClient + ?Sized>(
        &self,
        client: &mut C,
        outcome: &mut CheckOutcome,
    ) -> SmokeResult<()> {
        match self {
            Check::RoundTrip { key, value } => {
                write(client, outcome, key, value)?;
                expect_value(client, outcome, key, value)
            }
            Check::DelayedRoundTrip { key, value, delay } => {
                write(client, outcome, key, value)?;
                debug!("sleeping {delay:?} before reading {key:?}");
                sleep(*delay);
                expect_value(client, outcome, key, value)
            }
            Check::Missing { key } => match read(client, outcome, key)? {
                None => Ok(()),
                Some(actual) => Err(SmokeError::UnexpectedValue {
                    key: key.clone(),
                    actual,
                }),
            },
            Check::Probe { key } => {
                outcome.observed = read(client, outcome, key)?;
                Ok(())
            }
            Check::Bulk { prefix, count } => {
                let keys: Vec<String> = (0..*count).map(|i| format!("{prefix}{i}")).collect();
                for key in &keys {
                    write(client, outcome, key, key)?;
                }
                for key in &keys {
                    expect_value(client, outcome, key, key)?;
                }
                outcome.observed = None;
                Ok(())
            }
        }
    }
}

fn write<C: CacheClient + ?Sized>(
    client: &mut C,
    outcome: &mut CheckOutcome,
    key: &str,
    value: &str,
) -> SmokeResult<()> {
    client.set(key, value)?;
    outcome.writes += 1;
    Ok(())
}

fn read<C: CacheClient + ?Sized>(
    client: &mut C,
    outcome: &mut CheckOutcome,
    key: &str,
) -> SmokeResult<Option<String>> {
    let value = client.get(key)?;
    outcome.reads += 1;
    Ok(value)
}

fn expect_value<C: CacheClient + ?Sized>(
    client: &mut C,
    outcome: &mut CheckOutcome,
    key: &str,
    expected: &str,
) -> SmokeResult<()> {
    let actual = read(client, outcome, key)?;
    if actual.as_deref() == Some(expected) {
        outcome.observed = actual;
        Ok(())
    } else {
        Err(SmokeError::Mismatch {
            key: key.to_owned(),
            expected: expected.to_owned(),
            actual,
        })
    }
}

/// Tunables for the built-in suites.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiteOptions {
    /// How long the delayed round trip waits before reading.
    pub delay: Duration,
    /// Number of keys written by the bulk check.
    pub bulk_count: usize,
    pub bulk_prefix: String,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        SuiteOptions {
            delay: Duration::from_secs(1),
            bulk_count: 1000,
            bulk_prefix: "test".to_owned(),
        }
    }
}

/// A named, ordered list of checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suite {
    name: String,
    checks: Vec<Check>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Suite {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// The default suite for a backend.
    ///
    /// Redis gets a round trip and a missing-key read; the cluster suite adds
    /// the bulk write so keys land on every shard; memcached gets a delayed
    /// round trip, a plain one, and a few unchecked reads.
    pub fn for_backend(backend: Backend, options: &SuiteOptions) -> Suite {
        let suite = Suite::new(backend.as_str());
        match backend {
            Backend::Redis => suite
                .check(Check::round_trip("foo", "bar"))
                .check(Check::missing("bob")),
            Backend::RedisCluster => suite
                .check(Check::round_trip("foo", "bar"))
                .check(Check::missing("bob"))
                .check(Check::bulk(&options.bulk_prefix, options.bulk_count)),
            Backend::Memcached => (1..=4).fold(
                suite
                    .check(Check::delayed_round_trip("titi", "tutu", options.delay))
                    .check(Check::round_trip("foo", "bar")),
                |suite, i| suite.check(Check::probe(format!("test{i}"))),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Check::round_trip("foo", "bar"), "set/get foo")]
    #[case(
        Check::delayed_round_trip("titi", "tutu", Duration::from_secs(1)),
        "set/get titi after 1000ms"
    )]
    #[case(Check::missing("bob"), "missing bob")]
    #[case(Check::probe("test1"), "probe test1")]
    #[case(Check::bulk("test", 1000), "bulk test0..test999")]
    #[case(Check::bulk("k", 0), "bulk k* (empty)")]
    fn check_names(#[case] check: Check, #[case] expected: &str) {
        assert_eq!(check.name(), expected);
    }

    #[test]
    fn redis_suite() {
        let suite = Suite::for_backend(Backend::Redis, &SuiteOptions::default());
        assert_eq!(suite.name(), "redis");
        assert_eq!(
            suite.checks(),
            &[Check::round_trip("foo", "bar"), Check::missing("bob")]
        );
    }

    #[test]
    fn cluster_suite_includes_bulk_write() {
        let options = SuiteOptions {
            bulk_count: 10,
            ..Default::default()
        };
        let suite = Suite::for_backend(Backend::RedisCluster, &options);
        assert_eq!(suite.checks().last(), Some(&Check::bulk("test", 10)));
        assert_eq!(suite.len(), 3);
    }

    #[test]
    fn memcached_suite() {
        let options = SuiteOptions {
            delay: Duration::from_millis(5),
            ..Default::default()
        };
        let suite = Suite::for_backend(Backend::Memcached, &options);
        assert_eq!(
            suite.checks(),
            &[
                Check::delayed_round_trip("titi", "tutu", Duration::from_millis(5)),
                Check::round_trip("foo", "bar"),
                Check::probe("test1"),
                Check::probe("test2"),
                Check::probe("test3"),
                Check::probe("test4"),
            ]
        );
    }

    #[test]
    fn empty_suite() {
        let suite = Suite::new("nothing");
        assert!(suite.is_empty());
    }
}
