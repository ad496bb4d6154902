use std::time::Instant;

use log::{info, warn};

use crate::client::CacheClient;
use crate::report::{CheckReport, Status, SuiteReport};
use crate::scenario::{Check, CheckOutcome, Suite};

/// Runs suites against a connected client.
///
/// In fail-fast mode (the default) the first failing check stops the suite
/// and every later check is reported as skipped.
pub struct Runner<C> {
    client: C,
    target: String,
    fail_fast: bool,
}

impl<C: CacheClient> Runner<C> {
    pub fn new(client: C, target: impl Into<String>) -> Self {
        Runner {
            client,
            target: target.into(),
            fail_fast: true,
        }
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn client(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    pub fn run(&mut self, suite: &Suite) -> SuiteReport {
        let backend = self.client.backend();
        let mut checks = Vec::with_capacity(suite.len());
        let mut failed = false;

        for check in suite.checks() {
            let name = check.name();
            if failed && self.fail_fast {
                checks.push(CheckReport::skipped(name));
                continue;
            }

            info!("{backend}: {name}");
            let start = Instant::now();
            let mut outcome = CheckOutcome::default();
            let result = check.run_counted(&mut self.client, &mut outcome);
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            let report = match result {
                Ok(()) => CheckReport {
                    detail: detail(check, &outcome),
                    name,
                    status: Status::Passed,
                    elapsed_ms,
                    writes: outcome.writes,
                    reads: outcome.reads,
                },
                Err(err) => {
                    warn!("{backend}: {name} failed: {err}");
                    failed = true;
                    CheckReport {
                        name,
                        status: Status::Failed,
                        elapsed_ms,
                        writes: outcome.writes,
                        reads: outcome.reads,
                        detail: Some(err.to_string()),
                    }
                }
            };
            checks.push(report);
        }

        SuiteReport {
            backend,
            suite: suite.name().to_owned(),
            target: self.target.clone(),
            checks,
        }
    }
}

fn detail(check: &Check, outcome: &CheckOutcome) -> Option<String> {
    match check {
        Check::Bulk { .. } => Some(format!("{} keys", outcome.writes)),
        Check::Missing { .. } | Check::Probe { .. } => Some(
            outcome
                .observed
                .clone()
                .unwrap_or_else(|| "(nil)".to_owned()),
        ),
        Check::RoundTrip { .. } | Check::DelayedRoundTrip { .. } => outcome.observed.clone(),
    }
}
