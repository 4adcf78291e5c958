use std::sync::{Arc, Mutex, PoisonError};

use crate::harness::HarnessInner;
use crate::model::ModelRef;
use crate::run::RunBuilder;
use crate::usage::Usage;

/// Configuration used to create a `Session`.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Human-readable session name, used in logs.
    pub name: String,
}

impl SessionConfig {
    /// Creates a named session config.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Default)]
struct Totals {
    usage: Usage,
    runs: u64,
}

/// Running usage totals shared by a session and the producer tasks of its
/// runs.
#[derive(Debug, Default)]
pub(crate) struct SessionLedger {
    totals: Mutex<Totals>,
}

impl SessionLedger {
    /// Folds one finished run into the totals. Called once per run.
    pub(crate) fn record(&self, usage: &Usage) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.usage += usage;
        totals.runs = totals.runs.saturating_add(1);
    }

    fn usage(&self) -> Usage {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .usage
    }

    fn runs(&self) -> u64 {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner).runs
    }
}

/// Logical grouping for runs.
///
/// Sessions are in-memory only. They keep no history beyond usage totals of
/// the runs that finished.
#[derive(Clone)]
pub struct Session {
    pub(crate) harness: Arc<HarnessInner>,
    pub(crate) session_id: uuid::Uuid,
    pub(crate) config: SessionConfig,
    ledger: Arc<SessionLedger>,
}

impl Session {
    pub(crate) fn new(harness: Arc<HarnessInner>, config: SessionConfig) -> Self {
        Self {
            harness,
            session_id: uuid::Uuid::new_v4(),
            config,
            ledger: Arc::new(SessionLedger::default()),
        }
    }

    /// Session id passed to adapters with every request.
    pub fn id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Session name from its config.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Sum of the usage of every finished run in this session, including
    /// failed and aborted runs.
    pub fn usage(&self) -> Usage {
        self.ledger.usage()
    }

    /// Number of runs that reached a terminal event.
    pub fn finished_runs(&self) -> u64 {
        self.ledger.runs()
    }

    /// Starts building a run for the given model.
    pub fn run(&self, model: ModelRef) -> RunBuilder {
        RunBuilder::new(
            self.harness.clone(),
            self.session_id,
            self.config.name.clone(),
            self.ledger.clone(),
            model,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_sums_runs() {
        let ledger = SessionLedger::default();
        ledger.record(&Usage::tokens(3, 1));
        ledger.record(&Usage::tokens(2, 2));
        assert_eq!(ledger.usage(), Usage::total([&Usage::tokens(3, 1), &Usage::tokens(2, 2)]));
        assert_eq!(ledger.runs(), 2);
    }

    #[test]
    fn sessions_get_distinct_ids_and_empty_totals() {
        let harness = crate::Harness::builder().build().expect("build harness");
        let first = harness.session(SessionConfig::named("a"));
        let second = harness.session(SessionConfig::named("b"));
        assert_ne!(first.id(), second.id());
        assert_eq!(first.name(), "a");
        assert!(first.usage().is_zero());
        assert_eq!(first.finished_runs(), 0);
    }

    #[test]
    fn cloned_sessions_share_totals() {
        let harness = crate::Harness::builder().build().expect("build harness");
        let session = harness.session(SessionConfig::named("shared"));
        let clone = session.clone();
        session.ledger.record(&Usage::tokens(1, 1));
        assert_eq!(clone.usage().total_tokens, 2);
    }
}
