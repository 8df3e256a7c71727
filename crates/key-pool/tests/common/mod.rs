//! Scripted probes shared by the engine integration tests.
//!
//! `ScriptedProbe` answers per key from a list of outcomes (the last one
//! repeats) and records call counts and peak concurrency. `ScriptedTier` is the
//! matching paid tier probe.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use key_pool::{BatchRequest, JitterWindow, RecordView};
use provider::{
    Outcome, PaidTierProbe, ProbeFuture, ProviderKind, ProviderProbe, TierVerdict,
};

pub struct ScriptedProbe {
    kind: ProviderKind,
    latency: Duration,
    scripts: Mutex<HashMap<String, Vec<Outcome>>>,
    calls: Mutex<HashMap<String, usize>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            latency: Duration::from_millis(20),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Outcomes for `key` in call order; keys without a script succeed.
    pub fn script(self, key: &str, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), outcomes);
        self
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, key: &str) -> Outcome {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(key) {
            Some(steps) if steps.len() > 1 => steps.remove(0),
            Some(steps) => steps.first().cloned().unwrap_or_else(Outcome::success),
            None => Outcome::success(),
        }
    }
}

impl ProviderProbe for ScriptedProbe {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn probe<'a>(
        &'a self,
        key: &'a str,
        _model: &'a str,
    ) -> ProbeFuture<'a, provider::Result<Outcome>> {
        Box::pin(async move {
            *self.calls.lock().unwrap().entry(key.to_string()).or_default() += 1;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(self.next_outcome(key))
        })
    }
}

pub struct ScriptedTier {
    verdicts: HashMap<String, TierVerdict>,
    calls: AtomicUsize,
}

impl ScriptedTier {
    pub fn new(verdicts: &[(&str, TierVerdict)]) -> Self {
        Self {
            verdicts: verdicts
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaidTierProbe for ScriptedTier {
    fn probe_tier<'a>(&'a self, key: &'a str) -> ProbeFuture<'a, TierVerdict> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdicts
                .get(key)
                .cloned()
                .unwrap_or_else(|| TierVerdict::free("permission_denied"))
        })
    }
}

pub fn request(input: &str, probe: Arc<dyn ProviderProbe>, limit: usize, retries: u32) -> BatchRequest {
    BatchRequest {
        input: input.to_string(),
        model: "test-model".into(),
        probe,
        concurrency_limit: limit,
        max_retries: retries,
        jitter: JitterWindow::default(),
    }
}

/// Results of the last run keyed by the raw key value.
pub fn by_key(views: Vec<RecordView>) -> HashMap<String, RecordView> {
    views.into_iter().map(|v| (v.key.clone(), v)).collect()
}
