//! In-memory resolver for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DnsEntry, DnsResolver, RecordType};
use crate::Error;

type Key = (String, RecordType);
type Generator = Arc<dyn Fn() -> Vec<DnsEntry> + Send + Sync>;

#[derive(Clone)]
enum Answer {
    Fixed(Result<Vec<DnsEntry>, Error>),
    /// Builds new entries per query, the way a real response is decoded.
    Fresh(Generator),
}

/// Serves canned answers and counts queries per name and type.
#[derive(Default)]
pub(crate) struct MockResolver {
    answers: Mutex<HashMap<Key, Answer>>,
    calls: Mutex<HashMap<Key, usize>>,
    total: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for MockResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockResolver")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl MockResolver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(name: &str, record_type: RecordType) -> Key {
        (name.to_ascii_lowercase(), record_type)
    }

    pub(crate) fn set(&self, name: &str, record_type: RecordType, records: Vec<DnsEntry>) {
        self.answers
            .lock()
            .insert(Self::key(name, record_type), Answer::Fixed(Ok(records)));
    }

    pub(crate) fn set_fresh(
        &self,
        name: &str,
        record_type: RecordType,
        generate: impl Fn() -> Vec<DnsEntry> + Send + Sync + 'static,
    ) {
        self.answers
            .lock()
            .insert(Self::key(name, record_type), Answer::Fresh(Arc::new(generate)));
    }

    pub(crate) fn fail(&self, name: &str, record_type: RecordType, error: Error) {
        self.answers
            .lock()
            .insert(Self::key(name, record_type), Answer::Fixed(Err(error)));
    }

    /// Makes every query take `delay` before answering.
    pub(crate) fn delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub(crate) fn calls(&self, name: &str, record_type: RecordType) -> usize {
        self.calls
            .lock()
            .get(&Self::key(name, record_type))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsResolver for MockResolver {
    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<DnsEntry>, Error> {
        let key = Self::key(name, record_type);
        *self.calls.lock().entry(key.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answer = self.answers.lock().get(&key).cloned();
        match answer {
            Some(Answer::Fixed(result)) => result,
            Some(Answer::Fresh(generate)) => Ok(generate()),
            None => Err(Error::resolve(name, "no such host")),
        }
    }
}
