//! Resolver backed by [`hickory_resolver`] and the platform's configuration.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    proto::rr::{RData, Record, RecordType as WireType},
    ResolveError, TokioResolver,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{
    DnsEntry, DnsResolver, HostEntry, MailExchangeEntry, PointerEntry, RecordType, ServiceEntry,
    TextEntry, QUERY_TIMEOUT,
};
use crate::Error;

type Completion = Result<Vec<DnsEntry>, Error>;

/// Delivers a query's completion exactly once. Later signals are dropped.
#[derive(Debug, Clone)]
struct Latch(Arc<Mutex<Option<oneshot::Sender<Completion>>>>);

impl Latch {
    fn new() -> (Self, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// Returns whether this call was the one that completed the latch.
    fn complete(&self, result: Completion) -> bool {
        match self.0.lock().take() {
            Some(tx) => {
                // the receiver may be gone if the caller was dropped
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// Queries the system resolver through [`hickory_resolver`].
///
/// Each query runs on its own task and races a one-shot timer; whichever
/// finishes first completes the query.
#[derive(Debug, Clone)]
pub struct NativeResolver {
    resolver: Arc<TokioResolver>,
    timeout: Duration,
}

impl NativeResolver {
    /// Builds a resolver from the platform's configuration (the registry on
    /// Windows, `/etc/resolv.conf` elsewhere).
    pub fn from_system_conf(timeout: Duration) -> Result<Self, Error> {
        let mut builder = TokioResolver::builder_tokio()
            .map_err(|e| Error::Configuration(format!("cannot read system DNS configuration: {e}")))?;
        builder.options_mut().timeout = timeout;
        Ok(Self::with_resolver(builder.build(), timeout))
    }

    /// Wraps an existing resolver.
    pub fn with_resolver(resolver: TokioResolver, timeout: Duration) -> Self {
        Self {
            resolver: Arc::new(resolver),
            timeout,
        }
    }
}

#[async_trait]
impl DnsResolver for NativeResolver {
    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<DnsEntry>, Error> {
        let resolver = self.resolver.clone();
        let owned = name.to_owned();
        let lookup = async move {
            match resolver
                .lookup(owned.as_str(), WireType::from(record_type.code()))
                .await
            {
                Ok(lookup) => Ok(lookup.record_iter().filter_map(convert).collect()),
                Err(e) if e.is_no_records_found() => Ok(Vec::new()),
                Err(e) => Err(resolve_error(&owned, e)),
            }
        };
        race(name, self.timeout.min(QUERY_TIMEOUT), lookup).await
    }
}

/// Runs `lookup` on its own task against a one-shot timer. Whichever
/// finishes first completes the query; on timeout the lookup is aborted.
async fn race<F>(name: &str, timeout: Duration, lookup: F) -> Completion
where
    F: Future<Output = Completion> + Send + 'static,
{
    let (latch, completed) = Latch::new();

    let worker = {
        let latch = latch.clone();
        let name = name.to_owned();
        tokio::spawn(async move {
            if !latch.complete(lookup.await) {
                #[cfg(feature = "log")]
                tracing::debug!(query = %name, "DNS answer arrived after the query completed");
            }
        })
    };

    let timer = {
        let latch = latch.clone();
        let name = name.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if latch.complete(Err(Error::Timeout { query: name.clone() })) {
                #[cfg(feature = "log")]
                tracing::debug!(query = %name, ?timeout, "DNS query timed out");
            }
        })
    };

    let result = completed
        .await
        .unwrap_or_else(|_| Err(Error::resolve(name, "query task ended without an answer")));
    timer.abort();
    if matches!(result, Err(Error::Timeout { .. })) {
        worker.abort();
    }
    result
}

fn resolve_error(name: &str, e: ResolveError) -> Error {
    Error::resolve(name, e)
}

fn host_name(name: &hickory_resolver::Name) -> String {
    name.to_utf8().trim_end_matches('.').to_owned()
}

fn convert(record: &Record) -> Option<DnsEntry> {
    let name = host_name(record.name());
    let ttl = Duration::from_secs(record.ttl().into());
    let entry = match record.data() {
        RData::A(a) => DnsEntry::Host(HostEntry::new(name, ttl, a.0.into())),
        RData::AAAA(aaaa) => DnsEntry::Host(HostEntry::new(name, ttl, aaaa.0.into())),
        RData::SRV(srv) => DnsEntry::Service(ServiceEntry::new(
            name,
            ttl,
            srv.priority(),
            srv.weight(),
            srv.port(),
            host_name(srv.target()),
        )),
        RData::MX(mx) => DnsEntry::MailExchange(MailExchangeEntry::new(
            name,
            ttl,
            mx.preference(),
            host_name(mx.exchange()),
        )),
        RData::TXT(txt) => DnsEntry::Text(TextEntry::new(
            name,
            ttl,
            txt.txt_data()
                .iter()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
        )),
        RData::CNAME(target) => {
            DnsEntry::Pointer(PointerEntry::new(RecordType::Cname, name, ttl, host_name(&target.0)))
        }
        RData::NS(target) => {
            DnsEntry::Pointer(PointerEntry::new(RecordType::Ns, name, ttl, host_name(&target.0)))
        }
        RData::PTR(target) => {
            DnsEntry::Pointer(PointerEntry::new(RecordType::Ptr, name, ttl, host_name(&target.0)))
        }
        _ => return None,
    };
    Some(entry)
}
