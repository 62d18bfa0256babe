//! DNS queries against the system's resolvers.
//!
//! A [`DnsResolver`] issues a single query for one name and record type and
//! returns every record in the response. Two implementations exist, chosen
//! once at startup by [`system_resolver`]:
//!
//! - `LibResolv` (feature `libresolv`, Linux) calls the system resolver
//!   library's `res_nsearch` and decodes the raw answer with [`wire`].
//! - `NativeResolver` (feature `hickory`) uses `hickory_resolver` with
//!   the platform's own resolver configuration, and is the choice
//!   everywhere else.
//!
//! [`DnsQuery`] wraps a resolver with the required-vs-optional semantics
//! the lookups need.

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{config::ResolverKind, Error};

pub mod entry;
pub use entry::{
    DnsEntry, EntryMeta, HostEntry, MailExchangeEntry, Ordered, PointerEntry, RecordType,
    ServiceEntry, TextEntry,
};

pub mod wire;

#[cfg(all(feature = "libresolv", target_os = "linux"))]
mod libresolv;
#[cfg(all(feature = "libresolv", target_os = "linux"))]
pub use libresolv::LibResolv;

#[cfg(feature = "hickory")]
mod native;
#[cfg(feature = "hickory")]
pub use native::NativeResolver;

#[cfg(test)]
pub(crate) mod mock;

/// Hard ceiling on a single query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(8);

const MAX_QUERY_LEN: usize = 255;

/// Issues single DNS queries.
#[async_trait]
pub trait DnsResolver: Send + Sync + Debug {
    /// Queries `name` for `record_type`, returning every record in the
    /// response, unfiltered and unordered.
    ///
    /// A name with no records is `Ok` with an empty vector. Transport and
    /// server failures are [`Error::Resolve`]; a query that outlives its
    /// deadline is [`Error::Timeout`].
    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<DnsEntry>, Error>;
}

/// Picks the resolver implementation for this host.
///
/// [`ResolverKind::Auto`] uses `libresolv` on Linux (when the `libresolv`
/// feature is enabled) and the native resolver everywhere else. A kind
/// this build does not include is an [`Error::Configuration`].
pub fn system_resolver(
    kind: ResolverKind,
    timeout: Duration,
) -> Result<Arc<dyn DnsResolver>, Error> {
    let kind = match kind {
        ResolverKind::Auto if cfg!(all(feature = "libresolv", target_os = "linux")) => {
            ResolverKind::LibResolv
        }
        ResolverKind::Auto => ResolverKind::Native,
        kind => kind,
    };

    #[cfg(feature = "log")]
    tracing::debug!(?kind, os = std::env::consts::OS, "Selected DNS resolver");

    match kind {
        #[cfg(all(feature = "libresolv", target_os = "linux"))]
        ResolverKind::LibResolv => Ok(Arc::new(LibResolv::new(timeout))),
        #[cfg(feature = "hickory")]
        ResolverKind::Native => Ok(Arc::new(NativeResolver::from_system_conf(timeout)?)),
        kind => Err(Error::Configuration(format!(
            "{kind:?} resolver is not available in this build"
        ))),
    }
}

/// Outcome of a [`DnsQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Not resolved yet, or failed
    #[default]
    Unknown,
    /// Resolved with no records of the requested type
    NotFound,
    /// Resolved with at least one record
    Found,
    /// The resolver did not answer in time
    Timeout,
}

#[derive(Debug, Default)]
struct QueryState {
    status: QueryStatus,
    all_records: Option<Vec<DnsEntry>>,
}

/// One query for one name and record type.
#[derive(Debug)]
pub struct DnsQuery {
    resolver: Arc<dyn DnsResolver>,
    name: String,
    record_type: RecordType,
    state: Mutex<QueryState>,
}

impl DnsQuery {
    /// Creates a query. Blank names, names over 255 characters and names
    /// with empty or oversized labels are rejected.
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        name: impl Into<String>,
        record_type: RecordType,
    ) -> Result<Self, Error> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Configuration("query name is empty".into()));
        }
        if name.len() > MAX_QUERY_LEN {
            return Err(Error::Configuration(format!(
                "query name `{name}` is longer than {MAX_QUERY_LEN} characters"
            )));
        }
        wire::check_name(&name)
            .map_err(|e| Error::Configuration(format!("query name `{name}`: {e}")))?;
        Ok(Self {
            resolver,
            name,
            record_type,
            state: Mutex::default(),
        })
    }

    /// Name being queried.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record type being queried.
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Status of the last resolution.
    pub fn status(&self) -> QueryStatus {
        self.state.lock().status
    }

    /// Every record of the last response, including other types.
    pub fn all_records(&self) -> Option<Vec<DnsEntry>> {
        self.state.lock().all_records.clone()
    }

    /// Resolves the query, returning records of the requested type (SRV
    /// and MX ascending by priority). An empty answer is not an error.
    pub async fn try_resolve(&self) -> Result<Vec<DnsEntry>, Error> {
        #[cfg(feature = "log")]
        tracing::trace!(query = %self.name, record_type = %self.record_type, "Issuing DNS query");

        let records = match self.resolver.query(&self.name, self.record_type).await {
            Ok(records) => records,
            Err(e) => {
                if matches!(e, Error::Timeout { .. }) {
                    self.state.lock().status = QueryStatus::Timeout;
                }
                return Err(e);
            }
        };

        let mut typed: Vec<DnsEntry> = records
            .iter()
            .filter(|r| r.record_type() == self.record_type)
            .cloned()
            .collect();
        if self.record_type.is_ordered() {
            entry::sort_by_priority(&mut typed);
        }

        let mut state = self.state.lock();
        state.status = if typed.is_empty() {
            QueryStatus::NotFound
        } else {
            QueryStatus::Found
        };
        state.all_records = Some(records);

        #[cfg(feature = "log")]
        tracing::trace!(query = %self.name, status = ?state.status, count = typed.len(), "DNS query completed");

        Ok(typed)
    }

    /// Like [`try_resolve`](Self::try_resolve), but an empty answer is an
    /// [`Error::Resolve`].
    pub async fn resolve(&self) -> Result<Vec<DnsEntry>, Error> {
        let records = self.try_resolve().await?;
        if records.is_empty() {
            return Err(Error::not_found(&self.name));
        }
        Ok(records)
    }

    /// Address records in the last response for the target of `srv`.
    pub fn host_entries(&self, srv: &ServiceEntry) -> Result<Vec<HostEntry>, Error> {
        self.hosts_named(srv.host())
    }

    /// Address records in the last response for the exchanger of `mx`.
    pub fn exchange_host_entries(&self, mx: &MailExchangeEntry) -> Result<Vec<HostEntry>, Error> {
        self.hosts_named(mx.exchanger())
    }

    fn hosts_named(&self, host: &str) -> Result<Vec<HostEntry>, Error> {
        let state = self.state.lock();
        let records = state.all_records.as_ref().ok_or_else(|| {
            Error::Configuration(format!("`{}` must be resolved before reading hosts", self.name))
        })?;
        Ok(records
            .iter()
            .filter_map(DnsEntry::as_host)
            .filter(|h| h.meta().name().eq_ignore_ascii_case(host))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::MockResolver;
    use std::net::{IpAddr, Ipv4Addr};

    const TTL: Duration = Duration::from_secs(60);
    const NAME: &str = "orders-db._sql._tcp.example.com";

    fn srv(priority: u16, host: &str) -> DnsEntry {
        DnsEntry::Service(ServiceEntry::new(NAME, TTL, priority, 0, 1433, host))
    }

    #[tokio::test]
    async fn filters_and_sorts_by_priority() {
        let resolver = MockResolver::new();
        resolver.set(
            NAME,
            RecordType::Srv,
            vec![
                srv(20, "db2.example.com"),
                DnsEntry::Host(HostEntry::new(
                    "db1.example.com",
                    TTL,
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                )),
                srv(10, "db1.example.com"),
            ],
        );
        let query = DnsQuery::new(resolver.clone(), NAME, RecordType::Srv).unwrap();
        assert_eq!(query.status(), QueryStatus::Unknown);

        let records = query.resolve().await.unwrap();
        assert_eq!(query.status(), QueryStatus::Found);
        let hosts: Vec<_> = records.iter().map(|r| r.as_service().unwrap().host()).collect();
        assert_eq!(hosts, ["db1.example.com", "db2.example.com"]);

        let glue = query.host_entries(records[0].as_service().unwrap()).unwrap();
        assert_eq!(glue.len(), 1);
        assert_eq!(glue[0].address(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(query.all_records().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_answer_is_not_found() {
        let resolver = MockResolver::new();
        resolver.set(NAME, RecordType::Srv, vec![]);

        let query = DnsQuery::new(resolver.clone(), NAME, RecordType::Srv).unwrap();
        assert!(query.try_resolve().await.unwrap().is_empty());
        assert_eq!(query.status(), QueryStatus::NotFound);

        let err = query.resolve().await.unwrap_err();
        assert!(matches!(err, Error::Resolve { ref query, .. } if query == NAME));
    }

    #[tokio::test]
    async fn timeout_sets_status() {
        let resolver = MockResolver::new();
        resolver.fail(
            NAME,
            RecordType::Srv,
            Error::Timeout {
                query: NAME.into(),
            },
        );
        let query = DnsQuery::new(resolver, NAME, RecordType::Srv).unwrap();
        assert!(matches!(query.try_resolve().await, Err(Error::Timeout { .. })));
        assert_eq!(query.status(), QueryStatus::Timeout);
    }

    #[cfg(all(feature = "libresolv", target_os = "linux"))]
    #[test]
    fn auto_picks_libresolv_on_linux() {
        let resolver = system_resolver(ResolverKind::Auto, QUERY_TIMEOUT).unwrap();
        assert!(format!("{resolver:?}").starts_with("LibResolv"));
    }

    #[cfg(not(feature = "hickory"))]
    #[test]
    fn missing_native_resolver_is_a_configuration_error() {
        assert!(matches!(
            system_resolver(ResolverKind::Native, QUERY_TIMEOUT),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn rejects_bad_names() {
        let resolver = MockResolver::new();
        assert!(DnsQuery::new(resolver.clone(), "  ", RecordType::Srv).is_err());
        assert!(DnsQuery::new(resolver.clone(), "a".repeat(256), RecordType::Srv).is_err());
        assert!(matches!(
            DnsQuery::new(resolver.clone(), "orders..db._tcp.example.com", RecordType::Srv),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            DnsQuery::new(resolver.clone(), "._sql._tcp.example.com", RecordType::Srv),
            Err(Error::Configuration(_))
        ));
        let query = DnsQuery::new(resolver, NAME, RecordType::Srv).unwrap();
        assert!(query
            .host_entries(&ServiceEntry::new(NAME, TTL, 1, 1, 1, "h"))
            .is_err());
    }
}
