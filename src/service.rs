//! Services located through SRV and TXT records.

use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};

use crate::{
    dns::{entry, DnsEntry, ServiceEntry},
    params::{LazyParameters, ParameterDecoder, Parameters},
    Error,
};

/// Name of a service and the DNS name it is published under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDnsName {
    /// Domain suffix, if any
    pub domain: Option<String>,
    /// Service name as requested
    pub service_name: String,
    /// Protocol label, without the leading underscore
    pub protocol: String,
    /// Fully-qualified name to query
    pub dns_name: String,
}

impl ServiceDnsName {
    /// `{service}._{protocol}.{domain}`, or just the service name when there
    /// is no domain. Lower-cased.
    pub fn new(service_name: &str, protocol: &str, domain: Option<&str>) -> Self {
        let dns_name = match domain {
            Some(domain) => format!("{service_name}._{protocol}.{domain}"),
            None => service_name.to_owned(),
        };
        Self::with_dns_name(service_name, protocol, domain, dns_name)
    }

    /// `{name}._{protocol}._tcp.{domain}`, the shape database services are
    /// published under, or just the name when there is no domain.
    pub fn database(name: &str, protocol: &str, domain: Option<&str>) -> Self {
        let protocol = protocol.to_ascii_lowercase();
        let dns_name = match domain {
            Some(domain) => format!("{name}._{protocol}._tcp.{domain}"),
            None => name.to_owned(),
        };
        Self::with_dns_name(name, &protocol, domain, dns_name)
    }

    /// `{name}._http._tcp.{domain}`, the shape web services are published
    /// under.
    pub fn web(name: &str, domain: Option<&str>) -> Self {
        Self::database(name, "http", domain)
    }

    fn with_dns_name(service_name: &str, protocol: &str, domain: Option<&str>, dns_name: String) -> Self {
        Self {
            domain: domain.map(str::to_owned),
            service_name: service_name.to_owned(),
            protocol: protocol.to_owned(),
            dns_name: dns_name.to_ascii_lowercase(),
        }
    }
}

impl Display for ServiceDnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dns_name)
    }
}

/// One place a service can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// SRV priority; lower is preferred
    pub priority: u16,
    /// SRV weight
    pub weight: u16,
    /// When the record this endpoint came from expires
    pub expires: Instant,
}

impl From<&ServiceEntry> for ServiceEndpoint {
    fn from(entry: &ServiceEntry) -> Self {
        Self {
            host: entry.host().to_owned(),
            port: entry.port(),
            priority: entry.priority(),
            weight: entry.weight(),
            expires: entry.expires(),
        }
    }
}

impl Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a located service exposes to its consumers.
pub trait ServiceInfo: Send + Sync + 'static {
    /// Endpoint type.
    type Endpoint;

    /// Name the service was located by.
    fn name(&self) -> &ServiceDnsName;

    /// Protocol label.
    fn protocol(&self) -> &str {
        &self.name().protocol
    }

    /// Endpoints in preference order.
    fn endpoints(&self) -> &[Self::Endpoint];

    /// Decoded parameters. Decoding runs on the first call.
    fn parameters(&self) -> Result<&Parameters, Error>;

    /// When the service must be located again.
    fn expires(&self) -> Instant;

    /// Whether [`expires`](Self::expires) has passed.
    fn is_expired(&self) -> bool {
        self.expires() <= Instant::now()
    }
}

/// A located service: endpoints from SRV records, parameters from TXT.
///
/// Built once from a resolution and never changed; a refresh replaces the
/// whole value.
#[derive(Debug)]
pub struct Service<E = ServiceEndpoint> {
    name: ServiceDnsName,
    endpoints: Vec<E>,
    parameters: LazyParameters,
    expires: Instant,
}

impl<E> Service<E>
where
    E: for<'a> From<&'a ServiceEntry>,
{
    /// Builds a service from resolved entries.
    ///
    /// Endpoints are sorted by ascending priority, keeping record order
    /// within a priority unless `randomize` is set. Parameters of every
    /// TXT entry are merged and decoded on first access with `decoder`.
    pub fn new(
        name: ServiceDnsName,
        entries: &[DnsEntry],
        randomize: bool,
        decoder: ParameterDecoder,
    ) -> Self {
        let now = Instant::now();

        let mut srv: Vec<DnsEntry> = entries
            .iter()
            .filter(|e| e.as_service().is_some())
            .cloned()
            .collect();
        if randomize {
            entry::sort_randomized(&mut srv);
        } else {
            entry::sort_by_priority(&mut srv);
        }

        let mut raw = Parameters::default();
        let mut txt_ttl: Option<Duration> = None;
        for txt in entries.iter().filter_map(DnsEntry::as_text) {
            raw.merge(txt.parameters());
            let ttl = txt.meta().ttl();
            txt_ttl = Some(txt_ttl.map_or(ttl, |t| t.min(ttl)));
        }

        let expires = srv
            .iter()
            .map(DnsEntry::expires)
            .min()
            .or_else(|| txt_ttl.map(|ttl| now + ttl))
            .unwrap_or(now);

        Self {
            name,
            endpoints: srv
                .iter()
                .filter_map(DnsEntry::as_service)
                .map(E::from)
                .collect(),
            parameters: LazyParameters::new(raw, decoder),
            expires,
        }
    }
}

/// Services a [`ServiceLocator`](crate::ServiceLocator) can build from
/// resolved entries.
pub trait FromEntries: ServiceInfo + Sized {
    /// Builds the service. See [`Service::new`] for the arguments.
    fn from_entries(
        name: &ServiceDnsName,
        entries: &[DnsEntry],
        randomize: bool,
        decoder: ParameterDecoder,
    ) -> Self;
}

impl<E> FromEntries for Service<E>
where
    E: for<'a> From<&'a ServiceEntry> + Send + Sync + 'static,
{
    fn from_entries(
        name: &ServiceDnsName,
        entries: &[DnsEntry],
        randomize: bool,
        decoder: ParameterDecoder,
    ) -> Self {
        Self::new(name.clone(), entries, randomize, decoder)
    }
}

impl<E> Service<E> {
    /// Parameters as published, before placeholder substitution.
    pub fn raw_parameters(&self) -> &Parameters {
        self.parameters.raw()
    }
}

impl<E> ServiceInfo for Service<E>
where
    E: Send + Sync + 'static,
{
    type Endpoint = E;

    fn name(&self) -> &ServiceDnsName {
        &self.name
    }

    fn endpoints(&self) -> &[E] {
        &self.endpoints
    }

    fn parameters(&self) -> Result<&Parameters, Error> {
        self.parameters.get()
    }

    fn expires(&self) -> Instant {
        self.expires
    }
}
