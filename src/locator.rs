//! Locating services, with caching and retries.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwapOption;

use crate::{
    cache::ServiceCache,
    config::{LocatorConfig, SecretConfig},
    dns::{self, DnsResolver},
    lookup::{Factory, Lookup, ServiceLookup},
    params::ParameterDecoder,
    service::{FromEntries, Service, ServiceDnsName, ServiceInfo},
    Error,
};

/// How failed resolutions are retried.
///
/// Only DNS failures ([`Error::is_dns`]) are retried; the first
/// `immediate` attempts follow each other directly, later ones wait
/// `delay` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Attempts made without waiting
    pub immediate: u32,
    /// Wait before each later attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            immediate: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// Locates services of one kind by DNS name.
///
/// Lookups are cached per name until the service they build expires, and
/// concurrent callers for the same name share one lookup. A locator is
/// meant to be created once and shared.
pub struct ServiceLocator<S = Service> {
    resolver: Arc<dyn DnsResolver>,
    domain: ArcSwapOption<String>,
    no_cache: AtomicBool,
    randomize: Arc<AtomicBool>,
    retry: RetryPolicy,
    factory: Factory<S>,
    cache: ServiceCache<S>,
}

impl<S> fmt::Debug for ServiceLocator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("resolver", &self.resolver)
            .field("domain", &self.domain())
            .field("no_cache", &self.no_cache)
            .field("randomize", &self.randomize)
            .field("retry", &self.retry)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl<S: FromEntries> ServiceLocator<S> {
    /// Creates a locator querying the system's resolver.
    pub fn new(config: LocatorConfig, secrets: &SecretConfig) -> Result<Self, Error> {
        let resolver = dns::system_resolver(config.resolver, config.query_timeout)?;
        Ok(Self::with_resolver(config, secrets, resolver))
    }

    /// Creates a locator querying `resolver`.
    pub fn with_resolver(
        config: LocatorConfig,
        secrets: &SecretConfig,
        resolver: Arc<dyn DnsResolver>,
    ) -> Self {
        let randomize = Arc::new(AtomicBool::new(config.randomize));
        let factory: Factory<S> = {
            let randomize = randomize.clone();
            let pepper = secrets.pepper().cloned();
            Arc::new(move |name, entries| {
                S::from_entries(
                    name,
                    entries,
                    randomize.load(Ordering::Relaxed),
                    ParameterDecoder::new(pepper.clone(), name.domain.clone()),
                )
            })
        };

        Self {
            resolver,
            domain: ArcSwapOption::new(config.domain.map(Arc::new)),
            no_cache: AtomicBool::new(config.no_cache),
            randomize,
            retry: config.retry,
            factory,
            cache: ServiceCache::default(),
        }
    }
}

impl<S: ServiceInfo> ServiceLocator<S> {
    /// Locates `service` over TCP.
    pub async fn locate(&self, service: &str) -> Result<S, Error> {
        self.locate_protocol(service, "tcp").await
    }

    /// Locates `service` published as `{service}._{protocol}.{domain}`.
    pub async fn locate_protocol(&self, service: &str, protocol: &str) -> Result<S, Error> {
        require_name(service)?;
        let name = self.service_name(service, protocol);
        self.locate_with(&name, ServiceLookup::srv_txt).await
    }

    /// Locates a database published as `{name}._{protocol}._tcp.{domain}`.
    pub async fn locate_database(&self, name: &str, protocol: &str) -> Result<S, Error> {
        require_name(name)?;
        let name = ServiceDnsName::database(name, protocol, self.domain().as_deref());
        self.locate_with(&name, ServiceLookup::srv_txt).await
    }

    /// Locates a web service published as `{name}._http._tcp.{domain}`.
    pub async fn locate_web(&self, name: &str) -> Result<S, Error> {
        require_name(name)?;
        let name = ServiceDnsName::web(name, self.domain().as_deref());
        self.locate_with(&name, ServiceLookup::srv_txt).await
    }

    /// Locates `name` with the lookup shape `lookup`, such as
    /// [`ServiceLookup::txt`].
    ///
    /// DNS failures evict the name from the cache and are retried per the
    /// locator's [`RetryPolicy`]; once attempts run out the last failure is
    /// returned. Other errors are returned at once.
    pub async fn locate_with<L>(&self, name: &ServiceDnsName, lookup: L) -> Result<S, Error>
    where
        L: Fn(Arc<dyn DnsResolver>, ServiceDnsName, Factory<S>) -> Lookup<S>,
    {
        let start = || lookup(self.resolver.clone(), name.clone(), self.factory.clone());
        let mut last_error = None;

        for attempt in 1..=self.retry.attempts.max(1) {
            if attempt > self.retry.immediate {
                #[cfg(feature = "log")]
                tracing::debug!(query = %name, attempt, delay = ?self.retry.delay, "Waiting before retrying");
                tokio::time::sleep(self.retry.delay).await;
            }

            match self.try_locate(name, &start).await {
                Ok(service) => return Ok(service),
                Err(Failed { error, lookup }) if error.is_dns() => {
                    #[cfg(feature = "log")]
                    tracing::debug!(query = %name, attempt, %error, "Service not located");
                    if let Some(lookup) = lookup {
                        self.cache.remove_if(&name.dns_name, &lookup);
                    }
                    last_error = Some(error);
                }
                Err(Failed { error, .. }) => return Err(error),
            }
        }

        #[cfg(feature = "log")]
        tracing::warn!(query = %name, attempts = self.retry.attempts, "Giving up locating service");

        Err(last_error.unwrap_or_else(|| Error::resolve(&name.dns_name, "not located")))
    }

    async fn try_locate(
        &self,
        name: &ServiceDnsName,
        start: &impl Fn() -> Lookup<S>,
    ) -> Result<S, Failed<S>> {
        if self.no_cache() {
            return Ok(start().resolve().await.map_err(Failed::uncached)?.build());
        }

        let lookup = self.cache.get_or_add(&name.dns_name, start);
        let service = lookup
            .resolve()
            .await
            .map_err(|error| Failed::cached(error, &lookup))?
            .build();
        if !service.is_expired() {
            return Ok(service);
        }

        let refreshed = self.cache.check_and_update(&name.dns_name, &lookup, start);
        Ok(refreshed
            .resolve()
            .await
            .map_err(|error| Failed::cached(error, &refreshed))?
            .build())
    }
}

fn require_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::Configuration("service name is empty".into()));
    }
    Ok(())
}

/// A failed attempt, with the cached lookup that produced it.
struct Failed<S> {
    error: Error,
    lookup: Option<Lookup<S>>,
}

impl<S> Failed<S> {
    fn uncached(error: Error) -> Self {
        Self {
            error,
            lookup: None,
        }
    }

    fn cached(error: Error, lookup: &Lookup<S>) -> Self {
        Self {
            error,
            lookup: Some(lookup.clone()),
        }
    }
}

impl<S> ServiceLocator<S> {
    /// The name `service` is published under for `protocol`.
    pub fn service_name(&self, service: &str, protocol: &str) -> ServiceDnsName {
        ServiceDnsName::new(service, protocol, self.domain().as_deref())
    }

    /// Domain suffix appended to service names.
    pub fn domain(&self) -> Option<String> {
        self.domain.load().as_deref().cloned()
    }

    /// Changes the domain suffix, dropping every cached lookup if it
    /// differs.
    pub fn set_domain(&self, domain: Option<&str>) {
        let domain = domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| Arc::new(d.to_owned()));
        let previous = self.domain.swap(domain.clone());
        if previous != domain {
            self.cache.clear();
        }
    }

    /// Whether every call resolves anew.
    pub fn no_cache(&self) -> bool {
        self.no_cache.load(Ordering::Relaxed)
    }

    /// Turns caching off or on, dropping every cached lookup if it changes.
    pub fn set_no_cache(&self, no_cache: bool) {
        if self.no_cache.swap(no_cache, Ordering::Relaxed) != no_cache {
            self.cache.clear();
        }
    }

    /// Whether endpoints of equal priority are shuffled.
    pub fn randomize(&self) -> bool {
        self.randomize.load(Ordering::Relaxed)
    }

    /// Turns shuffling of equal-priority endpoints on or off. Applies to
    /// services built from now on.
    pub fn set_randomize(&self, randomize: bool) {
        self.randomize.store(randomize, Ordering::Relaxed);
    }

    /// Drops every cached lookup.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Number of cached lookups.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{mock::MockResolver, DnsEntry, RecordType, ServiceEntry, TextEntry};
    use std::sync::atomic::AtomicUsize;

    const DOMAIN: &str = "example.com";
    const DNS_NAME: &str = "queue._tcp.example.com";

    fn srv(ttl: u64, priority: u16, host: &str) -> DnsEntry {
        DnsEntry::Service(ServiceEntry::new(
            DNS_NAME,
            Duration::from_secs(ttl),
            priority,
            0,
            5672,
            host,
        ))
    }

    fn locator(resolver: &Arc<MockResolver>, config: LocatorConfig) -> ServiceLocator {
        ServiceLocator::with_resolver(
            config.domain(DOMAIN.to_string()),
            &SecretConfig::default(),
            resolver.clone(),
        )
    }

    #[tokio::test]
    async fn caches_until_expiry() {
        let resolver = MockResolver::new();
        resolver.set(DNS_NAME, RecordType::Srv, vec![srv(300, 10, "q1.example.com")]);
        resolver.set(
            DNS_NAME,
            RecordType::Txt,
            vec![DnsEntry::Text(TextEntry::new(
                DNS_NAME,
                Duration::from_secs(300),
                vec!["vhost=/orders".into()],
            ))],
        );
        let locator = locator(&resolver, LocatorConfig::default());

        let service = locator.locate("Queue").await.unwrap();
        assert_eq!(service.name().dns_name, DNS_NAME);
        assert_eq!(service.endpoints()[0].host, "q1.example.com");
        assert_eq!(service.parameters().unwrap().get("VHost"), Some("/orders"));

        locator.locate("queue").await.unwrap();
        assert_eq!(resolver.calls(DNS_NAME, RecordType::Srv), 1);
        assert_eq!(locator.cached(), 1);
    }

    #[tokio::test]
    async fn no_cache_resolves_every_call() {
        let resolver = MockResolver::new();
        resolver.set(DNS_NAME, RecordType::Srv, vec![srv(300, 10, "q1.example.com")]);
        let locator = locator(&resolver, LocatorConfig::default().no_cache(true));

        for _ in 0..3 {
            locator.locate("queue").await.unwrap();
        }
        assert_eq!(resolver.calls(DNS_NAME, RecordType::Srv), 3);
        assert_eq!(locator.cached(), 0);
    }

    #[tokio::test]
    async fn expired_service_refreshes_once() {
        let resolver = MockResolver::new();
        let resolutions = Arc::new(AtomicUsize::new(0));
        {
            let resolutions = resolutions.clone();
            resolver.set_fresh(DNS_NAME, RecordType::Srv, move || {
                // only the first answer is already expired
                let ttl = if resolutions.fetch_add(1, Ordering::SeqCst) == 0 { 0 } else { 300 };
                vec![srv(ttl, 10, "q1.example.com")]
            });
        }
        resolver.delay(Duration::from_millis(20));
        let locator = locator(&resolver, LocatorConfig::default());

        let services =
            futures::future::join_all((0..10).map(|_| locator.locate("queue"))).await;
        for service in services {
            assert!(!service.unwrap().is_expired());
        }
        assert_eq!(resolver.calls(DNS_NAME, RecordType::Srv), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_four_attempts() {
        let resolver = MockResolver::new();
        let locator = locator(&resolver, LocatorConfig::default());

        let started = tokio::time::Instant::now();
        let err = locator.locate("missing").await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::Resolve { ref query, .. } if query == "missing._tcp.example.com"));
        assert_eq!(resolver.calls("missing._tcp.example.com", RecordType::Srv), 4);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
        assert_eq!(locator.cached(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_eviction() {
        let resolver = MockResolver::new();
        let locator = locator(&resolver, LocatorConfig::default());
        {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                resolver.set(DNS_NAME, RecordType::Srv, vec![srv(300, 10, "late.example.com")]);
            });
        }

        let service = locator.locate("queue").await.unwrap();
        assert_eq!(service.endpoints()[0].host, "late.example.com");
        assert_eq!(resolver.calls(DNS_NAME, RecordType::Srv), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_errors_are_not_retried() {
        let resolver = MockResolver::new();
        let locator = locator(&resolver, LocatorConfig::default());

        let started = tokio::time::Instant::now();
        let err = locator.locate(&"x".repeat(300)).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(resolver.total_calls(), 0);

        assert!(matches!(locator.locate(" ").await, Err(Error::Configuration(_))));
        assert!(matches!(
            locator.locate_database("", "sql").await,
            Err(Error::Configuration(_))
        ));
        assert!(matches!(locator.locate_web(" ").await, Err(Error::Configuration(_))));

        let err = locator.locate("orders..db").await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(resolver.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_share_each_retry() {
        let resolver = MockResolver::new();
        resolver.delay(Duration::from_millis(20));
        let locator = locator(&resolver, LocatorConfig::default());

        let (a, b) = futures::join!(locator.locate("missing"), locator.locate("missing"));
        assert!(a.unwrap_err().is_dns());
        assert!(b.unwrap_err().is_dns());
        assert_eq!(resolver.calls("missing._tcp.example.com", RecordType::Srv), 4);
        assert_eq!(locator.cached(), 0);
    }

    #[tokio::test]
    async fn settings_changes_clear_the_cache() {
        let resolver = MockResolver::new();
        resolver.set(DNS_NAME, RecordType::Srv, vec![srv(300, 10, "q1.example.com")]);
        let locator = locator(&resolver, LocatorConfig::default());

        locator.locate("queue").await.unwrap();
        locator.set_randomize(true);
        locator.set_domain(Some(DOMAIN));
        assert_eq!(locator.cached(), 1);

        locator.set_domain(Some("other.example.com"));
        assert_eq!(locator.cached(), 0);
        assert_eq!(
            locator.service_name("queue", "tcp").dns_name,
            "queue._tcp.other.example.com"
        );

        locator.set_domain(Some(DOMAIN));
        locator.locate("queue").await.unwrap();
        locator.set_no_cache(true);
        assert_eq!(locator.cached(), 0);
        assert!(locator.no_cache());
    }

    #[tokio::test]
    async fn randomize_shuffles_within_priority() {
        let resolver = MockResolver::new();
        resolver.set_fresh(DNS_NAME, RecordType::Srv, || {
            ["a0", "b0", "a1", "b1", "a2", "b2", "a3", "b3"]
                .iter()
                .map(|h| srv(300, if h.starts_with('a') { 10 } else { 20 }, h))
                .collect()
        });
        let locator = locator(&resolver, LocatorConfig::default().no_cache(true));

        let order = |service: &Service| -> Vec<String> {
            service.endpoints().iter().map(|e| e.host.clone()).collect()
        };

        let stable = order(&locator.locate("queue").await.unwrap());
        assert_eq!(stable, ["a0", "a1", "a2", "a3", "b0", "b1", "b2", "b3"]);

        locator.set_randomize(true);
        let mut orders = Vec::new();
        for _ in 0..20 {
            let hosts = order(&locator.locate("queue").await.unwrap());
            assert!(hosts[..4].iter().all(|h| h.starts_with('a')));
            assert!(hosts[4..].iter().all(|h| h.starts_with('b')));
            orders.push(hosts);
        }
        assert!(orders.iter().any(|o| o != &orders[0]));
    }
}
