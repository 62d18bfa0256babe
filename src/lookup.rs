//! Deferred resolutions shared by every caller waiting on the same name.

use std::{fmt, sync::Arc};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};

use crate::{
    dns::{DnsEntry, DnsQuery, DnsResolver, RecordType},
    service::ServiceDnsName,
    Error,
};

/// Builds a service from the name it was located by and its resolved entries.
pub type Factory<S> = Arc<dyn Fn(&ServiceDnsName, &[DnsEntry]) -> S + Send + Sync>;

/// Result of a completed [`Lookup`]: the resolved entries and the factory
/// that turns them into a service.
pub struct Resolution<S> {
    name: ServiceDnsName,
    entries: Arc<[DnsEntry]>,
    factory: Factory<S>,
}

impl<S> Clone for Resolution<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            entries: self.entries.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<S> fmt::Debug for Resolution<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("name", &self.name)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl<S> Resolution<S> {
    /// Creates a resolution from entries already at hand.
    pub fn new(name: ServiceDnsName, entries: Vec<DnsEntry>, factory: Factory<S>) -> Self {
        Self {
            name,
            entries: entries.into(),
            factory,
        }
    }

    /// Name that was resolved.
    pub fn name(&self) -> &ServiceDnsName {
        &self.name
    }

    /// Every entry the lookup produced.
    pub fn entries(&self) -> &[DnsEntry] {
        &self.entries
    }

    /// Builds a new service from the entries.
    pub fn build(&self) -> S {
        (self.factory)(&self.name, &self.entries)
    }
}

type SharedResolution<S> = Shared<BoxFuture<'static, Result<Resolution<S>, Error>>>;

/// A resolution that runs once, however many callers await it.
///
/// The outcome, success or failure, is kept and handed to every caller.
/// Clones refer to the same lookup; [`Lookup::ptr_eq`] tells lookups
/// apart.
pub struct Lookup<S> {
    inner: Arc<SharedResolution<S>>,
}

impl<S> Clone for Lookup<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> fmt::Debug for Lookup<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .field("done", &self.inner.peek().is_some())
            .finish()
    }
}

impl<S: 'static> Lookup<S> {
    /// Wraps a resolution future. Nothing runs until the lookup is awaited.
    pub fn new<F>(resolution: F) -> Self
    where
        F: std::future::Future<Output = Result<Resolution<S>, Error>> + Send + 'static,
    {
        Self {
            inner: Arc::new(resolution.boxed().shared()),
        }
    }

    /// A lookup that is already complete.
    pub fn ready(result: Result<Resolution<S>, Error>) -> Self {
        Self::new(future::ready(result))
    }

    /// Waits for the resolution.
    pub async fn resolve(&self) -> Result<Resolution<S>, Error> {
        (*self.inner).clone().await
    }
}

impl<S> Lookup<S> {
    /// Whether both refer to the same lookup.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Lookups for the record shapes services are published with.
///
/// Each function has the shape expected by
/// [`ServiceLocator::locate_with`](crate::ServiceLocator::locate_with).
#[derive(Debug)]
pub struct ServiceLookup;

impl ServiceLookup {
    /// SRV records only. No records is an error.
    pub fn srv<S: 'static>(
        resolver: Arc<dyn DnsResolver>,
        name: ServiceDnsName,
        factory: Factory<S>,
    ) -> Lookup<S> {
        Lookup::new(async move {
            let entries = required(&resolver, &name, RecordType::Srv).await?;
            Ok(Resolution::new(name, entries, factory))
        })
    }

    /// SRV records, required, and TXT records, optional, queried together.
    ///
    /// A failed TXT query leaves the service without parameters.
    pub fn srv_txt<S: 'static>(
        resolver: Arc<dyn DnsResolver>,
        name: ServiceDnsName,
        factory: Factory<S>,
    ) -> Lookup<S> {
        Lookup::new(async move {
            let (srv, txt) = future::join(
                required(&resolver, &name, RecordType::Srv),
                optional(&resolver, &name, RecordType::Txt),
            )
            .await;
            let mut entries = srv?;
            entries.extend(txt);
            Ok(Resolution::new(name, entries, factory))
        })
    }

    /// TXT records only, best effort: a failed query yields no entries.
    pub fn txt<S: 'static>(
        resolver: Arc<dyn DnsResolver>,
        name: ServiceDnsName,
        factory: Factory<S>,
    ) -> Lookup<S> {
        Lookup::new(async move {
            let entries = optional(&resolver, &name, RecordType::Txt).await;
            Ok(Resolution::new(name, entries, factory))
        })
    }
}

async fn required(
    resolver: &Arc<dyn DnsResolver>,
    name: &ServiceDnsName,
    record_type: RecordType,
) -> Result<Vec<DnsEntry>, Error> {
    DnsQuery::new(resolver.clone(), name.dns_name.as_str(), record_type)?
        .resolve()
        .await
}

async fn optional(
    resolver: &Arc<dyn DnsResolver>,
    name: &ServiceDnsName,
    record_type: RecordType,
) -> Vec<DnsEntry> {
    let result = match DnsQuery::new(resolver.clone(), name.dns_name.as_str(), record_type) {
        Ok(query) => query.try_resolve().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(entries) => entries,
        Err(e) => {
            #[cfg(feature = "log")]
            tracing::debug!(query = %name, %record_type, error = %e, "Optional query failed, continuing without it");
            Vec::new()
        }
    }
}
