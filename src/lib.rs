#![deny(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

/*!
Locate services, their endpoints and their configuration through DNS SRV
and TXT records.

# Introduction

SRV Records, as defined in [RFC 2782](https://tools.ietf.org/html/rfc2782),
are DNS records of the form

`_Service._Proto.Name TTL Class SRV Priority Weight Port Target`

TXT records published under the same name carry the service's
configuration as `key=value` strings. For instance, a DNS server might hold
the following records for `orders._sql._tcp.example.com`:

```text
orders._sql._tcp.example.com. 300 IN SRV 10 0 1433 db1.example.com.
orders._sql._tcp.example.com. 300 IN SRV 20 0 1433 db2.example.com.
orders._sql._tcp.example.com. 300 IN TXT "Server={srv:host},{srv:port}" "Database=Orders"
```

A [`ServiceLocator`] resolves such a name into a [`Service`]: its endpoints,
ordered by priority, and its parameters. The locator should be reused, since
it caches each lookup until the records it came from expire. Concurrent
callers asking for the same name share one lookup, failed lookups are
retried, and an expired service is refreshed by exactly one caller.

Parameter values may hold placeholders, substituted on first access:

- `{env:NAME}` becomes the value of the environment variable `NAME`.
- `{aes:BASE64}` becomes the AES-CBC decryption of the payload, keyed by a
  pepper from [`SecretConfig`] and the service's domain (see [`AesCrypto`]).

The [`formats`] module turns services into database connection strings and
web service URLs.

# Resolvers

DNS queries go through a [`dns::DnsResolver`]. Two are provided, picked once
per locator from [`ResolverKind`]:

- `dns::LibResolv` (feature `libresolv`, enabled by default, Linux only)
  asks the system resolver library and decodes its raw answer.
- `dns::NativeResolver` (feature `hickory`, enabled by default) uses
  `hickory_resolver` with the platform's configuration.

Logging through `tracing` is enabled by the default `log` feature.
*/

mod cache;
pub use cache::ServiceCache;

mod config;
pub use config::{LocatorConfig, ResolverKind, SecretConfig, PEPPER_VAR, SERVICE_DOMAIN_VAR};

mod crypto;
pub use crypto::AesCrypto;

pub mod dns;

mod error;
pub use error::Error;

pub mod formats;

mod locator;
pub use locator::{RetryPolicy, ServiceLocator};

mod lookup;
pub use lookup::{Factory, Lookup, Resolution, ServiceLookup};

mod params;
pub use params::{ParameterDecoder, Parameters};

mod record;
pub use record::SrvRecord;

mod service;
pub use service::{FromEntries, Service, ServiceDnsName, ServiceEndpoint, ServiceInfo};
