//! Locator and secret configuration.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{dns::QUERY_TIMEOUT, locator::RetryPolicy};

/// Environment variable holding the default domain suffix.
pub const SERVICE_DOMAIN_VAR: &str = "SERVICE_DOMAIN";

/// Environment variable overriding the pepper from the secret file.
pub const PEPPER_VAR: &str = "PEPPER";

/// Which [`DnsResolver`](crate::dns::DnsResolver) to query with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverKind {
    /// Pick by operating system at runtime
    #[default]
    Auto,
    /// The platform resolver, through `hickory-resolver`
    Native,
    /// The system resolver library, through `res_nsearch(3)`
    LibResolv,
}

/// Settings of a [`ServiceLocator`](crate::ServiceLocator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorConfig {
    /// Suffix appended to service names
    pub domain: Option<String>,
    /// Resolve on every call instead of caching
    pub no_cache: bool,
    /// Shuffle endpoints of equal priority
    pub randomize: bool,
    /// Resolver implementation
    pub resolver: ResolverKind,
    /// Ceiling on each DNS query
    pub query_timeout: Duration,
    /// Retries of failed resolutions
    pub retry: RetryPolicy,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            domain: None,
            no_cache: false,
            randomize: false,
            resolver: ResolverKind::default(),
            query_timeout: QUERY_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl LocatorConfig {
    /// Defaults, with the domain taken from `SERVICE_DOMAIN`.
    pub fn from_env() -> Self {
        let domain = std::env::var(SERVICE_DOMAIN_VAR)
            .ok()
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());
        Self {
            domain,
            ..Self::default()
        }
    }

    /// Sets the domain suffix.
    pub fn domain(self, domain: impl Into<Option<String>>) -> Self {
        Self {
            domain: domain.into(),
            ..self
        }
    }

    /// Sets whether results are cached.
    pub fn no_cache(self, no_cache: bool) -> Self {
        Self { no_cache, ..self }
    }

    /// Sets whether endpoints of equal priority are shuffled.
    pub fn randomize(self, randomize: bool) -> Self {
        Self { randomize, ..self }
    }

    /// Sets the resolver implementation.
    pub fn resolver(self, resolver: ResolverKind) -> Self {
        Self { resolver, ..self }
    }

    /// Sets the query timeout.
    pub fn query_timeout(self, query_timeout: Duration) -> Self {
        Self {
            query_timeout,
            ..self
        }
    }

    /// Sets the retry policy.
    pub fn retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }
}

/// Secrets shared by the locators of a process.
///
/// Loading is up to the host application; the value is then handed to
/// each locator.
#[derive(Clone, Default)]
pub struct SecretConfig {
    pepper: Option<Arc<str>>,
}

impl std::fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretConfig")
            .field("pepper", &self.pepper.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SecretConfig {
    /// Where the secret file is mounted.
    pub fn default_path() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(r"C:\ProgramData\Docker\secrets\srv-locate.conf")
        } else {
            PathBuf::from("/run/secrets/srv-locate.conf")
        }
    }

    /// Reads the secret file at [`default_path`](Self::default_path), then
    /// lets `PEPPER` override it.
    pub fn load() -> Self {
        let mut config = Self::from_file(Self::default_path());
        if let Some(pepper) = std::env::var(PEPPER_VAR).ok().filter(|p| !p.is_empty()) {
            config.pepper = Some(pepper.into());
        }
        config
    }

    /// Reads `KEY=VALUE` lines from `path`. A missing or unreadable file
    /// yields an empty configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                #[cfg(feature = "log")]
                tracing::debug!(path = %path.display(), error = %e, "No secret file");
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Self {
        let pepper = contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(PEPPER_VAR))
            .map(|(_, value)| value.trim())
            .last()
            .filter(|value| !value.is_empty())
            .map(Arc::from);
        Self { pepper }
    }

    /// Replaces the pepper.
    pub fn with_pepper(self, pepper: impl AsRef<str>) -> Self {
        Self {
            pepper: Some(Arc::from(pepper.as_ref())),
        }
    }

    /// Pass-phrase mixed into parameter decryption keys.
    pub fn pepper(&self) -> Option<&Arc<str>> {
        self.pepper.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builder_methods() {
        let config = LocatorConfig::default()
            .domain("example.com".to_string())
            .no_cache(true)
            .randomize(true)
            .resolver(ResolverKind::LibResolv)
            .query_timeout(Duration::from_secs(2));
        assert_eq!(config.domain.as_deref(), Some("example.com"));
        assert!(config.no_cache && config.randomize);
        assert_eq!(config.resolver, ResolverKind::LibResolv);
        assert_eq!(config.query_timeout, Duration::from_secs(2));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn secret_file_pepper() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# secrets\nOTHER=1\npepper = s3cret\n").unwrap();
        let config = SecretConfig::from_file(file.path());
        assert_eq!(config.pepper().map(|p| &**p), Some("s3cret"));
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn missing_secret_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretConfig::from_file(dir.path().join("absent.conf"));
        assert!(config.pepper().is_none());
        let config = config.with_pepper("dev");
        assert_eq!(config.pepper().map(|p| &**p), Some("dev"));
    }
}
