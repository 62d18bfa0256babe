//! SRV records.

use std::fmt::Display;

use http::uri::Scheme;
use url::Url;

use crate::service::ServiceEndpoint;

/// Representation of types that carry the target and port of a SRV record.
pub trait SrvRecord {
    /// Type representing the SRV record's target. Must implement `Display` so
    /// it can be used to create a `Url`.
    type Target: Display + ?Sized;

    /// Gets a SRV record's target.
    fn target(&self) -> &Self::Target;

    /// Gets a SRV record's port.
    fn port(&self) -> u16;

    /// Parses a SRV record into a URL with a given scheme (e.g. https).
    ///
    /// The port is left out when it is the scheme's default.
    fn parse(&self, scheme: Scheme) -> Result<Url, url::ParseError> {
        // Parse a placeholder URL and then set each part, so that a target
        // like `foo.com:123/bar` cannot smuggle in a port or path.
        let mut url = Url::parse(&format!("{scheme}://placeholder.invalid"))?;
        url.set_host(Some(&self.target().to_string()))?;
        url.set_port(Some(self.port()))
            .map_err(|_| url::ParseError::SetHostOnCannotBeABaseUrl)?;

        Ok(url)
    }
}

impl SrvRecord for ServiceEndpoint {
    type Target = str;

    fn target(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::ServiceEntry;
    use std::time::Duration;

    fn endpoint(host: &str, port: u16) -> ServiceEndpoint {
        ServiceEndpoint::from(&ServiceEntry::new(
            "_web._http._tcp.example.com",
            Duration::from_secs(60),
            1,
            1,
            port,
            host,
        ))
    }

    #[test]
    fn parses_with_scheme_and_port() {
        let url = endpoint("web1.example.com", 8443).parse(Scheme::HTTPS).unwrap();
        assert_eq!(url.as_str(), "https://web1.example.com:8443/");
    }

    #[test]
    fn elides_default_port() {
        let url = endpoint("web1.example.com", 443).parse(Scheme::HTTPS).unwrap();
        assert_eq!(url.as_str(), "https://web1.example.com/");
        let url = endpoint("web1.example.com", 80).parse(Scheme::HTTP).unwrap();
        assert_eq!(url.as_str(), "http://web1.example.com/");
    }

    #[test]
    fn target_cannot_carry_a_path() {
        assert!(endpoint("foo.com:123/bar", 80).parse(Scheme::HTTP).is_err());
    }
}
