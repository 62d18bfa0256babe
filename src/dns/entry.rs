//! Typed DNS records.

use std::{
    fmt::{self, Display},
    net::IpAddr,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::params::Parameters;

/// Record types understood by the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RecordType {
    /// IPv4 host address
    A = 1,
    /// Authoritative name server
    Ns = 2,
    /// Canonical name
    Cname = 5,
    /// Domain name pointer
    Ptr = 12,
    /// Mail exchange
    Mx = 15,
    /// Text strings
    Txt = 16,
    /// IPv6 host address
    Aaaa = 28,
    /// Service locator
    Srv = 33,
}

impl RecordType {
    /// Wire code of the record type.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Maps a wire code back to a supported record type.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            _ => return None,
        })
    }

    /// Whether answers of this type are ordered by priority or preference.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Srv | Self::Mx)
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::Ns => "NS",
            Self::Cname => "CNAME",
            Self::Ptr => "PTR",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Aaaa => "AAAA",
            Self::Srv => "SRV",
        };
        f.write_str(s)
    }
}

/// Fields shared by every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    record_type: RecordType,
    name: String,
    ttl: Duration,
    expires: Instant,
}

impl EntryMeta {
    fn new(record_type: RecordType, name: impl Into<String>, ttl: Duration) -> Self {
        let mut name = name.into();
        if name.ends_with('.') {
            name.pop();
        }
        Self {
            record_type,
            name,
            ttl,
            expires: Instant::now() + ttl,
        }
    }

    /// Record type.
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Owner name, without the trailing root dot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time to live reported by the resolver.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// When this record stops being fresh.
    pub fn expires(&self) -> Instant {
        self.expires
    }
}

/// Records that are ordered by a priority (SRV) or preference (MX).
pub trait Ordered {
    /// Primary sort order; lower sorts first.
    fn sort_order(&self) -> u16;

    /// Per-entry tiebreak drawn once when the entry was built.
    fn tiebreak(&self) -> u16;

    /// Sort key keeping priority tiers intact while shuffling within a tier.
    fn randomizer(&self) -> u32 {
        ((self.sort_order() as u32) << 16) | self.tiebreak() as u32
    }
}

/// Draws the tiebreak carried by ordered entries.
pub(crate) fn draw_tiebreak() -> u16 {
    rand::rng().random_range(0..0x0f00)
}

/// A/AAAA record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    meta: EntryMeta,
    address: IpAddr,
}

impl HostEntry {
    /// Creates a host entry; the record type follows the address family.
    pub fn new(name: impl Into<String>, ttl: Duration, address: IpAddr) -> Self {
        let record_type = match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        Self {
            meta: EntryMeta::new(record_type, name, ttl),
            address,
        }
    }

    /// The resolved address.
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

/// NS, PTR or CNAME record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerEntry {
    meta: EntryMeta,
    target: String,
}

impl PointerEntry {
    /// Creates a pointer entry of the given type.
    pub fn new(
        record_type: RecordType,
        name: impl Into<String>,
        ttl: Duration,
        target: impl Into<String>,
    ) -> Self {
        Self {
            meta: EntryMeta::new(record_type, name, ttl),
            target: trim_root(target.into()),
        }
    }

    /// Name the record points at.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// MX record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailExchangeEntry {
    meta: EntryMeta,
    exchanger: String,
    preference: u16,
    tiebreak: u16,
}

impl MailExchangeEntry {
    /// Creates a mail exchange entry.
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        preference: u16,
        exchanger: impl Into<String>,
    ) -> Self {
        Self {
            meta: EntryMeta::new(RecordType::Mx, name, ttl),
            exchanger: trim_root(exchanger.into()),
            preference,
            tiebreak: draw_tiebreak(),
        }
    }

    /// Host accepting mail.
    pub fn exchanger(&self) -> &str {
        &self.exchanger
    }

    /// Preference; lower is preferred.
    pub fn preference(&self) -> u16 {
        self.preference
    }
}

impl Ordered for MailExchangeEntry {
    fn sort_order(&self) -> u16 {
        self.preference
    }

    fn tiebreak(&self) -> u16 {
        self.tiebreak
    }
}

/// SRV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    meta: EntryMeta,
    host: String,
    priority: u16,
    weight: u16,
    port: u16,
    tiebreak: u16,
}

impl ServiceEntry {
    /// Creates a service entry.
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        priority: u16,
        weight: u16,
        port: u16,
        host: impl Into<String>,
    ) -> Self {
        Self {
            meta: EntryMeta::new(RecordType::Srv, name, ttl),
            host: trim_root(host.into()),
            priority,
            weight,
            port,
            tiebreak: draw_tiebreak(),
        }
    }

    /// Target host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Priority; lower is tried first.
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Relative weight within a priority.
    pub fn weight(&self) -> u16 {
        self.weight
    }

    /// Target port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// When this record stops being fresh.
    pub fn expires(&self) -> Instant {
        self.meta.expires
    }
}

impl Ordered for ServiceEntry {
    fn sort_order(&self) -> u16 {
        self.priority
    }

    fn tiebreak(&self) -> u16 {
        self.tiebreak
    }
}

/// TXT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntry {
    meta: EntryMeta,
    text: Vec<String>,
}

impl TextEntry {
    /// Creates a text entry from its character strings, dropping empty ones.
    pub fn new(name: impl Into<String>, ttl: Duration, text: Vec<String>) -> Self {
        Self {
            meta: EntryMeta::new(RecordType::Txt, name, ttl),
            text: text.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    /// The character strings, in record order.
    pub fn text(&self) -> &[String] {
        &self.text
    }

    /// Parses `key=value` strings into parameters.
    ///
    /// Strings without `=` are ignored; the value is everything after the
    /// first `=`.
    pub fn parameters(&self) -> Parameters {
        let mut params = Parameters::default();
        for s in &self.text {
            if s.trim().is_empty() {
                continue;
            }
            if let Some((key, value)) = s.split_once('=') {
                params.append(key, value);
            }
        }
        params
    }
}

macro_rules! impl_meta {
    ($($entry:ty),*) => {$(
        impl $entry {
            /// Fields shared by all record types.
            pub fn meta(&self) -> &EntryMeta {
                &self.meta
            }
        }
    )*};
}

impl_meta!(HostEntry, PointerEntry, MailExchangeEntry, ServiceEntry, TextEntry);

fn trim_root(mut name: String) -> String {
    if name.ends_with('.') {
        name.pop();
    }
    name
}

/// A resolved DNS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsEntry {
    /// A or AAAA
    Host(HostEntry),
    /// NS, PTR or CNAME
    Pointer(PointerEntry),
    /// MX
    MailExchange(MailExchangeEntry),
    /// SRV
    Service(ServiceEntry),
    /// TXT
    Text(TextEntry),
}

impl DnsEntry {
    /// Fields shared by all record types.
    pub fn meta(&self) -> &EntryMeta {
        match self {
            Self::Host(e) => &e.meta,
            Self::Pointer(e) => &e.meta,
            Self::MailExchange(e) => &e.meta,
            Self::Service(e) => &e.meta,
            Self::Text(e) => &e.meta,
        }
    }

    /// Record type.
    pub fn record_type(&self) -> RecordType {
        self.meta().record_type
    }

    /// Owner name.
    pub fn name(&self) -> &str {
        &self.meta().name
    }

    /// Time to live.
    pub fn ttl(&self) -> Duration {
        self.meta().ttl
    }

    /// When this record stops being fresh.
    pub fn expires(&self) -> Instant {
        self.meta().expires
    }

    /// Priority/preference order key, for SRV and MX.
    pub fn sort_order(&self) -> Option<u16> {
        match self {
            Self::Service(e) => Some(e.sort_order()),
            Self::MailExchange(e) => Some(e.sort_order()),
            _ => None,
        }
    }

    /// Randomized order key, for SRV and MX.
    pub fn randomizer(&self) -> Option<u32> {
        match self {
            Self::Service(e) => Some(e.randomizer()),
            Self::MailExchange(e) => Some(e.randomizer()),
            _ => None,
        }
    }

    /// The SRV payload, if this is one.
    pub fn as_service(&self) -> Option<&ServiceEntry> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }

    /// The TXT payload, if this is one.
    pub fn as_text(&self) -> Option<&TextEntry> {
        match self {
            Self::Text(e) => Some(e),
            _ => None,
        }
    }

    /// The A/AAAA payload, if this is one.
    pub fn as_host(&self) -> Option<&HostEntry> {
        match self {
            Self::Host(e) => Some(e),
            _ => None,
        }
    }

    /// The MX payload, if this is one.
    pub fn as_mail_exchange(&self) -> Option<&MailExchangeEntry> {
        match self {
            Self::MailExchange(e) => Some(e),
            _ => None,
        }
    }
}

/// Sorts SRV/MX entries ascending by priority, keeping ties in order.
pub(crate) fn sort_by_priority(entries: &mut [DnsEntry]) {
    entries.sort_by_key(|e| e.sort_order().unwrap_or(u16::MAX));
}

/// Sorts SRV/MX entries by priority tier, shuffling within each tier.
pub(crate) fn sort_randomized(entries: &mut [DnsEntry]) {
    entries.sort_by_key(|e| e.randomizer().unwrap_or(u32::MAX));
}

impl Display for DnsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(e) => write!(f, "{}", e.address),
            Self::Pointer(e) => f.write_str(&e.target),
            Self::MailExchange(e) => write!(f, "[{}]{}", e.preference, e.exchanger),
            Self::Service(e) => write!(f, "[{}][{}][{}]{}", e.priority, e.weight, e.port, e.host),
            Self::Text(e) => f.write_str(&e.text.join(";")),
        }
    }
}
