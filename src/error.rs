//! Errors produced while locating services.

/// Errors encountered while resolving, caching or decoding a service.
///
/// A DNS name that simply has no records is not an error: queries report
/// [`QueryStatus::NotFound`](crate::dns::QueryStatus::NotFound) and return
/// an empty set. Only the forcing [`DnsQuery::resolve`](crate::dns::DnsQuery::resolve)
/// turns an empty answer into [`Error::Resolve`].
///
/// `Error` is `Clone` so that a memoized lookup result can be handed to
/// every caller awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Transport or protocol level failure, or an empty answer where one
    /// was required.
    #[error("`{query}` not resolved: {detail}")]
    Resolve {
        /// Name that was queried
        query: String,
        /// What went wrong
        detail: String,
    },
    /// The resolver did not answer before the query deadline.
    #[error("`{query}` lookup timed out")]
    Timeout {
        /// Name that was queried
        query: String,
    },
    /// An `{aes:...}` placeholder could not be decrypted.
    #[error("AES decryption failed: {0}")]
    Decryption(String),
    /// A required value is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn resolve(query: impl Into<String>, detail: impl ToString) -> Self {
        Self::Resolve {
            query: query.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn not_found(query: impl Into<String>) -> Self {
        Self::resolve(query, "not found")
    }

    /// Whether this error came from DNS (and so may succeed on retry).
    ///
    /// Decryption and configuration errors point at bad data rather than a
    /// transient fault, so they are never retried.
    pub fn is_dns(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Timeout { .. })
    }
}
