//! Resolver backed by the system's `libresolv`.

use std::{ffi::CString, time::Duration};

use async_trait::async_trait;
use libresolv_sys::__res_state as ResolverState;

use super::{
    wire::{self, RCODE_NXDOMAIN},
    DnsEntry, DnsResolver, RecordType, QUERY_TIMEOUT,
};
use crate::Error;

const CLASS_IN: i32 = 1;
const MAX_MESSAGE_LEN: usize = 65_535;

// h_errno values, <netdb.h>
const HOST_NOT_FOUND: i32 = 1;
const TRY_AGAIN: i32 = 2;
const NO_RECOVERY: i32 = 3;
const NO_DATA: i32 = 4;

/// Queries through `res_nsearch(3)` and decodes the raw answer itself.
///
/// The system library applies `/etc/resolv.conf` in full: name servers,
/// search list, `ndots`, and the `timeout`/`attempts`/`rotate` options.
/// Each query gets its own resolver state and runs on tokio's blocking
/// pool, raced against the query deadline.
#[derive(Debug, Clone)]
pub struct LibResolv {
    initial_buf_size: usize,
    timeout: Duration,
}

impl Default for LibResolv {
    fn default() -> Self {
        Self::new(QUERY_TIMEOUT)
    }
}

impl LibResolv {
    /// Creates a resolver whose queries give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            initial_buf_size: 1024,
            timeout,
        }
    }

    /// Sets the size of the first answer buffer. Longer answers are asked
    /// for again with a buffer that fits.
    pub fn initial_buf_size(self, initial_buf_size: usize) -> Self {
        Self {
            initial_buf_size: initial_buf_size.clamp(512, MAX_MESSAGE_LEN),
            ..self
        }
    }
}

/// What one search produced.
#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Message(Vec<u8>),
    NoRecords,
    Failed(i32),
}

fn search(name: &CString, record_type: RecordType, initial_buf_size: usize) -> Result<Answer, String> {
    // SAFETY: an all-zero state is what `res_ninit` expects to fill in.
    let mut state: ResolverState = unsafe { std::mem::zeroed() };
    // SAFETY: `state` is owned by this call and not shared.
    if unsafe { libresolv_sys::__res_ninit(&mut state) } < 0 {
        return Err("cannot initialize resolver state".into());
    }
    let answer = search_with(&mut state, name, record_type, initial_buf_size);
    // SAFETY: `state` was initialized above and is not used again.
    unsafe { libresolv_sys::__res_nclose(&mut state) };
    Ok(answer)
}

fn search_with(
    state: &mut ResolverState,
    name: &CString,
    record_type: RecordType,
    initial_buf_size: usize,
) -> Answer {
    let mut buf = vec![0u8; initial_buf_size];
    loop {
        // SAFETY: `name` is NUL terminated and `buf` is valid for
        // `buf.len()` bytes.
        let len = unsafe {
            libresolv_sys::__res_nsearch(
                state,
                name.as_ptr(),
                CLASS_IN as _,
                i32::from(record_type.code()) as _,
                buf.as_mut_ptr(),
                buf.len() as _,
            )
        };
        let Ok(len) = usize::try_from(len) else {
            return match state.res_h_errno {
                HOST_NOT_FOUND | NO_DATA => Answer::NoRecords,
                code => Answer::Failed(code),
            };
        };
        if len <= buf.len() || buf.len() >= MAX_MESSAGE_LEN {
            buf.truncate(len);
            return Answer::Message(buf);
        }
        #[cfg(feature = "log")]
        tracing::trace!(len, buf = buf.len(), "DNS answer larger than buffer, asking again");
        buf.resize(len.min(MAX_MESSAGE_LEN), 0);
    }
}

fn h_error(code: i32) -> String {
    let reason = match code {
        TRY_AGAIN => "temporary failure in name resolution",
        NO_RECOVERY => "non-recoverable name server failure",
        _ => "resolver failure",
    };
    format!("{reason} (h_errno {code})")
}

fn entries(name: &str, answer: Answer) -> Result<Vec<DnsEntry>, Error> {
    let buf = match answer {
        Answer::Message(buf) => buf,
        Answer::NoRecords => return Ok(Vec::new()),
        Answer::Failed(code) => return Err(Error::resolve(name, h_error(code))),
    };
    let message = wire::decode_message(&buf).map_err(|e| Error::resolve(name, e))?;
    match message.rcode() {
        0 => Ok(message.answers.into_iter().chain(message.additional).collect()),
        RCODE_NXDOMAIN => Ok(Vec::new()),
        rcode => Err(Error::resolve(name, format!("server answered with rcode {rcode}"))),
    }
}

#[async_trait]
impl DnsResolver for LibResolv {
    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<DnsEntry>, Error> {
        let c_name = CString::new(name)
            .map_err(|_| Error::Configuration(format!("query name `{name}` contains a NUL byte")))?;
        let initial_buf_size = self.initial_buf_size;
        let task =
            tokio::task::spawn_blocking(move || search(&c_name, record_type, initial_buf_size));

        let answer = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(answer))) => answer,
            Ok(Ok(Err(detail))) => return Err(Error::resolve(name, detail)),
            Ok(Err(e)) => return Err(Error::resolve(name, e)),
            Err(_) => {
                #[cfg(feature = "log")]
                tracing::debug!(query = name, timeout = ?self.timeout, "DNS query timed out");
                return Err(Error::Timeout { query: name.into() });
            }
        };
        entries(name, answer)
    }
}
