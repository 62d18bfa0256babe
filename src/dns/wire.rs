//! DNS message decoding (RFC 1035).
//!
//! [`decode_message`] is a pure function over an immutable buffer. Every
//! read is bounds checked, compression pointers must point strictly
//! backwards, and each record's RDATA must be consumed within its declared
//! length. Records of types or classes this crate does not model are
//! skipped rather than failing the whole message.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use super::entry::{
    DnsEntry, HostEntry, MailExchangeEntry, PointerEntry, RecordType, ServiceEntry, TextEntry,
};

const CLASS_IN: u16 = 1;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;
const FLAG_QR: u16 = 0x8000;

/// Response codes relevant to lookups.
pub const RCODE_NXDOMAIN: u8 = 3;

/// Errors decoding a DNS message or checking a query name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A read ran past the end of the buffer.
    #[error("message truncated at offset {0}")]
    Truncated(usize),
    /// A compression pointer did not point backwards.
    #[error("bad compression pointer at offset {0}")]
    BadPointer(usize),
    /// A label used the reserved `0b01`/`0b10` prefixes.
    #[error("unsupported label type at offset {0}")]
    LabelType(usize),
    /// A name exceeded 255 octets.
    #[error("name too long")]
    NameTooLong,
    /// A label exceeded 63 octets, or was empty inside a name.
    #[error("invalid label `{0}`")]
    BadLabel(String),
    /// RDATA did not match its declared length.
    #[error("record data length mismatch at offset {0}")]
    RecordLength(usize),
}

/// A decoded response.
#[derive(Debug, Clone)]
pub struct Message {
    /// Query identifier
    pub id: u16,
    /// Header flags, including opcode and rcode
    pub flags: u16,
    /// Answer section records
    pub answers: Vec<DnsEntry>,
    /// Additional section records (e.g. A/AAAA glue for SRV targets)
    pub additional: Vec<DnsEntry>,
}

impl Message {
    /// Response code.
    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000f) as u8
    }

    /// Whether this is a response rather than a query.
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(WireError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a possibly compressed name, leaving the cursor after the
    /// name's in-place bytes.
    fn name(&mut self) -> Result<String, WireError> {
        let mut name = String::new();
        let mut wire_len = 0usize;
        let mut cursor = self.pos;
        // Each pointer must land before the previous jump target (or the
        // start of the name), so the walk only moves backwards.
        let mut limit = self.pos;
        let mut resume = None;

        loop {
            let len = *self.buf.get(cursor).ok_or(WireError::Truncated(cursor))?;
            match len & 0xc0 {
                0x00 if len == 0 => {
                    cursor += 1;
                    break;
                }
                0x00 => {
                    let start = cursor + 1;
                    let end = start + len as usize;
                    let label = self.buf.get(start..end).ok_or(WireError::Truncated(start))?;
                    wire_len += len as usize + 1;
                    if wire_len + 1 > MAX_NAME_LEN {
                        return Err(WireError::NameTooLong);
                    }
                    if !name.is_empty() {
                        name.push('.');
                    }
                    name.push_str(&String::from_utf8_lossy(label));
                    cursor = end;
                }
                0xc0 => {
                    let low = *self.buf.get(cursor + 1).ok_or(WireError::Truncated(cursor + 1))?;
                    let target = (((len & 0x3f) as usize) << 8) | low as usize;
                    if target >= limit {
                        return Err(WireError::BadPointer(cursor));
                    }
                    resume.get_or_insert(cursor + 2);
                    limit = target;
                    cursor = target;
                }
                _ => return Err(WireError::LabelType(cursor)),
            }
        }

        self.pos = resume.unwrap_or(cursor);
        Ok(name)
    }
}

/// Decodes a DNS response.
pub fn decode_message(buf: &[u8]) -> Result<Message, WireError> {
    let mut r = Reader::new(buf);
    let id = r.u16()?;
    let flags = r.u16()?;
    let qd_count = r.u16()?;
    let an_count = r.u16()?;
    let ns_count = r.u16()?;
    let ar_count = r.u16()?;

    for _ in 0..qd_count {
        r.name()?;
        r.bytes(4)?; // QTYPE, QCLASS
    }

    let answers = read_section(&mut r, an_count)?;
    // authority records only matter to recursive resolvers
    read_section(&mut r, ns_count)?;
    let additional = read_section(&mut r, ar_count)?;

    Ok(Message {
        id,
        flags,
        answers,
        additional,
    })
}

fn read_section(r: &mut Reader<'_>, count: u16) -> Result<Vec<DnsEntry>, WireError> {
    let mut entries = Vec::new();
    for _ in 0..count {
        if let Some(entry) = read_record(r)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn read_record(r: &mut Reader<'_>) -> Result<Option<DnsEntry>, WireError> {
    let name = r.name()?;
    let rtype = r.u16()?;
    let class = r.u16()?;
    let ttl = Duration::from_secs(r.u32()? as u64);
    let rdlength = r.u16()? as usize;
    let start = r.pos;
    let end = start + rdlength;
    if end > r.buf.len() {
        return Err(WireError::Truncated(start));
    }

    let record_type = match RecordType::from_code(rtype) {
        Some(t) if class == CLASS_IN => t,
        _ => {
            r.pos = end;
            return Ok(None);
        }
    };

    let entry = match record_type {
        RecordType::A => {
            let b = r.bytes(4)?;
            let addr = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
            DnsEntry::Host(HostEntry::new(name, ttl, IpAddr::V4(addr)))
        }
        RecordType::Aaaa => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(r.bytes(16)?);
            DnsEntry::Host(HostEntry::new(name, ttl, IpAddr::V6(Ipv6Addr::from(octets))))
        }
        RecordType::Ns | RecordType::Cname | RecordType::Ptr => {
            let target = r.name()?;
            DnsEntry::Pointer(PointerEntry::new(record_type, name, ttl, target))
        }
        RecordType::Mx => {
            // read order matters
            let preference = r.u16()?;
            let exchanger = r.name()?;
            DnsEntry::MailExchange(MailExchangeEntry::new(name, ttl, preference, exchanger))
        }
        RecordType::Srv => {
            let priority = r.u16()?;
            let weight = r.u16()?;
            let port = r.u16()?;
            let host = r.name()?;
            DnsEntry::Service(ServiceEntry::new(name, ttl, priority, weight, port, host))
        }
        RecordType::Txt => {
            let mut text = Vec::new();
            while r.pos < end {
                let len = r.u8()? as usize;
                text.push(String::from_utf8_lossy(r.bytes(len)?).into_owned());
            }
            DnsEntry::Text(TextEntry::new(name, ttl, text))
        }
    };

    if r.pos != end {
        return Err(WireError::RecordLength(start));
    }
    Ok(Some(entry))
}

/// Checks that `name` can be sent in a query: no empty labels, labels of
/// at most 63 octets, at most 255 octets on the wire. A trailing dot is
/// allowed.
pub fn check_name(name: &str) -> Result<(), WireError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut wire_len = 1;
    if !name.is_empty() {
        for label in name.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(WireError::BadLabel(label.to_string()));
            }
            wire_len += label.len() + 1;
        }
    }
    if wire_len > MAX_NAME_LEN {
        return Err(WireError::NameTooLong);
    }
    Ok(())
}
