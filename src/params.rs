//! Service parameters carried in TXT records, and their lazy decoding.

use std::sync::{Arc, LazyLock, OnceLock};

use parking_lot::Mutex;
use regex::{Captures, Regex};

use crate::{crypto::AesCrypto, Error};

/// Case-insensitive, multi-valued `key=value` parameters.
///
/// Keys keep the spelling of their first occurrence and iterate in
/// insertion order. Appending to an existing key adds a value rather than
/// replacing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: Vec<(String, Vec<String>)>,
}

impl Parameters {
    /// Adds `value` under `key`.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.position(&key) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((key, vec![value.into()])),
        }
    }

    /// Merges every value of `other` into `self`.
    pub fn merge(&mut self, other: Parameters) {
        for (key, values) in other.entries {
            for value in values {
                self.append(key.clone(), value);
            }
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `key`, in record order.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.position(key).map(|idx| self.entries[idx].1.as_slice())
    }

    /// All values of `key` joined by commas.
    pub fn joined(&self, key: &str) -> Option<String> {
        self.get_all(key).map(|values| values.join(","))
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Iterates keys with their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn try_map_values(
        &self,
        mut f: impl FnMut(&str) -> Result<String, Error>,
    ) -> Result<Self, Error> {
        let entries = self
            .entries
            .iter()
            .map(|(k, values)| {
                let values = values
                    .iter()
                    .map(|v| f(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((k.clone(), values))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self { entries })
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{(?:env:(?P<env>\w+)|aes:(?P<aes>[A-Za-z0-9+/=]+))\}")
        .expect("placeholder pattern is valid")
});

/// Passes over one value before its placeholders are considered circular.
const MAX_PASSES: usize = 8;

/// Substitutes `{env:NAME}` and `{aes:BASE64}` placeholders.
///
/// The AES key is derived from the pepper and the service domain the
/// parameters were published under, so every service carries its own
/// decoder.
#[derive(Debug, Clone, Default)]
pub struct ParameterDecoder {
    pepper: Option<Arc<str>>,
    domain: Option<String>,
}

impl ParameterDecoder {
    /// Creates a decoder for parameters published under `domain`.
    pub fn new(pepper: Option<Arc<str>>, domain: Option<String>) -> Self {
        Self { pepper, domain }
    }

    /// Decodes one value, left to right, repeating until no placeholders
    /// remain. An environment variable may itself hold an `{aes:...}`
    /// placeholder.
    ///
    /// A value still holding placeholders after eight passes, such as a
    /// variable that names itself, is an [`Error::Configuration`].
    pub fn decode_value(&self, value: &str) -> Result<String, Error> {
        self.decode_with(value, &mut None)
    }

    /// Decodes every value of `params`.
    pub fn decode(&self, params: &Parameters) -> Result<Parameters, Error> {
        let mut crypto = None;
        params.try_map_values(|v| self.decode_with(v, &mut crypto))
    }

    fn decode_with(&self, value: &str, crypto: &mut Option<AesCrypto>) -> Result<String, Error> {
        let mut decoded = value.to_owned();
        for _ in 0..MAX_PASSES {
            if !PLACEHOLDER.is_match(&decoded) {
                return Ok(decoded);
            }
            decoded = self.substitute_all(&decoded, crypto)?;
        }
        if PLACEHOLDER.is_match(&decoded) {
            return Err(Error::Configuration(format!(
                "placeholders in `{value}` still unresolved after {MAX_PASSES} passes"
            )));
        }
        Ok(decoded)
    }

    fn substitute_all(&self, value: &str, crypto: &mut Option<AesCrypto>) -> Result<String, Error> {
        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(value) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&value[last..whole.start()]);
            out.push_str(&self.substitute(&caps, crypto)?);
            last = whole.end();
        }
        out.push_str(&value[last..]);
        Ok(out)
    }

    fn substitute(&self, caps: &Captures<'_>, crypto: &mut Option<AesCrypto>) -> Result<String, Error> {
        if let Some(var) = caps.name("env") {
            return Ok(std::env::var(var.as_str()).unwrap_or_default());
        }
        let payload = caps.name("aes").map(|m| m.as_str()).unwrap_or_default();
        let crypto = crypto.get_or_insert_with(|| {
            AesCrypto::new(
                self.pepper.as_deref().unwrap_or_default(),
                self.domain.as_deref().unwrap_or_default(),
            )
        });
        crypto.decrypt(payload)
    }
}

/// Raw parameters decoded at most once, on first access.
#[derive(Debug)]
pub(crate) struct LazyParameters {
    raw: Parameters,
    decoder: ParameterDecoder,
    decoded: OnceLock<Parameters>,
    lock: Mutex<()>,
}

impl LazyParameters {
    pub(crate) fn new(raw: Parameters, decoder: ParameterDecoder) -> Self {
        Self {
            raw,
            decoder,
            decoded: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn raw(&self) -> &Parameters {
        &self.raw
    }

    pub(crate) fn get(&self) -> Result<&Parameters, Error> {
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        let _guard = self.lock.lock();
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        let decoded = self.decoder.decode(&self.raw)?;
        Ok(self.decoded.get_or_init(|| decoded))
    }
}
