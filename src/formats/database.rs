//! Database connection strings.
//!
//! The `syntax` parameter picks the format; without it, protocol `sql`
//! means `ado` and any other protocol names its own syntax.
//!
//! - `ado`: every parameter as `key=value;`, one string per endpoint.
//!   `{srv:host}` and `{srv:port}` are replaced with the endpoint,
//!   `{srv2:host}` and `{srv2:port}` with the next endpoint (the first,
//!   after the last) for failover partners.
//! - `mongodb`: one `mongodb://` URL over all endpoints. Requires the
//!   `database` parameter; `@User` and `@Password` become credentials.
//! - `redis`: one `host:port,...,key=value` string. `ssl=True` is added
//!   when every endpoint is on port 6380 and `ssl` is not given.

use std::{fmt::Write, sync::LazyLock};

use regex::{Captures, Regex};

use super::options;
use crate::{
    params::Parameters,
    service::{ServiceEndpoint, ServiceInfo},
    Error,
};

const ADO: &str = "ado";
const MONGODB: &str = "mongodb";
const REDIS: &str = "redis";
const REDIS_TLS_PORT: u16 = 6380;

static SRV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{srv(?P<next>2)?:(?P<part>host|port)\}").expect("srv pattern is valid")
});

/// Connection strings for a located database, in endpoint order.
pub fn connection_strings<S>(service: &S) -> Result<Vec<String>, Error>
where
    S: ServiceInfo<Endpoint = ServiceEndpoint>,
{
    let endpoints = service.endpoints();
    if endpoints.is_empty() {
        return Err(Error::Configuration(format!(
            "`{}` has no endpoints",
            service.name()
        )));
    }

    let params = service.parameters()?;
    let syntax = match params.get("syntax") {
        Some(syntax) => syntax.to_ascii_lowercase(),
        None if service.protocol().eq_ignore_ascii_case("sql") => ADO.to_owned(),
        None => service.protocol().to_ascii_lowercase(),
    };

    match syntax.as_str() {
        ADO => Ok(ado(endpoints, params)),
        MONGODB => mongodb(endpoints, params).map(|s| vec![s]),
        REDIS => Ok(vec![redis(endpoints, params)]),
        other => Err(Error::Configuration(format!(
            "connection string syntax `{other}` is not supported"
        ))),
    }
}

fn ado(endpoints: &[ServiceEndpoint], params: &Parameters) -> Vec<String> {
    let template: String = options(params, &["syntax"])
        .map(|(key, value)| format!("{key}={value};"))
        .collect();

    endpoints
        .iter()
        .enumerate()
        .map(|(i, endpoint)| {
            let partner = &endpoints[(i + 1) % endpoints.len()];
            SRV_PLACEHOLDER
                .replace_all(&template, |caps: &Captures<'_>| {
                    let target = if caps.name("next").is_some() {
                        partner
                    } else {
                        endpoint
                    };
                    if caps["part"].eq_ignore_ascii_case("host") {
                        target.host.clone()
                    } else {
                        target.port.to_string()
                    }
                })
                .into_owned()
        })
        .collect()
}

fn mongodb(endpoints: &[ServiceEndpoint], params: &Parameters) -> Result<String, Error> {
    let database = params
        .get("database")
        .ok_or_else(|| Error::Configuration("`database` parameter is required".into()))?;

    let mut url = String::from("mongodb://");
    if let Some(user) = params.get("@User") {
        url.push_str(user);
        if let Some(password) = params.get("@Password") {
            let _ = write!(url, ":{password}");
        }
        url.push('@');
    }

    let hosts: Vec<_> = endpoints.iter().map(ToString::to_string).collect();
    let _ = write!(url, "{}/{database}", hosts.join(","));

    for (i, (key, value)) in options(params, &["syntax", "database", "@User", "@Password"]).enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        let _ = write!(url, "{key}={value}");
    }
    Ok(url)
}

fn redis(endpoints: &[ServiceEndpoint], params: &Parameters) -> String {
    let mut out: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
    if endpoints.iter().all(|e| e.port == REDIS_TLS_PORT) && !params.contains_key("ssl") {
        out.push("ssl=True".into());
    }
    out.extend(options(params, &["syntax"]).map(|(key, value)| format!("{key}={value}")));
    out.join(",")
}
