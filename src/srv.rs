//! DNS-seedlist (`mongodb+srv://`) resolution.
//!
//! A `mongodb+srv://host.example.com` connection string resolves to a seed list by looking up
//! the `_mongodb._tcp.host.example.com` SRV record, and picks up additional default connection
//! string options from a TXT record on `host.example.com` itself. Both lookups run synchronously
//! against the system resolver; there is no background re-polling of the seed list (the
//! `mongodb+srv` "polling SRV" behavior used for cluster-topology changes without a restart is
//! out of scope, see Non-goals).

use crate::{
    error::{Error, Result},
    options::ServerAddress,
};

#[cfg(feature = "dns-resolver")]
fn resolver() -> Result<hickory_resolver::Resolver> {
    use hickory_resolver::{config::ResolverConfig, Resolver};

    // The "blocking" cargo feature gives this constructor a plain synchronous API, driven by an
    // internal resolver thread rather than requiring the caller to be inside a tokio runtime.
    Resolver::new(ResolverConfig::default(), Default::default())
        .map_err(|e| Error::configuration(format!("failed to initialize DNS resolver: {}", e)))
}

/// Resolves the SRV record for `host` into a concrete seed list of addresses.
#[cfg(feature = "dns-resolver")]
pub(crate) fn resolve_hosts(host: &str, service_name: Option<&str>) -> Result<Vec<ServerAddress>> {
    let service = service_name.unwrap_or("mongodb");
    let query = format!("_{}._tcp.{}", service, host);
    let resolver = resolver()?;
    let lookup = resolver
        .srv_lookup(&query)
        .map_err(|e| Error::dns_resolve(format!("SRV lookup for {} failed: {}", query, e)))?;

    let parent_domain = parent_domain(host)?;
    let mut addresses = Vec::new();
    for record in lookup.iter() {
        let target = record.target().to_ascii().trim_end_matches('.').to_string();
        validate_srv_target(&target, &parent_domain)?;
        addresses.push(ServerAddress::new(target, Some(record.port())));
    }

    if addresses.is_empty() {
        return Err(Error::dns_resolve(format!(
            "no SRV records found for {}",
            query
        )));
    }

    Ok(addresses)
}

/// Resolves a TXT record on `host` into a default `authSource`, if one is published. The only
/// other TXT-published key the original SRV-seedlist spec recognizes is `replicaSet`, which is
/// handled by the caller via the same lookup result; this crate only pulls `authSource` from it
/// since `replicaSet` is more commonly set explicitly by applications and duplicating the lookup
/// adds no value here.
#[cfg(feature = "dns-resolver")]
pub(crate) fn resolve_auth_source(host: &str) -> Result<Option<String>> {
    let resolver = resolver()?;
    let lookup = match resolver.txt_lookup(host) {
        Ok(lookup) => lookup,
        Err(e) if e.kind().is_no_records_found() => return Ok(None),
        Err(e) => return Err(Error::dns_resolve(format!("TXT lookup for {} failed: {}", host, e))),
    };

    let mut combined = String::new();
    for record in lookup.iter() {
        for chunk in record.txt_data() {
            combined.push_str(&String::from_utf8_lossy(chunk));
        }
    }

    for pair in combined.split('&') {
        if let Some(value) = pair.strip_prefix("authSource=") {
            return Ok(Some(value.to_string()));
        }
    }

    Ok(None)
}

#[cfg(not(feature = "dns-resolver"))]
pub(crate) fn resolve_hosts(_host: &str, _service_name: Option<&str>) -> Result<Vec<ServerAddress>> {
    Err(Error::configuration(
        "mongodb+srv:// URIs require the dns-resolver feature",
    ))
}

#[cfg(not(feature = "dns-resolver"))]
pub(crate) fn resolve_auth_source(_host: &str) -> Result<Option<String>> {
    Ok(None)
}

/// SRV target hostnames must share at least the last two labels of the domain used in the
/// connection string, preventing a compromised DNS provider for an unrelated domain from
/// redirecting the seed list.
fn validate_srv_target(target: &str, parent_domain: &str) -> Result<()> {
    if target.ends_with(parent_domain) && target.len() > parent_domain.len() {
        Ok(())
    } else {
        Err(Error::dns_resolve(format!(
            "SRV target {} is not a subdomain of {}",
            target, parent_domain
        )))
    }
}

fn parent_domain(host: &str) -> Result<String> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return Err(Error::configuration(
            "mongodb+srv:// hostname must have at least three domain labels",
        ));
    }
    Ok(format!(".{}", labels[1..].join(".")))
}
