//! `GSSAPI` (Kerberos) authentication. Feature-gated behind `gssapi-auth` since it links
//! against the system's GSSAPI library (MIT krb5 or Heimdal) through `cross-krb5`; a build
//! without a Kerberos library installed simply omits this mechanism from [`AuthMechanism`].
#![cfg(feature = "gssapi-auth")]

use std::net::ToSocketAddrs;

use cross_krb5::{ClientCtx, InitiateFlags, Step};

use super::Credential;
use crate::{
    cmap::conn::Connection,
    error::{Error, Result},
};

const GSSAPI_STR: &str = "GSSAPI";

/// `authMechanismProperties` recognized for `GSSAPI`, per spec.md §4.1's
/// `authMechanismProperties` grammar.
#[derive(Clone, Debug)]
pub(crate) struct GssapiProperties {
    pub(crate) service_name: String,
    pub(crate) canonicalize_host_name: CanonicalizeHostName,
    pub(crate) service_realm: Option<String>,
    pub(crate) service_host: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum CanonicalizeHostName {
    #[default]
    None,
    Forward,
    ForwardAndReverse,
}

impl GssapiProperties {
    pub(crate) fn from_credential(credential: &Credential) -> Result<Self> {
        let mut properties = GssapiProperties {
            service_name: "mongodb".to_string(),
            canonicalize_host_name: CanonicalizeHostName::None,
            service_realm: None,
            service_host: None,
        };
        let Some(props) = &credential.mechanism_properties else {
            return Ok(properties);
        };

        if let Some(bson::Bson::String(name)) = props.get("SERVICE_NAME") {
            properties.service_name = name.clone();
        }
        if let Some(value) = props.get("CANONICALIZE_HOST_NAME") {
            properties.canonicalize_host_name = match value {
                bson::Bson::String(s) => match s.as_str() {
                    "none" | "false" => CanonicalizeHostName::None,
                    "forward" => CanonicalizeHostName::Forward,
                    "forwardAndReverse" | "true" => CanonicalizeHostName::ForwardAndReverse,
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "invalid CANONICALIZE_HOST_NAME value: {other}"
                        )))
                    }
                },
                bson::Bson::Boolean(true) => CanonicalizeHostName::ForwardAndReverse,
                bson::Bson::Boolean(false) => CanonicalizeHostName::None,
                _ => {
                    return Err(Error::invalid_argument(
                        "CANONICALIZE_HOST_NAME must be a string or boolean",
                    ))
                }
            };
        }
        if let Some(bson::Bson::String(realm)) = props.get("SERVICE_REALM") {
            properties.service_realm = Some(realm.clone());
        }
        if let Some(bson::Bson::String(host)) = props.get("SERVICE_HOST") {
            properties.service_host = Some(host.clone());
        }

        Ok(properties)
    }
}

fn canonicalize_hostname(hostname: &str, mode: &CanonicalizeHostName) -> Result<String> {
    if *mode == CanonicalizeHostName::None {
        return Ok(hostname.to_string());
    }

    let addr = (hostname, 0)
        .to_socket_addrs()
        .map_err(|e| {
            Error::authentication_error(
                GSSAPI_STR,
                &format!("DNS resolution failed for hostname '{hostname}': {e}"),
            )
        })?
        .next()
        .ok_or_else(|| {
            Error::authentication_error(
                GSSAPI_STR,
                &format!("no addresses found for hostname '{hostname}'"),
            )
        })?;

    if *mode == CanonicalizeHostName::Forward {
        return Ok(hostname.to_lowercase());
    }

    match dns_lookup::getnameinfo(&addr, 0) {
        Ok((reversed, _)) => Ok(reversed.to_lowercase()),
        Err(_) => Ok(hostname.to_lowercase()),
    }
}

/// Drives one client-side Kerberos security context to completion across `saslStart`/
/// `saslContinue` round trips. `step` is synchronous; `cross-krb5` itself never blocks on
/// network I/O (it only wraps the local GSSAPI library), so no async runtime is needed here.
struct GssapiAuthenticator {
    pending_ctx: Option<cross_krb5::PendingClientCtx>,
    client_ctx: Option<ClientCtx>,
    service_principal: String,
    is_complete: bool,
}

impl GssapiAuthenticator {
    fn new(properties: &GssapiProperties, hostname: &str) -> Self {
        let realm_suffix = properties
            .service_realm
            .as_deref()
            .map(|r| format!("@{r}"))
            .unwrap_or_default();
        Self {
            pending_ctx: None,
            client_ctx: None,
            service_principal: format!("{}/{hostname}{realm_suffix}", properties.service_name),
            is_complete: false,
        }
    }

    fn step(&mut self, user_principal: Option<&str>, challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        if self.pending_ctx.is_none() && self.client_ctx.is_none() {
            let (pending_ctx, initial_token) = ClientCtx::new(
                InitiateFlags::empty(),
                user_principal,
                &self.service_principal,
                None,
            )
            .map_err(|e| {
                Error::authentication_error(
                    GSSAPI_STR,
                    &format!("failed to initialize GSSAPI context: {e}"),
                )
            })?;
            self.pending_ctx = Some(pending_ctx);
            return Ok(Some(initial_token.to_vec()));
        }

        let challenge_data = challenge.ok_or_else(|| {
            Error::authentication_error(GSSAPI_STR, "expected challenge data for GSSAPI continuation")
        })?;
        let pending_ctx = self.pending_ctx.take().ok_or_else(|| {
            Error::authentication_error(GSSAPI_STR, "authentication context not initialized")
        })?;

        match pending_ctx.step(challenge_data).map_err(|e| {
            Error::authentication_error(GSSAPI_STR, &format!("GSSAPI step failed: {e}"))
        })? {
            Step::Finished((ctx, token)) => {
                self.client_ctx = Some(ctx);
                self.is_complete = true;
                Ok(token.map(|t| t.to_vec()))
            }
            Step::Continue((ctx, token)) => {
                self.pending_ctx = Some(ctx);
                Ok(Some(token.to_vec()))
            }
        }
    }
}

/// Runs the `GSSAPI` SASL conversation over `conn`, per spec.md §4.8: a sequence of
/// `saslStart`/`saslContinue` round trips whose outcome is determined by the server's `done`
/// flag, with the actual security-context stepping delegated to the system GSSAPI library
/// (the protocol framing is this crate's responsibility; the mechanism cryptography is not, per
/// §1's Out-of-scope list).
pub(crate) fn authenticate(conn: &mut Connection, credential: &Credential) -> Result<()> {
    let properties = GssapiProperties::from_credential(credential)?;
    let hostname = canonicalize_hostname(&conn.address().host, &properties.canonicalize_host_name)?;
    let service_host = properties.service_host.clone().unwrap_or(hostname);
    let mut authenticator = GssapiAuthenticator::new(&properties, &service_host);

    let source = credential.source.as_deref().unwrap_or("$external");
    let mut conversation_id = None;
    let mut payload: Vec<u8> = Vec::new();

    // A real exchange completes in 2-3 round trips; 10 is a generous ceiling against a
    // misbehaving server that never sets `done`.
    for _ in 0..10 {
        let challenge = if payload.is_empty() {
            None
        } else {
            Some(payload.as_slice())
        };
        let output_token = authenticator.step(credential.username.as_deref(), challenge)?;

        let Some(token) = output_token else {
            return if authenticator.is_complete {
                Ok(())
            } else {
                Err(Error::authentication_error(
                    GSSAPI_STR,
                    "GSSAPI context produced no token before completion",
                ))
            };
        };

        let response = match conversation_id {
            None => conn.run_sasl_start(source, GSSAPI_STR, &token)?,
            Some(id) => conn.run_sasl_continue(source, id, &token)?,
        };
        conversation_id = Some(response.conversation_id);
        payload = response.payload;

        if response.done && authenticator.is_complete {
            return Ok(());
        }
    }

    Err(Error::authentication_error(
        GSSAPI_STR,
        "GSSAPI authentication did not complete after 10 round trips",
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_properties_use_mongodb_service_name() {
        let cred = Credential::default();
        let properties = GssapiProperties::from_credential(&cred).unwrap();
        assert_eq!(properties.service_name, "mongodb");
        assert_eq!(properties.canonicalize_host_name, CanonicalizeHostName::None);
    }

    #[test]
    fn canonicalize_host_name_property_parses_boolean_aliases() {
        let cred = Credential {
            mechanism_properties: Some(bson::doc! { "CANONICALIZE_HOST_NAME": true }),
            ..Default::default()
        };
        let properties = GssapiProperties::from_credential(&cred).unwrap();
        assert_eq!(
            properties.canonicalize_host_name,
            CanonicalizeHostName::ForwardAndReverse
        );
    }

    #[test]
    fn rejects_unrecognized_canonicalize_host_name_value() {
        let cred = Credential {
            mechanism_properties: Some(bson::doc! { "CANONICALIZE_HOST_NAME": "sideways" }),
            ..Default::default()
        };
        assert!(GssapiProperties::from_credential(&cred).is_err());
    }

    #[test]
    fn canonicalize_hostname_none_is_identity() {
        let result = canonicalize_hostname("mongo.example.com", &CanonicalizeHostName::None);
        assert_eq!(result.unwrap(), "mongo.example.com");
    }
}
