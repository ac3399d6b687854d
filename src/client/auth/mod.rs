//! Authentication mechanisms and credential negotiation.

use std::{fmt, str::FromStr};

use serde::Deserialize;

use crate::{
    cmap::conn::Connection,
    error::{Error, Result},
};

#[cfg(feature = "gssapi-auth")]
pub(crate) mod gssapi;
pub(crate) mod plain;
pub(crate) mod scram;
pub(crate) mod x509;

const SCRAM_SHA_1_STR: &str = "SCRAM-SHA-1";
const SCRAM_SHA_256_STR: &str = "SCRAM-SHA-256";
const MONGODB_X509_STR: &str = "MONGODB-X509";
const PLAIN_STR: &str = "PLAIN";
const GSSAPI_STR: &str = "GSSAPI";
const MONGODB_CR_STR: &str = "MONGODB-CR";

/// A supported authentication mechanism. `GSSAPI` requires the `gssapi-auth` feature (it links
/// against the system's Kerberos library). `MONGODB-AWS`/`MONGODB-OIDC` and their cloud-provider
/// variants require an external cloud metadata service or IdP and are not implemented; see the
/// crate-level Non-goals.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum AuthMechanism {
    /// Negotiated automatically from the server's `saslSupportedMechs` when not specified
    /// explicitly; resolves to SCRAM-SHA-256 if the server advertises it, else SCRAM-SHA-1.
    ScramSha1,
    /// SCRAM-SHA-256, per RFC 5802/7677.
    ScramSha256,
    /// X.509 client-certificate authentication.
    MongoDbX509,
    /// Plaintext SASL `PLAIN`, typically used with LDAP-backed deployments over TLS.
    Plain,
    /// Kerberos, via `saslStart`/`saslContinue` framing around a system GSSAPI library.
    /// Recognized by the URI/option parser unconditionally; only usable when this crate is built
    /// with the `gssapi-auth` feature (see [`Credential::authenticate_stream`]).
    Gssapi,
    /// The legacy MONGODB-CR mechanism, removed from MongoDB server releases since 4.0.
    /// Recognized so a URI naming it produces a clear [`Error::invalid_argument`] at connection
    /// time rather than a confusing downstream protocol error; never negotiated automatically.
    MongoDbCr,
}

impl AuthMechanism {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha1 => SCRAM_SHA_1_STR,
            AuthMechanism::ScramSha256 => SCRAM_SHA_256_STR,
            AuthMechanism::MongoDbX509 => MONGODB_X509_STR,
            AuthMechanism::Plain => PLAIN_STR,
            AuthMechanism::Gssapi => GSSAPI_STR,
            AuthMechanism::MongoDbCr => MONGODB_CR_STR,
        }
    }

    /// The `authSource` implied by this mechanism when the URI/options don't specify one.
    pub(crate) fn default_source<'a>(&self, uri_db: Option<&'a str>) -> &'a str {
        match self {
            AuthMechanism::MongoDbX509 => "$external",
            AuthMechanism::Plain => "$external",
            AuthMechanism::Gssapi => "$external",
            _ => uri_db.unwrap_or("admin"),
        }
    }

    pub(crate) fn validate_credential(&self, credential: &Credential) -> Result<()> {
        match self {
            AuthMechanism::MongoDbX509 => {
                if credential.password.is_some() {
                    return Err(Error::invalid_argument(
                        "MONGODB-X509 does not accept a password",
                    ));
                }
            }
            AuthMechanism::MongoDbCr => {
                return Err(Error::invalid_argument(
                    "MONGODB-CR was removed from MongoDB server releases since 4.0 and is not \
                     supported; use SCRAM-SHA-256 (the default) instead",
                ));
            }
            AuthMechanism::Gssapi => {
                #[cfg(not(feature = "gssapi-auth"))]
                {
                    return Err(Error::invalid_argument(
                        "GSSAPI requires this crate's `gssapi-auth` feature",
                    ));
                }
                #[cfg(feature = "gssapi-auth")]
                if credential.username.is_none() {
                    return Err(Error::invalid_argument("GSSAPI requires a username"));
                }
            }
            AuthMechanism::Plain | AuthMechanism::ScramSha1 | AuthMechanism::ScramSha256 => {
                if credential.username.is_none() {
                    return Err(Error::invalid_argument(format!(
                        "{} requires a username",
                        self.as_str()
                    )));
                }
                if credential.password.is_none() {
                    return Err(Error::invalid_argument(format!(
                        "{} requires a password",
                        self.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthMechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            SCRAM_SHA_1_STR => Ok(AuthMechanism::ScramSha1),
            SCRAM_SHA_256_STR => Ok(AuthMechanism::ScramSha256),
            MONGODB_X509_STR => Ok(AuthMechanism::MongoDbX509),
            PLAIN_STR => Ok(AuthMechanism::Plain),
            GSSAPI_STR => Ok(AuthMechanism::Gssapi),
            MONGODB_CR_STR => Ok(AuthMechanism::MongoDbCr),
            other => Err(Error::invalid_argument(format!(
                "unsupported auth mechanism: {}",
                other
            ))),
        }
    }
}

/// Properties an application supplies alongside a [`Credential`] that some mechanisms require,
/// e.g. `GSSAPI`'s `SERVICE_NAME`/`CANONICALIZE_HOST_NAME`/`SERVICE_REALM`/`SERVICE_HOST`. Left as
/// a free-form document since most mechanisms this crate implements don't need any.
pub type MechanismProperties = bson::Document;

/// The credentials used to authenticate a [`Connection`] after its handshake.
#[derive(Clone, Debug, Default, Deserialize)]
#[non_exhaustive]
pub struct Credential {
    /// The username. Required by every mechanism except MONGODB-X509 (where it can be inferred
    /// from the client certificate's subject).
    pub username: Option<String>,
    /// The database to authenticate against.
    pub source: Option<String>,
    /// The password. Not used by MONGODB-X509.
    pub password: Option<String>,
    /// The mechanism to use. When unset, negotiated from the server's handshake reply.
    pub mechanism: Option<AuthMechanism>,
    /// Mechanism-specific properties (unused by the mechanisms this crate implements).
    pub mechanism_properties: Option<MechanismProperties>,
}

impl Credential {
    pub(crate) fn resolved_source(&self, uri_db: Option<&str>) -> String {
        self.source.clone().unwrap_or_else(|| {
            self.mechanism
                .as_ref()
                .map(|m| m.default_source(uri_db).to_string())
                .unwrap_or_else(|| uri_db.unwrap_or("admin").to_string())
        })
    }

    /// Appends `saslSupportedMechs` to a handshake command if the mechanism still needs to be
    /// negotiated, so the reply can be used to pick SCRAM-SHA-1 vs SCRAM-SHA-256 without a round
    /// trip.
    pub(crate) fn append_needed_mechanism_negotiation(&self, command: &mut bson::Document) {
        if self.mechanism.is_some() {
            return;
        }
        let Some(username) = &self.username else {
            return;
        };
        let source = self.resolved_source(None);
        command.insert(
            "saslSupportedMechs",
            format!("{}.{}", source, username),
        );
    }

    /// Resolves the mechanism to actually use, consulting the handshake reply's
    /// `saslSupportedMechs` when the application didn't pin one explicitly.
    pub(crate) fn resolve_mechanism(&self, reply: &crate::hello::HelloReply) -> AuthMechanism {
        if let Some(mechanism) = &self.mechanism {
            return mechanism.clone();
        }
        if reply
            .sasl_supported_mechs
            .iter()
            .any(|m| m == SCRAM_SHA_256_STR)
        {
            AuthMechanism::ScramSha256
        } else {
            AuthMechanism::ScramSha1
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(mechanism) = &self.mechanism {
            mechanism.validate_credential(self)
        } else {
            Ok(())
        }
    }

    /// Runs the full authentication handshake for `mechanism` over an already wire-handshaken
    /// connection.
    pub(crate) fn authenticate_stream(
        &self,
        conn: &mut Connection,
        mechanism: &AuthMechanism,
        server_max_wire_version: i32,
    ) -> Result<()> {
        mechanism.validate_credential(self)?;
        match mechanism {
            AuthMechanism::ScramSha1 => {
                scram::authenticate(conn, self, scram::ScramVersion::Sha1, server_max_wire_version)
            }
            AuthMechanism::ScramSha256 => {
                scram::authenticate(conn, self, scram::ScramVersion::Sha256, server_max_wire_version)
            }
            AuthMechanism::MongoDbX509 => x509::authenticate(conn, self),
            AuthMechanism::Plain => plain::authenticate(conn, self),
            #[cfg(feature = "gssapi-auth")]
            AuthMechanism::Gssapi => gssapi::authenticate(conn, self),
            #[cfg(not(feature = "gssapi-auth"))]
            AuthMechanism::Gssapi => unreachable!("validate_credential rejects GSSAPI without gssapi-auth"),
            AuthMechanism::MongoDbCr => unreachable!("validate_credential always rejects MONGODB-CR"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn x509_rejects_password() {
        let cred = Credential {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(AuthMechanism::MongoDbX509.validate_credential(&cred).is_err());
    }

    #[test]
    fn scram_requires_username_and_password() {
        let cred = Credential::default();
        assert!(AuthMechanism::ScramSha256.validate_credential(&cred).is_err());
    }

    #[test]
    fn default_source_is_external_for_x509() {
        assert_eq!(AuthMechanism::MongoDbX509.default_source(Some("test")), "$external");
        assert_eq!(AuthMechanism::ScramSha256.default_source(Some("test")), "test");
        assert_eq!(AuthMechanism::ScramSha256.default_source(None), "admin");
    }

    #[test]
    fn mongodb_cr_is_recognized_but_always_rejected() {
        let mechanism: AuthMechanism = "MONGODB-CR".parse().unwrap();
        assert_eq!(mechanism, AuthMechanism::MongoDbCr);
        let cred = Credential {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        };
        assert!(mechanism.validate_credential(&cred).is_err());
    }

    #[test]
    fn gssapi_default_source_is_external() {
        assert_eq!(AuthMechanism::Gssapi.default_source(Some("test")), "$external");
    }

    #[cfg(not(feature = "gssapi-auth"))]
    #[test]
    fn gssapi_without_feature_is_rejected() {
        let cred = Credential {
            username: Some("user@REALM".to_string()),
            ..Default::default()
        };
        assert!(AuthMechanism::Gssapi.validate_credential(&cred).is_err());
    }
}
