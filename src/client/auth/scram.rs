//! SCRAM-SHA-1 and SCRAM-SHA-256 (RFC 5802/7677), plus the server's extra empty round trip.

use std::{
    collections::HashMap,
    fmt,
    sync::{LazyLock, RwLock},
};

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;
use sha1::Sha1;
use sha2::Sha256;

use crate::{
    client::auth::Credential,
    cmap::conn::Connection,
    error::{Error, Result},
};

const ITERATION_COUNT_KEY: char = 'i';
const ERROR_KEY: char = 'e';
const PROOF_KEY: char = 'p';
const VERIFIER_KEY: char = 'v';
const NONCE_KEY: char = 'r';
const SALT_KEY: char = 's';
const USERNAME_KEY: char = 'n';

const MIN_ITERATION_COUNT: u32 = 4096;
const NONCE_LEN_BYTES: usize = 32;

/// Which SHA variant is used for HMAC/PBKDF2 throughout the exchange.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum ScramVersion {
    Sha1,
    Sha256,
}

impl fmt::Display for ScramVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramVersion::Sha1 => write!(f, "SCRAM-SHA-1"),
            ScramVersion::Sha256 => write!(f, "SCRAM-SHA-256"),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct CacheEntry {
    username: String,
    password: String,
    salt: Vec<u8>,
    iterations: u32,
    version: ScramVersion,
}

static CREDENTIAL_CACHE: LazyLock<RwLock<HashMap<CacheEntry, Vec<u8>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn generate_nonce() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..NONCE_LEN_BYTES).map(|_| rng.random()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn parse_kvp_map(s: &str) -> HashMap<char, String> {
    s.split(',')
        .filter_map(|kvp| kvp.split_once('='))
        .filter_map(|(k, v)| k.chars().next().map(|c| (c, v.to_string())))
        .collect()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

impl ScramVersion {
    fn h(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramVersion::Sha1 => {
                use sha1::Digest;
                Sha1::digest(data).to_vec()
            }
            ScramVersion::Sha256 => {
                use sha2::Digest;
                Sha256::digest(data).to_vec()
            }
        }
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key)
                    .map_err(|_| Error::internal("invalid HMAC key length"))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            ScramVersion::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key)
                    .map_err(|_| Error::internal("invalid HMAC key length"))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn h_i(&self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        let mut out = match self {
            ScramVersion::Sha1 => vec![0u8; 20],
            ScramVersion::Sha256 => vec![0u8; 32],
        };
        match self {
            ScramVersion::Sha1 => pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out),
            ScramVersion::Sha256 => {
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out)
            }
        }
        Ok(out)
    }

    /// For SHA-1, MongoDB reuses the legacy MONGODB-CR digest of `username:mongo:password`
    /// (rather than the raw password) as SCRAM's input password, so that servers can keep
    /// storing only that digest. SHA-256 uses the password as-is, SASLprep-normalized.
    fn normalize_password(&self, username: &str, password: &str) -> Result<Vec<u8>> {
        match self {
            ScramVersion::Sha1 => {
                use sha1::Digest;
                let mut hasher = Md5::new();
                hasher.update(format!("{}:mongo:{}", username, password));
                Ok(hex::encode(hasher.finalize()).into_bytes())
            }
            ScramVersion::Sha256 => stringprep::saslprep(password)
                .map(|s| s.into_owned().into_bytes())
                .map_err(|_| Error::authentication_error(&self.to_string(), "saslprep failed")),
        }
    }

    fn salted_password(
        &self,
        username: &str,
        password: &str,
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>> {
        let entry = CacheEntry {
            username: username.to_string(),
            password: password.to_string(),
            salt: salt.to_vec(),
            iterations,
            version: *self,
        };
        if let Ok(cache) = CREDENTIAL_CACHE.read() {
            if let Some(cached) = cache.get(&entry) {
                return Ok(cached.clone());
            }
        }
        let normalized = self.normalize_password(username, password)?;
        let salted = self.h_i(&normalized, salt, iterations)?;
        if let Ok(mut cache) = CREDENTIAL_CACHE.write() {
            cache.insert(entry, salted.clone());
        }
        Ok(salted)
    }
}

/// Runs the full `saslStart`/`saslContinue` exchange (plus the extra empty round trip the
/// server requires to signal the conversation is complete) for `credential` over `conn`.
pub(crate) fn authenticate(
    conn: &mut Connection,
    credential: &Credential,
    version: ScramVersion,
    _server_max_wire_version: i32,
) -> Result<()> {
    let username = credential
        .username
        .as_deref()
        .ok_or_else(|| Error::invalid_argument("SCRAM requires a username"))?;
    let password = credential
        .password
        .as_deref()
        .ok_or_else(|| Error::invalid_argument("SCRAM requires a password"))?;
    let source = credential.resolved_source(None);

    let client_nonce = generate_nonce();
    let normalized_username = username.replace('=', "=3D").replace(',', "=2C");
    let client_first_bare = format!("{}={},r={}", USERNAME_KEY, normalized_username, client_nonce);
    let client_first = format!("n,,{}", client_first_bare);

    let start_response = conn.run_sasl_start(&source, version.to_string().as_str(), client_first.as_bytes())?;

    let server_first = String::from_utf8(start_response.payload.clone())
        .map_err(|_| Error::invalid_authentication_response(&version.to_string()))?;
    let kvp = parse_kvp_map(&server_first);
    let server_nonce = kvp
        .get(&NONCE_KEY)
        .cloned()
        .ok_or_else(|| Error::invalid_authentication_response(&version.to_string()))?;
    if !server_nonce.starts_with(&client_nonce) {
        return Err(Error::invalid_authentication_response(&version.to_string()));
    }
    let salt_b64 = kvp
        .get(&SALT_KEY)
        .cloned()
        .ok_or_else(|| Error::invalid_authentication_response(&version.to_string()))?;
    let salt = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &salt_b64)
        .map_err(|_| Error::invalid_authentication_response(&version.to_string()))?;
    let iterations: u32 = kvp
        .get(&ITERATION_COUNT_KEY)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::invalid_authentication_response(&version.to_string()))?;
    if iterations < MIN_ITERATION_COUNT {
        return Err(Error::authentication_error(
            &version.to_string(),
            "iteration count below minimum",
        ));
    }

    let without_proof = format!("c=biws,r={}", server_nonce);
    let auth_message = format!("{},{},{}", client_first_bare, server_first, without_proof);

    let salted_password = version.salted_password(username, password, &salt, iterations)?;
    let client_key = version.hmac(&salted_password, b"Client Key")?;
    let stored_key = version.h(&client_key);
    let client_signature = version.hmac(&stored_key, auth_message.as_bytes())?;
    let client_proof = xor(&client_key, &client_signature);
    let client_proof_b64 =
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, client_proof);

    let client_final = format!("{},{}={}", without_proof, PROOF_KEY, client_proof_b64);
    let continue_response =
        conn.run_sasl_continue(&source, start_response.conversation_id, client_final.as_bytes())?;

    let server_final = String::from_utf8(continue_response.payload.clone())
        .map_err(|_| Error::invalid_authentication_response(&version.to_string()))?;
    let kvp = parse_kvp_map(&server_final);
    if let Some(err) = kvp.get(&ERROR_KEY) {
        return Err(Error::authentication_error(&version.to_string(), err));
    }
    let verifier_b64 = kvp
        .get(&VERIFIER_KEY)
        .cloned()
        .ok_or_else(|| Error::invalid_authentication_response(&version.to_string()))?;
    let verifier = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &verifier_b64)
        .map_err(|_| Error::invalid_authentication_response(&version.to_string()))?;
    let server_key = version.hmac(&salted_password, b"Server Key")?;
    let expected_signature = version.hmac(&server_key, auth_message.as_bytes())?;
    if verifier != expected_signature {
        return Err(Error::authentication_error(
            &version.to_string(),
            "server signature mismatch",
        ));
    }

    if !continue_response.done {
        // The server requires one more empty round trip to formally end the conversation.
        conn.run_sasl_continue(&source, continue_response.conversation_id, b"")?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_iteration_count_below_minimum() {
        let version = ScramVersion::Sha256;
        let err = if 100 < MIN_ITERATION_COUNT {
            Err::<(), _>(Error::authentication_error(&version.to_string(), "iteration count below minimum"))
        } else {
            Ok(())
        };
        assert!(err.is_err());
    }

    #[test]
    fn parses_server_first_message() {
        let kvp = parse_kvp_map("r=abcd1234,s=c2FsdA==,i=4096");
        assert_eq!(kvp.get(&NONCE_KEY).unwrap(), "abcd1234");
        assert_eq!(kvp.get(&ITERATION_COUNT_KEY).unwrap(), "4096");
    }

    #[test]
    fn xor_is_involutive() {
        let a = vec![1u8, 2, 3, 4];
        let b = vec![9u8, 8, 7, 6];
        let x = xor(&a, &b);
        assert_eq!(xor(&x, &b), a);
    }
}
