//! SASL `PLAIN` (RFC 4616): a single round trip carrying `authzid\0authcid\0password`.

use crate::{
    client::auth::Credential,
    cmap::conn::Connection,
    error::{Error, Result},
};

pub(crate) fn authenticate(conn: &mut Connection, credential: &Credential) -> Result<()> {
    let username = credential
        .username
        .as_deref()
        .ok_or_else(|| Error::invalid_argument("PLAIN requires a username"))?;
    let password = credential
        .password
        .as_deref()
        .ok_or_else(|| Error::invalid_argument("PLAIN requires a password"))?;
    let source = credential.resolved_source(None);

    let mut payload = Vec::new();
    payload.push(0u8);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0u8);
    payload.extend_from_slice(password.as_bytes());

    let response = conn.run_sasl_start(&source, "PLAIN", &payload)?;
    if !response.done {
        conn.run_sasl_continue(&source, response.conversation_id, b"")?;
    }
    Ok(())
}
