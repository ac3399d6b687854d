//! Connection establishment: opening a [`Connection`](conn::Connection), running its handshake,
//! and authenticating it. Sits directly below [`crate::sdam`] (which calls this to probe a
//! server and to obtain a link for a selected one) and directly above [`conn::wire`] (the byte
//! framing).

pub(crate) mod conn;
pub(crate) mod pool;

use conn::Connection;

use crate::{
    client::auth::Credential,
    error::Result,
    hello::{build_hello_command, HelloReply},
    options::{ClientOptions, ServerAddress},
};

/// Opens a connection to `address`, runs the `hello` handshake, authenticates it if a
/// credential is configured, and negotiates a compressor. Returns the connection plus the
/// parsed handshake reply so the caller can build a `ServerDescription` from it.
pub(crate) fn establish(
    address: &ServerAddress,
    options: &ClientOptions,
) -> Result<(Connection, HelloReply)> {
    let mut conn = Connection::connect(address, options)?;

    let hello_command = build_hello_command(options, options.compressors.as_deref());
    let reply_doc = conn.command("admin", hello_command)?;
    let reply: HelloReply = bson::from_document(reply_doc)
        .map_err(|e| crate::error::Error::invalid_response(e.to_string()))?;

    conn.apply_handshake(&reply);

    if let Some(credential) = &options.credential {
        authenticate(&mut conn, credential, &reply)?;
    }

    if let Some(compressor) = negotiate_compressor(options, &reply) {
        conn.set_compressor(Some(compressor));
    }

    Ok((conn, reply))
}

fn authenticate(conn: &mut Connection, credential: &Credential, reply: &HelloReply) -> Result<()> {
    let mechanism = credential.resolve_mechanism(reply);
    credential.authenticate_stream(conn, &mechanism, reply.max_wire_version)
}

fn negotiate_compressor(
    options: &ClientOptions,
    reply: &HelloReply,
) -> Option<crate::compression::Compressor> {
    let configured = options.compressors.as_ref()?;
    configured
        .iter()
        .find(|c| reply.compression.iter().any(|name| name == c.name()))
        .copied()
}
