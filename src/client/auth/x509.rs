//! MONGODB-X509: the client proves its identity via the certificate presented during the TLS
//! handshake; the `authenticate` command here only carries the username (optional — the server
//! can read it back out of the certificate subject) so the server can bind the session.

use crate::{client::auth::Credential, cmap::conn::Connection, error::Result};

pub(crate) fn authenticate(conn: &mut Connection, credential: &Credential) -> Result<()> {
    let mut command = bson::doc! {
        "authenticate": 1,
        "mechanism": "MONGODB-X509",
    };
    if let Some(username) = &credential.username {
        command.insert("user", username.clone());
    }
    conn.run_authenticate_command(command)
}
