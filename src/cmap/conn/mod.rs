//! [`Connection`]: one TCP (optionally TLS) link to one server. Owns framing, compression,
//! timeouts, and the low-level command round trip that the handshake, monitor, authentication,
//! and operation-dispatch layers are all built on top of.

mod stream;
pub(crate) mod wire;

use std::{
    io::ErrorKind as IoErrorKind,
    time::{Duration, Instant},
};

use bson::Document;

use self::{
    stream::Stream,
    wire::message::Message,
};
use crate::{
    compression::Compressor,
    error::{CommandError, Error, ErrorKind, Result},
    options::{ClientOptions, ServerAddress},
};

/// The response to one `saslStart`/`saslContinue` round trip.
pub(crate) struct SaslResponse {
    pub(crate) conversation_id: i32,
    pub(crate) payload: Vec<u8>,
    pub(crate) done: bool,
}

/// One owned socket to one [`ServerAddress`], plus everything negotiated about it: wire-version
/// window, max message/document/batch sizes, and a chosen compressor. Destroyed (never reused)
/// on any unrecoverable I/O error.
pub(crate) struct Connection {
    address: ServerAddress,
    stream: Stream,
    request_id: i32,
    socket_timeout: Option<Duration>,
    last_used: Instant,
    compressor: Option<Compressor>,
    /// Set once the handshake reply has been parsed by the caller (monitor or connection
    /// establishment path); read by operation dispatch to decide OP_MSG vs. legacy framing and
    /// to enforce `max_message_size_bytes`.
    pub(crate) max_wire_version: i32,
    pub(crate) max_message_size_bytes: i32,
    pub(crate) max_bson_object_size: i32,
    pub(crate) max_write_batch_size: i32,
}

const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;
const DEFAULT_MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;
const DEFAULT_MAX_WRITE_BATCH_SIZE: i32 = 100_000;

/// Op codes that are never wrapped in `OP_COMPRESSED`, regardless of a negotiated compressor.
const COMPRESSION_EXEMPT_COMMANDS: &[&str] = &[
    "hello",
    "ismaster",
    "isMaster",
    "getnonce",
    "authenticate",
    "saslStart",
    "saslContinue",
    "createUser",
    "updateUser",
    "copydbSaslStart",
];

impl Connection {
    /// Opens a new connection to `address`, applying `options.connect_timeout` to the TCP/TLS
    /// handshake. Does not perform the `hello` handshake itself — callers (monitor, selection)
    /// do that afterward via [`Connection::command`] so they can attach the parsed reply to a
    /// `ServerDescription`.
    pub(crate) fn connect(address: &ServerAddress, options: &ClientOptions) -> Result<Self> {
        let stream = Stream::connect(
            address,
            options.connect_timeout,
            options.tls_options.as_ref(),
        )?;
        Ok(Self {
            address: address.clone(),
            stream,
            request_id: 1,
            socket_timeout: options.socket_timeout,
            last_used: Instant::now(),
            compressor: None,
            max_wire_version: 0,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE,
            max_write_batch_size: DEFAULT_MAX_WRITE_BATCH_SIZE,
        })
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn set_compressor(&mut self, compressor: Option<Compressor>) {
        self.compressor = compressor;
    }

    /// Applies negotiated capabilities from a handshake reply. Called once by the monitor/
    /// connection-establishment path right after the first `hello` round trip.
    pub(crate) fn apply_handshake(&mut self, reply: &crate::hello::HelloReply) {
        self.max_wire_version = reply.max_wire_version;
    }

    fn next_request_id(&mut self) -> i32 {
        let id = self.request_id;
        self.request_id = self.request_id.wrapping_add(1);
        id
    }

    /// Runs one command round trip against `db`, returning the raw reply document. Returns
    /// `Err` if the reply's `ok` field is falsy or missing, wrapping a [`CommandError`].
    pub(crate) fn command(&mut self, db: &str, mut command: Document) -> Result<Document> {
        command.insert("$db", db);
        self.send(command, false)?;
        let reply = self.receive()?;
        check_command_reply(reply)
    }

    /// Like [`Connection::command`], but does not wait for a reply (used for `w: 0` writes).
    pub(crate) fn command_unacknowledged(&mut self, db: &str, mut command: Document) -> Result<()> {
        command.insert("$db", db);
        self.send(command, true)
    }

    fn send(&mut self, document: Document, more_to_come: bool) -> Result<()> {
        let compressor = compressor_for(&document, self.compressor.as_ref());
        let request_id = self.next_request_id();
        let message = Message::new(document, more_to_come);

        // Checked against the negotiated ceiling before a single byte goes out, per the "write
        // of size > max_message_size_bytes fails before any bytes are sent" I/O discipline rule.
        let estimated_len = message.estimated_wire_length();
        if estimated_len > self.max_message_size_bytes as i64 {
            return Err(Error::command_size_error(
                estimated_len,
                self.max_message_size_bytes as i64,
            ));
        }

        self.stream.set_write_timeout(self.socket_timeout)?;
        let result = message.write_to(&mut self.stream, request_id, compressor);
        self.last_used = Instant::now();
        result.map_err(reclassify_io_error)
    }

    fn receive(&mut self) -> Result<Document> {
        self.stream.set_read_timeout(self.socket_timeout)?;
        let result = Message::read_from(&mut self.stream, self.max_message_size_bytes);
        self.last_used = Instant::now();
        let message = result.map_err(reclassify_io_error)?;
        Ok(message.document)
    }

    /// Runs the first `saslStart` round trip of a SASL mechanism, passing `mechanism`'s name and
    /// the mechanism-specific initial payload.
    pub(crate) fn run_sasl_start(
        &mut self,
        db: &str,
        mechanism: &str,
        payload: &[u8],
    ) -> Result<SaslResponse> {
        let command = bson::doc! {
            "saslStart": 1,
            "mechanism": mechanism,
            "payload": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: payload.to_vec(),
            },
        };
        let reply = self.command(db, command)?;
        parse_sasl_reply(reply)
    }

    /// Runs a subsequent `saslContinue` round trip against an in-progress conversation.
    pub(crate) fn run_sasl_continue(
        &mut self,
        db: &str,
        conversation_id: i32,
        payload: &[u8],
    ) -> Result<SaslResponse> {
        let command = bson::doc! {
            "saslContinue": 1,
            "conversationId": conversation_id,
            "payload": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: payload.to_vec(),
            },
        };
        let reply = self.command(db, command)?;
        parse_sasl_reply(reply)
    }

    /// Runs the single-round-trip legacy `authenticate` command (used by MONGODB-X509).
    pub(crate) fn run_authenticate_command(&mut self, command: Document) -> Result<()> {
        let db = command
            .get_str("db")
            .unwrap_or("$external")
            .to_string();
        self.command(&db, command)?;
        Ok(())
    }
}

fn parse_sasl_reply(reply: Document) -> Result<SaslResponse> {
    let conversation_id = reply
        .get_i32("conversationId")
        .or_else(|_| reply.get_i64("conversationId").map(|v| v as i32))
        .map_err(|_| Error::invalid_response("SASL reply missing conversationId"))?;
    let done = reply.get_bool("done").unwrap_or(false);
    let payload = match reply.get("payload") {
        Some(bson::Bson::Binary(bin)) => bin.bytes.clone(),
        Some(bson::Bson::String(s)) => s.clone().into_bytes(),
        _ => return Err(Error::invalid_response("SASL reply missing payload")),
    };
    Ok(SaslResponse {
        conversation_id,
        payload,
        done,
    })
}

fn compressor_for<'a>(command: &Document, compressor: Option<&'a Compressor>) -> Option<&'a Compressor> {
    let is_exempt = command.keys().next().is_some_and(|first_key| {
        COMPRESSION_EXEMPT_COMMANDS
            .iter()
            .any(|exempt| exempt.eq_ignore_ascii_case(first_key))
    });
    if is_exempt {
        None
    } else {
        compressor
    }
}

fn check_command_reply(reply: Document) -> Result<Document> {
    let ok = match reply.get("ok") {
        Some(bson::Bson::Double(d)) => *d != 0.0,
        Some(bson::Bson::Int32(i)) => *i != 0,
        Some(bson::Bson::Int64(i)) => *i != 0,
        Some(bson::Bson::Boolean(b)) => *b,
        _ => false,
    };
    if ok {
        return Ok(reply);
    }
    let error: CommandError = bson::from_document(reply.clone())
        .unwrap_or(CommandError {
            code: reply.get_i32("code").unwrap_or(-1),
            code_name: String::new(),
            message: reply
                .get_str("errmsg")
                .unwrap_or("command failed")
                .to_string(),
        });
    Err(ErrorKind::Command(error).into())
}

fn reclassify_io_error(err: Error) -> Error {
    if let ErrorKind::Io(io_err) = err.kind() {
        return match io_err.kind() {
            IoErrorKind::TimedOut | IoErrorKind::WouldBlock => Error::network_timeout(),
            IoErrorKind::UnexpectedEof | IoErrorKind::BrokenPipe | IoErrorKind::ConnectionReset => {
                Error::network(io_err.to_string())
            }
            _ => err,
        };
    }
    err
}
