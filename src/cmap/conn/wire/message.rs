//! `OP_MSG` body encoding/decoding, and the `OP_COMPRESSED` envelope wrapped around it.
//!
//! `OP_MSG` is modeled as a single "section kind 0" document (the command body) per message; the
//! kind-1 document-sequence section type used for batched bulk-write payloads elsewhere in the
//! ecosystem is not needed here since this crate splits bulk writes into individually-framed
//! commands (see [`crate::bulk_write`]).

use std::io::{Cursor, Read, Write};

use bitflags::bitflags;

use super::header::{Header, OpCode};
use crate::{
    compression::{decompress, Compressor, CompressorId},
    error::{Error, Result},
};

bitflags! {
    /// `OP_MSG` flag bits. Only the bits this crate's command shapes ever set are named.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub(crate) struct MessageFlags: u32 {
        /// The message includes a checksum in its final four bytes. Not used: the driver relies
        /// on TCP/TLS for transport integrity.
        const CHECKSUM_PRESENT = 1;
        /// No reply is expected (used for unacknowledged writes).
        const MORE_TO_COME = 1 << 1;
        /// The sender is prepared to receive multiple replies ("exhaust cursor" mode). Never set
        /// by this crate; getMore uses discrete request/response pairs instead.
        const EXHAUST_ALLOWED = 1 << 16;
    }
}

/// A decoded `OP_MSG` payload: the command body document plus the flags it carried.
#[derive(Clone, Debug)]
pub(crate) struct Message {
    pub(crate) flags: MessageFlags,
    pub(crate) document: bson::Document,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
}

impl Message {
    pub(crate) fn new(document: bson::Document, more_to_come: bool) -> Self {
        Self {
            flags: if more_to_come {
                MessageFlags::MORE_TO_COME
            } else {
                MessageFlags::empty()
            },
            document,
            request_id: 0,
            response_to: 0,
        }
    }

    /// An upper bound on this message's encoded wire length (header + flags + section byte +
    /// BSON document), used to reject oversized writes before encoding or sending anything.
    pub(crate) fn estimated_wire_length(&self) -> i64 {
        super::header::HEADER_LENGTH_BYTES as i64
            + 4
            + 1
            + bson::to_vec(&self.document)
                .map(|v| v.len() as i64)
                .unwrap_or(i64::MAX)
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        // Section kind 0: a single raw BSON document.
        body.push(0u8);
        body.extend_from_slice(&bson::to_vec(&self.document)?);
        Ok(body)
    }

    /// Serializes this message, applying `compressor` (if given) as an `OP_COMPRESSED` wrapper.
    pub(crate) fn write_to(
        &self,
        writer: &mut impl Write,
        request_id: i32,
        compressor: Option<&Compressor>,
    ) -> Result<()> {
        let body = self.encode_body()?;

        match compressor {
            None => {
                let header = Header::new(request_id, OpCode::Msg, body.len() as i32);
                header.write_to(writer)?;
                writer.write_all(&body)?;
            }
            Some(compressor) => {
                let compressed = compressor.compress(&body)?;
                let mut envelope = Vec::new();
                envelope.extend_from_slice(&OpCode::MSG_WIRE_CODE.to_le_bytes());
                envelope.extend_from_slice(&(body.len() as i32).to_le_bytes());
                envelope.push(compressor.id() as u8);
                envelope.extend_from_slice(&compressed);

                let header = Header::new(request_id, OpCode::Compressed, envelope.len() as i32);
                header.write_to(writer)?;
                writer.write_all(&envelope)?;
            }
        }
        Ok(())
    }

    /// Reads and decodes one complete message (transparently decompressing `OP_COMPRESSED`).
    ///
    /// `max_message_size_bytes` is checked against the header's advertised `length` *before* the
    /// body is allocated or read, so a message bigger than the negotiated ceiling fails with a
    /// `ProtocolError` instead of driving an allocation sized off attacker-controlled input.
    pub(crate) fn read_from(reader: &mut impl Read, max_message_size_bytes: i32) -> Result<Self> {
        let header = Header::read_from(reader)?;
        if header.length > max_message_size_bytes {
            return Err(Error::invalid_response(format!(
                "message length {} exceeds the negotiated maximum message size of {} bytes",
                header.length, max_message_size_bytes
            )));
        }
        let body_len = (header.length - crate::cmap::conn::wire::header::HEADER_LENGTH_BYTES) as usize;
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;

        let (op_code, payload) = match header.op_code {
            OpCode::Msg => (OpCode::Msg, body),
            OpCode::Compressed => {
                let mut cursor = Cursor::new(&body);
                let mut buf4 = [0u8; 4];
                cursor.read_exact(&mut buf4)?;
                let _original_opcode = i32::from_le_bytes(buf4);
                cursor.read_exact(&mut buf4)?;
                let uncompressed_len = i32::from_le_bytes(buf4) as usize;
                let mut id_buf = [0u8; 1];
                cursor.read_exact(&mut id_buf)?;
                let compressor_id = CompressorId::try_from(id_buf[0])?;
                let mut compressed = Vec::new();
                cursor.read_to_end(&mut compressed)?;
                let decompressed = decompress(compressor_id, &compressed)?;
                if decompressed.len() != uncompressed_len {
                    return Err(Error::invalid_response(
                        "decompressed message length does not match advertised length",
                    ));
                }
                (OpCode::Msg, decompressed)
            }
        };
        let _ = op_code;

        Self::decode_body(&payload, header.request_id, header.response_to)
    }

    fn decode_body(body: &[u8], request_id: i32, response_to: i32) -> Result<Self> {
        if body.len() < 4 {
            return Err(Error::invalid_response("OP_MSG body too short"));
        }
        let flags = MessageFlags::from_bits_truncate(u32::from_le_bytes([
            body[0], body[1], body[2], body[3],
        ]));
        let mut cursor = Cursor::new(&body[4..]);
        let mut kind = [0u8; 1];
        cursor.read_exact(&mut kind)?;
        if kind[0] != 0 {
            return Err(Error::invalid_response(
                "only section kind 0 is supported in replies",
            ));
        }
        let document: bson::Document = bson::from_reader(&mut cursor)?;

        Ok(Self {
            flags,
            document,
            request_id,
            response_to,
        })
    }
}

impl OpCode {
    // OP_MSG's own numeric code, needed inside the OP_COMPRESSED envelope's "original opcode"
    // field even though the outer header's opcode is OP_COMPRESSED.
    const MSG_WIRE_CODE: i32 = 2013;
}
