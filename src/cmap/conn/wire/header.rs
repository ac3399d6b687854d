//! The 16-byte header prefixing every wire protocol message.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Identifies the payload layout that follows a [`Header`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum OpCode {
    Compressed,
    Msg,
}

impl OpCode {
    const COMPRESSED: i32 = 2012;
    const MSG: i32 = 2013;

    fn from_i32(value: i32) -> Result<Self> {
        match value {
            Self::COMPRESSED => Ok(OpCode::Compressed),
            Self::MSG => Ok(OpCode::Msg),
            other => Err(Error::invalid_response(format!(
                "unsupported wire protocol opcode: {}",
                other
            ))),
        }
    }

    fn to_i32(self) -> i32 {
        match self {
            OpCode::Compressed => Self::COMPRESSED,
            OpCode::Msg => Self::MSG,
        }
    }
}

/// The fixed-size preamble of every wire protocol message: total length, request/response ids,
/// and the opcode identifying how to parse what follows.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Header {
    pub(crate) length: i32,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) op_code: OpCode,
}

pub(crate) const HEADER_LENGTH_BYTES: i32 = 16;

impl Header {
    pub(crate) fn new(request_id: i32, op_code: OpCode, body_length: i32) -> Self {
        Self {
            length: HEADER_LENGTH_BYTES + body_length,
            request_id,
            response_to: 0,
            op_code,
        }
    }

    pub(crate) fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.length.to_le_bytes())?;
        writer.write_all(&self.request_id.to_le_bytes())?;
        writer.write_all(&self.response_to.to_le_bytes())?;
        writer.write_all(&self.op_code.to_i32().to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; 4];

        reader.read_exact(&mut buf)?;
        let length = i32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let request_id = i32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let response_to = i32::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let op_code = OpCode::from_i32(i32::from_le_bytes(buf))?;

        if length < HEADER_LENGTH_BYTES {
            return Err(Error::invalid_response(format!(
                "message length {} is smaller than the header itself",
                length
            )));
        }

        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}
