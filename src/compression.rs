//! Wire-message compression, negotiated during the handshake and applied transparently to
//! `OP_MSG`/`OP_QUERY` payloads via `OP_COMPRESSED`.

use std::io::{Read, Write};

use crate::error::{Error, Result};

const DEFAULT_ZLIB_LEVEL: i32 = 6;

/// A compressor the driver is willing to use, and the negotiation-time settings for it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compressor {
    /// Google's Snappy.
    #[cfg(feature = "snappy-compression")]
    Snappy,
    /// zlib/DEFLATE, at the given compression level (1-9, default 6).
    #[cfg(feature = "zlib-compression")]
    Zlib {
        /// The compression level passed to the deflate encoder.
        level: i32,
    },
    /// Zstandard.
    #[cfg(feature = "zstd-compression")]
    Zstd,
}

/// The wire `compressorId` byte identifying a compressor in an `OP_COMPRESSED` header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CompressorId {
    Noop = 0,
    Snappy = 1,
    Zlib = 2,
    Zstd = 3,
}

impl Compressor {
    pub(crate) fn parse_str(name: &str) -> Result<Self> {
        match name {
            #[cfg(feature = "snappy-compression")]
            "snappy" => Ok(Compressor::Snappy),
            #[cfg(feature = "zlib-compression")]
            "zlib" => Ok(Compressor::Zlib {
                level: DEFAULT_ZLIB_LEVEL,
            }),
            #[cfg(feature = "zstd-compression")]
            "zstd" => Ok(Compressor::Zstd),
            other => Err(Error::configuration(format!(
                "unsupported or disabled compressor: {}",
                other
            ))),
        }
    }

    pub(crate) fn set_zlib_level(&mut self, new_level: i32) {
        #[cfg(feature = "zlib-compression")]
        if let Compressor::Zlib { level } = self {
            if (1..=9).contains(&new_level) {
                *level = new_level;
            }
        }
        #[cfg(not(feature = "zlib-compression"))]
        let _ = new_level;
    }

    /// The string name as it appears in the `compression` handshake array.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => "snappy",
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => "zlib",
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd => "zstd",
        }
    }

    pub(crate) fn id(&self) -> CompressorId {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => CompressorId::Snappy,
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { .. } => CompressorId::Zlib,
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd => CompressorId::Zstd,
        }
    }

    pub(crate) fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => Ok(snap::raw::Encoder::new()
                .compress_vec(bytes)
                .map_err(|e| Error::internal(format!("snappy compression failed: {}", e)))?),
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { level } => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(*level as u32),
                );
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            }
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd => {
                zstd::encode_all(bytes, 0).map_err(|e| Error::internal(format!("zstd compression failed: {}", e)))
            }
        }
    }
}

pub(crate) fn decompress(id: CompressorId, bytes: &[u8]) -> Result<Vec<u8>> {
    match id {
        CompressorId::Noop => Ok(bytes.to_vec()),
        CompressorId::Snappy => {
            #[cfg(feature = "snappy-compression")]
            {
                snap::raw::Decoder::new()
                    .decompress_vec(bytes)
                    .map_err(|e| Error::internal(format!("snappy decompression failed: {}", e)))
            }
            #[cfg(not(feature = "snappy-compression"))]
            Err(Error::internal("received snappy-compressed message but snappy-compression feature is disabled"))
        }
        CompressorId::Zlib => {
            #[cfg(feature = "zlib-compression")]
            {
                let mut decoder = flate2::read::ZlibDecoder::new(bytes);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            #[cfg(not(feature = "zlib-compression"))]
            Err(Error::internal("received zlib-compressed message but zlib-compression feature is disabled"))
        }
        CompressorId::Zstd => {
            #[cfg(feature = "zstd-compression")]
            {
                zstd::decode_all(bytes).map_err(|e| Error::internal(format!("zstd decompression failed: {}", e)))
            }
            #[cfg(not(feature = "zstd-compression"))]
            Err(Error::internal("received zstd-compressed message but zstd-compression feature is disabled"))
        }
    }
}

impl TryFrom<u8> for CompressorId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressorId::Noop),
            1 => Ok(CompressorId::Snappy),
            2 => Ok(CompressorId::Zlib),
            3 => Ok(CompressorId::Zstd),
            other => Err(Error::invalid_response(format!(
                "unrecognized compressor id: {}",
                other
            ))),
        }
    }
}
