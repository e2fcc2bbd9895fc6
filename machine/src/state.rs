//! Save-state codec: binary-to-text under an encoder and a compressor,
//! plus the ROM digest that gives a machine its save-state identity.
//!
//! The codec is oblivious to content. Encoder and compressor are
//! orthogonal: save is encode(compress(bytes)), load is
//! decompress(decode(text)).

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use cpu_i8080::Snapshot;
use emu80_core::MachineError;

/// The save-state document handed to save handlers and accepted by load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SaveDocument {
    pub cpu: Snapshot,
    pub memory: MemoryDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MemoryDocument {
    /// Base64 of the memory controller's 16-byte identity.
    pub uuid: String,
    /// Base64 of the MD5 digest over the configured ROM regions.
    pub rom: String,
    pub ram: RamDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RamDocument {
    pub encoder: String,
    pub compressor: String,
    pub size: u32,
    pub bytes: String,
}

/// Compress then encode a byte run for embedding in a save document.
pub fn bin_to_txt(encoder: &str, compressor: &str, data: &[u8]) -> Result<String, MachineError> {
    let compressed = match compressor {
        "none" => data.to_vec(),
        "zlib" => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|_| MachineError::JsonConfig)?
        }
        _ => return Err(MachineError::JsonConfig),
    };

    match encoder {
        "base64" => Ok(BASE64.encode(compressed)),
        _ => Err(MachineError::JsonConfig),
    }
}

/// Decode then decompress a byte run from a save document. `size` is the
/// expected length of the decompressed bytes.
pub fn txt_to_bin(
    encoder: &str,
    compressor: &str,
    size: usize,
    text: &str,
) -> Result<Vec<u8>, MachineError> {
    let decoded = match encoder {
        "base64" => BASE64.decode(text).map_err(|_| MachineError::JsonParse)?,
        _ => return Err(MachineError::JsonConfig),
    };

    let bytes = match compressor {
        "none" => decoded,
        "zlib" => {
            let mut out = Vec::with_capacity(size);
            ZlibDecoder::new(decoded.as_slice())
                .read_to_end(&mut out)
                .map_err(|_| MachineError::JsonParse)?;
            out
        }
        _ => return Err(MachineError::JsonConfig),
    };

    Ok(bytes)
}

/// MD5 over ROM bytes: the stable identity carried across saves.
#[must_use]
pub fn rom_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}
