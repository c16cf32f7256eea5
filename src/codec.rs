use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::Read;
use thiserror::Error;

/// Upper bound on the decompressed size of a single packet.
pub const MAX_DECOMPRESSED_SIZE: usize = 30_000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("zlib stream is malformed: {0}")]
    Malformed(#[from] std::io::Error),
    #[error("decompressed payload exceeds {MAX_DECOMPRESSED_SIZE} bytes")]
    TooLarge,
}

/// Deflates `data` as a zlib stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Inflates a zlib stream, refusing payloads that expand past the size cap.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data).take(MAX_DECOMPRESSED_SIZE as u64 + 1);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    if out.len() > MAX_DECOMPRESSED_SIZE {
        return Err(CodecError::TooLarge);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let payload = b"Os:0{\"jbm\":\"pessima\"}".to_vec();
        let compressed = compress(&payload).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(decompress(b"definitely not zlib").is_err());
    }

    #[test]
    fn test_size_cap_enforced() {
        let oversized = vec![0u8; MAX_DECOMPRESSED_SIZE + 1];
        let compressed = compress(&oversized).unwrap();
        assert!(matches!(decompress(&compressed), Err(CodecError::TooLarge)));
    }

    #[test]
    fn test_cap_boundary_allowed() {
        let exact = vec![b'x'; MAX_DECOMPRESSED_SIZE];
        let compressed = compress(&exact).unwrap();
        assert_eq!(decompress(&compressed).unwrap().len(), MAX_DECOMPRESSED_SIZE);
    }
}
