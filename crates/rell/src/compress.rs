//! Compression envelopes: raw deflate, zlib, gzip, and auto-detection.

use std::io::{Read, Write};

use flate2::{
    Compression,
    read::{DeflateDecoder, GzDecoder, ZlibDecoder},
    write::{DeflateEncoder, GzEncoder, ZlibEncoder},
};

use crate::error::{ErrorId, RunError, RunResult};

/// Which envelope wraps the deflated payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Raw deflate bits, no header or checksum.
    Raw,
    /// Two-byte zlib header plus adler32 trailer.
    Zlib,
    /// Gzip header with CRC32 and original-length trailer.
    Gzip,
    /// Sniff the input: gzip magic, zlib header, else raw.
    Detect,
}

pub fn compress(data: &[u8], envelope: Envelope) -> RunResult<Vec<u8>> {
    let result = match envelope {
        Envelope::Raw => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).and_then(|()| enc.finish())
        }
        Envelope::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).and_then(|()| enc.finish())
        }
        Envelope::Gzip | Envelope::Detect => {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(data).and_then(|()| enc.finish())
        }
    };
    result.map_err(|err| RunError::fail(ErrorId::BadCompression, format!("compression failed: {err}")))
}

/// Decompresses with the stated envelope; `Detect` sniffs the header.
/// `max` bounds the inflated size when given.
pub fn decompress(data: &[u8], envelope: Envelope, max: Option<usize>) -> RunResult<Vec<u8>> {
    let envelope = match envelope {
        Envelope::Detect => sniff(data),
        fixed => fixed,
    };
    let mut out = Vec::new();
    let result = match envelope {
        Envelope::Raw => DeflateDecoder::new(data).read_to_end(&mut out),
        Envelope::Zlib => ZlibDecoder::new(data).read_to_end(&mut out),
        Envelope::Gzip | Envelope::Detect => GzDecoder::new(data).read_to_end(&mut out),
    };
    result.map_err(|err| RunError::fail(ErrorId::BadCompression, format!("decompression failed: {err}")))?;
    if let Some(limit) = max
        && out.len() > limit
    {
        return Err(RunError::fail(
            ErrorId::BadCompression,
            format!("inflated size {} exceeds limit {limit}", out.len()),
        ));
    }
    Ok(out)
}

fn sniff(data: &[u8]) -> Envelope {
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        Envelope::Gzip
    } else if data.len() >= 2 && data[0] == 0x78 && matches!(data[1], 0x01 | 0x5e | 0x9c | 0xda) {
        Envelope::Zlib
    } else {
        Envelope::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, repeatedly, repeatedly";

    #[test]
    fn raw_round_trip() {
        let packed = compress(SAMPLE, Envelope::Raw).unwrap();
        let unpacked = decompress(&packed, Envelope::Raw, None).unwrap();
        assert_eq!(unpacked, SAMPLE);
    }

    #[test]
    fn zlib_round_trip_and_detect() {
        let packed = compress(SAMPLE, Envelope::Zlib).unwrap();
        assert_eq!(decompress(&packed, Envelope::Zlib, None).unwrap(), SAMPLE);
        assert_eq!(decompress(&packed, Envelope::Detect, None).unwrap(), SAMPLE);
    }

    #[test]
    fn gzip_round_trip_and_detect() {
        let packed = compress(SAMPLE, Envelope::Gzip).unwrap();
        assert_eq!(packed[0], 0x1f, "gzip magic present");
        assert_eq!(decompress(&packed, Envelope::Gzip, None).unwrap(), SAMPLE);
        assert_eq!(decompress(&packed, Envelope::Detect, None).unwrap(), SAMPLE);
    }

    #[test]
    fn corrupt_gzip_reports_error() {
        let mut packed = compress(SAMPLE, Envelope::Gzip).unwrap();
        let len = packed.len();
        packed[len - 5] ^= 0xff; // flip checksum/length trailer bits
        assert!(decompress(&packed, Envelope::Gzip, None).is_err());
    }

    #[test]
    fn max_size_guard() {
        let packed = compress(SAMPLE, Envelope::Raw).unwrap();
        assert!(decompress(&packed, Envelope::Raw, Some(4)).is_err());
        assert!(decompress(&packed, Envelope::Raw, Some(SAMPLE.len())).is_ok());
    }

    #[test]
    fn empty_input_round_trips() {
        let packed = compress(b"", Envelope::Gzip).unwrap();
        assert_eq!(decompress(&packed, Envelope::Detect, None).unwrap(), b"");
    }
}
