//! Compression codecs for source files and table data files.
//!
//! Source files pick their codec from the file extension; table data files
//! use the codec configured for the table.

use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read, Write};

/// Codec able to stream-decompress and fully compress data.
pub trait CompressionCodec: Send + Sync {
    /// Create a streaming reader that decompresses `data` on the fly.
    fn create_reader<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn BufRead + Send + 'a>>;

    /// Compress `data` fully into memory.
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// File name suffix added by this codec, including the dot.
    fn extension(&self) -> &'static str;

    /// Human-readable name of this codec (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// Gzip compression codec using flate2.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn create_reader<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn BufRead + Send + 'a>> {
        Ok(Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(
            data,
        ))))
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn extension(&self) -> &'static str {
        ".gz"
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Zstandard compression codec using zstd.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl CompressionCodec for ZstdCodec {
    fn create_reader<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn BufRead + Send + 'a>> {
        Ok(Box::new(BufReader::new(zstd::stream::Decoder::new(data)?)))
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, 0)
    }

    fn extension(&self) -> &'static str {
        ".zst"
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// Pass-through codec for uncompressed data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn create_reader<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn BufRead + Send + 'a>> {
        Ok(Box::new(data))
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn extension(&self) -> &'static str {
        ""
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Compression format of a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl CompressionFormat {
    /// Detect the format from a file name.
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".gz") {
            CompressionFormat::Gzip
        } else if path.ends_with(".zst") {
            CompressionFormat::Zstd
        } else {
            CompressionFormat::None
        }
    }

    pub fn codec(&self) -> &'static dyn CompressionCodec {
        match self {
            CompressionFormat::None => &NoopCodec,
            CompressionFormat::Gzip => &GzipCodec,
            CompressionFormat::Zstd => &ZstdCodec,
        }
    }
}

/// Decompress `data` fully, choosing the codec from `path`.
pub fn decompress_for_path(path: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    let mut reader = CompressionFormat::from_path(path).codec().create_reader(data)?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}
