//! Input files that may be gzip- or zstd-compressed.

use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression detected from the first bytes of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn detect(prefix: &[u8]) -> Self {
        if prefix.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if prefix.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Wrap `reader` in the decoder its magic bytes call for.
pub fn decompress<R: BufRead + 'static>(mut reader: R) -> io::Result<Box<dyn Read>> {
    let compression = Compression::detect(reader.fill_buf()?);
    debug!(?compression, "opened input");

    Ok(match compression {
        Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader)?),
        Compression::None => Box::new(reader),
    })
}

/// Open a file for reading, decompressing it if needed.
pub fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    decompress(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};

    const DATA: &[u8] = br#"{"nodes": [1, 0, 0, 0]}"#;

    fn read_all(bytes: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        decompress(Cursor::new(bytes))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn detects_magic_bytes() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 8]), Compression::Gzip);
        assert_eq!(Compression::detect(&ZSTD_MAGIC), Compression::Zstd);
        assert_eq!(Compression::detect(b"{}"), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn plain_passes_through() {
        assert_eq!(read_all(DATA.to_vec()), DATA);
    }

    #[test]
    fn gzip_is_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(DATA).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(read_all(compressed), DATA);
    }

    #[test]
    fn zstd_is_decoded() {
        let compressed = zstd::encode_all(DATA, 0).unwrap();
        assert_eq!(read_all(compressed), DATA);
    }
}
