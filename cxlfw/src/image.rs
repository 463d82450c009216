//! Firmware image loading.
//!
//! An image is read fully into memory once and sliced per transfer step. It
//! is never modified after loading, so one image can be shared by reference
//! across several sequential device updates.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// An immutable firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    source: Option<PathBuf>,
}

impl FirmwareImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware image from: {}", path.display());

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if data.is_empty() {
            return Err(Error::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        debug!("Firmware image: {} bytes", data.len());
        Ok(Self {
            data,
            source: Some(path.to_path_buf()),
        })
    }

    /// Wrap an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyImage {
                path: PathBuf::from("<memory>"),
            });
        }
        Ok(Self { data, source: None })
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; empty images are rejected at load time.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File the image was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of `block_size` blocks needed to carry the image.
    pub fn block_count(&self, block_size: usize) -> usize {
        self.data.len().div_ceil(block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x5A; 300]).unwrap();

        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.len(), 300);
        assert_eq!(image.source(), Some(file.path()));
        assert_eq!(image.block_count(128), 3);
    }

    #[test]
    fn test_empty_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = FirmwareImage::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::EmptyImage { ref path } if path == file.path()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FirmwareImage::from_file(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_block_count_rounds_up() {
        let image = FirmwareImage::from_bytes(vec![0; 256]).unwrap();
        assert_eq!(image.block_count(128), 2);
        let image = FirmwareImage::from_bytes(vec![0; 257]).unwrap();
        assert_eq!(image.block_count(128), 3);
        let image = FirmwareImage::from_bytes(vec![0; 1]).unwrap();
        assert_eq!(image.block_count(128), 1);
        assert!(FirmwareImage::from_bytes(Vec::new()).is_err());
    }
}
