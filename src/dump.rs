//! Full memory dumps and raw image persistence
//!
//! An image is the raw concatenation of the tag's pages in ascending order,
//! optionally followed by the 16-byte secret used to read it. There is no
//! header and no checksum.

use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::auth::{AuthError, Authenticator, DEFAULT_LOCAL_CHALLENGE};
use crate::crypto::{TdesKey, BLOCK_SIZE};
use crate::memory::{self, LockBitTable, ManufacturerBlock, MemoryError};
use crate::tag_type::TagType;
use crate::transport::{FieldSession, Transport, TransportError, PAGE_SIZE, READ_SIZE};

/// Length of a secret appended to an image
pub const SECRET_SIZE: usize = 16;

const PAGES_PER_READ: usize = READ_SIZE / PAGE_SIZE;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Failed to read page {page}: {source}")]
    Read {
        page: usize,
        #[source]
        source: TransportError,
    },

    #[error("Could not select tag: {0}")]
    Select(#[from] TransportError),

    #[error("Authentication before dump failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Secret must be {SECRET_SIZE} bytes, got {0}")]
    SecretLength(usize),

    #[error("Image of {len} bytes does not hold {page_count} pages")]
    InvalidImage { len: usize, page_count: usize },

    #[error("Page count {0} exceeds the addressable range")]
    PageCount(usize),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw memory image of one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpRecord {
    page_count: usize,
    #[serde(with = "hex")]
    data: Vec<u8>,
    has_secret: bool,
}

impl DumpRecord {
    /// Build a record from an image of `page_count` pages, with or without a
    /// trailing secret
    pub fn from_bytes(bytes: &[u8], page_count: usize) -> Result<Self, DumpError> {
        let pages_len = page_count * PAGE_SIZE;
        let has_secret = match bytes.len() {
            len if len == pages_len => false,
            len if len == pages_len + SECRET_SIZE => true,
            len => {
                return Err(DumpError::InvalidImage { len, page_count });
            }
        };
        Ok(Self {
            page_count,
            data: bytes.to_vec(),
            has_secret,
        })
    }

    /// Read an image back from disk
    pub fn load<P: AsRef<Path>>(path: P, page_count: usize) -> Result<Self, DumpError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, page_count)
    }

    /// Write the raw image to `path`
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), DumpError> {
        fs::write(path.as_ref(), &self.data)?;
        info!(
            pages = self.stored_pages(),
            bytes = self.data.len(),
            path = %path.as_ref().display(),
            "Dump written"
        );
        Ok(())
    }

    /// Number of tag pages, excluding the secret
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Number of pages in the image, including the secret
    pub fn stored_pages(&self) -> usize {
        self.data.len() / PAGE_SIZE
    }

    pub fn has_secret(&self) -> bool {
        self.has_secret
    }

    /// The whole image as written to disk
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Tag memory only
    pub fn pages(&self) -> &[u8] {
        &self.data[..self.page_count * PAGE_SIZE]
    }

    pub fn page(&self, index: usize) -> Option<&[u8]> {
        self.data.get(index * PAGE_SIZE..(index + 1) * PAGE_SIZE)
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.has_secret
            .then(|| &self.data[self.page_count * PAGE_SIZE..])
    }

    /// The seven-byte UID, skipping BCC0
    pub fn uid(&self) -> Result<[u8; 7], DumpError> {
        Ok(ManufacturerBlock::parse(self.pages())?.uid)
    }

    /// `<UID>.bin` with the UID as upper-case hex
    pub fn default_file_name(&self) -> Result<String, DumpError> {
        Ok(format!("{}.bin", hex::encode_upper(self.uid()?)))
    }

    pub fn lock_table(&self, tag_type: TagType) -> Result<LockBitTable, DumpError> {
        Ok(memory::interpret_pages(self.pages(), tag_type)?)
    }
}

/// Reads a whole tag in one field session
pub struct Dumper<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    local_challenge: [u8; BLOCK_SIZE],
}

impl<'a, T: Transport + ?Sized> Dumper<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            local_challenge: DEFAULT_LOCAL_CHALLENGE,
        }
    }

    pub fn with_local_challenge(mut self, challenge: [u8; BLOCK_SIZE]) -> Self {
        self.local_challenge = challenge;
        self
    }

    /// Read `page_count` pages.
    ///
    /// When `secret` is given the tag is authenticated with it first
    /// (Ultralight C) and the secret is appended to the image.
    pub fn dump(
        &mut self,
        page_count: usize,
        secret: Option<&TdesKey>,
    ) -> Result<DumpRecord, DumpError> {
        if page_count > usize::from(u8::MAX) + 1 {
            return Err(DumpError::PageCount(page_count));
        }
        if let Some(key) = secret {
            if key.len() != SECRET_SIZE {
                return Err(DumpError::SecretLength(key.len()));
            }
        }

        let (mut session, card) = FieldSession::select(&mut *self.transport)?;
        info!(
            uid = %hex::encode(&card.uid),
            page_count,
            authenticated = secret.is_some(),
            "Dumping tag"
        );

        if let Some(key) = secret {
            Authenticator::new(key)
                .with_local_challenge(self.local_challenge)
                .run(&mut *session)?;
        }

        let mut data = Vec::with_capacity(page_count * PAGE_SIZE + SECRET_SIZE);
        for first in (0..page_count).step_by(PAGES_PER_READ) {
            // page_count is bounded above, so `first` fits in a page address
            let mut block = session
                .read_page(first as u8)
                .map_err(|source| DumpError::Read {
                    page: first,
                    source,
                })?;
            let wanted = (page_count - first).min(PAGES_PER_READ) * PAGE_SIZE;
            data.extend_from_slice(&block[..wanted]);
            block.zeroize();
            debug!(page = first, "read");
        }

        let has_secret = secret.is_some();
        if let Some(key) = secret {
            data.extend_from_slice(key.as_slice());
        }

        Ok(DumpRecord {
            page_count,
            data,
            has_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(page_count: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..page_count * PAGE_SIZE).map(|i| i as u8).collect();
        bytes[..8].copy_from_slice(&[0x04, 0xA1, 0xB2, 0x00, 0xC3, 0xD4, 0xE5, 0xF6]);
        bytes
    }

    #[test]
    fn test_record_without_secret() {
        let record = DumpRecord::from_bytes(&image(16), 16).unwrap();
        assert!(!record.has_secret());
        assert_eq!(record.stored_pages(), 16);
        assert_eq!(record.secret(), None);
        assert_eq!(record.page(15).map(|p| p.len()), Some(4));
        assert_eq!(record.page(16), None);
    }

    #[test]
    fn test_record_with_secret() {
        let mut bytes = image(44);
        bytes.extend_from_slice(b"BREAKMEIFYOUCAN!");
        let record = DumpRecord::from_bytes(&bytes, 44).unwrap();
        assert!(record.has_secret());
        assert_eq!(record.stored_pages(), 48);
        assert_eq!(record.pages().len(), 44 * 4);
        assert_eq!(record.secret(), Some(&b"BREAKMEIFYOUCAN!"[..]));
    }

    #[test]
    fn test_bad_image_length() {
        assert!(matches!(
            DumpRecord::from_bytes(&[0u8; 30], 16),
            Err(DumpError::InvalidImage {
                len: 30,
                page_count: 16
            })
        ));
    }

    #[test]
    fn test_default_file_name_skips_bcc0() {
        let record = DumpRecord::from_bytes(&image(16), 16).unwrap();
        assert_eq!(record.default_file_name().unwrap(), "04A1B2C3D4E5F6.bin");
    }
}
