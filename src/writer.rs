//! Page writes
//!
//! The serial number pages 0..4 are only rewritable on magic tags;
//! [`write_block`] refuses them on anything else rather than burning the
//! one-time lock and OTP bits of a genuine tag.

use thiserror::Error;
use tracing::info;
use zeroize::Zeroize;

use crate::auth::{AuthError, Authenticator};
use crate::crypto::{TdesKey, BLOCK_SIZE};
use crate::memory::{self, compute_bcc, ULC_KEY_PAGE};
use crate::tag_type::TagType;
use crate::transport::{FieldSession, Transport, TransportError, WriteAck, PAGE_SIZE};

/// Highest page of the serial number / lock / OTP area
pub const LAST_PROTECTED_PAGE: u8 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("Page {page} is only writable on magic tags, tag is {tag_type}")]
    ProtectedPage { page: u8, tag_type: TagType },

    #[error("Page {page} is outside the {page_count}-page memory")]
    OutOfRange { page: u8, page_count: usize },

    #[error("Operation requires a magic tag, tag is {0}")]
    NotMagic(TagType),

    #[error("Operation requires an Ultralight C, tag is {0}")]
    NotUltralightC(TagType),

    #[error("Tag refused write of page {page} (NAK 0x{code:02X})")]
    Rejected { page: u8, code: u8 },

    #[error("Key must be 16 bytes, got {0}")]
    KeyLength(usize),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

fn check_ack(page: u8, ack: WriteAck) -> Result<(), WriteError> {
    match ack {
        WriteAck::Ack => Ok(()),
        WriteAck::Nack(code) => Err(WriteError::Rejected { page, code }),
    }
}

/// Write one page, guarding the serial number area
pub fn write_block<T: Transport + ?Sized>(
    transport: &mut T,
    tag_type: TagType,
    page: u8,
    data: &[u8; PAGE_SIZE],
) -> Result<(), WriteError> {
    if page <= LAST_PROTECTED_PAGE && !tag_type.is_magic() {
        return Err(WriteError::ProtectedPage { page, tag_type });
    }
    let page_count = tag_type.page_count();
    if usize::from(page) >= page_count {
        return Err(WriteError::OutOfRange { page, page_count });
    }

    let (mut session, _) = FieldSession::select(transport)?;
    check_ack(page, session.write_page(page, data)?)
}

/// Rewrite the UID of a magic tag, recomputing both check bytes.
///
/// Bytes 1..4 of page 2 (internal byte and lock bytes) are preserved.
pub fn set_uid<T: Transport + ?Sized>(
    transport: &mut T,
    tag_type: TagType,
    uid: &[u8; 7],
) -> Result<(), WriteError> {
    if !tag_type.is_magic() {
        return Err(WriteError::NotMagic(tag_type));
    }
    let (mut session, card) = FieldSession::select(transport)?;
    let current = session.read_page(0)?;
    let (bcc0, bcc1) = compute_bcc(uid);

    let pages: [(u8, [u8; PAGE_SIZE]); 3] = [
        (0, [uid[0], uid[1], uid[2], bcc0]),
        (1, [uid[3], uid[4], uid[5], uid[6]]),
        (2, [bcc1, current[9], current[10], current[11]]),
    ];
    for (page, data) in &pages {
        check_ack(*page, session.write_page(*page, data)?)?;
    }
    info!(
        old = %hex::encode(&card.uid),
        new = %hex::encode(uid),
        "UID rewritten"
    );
    Ok(())
}

/// Store a new 3DES key in an Ultralight C.
///
/// When `current` is given the tag is authenticated with it first, which is
/// needed whenever AUTH0 covers the key pages. `local_challenge` is the
/// reader-side challenge used for that authentication.
pub fn set_key<T: Transport + ?Sized>(
    transport: &mut T,
    tag_type: TagType,
    new_key: &TdesKey,
    current: Option<&TdesKey>,
    local_challenge: [u8; BLOCK_SIZE],
) -> Result<(), WriteError> {
    if tag_type.base() != TagType::UL_C {
        return Err(WriteError::NotUltralightC(tag_type));
    }
    if new_key.len() != 16 {
        return Err(WriteError::KeyLength(new_key.len()));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(new_key.as_slice());
    let mut pages = memory::ulc_key_to_pages(&key);
    key.zeroize();

    let (mut session, _) = FieldSession::select(transport)?;
    if let Some(current) = current {
        Authenticator::new(current)
            .with_local_challenge(local_challenge)
            .run(&mut *session)?;
    }
    let mut result = Ok(());
    for (offset, chunk) in pages.chunks(PAGE_SIZE).enumerate() {
        let page = ULC_KEY_PAGE as u8 + offset as u8;
        let mut data = [0u8; PAGE_SIZE];
        data.copy_from_slice(chunk);
        result = session
            .write_page(page, &data)
            .map_err(WriteError::from)
            .and_then(|ack| check_ack(page, ack));
        data.zeroize();
        if result.is_err() {
            break;
        }
    }
    pages.zeroize();
    if result.is_ok() {
        info!("Ultralight C key updated");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::Emulator;

    const UID: [u8; 7] = [0x04, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60];

    #[test]
    fn test_guard_rejects_serial_pages_on_genuine_tags() {
        let mut emulator = Emulator::factory(TagType::UL, UID).unwrap();
        assert_eq!(
            write_block(&mut emulator, TagType::UL, 1, &[0; 4]),
            Err(WriteError::ProtectedPage {
                page: 1,
                tag_type: TagType::UL
            })
        );
        assert!(emulator.exchanges().is_empty());
    }

    #[test]
    fn test_write_out_of_range() {
        let mut emulator = Emulator::factory(TagType::UL, UID).unwrap();
        assert!(matches!(
            write_block(&mut emulator, TagType::UL, 16, &[0; 4]),
            Err(WriteError::OutOfRange { page: 16, .. })
        ));
    }

    #[test]
    fn test_write_user_page() {
        let mut emulator = Emulator::factory(TagType::UL, UID).unwrap();
        write_block(&mut emulator, TagType::UL, 4, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(&emulator.memory()[16..20], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(!emulator.field_is_on());
    }

    #[test]
    fn test_set_uid_on_magic_tag() {
        let mut emulator = Emulator::factory(TagType::UL_MAGIC, UID).unwrap();
        let new_uid = [0x04, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        set_uid(&mut emulator, TagType::UL_MAGIC, &new_uid).unwrap();
        assert_eq!(emulator.uid(), new_uid);

        let block = crate::memory::ManufacturerBlock::parse(&emulator.memory()[..16]).unwrap();
        assert!(block.bcc0_valid);
        assert!(block.bcc1_valid);
        assert!(block.internal_is_default());
    }

    #[test]
    fn test_set_uid_requires_magic() {
        let mut emulator = Emulator::factory(TagType::UL, UID).unwrap();
        assert_eq!(
            set_uid(&mut emulator, TagType::UL, &UID),
            Err(WriteError::NotMagic(TagType::UL))
        );
    }
}
