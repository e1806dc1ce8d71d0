//! In-process tag emulator
//!
//! [`Emulator`] implements [`Transport`] by answering frames the way a
//! genuine or magic tag of the chosen variant would, backed by a page
//! image. It runs the real Ultralight C mutual authentication and EV1 /
//! NTAG password check, so every operation of the crate can be exercised
//! without hardware.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::auth::DEFAULT_3DES_KEYS;
use crate::crypto::{self, TdesKey, BLOCK_SIZE, ZERO_IV};
use crate::memory::{
    self, compute_bcc, DEFAULT_INTERNAL_BYTE, DEFAULT_VCTID, NDEF_MAGIC, ULC_AUTH0_PAGE,
    ULC_AUTH1_PAGE, ULC_KEY_PAGE,
};
use crate::tag_type::TagType;
use crate::transport::{
    cmd, with_crc, SelectResult, Transport, TransportError, PAGE_SIZE, RESPONSE_TIMEOUT,
};
use crate::version::VersionResponse;

/// Nonce a magic Ultralight C answers to every AUTH_START
pub const MAGIC_STATIC_NONCE: [u8; BLOCK_SIZE] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("Cannot emulate {0}")]
    UnsupportedType(String),

    #[error("Image must hold {expected} bytes, got {got}")]
    ImageSize { expected: usize, got: usize },

    #[error("Invalid key: {0}")]
    Key(#[from] crypto::CipherError),
}

#[derive(Default)]
enum AuthProgress {
    #[default]
    Idle,
    Challenged {
        rnd_b: [u8; BLOCK_SIZE],
        ek_rnd_b: [u8; BLOCK_SIZE],
    },
    Authenticated,
}

impl Drop for AuthProgress {
    fn drop(&mut self) {
        if let AuthProgress::Challenged { rnd_b, ek_rnd_b } = self {
            rnd_b.zeroize();
            ek_rnd_b.zeroize();
        }
    }
}

/// Only single, concrete variants can be emulated
fn check_type(tag_type: TagType) -> Result<(), EmulatorError> {
    if !tag_type.is_resolved()
        || tag_type.is_error()
        || tag_type.is_unknown()
        || tag_type.base() == TagType::NTAG
    {
        return Err(EmulatorError::UnsupportedType(tag_type.to_string()));
    }
    Ok(())
}

/// An emulated tag and the reader it sits on
pub struct Emulator {
    tag_type: TagType,
    memory: Vec<u8>,
    key: TdesKey,
    signature: [u8; 32],
    counters: [u32; 3],
    select_answer: ([u8; 2], u8),
    present: bool,
    field_on: bool,
    selected: bool,
    halted: bool,
    auth: AuthProgress,
    exchanges: Vec<Vec<u8>>,
}

impl Emulator {
    /// Emulate a tag holding `image` (`page_count * 4` bytes)
    pub fn new(tag_type: TagType, image: Vec<u8>) -> Result<Self, EmulatorError> {
        check_type(tag_type)?;
        let expected = tag_type.page_count() * PAGE_SIZE;
        if image.len() != expected {
            return Err(EmulatorError::ImageSize {
                expected,
                got: image.len(),
            });
        }
        Ok(Self {
            tag_type,
            memory: image,
            key: TdesKey::from_slice(&DEFAULT_3DES_KEYS[0])?,
            signature: [0u8; 32],
            counters: [0; 3],
            select_answer: ([0x44, 0x00], 0x00),
            present: true,
            field_on: false,
            selected: false,
            halted: false,
            auth: AuthProgress::Idle,
            exchanges: Vec::new(),
        })
    }

    /// A tag fresh from the factory with the given UID
    pub fn factory(tag_type: TagType, uid: [u8; 7]) -> Result<Self, EmulatorError> {
        check_type(tag_type)?;
        let page_count = tag_type.page_count();
        let mut image = vec![0u8; page_count * PAGE_SIZE];
        let (bcc0, bcc1) = compute_bcc(&uid);
        image[..12].copy_from_slice(&[
            uid[0],
            uid[1],
            uid[2],
            bcc0,
            uid[3],
            uid[4],
            uid[5],
            uid[6],
            bcc1,
            DEFAULT_INTERNAL_BYTE,
            0x00,
            0x00,
        ]);

        let base = tag_type.base();
        let cc_size = if base == TagType::NTAG_213 {
            Some(0x12)
        } else if base == TagType::NTAG_215 {
            Some(0x3E)
        } else if base == TagType::NTAG_216 {
            Some(0x6D)
        } else {
            None
        };
        if let Some(size) = cc_size {
            image[12..16].copy_from_slice(&[NDEF_MAGIC, 0x10, size, 0x00]);
        }
        if let Some(config_page) = tag_type.config_page() {
            let start = usize::from(config_page) * PAGE_SIZE;
            if base != TagType::UL_C {
                // CFG0 AUTH0 disabled, CFG1, PWD, PACK
                image[start + 3] = 0xFF;
                image[start + 5] = DEFAULT_VCTID;
                image[start + 8..start + 12].copy_from_slice(&[0xFF; 4]);
            }
        }

        let mut emulator = Self::new(tag_type, image)?;
        let mut signature = [0u8; 32];
        signature[..7].copy_from_slice(&uid);
        emulator.signature = signature;
        Ok(emulator)
    }

    /// Replace the Ultralight C secret
    pub fn with_key(mut self, key: TdesKey) -> Self {
        self.key = key;
        self
    }

    /// Answer selection as a tag of another family
    pub fn with_select_answer(mut self, atqa: [u8; 2], sak: u8) -> Self {
        self.select_answer = (atqa, sak);
        self
    }

    pub fn with_counters(mut self, counters: [u32; 3]) -> Self {
        self.counters = counters;
        self
    }

    /// Take the tag out of (or put it back into) the field
    pub fn set_present(&mut self, present: bool) {
        self.present = present;
    }

    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn field_is_on(&self) -> bool {
        self.field_on
    }

    /// Every frame received, in order
    pub fn exchanges(&self) -> &[Vec<u8>] {
        &self.exchanges
    }

    pub fn uid(&self) -> [u8; 7] {
        let m = &self.memory;
        [m[0], m[1], m[2], m[4], m[5], m[6], m[7]]
    }

    fn page_count(&self) -> usize {
        self.tag_type.page_count()
    }

    fn base(&self) -> TagType {
        self.tag_type.base()
    }

    fn is_ev1_or_ntag(&self) -> bool {
        self.tag_type.supports_password()
    }

    fn nak(&mut self, code: u8) -> Result<Vec<u8>, TransportError> {
        self.auth = AuthProgress::Idle;
        self.halted = true;
        Ok(vec![code])
    }

    fn silence(&mut self) -> Result<Vec<u8>, TransportError> {
        self.halted = true;
        Err(TransportError::Timeout(RESPONSE_TIMEOUT))
    }

    fn version(&self) -> Option<VersionResponse> {
        let base = self.base();
        let (product_type, product_subtype, storage_size) = if base == TagType::UL_EV1_48 {
            (0x03, 0x01, 0x0B)
        } else if base == TagType::UL_EV1_128 {
            (0x03, 0x01, 0x0E)
        } else if base == TagType::NTAG_213 {
            (0x04, 0x02, 0x0F)
        } else if base == TagType::NTAG_215 {
            (0x04, 0x02, 0x11)
        } else if base == TagType::NTAG_216 {
            (0x04, 0x02, 0x13)
        } else {
            return None;
        };
        Some(VersionResponse {
            header: 0x00,
            vendor_id: 0x04,
            product_type,
            product_subtype,
            major_version: 0x01,
            minor_version: 0x00,
            storage_size,
            protocol_type: 0x03,
        })
    }

    /// First page behind authentication and whether reads are protected too
    fn protection(&self) -> Option<(usize, bool)> {
        let base = self.base();
        if base == TagType::UL_C {
            let auth0 = self.memory[ULC_AUTH0_PAGE * PAGE_SIZE];
            let write_only = self.memory[ULC_AUTH1_PAGE * PAGE_SIZE] & 0x01 != 0;
            return (0x03..=0x30)
                .contains(&auth0)
                .then_some((usize::from(auth0), !write_only));
        }
        let config_page = usize::from(self.tag_type.config_page()?);
        let cfg = &self.memory[config_page * PAGE_SIZE..];
        let auth0 = usize::from(cfg[3]);
        let read_protected = cfg[4] & 0x80 != 0;
        (auth0 < self.page_count()).then_some((auth0, read_protected))
    }

    fn authenticated(&self) -> bool {
        matches!(self.auth, AuthProgress::Authenticated)
    }

    fn read_allowed(&self, page: usize) -> bool {
        match self.protection() {
            Some((auth0, true)) if page >= auth0 => self.authenticated(),
            _ => true,
        }
    }

    fn write_allowed(&self, page: usize) -> bool {
        if page < 2 {
            return self.tag_type.is_magic();
        }
        if let Some((auth0, _)) = self.protection() {
            if page >= auth0 && !self.authenticated() {
                return false;
            }
        }
        if self.tag_type.is_magic() {
            return true;
        }
        match memory::interpret_pages(&self.memory, self.tag_type) {
            Ok(table) => !table.is_locked(page),
            Err(_) => false,
        }
    }

    fn read(&mut self, page: u8) -> Result<Vec<u8>, TransportError> {
        let page = usize::from(page);
        let magic_key_read = self.tag_type == TagType::UL_C_MAGIC
            && (ULC_KEY_PAGE..ULC_KEY_PAGE + 4).contains(&page);
        if (page >= self.page_count() && !magic_key_read) || !self.read_allowed(page) {
            return self.nak(cmd::NAK_INVALID_ARG);
        }

        let key_pages = memory::ulc_key_to_pages(&self.key_bytes());
        let mut answer = Vec::with_capacity(16);
        for offset in 0..4 {
            let p = page + offset;
            if magic_key_read && (ULC_KEY_PAGE..ULC_KEY_PAGE + 4).contains(&p) {
                let start = (p - ULC_KEY_PAGE) * PAGE_SIZE;
                answer.extend_from_slice(&key_pages[start..start + PAGE_SIZE]);
            } else {
                let p = p % self.page_count();
                answer.extend_from_slice(&self.memory[p * PAGE_SIZE..(p + 1) * PAGE_SIZE]);
            }
        }
        Ok(with_crc(&answer))
    }

    fn key_bytes(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(&self.key.as_slice()[..16]);
        key
    }

    fn write(&mut self, page: u8, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let page = usize::from(page);
        let is_key_page = self.base() == TagType::UL_C
            && (ULC_KEY_PAGE..ULC_KEY_PAGE + 4).contains(&page);
        if (page >= self.page_count() && !is_key_page) || !self.write_allowed(page) {
            return self.nak(cmd::NAK_INVALID_ARG);
        }

        if is_key_page {
            let mut key_pages = memory::ulc_key_to_pages(&self.key_bytes());
            let start = (page - ULC_KEY_PAGE) * PAGE_SIZE;
            key_pages[start..start + PAGE_SIZE].copy_from_slice(data);
            if let Ok(key) = memory::ulc_key_from_pages(&key_pages) {
                if let Ok(key) = TdesKey::from_slice(&key) {
                    self.key = key;
                }
            }
            key_pages.zeroize();
            return Ok(vec![cmd::ACK]);
        }

        let target = &mut self.memory[page * PAGE_SIZE..(page + 1) * PAGE_SIZE];
        if (page == 2 || page == 3) && !self.tag_type.is_magic() {
            // lock bytes and OTP are one-time programmable
            let keep = if page == 2 { 2 } else { 0 };
            for (i, (dst, src)) in target.iter_mut().zip(data).enumerate() {
                if i >= keep {
                    *dst |= *src;
                }
            }
        } else {
            target.copy_from_slice(data);
        }
        Ok(vec![cmd::ACK])
    }

    fn auth_start(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.base() != TagType::UL_C {
            return if self.base() == TagType::UL {
                self.silence()
            } else {
                self.nak(cmd::NAK_INVALID_ARG)
            };
        }
        let mut rnd_b = [0u8; BLOCK_SIZE];
        if self.tag_type.is_magic() {
            rnd_b = MAGIC_STATIC_NONCE;
        } else {
            OsRng.fill_bytes(&mut rnd_b);
        }
        let ek = crypto::encrypt(&self.key, &ZERO_IV, &rnd_b)
            .map_err(|e| TransportError::Reader(e.to_string()))?;
        let mut ek_rnd_b = [0u8; BLOCK_SIZE];
        ek_rnd_b.copy_from_slice(&ek);
        self.auth = AuthProgress::Challenged { rnd_b, ek_rnd_b };

        let mut answer = vec![cmd::AUTH_CONTINUE];
        answer.extend_from_slice(&ek_rnd_b);
        Ok(with_crc(&answer))
    }

    fn auth_continue(&mut self, message: &[u8]) -> Result<Vec<u8>, TransportError> {
        let challenge = match &self.auth {
            AuthProgress::Challenged { rnd_b, ek_rnd_b } if message.len() == 2 * BLOCK_SIZE => {
                Some((*rnd_b, *ek_rnd_b))
            }
            _ => None,
        };
        let Some((rnd_b, ek_rnd_b)) = challenge else {
            return self.nak(cmd::NAK_AUTH);
        };
        let cipher_err = |e: crypto::CipherError| TransportError::Reader(e.to_string());

        let mut plain = crypto::decrypt(&self.key, &ek_rnd_b, message).map_err(cipher_err)?;
        let expected = crypto::rotate_left(&rnd_b);
        if plain[BLOCK_SIZE..] != expected {
            plain.zeroize();
            debug!("emulated tag rejected RndB'");
            return self.nak(cmd::NAK_AUTH);
        }

        let mut rnd_a = [0u8; BLOCK_SIZE];
        rnd_a.copy_from_slice(&plain[..BLOCK_SIZE]);
        plain.zeroize();
        let iv = crypto::chain_iv(message).map_err(cipher_err)?;
        let ek_rnd_a = crypto::encrypt(&self.key, &iv, &rnd_a)
            .map_err(cipher_err)?;
        rnd_a.zeroize();
        self.auth = AuthProgress::Authenticated;

        let mut answer = vec![0x00];
        answer.extend_from_slice(&ek_rnd_a);
        Ok(with_crc(&answer))
    }

    fn pwd_auth(&mut self, pwd: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(config_page) = self.tag_type.config_page().filter(|_| self.is_ev1_or_ntag())
        else {
            return self.nak(cmd::NAK_INVALID_ARG);
        };
        let start = usize::from(config_page) * PAGE_SIZE;
        if pwd.len() != 4 || self.memory[start + 8..start + 12] != *pwd {
            return self.nak(cmd::NAK_AUTH);
        }
        self.auth = AuthProgress::Authenticated;
        let pack = self.memory[start + 12..start + 14].to_vec();
        Ok(with_crc(&pack))
    }

    fn read_counter(&mut self, index: u8) -> Result<Vec<u8>, TransportError> {
        let valid = match self.base() {
            b if b.has(TagType::UL_EV1) => index < 3,
            b if b.has(TagType::NTAG_21X) => index == 2,
            _ => false,
        };
        if !valid {
            return self.nak(cmd::NAK_INVALID_ARG);
        }
        let value = self.counters[usize::from(index)].to_le_bytes();
        Ok(with_crc(&value[..3]))
    }
}

impl Transport for Emulator {
    fn set_field(&mut self, on: bool) -> Result<(), TransportError> {
        self.field_on = on;
        if !on {
            self.selected = false;
            self.halted = false;
            self.auth = AuthProgress::Idle;
        }
        Ok(())
    }

    fn select(&mut self) -> Result<SelectResult, TransportError> {
        if !self.field_on || !self.present {
            return Err(TransportError::NoTag);
        }
        self.selected = true;
        self.halted = false;
        self.auth = AuthProgress::Idle;
        let (atqa, sak) = self.select_answer;
        Ok(SelectResult {
            atqa,
            sak,
            uid: self.uid().to_vec(),
        })
    }

    fn send_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.exchanges.push(frame.to_vec());
        if !self.field_on || !self.selected || self.halted {
            return Err(TransportError::Timeout(RESPONSE_TIMEOUT));
        }
        trace!(frame = %hex::encode(frame), "emulator <-");

        let Some((&command, args)) = frame.split_first() else {
            return self.silence();
        };
        match (command, args) {
            (cmd::GET_VERSION, []) => match self.version() {
                Some(version) => Ok(with_crc(&version.to_bytes())),
                None if self.base() == TagType::UL_C => self.nak(cmd::NAK_INVALID_ARG),
                None => Ok(Vec::new()),
            },
            (cmd::READ, [page]) => self.read(*page),
            (cmd::WRITE, [page, data @ ..]) if data.len() == PAGE_SIZE => self.write(*page, data),
            (cmd::COMPAT_WRITE, [0x00]) if self.tag_type == TagType::UL_MAGIC => Ok(vec![cmd::ACK]),
            (cmd::AUTH_START, [0x00]) => self.auth_start(),
            (cmd::AUTH_CONTINUE, message) => self.auth_continue(message),
            (cmd::PWD_AUTH, pwd) => self.pwd_auth(pwd),
            (cmd::READ_SIG, [0x00]) if self.is_ev1_or_ntag() => Ok(with_crc(&self.signature)),
            (cmd::READ_CNT, [index]) if self.is_ev1_or_ntag() => self.read_counter(*index),
            _ => self.nak(cmd::NAK_INVALID_ARG),
        }
    }
}
