//! Memory map interpretation
//!
//! Everything here works on page buffers that were already read from the
//! tag. Nothing in this module talks to a reader.

use serde::Serialize;
use thiserror::Error;

use crate::tag_type::TagType;
use crate::transport::PAGE_SIZE;

/// Page holding the static lock bytes (bytes 2 and 3)
pub const STATIC_LOCK_PAGE: usize = 2;

/// Ultralight C page holding the dynamic lock bytes (bytes 0 and 1)
pub const DYNAMIC_LOCK_PAGE: usize = 0x28;

/// Ultralight C AUTH0 / AUTH1 pages
pub const ULC_AUTH0_PAGE: usize = 0x2A;
pub const ULC_AUTH1_PAGE: usize = 0x2B;

/// First of the four Ultralight C key pages
pub const ULC_KEY_PAGE: usize = 0x2C;

/// Cascade tag folded into BCC0
pub const CASCADE_TAG: u8 = 0x88;

/// Factory value of the internal byte on page 2
pub const DEFAULT_INTERNAL_BYTE: u8 = 0x48;

/// Factory VCTID of EV1 tags
pub const DEFAULT_VCTID: u8 = 0x05;

/// NDEF capability container magic number
pub const NDEF_MAGIC: u8 = 0xE1;

/// A range of pages governed by one lock bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRule {
    pub first_page: u8,
    pub last_page: u8,
    /// Bit index in the 16-bit lock register
    pub bit: u8,
}

const fn rule(first_page: u8, last_page: u8, bit: u8) -> LockRule {
    LockRule {
        first_page,
        last_page,
        bit,
    }
}

/// Static lock bits (page 2, bytes 2..4)
pub const STATIC_LOCK_RULES: [LockRule; 13] = [
    rule(3, 3, 4),
    rule(4, 4, 3),
    rule(5, 5, 2),
    rule(6, 6, 1),
    rule(7, 7, 0),
    rule(8, 8, 15),
    rule(9, 9, 14),
    rule(10, 10, 13),
    rule(11, 11, 12),
    rule(12, 12, 11),
    rule(13, 13, 10),
    rule(14, 14, 9),
    rule(15, 15, 8),
];

/// Ultralight C dynamic lock bits (page 40, bytes 0..2)
pub const DYNAMIC_LOCK_RULES: [LockRule; 10] = [
    rule(16, 19, 6),
    rule(20, 23, 5),
    rule(24, 27, 4),
    rule(28, 31, 2),
    rule(32, 35, 1),
    rule(36, 39, 0),
    rule(40, 40, 12),
    rule(41, 41, 11),
    rule(42, 42, 10),
    rule(43, 43, 9),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Incomplete read: need {needed} bytes, have {available}")]
    IncompleteRead { needed: usize, available: usize },
}

fn require(buffer: &[u8], needed: usize) -> Result<(), MemoryError> {
    if buffer.len() < needed {
        return Err(MemoryError::IncompleteRead {
            needed,
            available: buffer.len(),
        });
    }
    Ok(())
}

fn page(pages: &[u8], index: usize) -> Result<[u8; PAGE_SIZE], MemoryError> {
    let start = index * PAGE_SIZE;
    require(pages, start + PAGE_SIZE)?;
    let mut out = [0u8; PAGE_SIZE];
    out.copy_from_slice(&pages[start..start + PAGE_SIZE]);
    Ok(out)
}

/// Bit `bit` of a two-byte lock register: byte `bit / 8`, mask `1 << (7 - bit % 8)`
pub fn lock_bit(register: &[u8; 2], bit: u8) -> bool {
    let byte = register[usize::from(bit / 8)];
    byte & (1 << (7 - bit % 8)) != 0
}

/// Write state of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLock {
    /// Serial number and lock pages, never writable
    Fixed,
    Locked,
    Unlocked,
}

/// Per-page lock state of a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockBitTable {
    pages: Vec<PageLock>,
}

impl LockBitTable {
    pub fn get(&self, page: usize) -> Option<PageLock> {
        self.pages.get(page).copied()
    }

    pub fn is_locked(&self, page: usize) -> bool {
        matches!(self.get(page), Some(PageLock::Locked))
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn locked_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, lock)| **lock == PageLock::Locked)
            .map(|(page, _)| page)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, PageLock)> + '_ {
        self.pages.iter().copied().enumerate()
    }
}

/// Build the lock table for `page_count` pages.
///
/// `dynamic_lock` is only meaningful for Ultralight C. Pages not covered by
/// any rule report unlocked.
pub fn interpret(
    page_count: usize,
    static_lock: [u8; 2],
    dynamic_lock: Option<[u8; 2]>,
) -> LockBitTable {
    let mut pages = vec![PageLock::Unlocked; page_count];
    for lock in pages.iter_mut().take(STATIC_LOCK_PAGE + 1) {
        *lock = PageLock::Fixed;
    }

    let mut apply = |rules: &[LockRule], register: &[u8; 2]| {
        for rule in rules {
            if !lock_bit(register, rule.bit) {
                continue;
            }
            for page in rule.first_page..=rule.last_page {
                if let Some(lock) = pages.get_mut(usize::from(page)) {
                    *lock = PageLock::Locked;
                }
            }
        }
    };
    apply(&STATIC_LOCK_RULES, &static_lock);
    if let Some(register) = dynamic_lock {
        apply(&DYNAMIC_LOCK_RULES, &register);
    }

    LockBitTable { pages }
}

/// Build the lock table straight from a page image
pub fn interpret_pages(pages: &[u8], tag_type: TagType) -> Result<LockBitTable, MemoryError> {
    let lock_page = page(pages, STATIC_LOCK_PAGE)?;
    let static_lock = [lock_page[2], lock_page[3]];
    let dynamic_lock = if tag_type.base() == TagType::UL_C {
        let p = page(pages, DYNAMIC_LOCK_PAGE)?;
        Some([p[0], p[1]])
    } else {
        None
    };
    Ok(interpret(tag_type.page_count(), static_lock, dynamic_lock))
}

/// Pages 0..4: serial number, lock bytes and OTP
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerBlock {
    #[serde(with = "hex")]
    pub uid: [u8; 7],
    pub bcc0: u8,
    pub bcc0_valid: bool,
    pub bcc1: u8,
    pub bcc1_valid: bool,
    pub internal: u8,
    #[serde(with = "hex")]
    pub lock: [u8; 2],
    #[serde(with = "hex")]
    pub otp: [u8; 4],
}

impl ManufacturerBlock {
    /// Decode the 16 bytes of pages 0..4
    pub fn parse(data: &[u8]) -> Result<Self, MemoryError> {
        require(data, 4 * PAGE_SIZE)?;
        let uid = [data[0], data[1], data[2], data[4], data[5], data[6], data[7]];
        let (bcc0, bcc1) = compute_bcc(&uid);
        Ok(Self {
            uid,
            bcc0: data[3],
            bcc0_valid: data[3] == bcc0,
            bcc1: data[8],
            bcc1_valid: data[8] == bcc1,
            internal: data[9],
            lock: [data[10], data[11]],
            otp: [data[12], data[13], data[14], data[15]],
        })
    }

    pub fn manufacturer(&self) -> &'static str {
        manufacturer_name(self.uid[0])
    }

    pub fn internal_is_default(&self) -> bool {
        self.internal == DEFAULT_INTERNAL_BYTE
    }
}

/// BCC0 and BCC1 for a seven-byte UID
pub fn compute_bcc(uid: &[u8; 7]) -> (u8, u8) {
    let bcc0 = CASCADE_TAG ^ uid[0] ^ uid[1] ^ uid[2];
    let bcc1 = uid[3] ^ uid[4] ^ uid[5] ^ uid[6];
    (bcc0, bcc1)
}

/// ISO/IEC 7816-6 manufacturer of the first UID byte
pub fn manufacturer_name(code: u8) -> &'static str {
    match code {
        0x02 => "ST Microelectronics SA France",
        0x04 => "NXP Semiconductors Germany",
        0x05 => "Infineon Technologies AG Germany",
        0x07 => "Texas Instrument France",
        0x16 => "EM Microelectronic-Marin SA Switzerland",
        0x1F => "Melexis NV BO Switzerland",
        _ => "no tag-info available",
    }
}

/// NDEF capability container (page 3 of an NTAG)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityContainer {
    pub magic: u8,
    pub major_version: u8,
    pub minor_version: u8,
    /// Data area in bytes
    pub memory_size: usize,
    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    pub fn parse(page: &[u8]) -> Result<Self, MemoryError> {
        require(page, PAGE_SIZE)?;
        Ok(Self {
            magic: page[0],
            major_version: page[1] >> 4,
            minor_version: page[1] & 0x0F,
            memory_size: usize::from(page[2]) * 8,
            read_access: page[3] >> 4,
            write_access: page[3] & 0x0F,
        })
    }

    pub fn has_ndef(&self) -> bool {
        self.magic == NDEF_MAGIC
    }

    pub fn access_description(&self) -> (&'static str, &'static str) {
        let read = if self.read_access == 0 {
            "read access granted without any security"
        } else {
            "(RFU)"
        };
        let write = match self.write_access {
            0x0 => "write access granted without any security",
            0xF => "no write access granted at all",
            _ => "(RFU)",
        };
        (read, write)
    }
}

/// Ultralight C configuration pages 0x28..0x2C
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UltralightCConfig {
    #[serde(with = "hex")]
    pub dynamic_lock: [u8; 2],
    #[serde(with = "hex")]
    pub counter: [u8; 2],
    pub auth0: u8,
    /// AUTH0 in 0x03..=0x30: pages from AUTH0 on need authentication
    pub auth0_in_range: bool,
    pub auth0_is_default: bool,
    /// AUTH1 bit 0: only writes are restricted
    pub write_only_restricted: bool,
}

impl UltralightCConfig {
    /// Decode the 16 bytes read from page 0x28
    pub fn parse(data: &[u8]) -> Result<Self, MemoryError> {
        require(data, 4 * PAGE_SIZE)?;
        let auth0 = data[8];
        Ok(Self {
            dynamic_lock: [data[0], data[1]],
            counter: [data[4], data[5]],
            auth0,
            auth0_in_range: (0x03..=0x30).contains(&auth0),
            auth0_is_default: auth0 == 0,
            write_only_restricted: data[12] & 0x01 != 0,
        })
    }
}

/// EV1 / NTAG configuration pages CFG0, CFG1, PWD, PACK
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ev1Config {
    #[serde(with = "hex")]
    pub cfg0: [u8; 4],
    #[serde(with = "hex")]
    pub cfg1: [u8; 4],
    pub auth0: u8,
    pub strong_modulation: bool,
    /// Failed password attempts allowed, 0 = unlimited
    pub authlim: u8,
    pub config_locked: bool,
    /// Password protects reads as well as writes
    pub read_protected: bool,
    pub vctid: u8,
    pub vctid_is_default: bool,
    #[serde(with = "hex")]
    pub pwd: [u8; 4],
    #[serde(with = "hex")]
    pub pack: [u8; 2],
}

impl Ev1Config {
    /// Decode the 16 bytes read from the first configuration page
    pub fn parse(data: &[u8]) -> Result<Self, MemoryError> {
        require(data, 4 * PAGE_SIZE)?;
        let cfg0 = [data[0], data[1], data[2], data[3]];
        let cfg1 = [data[4], data[5], data[6], data[7]];
        Ok(Self {
            cfg0,
            cfg1,
            auth0: cfg0[3],
            strong_modulation: cfg0[0] & 0x02 != 0,
            authlim: cfg1[0] & 0x07,
            config_locked: cfg1[0] & 0x40 != 0,
            read_protected: cfg1[0] & 0x80 != 0,
            vctid: cfg1[1],
            vctid_is_default: cfg1[1] == DEFAULT_VCTID,
            pwd: [data[8], data[9], data[10], data[11]],
            pack: [data[12], data[13]],
        })
    }

    pub fn unlimited_attempts(&self) -> bool {
        self.authlim == 0
    }
}

/// Configuration of the identified variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigSummary {
    UltralightC(UltralightCConfig),
    Ev1(Ev1Config),
    /// The variant has no configuration pages
    None,
}

/// Summarize the configuration pages of a full page image
pub fn summarize_config(pages: &[u8], tag_type: TagType) -> Result<ConfigSummary, MemoryError> {
    let base = tag_type.base();
    let Some(config_page) = tag_type.config_page() else {
        return Ok(ConfigSummary::None);
    };
    let first_page = if base == TagType::UL_C {
        DYNAMIC_LOCK_PAGE
    } else {
        usize::from(config_page)
    };
    let start = first_page * PAGE_SIZE;
    require(pages, start + 4 * PAGE_SIZE)?;
    let block = &pages[start..start + 4 * PAGE_SIZE];

    if base == TagType::UL_C {
        Ok(ConfigSummary::UltralightC(UltralightCConfig::parse(block)?))
    } else {
        Ok(ConfigSummary::Ev1(Ev1Config::parse(block)?))
    }
}

/// Reassemble the 3DES key stored in Ultralight C pages 0x2C..0x30.
///
/// Each key half is stored byte-reversed.
pub fn ulc_key_from_pages(data: &[u8]) -> Result<[u8; 16], MemoryError> {
    require(data, 4 * PAGE_SIZE)?;
    let mut key = [0u8; 16];
    for (half, chunk) in key.chunks_mut(8).enumerate() {
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = data[half * 8 + 7 - i];
        }
    }
    Ok(key)
}

/// Inverse of [`ulc_key_from_pages`]
pub fn ulc_key_to_pages(key: &[u8; 16]) -> [u8; 16] {
    let mut pages = [0u8; 16];
    for (half, chunk) in pages.chunks_mut(8).enumerate() {
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = key[half * 8 + 7 - i];
        }
    }
    pages
}
