//! Tag family classification result

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags::bitflags! {
    /// Identified tag variant.
    ///
    /// Exactly one variant bit is set on a resolved classification. `MAGIC`
    /// marks a clone and only ever accompanies `UL` or `UL_C`. The
    /// [`TagType::ERROR`] sentinel is never combined with anything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TagType: u16 {
        /// MIFARE Ultralight (MF0ICU1)
        const UL = 0x0001;
        /// MIFARE Ultralight C (MF0ULC)
        const UL_C = 0x0002;
        /// MIFARE Ultralight EV1, 48 bytes (MF0UL11)
        const UL_EV1_48 = 0x0004;
        /// MIFARE Ultralight EV1, 128 bytes (MF0UL21)
        const UL_EV1_128 = 0x0008;
        /// NTAG21x of unrecognized size
        const NTAG = 0x0010;
        /// NTAG 213, 144 bytes
        const NTAG_213 = 0x0020;
        /// NTAG 215, 504 bytes
        const NTAG_215 = 0x0040;
        /// NTAG 216, 888 bytes
        const NTAG_216 = 0x0080;
        /// Clone / magic tag modifier
        const MAGIC = 0x0100;
    }
}

impl TagType {
    /// Nothing identified yet
    pub const UNKNOWN: TagType = TagType::empty();

    /// Classification failed
    pub const ERROR: TagType = TagType::from_bits_retain(0xFFFF);

    /// Magic Ultralight
    pub const UL_MAGIC: TagType = TagType::UL.union(TagType::MAGIC);

    /// Magic Ultralight C
    pub const UL_C_MAGIC: TagType = TagType::UL_C.union(TagType::MAGIC);

    /// All EV1 variants
    pub const UL_EV1: TagType = TagType::UL_EV1_48.union(TagType::UL_EV1_128);

    /// All sized NTAG variants
    pub const NTAG_21X: TagType = TagType::NTAG_213
        .union(TagType::NTAG_215)
        .union(TagType::NTAG_216);

    pub fn is_error(self) -> bool {
        self == Self::ERROR
    }

    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }

    /// True if `flags` intersect this type; always false for the error sentinel
    pub fn has(self, flags: TagType) -> bool {
        !self.is_error() && self.intersects(flags)
    }

    pub fn is_magic(self) -> bool {
        self.has(Self::MAGIC)
    }

    /// The variant without the magic modifier
    pub fn base(self) -> TagType {
        if self.is_error() {
            return self;
        }
        self.difference(Self::MAGIC)
    }

    /// True for a final classification: the error sentinel, unknown, or a
    /// single variant bit with the magic modifier only on UL / UL C.
    pub fn is_resolved(self) -> bool {
        if self.is_error() || self.is_unknown() {
            return true;
        }
        let base = self.base();
        if base.bits().count_ones() != 1 {
            return false;
        }
        !self.is_magic() || base == Self::UL || base == Self::UL_C
    }

    /// Number of 4-byte pages in the tag's memory map
    pub fn page_count(self) -> usize {
        let base = self.base();
        if base.has(Self::UL_C) {
            44
        } else if base.has(Self::UL_EV1_48) {
            20
        } else if base.has(Self::UL_EV1_128) {
            41
        } else if base.has(Self::NTAG_213) {
            45
        } else if base.has(Self::NTAG_215) {
            135
        } else if base.has(Self::NTAG_216) {
            231
        } else {
            16
        }
    }

    /// First configuration page (CFG0 for EV1/NTAG, AUTH0 for UL C)
    pub fn config_page(self) -> Option<u8> {
        let base = self.base();
        if base.has(Self::UL_C) {
            Some(0x2A)
        } else if base.has(Self::UL_EV1_48) {
            Some(0x10)
        } else if base.has(Self::UL_EV1_128) {
            Some(0x25)
        } else if base.has(Self::NTAG_213) {
            Some(0x29)
        } else if base.has(Self::NTAG_215) {
            Some(0x83)
        } else if base.has(Self::NTAG_216) {
            Some(0xE3)
        } else {
            None
        }
    }

    /// True for variants that answer GET_VERSION and PWD_AUTH
    pub fn supports_password(self) -> bool {
        self.has(Self::UL_EV1 | Self::NTAG | Self::NTAG_21X)
    }

    /// Product name and part number
    pub fn description(self) -> &'static str {
        if self.is_error() {
            return "Error";
        }
        let base = self.base();
        if base.contains(Self::UL) {
            "MIFARE Ultralight (MF0ICU1)"
        } else if base.contains(Self::UL_C) {
            "MIFARE Ultralight C (MF0ULC)"
        } else if base.contains(Self::UL_EV1_48) {
            "MIFARE Ultralight EV1 48bytes (MF0UL1101)"
        } else if base.contains(Self::UL_EV1_128) {
            "MIFARE Ultralight EV1 128bytes (MF0UL2101)"
        } else if base.contains(Self::NTAG_213) {
            "MIFARE NTAG 213 144bytes (NT2H1311G0DU)"
        } else if base.contains(Self::NTAG_215) {
            "MIFARE NTAG 215 504bytes (NT2H1511G0DU)"
        } else if base.contains(Self::NTAG_216) {
            "MIFARE NTAG 216 888bytes (NT2H1611G0DU)"
        } else if base.contains(Self::NTAG) {
            "NTAG (unknown size)"
        } else {
            "Unknown"
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())?;
        if self.is_magic() {
            write!(f, " <magic>")?;
        }
        Ok(())
    }
}

impl Serialize for TagType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u16::deserialize(deserializer)?;
        Ok(TagType::from_bits_retain(bits))
    }
}
