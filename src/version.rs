//! GET_VERSION response layout

use serde::{Deserialize, Serialize};

use crate::transport::{TransportError, CRC_SIZE};

/// Length of the version record without CRC
pub const VERSION_SIZE: usize = 8;

/// Length of a complete GET_VERSION answer including CRC
pub const VERSION_FRAME_SIZE: usize = VERSION_SIZE + CRC_SIZE;

/// Product type byte for MIFARE Ultralight EV1
pub const PRODUCT_TYPE_ULTRALIGHT: u8 = 0x03;

/// Product type byte for NTAG21x
pub const PRODUCT_TYPE_NTAG: u8 = 0x04;

/// Decoded GET_VERSION record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub header: u8,
    pub vendor_id: u8,
    pub product_type: u8,
    pub product_subtype: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub storage_size: u8,
    pub protocol_type: u8,
}

impl VersionResponse {
    /// Decode the first eight bytes of a GET_VERSION answer
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < VERSION_SIZE {
            return None;
        }
        Some(Self {
            header: bytes[0],
            vendor_id: bytes[1],
            product_type: bytes[2],
            product_subtype: bytes[3],
            major_version: bytes[4],
            minor_version: bytes[5],
            storage_size: bytes[6],
            protocol_type: bytes[7],
        })
    }

    pub fn to_bytes(&self) -> [u8; VERSION_SIZE] {
        [
            self.header,
            self.vendor_id,
            self.product_type,
            self.product_subtype,
            self.major_version,
            self.minor_version,
            self.storage_size,
            self.protocol_type,
        ]
    }

    pub fn product_type_name(&self) -> &'static str {
        match self.product_type {
            PRODUCT_TYPE_ULTRALIGHT => "Ultralight",
            PRODUCT_TYPE_NTAG => "NTAG",
            _ => "unknown",
        }
    }

    /// Input capacitance implied by the product subtype
    pub fn capacitance(&self) -> &'static str {
        if self.product_subtype == 0x01 {
            "17 pF"
        } else {
            "50 pF"
        }
    }

    pub fn storage(&self) -> StorageSize {
        StorageSize::from_code(self.storage_size)
    }
}

/// User memory size encoded in the storage size byte.
///
/// The upper seven bits `n` code 2^n bytes. With the low bit clear the size
/// is exactly 2^n, with it set the size lies between 2^n and 2^(n+1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSize {
    pub code: u8,
    pub lower_bytes: u32,
    pub upper_bytes: Option<u32>,
}

impl StorageSize {
    pub fn from_code(code: u8) -> Self {
        let exponent = u32::from(code >> 1);
        let lower_bytes = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let upper_bytes = if code & 1 == 1 {
            Some(1u32.checked_shl(exponent + 1).unwrap_or(u32::MAX))
        } else {
            None
        };
        Self {
            code,
            lower_bytes,
            upper_bytes,
        }
    }
}

impl std::fmt::Display for StorageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upper_bytes {
            Some(upper) => write!(
                f,
                "0x{:02X} ({} - {} bytes)",
                self.code, self.lower_bytes, upper
            ),
            None => write!(f, "0x{:02X} ({} bytes)", self.code, self.lower_bytes),
        }
    }
}

/// What the tag did in response to GET_VERSION
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionOutcome {
    /// A full version record
    Reply(VersionResponse),
    /// A single 4-bit NAK (Ultralight C does not know the command)
    ShortReply,
    /// An empty answer
    Empty,
    /// No answer before the timeout
    NoReply,
    /// An answer of any other length
    Unexpected(usize),
}

impl VersionOutcome {
    /// Classify the raw transport result of a GET_VERSION exchange
    pub fn from_exchange(result: &Result<Vec<u8>, TransportError>) -> Self {
        match result {
            Ok(frame) if frame.len() == VERSION_FRAME_SIZE => VersionResponse::from_bytes(frame)
                .map(VersionOutcome::Reply)
                .unwrap_or(VersionOutcome::Unexpected(frame.len())),
            Ok(frame) if frame.len() == 1 => VersionOutcome::ShortReply,
            Ok(frame) if frame.is_empty() => VersionOutcome::Empty,
            Ok(frame) => VersionOutcome::Unexpected(frame.len()),
            Err(TransportError::Nack(_)) => VersionOutcome::ShortReply,
            Err(_) => VersionOutcome::NoReply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_ev1_version() {
        let frame = [0x00, 0x04, 0x03, 0x01, 0x01, 0x00, 0x0B, 0x03, 0xAA, 0xBB];
        let version = VersionResponse::from_bytes(&frame).unwrap();
        assert_eq!(version.vendor_id, 0x04);
        assert_eq!(version.product_type_name(), "Ultralight");
        assert_eq!(version.capacitance(), "17 pF");
        assert_eq!(version.storage_size, 0x0B);
        assert_eq!(version.to_bytes(), frame[..8]);
    }

    #[test]
    fn test_storage_size_string() {
        assert_eq!(StorageSize::from_code(0x0B).to_string(), "0x0B (32 - 64 bytes)");
        assert_eq!(StorageSize::from_code(0x0E).to_string(), "0x0E (128 bytes)");
        assert_eq!(StorageSize::from_code(0x13).to_string(), "0x13 (512 - 1024 bytes)");
    }

    #[test]
    fn test_outcome_by_length() {
        let full = Ok(vec![0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x0F, 0x03, 0, 0]);
        assert!(matches!(
            VersionOutcome::from_exchange(&full),
            VersionOutcome::Reply(v) if v.storage_size == 0x0F
        ));
        assert_eq!(
            VersionOutcome::from_exchange(&Ok(vec![0x00])),
            VersionOutcome::ShortReply
        );
        assert_eq!(
            VersionOutcome::from_exchange(&Ok(vec![])),
            VersionOutcome::Empty
        );
        assert_eq!(
            VersionOutcome::from_exchange(&Err(TransportError::Timeout(Duration::from_millis(1500)))),
            VersionOutcome::NoReply
        );
        assert_eq!(
            VersionOutcome::from_exchange(&Ok(vec![0u8; 4])),
            VersionOutcome::Unexpected(4)
        );
    }
}
