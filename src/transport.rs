//! Reader transport seam
//!
//! The field control and frame exchange with the tag are provided by an
//! external reader. This module defines the [`Transport`] trait those
//! readers implement, the Ultralight command bytes, and [`FieldSession`],
//! the guard that keeps the field energized for exactly one operation.
//!
//! Frames returned by [`Transport::send_raw`] carry the tag's trailing
//! two-byte CRC_A when the tag sends one. 4-bit ACK/NAK answers arrive as a
//! single byte.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use thiserror::Error;
use tracing::{trace, warn};

/// Upper bound a reader waits for any single tag answer
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Size of a memory page
pub const PAGE_SIZE: usize = 4;

/// Bytes returned by one READ command (four pages)
pub const READ_SIZE: usize = 16;

/// Length of the CRC_A trailer
pub const CRC_SIZE: usize = 2;

/// Ultralight / NTAG command bytes
pub mod cmd {
    pub const READ: u8 = 0x30;
    pub const WRITE: u8 = 0xA2;
    pub const COMPAT_WRITE: u8 = 0xA0;
    pub const GET_VERSION: u8 = 0x60;
    pub const AUTH_START: u8 = 0x1A;
    pub const AUTH_CONTINUE: u8 = 0xAF;
    pub const PWD_AUTH: u8 = 0x1B;
    pub const READ_CNT: u8 = 0x39;
    pub const READ_SIG: u8 = 0x3C;

    /// 4-bit acknowledge
    pub const ACK: u8 = 0x0A;
    /// 4-bit NAK: invalid argument
    pub const NAK_INVALID_ARG: u8 = 0x00;
    /// 4-bit NAK: authentication failure / parity or CRC error
    pub const NAK_AUTH: u8 = 0x04;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No answer from tag within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Tag answered NAK 0x{0:02X}")]
    Nack(u8),

    #[error("No tag in field")]
    NoTag,

    #[error("Truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Reader error: {0}")]
    Reader(String),
}

impl TransportError {
    /// Whether the failure means the tag did not answer at all
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Answer to an anticollision / select sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectResult {
    /// ATQA as received, least significant byte first
    pub atqa: [u8; 2],
    pub sak: u8,
    #[serde(with = "hex")]
    pub uid: Vec<u8>,
}

impl SelectResult {
    /// ATQA `44 00`, SAK `00`: the Ultralight / NTAG signature
    pub fn is_ultralight_family(&self) -> bool {
        self.atqa == [0x44, 0x00] && self.sak == 0x00
    }
}

/// Outcome of a page write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    Ack,
    Nack(u8),
}

impl WriteAck {
    pub fn is_ack(self) -> bool {
        self == WriteAck::Ack
    }
}

/// A reader able to talk ISO14443-A to one tag at a time.
///
/// `read_page` and `write_page` default to the raw READ / WRITE frames;
/// readers with dedicated firmware commands may override them.
pub trait Transport {
    /// Energize or switch off the RF field
    fn set_field(&mut self, on: bool) -> Result<(), TransportError>;

    /// Run anticollision and select the tag in the field
    fn select(&mut self) -> Result<SelectResult, TransportError>;

    /// Send a raw frame (CRC appended by the reader) and return the answer
    fn send_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Adjust the per-exchange timeout
    fn set_timeout(&mut self, _timeout: Duration) {}

    /// Read four pages starting at `page`
    fn read_page(&mut self, page: u8) -> Result<[u8; READ_SIZE], TransportError> {
        let answer = self.send_raw(&[cmd::READ, page])?;
        if answer.len() == 1 {
            return Err(TransportError::Nack(answer[0]));
        }
        if answer.len() < READ_SIZE {
            return Err(TransportError::Truncated {
                expected: READ_SIZE,
                got: answer.len(),
            });
        }
        let mut data = [0u8; READ_SIZE];
        data.copy_from_slice(&answer[..READ_SIZE]);
        Ok(data)
    }

    /// Write one page
    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<WriteAck, TransportError> {
        let frame = [cmd::WRITE, page, data[0], data[1], data[2], data[3]];
        let answer = self.send_raw(&frame)?;
        Ok(match answer.first() {
            Some(&cmd::ACK) => WriteAck::Ack,
            Some(&code) => WriteAck::Nack(code),
            None => WriteAck::Nack(cmd::NAK_INVALID_ARG),
        })
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn set_field(&mut self, on: bool) -> Result<(), TransportError> {
        (**self).set_field(on)
    }

    fn select(&mut self) -> Result<SelectResult, TransportError> {
        (**self).select()
    }

    fn send_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).send_raw(frame)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        (**self).set_timeout(timeout)
    }

    fn read_page(&mut self, page: u8) -> Result<[u8; READ_SIZE], TransportError> {
        (**self).read_page(page)
    }

    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<WriteAck, TransportError> {
        (**self).write_page(page, data)
    }
}

/// Energized-field guard.
///
/// Opening a session switches the field on; dropping it switches the field
/// off, on every exit path. While the session lives it is the only handle
/// to the transport.
pub struct FieldSession<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> FieldSession<'a, T> {
    /// Switch the field on
    pub fn open(transport: &'a mut T) -> Result<Self, TransportError> {
        transport.set_field(true)?;
        trace!("field on");
        Ok(Self { transport })
    }

    /// Switch the field on and select the tag
    pub fn select(transport: &'a mut T) -> Result<(Self, SelectResult), TransportError> {
        let mut session = Self::open(transport)?;
        let card = session.transport.select()?;
        trace!(uid = %hex::encode(&card.uid), "tag selected");
        Ok((session, card))
    }
}

impl<T: Transport + ?Sized> Deref for FieldSession<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.transport
    }
}

impl<T: Transport + ?Sized> DerefMut for FieldSession<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.transport
    }
}

impl<T: Transport + ?Sized> Drop for FieldSession<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.set_field(false) {
            warn!("Failed to switch field off: {}", e);
        } else {
            trace!("field off");
        }
    }
}

/// ISO14443-A CRC (CRC_A), least significant byte first
pub fn crc_a(data: &[u8]) -> [u8; CRC_SIZE] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut b = byte ^ (crc & 0x00FF) as u8;
        b ^= b << 4;
        let b = b as u16;
        crc = (crc >> 8) ^ (b << 8) ^ (b << 3) ^ (b >> 4);
    }
    crc.to_le_bytes()
}

/// Append CRC_A to a frame
pub fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + CRC_SIZE);
    frame.extend_from_slice(data);
    frame.extend_from_slice(&crc_a(data));
    frame
}
