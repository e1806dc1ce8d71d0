//! Common test utilities for ultralight integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

pub use ultralight::transport::cmd;
pub use ultralight::{Emulator, SelectResult, TagType, TdesKey, Transport, TransportError};

/// UID used by every emulated tag
pub const TEST_UID: [u8; 7] = [0x04, 0x3A, 0x5B, 0x7C, 0x8D, 0x9E, 0xAF];

/// The factory Ultralight C key
pub const FACTORY_KEY_HEX: &str = "425245414b4d454946594f5543414e21";

pub fn factory_key() -> TdesKey {
    TdesKey::from_hex(FACTORY_KEY_HEX).unwrap()
}

pub fn custom_key() -> TdesKey {
    TdesKey::from_hex("0f1e2d3c4b5a69788796a5b4c3d2e1f0").unwrap()
}

/// A factory-fresh emulated tag of `tag_type`
pub fn emulated(tag_type: TagType) -> Emulator {
    Emulator::factory(tag_type, TEST_UID).unwrap()
}

/// Number of frames starting with `command` the emulator received
pub fn count_frames(emulator: &Emulator, command: u8) -> usize {
    emulator
        .exchanges()
        .iter()
        .filter(|frame| frame.first() == Some(&command))
        .count()
}

/// A transport replaying canned answers, recording every frame sent
#[derive(Default)]
pub struct ScriptedTransport {
    pub answers: VecDeque<Result<Vec<u8>, TransportError>>,
    pub sent: Vec<Vec<u8>>,
    pub field_on: bool,
}

impl ScriptedTransport {
    pub fn new(answers: Vec<Result<Vec<u8>, TransportError>>) -> Self {
        Self {
            answers: answers.into(),
            ..Default::default()
        }
    }
}

impl Transport for ScriptedTransport {
    fn set_field(&mut self, on: bool) -> Result<(), TransportError> {
        self.field_on = on;
        Ok(())
    }

    fn select(&mut self) -> Result<SelectResult, TransportError> {
        Ok(SelectResult {
            atqa: [0x44, 0x00],
            sak: 0x00,
            uid: TEST_UID.to_vec(),
        })
    }

    fn send_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.sent.push(frame.to_vec());
        self.answers
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout(Duration::from_millis(1500))))
    }
}
