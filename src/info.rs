//! Structured tag information
//!
//! Gathers everything that can be learned about an identified tag without
//! writing to it: the manufacturer block, configuration pages, version,
//! originality signature, counters, NDEF capability container, and whether
//! a well-known key or password opens it.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{self, AuthError, PasswordMatch, DEFAULT_LOCAL_CHALLENGE};
use crate::crypto::{TdesKey, BLOCK_SIZE};
use crate::memory::{
    self, CapabilityContainer, ConfigSummary, Ev1Config, ManufacturerBlock, MemoryError,
    UltralightCConfig, DYNAMIC_LOCK_PAGE, ULC_KEY_PAGE,
};
use crate::tag_type::TagType;
use crate::transport::{cmd, FieldSession, Transport, TransportError, PAGE_SIZE};
use crate::version::{VersionOutcome, VersionResponse};

/// Length of the originality signature returned by READ_SIG
pub const SIGNATURE_SIZE: usize = 32;

/// Length of one counter value
pub const COUNTER_SIZE: usize = 3;

#[derive(Debug, Error)]
pub enum InfoError {
    #[error("Cannot collect info for {0}")]
    Unidentified(TagType),

    #[error("Could not select tag: {0}")]
    Select(TransportError),

    #[error("Tag did not answer READ of page {page}: {source}")]
    Read {
        page: u8,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// A well-known Ultralight C key the tag accepted
#[derive(Debug, Clone, Serialize)]
pub struct KeyMatch {
    pub index: usize,
    #[serde(with = "hex")]
    pub key: Vec<u8>,
}

/// Everything learned about one tag
#[derive(Debug, Clone, Serialize)]
pub struct TagInfo {
    pub tag_type: TagType,
    pub description: String,
    pub manufacturer: ManufacturerBlock,
    pub manufacturer_name: &'static str,
    pub config: Option<ConfigSummary>,
    /// Key read from the key pages of a magic Ultralight C, as hex
    pub stored_key: Option<String>,
    pub default_key: Option<KeyMatch>,
    pub version: Option<VersionResponse>,
    pub storage: Option<String>,
    /// Originality signature, as hex
    pub signature: Option<String>,
    pub counters: Vec<Option<u32>>,
    pub password: Option<PasswordMatch>,
    pub capability_container: Option<CapabilityContainer>,
    /// Non-fatal problems met while collecting
    pub notes: Vec<String>,
}

impl TagInfo {
    fn new(tag_type: TagType, manufacturer: ManufacturerBlock) -> Self {
        Self {
            tag_type,
            description: tag_type.to_string(),
            manufacturer_name: manufacturer.manufacturer(),
            manufacturer,
            config: None,
            stored_key: None,
            default_key: None,
            version: None,
            storage: None,
            signature: None,
            counters: Vec::new(),
            password: None,
            capability_container: None,
            notes: Vec::new(),
        }
    }

    fn note(&mut self, message: String) {
        warn!("{}", message);
        self.notes.push(message);
    }
}

/// Runs the read-only info exchanges, one field session per step
pub struct InfoCollector<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    keys: Vec<TdesKey>,
    passwords: Vec<[u8; 4]>,
    local_challenge: [u8; BLOCK_SIZE],
}

impl<'a, T: Transport + ?Sized> InfoCollector<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            keys: auth::default_keys(),
            passwords: auth::DEFAULT_PASSWORDS.iter().map(|p| p.pwd).collect(),
            local_challenge: DEFAULT_LOCAL_CHALLENGE,
        }
    }

    /// Candidate Ultralight C keys, tried in order
    pub fn with_keys(mut self, keys: Vec<TdesKey>) -> Self {
        self.keys = keys;
        self
    }

    /// Candidate EV1 / NTAG passwords, tried in order
    pub fn with_passwords(mut self, passwords: Vec<[u8; 4]>) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_local_challenge(mut self, challenge: [u8; BLOCK_SIZE]) -> Self {
        self.local_challenge = challenge;
        self
    }

    /// Collect info for a tag already classified as `tag_type`
    pub fn collect(&mut self, tag_type: TagType) -> Result<TagInfo, InfoError> {
        if tag_type.is_error() || !tag_type.is_resolved() {
            return Err(InfoError::Unidentified(tag_type));
        }

        let block = self
            .session(|t| t.read_page(0))?
            .map_err(|source| InfoError::Read { page: 0, source })?;
        let mut info = TagInfo::new(tag_type, ManufacturerBlock::parse(&block)?);
        if !info.manufacturer.bcc0_valid || !info.manufacturer.bcc1_valid {
            info.note("UID check bytes do not match the UID".to_string());
        }

        let base = tag_type.base();
        if base == TagType::UL_C {
            self.collect_ultralight_c(&mut info)?;
        }
        if tag_type.supports_password() {
            self.collect_ev1(&mut info)?;
        }
        if base.has(TagType::NTAG_21X) {
            let page = self
                .session(|t| t.read_page(2))?
                .map_err(|source| InfoError::Read { page: 2, source })?;
            info.capability_container =
                Some(CapabilityContainer::parse(&page[PAGE_SIZE..2 * PAGE_SIZE])?);
        }

        info!(tag = %info.description, notes = info.notes.len(), "Tag info collected");
        Ok(info)
    }

    fn collect_ultralight_c(&mut self, info: &mut TagInfo) -> Result<(), InfoError> {
        match self.session(|t| t.read_page(DYNAMIC_LOCK_PAGE as u8))? {
            Ok(block) => {
                info.config = Some(ConfigSummary::UltralightC(UltralightCConfig::parse(&block)?));
            }
            Err(e) => info.note(format!(
                "Configuration pages unreadable, possibly locked: {}",
                e
            )),
        }

        if info.tag_type.is_magic() {
            let block = self
                .session(|t| t.read_page(ULC_KEY_PAGE as u8))?
                .map_err(|source| InfoError::Read {
                    page: ULC_KEY_PAGE as u8,
                    source,
                })?;
            info.stored_key = Some(hex::encode_upper(memory::ulc_key_from_pages(&block)?));
            return Ok(());
        }

        let outcome = auth::authenticate(&mut *self.transport, &self.keys, self.local_challenge)?;
        if let (Some(index), Some(key)) = (outcome.matched_index, outcome.matched_key) {
            info.default_key = Some(KeyMatch {
                index,
                key: key.as_slice().to_vec(),
            });
        }
        Ok(())
    }

    fn collect_ev1(&mut self, info: &mut TagInfo) -> Result<(), InfoError> {
        let mut authlim = None;
        if let Some(config_page) = info.tag_type.config_page() {
            match self.session(|t| t.read_page(config_page))? {
                Ok(block) => {
                    let config = Ev1Config::parse(&block)?;
                    authlim = Some(config.authlim);
                    info.config = Some(ConfigSummary::Ev1(config));
                }
                Err(e) => info.note(format!(
                    "Configuration pages unreadable, possibly protected: {}",
                    e
                )),
            }
        }

        match self.session(|t| t.send_raw(&[cmd::READ_SIG, 0x00]))? {
            Ok(answer) if answer.len() >= SIGNATURE_SIZE => {
                info.signature = Some(hex::encode_upper(&answer[..SIGNATURE_SIZE]));
            }
            Ok(answer) => info.note(format!("Short signature answer ({} bytes)", answer.len())),
            Err(e) => info.note(format!("Tag did not answer READ_SIG: {}", e)),
        }

        for index in 0..3u8 {
            let value = match self.session(|t| t.send_raw(&[cmd::READ_CNT, index]))? {
                Ok(answer) if answer.len() >= COUNTER_SIZE => {
                    Some(u32::from_le_bytes([answer[0], answer[1], answer[2], 0]))
                }
                _ => None,
            };
            debug!(index, ?value, "counter");
            info.counters.push(value);
        }

        let answer = self.session(|t| t.send_raw(&[cmd::GET_VERSION]))?;
        match VersionOutcome::from_exchange(&answer) {
            VersionOutcome::Reply(version) => {
                info.storage = Some(version.storage().to_string());
                info.version = Some(version);
            }
            other => info.note(format!("Unexpected GET_VERSION outcome: {:?}", other)),
        }

        // Every failed attempt counts against a limited tag
        if authlim == Some(0) {
            info.password = auth::probe_passwords(&mut *self.transport, &self.passwords)?;
        } else {
            debug!(?authlim, "skipping password probe");
        }
        Ok(())
    }

    /// Run `f` in a fresh field session. The outer error is a failed
    /// selection, the inner one the exchange itself.
    fn session<R>(
        &mut self,
        f: impl FnOnce(&mut T) -> Result<R, TransportError>,
    ) -> Result<Result<R, TransportError>, InfoError> {
        let (mut session, _) =
            FieldSession::select(&mut *self.transport).map_err(InfoError::Select)?;
        Ok(f(&mut *session))
    }
}
