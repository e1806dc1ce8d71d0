//! High-level entry point tying a transport to a configuration

use tracing::info;

use crate::auth::{self, AuthOutcome, PasswordMatch};
use crate::classify::Classifier;
use crate::config::ReaderConfig;
use crate::crypto::TdesKey;
use crate::dump::{DumpRecord, Dumper};
use crate::error::UltralightError;
use crate::info::{InfoCollector, TagInfo};
use crate::tag_type::TagType;
use crate::transport::{Transport, PAGE_SIZE};
use crate::writer;

/// A reader with one tag in front of it
pub struct Reader<T: Transport> {
    transport: T,
    config: ReaderConfig,
}

impl<T: Transport> Reader<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ReaderConfig::default())
    }

    pub fn with_config(mut transport: T, config: ReaderConfig) -> Self {
        transport.set_timeout(config.timeout());
        Self { transport, config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Identify the tag, [`TagType::ERROR`] on failure
    pub fn classify(&mut self) -> TagType {
        Classifier::new(&mut self.transport)
            .with_magic_probes(self.config.magic_probes)
            .classify()
    }

    /// Identify the tag
    pub fn try_classify(&mut self) -> Result<TagType, UltralightError> {
        let tag_type = Classifier::new(&mut self.transport)
            .with_magic_probes(self.config.magic_probes)
            .try_classify()?;
        if tag_type.is_unknown() {
            return Err(UltralightError::Unidentified(tag_type));
        }
        Ok(tag_type)
    }

    /// Try `keys` in order against an Ultralight C
    pub fn authenticate(&mut self, keys: &[TdesKey]) -> Result<AuthOutcome, UltralightError> {
        Ok(auth::authenticate(
            &mut self.transport,
            keys,
            self.config.local_challenge,
        )?)
    }

    /// Try the built-in and configured keys, failing when none fits
    pub fn authenticate_defaults(&mut self) -> Result<AuthOutcome, UltralightError> {
        let keys = self.config.candidate_keys()?;
        let outcome = self.authenticate(&keys)?;
        if !outcome.is_authenticated() {
            return Err(UltralightError::KeyUnknown {
                attempts: outcome.attempts,
            });
        }
        Ok(outcome)
    }

    /// Try the built-in and configured EV1 / NTAG passwords
    pub fn probe_passwords(&mut self) -> Result<Option<PasswordMatch>, UltralightError> {
        let passwords = self.config.candidate_passwords()?;
        Ok(auth::probe_passwords(&mut self.transport, &passwords)?)
    }

    /// Read `page_count` pages without classifying first
    pub fn dump_pages(
        &mut self,
        page_count: usize,
        secret: Option<&TdesKey>,
    ) -> Result<DumpRecord, UltralightError> {
        Ok(Dumper::new(&mut self.transport)
            .with_local_challenge(self.config.local_challenge)
            .dump(page_count, secret)?)
    }

    /// Classify, then read the whole memory of the identified variant
    pub fn dump(
        &mut self,
        secret: Option<&TdesKey>,
    ) -> Result<(TagType, DumpRecord), UltralightError> {
        let tag_type = self.try_classify()?;
        let page_count = tag_type.page_count();
        info!(%tag_type, page_count, bytes = page_count * PAGE_SIZE, "Dumping");
        let record = self.dump_pages(page_count, secret)?;
        Ok((tag_type, record))
    }

    /// Classify, then collect everything readable about the tag
    pub fn info(&mut self) -> Result<TagInfo, UltralightError> {
        let tag_type = self.try_classify()?;
        let keys = self.config.candidate_keys()?;
        let passwords = self.config.candidate_passwords()?;
        Ok(InfoCollector::new(&mut self.transport)
            .with_keys(keys)
            .with_passwords(passwords)
            .with_local_challenge(self.config.local_challenge)
            .collect(tag_type)?)
    }

    /// Classify, then write one page
    pub fn write_block(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<(), UltralightError> {
        let tag_type = self.try_classify()?;
        Ok(writer::write_block(&mut self.transport, tag_type, page, data)?)
    }

    /// Classify, then rewrite the UID of a magic tag
    pub fn set_uid(&mut self, uid: &[u8; 7]) -> Result<(), UltralightError> {
        let tag_type = self.try_classify()?;
        Ok(writer::set_uid(&mut self.transport, tag_type, uid)?)
    }

    /// Classify, then store a new Ultralight C key
    pub fn set_key(
        &mut self,
        new_key: &TdesKey,
        current: Option<&TdesKey>,
    ) -> Result<(), UltralightError> {
        let tag_type = self.try_classify()?;
        Ok(writer::set_key(
            &mut self.transport,
            tag_type,
            new_key,
            current,
            self.config.local_challenge,
        )?)
    }
}
