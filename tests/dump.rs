mod common;

use common::*;
use ultralight::memory::{ConfigSummary, PageLock};
use ultralight::crypto;
use ultralight::emulator::MAGIC_STATIC_NONCE;
use ultralight::{DumpRecord, ErrorCategory, Reader, ReaderConfig, UltralightError};

#[test]
fn test_ultralight_c_dump_with_secret() {
    let mut reader = Reader::new(emulated(TagType::UL_C));
    let key = factory_key();
    let (tag_type, record) = reader.dump(Some(&key)).unwrap();

    assert_eq!(tag_type, TagType::UL_C);
    assert_eq!(record.page_count(), 44);
    assert_eq!(record.stored_pages(), 48);
    assert_eq!(record.secret(), Some(key.as_slice()));
    assert_eq!(record.pages(), reader.transport().memory());
    assert_eq!(record.uid().unwrap(), TEST_UID);
    assert!(!reader.transport().field_is_on());
}

#[test]
fn test_dump_survives_disk_round_trip() {
    let mut reader = Reader::new(emulated(TagType::NTAG_213));
    let (tag_type, record) = reader.dump(None).unwrap();
    assert!(!record.has_secret());

    let dir = tempfile::tempdir().unwrap();
    let name = record.default_file_name().unwrap();
    assert_eq!(name, "043A5B7C8D9EAF.bin");
    let path = dir.path().join(name);
    record.write_to(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), tag_type.page_count() * 4);
    let loaded = DumpRecord::load(&path, tag_type.page_count()).unwrap();
    assert_eq!(loaded, record);
}

#[test]
fn test_lock_table_from_dump() {
    let mut reader = Reader::new(emulated(TagType::UL));
    let record = reader.dump_pages(16, None).unwrap();
    let table = record.lock_table(TagType::UL).unwrap();
    assert_eq!(table.len(), 16);
    assert!(table.locked_pages().is_empty());
    assert_eq!(table.get(0), Some(PageLock::Fixed));

    let mut image = record.pages().to_vec();
    image[10] = 0xFF;
    image[11] = 0xFF;
    let locked = DumpRecord::from_bytes(&image, 16)
        .unwrap()
        .lock_table(TagType::UL)
        .unwrap();
    assert_eq!(locked.locked_pages(), (3..16).collect::<Vec<_>>());
}

#[test]
fn test_read_protected_dump_is_protected() {
    let mut image = emulated(TagType::UL_EV1_48).memory().to_vec();
    // CFG0 AUTH0 = 4, CFG1 PROT = read and write
    let cfg = 0x10 * 4;
    image[cfg + 3] = 0x04;
    image[cfg + 4] = 0x80;
    let emulator = Emulator::new(TagType::UL_EV1_48, image).unwrap();

    let err = Reader::new(emulator).dump(None).unwrap_err();
    assert!(err.is_protected(), "unexpected error: {}", err);
    assert!(matches!(
        err,
        UltralightError::Dump(ultralight::DumpError::Read { page: 4, .. })
    ));
}

#[test]
fn test_wrong_secret_aborts_dump() {
    let mut reader = Reader::new(emulated(TagType::UL_C));
    let err = reader.dump_pages(44, Some(&custom_key())).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::KeyUnknown);
    assert_eq!(count_frames(reader.transport(), cmd::READ), 0);
}

#[test]
fn test_uid_rewrite_shows_in_dump() {
    let mut reader = Reader::new(emulated(TagType::UL_MAGIC));
    let new_uid = [0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
    reader.set_uid(&new_uid).unwrap();

    let (_, record) = reader.dump(None).unwrap();
    assert_eq!(record.uid().unwrap(), new_uid);
    assert_eq!(record.default_file_name().unwrap(), "04010203040506.bin");
}

#[test]
fn test_key_change_then_authenticate() {
    let mut reader = Reader::new(emulated(TagType::UL_C));
    reader
        .set_key(&custom_key(), Some(&factory_key()))
        .unwrap();

    let outcome = reader.authenticate(&[factory_key(), custom_key()]).unwrap();
    assert_eq!(outcome.matched_index, Some(1));
}

#[test]
fn test_key_change_uses_configured_local_challenge() {
    let challenge = [0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE];
    let config = ReaderConfig {
        local_challenge: challenge,
        ..Default::default()
    };
    let mut reader = Reader::with_config(emulated(TagType::UL_C_MAGIC), config);
    reader
        .set_key(&custom_key(), Some(&factory_key()))
        .unwrap();

    // the magic tag's RndB is fixed, so its ek(RndB) is the IV of the second message
    let ek_rnd_b: [u8; 8] = crypto::encrypt(&factory_key(), &crypto::ZERO_IV, &MAGIC_STATIC_NONCE)
        .unwrap()
        .try_into()
        .unwrap();
    let second = reader
        .transport()
        .exchanges()
        .iter()
        .find(|frame| frame.len() == 17 && frame[0] == cmd::AUTH_CONTINUE)
        .cloned()
        .unwrap();
    let plain = crypto::decrypt(&factory_key(), &ek_rnd_b, &second[1..]).unwrap();
    assert_eq!(&plain[..8], &challenge);
}

#[test]
fn test_magic_ultralight_c_info_reveals_key() {
    let mut reader = Reader::new(emulated(TagType::UL_C_MAGIC).with_key(custom_key()));
    let info = reader.info().unwrap();
    assert_eq!(info.tag_type, TagType::UL_C_MAGIC);
    assert_eq!(
        info.stored_key.as_deref(),
        Some("0F1E2D3C4B5A69788796A5B4C3D2E1F0")
    );
    assert!(matches!(info.config, Some(ConfigSummary::UltralightC(_))));
    assert!(info.default_key.is_none());
}

#[test]
fn test_genuine_ultralight_c_info_finds_factory_key() {
    let info = Reader::new(emulated(TagType::UL_C)).info().unwrap();
    assert!(info.stored_key.is_none());
    assert_eq!(info.default_key.map(|m| m.index), Some(0));
}

#[test]
fn test_ntag_info_reads_capability_container() {
    let info = Reader::new(emulated(TagType::NTAG_213)).info().unwrap();
    let cc = info.capability_container.unwrap();
    assert!(cc.has_ndef());
    assert_eq!(info.version.map(|v| v.storage_size), Some(0x0F));
    // NTAG only implements the NFC counter
    assert_eq!(info.counters, vec![None, None, Some(0)]);
    assert!(info.password.is_some());
}
