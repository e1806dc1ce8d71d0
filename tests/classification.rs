mod common;

use common::*;
use ultralight::{Classifier, ClassifyError, Reader, ReaderConfig};

#[test]
fn test_each_variant_against_emulator() {
    let cases = [
        (TagType::UL, TagType::UL),
        (TagType::UL_MAGIC, TagType::UL_MAGIC),
        (TagType::UL_C, TagType::UL_C),
        (TagType::UL_C_MAGIC, TagType::UL_C_MAGIC),
        (TagType::UL_EV1_48, TagType::UL_EV1_48),
        (TagType::UL_EV1_128, TagType::UL_EV1_128),
        (TagType::NTAG_213, TagType::NTAG_213),
        // storage code 0x11 fails the `!= 0x11` test and falls through to NTAG
        (TagType::NTAG_215, TagType::NTAG),
        // storage code 0x13 satisfies `!= 0x11` first
        (TagType::NTAG_216, TagType::NTAG_215),
    ];
    for (emulated_type, expected) in cases {
        let mut emulator = emulated(emulated_type);
        let result = Classifier::new(&mut emulator).classify();
        assert_eq!(result, expected, "emulating {}", emulated_type);
        assert!(result.is_resolved());
        assert!(!emulator.field_is_on(), "field left on for {}", emulated_type);
    }
}

#[test]
fn test_ntag_213_scenario() {
    let mut emulator = emulated(TagType::NTAG_213);
    let result = Classifier::new(&mut emulator).classify();
    assert!(result.contains(TagType::NTAG_213));
    // no magic probes for a tag that answered GET_VERSION
    assert_eq!(count_frames(&emulator, cmd::AUTH_START), 0);
    assert_eq!(count_frames(&emulator, cmd::COMPAT_WRITE), 0);
}

#[test]
fn test_probes_run_once_and_in_order() {
    let mut emulator = emulated(TagType::UL);
    Classifier::new(&mut emulator).classify();
    let commands: Vec<u8> = emulator.exchanges().iter().map(|f| f[0]).collect();
    // genuine UL stays silent after the first AUTH_START
    assert_eq!(
        commands,
        vec![cmd::GET_VERSION, cmd::AUTH_START, cmd::COMPAT_WRITE]
    );
}

#[test]
fn test_ultralight_c_gets_two_auth_starts() {
    let mut emulator = emulated(TagType::UL_C_MAGIC);
    Classifier::new(&mut emulator).classify();
    assert_eq!(count_frames(&emulator, cmd::AUTH_START), 2);
    assert_eq!(count_frames(&emulator, cmd::COMPAT_WRITE), 0);
}

#[test]
fn test_disabled_probes() {
    let mut emulator = emulated(TagType::UL_C_MAGIC);
    let result = Classifier::new(&mut emulator)
        .with_magic_probes(false)
        .classify();
    assert_eq!(result, TagType::UL_C);
    assert_eq!(count_frames(&emulator, cmd::AUTH_START), 0);
}

#[test]
fn test_foreign_family_is_error() {
    let mut emulator = emulated(TagType::NTAG_213).with_select_answer([0x04, 0x00], 0x08);
    assert_eq!(Classifier::new(&mut emulator).classify(), TagType::ERROR);
    assert!(matches!(
        Classifier::new(&mut emulator).try_classify(),
        Err(ClassifyError::ProtocolMismatch {
            atqa: [0x04, 0x00],
            sak: 0x08
        })
    ));
    assert!(!emulator.field_is_on());
}

#[test]
fn test_absent_tag_is_error() {
    let mut emulator = emulated(TagType::UL);
    emulator.set_present(false);
    assert!(Classifier::new(&mut emulator).classify().is_error());
    assert!(matches!(
        Classifier::new(&mut emulator).try_classify(),
        Err(ClassifyError::SelectFailed(TransportError::NoTag))
    ));
    assert!(!emulator.field_is_on());
}

#[test]
fn test_reader_uses_configured_probe_setting() {
    let config = ReaderConfig::from_json(r#"{"magic_probes": false}"#).unwrap();
    let mut reader = Reader::with_config(emulated(TagType::UL_MAGIC), config);
    assert_eq!(reader.classify(), TagType::UL);

    let mut reader = Reader::new(emulated(TagType::UL_MAGIC));
    assert_eq!(reader.classify(), TagType::UL_MAGIC);
}

#[test]
fn test_absent_tag_through_reader() {
    let mut emulator = emulated(TagType::UL);
    emulator.set_present(false);
    let err = Reader::new(emulator).try_classify().unwrap_err();
    assert!(err.is_tag_absent());
}
