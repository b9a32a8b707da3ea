//! # Configuration Tests
//!
//! Defaults, partial documents, RAM region parsing and error reporting.

use std::io::Write;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tlmu::common::{BootState, RamAccess};
use tlmu::config::RamRegion;
use tlmu::{Error, ErrorKind, InstanceConfig};

#[test]
fn default_config() {
    let config = InstanceConfig::default();
    assert_eq!(config.store_dir, PathBuf::from(".tlmu"));
    assert_eq!(config.sync_period_ns, 1_000_000);
    assert_eq!(config.boot_state, BootState::Running);
    assert_eq!(config.image_load_base, 0);
    assert_eq!(config.image_load_size, 0);
    assert!(config.args.is_empty());
    assert!(config.ram.is_empty());
}

#[test]
fn empty_document_equals_default() {
    assert_eq!(InstanceConfig::from_json("{}").unwrap(), InstanceConfig::default());
}

#[test]
fn full_document() {
    let config = InstanceConfig::from_json(
        r#"{
            "store_dir": "/var/tmp/tlmu",
            "sync_period_ns": 250000,
            "boot_state": "sleeping",
            "image_load_base": 268435456,
            "image_load_size": 1048576,
            "args": ["-M", "versatilepb", "-cpu", "arm926"],
            "ram": [
                { "name": "boot", "base": 0, "size": 65536, "access": "read_only" },
                { "name": "sdram", "base": 268435456, "size": 8388608, "sync": false }
            ]
        }"#,
    )
    .unwrap();

    assert_eq!(config.store_dir, PathBuf::from("/var/tmp/tlmu"));
    assert_eq!(config.sync_period_ns, 250_000);
    assert_eq!(config.boot_state, BootState::Sleeping);
    assert_eq!(config.image_load_base, 0x1000_0000);
    assert_eq!(config.image_load_size, 0x10_0000);
    assert_eq!(config.args, vec!["-M", "versatilepb", "-cpu", "arm926"]);
    assert_eq!(
        config.ram,
        vec![
            RamRegion {
                name: "boot".to_owned(),
                base: 0,
                size: 0x1_0000,
                access: RamAccess::ReadOnly,
                sync: true,
            },
            RamRegion {
                name: "sdram".to_owned(),
                base: 0x1000_0000,
                size: 0x80_0000,
                access: RamAccess::ReadWrite,
                sync: false,
            },
        ]
    );
}

#[test]
fn unknown_keys_are_ignored() {
    let config = InstanceConfig::from_json(r#"{ "sync_period_ns": 5, "colour": "blue" }"#).unwrap();
    assert_eq!(config.sync_period_ns, 5);
}

#[rstest]
#[case::not_json("sync_period_ns = 5")]
#[case::wrong_type(r#"{ "sync_period_ns": "fast" }"#)]
#[case::bad_boot_state(r#"{ "boot_state": "halted" }"#)]
#[case::ram_without_size(r#"{ "ram": [{ "name": "r", "base": 0 }] }"#)]
fn malformed_documents_are_configuration_errors(#[case] json: &str) {
    let err = InstanceConfig::from_json(json).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn from_file_reads_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(br#"{ "args": ["-smp", "2"] }"#).unwrap();
    let config = InstanceConfig::from_file(file.path()).unwrap();
    assert_eq!(config.args, vec!["-smp", "2"]);
}

#[test]
fn from_file_missing_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = InstanceConfig::from_file(&path).unwrap_err();
    match err {
        Error::ConfigRead { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}
