//! Tests for error handling

use std::path::PathBuf;

use vidlib_core::error::{MismatchKind, Result, VidlibError};
use vidlib_core::types::Address;

#[test]
fn test_format_errors()
{
    let errors = [
        VidlibError::UnsupportedFormatVersion(7),
        VidlibError::CorruptDatabase("truncated".to_string()),
        VidlibError::AliasDepthExceeded {
            depth: 10,
            path: PathBuf::from("game_1_0_0_1.vdb"),
        },
        VidlibError::AliasSelfReference(PathBuf::from("a.vdb")),
        VidlibError::DuplicateVid {
            namespace: "type",
            vid: 4,
        },
        VidlibError::DuplicateVtable(0x10),
    ];
    for error in &errors {
        assert!(error.is_format_error(), "{error}");
        assert!(!error.is_version_drift(), "{error}");
    }
}

#[test]
fn test_version_drift_errors()
{
    let errors = [
        VidlibError::VidNotFound(0x1234),
        VidlibError::SignatureMismatch {
            vid: 1,
            address: Address::new(0x1000),
        },
        VidlibError::FieldNotFound {
            type_vid: 2,
            field_id: 3,
        },
        VidlibError::MissingCachedValue(9),
        VidlibError::Unresolved("address of vid 5".to_string()),
    ];
    for error in &errors {
        assert!(error.is_version_drift(), "{error}");
        assert!(!error.is_format_error(), "{error}");
    }
}

#[test]
fn test_messages_name_the_subject()
{
    let message = VidlibError::VidNotFound(4660).to_string();
    assert!(message.contains("4660"));

    let message = VidlibError::MemoryRead {
        address: Address::new(0xabc),
        message: "unmapped".to_string(),
    }
    .to_string();
    assert!(message.contains("0x0000000000000abc"));
    assert!(message.contains("unmapped"));

    let message = VidlibError::Cast {
        contract: "dyn Actor",
        concrete: "Rock",
    }
    .to_string();
    assert!(message.contains("dyn Actor") && message.contains("Rock"));

    assert_eq!(MismatchKind::LibraryVersion.to_string(), "library version");
}

#[test]
fn test_io_error_conversion()
{
    fn open() -> Result<std::fs::File>
    {
        Ok(std::fs::File::open("/definitely/not/here.vdb")?)
    }

    match open() {
        Err(VidlibError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
        other => panic!("Expected Io error, got {other:?}"),
    }
}
