use super::*;
use pretty_assertions::assert_eq;
use std::path::PathBuf;

#[test]
fn test_host_errors_map_onto_toolkit_taxonomy() {
    let unloaded: ToolkitError = HostError::Unloaded {
        name: "env".to_string(),
    }
    .into();
    assert!(unloaded.is_disposed());

    let missing: ToolkitError = HostError::NotFound {
        path: PathBuf::from("/nope/A.dll"),
    }
    .into();
    assert!(matches!(missing, ToolkitError::NotFound { .. }));

    let unresolved: ToolkitError = HostError::Unresolved {
        name: "Contoso.Core".to_string(),
        environment: "env".to_string(),
    }
    .into();
    assert!(matches!(unresolved, ToolkitError::NotFound { what } if what == "Contoso.Core"));

    let malformed: ToolkitError = HostError::MalformedImage {
        reason: "bad".to_string(),
    }
    .into();
    assert!(matches!(malformed, ToolkitError::Host(_)));
}

#[test]
fn test_panic_maps_to_remote_fault() {
    let err: ToolkitError = HostError::Panicked {
        environment: "env".to_string(),
        message: "boom".to_string(),
    }
    .into();
    match err {
        ToolkitError::RemoteFault { faults } => {
            assert_eq!(faults, vec![FaultRecord::new("panic", "boom")]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_remote_fault_message_lists_every_record() {
    let err = ToolkitError::RemoteFault {
        faults: vec![FaultRecord::new("A", "first"), FaultRecord::new("B", "second")],
    };
    assert_eq!(err.to_string(), "remote fault: A: first; B: second");
}

#[test]
fn test_fault_record_from_error_keeps_type_name() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let record = FaultRecord::from_error(&io);
    assert!(record.type_name.ends_with("Error"));
    assert_eq!(record.message, "disk");

    let parsed = "x".parse::<u8>().unwrap_err();
    assert!(FaultRecord::from_error(&parsed).type_name.ends_with("ParseIntError"));
}
