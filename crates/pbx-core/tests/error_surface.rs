use pbx_core::errors::{ErrorInfo, PbxError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("rank", 2)
        .with_context("reason", "example")
}

#[test]
fn protocol_error_surface() {
    let err = PbxError::Protocol(sample_info("P001", "buffer size mismatch"));
    assert_eq!(err.info().code, "P001");
    assert_eq!(err.info().context.get("rank").map(String::as_str), Some("2"));
    assert!(err.is_fatal());
}

#[test]
fn model_error_surface() {
    let err = PbxError::Model(sample_info("M001", "total likelihood is 0"));
    assert_eq!(err.info().code, "M001");
    assert!(err.is_fatal());
}

#[test]
fn config_error_is_not_fatal_to_ensemble() {
    let err = PbxError::config("C001", "missing chain name");
    assert!(!err.is_fatal());
    assert!(err.to_string().starts_with("config error"));
}

#[test]
fn display_includes_context_and_hint() {
    let err = PbxError::Data(
        ErrorInfo::new("D001", "unknown taxon")
            .with_context("taxon", "t7")
            .with_hint("check the alignment header"),
    );
    let text = err.to_string();
    assert!(text.contains("taxon=t7"));
    assert!(text.contains("hint: check the alignment header"));
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = PbxError::Serde(ErrorInfo::new("S001", "schema mismatch"));
    let json = serde_json::to_string(&err).unwrap();
    assert!(json.contains("\"family\":\"Serde\""));
    let back: PbxError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, err);
}
