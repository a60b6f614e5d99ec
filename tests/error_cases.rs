use anyhow::Result;
use tempfile::tempdir;

use sealtrace_core::{
    config::SecurityConfig,
    crypto::{self, MasterKey},
    error::SealError,
    seal::{SealStatus, TamperIndicator},
    service::{SealService, ServiceLimits, VerifyRequest},
    sqlite::SqliteSealStore,
};

fn service_in(dir: &std::path::Path) -> Result<SealService<SqliteSealStore>> {
    let store = SqliteSealStore::create_new(&dir.join("seals.db"))?;
    Ok(SealService::new(
        store,
        MasterKey::from_hex(&"55".repeat(32))?,
        ServiceLimits::default(),
    ))
}

#[test]
fn corrupt_db_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("corrupt.db");
    std::fs::write(&db_path, b"not-a-sqlite-db")?;

    let err = SqliteSealStore::open_existing(&db_path).unwrap_err();
    assert!(err.to_string().contains("store") || err.to_string().contains("database"));
    Ok(())
}

#[test]
fn missing_master_key_is_fatal_config_error() {
    let err = MasterKey::from_config(&SecurityConfig::default()).unwrap_err();
    assert!(matches!(err, SealError::Config(_)));

    // A passphrase without a salt is equally unusable.
    let err = MasterKey::from_config(&SecurityConfig {
        master_key: Some("hunter2 hunter2 hunter2".into()),
        master_key_salt: None,
    })
    .unwrap_err();
    assert!(matches!(err, SealError::Config(_)));
}

#[test]
fn wrong_master_key_is_a_crypto_event() -> Result<()> {
    let keys = crypto::generate_keypair()?;
    let right = MasterKey::from_hex(&"55".repeat(32))?;
    let wrong = MasterKey::from_hex(&"66".repeat(32))?;

    let blob = crypto::encrypt_private_key(&keys.private_key_pem, &right)?;
    let err = crypto::decrypt_private_key(&blob, &wrong).unwrap_err();
    assert!(matches!(err, SealError::Crypto(_)));
    Ok(())
}

#[test]
fn unknown_serial_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path())?;
    let err = service
        .verify(&VerifyRequest {
            serial_number: "04ABCDEF".into(),
            signature_der: vec![],
            read_counter: 1,
            verified_by: "inspector-1".into(),
            latitude: None,
            longitude: None,
            location: None,
            device_info: None,
        })
        .unwrap_err();
    assert!(matches!(err, SealError::NotFound(_)));
    Ok(())
}

#[test]
fn garbage_signature_is_tamper_detection_not_error() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path())?;
    let seal = service.provision("04ABCDEF", None)?;
    service.attach(&seal.id, "S1", "packer-1", None, None, None)?;

    // The protocol runs and classifies the reading; this is a successful
    // operation, not an Err.
    let outcome = service.verify(&VerifyRequest {
        serial_number: "04ABCDEF".into(),
        signature_der: b"garbage".to_vec(),
        read_counter: 1,
        verified_by: "inspector-1".into(),
        latitude: None,
        longitude: None,
        location: None,
        device_info: None,
    })?;
    assert!(!outcome.is_valid);
    assert_eq!(outcome.tamper_indicator, TamperIndicator::SignatureMismatch);
    assert_eq!(outcome.seal.status, SealStatus::Tampered);
    Ok(())
}

#[test]
fn remove_before_attach_is_invalid_state() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path())?;
    let seal = service.provision("04ABCDEF", None)?;
    let err = service
        .remove(&seal.id, "receiver-1", None, None)
        .unwrap_err();
    assert!(matches!(err, SealError::InvalidState(_)));
    Ok(())
}
