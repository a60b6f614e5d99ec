//! SQLite-backed reference implementation of the persistence port.
//!
//! Durability discipline follows the audit-ledger conventions: WAL journal,
//! `FULL` synchronous, immediate transactions for writes, and a
//! schema-version check in a `meta` table so old binaries refuse newer
//! databases instead of corrupting them.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::error::{OptionExt as _, Result, ResultExt as _, SealError};
use crate::seal::{Seal, SealStatus, TamperIndicator, VerificationRecord};
use crate::store::SealStore;
use crate::util;

pub const SCHEMA_VERSION: i64 = 1;

const SEAL_COLUMNS: &str = "id, serial, shipment_id, status, public_key_pem, \
     encrypted_private_key, challenge, expected_read_count, actual_read_count, \
     attached_at, attached_by, attached_location, attached_lat, attached_lng, \
     removed_at, removed_by, removed_location, removed_reason, tamper_indicator, \
     tamper_details, expires_at, provisioned_at";

const RECORD_COLUMNS: &str = "id, seal_id, verified_by, verified_at, latitude, longitude, \
     location, read_counter, signature_b64, challenge, is_valid, tamper_indicator, \
     tamper_details, device_info";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SqliteSealStore {
    conn: Connection,
    store_id: Uuid,
}

impl std::fmt::Debug for SqliteSealStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSealStore")
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

impl SqliteSealStore {
    pub fn create_new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SealError::Store(format!("create db parent dir {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| SealError::Store(format!("open db {}: {e}", db_path.display())))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS meta(
              k TEXT PRIMARY KEY,
              v TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS seals(
              id TEXT PRIMARY KEY,
              serial TEXT NOT NULL UNIQUE,
              shipment_id TEXT,
              status TEXT NOT NULL,
              public_key_pem TEXT NOT NULL,
              encrypted_private_key TEXT NOT NULL,
              challenge TEXT NOT NULL,
              expected_read_count INTEGER NOT NULL,
              actual_read_count INTEGER NOT NULL,
              attached_at TEXT,
              attached_by TEXT,
              attached_location TEXT,
              attached_lat REAL,
              attached_lng REAL,
              removed_at TEXT,
              removed_by TEXT,
              removed_location TEXT,
              removed_reason TEXT,
              tamper_indicator TEXT NOT NULL,
              tamper_details TEXT,
              expires_at TEXT,
              provisioned_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS verifications(
              id TEXT PRIMARY KEY,
              seal_id TEXT NOT NULL REFERENCES seals(id),
              verified_by TEXT NOT NULL,
              verified_at TEXT NOT NULL,
              latitude REAL,
              longitude REAL,
              location TEXT,
              read_counter INTEGER NOT NULL,
              signature_b64 TEXT NOT NULL,
              challenge TEXT NOT NULL,
              is_valid INTEGER NOT NULL,
              tamper_indicator TEXT NOT NULL,
              tamper_details TEXT,
              device_info TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_seals_expires ON seals(expires_at);
            CREATE INDEX IF NOT EXISTS idx_verifications_seal
              ON verifications(seal_id, verified_at);
            "#,
        )
        .ctx_store("create tables")?;

        let store_id = Uuid::new_v4();
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["store_id", store_id.to_string()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["created_at_utc", util::now_utc_rfc3339()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta(k,v) VALUES (?1,?2)",
            params!["schema_version", SCHEMA_VERSION.to_string()],
        )?;

        info!(store_id = %store_id, "seal store initialized");
        Ok(Self { conn, store_id })
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| SealError::Store(format!("open db {}: {e}", db_path.display())))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            "#,
        )
        .ctx_store("apply pragmas")?;

        let store_id: String = conn
            .query_row("SELECT v FROM meta WHERE k='store_id'", [], |row| {
                row.get(0)
            })
            .optional()
            .ctx_store("read store_id")?
            .required_store("meta table has no store_id (not a sealtrace database)")?;
        let schema_version: i64 = conn
            .query_row("SELECT v FROM meta WHERE k='schema_version'", [], |row| {
                row.get::<_, String>(0)
            })
            .ctx_store("read schema_version")?
            .parse()
            .ctx_store("parse schema_version")?;

        if schema_version != SCHEMA_VERSION {
            return Err(SealError::Store(format!(
                "unsupported schema_version {schema_version} (expected {SCHEMA_VERSION})"
            )));
        }

        Ok(Self {
            conn,
            store_id: Uuid::parse_str(&store_id).ctx_store("parse store_id uuid")?,
        })
    }

    /// Open the database at `db_path`, creating it on first use.
    pub fn open_or_create(db_path: &Path) -> Result<Self> {
        if db_path.exists() {
            Self::open_existing(db_path)
        } else {
            Self::create_new(db_path)
        }
    }

    pub fn store_id(&self) -> Uuid {
        self.store_id
    }

    fn query_seals(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Seal>> {
        let sql = format!("SELECT {SEAL_COLUMNS} FROM seals WHERE {where_clause}");
        let mut stmt = self.conn.prepare(&sql).ctx_store("prepare seal query")?;
        let rows = stmt
            .query_map(args, seal_from_row)
            .ctx_store("query seals")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conv_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn seal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Seal> {
    let id: String = row.get(0)?;
    let status: String = row.get(3)?;
    let tamper: String = row.get(18)?;
    Ok(Seal {
        id: Uuid::parse_str(&id).map_err(conv_err)?,
        serial_number: row.get(1)?,
        shipment_id: row.get(2)?,
        status: SealStatus::parse(&status).map_err(conv_err)?,
        public_key_pem: row.get(4)?,
        encrypted_private_key: row.get(5)?,
        challenge: row.get(6)?,
        expected_read_count: row.get(7)?,
        actual_read_count: row.get(8)?,
        attached_at: row.get(9)?,
        attached_by: row.get(10)?,
        attached_location: row.get(11)?,
        attached_lat: row.get(12)?,
        attached_lng: row.get(13)?,
        removed_at: row.get(14)?,
        removed_by: row.get(15)?,
        removed_location: row.get(16)?,
        removed_reason: row.get(17)?,
        tamper_indicator: TamperIndicator::parse(&tamper).map_err(conv_err)?,
        tamper_details: row.get(19)?,
        expires_at: row.get(20)?,
        provisioned_at: row.get(21)?,
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VerificationRecord> {
    let id: String = row.get(0)?;
    let seal_id: String = row.get(1)?;
    let tamper: String = row.get(11)?;
    Ok(VerificationRecord {
        id: Uuid::parse_str(&id).map_err(conv_err)?,
        seal_id: Uuid::parse_str(&seal_id).map_err(conv_err)?,
        verified_by: row.get(2)?,
        verified_at: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        location: row.get(6)?,
        read_counter: row.get(7)?,
        signature_b64: row.get(8)?,
        challenge: row.get(9)?,
        is_valid: row.get(10)?,
        tamper_indicator: TamperIndicator::parse(&tamper).map_err(conv_err)?,
        tamper_details: row.get(12)?,
        device_info: row.get(13)?,
    })
}

// ---------------------------------------------------------------------------
// Port implementation
// ---------------------------------------------------------------------------

impl SealStore for SqliteSealStore {
    fn insert_seal(&mut self, seal: &Seal) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO seals({SEAL_COLUMNS}) VALUES \
                     (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)"
                ),
                params![
                    seal.id.to_string(),
                    seal.serial_number,
                    seal.shipment_id,
                    seal.status.as_str(),
                    seal.public_key_pem,
                    seal.encrypted_private_key,
                    seal.challenge,
                    seal.expected_read_count,
                    seal.actual_read_count,
                    seal.attached_at,
                    seal.attached_by,
                    seal.attached_location,
                    seal.attached_lat,
                    seal.attached_lng,
                    seal.removed_at,
                    seal.removed_by,
                    seal.removed_location,
                    seal.removed_reason,
                    seal.tamper_indicator.as_str(),
                    seal.tamper_details,
                    seal.expires_at,
                    seal.provisioned_at,
                ],
            )
            .ctx_store("insert seal")?;
        Ok(())
    }

    fn find_by_serial(&self, serial: &str) -> Result<Option<Seal>> {
        self.conn
            .query_row(
                &format!("SELECT {SEAL_COLUMNS} FROM seals WHERE serial=?1"),
                params![serial],
                seal_from_row,
            )
            .optional()
            .ctx_store("find seal by serial")
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<Seal>> {
        self.conn
            .query_row(
                &format!("SELECT {SEAL_COLUMNS} FROM seals WHERE id=?1"),
                params![id.to_string()],
                seal_from_row,
            )
            .optional()
            .ctx_store("find seal by id")
    }

    fn update_seal(&mut self, seal: &Seal) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE seals SET serial=?2, shipment_id=?3, status=?4, public_key_pem=?5, \
                 encrypted_private_key=?6, challenge=?7, expected_read_count=?8, \
                 actual_read_count=?9, attached_at=?10, attached_by=?11, \
                 attached_location=?12, attached_lat=?13, attached_lng=?14, removed_at=?15, \
                 removed_by=?16, removed_location=?17, removed_reason=?18, \
                 tamper_indicator=?19, tamper_details=?20, expires_at=?21, \
                 provisioned_at=?22 WHERE id=?1",
                params![
                    seal.id.to_string(),
                    seal.serial_number,
                    seal.shipment_id,
                    seal.status.as_str(),
                    seal.public_key_pem,
                    seal.encrypted_private_key,
                    seal.challenge,
                    seal.expected_read_count,
                    seal.actual_read_count,
                    seal.attached_at,
                    seal.attached_by,
                    seal.attached_location,
                    seal.attached_lat,
                    seal.attached_lng,
                    seal.removed_at,
                    seal.removed_by,
                    seal.removed_location,
                    seal.removed_reason,
                    seal.tamper_indicator.as_str(),
                    seal.tamper_details,
                    seal.expires_at,
                    seal.provisioned_at,
                ],
            )
            .ctx_store("update seal")?;
        if updated == 0 {
            return Err(SealError::Store(format!("seal {} not persisted", seal.id)));
        }
        Ok(())
    }

    fn append_record(&mut self, record: &VerificationRecord) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_store("begin tx")?;
        tx.execute(
            &format!(
                "INSERT INTO verifications({RECORD_COLUMNS}) VALUES \
                 (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"
            ),
            params![
                record.id.to_string(),
                record.seal_id.to_string(),
                record.verified_by,
                record.verified_at,
                record.latitude,
                record.longitude,
                record.location,
                record.read_counter,
                record.signature_b64,
                record.challenge,
                record.is_valid,
                record.tamper_indicator.as_str(),
                record.tamper_details,
                record.device_info,
            ],
        )
        .ctx_store("insert verification record")?;
        tx.commit().ctx_store("commit tx")?;
        Ok(())
    }

    fn history(&self, seal_id: &Uuid) -> Result<Vec<VerificationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM verifications \
                 WHERE seal_id=?1 ORDER BY verified_at ASC, rowid ASC"
            ))
            .ctx_store("prepare history query")?;
        let rows = stmt
            .query_map(params![seal_id.to_string()], record_from_row)
            .ctx_store("query history")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn expiring_before(&self, cutoff_utc: &str) -> Result<Vec<Seal>> {
        self.query_seals(
            "expires_at IS NOT NULL AND expires_at <= ?1 \
             AND status NOT IN ('removed','tampered','expired') ORDER BY expires_at ASC",
            &[&cutoff_utc],
        )
    }

    fn unattached(&self) -> Result<Vec<Seal>> {
        self.query_seals(
            "status='provisioned' AND shipment_id IS NULL ORDER BY provisioned_at ASC",
            &[],
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
