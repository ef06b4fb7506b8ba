//! SQLite write-through log of payments, one JSON row per record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::error::HtlcError;
use crate::models::Payment;

/// Write-through log of payments, one JSON row per payment
#[derive(Debug)]
pub struct SqlitePaymentLog {
    conn: Connection,
    path: PathBuf,
}

impl SqlitePaymentLog {
    pub fn open(path: PathBuf) -> Result<Self, HtlcError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    HtlcError::Storage(format!("create payment log dir {}: {e}", dir.display()))
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert(&mut self, seq: u64, payment: &Payment) -> Result<(), HtlcError> {
        let json = serde_json::to_string(payment)?;
        let seq = i64::try_from(seq).map_err(|_| HtlcError::Storage(format!("seq {seq}")))?;
        self.conn.execute(
            r#"
INSERT INTO payments (id, seq, payment_hash, payment_json)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET payment_json = excluded.payment_json
"#,
            params![
                payment.id.to_string(),
                seq,
                payment.payment_hash().map(|h| h.to_hex()),
                json,
            ],
        )?;
        Ok(())
    }

    /// All payments in insertion order
    pub fn load_all(&self) -> Result<Vec<Payment>, HtlcError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payment_json FROM payments ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<(), HtlcError> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS payments (
  id TEXT PRIMARY KEY,
  seq INTEGER NOT NULL,
  payment_hash TEXT,
  payment_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS payments_hash_idx ON payments(payment_hash);
"#,
    )?;
    Ok(())
}
