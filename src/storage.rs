//! SQLite storage for the registry tables

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

use crate::store::RegistryStore;
use crate::types::{Amount, Bounty, ClaimRecord, CredentialId, Principal, WinnerRank};

const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "001_schema",
    include_str!("../migrations/001_schema.sql"),
)];

const BOUNTY_COLUMNS: &str = "key, metadata_ref, token_limit, active, reward_schedule, \
     escrowed_total, paid_out, issuer, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;

        for (version, name, sql) in MIGRATIONS {
            let applied: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                params![version],
                |row| row.get(0),
            )?;
            if applied {
                continue;
            }

            conn.execute_batch(sql)
                .with_context(|| format!("Failed to apply migration {}", name))?;
            conn.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![version, name, Utc::now().to_rfc3339()],
            )?;
            info!("Applied migration {}", name);
        }
        Ok(())
    }
}

fn to_sql_amount(amount: Amount) -> Result<i64> {
    i64::try_from(amount).with_context(|| format!("amount {} exceeds storage range", amount))
}

fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn amount_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| conversion_error(idx, Type::Integer, e))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Type::Text, e))
}

fn bounty_from_row(row: &Row<'_>) -> rusqlite::Result<Bounty> {
    let schedule: String = row.get(4)?;
    let reward_schedule: Vec<Amount> =
        serde_json::from_str(&schedule).map_err(|e| conversion_error(4, Type::Text, e))?;

    Ok(Bounty {
        key: row.get(0)?,
        metadata_ref: row.get(1)?,
        token_limit: row.get(2)?,
        active: row.get(3)?,
        reward_schedule,
        escrowed_total: amount_at(row, 5)?,
        paid_out: amount_at(row, 6)?,
        issuer: Principal::new(row.get::<_, String>(7)?),
        created_at: timestamp_at(row, 8)?,
    })
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimRecord> {
    Ok(ClaimRecord {
        bounty_key: row.get(0)?,
        principal: Principal::new(row.get::<_, String>(1)?),
        rank: row.get(2)?,
        payout: amount_at(row, 3)?,
        credential_id: CredentialId(amount_at(row, 4)?),
        claimed_at: timestamp_at(row, 5)?,
    })
}

impl RegistryStore for SqliteStore {
    fn insert_bounty(&self, bounty: &Bounty) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO bounties ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                BOUNTY_COLUMNS
            ),
            params![
                bounty.key,
                bounty.metadata_ref,
                bounty.token_limit,
                bounty.active,
                serde_json::to_string(&bounty.reward_schedule)?,
                to_sql_amount(bounty.escrowed_total)?,
                to_sql_amount(bounty.paid_out)?,
                bounty.issuer.as_str(),
                bounty.created_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_bounty(&self, key: &str) -> Result<Option<Bounty>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bounties WHERE key = ?1",
            BOUNTY_COLUMNS
        ))?;
        let bounty = stmt.query_row(params![key], bounty_from_row).optional()?;
        Ok(bounty)
    }

    fn list_bounties(&self) -> Result<Vec<Bounty>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bounties ORDER BY key",
            BOUNTY_COLUMNS
        ))?;
        let bounties = stmt
            .query_map([], bounty_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bounties)
    }

    fn set_ranks(&self, key: &str, ranks: &[WinnerRank]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO winner_ranks (bounty_key, principal, rank) VALUES (?1, ?2, ?3)
                 ON CONFLICT(bounty_key, principal) DO UPDATE SET rank = excluded.rank",
            )?;
            for entry in ranks {
                stmt.execute(params![key, entry.principal.as_str(), entry.rank])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_rank(&self, key: &str, principal: &Principal) -> Result<Option<u32>> {
        let conn = self.conn.lock();
        let rank = conn
            .query_row(
                "SELECT rank FROM winner_ranks WHERE bounty_key = ?1 AND principal = ?2",
                params![key, principal.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rank)
    }

    fn winners_of(&self, key: &str) -> Result<Vec<WinnerRank>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT principal, rank FROM winner_ranks WHERE bounty_key = ?1
             ORDER BY rank, principal",
        )?;
        let winners = stmt
            .query_map(params![key], |row| {
                Ok(WinnerRank {
                    principal: Principal::new(row.get::<_, String>(0)?),
                    rank: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(winners)
    }

    fn get_claim(&self, key: &str, principal: &Principal) -> Result<Option<ClaimRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT bounty_key, principal, rank, payout, credential_id, claimed_at
             FROM claims WHERE bounty_key = ?1 AND principal = ?2",
        )?;
        let claim = stmt
            .query_row(params![key, principal.as_str()], claim_from_row)
            .optional()?;
        Ok(claim)
    }

    fn commit_claim(&self, record: &ClaimRecord) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO claims (bounty_key, principal, rank, payout, credential_id, claimed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.bounty_key,
                record.principal.as_str(),
                record.rank,
                to_sql_amount(record.payout)?,
                to_sql_amount(record.credential_id.0)?,
                record.claimed_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        let updated = tx.execute(
            "UPDATE bounties SET paid_out = paid_out + ?1 WHERE key = ?2",
            params![to_sql_amount(record.payout)?, record.bounty_key],
        )?;
        if updated != 1 {
            bail!("bounty {} vanished during claim", record.bounty_key);
        }

        tx.commit()?;
        Ok(true)
    }

    fn revoke_claim(&self, record: &ClaimRecord) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM claims WHERE bounty_key = ?1 AND principal = ?2 AND credential_id = ?3",
            params![
                record.bounty_key,
                record.principal.as_str(),
                to_sql_amount(record.credential_id.0)?,
            ],
        )?;
        if deleted == 0 {
            return Ok(false);
        }

        let updated = tx.execute(
            "UPDATE bounties SET paid_out = paid_out - ?1 WHERE key = ?2 AND paid_out >= ?1",
            params![to_sql_amount(record.payout)?, record.bounty_key],
        )?;
        if updated != 1 {
            bail!("paid_out for bounty {} cannot cover revoked claim", record.bounty_key);
        }

        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounty(key: &str, schedule: Vec<Amount>) -> Bounty {
        Bounty {
            key: key.to_string(),
            metadata_ref: "ipfs://Qma9fyUqLUm3SmAdxBBS6g3qxu6xNWdrkZcuUGPNAnjv9E/".to_string(),
            token_limit: 3,
            active: true,
            escrowed_total: schedule.iter().sum(),
            reward_schedule: schedule,
            paid_out: 0,
            issuer: Principal::from("issuer"),
            created_at: Utc::now(),
        }
    }

    fn claim(key: &str, who: &str, payout: Amount, id: u64) -> ClaimRecord {
        ClaimRecord {
            bounty_key: key.to_string(),
            principal: Principal::from(who),
            rank: 1,
            payout,
            credential_id: CredentialId(id),
            claimed_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_in_memory() {
        let storage = SqliteStore::in_memory().unwrap();
        let original = bounty("VVS", vec![300, 200, 100]);

        assert!(storage.insert_bounty(&original).unwrap());
        let loaded = storage.get_bounty("VVS").unwrap().unwrap();
        assert_eq!(loaded.reward_schedule, vec![300, 200, 100]);
        assert_eq!(loaded.escrowed_total, 600);
        assert!(loaded.active);
        assert_eq!(loaded.issuer, Principal::from("issuer"));
        assert!(storage.get_bounty("AAS").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_key_ignored() {
        let storage = SqliteStore::in_memory().unwrap();
        assert!(storage.insert_bounty(&bounty("VVS", vec![300])).unwrap());
        assert!(!storage.insert_bounty(&bounty("VVS", vec![1])).unwrap());
        assert_eq!(
            storage.get_bounty("VVS").unwrap().unwrap().reward_schedule,
            vec![300]
        );
    }

    #[test]
    fn test_ranks_upsert() {
        let storage = SqliteStore::in_memory().unwrap();
        storage.insert_bounty(&bounty("VVS", vec![])).unwrap();
        storage
            .set_ranks(
                "VVS",
                &[
                    WinnerRank { principal: "alice".into(), rank: 1 },
                    WinnerRank { principal: "bob".into(), rank: 2 },
                ],
            )
            .unwrap();
        storage
            .set_ranks("VVS", &[WinnerRank { principal: "bob".into(), rank: 1 }])
            .unwrap();

        assert_eq!(storage.get_rank("VVS", &"bob".into()).unwrap(), Some(1));
        assert_eq!(storage.get_rank("VVS", &"alice".into()).unwrap(), Some(1));
        assert_eq!(storage.get_rank("VVS", &"carol".into()).unwrap(), None);
        assert_eq!(storage.winners_of("VVS").unwrap().len(), 2);
    }

    #[test]
    fn test_commit_claim_once() {
        let storage = SqliteStore::in_memory().unwrap();
        storage.insert_bounty(&bounty("VVS", vec![300, 200])).unwrap();

        assert!(storage.commit_claim(&claim("VVS", "alice", 300, 1)).unwrap());
        assert!(!storage.commit_claim(&claim("VVS", "alice", 300, 2)).unwrap());

        let record = storage.get_claim("VVS", &"alice".into()).unwrap().unwrap();
        assert_eq!(record.credential_id, CredentialId(1));
        assert_eq!(storage.get_bounty("VVS").unwrap().unwrap().paid_out, 300);
    }

    #[test]
    fn test_paid_out_cannot_exceed_escrow() {
        let storage = SqliteStore::in_memory().unwrap();
        storage.insert_bounty(&bounty("VVS", vec![100])).unwrap();

        assert!(storage.commit_claim(&claim("VVS", "alice", 101, 1)).is_err());
        assert!(storage.get_claim("VVS", &"alice".into()).unwrap().is_none());
        assert_eq!(storage.get_bounty("VVS").unwrap().unwrap().paid_out, 0);
    }

    #[test]
    fn test_revoke_claim() {
        let storage = SqliteStore::in_memory().unwrap();
        storage.insert_bounty(&bounty("VVS", vec![300, 200])).unwrap();
        let record = claim("VVS", "alice", 300, 4);
        storage.commit_claim(&record).unwrap();

        assert!(!storage.revoke_claim(&claim("VVS", "alice", 300, 5)).unwrap());
        assert!(storage.revoke_claim(&record).unwrap());

        assert!(storage.get_claim("VVS", &"alice".into()).unwrap().is_none());
        assert_eq!(storage.get_bounty("VVS").unwrap().unwrap().paid_out, 0);
        // The pair can claim again once revoked
        assert!(storage.commit_claim(&record).unwrap());
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bounties.db");

        {
            let storage = SqliteStore::new(&path).unwrap();
            storage.insert_bounty(&bounty("VVS", vec![300])).unwrap();
        }

        let storage = SqliteStore::new(&path).unwrap();
        assert_eq!(storage.list_bounties().unwrap().len(), 1);
    }
}
