use crate::domain::audit::AuditEntry;
use crate::domain::commit::{CommitOutcome, PayoutCommit};
use crate::domain::escrow::{EscrowRecord, EscrowStatus};
use crate::domain::pool::{DistributionStatus, PrizePool};
use crate::domain::ports::{AuditSink, LedgerStore};
use crate::domain::prize::{PrizeRecord, PrizeStatus};
use crate::domain::winner::WinnerProfile;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub const CF_PRIZES: &str = "prizes";
pub const CF_ESCROWS: &str = "escrows";
pub const CF_WINNERS: &str = "winners";
pub const CF_POOLS: &str = "pools";
pub const CF_AUDIT: &str = "audit";

/// A persistent payout ledger backed by RocksDB.
///
/// Each entity type lives in its own column family, keyed by id. Conditional
/// writes and payout commits are serialized by `write_lock` and land as a
/// single `WriteBatch`, so a commit is never partially visible.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    audit_seq: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PRIZES, CF_ESCROWS, CF_WINNERS, CF_POOLS, CF_AUDIT]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            audit_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Backend(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn prize(&self, id: &str) -> Result<Option<PrizeRecord>> {
        self.read(CF_PRIZES, id)
    }

    async fn prizes(&self) -> Result<Vec<PrizeRecord>> {
        let mut prizes: Vec<PrizeRecord> = self.scan(CF_PRIZES)?;
        prizes.sort_by(|a, b| (&a.pool_id, a.placement).cmp(&(&b.pool_id, b.placement)));
        Ok(prizes)
    }

    async fn prizes_with_status(
        &self,
        pool_id: &str,
        status: PrizeStatus,
    ) -> Result<Vec<PrizeRecord>> {
        let mut prizes: Vec<PrizeRecord> = self
            .scan::<PrizeRecord>(CF_PRIZES)?
            .into_iter()
            .filter(|p| p.pool_id == pool_id && p.status == status)
            .collect();
        prizes.sort_by_key(|p| p.placement);
        Ok(prizes)
    }

    async fn put_prize(&self, prize: PrizeRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CF_PRIZES, &prize.id, &prize)
    }

    async fn update_prize(&self, mut prize: PrizeRecord) -> Result<PrizeRecord> {
        let _guard = self.write_lock.lock().await;
        let current: PrizeRecord =
            self.read(CF_PRIZES, &prize.id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "prize",
                    id: prize.id.clone(),
                })?;
        if current.version != prize.version {
            return Err(LedgerError::Conflict {
                entity: "prize",
                id: prize.id,
            });
        }
        prize.version += 1;
        self.write(CF_PRIZES, &prize.id, &prize)?;
        Ok(prize)
    }

    async fn claim_prize(&self, mut prize: PrizeRecord) -> Result<PrizeRecord> {
        let _guard = self.write_lock.lock().await;
        let current: PrizeRecord =
            self.read(CF_PRIZES, &prize.id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "prize",
                    id: prize.id.clone(),
                })?;
        if current.version != prize.version {
            return Err(LedgerError::Conflict {
                entity: "prize",
                id: prize.id,
            });
        }
        let escrow_id = prize.escrow_record_id.clone().unwrap_or_default();
        let escrow: EscrowRecord =
            self.read(CF_ESCROWS, &escrow_id)?
                .ok_or(LedgerError::NotFound {
                    entity: "escrow",
                    id: escrow_id,
                })?;
        escrow.reserve_for(&prize, &self.scan::<PrizeRecord>(CF_PRIZES)?)?;

        prize.version += 1;
        self.write(CF_PRIZES, &prize.id, &prize)?;
        Ok(prize)
    }

    async fn escrow(&self, id: &str) -> Result<Option<EscrowRecord>> {
        self.read(CF_ESCROWS, id)
    }

    async fn held_escrow(&self, pool_id: &str) -> Result<Option<EscrowRecord>> {
        // Keys iterate in sorted order, so the first match is the lowest id.
        Ok(self
            .scan::<EscrowRecord>(CF_ESCROWS)?
            .into_iter()
            .find(|e| e.pool_id == pool_id && e.status == EscrowStatus::Held))
    }

    async fn put_escrow(&self, escrow: EscrowRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CF_ESCROWS, &escrow.id, &escrow)
    }

    async fn winner(&self, payee_id: &str) -> Result<Option<WinnerProfile>> {
        self.read(CF_WINNERS, payee_id)
    }

    async fn put_winner(&self, winner: WinnerProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CF_WINNERS, &winner.payee_id, &winner)
    }

    async fn pools_awaiting_distribution(&self) -> Result<Vec<PrizePool>> {
        Ok(self
            .scan::<PrizePool>(CF_POOLS)?
            .into_iter()
            .filter(PrizePool::awaits_distribution)
            .collect())
    }

    async fn put_pool(&self, pool: PrizePool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CF_POOLS, &pool.id, &pool)
    }

    async fn set_pool_status(&self, pool_id: &str, status: DistributionStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut pool: PrizePool =
            self.read(CF_POOLS, pool_id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "pool",
                    id: pool_id.to_string(),
                })?;
        pool.distribution_status = status;
        self.write(CF_POOLS, pool_id, &pool)
    }

    async fn commit_payout(&self, commit: &PayoutCommit) -> Result<CommitOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut prize: PrizeRecord =
            self.read(CF_PRIZES, &commit.prize_id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "prize",
                    id: commit.prize_id.clone(),
                })?;
        let mut escrow: EscrowRecord =
            self.read(CF_ESCROWS, &commit.escrow_id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "escrow",
                    id: commit.escrow_id.clone(),
                })?;
        let mut winner = self
            .read::<WinnerProfile>(CF_WINNERS, &prize.payee_id)?
            .unwrap_or_else(|| WinnerProfile::new(prize.payee_id.clone()));
        let obligations_remain = self.scan::<PrizeRecord>(CF_PRIZES)?.iter().any(|p| {
            p.pool_id == prize.pool_id && p.id != prize.id && p.status != PrizeStatus::Paid
        });

        let outcome = commit.apply(&mut prize, &mut escrow, &mut winner, obligations_remain)?;
        if outcome == CommitOutcome::Applied {
            prize.version += 1;
            let mut batch = WriteBatch::default();
            batch.put_cf(self.cf(CF_PRIZES)?, prize.id.as_bytes(), serde_json::to_vec(&prize)?);
            batch.put_cf(self.cf(CF_ESCROWS)?, escrow.id.as_bytes(), serde_json::to_vec(&escrow)?);
            batch.put_cf(
                self.cf(CF_WINNERS)?,
                winner.payee_id.as_bytes(),
                serde_json::to_vec(&winner)?,
            );
            self.db.write(batch)?;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl AuditSink for RocksDBStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let nanos = entry.recorded_at.timestamp_nanos_opt().unwrap_or_default();
        let seq = self.audit_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("{nanos:020}-{seq:010}");
        self.write(CF_AUDIT, &key, &entry)
    }
}
