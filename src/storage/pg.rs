//! Relay storage implementation using a PostgreSQL database.

use super::{api::Result, StorageApi};
use crate::{
    error::{QuotaError, StorageError},
    nonce::next_relayer_nonce,
    quota::select_payer,
    transactions::{NewTransaction, TransactionRecord, TxId, TxStatus},
    types::{Delegation, DelegationWithApprover, Payer, Quota, QuotaSnapshot},
};
use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::eyre;
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::instrument;

/// PostgreSQL storage implementation.
///
/// `create_transaction` takes a per-relayer advisory lock and `FOR UPDATE`
/// row locks on the quota rows it reads, so the headroom check, the debit,
/// the nonce assignment and the insert commit as one unit.
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
    default_allowance: u64,
}

impl PgStorage {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool, default_allowance: u64) -> Self {
        Self { pool, default_allowance }
    }

    /// Idempotently creates the quota row within an existing transaction.
    async fn ensure_quota_with(
        &self,
        profile: Address,
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
    ) -> Result<()> {
        sqlx::query(
            "insert into quotas (profile_address, monthly_allowance) values ($1, $2) \
             on conflict (profile_address) do nothing",
        )
        .bind(profile.as_slice())
        .bind(self.default_allowance as i64)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

/// Key for the per-relayer transaction-scoped advisory lock.
///
/// Serializes nonce assignment across concurrent inserts for the same
/// relayer wallet.
fn relayer_lock_key(relayer: Address) -> i64 {
    let hash = keccak256(relayer.as_slice());
    i64::from_be_bytes(hash[..8].try_into().expect("keccak output is 32 bytes"))
}

fn decode_quota(row: &PgRow) -> Result<Quota> {
    Ok(Quota {
        profile_address: Address::from_slice(&row.try_get::<Vec<u8>, _>("profile_address")?),
        monthly_allowance: row.try_get::<i64, _>("monthly_allowance")? as u64,
        used: row.try_get::<i64, _>("used")? as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn decode_delegation(row: &PgRow) -> Result<Delegation> {
    Ok(Delegation {
        id: row.try_get("id")?,
        approver_address: Address::from_slice(&row.try_get::<Vec<u8>, _>("approver_address")?),
        approved_address: Address::from_slice(&row.try_get::<Vec<u8>, _>("approved_address")?),
        monthly_allowance: row.try_get::<i64, _>("monthly_allowance")? as u64,
        used: row.try_get::<i64, _>("used")? as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn decode_tx(row: &PgRow) -> Result<TransactionRecord> {
    let profile_address = Address::from_slice(&row.try_get::<Vec<u8>, _>("profile_address")?);

    let status = match row.try_get::<String, _>("status")?.as_str() {
        "pending" => TxStatus::Pending,
        "confirmed" => TxStatus::Confirmed {
            gas_used: row.try_get::<Option<i64>, _>("gas_used")?.unwrap_or_default() as u64,
        },
        "failed" => TxStatus::Failed {
            reason: row
                .try_get::<Option<String>, _>("error")?
                .unwrap_or_else(|| "transaction failed".to_string()),
        },
        other => return Err(eyre!("unknown tx status: {other}").into()),
    };

    let payer = match row.try_get::<String, _>("payer_kind")?.as_str() {
        "own" => Payer::OwnQuota { profile: profile_address },
        "delegation" => Payer::Delegation {
            id: row
                .try_get::<Option<i64>, _>("payer_delegation_id")?
                .ok_or_else(|| eyre!("delegation payer without delegation id"))?,
        },
        other => return Err(eyre!("unknown payer kind: {other}").into()),
    };

    Ok(TransactionRecord {
        id: TxId::from_slice(&row.try_get::<Vec<u8>, _>("tx_id")?),
        profile_address,
        call_nonce: U256::from_be_slice(&row.try_get::<Vec<u8>, _>("call_nonce")?),
        channel_id: row.try_get::<i64, _>("channel_id")? as u64,
        signer_address: Address::from_slice(&row.try_get::<Vec<u8>, _>("signer_address")?),
        signature: row.try_get::<Vec<u8>, _>("signature")?.into(),
        call_data: row.try_get::<Vec<u8>, _>("call_data")?.into(),
        status,
        relayer_address: Address::from_slice(&row.try_get::<Vec<u8>, _>("relayer_address")?),
        relayer_nonce: row.try_get::<i64, _>("relayer_nonce")? as u64,
        estimated_gas: row.try_get::<i64, _>("estimated_gas")? as u64,
        settled_hash: B256::from_slice(&row.try_get::<Vec<u8>, _>("settled_hash")?),
        payer,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

const TX_COLUMNS: &str = "tx_id, profile_address, call_nonce, channel_id, signer_address, \
     signature, call_data, status::text as status, relayer_address, relayer_nonce, \
     estimated_gas, gas_used, error, settled_hash, payer_kind, payer_delegation_id, \
     created_at, updated_at";

#[async_trait]
impl StorageApi for PgStorage {
    #[instrument(skip(self))]
    async fn ensure_quota(&self, profile: Address) -> Result<Quota> {
        let mut tx = self.pool.begin().await?;
        self.ensure_quota_with(profile, &mut tx).await?;

        let row = sqlx::query("select * from quotas where profile_address = $1")
            .bind(profile.as_slice())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        decode_quota(&row)
    }

    #[instrument(skip(self))]
    async fn quota_snapshot(&self, profile: Address) -> Result<QuotaSnapshot> {
        let mut tx = self.pool.begin().await?;
        self.ensure_quota_with(profile, &mut tx).await?;

        let own = decode_quota(
            &sqlx::query("select * from quotas where profile_address = $1")
                .bind(profile.as_slice())
                .fetch_one(&mut *tx)
                .await?,
        )?;

        let rows = sqlx::query(
            "select d.id, d.approver_address, d.approved_address, d.monthly_allowance, d.used, \
                    d.created_at, d.updated_at, \
                    q.profile_address as q_profile, q.monthly_allowance as q_allowance, \
                    q.used as q_used, q.created_at as q_created_at, q.updated_at as q_updated_at \
             from delegations d \
             join quotas q on q.profile_address = d.approver_address \
             where d.approved_address = $1 \
             order by d.id",
        )
        .bind(profile.as_slice())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let delegations = rows
            .iter()
            .map(|row| {
                Ok(DelegationWithApprover {
                    delegation: decode_delegation(row)?,
                    approver_quota: Quota {
                        profile_address: Address::from_slice(
                            &row.try_get::<Vec<u8>, _>("q_profile")?,
                        ),
                        monthly_allowance: row.try_get::<i64, _>("q_allowance")? as u64,
                        used: row.try_get::<i64, _>("q_used")? as u64,
                        created_at: row.try_get::<DateTime<Utc>, _>("q_created_at")?,
                        updated_at: row.try_get::<DateTime<Utc>, _>("q_updated_at")?,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(QuotaSnapshot { own, delegations })
    }

    #[instrument(skip(self))]
    async fn upsert_delegation(
        &self,
        approver: Address,
        approved: Address,
        monthly_allowance: u64,
    ) -> Result<Delegation> {
        let mut tx = self.pool.begin().await?;
        // The approver quota backs the delegation's headroom checks; create
        // both sides up front.
        self.ensure_quota_with(approver, &mut tx).await?;
        self.ensure_quota_with(approved, &mut tx).await?;

        let row = sqlx::query(
            "insert into delegations (approver_address, approved_address, monthly_allowance) \
             values ($1, $2, $3) \
             on conflict (approver_address, approved_address) \
             do update set monthly_allowance = excluded.monthly_allowance, updated_at = now() \
             returning *",
        )
        .bind(approver.as_slice())
        .bind(approved.as_slice())
        .bind(monthly_allowance as i64)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        decode_delegation(&row)
    }

    #[instrument(skip(self, tx), fields(profile = %tx.profile_address))]
    async fn create_transaction(&self, tx: NewTransaction) -> Result<TransactionRecord> {
        let mut db_tx = self.pool.begin().await?;

        // One relay wallet funds every broadcast; serialize nonce assignment
        // for it across concurrent inserts.
        sqlx::query("select pg_advisory_xact_lock($1)")
            .bind(relayer_lock_key(tx.relayer_address))
            .execute(&mut *db_tx)
            .await?;

        self.ensure_quota_with(tx.profile_address, &mut db_tx).await?;

        let own = decode_quota(
            &sqlx::query("select * from quotas where profile_address = $1 for update")
                .bind(tx.profile_address.as_slice())
                .fetch_one(&mut *db_tx)
                .await?,
        )?;

        // Lock the delegation rows and their approver quotas together: the
        // headroom observed here must still hold at commit.
        let rows = sqlx::query(
            "select d.id, d.approver_address, d.approved_address, d.monthly_allowance, d.used, \
                    d.created_at, d.updated_at, \
                    q.profile_address as q_profile, q.monthly_allowance as q_allowance, \
                    q.used as q_used, q.created_at as q_created_at, q.updated_at as q_updated_at \
             from delegations d \
             join quotas q on q.profile_address = d.approver_address \
             where d.approved_address = $1 \
             order by d.id \
             for update",
        )
        .bind(tx.profile_address.as_slice())
        .fetch_all(&mut *db_tx)
        .await?;

        let delegations = rows
            .iter()
            .map(|row| {
                Ok(DelegationWithApprover {
                    delegation: decode_delegation(row)?,
                    approver_quota: Quota {
                        profile_address: Address::from_slice(
                            &row.try_get::<Vec<u8>, _>("q_profile")?,
                        ),
                        monthly_allowance: row.try_get::<i64, _>("q_allowance")? as u64,
                        used: row.try_get::<i64, _>("q_used")? as u64,
                        created_at: row.try_get::<DateTime<Utc>, _>("q_created_at")?,
                        updated_at: row.try_get::<DateTime<Utc>, _>("q_updated_at")?,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let payer = select_payer(&own, &delegations, tx.estimated_gas)
            .ok_or(QuotaError::Exceeded { profile: tx.profile_address })?;

        match payer {
            Payer::OwnQuota { profile } => {
                sqlx::query(
                    "update quotas set used = used + $2, updated_at = now() \
                     where profile_address = $1",
                )
                .bind(profile.as_slice())
                .bind(tx.estimated_gas as i64)
                .execute(&mut *db_tx)
                .await?;
            }
            Payer::Delegation { id } => {
                sqlx::query(
                    "update delegations set used = used + $2, updated_at = now() where id = $1",
                )
                .bind(id)
                .bind(tx.estimated_gas as i64)
                .execute(&mut *db_tx)
                .await?;
            }
        }

        let latest_pending: Option<i64> = sqlx::query_scalar(
            "select max(relayer_nonce) from txs \
             where relayer_address = $1 and status = 'pending'",
        )
        .bind(tx.relayer_address.as_slice())
        .fetch_one(&mut *db_tx)
        .await?;
        let relayer_nonce =
            next_relayer_nonce(latest_pending.map(|n| n as u64), tx.relayer_nonce_fallback);

        let payer_kind = match payer {
            Payer::OwnQuota { .. } => "own",
            Payer::Delegation { .. } => "delegation",
        };
        let payer_delegation_id = match payer {
            Payer::Delegation { id } => Some(id),
            Payer::OwnQuota { .. } => None,
        };

        // A replayed (call_nonce, channel, signer) triple trips the unique
        // index here and rolls the debit back with it.
        let row = sqlx::query(&format!(
            "insert into txs (tx_id, profile_address, call_nonce, channel_id, signer_address, \
                              signature, call_data, relayer_address, relayer_nonce, \
                              estimated_gas, settled_hash, payer_kind, payer_delegation_id) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             returning {TX_COLUMNS}"
        ))
        .bind(tx.id().as_slice())
        .bind(tx.profile_address.as_slice())
        .bind(tx.call_nonce.to_be_bytes::<32>().as_slice())
        .bind(tx.channel_id as i64)
        .bind(tx.signer_address.as_slice())
        .bind(tx.signature.as_ref())
        .bind(tx.call_data.as_ref())
        .bind(tx.relayer_address.as_slice())
        .bind(relayer_nonce as i64)
        .bind(tx.estimated_gas as i64)
        .bind(tx.settled_hash.as_slice())
        .bind(payer_kind)
        .bind(payer_delegation_id)
        .fetch_one(&mut *db_tx)
        .await?;

        let record = decode_tx(&row)?;
        db_tx.commit().await?;

        Ok(record)
    }

    #[instrument(skip(self, status))]
    async fn update_transaction_status(&self, id: TxId, status: TxStatus) -> Result<()> {
        let (status_str, gas_used, error) = match &status {
            TxStatus::Pending => ("pending", None, None),
            TxStatus::Confirmed { gas_used } => ("confirmed", Some(*gas_used as i64), None),
            TxStatus::Failed { reason } => ("failed", None, Some(reason.clone())),
        };

        let affected = sqlx::query(
            "update txs set status = $2::tx_status, gas_used = $3, error = $4, \
                            updated_at = now() \
             where tx_id = $1 and status = 'pending'",
        )
        .bind(id.as_slice())
        .bind(status_str)
        .bind(gas_used)
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            let exists: Option<i64> = sqlx::query_scalar("select 1 from txs where tx_id = $1")
                .bind(id.as_slice())
                .fetch_optional(&self.pool)
                .await?;
            return Err(match exists {
                Some(_) => StorageError::AlreadySettled(id),
                None => StorageError::TxNotFound(id),
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_transaction(&self, id: TxId) -> Result<Option<TransactionRecord>> {
        sqlx::query(&format!("select {TX_COLUMNS} from txs where tx_id = $1"))
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| decode_tx(&row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn read_transactions(&self, profile: Address) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "select {TX_COLUMNS} from txs where profile_address = $1 \
             order by created_at desc, relayer_nonce desc"
        ))
        .bind(profile.as_slice())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_tx).collect()
    }

    async fn ping(&self) -> Result<()> {
        if let Some(mut connection) = self.pool.try_acquire() {
            connection.ping().await.map_err(eyre::Error::from).map_err(Into::into)
        } else {
            Err(eyre!("no connection to database").into())
        }
    }
}
