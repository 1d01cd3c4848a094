//! Durable state: promotions, wallets, claims, with transactional
//! claim and redeem operations. Every mutation is either a single statement
//! or wrapped in an explicit transaction; there is no direct SQL outside
//! this module.

mod error;
mod rows;

pub use error::StoreError;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{Claim, GrantKind, Promotion, PromotionKind, Voucher, Wallet, WalletProvider};
use rows::{ClaimRow, PromotionRow, VoucherRow, WalletRow};

/// Kind filter applied by [`Store::list_active_claims`]. `Ads` restricts to
/// drain-eligible claims; `Any` leaves the set unrestricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Any,
    Ads,
}

#[derive(Clone)]
pub struct Store {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl Store {
    pub async fn connect(database_url: &str, ro_database_url: Option<&str>) -> Result<Self, StoreError> {
        let primary = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let replica = match ro_database_url {
            Some(url) => Some(PgPoolOptions::new().max_connections(10).connect(url).await?),
            None => None,
        };
        Ok(Self { primary, replica })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.primary).await?;
        Ok(())
    }

    fn read_pool(&self) -> &PgPool {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Insert-or-ignore, safe to call repeatedly.
    pub async fn upsert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO wallet (wallet_id, provider, provider_id, public_key_hex, altcurrency)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (wallet_id) DO NOTHING
            "#,
        )
        .bind(wallet.wallet_id)
        .bind(provider_str(wallet.provider))
        .bind(&wallet.provider_id)
        .bind(&wallet.public_key_hex)
        .bind(&wallet.altcurrency)
        .execute(&self.primary)
        .await?;
        Ok(())
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, StoreError> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT wallet_id, provider, provider_id, public_key_hex, altcurrency
            FROM wallet WHERE wallet_id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(self.read_pool())
        .await?;
        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    pub async fn get_promotion(&self, promotion_id: Uuid) -> Result<Promotion, StoreError> {
        let row: Option<PromotionRow> = sqlx::query_as(
            r#"
            SELECT promotion_id, kind, approximate_value, platform, active,
                   remaining_vouchers, created_at, matures_at, expires_at
            FROM promotion WHERE promotion_id = $1
            "#,
        )
        .bind(promotion_id)
        .fetch_optional(self.read_pool())
        .await?;
        row.map(Into::into).ok_or(StoreError::NotFound)
    }

    /// Decrement-and-check idiom under one transaction. For `ads`
    /// promotions the claim row is pre-created by the minting pipeline and
    /// claim flips `legacy_claimed`; for `ugp` promotions claim inserts a
    /// fresh row and a re-claim surfaces as a unique violation.
    pub async fn claim_promotion(
        &self,
        promotion_id: Uuid,
        wallet_id: Uuid,
    ) -> Result<Claim, StoreError> {
        let mut tx = self.primary.begin().await?;

        let decremented = sqlx::query(
            r#"
            UPDATE promotion SET remaining_vouchers = remaining_vouchers - 1
            WHERE promotion_id = $1 AND active AND remaining_vouchers > 0
            "#,
        )
        .bind(promotion_id)
        .execute(&mut *tx)
        .await?;
        if decremented.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StoreError::NoActivePromotion);
        }

        let promotion_kind: (String,) =
            sqlx::query_as("SELECT kind FROM promotion WHERE promotion_id = $1")
                .bind(promotion_id)
                .fetch_one(&mut *tx)
                .await?;

        let row: ClaimRow = if promotion_kind.0 == "ads" {
            let maybe_row: Option<ClaimRow> = sqlx::query_as(
                r#"
                UPDATE claim SET legacy_claimed = true
                WHERE promotion_id = $1 AND wallet_id = $2
                RETURNING claim_id, promotion_id, wallet_id, approximate_value,
                          legacy_claimed, redeemed, redeemed_at, created_at
                "#,
            )
            .bind(promotion_id)
            .bind(wallet_id)
            .fetch_optional(&mut *tx)
            .await?;
            match maybe_row {
                Some(row) => row,
                None => {
                    tx.rollback().await?;
                    return Err(StoreError::Inconsistent(
                        "ads claim row missing for promotion/wallet pair".into(),
                    ));
                }
            }
        } else {
            let approximate_value: (Decimal,) =
                sqlx::query_as("SELECT approximate_value FROM promotion WHERE promotion_id = $1")
                    .bind(promotion_id)
                    .fetch_one(&mut *tx)
                    .await?;
            let inserted: Result<ClaimRow, sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO claim (promotion_id, wallet_id, approximate_value, legacy_claimed)
                VALUES ($1, $2, $3, true)
                RETURNING claim_id, promotion_id, wallet_id, approximate_value,
                          legacy_claimed, redeemed, redeemed_at, created_at
                "#,
            )
            .bind(promotion_id)
            .bind(wallet_id)
            .bind(approximate_value.0)
            .fetch_one(&mut *tx)
            .await;
            match inserted {
                Ok(row) => row,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(StoreError::from_claim_insert(e));
                }
            }
        };

        tx.commit().await?;
        Ok(row.into())
    }

    /// Atomic compare-and-set: `WHERE ... AND NOT redeemed AND legacy_claimed`
    /// makes a replayed redeem naturally idempotent — it finds `redeemed =
    /// true` already and reports `NotMatching`.
    pub async fn redeem_claim(
        &self,
        claim_id: Uuid,
        promotion_id: Uuid,
        wallet_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE claim SET redeemed = true, redeemed_at = now()
            WHERE claim_id = $1 AND promotion_id = $2 AND wallet_id = $3
              AND NOT redeemed AND legacy_claimed
            "#,
        )
        .bind(claim_id)
        .bind(promotion_id)
        .bind(wallet_id)
        .execute(&self.primary)
        .await?;
        match result.rows_affected() {
            1 => Ok(()),
            0 => Err(StoreError::NotMatching),
            n => Err(StoreError::Inconsistent(format!(
                "redeem_claim affected {n} rows, expected 1"
            ))),
        }
    }

    /// Joins claim to promotion, sorts by expiry ascending, and applies the
    /// legacy `ugp + android -> android` rename — a presentation rewrite
    /// that never touches the stored kind. `nominal_currency` is the single
    /// configured unit (no multi-currency support) stamped onto each
    /// projected voucher.
    ///
    /// Deliberately does not filter out already-redeemed claims: a caller
    /// replaying a spent claim needs to see it here so `run_unguarded` can
    /// route it into `redeem_claim`'s CAS and surface `AlreadyRedeemed`
    /// instead of a misleading "nothing to redeem".
    pub async fn list_active_claims(
        &self,
        wallet_id: Uuid,
        kind_filter: KindFilter,
        nominal_currency: &str,
    ) -> Result<Vec<Voucher>, StoreError> {
        let rows: Vec<VoucherRow> = match kind_filter {
            KindFilter::Any => sqlx::query_as(
                r#"
                SELECT c.claim_id as voucher_id, c.promotion_id, p.kind,
                       p.platform, c.approximate_value as amount,
                       p.matures_at as maturity_time, p.expires_at as expiry_time,
                       c.redeemed
                FROM claim c
                JOIN promotion p ON p.promotion_id = c.promotion_id
                WHERE c.wallet_id = $1 AND c.legacy_claimed
                  AND p.expires_at > now()
                ORDER BY p.expires_at ASC
                "#,
            )
            .bind(wallet_id)
            .fetch_all(self.read_pool())
            .await?,
            KindFilter::Ads => sqlx::query_as(
                r#"
                SELECT c.claim_id as voucher_id, c.promotion_id, p.kind,
                       p.platform, c.approximate_value as amount,
                       p.matures_at as maturity_time, p.expires_at as expiry_time,
                       c.redeemed
                FROM claim c
                JOIN promotion p ON p.promotion_id = c.promotion_id
                WHERE c.wallet_id = $1 AND c.legacy_claimed
                  AND p.expires_at > now() AND p.kind = 'ads'
                ORDER BY p.expires_at ASC
                "#,
            )
            .bind(wallet_id)
            .fetch_all(self.read_pool())
            .await?,
        };
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut voucher: Voucher = row.into();
                voucher.nominal_currency = nominal_currency.to_string();
                voucher
            })
            .collect())
    }

    /// Legacy entrypoint: binds a wallet to a specific pre-minted
    /// voucher-id atomically. A subsequent binding attempt by a different
    /// wallet fails with `Duplicate`.
    pub async fn bind_legacy_voucher(
        &self,
        voucher_id: Uuid,
        promotion_id: Uuid,
        wallet_id: Uuid,
        approximate_value: Decimal,
    ) -> Result<Claim, StoreError> {
        let inserted: Result<Option<ClaimRow>, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO claim (claim_id, promotion_id, wallet_id, approximate_value, legacy_claimed)
            VALUES ($1, $2, $3, $4, true)
            ON CONFLICT (claim_id) DO NOTHING
            RETURNING claim_id, promotion_id, wallet_id, approximate_value,
                      legacy_claimed, redeemed, redeemed_at, created_at
            "#,
        )
        .bind(voucher_id)
        .bind(promotion_id)
        .bind(wallet_id)
        .bind(approximate_value)
        .fetch_optional(&self.primary)
        .await;
        // `ON CONFLICT (claim_id)` only suppresses a primary-key collision;
        // a conflict on the separate `(promotion_id, wallet_id)` unique
        // index still raises 23505 here, so route it through the same
        // classifier `claim_promotion` uses rather than letting it surface
        // as an unclassified `StoreError::Sqlx`.
        match inserted {
            Ok(row) => row.map(Into::into).ok_or(StoreError::Duplicate),
            Err(e) => Err(StoreError::from_claim_insert(e)),
        }
    }

    /// Marks promotions whose wall-clock expiry has passed as inactive.
    /// Returns the number of rows updated. Driven by the expiry-sweep job.
    pub async fn deactivate_expired_promotions(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE promotion SET active = false WHERE active AND expires_at <= now()",
        )
        .execute(&self.primary)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_active_claims(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT count(*) FROM claim WHERE legacy_claimed AND NOT redeemed",
        )
        .fetch_one(self.read_pool())
        .await?;
        Ok(row.0)
    }
}

fn provider_str(provider: WalletProvider) -> &'static str {
    match provider {
        WalletProvider::Uphold => "uphold",
    }
}

pub(crate) fn promotion_kind_from_str(s: &str) -> PromotionKind {
    match s {
        "ads" => PromotionKind::Ads,
        _ => PromotionKind::Ugp,
    }
}

pub(crate) fn grant_kind_from_promotion(kind: &str, platform: &str) -> Option<GrantKind> {
    // Legacy rename: ugp + platform=android -> android, applied only here.
    match (kind, platform) {
        ("ugp", "android") => Some(GrantKind::Android),
        (k, _) => GrantKind::from_str(k),
    }
}

#[allow(dead_code)]
pub(crate) fn wallet_provider_from_str(s: &str) -> Option<WalletProvider> {
    match s {
        "uphold" => Some(WalletProvider::Uphold),
        _ => None,
    }
}
