use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no active promotion")]
    NoActivePromotion,
    #[error("duplicate claim")]
    Duplicate,
    #[error("claim does not match expected state")]
    NotMatching,
    #[error("promotion not found")]
    NotFound,
    #[error("internal invariant violation: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// Postgres error code `23505` is a unique-constraint violation — the
    /// `(promotion_id, wallet_id)` re-claim race.
    pub(crate) fn from_claim_insert(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Duplicate;
            }
        }
        StoreError::Sqlx(err)
    }
}
