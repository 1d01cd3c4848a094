//! End-to-end claim/redeem scenarios against a live Postgres instance named
//! by `TEST_DATABASE_URL`. Each test no-ops (with a message on stderr) when
//! the variable is unset, so the suite stays green without infrastructure.
//! Fixture rows are inserted with raw `sqlx` queries directly against a
//! scratch pool, since `Store` deliberately exposes no promotion-minting
//! API of its own (that belongs to an upstream pipeline out of scope here).

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use grants_core::wallet::mock::{MockCustodialWallet, MockCustodialWalletFactory};
use grants_core::wallet::HotWalletHandle;
use grants_core::{
    model::{Wallet, WalletProvider},
    safemode::{MemoryBreaker, RedemptionGate},
    store::Store,
    voucher::{Ed25519Signer, VoucherSigner},
    ClaimEngine, ClaimError, FailureBreaker, RedeemEngine, RedeemEngineConfig, RedeemError,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

const SETTLEMENT_DESTINATION: &str = "settlement-address-1";
const NOMINAL_CURRENCY: &str = "BAT";

async fn fixture_pool(db_url: &str) -> PgPool {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .expect("connect fixture pool")
}

async fn insert_wallet_row(pool: &PgPool, wallet: &Wallet) {
    sqlx::query(
        "INSERT INTO wallet (wallet_id, provider, provider_id, public_key_hex, altcurrency) \
         VALUES ($1, 'uphold', $2, $3, $4)",
    )
    .bind(wallet.wallet_id)
    .bind(&wallet.provider_id)
    .bind(&wallet.public_key_hex)
    .bind(&wallet.altcurrency)
    .execute(pool)
    .await
    .expect("insert wallet fixture");
}

async fn insert_ugp_promotion(pool: &PgPool, remaining: i64, value: Decimal) -> Uuid {
    let promotion_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO promotion (promotion_id, kind, approximate_value, remaining_vouchers, expires_at) \
         VALUES ($1, 'ugp', $2, $3, $4)",
    )
    .bind(promotion_id)
    .bind(value)
    .bind(remaining)
    .bind(Utc::now() + Duration::days(30))
    .execute(pool)
    .await
    .expect("insert ugp promotion fixture");
    promotion_id
}

/// The minting pipeline pre-creates one unclaimed claim row per
/// (promotion, wallet) pair; `claim_promotion` still decrements
/// `remaining_vouchers` (set to 1 here) and then flips `legacy_claimed`
/// on the pre-existing row rather than inserting a new one.
async fn insert_ads_promotion_with_claim(pool: &PgPool, wallet_id: Uuid, value: Decimal) -> Uuid {
    let promotion_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO promotion (promotion_id, kind, approximate_value, remaining_vouchers, expires_at) \
         VALUES ($1, 'ads', $2, 1, $3)",
    )
    .bind(promotion_id)
    .bind(value)
    .bind(Utc::now() + Duration::days(30))
    .execute(pool)
    .await
    .expect("insert ads promotion fixture");

    sqlx::query(
        "INSERT INTO claim (promotion_id, wallet_id, approximate_value, legacy_claimed) \
         VALUES ($1, $2, $3, false)",
    )
    .bind(promotion_id)
    .bind(wallet_id)
    .bind(value)
    .execute(pool)
    .await
    .expect("insert pre-minted ads claim fixture");

    promotion_id
}

fn test_wallet(public_key_hex: String) -> Wallet {
    Wallet {
        wallet_id: Uuid::new_v4(),
        provider: WalletProvider::Uphold,
        provider_id: format!("card-{}", Uuid::new_v4()),
        public_key_hex,
        altcurrency: NOMINAL_CURRENCY.to_string(),
    }
}

#[derive(Serialize)]
struct TestTxPayload {
    id: String,
    currency: String,
    amount: Decimal,
    destination: String,
}

fn sign_tx_blob(signer: &Ed25519Signer, amount: Decimal, destination: &str) -> Vec<u8> {
    let payload = TestTxPayload {
        id: Uuid::new_v4().to_string(),
        currency: NOMINAL_CURRENCY.to_string(),
        amount,
        destination: destination.to_string(),
    };
    let payload_bytes = serde_json::to_vec(&payload).expect("payload always serializes");
    let payload_b64 = STANDARD.encode(&payload_bytes);
    let signature = signer.sign(&payload_bytes);
    let sig_b64 = STANDARD.encode(signature);
    format!("{payload_b64}.{sig_b64}").into_bytes()
}

/// Wires up a `RedeemEngine` whose user-facing wallet client and hot wallet
/// are two independent mocks, so debiting one never perturbs the other.
fn build_redeem_engine(
    store: Store,
    user_mock: Arc<MockCustodialWallet>,
    hot_mock: Arc<MockCustodialWallet>,
) -> RedeemEngine {
    let wallet_factory = Arc::new(MockCustodialWalletFactory { shared: user_mock });
    let hot_wallet = HotWalletHandle::new(hot_mock);
    let gate = RedemptionGate::new();
    let breaker = FailureBreaker::new(Arc::new(MemoryBreaker::new()), gate.clone(), 3, 60);
    RedeemEngine::new(
        store,
        hot_wallet,
        wallet_factory,
        gate,
        breaker,
        RedeemEngineConfig {
            nominal_currency: NOMINAL_CURRENCY.to_string(),
            settlement_destination: SETTLEMENT_DESTINATION.to_string(),
            lower_tx_limit: Decimal::new(1, 2),
            upper_tx_limit: Decimal::new(1_000_00, 2),
        },
    )
}

macro_rules! require_test_db {
    () => {
        match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("skipping: TEST_DATABASE_URL not set");
                return;
            }
        }
    };
}

#[tokio::test]
async fn s1_happy_redeem() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let signer = Ed25519Signer::generate();
    let public_key_hex = hex::encode(signer.verifying_key().to_bytes());
    let wallet = test_wallet(public_key_hex.clone());
    insert_wallet_row(&pool, &wallet).await;

    let promotion_id = insert_ugp_promotion(&pool, 2, Decimal::new(30, 0)).await;

    let claim_engine = ClaimEngine::new(store.clone());
    claim_engine
        .claim(&wallet, promotion_id)
        .await
        .expect("claim succeeds");

    let user_mock = Arc::new(MockCustodialWallet::new(public_key_hex, Decimal::new(100, 0)));
    let hot_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::new(30, 0)));
    let redeem_engine = build_redeem_engine(store, user_mock, hot_mock.clone());

    let blob = sign_tx_blob(&signer, Decimal::new(10, 0), SETTLEMENT_DESTINATION);
    let outcome = redeem_engine
        .redeem(&wallet, &blob)
        .await
        .expect("redeem succeeds");

    assert_eq!(outcome.grant_total, Decimal::new(30, 0));
    assert_eq!(outcome.altcurrency, NOMINAL_CURRENCY);
    assert_eq!(hot_mock.transfers.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn s2_second_claim_same_wallet() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let wallet = test_wallet(hex::encode(Ed25519Signer::generate().verifying_key().to_bytes()));
    insert_wallet_row(&pool, &wallet).await;
    let promotion_id = insert_ugp_promotion(&pool, 2, Decimal::new(30, 0)).await;

    let claim_engine = ClaimEngine::new(store.clone());
    claim_engine
        .claim(&wallet, promotion_id)
        .await
        .expect("first claim succeeds");

    let second = claim_engine.claim(&wallet, promotion_id).await;
    assert!(matches!(second, Err(ClaimError::AlreadyClaimed)));

    let promotion = store.get_promotion(promotion_id).await.expect("read promotion");
    assert_eq!(promotion.remaining_vouchers, 1);
}

#[tokio::test]
async fn s3_last_voucher_race() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let wallet_a = test_wallet(hex::encode(Ed25519Signer::generate().verifying_key().to_bytes()));
    let wallet_b = test_wallet(hex::encode(Ed25519Signer::generate().verifying_key().to_bytes()));
    insert_wallet_row(&pool, &wallet_a).await;
    insert_wallet_row(&pool, &wallet_b).await;
    let promotion_id = insert_ugp_promotion(&pool, 1, Decimal::new(10, 0)).await;

    let claim_engine = ClaimEngine::new(store.clone());
    let (result_a, result_b) = tokio::join!(
        claim_engine.claim(&wallet_a, promotion_id),
        claim_engine.claim(&wallet_b, promotion_id),
    );

    let successes = [&result_a, &result_b].into_iter().filter(|r| r.is_ok()).count();
    let losses = [&result_a, &result_b]
        .into_iter()
        .filter(|r| matches!(r, Err(ClaimError::NoLongerAvailable)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(losses, 1);

    let promotion = store.get_promotion(promotion_id).await.expect("read promotion");
    assert_eq!(promotion.remaining_vouchers, 0);
}

#[tokio::test]
async fn s4_replay_redeem_does_not_double_spend() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let signer = Ed25519Signer::generate();
    let public_key_hex = hex::encode(signer.verifying_key().to_bytes());
    let wallet = test_wallet(public_key_hex.clone());
    insert_wallet_row(&pool, &wallet).await;
    let promotion_id = insert_ugp_promotion(&pool, 1, Decimal::new(30, 0)).await;

    ClaimEngine::new(store.clone())
        .claim(&wallet, promotion_id)
        .await
        .expect("claim succeeds");

    let user_mock = Arc::new(MockCustodialWallet::new(public_key_hex, Decimal::new(100, 0)));
    let hot_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::new(30, 0)));
    let redeem_engine = build_redeem_engine(store.clone(), user_mock, hot_mock.clone());

    let blob = sign_tx_blob(&signer, Decimal::new(10, 0), SETTLEMENT_DESTINATION);
    redeem_engine.redeem(&wallet, &blob).await.expect("first redeem succeeds");

    // The same blob replayed finds the claim already redeemed and is
    // routed through `redeem_claim`'s CAS, which affects zero rows and
    // surfaces as `AlreadyRedeemed` rather than settling a second time.
    let replay = redeem_engine.redeem(&wallet, &blob).await;
    assert!(matches!(replay, Err(RedeemError::AlreadyRedeemed)));
    assert_eq!(hot_mock.transfers.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn s5_drain_of_two_ads_grants() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let wallet = test_wallet(hex::encode(Ed25519Signer::generate().verifying_key().to_bytes()));
    insert_wallet_row(&pool, &wallet).await;

    let promotion_1 = insert_ads_promotion_with_claim(&pool, wallet.wallet_id, Decimal::new(10, 0)).await;
    let promotion_2 = insert_ads_promotion_with_claim(&pool, wallet.wallet_id, Decimal::new(10, 0)).await;
    let ugp_promotion = insert_ugp_promotion(&pool, 1, Decimal::new(15, 0)).await;

    let claim_engine = ClaimEngine::new(store.clone());
    claim_engine.claim(&wallet, promotion_1).await.expect("claim c1");
    claim_engine.claim(&wallet, promotion_2).await.expect("claim c2");
    claim_engine.claim(&wallet, ugp_promotion).await.expect("claim ugp");

    let user_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::ZERO));
    let hot_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::new(20, 0)));
    let redeem_engine = build_redeem_engine(store.clone(), user_mock, hot_mock.clone());

    let anonymous_destination = format!("anon-{}", Uuid::new_v4());
    let outcome = redeem_engine
        .drain(&wallet, &anonymous_destination)
        .await
        .expect("drain succeeds");
    assert_eq!(outcome.grant_total, Decimal::new(20, 0));

    let transfers = hot_mock.transfers.lock().unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].1, Decimal::new(20, 0));
    assert_eq!(transfers[0].2, anonymous_destination);
    drop(transfers);

    let second = redeem_engine.drain(&wallet, &anonymous_destination).await;
    assert!(matches!(second, Err(RedeemError::AlreadyRedeemed)));

    // The ugp claim is a different kind and is left untouched by the drain.
    let remaining = store
        .list_active_claims(wallet.wallet_id, grants_core::store::KindFilter::Any, NOMINAL_CURRENCY)
        .await
        .expect("read unredeemed claims");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].promotion_id, ugp_promotion);
}

#[tokio::test]
async fn redeem_race_on_same_claim_succeeds_exactly_once() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let signer = Ed25519Signer::generate();
    let public_key_hex = hex::encode(signer.verifying_key().to_bytes());
    let wallet = test_wallet(public_key_hex.clone());
    insert_wallet_row(&pool, &wallet).await;
    let promotion_id = insert_ugp_promotion(&pool, 1, Decimal::new(30, 0)).await;

    ClaimEngine::new(store.clone())
        .claim(&wallet, promotion_id)
        .await
        .expect("claim succeeds");

    let user_mock = Arc::new(MockCustodialWallet::new(public_key_hex, Decimal::new(100, 0)));
    let hot_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::new(30, 0)));
    let redeem_engine =
        Arc::new(build_redeem_engine(store.clone(), user_mock, hot_mock.clone()));

    // Both attempts race to redeem the same wallet's single claim. Whichever
    // commits `redeem_claim` first wins; the other's `UPDATE ... WHERE NOT
    // redeemed` affects zero rows and surfaces as `already_redeemed`,
    // whether it reaches the CAS via the unredeemed-selection path or via
    // the already-redeemed replay path — either way it never transfers
    // funds a second time.
    let blob_a = sign_tx_blob(&signer, Decimal::new(10, 0), SETTLEMENT_DESTINATION);
    let blob_b = blob_a.clone();
    let wallet_a = wallet.clone();
    let wallet_b = wallet.clone();
    let engine_a = redeem_engine.clone();
    let engine_b = redeem_engine.clone();
    let (result_a, result_b) = tokio::join!(
        async move { engine_a.redeem(&wallet_a, &blob_a).await },
        async move { engine_b.redeem(&wallet_b, &blob_b).await },
    );

    let successes = [&result_a, &result_b].into_iter().filter(|r| r.is_ok()).count();
    let losses = [&result_a, &result_b]
        .into_iter()
        .filter(|r| matches!(r, Err(RedeemError::AlreadyRedeemed)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(losses, 1);
    assert_eq!(hot_mock.transfers.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn s6_hot_wallet_short_trips_safe_mode() {
    let db_url = require_test_db!();
    let pool = fixture_pool(&db_url).await;
    let store = Store::connect(&db_url, None).await.expect("connect store");
    store.migrate().await.expect("migrate");

    let signer = Ed25519Signer::generate();
    let public_key_hex = hex::encode(signer.verifying_key().to_bytes());
    let wallet = test_wallet(public_key_hex.clone());
    insert_wallet_row(&pool, &wallet).await;
    let promotion_id = insert_ugp_promotion(&pool, 1, Decimal::new(30, 0)).await;

    ClaimEngine::new(store.clone())
        .claim(&wallet, promotion_id)
        .await
        .expect("claim succeeds");

    let user_mock = Arc::new(MockCustodialWallet::new(public_key_hex, Decimal::new(100, 0)));
    // Hot wallet only has 25 spendable against a 30-value claim.
    let hot_mock = Arc::new(MockCustodialWallet::new(String::new(), Decimal::new(25, 0)));
    let redeem_engine = build_redeem_engine(store.clone(), user_mock, hot_mock);

    let blob = sign_tx_blob(&signer, Decimal::new(10, 0), SETTLEMENT_DESTINATION);
    let first = redeem_engine.redeem(&wallet, &blob).await;
    assert!(matches!(first, Err(RedeemError::HotWalletInsufficient)));

    // Claim state is unaffected: the shortfall is caught before redeem_claim.
    let remaining = store
        .list_active_claims(wallet.wallet_id, grants_core::store::KindFilter::Any, NOMINAL_CURRENCY)
        .await
        .expect("read unredeemed claims");
    assert_eq!(remaining.len(), 1);

    // Every subsequent attempt, even from an unrelated wallet, now fails
    // with the tripped gate rather than touching the store at all.
    let other_wallet = test_wallet(hex::encode(Ed25519Signer::generate().verifying_key().to_bytes()));
    let second = redeem_engine.redeem(&other_wallet, &blob).await;
    assert!(matches!(second, Err(RedeemError::SafeMode)));
}
