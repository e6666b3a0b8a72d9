// End-to-end rent collection against the in-memory ledger

use blockchain::mock::{MockLedger, FEE_PER_SIGNATURE};
use blockchain::RetryPolicy;
use reclaimer::{PacingPolicy, RentCollector};
use shared::models::{status, ProgramVariant, ProgressEvent};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const FEE_PAYER_FUNDS: u64 = 10_000_000_000;

struct Harness {
    ledger: Arc<MockLedger>,
    collector: RentCollector,
    fee_payer: Pubkey,
    wallets: Vec<Pubkey>,
}

fn harness(wallet_count: usize, pacing: PacingPolicy) -> Harness {
    let ledger = Arc::new(MockLedger::new());
    let fee_payer = Keypair::new();
    ledger.set_balance(&fee_payer.pubkey(), FEE_PAYER_FUNDS);

    let retry = RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
    };
    let mut collector = RentCollector::new()
        .with_ledger(ledger.clone())
        .with_retry(retry)
        .with_pacing(pacing);
    collector.set_fee_payer(&fee_payer.to_base58_string()).unwrap();

    let keypairs: Vec<Keypair> = (0..wallet_count).map(|_| Keypair::new()).collect();
    let text = keypairs
        .iter()
        .map(|k| k.to_base58_string())
        .collect::<Vec<_>>()
        .join("\n");
    collector.load_from_text(&text).unwrap();

    Harness {
        ledger,
        collector,
        fee_payer: fee_payer.pubkey(),
        wallets: keypairs.iter().map(|k| k.pubkey()).collect(),
    }
}

#[tokio::test]
async fn test_two_wallet_scenario() {
    let mut h = harness(2, PacingPolicy::none());
    let (x, y) = (h.wallets[0], h.wallets[1]);
    let x_account = h
        .ledger
        .add_token_account(&x, ProgramVariant::Standard, 1_000, 2_039_280);
    h.ledger.set_balance(&y, 500_000);

    let mut events: Vec<ProgressEvent> = Vec::new();
    let summary = h
        .collector
        .process_all_wallets(|event| events.push(event))
        .await
        .unwrap();

    assert_eq!(summary.total_wallets, 2);
    assert_eq!(summary.successful_wallets, 2);
    assert_eq!(summary.failed_wallets, 0);
    assert_eq!(summary.total_recovered, 2_539_280);
    assert!(!summary.cancelled);

    let x_result = &summary.results[0];
    assert_eq!(x_result.wallet_id, x.to_string());
    assert_eq!(x_result.token_accounts_closed, 1);
    assert_eq!(x_result.rent_recovered, 2_039_280);
    assert_eq!(x_result.sol_transferred, 0);
    assert!(x_result.accounts[0].burned);

    let y_result = &summary.results[1];
    assert_eq!(y_result.token_accounts_closed, 0);
    assert_eq!(y_result.sol_transferred, 500_000);

    assert!(!h.ledger.token_account_exists(&x_account));
    assert_eq!(h.ledger.balance_of(&y), 0);

    // burn, close and sweep, each signed by fee payer and owner
    let fees = 3 * 2 * FEE_PER_SIGNATURE;
    assert_eq!(
        h.ledger.balance_of(&h.fee_payer),
        FEE_PAYER_FUNDS - fees + 2_539_280
    );

    let statuses: Vec<(usize, &str)> = events
        .iter()
        .map(|e| (e.current, e.status.as_str()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (1, status::PROCESSING),
            (1, status::COMPLETED),
            (2, status::PROCESSING),
            (2, status::COMPLETED),
        ]
    );
    assert!(events.iter().all(|e| e.total == 2));

    let views = h.collector.wallets();
    assert_eq!(views[0].rent_amount, 2_039_280);
    assert!(views[0].can_close);
    assert!(!views[1].can_close);
}

#[tokio::test]
async fn test_failed_sweep_is_isolated_to_its_wallet() {
    let mut h = harness(2, PacingPolicy::none());
    let (x, y) = (h.wallets[0], h.wallets[1]);
    h.ledger
        .add_token_account(&x, ProgramVariant::Extended, 1_000, 2_039_280);
    h.ledger.set_balance(&y, 500_000);
    h.ledger.fail_transactions_signed_by(&y);

    let mut events: Vec<ProgressEvent> = Vec::new();
    let summary = h
        .collector
        .process_all_wallets(|event| events.push(event))
        .await
        .unwrap();

    assert_eq!(summary.successful_wallets, 1);
    assert_eq!(summary.failed_wallets, 1);
    assert_eq!(summary.total_recovered, 2_039_280);

    assert!(!summary.results[0].failed);
    assert_eq!(summary.results[0].rent_recovered, 2_039_280);
    assert!(summary.results[1].failed);
    assert!(summary.results[1].error.is_some());
    assert_eq!(h.ledger.balance_of(&y), 500_000);

    assert_eq!(events.last().unwrap().status, status::FAILED);
    assert_eq!(events.last().unwrap().wallet_id, y.to_string());
}

#[tokio::test]
async fn test_zero_lamport_accounts_are_never_touched() {
    let mut h = harness(1, PacingPolicy::none());
    let owner = h.wallets[0];
    let drained = h.ledger.add_token_account(&owner, ProgramVariant::Standard, 0, 0);
    let underfunded = h
        .ledger
        .add_token_account(&owner, ProgramVariant::Standard, 0, 1_000);

    let summary = h.collector.process_all_wallets(|_| {}).await.unwrap();

    let result = &summary.results[0];
    assert_eq!(result.token_accounts_closed, 1);
    assert_eq!(result.rent_recovered, 1_000);
    assert!(result
        .accounts
        .iter()
        .all(|a| a.account_id != drained.to_string()));
    assert!(h.ledger.token_account_exists(&drained));
    assert!(!h.ledger.token_account_exists(&underfunded));
    assert_eq!(h.collector.wallets()[0].rent_amount, 1_000);
}

#[tokio::test]
async fn test_process_single_wallet() {
    let mut h = harness(2, PacingPolicy::none());
    let y = h.wallets[1];
    h.ledger.set_balance(&y, 750_000);

    let result = h.collector.process_single_wallet(1).await.unwrap();
    assert_eq!(result.wallet_id, y.to_string());
    assert_eq!(result.sol_transferred, 750_000);

    assert!(h.collector.process_single_wallet(2).await.is_err());
}

#[tokio::test]
async fn test_dry_run_discovers_without_submitting() {
    let mut h = harness(2, PacingPolicy::none());
    let x = h.wallets[0];
    h.ledger
        .add_token_account(&x, ProgramVariant::Standard, 5, 2_039_280);
    h.ledger
        .add_token_account(&x, ProgramVariant::Extended, 0, 2_074_080);
    h.ledger.set_balance(&x, 42_000);

    let reports = h
        .collector
        .discover_all(CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].eligible_accounts, 2);
    assert_eq!(reports[0].wallet.balance, 42_000);
    assert_eq!(reports[0].wallet.rent_amount, 2_039_280 + 2_074_080);
    assert!(reports[0].wallet.can_close);
    assert_eq!(reports[1].eligible_accounts, 0);
    assert!(reports.iter().all(|r| r.error.is_none()));
    assert!(h.ledger.submitted_transactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pacing_between_wallets_and_batches() {
    let pacing = PacingPolicy {
        wallet_delay: Duration::from_millis(100),
        batch_size: 2,
        batch_delay: Duration::from_millis(1_000),
    };
    let mut h = harness(3, pacing);

    let started = Instant::now();
    let summary = h.collector.process_all_wallets(|_| {}).await.unwrap();

    assert_eq!(summary.successful_wallets, 3);
    // after wallet 1: 100ms, after wallet 2 (batch boundary): 1100ms, none after the last
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1_200));
    assert!(elapsed < Duration::from_millis(1_300));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_at_wallet_boundary() {
    let pacing = PacingPolicy {
        wallet_delay: Duration::from_secs(30),
        batch_size: 0,
        batch_delay: Duration::ZERO,
    };
    let mut h = harness(3, pacing);
    for wallet in &h.wallets {
        h.ledger.set_balance(wallet, 100_000);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut events: Vec<ProgressEvent> = Vec::new();
    let started = Instant::now();

    let summary = h
        .collector
        .process_all_wallets_until(cancel, |event| {
            if event.status == status::COMPLETED {
                trigger.cancel();
            }
            events.push(event);
        })
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.successful_wallets, 1);
    assert_eq!(summary.total_recovered, 100_000);
    assert!(started.elapsed() < Duration::from_secs(30));

    assert_eq!(events.last().unwrap().status, status::CANCELLED);
    assert_eq!(events.last().unwrap().current, 2);
    // untouched wallets keep their funds
    assert_eq!(h.ledger.balance_of(&h.wallets[1]), 100_000);
    assert_eq!(h.ledger.balance_of(&h.wallets[2]), 100_000);
}
