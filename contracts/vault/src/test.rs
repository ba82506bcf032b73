#![cfg(test)]

use super::*;
use soroban_sdk::{
    testutils::{Address as _, Events, Ledger},
    token::{Client as TokenClient, StellarAssetClient},
    Address, Env, TryIntoVal,
};

use pngy_asset_registry as registry;
use pngy_oracle_adapter as oracle;
use pngy_rebalance_strategy as strategy;
use pngy_swap_executor as swapx;

const ONE: i128 = PRECISION;
const NOW: u64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

// Price feed with per-asset posted prices (the shape the oracle adapter
// queries).
#[contract]
pub struct MockFeed;

#[contractimpl]
impl MockFeed {
    pub fn set_price(env: Env, asset: Address, price: i128, timestamp: u64) {
        env.storage()
            .persistent()
            .set(&asset, &oracle::PriceData { price, timestamp });
    }

    pub fn lastprice(env: Env, asset: Address) -> Option<oracle::PriceData> {
        env.storage().persistent().get(&asset)
    }

    pub fn price(env: Env, asset: Address, timestamp: u64) -> Option<oracle::PriceData> {
        let data: Option<oracle::PriceData> = env.storage().persistent().get(&asset);
        data.filter(|d| d.timestamp <= timestamp)
    }
}

#[contracttype]
pub enum VenueKey {
    Base,
    Rate(Address, Address),
}

// Liquidity venue that actually moves base tokens: buys pull base from the
// trader, sells pay base out of the venue's own inventory. RWA legs are
// numbers only - the vault tracks those balances itself.
#[contract]
pub struct MockVenue;

#[contractimpl]
impl MockVenue {
    pub fn init(env: Env, base: Address) {
        env.storage().instance().set(&VenueKey::Base, &base);
    }

    pub fn set_rate(env: Env, token_in: Address, token_out: Address, rate: i128) {
        env.storage()
            .persistent()
            .set(&VenueKey::Rate(token_in, token_out), &rate);
    }

    pub fn quote(env: Env, token_in: Address, token_out: Address, amount_in: i128) -> i128 {
        let rate: i128 = env
            .storage()
            .persistent()
            .get(&VenueKey::Rate(token_in, token_out))
            .unwrap_or(0);
        amount_in * rate / ONE
    }

    pub fn swap(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        _min_amount_out: i128,
    ) -> i128 {
        let out = Self::quote(env.clone(), token_in.clone(), token_out.clone(), amount_in);
        let base: Address = env.storage().instance().get(&VenueKey::Base).unwrap();
        let token = TokenClient::new(&env, &base);
        let self_addr = env.current_contract_address();
        if token_in == base {
            token.transfer(&trader, &self_addr, &amount_in);
        }
        if token_out == base {
            token.transfer(&self_addr, &trader, &out);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Setup {
    env: Env,
    vault: PngyVaultClient<'static>,
    vault_id: Address,
    base: Address,
    base_admin: StellarAssetClient<'static>,
    base_token: TokenClient<'static>,
    oracle: oracle::OracleAdapterClient<'static>,
    feed: MockFeedClient<'static>,
    feed_id: Address,
    owner: Address,
    rebalancer: Address,
    user: Address,
    rwa_a: Address,
    rwa_b: Address,
    rwa_c: Address,
}

fn setup() -> Setup {
    let env = Env::default();
    env.mock_all_auths();
    env.budget().reset_unlimited();
    env.ledger().with_mut(|li| li.timestamp = NOW);

    let owner = Address::generate(&env);
    let rebalancer = Address::generate(&env);
    let user = Address::generate(&env);

    let base = env.register_stellar_asset_contract(owner.clone());
    let base_admin = StellarAssetClient::new(&env, &base);
    let base_token = TokenClient::new(&env, &base);

    let rwa_a = Address::generate(&env);
    let rwa_b = Address::generate(&env);
    let rwa_c = Address::generate(&env);

    // Oracle adapter with one feed serving every RWA.
    let oracle_id = env.register_contract(None, oracle::OracleAdapter);
    let oracle_client = oracle::OracleAdapterClient::new(&env, &oracle_id);
    oracle_client.initialize(&owner, &oracle::DEFAULT_STALENESS_SECS);

    let feed_id = env.register_contract(None, MockFeed);
    let feed = MockFeedClient::new(&env, &feed_id);
    feed.set_price(&rwa_a, &(2 * ONE), &NOW); // $2.00
    feed.set_price(&rwa_b, &ONE, &NOW); // $1.00
    feed.set_price(&rwa_c, &ONE, &NOW); // $1.00
    for asset in [&rwa_a, &rwa_b, &rwa_c] {
        oracle_client.configure_feeds(asset, &Some(feed_id.clone()), &None, &0);
    }

    // Registry with all three RWAs eligible.
    let registry_id = env.register_contract(None, registry::AssetRegistry);
    let registry_client = registry::AssetRegistryClient::new(&env, &registry_id);
    registry_client.initialize(&owner);
    registry_client.register_asset(&rwa_a, &symbol_short!("treasury"), &feed_id);
    registry_client.register_asset(&rwa_b, &symbol_short!("credit"), &feed_id);
    registry_client.register_asset(&rwa_c, &symbol_short!("realestat"), &feed_id);

    // Venue priced consistently with the oracle; the sell leg for rwa_b is
    // intentionally left unset (the atomicity test relies on it missing).
    let venue_id = env.register_contract(None, MockVenue);
    let venue = MockVenueClient::new(&env, &venue_id);
    venue.init(&base);
    venue.set_rate(&base, &rwa_a, &(ONE / 2)); // $2 per unit
    venue.set_rate(&rwa_a, &base, &(2 * ONE));
    venue.set_rate(&base, &rwa_b, &ONE); // $1 per unit
    venue.set_rate(&base, &rwa_c, &ONE);
    venue.set_rate(&rwa_c, &base, &ONE);

    let executor_id = env.register_contract(None, swapx::SwapExecutor);
    let executor_client = swapx::SwapExecutorClient::new(&env, &executor_id);
    executor_client.initialize(&owner, &venue_id, &50);

    let vault_id = env.register_contract(None, PngyVault);
    let vault = PngyVaultClient::new(&env, &vault_id);
    vault.initialize(
        &owner,
        &rebalancer,
        &base,
        &oracle_id,
        &executor_id,
        &registry_id,
    );

    // Inventory: the user deposits, the venue settles sells in base.
    base_admin.mint(&user, &(1_000_000 * ONE));
    base_admin.mint(&venue_id, &(1_000_000 * ONE));

    Setup {
        env,
        vault,
        vault_id,
        base,
        base_admin,
        base_token,
        oracle: oracle_client,
        feed,
        feed_id,
        owner,
        rebalancer,
        user,
        rwa_a,
        rwa_b,
        rwa_c,
    }
}

fn topic_count(env: &Env, contract: &Address, topic: Symbol) -> u32 {
    let expected: Vec<Val> = (topic,).into_val(env);
    let mut count = 0;
    for (source, topics, _data) in env.events().all().iter() {
        if source == *contract && topics == expected {
            count += 1;
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Deposits & share accounting
// ---------------------------------------------------------------------------

#[test]
fn test_initial_state() {
    let s = setup();
    assert_eq!(s.vault.get_version(), 1);
    assert_eq!(s.vault.get_owner(), s.owner);
    assert_eq!(s.vault.get_rebalancer(), s.rebalancer);
    assert!(!s.vault.is_paused());
    assert!(!s.vault.is_circuit_breaker_active());
    assert_eq!(s.vault.get_reference_nav(), ONE);
    assert_eq!(s.vault.total_shares(), 0);
    assert_eq!(s.vault.share_price(), ONE);
}

#[test]
#[should_panic(expected = "Already initialized")]
fn test_double_initialize_panics() {
    let s = setup();
    s.vault.initialize(
        &s.owner,
        &s.rebalancer,
        &s.base,
        &s.feed_id,
        &s.feed_id,
        &s.feed_id,
    );
}

#[test]
fn test_first_deposit_mints_at_parity() {
    let s = setup();
    let shares = s.vault.deposit(&s.user, &(1000 * ONE), &s.user);

    // The event carries the exact deposit tuple (checked before any further
    // invocation so the event buffer still holds it).
    let expected: Vec<Val> = (symbol_short!("deposit"),).into_val(&s.env);
    let mut seen = false;
    for (source, topics, data) in s.env.events().all().iter() {
        if source == s.vault_id && topics == expected {
            let ev: DepositProcessed = data.try_into_val(&s.env).unwrap();
            assert_eq!(ev.sender, s.user);
            assert_eq!(ev.receiver, s.user);
            assert_eq!(ev.assets, 1000 * ONE);
            assert_eq!(ev.shares, 1000 * ONE);
            seen = true;
        }
    }
    assert!(seen);

    assert_eq!(shares, 1000 * ONE);
    assert_eq!(s.vault.get_balance(&s.user), 1000 * ONE);
    assert_eq!(s.vault.total_shares(), 1000 * ONE);
    assert_eq!(s.vault.total_assets(), 1000 * ONE);
    assert_eq!(s.vault.share_price(), ONE);
}

#[test]
fn test_minimum_deposit_boundary() {
    let s = setup();
    assert_eq!(
        s.vault.try_deposit(&s.user, &(MIN_DEPOSIT - 1), &s.user),
        Err(Ok(VaultError::BelowMinimumDeposit))
    );
    let shares = s.vault.deposit(&s.user, &MIN_DEPOSIT, &s.user);
    assert_eq!(shares, MIN_DEPOSIT);

    assert_eq!(
        s.vault.try_deposit(&s.user, &0, &s.user),
        Err(Ok(VaultError::ZeroAmount))
    );
}

#[test]
fn test_deposit_blocked_while_paused() {
    let s = setup();
    s.vault.pause();
    assert_eq!(
        s.vault.try_deposit(&s.user, &(1000 * ONE), &s.user),
        Err(Ok(VaultError::VaultPaused))
    );
}

#[test]
fn test_deposit_redeem_round_trip_at_stable_nav() {
    let s = setup();
    let before = s.base_token.balance(&s.user);
    let shares = s.vault.deposit(&s.user, &(1000 * ONE), &s.user);
    let assets = s.vault.redeem(&s.user, &shares, &s.user);
    assert_eq!(assets, 1000 * ONE);
    assert_eq!(s.base_token.balance(&s.user), before);
    assert_eq!(s.vault.total_shares(), 0);
}

#[test]
fn test_shares_proportional_after_yield() {
    let s = setup();
    s.vault.deposit(&s.user, &(1000 * ONE), &s.user);
    // Airdropped yield: NAV rises to 1.10.
    s.base_admin.mint(&s.vault_id, &(100 * ONE));
    assert_eq!(s.vault.share_price(), ONE * 110 / 100);

    let second = Address::generate(&s.env);
    s.base_admin.mint(&second, &(10_000 * ONE));
    let shares = s.vault.deposit(&second, &(550 * ONE), &second);
    assert_eq!(shares, 500 * ONE);
}

#[test]
fn test_share_supply_tracks_mint_and_burn() {
    let s = setup();
    let second = Address::generate(&s.env);
    s.base_admin.mint(&second, &(100_000 * ONE));

    s.vault.deposit(&s.user, &(2000 * ONE), &s.user);
    s.vault.deposit(&second, &(3000 * ONE), &second);
    s.vault.withdraw(&s.user, &(500 * ONE), &s.user);

    assert_eq!(
        s.vault.total_shares(),
        s.vault.get_balance(&s.user) + s.vault.get_balance(&second)
    );
    assert_eq!(s.vault.total_shares(), 4500 * ONE);
}

// ---------------------------------------------------------------------------
// Instant withdrawals
// ---------------------------------------------------------------------------

#[test]
fn test_instant_withdrawal_limits() {
    let s = setup();
    s.vault.deposit(&s.user, &(200_000 * ONE), &s.user);

    // Exactly at the instant limit: served immediately.
    let shares = s.vault.withdraw(&s.user, &INSTANT_WITHDRAWAL_LIMIT, &s.user);
    assert_eq!(shares, INSTANT_WITHDRAWAL_LIMIT);

    // One unit above: must queue.
    assert_eq!(
        s.vault
            .try_withdraw(&s.user, &(INSTANT_WITHDRAWAL_LIMIT + 1), &s.user),
        Err(Ok(VaultError::ExceedsInstantLimit))
    );

    // Above the absolute ceiling: rejected outright.
    assert_eq!(
        s.vault.try_withdraw(&s.user, &(MAX_WITHDRAWAL + 1), &s.user),
        Err(Ok(VaultError::ExceedsMaxWithdrawal))
    );
}

#[test]
fn test_withdraw_requires_shares() {
    let s = setup();
    s.vault.deposit(&s.user, &(1000 * ONE), &s.user);
    let stranger = Address::generate(&s.env);
    assert_eq!(
        s.vault.try_withdraw(&stranger, &(500 * ONE), &stranger),
        Err(Ok(VaultError::InsufficientShares))
    );
}

#[test]
fn test_withdraw_event_emitted() {
    let s = setup();
    s.vault.deposit(&s.user, &(1000 * ONE), &s.user);
    s.vault.withdraw(&s.user, &(600 * ONE), &s.user);
    assert_eq!(topic_count(&s.env, &s.vault_id, symbol_short!("withdraw")), 1);
}

// ---------------------------------------------------------------------------
// T+1 withdrawal queue
// ---------------------------------------------------------------------------

#[test]
fn test_queued_withdrawal_full_flow() {
    let s = setup();
    s.vault.deposit(&s.user, &(60_000 * ONE), &s.user);

    let id = s.vault.request_withdraw(&s.user, &(50_000 * ONE), &s.user);
    assert_eq!(id, 0);
    assert_eq!(s.vault.get_locked_shares(&s.user), 50_000 * ONE);
    assert_eq!(s.vault.get_available_balance(&s.user), 10_000 * ONE);
    // Shares stay in total supply until the claim burns them.
    assert_eq!(s.vault.total_shares(), 60_000 * ONE);

    // Too early.
    assert_eq!(
        s.vault.try_claim_withdraw(&s.user, &id),
        Err(Ok(VaultError::WithdrawalDelayNotElapsed))
    );

    // NAV moves after the request; the claim still pays the fixed quote.
    s.base_admin.mint(&s.vault_id, &(6_000 * ONE));

    s.env
        .ledger()
        .with_mut(|li| li.timestamp = NOW + WITHDRAWAL_DELAY_SECS);
    let before = s.base_token.balance(&s.user);
    let paid = s.vault.claim_withdraw(&s.user, &id);
    assert_eq!(topic_count(&s.env, &s.vault_id, symbol_short!("wdr_claim")), 1);
    assert_eq!(paid, 50_000 * ONE);
    assert_eq!(s.base_token.balance(&s.user), before + 50_000 * ONE);
    assert_eq!(s.vault.total_shares(), 10_000 * ONE);
    assert_eq!(s.vault.get_locked_shares(&s.user), 0);

    assert_eq!(
        s.vault.try_claim_withdraw(&s.user, &id),
        Err(Ok(VaultError::RequestAlreadyClaimed))
    );
}

#[test]
fn test_locked_shares_not_spendable() {
    let s = setup();
    s.vault.deposit(&s.user, &(20_000 * ONE), &s.user);
    let id = s.vault.request_withdraw(&s.user, &(15_000 * ONE), &s.user);

    // Only 5,000 shares remain spendable.
    assert_eq!(
        s.vault.try_withdraw(&s.user, &(6_000 * ONE), &s.user),
        Err(Ok(VaultError::InsufficientShares))
    );

    s.vault.cancel_withdraw(&s.user, &id);
    assert_eq!(s.vault.get_available_balance(&s.user), 20_000 * ONE);
    s.vault.withdraw(&s.user, &(6_000 * ONE), &s.user);
}

#[test]
fn test_claim_ownership_checks() {
    let s = setup();
    s.vault.deposit(&s.user, &(20_000 * ONE), &s.user);
    let id = s.vault.request_withdraw(&s.user, &(15_000 * ONE), &s.user);

    let stranger = Address::generate(&s.env);
    assert_eq!(
        s.vault.try_claim_withdraw(&stranger, &id),
        Err(Ok(VaultError::NotRequestOwner))
    );
    assert_eq!(
        s.vault.try_claim_withdraw(&s.user, &99),
        Err(Ok(VaultError::RequestNotFound))
    );
}

#[test]
fn test_request_respects_absolute_ceiling() {
    let s = setup();
    s.vault.deposit(&s.user, &(200_000 * ONE), &s.user);
    assert_eq!(
        s.vault
            .try_request_withdraw(&s.user, &(MAX_WITHDRAWAL + ONE), &s.user),
        Err(Ok(VaultError::ExceedsMaxWithdrawal))
    );
}

// ---------------------------------------------------------------------------
// Rebalancing
// ---------------------------------------------------------------------------

fn seed_two_asset_portfolio(s: &Setup) {
    // $100k in, half deployed: $30k into rwa_a at $2, $20k into rwa_b at $1.
    s.vault.deposit(&s.user, &(100_000 * ONE), &s.user);
    s.vault.add_rwa_asset(&s.rwa_a, &5000);
    s.vault.add_rwa_asset(&s.rwa_b, &5000);
    s.vault.rebalance(
        &s.rebalancer,
        &Vec::new(&s.env),
        &Vec::new(&s.env),
        &vec![&s.env, s.rwa_a.clone(), s.rwa_b.clone()],
        &vec![&s.env, 30_000 * ONE, 20_000 * ONE],
        &vec![&s.env, 5000u32, 5000u32],
    );
}

#[test]
fn test_rebalance_buys_update_holdings_and_nav() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    // The seed's last invocation is the rebalance itself.
    assert_eq!(topic_count(&s.env, &s.vault_id, symbol_short!("rebalance")), 1);

    // $30k at $2 -> 15k units; $20k at $1 -> 20k units.
    assert_eq!(s.vault.get_holding(&s.rwa_a).balance, 15_000 * ONE);
    assert_eq!(s.vault.get_holding(&s.rwa_b).balance, 20_000 * ONE);
    assert_eq!(s.vault.get_holding(&s.rwa_a).target_allocation_bps, 5000);

    // Venue traded at oracle-fair prices, so NAV is unchanged.
    assert_eq!(s.vault.total_assets(), 100_000 * ONE);
    assert_eq!(s.vault.share_price(), ONE);
    assert_eq!(s.base_token.balance(&s.vault_id), 50_000 * ONE);
}

#[test]
fn test_rebalance_sells_return_base() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // Sell 5k units of rwa_a at $2: $10k back to idle.
    s.vault.rebalance(
        &s.rebalancer,
        &vec![&s.env, s.rwa_a.clone()],
        &vec![&s.env, 5_000 * ONE],
        &Vec::new(&s.env),
        &Vec::new(&s.env),
        &vec![&s.env, 5000u32, 5000u32],
    );

    assert_eq!(s.vault.get_holding(&s.rwa_a).balance, 10_000 * ONE);
    assert_eq!(s.base_token.balance(&s.vault_id), 60_000 * ONE);
    assert_eq!(s.vault.total_assets(), 100_000 * ONE);
}

#[test]
fn test_rebalance_validation() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // Allocation sum must hit exactly 10000.
    assert_eq!(
        s.vault.try_rebalance(
            &s.rebalancer,
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &vec![&s.env, 5000u32, 5001u32],
        ),
        Err(Ok(VaultError::AllocationSumInvalid))
    );

    // Targets must cover every registered asset.
    assert_eq!(
        s.vault.try_rebalance(
            &s.rebalancer,
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &vec![&s.env, 10_000u32],
        ),
        Err(Ok(VaultError::ArrayLengthMismatch))
    );

    // Sell/amount arrays must align.
    assert_eq!(
        s.vault.try_rebalance(
            &s.rebalancer,
            &vec![&s.env, s.rwa_a.clone()],
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &vec![&s.env, 5000u32, 5000u32],
        ),
        Err(Ok(VaultError::ArrayLengthMismatch))
    );

    // Cannot sell more than the holding.
    assert_eq!(
        s.vault.try_rebalance(
            &s.rebalancer,
            &vec![&s.env, s.rwa_a.clone()],
            &vec![&s.env, 50_000 * ONE],
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &vec![&s.env, 5000u32, 5000u32],
        ),
        Err(Ok(VaultError::InsufficientHolding))
    );
}

#[test]
fn test_rebalance_requires_role() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    assert_eq!(
        s.vault.try_rebalance(
            &s.user,
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &Vec::new(&s.env),
            &vec![&s.env, 5000u32, 5000u32],
        ),
        Err(Ok(VaultError::Unauthorized))
    );
}

#[test]
fn test_failed_swap_reverts_whole_rebalance() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // rwa_b has no sell-side liquidity configured; batching a valid rwa_a
    // sell with the doomed rwa_b sell must leave no trace of either.
    let result = s.vault.try_rebalance(
        &s.rebalancer,
        &vec![&s.env, s.rwa_a.clone(), s.rwa_b.clone()],
        &vec![&s.env, 5_000 * ONE, 5_000 * ONE],
        &Vec::new(&s.env),
        &Vec::new(&s.env),
        &vec![&s.env, 5000u32, 5000u32],
    );
    assert!(result.is_err());

    assert_eq!(s.vault.get_holding(&s.rwa_a).balance, 15_000 * ONE);
    assert_eq!(s.vault.get_holding(&s.rwa_b).balance, 20_000 * ONE);
    assert_eq!(s.base_token.balance(&s.vault_id), 50_000 * ONE);
}

#[test]
fn test_strategy_drives_rebalance_end_to_end() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // Portfolio stands at 30%/20% of a $100k vault against 50%/50% targets.
    let strategy_id = s.env.register_contract(None, strategy::RebalanceStrategy);
    let strat = strategy::RebalanceStrategyClient::new(&s.env, &strategy_id);
    strat.initialize(&s.owner);

    let snapshots = vec![
        &s.env,
        strategy::AssetSnapshot {
            asset: s.rwa_a.clone(),
            current_allocation_bps: 3000,
            current_value: 30_000 * ONE,
            apy_bps: 450,
        },
        strategy::AssetSnapshot {
            asset: s.rwa_b.clone(),
            current_allocation_bps: 2000,
            current_value: 20_000 * ONE,
            apy_bps: 450,
        },
    ];
    let targets = vec![&s.env, 5000u32, 5000u32];

    let (needed, max_deviation) = strat.is_rebalance_needed(&snapshots, &targets);
    assert!(needed);
    assert_eq!(max_deviation, 3000);

    let trades = strat.generate_rebalance_trades(&snapshots, &targets, &(100_000 * ONE));
    assert_eq!(trades.len(), 2);
    let buy_a = trades.get_unchecked(0);
    let buy_b = trades.get_unchecked(1);
    assert_eq!(buy_a.action, strategy::TradeAction::Buy);
    assert_eq!(buy_a.value, 20_000 * ONE);
    assert_eq!(buy_b.action, strategy::TradeAction::Buy);
    assert_eq!(buy_b.value, 30_000 * ONE);

    // Execute the strategy's trade list through the vault.
    s.vault.rebalance(
        &s.rebalancer,
        &Vec::new(&s.env),
        &Vec::new(&s.env),
        &vec![&s.env, buy_a.asset.clone(), buy_b.asset.clone()],
        &vec![&s.env, buy_a.value, buy_b.value],
        &targets,
    );

    // $20k more of rwa_a at $2 and $30k more of rwa_b at $1; idle drained.
    assert_eq!(s.vault.get_holding(&s.rwa_a).balance, 25_000 * ONE);
    assert_eq!(s.vault.get_holding(&s.rwa_b).balance, 50_000 * ONE);
    assert_eq!(s.base_token.balance(&s.vault_id), 0);
    assert_eq!(s.vault.total_assets(), 100_000 * ONE);
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[test]
fn test_circuit_breaker_trips_on_nav_drop() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    s.vault.sync_nav();
    assert!(!s.vault.is_circuit_breaker_active());

    // rwa_a falls 20%: $30k of managed value becomes $24k, so NAV drops to
    // 0.94 - a 600 bps move against the 500 bps threshold.
    s.feed.set_price(&s.rwa_a, &(2 * ONE * 80 / 100), &NOW);
    let nav = s.vault.sync_nav();
    assert_eq!(topic_count(&s.env, &s.vault_id, symbol_short!("cb_trip")), 1);
    assert_eq!(nav, ONE * 94 / 100);
    assert!(s.vault.is_circuit_breaker_active());

    // Instant withdrawals above the reduced limit are refused...
    assert_eq!(
        s.vault.try_withdraw(&s.user, &(5_000 * ONE), &s.user),
        Err(Ok(VaultError::CircuitBreakerRestricted))
    );
    // ...the reduced limit itself still clears...
    s.vault
        .withdraw(&s.user, &DEFAULT_CIRCUIT_BREAKER_LIMIT, &s.user);
    // ...and the queue accepts the size the instant path refused.
    let id = s.vault.request_withdraw(&s.user, &(5_000 * ONE), &s.user);
    assert_eq!(s.vault.get_request(&id).shares, 5_000 * ONE);
}

#[test]
fn test_circuit_breaker_reset_reanchors_reference() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    s.feed.set_price(&s.rwa_a, &(2 * ONE * 80 / 100), &NOW);
    s.vault.sync_nav();
    assert!(s.vault.is_circuit_breaker_active());

    s.vault.reset_circuit_breaker();
    assert!(!s.vault.is_circuit_breaker_active());
    assert_eq!(s.vault.get_reference_nav(), ONE * 94 / 100);

    // Normal withdrawals work again.
    s.vault.withdraw(&s.user, &(5_000 * ONE), &s.user);
}

#[test]
fn test_small_nav_dip_does_not_trip() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    // 5% drop on rwa_a is a 1.5% NAV move - under the 5% threshold.
    s.feed.set_price(&s.rwa_a, &(2 * ONE * 95 / 100), &NOW);
    s.vault.sync_nav();
    assert!(!s.vault.is_circuit_breaker_active());
}

#[test]
fn test_reference_ratchets_to_new_highs() {
    let s = setup();
    s.vault.deposit(&s.user, &(10_000 * ONE), &s.user);
    s.base_admin.mint(&s.vault_id, &(1_000 * ONE));
    s.vault.sync_nav();
    assert_eq!(s.vault.get_reference_nav(), ONE * 110 / 100);
}

// ---------------------------------------------------------------------------
// Asset management
// ---------------------------------------------------------------------------

#[test]
fn test_add_asset_checks() {
    let s = setup();

    // Unregistered token.
    let unknown = Address::generate(&s.env);
    assert_eq!(
        s.vault.try_add_rwa_asset(&unknown, &1000),
        Err(Ok(VaultError::AssetNotEligible))
    );

    s.vault.add_rwa_asset(&s.rwa_a, &6000);
    assert_eq!(
        s.vault.try_add_rwa_asset(&s.rwa_a, &1000),
        Err(Ok(VaultError::AssetAlreadyAdded))
    );

    // 6000 + 5000 would cross 100%: rejected with no state change.
    assert_eq!(
        s.vault.try_add_rwa_asset(&s.rwa_b, &5000),
        Err(Ok(VaultError::AllocationOverflow))
    );
    assert_eq!(
        s.vault.try_get_holding(&s.rwa_b),
        Err(Ok(VaultError::AssetNotFound))
    );

    s.vault.add_rwa_asset(&s.rwa_b, &4000);
    assert_eq!(s.vault.list_rwa_assets().len(), 2);
}

#[test]
fn test_remove_asset_requires_empty_holding() {
    let s = setup();
    seed_two_asset_portfolio(&s);
    assert_eq!(
        s.vault.try_remove_rwa_asset(&s.rwa_a),
        Err(Ok(VaultError::NonZeroHolding))
    );
}

#[test]
fn test_remove_with_liquidation_redistributes_allocation() {
    let s = setup();
    s.vault.deposit(&s.user, &(100_000 * ONE), &s.user);
    s.vault.add_rwa_asset(&s.rwa_a, &5000);
    s.vault.add_rwa_asset(&s.rwa_b, &3000);
    s.vault.add_rwa_asset(&s.rwa_c, &2000);
    s.vault.rebalance(
        &s.rebalancer,
        &Vec::new(&s.env),
        &Vec::new(&s.env),
        &vec![&s.env, s.rwa_a.clone()],
        &vec![&s.env, 30_000 * ONE],
        &vec![&s.env, 5000u32, 3000u32, 2000u32],
    );
    assert_eq!(s.vault.get_holding(&s.rwa_a).balance, 15_000 * ONE);

    let idle_before = s.base_token.balance(&s.vault_id);
    s.vault.liquidate_rwa_asset(&s.rwa_a);

    // The $30k position came back as base.
    assert_eq!(
        s.base_token.balance(&s.vault_id),
        idle_before + 30_000 * ONE
    );
    assert_eq!(
        s.vault.try_get_holding(&s.rwa_a),
        Err(Ok(VaultError::AssetNotFound))
    );

    // 5000 bps redistributed pro-rata over 3000/2000, remainder to last.
    assert_eq!(s.vault.get_holding(&s.rwa_b).target_allocation_bps, 6000);
    assert_eq!(s.vault.get_holding(&s.rwa_c).target_allocation_bps, 4000);

    // NAV is unchanged by a fair-price liquidation.
    assert_eq!(s.vault.total_assets(), 100_000 * ONE);
}

#[test]
fn test_remove_empty_asset() {
    let s = setup();
    s.vault.add_rwa_asset(&s.rwa_a, &5000);
    s.vault.remove_rwa_asset(&s.rwa_a);
    assert_eq!(s.vault.list_rwa_assets().len(), 0);
}

// ---------------------------------------------------------------------------
// Pause & emergency withdrawals
// ---------------------------------------------------------------------------

#[test]
fn test_pause_blocks_withdrawals_until_emergency() {
    let s = setup();
    s.vault.deposit(&s.user, &(10_000 * ONE), &s.user);

    s.vault.pause();
    assert_eq!(
        s.vault.try_withdraw(&s.user, &(1000 * ONE), &s.user),
        Err(Ok(VaultError::VaultPaused))
    );
    assert_eq!(
        s.vault.try_request_withdraw(&s.user, &(1000 * ONE), &s.user),
        Err(Ok(VaultError::VaultPaused))
    );

    s.vault.set_emergency_withdraw(&true);
    s.vault.withdraw(&s.user, &(1000 * ONE), &s.user);
    // Deposits stay closed regardless.
    assert_eq!(
        s.vault.try_deposit(&s.user, &(1000 * ONE), &s.user),
        Err(Ok(VaultError::VaultPaused))
    );

    s.vault.unpause();
    s.vault.deposit(&s.user, &(1000 * ONE), &s.user);
}

#[test]
#[should_panic(expected = "Vault is not paused")]
fn test_unpause_requires_paused() {
    let s = setup();
    s.vault.unpause();
}

// ---------------------------------------------------------------------------
// Caps & administration
// ---------------------------------------------------------------------------

#[test]
fn test_caps_enforced() {
    let s = setup();
    s.vault.set_caps(&(50_000 * ONE), &(20_000 * ONE));

    assert_eq!(
        s.vault.try_deposit(&s.user, &(30_000 * ONE), &s.user),
        Err(Ok(VaultError::ExceedsUserDepositCap))
    );
    s.vault.deposit(&s.user, &(20_000 * ONE), &s.user);

    let second = Address::generate(&s.env);
    s.base_admin.mint(&second, &(100_000 * ONE));
    assert_eq!(
        s.vault.try_deposit(&second, &(40_000 * ONE), &second),
        Err(Ok(VaultError::ExceedsTvlCap))
    );
    s.vault.deposit(&second, &(20_000 * ONE), &second);
}

#[test]
fn test_role_rotation() {
    let s = setup();
    let new_rebalancer = Address::generate(&s.env);
    s.vault.set_rebalancer(&new_rebalancer);
    assert_eq!(s.vault.get_rebalancer(), new_rebalancer);

    let new_owner = Address::generate(&s.env);
    s.vault.transfer_ownership(&new_owner);
    assert_eq!(s.vault.get_owner(), new_owner);
}

#[test]
fn test_circuit_breaker_parameter_bounds() {
    let s = setup();
    assert_eq!(
        s.vault.try_set_circuit_breaker_threshold(&0),
        Err(Ok(VaultError::ThresholdOutOfRange))
    );
    assert_eq!(
        s.vault.try_set_circuit_breaker_threshold(&10_001),
        Err(Ok(VaultError::ThresholdOutOfRange))
    );
    s.vault.set_circuit_breaker_threshold(&300);

    assert_eq!(
        s.vault.try_set_circuit_breaker_limit(&0),
        Err(Ok(VaultError::InvalidLimit))
    );
    assert_eq!(
        s.vault
            .try_set_circuit_breaker_limit(&(INSTANT_WITHDRAWAL_LIMIT + 1)),
        Err(Ok(VaultError::InvalidLimit))
    );
    s.vault.set_circuit_breaker_limit(&(2_000 * ONE));
}

// ---------------------------------------------------------------------------
// Oracle dependency
// ---------------------------------------------------------------------------

#[test]
fn test_total_oracle_failure_halts_valuation() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // Every feed for rwa_a gone: valuation (and with it deposits) must fail
    // loudly rather than misprice. Queued claims of fixed quotes remain the
    // escape hatch.
    s.oracle.remove_feeds(&s.rwa_a);
    assert!(s.vault.try_total_assets().is_err());
    assert!(s.vault.try_deposit(&s.user, &(1000 * ONE), &s.user).is_err());
}

#[test]
fn test_backup_feed_keeps_vault_alive() {
    let s = setup();
    seed_two_asset_portfolio(&s);

    // Primary goes stale; a configured backup keeps valuation running.
    let backup_id = s.env.register_contract(None, MockFeed);
    let backup = MockFeedClient::new(&s.env, &backup_id);
    backup.set_price(&s.rwa_a, &(2 * ONE), &NOW);
    s.oracle.configure_feeds(
        &s.rwa_a,
        &Some(s.feed_id.clone()),
        &Some(backup_id),
        &0,
    );
    s.feed
        .set_price(&s.rwa_a, &(2 * ONE), &(NOW - 3 * 3600));

    assert_eq!(s.vault.total_assets(), 100_000 * ONE);
}
