//! # PNGY Vault Contract
//!
//! An ERC-4626 style yield vault aggregating tokenized real-world assets
//! (RWAs) on Soroban. Users deposit the base token (a USD stable asset with
//! 18-decimal fixed-point amounts) and receive shares; the vault values its
//! RWA holdings through the oracle adapter, rebalances them through the swap
//! executor, and enforces withdrawal-safety rules (instant limits, a T+1
//! queue, and a NAV circuit breaker).
//!
//! ## Architecture Overview
//!
//! ```text
//! Deposit Flow:
//! User -> [Base Token] -> [Vault Contract] -> shares minted at current NAV
//!
//! NAV:
//! totalAssets = idle base balance
//!             + sum(oracle price_i * holding balance_i / 1e18)
//!
//! Rebalance Flow (rebalancer role):
//! Operator -> [RebalanceStrategy (off-chain call)] -> trade list
//!          -> [Vault.rebalance()] -> [SwapExecutor] -> [Liquidity Venue]
//!          -> holdings + target allocations updated, RebalanceExecuted emitted
//!
//! Withdraw Flow:
//! amount <= instant limit  -> instant burn + transfer
//! amount >  instant limit  -> request_withdraw -> T+1 -> claim_withdraw
//! ```
//!
//! ## Share Accounting Model
//!
//! Shares convert at the live NAV: `shares = assets * totalShares /
//! totalAssets`, with the first deposit minting 1:1. Share balances are
//! internal ledger entries mutated only by deposit (mint) and
//! withdraw/redeem/claim (burn); there is no transfer surface.
//!
//! ## Safety Model
//!
//! - Pause flag stops deposits and withdrawals; the emergency-withdraw flag
//!   re-opens withdrawals while paused.
//! - The circuit breaker trips when NAV drops from its reference beyond a
//!   threshold (default 5%) and caps instant withdrawals at a reduced limit;
//!   queued withdrawals keep working since they already defer settlement.
//! - All swaps route through the slippage-bounded executor; a failing swap
//!   reverts the entire rebalance (no partial state).
//! - Soroban's host forbids contract reentrancy, so external oracle/swap
//!   calls cannot re-enter the vault mid-operation.

#![no_std]

use soroban_sdk::{
    auth::{ContractContext, InvokerContractAuthEntry, SubContractInvocation},
    contract, contractclient, contracterror, contractimpl, contracttype,
    symbol_short, token, vec, Address, BytesN, Env, IntoVal, Symbol, U256, Val,
    Vec,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// 1e18 fixed-point scale for amounts, prices and NAV.
pub const PRECISION: i128 = 1_000_000_000_000_000_000;

pub const BPS_DENOMINATOR: i128 = 10_000;

/// Smallest accepted deposit: $500.
pub const MIN_DEPOSIT: i128 = 500 * PRECISION;

/// Absolute ceiling on any single withdrawal, instant or queued: $100,000.
pub const MAX_WITHDRAWAL: i128 = 100_000 * PRECISION;

/// Largest withdrawal served instantly: $10,000. Above this, the T+1 queue.
pub const INSTANT_WITHDRAWAL_LIMIT: i128 = 10_000 * PRECISION;

/// Delay between a queued withdrawal request and its claim: 1 day.
pub const WITHDRAWAL_DELAY_SECS: u64 = 86_400;

/// NAV drop (in bps from the reference) that trips the circuit breaker.
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD_BPS: u32 = 500;

/// Instant-withdrawal cap while the circuit breaker is active: $1,000.
pub const DEFAULT_CIRCUIT_BREAKER_LIMIT: i128 = 1_000 * PRECISION;

const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

// ============================================================================
// COLLABORATOR INTERFACES
// ============================================================================

/// Price resolution, served by the oracle adapter. A total oracle failure
/// propagates and aborts the calling operation - by then both the primary
/// and backup feeds have already been exhausted.
#[contractclient(name = "OracleAdapterClient")]
pub trait OracleAdapter {
    fn get_price(env: Env, asset: Address) -> i128;
}

/// Slippage-bounded trading, served by the swap executor. Zero slippage
/// selects the executor's configured default.
#[contractclient(name = "SwapExecutorClient")]
pub trait SwapExecutor {
    fn buy(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        max_slippage_bps: u32,
    ) -> i128;
    fn sell(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        max_slippage_bps: u32,
    ) -> i128;
    fn get_venue(env: Env) -> Address;
}

/// Eligibility checks, served by the asset registry.
#[contractclient(name = "AssetRegistryClient")]
pub trait AssetRegistry {
    fn is_asset_active(env: Env, asset: Address) -> bool;
}

// ============================================================================
// STORAGE KEYS
// ============================================================================

/// Storage keys for vault state. Instance storage holds contract-wide
/// configuration and counters; persistent storage holds per-holder balances,
/// per-asset holdings and withdrawal requests.
#[contracttype]
pub enum DataKey {
    /// Contract owner: pause control, asset management, parameter setters
    Owner,
    /// Operator allowed to execute rebalances (owner may as well)
    Rebalancer,
    /// Base token contract address (deposits/withdrawals denomination)
    BaseToken,
    OracleAdapter,
    SwapExecutor,
    AssetRegistry,
    Paused,
    /// When true, withdrawals work even while paused
    EmergencyWithdraw,
    CircuitBreakerActive,
    /// NAV drop in bps that trips the breaker
    CircuitBreakerThreshold,
    /// Reduced instant-withdrawal cap while the breaker is active
    CircuitBreakerLimit,
    /// Share price (1e18) the breaker measures drops against
    ReferenceNav,
    TotalShares,
    /// Cached oracle valuation of all RWA holdings
    ManagedAssetValue,
    LastNavUpdate,
    NextRequestId,
    /// Max total vault value; 0 = uncapped
    TvlCap,
    /// Max per-user position in asset terms; 0 = uncapped
    UserDepositCap,
    Version,
    /// Ordered list of registered RWA holdings
    Assets,
    /// Share balance per holder (key: holder Address)
    Balance(Address),
    /// Shares locked under pending withdrawal requests
    LockedShares(Address),
    /// Holding record per RWA token (key: token Address)
    Holding(Address),
    /// Queued withdrawal request (key: request id)
    Request(u64),
}

// ============================================================================
// TYPES
// ============================================================================

/// Per-RWA-token holding record.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Holding {
    /// Token units held (1e18 fixed-point), updated by rebalance trades
    pub balance: i128,
    pub target_allocation_bps: u32,
    pub active: bool,
}

/// A T+1 withdrawal queue entry. The asset amount is fixed at request time,
/// giving the user a predictable quote regardless of later NAV moves.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawalRequest {
    pub id: u64,
    pub owner: Address,
    pub receiver: Address,
    pub shares: i128,
    pub assets_owed: i128,
    pub request_time: u64,
    pub claimed: bool,
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum VaultError {
    ZeroAmount = 1,
    BelowMinimumDeposit = 2,
    VaultPaused = 3,
    ExceedsUserDepositCap = 4,
    ExceedsTvlCap = 5,
    InsufficientShares = 6,
    ExceedsMaxWithdrawal = 7,
    /// Amounts above the instant limit must go through the T+1 queue
    ExceedsInstantLimit = 8,
    /// The circuit breaker caps instant withdrawals at the reduced limit
    CircuitBreakerRestricted = 9,
    RequestNotFound = 10,
    RequestAlreadyClaimed = 11,
    WithdrawalDelayNotElapsed = 12,
    NotRequestOwner = 13,
    AssetAlreadyAdded = 14,
    AssetNotFound = 15,
    /// Token is not active in the asset registry
    AssetNotEligible = 16,
    /// Total target allocation would exceed 100%
    AllocationOverflow = 17,
    AllocationSumInvalid = 18,
    ArrayLengthMismatch = 19,
    /// Asset still holds balance; use the liquidation path
    NonZeroHolding = 20,
    InsufficientHolding = 21,
    /// Idle base balance cannot cover the payout
    InsufficientLiquidity = 22,
    MathOverflow = 23,
    ThresholdOutOfRange = 24,
    InvalidLimit = 25,
    Unauthorized = 26,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Emitted when the vault is initialized.
#[contracttype]
pub struct VaultInitialized {
    pub owner: Address,
    pub base_token: Address,
    pub oracle_adapter: Address,
    pub swap_executor: Address,
    pub asset_registry: Address,
    pub timestamp: u64,
}

/// Emitted on every deposit. Indexers reconstruct positions from these.
#[contracttype]
pub struct DepositProcessed {
    pub sender: Address,
    pub receiver: Address,
    pub assets: i128,
    pub shares: i128,
    pub timestamp: u64,
}

/// Emitted on every instant withdrawal or redemption.
#[contracttype]
pub struct WithdrawProcessed {
    pub sender: Address,
    pub receiver: Address,
    pub owner: Address,
    pub assets: i128,
    pub shares: i128,
    pub timestamp: u64,
}

/// Emitted when a T+1 withdrawal is queued.
#[contracttype]
pub struct WithdrawRequested {
    pub request_id: u64,
    pub owner: Address,
    pub receiver: Address,
    pub shares: i128,
    pub assets: i128,
    pub claimable_time: u64,
}

/// Emitted when a queued withdrawal is claimed and paid out.
#[contracttype]
pub struct WithdrawClaimed {
    pub request_id: u64,
    pub owner: Address,
    pub receiver: Address,
    pub assets: i128,
    pub timestamp: u64,
}

/// Emitted when a queued withdrawal is cancelled and its shares unlocked.
#[contracttype]
pub struct WithdrawCancelled {
    pub request_id: u64,
    pub owner: Address,
    pub shares: i128,
    pub timestamp: u64,
}

/// Full before/after trade detail of an executed rebalance.
#[contracttype]
pub struct RebalanceExecuted {
    pub sell_assets: Vec<Address>,
    pub sell_amounts: Vec<i128>,
    pub sell_received: Vec<i128>,
    pub buy_assets: Vec<Address>,
    pub buy_amounts: Vec<i128>,
    pub buy_received: Vec<i128>,
    pub timestamp: u64,
}

/// Emitted whenever the cached NAV is recomputed.
#[contracttype]
pub struct NavUpdated {
    pub old_nav: i128,
    pub new_nav: i128,
    pub timestamp: u64,
}

#[contracttype]
pub struct CircuitBreakerTriggered {
    pub current_nav: i128,
    pub reference_nav: i128,
    pub drop_bps: u32,
    pub timestamp: u64,
}

#[contracttype]
pub struct CircuitBreakerReset {
    pub reference_nav: i128,
    pub timestamp: u64,
}

#[contracttype]
pub struct AssetAdded {
    pub asset: Address,
    pub target_allocation_bps: u32,
    pub timestamp: u64,
}

#[contracttype]
pub struct AssetRemoved {
    pub asset: Address,
    pub liquidated_value: i128,
    pub timestamp: u64,
}

/// Emitted when the vault is paused or unpaused.
#[contracttype]
pub struct VaultPauseToggled {
    pub paused: bool,
    pub timestamp: u64,
}

#[contracttype]
pub struct EmergencyWithdrawSet {
    pub enabled: bool,
    pub timestamp: u64,
}

#[contracttype]
pub struct OwnershipTransferred {
    pub old_owner: Address,
    pub new_owner: Address,
    pub timestamp: u64,
}

#[contracttype]
pub struct RebalancerUpdated {
    pub old_rebalancer: Address,
    pub new_rebalancer: Address,
    pub timestamp: u64,
}

#[contracttype]
pub struct CapsUpdated {
    pub tvl_cap: i128,
    pub user_deposit_cap: i128,
    pub timestamp: u64,
}

// ============================================================================
// CONTRACT
// ============================================================================

/// PNGY Vault - RWA yield vault with dual-oracle pricing, APY-driven
/// rebalancing and layered withdrawal safety.
///
/// # Security Model
///
/// - Users can only move their own shares (`require_auth` on every user path)
/// - Only the rebalancer (or owner) can execute rebalances
/// - Only the owner can manage assets, limits, pause state and upgrades
/// - Minimum deposit $500, instant withdrawals capped at $10,000, absolute
///   withdrawal ceiling $100,000
#[contract]
pub struct PngyVault;

#[contractimpl]
impl PngyVault {
    // ==========================================================================
    // INITIALIZATION
    // ==========================================================================

    /// Initializes the vault with its roles and collaborator contracts.
    /// Must be called exactly once after deployment.
    ///
    /// # Panics
    /// - If the vault has already been initialized
    pub fn initialize(
        env: Env,
        owner: Address,
        rebalancer: Address,
        base_token: Address,
        oracle_adapter: Address,
        swap_executor: Address,
        asset_registry: Address,
    ) {
        if env.storage().instance().has(&DataKey::Owner) {
            panic!("Already initialized");
        }

        env.storage().instance().set(&DataKey::Owner, &owner);
        env.storage().instance().set(&DataKey::Rebalancer, &rebalancer);
        env.storage().instance().set(&DataKey::BaseToken, &base_token);
        env.storage()
            .instance()
            .set(&DataKey::OracleAdapter, &oracle_adapter);
        env.storage()
            .instance()
            .set(&DataKey::SwapExecutor, &swap_executor);
        env.storage()
            .instance()
            .set(&DataKey::AssetRegistry, &asset_registry);
        env.storage().instance().set(&DataKey::Paused, &false);
        env.storage().instance().set(&DataKey::EmergencyWithdraw, &false);
        env.storage()
            .instance()
            .set(&DataKey::CircuitBreakerActive, &false);
        env.storage().instance().set(
            &DataKey::CircuitBreakerThreshold,
            &DEFAULT_CIRCUIT_BREAKER_THRESHOLD_BPS,
        );
        env.storage()
            .instance()
            .set(&DataKey::CircuitBreakerLimit, &DEFAULT_CIRCUIT_BREAKER_LIMIT);
        env.storage().instance().set(&DataKey::ReferenceNav, &PRECISION);
        env.storage().instance().set(&DataKey::TotalShares, &0_i128);
        env.storage()
            .instance()
            .set(&DataKey::ManagedAssetValue, &0_i128);
        env.storage()
            .instance()
            .set(&DataKey::LastNavUpdate, &env.ledger().timestamp());
        env.storage().instance().set(&DataKey::NextRequestId, &0_u64);
        env.storage().instance().set(&DataKey::TvlCap, &0_i128);
        env.storage().instance().set(&DataKey::UserDepositCap, &0_i128);
        env.storage().instance().set(&DataKey::Version, &1_u32);
        env.storage()
            .instance()
            .set(&DataKey::Assets, &Vec::<Address>::new(&env));

        env.events().publish(
            (symbol_short!("init"),),
            VaultInitialized {
                owner,
                base_token,
                oracle_adapter,
                swap_executor,
                asset_registry,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    // ==========================================================================
    // CORE LIFECYCLE - DEPOSIT
    // ==========================================================================

    /// Deposits base tokens and mints shares to `receiver` at the current
    /// NAV. The first deposit into an empty vault mints 1:1.
    ///
    /// # Arguments
    /// * `from` - The depositor paying the base tokens (must authorize)
    /// * `assets` - Base token amount, 1e18 fixed-point; at least $500
    /// * `receiver` - Account credited with the minted shares
    ///
    /// # Returns
    /// Shares minted.
    ///
    /// # Errors
    /// - `VaultPaused` while paused
    /// - `ZeroAmount` / `BelowMinimumDeposit` on bad amounts
    /// - `ExceedsUserDepositCap` / `ExceedsTvlCap` when caps are configured
    ///
    /// # Events
    /// Emits `DepositProcessed`.
    ///
    /// # Security
    /// - Share computation reads NAV before the incoming transfer, so a
    ///   deposit cannot price itself
    /// - Ledger state is updated before the token pull; a failed transfer
    ///   reverts the whole invocation
    pub fn deposit(
        env: Env,
        from: Address,
        assets: i128,
        receiver: Address,
    ) -> Result<i128, VaultError> {
        from.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        Self::require_not_paused(&env)?;
        if assets <= 0 {
            return Err(VaultError::ZeroAmount);
        }
        if assets < MIN_DEPOSIT {
            return Err(VaultError::BelowMinimumDeposit);
        }

        let total_assets = Self::current_total_assets(&env)?;

        let tvl_cap: i128 = env.storage().instance().get(&DataKey::TvlCap).unwrap_or(0);
        if tvl_cap > 0 && total_assets + assets > tvl_cap {
            return Err(VaultError::ExceedsTvlCap);
        }

        let total_shares = Self::total_shares_internal(&env);
        let shares = Self::shares_for_assets(&env, assets, total_shares, total_assets)?;

        let user_cap: i128 = env
            .storage()
            .instance()
            .get(&DataKey::UserDepositCap)
            .unwrap_or(0);
        if user_cap > 0 {
            let held: i128 = Self::balance_of(&env, &receiver);
            let held_value =
                Self::assets_for_shares(&env, held, total_shares, total_assets)?;
            if held_value + assets > user_cap {
                return Err(VaultError::ExceedsUserDepositCap);
            }
        }

        // EFFECTS: mint before the external token pull.
        Self::mint_shares(&env, &receiver, shares);

        // INTERACTIONS: pull the base tokens in.
        let base = Self::base_token(&env);
        token::Client::new(&env, &base).transfer(
            &from,
            &env.current_contract_address(),
            &assets,
        );

        env.events().publish(
            (symbol_short!("deposit"),),
            DepositProcessed {
                sender: from,
                receiver,
                assets,
                shares,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(shares)
    }

    // ==========================================================================
    // CORE LIFECYCLE - INSTANT WITHDRAWALS
    // ==========================================================================

    /// Withdraws an exact base-token amount instantly, burning the
    /// equivalent shares at the current NAV.
    ///
    /// Instant withdrawals are capped at $10,000 (reduced further while the
    /// circuit breaker is active); larger amounts up to the $100,000 ceiling
    /// must use `request_withdraw`. Blocked while paused unless
    /// emergency-withdraw is enabled.
    ///
    /// # Returns
    /// Shares burned.
    ///
    /// # Events
    /// Emits `WithdrawProcessed`.
    pub fn withdraw(
        env: Env,
        from: Address,
        assets: i128,
        receiver: Address,
    ) -> Result<i128, VaultError> {
        from.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        Self::require_withdrawals_open(&env)?;
        if assets <= 0 {
            return Err(VaultError::ZeroAmount);
        }

        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        Self::run_circuit_breaker_check(&env, total_assets, total_shares);
        Self::enforce_instant_limits(&env, assets)?;

        let shares = Self::shares_for_assets(&env, assets, total_shares, total_assets)?;
        if shares <= 0 {
            return Err(VaultError::ZeroAmount);
        }

        Self::settle_instant(&env, &from, &receiver, assets, shares)?;
        Ok(shares)
    }

    /// Redeems an exact share amount instantly for base tokens at the
    /// current NAV. Same limits and pause rules as `withdraw`.
    ///
    /// # Returns
    /// Base token amount paid out.
    ///
    /// # Events
    /// Emits `WithdrawProcessed`.
    pub fn redeem(
        env: Env,
        from: Address,
        shares: i128,
        receiver: Address,
    ) -> Result<i128, VaultError> {
        from.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        Self::require_withdrawals_open(&env)?;
        if shares <= 0 {
            return Err(VaultError::ZeroAmount);
        }

        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        Self::run_circuit_breaker_check(&env, total_assets, total_shares);

        let assets = Self::assets_for_shares(&env, shares, total_shares, total_assets)?;
        if assets <= 0 {
            return Err(VaultError::ZeroAmount);
        }
        Self::enforce_instant_limits(&env, assets)?;

        Self::settle_instant(&env, &from, &receiver, assets, shares)?;
        Ok(assets)
    }

    // ==========================================================================
    // CORE LIFECYCLE - T+1 WITHDRAWAL QUEUE
    // ==========================================================================

    /// Queues a withdrawal for settlement after the 1-day delay. The
    /// caller's shares are locked (still counted in total supply but not
    /// spendable) and the payout is fixed at the current NAV.
    ///
    /// The queue accepts any amount up to the $100,000 ceiling and keeps
    /// working while the circuit breaker is active.
    ///
    /// # Returns
    /// The request id to pass to `claim_withdraw`.
    ///
    /// # Events
    /// Emits `WithdrawRequested` with the claimable time.
    pub fn request_withdraw(
        env: Env,
        owner: Address,
        shares: i128,
        receiver: Address,
    ) -> Result<u64, VaultError> {
        owner.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        Self::require_withdrawals_open(&env)?;
        if shares <= 0 {
            return Err(VaultError::ZeroAmount);
        }
        if Self::available_balance_of(&env, &owner) < shares {
            return Err(VaultError::InsufficientShares);
        }

        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        let assets_owed = Self::assets_for_shares(&env, shares, total_shares, total_assets)?;
        if assets_owed <= 0 {
            return Err(VaultError::ZeroAmount);
        }
        if assets_owed > MAX_WITHDRAWAL {
            return Err(VaultError::ExceedsMaxWithdrawal);
        }

        let id: u64 = env
            .storage()
            .instance()
            .get(&DataKey::NextRequestId)
            .unwrap_or(0);
        env.storage().instance().set(&DataKey::NextRequestId, &(id + 1));

        let locked = Self::locked_shares_of(&env, &owner);
        env.storage()
            .persistent()
            .set(&DataKey::LockedShares(owner.clone()), &(locked + shares));

        let now = env.ledger().timestamp();
        let request = WithdrawalRequest {
            id,
            owner: owner.clone(),
            receiver: receiver.clone(),
            shares,
            assets_owed,
            request_time: now,
            claimed: false,
        };
        env.storage().persistent().set(&DataKey::Request(id), &request);

        env.events().publish(
            (symbol_short!("wdr_req"),),
            WithdrawRequested {
                request_id: id,
                owner,
                receiver,
                shares,
                assets: assets_owed,
                claimable_time: now + WITHDRAWAL_DELAY_SECS,
            },
        );
        Ok(id)
    }

    /// Claims a matured withdrawal request: burns the locked shares and pays
    /// the amount fixed at request time, even if NAV moved since.
    ///
    /// # Errors
    /// - `WithdrawalDelayNotElapsed` before the 1-day delay has passed
    /// - `RequestAlreadyClaimed` / `RequestNotFound` / `NotRequestOwner`
    ///
    /// # Events
    /// Emits `WithdrawClaimed`.
    pub fn claim_withdraw(env: Env, owner: Address, request_id: u64) -> Result<i128, VaultError> {
        owner.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        Self::require_withdrawals_open(&env)?;

        let key = DataKey::Request(request_id);
        let mut request: WithdrawalRequest = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(VaultError::RequestNotFound)?;
        if request.owner != owner {
            return Err(VaultError::NotRequestOwner);
        }
        if request.claimed {
            return Err(VaultError::RequestAlreadyClaimed);
        }
        let now = env.ledger().timestamp();
        if now < request.request_time + WITHDRAWAL_DELAY_SECS {
            return Err(VaultError::WithdrawalDelayNotElapsed);
        }

        // EFFECTS: burn the locked shares and tombstone the request.
        let locked = Self::locked_shares_of(&env, &owner);
        env.storage()
            .persistent()
            .set(&DataKey::LockedShares(owner.clone()), &(locked - request.shares));
        Self::burn_shares(&env, &owner, request.shares);
        request.claimed = true;
        env.storage().persistent().set(&key, &request);

        // INTERACTIONS: pay the quote fixed at request time.
        Self::pay_out(&env, &request.receiver, request.assets_owed)?;

        env.events().publish(
            (symbol_short!("wdr_claim"),),
            WithdrawClaimed {
                request_id,
                owner,
                receiver: request.receiver.clone(),
                assets: request.assets_owed,
                timestamp: now,
            },
        );
        Ok(request.assets_owed)
    }

    /// Cancels an unclaimed request, unlocking its shares without payout.
    ///
    /// # Events
    /// Emits `WithdrawCancelled`.
    pub fn cancel_withdraw(env: Env, owner: Address, request_id: u64) -> Result<(), VaultError> {
        owner.require_auth();
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let key = DataKey::Request(request_id);
        let mut request: WithdrawalRequest = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(VaultError::RequestNotFound)?;
        if request.owner != owner {
            return Err(VaultError::NotRequestOwner);
        }
        if request.claimed {
            return Err(VaultError::RequestAlreadyClaimed);
        }

        let locked = Self::locked_shares_of(&env, &owner);
        env.storage()
            .persistent()
            .set(&DataKey::LockedShares(owner.clone()), &(locked - request.shares));
        request.claimed = true;
        env.storage().persistent().set(&key, &request);

        env.events().publish(
            (symbol_short!("wdr_cncl"),),
            WithdrawCancelled {
                request_id,
                owner,
                shares: request.shares,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // NAV & CIRCUIT BREAKER
    // ==========================================================================

    /// Total vault value: idle base balance plus the oracle valuation of
    /// every active holding.
    pub fn total_assets(env: Env) -> Result<i128, VaultError> {
        Self::current_total_assets(&env)
    }

    /// Share price at 1e18 precision; parity (1e18) when supply is zero.
    pub fn share_price(env: Env) -> Result<i128, VaultError> {
        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        Self::nav_of(&env, total_assets, total_shares)
    }

    /// Shares minted for a hypothetical deposit at the current NAV.
    pub fn convert_to_shares(env: Env, assets: i128) -> Result<i128, VaultError> {
        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        Self::shares_for_assets(&env, assets, total_shares, total_assets)
    }

    /// Base tokens returned for a hypothetical redemption at the current NAV.
    pub fn convert_to_assets(env: Env, shares: i128) -> Result<i128, VaultError> {
        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        Self::assets_for_shares(&env, shares, total_shares, total_assets)
    }

    /// Recomputes the cached managed-asset value from live oracle prices,
    /// publishes `NavUpdated`, and runs the circuit-breaker check.
    /// Permissionless: periodic off-chain triggers call this.
    pub fn sync_nav(env: Env) -> Result<i128, VaultError> {
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let total_shares = Self::total_shares_internal(&env);
        let idle = Self::idle_base_balance(&env);
        let old_managed: i128 = env
            .storage()
            .instance()
            .get(&DataKey::ManagedAssetValue)
            .unwrap_or(0);
        let old_nav = Self::nav_of(&env, idle + old_managed, total_shares)?;

        let managed = Self::compute_managed_value(&env)?;
        env.storage()
            .instance()
            .set(&DataKey::ManagedAssetValue, &managed);
        env.storage()
            .instance()
            .set(&DataKey::LastNavUpdate, &env.ledger().timestamp());

        let new_nav = Self::nav_of(&env, idle + managed, total_shares)?;
        env.events().publish(
            (symbol_short!("nav"),),
            NavUpdated {
                old_nav,
                new_nav,
                timestamp: env.ledger().timestamp(),
            },
        );

        Self::run_circuit_breaker_check(&env, idle + managed, total_shares);
        Ok(new_nav)
    }

    /// Clears the circuit breaker and re-anchors the reference NAV at the
    /// current share price. Owner only.
    pub fn reset_circuit_breaker(env: Env) -> Result<(), VaultError> {
        Self::require_owner(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let total_assets = Self::current_total_assets(&env)?;
        let total_shares = Self::total_shares_internal(&env);
        let nav = Self::nav_of(&env, total_assets, total_shares)?;

        env.storage()
            .instance()
            .set(&DataKey::CircuitBreakerActive, &false);
        env.storage().instance().set(&DataKey::ReferenceNav, &nav);

        env.events().publish(
            (symbol_short!("cb_reset"),),
            CircuitBreakerReset {
                reference_nav: nav,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// NAV drop (bps) that trips the breaker; bounded to (0, 10000].
    pub fn set_circuit_breaker_threshold(env: Env, threshold_bps: u32) -> Result<(), VaultError> {
        Self::require_owner(&env);
        if threshold_bps == 0 || threshold_bps as i128 > BPS_DENOMINATOR {
            return Err(VaultError::ThresholdOutOfRange);
        }
        env.storage()
            .instance()
            .set(&DataKey::CircuitBreakerThreshold, &threshold_bps);
        Ok(())
    }

    /// Reduced instant-withdrawal cap applied while the breaker is active.
    pub fn set_circuit_breaker_limit(env: Env, limit: i128) -> Result<(), VaultError> {
        Self::require_owner(&env);
        if limit <= 0 || limit > INSTANT_WITHDRAWAL_LIMIT {
            return Err(VaultError::InvalidLimit);
        }
        env.storage().instance().set(&DataKey::CircuitBreakerLimit, &limit);
        Ok(())
    }

    // ==========================================================================
    // REBALANCING
    // ==========================================================================

    /// Executes a rebalance batch: sells RWA holdings back to base, buys
    /// others, and installs the new target allocations. The trade lists come
    /// from the rebalance strategy (queried by the operator off-chain).
    ///
    /// # Arguments
    /// * `caller` - The rebalancer or owner (must authorize)
    /// * `sell_assets`/`sell_amounts` - RWA token units to liquidate
    /// * `buy_assets`/`buy_amounts` - Base token amounts to deploy
    /// * `new_allocations` - Target bps per registered asset, in registry
    ///   order; must sum to exactly 10000
    ///
    /// # Security
    /// - Every swap routes through the slippage-bounded executor; if any
    ///   trade fails the entire batch reverts, so no partial rebalance state
    ///   can persist
    ///
    /// # Events
    /// Emits `RebalanceExecuted` and `NavUpdated`.
    pub fn rebalance(
        env: Env,
        caller: Address,
        sell_assets: Vec<Address>,
        sell_amounts: Vec<i128>,
        buy_assets: Vec<Address>,
        buy_amounts: Vec<i128>,
        new_allocations: Vec<u32>,
    ) -> Result<(), VaultError> {
        Self::require_rebalancer(&env, &caller)?;
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        Self::require_not_paused(&env)?;

        if sell_assets.len() != sell_amounts.len() || buy_assets.len() != buy_amounts.len() {
            return Err(VaultError::ArrayLengthMismatch);
        }
        let assets: Vec<Address> = Self::asset_list(&env);
        if new_allocations.len() != assets.len() {
            return Err(VaultError::ArrayLengthMismatch);
        }
        if assets.len() > 0 {
            let mut sum: i128 = 0;
            for bps in new_allocations.iter() {
                sum += bps as i128;
            }
            if sum != BPS_DENOMINATOR {
                return Err(VaultError::AllocationSumInvalid);
            }
        }

        let total_shares = Self::total_shares_internal(&env);
        let idle_before = Self::idle_base_balance(&env);
        let managed_before: i128 = env
            .storage()
            .instance()
            .get(&DataKey::ManagedAssetValue)
            .unwrap_or(0);
        let old_nav = Self::nav_of(&env, idle_before + managed_before, total_shares)?;

        let base = Self::base_token(&env);
        let executor = Self::swap_executor_client(&env);
        let self_addr = env.current_contract_address();

        // Sells first, so the base raised can fund the buys.
        let mut sell_received = Vec::<i128>::new(&env);
        for i in 0..sell_assets.len() {
            let asset = sell_assets.get_unchecked(i);
            let amount = sell_amounts.get_unchecked(i);
            if amount <= 0 {
                return Err(VaultError::ZeroAmount);
            }
            let mut holding = Self::holding_of(&env, &asset)?;
            if holding.balance < amount {
                return Err(VaultError::InsufficientHolding);
            }
            let received = executor.sell(&self_addr, &asset, &base, &amount, &0);
            holding.balance -= amount;
            env.storage()
                .persistent()
                .set(&DataKey::Holding(asset.clone()), &holding);
            sell_received.push_back(received);
        }

        let mut buy_received = Vec::<i128>::new(&env);
        for i in 0..buy_assets.len() {
            let asset = buy_assets.get_unchecked(i);
            let amount = buy_amounts.get_unchecked(i);
            if amount <= 0 {
                return Err(VaultError::ZeroAmount);
            }
            let mut holding = Self::holding_of(&env, &asset)?;
            Self::authorize_venue_spend(&env, &executor, &base, amount);
            let received = executor.buy(&self_addr, &base, &asset, &amount, &0);
            holding.balance += received;
            env.storage()
                .persistent()
                .set(&DataKey::Holding(asset.clone()), &holding);
            buy_received.push_back(received);
        }

        // Install the new targets in registry order.
        for i in 0..assets.len() {
            let asset = assets.get_unchecked(i);
            let mut holding = Self::holding_of(&env, &asset)?;
            holding.target_allocation_bps = new_allocations.get_unchecked(i);
            env.storage()
                .persistent()
                .set(&DataKey::Holding(asset), &holding);
        }

        // Re-mark the portfolio and publish the NAV move.
        let managed = Self::compute_managed_value(&env)?;
        env.storage()
            .instance()
            .set(&DataKey::ManagedAssetValue, &managed);
        env.storage()
            .instance()
            .set(&DataKey::LastNavUpdate, &env.ledger().timestamp());
        let idle_after = Self::idle_base_balance(&env);
        let new_nav = Self::nav_of(&env, idle_after + managed, total_shares)?;

        env.events().publish(
            (symbol_short!("nav"),),
            NavUpdated {
                old_nav,
                new_nav,
                timestamp: env.ledger().timestamp(),
            },
        );
        env.events().publish(
            (symbol_short!("rebalance"),),
            RebalanceExecuted {
                sell_assets,
                sell_amounts,
                sell_received,
                buy_assets,
                buy_amounts,
                buy_received,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // ASSET MANAGEMENT
    // ==========================================================================

    /// Registers an RWA token for the vault to hold. The token must be
    /// active in the asset registry, and the combined target allocation
    /// across all holdings may not exceed 100%.
    ///
    /// # Events
    /// Emits `AssetAdded`.
    pub fn add_rwa_asset(
        env: Env,
        asset: Address,
        target_allocation_bps: u32,
    ) -> Result<(), VaultError> {
        Self::require_owner(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        if env
            .storage()
            .persistent()
            .has(&DataKey::Holding(asset.clone()))
        {
            return Err(VaultError::AssetAlreadyAdded);
        }
        let registry = Self::asset_registry_client(&env);
        if !registry.is_asset_active(&asset) {
            return Err(VaultError::AssetNotEligible);
        }

        let assets = Self::asset_list(&env);
        let mut allocated: i128 = target_allocation_bps as i128;
        for existing in assets.iter() {
            let holding = Self::holding_of(&env, &existing)?;
            allocated += holding.target_allocation_bps as i128;
        }
        if allocated > BPS_DENOMINATOR {
            return Err(VaultError::AllocationOverflow);
        }

        let mut assets = assets;
        assets.push_back(asset.clone());
        env.storage().instance().set(&DataKey::Assets, &assets);
        env.storage().persistent().set(
            &DataKey::Holding(asset.clone()),
            &Holding {
                balance: 0,
                target_allocation_bps,
                active: true,
            },
        );

        env.events().publish(
            (symbol_short!("asset_add"),),
            AssetAdded {
                asset,
                target_allocation_bps,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Deregisters an RWA token whose holding is already empty. Holdings
    /// with balance must go through `liquidate_rwa_asset`.
    pub fn remove_rwa_asset(env: Env, asset: Address) -> Result<(), VaultError> {
        Self::require_owner(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let holding = Self::holding_of(&env, &asset)?;
        if holding.balance != 0 {
            return Err(VaultError::NonZeroHolding);
        }
        Self::drop_asset(&env, &asset);

        env.events().publish(
            (symbol_short!("asset_rem"),),
            AssetRemoved {
                asset,
                liquidated_value: 0,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Sells an asset's entire holding back to base, deregisters it, and
    /// redistributes its target allocation pro-rata across the remaining
    /// holdings (rounding remainder to the last).
    ///
    /// # Events
    /// Emits `AssetRemoved` and `NavUpdated`.
    pub fn liquidate_rwa_asset(env: Env, asset: Address) -> Result<(), VaultError> {
        Self::require_owner(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let holding = Self::holding_of(&env, &asset)?;
        let removed_bps = holding.target_allocation_bps;

        let mut liquidated_value: i128 = 0;
        if holding.balance > 0 {
            let base = Self::base_token(&env);
            let executor = Self::swap_executor_client(&env);
            liquidated_value =
                executor.sell(&env.current_contract_address(), &asset, &base, &holding.balance, &0);
        }
        Self::drop_asset(&env, &asset);

        // Pro-rata redistribution of the freed allocation.
        let remaining = Self::asset_list(&env);
        if remaining.len() > 0 && removed_bps > 0 {
            let mut remaining_sum: i128 = 0;
            for a in remaining.iter() {
                remaining_sum += Self::holding_of(&env, &a)?.target_allocation_bps as i128;
            }
            if remaining_sum > 0 {
                let mut distributed: i128 = 0;
                for i in 0..remaining.len() {
                    let a = remaining.get_unchecked(i);
                    let mut h = Self::holding_of(&env, &a)?;
                    let extra = if i == remaining.len() - 1 {
                        removed_bps as i128 - distributed
                    } else {
                        removed_bps as i128 * h.target_allocation_bps as i128 / remaining_sum
                    };
                    distributed += extra;
                    h.target_allocation_bps += extra as u32;
                    env.storage().persistent().set(&DataKey::Holding(a), &h);
                }
            }
        }

        // Re-mark and publish: the portfolio composition changed.
        let total_shares = Self::total_shares_internal(&env);
        let old_managed: i128 = env
            .storage()
            .instance()
            .get(&DataKey::ManagedAssetValue)
            .unwrap_or(0);
        let idle = Self::idle_base_balance(&env);
        let old_nav = Self::nav_of(&env, idle + old_managed, total_shares)?;
        let managed = Self::compute_managed_value(&env)?;
        env.storage()
            .instance()
            .set(&DataKey::ManagedAssetValue, &managed);
        let new_nav = Self::nav_of(&env, idle + managed, total_shares)?;
        env.events().publish(
            (symbol_short!("nav"),),
            NavUpdated {
                old_nav,
                new_nav,
                timestamp: env.ledger().timestamp(),
            },
        );

        env.events().publish(
            (symbol_short!("asset_rem"),),
            AssetRemoved {
                asset,
                liquidated_value,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // ADMINISTRATIVE - PAUSE & ROLES
    // ==========================================================================

    /// Pauses the vault: deposits, withdrawals and rebalances stop. Reads
    /// stay live. Withdrawals re-open if emergency-withdraw is enabled.
    pub fn pause(env: Env) {
        Self::require_owner(&env);
        env.storage().instance().set(&DataKey::Paused, &true);
        env.events().publish(
            (symbol_short!("pause"),),
            VaultPauseToggled {
                paused: true,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    /// Unpauses the vault.
    ///
    /// # Panics
    /// - If the vault is not currently paused
    pub fn unpause(env: Env) {
        Self::require_owner(&env);
        let paused: bool = env
            .storage()
            .instance()
            .get(&DataKey::Paused)
            .unwrap_or(false);
        assert!(paused, "Vault is not paused");
        env.storage().instance().set(&DataKey::Paused, &false);
        env.events().publish(
            (symbol_short!("pause"),),
            VaultPauseToggled {
                paused: false,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    /// Toggles the emergency-withdraw flag, which lets users exit while the
    /// vault is paused.
    pub fn set_emergency_withdraw(env: Env, enabled: bool) {
        Self::require_owner(&env);
        env.storage().instance().set(&DataKey::EmergencyWithdraw, &enabled);
        env.events().publish(
            (symbol_short!("emergency"),),
            EmergencyWithdrawSet {
                enabled,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    pub fn transfer_ownership(env: Env, new_owner: Address) {
        Self::require_owner(&env);
        let old: Address = env.storage().instance().get(&DataKey::Owner).unwrap();
        env.storage().instance().set(&DataKey::Owner, &new_owner);
        env.events().publish(
            (symbol_short!("owner"),),
            OwnershipTransferred {
                old_owner: old,
                new_owner,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    pub fn set_rebalancer(env: Env, new_rebalancer: Address) {
        Self::require_owner(&env);
        let old: Address = env.storage().instance().get(&DataKey::Rebalancer).unwrap();
        env.storage().instance().set(&DataKey::Rebalancer, &new_rebalancer);
        env.events().publish(
            (symbol_short!("rebal_set"),),
            RebalancerUpdated {
                old_rebalancer: old,
                new_rebalancer,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    /// Sets the TVL cap and per-user cap (asset terms; 0 = uncapped).
    pub fn set_caps(env: Env, tvl_cap: i128, user_deposit_cap: i128) {
        Self::require_owner(&env);
        env.storage().instance().set(&DataKey::TvlCap, &tvl_cap);
        env.storage()
            .instance()
            .set(&DataKey::UserDepositCap, &user_deposit_cap);
        env.events().publish(
            (symbol_short!("caps"),),
            CapsUpdated {
                tvl_cap,
                user_deposit_cap,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    /// Upgrades the contract WASM, preserving storage.
    pub fn upgrade(env: Env, wasm_hash: BytesN<32>) {
        Self::require_owner(&env);
        env.deployer().update_current_contract_wasm(wasm_hash);
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    pub fn get_balance(env: Env, holder: Address) -> i128 {
        Self::balance_of(&env, &holder)
    }

    /// Shares not locked under pending withdrawal requests.
    pub fn get_available_balance(env: Env, holder: Address) -> i128 {
        Self::available_balance_of(&env, &holder)
    }

    pub fn get_locked_shares(env: Env, holder: Address) -> i128 {
        Self::locked_shares_of(&env, &holder)
    }

    pub fn total_shares(env: Env) -> i128 {
        Self::total_shares_internal(&env)
    }

    pub fn get_holding(env: Env, asset: Address) -> Result<Holding, VaultError> {
        Self::holding_of(&env, &asset)
    }

    pub fn list_rwa_assets(env: Env) -> Vec<Address> {
        Self::asset_list(&env)
    }

    pub fn get_request(env: Env, request_id: u64) -> Result<WithdrawalRequest, VaultError> {
        env.storage()
            .persistent()
            .get(&DataKey::Request(request_id))
            .ok_or(VaultError::RequestNotFound)
    }

    pub fn is_paused(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::Paused)
            .unwrap_or(false)
    }

    pub fn is_emergency_withdraw_enabled(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::EmergencyWithdraw)
            .unwrap_or(false)
    }

    pub fn is_circuit_breaker_active(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::CircuitBreakerActive)
            .unwrap_or(false)
    }

    pub fn get_reference_nav(env: Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::ReferenceNav)
            .unwrap_or(PRECISION)
    }

    pub fn get_owner(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Owner).unwrap()
    }

    pub fn get_rebalancer(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Rebalancer).unwrap()
    }

    pub fn get_base_token(env: Env) -> Address {
        env.storage().instance().get(&DataKey::BaseToken).unwrap()
    }

    pub fn get_version(env: Env) -> u32 {
        env.storage().instance().get(&DataKey::Version).unwrap_or(1)
    }

    // ==========================================================================
    // INTERNAL - SHARE LEDGER
    // ==========================================================================

    fn balance_of(env: &Env, holder: &Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::Balance(holder.clone()))
            .unwrap_or(0)
    }

    fn locked_shares_of(env: &Env, holder: &Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::LockedShares(holder.clone()))
            .unwrap_or(0)
    }

    fn available_balance_of(env: &Env, holder: &Address) -> i128 {
        Self::balance_of(env, holder) - Self::locked_shares_of(env, holder)
    }

    fn total_shares_internal(env: &Env) -> i128 {
        env.storage()
            .instance()
            .get(&DataKey::TotalShares)
            .unwrap_or(0)
    }

    fn mint_shares(env: &Env, to: &Address, shares: i128) {
        let balance = Self::balance_of(env, to);
        env.storage()
            .persistent()
            .set(&DataKey::Balance(to.clone()), &(balance + shares));
        let total = Self::total_shares_internal(env);
        env.storage()
            .instance()
            .set(&DataKey::TotalShares, &(total + shares));
    }

    fn burn_shares(env: &Env, from: &Address, shares: i128) {
        let balance = Self::balance_of(env, from);
        env.storage()
            .persistent()
            .set(&DataKey::Balance(from.clone()), &(balance - shares));
        let total = Self::total_shares_internal(env);
        env.storage()
            .instance()
            .set(&DataKey::TotalShares, &(total - shares));
    }

    /// Shared instant-settlement path for `withdraw` and `redeem`:
    /// available-balance check, burn, payout, event.
    fn settle_instant(
        env: &Env,
        from: &Address,
        receiver: &Address,
        assets: i128,
        shares: i128,
    ) -> Result<(), VaultError> {
        if Self::available_balance_of(env, from) < shares {
            return Err(VaultError::InsufficientShares);
        }

        // EFFECTS before the outbound transfer.
        Self::burn_shares(env, from, shares);

        // INTERACTIONS
        Self::pay_out(env, receiver, assets)?;

        env.events().publish(
            (symbol_short!("withdraw"),),
            WithdrawProcessed {
                sender: from.clone(),
                receiver: receiver.clone(),
                owner: from.clone(),
                assets,
                shares,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    fn pay_out(env: &Env, receiver: &Address, assets: i128) -> Result<(), VaultError> {
        if Self::idle_base_balance(env) < assets {
            return Err(VaultError::InsufficientLiquidity);
        }
        let base = Self::base_token(env);
        token::Client::new(env, &base).transfer(
            &env.current_contract_address(),
            receiver,
            &assets,
        );
        Ok(())
    }

    // ==========================================================================
    // INTERNAL - NAV
    // ==========================================================================

    fn idle_base_balance(env: &Env) -> i128 {
        let base = Self::base_token(env);
        token::Client::new(env, &base).balance(&env.current_contract_address())
    }

    /// Live oracle valuation of every active holding: sum of
    /// `price_i * balance_i / 1e18`.
    fn compute_managed_value(env: &Env) -> Result<i128, VaultError> {
        let oracle_addr: Address = env
            .storage()
            .instance()
            .get(&DataKey::OracleAdapter)
            .expect("Oracle not set");
        let oracle = OracleAdapterClient::new(env, &oracle_addr);

        let mut total: i128 = 0;
        for asset in Self::asset_list(env).iter() {
            let holding = Self::holding_of(env, &asset)?;
            if !holding.active || holding.balance == 0 {
                continue;
            }
            let price = oracle.get_price(&asset);
            total += Self::mul_div_floor(env, holding.balance, price, PRECISION)?;
        }
        Ok(total)
    }

    fn current_total_assets(env: &Env) -> Result<i128, VaultError> {
        Ok(Self::idle_base_balance(env) + Self::compute_managed_value(env)?)
    }

    fn nav_of(env: &Env, total_assets: i128, total_shares: i128) -> Result<i128, VaultError> {
        if total_shares == 0 {
            return Ok(PRECISION);
        }
        Self::mul_div_floor(env, total_assets, PRECISION, total_shares)
    }

    /// `assets * totalShares / totalAssets`, 1:1 on an empty vault.
    fn shares_for_assets(
        env: &Env,
        assets: i128,
        total_shares: i128,
        total_assets: i128,
    ) -> Result<i128, VaultError> {
        if total_shares == 0 || total_assets == 0 {
            return Ok(assets);
        }
        Self::mul_div_floor(env, assets, total_shares, total_assets)
    }

    /// `shares * totalAssets / totalShares`, zero on an empty vault.
    fn assets_for_shares(
        env: &Env,
        shares: i128,
        total_shares: i128,
        total_assets: i128,
    ) -> Result<i128, VaultError> {
        if total_shares == 0 {
            return Ok(0);
        }
        Self::mul_div_floor(env, shares, total_assets, total_shares)
    }

    /// Floor of `a * b / denom` through a 256-bit intermediate. Products of
    /// two 1e18-scale quantities overflow i128, so the widening is not
    /// optional.
    fn mul_div_floor(env: &Env, a: i128, b: i128, denom: i128) -> Result<i128, VaultError> {
        if a < 0 || b < 0 || denom <= 0 {
            return Err(VaultError::MathOverflow);
        }
        let product =
            U256::from_u128(env, a as u128).mul(&U256::from_u128(env, b as u128));
        let quotient = product.div(&U256::from_u128(env, denom as u128));
        match quotient.to_u128() {
            Some(v) if v <= i128::MAX as u128 => Ok(v as i128),
            _ => Err(VaultError::MathOverflow),
        }
    }

    // ==========================================================================
    // INTERNAL - SAFETY RULES
    // ==========================================================================

    /// Trips the breaker when NAV has dropped from the reference beyond the
    /// threshold; ratchets the reference up when NAV makes a new high.
    fn run_circuit_breaker_check(env: &Env, total_assets: i128, total_shares: i128) {
        if total_shares == 0 {
            return;
        }
        let active: bool = env
            .storage()
            .instance()
            .get(&DataKey::CircuitBreakerActive)
            .unwrap_or(false);
        if active {
            return;
        }
        let nav = match Self::nav_of(env, total_assets, total_shares) {
            Ok(nav) => nav,
            Err(_) => return,
        };
        let reference: i128 = env
            .storage()
            .instance()
            .get(&DataKey::ReferenceNav)
            .unwrap_or(PRECISION);

        if nav > reference {
            env.storage().instance().set(&DataKey::ReferenceNav, &nav);
            return;
        }
        if reference <= 0 {
            return;
        }
        let drop_bps = (reference - nav) * BPS_DENOMINATOR / reference;
        let threshold: u32 = env
            .storage()
            .instance()
            .get(&DataKey::CircuitBreakerThreshold)
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD_BPS);
        if drop_bps >= threshold as i128 {
            env.storage()
                .instance()
                .set(&DataKey::CircuitBreakerActive, &true);
            env.events().publish(
                (symbol_short!("cb_trip"),),
                CircuitBreakerTriggered {
                    current_nav: nav,
                    reference_nav: reference,
                    drop_bps: drop_bps as u32,
                    timestamp: env.ledger().timestamp(),
                },
            );
        }
    }

    /// Instant-path ceilings: the absolute max, the instant limit, and the
    /// reduced limit while the breaker is active.
    fn enforce_instant_limits(env: &Env, assets: i128) -> Result<(), VaultError> {
        if assets > MAX_WITHDRAWAL {
            return Err(VaultError::ExceedsMaxWithdrawal);
        }
        if assets > INSTANT_WITHDRAWAL_LIMIT {
            return Err(VaultError::ExceedsInstantLimit);
        }
        let breaker_active: bool = env
            .storage()
            .instance()
            .get(&DataKey::CircuitBreakerActive)
            .unwrap_or(false);
        if breaker_active {
            let reduced: i128 = env
                .storage()
                .instance()
                .get(&DataKey::CircuitBreakerLimit)
                .unwrap_or(DEFAULT_CIRCUIT_BREAKER_LIMIT);
            if assets > reduced {
                return Err(VaultError::CircuitBreakerRestricted);
            }
        }
        Ok(())
    }

    #[inline]
    fn require_not_paused(env: &Env) -> Result<(), VaultError> {
        if Self::is_paused(env.clone()) {
            return Err(VaultError::VaultPaused);
        }
        Ok(())
    }

    /// Withdraw paths stay open while paused only if emergency-withdraw is
    /// enabled.
    #[inline]
    fn require_withdrawals_open(env: &Env) -> Result<(), VaultError> {
        if Self::is_paused(env.clone()) && !Self::is_emergency_withdraw_enabled(env.clone()) {
            return Err(VaultError::VaultPaused);
        }
        Ok(())
    }

    #[inline]
    fn require_owner(env: &Env) {
        let owner: Address = env
            .storage()
            .instance()
            .get(&DataKey::Owner)
            .expect("Owner not set");
        owner.require_auth();
    }

    fn require_rebalancer(env: &Env, caller: &Address) -> Result<(), VaultError> {
        let owner: Address = env
            .storage()
            .instance()
            .get(&DataKey::Owner)
            .expect("Owner not set");
        let rebalancer: Address = env
            .storage()
            .instance()
            .get(&DataKey::Rebalancer)
            .expect("Rebalancer not set");
        if *caller != owner && *caller != rebalancer {
            return Err(VaultError::Unauthorized);
        }
        caller.require_auth();
        Ok(())
    }

    // ==========================================================================
    // INTERNAL - COLLABORATORS & HOLDINGS
    // ==========================================================================

    fn base_token(env: &Env) -> Address {
        env.storage()
            .instance()
            .get(&DataKey::BaseToken)
            .expect("Base token not set")
    }

    fn swap_executor_client(env: &Env) -> SwapExecutorClient {
        let addr: Address = env
            .storage()
            .instance()
            .get(&DataKey::SwapExecutor)
            .expect("Swap executor not set");
        SwapExecutorClient::new(env, &addr)
    }

    fn asset_registry_client(env: &Env) -> AssetRegistryClient {
        let addr: Address = env
            .storage()
            .instance()
            .get(&DataKey::AssetRegistry)
            .expect("Asset registry not set");
        AssetRegistryClient::new(env, &addr)
    }

    fn asset_list(env: &Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::Assets)
            .unwrap_or_else(|| Vec::new(env))
    }

    fn holding_of(env: &Env, asset: &Address) -> Result<Holding, VaultError> {
        env.storage()
            .persistent()
            .get(&DataKey::Holding(asset.clone()))
            .ok_or(VaultError::AssetNotFound)
    }

    fn drop_asset(env: &Env, asset: &Address) {
        env.storage()
            .persistent()
            .remove(&DataKey::Holding(asset.clone()));
        let assets = Self::asset_list(env);
        let mut remaining = Vec::new(env);
        for a in assets.iter() {
            if a != *asset {
                remaining.push_back(a);
            }
        }
        env.storage().instance().set(&DataKey::Assets, &remaining);
    }

    /// Pre-authorizes the base-token pull the venue performs during a buy.
    /// The venue transfers `amount` of base from the vault, two call frames
    /// down, so invoker auth does not reach it.
    fn authorize_venue_spend(
        env: &Env,
        executor: &SwapExecutorClient,
        base: &Address,
        amount: i128,
    ) {
        let venue = executor.get_venue();
        let self_addr = env.current_contract_address();
        let transfer_args: Vec<Val> = vec![
            env,
            self_addr.into_val(env),
            venue.into_val(env),
            amount.into_val(env),
        ];
        env.authorize_as_current_contract(vec![
            env,
            InvokerContractAuthEntry::Contract(SubContractInvocation {
                context: ContractContext {
                    contract: base.clone(),
                    fn_name: Symbol::new(env, "transfer"),
                    args: transfer_args,
                },
                sub_invocations: vec![env],
            }),
        ]);
    }
}

mod test;
