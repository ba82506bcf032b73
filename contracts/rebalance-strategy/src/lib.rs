//! # PNGY Rebalance Strategy
//!
//! Pure computation surface for the vault's rebalancing: APY-weighted target
//! allocations, the deviation trigger, and buy/sell trade-list generation.
//! Nothing here moves funds - the vault (or an off-chain operator) feeds the
//! current portfolio in and executes the resulting trades through the swap
//! executor.
//!
//! Allocation model: equal-weight baseline `10000 / N`, tilted toward
//! higher-yield assets by `(apy_i - avg) * sensitivity / 100`, clamped to
//! per-asset bounds, then normalized so targets sum to exactly 10000 basis
//! points (integer-division remainder goes to the last asset).

#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short,
    Address, Env, Vec,
};

pub const BPS_DENOMINATOR: u32 = 10_000;

/// How aggressively allocation tilts toward higher-yield assets, in [0, 100].
pub const DEFAULT_SENSITIVITY: u32 = 50;
pub const MAX_SENSITIVITY: u32 = 100;

/// Rebalance is warranted once the worst allocation deviation reaches this.
pub const DEFAULT_REBALANCE_THRESHOLD_BPS: u32 = 500;
pub const MAX_REBALANCE_THRESHOLD_BPS: u32 = 5_000;

/// Trades below this USD value (1e18 fixed-point) are dust and dropped.
pub const DEFAULT_MIN_TRADE_VALUE: i128 = 100_000_000_000_000_000_000; // $100

pub const DEFAULT_MIN_ALLOCATION_BPS: u32 = 100; // 1%
pub const DEFAULT_MAX_ALLOCATION_BPS: u32 = 5_000; // 50%

const TTL_THRESHOLD: u32 = 17_280;
const TTL_EXTEND_TO: u32 = 518_400;

// ============================================================================
// TYPES
// ============================================================================

/// Per-asset input: where the portfolio currently stands.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetSnapshot {
    pub asset: Address,
    pub current_allocation_bps: u32,
    /// Current USD value of the holding, 1e18 fixed-point
    pub current_value: i128,
    pub apy_bps: u32,
}

/// Per-asset output of the allocation computation.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetAllocation {
    pub asset: Address,
    pub target_bps: u32,
    /// target - current, signed
    pub delta_bps: i32,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TradeAction {
    Buy,
    Sell,
}

/// One trade the vault should execute. `value` is in USD terms (1e18);
/// the executor converts to token-native amounts at the current price.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TradeInstruction {
    pub asset: Address,
    pub action: TradeAction,
    pub value: i128,
}

/// Per-asset allocation clamp, overridable by the admin.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationBounds {
    pub min_bps: u32,
    pub max_bps: u32,
}

/// Tunable strategy parameters, returned by `get_params`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StrategyParams {
    pub sensitivity: u32,
    pub rebalance_threshold_bps: u32,
    pub min_trade_value: i128,
}

#[contracttype]
pub enum DataKey {
    Admin,
    Sensitivity,
    RebalanceThreshold,
    MinTradeValue,
    Bounds(Address),
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StrategyError {
    EmptyAssetList = 1,
    ArrayLengthMismatch = 2,
    /// Target allocations must sum to exactly 10000 bps
    AllocationSumInvalid = 3,
    SensitivityOutOfRange = 4,
    ThresholdOutOfRange = 5,
    InvalidBounds = 6,
    InvalidTradeValue = 7,
    InvalidTotalValue = 8,
}

// ============================================================================
// EVENTS
// ============================================================================

#[contracttype]
pub struct StrategyParamsUpdated {
    pub sensitivity: u32,
    pub rebalance_threshold_bps: u32,
    pub min_trade_value: i128,
    pub timestamp: u64,
}

#[contracttype]
pub struct AllocationBoundsUpdated {
    pub asset: Address,
    pub min_bps: u32,
    pub max_bps: u32,
    pub timestamp: u64,
}

// ============================================================================
// CONTRACT
// ============================================================================

#[contract]
pub struct RebalanceStrategy;

#[contractimpl]
impl RebalanceStrategy {
    pub fn initialize(env: Env, admin: Address) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("Already initialized");
        }
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage()
            .instance()
            .set(&DataKey::Sensitivity, &DEFAULT_SENSITIVITY);
        env.storage()
            .instance()
            .set(&DataKey::RebalanceThreshold, &DEFAULT_REBALANCE_THRESHOLD_BPS);
        env.storage()
            .instance()
            .set(&DataKey::MinTradeValue, &DEFAULT_MIN_TRADE_VALUE);
    }

    // ==========================================================================
    // ADMIN CONFIGURATION
    // ==========================================================================

    pub fn set_sensitivity(env: Env, sensitivity: u32) -> Result<(), StrategyError> {
        Self::require_admin(&env);
        if sensitivity > MAX_SENSITIVITY {
            return Err(StrategyError::SensitivityOutOfRange);
        }
        env.storage().instance().set(&DataKey::Sensitivity, &sensitivity);
        Self::publish_params(&env);
        Ok(())
    }

    pub fn set_rebalance_threshold(env: Env, threshold_bps: u32) -> Result<(), StrategyError> {
        Self::require_admin(&env);
        if threshold_bps == 0 || threshold_bps > MAX_REBALANCE_THRESHOLD_BPS {
            return Err(StrategyError::ThresholdOutOfRange);
        }
        env.storage()
            .instance()
            .set(&DataKey::RebalanceThreshold, &threshold_bps);
        Self::publish_params(&env);
        Ok(())
    }

    pub fn set_min_trade_value(env: Env, value: i128) -> Result<(), StrategyError> {
        Self::require_admin(&env);
        if value <= 0 {
            return Err(StrategyError::InvalidTradeValue);
        }
        env.storage().instance().set(&DataKey::MinTradeValue, &value);
        Self::publish_params(&env);
        Ok(())
    }

    /// Overrides the allocation clamp for one asset.
    pub fn set_allocation_bounds(
        env: Env,
        asset: Address,
        min_bps: u32,
        max_bps: u32,
    ) -> Result<(), StrategyError> {
        Self::require_admin(&env);
        if min_bps > max_bps || max_bps > BPS_DENOMINATOR {
            return Err(StrategyError::InvalidBounds);
        }
        env.storage().persistent().set(
            &DataKey::Bounds(asset.clone()),
            &AllocationBounds { min_bps, max_bps },
        );
        env.events().publish(
            (symbol_short!("bounds"),),
            AllocationBoundsUpdated {
                asset,
                min_bps,
                max_bps,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // COMPUTATION
    // ==========================================================================

    /// APY-weighted target allocations for the given portfolio.
    ///
    /// Targets always sum to exactly 10000 bps; `delta_bps` is the signed
    /// move each asset needs. Read-only.
    pub fn calculate_optimal_allocation(
        env: Env,
        assets: Vec<AssetSnapshot>,
    ) -> Result<Vec<AssetAllocation>, StrategyError> {
        let n = assets.len();
        if n == 0 {
            return Err(StrategyError::EmptyAssetList);
        }

        let sensitivity: i128 = env
            .storage()
            .instance()
            .get::<DataKey, u32>(&DataKey::Sensitivity)
            .unwrap_or(DEFAULT_SENSITIVITY) as i128;

        let mut apy_sum: i128 = 0;
        for snapshot in assets.iter() {
            apy_sum += snapshot.apy_bps as i128;
        }
        let avg_apy = apy_sum / n as i128;
        let base_allocation = (BPS_DENOMINATOR / n) as i128;

        // Tilt and clamp each asset, tracking the raw total for normalization.
        let mut raw = Vec::<i128>::new(&env);
        let mut raw_sum: i128 = 0;
        for snapshot in assets.iter() {
            let bounds = Self::bounds_for(&env, &snapshot.asset);
            let adjustment = (snapshot.apy_bps as i128 - avg_apy) * sensitivity / 100;
            let mut allocation = base_allocation + adjustment;
            if allocation < bounds.min_bps as i128 {
                allocation = bounds.min_bps as i128;
            }
            if allocation > bounds.max_bps as i128 {
                allocation = bounds.max_bps as i128;
            }
            raw.push_back(allocation);
            raw_sum += allocation;
        }

        // Degenerate portfolio where every clamp lands on zero: fall back to
        // the equal-weight baseline rather than divide by zero.
        if raw_sum == 0 {
            raw = Vec::new(&env);
            for _ in 0..n {
                raw.push_back(base_allocation);
            }
            raw_sum = base_allocation * n as i128;
        }

        // Normalize to exactly 10000; the floor-division remainder lands on
        // the last asset.
        let mut out = Vec::<AssetAllocation>::new(&env);
        let mut allocated: i128 = 0;
        for i in 0..n {
            let snapshot = assets.get_unchecked(i);
            let target = if i == n - 1 {
                BPS_DENOMINATOR as i128 - allocated
            } else {
                raw.get_unchecked(i) * BPS_DENOMINATOR as i128 / raw_sum
            };
            allocated += target;
            out.push_back(AssetAllocation {
                asset: snapshot.asset.clone(),
                target_bps: target as u32,
                delta_bps: (target - snapshot.current_allocation_bps as i128) as i32,
            });
        }
        Ok(out)
    }

    /// Whether the worst per-asset deviation from target warrants a
    /// rebalance, and that deviation in bps. Read-only.
    pub fn is_rebalance_needed(
        env: Env,
        assets: Vec<AssetSnapshot>,
        target_allocations: Vec<u32>,
    ) -> Result<(bool, u32), StrategyError> {
        Self::validate_targets(&assets, &target_allocations)?;

        let mut max_deviation: i128 = 0;
        for i in 0..assets.len() {
            let current = assets.get_unchecked(i).current_allocation_bps as i128;
            let target = target_allocations.get_unchecked(i) as i128;
            let deviation = (current - target).abs();
            if deviation > max_deviation {
                max_deviation = deviation;
            }
        }

        let threshold: u32 = env
            .storage()
            .instance()
            .get(&DataKey::RebalanceThreshold)
            .unwrap_or(DEFAULT_REBALANCE_THRESHOLD_BPS);
        Ok((max_deviation >= threshold as i128, max_deviation as u32))
    }

    /// Buy/sell instructions that move the portfolio to the target
    /// allocations, dust-filtered at the configured minimum trade value.
    /// Amounts are USD values (1e18); conversion to token-native amounts at
    /// the current price is the executing caller's job. Read-only.
    pub fn generate_rebalance_trades(
        env: Env,
        assets: Vec<AssetSnapshot>,
        target_allocations: Vec<u32>,
        total_value: i128,
    ) -> Result<Vec<TradeInstruction>, StrategyError> {
        Self::validate_targets(&assets, &target_allocations)?;
        if total_value < 0 {
            return Err(StrategyError::InvalidTotalValue);
        }

        let min_trade: i128 = env
            .storage()
            .instance()
            .get(&DataKey::MinTradeValue)
            .unwrap_or(DEFAULT_MIN_TRADE_VALUE);

        let mut trades = Vec::<TradeInstruction>::new(&env);
        for i in 0..assets.len() {
            let snapshot = assets.get_unchecked(i);
            let target = target_allocations.get_unchecked(i) as i128;
            let desired_value = total_value * target / BPS_DENOMINATOR as i128;
            let delta = desired_value - snapshot.current_value;
            if delta.abs() < min_trade {
                continue;
            }
            trades.push_back(TradeInstruction {
                asset: snapshot.asset.clone(),
                action: if delta > 0 {
                    TradeAction::Buy
                } else {
                    TradeAction::Sell
                },
                value: delta.abs(),
            });
        }
        Ok(trades)
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    pub fn get_params(env: Env) -> StrategyParams {
        StrategyParams {
            sensitivity: env
                .storage()
                .instance()
                .get(&DataKey::Sensitivity)
                .unwrap_or(DEFAULT_SENSITIVITY),
            rebalance_threshold_bps: env
                .storage()
                .instance()
                .get(&DataKey::RebalanceThreshold)
                .unwrap_or(DEFAULT_REBALANCE_THRESHOLD_BPS),
            min_trade_value: env
                .storage()
                .instance()
                .get(&DataKey::MinTradeValue)
                .unwrap_or(DEFAULT_MIN_TRADE_VALUE),
        }
    }

    pub fn get_allocation_bounds(env: Env, asset: Address) -> AllocationBounds {
        Self::bounds_for(&env, &asset)
    }

    pub fn get_admin(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Admin).unwrap()
    }

    // ==========================================================================
    // INTERNAL HELPERS
    // ==========================================================================

    fn validate_targets(
        assets: &Vec<AssetSnapshot>,
        targets: &Vec<u32>,
    ) -> Result<(), StrategyError> {
        if assets.len() == 0 {
            return Err(StrategyError::EmptyAssetList);
        }
        if assets.len() != targets.len() {
            return Err(StrategyError::ArrayLengthMismatch);
        }
        let mut sum: i128 = 0;
        for t in targets.iter() {
            sum += t as i128;
        }
        if sum != BPS_DENOMINATOR as i128 {
            return Err(StrategyError::AllocationSumInvalid);
        }
        Ok(())
    }

    fn bounds_for(env: &Env, asset: &Address) -> AllocationBounds {
        env.storage()
            .persistent()
            .get(&DataKey::Bounds(asset.clone()))
            .unwrap_or(AllocationBounds {
                min_bps: DEFAULT_MIN_ALLOCATION_BPS,
                max_bps: DEFAULT_MAX_ALLOCATION_BPS,
            })
    }

    fn publish_params(env: &Env) {
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        let params = Self::get_params(env.clone());
        env.events().publish(
            (symbol_short!("params"),),
            StrategyParamsUpdated {
                sensitivity: params.sensitivity,
                rebalance_threshold_bps: params.rebalance_threshold_bps,
                min_trade_value: params.min_trade_value,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    #[inline]
    fn require_admin(env: &Env) {
        let admin: Address = env
            .storage()
            .instance()
            .get(&DataKey::Admin)
            .expect("Admin not set");
        admin.require_auth();
    }
}
