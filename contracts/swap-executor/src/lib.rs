//! # PNGY Swap Executor
//!
//! Slippage-bounded exchange between two tokens through an external liquidity
//! venue. The executor quotes the venue, derives a minimum-output floor from
//! the slippage tolerance, and fails the entire invocation if the venue
//! delivers less - there is never a partial-fill state.
//!
//! The slippage tolerance is hard-capped at 2% regardless of caller input;
//! a zero tolerance selects the configured default.

#![no_std]

use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype,
    symbol_short, Address, Env,
};

pub const BPS_DENOMINATOR: i128 = 10_000;

/// Hard ceiling on slippage tolerance: 2%.
pub const MAX_SWAP_SLIPPAGE_BPS: u32 = 200;

const TTL_THRESHOLD: u32 = 17_280;
const TTL_EXTEND_TO: u32 = 518_400;

// ============================================================================
// EXTERNAL VENUE INTERFACE
// ============================================================================

/// Interface of the liquidity venue the executor trades through.
#[contractclient(name = "LiquidityVenueClient")]
pub trait LiquidityVenue {
    /// Expected output for an exact-input trade, no state change.
    fn quote(env: Env, token_in: Address, token_out: Address, amount_in: i128) -> i128;

    /// Executes the trade for `trader`, returning the delivered output.
    fn swap(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        min_amount_out: i128,
    ) -> i128;
}

// ============================================================================
// TYPES
// ============================================================================

#[contracttype]
pub enum DataKey {
    Admin,
    Venue,
    DefaultSlippage,
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SwapError {
    ZeroAmount = 1,
    SameToken = 2,
    /// Venue delivered less than the slippage floor
    SlippageExceeded = 3,
    /// Venue quoted no output for the pair
    NoLiquidity = 4,
    SlippageOutOfRange = 5,
}

// ============================================================================
// EVENTS
// ============================================================================

#[contracttype]
pub struct SwapExecuted {
    pub trader: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: i128,
    pub amount_out: i128,
    pub min_amount_out: i128,
    pub timestamp: u64,
}

#[contracttype]
pub struct VenueUpdated {
    pub old_venue: Address,
    pub new_venue: Address,
    pub timestamp: u64,
}

#[contracttype]
pub struct SlippageUpdated {
    pub old_slippage_bps: u32,
    pub new_slippage_bps: u32,
    pub timestamp: u64,
}

// ============================================================================
// CONTRACT
// ============================================================================

#[contract]
pub struct SwapExecutor;

#[contractimpl]
impl SwapExecutor {
    /// `default_slippage_bps` must be in (0, 200].
    pub fn initialize(env: Env, admin: Address, venue: Address, default_slippage_bps: u32) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("Already initialized");
        }
        assert!(
            default_slippage_bps > 0 && default_slippage_bps <= MAX_SWAP_SLIPPAGE_BPS,
            "Slippage out of range"
        );
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Venue, &venue);
        env.storage()
            .instance()
            .set(&DataKey::DefaultSlippage, &default_slippage_bps);
    }

    // ==========================================================================
    // ADMIN CONFIGURATION
    // ==========================================================================

    pub fn set_venue(env: Env, venue: Address) {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        let old: Address = env.storage().instance().get(&DataKey::Venue).unwrap();
        env.storage().instance().set(&DataKey::Venue, &venue);
        env.events().publish(
            (symbol_short!("venue"),),
            VenueUpdated {
                old_venue: old,
                new_venue: venue,
                timestamp: env.ledger().timestamp(),
            },
        );
    }

    pub fn set_default_slippage(env: Env, slippage_bps: u32) -> Result<(), SwapError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        if slippage_bps == 0 || slippage_bps > MAX_SWAP_SLIPPAGE_BPS {
            return Err(SwapError::SlippageOutOfRange);
        }
        let old: u32 = env
            .storage()
            .instance()
            .get(&DataKey::DefaultSlippage)
            .unwrap_or(MAX_SWAP_SLIPPAGE_BPS);
        env.storage()
            .instance()
            .set(&DataKey::DefaultSlippage, &slippage_bps);
        env.events().publish(
            (symbol_short!("slippage"),),
            SlippageUpdated {
                old_slippage_bps: old,
                new_slippage_bps: slippage_bps,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // SWAPS
    // ==========================================================================

    /// Quote only, no state change.
    pub fn get_amount_out(
        env: Env,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
    ) -> Result<i128, SwapError> {
        Self::validate_pair(&token_in, &token_out, amount_in)?;
        let venue = Self::venue_client(&env);
        Ok(venue.quote(&token_in, &token_out, &amount_in))
    }

    /// Acquire `token_out` with `token_in` under the slippage bound.
    pub fn buy(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        max_slippage_bps: u32,
    ) -> Result<i128, SwapError> {
        trader.require_auth();
        Self::execute(&env, &trader, &token_in, &token_out, amount_in, max_slippage_bps)
    }

    /// Dispose of `token_in` for `token_out` under the slippage bound.
    /// Mechanically identical to `buy`; the two entry points exist so the
    /// direction of a vault trade is explicit in transaction history.
    pub fn sell(
        env: Env,
        trader: Address,
        token_in: Address,
        token_out: Address,
        amount_in: i128,
        max_slippage_bps: u32,
    ) -> Result<i128, SwapError> {
        trader.require_auth();
        Self::execute(&env, &trader, &token_in, &token_out, amount_in, max_slippage_bps)
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    pub fn get_venue(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Venue).unwrap()
    }

    pub fn get_default_slippage(env: Env) -> u32 {
        env.storage()
            .instance()
            .get(&DataKey::DefaultSlippage)
            .unwrap_or(MAX_SWAP_SLIPPAGE_BPS)
    }

    pub fn get_admin(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Admin).unwrap()
    }

    // ==========================================================================
    // INTERNAL HELPERS
    // ==========================================================================

    fn execute(
        env: &Env,
        trader: &Address,
        token_in: &Address,
        token_out: &Address,
        amount_in: i128,
        max_slippage_bps: u32,
    ) -> Result<i128, SwapError> {
        Self::validate_pair(token_in, token_out, amount_in)?;
        let slippage = Self::effective_slippage(env, max_slippage_bps);

        let venue = Self::venue_client(env);
        let expected = venue.quote(token_in, token_out, &amount_in);
        if expected <= 0 {
            return Err(SwapError::NoLiquidity);
        }

        let min_amount_out = expected * (BPS_DENOMINATOR - slippage as i128) / BPS_DENOMINATOR;
        let amount_out = venue.swap(trader, token_in, token_out, &amount_in, &min_amount_out);
        if amount_out < min_amount_out {
            return Err(SwapError::SlippageExceeded);
        }

        env.events().publish(
            (symbol_short!("swap"),),
            SwapExecuted {
                trader: trader.clone(),
                token_in: token_in.clone(),
                token_out: token_out.clone(),
                amount_in,
                amount_out,
                min_amount_out,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(amount_out)
    }

    #[inline]
    fn validate_pair(
        token_in: &Address,
        token_out: &Address,
        amount_in: i128,
    ) -> Result<(), SwapError> {
        if amount_in <= 0 {
            return Err(SwapError::ZeroAmount);
        }
        if token_in == token_out {
            return Err(SwapError::SameToken);
        }
        Ok(())
    }

    /// Zero selects the configured default; anything else is capped at the
    /// 2% ceiling.
    #[inline]
    fn effective_slippage(env: &Env, requested_bps: u32) -> u32 {
        if requested_bps == 0 {
            Self::get_default_slippage(env.clone())
        } else if requested_bps > MAX_SWAP_SLIPPAGE_BPS {
            MAX_SWAP_SLIPPAGE_BPS
        } else {
            requested_bps
        }
    }

    fn require_admin(env: &Env) {
        let admin: Address = env
            .storage()
            .instance()
            .get(&DataKey::Admin)
            .expect("Admin not set");
        admin.require_auth();
    }

    fn venue_client(env: &Env) -> LiquidityVenueClient {
        let venue: Address = env
            .storage()
            .instance()
            .get(&DataKey::Venue)
            .expect("Venue not set");
        LiquidityVenueClient::new(env, &venue)
    }
}
