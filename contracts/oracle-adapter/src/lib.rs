//! # PNGY Oracle Adapter
//!
//! Resolves a USD price for each RWA token from a primary feed with automatic
//! failover to a backup feed. Feeds are external contracts implementing the
//! SEP-40 shape (`lastprice`/`price` returning `Option<PriceData>`); the
//! adapter never lets a single misbehaving feed halt the vault: feed calls go
//! through `try_` invocations, so a reverting or missing feed is simply
//! "unavailable" and the resolution order moves on.
//!
//! Resolution order for an asset:
//! 1. primary, if configured, fresh (`timestamp + threshold >= now`) and positive;
//! 2. backup, if configured and positive - accepted even if stale, it is the
//!    last resort before total failure;
//! 3. primary re-attempted, accepted even if stale;
//! 4. `AllOraclesFailed`.
//!
//! Staleness thresholds: per-asset override (0 = use global default), global
//! default 2 hours, both bounded to 24 hours.

#![no_std]

use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype,
    symbol_short, Address, Env,
};

/// Global default staleness threshold: 2 hours.
pub const DEFAULT_STALENESS_SECS: u64 = 2 * 3600;

/// Hard upper bound on any staleness threshold: 24 hours.
pub const MAX_STALENESS_SECS: u64 = 24 * 3600;

const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

// ============================================================================
// EXTERNAL FEED INTERFACE
// ============================================================================

/// Price record served by a feed (SEP-40 shape).
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceData {
    pub price: i128,    // USD price, 1e18 fixed-point
    pub timestamp: u64, // recording timestamp
}

/// Interface of the external price-feed contracts the adapter queries.
#[contractclient(name = "PriceFeedClient")]
pub trait PriceFeed {
    /// Most recent price record for the asset.
    fn lastprice(env: Env, asset: Address) -> Option<PriceData>;

    /// Price record at (or closest before) the given timestamp.
    fn price(env: Env, asset: Address, timestamp: u64) -> Option<PriceData>;
}

// ============================================================================
// TYPES
// ============================================================================

/// Which feed ultimately served a quote.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PriceSource {
    Primary,
    Backup,
}

/// A resolved quote. Never persisted; freshness is relative to the
/// resolution-time clock.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceQuote {
    pub price: i128,
    pub updated_at: u64,
    pub source: PriceSource,
}

/// Per-asset feed configuration. At least one of primary/backup is always
/// set while a config exists.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeedConfig {
    pub primary: Option<Address>,
    pub backup: Option<Address>,
    /// Per-asset staleness threshold in seconds; 0 = use the global default
    pub staleness_override: u64,
}

#[contracttype]
pub enum DataKey {
    Admin,
    DefaultStaleness,
    /// Feed configuration per asset token
    Feeds(Address),
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum OracleError {
    /// No feed configuration exists for the asset
    NotConfigured = 1,
    /// Every configured source failed to yield a positive price
    AllOraclesFailed = 2,
    /// configure_feeds was called with neither a primary nor a backup
    NoFeedProvided = 3,
    /// Staleness threshold outside (0, 24h]
    StalenessOutOfRange = 4,
}

// ============================================================================
// EVENTS
// ============================================================================

#[contracttype]
pub struct OracleConfigured {
    pub asset: Address,
    pub primary: Option<Address>,
    pub backup: Option<Address>,
    pub staleness_override: u64,
    pub timestamp: u64,
}

#[contracttype]
pub struct OracleRemoved {
    pub asset: Address,
    pub timestamp: u64,
}

/// Emitted whenever a quote is served by anything other than a fresh primary.
#[contracttype]
pub struct OracleFailover {
    pub asset: Address,
    pub source: PriceSource,
    pub timestamp: u64,
}

#[contracttype]
pub struct StalenessUpdated {
    pub old_staleness: u64,
    pub new_staleness: u64,
    pub timestamp: u64,
}

// ============================================================================
// CONTRACT
// ============================================================================

#[contract]
pub struct OracleAdapter;

#[contractimpl]
impl OracleAdapter {
    /// Initializes the adapter. `default_staleness` must be in (0, 24h].
    pub fn initialize(env: Env, admin: Address, default_staleness: u64) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("Already initialized");
        }
        assert!(
            default_staleness > 0 && default_staleness <= MAX_STALENESS_SECS,
            "Staleness out of range"
        );
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage()
            .instance()
            .set(&DataKey::DefaultStaleness, &default_staleness);
    }

    // ==========================================================================
    // ADMIN CONFIGURATION
    // ==========================================================================

    /// Sets (or replaces) the feed pair for an asset.
    ///
    /// At least one of `primary`/`backup` must be provided; the per-asset
    /// staleness override is bounded to 24 hours (0 keeps the global default).
    pub fn configure_feeds(
        env: Env,
        asset: Address,
        primary: Option<Address>,
        backup: Option<Address>,
        staleness_override: u64,
    ) -> Result<(), OracleError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        if primary.is_none() && backup.is_none() {
            return Err(OracleError::NoFeedProvided);
        }
        if staleness_override > MAX_STALENESS_SECS {
            return Err(OracleError::StalenessOutOfRange);
        }

        let config = FeedConfig {
            primary: primary.clone(),
            backup: backup.clone(),
            staleness_override,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Feeds(asset.clone()), &config);

        env.events().publish(
            (symbol_short!("oracfg"),),
            OracleConfigured {
                asset,
                primary,
                backup,
                staleness_override,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Clears the feed configuration for an asset.
    pub fn remove_feeds(env: Env, asset: Address) -> Result<(), OracleError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let key = DataKey::Feeds(asset.clone());
        if !env.storage().persistent().has(&key) {
            return Err(OracleError::NotConfigured);
        }
        env.storage().persistent().remove(&key);

        env.events().publish(
            (symbol_short!("orarem"),),
            OracleRemoved {
                asset,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Updates the global default staleness threshold, bounded to (0, 24h].
    pub fn set_default_staleness(env: Env, secs: u64) -> Result<(), OracleError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        if secs == 0 || secs > MAX_STALENESS_SECS {
            return Err(OracleError::StalenessOutOfRange);
        }
        let old: u64 = env
            .storage()
            .instance()
            .get(&DataKey::DefaultStaleness)
            .unwrap_or(DEFAULT_STALENESS_SECS);
        env.storage().instance().set(&DataKey::DefaultStaleness, &secs);

        env.events().publish(
            (symbol_short!("stale_set"),),
            StalenessUpdated {
                old_staleness: old,
                new_staleness: secs,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // PRICE RESOLUTION
    // ==========================================================================

    /// Resolved price for the asset (1e18 fixed-point).
    pub fn get_price(env: Env, asset: Address) -> Result<i128, OracleError> {
        let quote = Self::resolve(&env, &asset)?;
        Ok(quote.price)
    }

    /// Resolved price plus the feed's recording timestamp.
    pub fn get_price_with_timestamp(
        env: Env,
        asset: Address,
    ) -> Result<(i128, u64), OracleError> {
        let quote = Self::resolve(&env, &asset)?;
        Ok((quote.price, quote.updated_at))
    }

    /// Full quote: price, timestamp, and which feed served it.
    pub fn get_price_with_source(env: Env, asset: Address) -> Result<PriceQuote, OracleError> {
        Self::resolve(&env, &asset)
    }

    /// Historical price-at-time query, same failover order on availability
    /// (no freshness gating - the timestamp is the caller's choice).
    pub fn price_at(env: Env, asset: Address, timestamp: u64) -> Result<PriceData, OracleError> {
        let config = Self::feed_config(&env, &asset)?;

        if let Some(feed) = &config.primary {
            if let Some(data) = Self::query_feed_at(&env, feed, &asset, timestamp) {
                return Ok(data);
            }
        }
        if let Some(feed) = &config.backup {
            if let Some(data) = Self::query_feed_at(&env, feed, &asset, timestamp) {
                return Ok(data);
            }
        }
        Err(OracleError::AllOraclesFailed)
    }

    /// True when the quote the adapter would currently serve is older than
    /// the effective staleness threshold.
    pub fn is_price_stale(env: Env, asset: Address) -> Result<bool, OracleError> {
        let config = Self::feed_config(&env, &asset)?;
        let threshold = Self::effective_staleness(&env, &config);
        let quote = Self::resolve(&env, &asset)?;
        Ok(quote.updated_at + threshold < env.ledger().timestamp())
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    pub fn get_feed_config(env: Env, asset: Address) -> Result<FeedConfig, OracleError> {
        Self::feed_config(&env, &asset)
    }

    pub fn get_default_staleness(env: Env) -> u64 {
        env.storage()
            .instance()
            .get(&DataKey::DefaultStaleness)
            .unwrap_or(DEFAULT_STALENESS_SECS)
    }

    pub fn get_admin(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Admin).unwrap()
    }

    // ==========================================================================
    // INTERNAL HELPERS
    // ==========================================================================

    /// Failover resolution. Feed queries that revert or return nothing are
    /// treated as unavailable; only total exhaustion is an error.
    fn resolve(env: &Env, asset: &Address) -> Result<PriceQuote, OracleError> {
        let config = Self::feed_config(env, asset)?;
        let threshold = Self::effective_staleness(env, &config);
        let now = env.ledger().timestamp();

        // 1. Fresh primary wins.
        if let Some(feed) = &config.primary {
            if let Some(data) = Self::query_feed(env, feed, asset) {
                if data.timestamp + threshold >= now {
                    return Ok(PriceQuote {
                        price: data.price,
                        updated_at: data.timestamp,
                        source: PriceSource::Primary,
                    });
                }
            }
        }

        // 2. Backup, accepted even if stale: it is the last resort before
        //    total failure.
        if let Some(feed) = &config.backup {
            if let Some(data) = Self::query_feed(env, feed, asset) {
                Self::publish_failover(env, asset, PriceSource::Backup);
                return Ok(PriceQuote {
                    price: data.price,
                    updated_at: data.timestamp,
                    source: PriceSource::Backup,
                });
            }
        }

        // 3. Backup unavailable: re-attempt the primary and accept a stale
        //    result rather than fail the caller.
        if let Some(feed) = &config.primary {
            if let Some(data) = Self::query_feed(env, feed, asset) {
                Self::publish_failover(env, asset, PriceSource::Primary);
                return Ok(PriceQuote {
                    price: data.price,
                    updated_at: data.timestamp,
                    source: PriceSource::Primary,
                });
            }
        }

        Err(OracleError::AllOraclesFailed)
    }

    /// One guarded feed query. A panicking feed, a feed returning `None`, or
    /// a non-positive price all collapse to `None`.
    fn query_feed(env: &Env, feed: &Address, asset: &Address) -> Option<PriceData> {
        let client = PriceFeedClient::new(env, feed);
        match client.try_lastprice(asset) {
            Ok(Ok(Some(data))) if data.price > 0 => Some(data),
            _ => None,
        }
    }

    fn query_feed_at(
        env: &Env,
        feed: &Address,
        asset: &Address,
        timestamp: u64,
    ) -> Option<PriceData> {
        let client = PriceFeedClient::new(env, feed);
        match client.try_price(asset, &timestamp) {
            Ok(Ok(Some(data))) if data.price > 0 => Some(data),
            _ => None,
        }
    }

    fn feed_config(env: &Env, asset: &Address) -> Result<FeedConfig, OracleError> {
        env.storage()
            .persistent()
            .get(&DataKey::Feeds(asset.clone()))
            .ok_or(OracleError::NotConfigured)
    }

    #[inline]
    fn effective_staleness(env: &Env, config: &FeedConfig) -> u64 {
        if config.staleness_override > 0 {
            config.staleness_override
        } else {
            env.storage()
                .instance()
                .get(&DataKey::DefaultStaleness)
                .unwrap_or(DEFAULT_STALENESS_SECS)
        }
    }

    fn publish_failover(env: &Env, asset: &Address, source: PriceSource) {
        env.events().publish(
            (symbol_short!("failover"),),
            OracleFailover {
                asset: asset.clone(),
                source,
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
