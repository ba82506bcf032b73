//! # PNGY Asset Registry
//!
//! Bookkeeping of which RWA tokens are eligible for the PNGY vault: their
//! metadata (asset class, oracle source hint) and lifecycle status. The vault
//! consults `is_asset_active` before accepting a token into its holdings; the
//! registry itself never touches balances.
//!
//! Lifecycle: `Active` assets are eligible, `Suspended` assets are
//! temporarily ineligible but keep their record, `Retired` assets are on the
//! way out and can be deregistered. Only non-active assets can be removed.

#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short,
    Address, Env, Symbol, Vec,
};

// TTL maintenance: extend instance storage on every mutating call so the
// registry cannot be archived out from under the vault.
const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

// ============================================================================
// STORAGE KEYS
// ============================================================================

#[contracttype]
pub enum DataKey {
    /// Admin address allowed to mutate the registry
    Admin,
    /// Ordered list of every registered asset token
    Assets,
    /// Metadata record per asset token (key: token Address)
    Meta(Address),
}

// ============================================================================
// TYPES
// ============================================================================

/// Lifecycle status of a registered RWA token.
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssetStatus {
    Active,
    Suspended,
    Retired,
}

/// Metadata kept per registered asset.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetMetadata {
    /// Asset class tag, e.g. "treasury", "realestate"
    pub asset_type: Symbol,
    /// Suggested price source for the oracle adapter
    pub oracle_source: Address,
    pub status: AssetStatus,
    pub added_at: u64,
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum RegistryError {
    AlreadyRegistered = 1,
    AssetNotFound = 2,
    /// Active assets must be suspended or retired before removal
    AssetStillActive = 3,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Emitted when a new RWA token is registered.
#[contracttype]
pub struct AssetRegistered {
    pub asset: Address,
    pub asset_type: Symbol,
    pub oracle_source: Address,
    pub timestamp: u64,
}

/// Emitted when an asset's lifecycle status changes.
#[contracttype]
pub struct AssetStatusChanged {
    pub asset: Address,
    pub old_status: AssetStatus,
    pub new_status: AssetStatus,
    pub timestamp: u64,
}

/// Emitted when an asset record is removed from the registry.
#[contracttype]
pub struct AssetDeregistered {
    pub asset: Address,
    pub timestamp: u64,
}

// ============================================================================
// CONTRACT
// ============================================================================

#[contract]
pub struct AssetRegistry;

#[contractimpl]
impl AssetRegistry {
    /// Initializes the registry with its admin. Can only be called once.
    pub fn initialize(env: Env, admin: Address) {
        if env.storage().instance().has(&DataKey::Admin) {
            panic!("Already initialized");
        }
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage()
            .instance()
            .set(&DataKey::Assets, &Vec::<Address>::new(&env));
    }

    /// Registers a new RWA token with its metadata. Status starts `Active`.
    ///
    /// # Errors
    /// - `AlreadyRegistered` if the token already has a record
    pub fn register_asset(
        env: Env,
        asset: Address,
        asset_type: Symbol,
        oracle_source: Address,
    ) -> Result<(), RegistryError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        if env.storage().persistent().has(&DataKey::Meta(asset.clone())) {
            return Err(RegistryError::AlreadyRegistered);
        }

        let now = env.ledger().timestamp();
        let meta = AssetMetadata {
            asset_type: asset_type.clone(),
            oracle_source: oracle_source.clone(),
            status: AssetStatus::Active,
            added_at: now,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Meta(asset.clone()), &meta);

        let mut assets: Vec<Address> = env
            .storage()
            .instance()
            .get(&DataKey::Assets)
            .unwrap_or_else(|| Vec::new(&env));
        assets.push_back(asset.clone());
        env.storage().instance().set(&DataKey::Assets, &assets);

        env.events().publish(
            (symbol_short!("reg_add"),),
            AssetRegistered {
                asset,
                asset_type,
                oracle_source,
                timestamp: now,
            },
        );
        Ok(())
    }

    /// Moves an asset to a new lifecycle status.
    pub fn set_asset_status(
        env: Env,
        asset: Address,
        status: AssetStatus,
    ) -> Result<(), RegistryError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let key = DataKey::Meta(asset.clone());
        let mut meta: AssetMetadata = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(RegistryError::AssetNotFound)?;

        let old_status = meta.status;
        meta.status = status;
        env.storage().persistent().set(&key, &meta);

        env.events().publish(
            (symbol_short!("reg_stat"),),
            AssetStatusChanged {
                asset,
                old_status,
                new_status: status,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    /// Removes a non-active asset's record entirely.
    ///
    /// # Errors
    /// - `AssetNotFound` if there is no record
    /// - `AssetStillActive` if the asset has not been suspended/retired first
    pub fn remove_asset(env: Env, asset: Address) -> Result<(), RegistryError> {
        Self::require_admin(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let key = DataKey::Meta(asset.clone());
        let meta: AssetMetadata = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(RegistryError::AssetNotFound)?;
        if meta.status == AssetStatus::Active {
            return Err(RegistryError::AssetStillActive);
        }

        env.storage().persistent().remove(&key);

        let assets: Vec<Address> = env
            .storage()
            .instance()
            .get(&DataKey::Assets)
            .unwrap_or_else(|| Vec::new(&env));
        let mut remaining = Vec::new(&env);
        for a in assets.iter() {
            if a != asset {
                remaining.push_back(a);
            }
        }
        env.storage().instance().set(&DataKey::Assets, &remaining);

        env.events().publish(
            (symbol_short!("reg_rem"),),
            AssetDeregistered {
                asset,
                timestamp: env.ledger().timestamp(),
            },
        );
        Ok(())
    }

    // ==========================================================================
    // READ FUNCTIONS
    // ==========================================================================

    /// True iff the token is registered and its status is `Active`.
    pub fn is_asset_active(env: Env, asset: Address) -> bool {
        env.storage()
            .persistent()
            .get::<DataKey, AssetMetadata>(&DataKey::Meta(asset))
            .map(|m| m.status == AssetStatus::Active)
            .unwrap_or(false)
    }

    pub fn get_asset_metadata(env: Env, asset: Address) -> Result<AssetMetadata, RegistryError> {
        env.storage()
            .persistent()
            .get(&DataKey::Meta(asset))
            .ok_or(RegistryError::AssetNotFound)
    }

    pub fn list_assets(env: Env) -> Vec<Address> {
        env.storage()
            .instance()
            .get(&DataKey::Assets)
            .unwrap_or_else(|| Vec::new(&env))
    }

    pub fn get_admin(env: Env) -> Address {
        env.storage().instance().get(&DataKey::Admin).unwrap()
    }

    // ==========================================================================
    // INTERNAL VALIDATION HELPERS
    // ==========================================================================

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
