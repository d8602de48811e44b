//! Accounts and the per-asset authorization gate.
//!
//! Assets may name whitelist and blacklist authority accounts. An
//! account's standing with each authority is recorded on the account
//! itself (updated by `account_whitelist`); the gate is evaluated at
//! operation time, never cached, because listings are mutable.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::asset::AssetOptions;
use crate::types::ids::AccountId;
use crate::types::operations::{LISTING_BLACK, LISTING_WHITE};

/// A ledger account. Creation and authority management are external;
/// the core only tracks identity and listing state.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Listing flags keyed by the authority that set them
    /// (bit 0 = whitelisted, bit 1 = blacklisted).
    pub listings: BTreeMap<AccountId, u8>,
}

impl Account {
    pub fn new(id: AccountId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), listings: BTreeMap::new() }
    }

    pub fn is_whitelisted_by(&self, authority: AccountId) -> bool {
        self.listings.get(&authority).copied().unwrap_or(0) & LISTING_WHITE != 0
    }

    pub fn is_blacklisted_by(&self, authority: AccountId) -> bool {
        self.listings.get(&authority).copied().unwrap_or(0) & LISTING_BLACK != 0
    }

    /// Apply an `account_whitelist` action from `authority`.
    pub fn set_listing(&mut self, authority: AccountId, listing: u8) {
        if listing == 0 {
            self.listings.remove(&authority);
        } else {
            self.listings.insert(authority, listing);
        }
    }
}

/// Whether `account` may hold / move the asset described by `options`.
///
/// Blacklisting by any blacklist authority always rejects. When the
/// whitelist authority set is non-empty, at least one of them must have
/// whitelisted the account; an empty whitelist permits everyone (who is
/// not blacklisted).
pub fn is_authorized(account: &Account, options: &AssetOptions) -> bool {
    for authority in &options.blacklist_authorities {
        if account.is_blacklisted_by(*authority) {
            return false;
        }
    }
    if options.whitelist_authorities.is_empty() {
        return true;
    }
    options
        .whitelist_authorities
        .iter()
        .any(|authority| account.is_whitelisted_by(*authority))
}
