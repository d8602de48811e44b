//! Coin-days-destroyed (CDD) vesting.
//!
//! A vesting balance earns `balance · seconds` of "coin-seconds" as
//! time passes, capped at `balance · vesting_seconds`. Withdrawing `w`
//! consumes `w · vesting_seconds` earned coin-seconds, so a fresh
//! deposit matures linearly and withdrawals slow the clock for what
//! remains.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::Result;
use crate::types::amount::{AssetAmount, Share, TimePoint};
use crate::types::ids::{AccountId, VestingId};

/// CDD accrual state. Coin-seconds need 128 bits:
/// `MAX_SHARE_SUPPLY * u32::MAX` overflows 64.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CddVestingPolicy {
    pub vesting_seconds: u32,
    pub coin_seconds_earned: u128,
    pub coin_seconds_earned_last_update: TimePoint,
}

impl CddVestingPolicy {
    pub fn new(vesting_seconds: u32, start: TimePoint) -> Self {
        Self {
            vesting_seconds,
            coin_seconds_earned: 0,
            coin_seconds_earned_last_update: start,
        }
    }

    /// Age the accrual to `now`.
    ///
    /// The elapsed window is capped at `vesting_seconds` and the total
    /// at `balance · vesting_seconds`; both caps produce the same
    /// result, the window cap just bounds the intermediate product.
    fn update(&mut self, balance: Share, now: TimePoint) {
        let elapsed = now
            .elapsed_since(self.coin_seconds_earned_last_update)
            .min(self.vesting_seconds);
        let cap = balance as u128 * self.vesting_seconds as u128;
        self.coin_seconds_earned =
            (self.coin_seconds_earned + elapsed as u128 * balance as u128).min(cap);
        self.coin_seconds_earned_last_update = now;
    }
}

/// A vesting balance owned by one account.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VestingBalance {
    pub id: VestingId,
    pub owner: AccountId,
    pub balance: AssetAmount,
    pub policy: CddVestingPolicy,
}

impl VestingBalance {
    pub fn new(
        id: VestingId,
        owner: AccountId,
        balance: AssetAmount,
        vesting_seconds: u32,
        now: TimePoint,
    ) -> Self {
        Self {
            id,
            owner,
            balance,
            policy: CddVestingPolicy::new(vesting_seconds, now),
        }
    }

    /// Bring the accrual up to `now`.
    pub fn age(&mut self, now: TimePoint) {
        self.policy.update(self.balance.amount, now);
    }

    /// Add to the balance. Earned coin-seconds are untouched; the cap
    /// grows with the balance, so the new shares mature from zero.
    pub fn deposit(&mut self, amount: AssetAmount, now: TimePoint) -> Result<()> {
        ensure!(
            amount.asset_id == self.balance.asset_id,
            Validation,
            "deposit asset does not match vesting balance"
        );
        ensure!(amount.is_positive(), Validation, "deposit must be positive");
        self.age(now);
        self.balance = self.balance.checked_add(&amount)?;
        Ok(())
    }

    /// Largest amount withdrawable at `now` without mutating state.
    pub fn withdrawable(&self, now: TimePoint) -> Share {
        let mut probe = self.policy.clone();
        probe.update(self.balance.amount, now);
        if self.policy.vesting_seconds == 0 {
            return self.balance.amount;
        }
        let by_earned = (probe.coin_seconds_earned / self.policy.vesting_seconds as u128) as Share;
        by_earned.min(self.balance.amount)
    }

    /// Withdraw `amount`, consuming `amount · vesting_seconds` of the
    /// earned coin-seconds.
    pub fn withdraw(&mut self, amount: AssetAmount, now: TimePoint) -> Result<()> {
        ensure!(
            amount.asset_id == self.balance.asset_id,
            Validation,
            "withdrawal asset does not match vesting balance"
        );
        ensure!(amount.is_positive(), Validation, "withdrawal must be positive");
        self.age(now);
        ensure!(
            amount.amount <= self.balance.amount,
            InsufficientFunds,
            "vesting balance {} short of withdrawal {}",
            self.balance.amount,
            amount.amount
        );
        let required = amount.amount as u128 * self.policy.vesting_seconds as u128;
        ensure!(
            self.policy.coin_seconds_earned >= required,
            InsufficientFunds,
            "withdrawal of {} not yet matured",
            amount.amount
        );
        self.policy.coin_seconds_earned -= required;
        self.balance = self.balance.checked_sub(&amount)?;
        Ok(())
    }
}
