//! The operation variant set and its static validation.
//!
//! Every state transition enters the core as one of these variants. The
//! driver dispatches through a per-kind evaluator table indexed by
//! [`Operation::tag`]. Static validation (`validate`) covers everything
//! decidable without chain state; stateful checks live in the
//! evaluators.
//!
//! ## Virtual operations
//!
//! `FillOrder`, `ExecuteBid` and `SettleCancel` are emitted by the
//! engine to report side effects (margin-call fills, forced
//! settlements, seizures, bid acceptance). They never validate, so any
//! transaction or proposal carrying one is rejected.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::asset::{AssetOptions, BitassetOptions};
use crate::error::Result;
use crate::types::amount::{AssetAmount, TimePoint};
use crate::types::feed::PriceFeed;
use crate::types::ids::{
    AccountId, AssetId, LimitOrderId, ObjectId, SettlementId, VestingId,
};
use crate::types::price::Price;

/// Account listing action for [`Operation::AccountWhitelist`].
pub const LISTING_NONE: u8 = 0;
pub const LISTING_WHITE: u8 = 1;
pub const LISTING_BLACK: u8 = 2;
pub const LISTING_WHITE_AND_BLACK: u8 = 3;

/// Vesting policy selection at creation time.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum VestingPolicyInit {
    /// Coin-days-destroyed accrual over the given period.
    Cdd { vesting_seconds: u32 },
}

/// One ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Operation {
    Transfer {
        fee: AssetAmount,
        from: AccountId,
        to: AccountId,
        amount: AssetAmount,
    },
    LimitOrderCreate {
        fee: AssetAmount,
        seller: AccountId,
        amount_to_sell: AssetAmount,
        min_to_receive: AssetAmount,
        expiration: Option<TimePoint>,
        fill_or_kill: bool,
    },
    LimitOrderCancel {
        fee: AssetAmount,
        fee_paying_account: AccountId,
        order: LimitOrderId,
    },
    CallOrderUpdate {
        fee: AssetAmount,
        funding_account: AccountId,
        delta_collateral: AssetAmount,
        delta_debt: AssetAmount,
        /// 0 or absent disables the cover cap.
        target_collateral_ratio: Option<u16>,
    },
    BidCollateral {
        fee: AssetAmount,
        bidder: AccountId,
        additional_collateral: AssetAmount,
        debt_covered: AssetAmount,
    },
    AssetCreate {
        fee: AssetAmount,
        issuer: AccountId,
        symbol: String,
        precision: u8,
        common_options: AssetOptions,
        bitasset_options: Option<BitassetOptions>,
        is_prediction_market: bool,
    },
    AssetUpdate {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_update: AssetId,
        new_options: AssetOptions,
    },
    AssetUpdateBitasset {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_update: AssetId,
        new_options: BitassetOptions,
    },
    AssetUpdateIssuer {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_update: AssetId,
        new_issuer: AccountId,
    },
    AssetPublishFeed {
        fee: AssetAmount,
        publisher: AccountId,
        asset_id: AssetId,
        feed: PriceFeed,
    },
    AssetUpdateFeedProducers {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_update: AssetId,
        new_feed_producers: BTreeSet<AccountId>,
    },
    AssetSettle {
        fee: AssetAmount,
        account: AccountId,
        amount: AssetAmount,
    },
    AssetGlobalSettle {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_settle: AssetId,
        settle_price: Price,
    },
    AssetIssue {
        fee: AssetAmount,
        issuer: AccountId,
        asset_to_issue: AssetAmount,
        issue_to_account: AccountId,
    },
    AssetReserve {
        fee: AssetAmount,
        payer: AccountId,
        amount_to_reserve: AssetAmount,
    },
    AssetFundFeePool {
        fee: AssetAmount,
        from_account: AccountId,
        asset_id: AssetId,
        /// Core-asset amount moved into the pool.
        amount: AssetAmount,
    },
    VestingBalanceCreate {
        fee: AssetAmount,
        creator: AccountId,
        owner: AccountId,
        amount: AssetAmount,
        policy: VestingPolicyInit,
    },
    VestingBalanceWithdraw {
        fee: AssetAmount,
        vesting_balance: VestingId,
        owner: AccountId,
        amount: AssetAmount,
    },
    AccountWhitelist {
        fee: AssetAmount,
        authorizing_account: AccountId,
        account_to_list: AccountId,
        new_listing: u8,
    },

    // ------------------------------------------------------------------
    // Virtual operations (engine-emitted, never submitted)
    // ------------------------------------------------------------------
    FillOrder {
        order_id: ObjectId,
        account_id: AccountId,
        pays: AssetAmount,
        receives: AssetAmount,
        fee: AssetAmount,
        is_maker: bool,
    },
    ExecuteBid {
        bidder: AccountId,
        debt_covered: AssetAmount,
        collateral_acquired: AssetAmount,
    },
    SettleCancel {
        settlement: SettlementId,
        account: AccountId,
        amount: AssetAmount,
    },
}

/// Result slot attached to each applied operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum OperationResult {
    None,
    Id(ObjectId),
    Amount(AssetAmount),
}

/// An operation together with its result, as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOperation {
    pub operation: Operation,
    pub result: OperationResult,
    pub is_virtual: bool,
}

/// Whether `symbol` would be a valid ticker: 3-16 chars of `A-Z`,
/// digits and dots, starting with a letter and ending with a letter or
/// digit. Does not check uniqueness.
pub fn is_valid_symbol(symbol: &str) -> bool {
    let len = symbol.len();
    if !(3..=16).contains(&len) {
        return false;
    }
    let bytes = symbol.as_bytes();
    if !bytes[0].is_ascii_uppercase() {
        return false;
    }
    if !(bytes[len - 1].is_ascii_uppercase() || bytes[len - 1].is_ascii_digit()) {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'.')
}

impl Operation {
    /// Dense evaluator-table index, one per user-submittable kind.
    /// Virtual operations share the tail slots; the driver never
    /// dispatches them.
    pub fn tag(&self) -> usize {
        match self {
            Operation::Transfer { .. } => 0,
            Operation::LimitOrderCreate { .. } => 1,
            Operation::LimitOrderCancel { .. } => 2,
            Operation::CallOrderUpdate { .. } => 3,
            Operation::BidCollateral { .. } => 4,
            Operation::AssetCreate { .. } => 5,
            Operation::AssetUpdate { .. } => 6,
            Operation::AssetUpdateBitasset { .. } => 7,
            Operation::AssetUpdateIssuer { .. } => 8,
            Operation::AssetPublishFeed { .. } => 9,
            Operation::AssetUpdateFeedProducers { .. } => 10,
            Operation::AssetSettle { .. } => 11,
            Operation::AssetGlobalSettle { .. } => 12,
            Operation::AssetIssue { .. } => 13,
            Operation::AssetReserve { .. } => 14,
            Operation::AssetFundFeePool { .. } => 15,
            Operation::VestingBalanceCreate { .. } => 16,
            Operation::VestingBalanceWithdraw { .. } => 17,
            Operation::AccountWhitelist { .. } => 18,
            Operation::FillOrder { .. } => 19,
            Operation::ExecuteBid { .. } => 20,
            Operation::SettleCancel { .. } => 21,
        }
    }

    /// Number of user-submittable operation kinds (table size).
    pub const USER_OP_COUNT: usize = 19;

    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            Operation::FillOrder { .. }
                | Operation::ExecuteBid { .. }
                | Operation::SettleCancel { .. }
        )
    }

    /// The declared fee of a user operation.
    pub fn fee(&self) -> AssetAmount {
        match self {
            Operation::Transfer { fee, .. }
            | Operation::LimitOrderCreate { fee, .. }
            | Operation::LimitOrderCancel { fee, .. }
            | Operation::CallOrderUpdate { fee, .. }
            | Operation::BidCollateral { fee, .. }
            | Operation::AssetCreate { fee, .. }
            | Operation::AssetUpdate { fee, .. }
            | Operation::AssetUpdateBitasset { fee, .. }
            | Operation::AssetUpdateIssuer { fee, .. }
            | Operation::AssetPublishFeed { fee, .. }
            | Operation::AssetUpdateFeedProducers { fee, .. }
            | Operation::AssetSettle { fee, .. }
            | Operation::AssetGlobalSettle { fee, .. }
            | Operation::AssetIssue { fee, .. }
            | Operation::AssetReserve { fee, .. }
            | Operation::AssetFundFeePool { fee, .. }
            | Operation::VestingBalanceCreate { fee, .. }
            | Operation::VestingBalanceWithdraw { fee, .. }
            | Operation::AccountWhitelist { fee, .. }
            | Operation::FillOrder { fee, .. } => *fee,
            Operation::ExecuteBid { .. } | Operation::SettleCancel { .. } => {
                AssetAmount::default()
            }
        }
    }

    /// The account that pays the fee and authorizes the operation.
    pub fn fee_payer(&self) -> AccountId {
        match self {
            Operation::Transfer { from, .. } => *from,
            Operation::LimitOrderCreate { seller, .. } => *seller,
            Operation::LimitOrderCancel { fee_paying_account, .. } => *fee_paying_account,
            Operation::CallOrderUpdate { funding_account, .. } => *funding_account,
            Operation::BidCollateral { bidder, .. } => *bidder,
            Operation::AssetCreate { issuer, .. }
            | Operation::AssetUpdate { issuer, .. }
            | Operation::AssetUpdateBitasset { issuer, .. }
            | Operation::AssetUpdateIssuer { issuer, .. }
            | Operation::AssetUpdateFeedProducers { issuer, .. }
            | Operation::AssetGlobalSettle { issuer, .. }
            | Operation::AssetIssue { issuer, .. } => *issuer,
            Operation::AssetPublishFeed { publisher, .. } => *publisher,
            Operation::AssetSettle { account, .. } => *account,
            Operation::AssetReserve { payer, .. } => *payer,
            Operation::AssetFundFeePool { from_account, .. } => *from_account,
            Operation::VestingBalanceCreate { creator, .. } => *creator,
            Operation::VestingBalanceWithdraw { owner, .. } => *owner,
            Operation::AccountWhitelist { authorizing_account, .. } => *authorizing_account,
            Operation::FillOrder { account_id, .. } => *account_id,
            Operation::ExecuteBid { bidder, .. } => *bidder,
            Operation::SettleCancel { account, .. } => *account,
        }
    }

    /// Stateless validation. Rejects virtual operations outright.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.is_virtual(),
            Lifecycle,
            "virtual operation may not appear in a transaction body"
        );
        ensure!(self.fee().amount >= 0, Validation, "fee must be non-negative");

        match self {
            Operation::Transfer { from, to, amount, .. } => {
                ensure!(amount.is_positive(), Validation, "transfer amount must be positive");
                ensure!(from != to, Validation, "cannot transfer to self");
            }
            Operation::LimitOrderCreate { amount_to_sell, min_to_receive, .. } => {
                ensure!(
                    amount_to_sell.asset_id != min_to_receive.asset_id,
                    Validation,
                    "sell and receive assets must differ"
                );
                ensure!(
                    amount_to_sell.is_positive() && min_to_receive.is_positive(),
                    Validation,
                    "order amounts must be positive"
                );
            }
            Operation::LimitOrderCancel { .. } => {}
            Operation::CallOrderUpdate { delta_collateral, delta_debt, .. } => {
                ensure!(
                    delta_collateral.asset_id != delta_debt.asset_id,
                    Validation,
                    "debt and collateral assets must differ"
                );
                ensure!(
                    delta_collateral.amount != 0 || delta_debt.amount != 0,
                    Validation,
                    "position update must change something"
                );
            }
            Operation::BidCollateral { additional_collateral, debt_covered, .. } => {
                ensure!(
                    additional_collateral.asset_id != debt_covered.asset_id,
                    Validation,
                    "bid collateral and debt assets must differ"
                );
                ensure!(
                    additional_collateral.amount >= 0 && debt_covered.amount >= 0,
                    Validation,
                    "bid amounts must be non-negative"
                );
                // Zero collateral with non-zero debt is a free lunch.
                ensure!(
                    debt_covered.amount == 0 || additional_collateral.amount > 0,
                    Validation,
                    "bid covering debt must offer collateral"
                );
            }
            Operation::AssetCreate {
                symbol,
                precision,
                common_options,
                bitasset_options,
                is_prediction_market,
                ..
            } => {
                ensure!(is_valid_symbol(symbol), Validation, "invalid symbol '{}'", symbol);
                ensure!(*precision <= 12, Validation, "precision {} exceeds 12", precision);
                common_options.validate(bitasset_options.is_some())?;
                if let Some(b) = bitasset_options {
                    b.validate()?;
                }
                if *is_prediction_market {
                    ensure!(
                        bitasset_options.is_some(),
                        Validation,
                        "prediction market must be market-issued"
                    );
                    ensure!(
                        common_options.can_global_settle(),
                        Validation,
                        "prediction market requires the global-settle permission"
                    );
                }
            }
            Operation::AssetUpdate { new_options, .. } => {
                // MIA-only flag consistency is checked against the
                // asset's kind in the evaluator.
                new_options.validate_ranges()?;
            }
            Operation::AssetUpdateBitasset { new_options, .. } => {
                new_options.validate()?;
            }
            Operation::AssetUpdateIssuer { issuer, new_issuer, .. } => {
                ensure!(issuer != new_issuer, Validation, "new issuer must differ");
            }
            Operation::AssetPublishFeed { .. } => {
                // Range checks need the bitasset's backing id and the
                // hardfork clock; deferred to the evaluator.
            }
            Operation::AssetUpdateFeedProducers { new_feed_producers, .. } => {
                ensure!(
                    new_feed_producers.len() <= 1000,
                    Validation,
                    "too many feed producers"
                );
            }
            Operation::AssetSettle { amount, .. } => {
                ensure!(amount.is_positive(), Validation, "settle amount must be positive");
            }
            Operation::AssetGlobalSettle { asset_to_settle, settle_price, .. } => {
                settle_price.validate()?;
                ensure!(
                    settle_price.base.asset_id == *asset_to_settle,
                    Validation,
                    "settle price must be quoted in the settled asset"
                );
                ensure!(
                    settle_price.base.amount > 0,
                    Validation,
                    "settle price debt side must be positive"
                );
            }
            Operation::AssetIssue { asset_to_issue, .. } => {
                ensure!(asset_to_issue.is_positive(), Validation, "issue amount must be positive");
            }
            Operation::AssetReserve { amount_to_reserve, .. } => {
                ensure!(
                    amount_to_reserve.is_positive(),
                    Validation,
                    "reserve amount must be positive"
                );
            }
            Operation::AssetFundFeePool { amount, .. } => {
                ensure!(amount.is_positive(), Validation, "fund amount must be positive");
                ensure!(
                    amount.asset_id == crate::types::ids::CORE_ASSET,
                    Validation,
                    "fee pool holds the core asset"
                );
            }
            Operation::VestingBalanceCreate { amount, policy, .. } => {
                ensure!(amount.is_positive(), Validation, "vesting amount must be positive");
                let VestingPolicyInit::Cdd { vesting_seconds } = policy;
                ensure!(*vesting_seconds > 0, Validation, "vesting period must be positive");
            }
            Operation::VestingBalanceWithdraw { amount, .. } => {
                ensure!(amount.is_positive(), Validation, "withdraw amount must be positive");
            }
            Operation::AccountWhitelist { new_listing, .. } => {
                ensure!(
                    *new_listing <= LISTING_WHITE_AND_BLACK,
                    Validation,
                    "unknown listing value {}",
                    new_listing
                );
            }
            Operation::FillOrder { .. }
            | Operation::ExecuteBid { .. }
            | Operation::SettleCancel { .. } => unreachable!("virtual ops rejected above"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::CORE_ASSET;

    fn core(amount: i64) -> AssetAmount {
        AssetAmount::new(amount, CORE_ASSET)
    }

    #[test]
    fn test_symbol_rules() {
        assert!(is_valid_symbol("USD"));
        assert!(is_valid_symbol("USDBIT"));
        assert!(is_valid_symbol("BIT.USD"));
        assert!(is_valid_symbol("A1B"));
        assert!(!is_valid_symbol("US")); // too short
        assert!(!is_valid_symbol("TOOLONGSYMBOLNAME1")); // 18 chars
        assert!(!is_valid_symbol("1AB")); // starts with digit
        assert!(!is_valid_symbol("AB.")); // ends with dot
        assert!(!is_valid_symbol("usd")); // lowercase
    }

    #[test]
    fn test_negative_fee_rejected() {
        let op = Operation::Transfer {
            fee: core(-1),
            from: AccountId(1),
            to: AccountId(2),
            amount: core(10),
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_transfer_validation() {
        let good = Operation::Transfer {
            fee: core(0),
            from: AccountId(1),
            to: AccountId(2),
            amount: core(10),
        };
        assert!(good.validate().is_ok());

        let self_send = Operation::Transfer {
            fee: core(0),
            from: AccountId(1),
            to: AccountId(1),
            amount: core(10),
        };
        assert!(self_send.validate().is_err());

        let zero = Operation::Transfer {
            fee: core(0),
            from: AccountId(1),
            to: AccountId(2),
            amount: core(0),
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_limit_order_validation() {
        let op = Operation::LimitOrderCreate {
            fee: core(0),
            seller: AccountId(1),
            amount_to_sell: AssetAmount::new(100, AssetId(1)),
            min_to_receive: AssetAmount::new(100, AssetId(1)),
            expiration: None,
            fill_or_kill: false,
        };
        assert!(op.validate().is_err()); // same asset both sides
    }

    #[test]
    fn test_call_order_update_validation() {
        let noop = Operation::CallOrderUpdate {
            fee: core(0),
            funding_account: AccountId(1),
            delta_collateral: core(0),
            delta_debt: AssetAmount::new(0, AssetId(1)),
            target_collateral_ratio: None,
        };
        assert!(noop.validate().is_err());
    }

    #[test]
    fn test_virtual_op_rejected_from_tx_body() {
        let v = Operation::FillOrder {
            order_id: LimitOrderId(1).into(),
            account_id: AccountId(1),
            pays: core(1),
            receives: AssetAmount::new(1, AssetId(1)),
            fee: core(0),
            is_maker: true,
        };
        assert!(matches!(
            v.validate(),
            Err(crate::error::LedgerError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_tags_are_dense_for_user_ops() {
        let op = Operation::Transfer {
            fee: core(0),
            from: AccountId(1),
            to: AccountId(2),
            amount: core(1),
        };
        assert!(op.tag() < Operation::USER_OP_COUNT);
    }

    #[test]
    fn test_fee_pool_funding_must_be_core() {
        let op = Operation::AssetFundFeePool {
            fee: core(0),
            from_account: AccountId(1),
            asset_id: AssetId(2),
            amount: AssetAmount::new(5, AssetId(2)),
        };
        assert!(op.validate().is_err());
    }
}
