//! Evaluators for transfers, listings and vesting balances.

use crate::error::Result;
use crate::ledger::{Ledger, OperationEvaluator};
use crate::types::operations::{AppliedOperation, Operation, OperationResult, VestingPolicyInit};
use crate::vesting::VestingBalance;

pub(crate) struct TransferEvaluator;

impl OperationEvaluator for TransferEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::Transfer { from, to, amount, .. } = op else { unreachable!() };
        let asset = ledger.store().asset(amount.asset_id)?.clone();
        ledger.ensure_authorized(*from, amount.asset_id)?;
        ledger.ensure_authorized(*to, amount.asset_id)?;
        if asset.options.is_transfer_restricted() {
            ensure!(
                *from == asset.issuer || *to == asset.issuer,
                Authorization,
                "transfers of {} must involve the issuer",
                asset.symbol
            );
        }
        let store = ledger.store_mut();
        store.adjust_balance(*from, amount.asset_id, -amount.amount)?;
        store.adjust_balance(*to, amount.asset_id, amount.amount)?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct AccountWhitelistEvaluator;

impl OperationEvaluator for AccountWhitelistEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::AccountWhitelist { authorizing_account, account_to_list, new_listing, .. } =
            op
        else {
            unreachable!()
        };
        let authority = *authorizing_account;
        let listing = *new_listing;
        ledger.store().account(authority)?;
        ledger.store_mut().modify_account(*account_to_list, |acct| {
            acct.set_listing(authority, listing);
            Ok(())
        })?;
        Ok(OperationResult::None)
    }
}

pub(crate) struct VestingBalanceCreateEvaluator;

impl OperationEvaluator for VestingBalanceCreateEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::VestingBalanceCreate { creator, owner, amount, policy, .. } = op else {
            unreachable!()
        };
        ledger.store().account(*owner)?;
        // The asset gate here only exists from the broad-authorization
        // hardfork on; the earlier behavior (no check at all) is part
        // of consensus.
        if ledger.hf973_active() {
            ledger.ensure_authorized(*creator, amount.asset_id)?;
            ledger.ensure_authorized(*owner, amount.asset_id)?;
        }
        let VestingPolicyInit::Cdd { vesting_seconds } = policy;
        let vesting_seconds = *vesting_seconds;
        let now = ledger.head_block_time();
        let store = ledger.store_mut();
        store.adjust_balance(*creator, amount.asset_id, -amount.amount)?;
        let owner = *owner;
        let amount = *amount;
        let id = store.create_vesting_balance(|id| {
            VestingBalance::new(id, owner, amount, vesting_seconds, now)
        })?;
        Ok(OperationResult::Id(id.into()))
    }
}

pub(crate) struct VestingBalanceWithdrawEvaluator;

impl OperationEvaluator for VestingBalanceWithdrawEvaluator {
    fn apply(
        &self,
        ledger: &mut Ledger,
        op: &Operation,
        _out: &mut Vec<AppliedOperation>,
    ) -> Result<OperationResult> {
        let Operation::VestingBalanceWithdraw { vesting_balance, owner, amount, .. } = op else {
            unreachable!()
        };
        let vb = ledger.store().vesting_balance(*vesting_balance)?;
        ensure!(
            vb.owner == *owner,
            Authorization,
            "vesting balance {} is not owned by the withdrawer",
            vesting_balance
        );
        let now = ledger.head_block_time();
        let amount = *amount;
        let owner = *owner;
        let store = ledger.store_mut();
        let emptied = store.modify_vesting_balance(*vesting_balance, |vb| {
            vb.withdraw(amount, now)?;
            Ok(vb.balance.amount == 0)
        })?;
        store.adjust_balance(owner, amount.asset_id, amount.amount)?;
        if emptied {
            store.remove_vesting_balance(*vesting_balance)?;
        }
        Ok(OperationResult::None)
    }
}
