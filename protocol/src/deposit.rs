//! Deposit recording and quorum confirmation.
//!
//! A validator that observes an external credit submits a deposit, which
//! records the credit and opens a collect order. The credit has no ledger
//! effect until a quorum of validators confirms it is real; only then is
//! the depositor's home balance credited.

use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::keeper::CustodyKeeper;
use crate::ProtocolError;
use harbor_connector::ChainConnector;
use harbor_orders::{
    CollectOrder, DepositConfirmStatus, DepositItem, DepositItemStatus, Order, OrderHeader,
    OrderId, OrderStatus,
};
use harbor_store::{KvStore, StoreError};
use harbor_types::{Amount, BlockHeight, CuAddress, ExtTxHash, Symbol, TokenType, UtxoRef, ValidatorAddress};

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    /// Record an observed external credit for `owner` and open its collect
    /// order in `Begin`. No balances move here.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit(
        &self,
        order_id: OrderId,
        owner: CuAddress,
        opcu: CuAddress,
        symbol: Symbol,
        ext_address: &str,
        hash: ExtTxHash,
        index: u64,
        amount: Amount,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let token = self.supported_token(&symbol)?;
        if !token.deposit_enabled {
            return Err(ProtocolError::DepositDisabled(symbol));
        }
        if amount < token.deposit_threshold {
            return Err(ProtocolError::BelowDepositThreshold {
                amount,
                threshold: token.deposit_threshold,
            });
        }
        if self.orders().get_order(&order_id)?.is_some() {
            return Err(StoreError::Duplicate(order_id.to_string()).into());
        }

        let canonical = self
            .connector
            .validate_address(&token.chain, &symbol, ext_address)?;
        let owner_cu = self.cu(&owner)?;
        if self.ext_addr_of(&owner_cu, &token.chain)? != canonical {
            return Err(ProtocolError::AddressNotOwned {
                cu: owner,
                addr: canonical.to_string(),
            });
        }
        self.custodian(&opcu)?;

        let item = DepositItem {
            hash: hash.clone(),
            index,
            amount,
            ext_address: canonical.clone(),
            status: DepositItemStatus::WaitCollect,
        };
        self.deposits().new_item(&symbol, &owner, &item)?;

        let order = Order::Collect(CollectOrder {
            header: OrderHeader::new(order_id, owner.clone(), symbol.clone(), height),
            from_cu: owner,
            from_addr: canonical,
            to_cu: opcu,
            amount,
            deposit_hash: hash,
            deposit_index: index,
            deposit_status: DepositConfirmStatus::Unconfirmed,
        });
        self.orders().new_order(&order)?;
        tracing::info!(order = %order.id(), %symbol, %amount, "deposit recorded");
        Ok(())
    }

    /// Vote on the validity of recorded deposits. Each order ID gets its
    /// own vote box (`vote_id = order_id`); on first confirmation the
    /// deposit either takes economic effect or is closed without one.
    pub fn confirmed_deposit(
        &self,
        voter: &ValidatorAddress,
        valid: &[OrderId],
        invalid: &[OrderId],
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        for (ids, validity) in [(valid, true), (invalid, false)] {
            for id in ids {
                let order = self
                    .orders()
                    .get_order(id)?
                    .ok_or_else(|| ProtocolError::OrderNotFound(id.clone()))?;
                let Order::Collect(collect) = order else {
                    return Err(ProtocolError::UnexpectedKind(id.clone()));
                };
                let outcome = self.vote(id.as_str(), voter, &validity, height)?;
                if outcome.first_confirmed_now {
                    self.apply_deposit_confirmation(collect, validity)?;
                }
            }
        }
        Ok(())
    }

    /// The single-fire arm of deposit confirmation.
    fn apply_deposit_confirmation(
        &self,
        mut collect: CollectOrder,
        valid: bool,
    ) -> Result<(), ProtocolError> {
        let symbol = collect.header.symbol.clone();
        let owner = collect.from_cu.clone();
        let utxo = UtxoRef::new(collect.deposit_hash.clone(), collect.deposit_index);

        if !valid {
            self.deposits().delete_item(&symbol, &owner, &utxo)?;
            let mut order = Order::Collect(collect);
            order.advance(OrderStatus::Finish)?;
            self.orders().set_order(&order)?;
            tracing::info!(order = %order.id(), "deposit rejected by quorum");
            return Ok(());
        }

        let token = self.supported_token(&symbol)?;
        let mut item = self
            .deposits()
            .get_item(&symbol, &owner, &utxo)?
            .ok_or_else(|| StoreError::NotFound(format!("deposit item {utxo}")))?;

        // The mapped-token mint: this is the moment the home ledger starts
        // reflecting the external credit.
        self.ledger().add_asset(&owner, &symbol, collect.amount)?;

        let owner_cu = self.cu(&owner)?;
        if owner_cu.is_custodian() {
            // A custodian's own deposit needs no collection; the credit is
            // immediately part of its spendable position.
            item.status = DepositItemStatus::Confirmed;
            self.deposits().set_item(&symbol, &owner, &item)?;
            let mut order = Order::Collect(collect);
            order.advance(OrderStatus::Finish)?;
            self.orders().set_order(&order)?;
            return Ok(());
        }

        // Account chains: if the deposit address cannot pay for its own
        // collection, pre-deduct the collect fee from the depositor now,
        // compensating the custodian that will front the gas.
        if token.token_type == TokenType::AccountBased {
            let cost = token.account_tx_cost().ok_or(ProtocolError::Overflow)?;
            let remained = self
                .ledger()
                .gas_remained(&token.chain, &collect.from_addr)?;
            if remained < cost
                && self.ledger().balance(&owner, &symbol)?.available >= cost
                && !cost.is_zero()
            {
                self.ledger().sub_asset(&owner, &symbol, cost)?;
                self.ledger().add_asset(&collect.to_cu, &symbol, cost)?;
                collect.header.cost_fee = cost;
            }
        }

        // The item stays WaitCollect; the order now waits for a collect
        // batch to pick it up.
        collect.deposit_status = DepositConfirmStatus::Confirmed;
        self.orders().set_order(&Order::Collect(collect))?;
        Ok(())
    }
}
