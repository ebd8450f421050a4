//! Withdrawal: paying a user's funds out to an external address.
//!
//! Begin locks `amount + gas_fee` from the requester. Account-chain
//! requests are additionally quorum-confirmed before they become
//! signable. WaitSign re-derives the proposed transaction against the
//! batch and the custodian's spendable position, and enforces both the
//! fee-rate band and every order's declared gas ceiling. Finish is
//! quorum-voted on `(cost, success)` and settles both sides — or refunds
//! everything if the external broadcast failed.

use crate::collect::same_content;
use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::keeper::{CustodyKeeper, Proposal};
use crate::ProtocolError;
use harbor_connector::{
    fee_rate_per_kb, signed_size_estimate, ChainConnector, ExtTransaction, UtxoTx, Vout,
};
use harbor_orders::{
    DepositItemStatus, Order, OrderHeader, OrderId, OrderKind, OrderStatus, WithdrawStatus,
    WithdrawalOrder,
};
use harbor_store::KvStore;
use harbor_types::{
    Amount, BlockHeight, CuAddress, ExtAddress, ExtTxHash, Symbol, TokenInfo, TokenType, UtxoRef,
    ValidatorAddress,
};

/// Match each order to one output paying exactly its destination and
/// amount; at most one unmatched output may remain (the custodian's
/// change). Returns the change output's index, if any.
fn match_vouts(
    orders: &[WithdrawalOrder],
    vouts: &[Vout],
    custodian_addr: &ExtAddress,
) -> Result<Option<(u64, Vout)>, ProtocolError> {
    let mut remaining: Vec<(usize, &Vout)> = vouts.iter().enumerate().collect();
    for order in orders {
        let pos = remaining
            .iter()
            .position(|(_, v)| v.address == order.to_addr && v.amount == order.amount)
            .ok_or_else(|| {
                ProtocolError::TxMismatch(format!(
                    "no output pays order {}",
                    order.header.order_id
                ))
            })?;
        remaining.remove(pos);
    }
    match remaining.as_slice() {
        [] => Ok(None),
        [(idx, vout)] if &vout.address == custodian_addr => Ok(Some((*idx as u64, (*vout).clone()))),
        _ => Err(ProtocolError::TxMismatch("unexpected extra outputs".into())),
    }
}

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    /// A user-initiated withdrawal request. Locks `amount + gas_fee`.
    pub fn withdrawal(
        &self,
        user: CuAddress,
        order_id: OrderId,
        symbol: Symbol,
        to_addr: &str,
        amount: Amount,
        gas_fee: Amount,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let token = self.supported_token(&symbol)?;
        if !token.withdrawal_enabled {
            return Err(ProtocolError::WithdrawalDisabled(symbol));
        }
        if amount.is_zero() {
            return Err(harbor_orders::OrderError::ZeroAmount.into());
        }
        if gas_fee < token.withdrawal_fee {
            return Err(ProtocolError::BelowWithdrawalFee {
                fee: gas_fee,
                minimum: token.withdrawal_fee,
            });
        }
        if CuAddress::looks_like(to_addr) {
            return Err(ProtocolError::NotExternalAddress(to_addr.to_string()));
        }
        let canonical = self
            .connector
            .validate_address(&token.chain, &symbol, to_addr)?;
        self.cu(&user)?;
        if self.orders().get_order(&order_id)?.is_some() {
            return Err(harbor_store::StoreError::Duplicate(order_id.to_string()).into());
        }

        let total = amount.checked_add(gas_fee).ok_or(ProtocolError::Overflow)?;
        self.ledger().lock_coin(&user, &symbol, total)?;

        let withdraw_status = match token.token_type {
            // Nothing external to confirm: the request itself is the fact.
            TokenType::UtxoBased => WithdrawStatus::Valid,
            TokenType::AccountBased => WithdrawStatus::Unconfirmed,
            TokenType::AccountSharedBased => unreachable!("rejected by supported_token"),
        };
        let order = Order::Withdrawal(WithdrawalOrder {
            header: OrderHeader::new(order_id, user, symbol, height),
            to_addr: canonical,
            amount,
            gas_fee,
            withdraw_status,
            opcu: None,
            utxo_vins: Vec::new(),
        });
        self.orders().new_order(&order)?;
        tracing::info!(order = %order.id(), %amount, %gas_fee, "withdrawal requested");
        Ok(())
    }

    /// Quorum vote on account-chain withdrawal validity. Invalid requests
    /// unlock the reservation and cancel; valid ones become signable.
    pub fn withdrawal_confirm(
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
                let Order::Withdrawal(mut wd) = order else {
                    return Err(ProtocolError::UnexpectedKind(id.clone()));
                };
                let token = self.supported_token(&wd.header.symbol)?;
                if token.token_type != TokenType::AccountBased {
                    return Err(ProtocolError::WrongTxModel);
                }
                let outcome = self.vote(id.as_str(), voter, &validity, height)?;
                if !outcome.first_confirmed_now {
                    continue;
                }
                // A request the user already cancelled stays cancelled.
                if wd.header.status != OrderStatus::Begin {
                    continue;
                }
                if validity {
                    wd.withdraw_status = WithdrawStatus::Valid;
                    self.orders().set_order(&Order::Withdrawal(wd))?;
                } else {
                    let total = wd
                        .amount
                        .checked_add(wd.gas_fee)
                        .ok_or(ProtocolError::Overflow)?;
                    self.ledger()
                        .unlock_coin(&wd.header.cu_address, &wd.header.symbol, total)?;
                    let mut order = Order::Withdrawal(wd);
                    order.advance(OrderStatus::Cancel)?;
                    self.orders().set_order(&order)?;
                    tracing::info!(order = %id, "withdrawal rejected by quorum");
                }
            }
        }
        Ok(())
    }

    fn withdrawal_batch(&self, ids: &[OrderId]) -> Result<Vec<WithdrawalOrder>, ProtocolError> {
        self.load_orders(ids)?
            .into_iter()
            .map(|o| match o {
                Order::Withdrawal(w) => Ok(w),
                other => Err(ProtocolError::UnexpectedKind(other.id().clone())),
            })
            .collect()
    }

    /// Accept a custodian's proposed raw payout transaction for a batch of
    /// valid withdrawal orders.
    pub fn withdrawal_wait_sign(
        &self,
        ids: &[OrderId],
        opcu: CuAddress,
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        let batch = self.withdrawal_batch(ids)?;
        let as_orders: Vec<Order> = batch.iter().cloned().map(Order::Withdrawal).collect();
        if Self::classify_proposal(
            &as_orders,
            OrderStatus::Begin,
            OrderStatus::WaitSign,
            raw_data,
            |o| &o.header().raw_data,
        )? == Proposal::Restated
        {
            return Ok(());
        }
        let symbol = Self::batch_shared(&as_orders, "symbol", |o| o.header().symbol.clone())?;
        if batch
            .iter()
            .any(|w| w.withdraw_status != WithdrawStatus::Valid)
        {
            return Err(ProtocolError::BatchMismatch("unconfirmed withdrawal".into()));
        }
        let token = self.supported_token(&symbol)?;
        let custodian = self.custodian(&opcu)?;
        let custodian_addr = self.ext_addr_of(&custodian, &token.chain)?;

        match token.token_type {
            TokenType::UtxoBased => {
                let limit = self.params().max_vout_limit as usize;
                if batch.len() > limit {
                    return Err(ProtocolError::BatchTooLarge {
                        len: batch.len(),
                        limit,
                    });
                }
                self.withdrawal_wait_sign_utxo(
                    batch,
                    &symbol,
                    &token,
                    opcu,
                    &custodian_addr,
                    raw_data,
                )
            }
            TokenType::AccountBased => {
                if batch.len() != 1 {
                    return Err(ProtocolError::BatchTooLarge {
                        len: batch.len(),
                        limit: 1,
                    });
                }
                self.withdrawal_wait_sign_account(
                    batch,
                    &symbol,
                    &token,
                    opcu,
                    &custodian_addr,
                    raw_data,
                )
            }
            TokenType::AccountSharedBased => Err(ProtocolError::UnsupportedTokenType),
        }
    }

    fn withdrawal_wait_sign_utxo(
        &self,
        batch: Vec<WithdrawalOrder>,
        symbol: &Symbol,
        token: &TokenInfo,
        opcu: CuAddress,
        custodian_addr: &ExtAddress,
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        // The proposer may spend any of the custodian's confirmed UTXOs.
        let spendable = self.deposits().items_for_owner(symbol, &opcu)?;
        let refs: Vec<UtxoRef> = spendable
            .iter()
            .filter(|i| i.status == DepositItemStatus::Confirmed)
            .map(|i| i.utxo_ref())
            .collect();
        let tx = match self
            .connector
            .decode_raw(&token.chain, symbol, raw_data, &refs)?
        {
            ExtTransaction::Utxo(tx) => tx,
            ExtTransaction::Account(_) => return Err(ProtocolError::WrongTxModel),
        };

        let mut seen: Vec<&UtxoRef> = Vec::new();
        for vin in &tx.vins {
            let item = spendable
                .iter()
                .find(|i| i.utxo_ref() == vin.utxo && i.status == DepositItemStatus::Confirmed)
                .ok_or_else(|| {
                    ProtocolError::TxMismatch(format!("input {} not spendable", vin.utxo))
                })?;
            if vin.amount != item.amount || vin.address != item.ext_address {
                return Err(ProtocolError::TxMismatch(format!(
                    "input {} does not match the custodian utxo",
                    vin.utxo
                )));
            }
            if seen.contains(&&vin.utxo) {
                return Err(ProtocolError::TxMismatch(format!(
                    "input {} spent twice",
                    vin.utxo
                )));
            }
            seen.push(&vin.utxo);
        }

        match_vouts(&batch, &tx.vouts, custodian_addr)?;
        let fee = tx
            .cost_fee()
            .ok_or_else(|| ProtocolError::TxMismatch("outputs exceed inputs".into()))?;
        let size = signed_size_estimate(tx.vins.len(), tx.vouts.len());
        self.check_fee_band(fee_rate_per_kb(fee, size), token.gas_price)?;

        let n = batch.len() as u128;
        let fee_share = fee.share_ceil(n).ok_or(ProtocolError::Overflow)?;
        for order in &batch {
            if fee_share > order.gas_fee {
                return Err(ProtocolError::FeeExceedsCeiling {
                    id: order.header.order_id.clone(),
                    share: fee_share,
                    ceiling: order.gas_fee,
                });
            }
        }

        // All checks passed; reserve the custodian balance first, then
        // mark the inputs in use.
        let payouts: Amount = batch.iter().map(|w| w.amount).sum();
        let hold = payouts.checked_add(fee).ok_or(ProtocolError::Overflow)?;
        self.ledger().lock_coin(&opcu, symbol, hold)?;
        let vin_refs: Vec<UtxoRef> = tx.vins.iter().map(|v| v.utxo.clone()).collect();
        for vin_ref in &vin_refs {
            let mut item = self
                .deposits()
                .get_item(symbol, &opcu, vin_ref)?
                .ok_or_else(|| ProtocolError::TxMismatch(format!("input {vin_ref} vanished")))?;
            item.status = DepositItemStatus::InProcess;
            self.deposits().set_item(symbol, &opcu, &item)?;
        }

        for mut wd in batch {
            wd.opcu = Some(opcu.clone());
            wd.utxo_vins = vin_refs.clone();
            let mut order = Order::Withdrawal(wd);
            order.header_mut().raw_data = raw_data.to_vec();
            order.advance(OrderStatus::WaitSign)?;
            self.orders().set_order(&order)?;
        }
        tracing::info!(%opcu, "withdrawal batch accepted for signing");
        Ok(())
    }

    fn withdrawal_wait_sign_account(
        &self,
        mut batch: Vec<WithdrawalOrder>,
        symbol: &Symbol,
        token: &TokenInfo,
        opcu: CuAddress,
        custodian_addr: &ExtAddress,
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        let mut wd = batch.remove(0);
        let tx = match self
            .connector
            .decode_raw(&token.chain, symbol, raw_data, &[])?
        {
            ExtTransaction::Account(tx) => tx,
            ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
        };
        if &tx.from != custodian_addr
            || tx.to != wd.to_addr
            || tx.amount != wd.amount
            || tx.contract != token.contract
            || tx.gas_limit != token.gas_limit
        {
            return Err(ProtocolError::TxMismatch("account fields".into()));
        }
        let expected_nonce = self.ledger().nonce(&token.chain, custodian_addr)?;
        if tx.nonce != expected_nonce {
            return Err(ProtocolError::TxMismatch(format!(
                "nonce {} expected {expected_nonce}",
                tx.nonce
            )));
        }
        self.check_fee_band(tx.gas_price, token.gas_price)?;
        let cost_limit = tx.cost_limit().ok_or(ProtocolError::Overflow)?;
        if cost_limit > wd.gas_fee {
            return Err(ProtocolError::FeeExceedsCeiling {
                id: wd.header.order_id.clone(),
                share: cost_limit,
                ceiling: wd.gas_fee,
            });
        }

        if !self.ledger().send_enabled(&token.chain, custodian_addr)? {
            return Err(ProtocolError::SendDisabled(custodian_addr.to_string()));
        }
        self.ledger()
            .set_send_enabled(&token.chain, custodian_addr, false)?;

        // Contract tokens pay gas in the chain's native asset, accounted
        // through the gas counters; only native-asset payouts hold their
        // own fee.
        let hold = if token.contract.is_none() {
            wd.amount.checked_add(cost_limit).ok_or(ProtocolError::Overflow)?
        } else {
            wd.amount
        };
        self.ledger().lock_coin(&opcu, symbol, hold)?;

        wd.opcu = Some(opcu);
        let mut order = Order::Withdrawal(wd);
        order.header_mut().raw_data = raw_data.to_vec();
        order.advance(OrderStatus::WaitSign)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Accept the signed counterpart of an accepted raw payout and pin the
    /// external hash.
    pub fn withdrawal_sign_finish(
        &self,
        ids: &[OrderId],
        signed_tx: &[u8],
    ) -> Result<(), ProtocolError> {
        let batch = self.withdrawal_batch(ids)?;
        let as_orders: Vec<Order> = batch.iter().cloned().map(Order::Withdrawal).collect();
        if Self::classify_proposal(
            &as_orders,
            OrderStatus::WaitSign,
            OrderStatus::SignFinish,
            signed_tx,
            |o| &o.header().signed_tx,
        )? == Proposal::Restated
        {
            return Ok(());
        }
        let symbol = Self::batch_shared(&as_orders, "symbol", |o| o.header().symbol.clone())?;
        let raw_data = Self::batch_shared(&as_orders, "raw data", |o| o.header().raw_data.clone())?;
        let refs = Self::batch_shared(&as_orders, "inputs", |o| match o {
            Order::Withdrawal(w) => w.utxo_vins.clone(),
            _ => unreachable!("batch is withdrawal-only"),
        })?;
        let opcu = batch[0]
            .opcu
            .clone()
            .ok_or_else(|| ProtocolError::BatchMismatch("no custodian assigned".into()))?;
        let token = self.supported_token(&symbol)?;
        let custodian_addr = self.ext_addr_of(&self.custodian(&opcu)?, &token.chain)?;

        if !self.connector.verify_signature(
            &token.chain,
            &symbol,
            &[custodian_addr],
            signed_tx,
            &refs,
        )? {
            return Err(ProtocolError::InvalidSignature);
        }
        let signed = self
            .connector
            .decode_signed(&token.chain, &symbol, signed_tx, &refs)?;
        let raw = self
            .connector
            .decode_raw(&token.chain, &symbol, &raw_data, &refs)?;
        if !same_content(&signed, &raw) {
            return Err(ProtocolError::TxMismatch(
                "signed transaction differs from accepted raw".into(),
            ));
        }

        let hash = signed.hash().clone();
        for wd in batch {
            let mut order = Order::Withdrawal(wd);
            order.header_mut().signed_tx = signed_tx.to_vec();
            order.header_mut().ext_tx_hash = Some(hash.clone());
            order.advance(OrderStatus::SignFinish)?;
            self.orders().set_order(&order)?;
        }
        tracing::info!(%hash, "withdrawal batch signed");
        Ok(())
    }

    /// Vote on the realized `(cost, success)` of a broadcast payout; on
    /// first confirmation settle or refund.
    pub fn withdrawal_finish(
        &self,
        voter: &ValidatorAddress,
        ext_tx_hash: &ExtTxHash,
        cost_fee: Amount,
        success: bool,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let outcome = self.vote(ext_tx_hash.as_str(), voter, &(cost_fee, success), height)?;
        if !outcome.first_confirmed_now {
            return Ok(());
        }
        self.apply_withdrawal_finish(ext_tx_hash, cost_fee, success)
    }

    fn signed_withdrawals(
        &self,
        ext_tx_hash: &ExtTxHash,
    ) -> Result<Vec<WithdrawalOrder>, ProtocolError> {
        let ids = self.orders().process_order_ids(&[OrderKind::Withdrawal])?;
        let mut batch = Vec::new();
        for id in ids {
            if let Some(Order::Withdrawal(w)) = self.orders().get_order(&id)? {
                if w.header.ext_tx_hash.as_ref() == Some(ext_tx_hash)
                    && w.header.status == OrderStatus::SignFinish
                {
                    batch.push(w);
                }
            }
        }
        if batch.is_empty() {
            return Err(ProtocolError::InvalidFinish(format!(
                "no signed withdrawal orders for {ext_tx_hash}"
            )));
        }
        Ok(batch)
    }

    fn apply_withdrawal_finish(
        &self,
        ext_tx_hash: &ExtTxHash,
        cost_fee: Amount,
        success: bool,
    ) -> Result<(), ProtocolError> {
        let batch = self.signed_withdrawals(ext_tx_hash)?;
        let symbol = batch[0].header.symbol.clone();
        let opcu = batch[0]
            .opcu
            .clone()
            .ok_or_else(|| ProtocolError::InvalidFinish("no custodian assigned".into()))?;
        let token = self.supported_token(&symbol)?;
        let custodian_addr = self.ext_addr_of(&self.custodian(&opcu)?, &token.chain)?;
        let refs = batch[0].utxo_vins.clone();
        let signed_tx = batch[0].header.signed_tx.clone();
        let decoded = self
            .connector
            .decode_signed(&token.chain, &symbol, &signed_tx, &refs)?;

        match decoded {
            ExtTransaction::Utxo(tx) => self.finish_withdrawal_utxo(
                batch,
                &symbol,
                &opcu,
                &custodian_addr,
                tx,
                cost_fee,
                success,
                ext_tx_hash,
            ),
            ExtTransaction::Account(tx) => {
                if tx.cost_limit().ok_or(ProtocolError::Overflow)? < cost_fee {
                    return Err(ProtocolError::InvalidFinish(
                        "reported cost exceeds the transaction's gas limit".into(),
                    ));
                }
                self.finish_withdrawal_account(
                    batch,
                    &symbol,
                    &token,
                    &opcu,
                    &custodian_addr,
                    tx,
                    cost_fee,
                    success,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_withdrawal_utxo(
        &self,
        batch: Vec<WithdrawalOrder>,
        symbol: &Symbol,
        opcu: &CuAddress,
        custodian_addr: &ExtAddress,
        tx: UtxoTx,
        cost_fee: Amount,
        success: bool,
        ext_tx_hash: &ExtTxHash,
    ) -> Result<(), ProtocolError> {
        let payouts: Amount = batch.iter().map(|w| w.amount).sum();
        let fee = tx
            .cost_fee()
            .ok_or_else(|| ProtocolError::InvalidFinish("outputs exceed inputs".into()))?;
        let hold = payouts.checked_add(fee).ok_or(ProtocolError::Overflow)?;
        let vin_refs = batch[0].utxo_vins.clone();

        if !success {
            // Broadcast failed: everything returns to where it was.
            self.ledger().unlock_coin(opcu, symbol, hold)?;
            for vin_ref in &vin_refs {
                if let Some(mut item) = self.deposits().get_item(symbol, opcu, vin_ref)? {
                    item.status = DepositItemStatus::Confirmed;
                    self.deposits().set_item(symbol, opcu, &item)?;
                }
            }
            for wd in batch {
                let total = wd
                    .amount
                    .checked_add(wd.gas_fee)
                    .ok_or(ProtocolError::Overflow)?;
                self.ledger()
                    .unlock_coin(&wd.header.cu_address, symbol, total)?;
                let mut order = Order::Withdrawal(wd);
                order.advance(OrderStatus::Failed)?;
                self.orders().set_order(&order)?;
            }
            tracing::info!(%ext_tx_hash, "withdrawal failed externally; fully refunded");
            return Ok(());
        }

        if fee != cost_fee {
            return Err(ProtocolError::InvalidFinish(
                "reported cost does not match the signed transaction".into(),
            ));
        }
        // Custodian side: the held payout+fee actually left the chain.
        self.ledger().sub_asset_hold(opcu, symbol, hold)?;
        for vin_ref in &vin_refs {
            self.deposits().delete_item(symbol, opcu, vin_ref)?;
        }
        if let Some((change_idx, change)) = match_vouts(&batch, &tx.vouts, custodian_addr)? {
            self.deposits().new_item(
                symbol,
                opcu,
                &harbor_orders::DepositItem {
                    hash: ext_tx_hash.clone(),
                    index: change_idx,
                    amount: change.amount,
                    ext_address: change.address.clone(),
                    status: DepositItemStatus::Confirmed,
                },
            )?;
        }

        let fee_share = cost_fee
            .share_ceil(batch.len() as u128)
            .ok_or(ProtocolError::Overflow)?;
        for wd in batch {
            let user = wd.header.cu_address.clone();
            let charged = wd
                .amount
                .checked_add(fee_share)
                .ok_or(ProtocolError::Overflow)?;
            self.ledger().sub_asset_hold(&user, symbol, charged)?;
            let refund = wd.gas_fee.saturating_sub(fee_share);
            if !refund.is_zero() {
                self.ledger().unlock_coin(&user, symbol, refund)?;
            }
            let mut order = Order::Withdrawal(wd);
            order.header_mut().cost_fee = fee_share;
            order.advance(OrderStatus::Finish)?;
            self.orders().set_order(&order)?;
        }
        tracing::info!(%ext_tx_hash, %cost_fee, "withdrawal finished");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_withdrawal_account(
        &self,
        mut batch: Vec<WithdrawalOrder>,
        symbol: &Symbol,
        token: &TokenInfo,
        opcu: &CuAddress,
        custodian_addr: &ExtAddress,
        tx: harbor_connector::AccountTx,
        cost_fee: Amount,
        success: bool,
    ) -> Result<(), ProtocolError> {
        let wd = batch.remove(0);
        let user = wd.header.cu_address.clone();
        let cost_limit = tx.cost_limit().ok_or(ProtocolError::Overflow)?;
        let native = token.contract.is_none();
        let hold = if native {
            wd.amount.checked_add(cost_limit).ok_or(ProtocolError::Overflow)?
        } else {
            wd.amount
        };
        let user_total = wd
            .amount
            .checked_add(wd.gas_fee)
            .ok_or(ProtocolError::Overflow)?;

        self.ledger()
            .set_send_enabled(&token.chain, custodian_addr, true)?;

        if !success {
            self.ledger().unlock_coin(opcu, symbol, hold)?;
            self.ledger().unlock_coin(&user, symbol, user_total)?;
            let mut order = Order::Withdrawal(wd);
            order.advance(OrderStatus::Failed)?;
            self.orders().set_order(&order)?;
            return Ok(());
        }

        // Custodian: release the hold, burn what actually left the chain,
        // return the unspent gas headroom.
        let spent = if native {
            wd.amount.checked_add(cost_fee).ok_or(ProtocolError::Overflow)?
        } else {
            wd.amount
        };
        self.ledger().sub_asset_hold(opcu, symbol, hold)?;
        let change = hold.saturating_sub(spent);
        if !change.is_zero() {
            self.ledger().add_asset(opcu, symbol, change)?;
        }
        self.ledger()
            .add_gas_used(&token.chain, custodian_addr, cost_fee)?;
        self.ledger()
            .advance_nonce(&token.chain, custodian_addr, tx.nonce)?;

        // User: charged principal plus the realized fee up to the declared
        // ceiling; the rest of the ceiling comes back.
        let fee_user = cost_fee.min(wd.gas_fee);
        let charged = wd
            .amount
            .checked_add(fee_user)
            .ok_or(ProtocolError::Overflow)?;
        self.ledger().sub_asset_hold(&user, symbol, charged)?;
        let refund = wd.gas_fee.saturating_sub(fee_user);
        if !refund.is_zero() {
            self.ledger().unlock_coin(&user, symbol, refund)?;
        }

        let mut order = Order::Withdrawal(wd);
        order.header_mut().cost_fee = fee_user;
        order.advance(OrderStatus::Finish)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Requester-only cancellation, permitted while the order is still in
    /// `Begin`. Fully reverses the Begin-time reservation.
    pub fn cancel_withdrawal(
        &self,
        user: &CuAddress,
        order_id: &OrderId,
    ) -> Result<(), ProtocolError> {
        let order = self
            .orders()
            .get_order(order_id)?
            .ok_or_else(|| ProtocolError::OrderNotFound(order_id.clone()))?;
        let Order::Withdrawal(wd) = order else {
            return Err(ProtocolError::UnexpectedKind(order_id.clone()));
        };
        if &wd.header.cu_address != user {
            return Err(ProtocolError::NotRequester);
        }
        if wd.header.status != OrderStatus::Begin {
            return Err(ProtocolError::UnexpectedStatus {
                id: order_id.clone(),
                status: wd.header.status,
            });
        }
        let total = wd
            .amount
            .checked_add(wd.gas_fee)
            .ok_or(ProtocolError::Overflow)?;
        self.ledger()
            .unlock_coin(&wd.header.cu_address, &wd.header.symbol, total)?;
        let mut order = Order::Withdrawal(wd);
        order.advance(OrderStatus::Cancel)?;
        self.orders().set_order(&order)?;
        tracing::info!(order = %order_id, "withdrawal cancelled by requester");
        Ok(())
    }
}
