//! Collection: sweeping confirmed deposits into their custodian.
//!
//! WaitSign re-derives the proposed raw transaction from the batch and
//! rejects anything that does not restate it exactly; SignFinish checks
//! the signature and pins the external hash; Finish is quorum-voted on
//! the realized cost and applies the ledger effects exactly once.

use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::keeper::{CustodyKeeper, Proposal};
use crate::ProtocolError;
use harbor_connector::{
    fee_rate_per_kb, signed_size_estimate, AccountTx, ChainConnector, ExtTransaction, UtxoTx,
};
use harbor_orders::{
    CollectOrder, DepositConfirmStatus, DepositItem, DepositItemStatus, Order, OrderId,
    OrderKind, OrderStatus,
};
use harbor_store::KvStore;
use harbor_types::{
    Amount, BlockHeight, ExtAddress, ExtTxHash, Symbol, TokenInfo, TokenType, UtxoRef,
    ValidatorAddress,
};

/// Compare decoded transactions ignoring the external hash, which unsigned
/// bytes do not carry.
pub(crate) fn same_content(a: &ExtTransaction, b: &ExtTransaction) -> bool {
    match (a, b) {
        (ExtTransaction::Utxo(a), ExtTransaction::Utxo(b)) => {
            a.vins == b.vins && a.vouts == b.vouts
        }
        (ExtTransaction::Account(a), ExtTransaction::Account(b)) => {
            a.from == b.from
                && a.to == b.to
                && a.amount == b.amount
                && a.nonce == b.nonce
                && a.gas_price == b.gas_price
                && a.gas_limit == b.gas_limit
                && a.contract == b.contract
        }
        _ => false,
    }
}

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    fn collect_batch(&self, ids: &[OrderId]) -> Result<Vec<CollectOrder>, ProtocolError> {
        let orders = self.load_orders(ids)?;
        orders
            .into_iter()
            .map(|o| match o {
                Order::Collect(c) => Ok(c),
                other => Err(ProtocolError::UnexpectedKind(other.id().clone())),
            })
            .collect()
    }

    /// Look up the deposit items behind a collect batch, requiring the
    /// given status on each.
    fn batch_items(
        &self,
        batch: &[CollectOrder],
        symbol: &Symbol,
        status: DepositItemStatus,
    ) -> Result<Vec<DepositItem>, ProtocolError> {
        batch
            .iter()
            .map(|co| {
                let utxo = UtxoRef::new(co.deposit_hash.clone(), co.deposit_index);
                let item = self
                    .deposits()
                    .get_item(symbol, &co.from_cu, &utxo)?
                    .ok_or_else(|| {
                        ProtocolError::TxMismatch(format!("deposit item {utxo} missing"))
                    })?;
                if item.status != status {
                    return Err(ProtocolError::TxMismatch(format!(
                        "deposit item {utxo} not collectable"
                    )));
                }
                Ok(item)
            })
            .collect()
    }

    /// Accept a proposed raw collect transaction for a batch of confirmed
    /// deposits, all destined for one custodian.
    pub fn collect_wait_sign(
        &self,
        ids: &[OrderId],
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        let batch = self.collect_batch(ids)?;
        let limit = self.params().max_collect_items as usize;
        if batch.len() > limit {
            return Err(ProtocolError::BatchTooLarge {
                len: batch.len(),
                limit,
            });
        }

        let as_orders: Vec<Order> = batch.iter().cloned().map(Order::Collect).collect();
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
        let to_cu = Self::batch_shared(&as_orders, "custodian", |o| match o {
            Order::Collect(c) => c.to_cu.clone(),
            _ => unreachable!("batch is collect-only"),
        })?;
        if batch
            .iter()
            .any(|c| c.deposit_status != DepositConfirmStatus::Confirmed)
        {
            return Err(ProtocolError::BatchMismatch(
                "unconfirmed deposit in batch".into(),
            ));
        }

        let token = self.supported_token(&symbol)?;
        let custodian = self.custodian(&to_cu)?;
        let custodian_addr = self.ext_addr_of(&custodian, &token.chain)?;
        let items = self.batch_items(&batch, &symbol, DepositItemStatus::WaitCollect)?;

        let total: Amount = items.iter().map(|i| i.amount).sum();
        if total < token.collect_threshold {
            return Err(ProtocolError::BelowCollectThreshold {
                value: total,
                threshold: token.collect_threshold,
            });
        }

        match token.token_type {
            TokenType::UtxoBased => {
                let refs: Vec<UtxoRef> = items.iter().map(|i| i.utxo_ref()).collect();
                let tx = match self.connector.decode_raw(&token.chain, &symbol, raw_data, &refs)? {
                    ExtTransaction::Utxo(tx) => tx,
                    ExtTransaction::Account(_) => return Err(ProtocolError::WrongTxModel),
                };
                self.check_collect_utxo_tx(&tx, &items, &custodian_addr, &token)?;
            }
            TokenType::AccountBased => {
                let from_addr = Self::batch_shared(&as_orders, "source address", |o| match o {
                    Order::Collect(c) => c.from_addr.clone(),
                    _ => unreachable!("batch is collect-only"),
                })?;
                let tx = match self.connector.decode_raw(&token.chain, &symbol, raw_data, &[])? {
                    ExtTransaction::Account(tx) => tx,
                    ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
                };
                self.check_collect_account_tx(&tx, &from_addr, &custodian_addr, total, &token)?;
                if !self.ledger().send_enabled(&token.chain, &from_addr)? {
                    return Err(ProtocolError::SendDisabled(from_addr.to_string()));
                }
                self.ledger()
                    .set_send_enabled(&token.chain, &from_addr, false)?;
            }
            TokenType::AccountSharedBased => return Err(ProtocolError::UnsupportedTokenType),
        }

        // The depositors may have spent their credited balance since
        // confirmation; make sure every source lock will go through
        // before mutating anything.
        if token.token_type == TokenType::UtxoBased {
            let mut owed: Vec<(&harbor_types::CuAddress, Amount)> = Vec::new();
            for collect in &batch {
                match owed.iter_mut().find(|(cu, _)| *cu == &collect.from_cu) {
                    Some((_, total)) => {
                        *total = total
                            .checked_add(collect.amount)
                            .ok_or(ProtocolError::Overflow)?;
                    }
                    None => owed.push((&collect.from_cu, collect.amount)),
                }
            }
            for (cu, total) in owed {
                let available = self.ledger().balance(cu, &symbol)?.available;
                if available < total {
                    return Err(harbor_ledger::LedgerError::InsufficientFunds {
                        need: total,
                        available,
                    }
                    .into());
                }
            }
        }

        for (collect, mut item) in batch.into_iter().zip(items) {
            item.status = DepositItemStatus::InProcess;
            self.deposits().set_item(&symbol, &collect.from_cu, &item)?;
            // UTXO chains park the source balance on hold while the sweep
            // is in flight; account chains rely on the send gate instead.
            if token.token_type == TokenType::UtxoBased {
                self.ledger()
                    .lock_coin(&collect.from_cu, &symbol, collect.amount)?;
            }
            let mut order = Order::Collect(collect);
            order.header_mut().raw_data = raw_data.to_vec();
            order.advance(OrderStatus::WaitSign)?;
            self.orders().set_order(&order)?;
        }
        tracing::info!(batch = ids.len(), %symbol, "collect batch accepted for signing");
        Ok(())
    }

    fn check_collect_utxo_tx(
        &self,
        tx: &UtxoTx,
        items: &[DepositItem],
        custodian_addr: &ExtAddress,
        token: &TokenInfo,
    ) -> Result<(), ProtocolError> {
        if tx.vins.len() != items.len() {
            return Err(ProtocolError::TxMismatch("input count".into()));
        }
        let mut seen: Vec<&UtxoRef> = Vec::new();
        for vin in &tx.vins {
            let item = items
                .iter()
                .find(|i| i.utxo_ref() == vin.utxo)
                .ok_or_else(|| ProtocolError::TxMismatch(format!("unexpected input {}", vin.utxo)))?;
            if vin.amount != item.amount || vin.address != item.ext_address {
                return Err(ProtocolError::TxMismatch(format!(
                    "input {} does not match its deposit item",
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
        let [vout] = tx.vouts.as_slice() else {
            return Err(ProtocolError::TxMismatch("collect needs exactly one output".into()));
        };
        if &vout.address != custodian_addr {
            return Err(ProtocolError::TxMismatch("output not owned by custodian".into()));
        }
        let fee = tx
            .cost_fee()
            .ok_or_else(|| ProtocolError::TxMismatch("outputs exceed inputs".into()))?;
        let size = signed_size_estimate(tx.vins.len(), tx.vouts.len());
        self.check_fee_band(fee_rate_per_kb(fee, size), token.gas_price)
    }

    fn check_collect_account_tx(
        &self,
        tx: &AccountTx,
        from_addr: &ExtAddress,
        custodian_addr: &ExtAddress,
        total: Amount,
        token: &TokenInfo,
    ) -> Result<(), ProtocolError> {
        if &tx.from != from_addr
            || &tx.to != custodian_addr
            || tx.amount != total
            || tx.contract != token.contract
            || tx.gas_limit != token.gas_limit
        {
            return Err(ProtocolError::TxMismatch("account fields".into()));
        }
        let expected_nonce = self.ledger().nonce(&token.chain, from_addr)?;
        if tx.nonce != expected_nonce {
            return Err(ProtocolError::TxMismatch(format!(
                "nonce {} expected {expected_nonce}",
                tx.nonce
            )));
        }
        self.check_fee_band(tx.gas_price, token.gas_price)
    }

    /// Accept the signed counterpart of a previously accepted raw collect
    /// transaction and pin the external hash.
    pub fn collect_sign_finish(
        &self,
        ids: &[OrderId],
        signed_tx: &[u8],
    ) -> Result<(), ProtocolError> {
        let batch = self.collect_batch(ids)?;
        let as_orders: Vec<Order> = batch.iter().cloned().map(Order::Collect).collect();
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
        let token = self.supported_token(&symbol)?;

        let items = self.batch_items(&batch, &symbol, DepositItemStatus::InProcess)?;
        let refs: Vec<UtxoRef> = match token.token_type {
            TokenType::UtxoBased => items.iter().map(|i| i.utxo_ref()).collect(),
            _ => Vec::new(),
        };
        let mut from_addrs: Vec<ExtAddress> =
            items.iter().map(|i| i.ext_address.clone()).collect();
        from_addrs.dedup();

        if !self
            .connector
            .verify_signature(&token.chain, &symbol, &from_addrs, signed_tx, &refs)?
        {
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
        for collect in batch {
            let mut order = Order::Collect(collect);
            order.header_mut().signed_tx = signed_tx.to_vec();
            order.header_mut().ext_tx_hash = Some(hash.clone());
            order.advance(OrderStatus::SignFinish)?;
            self.orders().set_order(&order)?;
        }
        tracing::info!(%hash, "collect batch signed");
        Ok(())
    }

    /// Vote on the realized cost of a broadcast collect transaction; on
    /// first confirmation apply the ledger effects.
    pub fn collect_finish(
        &self,
        voter: &ValidatorAddress,
        ext_tx_hash: &ExtTxHash,
        cost_fee: Amount,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let outcome = self.vote(ext_tx_hash.as_str(), voter, &cost_fee, height)?;
        if !outcome.first_confirmed_now {
            return Ok(());
        }
        self.apply_collect_finish(ext_tx_hash, cost_fee)
    }

    fn apply_collect_finish(
        &self,
        ext_tx_hash: &ExtTxHash,
        cost_fee: Amount,
    ) -> Result<(), ProtocolError> {
        let ids = self.orders().process_order_ids(&[OrderKind::Collect])?;
        let mut batch = Vec::new();
        for id in ids {
            if let Some(Order::Collect(c)) = self.orders().get_order(&id)? {
                if c.header.ext_tx_hash.as_ref() == Some(ext_tx_hash)
                    && c.header.status == OrderStatus::SignFinish
                {
                    batch.push(c);
                }
            }
        }
        if batch.is_empty() {
            return Err(ProtocolError::InvalidFinish(format!(
                "no signed collect orders for {ext_tx_hash}"
            )));
        }

        let symbol = batch[0].header.symbol.clone();
        let to_cu = batch[0].to_cu.clone();
        let token = self.supported_token(&symbol)?;
        let signed_tx = batch[0].header.signed_tx.clone();
        let items = self.batch_items(&batch, &symbol, DepositItemStatus::InProcess)?;
        let refs: Vec<UtxoRef> = items.iter().map(|i| i.utxo_ref()).collect();
        let fee_share = cost_fee
            .share_ceil(batch.len() as u128)
            .ok_or(ProtocolError::Overflow)?;

        match self
            .connector
            .decode_signed(&token.chain, &symbol, &signed_tx, &refs)?
        {
            ExtTransaction::Utxo(tx) => {
                if tx.cost_fee() != Some(cost_fee) {
                    return Err(ProtocolError::InvalidFinish(
                        "reported cost does not match the signed transaction".into(),
                    ));
                }
                let [vout] = tx.vouts.as_slice() else {
                    return Err(ProtocolError::InvalidFinish("output shape changed".into()));
                };
                // The swept value lands as one custodian-owned UTXO.
                self.ledger().add_asset(&to_cu, &symbol, vout.amount)?;
                self.deposits().new_item(
                    &symbol,
                    &to_cu,
                    &DepositItem {
                        hash: ext_tx_hash.clone(),
                        index: 0,
                        amount: vout.amount,
                        ext_address: vout.address.clone(),
                        status: DepositItemStatus::Confirmed,
                    },
                )?;
                for (collect, mut item) in batch.into_iter().zip(items) {
                    self.ledger()
                        .unlock_coin(&collect.from_cu, &symbol, collect.amount)?;
                    item.status = DepositItemStatus::Confirmed;
                    self.deposits().set_item(&symbol, &collect.from_cu, &item)?;
                    self.finish_collect_order(collect, fee_share)?;
                }
            }
            ExtTransaction::Account(tx) => {
                let from_addr = batch[0].from_addr.clone();
                self.ledger().add_asset(&to_cu, &symbol, tx.amount)?;
                self.ledger()
                    .add_gas_used(&token.chain, &from_addr, cost_fee)?;
                self.ledger()
                    .advance_nonce(&token.chain, &from_addr, tx.nonce)?;
                self.ledger()
                    .set_send_enabled(&token.chain, &from_addr, true)?;
                for (collect, mut item) in batch.into_iter().zip(items) {
                    item.status = DepositItemStatus::Confirmed;
                    self.deposits().set_item(&symbol, &collect.from_cu, &item)?;
                    self.finish_collect_order(collect, fee_share)?;
                }
            }
        }
        tracing::info!(%ext_tx_hash, %cost_fee, "collect finished");
        Ok(())
    }

    fn finish_collect_order(
        &self,
        collect: CollectOrder,
        fee_share: Amount,
    ) -> Result<(), ProtocolError> {
        let mut order = Order::Collect(collect);
        if order.header().cost_fee.is_zero() {
            order.header_mut().cost_fee = fee_share;
        }
        order.advance(OrderStatus::Finish)?;
        self.orders().set_order(&order)?;
        Ok(())
    }
}
