//! Custodian asset migration at epoch change.
//!
//! When the validator set rotates, each outgoing custodian moves its
//! entire position in each asset to the newly elected custodian. The
//! payload is everything the custodian holds — all confirmed UTXOs, or
//! the whole account balance — and must match what the store recomputes.
//! Once every custodian has migrated every asset it held, the chain-wide
//! migration-finished flag is raised for the epoch manager.

use crate::collect::same_content;
use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::keeper::{CustodyKeeper, Proposal};
use crate::ProtocolError;
use harbor_connector::{
    fee_rate_per_kb, signed_size_estimate, ChainConnector, ExtTransaction,
};
use harbor_orders::{
    DepositItem, DepositItemStatus, OpcuAssetTransferOrder, Order, OrderHeader, OrderId,
    OrderKind, OrderStatus, TransferItems, TransferUtxo,
};
use harbor_store::KvStore;
use harbor_types::{
    Amount, BlockHeight, CuAddress, ExtTxHash, Symbol, TokenType, UtxoRef, ValidatorAddress,
};

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    /// The migration payload the store says `from_cu` should be moving.
    fn expected_transfer_items(
        &self,
        from_cu: &CuAddress,
        symbol: &Symbol,
        utxo_based: bool,
        status: DepositItemStatus,
    ) -> Result<TransferItems, ProtocolError> {
        if utxo_based {
            let mut utxos: Vec<TransferUtxo> = self
                .deposits()
                .items_for_owner(symbol, from_cu)?
                .into_iter()
                .filter(|i| i.status == status)
                .map(|i| TransferUtxo {
                    utxo: i.utxo_ref(),
                    amount: i.amount,
                })
                .collect();
            utxos.sort_by(|a, b| a.utxo.cmp(&b.utxo));
            Ok(TransferItems::Utxos(utxos))
        } else {
            Ok(TransferItems::Balance(
                self.balances().get_balance(from_cu, symbol)?.available,
            ))
        }
    }

    /// Open the migration of `from_cu`'s entire `symbol` position to the
    /// newly elected `to_cu`. The stated payload must match what the
    /// store recomputes, item for item.
    pub fn opcu_asset_transfer(
        &self,
        order_id: OrderId,
        from_cu: CuAddress,
        to_cu: CuAddress,
        symbol: Symbol,
        items: TransferItems,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let token = self.supported_token(&symbol)?;
        let from_info = self.custodian(&from_cu)?;
        let to_info = self.custodian(&to_cu)?;
        if from_cu == to_cu {
            return Err(ProtocolError::BatchMismatch(
                "migration source and target are the same custodian".into(),
            ));
        }
        if from_info.asset_migration_finished(&symbol) {
            return Err(ProtocolError::AlreadyMigrated {
                cu: from_cu,
                symbol,
            });
        }
        let to_addr = self.ext_addr_of(&to_info, &token.chain)?;

        let utxo_based = token.token_type == TokenType::UtxoBased;
        let expected =
            self.expected_transfer_items(&from_cu, &symbol, utxo_based, DepositItemStatus::Confirmed)?;
        match &items {
            TransferItems::Utxos(stated) => {
                let mut stated = stated.clone();
                stated.sort_by(|a, b| a.utxo.cmp(&b.utxo));
                if TransferItems::Utxos(stated) != expected {
                    return Err(ProtocolError::StuckSetMismatch);
                }
            }
            TransferItems::Balance(_) => {
                if items != expected {
                    return Err(ProtocolError::StuckSetMismatch);
                }
            }
        }
        // Continue with the recomputed (sorted) payload.
        let items = expected;

        let total = items.total();
        if total.is_zero() {
            return Err(ProtocolError::BatchMismatch("nothing to migrate".into()));
        }

        if self.orders().get_order(&order_id)?.is_some() {
            return Err(harbor_store::StoreError::Duplicate(order_id.to_string()).into());
        }
        self.ledger().lock_coin(&from_cu, &symbol, total)?;
        if let TransferItems::Utxos(utxos) = &items {
            for tu in utxos {
                let mut item = self
                    .deposits()
                    .get_item(&symbol, &from_cu, &tu.utxo)?
                    .ok_or_else(|| ProtocolError::TxMismatch(format!("{} vanished", tu.utxo)))?;
                item.status = DepositItemStatus::InProcess;
                self.deposits().set_item(&symbol, &from_cu, &item)?;
            }
        }

        let order = Order::OpcuAssetTransfer(OpcuAssetTransferOrder {
            header: OrderHeader::new(order_id, from_cu.clone(), symbol, height),
            from_cu,
            to_cu,
            to_addr,
            items,
        });
        self.orders().new_order(&order)?;
        tracing::info!(order = %order.id(), %total, "asset migration opened");
        Ok(())
    }

    fn transfer_order(&self, id: &OrderId) -> Result<OpcuAssetTransferOrder, ProtocolError> {
        match self
            .orders()
            .get_order(id)?
            .ok_or_else(|| ProtocolError::OrderNotFound(id.clone()))?
        {
            Order::OpcuAssetTransfer(t) => Ok(t),
            _ => Err(ProtocolError::UnexpectedKind(id.clone())),
        }
    }

    /// Accept the proposed raw migration transaction.
    pub fn opcu_asset_transfer_wait_sign(
        &self,
        id: &OrderId,
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        let at = self.transfer_order(id)?;
        let as_orders = [Order::OpcuAssetTransfer(at.clone())];
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
        let token = self.supported_token(&at.header.symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&at.from_cu)?, &token.chain)?;

        match &at.items {
            TransferItems::Utxos(utxos) => {
                let refs: Vec<UtxoRef> = utxos.iter().map(|u| u.utxo.clone()).collect();
                let tx = match self.connector.decode_raw(
                    &token.chain,
                    &at.header.symbol,
                    raw_data,
                    &refs,
                )? {
                    ExtTransaction::Utxo(tx) => tx,
                    ExtTransaction::Account(_) => return Err(ProtocolError::WrongTxModel),
                };
                if tx.vins.len() != utxos.len() {
                    return Err(ProtocolError::TxMismatch("input count".into()));
                }
                for vin in &tx.vins {
                    let tu = utxos
                        .iter()
                        .find(|u| u.utxo == vin.utxo)
                        .ok_or_else(|| {
                            ProtocolError::TxMismatch(format!("unexpected input {}", vin.utxo))
                        })?;
                    if vin.amount != tu.amount {
                        return Err(ProtocolError::TxMismatch(format!(
                            "input {} amount",
                            vin.utxo
                        )));
                    }
                }
                let [vout] = tx.vouts.as_slice() else {
                    return Err(ProtocolError::TxMismatch(
                        "migration needs exactly one output".into(),
                    ));
                };
                if vout.address != at.to_addr {
                    return Err(ProtocolError::TxMismatch(
                        "output not owned by the new custodian".into(),
                    ));
                }
                let fee = tx
                    .cost_fee()
                    .ok_or_else(|| ProtocolError::TxMismatch("outputs exceed inputs".into()))?;
                let size = signed_size_estimate(tx.vins.len(), tx.vouts.len());
                self.check_fee_band(fee_rate_per_kb(fee, size), token.gas_price)?;
            }
            TransferItems::Balance(total) => {
                let tx = match self.connector.decode_raw(
                    &token.chain,
                    &at.header.symbol,
                    raw_data,
                    &[],
                )? {
                    ExtTransaction::Account(tx) => tx,
                    ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
                };
                if tx.from != from_addr
                    || tx.to != at.to_addr
                    || tx.contract != token.contract
                    || tx.gas_limit != token.gas_limit
                {
                    return Err(ProtocolError::TxMismatch("account fields".into()));
                }
                let cost_limit = tx.cost_limit().ok_or(ProtocolError::Overflow)?;
                let max_amount = if token.contract.is_none() {
                    total.saturating_sub(cost_limit)
                } else {
                    *total
                };
                if tx.amount.is_zero() || tx.amount > max_amount {
                    return Err(ProtocolError::TxMismatch("migration amount".into()));
                }
                let expected_nonce = self.ledger().nonce(&token.chain, &from_addr)?;
                if tx.nonce != expected_nonce {
                    return Err(ProtocolError::TxMismatch(format!(
                        "nonce {} expected {expected_nonce}",
                        tx.nonce
                    )));
                }
                self.check_fee_band(tx.gas_price, token.gas_price)?;
                if !self.ledger().send_enabled(&token.chain, &from_addr)? {
                    return Err(ProtocolError::SendDisabled(from_addr.to_string()));
                }
                self.ledger()
                    .set_send_enabled(&token.chain, &from_addr, false)?;
            }
        }

        let mut order = Order::OpcuAssetTransfer(at);
        order.header_mut().raw_data = raw_data.to_vec();
        order.advance(OrderStatus::WaitSign)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Accept the signed counterpart and pin the external hash.
    pub fn opcu_asset_transfer_sign_finish(
        &self,
        id: &OrderId,
        signed_tx: &[u8],
    ) -> Result<(), ProtocolError> {
        let at = self.transfer_order(id)?;
        let as_orders = [Order::OpcuAssetTransfer(at.clone())];
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
        let token = self.supported_token(&at.header.symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&at.from_cu)?, &token.chain)?;
        let refs: Vec<UtxoRef> = match &at.items {
            TransferItems::Utxos(utxos) => utxos.iter().map(|u| u.utxo.clone()).collect(),
            TransferItems::Balance(_) => Vec::new(),
        };

        if !self.connector.verify_signature(
            &token.chain,
            &at.header.symbol,
            std::slice::from_ref(&from_addr),
            signed_tx,
            &refs,
        )? {
            return Err(ProtocolError::InvalidSignature);
        }
        let signed =
            self.connector
                .decode_signed(&token.chain, &at.header.symbol, signed_tx, &refs)?;
        let raw =
            self.connector
                .decode_raw(&token.chain, &at.header.symbol, &at.header.raw_data, &refs)?;
        if !same_content(&signed, &raw) {
            return Err(ProtocolError::TxMismatch(
                "signed transaction differs from accepted raw".into(),
            ));
        }

        let mut order = Order::OpcuAssetTransfer(at);
        order.header_mut().signed_tx = signed_tx.to_vec();
        order.header_mut().ext_tx_hash = Some(signed.hash().clone());
        order.advance(OrderStatus::SignFinish)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Vote on the realized cost; on first confirmation move the position
    /// to the new custodian, flip the migration flag, and — once every
    /// custodian has migrated everything — signal the epoch manager.
    pub fn opcu_asset_transfer_finish(
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

        let ids = self
            .orders()
            .process_order_ids(&[OrderKind::OpcuAssetTransfer])?;
        let mut found = None;
        for id in ids {
            let at = self.transfer_order(&id)?;
            if at.header.ext_tx_hash.as_ref() == Some(ext_tx_hash)
                && at.header.status == OrderStatus::SignFinish
            {
                found = Some(at);
                break;
            }
        }
        let at = found.ok_or_else(|| {
            ProtocolError::InvalidFinish(format!("no signed migration for {ext_tx_hash}"))
        })?;

        let symbol = at.header.symbol.clone();
        let token = self.supported_token(&symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&at.from_cu)?, &token.chain)?;
        let refs: Vec<UtxoRef> = match &at.items {
            TransferItems::Utxos(utxos) => utxos.iter().map(|u| u.utxo.clone()).collect(),
            TransferItems::Balance(_) => Vec::new(),
        };
        let total = at.items.total();

        let realized = match self.connector.decode_signed(
            &token.chain,
            &symbol,
            &at.header.signed_tx,
            &refs,
        )? {
            ExtTransaction::Utxo(tx) => {
                let [vout] = tx.vouts.as_slice() else {
                    return Err(ProtocolError::InvalidFinish("output shape changed".into()));
                };
                if vout.amount.checked_add(cost_fee) != Some(total) {
                    return Err(ProtocolError::InvalidFinish(
                        "reported cost does not match the signed transaction".into(),
                    ));
                }
                // Spent items leave the old custodian; the single output
                // becomes the new custodian's first UTXO.
                for r in &refs {
                    self.deposits().delete_item(&symbol, &at.from_cu, r)?;
                }
                self.deposits().new_item(
                    &symbol,
                    &at.to_cu,
                    &DepositItem {
                        hash: ext_tx_hash.clone(),
                        index: 0,
                        amount: vout.amount,
                        ext_address: vout.address.clone(),
                        status: DepositItemStatus::Confirmed,
                    },
                )?;
                vout.amount
            }
            ExtTransaction::Account(tx) => {
                self.ledger()
                    .add_gas_used(&token.chain, &from_addr, cost_fee)?;
                self.ledger()
                    .advance_nonce(&token.chain, &from_addr, tx.nonce)?;
                self.ledger()
                    .set_send_enabled(&token.chain, &from_addr, true)?;
                tx.amount
            }
        };

        // Old custodian's mirror empties; the realized value appears on
        // the new custodian's. Native-asset dust left behind by an
        // account-chain migration stays with the old custodian.
        self.ledger().sub_asset_hold(&at.from_cu, &symbol, total)?;
        let native_spent = match token.token_type {
            TokenType::UtxoBased => realized.checked_add(cost_fee).ok_or(ProtocolError::Overflow)?,
            _ if token.contract.is_none() => {
                realized.checked_add(cost_fee).ok_or(ProtocolError::Overflow)?
            }
            _ => realized,
        };
        let dust = total.saturating_sub(native_spent);
        if !dust.is_zero() {
            self.ledger().add_asset(&at.from_cu, &symbol, dust)?;
        }
        self.ledger().add_asset(&at.to_cu, &symbol, realized)?;

        let mut from_info = self.custodian(&at.from_cu)?;
        from_info.set_asset_migrated(symbol.clone(), true);
        self.cus().set_cu(&from_info)?;

        // Chain-wide: every custodian that started a migration has
        // finished all of them.
        let custodians = self.cus().custodians()?;
        let all_done = custodians.iter().any(|c| !c.asset_migrated.is_empty())
            && custodians
                .iter()
                .all(|c| c.asset_migrated.iter().all(|(_, done)| *done));
        if all_done {
            self.epoch.set_migration_finished();
            tracing::info!("all custodian assets migrated");
        }

        let mut order = Order::OpcuAssetTransfer(at);
        order.header_mut().cost_fee = cost_fee;
        order.advance(OrderStatus::Finish)?;
        self.orders().set_order(&order)?;
        tracing::info!(%ext_tx_hash, "asset migration finished");
        Ok(())
    }
}
