//! Sys-transfer: protocol-initiated gas top-ups on account chains.
//!
//! An address that must send an outbound transaction (a deposit address
//! awaiting collection, a custodian paying a withdrawal) needs native gas
//! first. A custodian fronts it through a sys-transfer order, gated by a
//! re-check that the target still needs gas so two validators racing to
//! top up the same address cannot double it.

use crate::collect::same_content;
use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::keeper::{CustodyKeeper, Proposal};
use crate::ProtocolError;
use harbor_connector::{ChainConnector, ExtTransaction};
use harbor_orders::{Order, OrderHeader, OrderId, OrderKind, OrderStatus, SysTransferOrder};
use harbor_store::KvStore;
use harbor_types::{
    Amount, BlockHeight, CuAddress, ExtTxHash, Symbol, TokenType, ValidatorAddress,
};

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    /// Open a gas top-up from `from_cu` to `to_cu`'s external address.
    /// The amount is protocol-computed, never caller-chosen.
    pub fn sys_transfer(
        &self,
        order_id: OrderId,
        from_cu: CuAddress,
        to_cu: CuAddress,
        symbol: Symbol,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let token = self.supported_token(&symbol)?;
        if token.token_type != TokenType::AccountBased {
            return Err(ProtocolError::WrongTxModel);
        }
        if token.contract.is_some() {
            // Gas is always the chain's native asset.
            return Err(ProtocolError::UnsupportedTokenType);
        }
        self.custodian(&from_cu)?;
        let to_info = self.cu(&to_cu)?;
        let to_addr = self.ext_addr_of(&to_info, &token.chain)?;

        let tx_cost = token.account_tx_cost().ok_or(ProtocolError::Overflow)?;
        let multiple = if to_info.is_custodian() {
            self.params().opcu_sys_transfer_gas_multiple
        } else {
            self.params().sys_transfer_gas_multiple
        };
        let target = tx_cost.checked_mul(multiple).ok_or(ProtocolError::Overflow)?;
        let remained = self.ledger().gas_remained(&token.chain, &to_addr)?;
        if remained >= target {
            return Err(ProtocolError::GasNotNeeded);
        }
        let amount = target.saturating_sub(remained);

        if self.orders().get_order(&order_id)?.is_some() {
            return Err(harbor_store::StoreError::Duplicate(order_id.to_string()).into());
        }
        // Reserve the top-up plus the transfer's own gas.
        let total = amount.checked_add(tx_cost).ok_or(ProtocolError::Overflow)?;
        self.ledger().lock_coin(&from_cu, &symbol, total)?;

        let order = Order::SysTransfer(SysTransferOrder {
            header: OrderHeader::new(order_id, from_cu.clone(), symbol, height),
            from_cu,
            to_cu,
            to_addr,
            amount,
        });
        self.orders().new_order(&order)?;
        tracing::info!(order = %order.id(), %amount, "sys-transfer opened");
        Ok(())
    }

    fn sys_transfer_order(&self, id: &OrderId) -> Result<SysTransferOrder, ProtocolError> {
        match self
            .orders()
            .get_order(id)?
            .ok_or_else(|| ProtocolError::OrderNotFound(id.clone()))?
        {
            Order::SysTransfer(st) => Ok(st),
            _ => Err(ProtocolError::UnexpectedKind(id.clone())),
        }
    }

    /// Accept the proposed raw top-up transaction.
    pub fn sys_transfer_wait_sign(
        &self,
        id: &OrderId,
        raw_data: &[u8],
    ) -> Result<(), ProtocolError> {
        let st = self.sys_transfer_order(id)?;
        let as_orders = [Order::SysTransfer(st.clone())];
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
        let token = self.supported_token(&st.header.symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&st.from_cu)?, &token.chain)?;

        let tx = match self
            .connector
            .decode_raw(&token.chain, &st.header.symbol, raw_data, &[])?
        {
            ExtTransaction::Account(tx) => tx,
            ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
        };
        if tx.from != from_addr
            || tx.to != st.to_addr
            || tx.amount != st.amount
            || tx.contract.is_some()
            || tx.gas_limit != token.gas_limit
        {
            return Err(ProtocolError::TxMismatch("account fields".into()));
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

        let mut order = Order::SysTransfer(st);
        order.header_mut().raw_data = raw_data.to_vec();
        order.advance(OrderStatus::WaitSign)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Accept the signed counterpart and pin the external hash.
    pub fn sys_transfer_sign_finish(
        &self,
        id: &OrderId,
        signed_tx: &[u8],
    ) -> Result<(), ProtocolError> {
        let st = self.sys_transfer_order(id)?;
        let as_orders = [Order::SysTransfer(st.clone())];
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
        let token = self.supported_token(&st.header.symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&st.from_cu)?, &token.chain)?;

        if !self.connector.verify_signature(
            &token.chain,
            &st.header.symbol,
            std::slice::from_ref(&from_addr),
            signed_tx,
            &[],
        )? {
            return Err(ProtocolError::InvalidSignature);
        }
        let signed = self
            .connector
            .decode_signed(&token.chain, &st.header.symbol, signed_tx, &[])?;
        let raw = self
            .connector
            .decode_raw(&token.chain, &st.header.symbol, &st.header.raw_data, &[])?;
        if !same_content(&signed, &raw) {
            return Err(ProtocolError::TxMismatch(
                "signed transaction differs from accepted raw".into(),
            ));
        }

        let mut order = Order::SysTransfer(st);
        order.header_mut().signed_tx = signed_tx.to_vec();
        order.header_mut().ext_tx_hash = Some(signed.hash().clone());
        order.advance(OrderStatus::SignFinish)?;
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Vote on the realized `(cost, success)`; settle the top-up once.
    pub fn sys_transfer_finish(
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

        let ids = self.orders().process_order_ids(&[OrderKind::SysTransfer])?;
        let mut found = None;
        for id in ids {
            let st = self.sys_transfer_order(&id)?;
            if st.header.ext_tx_hash.as_ref() == Some(ext_tx_hash)
                && st.header.status == OrderStatus::SignFinish
            {
                found = Some(st);
                break;
            }
        }
        let st = found.ok_or_else(|| {
            ProtocolError::InvalidFinish(format!("no signed sys-transfer for {ext_tx_hash}"))
        })?;

        let token = self.supported_token(&st.header.symbol)?;
        let from_addr = self.ext_addr_of(&self.custodian(&st.from_cu)?, &token.chain)?;
        let tx = match self.connector.decode_signed(
            &token.chain,
            &st.header.symbol,
            &st.header.signed_tx,
            &[],
        )? {
            ExtTransaction::Account(tx) => tx,
            ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
        };

        let tx_cost = token.account_tx_cost().ok_or(ProtocolError::Overflow)?;
        let locked = st.amount.checked_add(tx_cost).ok_or(ProtocolError::Overflow)?;

        self.ledger()
            .set_send_enabled(&token.chain, &from_addr, true)?;

        if !success {
            self.ledger()
                .unlock_coin(&st.from_cu, &st.header.symbol, locked)?;
            let mut order = Order::SysTransfer(st);
            order.advance(OrderStatus::Failed)?;
            self.orders().set_order(&order)?;
            return Ok(());
        }

        if cost_fee > tx_cost {
            return Err(ProtocolError::InvalidFinish(
                "reported cost exceeds the transaction's gas limit".into(),
            ));
        }
        let spent = st.amount.checked_add(cost_fee).ok_or(ProtocolError::Overflow)?;
        self.ledger()
            .sub_asset_hold(&st.from_cu, &st.header.symbol, locked)?;
        let change = locked.saturating_sub(spent);
        if !change.is_zero() {
            self.ledger()
                .add_asset(&st.from_cu, &st.header.symbol, change)?;
        }
        self.ledger()
            .add_gas_received(&token.chain, &st.to_addr, st.amount)?;
        self.ledger()
            .add_gas_used(&token.chain, &from_addr, cost_fee)?;
        self.ledger()
            .advance_nonce(&token.chain, &from_addr, tx.nonce)?;

        let mut order = Order::SysTransfer(st);
        order.header_mut().cost_fee = cost_fee;
        order.advance(OrderStatus::Finish)?;
        self.orders().set_order(&order)?;
        tracing::info!(%ext_tx_hash, "sys-transfer finished");
        Ok(())
    }
}
