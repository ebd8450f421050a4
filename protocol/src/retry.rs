//! Order retry: quorum-gated rewind of a stuck WaitSign batch.
//!
//! If the signing flow stalls (an uncooperative signer, a lost round),
//! any validator may propose retrying the batch. Retries are voted
//! through the evidence vote box: each vote names the peer validators the
//! voter saw fail to cooperate. Rounds are monotonic and gap-free — only
//! the current or immediately-next round is votable — and the stated
//! batch must match the recomputed set of stuck orders exactly, so two
//! concurrent retries over different batches cannot interleave.
//!
//! When the box reaches its full outcome (evidence threshold, or every
//! validator voted), the misbehaving validators are reported to the
//! behaviour collaborator exactly once.

use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::ProtocolError;
use crate::keeper::CustodyKeeper;
use harbor_connector::{ChainConnector, ExtTransaction};
use harbor_orders::{DepositItemStatus, Order, OrderId, OrderStatus, TransferItems};
use harbor_store::KvStore;
use harbor_types::{BlockHeight, TokenType, UtxoRef, ValidatorAddress};
use harbor_votes::{majority23, AnyVoteBox};

/// Behaviour key under which retry non-cooperation is reported.
pub const BEHAVIOUR_RETRY: &str = "retry-uncooperative";

impl<S, C, E, B> CustodyKeeper<'_, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    /// Vote to rewind a stuck batch to `Begin` for round `retry_times`,
    /// reporting the validators the voter saw fail to cooperate.
    pub fn order_retry(
        &self,
        voter: &ValidatorAddress,
        ids: &[OrderId],
        retry_times: u32,
        uncooperative: Vec<ValidatorAddress>,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let batch = self.load_orders(ids)?;
        let kind = Self::batch_shared(&batch, "kind", |o| o.kind())?;
        let raw_data = Self::batch_shared(&batch, "raw data", |o| o.header().raw_data.clone())?;
        let current = Self::batch_shared(&batch, "retry round", |o| o.header().retry_times)?;

        // Monotonic, gap-free rounds: the next round is proposable while
        // the batch is stuck; votes for the just-completed round are still
        // accepted after the rewind (they change nothing but evidence).
        if retry_times == current + 1 {
            if let Some(bad) = batch.iter().find(|o| o.status() != OrderStatus::WaitSign) {
                return Err(ProtocolError::UnexpectedStatus {
                    id: bad.id().clone(),
                    status: bad.status(),
                });
            }
        } else if retry_times != current {
            return Err(ProtocolError::RetryRoundMismatch {
                requested: retry_times,
                current,
            });
        }
        if retry_times > self.params().max_order_retry_times {
            return Err(ProtocolError::RetryLimitReached);
        }

        let vote_id = format!(
            "{}-{}",
            ids.iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(","),
            retry_times
        );
        let (outcome, _) =
            self.vote_with_evidence(&vote_id, voter, &retry_times, uncooperative, height)?;

        if outcome.first_confirmed_now && retry_times == current + 1 {
            // Transfer orders must match the recomputed stuck set exactly,
            // by ID, to guard against mismatched concurrent retries.
            let mut stuck: Vec<OrderId> = Vec::new();
            for id in self.orders().process_order_ids(&[kind])? {
                if let Some(o) = self.orders().get_order(&id)? {
                    if o.status() == OrderStatus::WaitSign && o.header().raw_data == raw_data {
                        stuck.push(id);
                    }
                }
            }
            let mut stated: Vec<OrderId> = ids.to_vec();
            stated.sort();
            stuck.sort();
            if stated != stuck {
                return Err(ProtocolError::StuckSetMismatch);
            }

            let n = batch.len();
            for order in batch {
                self.rewind_order(order, n)?;
            }
            tracing::info!(vote_id, round = retry_times, "stuck batch rewound to begin");
        }

        self.report_retry_behaviour(&vote_id, height)?;
        Ok(())
    }

    /// Reverse one order's WaitSign effects and reset it to `Begin`.
    ///
    /// This is the single sanctioned backward move in the protocol; it
    /// restores exactly the state WaitSign consumed.
    fn rewind_order(&self, order: Order, batch_size: usize) -> Result<(), ProtocolError> {
        let symbol = order.header().symbol.clone();
        let token = self.supported_token(&symbol)?;

        match &order {
            Order::Collect(collect) => {
                let utxo = UtxoRef::new(collect.deposit_hash.clone(), collect.deposit_index);
                let mut item = self
                    .deposits()
                    .get_item(&symbol, &collect.from_cu, &utxo)?
                    .ok_or_else(|| ProtocolError::TxMismatch(format!("{utxo} vanished")))?;
                item.status = DepositItemStatus::WaitCollect;
                self.deposits().set_item(&symbol, &collect.from_cu, &item)?;
                match token.token_type {
                    TokenType::UtxoBased => {
                        self.ledger()
                            .unlock_coin(&collect.from_cu, &symbol, collect.amount)?;
                    }
                    _ => {
                        self.ledger()
                            .set_send_enabled(&token.chain, &collect.from_addr, true)?;
                    }
                }
            }
            Order::Withdrawal(wd) => {
                let opcu = wd
                    .opcu
                    .clone()
                    .ok_or_else(|| ProtocolError::BatchMismatch("no custodian assigned".into()))?;
                match token.token_type {
                    TokenType::UtxoBased => {
                        // Free the custodian UTXOs and the held payout+fee.
                        for vin_ref in &wd.utxo_vins {
                            if let Some(mut item) =
                                self.deposits().get_item(&symbol, &opcu, vin_ref)?
                            {
                                if item.status == DepositItemStatus::InProcess {
                                    item.status = DepositItemStatus::Confirmed;
                                    self.deposits().set_item(&symbol, &opcu, &item)?;
                                }
                            }
                        }
                        let tx = match self.connector.decode_raw(
                            &token.chain,
                            &symbol,
                            &wd.header.raw_data,
                            &wd.utxo_vins,
                        )? {
                            ExtTransaction::Utxo(tx) => tx,
                            ExtTransaction::Account(_) => return Err(ProtocolError::WrongTxModel),
                        };
                        let fee = tx
                            .cost_fee()
                            .ok_or_else(|| ProtocolError::TxMismatch("raw fee".into()))?;
                        // One order's slice of the batch hold: its payout
                        // plus its share of the fee. The clamp releases
                        // the rounding remainder with the last order.
                        let held = self.balances().get_balance(&opcu, &symbol)?.hold;
                        let fee_share = fee
                            .share_ceil(batch_size as u128)
                            .ok_or(ProtocolError::Overflow)?;
                        let share = wd
                            .amount
                            .checked_add(fee_share)
                            .ok_or(ProtocolError::Overflow)?;
                        self.ledger().unlock_coin(&opcu, &symbol, share.min(held))?;
                    }
                    _ => {
                        let custodian_addr =
                            self.ext_addr_of(&self.custodian(&opcu)?, &token.chain)?;
                        let tx = match self.connector.decode_raw(
                            &token.chain,
                            &symbol,
                            &wd.header.raw_data,
                            &[],
                        )? {
                            ExtTransaction::Account(tx) => tx,
                            ExtTransaction::Utxo(_) => return Err(ProtocolError::WrongTxModel),
                        };
                        let cost_limit = tx.cost_limit().ok_or(ProtocolError::Overflow)?;
                        let hold = if token.contract.is_none() {
                            wd.amount
                                .checked_add(cost_limit)
                                .ok_or(ProtocolError::Overflow)?
                        } else {
                            wd.amount
                        };
                        self.ledger().unlock_coin(&opcu, &symbol, hold)?;
                        self.ledger()
                            .set_send_enabled(&token.chain, &custodian_addr, true)?;
                    }
                }
            }
            Order::SysTransfer(st) => {
                // The Begin-time reservation stays; only the send gate
                // taken at WaitSign is released.
                let from_addr = self.ext_addr_of(&self.custodian(&st.from_cu)?, &token.chain)?;
                self.ledger()
                    .set_send_enabled(&token.chain, &from_addr, true)?;
            }
            Order::OpcuAssetTransfer(at) => {
                if let TransferItems::Balance(_) = at.items {
                    let from_addr =
                        self.ext_addr_of(&self.custodian(&at.from_cu)?, &token.chain)?;
                    self.ledger()
                        .set_send_enabled(&token.chain, &from_addr, true)?;
                }
                // UTXO payloads were marked InProcess at Begin and stay
                // reserved across the retry.
            }
        }

        let mut order = order;
        if let Order::Withdrawal(wd) = &mut order {
            wd.opcu = None;
            wd.utxo_vins.clear();
        }
        order.header_mut().reset_for_retry();
        self.orders().set_order(&order)?;
        Ok(())
    }

    /// Fire the behaviour reports exactly once per retry vote, when the
    /// box reaches its full outcome.
    fn report_retry_behaviour(
        &self,
        vote_id: &str,
        height: BlockHeight,
    ) -> Result<(), ProtocolError> {
        let store = self.vote_store();
        let Some(AnyVoteBox::Evidence(mut vote_box)) = store.get_box(vote_id)? else {
            return Ok(());
        };
        if vote_box.reported {
            return Ok(());
        }
        let validators = self.epoch.current_epoch().validators;
        let threshold = majority23(validators.len());
        let Some(report) = vote_box.full_outcome(&validators, threshold) else {
            return Ok(());
        };
        for (validator, was_normal) in report {
            self.behaviour
                .handle_behaviour(BEHAVIOUR_RETRY, &validator, height, was_normal);
            if !was_normal {
                self.behaviours().record(BEHAVIOUR_RETRY, &validator)?;
            }
        }
        vote_box.mark_reported();
        store.set_box(vote_id, &AnyVoteBox::Evidence(vote_box), height)?;
        Ok(())
    }
}
