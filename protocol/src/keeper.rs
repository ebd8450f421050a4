//! The custody keeper: shared state access and stage plumbing.
//!
//! Every protocol operation runs through one `CustodyKeeper`, which holds
//! the KV store, the chain connector, and the two boundary collaborators.
//! The per-kind stage handlers live in their own modules; what is shared
//! here is the plumbing every stage needs — token checks, validator
//! checks, quorum voting, the fee band, and the idempotent proposal gate.

use crate::external::{BehaviourKeeper, EpochKeeper};
use crate::ProtocolError;
use harbor_connector::ChainConnector;
use harbor_ledger::Ledger;
use harbor_orders::{Order, OrderId, OrderStatus};
use harbor_store::{
    BalanceStore, BehaviourStore, CuInfo, CuStore, DepositStore, KvStore, OrderStore, TokenStore,
    VoteStore,
};
use harbor_types::{
    Amount, BlockHeight, Chain, CuAddress, ExtAddress, ProtocolParams, Symbol, TokenInfo,
    TokenType, ValidatorAddress,
};
use harbor_votes::{majority23, AnyVoteBox, EvidenceVoteBox, VoteBox, VoteOutcome};
use serde::Serialize;

pub struct CustodyKeeper<'a, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    pub(crate) kv: &'a S,
    pub(crate) connector: &'a C,
    pub(crate) epoch: &'a E,
    pub(crate) behaviour: &'a B,
    pub(crate) params: ProtocolParams,
}

/// How a WaitSign/SignFinish proposal relates to what is already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Proposal {
    /// Orders are in the pre-stage status; apply the proposal.
    Fresh,
    /// Orders already advanced with these exact bytes; safe no-op.
    Restated,
}

impl<'a, S, C, E, B> CustodyKeeper<'a, S, C, E, B>
where
    S: KvStore,
    C: ChainConnector,
    E: EpochKeeper,
    B: BehaviourKeeper,
{
    pub fn new(
        kv: &'a S,
        connector: &'a C,
        epoch: &'a E,
        behaviour: &'a B,
        params: ProtocolParams,
    ) -> Self {
        Self {
            kv,
            connector,
            epoch,
            behaviour,
            params,
        }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    // ── Store accessors ──────────────────────────────────────────────────

    pub fn orders(&self) -> OrderStore<'a, S> {
        OrderStore::new(self.kv)
    }

    pub fn deposits(&self) -> DepositStore<'a, S> {
        DepositStore::new(self.kv)
    }

    pub fn vote_store(&self) -> VoteStore<'a, S> {
        VoteStore::new(self.kv)
    }

    pub fn ledger(&self) -> Ledger<'a, S> {
        Ledger::new(self.kv)
    }

    pub fn tokens(&self) -> TokenStore<'a, S> {
        TokenStore::new(self.kv)
    }

    pub fn cus(&self) -> CuStore<'a, S> {
        CuStore::new(self.kv)
    }

    pub fn balances(&self) -> BalanceStore<'a, S> {
        BalanceStore::new(self.kv)
    }

    pub fn behaviours(&self) -> BehaviourStore<'a, S> {
        BehaviourStore::new(self.kv)
    }

    // ── Shared checks ────────────────────────────────────────────────────

    /// Look up a token and reject the declared-but-unsupported shared
    /// account model up front.
    pub(crate) fn supported_token(&self, symbol: &Symbol) -> Result<TokenInfo, ProtocolError> {
        let token = self
            .tokens()
            .get_token(symbol)?
            .ok_or_else(|| ProtocolError::TokenNotFound(symbol.clone()))?;
        if token.token_type == TokenType::AccountSharedBased {
            return Err(ProtocolError::UnsupportedTokenType);
        }
        Ok(token)
    }

    pub(crate) fn require_validator(
        &self,
        voter: &ValidatorAddress,
    ) -> Result<(), ProtocolError> {
        if !self.epoch.is_active_key_node(voter) {
            return Err(ProtocolError::NotValidator(voter.clone()));
        }
        Ok(())
    }

    pub(crate) fn confirm_threshold(&self) -> usize {
        majority23(self.epoch.current_epoch().validators.len())
    }

    pub(crate) fn cu(&self, addr: &CuAddress) -> Result<CuInfo, ProtocolError> {
        self.cus()
            .get_cu(addr)?
            .ok_or_else(|| ProtocolError::CuNotFound(addr.clone()))
    }

    pub(crate) fn custodian(&self, addr: &CuAddress) -> Result<CuInfo, ProtocolError> {
        let cu = self.cu(addr)?;
        if !cu.is_custodian() {
            return Err(ProtocolError::NotCustodian(addr.clone()));
        }
        Ok(cu)
    }

    pub(crate) fn ext_addr_of(
        &self,
        cu: &CuInfo,
        chain: &Chain,
    ) -> Result<ExtAddress, ProtocolError> {
        cu.ext_address(chain)
            .cloned()
            .ok_or_else(|| ProtocolError::NoExtAddress(cu.address.clone()))
    }

    /// Enforce the configured acceptance band on an implied fee rate.
    /// A zero configured price disables the band.
    pub(crate) fn check_fee_band(
        &self,
        rate: Amount,
        configured: Amount,
    ) -> Result<(), ProtocolError> {
        if configured.is_zero() {
            return Ok(());
        }
        let rate_bps = rate.raw() * 10_000 / configured.raw();
        let lower = self.params.price_lower_bound_bps;
        let upper = self.params.price_upper_bound_bps;
        if rate_bps < lower as u128 || rate_bps > upper as u128 {
            return Err(ProtocolError::FeeOutOfBand {
                rate_bps,
                lower_bps: lower,
                upper_bps: upper,
            });
        }
        Ok(())
    }

    // ── Quorum voting ────────────────────────────────────────────────────

    /// Cast `voter`'s vote in the basic box for `vote_id`, creating the
    /// box lazily with the current `⌈2n/3⌉` threshold.
    pub(crate) fn vote<V: Serialize>(
        &self,
        vote_id: &str,
        voter: &ValidatorAddress,
        value: &V,
        height: BlockHeight,
    ) -> Result<VoteOutcome, ProtocolError> {
        self.require_validator(voter)?;
        let store = self.vote_store();
        let mut vote_box = match store.get_box(vote_id)? {
            Some(AnyVoteBox::Basic(vb)) => vb,
            Some(AnyVoteBox::Evidence(_)) => return Err(ProtocolError::WrongVoteBoxKind),
            None => VoteBox::new(self.confirm_threshold())?,
        };
        let outcome = vote_box.vote(voter, value)?;
        store.set_box(vote_id, &AnyVoteBox::Basic(vote_box), height)?;
        if outcome.first_confirmed_now {
            tracing::debug!(vote_id, voters = outcome.valid_voters.len(), "vote confirmed");
        }
        Ok(outcome)
    }

    /// Cast a retry vote in the evidence box for `vote_id`.
    pub(crate) fn vote_with_evidence<V: Serialize>(
        &self,
        vote_id: &str,
        voter: &ValidatorAddress,
        value: &V,
        uncooperative: Vec<ValidatorAddress>,
        height: BlockHeight,
    ) -> Result<(VoteOutcome, EvidenceVoteBox), ProtocolError> {
        self.require_validator(voter)?;
        let store = self.vote_store();
        let mut vote_box = match store.get_box(vote_id)? {
            Some(AnyVoteBox::Evidence(vb)) => vb,
            Some(AnyVoteBox::Basic(_)) => return Err(ProtocolError::WrongVoteBoxKind),
            None => EvidenceVoteBox::new(self.confirm_threshold())?,
        };
        let outcome = vote_box.vote(voter, value, uncooperative)?;
        store.set_box(vote_id, &AnyVoteBox::Evidence(vote_box.clone()), height)?;
        Ok((outcome, vote_box))
    }

    // ── Batch plumbing ───────────────────────────────────────────────────

    /// Load a batch; every ID must resolve.
    pub(crate) fn load_orders(&self, ids: &[OrderId]) -> Result<Vec<Order>, ProtocolError> {
        if ids.is_empty() {
            return Err(ProtocolError::EmptyBatch);
        }
        let store = self.orders();
        ids.iter()
            .map(|id| {
                store
                    .get_order(id)?
                    .ok_or_else(|| ProtocolError::OrderNotFound(id.clone()))
            })
            .collect()
    }

    /// Gate a stage proposal: either every order still awaits it, or every
    /// order already carries exactly these bytes (safe restatement). A
    /// different transaction for an advanced order is a conflict; mixed
    /// batches are sequence errors.
    pub(crate) fn classify_proposal(
        orders: &[Order],
        awaiting: OrderStatus,
        applied: OrderStatus,
        proposed: &[u8],
        stored: impl Fn(&Order) -> &[u8],
    ) -> Result<Proposal, ProtocolError> {
        if orders.iter().all(|o| o.status() == applied) {
            if orders.iter().all(|o| stored(o) == proposed) {
                return Ok(Proposal::Restated);
            }
            return Err(ProtocolError::ConflictingProposal(
                orders[0].id().clone(),
            ));
        }
        if let Some(bad) = orders.iter().find(|o| o.status() != awaiting) {
            return Err(ProtocolError::UnexpectedStatus {
                id: bad.id().clone(),
                status: bad.status(),
            });
        }
        Ok(Proposal::Fresh)
    }

    /// The batch-shared value of `f`, or a mismatch rejection.
    pub(crate) fn batch_shared<T: PartialEq + Clone>(
        orders: &[Order],
        what: &str,
        f: impl Fn(&Order) -> T,
    ) -> Result<T, ProtocolError> {
        let first = f(&orders[0]);
        if orders.iter().any(|o| f(o) != first) {
            return Err(ProtocolError::BatchMismatch(what.to_string()));
        }
        Ok(first)
    }
}
