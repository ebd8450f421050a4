//! The custody ledger.
//!
//! Per-account, per-asset balances with two views — *available* and
//! *on-hold* (reserved against a pending external operation) — plus the
//! per-external-address bookkeeping the account-model chains need: gas
//! received/used counters, the send-enabled single-writer gate, and the
//! transaction nonce.
//!
//! Every balance mutation validates its amount, refuses to go negative,
//! and returns a [`BalanceFlow`] audit record. `lock_coin`/`unlock_coin`
//! move value between the two views atomically: both sides are checked
//! before either is written, and the pair is persisted as one entry.

pub mod error;

pub use error::LedgerError;

use harbor_store::{AssetBalance, BalanceStore, KvStore};
use harbor_types::{Amount, Chain, CuAddress, ExtAddress, Symbol};
use serde::{Deserialize, Serialize};

/// Before/after record of one balance mutation, for audit trails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceFlow {
    pub cu: CuAddress,
    pub symbol: Symbol,
    pub previous_available: Amount,
    pub available: Amount,
    pub previous_hold: Amount,
    pub hold: Amount,
}

pub struct Ledger<'a, S: KvStore> {
    balances: BalanceStore<'a, S>,
}

impl<'a, S: KvStore> Ledger<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self {
            balances: BalanceStore::new(kv),
        }
    }

    pub fn balance(&self, cu: &CuAddress, symbol: &Symbol) -> Result<AssetBalance, LedgerError> {
        Ok(self.balances.get_balance(cu, symbol)?)
    }

    fn apply(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
        f: impl FnOnce(AssetBalance, Amount) -> Result<AssetBalance, LedgerError>,
    ) -> Result<BalanceFlow, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let before = self.balances.get_balance(cu, symbol)?;
        let after = f(before, amount)?;
        self.balances.set_balance(cu, symbol, &after)?;
        tracing::trace!(%cu, %symbol, %amount, available = %after.available, hold = %after.hold, "balance updated");
        Ok(BalanceFlow {
            cu: cu.clone(),
            symbol: symbol.clone(),
            previous_available: before.available,
            available: after.available,
            previous_hold: before.hold,
            hold: after.hold,
        })
    }

    /// Credit the available balance.
    pub fn add_asset(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            Ok(AssetBalance {
                available: bal.available.checked_add(amt).ok_or(LedgerError::Overflow)?,
                hold: bal.hold,
            })
        })
    }

    /// Debit the available balance; fails if it would go negative.
    pub fn sub_asset(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            let available =
                bal.available
                    .checked_sub(amt)
                    .ok_or(LedgerError::InsufficientFunds {
                        need: amt,
                        available: bal.available,
                    })?;
            Ok(AssetBalance {
                available,
                hold: bal.hold,
            })
        })
    }

    /// Credit the hold balance.
    pub fn add_asset_hold(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            Ok(AssetBalance {
                available: bal.available,
                hold: bal.hold.checked_add(amt).ok_or(LedgerError::Overflow)?,
            })
        })
    }

    /// Debit the hold balance; fails if it would go negative.
    pub fn sub_asset_hold(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            let hold = bal
                .hold
                .checked_sub(amt)
                .ok_or(LedgerError::InsufficientHold {
                    need: amt,
                    hold: bal.hold,
                })?;
            Ok(AssetBalance {
                available: bal.available,
                hold,
            })
        })
    }

    /// Reserve: available → hold, atomically.
    pub fn lock_coin(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            let available =
                bal.available
                    .checked_sub(amt)
                    .ok_or(LedgerError::InsufficientFunds {
                        need: amt,
                        available: bal.available,
                    })?;
            let hold = bal.hold.checked_add(amt).ok_or(LedgerError::Overflow)?;
            Ok(AssetBalance { available, hold })
        })
    }

    /// Release: hold → available, atomically.
    pub fn unlock_coin(
        &self,
        cu: &CuAddress,
        symbol: &Symbol,
        amount: Amount,
    ) -> Result<BalanceFlow, LedgerError> {
        self.apply(cu, symbol, amount, |bal, amt| {
            let hold = bal
                .hold
                .checked_sub(amt)
                .ok_or(LedgerError::InsufficientHold {
                    need: amt,
                    hold: bal.hold,
                })?;
            let available = bal.available.checked_add(amt).ok_or(LedgerError::Overflow)?;
            Ok(AssetBalance { available, hold })
        })
    }

    // ── Per-external-address bookkeeping ─────────────────────────────────

    /// The single-writer gate: a stage that builds a transaction from
    /// `addr` must observe `true`, then set `false`; only the terminating
    /// stage sets it back.
    pub fn send_enabled(&self, chain: &Chain, addr: &ExtAddress) -> Result<bool, LedgerError> {
        Ok(self.balances.send_enabled(chain, addr)?)
    }

    pub fn set_send_enabled(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        enabled: bool,
    ) -> Result<(), LedgerError> {
        tracing::debug!(%chain, %addr, enabled, "send gate");
        Ok(self.balances.set_send_enabled(chain, addr, enabled)?)
    }

    pub fn nonce(&self, chain: &Chain, addr: &ExtAddress) -> Result<u64, LedgerError> {
        Ok(self.balances.nonce(chain, addr)?)
    }

    /// Advance the nonce by exactly one. `observed` must equal the stored
    /// nonce — nonces are never advanced speculatively, only at Finish
    /// once the external chain has consumed the stored value.
    pub fn advance_nonce(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        observed: u64,
    ) -> Result<u64, LedgerError> {
        let current = self.balances.nonce(chain, addr)?;
        if current != observed {
            return Err(LedgerError::NonceMismatch {
                expected: current,
                got: observed,
            });
        }
        let next = current + 1;
        self.balances.set_nonce(chain, addr, next)?;
        Ok(next)
    }

    pub fn add_gas_received(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut gas = self.balances.get_gas(chain, addr)?;
        gas.received = gas.received.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(self.balances.set_gas(chain, addr, &gas)?)
    }

    pub fn add_gas_used(
        &self,
        chain: &Chain,
        addr: &ExtAddress,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut gas = self.balances.get_gas(chain, addr)?;
        gas.used = gas.used.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(self.balances.set_gas(chain, addr, &gas)?)
    }

    /// Gas still unspent at an external address.
    pub fn gas_remained(&self, chain: &Chain, addr: &ExtAddress) -> Result<Amount, LedgerError> {
        Ok(self.balances.get_gas(chain, addr)?.remained())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_store::MemKvStore;

    fn setup() -> (MemKvStore, CuAddress, Symbol) {
        (
            MemKvStore::new(),
            CuAddress::new("hrb1user"),
            Symbol::new("btc"),
        )
    }

    #[test]
    fn add_then_sub_restores_balance() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        ledger.add_asset(&cu, &sym, Amount::new(100)).unwrap();
        let flow = ledger.sub_asset(&cu, &sym, Amount::new(40)).unwrap();
        assert_eq!(flow.previous_available, Amount::new(100));
        assert_eq!(flow.available, Amount::new(60));
    }

    #[test]
    fn sub_asset_insufficient_funds() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        ledger.add_asset(&cu, &sym, Amount::new(10)).unwrap();
        let err = ledger.sub_asset(&cu, &sym, Amount::new(11)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        // Nothing changed.
        let bal = ledger.balance(&cu, &sym).unwrap();
        assert_eq!(bal.available, Amount::new(10));
    }

    #[test]
    fn sub_hold_insufficient() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        let err = ledger.sub_asset_hold(&cu, &sym, Amount::new(1)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientHold { .. }));
    }

    #[test]
    fn zero_amount_rejected() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        assert!(matches!(
            ledger.add_asset(&cu, &sym, Amount::ZERO),
            Err(LedgerError::ZeroAmount)
        ));
    }

    #[test]
    fn lock_moves_available_to_hold() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        ledger.add_asset(&cu, &sym, Amount::new(1050)).unwrap();

        let flow = ledger.lock_coin(&cu, &sym, Amount::new(1050)).unwrap();
        assert_eq!(flow.available, Amount::ZERO);
        assert_eq!(flow.hold, Amount::new(1050));

        let flow = ledger.unlock_coin(&cu, &sym, Amount::new(1050)).unwrap();
        assert_eq!(flow.available, Amount::new(1050));
        assert_eq!(flow.hold, Amount::ZERO);
    }

    #[test]
    fn lock_checks_before_writing() {
        let (kv, cu, sym) = setup();
        let ledger = Ledger::new(&kv);
        ledger.add_asset(&cu, &sym, Amount::new(5)).unwrap();
        assert!(ledger.lock_coin(&cu, &sym, Amount::new(6)).is_err());
        let bal = ledger.balance(&cu, &sym).unwrap();
        assert_eq!(bal.available, Amount::new(5));
        assert_eq!(bal.hold, Amount::ZERO);
    }

    #[test]
    fn nonce_advances_by_exactly_one() {
        let (kv, _, _) = setup();
        let ledger = Ledger::new(&kv);
        let chain = Chain::new("eth");
        let addr = ExtAddress::new("0xabc");
        assert_eq!(ledger.advance_nonce(&chain, &addr, 0).unwrap(), 1);
        assert!(matches!(
            ledger.advance_nonce(&chain, &addr, 0),
            Err(LedgerError::NonceMismatch { .. })
        ));
        assert_eq!(ledger.advance_nonce(&chain, &addr, 1).unwrap(), 2);
    }

    #[test]
    fn gas_counters_accumulate() {
        let (kv, _, _) = setup();
        let ledger = Ledger::new(&kv);
        let chain = Chain::new("eth");
        let addr = ExtAddress::new("0xabc");
        ledger
            .add_gas_received(&chain, &addr, Amount::new(100))
            .unwrap();
        ledger.add_gas_used(&chain, &addr, Amount::new(30)).unwrap();
        assert_eq!(ledger.gas_remained(&chain, &addr).unwrap(), Amount::new(70));
    }

    mod conservation {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// lock/unlock never change available + hold.
            #[test]
            fn lock_unlock_conserve_total(start in 1u128..1_000_000, lock in 1u128..1_000_000) {
                let kv = MemKvStore::new();
                let ledger = Ledger::new(&kv);
                let cu = CuAddress::new("hrb1p");
                let sym = Symbol::new("btc");
                ledger.add_asset(&cu, &sym, Amount::new(start)).unwrap();

                let _ = ledger.lock_coin(&cu, &sym, Amount::new(lock));
                let bal = ledger.balance(&cu, &sym).unwrap();
                prop_assert_eq!(bal.total(), Some(Amount::new(start)));

                let _ = ledger.unlock_coin(&cu, &sym, Amount::new(lock));
                let bal = ledger.balance(&cu, &sym).unwrap();
                prop_assert_eq!(bal.total(), Some(Amount::new(start)));
                prop_assert_eq!(bal.hold, Amount::ZERO);
            }
        }
    }
}
