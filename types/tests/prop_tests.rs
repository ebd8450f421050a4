use proptest::prelude::*;

use harbor_types::{Amount, CuAddress, ExtAddress, ExtTxHash, ProtocolParams, Symbol, UtxoRef};

proptest! {
    /// Amount roundtrip: new -> raw -> new is the identity.
    #[test]
    fn amount_roundtrip(raw in any::<u128>()) {
        let amount = Amount::new(raw);
        prop_assert_eq!(amount.raw(), raw);
    }

    /// checked_add agrees with u128 overflow semantics.
    #[test]
    fn amount_checked_add_matches_u128(a in any::<u128>(), b in any::<u128>()) {
        let sum = Amount::new(a).checked_add(Amount::new(b));
        prop_assert_eq!(sum.map(|s| s.raw()), a.checked_add(b));
    }

    /// share_ceil never under-covers: share × n ≥ amount.
    #[test]
    fn share_ceil_covers_amount(raw in 0u128..1_000_000_000, n in 1u128..1000) {
        let share = Amount::new(raw).share_ceil(n).unwrap();
        prop_assert!(share.raw() * n >= raw);
        prop_assert!(share.raw() * n < raw + n);
    }

    /// Amount bincode serialization roundtrip.
    #[test]
    fn amount_bincode_roundtrip(raw in any::<u128>()) {
        let amount = Amount::new(raw);
        let encoded = bincode::serialize(&amount).unwrap();
        let decoded: Amount = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, amount);
    }

    /// UtxoRef bincode roundtrip preserves hash and index.
    #[test]
    fn utxo_ref_bincode_roundtrip(hash in "[0-9a-f]{8,64}", index in any::<u64>()) {
        let utxo = UtxoRef::new(ExtTxHash::new(hash), index);
        let encoded = bincode::serialize(&utxo).unwrap();
        let decoded: UtxoRef = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, utxo);
    }

    /// Symbols compare case-insensitively through normalization.
    #[test]
    fn symbol_normalizes_case(raw in "[a-zA-Z]{1,8}") {
        prop_assert_eq!(Symbol::new(raw.clone()), Symbol::new(raw.to_ascii_uppercase()));
    }

    /// Home addresses roundtrip through serde_json.
    #[test]
    fn cu_address_json_roundtrip(suffix in "[0-9a-z]{1,32}") {
        let addr = CuAddress::new(format!("hrb{suffix}"));
        let encoded = serde_json::to_string(&addr).unwrap();
        let decoded: CuAddress = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, addr);
    }

    /// External addresses are stored verbatim.
    #[test]
    fn ext_address_verbatim(raw in "[!-~]{1,40}") {
        let addr = ExtAddress::new(raw.clone());
        prop_assert_eq!(addr.as_str(), raw.as_str());
    }
}

#[test]
fn params_toml_roundtrip() {
    let params = ProtocolParams::default();
    let encoded = toml::to_string(&params).unwrap();
    let decoded = ProtocolParams::from_toml_str(&encoded).unwrap();
    assert_eq!(decoded.price_lower_bound_bps, params.price_lower_bound_bps);
    assert_eq!(decoded.max_vout_limit, params.max_vout_limit);
}
