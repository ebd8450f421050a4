//! Order registry: keyed order persistence plus the in-flight index.
//!
//! Orders are written once at creation and overwritten in place as they
//! advance. The in-flight index holds the IDs of non-terminal orders per
//! kind so a restarted validator (or a periodic sweep) can reconstruct its
//! working set without a full table scan. Terminal orders leave the index
//! but stay in the store forever.

use crate::keys::{composite, prefix};
use crate::kv::KvStore;
use crate::StoreError;
use harbor_orders::{Order, OrderId, OrderKind};

pub struct OrderStore<'a, S: KvStore> {
    kv: &'a S,
}

fn order_key(id: &OrderId) -> Vec<u8> {
    composite(prefix::ORDER, &[id.as_str().as_bytes()])
}

fn process_index_key(kind: OrderKind, id: &OrderId) -> Vec<u8> {
    composite(
        prefix::ORDER_PROCESS_INDEX,
        &[&[kind.as_byte()], id.as_str().as_bytes()],
    )
}

impl<'a, S: KvStore> OrderStore<'a, S> {
    pub fn new(kv: &'a S) -> Self {
        Self { kv }
    }

    /// Persist a fresh order. Fails with `Duplicate` if the ID is taken —
    /// order IDs are externally supplied and must be globally unique.
    pub fn new_order(&self, order: &Order) -> Result<(), StoreError> {
        let key = order_key(order.id());
        if self.kv.get(&key)?.is_some() {
            return Err(StoreError::Duplicate(order.id().to_string()));
        }
        self.kv.set(&key, &bincode::serialize(order)?)?;
        self.kv.set(
            &process_index_key(order.kind(), order.id()),
            order.id().as_str().as_bytes(),
        )?;
        Ok(())
    }

    pub fn get_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        match self.kv.get(&order_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an order in place, maintaining the in-flight index.
    pub fn set_order(&self, order: &Order) -> Result<(), StoreError> {
        self.kv
            .set(&order_key(order.id()), &bincode::serialize(order)?)?;
        if order.status().is_terminal() {
            self.kv.delete(&process_index_key(order.kind(), order.id()))?;
        }
        Ok(())
    }

    /// IDs of all in-flight orders of the given kinds, in key order.
    pub fn process_order_ids(&self, kinds: &[OrderKind]) -> Result<Vec<OrderId>, StoreError> {
        let mut ids = Vec::new();
        for kind in kinds {
            let scan_prefix = composite(prefix::ORDER_PROCESS_INDEX, &[&[kind.as_byte()]]);
            for (_, value) in self.kv.scan_prefix(&scan_prefix)? {
                let raw = String::from_utf8(value)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let id = OrderId::new(raw)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemKvStore;
    use harbor_orders::{OrderHeader, OrderStatus, SysTransferOrder};
    use harbor_types::{Amount, CuAddress, ExtAddress, Symbol};

    fn order(id: &str) -> Order {
        Order::SysTransfer(SysTransferOrder {
            header: OrderHeader::new(
                OrderId::new(id).unwrap(),
                CuAddress::new("hrb1opcu"),
                Symbol::new("eth"),
                1,
            ),
            from_cu: CuAddress::new("hrb1opcu"),
            to_cu: CuAddress::new("hrb1user"),
            to_addr: ExtAddress::new("0xabc"),
            amount: Amount::new(10),
        })
    }

    #[test]
    fn new_order_rejects_duplicate_id() {
        let kv = MemKvStore::new();
        let store = OrderStore::new(&kv);
        store.new_order(&order("s1")).unwrap();
        assert!(matches!(
            store.new_order(&order("s1")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn created_order_is_in_flight() {
        let kv = MemKvStore::new();
        let store = OrderStore::new(&kv);
        store.new_order(&order("s1")).unwrap();
        let ids = store
            .process_order_ids(&[OrderKind::SysTransfer])
            .unwrap();
        assert_eq!(ids, vec![OrderId::new("s1").unwrap()]);
        assert!(store
            .process_order_ids(&[OrderKind::Collect])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn terminal_order_leaves_index_but_not_store() {
        let kv = MemKvStore::new();
        let store = OrderStore::new(&kv);
        let mut o = order("s1");
        store.new_order(&o).unwrap();

        o.advance(OrderStatus::Cancel).unwrap();
        store.set_order(&o).unwrap();

        assert!(store
            .process_order_ids(&[OrderKind::SysTransfer])
            .unwrap()
            .is_empty());
        let stored = store.get_order(o.id()).unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancel);
    }
}
