// DANS : src/ton/mod.rs
//
// Couche TON complète : cellules et bag-of-cells, chargeurs TLB, pile TVM,
// protocole liteserver (TL + transport ADNL) et pool de connexions.

pub mod address;
pub mod adnl;
pub mod boc;
pub mod cell;
pub mod dict;
pub mod global_config;
pub mod pool;
pub mod stack;
pub mod tl;
pub mod tlb;

pub use address::AccountAddress;
pub use cell::{Cell, CellBuilder, CellSlice};
pub use pool::{LitePool, LiteserverPool, NodeView, PoolError, PoolResult, TxCursor, TxPage, TxShortInfo};
pub use stack::StackValue;
pub use tlb::{AccountStatus, Message, MessageKind, StateInit, Transaction};

/// Identifiant de shard du masterchain (préfixe vide).
pub const MASTERCHAIN_SHARD: u64 = 0x8000_0000_0000_0000;
/// Workchain du masterchain.
pub const MASTERCHAIN_WORKCHAIN: i32 = -1;

/// Référence complète d'un bloc (`tonNode.blockIdExt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId {
    pub workchain: i32,
    pub shard: u64,
    pub seqno: u32,
    pub root_hash: [u8; 32],
    pub file_hash: [u8; 32],
}

impl BlockId {
    pub fn is_masterchain(&self) -> bool {
        self.workchain == MASTERCHAIN_WORKCHAIN
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{:016x},{})", self.workchain, self.shard, self.seqno)
    }
}
