// DANS : src/ton/tlb.rs
//
// Chargeurs TLB limités à ce que l'indexeur consomme réellement :
// transactions, messages entrants avec StateInit, état de compte et
// configuration des shards. Tout le reste est sauté sans être décodé.

use anyhow::{bail, Context, Result};

use super::cell::{Cell, CellSlice};
use super::dict;
use super::BlockId;

/// Statut d'un compte avant/après transaction (2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Uninit,
    Frozen,
    Active,
    Nonexist,
}

impl AccountStatus {
    fn load(slice: &mut CellSlice) -> Result<Self> {
        Ok(match slice.load_uint(2)? {
            0b00 => Self::Uninit,
            0b01 => Self::Frozen,
            0b10 => Self::Active,
            _ => Self::Nonexist,
        })
    }
}

/// Paire (code, data) qui initialise un compte au premier message entrant.
#[derive(Debug, Clone, Default)]
pub struct StateInit {
    pub code: Option<Cell>,
    pub data: Option<Cell>,
}

impl StateInit {
    fn load(slice: &mut CellSlice) -> Result<Self> {
        if slice.load_bit()? {
            slice.skip_bits(5)?; // split_depth
        }
        if slice.load_bit()? {
            slice.skip_bits(2)?; // tick / tock
        }
        let code = if slice.load_bit()? { Some(slice.load_ref()?) } else { None };
        let data = if slice.load_bit()? { Some(slice.load_ref()?) } else { None };
        if slice.load_bit()? {
            slice.load_ref()?; // bibliothèques, ignorées
        }
        Ok(Self { code, data })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Internal,
    ExternalIn,
    ExternalOut,
}

/// Message réduit aux champs utiles au classifieur.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub state_init: Option<StateInit>,
}

impl Message {
    pub fn load(root: &Cell) -> Result<Self> {
        let mut s = root.as_slice();
        let kind = if !s.load_bit()? {
            // int_msg_info$0
            s.skip_bits(3)?; // ihr_disabled, bounce, bounced
            load_msg_address(&mut s)?;
            load_msg_address(&mut s)?;
            skip_currency_collection(&mut s)?;
            skip_grams(&mut s)?; // ihr_fee
            skip_grams(&mut s)?; // fwd_fee
            s.skip_bits(64 + 32)?; // created_lt, created_at
            MessageKind::Internal
        } else if !s.load_bit()? {
            // ext_in_msg_info$10
            load_msg_address(&mut s)?;
            load_msg_address(&mut s)?;
            skip_grams(&mut s)?; // import_fee
            MessageKind::ExternalIn
        } else {
            // ext_out_msg_info$11
            load_msg_address(&mut s)?;
            load_msg_address(&mut s)?;
            s.skip_bits(64 + 32)?;
            MessageKind::ExternalOut
        };

        let state_init = if s.load_bit()? {
            let init = if s.load_bit()? {
                StateInit::load(&mut s.load_ref()?.as_slice())?
            } else {
                StateInit::load(&mut s)?
            };
            Some(init)
        } else {
            None
        };
        // Le corps du message n'est pas décodé.

        Ok(Self { kind, state_init })
    }
}

/// Mise à jour de l'état du compte : `old == new` signifie transaction neutre.
#[derive(Debug, Clone, Copy)]
pub struct StateUpdate {
    pub old_hash: [u8; 32],
    pub new_hash: [u8; 32],
}

/// Transaction chargée, réduite aux champs consommés par le classifieur.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub account: [u8; 32],
    pub lt: u64,
    pub prev_trans_hash: [u8; 32],
    pub prev_trans_lt: u64,
    pub now: u32,
    pub orig_status: AccountStatus,
    pub end_status: AccountStatus,
    pub in_msg: Option<Message>,
    pub state_update: StateUpdate,
    /// Hash de représentation de la cellule racine — identité de la transaction.
    pub hash: [u8; 32],
}

impl Transaction {
    pub fn load(root: &Cell) -> Result<Self> {
        let mut s = root.as_slice();
        if s.load_uint(4)? != 0b0111 {
            bail!("tag de transaction invalide");
        }
        let account = s.load_hash()?;
        let lt = s.load_u64()?;
        let prev_trans_hash = s.load_hash()?;
        let prev_trans_lt = s.load_u64()?;
        let now = s.load_u32()?;
        s.skip_bits(15)?; // outmsg_cnt
        let orig_status = AccountStatus::load(&mut s)?;
        let end_status = AccountStatus::load(&mut s)?;

        // ^[ in_msg:(Maybe ^Message) out_msgs:(HashmapE 15 ^Message) ]
        let msgs = s.load_ref()?;
        let mut ms = msgs.as_slice();
        let in_msg = if ms.load_bit()? {
            Some(Message::load(&ms.load_ref()?).context("message entrant illisible")?)
        } else {
            None
        };

        skip_currency_collection(&mut s)?; // total_fees

        // state_update:^(HASH_UPDATE Account)
        let update = s.load_ref()?;
        let mut us = update.as_slice();
        if us.load_u8()? != 0x72 {
            bail!("tag HASH_UPDATE invalide");
        }
        let state_update = StateUpdate {
            old_hash: us.load_hash()?,
            new_hash: us.load_hash()?,
        };
        // description:^TransactionDescr — non décodée.

        Ok(Self {
            account,
            lt,
            prev_trans_hash,
            prev_trans_lt,
            now,
            orig_status,
            end_status,
            in_msg,
            state_update,
            hash: root.repr_hash(),
        })
    }
}

/// État d'un compte tel que renvoyé par `getAccountState`.
#[derive(Debug, Clone)]
pub enum AccountState {
    NotExists,
    Uninit,
    Frozen,
    Active(StateInit),
}

impl AccountState {
    pub fn load(root: &Cell) -> Result<Self> {
        let mut s = root.as_slice();
        if !s.load_bit()? {
            return Ok(Self::NotExists);
        }
        load_msg_address(&mut s)?; // addr

        // storage_stat : used (3 × VarUInteger 7), last_paid, due_payment
        for _ in 0..3 {
            let len = s.load_uint(3)? as usize;
            s.skip_bits(len * 8)?;
        }
        s.skip_bits(32)?; // last_paid
        if s.load_bit()? {
            skip_grams(&mut s)?; // due_payment
        }

        // storage : last_trans_lt, balance, state
        s.skip_bits(64)?;
        skip_currency_collection(&mut s)?;

        if s.load_bit()? {
            Ok(Self::Active(StateInit::load(&mut s)?))
        } else if s.load_bit()? {
            s.skip_bits(256)?; // state_hash
            Ok(Self::Frozen)
        } else {
            Ok(Self::Uninit)
        }
    }
}

/// Lit une MsgAddress ; renvoie `Some((workchain, id))` pour une addr_std,
/// `None` pour addr_none / addr_extern / formes variables.
pub fn load_msg_address(slice: &mut CellSlice) -> Result<Option<(i32, [u8; 32])>> {
    match slice.load_uint(2)? {
        0b00 => Ok(None),
        0b01 => {
            let len = slice.load_uint(9)? as usize;
            slice.skip_bits(len)?;
            Ok(None)
        }
        0b10 => {
            if slice.load_bit()? {
                let depth = slice.load_uint(5)? as usize;
                slice.skip_bits(depth)?; // anycast, ignoré
            }
            let workchain = slice.load_int(8)? as i32;
            let id = slice.load_hash()?;
            Ok(Some((workchain, id)))
        }
        _ => {
            if slice.load_bit()? {
                let depth = slice.load_uint(5)? as usize;
                slice.skip_bits(depth)?;
            }
            let len = slice.load_uint(9)? as usize;
            let workchain = slice.load_int(32)? as i32;
            if len == 256 {
                let id = slice.load_hash()?;
                Ok(Some((workchain, id)))
            } else {
                slice.skip_bits(len)?;
                Ok(None)
            }
        }
    }
}

fn skip_grams(slice: &mut CellSlice) -> Result<()> {
    let len = slice.load_uint(4)? as usize;
    slice.skip_bits(len * 8)
}

fn skip_currency_collection(slice: &mut CellSlice) -> Result<()> {
    skip_grams(slice)?;
    if slice.load_bit()? {
        slice.load_ref()?; // devises supplémentaires, ignorées
    }
    Ok(())
}

/// Descripteur de shard, réduit aux champs nécessaires pour référencer le bloc.
#[derive(Debug, Clone)]
pub struct ShardDescr {
    pub seqno: u32,
    pub root_hash: [u8; 32],
    pub file_hash: [u8; 32],
}

impl ShardDescr {
    // shard_descr#b (champs inline) ou #a/#c (frais dans une référence) —
    // seuls les champs de tête nous intéressent, la fin n'est pas consommée.
    fn load(slice: &mut CellSlice) -> Result<Self> {
        let tag = slice.load_uint(4)?;
        if !(0xa..=0xc).contains(&tag) {
            bail!("tag ShardDescr invalide: {:#x}", tag);
        }
        let seqno = slice.load_u32()?;
        slice.skip_bits(32)?; // reg_mc_seqno
        slice.skip_bits(64 + 64)?; // start_lt, end_lt
        let root_hash = slice.load_hash()?;
        let file_hash = slice.load_hash()?;
        Ok(Self { seqno, root_hash, file_hash })
    }
}

/// Déplie la configuration des shards (`getAllShardsInfo.data`) en
/// références de blocs. Accepte indifféremment la racine HashmapE
/// (bit + référence) ou directement le nœud racine du dictionnaire.
pub fn parse_shard_config(root: &Cell) -> Result<Vec<BlockId>> {
    let dict_root = if root.bit_len() == 1 {
        let mut s = root.as_slice();
        if !s.load_bit()? {
            return Ok(Vec::new());
        }
        s.load_ref()?
    } else {
        root.clone()
    };

    let mut out = Vec::new();
    for (key, mut value) in dict::entries(&dict_root, 32)? {
        let workchain = key.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32) as i32;
        let tree = value.load_ref()?;
        walk_bin_tree(&tree, workchain, &mut Vec::new(), &mut out)?;
    }
    Ok(out)
}

// bt_leaf$0 / bt_fork$1 left:^ right:^
fn walk_bin_tree(
    node: &Cell,
    workchain: i32,
    path: &mut Vec<bool>,
    out: &mut Vec<BlockId>,
) -> Result<()> {
    let mut s = node.as_slice();
    if !s.load_bit()? {
        let descr = ShardDescr::load(&mut s)?;
        out.push(BlockId {
            workchain,
            shard: shard_from_path(path),
            seqno: descr.seqno,
            root_hash: descr.root_hash,
            file_hash: descr.file_hash,
        });
    } else {
        let left = s.load_ref()?;
        let right = s.load_ref()?;
        path.push(false);
        walk_bin_tree(&left, workchain, path, out)?;
        path.pop();
        path.push(true);
        walk_bin_tree(&right, workchain, path, out)?;
        path.pop();
    }
    Ok(())
}

// Encodage standard du préfixe de shard : bits du chemin puis un bit à 1.
fn shard_from_path(path: &[bool]) -> u64 {
    let len = path.len();
    let prefix = path.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64);
    if len == 0 {
        1 << 63
    } else {
        (prefix << (64 - len)) | (1 << (63 - len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ton::cell::CellBuilder;

    fn addr_std(wc: i8, id: [u8; 32]) -> impl FnOnce(&mut CellBuilder) -> Result<()> {
        move |b: &mut CellBuilder| {
            b.store_uint(0b10, 2)?;
            b.store_bit(false)?; // pas d'anycast
            b.store_i8(wc)?;
            b.store_bytes(&id)?;
            Ok(())
        }
    }

    fn store_grams(b: &mut CellBuilder, value: u64) -> Result<()> {
        if value == 0 {
            b.store_uint(0, 4)?;
        } else {
            let bytes = value.to_be_bytes();
            let first = bytes.iter().position(|&x| x != 0).unwrap();
            b.store_uint((8 - first) as u64, 4)?;
            b.store_bytes(&bytes[first..])?;
        }
        Ok(())
    }

    /// Construit un message externe entrant portant un StateInit avec code.
    pub(crate) fn build_ext_in_with_code(code: Cell) -> Cell {
        let mut b = CellBuilder::new();
        b.store_uint(0b10, 2).unwrap(); // ext_in_msg_info$10
        b.store_uint(0b00, 2).unwrap(); // src addr_none
        addr_std(0, [0x11; 32])(&mut b).unwrap();
        store_grams(&mut b, 0).unwrap(); // import_fee
        b.store_bit(true).unwrap(); // init présent
        b.store_bit(false).unwrap(); // StateInit inline
        b.store_bit(false).unwrap(); // split_depth absent
        b.store_bit(false).unwrap(); // special absent
        b.store_bit(true).unwrap(); // code présent
        b.store_ref(code).unwrap();
        b.store_bit(false).unwrap(); // data absent
        b.store_bit(false).unwrap(); // bibliothèques absentes
        b.store_bit(false).unwrap(); // body inline vide
        b.build()
    }

    /// Construit une cellule de transaction complète pour les tests.
    pub(crate) fn build_transaction_cell(
        account: [u8; 32],
        lt: u64,
        now: u32,
        orig: AccountStatus,
        end: AccountStatus,
        in_msg: Option<Cell>,
        old_hash: [u8; 32],
        new_hash: [u8; 32],
    ) -> Cell {
        let status_bits = |s: AccountStatus| -> u64 {
            match s {
                AccountStatus::Uninit => 0b00,
                AccountStatus::Frozen => 0b01,
                AccountStatus::Active => 0b10,
                AccountStatus::Nonexist => 0b11,
            }
        };

        let mut msgs = CellBuilder::new();
        match in_msg {
            Some(m) => {
                msgs.store_bit(true).unwrap();
                msgs.store_ref(m).unwrap();
            }
            None => {
                msgs.store_bit(false).unwrap();
            }
        }
        msgs.store_bit(false).unwrap(); // out_msgs vide
        let msgs = msgs.build();

        let mut update = CellBuilder::new();
        update.store_u8(0x72).unwrap();
        update.store_bytes(&old_hash).unwrap();
        update.store_bytes(&new_hash).unwrap();
        let update = update.build();

        let mut b = CellBuilder::new();
        b.store_uint(0b0111, 4).unwrap();
        b.store_bytes(&account).unwrap();
        b.store_u64(lt).unwrap();
        b.store_bytes(&[0u8; 32]).unwrap(); // prev_trans_hash
        b.store_u64(0).unwrap(); // prev_trans_lt
        b.store_u32(now).unwrap();
        b.store_uint(0, 15).unwrap(); // outmsg_cnt
        b.store_uint(status_bits(orig), 2).unwrap();
        b.store_uint(status_bits(end), 2).unwrap();
        b.store_ref(msgs).unwrap();
        store_grams(&mut b, 1_000_000).unwrap(); // total_fees
        b.store_bit(false).unwrap(); // pas de devises supplémentaires
        b.store_ref(update).unwrap();
        b.store_ref(Cell::empty()).unwrap(); // description
        b.build()
    }

    #[test]
    fn transaction_round_trip() {
        let mut code = CellBuilder::new();
        code.store_bytes(b"minter code").unwrap();
        let code = code.build();

        let msg = build_ext_in_with_code(code.clone());
        let cell = build_transaction_cell(
            [0xaa; 32],
            777,
            1_700_000_000,
            AccountStatus::Uninit,
            AccountStatus::Active,
            Some(msg),
            [1; 32],
            [2; 32],
        );

        let tx = Transaction::load(&cell).unwrap();
        assert_eq!(tx.account, [0xaa; 32]);
        assert_eq!(tx.lt, 777);
        assert_eq!(tx.now, 1_700_000_000);
        assert_eq!(tx.orig_status, AccountStatus::Uninit);
        assert_eq!(tx.end_status, AccountStatus::Active);
        assert_eq!(tx.hash, cell.repr_hash());

        let init = tx.in_msg.unwrap().state_init.unwrap();
        assert_eq!(init.code.unwrap().repr_hash(), code.repr_hash());
        assert_ne!(tx.state_update.old_hash, tx.state_update.new_hash);
    }

    #[test]
    fn internal_message_with_init_in_ref() {
        let mut code = CellBuilder::new();
        code.store_u8(0xc0).unwrap();
        let code = code.build();

        let mut init = CellBuilder::new();
        init.store_bit(false).unwrap();
        init.store_bit(false).unwrap();
        init.store_bit(true).unwrap();
        init.store_ref(code.clone()).unwrap();
        init.store_bit(false).unwrap();
        init.store_bit(false).unwrap();
        let init = init.build();

        let mut b = CellBuilder::new();
        b.store_bit(false).unwrap(); // int_msg_info$0
        b.store_uint(0b101, 3).unwrap(); // ihr_disabled, bounce, bounced
        addr_std(0, [0x22; 32])(&mut b).unwrap();
        addr_std(0, [0x33; 32])(&mut b).unwrap();
        store_grams(&mut b, 500).unwrap();
        b.store_bit(false).unwrap(); // pas d'extra
        store_grams(&mut b, 0).unwrap();
        store_grams(&mut b, 0).unwrap();
        b.store_u64(123).unwrap();
        b.store_u32(456).unwrap();
        b.store_bit(true).unwrap(); // init présent
        b.store_bit(true).unwrap(); // dans une référence
        b.store_ref(init).unwrap();
        b.store_bit(false).unwrap(); // body inline
        let msg = Message::load(&b.build()).unwrap();

        assert_eq!(msg.kind, MessageKind::Internal);
        let si = msg.state_init.unwrap();
        assert_eq!(si.code.unwrap().repr_hash(), code.repr_hash());
    }

    #[test]
    fn account_state_active_exposes_code() {
        let mut code = CellBuilder::new();
        code.store_bytes(b"wallet").unwrap();
        let code = code.build();

        let mut b = CellBuilder::new();
        b.store_bit(true).unwrap(); // account$1
        addr_std(0, [0x44; 32])(&mut b).unwrap();
        for _ in 0..3 {
            b.store_uint(0, 3).unwrap(); // StorageUsed, valeurs nulles
        }
        b.store_u32(0).unwrap(); // last_paid
        b.store_bit(false).unwrap(); // due_payment absent
        b.store_u64(42).unwrap(); // last_trans_lt
        store_grams(&mut b, 1).unwrap();
        b.store_bit(false).unwrap();
        b.store_bit(true).unwrap(); // account_active$1
        b.store_bit(false).unwrap(); // split_depth
        b.store_bit(false).unwrap(); // special
        b.store_bit(true).unwrap();
        b.store_ref(code.clone()).unwrap();
        b.store_bit(false).unwrap();
        b.store_bit(false).unwrap();

        match AccountState::load(&b.build()).unwrap() {
            AccountState::Active(init) => {
                assert_eq!(init.code.unwrap().repr_hash(), code.repr_hash())
            }
            other => panic!("état inattendu: {:?}", other),
        }
    }

    #[test]
    fn shard_config_walk() {
        fn descr_cell(seqno: u32) -> Cell {
            let mut b = CellBuilder::new();
            b.store_bit(false).unwrap(); // bt_leaf$0
            b.store_uint(0xb, 4).unwrap();
            b.store_u32(seqno).unwrap();
            b.store_u32(0).unwrap();
            b.store_u64(0).unwrap();
            b.store_u64(0).unwrap();
            b.store_bytes(&[seqno as u8; 32]).unwrap();
            b.store_bytes(&[0x55; 32]).unwrap();
            b.build()
        }

        // Un fork : deux moitiés du workchain 0.
        let mut fork = CellBuilder::new();
        fork.store_bit(true).unwrap();
        fork.store_ref(descr_cell(10)).unwrap();
        fork.store_ref(descr_cell(11)).unwrap();
        let fork = fork.build();

        let mut value = CellBuilder::new();
        value.store_ref(fork).unwrap();
        let value = value.build();

        let dict_root = dict::build(&[(dict::uint_to_bits(0, 32), value)], 32)
            .unwrap()
            .unwrap();

        let mut root = CellBuilder::new();
        root.store_bit(true).unwrap();
        root.store_ref(dict_root).unwrap();
        let root = root.build();

        let mut shards = parse_shard_config(&root).unwrap();
        shards.sort_by_key(|b| b.seqno);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].workchain, 0);
        assert_eq!(shards[0].seqno, 10);
        assert_eq!(shards[0].shard, 0x4000_0000_0000_0000);
        assert_eq!(shards[1].shard, 0xc000_0000_0000_0000);
    }

    #[test]
    fn empty_shard_config() {
        let mut root = CellBuilder::new();
        root.store_bit(false).unwrap();
        let shards = parse_shard_config(&root.build()).unwrap();
        assert!(shards.is_empty());
    }
}
