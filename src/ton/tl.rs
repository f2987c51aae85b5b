// DANS : src/ton/tl.rs
//
// Schéma TL du protocole liteserver et (dé)sérialisation des requêtes que
// l'indexeur émet. Les identifiants de constructeurs sont les CRC32 des
// déclarations TL (lite_api.tl), écrits en little-endian sur le fil.

use anyhow::{bail, Context, Result};

use super::{BlockId, TxCursor, TxShortInfo};

// --- Enveloppes ---

/// adnl.message.query query_id:int256 query:bytes = adnl.Message
pub const ADNL_MESSAGE_QUERY: u32 = 0xb48bf97a;
/// adnl.message.answer query_id:int256 answer:bytes = adnl.Message
pub const ADNL_MESSAGE_ANSWER: u32 = 0x0fac8416;
/// tcp.ping random_id:long = tcp.Pong
pub const TCP_PING: u32 = 0x9a2b084d;
/// tcp.pong random_id:long = tcp.Pong
pub const TCP_PONG: u32 = 0xdc69fb03;
/// pub.ed25519 key:int256 = PublicKey
pub const PUB_ED25519: u32 = 0x4813b4c6;
/// liteServer.query data:bytes = Object
pub const LITE_QUERY: u32 = 0xdf068c79;

// --- Requêtes ---

/// liteServer.getMasterchainInfo = liteServer.MasterchainInfo
pub const GET_MASTERCHAIN_INFO: u32 = 0x89b5e62e;
/// liteServer.lookupBlock mode:# id:tonNode.blockId lt:mode.1?long utime:mode.2?int = liteServer.BlockHeader
pub const LOOKUP_BLOCK: u32 = 0xfac8f71e;
/// liteServer.getAllShardsInfo id:tonNode.blockIdExt = liteServer.AllShardsInfo
pub const GET_ALL_SHARDS_INFO: u32 = 0x74d3fd6b;
/// liteServer.listBlockTransactions id:tonNode.blockIdExt mode:# count:# after:mode.7?liteServer.transactionId3 = liteServer.BlockTransactions
pub const LIST_BLOCK_TRANSACTIONS: u32 = 0xadfcc7da;
/// liteServer.getOneTransaction id:tonNode.blockIdExt account:liteServer.accountId lt:long = liteServer.TransactionInfo
pub const GET_ONE_TRANSACTION: u32 = 0xd40f24ea;
/// liteServer.runSmcMethod mode:# id:tonNode.blockIdExt account:liteServer.accountId method_id:long params:bytes = liteServer.RunMethodResult
pub const RUN_SMC_METHOD: u32 = 0x5cc65dd2;
/// liteServer.getAccountState id:tonNode.blockIdExt account:liteServer.accountId = liteServer.AccountState
pub const GET_ACCOUNT_STATE: u32 = 0x6b890e25;

// --- Réponses ---

/// liteServer.masterchainInfo last:tonNode.blockIdExt state_root_hash:int256 init:tonNode.zeroStateIdExt
pub const MASTERCHAIN_INFO: u32 = 0x85832881;
/// liteServer.blockHeader id:tonNode.blockIdExt mode:# header_proof:bytes
pub const BLOCK_HEADER: u32 = 0x752d8219;
/// liteServer.allShardsInfo id:tonNode.blockIdExt proof:bytes data:bytes
pub const ALL_SHARDS_INFO: u32 = 0x098fe72d;
/// liteServer.blockTransactions id:tonNode.blockIdExt req_count:# incomplete:Bool ids:(vector liteServer.transactionId) proof:bytes
pub const BLOCK_TRANSACTIONS: u32 = 0xbd8cad2b;
/// liteServer.transactionId mode:# account:mode.0?int256 lt:mode.1?long hash:mode.2?int256
pub const TRANSACTION_ID: u32 = 0xb12f65af;
/// liteServer.transactionInfo id:tonNode.blockIdExt proof:bytes transaction:bytes
pub const TRANSACTION_INFO: u32 = 0x0edeed47;
/// liteServer.runMethodResult mode:# id:tonNode.blockIdExt shardblk:tonNode.blockIdExt ... exit_code:int result:mode.2?bytes
pub const RUN_METHOD_RESULT: u32 = 0xa39a616b;
/// liteServer.accountState id:tonNode.blockIdExt shardblk:tonNode.blockIdExt shard_proof:bytes proof:bytes state:bytes
pub const ACCOUNT_STATE: u32 = 0x7079c751;
/// liteServer.error code:int message:string
pub const LITE_ERROR: u32 = 0xbba9e148;

/// boolTrue = Bool
pub const BOOL_TRUE: u32 = 0x997275b5;
/// boolFalse = Bool
pub const BOOL_FALSE: u32 = 0xbc799737;

/// Erreur structurée renvoyée par un liteserver.
#[derive(Debug, Clone)]
pub struct LiteError {
    pub code: i32,
    pub message: String,
}

// --- Écriture ---

#[derive(Default)]
pub struct TlWriter {
    buf: Vec<u8>,
}

impl TlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.write_u32(v as u32)
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_int256(&mut self, v: &[u8; 32]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Champ `bytes` TL : longueur, données, complément à 4 octets.
    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        if data.len() < 254 {
            self.buf.push(data.len() as u8);
        } else {
            self.buf.push(0xfe);
            self.buf.extend_from_slice(&(data.len() as u32).to_le_bytes()[..3]);
        }
        self.buf.extend_from_slice(data);
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self
    }

    pub fn write_block_id(&mut self, id: &BlockId) -> &mut Self {
        self.write_i32(id.workchain)
            .write_u64(id.shard)
            .write_u32(id.seqno)
            .write_int256(&id.root_hash)
            .write_int256(&id.file_hash)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// --- Lecture ---

pub struct TlReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            bail!("réponse TL tronquée");
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes(s.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let s = self.take(8)?;
        Ok(u64::from_le_bytes(s.try_into().unwrap()))
    }

    pub fn read_int256(&mut self) -> Result<[u8; 32]> {
        let s = self.take(32)?;
        Ok(s.try_into().unwrap())
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let first = self.take(1)?[0];
        let (len, header) = if first < 254 {
            (first as usize, 1usize)
        } else {
            let raw = self.take(3)?;
            (
                raw[0] as usize | (raw[1] as usize) << 8 | (raw[2] as usize) << 16,
                4usize,
            )
        };
        let data = self.take(len)?.to_vec();
        let mut consumed = header + len;
        while consumed % 4 != 0 {
            self.take(1)?;
            consumed += 1;
        }
        Ok(data)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u32()? {
            BOOL_TRUE => Ok(true),
            BOOL_FALSE => Ok(false),
            other => bail!("booléen TL invalide: {:#x}", other),
        }
    }

    pub fn read_block_id(&mut self) -> Result<BlockId> {
        Ok(BlockId {
            workchain: self.read_i32()?,
            shard: self.read_u64()?,
            seqno: self.read_u32()?,
            root_hash: self.read_int256()?,
            file_hash: self.read_int256()?,
        })
    }
}

// Les réponses d'erreur du liteserver partagent toutes le même constructeur.
fn expect(reader: &mut TlReader<'_>, id: u32) -> Result<()> {
    let got = reader.read_u32()?;
    if got == LITE_ERROR {
        let code = reader.read_i32()?;
        let message = String::from_utf8_lossy(&reader.read_bytes()?).into_owned();
        bail!(LiteErrorWrap(LiteError { code, message }));
    }
    if got != id {
        bail!("constructeur TL inattendu: {:#x} (attendu {:#x})", got, id);
    }
    Ok(())
}

#[derive(Debug)]
pub struct LiteErrorWrap(pub LiteError);

impl std::fmt::Display for LiteErrorWrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "liteserver code {}: {}", self.0.code, self.0.message)
    }
}

impl std::error::Error for LiteErrorWrap {}

// --- Constructeurs de requêtes ---

pub fn build_get_masterchain_info() -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(GET_MASTERCHAIN_INFO);
    w.finish()
}

pub fn build_lookup_block(workchain: i32, shard: u64, seqno: u32) -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(LOOKUP_BLOCK)
        .write_u32(1) // mode : recherche par seqno
        .write_i32(workchain)
        .write_u64(shard)
        .write_u32(seqno);
    w.finish()
}

pub fn build_get_all_shards_info(id: &BlockId) -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(GET_ALL_SHARDS_INFO).write_block_id(id);
    w.finish()
}

pub fn build_list_block_transactions(
    id: &BlockId,
    count: u32,
    after: Option<&TxCursor>,
) -> Vec<u8> {
    let mut mode = 0b0111u32; // account + lt + hash
    if after.is_some() {
        mode |= 1 << 7;
    }
    let mut w = TlWriter::new();
    w.write_u32(LIST_BLOCK_TRANSACTIONS)
        .write_block_id(id)
        .write_u32(mode)
        .write_u32(count);
    if let Some(cursor) = after {
        w.write_int256(&cursor.account).write_u64(cursor.lt);
    }
    w.finish()
}

pub fn build_get_one_transaction(id: &BlockId, account: &[u8; 32], lt: u64) -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(GET_ONE_TRANSACTION)
        .write_block_id(id)
        .write_i32(id.workchain)
        .write_int256(account)
        .write_u64(lt);
    w.finish()
}

/// Identifiant de méthode TVM : crc16/XMODEM du nom, bit 16 levé.
pub fn method_id(name: &str) -> u64 {
    (crc16_xmodem(name.as_bytes()) as u64) | 0x10000
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub fn build_run_smc_method(
    id: &BlockId,
    workchain: i32,
    account: &[u8; 32],
    method: &str,
    params_boc: &[u8],
) -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(RUN_SMC_METHOD)
        .write_u32(4) // mode.2 : résultat demandé
        .write_block_id(id)
        .write_i32(workchain)
        .write_int256(account)
        .write_u64(method_id(method))
        .write_bytes(params_boc);
    w.finish()
}

pub fn build_get_account_state(id: &BlockId, workchain: i32, account: &[u8; 32]) -> Vec<u8> {
    let mut w = TlWriter::new();
    w.write_u32(GET_ACCOUNT_STATE)
        .write_block_id(id)
        .write_i32(workchain)
        .write_int256(account);
    w.finish()
}

// --- Parseurs de réponses ---

pub fn parse_masterchain_info(buf: &[u8]) -> Result<BlockId> {
    let mut r = TlReader::new(buf);
    expect(&mut r, MASTERCHAIN_INFO)?;
    r.read_block_id().context("masterchainInfo illisible")
}

pub fn parse_block_header(buf: &[u8]) -> Result<BlockId> {
    let mut r = TlReader::new(buf);
    expect(&mut r, BLOCK_HEADER)?;
    let id = r.read_block_id()?;
    Ok(id)
}

pub fn parse_all_shards_info(buf: &[u8]) -> Result<Vec<u8>> {
    let mut r = TlReader::new(buf);
    expect(&mut r, ALL_SHARDS_INFO)?;
    r.read_block_id()?;
    r.read_bytes()?; // preuve, non vérifiée (politique fast)
    r.read_bytes().context("données de shards illisibles")
}

pub fn parse_block_transactions(buf: &[u8]) -> Result<(Vec<TxShortInfo>, bool)> {
    let mut r = TlReader::new(buf);
    expect(&mut r, BLOCK_TRANSACTIONS)?;
    r.read_block_id()?;
    r.read_u32()?; // req_count
    let incomplete = r.read_bool()?;
    let count = r.read_u32()? as usize;
    if count > 1 << 16 {
        bail!("vecteur d'identifiants anormalement long: {}", count);
    }
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let ctor = r.read_u32()?;
        if ctor != TRANSACTION_ID {
            bail!("constructeur transactionId inattendu: {:#x}", ctor);
        }
        let mode = r.read_u32()?;
        let account = if mode & 1 != 0 {
            r.read_int256()?
        } else {
            bail!("transactionId sans compte");
        };
        let lt = if mode & 2 != 0 { r.read_u64()? } else { 0 };
        let hash = if mode & 4 != 0 { Some(r.read_int256()?) } else { None };
        ids.push(TxShortInfo { account, lt, hash });
    }
    Ok((ids, incomplete))
}

pub fn parse_transaction_info(buf: &[u8]) -> Result<Vec<u8>> {
    let mut r = TlReader::new(buf);
    expect(&mut r, TRANSACTION_INFO)?;
    r.read_block_id()?;
    r.read_bytes()?; // preuve
    r.read_bytes().context("transaction illisible")
}

pub fn parse_run_method_result(buf: &[u8]) -> Result<(i32, Option<Vec<u8>>)> {
    let mut r = TlReader::new(buf);
    expect(&mut r, RUN_METHOD_RESULT)?;
    let mode = r.read_u32()?;
    r.read_block_id()?;
    r.read_block_id()?;
    if mode & 1 != 0 {
        r.read_bytes()?; // shard_proof
        r.read_bytes()?; // proof
    }
    if mode & 2 != 0 {
        r.read_bytes()?; // state_proof
    }
    if mode & 8 != 0 {
        r.read_bytes()?; // init_c7
    }
    if mode & 16 != 0 {
        r.read_bytes()?; // lib_extras
    }
    let exit_code = r.read_i32()?;
    let result = if mode & 4 != 0 { Some(r.read_bytes()?) } else { None };
    Ok((exit_code, result))
}

pub fn parse_account_state(buf: &[u8]) -> Result<Vec<u8>> {
    let mut r = TlReader::new(buf);
    expect(&mut r, ACCOUNT_STATE)?;
    r.read_block_id()?;
    r.read_block_id()?;
    r.read_bytes()?; // shard_proof
    r.read_bytes()?; // proof
    r.read_bytes().context("état de compte illisible")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_block() -> BlockId {
        BlockId {
            workchain: -1,
            shard: crate::ton::MASTERCHAIN_SHARD,
            seqno: 12345,
            root_hash: [0xaa; 32],
            file_hash: [0xbb; 32],
        }
    }

    #[test]
    fn schema_ids_match_lite_api() {
        // Valeurs issues de lite_api.tl (CRC32 des déclarations).
        assert_eq!(LITE_QUERY, 0xdf068c79);
        assert_eq!(GET_MASTERCHAIN_INFO, 0x89b5e62e);
        assert_eq!(MASTERCHAIN_INFO, 0x85832881);
        assert_eq!(LIST_BLOCK_TRANSACTIONS, 0xadfcc7da);
        assert_eq!(BLOCK_TRANSACTIONS, 0xbd8cad2b);
        assert_eq!(GET_ONE_TRANSACTION, 0xd40f24ea);
        assert_eq!(RUN_SMC_METHOD, 0x5cc65dd2);
        assert_eq!(RUN_METHOD_RESULT, 0xa39a616b);
        assert_eq!(GET_ACCOUNT_STATE, 0x6b890e25);
        assert_eq!(ACCOUNT_STATE, 0x7079c751);
        assert_eq!(LITE_ERROR, 0xbba9e148);
    }

    #[test]
    fn bytes_field_padding() {
        let mut w = TlWriter::new();
        w.write_bytes(&[1, 2, 3]);
        let buf = w.finish();
        assert_eq!(buf.len(), 4); // 1 octet de longueur + 3 de données

        let mut w = TlWriter::new();
        w.write_bytes(&[1, 2, 3, 4]);
        let buf = w.finish();
        assert_eq!(buf.len(), 8); // complété à 4

        let mut r = TlReader::new(&buf);
        assert_eq!(r.read_bytes().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn long_bytes_round_trip() {
        let payload = vec![0x5a; 300];
        let mut w = TlWriter::new();
        w.write_bytes(&payload);
        let buf = w.finish();
        assert_eq!(buf.len() % 4, 0);
        let mut r = TlReader::new(&buf);
        assert_eq!(r.read_bytes().unwrap(), payload);
    }

    #[test]
    fn block_id_round_trip() {
        let id = dummy_block();
        let mut w = TlWriter::new();
        w.write_block_id(&id);
        let buf = w.finish();
        let mut r = TlReader::new(&buf);
        assert_eq!(r.read_block_id().unwrap(), id);
    }

    #[test]
    fn block_transactions_round_trip() {
        let id = dummy_block();
        let mut w = TlWriter::new();
        w.write_u32(BLOCK_TRANSACTIONS)
            .write_block_id(&id)
            .write_u32(100)
            .write_u32(BOOL_TRUE)
            .write_u32(2);
        for i in 0..2u8 {
            w.write_u32(TRANSACTION_ID)
                .write_u32(0b111)
                .write_int256(&[i; 32])
                .write_u64(i as u64 * 10)
                .write_int256(&[0xee; 32]);
        }
        w.write_bytes(&[]);
        let buf = w.finish();

        let (ids, incomplete) = parse_block_transactions(&buf).unwrap();
        assert!(incomplete);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].account, [1; 32]);
        assert_eq!(ids[1].lt, 10);
        assert_eq!(ids[1].hash, Some([0xee; 32]));
    }

    #[test]
    fn lite_error_is_surfaced() {
        let mut w = TlWriter::new();
        w.write_u32(LITE_ERROR).write_i32(651);
        w.write_bytes(b"block is not applied");
        let buf = w.finish();

        let err = parse_masterchain_info(&buf).unwrap_err();
        let lite = err.downcast_ref::<LiteErrorWrap>().unwrap();
        assert_eq!(lite.0.code, 651);
    }

    #[test]
    fn method_id_shape() {
        let id = method_id("get_jetton_data");
        assert_eq!(id & 0x10000, 0x10000);
        assert!(id <= 0x1ffff);
        // Deux noms différents, deux identifiants différents.
        assert_ne!(method_id("get_jetton_data"), method_id("get_wallet_address"));
    }

    #[test]
    fn run_method_result_mode_bits() {
        let id = dummy_block();
        let mut w = TlWriter::new();
        w.write_u32(RUN_METHOD_RESULT)
            .write_u32(4)
            .write_block_id(&id)
            .write_block_id(&id)
            .write_i32(0);
        w.write_bytes(&[0xde, 0xad]);
        let buf = w.finish();

        let (exit, result) = parse_run_method_result(&buf).unwrap();
        assert_eq!(exit, 0);
        assert_eq!(result.unwrap(), vec![0xde, 0xad]);
    }
}
