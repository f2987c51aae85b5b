// DANS : src/ton/cell.rs

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

/// Taille maximale du contenu d'une cellule ordinaire (en bits).
pub const MAX_CELL_BITS: usize = 1023;
/// Nombre maximal de références sortantes d'une cellule.
pub const MAX_CELL_REFS: usize = 4;

struct CellData {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
    hash: [u8; 32],
    depth: u16,
}

/// Cellule TON ordinaire : un vecteur de bits plus jusqu'à 4 références.
/// Le hash de représentation (sha256 de la forme standard) sert d'identité
/// partout : empreinte de code, égalité, clés de dédoublonnage.
#[derive(Clone)]
pub struct Cell {
    inner: Arc<CellData>,
}

impl Cell {
    fn new(data: Vec<u8>, bit_len: usize, refs: Vec<Cell>) -> Self {
        let hash = repr_hash(&data, bit_len, &refs);
        let depth = refs
            .iter()
            .map(|r| r.depth() + 1)
            .max()
            .unwrap_or(0);
        Self {
            inner: Arc::new(CellData { data, bit_len, refs, hash, depth }),
        }
    }

    /// Cellule vide (0 bit, 0 référence).
    pub fn empty() -> Self {
        Cell::new(Vec::new(), 0, Vec::new())
    }

    pub fn bit_len(&self) -> usize {
        self.inner.bit_len
    }

    /// Octets bruts, bits inutilisés du dernier octet à zéro.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn references(&self) -> &[Cell] {
        &self.inner.refs
    }

    pub fn reference_count(&self) -> usize {
        self.inner.refs.len()
    }

    pub fn depth(&self) -> u16 {
        self.inner.depth
    }

    /// Hash de représentation standard.
    pub fn repr_hash(&self) -> [u8; 32] {
        self.inner.hash
    }

    /// Empreinte hexadécimale minuscule, la forme utilisée comme identifiant
    /// de type de contrat dans tout l'indexeur.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.inner.hash)
    }

    pub fn as_slice(&self) -> CellSlice {
        CellSlice {
            bit_pos: 0,
            bit_end: self.inner.bit_len,
            ref_pos: 0,
            ref_end: self.inner.refs.len(),
            cell: self.clone(),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.inner.hash == other.inner.hash
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.inner.hash);
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cell{{{}b, {} refs, {}}}",
            self.inner.bit_len,
            self.inner.refs.len(),
            &self.hash_hex()[..8]
        )
    }
}

// Forme standard : descripteurs d1/d2, données complétées, profondeurs
// puis hashes des références.
fn repr_hash(data: &[u8], bit_len: usize, refs: &[Cell]) -> [u8; 32] {
    let mut repr = Vec::with_capacity(2 + data.len() + refs.len() * 34);
    repr.push(refs.len() as u8);
    repr.push((bit_len / 8 + (bit_len + 7) / 8) as u8);

    let mut padded = data.to_vec();
    if bit_len % 8 != 0 {
        // Bit de complétion juste après le dernier bit utile.
        let idx = bit_len / 8;
        padded[idx] |= 0x80 >> (bit_len % 8);
    }
    repr.extend_from_slice(&padded);

    for r in refs {
        repr.extend_from_slice(&r.depth().to_be_bytes());
    }
    for r in refs {
        repr.extend_from_slice(&r.repr_hash());
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(&repr));
    out
}

/// Constructeur de cellule, écriture bit à bit.
#[derive(Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        if self.bit_len >= MAX_CELL_BITS {
            bail!("dépassement de cellule : {} bits", self.bit_len + 1);
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Écrit `bits` bits de poids fort de `value` (big-endian), bits <= 64.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 {
            bail!("store_uint: {} bits demandés", bits);
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_u8(&mut self, v: u8) -> Result<&mut Self> {
        self.store_uint(v as u64, 8)
    }

    pub fn store_u16(&mut self, v: u16) -> Result<&mut Self> {
        self.store_uint(v as u64, 16)
    }

    pub fn store_u32(&mut self, v: u32) -> Result<&mut Self> {
        self.store_uint(v as u64, 32)
    }

    pub fn store_u64(&mut self, v: u64) -> Result<&mut Self> {
        self.store_uint(v, 64)
    }

    pub fn store_i8(&mut self, v: i8) -> Result<&mut Self> {
        self.store_uint(v as u8 as u64, 8)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        for &b in bytes {
            self.store_uint(b as u64, 8)?;
        }
        Ok(self)
    }

    /// Écrit les `bits` premiers bits (MSB d'abord) du tampon `bytes`.
    pub fn store_bits(&mut self, bytes: &[u8], bits: usize) -> Result<&mut Self> {
        for i in 0..bits {
            let byte = bytes[i / 8];
            self.store_bit(byte & (0x80 >> (i % 8)) != 0)?;
        }
        Ok(self)
    }

    pub fn store_ref(&mut self, cell: Cell) -> Result<&mut Self> {
        if self.refs.len() >= MAX_CELL_REFS {
            bail!("dépassement de références de cellule");
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Recopie le reste d'une slice (bits puis références) dans le builder.
    pub fn store_slice(&mut self, slice: &mut CellSlice) -> Result<&mut Self> {
        while slice.remaining_bits() > 0 {
            let bit = slice.load_bit()?;
            self.store_bit(bit)?;
        }
        while slice.remaining_refs() > 0 {
            let r = slice.load_ref()?;
            self.store_ref(r)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Cell {
        Cell::new(self.data, self.bit_len, self.refs)
    }
}

/// Curseur de lecture sur une cellule. Possède la cellule (un clone d'Arc),
/// ce qui évite toute question de durée de vie dans les parseurs TLB.
#[derive(Debug, Clone)]
pub struct CellSlice {
    cell: Cell,
    bit_pos: usize,
    bit_end: usize,
    ref_pos: usize,
    ref_end: usize,
}

impl CellSlice {
    /// Slice bornée, pour les valeurs de pile `vm_stk_slice`.
    pub fn with_range(
        cell: Cell,
        bit_start: usize,
        bit_end: usize,
        ref_start: usize,
        ref_end: usize,
    ) -> Result<Self> {
        if bit_end > cell.bit_len() || bit_start > bit_end {
            bail!("bornes de slice invalides: {}..{}", bit_start, bit_end);
        }
        if ref_end > cell.reference_count() || ref_start > ref_end {
            bail!("bornes de références invalides: {}..{}", ref_start, ref_end);
        }
        Ok(Self { cell, bit_pos: bit_start, bit_end, ref_pos: ref_start, ref_end })
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_end - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.ref_end - self.ref_pos
    }

    pub fn load_bit(&mut self) -> Result<bool> {
        if self.bit_pos >= self.bit_end {
            bail!("lecture au-delà de la cellule ({} bits)", self.bit_end);
        }
        let byte = self.cell.data()[self.bit_pos / 8];
        let bit = byte & (0x80 >> (self.bit_pos % 8)) != 0;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        if bits > 64 {
            bail!("load_uint: {} bits demandés", bits);
        }
        let mut v = 0u64;
        for _ in 0..bits {
            v = (v << 1) | self.load_bit()? as u64;
        }
        Ok(v)
    }

    /// Entier signé big-endian sur `bits` bits (extension de signe).
    pub fn load_int(&mut self, bits: usize) -> Result<i64> {
        let raw = self.load_uint(bits)?;
        if bits == 0 || bits == 64 {
            return Ok(raw as i64);
        }
        let sign = 1u64 << (bits - 1);
        if raw & sign != 0 {
            Ok((raw | !(sign | (sign - 1))) as i64)
        } else {
            Ok(raw as i64)
        }
    }

    pub fn load_u8(&mut self) -> Result<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u32(&mut self) -> Result<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64> {
        self.load_uint(64)
    }

    /// Lit `bits` bits dans un tampon (MSB d'abord, dernier octet complété à zéro).
    pub fn load_bits(&mut self, bits: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; (bits + 7) / 8];
        for i in 0..bits {
            if self.load_bit()? {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Ok(out)
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.load_bits(len * 8)
    }

    pub fn load_hash(&mut self) -> Result<[u8; 32]> {
        let raw = self.load_bytes(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(out)
    }

    pub fn skip_bits(&mut self, bits: usize) -> Result<()> {
        if self.bit_pos + bits > self.bit_end {
            bail!("skip_bits au-delà de la cellule");
        }
        self.bit_pos += bits;
        Ok(())
    }

    pub fn load_ref(&mut self) -> Result<Cell> {
        if self.ref_pos >= self.ref_end {
            bail!("plus de référence à lire");
        }
        let cell = self.cell.references()[self.ref_pos].clone();
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Concatène les octets restants puis suit la chaîne de références simples
    /// (format « snake » de TEP-64). Best-effort : s'arrête au premier contenu
    /// non aligné sur l'octet.
    pub fn load_snake_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut slice = self.clone();
        loop {
            let full = slice.remaining_bits() / 8 * 8;
            out.extend_from_slice(&slice.load_bits(full)?);
            if slice.remaining_refs() == 0 {
                break;
            }
            let next = slice.load_ref()?;
            slice = next.as_slice();
        }
        self.bit_pos = self.bit_end;
        self.ref_pos = self.ref_end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_read_back() {
        let mut b = CellBuilder::new();
        b.store_uint(0b1011, 4).unwrap();
        b.store_u32(0xdead_beef).unwrap();
        b.store_bit(true).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 37);

        let mut s = cell.as_slice();
        assert_eq!(s.load_uint(4).unwrap(), 0b1011);
        assert_eq!(s.load_u32().unwrap(), 0xdead_beef);
        assert!(s.load_bit().unwrap());
        assert_eq!(s.remaining_bits(), 0);
        assert!(s.load_bit().is_err());
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let mut a = CellBuilder::new();
        a.store_u64(42).unwrap();
        let a = a.build();

        let mut b = CellBuilder::new();
        b.store_u64(42).unwrap();
        let b = b.build();

        let mut c = CellBuilder::new();
        c.store_u64(43).unwrap();
        let c = c.build();

        assert_eq!(a.repr_hash(), b.repr_hash());
        assert_ne!(a.repr_hash(), c.repr_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn hash_covers_references() {
        let mut inner = CellBuilder::new();
        inner.store_u8(7).unwrap();
        let inner = inner.build();

        let mut a = CellBuilder::new();
        a.store_u8(1).unwrap();
        a.store_ref(inner.clone()).unwrap();
        let a = a.build();

        let mut b = CellBuilder::new();
        b.store_u8(1).unwrap();
        let b = b.build();

        assert_ne!(a.repr_hash(), b.repr_hash());
        assert_eq!(a.depth(), 1);
        assert_eq!(b.depth(), 0);
    }

    #[test]
    fn signed_reads() {
        let mut b = CellBuilder::new();
        b.store_i8(-5).unwrap();
        b.store_uint(0b11, 2).unwrap();
        let cell = b.build();
        let mut s = cell.as_slice();
        assert_eq!(s.load_int(8).unwrap(), -5);
        assert_eq!(s.load_int(2).unwrap(), -1);
    }

    #[test]
    fn slice_copy_preserves_refs() {
        let mut inner = CellBuilder::new();
        inner.store_u8(9).unwrap();
        let inner = inner.build();

        let mut src = CellBuilder::new();
        src.store_uint(0x5a, 8).unwrap();
        src.store_ref(inner).unwrap();
        let src = src.build();

        let mut dst = CellBuilder::new();
        dst.store_slice(&mut src.as_slice()).unwrap();
        let dst = dst.build();
        assert_eq!(src.repr_hash(), dst.repr_hash());
    }
}
