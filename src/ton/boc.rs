// DANS : src/ton/boc.rs

use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use super::cell::{Cell, CellBuilder};

const BOC_MAGIC: u32 = 0xb5ee9c72;

/// Désérialise un bag-of-cells à racine unique.
///
/// Les cellules exotiques (preuves élaguées, mises à jour Merkle) sont
/// refusées : l'indexeur ne consomme que des réponses liteserver en clair.
pub fn decode(bytes: &[u8]) -> Result<Cell> {
    let mut r = ByteReader { buf: bytes, pos: 0 };

    if r.read_be(4)? as u32 != BOC_MAGIC {
        bail!("magic BoC invalide");
    }

    let flags = r.read_u8()?;
    let has_idx = flags & 0x80 != 0;
    let has_crc = flags & 0x40 != 0;
    let ref_size = (flags & 0x07) as usize;
    if ref_size == 0 || ref_size > 4 {
        bail!("taille de référence BoC invalide: {}", ref_size);
    }
    let off_size = r.read_u8()? as usize;
    if off_size == 0 || off_size > 8 {
        bail!("taille d'offset BoC invalide: {}", off_size);
    }

    let cell_count = r.read_be(ref_size)? as usize;
    let root_count = r.read_be(ref_size)? as usize;
    let absent = r.read_be(ref_size)?;
    let _tot_cells_size = r.read_be(off_size)?;
    if absent != 0 {
        bail!("cellules absentes non supportées");
    }
    if root_count != 1 {
        bail!("BoC multi-racine non supporté ({} racines)", root_count);
    }
    if cell_count == 0 || cell_count > 1 << 20 {
        bail!("nombre de cellules invalide: {}", cell_count);
    }

    let root_index = r.read_be(ref_size)? as usize;
    if has_idx {
        r.skip(cell_count * off_size)?;
    }

    struct RawCell {
        data: Vec<u8>,
        bit_len: usize,
        refs: Vec<usize>,
    }

    let mut raw = Vec::with_capacity(cell_count);
    for i in 0..cell_count {
        let d1 = r.read_u8()?;
        let d2 = r.read_u8()? as usize;
        if d1 & 0x08 != 0 {
            bail!("cellule exotique refusée");
        }
        if d1 >> 5 != 0 {
            bail!("cellule de niveau non nul refusée");
        }
        let ref_count = (d1 & 0x07) as usize;
        if ref_count > 4 {
            bail!("cellule avec {} références", ref_count);
        }

        let byte_len = (d2 + 1) / 2;
        let mut data = r.read_slice(byte_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            byte_len * 8
        } else {
            // Octet augmenté : le bit de complétion marque la fin des données.
            let last = *data.last().context("cellule augmentée vide")?;
            if last == 0 {
                bail!("bit de complétion manquant");
            }
            let tz = last.trailing_zeros() as usize;
            data[byte_len - 1] &= !(1u8 << tz);
            (byte_len - 1) * 8 + (7 - tz)
        };

        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let idx = r.read_be(ref_size)? as usize;
            if idx <= i || idx >= cell_count {
                bail!("ordre topologique BoC invalide: {} -> {}", i, idx);
            }
            refs.push(idx);
        }
        raw.push(RawCell { data, bit_len, refs });
    }

    if has_crc {
        r.skip(4)?;
    }

    // Les enfants ont toujours un index supérieur : on assemble en remontant.
    let mut built: Vec<Option<Cell>> = vec![None; cell_count];
    for i in (0..cell_count).rev() {
        let rc = &raw[i];
        let mut b = CellBuilder::new();
        b.store_bits(&rc.data, rc.bit_len)?;
        for &idx in &rc.refs {
            let child = built[idx].clone().context("référence BoC non résolue")?;
            b.store_ref(child)?;
        }
        built[i] = Some(b.build());
    }

    built[root_index].clone().context("racine BoC absente")
}

/// Sérialise une cellule en bag-of-cells standard (sans index ni CRC).
pub fn encode(root: &Cell) -> Vec<u8> {
    // Ordre topologique : un enfant doit suivre tous ses parents. On classe
    // par profondeur maximale depuis la racine, ce qui garantit l'invariant.
    let mut depths: HashMap<[u8; 32], (Cell, usize, usize)> = HashMap::new();
    let mut visit_rank = 0usize;

    fn visit(
        cell: &Cell,
        depth: usize,
        depths: &mut HashMap<[u8; 32], (Cell, usize, usize)>,
        rank: &mut usize,
    ) {
        let key = cell.repr_hash();
        let known = match depths.get_mut(&key) {
            Some(entry) => {
                if depth <= entry.1 {
                    return;
                }
                entry.1 = depth;
                true
            }
            None => false,
        };
        if !known {
            depths.insert(key, (cell.clone(), depth, *rank));
            *rank += 1;
        }
        for child in cell.references() {
            visit(child, depth + 1, depths, rank);
        }
    }
    visit(root, 0, &mut depths, &mut visit_rank);

    let mut ordered: Vec<(Cell, usize, usize)> = depths.into_values().collect();
    ordered.sort_by_key(|(_, depth, rank)| (*depth, *rank));

    let mut index: HashMap<[u8; 32], usize> = HashMap::new();
    for (i, (cell, _, _)) in ordered.iter().enumerate() {
        index.insert(cell.repr_hash(), i);
    }

    let cell_count = ordered.len();
    let ref_size = minimal_size(cell_count as u64);

    let mut cells_payload = Vec::new();
    for (cell, _, _) in &ordered {
        let bit_len = cell.bit_len();
        let byte_len = (bit_len + 7) / 8;
        let d1 = cell.reference_count() as u8;
        let d2 = (bit_len / 8 + byte_len) as u8;
        cells_payload.push(d1);
        cells_payload.push(d2);
        let mut data = cell.data().to_vec();
        if bit_len % 8 != 0 {
            data[byte_len - 1] |= 0x80 >> (bit_len % 8);
        }
        cells_payload.extend_from_slice(&data);
        for child in cell.references() {
            write_be(&mut cells_payload, index[&child.repr_hash()] as u64, ref_size);
        }
    }

    let off_size = minimal_size(cells_payload.len() as u64);

    let mut out = Vec::with_capacity(cells_payload.len() + 32);
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    out.push(ref_size as u8);
    out.push(off_size as u8);
    write_be(&mut out, cell_count as u64, ref_size);
    write_be(&mut out, 1, ref_size); // racines
    write_be(&mut out, 0, ref_size); // absentes
    write_be(&mut out, cells_payload.len() as u64, off_size);
    write_be(&mut out, 0, ref_size); // index de la racine
    out.extend_from_slice(&cells_payload);
    out
}

fn minimal_size(value: u64) -> usize {
    let mut n = 1;
    while value >> (n * 8) != 0 {
        n += 1;
    }
    n
}

fn write_be(buf: &mut Vec<u8>, value: u64, size: usize) {
    for i in (0..size).rev() {
        buf.push((value >> (i * 8)) as u8);
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let s = self.read_slice(1)?;
        Ok(s[0])
    }

    fn read_be(&mut self, size: usize) -> Result<u64> {
        let s = self.read_slice(size)?;
        let mut v = 0u64;
        for &b in s {
            v = (v << 8) | b as u64;
        }
        Ok(v)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            bail!("BoC tronqué ({} octets attendus)", len);
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.read_slice(len).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple() {
        let mut b = CellBuilder::new();
        b.store_u32(0x0102_0304).unwrap();
        b.store_uint(0b101, 3).unwrap();
        let cell = b.build();

        let bytes = encode(&cell);
        let back = decode(&bytes).unwrap();
        assert_eq!(cell.repr_hash(), back.repr_hash());
        assert_eq!(back.bit_len(), 35);
    }

    #[test]
    fn round_trip_tree_with_shared_child() {
        let mut shared = CellBuilder::new();
        shared.store_bytes(b"jetton").unwrap();
        let shared = shared.build();

        let mut left = CellBuilder::new();
        left.store_u8(1).unwrap();
        left.store_ref(shared.clone()).unwrap();
        let left = left.build();

        let mut root = CellBuilder::new();
        root.store_u8(0xff).unwrap();
        root.store_ref(left).unwrap();
        root.store_ref(shared).unwrap();
        let root = root.build();

        let bytes = encode(&root);
        let back = decode(&bytes).unwrap();
        assert_eq!(root.repr_hash(), back.repr_hash());
        // La cellule partagée ne doit être sérialisée qu'une fois.
        assert_eq!(back.references()[0].references()[0], back.references()[1]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode(&[0x00, 0x01, 0x02]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn empty_cell_round_trip() {
        let cell = Cell::empty();
        let back = decode(&encode(&cell)).unwrap();
        assert_eq!(cell, back);
    }
}
