// DANS : src/ton/dict.rs

use anyhow::{bail, Result};

use super::cell::{Cell, CellBuilder, CellSlice};

// Largeur du champ de longueur d'une étiquette : ceil(log2(m + 1)).
fn label_len_bits(m: usize) -> usize {
    (usize::BITS - m.leading_zeros()) as usize
}

// hml_short$0 / hml_long$10 / hml_same$11
fn read_label(slice: &mut CellSlice, m: usize) -> Result<Vec<bool>> {
    if !slice.load_bit()? {
        let mut n = 0usize;
        while slice.load_bit()? {
            n += 1;
            if n > m {
                bail!("étiquette unaire trop longue");
            }
        }
        let mut label = Vec::with_capacity(n);
        for _ in 0..n {
            label.push(slice.load_bit()?);
        }
        Ok(label)
    } else if !slice.load_bit()? {
        let n = slice.load_uint(label_len_bits(m))? as usize;
        if n > m {
            bail!("étiquette hml_long trop longue: {} > {}", n, m);
        }
        let mut label = Vec::with_capacity(n);
        for _ in 0..n {
            label.push(slice.load_bit()?);
        }
        Ok(label)
    } else {
        let v = slice.load_bit()?;
        let n = slice.load_uint(label_len_bits(m))? as usize;
        if n > m {
            bail!("étiquette hml_same trop longue: {} > {}", n, m);
        }
        Ok(vec![v; n])
    }
}

/// Parcourt tout un nœud Hashmap et collecte `(clé, valeur)` ; la valeur est
/// le reste de la slice du nœud feuille.
fn walk(
    node: &Cell,
    prefix: &mut Vec<bool>,
    m: usize,
    out: &mut Vec<(Vec<bool>, CellSlice)>,
) -> Result<()> {
    let mut slice = node.as_slice();
    let label = read_label(&mut slice, m)?;
    let consumed = label.len();
    prefix.extend_from_slice(&label);

    if consumed == m {
        out.push((prefix.clone(), slice));
    } else {
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        prefix.push(false);
        walk(&left, prefix, m - consumed - 1, out)?;
        prefix.pop();
        prefix.push(true);
        walk(&right, prefix, m - consumed - 1, out)?;
        prefix.pop();
    }

    prefix.truncate(prefix.len() - consumed);
    Ok(())
}

/// Énumère toutes les entrées d'un nœud racine de Hashmap (non vide).
pub fn entries(root: &Cell, key_bits: usize) -> Result<Vec<(Vec<bool>, CellSlice)>> {
    let mut out = Vec::new();
    let mut prefix = Vec::with_capacity(key_bits);
    walk(root, &mut prefix, key_bits, &mut out)?;
    Ok(out)
}

/// Recherche exacte d'une clé dans un nœud racine de Hashmap.
pub fn get(root: &Cell, key: &[bool]) -> Result<Option<CellSlice>> {
    let mut node = root.clone();
    let mut remaining: &[bool] = key;

    loop {
        let mut slice = node.as_slice();
        let label = read_label(&mut slice, remaining.len())?;
        if label.as_slice() != &remaining[..label.len()] {
            return Ok(None);
        }
        remaining = &remaining[label.len()..];
        if remaining.is_empty() {
            return Ok(Some(slice));
        }
        let left = slice.load_ref()?;
        let right = slice.load_ref()?;
        node = if remaining[0] { right } else { left };
        remaining = &remaining[1..];
    }
}

/// Construit un Hashmap à partir d'entrées triées ; la valeur de chaque clé est
/// le contenu entier de la cellule fournie (bits et références recopiés).
/// Les étiquettes sont émises en hml_long, forme toujours valide.
pub fn build(entries: &[(Vec<bool>, Cell)], key_bits: usize) -> Result<Option<Cell>> {
    if entries.is_empty() {
        return Ok(None);
    }
    for (key, _) in entries {
        if key.len() != key_bits {
            bail!("clé de {} bits, {} attendus", key.len(), key_bits);
        }
    }
    let refs: Vec<(&[bool], &Cell)> =
        entries.iter().map(|(k, v)| (k.as_slice(), v)).collect();
    Ok(Some(build_node(&refs, key_bits)?))
}

fn build_node(entries: &[(&[bool], &Cell)], m: usize) -> Result<Cell> {
    // Préfixe commun de toutes les clés restantes.
    let first = entries[0].0;
    let mut lcp = first.len();
    for (key, _) in &entries[1..] {
        let mut i = 0;
        while i < lcp && key[i] == first[i] {
            i += 1;
        }
        lcp = i;
    }

    let mut b = CellBuilder::new();
    // hml_long$10 n:(#<= m) s:(n * Bit)
    b.store_bit(true)?;
    b.store_bit(false)?;
    b.store_uint(lcp as u64, label_len_bits(m))?;
    for &bit in &first[..lcp] {
        b.store_bit(bit)?;
    }

    if entries.len() == 1 {
        if lcp != m {
            bail!("feuille avec {} bits d'étiquette, {} attendus", lcp, m);
        }
        b.store_slice(&mut entries[0].1.as_slice())?;
        return Ok(b.build());
    }

    let mut left = Vec::new();
    let mut right = Vec::new();
    for &(key, value) in entries {
        let rest = &key[lcp + 1..];
        if key[lcp] {
            right.push((rest, value));
        } else {
            left.push((rest, value));
        }
    }
    if left.is_empty() || right.is_empty() {
        bail!("clés dupliquées dans le dictionnaire");
    }
    b.store_ref(build_node(&left, m - lcp - 1)?)?;
    b.store_ref(build_node(&right, m - lcp - 1)?)?;
    Ok(b.build())
}

/// Convertit des octets en bits MSB d'abord (clés sha256 de TEP-64).
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    let mut out = Vec::with_capacity(bytes.len() * 8);
    for &b in bytes {
        for i in (0..8).rev() {
            out.push(b & (1 << i) != 0);
        }
    }
    out
}

/// Convertit un entier en clé de `bits` bits, MSB d'abord.
pub fn uint_to_bits(value: u64, bits: usize) -> Vec<bool> {
    (0..bits).rev().map(|i| value >> i & 1 == 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_cell(tag: u8) -> Cell {
        let mut b = CellBuilder::new();
        b.store_u8(tag).unwrap();
        b.build()
    }

    #[test]
    fn build_then_enumerate() {
        let entries_in = vec![
            (uint_to_bits(3, 8), value_cell(0x33)),
            (uint_to_bits(7, 8), value_cell(0x77)),
            (uint_to_bits(250, 8), value_cell(0xfa)),
        ];
        let root = build(&entries_in, 8).unwrap().unwrap();

        let mut found = entries(&root, 8).unwrap();
        found.sort_by_key(|(k, _)| k.clone());
        assert_eq!(found.len(), 3);

        let keys: Vec<u64> = found
            .iter()
            .map(|(k, _)| k.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64))
            .collect();
        assert_eq!(keys, vec![3, 7, 250]);

        let (_, slice) = &found[1];
        assert_eq!(slice.clone().load_u8().unwrap(), 0x77);
    }

    #[test]
    fn lookup_hit_and_miss() {
        let entries_in = vec![
            (uint_to_bits(1, 16), value_cell(0x01)),
            (uint_to_bits(0x8001, 16), value_cell(0x02)),
        ];
        let root = build(&entries_in, 16).unwrap().unwrap();

        let hit = get(&root, &uint_to_bits(0x8001, 16)).unwrap();
        assert_eq!(hit.unwrap().load_u8().unwrap(), 0x02);

        let miss = get(&root, &uint_to_bits(2, 16)).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn empty_dict_builds_to_none() {
        assert!(build(&[], 8).unwrap().is_none());
    }

    #[test]
    fn single_entry_label_spans_whole_key() {
        let root = build(&[(uint_to_bits(0xab, 8), value_cell(0x11))], 8)
            .unwrap()
            .unwrap();
        let found = entries(&root, 8).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].0.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64),
            0xab
        );
    }
}
