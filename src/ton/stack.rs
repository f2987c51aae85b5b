// DANS : src/ton/stack.rs
//
// Sérialisation de la pile TVM pour `runSmcMethod`. L'ordre des valeurs suit
// l'ordre déclaré du tuple de retour : l'élément 0 est le fond de pile.

use anyhow::{bail, Result};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};

use super::cell::{Cell, CellBuilder, CellSlice};

/// Valeur de pile TVM, limitée aux formes renvoyées par les get-methods
/// que l'indexeur consomme.
#[derive(Debug, Clone)]
pub enum StackValue {
    Null,
    Int(BigInt),
    Cell(Cell),
    Slice(CellSlice),
}

impl StackValue {
    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Self::Cell(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<CellSlice> {
        match self {
            Self::Slice(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Désérialise `vm_stack` depuis sa cellule racine.
pub fn parse_stack(root: &Cell) -> Result<Vec<StackValue>> {
    let mut s = root.as_slice();
    let depth = s.load_uint(24)? as usize;
    if depth > 255 {
        bail!("pile TVM trop profonde: {}", depth);
    }
    let mut out = Vec::with_capacity(depth);
    load_list(&mut s, depth, &mut out)?;
    Ok(out)
}

// vm_stk_cons : rest en référence, tos inline. On descend d'abord dans le
// reste pour produire l'ordre fond → sommet.
fn load_list(slice: &mut CellSlice, n: usize, out: &mut Vec<StackValue>) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let rest = slice.load_ref()?;
    load_list(&mut rest.as_slice(), n - 1, out)?;
    out.push(load_value(slice)?);
    Ok(())
}

fn load_value(slice: &mut CellSlice) -> Result<StackValue> {
    match slice.load_u8()? {
        0x00 => Ok(StackValue::Null),
        0x01 => {
            let raw = slice.load_u64()?;
            Ok(StackValue::Int(BigInt::from(raw as i64)))
        }
        0x02 => match slice.load_uint(7)? {
            0x00 => Ok(StackValue::Int(load_int257(slice)?)),
            0x7f => bail!("vm_stk_nan"),
            other => bail!("sous-tag vm_stk_int inconnu: {:#x}", other),
        },
        0x03 => Ok(StackValue::Cell(slice.load_ref()?)),
        0x04 => {
            let cell = slice.load_ref()?;
            let st_bits = slice.load_uint(10)? as usize;
            let end_bits = slice.load_uint(10)? as usize;
            let st_ref = slice.load_uint(3)? as usize;
            let end_ref = slice.load_uint(3)? as usize;
            Ok(StackValue::Slice(CellSlice::with_range(
                cell, st_bits, end_bits, st_ref, end_ref,
            )?))
        }
        0x07 => bail!("vm_stk_tuple non supporté"),
        other => bail!("tag de valeur de pile inconnu: {:#x}", other),
    }
}

// int257 : complément à deux big-endian, bit de signe en tête.
fn load_int257(slice: &mut CellSlice) -> Result<BigInt> {
    let negative = slice.load_bit()?;
    let mag = BigUint::from_bytes_be(&slice.load_bytes(32)?);
    if negative {
        Ok(BigInt::from(mag) - (BigInt::one() << 256u32))
    } else {
        Ok(BigInt::from(mag))
    }
}

/// Sérialise une pile (fond → sommet) vers sa cellule racine.
pub fn build_stack(values: &[StackValue]) -> Result<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(values.len() as u64, 24)?;
    if !values.is_empty() {
        let rest = build_list(&values[..values.len() - 1])?;
        b.store_ref(rest)?;
        store_value(&mut b, &values[values.len() - 1])?;
    }
    Ok(b.build())
}

fn build_list(values: &[StackValue]) -> Result<Cell> {
    let mut b = CellBuilder::new();
    if !values.is_empty() {
        let rest = build_list(&values[..values.len() - 1])?;
        b.store_ref(rest)?;
        store_value(&mut b, &values[values.len() - 1])?;
    }
    Ok(b.build())
}

fn store_value(b: &mut CellBuilder, value: &StackValue) -> Result<()> {
    match value {
        StackValue::Null => {
            b.store_u8(0x00)?;
        }
        StackValue::Int(v) => match v.to_i64() {
            Some(small) => {
                b.store_u8(0x01)?;
                b.store_u64(small as u64)?;
            }
            None => {
                b.store_u8(0x02)?;
                b.store_uint(0, 7)?;
                store_int257(b, v)?;
            }
        },
        StackValue::Cell(c) => {
            b.store_u8(0x03)?;
            b.store_ref(c.clone())?;
        }
        StackValue::Slice(s) => {
            let mut copy = CellBuilder::new();
            copy.store_slice(&mut s.clone())?;
            let cell = copy.build();
            let bits = cell.bit_len();
            let refs = cell.reference_count();
            b.store_u8(0x04)?;
            b.store_ref(cell)?;
            b.store_uint(0, 10)?;
            b.store_uint(bits as u64, 10)?;
            b.store_uint(0, 3)?;
            b.store_uint(refs as u64, 3)?;
        }
    }
    Ok(())
}

fn store_int257(b: &mut CellBuilder, value: &BigInt) -> Result<()> {
    let bound = BigInt::one() << 256u32;
    if value >= &bound || value < &(-bound.clone()) {
        bail!("entier hors bornes int257");
    }
    let twos = if value.sign() == Sign::Minus {
        value + (BigInt::one() << 257u32)
    } else {
        value.clone()
    };
    b.store_bit(!twos.is_zero() && (twos.clone() >> 256u32) == BigInt::one())?;
    let mag = twos & ((BigInt::one() << 256u32) - BigInt::one());
    let (_, bytes) = mag.to_bytes_be();
    let mut padded = vec![0u8; 32 - bytes.len()];
    padded.extend_from_slice(&bytes);
    b.store_bytes(&padded)?;
    Ok(())
}

/// Construit la slice d'adresse renvoyée par les get-methods (`addr_std`).
pub fn address_slice(workchain: i32, id: [u8; 32]) -> Result<CellSlice> {
    let mut b = CellBuilder::new();
    b.store_uint(0b10, 2)?;
    b.store_bit(false)?;
    b.store_i8(workchain as i8)?;
    b.store_bytes(&id)?;
    Ok(b.build().as_slice())
}

/// Slice `addr_none`, la forme d'un admin qui a renoncé à ses droits.
pub fn none_address_slice() -> Result<CellSlice> {
    let mut b = CellBuilder::new();
    b.store_uint(0b00, 2)?;
    Ok(b.build().as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trip_mixed_stack() {
        let mut content = CellBuilder::new();
        content.store_u8(0x01).unwrap();
        let content = content.build();

        let values = vec![
            StackValue::Int(BigInt::from(1000)),
            StackValue::Int(BigInt::from(-1)),
            StackValue::Slice(address_slice(0, [0xaa; 32]).unwrap()),
            StackValue::Cell(content.clone()),
        ];
        let cell = build_stack(&values).unwrap();
        let back = parse_stack(&cell).unwrap();

        assert_eq!(back.len(), 4);
        assert_eq!(back[0].as_int().unwrap(), &BigInt::from(1000));
        assert_eq!(back[1].as_int().unwrap(), &BigInt::from(-1));
        assert!(back[2].as_slice().is_some());
        assert_eq!(back[3].as_cell().unwrap(), &content);
    }

    #[test]
    fn big_supply_survives_losslessly() {
        let big = BigInt::from_str("340282366920938463463374607431768211457").unwrap();
        let cell = build_stack(&[StackValue::Int(big.clone())]).unwrap();
        let back = parse_stack(&cell).unwrap();
        assert_eq!(back[0].as_int().unwrap(), &big);
        assert_eq!(back[0].as_int().unwrap().to_string(), big.to_string());
    }

    #[test]
    fn negative_int257_round_trip() {
        let v = -(BigInt::one() << 200u32);
        let cell = build_stack(&[StackValue::Int(v.clone())]).unwrap();
        let back = parse_stack(&cell).unwrap();
        assert_eq!(back[0].as_int().unwrap(), &v);
    }

    #[test]
    fn empty_stack() {
        let cell = build_stack(&[]).unwrap();
        assert!(parse_stack(&cell).unwrap().is_empty());
    }

    #[test]
    fn address_slice_parses_back() {
        let mut s = address_slice(-1, [0x0f; 32]).unwrap();
        let parsed = crate::ton::tlb::load_msg_address(&mut s).unwrap().unwrap();
        assert_eq!(parsed.0, -1);
        assert_eq!(parsed.1, [0x0f; 32]);
    }
}
