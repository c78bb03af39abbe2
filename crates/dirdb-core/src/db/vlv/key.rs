//! Order-preserving block keys.
//!
//! Unsigned byte order of an encoded key equals `SortOrder::compare` order of
//! the element it was built from.

use crate::db::vlv::sort::{SortKey, SortOrder, SortValues};

const PRESENT_TAG: u8 = 0x01;
const NULL_TAG: u8 = 0x02;

/// Key of the last block: sorts after every element key.
pub(crate) const UNBOUNDED_BLOCK_KEY: &[u8] = &[0xFF];

/// Full element key: one component per sort key, then the entry ID.
pub(crate) fn encode_key(order: &SortOrder, values: &SortValues) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, key) in order.iter().enumerate() {
        push_component(&mut out, key, values.value(i));
    }
    out.extend_from_slice(&values.entry_id().to_be_bytes());

    out
}

/// Component prefix of `value` under `key`; used to seek by assertion.
pub(crate) fn encode_component(key: &SortKey, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    push_component(&mut out, key, Some(value).filter(|v| !v.is_empty()));

    out
}

/// Whether `element_key` belongs under a block keyed `block_key`.
pub(crate) fn is_covered_by(element_key: &[u8], block_key: &[u8]) -> bool {
    block_key == UNBOUNDED_BLOCK_KEY || element_key <= block_key
}

// Null stays last for both directions, so the tag itself is never inverted.
fn push_component(out: &mut Vec<u8>, key: &SortKey, value: Option<&[u8]>) {
    let Some(value) = value else {
        out.push(NULL_TAG);
        return;
    };

    out.push(PRESENT_TAG);
    if key.is_ascending() {
        push_terminated_bytes(out, value);
    } else {
        let mut escaped = Vec::with_capacity(value.len() + 2);
        push_terminated_bytes(&mut escaped, value);
        push_inverted(out, &escaped);
    }
}

// Zero bytes are escaped so a shorter value always sorts before any longer
// value it prefixes.
fn push_terminated_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        if byte == 0 {
            out.extend_from_slice(&[0, 0xFF]);
        } else {
            out.push(byte);
        }
    }

    out.extend_from_slice(&[0, 0]);
}

fn push_inverted(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        out.push(!byte);
    }
}
