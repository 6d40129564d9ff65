//! Rule and intent vectors, and the versioned record codec shared by the
//! warm file and the cold database.
//!
//! # Record format
//! ```text
//! [version: u8][payload_len: u32 LE][bincode(RuleVector): payload_len bytes]
//! ```

use serde::{Deserialize, Serialize};
use std::convert::TryInto;

use crate::error::{StoreError, StoreResult};
use crate::types::{now_ms, Slice};

/// Width of every anchor, for every rule and intent in the system.
pub const ANCHOR_DIM: usize = 32;
pub const SLICE_COUNT: usize = 4;
/// Width of a flat intent laid out as action | resource | data | risk.
pub const INTENT_WIDTH: usize = ANCHOR_DIM * SLICE_COUNT;

pub const RECORD_VERSION: u8 = 1;
pub const RECORD_HEADER_LEN: usize = 5;

pub type Anchor = [f32; ANCHOR_DIM];

/// One dense anchor per semantic slice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceAnchors {
    pub action: Anchor,
    pub resource: Anchor,
    pub data: Anchor,
    pub risk: Anchor,
}

impl SliceAnchors {
    pub fn get(&self, slice: Slice) -> &Anchor {
        match slice {
            Slice::Action => &self.action,
            Slice::Resource => &self.resource,
            Slice::Data => &self.data,
            Slice::Risk => &self.risk,
        }
    }

    fn first_non_finite(&self) -> Option<Slice> {
        Slice::ALL
            .into_iter()
            .find(|slice| self.get(*slice).iter().any(|v| !v.is_finite()))
    }
}

/// Anchors and per-slice thresholds for a single installed rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleVector {
    pub rule_id: String,
    pub anchors: SliceAnchors,
    /// Minimum similarity per slice, each in [0, 1]: [action, resource, data, risk]
    pub thresholds: [f32; SLICE_COUNT],
    /// Installation time (Unix ms)
    #[serde(default)]
    pub installed_at_ms: u64,
}

impl RuleVector {
    pub fn new(
        rule_id: impl Into<String>,
        anchors: SliceAnchors,
        thresholds: [f32; SLICE_COUNT],
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            anchors,
            thresholds,
            installed_at_ms: now_ms(),
        }
    }

    pub fn threshold(&self, slice: Slice) -> f32 {
        self.thresholds[slice.index()]
    }

    /// Sum of the slice thresholds. A stricter rule is a more specific rule.
    pub fn specificity(&self) -> f32 {
        self.thresholds.iter().sum()
    }

    /// Check the invariants a vector must hold before it is stored.
    pub fn validate(&self) -> StoreResult<()> {
        if self.rule_id.trim().is_empty() {
            return Err(StoreError::invalid(&self.rule_id, "rule_id is empty"));
        }

        if let Some(slice) = self.anchors.first_non_finite() {
            return Err(StoreError::invalid(
                &self.rule_id,
                format!("{} anchor contains a non-finite value", slice),
            ));
        }

        for slice in Slice::ALL {
            let threshold = self.threshold(slice);
            if !(0.0..=1.0).contains(&threshold) {
                return Err(StoreError::invalid(
                    &self.rule_id,
                    format!("{} threshold {} outside [0, 1]", slice, threshold),
                ));
            }
        }

        Ok(())
    }
}

/// Canonicalized intent for a single enforcement call. Never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentVector {
    #[serde(flatten)]
    pub anchors: SliceAnchors,
}

impl IntentVector {
    pub fn new(anchors: SliceAnchors) -> Self {
        Self { anchors }
    }

    /// Build an intent from four per-slice anchors of width [`ANCHOR_DIM`].
    pub fn from_slices(
        action: &[f32],
        resource: &[f32],
        data: &[f32],
        risk: &[f32],
    ) -> StoreResult<Self> {
        Ok(Self {
            anchors: SliceAnchors {
                action: convert_anchor(Slice::Action, action)?,
                resource: convert_anchor(Slice::Resource, resource)?,
                data: convert_anchor(Slice::Data, data)?,
                risk: convert_anchor(Slice::Risk, risk)?,
            },
        })
    }

    /// Split a flat [`INTENT_WIDTH`] vector into its four slices.
    pub fn from_flat(flat: &[f32]) -> StoreResult<Self> {
        if flat.len() != INTENT_WIDTH {
            return Err(StoreError::invalid(
                "intent",
                format!("flat intent has length {}, expected {}", flat.len(), INTENT_WIDTH),
            ));
        }

        let mut chunks = flat.chunks_exact(ANCHOR_DIM);
        let mut next = |slice: Slice| {
            chunks
                .next()
                .ok_or_else(|| StoreError::invalid("intent", format!("missing {} slice", slice)))
                .and_then(|chunk| convert_anchor(slice, chunk))
        };

        Ok(Self {
            anchors: SliceAnchors {
                action: next(Slice::Action)?,
                resource: next(Slice::Resource)?,
                data: next(Slice::Data)?,
                risk: next(Slice::Risk)?,
            },
        })
    }
}

/// Convert one raw anchor from the canonicalizer into a fixed-size buffer.
pub fn convert_anchor(slice: Slice, values: &[f32]) -> StoreResult<Anchor> {
    if values.len() != ANCHOR_DIM {
        return Err(StoreError::invalid(
            "intent",
            format!(
                "{} anchor has length {}, expected {}",
                slice,
                values.len(),
                ANCHOR_DIM
            ),
        ));
    }

    values
        .try_into()
        .map_err(|_| StoreError::invalid("intent", format!("failed to convert {} anchor", slice)))
}

// ================================================================================================
// RECORD CODEC
// ================================================================================================

/// Encode a vector as a length-prefixed, versioned record.
pub fn encode(vector: &RuleVector) -> StoreResult<Vec<u8>> {
    let payload = bincode::serialize(vector).map_err(StoreError::serialization)?;
    let payload_len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| StoreError::serialization("record payload exceeds u32::MAX bytes"))?;

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    record.push(RECORD_VERSION);
    record.extend_from_slice(&payload_len.to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

/// Decode one record from the front of `bytes`.
///
/// Returns the vector and the number of bytes the record occupied. Trailing
/// bytes after the record are left for the caller.
pub fn decode(bytes: &[u8]) -> StoreResult<(RuleVector, usize)> {
    if bytes.len() < RECORD_HEADER_LEN {
        return Err(StoreError::serialization(format!(
            "truncated record header: {} of {} bytes",
            bytes.len(),
            RECORD_HEADER_LEN
        )));
    }

    let version = bytes[0];
    if version != RECORD_VERSION {
        return Err(StoreError::serialization(format!(
            "unsupported record version {} (expected {})",
            version, RECORD_VERSION
        )));
    }

    let len_bytes: [u8; 4] = bytes[1..RECORD_HEADER_LEN]
        .try_into()
        .map_err(|_| StoreError::serialization("malformed record length"))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;

    let end = RECORD_HEADER_LEN
        .checked_add(payload_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            StoreError::serialization(format!(
                "truncated record payload: need {} bytes, have {}",
                payload_len,
                bytes.len() - RECORD_HEADER_LEN
            ))
        })?;

    let payload = &bytes[RECORD_HEADER_LEN..end];
    let vector: RuleVector = bincode::deserialize(payload).map_err(StoreError::serialization)?;

    // Reject padding inside the payload so decode -> encode is byte-exact.
    let used = bincode::serialized_size(&vector).map_err(StoreError::serialization)?;
    if used != payload_len as u64 {
        return Err(StoreError::serialization(format!(
            "record payload has {} trailing bytes",
            payload_len as u64 - used.min(payload_len as u64)
        )));
    }

    Ok((vector, end))
}
