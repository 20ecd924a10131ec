//! Alert anchoring ledger
//!
//! An append-only SHA-256 hash chain standing in for an on-chain registry.
//! Each block commits to the previous block hash, the alert digest and its
//! own height, so rewriting any earlier block breaks every later hash.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use safety_store::{Alert, AlertKind, AnchorReceipt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use geofence::GeoPoint;

type Hash = [u8; 32];

const GENESIS: Hash = [0u8; 32];

#[derive(Debug, Clone)]
struct Block {
    height: u64,
    prev_hash: Hash,
    digest: Hash,
    hash: Hash,
    alert_id: Uuid,
    anchored_at: DateTime<Utc>,
}

/// The alert fields that never change after creation
#[derive(Serialize)]
struct AnchoredFields<'a> {
    id: Uuid,
    user_id: Uuid,
    kind: AlertKind,
    location: Option<GeoPoint>,
    message: Option<&'a str>,
    geofence_ids: &'a [Uuid],
    created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
#[error("Cannot encode alert {alert_id} for anchoring: {source}")]
pub struct AnchorError {
    pub alert_id: Uuid,
    #[source]
    pub source: serde_json::Error,
}

pub fn alert_digest(alert: &Alert) -> Result<Hash, AnchorError> {
    let fields = AnchoredFields {
        id: alert.id,
        user_id: alert.user_id,
        kind: alert.kind,
        location: alert.location,
        message: alert.message.as_deref(),
        geofence_ids: &alert.geofence_ids,
        created_at: alert.created_at,
    };
    // Struct field order makes the encoding canonical
    let canonical = serde_json::to_vec(&fields).map_err(|source| AnchorError {
        alert_id: alert.id,
        source,
    })?;
    Ok(Sha256::digest(&canonical).into())
}

fn block_hash(prev_hash: &Hash, digest: &Hash, height: u64) -> Hash {
    Sha256::new()
        .chain_update(prev_hash)
        .chain_update(digest)
        .chain_update(height.to_be_bytes())
        .finalize()
        .into()
}

#[derive(Default)]
pub struct AnchorLedger {
    blocks: RwLock<Vec<Block>>,
}

impl AnchorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of anchored blocks; heights start at 1
    pub fn height(&self) -> u64 {
        self.blocks.read().len() as u64
    }

    pub fn anchor(&self, alert: &Alert) -> Result<AnchorReceipt, AnchorError> {
        let digest = alert_digest(alert)?;
        let mut blocks = self.blocks.write();

        let prev_hash = blocks.last().map_or(GENESIS, |b| b.hash);
        let height = blocks.len() as u64 + 1;
        let block = Block {
            height,
            prev_hash,
            digest,
            hash: block_hash(&prev_hash, &digest, height),
            alert_id: alert.id,
            anchored_at: Utc::now(),
        };

        let receipt = AnchorReceipt {
            tx_hash: format!("0x{}", hex::encode(block.hash)),
            block_height: block.height,
            digest: hex::encode(block.digest),
            anchored_at: block.anchored_at,
        };
        blocks.push(block);
        Ok(receipt)
    }

    /// The alert still hashes to the receipt digest and the receipt points at
    /// a block holding that digest for that alert
    pub fn verify(&self, alert: &Alert, receipt: &AnchorReceipt) -> bool {
        let Ok(digest) = alert_digest(alert) else {
            return false;
        };
        if hex::encode(digest) != receipt.digest {
            return false;
        }
        if receipt.block_height == 0 {
            return false;
        }

        let blocks = self.blocks.read();
        let Some(block) = blocks.get((receipt.block_height - 1) as usize) else {
            return false;
        };

        block.alert_id == alert.id
            && hex::encode(block.digest) == receipt.digest
            && format!("0x{}", hex::encode(block.hash)) == receipt.tx_hash
    }

    /// Recompute every link of the chain
    pub fn verify_chain(&self) -> bool {
        let blocks = self.blocks.read();
        let mut prev = GENESIS;
        for (i, block) in blocks.iter().enumerate() {
            if block.height != i as u64 + 1
                || block.prev_hash != prev
                || block.hash != block_hash(&prev, &block.digest, block.height)
            {
                return false;
            }
            prev = block.hash;
        }
        true
    }

    #[cfg(test)]
    fn tamper(&self, height: u64, digest: Hash) {
        if let Some(block) = self.blocks.write().get_mut((height - 1) as usize) {
            block.digest = digest;
        }
    }
}
