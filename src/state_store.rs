// =============================================================================
// State Store — durable, checksummed snapshots of the ledger
// =============================================================================
//
// A single JSON file written via tmp + rename so a crash mid-write can never
// corrupt the previous snapshot. The body carries a schema version and a
// SHA-256 checksum computed over the serialized body; a mismatch on load is a
// state-integrity failure and the engine must refuse to start on it.
//
// Collections are sorted before serialization so save -> load -> save is
// byte-identical.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::execution::Order;
use crate::portfolio::{PortfolioSnapshot, Position};

/// Bump when the snapshot schema changes shape.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("snapshot checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: String, computed: String },

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    version: u32,
    as_of: DateTime<Utc>,
    cash_paise: i64,
    positions: Vec<Position>,
    open_orders: Vec<Order>,
    realized_pnl_day_paise: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    body: SnapshotBody,
    /// SHA-256 hex over the serialized body.
    checksum: String,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a snapshot atomically (write `.tmp`, then rename).
    pub fn save(&self, snapshot: &PortfolioSnapshot) -> Result<(), StateError> {
        let mut positions: Vec<Position> = snapshot.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let mut open_orders: Vec<Order> = snapshot.open_orders.values().cloned().collect();
        open_orders.sort_by(|a, b| a.client_order_id.cmp(&b.client_order_id));

        let body = SnapshotBody {
            version: SNAPSHOT_VERSION,
            as_of: snapshot.as_of,
            cash_paise: snapshot.cash.paise(),
            positions,
            open_orders,
            realized_pnl_day_paise: snapshot.realized_pnl_day.paise(),
        };
        let checksum = Self::checksum_of(&body)?;
        let file = SnapshotFile { body, checksum };

        let content = serde_json::to_vec_pretty(&file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &self.path)?;

        info!(path = %self.path.display(), bytes = content.len(), "state snapshot saved");
        Ok(())
    }

    /// Load and validate the snapshot. `Ok(None)` when no file exists yet
    /// (first run).
    pub fn load(&self) -> Result<Option<PortfolioSnapshot>, StateError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state snapshot — fresh start");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: SnapshotFile = serde_json::from_slice(&content)?;
        if file.body.version != SNAPSHOT_VERSION {
            return Err(StateError::UnsupportedVersion(file.body.version));
        }

        let computed = Self::checksum_of(&file.body)?;
        if computed != file.checksum {
            warn!(
                path = %self.path.display(),
                "snapshot checksum mismatch — refusing to restore"
            );
            return Err(StateError::ChecksumMismatch {
                stored: file.checksum,
                computed,
            });
        }

        let positions: HashMap<String, Position> = file
            .body
            .positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let open_orders: HashMap<String, Order> = file
            .body
            .open_orders
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o))
            .collect();

        info!(
            path = %self.path.display(),
            positions = positions.len(),
            open_orders = open_orders.len(),
            "state snapshot restored"
        );

        Ok(Some(PortfolioSnapshot {
            cash: crate::types::Paise::from_paise(file.body.cash_paise),
            positions,
            open_orders,
            realized_pnl_day: crate::types::Paise::from_paise(file.body.realized_pnl_day_paise),
            as_of: file.body.as_of,
        }))
    }

    fn checksum_of(body: &SnapshotBody) -> Result<String, StateError> {
        let bytes = serde_json::to_vec(body)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").field("path", &self.path).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{FillEvent, Portfolio};
    use crate::types::{Paise, ProductKind, Side};

    fn sample_snapshot() -> PortfolioSnapshot {
        let portfolio = Portfolio::new(Paise::from_rupees(1_000_000));
        portfolio
            .apply_fill(&FillEvent {
                client_order_id: "o1".into(),
                symbol: "TCS".into(),
                side: Side::Buy,
                quantity: 10,
                price: Paise::from_rupees(4000),
                fees: Paise::from_paise(20),
                executed_at: Utc::now(),
                strategy_tag: "test".into(),
                product: ProductKind::Delivery,
                lot_size: 1,
            })
            .unwrap();
        portfolio.snapshot(HashMap::new())
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.json");
        let path_b = dir.path().join("b.json");

        let snapshot = sample_snapshot();
        let store_a = StateStore::new(&path_a);
        store_a.save(&snapshot).unwrap();

        let restored = store_a.load().unwrap().unwrap();
        let store_b = StateStore::new(&path_b);
        store_b.save(&restored).unwrap();

        let bytes_a = std::fs::read(&path_a).unwrap();
        let bytes_b = std::fs::read(&path_b).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn restored_snapshot_preserves_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let snapshot = sample_snapshot();
        store.save(&snapshot).unwrap();
        let restored = store.load().unwrap().unwrap();

        assert_eq!(restored.cash, snapshot.cash);
        assert_eq!(restored.positions.len(), 1);
        assert_eq!(restored.positions["TCS"].signed_quantity, 10);

        // The restored ledger must still satisfy the integrity equation.
        let portfolio =
            Portfolio::restore(restored.cash, restored.positions, restored.realized_pnl_day)
                .unwrap();
        portfolio.verify_integrity().unwrap();
    }

    #[test]
    fn missing_file_is_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn corrupted_snapshot_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);
        store.save(&sample_snapshot()).unwrap();

        // Flip the cash figure without updating the checksum.
        let mut file: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        file["body"]["cash_paise"] = serde_json::json!(42);
        std::fs::write(&path, serde_json::to_vec_pretty(&file).unwrap()).unwrap();

        assert!(matches!(
            store.load(),
            Err(StateError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn tmp_file_never_lingers_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&sample_snapshot()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
