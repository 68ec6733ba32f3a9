use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use climate_common::{ControlError, ControlPatch, ControlRole, ControlState};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const STATE_FILE: &str = "control_state.json";

/// The command record shared by the operator and device surfaces.
///
/// Each patch is validated and merged under a single write lock, so readers
/// never see half of a patch and patches land in arrival order. With a data
/// directory the record is also written to disk after every change.
pub struct ControlStore {
    state: RwLock<ControlState>,
    state_path: Option<PathBuf>,
}

impl ControlStore {
    pub fn in_memory(initial: ControlState) -> Self {
        Self {
            state: RwLock::new(initial),
            state_path: None,
        }
    }

    /// Restores the persisted record from `data_dir`. A missing file starts
    /// from defaults; an unreadable or corrupt one is logged and also starts
    /// from defaults, keeping the path so the next patch replaces it.
    pub async fn open(data_dir: PathBuf) -> Self {
        let state_path = data_dir.join(STATE_FILE);
        let state = load(&state_path).await.unwrap_or_else(|err| {
            warn!("failed to restore control state, starting from defaults: {err:#}");
            ControlState::default()
        });

        Self {
            state: RwLock::new(state),
            state_path: Some(state_path),
        }
    }

    pub async fn read(&self) -> ControlState {
        self.state.read().await.clone()
    }

    pub async fn apply_patch(
        &self,
        role: ControlRole,
        patch: &ControlPatch,
    ) -> Result<ControlState, ControlError> {
        let mut state = self.state.write().await;
        if patch.is_empty() {
            return Ok(state.clone());
        }

        state.apply(role, patch)?;
        let fields: Vec<&str> = patch.fields().into_iter().map(|(name, _)| name).collect();
        debug!(%role, ?fields, "control patch applied");

        // Written while still holding the lock so the file follows patch order.
        if let Err(err) = self.persist(&state).await {
            warn!("failed to persist control state: {err:#}");
        }

        Ok(state.clone())
    }

    async fn persist(&self, state: &ControlState) -> anyhow::Result<()> {
        let Some(path) = self.state_path.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

async fn load(path: &Path) -> anyhow::Result<ControlState> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<ControlState>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no persisted control state at {}", path.display());
            Ok(ControlState::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
