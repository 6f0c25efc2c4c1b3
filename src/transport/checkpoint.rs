//! In-process checkpoint store with shard leases.
//!
//! Each shard has at most one lease owner. A checkpointer is bound to the
//! owner it was acquired for; once the lease moves elsewhere every checkpoint
//! it attempts reports [`CheckpointError::OwnershipLost`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{CheckpointError, CheckpointPosition, Checkpointer, ShardId};

#[derive(Debug, Default)]
struct LeaseEntry {
    owner: Option<String>,
    position: Option<CheckpointPosition>,
    commits: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    leases: HashMap<ShardId, LeaseEntry>,
    injected: HashMap<ShardId, VecDeque<CheckpointError>>,
}

/// Lease table and progress store shared by all shard consumers.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease on `shard` for `owner` and return a checkpointer bound to it.
    ///
    /// Also returns the last persisted position so the consumer knows where it
    /// is resuming from.
    pub fn acquire(
        &self,
        shard: ShardId,
        owner: impl Into<String>,
    ) -> (ShardCheckpointer, Option<CheckpointPosition>) {
        let owner = owner.into();
        let mut state = self.state.lock();
        let entry = state.leases.entry(shard).or_default();
        entry.owner = Some(owner.clone());
        let resume_from = entry.position;
        drop(state);

        tracing::info!(shard_id = %shard, owner = %owner, "Lease acquired");
        (
            ShardCheckpointer {
                store: self.clone(),
                shard,
                owner,
            },
            resume_from,
        )
    }

    /// Hand the lease on `shard` to `new_owner`, as a rebalance would.
    pub fn transfer_lease(&self, shard: ShardId, new_owner: impl Into<String>) {
        self.state.lock().leases.entry(shard).or_default().owner = Some(new_owner.into());
    }

    /// Make the next checkpoint attempt on `shard` fail with `error`.
    pub fn inject_failure(&self, shard: ShardId, error: CheckpointError) {
        self.state
            .lock()
            .injected
            .entry(shard)
            .or_default()
            .push_back(error);
    }

    /// Last persisted position for `shard`.
    pub fn position(&self, shard: ShardId) -> Option<CheckpointPosition> {
        self.state.lock().leases.get(&shard).and_then(|e| e.position)
    }

    /// Number of successful checkpoints on `shard`.
    pub fn commits(&self, shard: ShardId) -> u64 {
        self.state.lock().leases.get(&shard).map_or(0, |e| e.commits)
    }

    /// Current lease owner of `shard`.
    pub fn owner(&self, shard: ShardId) -> Option<String> {
        self.state.lock().leases.get(&shard).and_then(|e| e.owner.clone())
    }

    fn commit(
        &self,
        shard: ShardId,
        owner: &str,
        position: CheckpointPosition,
    ) -> Result<(), CheckpointError> {
        let mut state = self.state.lock();

        if let Some(error) = state.injected.get_mut(&shard).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        let entry = state.leases.entry(shard).or_default();
        if entry.owner.as_deref() != Some(owner) {
            return Err(CheckpointError::OwnershipLost { shard });
        }

        // Positions never move backwards; ShardEnd is terminal.
        let advanced = match (entry.position, position) {
            (Some(CheckpointPosition::ShardEnd), _) => false,
            (Some(CheckpointPosition::At(prev)), CheckpointPosition::At(next)) => next > prev,
            _ => true,
        };
        if advanced {
            entry.position = Some(position);
        }
        entry.commits += 1;
        Ok(())
    }
}

/// Checkpoint handle for one shard, bound to the lease owner that acquired it.
#[derive(Debug, Clone)]
pub struct ShardCheckpointer {
    store: MemoryCheckpointStore,
    shard: ShardId,
    owner: String,
}

impl ShardCheckpointer {
    /// The shard this handle checkpoints.
    pub fn shard_id(&self) -> ShardId {
        self.shard
    }

    /// The lease owner this handle acts for.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Checkpointer for ShardCheckpointer {
    async fn checkpoint(&self, position: CheckpointPosition) -> Result<(), CheckpointError> {
        self.store.commit(self.shard, &self.owner, position)
    }
}
