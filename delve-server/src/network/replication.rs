//! Entity Replication Channel
//!
//! Outgoing side of replication. A spawn is applied locally at once and
//! forwarded (buffered) to the other peers; an invocation is queued for
//! local execution when the target includes the sender and forwarded
//! through the relay otherwise. Delivery order is whatever the
//! transport gives; nothing here reorders or retries.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::trace;

use crate::config::GameConfig;
use crate::core::{Quat, Vec3};
use crate::game::entity::{
    EntityClass, EntityId, EntityIdAllocator, EntityKind, InitPayload, NetworkedEntity, PeerId,
    SpawnRequest,
};
use crate::game::world::World;
use crate::network::protocol::{OpCode, Operation, Payload, RemoteCall, Target};

/// Why an operation was dropped. Logged and swallowed, never surfaced.
#[derive(Debug, Error, PartialEq)]
pub enum ReplicationError {
    /// A referenced resource or entity does not exist.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// The addressed entity is gone (already destroyed).
    #[error("stale target {0}")]
    StaleTarget(EntityId),

    /// Only the owner may resolve this operation.
    #[error("{entity} is not owned by {local}")]
    NotOwner {
        /// Addressed entity.
        entity: EntityId,
        /// Local peer.
        local: PeerId,
    },

    /// No handler for the operation on this kind of entity.
    #[error("no handler for {op:?} on {class:?}")]
    UnknownHandler {
        /// Entity class.
        class: EntityClass,
        /// Operation.
        op: OpCode,
    },

    /// Arguments cannot be applied.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Every id of the local peer is in use.
    #[error("entity ids exhausted for {0}")]
    IdsExhausted(PeerId),
}

/// An operation to run on this peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Peer that sent it.
    pub sender: PeerId,
    /// Addressed entity.
    pub entity: EntityId,
    /// Operation.
    pub op: Operation,
}

impl Invocation {
    /// Invocation from a delivered call.
    pub fn from_call(sender: PeerId, call: RemoteCall) -> Self {
        Self { sender, entity: call.entity, op: call.op }
    }
}

/// Per-peer outgoing replication state.
#[derive(Debug)]
pub struct Replicator {
    local: PeerId,
    master: Option<PeerId>,
    allocator: EntityIdAllocator,
    outbox: Vec<(Target, Payload)>,
    local_queue: VecDeque<Invocation>,
}

impl Replicator {
    /// Replicator for the local actor number.
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            master: None,
            allocator: EntityIdAllocator::new(local),
            outbox: Vec::new(),
            local_queue: VecDeque::new(),
        }
    }

    /// Local actor number.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Track the current master for `Target::Master`.
    pub fn set_master(&mut self, master: Option<PeerId>) {
        self.master = master;
    }

    /// Create an entity owned by the local peer.
    ///
    /// The entity exists locally when this returns; the spawn is buffered
    /// on the relay for the other peers and late joiners.
    pub fn spawn(
        &mut self,
        world: &mut World,
        config: &GameConfig,
        kind: EntityKind,
        position: Vec3,
        rotation: Quat,
        payload: Option<InitPayload>,
    ) -> Result<EntityId, ReplicationError> {
        let entity = self
            .allocator
            .allocate(|id| world.contains(id))
            .ok_or(ReplicationError::IdsExhausted(self.local))?;

        let request = SpawnRequest {
            entity,
            kind,
            position,
            rotation,
            owner: self.local,
            payload,
        };

        world.insert_entity(NetworkedEntity::from_spawn(&request, config, world.now()));
        trace!(%entity, kind = kind.prefab_name(), "spawned");

        self.outbox.push((Target::OthersBuffered, Payload::Spawn(request)));
        Ok(entity)
    }

    /// Ask `target` to run `op` on `entity`.
    ///
    /// Local execution is queued, so it happens after the current handler
    /// returns, in the order invoked.
    pub fn invoke(&mut self, target: Target, entity: EntityId, op: Operation) {
        let runs_here = match target {
            Target::Peer(peer) => peer == self.local,
            Target::Master => self.master == Some(self.local),
            other => other.includes_local(),
        };

        if runs_here {
            self.local_queue.push_back(Invocation { sender: self.local, entity, op: op.clone() });
        }

        let forwards = match target {
            Target::Peer(peer) => peer != self.local,
            Target::Master => self.master != Some(self.local),
            _ => true,
        };

        if forwards {
            self.outbox.push((target.for_relay(), Payload::Call(RemoteCall { entity, op })));
        }
    }

    /// Remove an entity locally and on every other peer.
    pub fn destroy(&mut self, world: &mut World, entity: EntityId) -> Option<NetworkedEntity> {
        let removed = world.remove_entity(entity)?;
        self.outbox.push((Target::Others, Payload::Destroy { entity }));
        Some(removed)
    }

    /// Messages for the relay, in send order.
    pub fn take_outbox(&mut self) -> Vec<(Target, Payload)> {
        std::mem::take(&mut self.outbox)
    }

    /// Next locally queued invocation.
    pub fn pop_local(&mut self) -> Option<Invocation> {
        self.local_queue.pop_front()
    }

    /// Queue an invocation received from the relay.
    pub fn push_remote(&mut self, invocation: Invocation) {
        self.local_queue.push_back(invocation);
    }

    /// Queued invocations.
    pub fn pending(&self) -> usize {
        self.local_queue.len()
    }
}
