//! Game Events
//!
//! Local notifications produced while applying replicated state. They
//! drive presentation (audio cues, UI, logs) and are what tests observe.
//! Events never travel over the wire.

use serde::{Serialize, Deserialize};

use crate::core::Vec3;
use crate::game::entity::{EntityId, EntityKind, PeerId};
use crate::game::layout::GridPos;
use crate::game::skills::SkillSlot;

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Layout verified and rooms built.
    LayoutApplied {
        /// Rooms instantiated.
        rooms: usize,
        /// Short digest for logs.
        digest: String,
    },

    /// Layout digest did not match; nothing applied.
    LayoutRejected,

    /// An entity appeared.
    EntitySpawned {
        /// Entity id.
        entity: EntityId,
        /// Kind.
        kind: EntityKind,
        /// Owning peer.
        owner: PeerId,
    },

    /// An entity was removed.
    EntityDestroyed {
        /// Entity id.
        entity: EntityId,
    },

    /// Doors of a room closed.
    DoorsLocked {
        /// Room.
        room: GridPos,
    },

    /// Doors of a room opened.
    DoorsUnlocked {
        /// Room.
        room: GridPos,
    },

    /// A room's batch was defeated.
    RoomCleared {
        /// Room.
        room: GridPos,
    },

    /// A player went through a door.
    Teleported {
        /// Player entity.
        player: EntityId,
        /// Room left.
        from: GridPos,
        /// Room entered.
        to: GridPos,
    },

    /// Health display changed.
    HealthChanged {
        /// Entity.
        entity: EntityId,
        /// Current health.
        current: f32,
        /// Maximum health.
        max: f32,
    },

    /// A player's health reached zero.
    PlayerFallen {
        /// Player entity.
        player: EntityId,
    },

    /// A fallen player stood up.
    PlayerRevived {
        /// Player entity.
        player: EntityId,
    },

    /// An enemy was defeated.
    EnemyDefeated {
        /// Enemy entity.
        entity: EntityId,
    },

    /// Session kill count changed.
    KillCountChanged {
        /// New count.
        kills: u32,
    },

    /// A skill slot became available.
    SkillUnlocked {
        /// Slot.
        slot: SkillSlot,
    },

    /// A player used a skill.
    SkillActivated {
        /// Player entity.
        player: EntityId,
        /// Slot used.
        slot: SkillSlot,
    },

    /// Boss room entered; play the intro music.
    BossIntro {
        /// Boss room.
        room: GridPos,
    },

    /// Boss crossed a health threshold.
    BossPhaseEntered {
        /// Phase index.
        index: u32,
        /// Phase name.
        name: String,
    },

    /// A meteor landed.
    MeteorImpact {
        /// Ground position.
        position: Vec3,
    },

    /// A projectile hit something.
    HitEffect {
        /// Impact position.
        position: Vec3,
    },

    /// Boss defeated.
    Victory,

    /// Every player has fallen.
    GameOver,

    /// The authority changed.
    AuthorityChanged {
        /// New master.
        master: PeerId,
        /// Is it this peer?
        local: bool,
    },
}

/// A game event with its tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when the event occurred.
    pub tick: u64,

    /// Event data.
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// Is this a terminal event (victory or game over)?
    pub fn is_terminal(&self) -> bool {
        matches!(self.data, GameEventData::Victory | GameEventData::GameOver)
    }
}
