//! Protocol Messages
//!
//! Wire format between peers and the relay over WebSocket.
//! Peer/relay envelopes are serialized as JSON for debugging ease;
//! the flat application messages ([`RemoteCall`], [`SpawnRequest`])
//! also have a binary (bincode) form.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::config::EnemyAttributes;
use crate::core::{Quat, Vec3};
use crate::game::effects::EffectSpec;
use crate::game::entity::{EntityId, PeerId, PlayerClass, SpawnRequest};
use crate::game::layout::{Direction, DungeonLayout, GridPos};
use crate::game::skills::SkillSlot;
use crate::game::spawner::SpawnerSnapshot;

// =============================================================================
// ROUTING
// =============================================================================

/// Who receives a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Every peer, the sender included.
    All,
    /// Every peer except the sender.
    Others,
    /// The current master.
    Master,
    /// One peer.
    Peer(PeerId),
    /// Every peer, and kept for late joiners.
    AllBuffered,
    /// Every other peer, and kept for late joiners.
    OthersBuffered,
}

impl Target {
    /// Should the relay keep the message for late joiners?
    pub fn is_buffered(self) -> bool {
        matches!(self, Target::AllBuffered | Target::OthersBuffered)
    }

    /// Does the sender run the message itself?
    pub fn includes_local(self) -> bool {
        matches!(self, Target::All | Target::AllBuffered)
    }

    /// Target handed to the relay. Local execution of `All*` happens on
    /// the sending peer, so the relay only forwards to the others.
    pub fn for_relay(self) -> Target {
        match self {
            Target::All => Target::Others,
            Target::AllBuffered => Target::OthersBuffered,
            other => other,
        }
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Handler registry key; a fieldless mirror of [`Operation`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCode {
    ApplyLayout,
    RoomActivated,
    LockDoors,
    UnlockDoors,
    RoomCleared,
    Teleport,
    BossIntro,
    KillCountChanged,
    BatchProgress,
    InitializeEnemy,
    TakeDamage,
    Heal,
    HealthChanged,
    Fallen,
    ReviveCheck,
    Revived,
    Defeated,
    ApplyStatusEffect,
    ApplySlow,
    SetParent,
    SyncTransform,
    HitEffect,
    SkillCast,
    BossPhaseChanged,
    BossDefeated,
}

/// A named remote operation with its arguments.
///
/// Scene operations address [`EntityId::SCENE`]; the rest address a
/// spawned entity.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Build the dungeon. Buffered so late joiners receive it.
    ApplyLayout {
        /// Generated layout.
        layout: DungeonLayout,
        /// Digest the authority computed.
        digest: [u8; 32],
    },

    /// A room's batch or boss started.
    RoomActivated { room: GridPos },

    /// Close a room's doors.
    LockDoors { room: GridPos },

    /// Open a room's doors.
    UnlockDoors { room: GridPos },

    /// A room's batch was defeated.
    RoomCleared { room: GridPos },

    /// A door countdown expired.
    Teleport {
        /// Room the door belongs to.
        room: GridPos,
        /// Door slot.
        door: Direction,
        /// Players that were in the door.
        players: Vec<EntityId>,
    },

    /// Boss room entered.
    BossIntro { room: GridPos },

    /// Session kill count.
    KillCountChanged { kills: u32 },

    /// Spawner mirror for authority handover.
    BatchProgress(SpawnerSnapshot),

    /// Replicated enemy attributes.
    InitializeEnemy {
        /// Attributes.
        attributes: EnemyAttributes,
        /// Boss minion (outside any room batch).
        minion: bool,
        /// Room whose batch the enemy counts towards.
        room: Option<GridPos>,
    },

    /// Damage request; resolved by the owner only.
    TakeDamage { amount: f32 },

    /// Heal request; resolved by the owner only.
    Heal { amount: f32 },

    /// Owner's resolved health, for display.
    HealthChanged { current: f32, max: f32, shield: f32 },

    /// A player's health reached zero.
    Fallen,

    /// Revive the player if another player is standing.
    ReviveCheck,

    /// The player stood up with `health`.
    Revived { health: f32 },

    /// An enemy was defeated.
    Defeated,

    /// Start a damage-over-time effect on the owner.
    ApplyStatusEffect(EffectSpec),

    /// Slow the target on its owner.
    ApplySlow { multiplier: f32, duration: f32 },

    /// Attach an effect to a moving entity.
    SetParent {
        /// Entity to follow.
        parent: EntityId,
        /// Scale relative to the parent.
        local_scale: Vec3,
    },

    /// Owner-streamed transform.
    SyncTransform { position: Vec3, rotation: Quat },

    /// Hit spark at a position.
    HitEffect { position: Vec3 },

    /// A player used a skill, for presentation.
    SkillCast { slot: SkillSlot },

    /// Boss entered a phase.
    BossPhaseChanged { index: u32, name: String },

    /// Boss health reached zero.
    BossDefeated,
}

impl Operation {
    /// Registry key of this operation.
    pub fn code(&self) -> OpCode {
        match self {
            Operation::ApplyLayout { .. } => OpCode::ApplyLayout,
            Operation::RoomActivated { .. } => OpCode::RoomActivated,
            Operation::LockDoors { .. } => OpCode::LockDoors,
            Operation::UnlockDoors { .. } => OpCode::UnlockDoors,
            Operation::RoomCleared { .. } => OpCode::RoomCleared,
            Operation::Teleport { .. } => OpCode::Teleport,
            Operation::BossIntro { .. } => OpCode::BossIntro,
            Operation::KillCountChanged { .. } => OpCode::KillCountChanged,
            Operation::BatchProgress(_) => OpCode::BatchProgress,
            Operation::InitializeEnemy { .. } => OpCode::InitializeEnemy,
            Operation::TakeDamage { .. } => OpCode::TakeDamage,
            Operation::Heal { .. } => OpCode::Heal,
            Operation::HealthChanged { .. } => OpCode::HealthChanged,
            Operation::Fallen => OpCode::Fallen,
            Operation::ReviveCheck => OpCode::ReviveCheck,
            Operation::Revived { .. } => OpCode::Revived,
            Operation::Defeated => OpCode::Defeated,
            Operation::ApplyStatusEffect(_) => OpCode::ApplyStatusEffect,
            Operation::ApplySlow { .. } => OpCode::ApplySlow,
            Operation::SetParent { .. } => OpCode::SetParent,
            Operation::SyncTransform { .. } => OpCode::SyncTransform,
            Operation::HitEffect { .. } => OpCode::HitEffect,
            Operation::SkillCast { .. } => OpCode::SkillCast,
            Operation::BossPhaseChanged { .. } => OpCode::BossPhaseChanged,
            Operation::BossDefeated => OpCode::BossDefeated,
        }
    }
}

/// An operation addressed to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Target entity.
    pub entity: EntityId,
    /// Operation and arguments.
    pub op: Operation,
}

/// Application message carried by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Create an entity.
    Spawn(SpawnRequest),
    /// Run an operation.
    Call(RemoteCall),
    /// Remove an entity.
    Destroy { entity: EntityId },
}

impl Payload {
    /// Entity the payload refers to.
    pub fn entity(&self) -> EntityId {
        match self {
            Payload::Spawn(spawn) => spawn.entity,
            Payload::Call(call) => call.entity,
            Payload::Destroy { entity } => *entity,
        }
    }
}

// =============================================================================
// PEER PROPERTIES
// =============================================================================

/// Custom properties a peer publishes in the lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProperties {
    /// Chosen class.
    pub class: Option<PlayerClass>,
    /// Ready to start.
    pub ready: bool,
}

/// A peer as the relay announces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Actor number.
    pub id: PeerId,
    /// Display name.
    pub nickname: String,
    /// Lobby properties.
    pub properties: PeerProperties,
}

// =============================================================================
// PEER -> RELAY MESSAGES
// =============================================================================

/// Messages sent from a peer to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Join (or create) a room.
    Join {
        /// Room name.
        room: String,
        /// Display name.
        nickname: String,
        /// Initial properties.
        properties: PeerProperties,
    },

    /// Replace this peer's properties.
    SetProperties { properties: PeerProperties },

    /// Route a payload.
    Send { target: Target, payload: Payload },

    /// Leave the room.
    Leave,
}

// =============================================================================
// RELAY -> PEER MESSAGES
// =============================================================================

/// Messages sent from the relay to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Join accepted.
    Joined {
        /// Actor number assigned to the joiner.
        you: PeerId,
        /// Room identifier, fixed for the room's lifetime.
        room_id: Uuid,
        /// Current master.
        master: PeerId,
        /// Everyone in the room, the joiner included.
        peers: Vec<PeerInfo>,
    },

    /// Another peer joined.
    PeerJoined { peer: PeerInfo },

    /// A peer left.
    PeerLeft { peer: PeerId },

    /// The master changed.
    MasterSwitched { master: PeerId },

    /// A peer changed its properties.
    PropertiesChanged { peer: PeerId, properties: PeerProperties },

    /// A routed payload.
    Deliver { sender: PeerId, payload: Payload },

    /// Request refused.
    Error { message: String },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl PeerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl RelayMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl RemoteCall {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl SpawnRequest {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityKind, InitPayload};
    use crate::game::effects::StatusEffectKind;

    fn projectile_spawn() -> SpawnRequest {
        SpawnRequest {
            entity: EntityId(2003),
            kind: EntityKind::Projectile,
            position: Vec3::new(1.0, 0.5, -2.0),
            rotation: Quat::IDENTITY,
            owner: PeerId(2),
            payload: Some(InitPayload::projectile(Vec3::new(1.0, 0.0, 0.0), 10.0, Some(EntityId(7)))),
        }
    }

    #[test]
    fn test_peer_message_json() {
        let msg = PeerMessage::Send {
            target: Target::AllBuffered,
            payload: Payload::Spawn(projectile_spawn()),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"send\""));
        assert!(json.contains("all_buffered"));

        let parsed = PeerMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_relay_message_json() {
        let msg = RelayMessage::Joined {
            you: PeerId(2),
            room_id: Uuid::new_v4(),
            master: PeerId(1),
            peers: vec![PeerInfo {
                id: PeerId(1),
                nickname: "host".to_string(),
                properties: PeerProperties { class: Some(PlayerClass::Archer), ready: true },
            }],
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"joined\""));
        assert!(json.contains("archer"));
        assert_eq!(RelayMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_binary_serialization_remote_call() {
        // Tagged envelopes stay JSON; flat calls and spawns also go binary
        let call = RemoteCall {
            entity: EntityId(1004),
            op: Operation::ApplyStatusEffect(EffectSpec {
                kind: StatusEffectKind::Poison,
                damage_per_tick: 2.0,
                duration: 4.0,
                tick_interval: 1.0,
            }),
        };

        let bytes = call.to_bytes().unwrap();
        assert_eq!(RemoteCall::from_bytes(&bytes).unwrap(), call);

        let spawn = projectile_spawn();
        let parsed = SpawnRequest::from_bytes(&spawn.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.payload.map(|p| p.damage), Some(10.0));
        assert_eq!(parsed.payload.and_then(|p| p.owner_entity), Some(EntityId(7)));
    }

    #[test]
    fn test_target_routing() {
        assert_eq!(Target::All.for_relay(), Target::Others);
        assert_eq!(Target::AllBuffered.for_relay(), Target::OthersBuffered);
        assert_eq!(Target::Master.for_relay(), Target::Master);

        assert!(Target::AllBuffered.is_buffered());
        assert!(!Target::All.is_buffered());
        assert!(Target::All.includes_local());
        assert!(!Target::Others.includes_local());
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(Operation::TakeDamage { amount: 1.0 }.code(), OpCode::TakeDamage);
        assert_eq!(Operation::BatchProgress(SpawnerSnapshot::default()).code(), OpCode::BatchProgress);
        assert_eq!(Operation::SkillCast { slot: SkillSlot::Dash }.code(), OpCode::SkillCast);
        assert_eq!(
            Payload::Destroy { entity: EntityId(1001) }.entity(),
            EntityId(1001)
        );
    }
}
