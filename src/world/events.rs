use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entities::creature::{
    AbilityId, CharacterId, DropId, EntityId, ItemId, MapInstanceId, TemplateId,
};
use crate::world::position::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Character(CharacterId),
    Entity(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    EntityAppeared {
        entity: EntityId,
        template: TemplateId,
        cell: Cell,
        hp_percent: u8,
        mp_percent: u8,
        quiet: bool,
    },
    EntityRemoved {
        entity: EntityId,
    },
    EntityMoved {
        entity: EntityId,
        cell: Cell,
        speed: u8,
    },
    Effect {
        actor: Actor,
        effect: u16,
    },
    CastStarted {
        caster: Actor,
        target: Actor,
        ability: AbilityId,
        animation: u16,
        effect: u16,
    },
    Hit {
        attacker: Actor,
        target: Actor,
        ability: Option<AbilityId>,
        cooldown: u16,
        animation: u16,
        effect: u16,
        cell: Cell,
        target_alive: bool,
        hp_percent: u8,
        damage: i32,
        hit_mode: u8,
    },
    HitCancelled {
        entity: EntityId,
    },
    BossHealth {
        entity: EntityId,
        hp: i32,
        max_hp: i32,
    },
    SummonAppeared {
        owner: CharacterId,
        cell: Cell,
    },
    DropAppeared {
        drop: DropId,
        item: ItemId,
        amount: u32,
        cell: Cell,
        owner: Option<CharacterId>,
    },
    ItemThrown {
        drop: DropId,
        item: ItemId,
        amount: u32,
        from: Cell,
        to: Cell,
    },
    DropRemoved {
        drop: DropId,
    },
    ExperienceGained {
        character: CharacterId,
        amount: u64,
    },
    NotFirstHit {
        character: CharacterId,
    },
    StatUpdate {
        character: CharacterId,
        hp: i32,
        max_hp: i32,
        mp: i32,
        max_mp: i32,
    },
    StoodUp {
        character: CharacterId,
    },
    ReviveOffer {
        character: CharacterId,
    },
    PortalOpened {
        source: Cell,
        destination: MapInstanceId,
        destination_cell: Cell,
    },
    Message {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespawnMode {
    /// Respawn when the template defines a respawn time.
    #[default]
    Inherit,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub template: TemplateId,
    /// Random walkable cell when absent.
    #[serde(default)]
    pub cell: Option<Cell>,
    #[serde(default)]
    pub hostile: Option<bool>,
    #[serde(default)]
    pub moving: Option<bool>,
    #[serde(default)]
    pub respawn: RespawnMode,
    #[serde(default)]
    pub notice_range: Option<u8>,
    #[serde(default)]
    pub target: Option<CharacterId>,
    #[serde(default)]
    pub is_boss: bool,
    #[serde(default)]
    pub is_bonus: bool,
    #[serde(default)]
    pub is_target: bool,
    #[serde(default)]
    pub on_death: Vec<InstanceEvent>,
    #[serde(default)]
    pub on_notice: Vec<InstanceEvent>,
}

impl SpawnSpec {
    pub fn at(template: TemplateId, cell: Cell) -> Self {
        Self {
            template,
            cell: Some(cell),
            hostile: None,
            moving: None,
            respawn: RespawnMode::Inherit,
            notice_range: None,
            target: None,
            is_boss: false,
            is_bonus: false,
            is_target: false,
            on_death: Vec::new(),
            on_notice: Vec::new(),
        }
    }

    pub fn summoned(mut self) -> Self {
        self.respawn = RespawnMode::Never;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceEvent {
    Spawn(Vec<SpawnSpec>),
    DespawnTemplate(TemplateId),
    Message(String),
    ThrowItems {
        /// Scatter around this entity; skipped when it is gone.
        around: EntityId,
        item: ItemId,
        count: u8,
        min_amount: u32,
        max_amount: u32,
    },
}

/// Recurring hook list. The first `offset` due repetitions are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveEvent {
    #[serde(with = "secs")]
    pub delay: Duration,
    #[serde(default)]
    pub offset: u8,
    pub events: Vec<InstanceEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    pub source: Cell,
    pub destination: MapInstanceId,
    pub destination_cell: Cell,
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_events_read_from_yaml() {
        let yaml = "
delay: 30
offset: 1
events:
  - message: incoming
  - spawn:
      - template: 7
        cell: { x: 3, y: 4 }
        is_bonus: true
  - despawn_template: 9
";
        let wave: WaveEvent = serde_yaml::from_str(yaml).expect("valid wave");
        assert_eq!(wave.delay, Duration::from_secs(30));
        assert_eq!(wave.offset, 1);
        assert_eq!(wave.events.len(), 3);
        match &wave.events[1] {
            InstanceEvent::Spawn(specs) => {
                assert_eq!(specs[0].template, TemplateId(7));
                assert_eq!(specs[0].cell, Some(Cell::new(3, 4)));
                assert!(specs[0].is_bonus);
                assert_eq!(specs[0].respawn, RespawnMode::Inherit);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
