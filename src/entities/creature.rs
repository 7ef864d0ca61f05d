use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapInstanceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbilityId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DropId(pub u64);

macro_rules! display_id {
    ($($ty:ident => $prefix:literal),* $(,)?) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        })*
    };
}

display_id!(
    EntityId => "entity",
    CharacterId => "character",
    TemplateId => "template",
    MapInstanceId => "instance",
    MapId => "map",
    ItemId => "item",
    AbilityId => "ability",
    DropId => "drop",
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Monster,
    Npc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonsterType {
    #[default]
    Normal,
    Elite,
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    #[default]
    Neutral,
    Angel,
    Demon,
}

impl Faction {
    /// Whether an entity of faction `self` may pick a character of `other` as target.
    pub fn can_engage(self, other: Faction) -> bool {
        match self {
            Faction::Neutral => true,
            _ => self != other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapInstanceKind {
    #[default]
    Base,
    Raid,
    Arena,
    TimeSpace,
    Lod,
    Family,
}

impl MapInstanceKind {
    pub fn drops_gold(self) -> bool {
        matches!(self, MapInstanceKind::Base | MapInstanceKind::TimeSpace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_engages_everyone_and_factions_spare_their_own() {
        assert!(Faction::Neutral.can_engage(Faction::Angel));
        assert!(Faction::Neutral.can_engage(Faction::Neutral));
        assert!(Faction::Demon.can_engage(Faction::Angel));
        assert!(!Faction::Angel.can_engage(Faction::Angel));
    }

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(EntityId(7).to_string(), "entity#7");
        assert_eq!(MapInstanceId(2).to_string(), "instance#2");
    }
}
