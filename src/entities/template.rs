use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::combat::buffs::{BuffCard, BuffCatalog, BuffId};
use crate::combat::damage::{DamageClass, Element};
use crate::combat::modifiers::Modifier;
use crate::combat::resolver::{AbilityProfile, AttackProfile, DefenseProfile, ElementResistances};
use crate::entities::creature::{
    AbilityId, EntityKind, Faction, ItemId, MapInstanceKind, MonsterType, TemplateId,
};
use crate::error::{Result, SimError};

fn one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_basic_range() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityTemplate {
    pub id: AbilityId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: DamageClass,
    #[serde(default)]
    pub element: Element,
    #[serde(default)]
    pub target_type: u8,
    #[serde(default)]
    pub hit_type: u8,
    #[serde(default)]
    pub range: u8,
    #[serde(default)]
    pub target_range: u8,
    #[serde(default)]
    pub mp_cost: i32,
    /// Tenths of a second.
    #[serde(default)]
    pub cooldown: u16,
    /// Tenths of a second.
    #[serde(default)]
    pub cast_time: u16,
    #[serde(default)]
    pub cast_effect: u16,
    #[serde(default)]
    pub cast_animation: u16,
    #[serde(default)]
    pub attack_animation: u16,
    #[serde(default)]
    pub effect: u16,
    /// Folded into the caster's modifiers for the resolution only.
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Applied to whatever the ability strikes.
    #[serde(default)]
    pub buffs: Vec<BuffId>,
}

impl AbilityTemplate {
    pub fn new(id: AbilityId, class: DamageClass) -> Self {
        Self {
            id,
            name: String::new(),
            class,
            element: Element::None,
            target_type: 0,
            hit_type: 0,
            range: 0,
            target_range: 0,
            mp_cost: 0,
            cooldown: 0,
            cast_time: 0,
            cast_effect: 0,
            cast_animation: 0,
            attack_animation: 0,
            effect: 0,
            modifiers: Vec::new(),
            buffs: Vec::new(),
        }
    }

    pub fn profile(&self) -> AbilityProfile {
        AbilityProfile {
            class: self.class,
            element: self.element,
        }
    }

    pub fn is_area(&self) -> bool {
        self.range > 0 || self.target_range > 0
    }

    /// Self-centred skills fire without waiting for range.
    pub fn casts_immediately(&self) -> bool {
        self.target_type == 1 && self.hit_type == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootEntry {
    pub item: ItemId,
    #[serde(default = "one")]
    pub amount: u32,
    /// Per 100 000 at drop rate 1.
    pub chance: u32,
    /// Empty means any instance kind.
    #[serde(default)]
    pub map_kinds: Vec<MapInstanceKind>,
}

impl LootEntry {
    pub fn allowed_on(&self, kind: MapInstanceKind) -> bool {
        self.map_kinds.is_empty() || self.map_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub monster_type: MonsterType,
    #[serde(default)]
    pub faction: Faction,
    pub level: u16,
    pub max_hp: i32,
    #[serde(default)]
    pub max_mp: i32,
    #[serde(default)]
    pub xp: u64,
    #[serde(default)]
    pub attack: AttackProfile,
    #[serde(default)]
    pub attack_class: DamageClass,
    #[serde(default)]
    pub element: Element,
    #[serde(default)]
    pub element_rate: i32,
    #[serde(default)]
    pub defense: DefenseProfile,
    #[serde(default)]
    pub resistances: ElementResistances,
    #[serde(default)]
    pub speed: u8,
    #[serde(default)]
    pub notice_range: u8,
    #[serde(default = "default_basic_range")]
    pub basic_range: u8,
    #[serde(default)]
    pub basic_cooldown: u16,
    #[serde(default)]
    pub basic_effect: u16,
    /// Tenths of a second; zero disables respawn for inheriting spawns.
    #[serde(default)]
    pub respawn_time: u32,
    #[serde(default)]
    pub hostile: bool,
    #[serde(default = "default_true")]
    pub can_walk: bool,
    #[serde(default)]
    pub no_aggro_icon: bool,
    #[serde(default)]
    pub abilities: Vec<AbilityId>,
    #[serde(default)]
    pub loot: Vec<LootEntry>,
    /// Buff cards applied on spawn and on every respawn.
    #[serde(default)]
    pub cards: Vec<BuffId>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

impl EntityTemplate {
    pub fn new(id: TemplateId, level: u16, max_hp: i32) -> Self {
        Self {
            id,
            name: String::new(),
            kind: EntityKind::Monster,
            monster_type: MonsterType::Normal,
            faction: Faction::Neutral,
            level,
            max_hp,
            max_mp: 0,
            xp: 0,
            attack: AttackProfile::default(),
            attack_class: DamageClass::Melee,
            element: Element::None,
            element_rate: 0,
            defense: DefenseProfile::default(),
            resistances: ElementResistances::default(),
            speed: 0,
            notice_range: 0,
            basic_range: 1,
            basic_cooldown: 0,
            basic_effect: 0,
            respawn_time: 0,
            hostile: false,
            can_walk: true,
            no_aggro_icon: false,
            abilities: Vec::new(),
            loot: Vec::new(),
            cards: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    pub fn attack_profile(&self) -> AttackProfile {
        let level = i32::from(self.level);
        if self.attack.max_hit == 0 {
            return AttackProfile {
                min_hit: level * 8,
                max_hit: level * 12,
                hit_rate: level / 2 + 1,
                crit_chance: 10,
                crit_rate: 120,
                upgrade: self.attack.upgrade,
            };
        }
        AttackProfile {
            crit_rate: self.attack.crit_rate - 30,
            ..self.attack
        }
    }

    pub fn basic_ability(&self) -> AbilityProfile {
        AbilityProfile {
            class: self.attack_class,
            element: self.element,
        }
    }

    pub fn respawn_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.respawn_time) * 100)
    }
}

#[derive(Debug, Default)]
pub struct TemplateIndex {
    templates: HashMap<TemplateId, Arc<EntityTemplate>>,
    abilities: HashMap<AbilityId, Arc<AbilityTemplate>>,
    buffs: HashMap<BuffId, Arc<BuffCard>>,
}

impl TemplateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_template(&mut self, template: EntityTemplate) {
        self.templates.insert(template.id, Arc::new(template));
    }

    pub fn insert_ability(&mut self, ability: AbilityTemplate) {
        self.abilities.insert(ability.id, Arc::new(ability));
    }

    pub fn insert_buff(&mut self, card: BuffCard) {
        self.buffs.insert(card.id, Arc::new(card));
    }

    pub fn template(&self, id: TemplateId) -> Result<Arc<EntityTemplate>> {
        self.templates
            .get(&id)
            .cloned()
            .ok_or(SimError::UnknownTemplate(id))
    }

    pub fn ability(&self, id: AbilityId) -> Option<Arc<AbilityTemplate>> {
        self.abilities.get(&id).cloned()
    }

    pub fn abilities_of(&self, template: &EntityTemplate) -> Vec<Arc<AbilityTemplate>> {
        template
            .abilities
            .iter()
            .filter_map(|id| {
                let ability = self.ability(*id);
                if ability.is_none() {
                    tracing::warn!(template = %template.id, ability = %id, "unknown ability on template");
                }
                ability
            })
            .collect()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn ability_count(&self) -> usize {
        self.abilities.len()
    }

    pub fn buff_count(&self) -> usize {
        self.buffs.len()
    }
}

impl BuffCatalog for TemplateIndex {
    fn buff_card(&self, id: BuffId) -> Option<Arc<BuffCard>> {
        self.buffs.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_fallback_uses_level() {
        let template = EntityTemplate::new(TemplateId(1), 20, 500);
        let profile = template.attack_profile();
        assert_eq!((profile.min_hit, profile.max_hit), (160, 240));
        assert_eq!(profile.hit_rate, 11);
        assert_eq!((profile.crit_chance, profile.crit_rate), (10, 120));
    }

    #[test]
    fn configured_profile_lowers_crit_rate() {
        let mut template = EntityTemplate::new(TemplateId(1), 20, 500);
        template.attack = AttackProfile {
            min_hit: 10,
            max_hit: 20,
            hit_rate: 30,
            crit_chance: 5,
            crit_rate: 150,
            upgrade: 2,
        };
        let profile = template.attack_profile();
        assert_eq!(profile.crit_rate, 120);
        assert_eq!(profile.max_hit, 20);
        assert_eq!(profile.upgrade, 2);
    }

    #[test]
    fn unknown_template_is_an_error() {
        let mut index = TemplateIndex::new();
        index.insert_template(EntityTemplate::new(TemplateId(3), 1, 10));
        assert!(index.template(TemplateId(3)).is_ok());
        assert!(matches!(
            index.template(TemplateId(4)),
            Err(SimError::UnknownTemplate(TemplateId(4)))
        ));
    }

    #[test]
    fn loot_restrictions() {
        let entry = LootEntry {
            item: ItemId(1),
            amount: 1,
            chance: 100,
            map_kinds: vec![MapInstanceKind::Raid],
        };
        assert!(entry.allowed_on(MapInstanceKind::Raid));
        assert!(!entry.allowed_on(MapInstanceKind::Base));
    }

    #[test]
    fn template_reads_from_yaml_with_defaults() {
        let yaml = "
id: 24
name: Kenko
level: 12
max_hp: 300
hostile: true
respawn_time: 50
loot:
  - { item: 2, chance: 4000 }
";
        let template: EntityTemplate = serde_yaml::from_str(yaml).expect("valid template");
        assert_eq!(template.respawn_delay(), Duration::from_secs(5));
        assert!(template.can_walk);
        assert_eq!(template.basic_range, 1);
        assert_eq!(template.loot[0].amount, 1);
    }
}
