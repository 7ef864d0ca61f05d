use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    AttackPower,
    Damage,
    Defence,
    DodgeAndDefencePercent,
    Morale,
    Critical,
    Element,
    ElementResistance,
    Item,
    IncreaseDamage,
    StealBuff,
    SpecialDefence,
    SpecialAttack,
    Move,
}

/// Sub-type codes per card kind. Increase/decrease pairs share a tens digit.
pub mod sub {
    pub mod attack_power {
        pub const ALL_INCREASED: u8 = 11;
        pub const ALL_DECREASED: u8 = 12;
        pub const MELEE_INCREASED: u8 = 21;
        pub const MELEE_DECREASED: u8 = 22;
        pub const RANGED_INCREASED: u8 = 31;
        pub const RANGED_DECREASED: u8 = 32;
        pub const MAGIC_INCREASED: u8 = 41;
        pub const MAGIC_DECREASED: u8 = 42;
    }

    pub mod damage {
        pub const ALL_INCREASED: u8 = 11;
        pub const ALL_DECREASED: u8 = 12;
        pub const MELEE_INCREASED: u8 = 21;
        pub const MELEE_DECREASED: u8 = 22;
        pub const RANGED_INCREASED: u8 = 31;
        pub const RANGED_DECREASED: u8 = 32;
        pub const MAGIC_INCREASED: u8 = 41;
        pub const MAGIC_DECREASED: u8 = 42;
    }

    pub mod defence {
        pub const ALL_INCREASED: u8 = 11;
        pub const ALL_DECREASED: u8 = 12;
        pub const MELEE_INCREASED: u8 = 21;
        pub const MELEE_DECREASED: u8 = 22;
        pub const RANGED_INCREASED: u8 = 31;
        pub const RANGED_DECREASED: u8 = 32;
        pub const MAGIC_INCREASED: u8 = 41;
        pub const MAGIC_DECREASED: u8 = 42;
        pub const LEVEL_INCREASED: u8 = 51;
        pub const LEVEL_DECREASED: u8 = 52;
    }

    pub mod dodge {
        pub const DODGE_INCREASED: u8 = 11;
        pub const DODGE_DECREASED: u8 = 12;
    }

    pub mod morale {
        pub const INCREASED: u8 = 11;
        pub const DECREASED: u8 = 12;
    }

    pub mod critical {
        pub const INFLICTING_INCREASED: u8 = 11;
        pub const INFLICTING_REDUCED: u8 = 12;
        pub const RECEIVING_INCREASED: u8 = 21;
        pub const RECEIVING_DECREASED: u8 = 22;
        pub const DAMAGE_INCREASED: u8 = 31;
        pub const DAMAGE_REDUCED: u8 = 32;
        pub const DAMAGE_FROM_CRITICAL_INCREASED: u8 = 41;
        pub const DAMAGE_FROM_CRITICAL_DECREASED: u8 = 42;
    }

    /// Shared by `Element` (flat elemental damage) and `ElementResistance`.
    pub mod element {
        pub const ALL_INCREASED: u8 = 11;
        pub const ALL_DECREASED: u8 = 12;
        pub const FIRE_INCREASED: u8 = 21;
        pub const FIRE_DECREASED: u8 = 22;
        pub const WATER_INCREASED: u8 = 31;
        pub const WATER_DECREASED: u8 = 32;
        pub const LIGHT_INCREASED: u8 = 41;
        pub const LIGHT_DECREASED: u8 = 42;
        pub const DARK_INCREASED: u8 = 51;
        pub const DARK_DECREASED: u8 = 52;
    }

    pub mod item {
        pub const ATTACK_INCREASED: u8 = 11;
        pub const EXP_INCREASED: u8 = 21;
        pub const GOLD_INCREASED: u8 = 31;
    }

    pub mod increase_damage {
        pub const PROBABILITY: u8 = 11;
    }

    pub mod steal_buff {
        pub const CHANCE_SUMMON_DRAGON: u8 = 11;
    }

    pub mod special_defence {
        pub const ALL_NULLIFIED: u8 = 11;
    }

    pub mod special_attack {
        pub const NO_ATTACK: u8 = 11;
    }

    pub mod movement {
        pub const IMPOSSIBLE: u8 = 11;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub kind: CardKind,
    pub sub_type: u8,
    #[serde(default)]
    pub first: i32,
    #[serde(default)]
    pub second: i32,
    #[serde(default)]
    pub level_scaled: bool,
    #[serde(default)]
    pub level_divided: bool,
    /// Only counts once the owning buff's activation delay has elapsed.
    #[serde(default)]
    pub delayed: bool,
}

impl Modifier {
    pub fn new(kind: CardKind, sub_type: u8, first: i32) -> Self {
        Self {
            kind,
            sub_type,
            first,
            second: 0,
            level_scaled: false,
            level_divided: false,
            delayed: false,
        }
    }

    pub fn with_second(mut self, second: i32) -> Self {
        self.second = second;
        self
    }

    pub fn level_scaled(mut self, divided: bool) -> Self {
        self.level_scaled = true;
        self.level_divided = divided;
        self
    }

    pub fn first_for_level(&self, level: u16) -> i32 {
        if !self.level_scaled {
            return self.first;
        }
        let level = i32::from(level);
        if self.level_divided {
            if self.first == 0 {
                0
            } else {
                level / self.first
            }
        } else {
            self.first.saturating_mul(level)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierTotal {
    pub first: i32,
    pub second: i32,
    pub count: u32,
}

/// Built from equipment, transient ability cards and active buffs, then only read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifierSnapshot {
    totals: HashMap<(CardKind, u8), ModifierTotal>,
}

impl ModifierSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_modifiers<'a>(modifiers: impl IntoIterator<Item = &'a Modifier>, level: u16) -> Self {
        let mut snapshot = Self::new();
        snapshot.extend(modifiers, level);
        snapshot
    }

    pub fn add(&mut self, modifier: &Modifier, level: u16) {
        let total = self
            .totals
            .entry((modifier.kind, modifier.sub_type))
            .or_default();
        total.first = total.first.saturating_add(modifier.first_for_level(level));
        total.second = total.second.saturating_add(modifier.second);
        total.count += 1;
    }

    pub fn extend<'a>(&mut self, modifiers: impl IntoIterator<Item = &'a Modifier>, level: u16) {
        for modifier in modifiers {
            self.add(modifier, level);
        }
    }

    pub fn with_transient(&self, modifiers: &[Modifier], level: u16) -> Self {
        let mut snapshot = self.clone();
        snapshot.extend(modifiers, level);
        snapshot
    }

    pub fn get(&self, kind: CardKind, sub_type: u8) -> ModifierTotal {
        self.totals
            .get(&(kind, sub_type))
            .copied()
            .unwrap_or_default()
    }

    pub fn value(&self, kind: CardKind, sub_type: u8) -> i32 {
        self.get(kind, sub_type).first
    }

    /// `increased - decreased` for a paired sub-type.
    pub fn net(&self, kind: CardKind, increased: u8, decreased: u8) -> i32 {
        self.value(kind, increased)
            .saturating_sub(self.value(kind, decreased))
    }

    pub fn has(&self, kind: CardKind, sub_type: u8) -> bool {
        self.get(kind, sub_type).count > 0
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_first_and_second_per_pair() {
        let modifiers = [
            Modifier::new(CardKind::AttackPower, sub::attack_power::ALL_INCREASED, 10),
            Modifier::new(CardKind::AttackPower, sub::attack_power::ALL_INCREASED, 5).with_second(3),
            Modifier::new(CardKind::AttackPower, sub::attack_power::ALL_DECREASED, 4),
        ];
        let snapshot = ModifierSnapshot::from_modifiers(&modifiers, 1);
        let total = snapshot.get(CardKind::AttackPower, sub::attack_power::ALL_INCREASED);
        assert_eq!(total.first, 15);
        assert_eq!(total.second, 3);
        assert_eq!(total.count, 2);
        assert_eq!(
            snapshot.net(
                CardKind::AttackPower,
                sub::attack_power::ALL_INCREASED,
                sub::attack_power::ALL_DECREASED
            ),
            11
        );
    }

    #[test]
    fn level_scaling_multiplies_or_divides() {
        let scaled = Modifier::new(CardKind::Morale, sub::morale::INCREASED, 3).level_scaled(false);
        let divided = Modifier::new(CardKind::Morale, sub::morale::INCREASED, 4).level_scaled(true);
        assert_eq!(scaled.first_for_level(20), 60);
        assert_eq!(divided.first_for_level(22), 5);

        let broken = Modifier::new(CardKind::Morale, sub::morale::INCREASED, 0).level_scaled(true);
        assert_eq!(broken.first_for_level(50), 0);
    }

    #[test]
    fn transient_cards_do_not_touch_the_base_snapshot() {
        let base = ModifierSnapshot::from_modifiers(
            &[Modifier::new(CardKind::Damage, sub::damage::ALL_INCREASED, 10)],
            1,
        );
        let with_skill = base.with_transient(
            &[Modifier::new(CardKind::Damage, sub::damage::ALL_INCREASED, 5)],
            1,
        );
        assert_eq!(base.value(CardKind::Damage, sub::damage::ALL_INCREASED), 10);
        assert_eq!(with_skill.value(CardKind::Damage, sub::damage::ALL_INCREASED), 15);
    }

    #[test]
    fn has_reports_presence_even_with_zero_payload() {
        let snapshot = ModifierSnapshot::from_modifiers(
            &[Modifier::new(
                CardKind::SpecialDefence,
                sub::special_defence::ALL_NULLIFIED,
                0,
            )],
            1,
        );
        assert!(snapshot.has(CardKind::SpecialDefence, sub::special_defence::ALL_NULLIFIED));
        assert!(!snapshot.has(CardKind::SpecialAttack, sub::special_attack::NO_ATTACK));
    }
}
