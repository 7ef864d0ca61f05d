use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use serde::{Deserialize, Serialize};

use crate::combat::buffs::BuffSet;
use crate::combat::damage::{CombatSide, DamageClass, Element};
use crate::combat::modifiers::{sub, CardKind, Modifier, ModifierSnapshot};
use crate::combat::resolver::{
    AttackProfile, AttackerSnapshot, DefenderSnapshot, DefenseProfile, ElementResistances,
};
use crate::combat::rules::CombatRules;
use crate::entities::creature::{CharacterId, Faction, MapInstanceId};
use crate::entities::stats::Resources;
use crate::entities::template::AbilityTemplate;
use crate::error::Result;
use crate::world::events::ServerEvent;
use crate::world::position::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassType {
    #[default]
    Adventurer,
    Swordsman,
    Archer,
    Magician,
}

impl ClassType {
    fn uses_secondary(self, class: DamageClass) -> bool {
        match class {
            DamageClass::Melee => self == ClassType::Archer,
            DamageClass::Ranged => matches!(
                self,
                ClassType::Swordsman | ClassType::Adventurer | ClassType::Magician
            ),
            DamageClass::Magic => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fallback {
    pub instance: MapInstanceId,
    pub cell: Cell,
}

/// Mutable per-character state. Always accessed through [`PlayerSession::with_state`].
#[derive(Debug)]
pub struct CharacterState {
    pub id: CharacterId,
    pub name: String,
    pub class: ClassType,
    pub level: u16,
    pub resources: Resources,
    pub instance: Option<MapInstanceId>,
    pub cell: Cell,
    pub faction: Faction,
    pub invisible: bool,
    pub gm_invisible: bool,
    pub god_mode: bool,
    pub sitting: bool,
    pub main_weapon: AttackProfile,
    pub secondary_weapon: AttackProfile,
    pub defense: DefenseProfile,
    pub element: Element,
    pub element_rate: i32,
    pub resistances: ElementResistances,
    pub equipment: Vec<Modifier>,
    pub buffs: BuffSet,
    pub experience: u64,
    pub fallback: Option<Fallback>,
}

impl CharacterState {
    pub fn new(id: CharacterId, name: impl Into<String>, class: ClassType, level: u16) -> Self {
        Self {
            id,
            name: name.into(),
            class,
            level,
            resources: Resources::full(100, 100),
            instance: None,
            cell: Cell::default(),
            faction: Faction::Neutral,
            invisible: false,
            gm_invisible: false,
            god_mode: false,
            sitting: false,
            main_weapon: AttackProfile::default(),
            secondary_weapon: AttackProfile::default(),
            defense: DefenseProfile::default(),
            element: Element::None,
            element_rate: 0,
            resistances: ElementResistances::default(),
            equipment: Vec::new(),
            buffs: BuffSet::new(),
            experience: 0,
            fallback: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.resources.is_depleted()
    }

    pub fn is_targetable(&self) -> bool {
        self.is_alive() && !self.invisible && !self.gm_invisible
    }

    pub fn modifiers(&self, now: Instant) -> ModifierSnapshot {
        let mut snapshot = ModifierSnapshot::from_modifiers(&self.equipment, self.level);
        self.buffs.contribute(&mut snapshot, now);
        snapshot
    }

    pub fn morale(&self, modifiers: &ModifierSnapshot) -> i32 {
        i32::from(self.level)
            + modifiers.net(CardKind::Morale, sub::morale::INCREASED, sub::morale::DECREASED)
    }

    pub fn attacker_snapshot(
        &self,
        ability: &AbilityTemplate,
        rules: &CombatRules,
        now: Instant,
    ) -> AttackerSnapshot {
        let modifiers = self
            .modifiers(now)
            .with_transient(&ability.modifiers, self.level);
        let mut profile = if self.class.uses_secondary(ability.class) {
            self.secondary_weapon
        } else {
            self.main_weapon
        };
        profile.hit_rate += self.morale(&modifiers);
        let base_bonus = if self.class == ClassType::Adventurer {
            rules.adventurer_bonus
        } else {
            0
        };
        AttackerSnapshot {
            side: CombatSide::Character,
            level: self.level,
            profile,
            element: self.element,
            element_rate: self.element_rate,
            base_bonus,
            god_mode: self.god_mode,
            cell: self.cell,
            modifiers,
        }
    }

    pub fn defender_snapshot(&self, now: Instant) -> DefenderSnapshot {
        DefenderSnapshot {
            level: self.level,
            defense: self.defense,
            element: self.element,
            resistances: self.resistances,
            cell: self.cell,
            modifiers: self.modifiers(now),
        }
    }

    pub fn stat_update(&self) -> ServerEvent {
        ServerEvent::StatUpdate {
            character: self.id,
            hp: self.resources.hp,
            max_hp: self.resources.max_hp,
            mp: self.resources.mp,
            max_mp: self.resources.max_mp,
        }
    }
}

/// State mutations from the network thread and from entity ticks are
/// serialized by the per-session lock. Outbound events go through a lock-free
/// queue that the connection drains.
#[derive(Debug)]
pub struct PlayerSession {
    id: CharacterId,
    state: Mutex<CharacterState>,
    outbox: SegQueue<ServerEvent>,
    connected: AtomicBool,
}

impl PlayerSession {
    pub fn new(state: CharacterState) -> Self {
        Self {
            id: state.id,
            state: Mutex::new(state),
            outbox: SegQueue::new(),
            connected: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> CharacterId {
        self.id
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut CharacterState) -> R) -> Result<R> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                tracing::warn!(character = %self.id, "recovering poisoned character state");
                self.state.clear_poison();
                poisoned.into_inner()
            }
        };
        Ok(f(&mut state))
    }

    pub fn send(&self, event: ServerEvent) {
        self.outbox.push(event);
    }

    pub fn drain_outbox(&self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.outbox.pop()).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
