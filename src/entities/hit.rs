use std::sync::Arc;

use crate::entities::player::PlayerSession;
use crate::entities::template::AbilityTemplate;
use crate::world::position::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHitKind {
    Single,
    Combo { animation: u16, effect: u16 },
    /// One target struck by an area skill.
    SingleArea { show_target_animation: bool },
    /// One of several targets around the attacker.
    Area,
    /// One of several targets around `target_cell`.
    Zone,
    SpecialZone,
}

impl TargetHitKind {
    pub fn is_area(self) -> bool {
        matches!(
            self,
            TargetHitKind::Area | TargetHitKind::Zone | TargetHitKind::SpecialZone
        )
    }
}

/// Built on the attacker's thread and consumed once by the target's tick.
#[derive(Debug, Clone)]
pub struct HitRequest {
    pub attacker: Arc<PlayerSession>,
    pub ability: Arc<AbilityTemplate>,
    pub kind: TargetHitKind,
    pub effect: u16,
    pub target_cell: Option<Cell>,
}

impl HitRequest {
    pub fn single(attacker: Arc<PlayerSession>, ability: Arc<AbilityTemplate>) -> Self {
        let effect = ability.effect;
        Self {
            attacker,
            ability,
            kind: TargetHitKind::Single,
            effect,
            target_cell: None,
        }
    }

    pub fn with_kind(mut self, kind: TargetHitKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn at(mut self, cell: Cell) -> Self {
        self.target_cell = Some(cell);
        self
    }

    pub fn visuals(&self) -> (u16, u16) {
        match self.kind {
            TargetHitKind::Combo { animation, effect } => (animation, effect),
            TargetHitKind::SingleArea {
                show_target_animation: false,
            } => (self.ability.attack_animation, 0),
            _ => (self.ability.attack_animation, self.effect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::damage::DamageClass;
    use crate::entities::creature::{AbilityId, CharacterId};
    use crate::entities::player::{CharacterState, ClassType};

    #[test]
    fn combo_visuals_override_the_ability() {
        let session = Arc::new(PlayerSession::new(CharacterState::new(
            CharacterId(1),
            "c",
            ClassType::Swordsman,
            5,
        )));
        let mut ability = AbilityTemplate::new(AbilityId(3), DamageClass::Melee);
        ability.attack_animation = 11;
        ability.effect = 22;
        let request = HitRequest::single(session, Arc::new(ability));
        assert_eq!(request.visuals(), (11, 22));

        let combo = request.clone().with_kind(TargetHitKind::Combo {
            animation: 7,
            effect: 8,
        });
        assert_eq!(combo.visuals(), (7, 8));
        assert!(!combo.kind.is_area());
        assert!(request.with_kind(TargetHitKind::Zone).kind.is_area());
    }
}
