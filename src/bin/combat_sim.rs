use rand::rngs::StdRng;
use rand::SeedableRng;

use mapsim::combat::damage::{CombatSide, DamageClass, Element, HitMode};
use mapsim::combat::modifiers::ModifierSnapshot;
use mapsim::combat::resolver::{
    resolve, AbilityProfile, AttackProfile, AttackerSnapshot, DefenderSnapshot, DefenseProfile,
    ElementResistances,
};
use mapsim::combat::rules::CombatRules;
use mapsim::world::position::Cell;

#[derive(Default)]
struct Summary {
    rounds: u32,
    min: Option<i32>,
    max: i32,
    total: i64,
    misses: u32,
    crits: u32,
}

impl Summary {
    fn record(&mut self, damage: i32, mode: HitMode) {
        self.rounds += 1;
        if mode.is_miss() {
            self.misses += 1;
            return;
        }
        if matches!(mode, HitMode::Critical | HitMode::AreaCritical) {
            self.crits += 1;
        }
        self.min = Some(self.min.map_or(damage, |min| min.min(damage)));
        self.max = self.max.max(damage);
        self.total += i64::from(damage);
    }

    fn mean(&self) -> f64 {
        let landed = self.rounds - self.misses;
        if landed == 0 {
            0.0
        } else {
            self.total as f64 / f64::from(landed)
        }
    }
}

fn attacker(side: CombatSide, level: u16) -> AttackerSnapshot {
    AttackerSnapshot {
        side,
        level,
        profile: AttackProfile {
            min_hit: 120,
            max_hit: 180,
            hit_rate: 60,
            crit_chance: 15,
            crit_rate: 150,
            upgrade: 2,
        },
        element: Element::Fire,
        element_rate: 20,
        base_bonus: 0,
        god_mode: false,
        cell: Cell::new(0, 0),
        modifiers: ModifierSnapshot::new(),
    }
}

fn defender(level: u16) -> DefenderSnapshot {
    DefenderSnapshot {
        level,
        defense: DefenseProfile {
            melee: 60,
            ranged: 50,
            magic: 40,
            melee_dodge: 40,
            ranged_dodge: 30,
            upgrade: 0,
        },
        element: Element::Water,
        resistances: ElementResistances {
            water: 10,
            ..ElementResistances::default()
        },
        cell: Cell::new(2, 0),
        modifiers: ModifierSnapshot::new(),
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> T {
    args.get(index)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let rounds: u32 = parse_arg(&args, 1, 10_000);
    let seed: u64 = parse_arg(&args, 2, 1);
    let rules = CombatRules::default();

    println!("mapsim: combat sample, rounds={rounds}, seed={seed}");
    for side in [CombatSide::Character, CombatSide::Monster] {
        for class in [DamageClass::Melee, DamageClass::Ranged, DamageClass::Magic] {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut summary = Summary::default();
            let ability = AbilityProfile {
                class,
                element: Element::None,
            };
            let attacker = attacker(side, 60);
            let defender = defender(55);
            for _ in 0..rounds {
                let outcome = resolve(&attacker, &defender, &ability, &rules, &mut rng);
                summary.record(outcome.damage, outcome.hit_mode);
            }
            println!(
                "- {side:?} {class:?}: min={} max={} mean={:.1} misses={} crits={}",
                summary.min.unwrap_or(0),
                summary.max,
                summary.mean(),
                summary.misses,
                summary.crits
            );
        }
    }
}
