pub mod buffs;
pub mod damage;
pub mod modifiers;
pub mod resolver;
pub mod rules;
