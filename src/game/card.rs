//! Card Definitions
//!
//! Card model and the starter catalog every player's deck is built from.

use serde::{Serialize, Deserialize};

/// Card catalog identifier (e.g. `card_001`).
pub type CardId = String;

/// Broad card category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    /// Stays on the board and can attack.
    Creature,
    /// Resolves once and goes to the graveyard.
    Spell,
}

/// One-shot effect of a spell card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellEffect {
    /// Deal damage to the opposing player.
    DamageOpponent(i32),
    /// Restore the caster's health, capped at max health.
    HealSelf(i32),
}

/// A card instance in a hand, deck, board or graveyard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Catalog identifier.
    pub id: CardId,
    /// Display name.
    pub name: String,
    /// Flavor / rules text.
    pub description: String,
    /// Damage dealt when attacking or defending.
    pub attack: i32,
    /// Remaining durability; the creature dies at 0.
    pub defense: i32,
    /// Mana required to play.
    pub mana_cost: i32,
    /// Creature or spell.
    pub kind: CardKind,
    /// Spell effect (spells only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<SpellEffect>,
    /// Has attacked this turn.
    #[serde(default)]
    pub exhausted: bool,
}

impl Card {
    /// Create a creature card.
    pub fn creature(id: &str, name: &str, description: &str, attack: i32, defense: i32, mana_cost: i32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            attack,
            defense,
            mana_cost,
            kind: CardKind::Creature,
            effect: None,
            exhausted: false,
        }
    }

    /// Create a spell card.
    pub fn spell(id: &str, name: &str, description: &str, mana_cost: i32, effect: SpellEffect) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            attack: 0,
            defense: 0,
            mana_cost,
            kind: CardKind::Spell,
            effect: Some(effect),
            exhausted: false,
        }
    }

    /// Is this card a creature.
    #[inline]
    pub fn is_creature(&self) -> bool {
        self.kind == CardKind::Creature
    }

    /// Is this creature destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.is_creature() && self.defense <= 0
    }
}

/// The starter catalog.
pub fn starter_catalog() -> Vec<Card> {
    vec![
        Card::creature("card_001", "Fire Elemental", "A powerful fire creature", 5, 3, 4),
        Card::creature("card_002", "Water Spirit", "A mystical water being", 3, 5, 3),
        Card::spell("card_003", "Lightning Bolt", "Deal 3 damage to your opponent", 2, SpellEffect::DamageOpponent(3)),
        Card::creature("card_004", "Dragon", "A mighty dragon", 8, 6, 7),
        Card::spell("card_005", "Healing Potion", "Restore 4 health", 3, SpellEffect::HealSelf(4)),
        Card::creature("card_006", "Knight", "A noble warrior", 4, 4, 4),
        Card::spell("card_007", "Magic Shield", "Restore 3 health", 2, SpellEffect::HealSelf(3)),
        Card::creature("card_008", "Goblin", "A small but fierce creature", 2, 1, 1),
        Card::creature("card_009", "Wizard", "A powerful spellcaster", 3, 2, 5),
        Card::creature("card_010", "Forest Guardian", "Protector of nature", 6, 7, 6),
    ]
}

/// Look up a catalog card by id.
pub fn catalog_card(id: &str) -> Option<Card> {
    starter_catalog().into_iter().find(|c| c.id == id)
}

/// The unshuffled starter deck (one copy of every catalog card).
pub fn starter_deck() -> Vec<Card> {
    starter_catalog()
}
