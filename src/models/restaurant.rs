use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

/// Per-item kitchen timing, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrepProfile {
    #[serde(default)]
    pub base_minutes: f64,
    #[serde(default)]
    pub ingredient_prep_minutes: f64,
    #[serde(default)]
    pub cook_minutes: f64,
    #[serde(default)]
    pub plating_minutes: f64,
    #[serde(default = "default_complexity")]
    pub complexity_multiplier: f64,
}

fn default_complexity() -> f64 {
    1.0
}

impl PrepProfile {
    pub fn total_minutes(&self) -> f64 {
        self.base_minutes + self.ingredient_prep_minutes + self.cook_minutes + self.plating_minutes
    }

    /// Step minutes finite and non-negative, multiplier finite and positive.
    pub fn is_valid(&self) -> bool {
        let steps = [
            self.base_minutes,
            self.ingredient_prep_minutes,
            self.cook_minutes,
            self.plating_minutes,
        ];
        steps.iter().all(|minutes| minutes.is_finite() && *minutes >= 0.0)
            && self.complexity_multiplier.is_finite()
            && self.complexity_multiplier > 0.0
    }
}

impl Default for PrepProfile {
    fn default() -> Self {
        // Conservative profile for items a kitchen has not described.
        Self {
            base_minutes: 5.0,
            ingredient_prep_minutes: 5.0,
            cook_minutes: 10.0,
            plating_minutes: 2.0,
            complexity_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    pub available_quantity: u32,
    #[serde(default)]
    pub prep: PrepProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub is_active: bool,
    pub menu: Vec<MenuItem>,
}

impl Restaurant {
    pub fn menu_item(&self, name: &str) -> Option<&MenuItem> {
        let wanted = normalize_item_name(name);
        self.menu
            .iter()
            .find(|item| normalize_item_name(&item.name) == wanted)
    }
}

pub fn normalize_item_name(name: &str) -> String {
    name.trim().to_lowercase()
}
