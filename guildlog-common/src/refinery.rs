//! Fixed-ratio refinery conversions
//!
//! Production is counted in whole batches ("units"). Partial batches are
//! dropped, never rounded up, and with several ingredients the scarcest one
//! caps the batch count.

use crate::normalize::normalize;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One ingredient of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeInput {
    pub resource: String,
    /// Quantity consumed per batch at the standard rate
    pub per_unit: u64,
    /// Quantity consumed per batch when the discounted rate applies
    #[serde(default)]
    pub discounted_per_unit: Option<u64>,
}

impl RecipeInput {
    pub fn new(resource: &str, per_unit: u64) -> Self {
        Self {
            resource: resource.to_string(),
            per_unit,
            discounted_per_unit: None,
        }
    }

    pub fn with_discount(mut self, discounted_per_unit: u64) -> Self {
        self.discounted_per_unit = Some(discounted_per_unit);
        self
    }

    fn ratio(&self, discounted: bool) -> u64 {
        if discounted {
            self.discounted_per_unit.unwrap_or(self.per_unit)
        } else {
            self.per_unit
        }
    }
}

/// Static conversion recipe: inputs per batch → output per batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecipe {
    pub name: String,
    pub output: String,
    pub output_per_unit: u64,
    pub inputs: Vec<RecipeInput>,
}

impl ConversionRecipe {
    /// Spice → Melange: 10000 Spice (7500 discounted) per 200 Melange
    pub fn spice_to_melange() -> Self {
        Self {
            name: "melange".into(),
            output: "melange".into(),
            output_per_unit: 200,
            inputs: vec![RecipeInput::new("spice", 10_000).with_discount(7_500)],
        }
    }

    /// Stravidium 3 + Titanium 4 → Plastanium 1
    pub fn plastanium() -> Self {
        Self {
            name: "plastanium".into(),
            output: "plastanium".into(),
            output_per_unit: 1,
            inputs: vec![
                RecipeInput::new("stravidium", 3),
                RecipeInput::new("titanium", 4),
            ],
        }
    }

    pub fn is_single_input(&self) -> bool {
        self.inputs.len() == 1
    }

    fn validate(&self, discounted: bool) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::AmbiguousRecipe(format!("'{}' has no inputs", self.name)));
        }
        if self.output_per_unit == 0 {
            return Err(Error::AmbiguousRecipe(format!(
                "'{}' produces nothing per batch",
                self.name
            )));
        }
        if let Some(input) = self.inputs.iter().find(|i| i.ratio(discounted) == 0) {
            return Err(Error::AmbiguousRecipe(format!(
                "'{}' has no ratio for input '{}'",
                self.name, input.resource
            )));
        }
        if discounted && self.inputs.iter().all(|i| i.discounted_per_unit.is_none()) {
            return Err(Error::AmbiguousRecipe(format!(
                "'{}' has no discounted ratio",
                self.name
            )));
        }
        Ok(())
    }
}

/// Result of running a recipe over available inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub units: u64,
    pub output_quantity: u64,
    /// Input actually consumed by the produced batches, per ingredient
    pub consumed: Vec<(String, u64)>,
    /// Input left over after the last whole batch, per ingredient
    pub leftover: Vec<(String, u64)>,
}

/// Convert an aggregated quantity through a single-input recipe
///
/// Returns the output quantity: `floor(input / per_unit) * output_per_unit`.
pub fn convert(aggregated_input: u64, recipe: &ConversionRecipe, discounted: bool) -> Result<u64> {
    if !recipe.is_single_input() {
        return Err(Error::AmbiguousRecipe(format!(
            "'{}' needs {} inputs",
            recipe.name,
            recipe.inputs.len()
        )));
    }
    let resource = recipe.inputs[0].resource.clone();
    convert_inputs(&[(resource, aggregated_input)], recipe, discounted).map(|o| o.output_quantity)
}

/// Convert named input quantities through any recipe
///
/// Ingredients missing from `available` count as zero. The batch count is
/// the minimum over all ingredients of `floor(available / per_unit)`.
pub fn convert_inputs(
    available: &[(String, u64)],
    recipe: &ConversionRecipe,
    discounted: bool,
) -> Result<ConversionOutcome> {
    recipe.validate(discounted)?;

    let quantity_of = |resource: &str| -> u64 {
        let key = normalize(resource);
        available
            .iter()
            .filter(|(name, _)| normalize(name) == key)
            .map(|(_, q)| *q)
            .sum()
    };

    let units = recipe
        .inputs
        .iter()
        .map(|input| quantity_of(&input.resource) / input.ratio(discounted))
        .min()
        .unwrap_or(0);

    let consumed: Vec<(String, u64)> = recipe
        .inputs
        .iter()
        .map(|input| (input.resource.clone(), units * input.ratio(discounted)))
        .collect();
    let leftover = recipe
        .inputs
        .iter()
        .zip(consumed.iter())
        .map(|(input, (_, used))| (input.resource.clone(), quantity_of(&input.resource) - used))
        .collect();

    let output_quantity = units * recipe.output_per_unit;
    debug!(
        recipe = %recipe.name,
        units,
        output_quantity,
        discounted,
        "Recipe applied"
    );

    Ok(ConversionOutcome {
        units,
        output_quantity,
        consumed,
        leftover,
    })
}

/// Recipe lookup table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeBook {
    recipes: Vec<ConversionRecipe>,
}

impl Default for RecipeBook {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RecipeBook {
    pub fn builtin() -> Self {
        Self {
            recipes: vec![ConversionRecipe::spice_to_melange(), ConversionRecipe::plastanium()],
        }
    }

    /// Built-in recipes with configured ones replacing same-named entries
    pub fn with_overrides(extra: Vec<ConversionRecipe>) -> Self {
        let mut book = Self::builtin();
        for recipe in extra {
            let key = normalize(&recipe.name);
            match book.recipes.iter_mut().find(|r| normalize(&r.name) == key) {
                Some(existing) => *existing = recipe,
                None => book.recipes.push(recipe),
            }
        }
        book
    }

    /// Find by recipe name, then by output resource name
    pub fn find(&self, name: &str) -> Option<&ConversionRecipe> {
        let key = normalize(name);
        self.recipes
            .iter()
            .find(|r| normalize(&r.name) == key)
            .or_else(|| self.recipes.iter().find(|r| normalize(&r.output) == key))
    }

    pub fn recipes(&self) -> &[ConversionRecipe] {
        &self.recipes
    }
}
