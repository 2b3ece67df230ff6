use anyhow::{Context, Result, bail};
use std::path::Path;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{Ingredient, IngredientGroup, NewRecipe, Recipe};
use larder_core::planner::scale_factor;
use larder_core::quantity::{self, normalize_unit, scale_ingredient_quantity};
use larder_core::service::LarderService;

use super::helpers::{exit_empty, exit_not_found, print_json, truncate};

/// Parse an `--ingredient` argument of the form `name[:quantity[:unit]]`,
/// e.g. `Flour:200:g`, `Eggs:2` or `Salt:to taste`.
pub(crate) fn parse_ingredient_arg(s: &str) -> Result<Ingredient> {
    let mut parts = s.splitn(3, ':').map(str::trim);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name[:quantity[:unit]]' (e.g. 'Flour:200:g')");
    }
    Ok(Ingredient {
        name: name.to_string(),
        quantity: parts.next().unwrap_or_default().to_string(),
        unit: parts.next().unwrap_or_default().to_string(),
    })
}

fn match_label(recipe: &Recipe) -> String {
    recipe
        .pantry_match_percentage
        .map_or("-".into(), |p| format!("{p}%"))
}

fn print_recipe_summary(verb: &str, recipe: &Recipe) {
    let name = &recipe.name;
    let id = recipe.id;
    let count = recipe.ingredients().count();
    let matched = match_label(recipe);
    println!("{verb} recipe: {name} (id: {id}, {count} ingredients, pantry match {matched})");
}

pub(crate) async fn cmd_recipe_add(
    service: &LarderService,
    name: &str,
    servings: Option<String>,
    group: Option<String>,
    ingredients: &[String],
    json: bool,
) -> Result<()> {
    let ingredients = ingredients
        .iter()
        .map(|s| parse_ingredient_arg(s))
        .collect::<Result<Vec<_>>>()?;
    let recipe = service
        .create_recipe(NewRecipe {
            name: name.to_string(),
            servings: servings.unwrap_or_default(),
            ingredient_groups: vec![IngredientGroup {
                title: group.unwrap_or_default(),
                ingredients,
            }],
        })
        .await?;

    if json {
        print_json(&recipe)?;
    } else {
        print_recipe_summary("Created", &recipe);
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_import(
    service: &LarderService,
    file: &Path,
    name_override: Option<String>,
    servings_override: Option<String>,
    json: bool,
) -> Result<()> {
    let input = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let fallback_name = file.file_stem().and_then(|s| s.to_str()).map(String::from);
    let mut recipe = parse_cooklang(&input, fallback_name)?;

    if let Some(name) = name_override {
        recipe.name = name;
    }
    if let Some(servings) = servings_override {
        recipe.servings = servings;
    }
    if recipe.ingredient_groups.iter().all(|g| g.ingredients.is_empty()) {
        bail!("No ingredients found in recipe");
    }

    let recipe = service.create_recipe(recipe).await?;
    if json {
        print_json(&recipe)?;
    } else {
        print_recipe_summary("Imported", &recipe);
    }
    Ok(())
}

/// Convert a Cooklang document into a single-group recipe.
pub(crate) fn parse_cooklang(input: &str, fallback_name: Option<String>) -> Result<NewRecipe> {
    let (recipe_data, _report) = cooklang::parse(input)
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to parse Cooklang file: {e}"))?;

    let name = recipe_data
        .metadata
        .title()
        .map(String::from)
        .or(fallback_name)
        .context("Could not determine recipe name. Use --name to specify one")?;

    let servings = recipe_data
        .metadata
        .servings()
        .and_then(|s| s.as_number().map(f64::from))
        .map(quantity::format)
        .unwrap_or_default();

    let converter = cooklang::Converter::default();
    let grouped = recipe_data.group_ingredients(&converter);
    let ingredients = grouped.iter().map(|gi| cooklang_ingredient(gi)).collect();

    Ok(NewRecipe {
        name,
        servings,
        ingredient_groups: vec![IngredientGroup {
            title: String::new(),
            ingredients,
        }],
    })
}

/// Stored amounts keep full precision; rounding is for display only.
fn cooklang_ingredient(gi: &cooklang::ingredient_list::GroupedIngredient<'_>) -> Ingredient {
    // First quantity of the group only
    let (quantity, unit) =
        gi.quantity
            .iter()
            .next()
            .map_or((String::new(), String::new()), |qty: &cooklang::Quantity| {
                let value = match qty.value() {
                    cooklang::Value::Number(n) => n.value().to_string(),
                    cooklang::Value::Range { start, end } => {
                        format!("{}-{}", start.value(), end.value())
                    }
                    cooklang::Value::Text(t) => t.clone(),
                };
                let unit = qty.unit().map(normalize_unit).unwrap_or_default();
                (value, unit)
            });

    Ingredient {
        name: gi.ingredient.display_name().to_string(),
        quantity,
        unit,
    }
}

pub(crate) async fn cmd_recipe_show(
    service: &LarderService,
    id: i64,
    servings: Option<f64>,
    json: bool,
) -> Result<()> {
    let Ok(recipe) = service.get_recipe(id).await else {
        exit_not_found(&format!("Recipe {id} not found"), json);
    };
    let factor = scale_factor(&recipe.servings, servings);

    if json {
        if (factor - 1.0).abs() < f64::EPSILON {
            return print_json(&recipe);
        }
        let mut scaled = recipe;
        for ingredient in scaled
            .ingredient_groups
            .iter_mut()
            .flat_map(|g| g.ingredients.iter_mut())
        {
            ingredient.quantity = scale_ingredient_quantity(&ingredient.quantity, factor);
        }
        return print_json(&scaled);
    }

    let name = &recipe.name;
    println!("=== {name} ===");
    let declared = if recipe.servings.is_empty() {
        "-"
    } else {
        recipe.servings.as_str()
    };
    match servings {
        Some(wanted) if (factor - 1.0).abs() >= f64::EPSILON => println!(
            "  Servings: {} (scaled from {declared})  |  Pantry match: {}\n",
            quantity::format(wanted),
            match_label(&recipe)
        ),
        _ => println!(
            "  Servings: {declared}  |  Pantry match: {}\n",
            match_label(&recipe)
        ),
    }

    for group in &recipe.ingredient_groups {
        if group.title.is_empty() {
            println!("  INGREDIENTS:");
        } else {
            println!("  {}:", group.title.to_uppercase());
        }
        for ing in &group.ingredients {
            let qty = scale_ingredient_quantity(&ing.quantity, factor);
            let line = [qty.as_str(), ing.unit.as_str(), ing.name.as_str()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            println!("    {line}");
        }
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_list(service: &LarderService, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Ingredients")]
        ingredients: String,
        #[tabled(rename = "Match")]
        matched: String,
    }

    let recipes = service.list_recipes().await?;
    if recipes.is_empty() {
        exit_empty("No recipes found", json);
    }

    if json {
        return print_json(&recipes);
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 30),
            servings: if r.servings.is_empty() {
                "-".into()
            } else {
                r.servings.clone()
            },
            ingredients: r
                .ingredient_count
                .map_or_else(|| r.ingredients().count().to_string(), |c| c.to_string()),
            matched: match_label(r),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) async fn cmd_recipe_delete(service: &LarderService, id: i64, json: bool) -> Result<()> {
    if !service.delete_recipe(id).await? {
        exit_not_found(&format!("Recipe {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted recipe {id} and its meal plan entries");
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_recompute(service: &LarderService, json: bool) -> Result<()> {
    let report = service.recompute_all().await?;
    if json {
        print_json(&report)?;
    } else {
        let scanned = report.scanned;
        let updated = report.updated;
        println!("Recomputed pantry match for {scanned} recipes ({updated} changed)");
        if report.failed > 0 {
            eprintln!("{} recipes failed, see log output", report.failed);
        }
    }
    Ok(())
}
