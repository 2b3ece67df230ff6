use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{MealPlanItem, NewMealPlanItem, PlanRange};
use larder_core::quantity;
use larder_core::service::LarderService;

use super::helpers::{exit_empty, exit_not_found, parse_date, print_json, truncate};

fn describe(entry: &MealPlanItem) -> String {
    match (&entry.recipe_name, entry.recipe_id, &entry.note) {
        (Some(name), _, _) => name.clone(),
        (None, Some(id), _) => format!("recipe {id}"),
        (None, None, Some(note)) => note.clone(),
        (None, None, None) => String::new(),
    }
}

pub(crate) async fn cmd_plan_add(
    service: &LarderService,
    date: Option<String>,
    slot: &str,
    recipe: Option<i64>,
    note: Option<String>,
    servings: Option<f64>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let entry = service
        .add_plan_entry(NewMealPlanItem {
            date,
            meal_slot: slot.to_string(),
            recipe_id: recipe,
            note,
            servings_override: servings,
        })
        .await?;

    if json {
        return print_json(&entry);
    }
    let what = describe(&entry);
    let id = entry.id;
    println!("Planned {what} for {} {} (id: {id})", entry.date, entry.meal_slot);
    Ok(())
}

pub(crate) async fn cmd_plan_list(
    service: &LarderService,
    range: PlanRange,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Meal")]
        slot: String,
        #[tabled(rename = "What")]
        what: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Cooked")]
        cooked: String,
    }

    let entries = service.list_plan(range).await?;
    if entries.is_empty() {
        exit_empty(
            &format!("Nothing planned between {} and {}", range.start, range.end),
            json,
        );
    }
    if json {
        return print_json(&entries);
    }

    let rows: Vec<PlanRow> = entries
        .iter()
        .map(|e| PlanRow {
            id: e.id,
            date: e.date.clone(),
            slot: e.meal_slot.clone(),
            what: truncate(&describe(e), 35),
            servings: e.servings_override.map_or("-".into(), quantity::format),
            cooked: if e.is_cooked { "yes".into() } else { String::new() },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) async fn cmd_plan_cooked(
    service: &LarderService,
    id: i64,
    undo: bool,
    json: bool,
) -> Result<()> {
    let Ok(entry) = service.set_plan_cooked(id, !undo).await else {
        exit_not_found(&format!("Meal plan entry {id} not found"), json);
    };
    if json {
        return print_json(&entry);
    }
    let what = describe(&entry);
    if entry.is_cooked {
        println!("Marked {what} on {} as cooked", entry.date);
    } else {
        println!("Marked {what} on {} as not cooked", entry.date);
    }
    Ok(())
}

pub(crate) async fn cmd_plan_remove(service: &LarderService, id: i64, json: bool) -> Result<()> {
    if !service.delete_plan_entry(id).await? {
        exit_not_found(&format!("Meal plan entry {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Removed meal plan entry {id}");
    }
    Ok(())
}

pub(crate) async fn cmd_plan_generate(
    service: &LarderService,
    range: PlanRange,
    json: bool,
) -> Result<()> {
    let summary = service.generate_shopping_list(range).await?;
    if json {
        return print_json(&summary);
    }

    let added = summary.added;
    let topped_up = summary.topped_up;
    println!(
        "Shopping list for {} to {}: {added} added, {topped_up} topped up",
        range.start, range.end
    );
    let covered = summary.covered;
    let listed = summary.already_listed;
    if covered + listed > 0 {
        println!("  {covered} covered by the pantry, {listed} already on the list");
    }
    for failure in &summary.failures {
        eprintln!("Failed to list {}: {}", failure.name, failure.error);
    }
    if summary.missing_recipes > 0 {
        eprintln!(
            "Warning: {} plan entries reference deleted recipes",
            summary.missing_recipes
        );
    }
    Ok(())
}
