use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{NewShoppingItem, PantryItem, ShoppingListItem};
use larder_core::quantity::parse_freeform_item;
use larder_core::service::{LarderService, SuggestionProvider};
use larder_core::shopping::{AddStatus, BatchAddSummary, ReorderTarget, ShoppingInput};

use super::helpers::{exit_empty, exit_not_found, format_quantity, print_json, truncate};

/// Suggestions read from a JSON file: an array of
/// `{"name", "quantity", "unit", "category"}` objects.
pub(crate) struct FileSuggestions {
    path: PathBuf,
}

#[derive(Deserialize)]
struct SuggestionRecord {
    name: String,
    #[serde(default = "default_quantity")]
    quantity: f64,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    category: Option<String>,
}

fn default_quantity() -> f64 {
    1.0
}

impl FileSuggestions {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl SuggestionProvider for FileSuggestions {
    async fn suggest(&self, _pantry: &[PantryItem]) -> Result<Vec<NewShoppingItem>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read suggestions: {}", self.path.display()))?;
        let records: Vec<SuggestionRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid suggestions file: {}", self.path.display()))?;
        Ok(records
            .into_iter()
            .map(|r| NewShoppingItem {
                category: r.category,
                ..NewShoppingItem::new(&r.name, r.quantity, &r.unit)
            })
            .collect())
    }
}

fn print_batch_summary(summary: &BatchAddSummary, json: bool) -> Result<()> {
    if json {
        return print_json(summary);
    }
    let added = summary.added;
    let updated = summary.updated;
    println!("Added {added} new items, updated {updated} existing");
    if summary.skipped > 0 {
        eprintln!("Skipped {} invalid items", summary.skipped);
    }
    for failure in &summary.failures {
        eprintln!("Failed to add {}: {}", failure.name, failure.error);
    }
    Ok(())
}

fn print_items_table(items: &[ShoppingListItem]) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Category")]
        category: String,
    }

    let rows: Vec<ItemRow> = items
        .iter()
        .map(|i| ItemRow {
            id: i.id,
            name: truncate(&i.name, 35),
            quantity: format_quantity(i.quantity, &i.unit),
            category: i.category.clone(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) async fn cmd_shop_add(
    service: &LarderService,
    words: &[String],
    quantity: Option<f64>,
    unit: Option<String>,
    category: Option<String>,
    json: bool,
) -> Result<()> {
    let text = words.join(" ");
    let input = if quantity.is_some() || unit.is_some() {
        ShoppingInput::Item(NewShoppingItem {
            category,
            ..NewShoppingItem::new(
                text.trim(),
                quantity.unwrap_or(1.0),
                &unit.unwrap_or_default(),
            )
        })
    } else if category.is_some() {
        ShoppingInput::Item(NewShoppingItem {
            category,
            ..NewShoppingItem::from(parse_freeform_item(&text))
        })
    } else {
        ShoppingInput::Line(text)
    };

    let outcome = service.add_shopping_item(input).await?;
    if json {
        return print_json(&outcome);
    }
    let item = &outcome.item;
    let qty = format_quantity(item.quantity, &item.unit);
    match outcome.status {
        AddStatus::Added => println!(
            "Added {} ({qty}) to {} (id: {})",
            item.name, item.category, item.id
        ),
        AddStatus::Updated => println!("Updated {} to {qty} (id: {})", item.name, item.id),
    }
    Ok(())
}

pub(crate) async fn cmd_shop_paste(
    service: &LarderService,
    file: Option<&Path>,
    json: bool,
) -> Result<()> {
    let text = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    let summary = service.paste_shopping_list(&text).await?;
    print_batch_summary(&summary, json)
}

pub(crate) async fn cmd_shop_suggest(service: &LarderService, file: &Path, json: bool) -> Result<()> {
    let provider = FileSuggestions::new(file);
    let summary = service.import_suggestions(&provider).await?;
    print_batch_summary(&summary, json)
}

pub(crate) async fn cmd_shop_restock(service: &LarderService, json: bool) -> Result<()> {
    let summary = service.restock_low_items().await?;
    print_batch_summary(&summary, json)
}

pub(crate) async fn cmd_shop_list(service: &LarderService, json: bool) -> Result<()> {
    let view = service.shopping_list().await?;
    if view.is_empty() {
        exit_empty("Shopping list is empty", json);
    }
    if json {
        return print_json(&view);
    }

    let unchecked: Vec<ShoppingListItem> = view
        .categories
        .iter()
        .flat_map(|g| g.items.iter().cloned())
        .collect();
    if !unchecked.is_empty() {
        print_items_table(&unchecked);
    }
    if !view.checked.is_empty() {
        println!("\n  IN CART:");
        print_items_table(&view.checked);
    }
    Ok(())
}

pub(crate) async fn cmd_shop_check(service: &LarderService, id: i64, json: bool) -> Result<()> {
    if service.get_shopping_item(id).await.is_err() {
        exit_not_found(&format!("Shopping item {id} not found"), json);
    }
    let item = service.toggle_checked(id).await?;
    if json {
        return print_json(&item);
    }
    if item.id != id {
        println!("Unchecked {} and merged it into item {}", item.name, item.id);
    } else if item.is_checked {
        println!("Checked {} (id: {id})", item.name);
    } else {
        println!("Unchecked {} (id: {id})", item.name);
    }
    Ok(())
}

pub(crate) async fn cmd_shop_reorder(
    service: &LarderService,
    id: i64,
    before: Option<i64>,
    end_of: Option<String>,
    json: bool,
) -> Result<()> {
    let target = match (before, end_of) {
        (Some(target), None) => ReorderTarget::BeforeItem(target),
        (None, Some(category)) => ReorderTarget::EndOfCategory(category),
        _ => bail!("Pass exactly one of --before <ID> or --end-of <CATEGORY>"),
    };
    let item = service.reorder(id, target).await?;
    if json {
        return print_json(&item);
    }
    println!("Moved {} in {} (id: {id})", item.name, item.category);
    Ok(())
}

pub(crate) async fn cmd_shop_rename_category(
    service: &LarderService,
    old: &str,
    new: &str,
    json: bool,
) -> Result<()> {
    let moved = service.rename_category(old, new).await?;
    if moved == 0 {
        exit_not_found(&format!("No items in category '{old}'"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "moved": moved }));
    } else {
        println!("Moved {moved} items from '{old}' to '{new}'");
    }
    Ok(())
}

pub(crate) async fn cmd_shop_rebalance(
    service: &LarderService,
    category: &str,
    json: bool,
) -> Result<()> {
    let count = service.rebalance_category(category).await?;
    if json {
        println!("{}", serde_json::json!({ "rebalanced": count }));
    } else {
        println!("Renumbered {count} items in '{category}'");
    }
    Ok(())
}

pub(crate) async fn cmd_shop_remove(service: &LarderService, id: i64, json: bool) -> Result<()> {
    if !service.delete_shopping_item(id).await? {
        exit_not_found(&format!("Shopping item {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Removed shopping item {id}");
    }
    Ok(())
}

pub(crate) async fn cmd_shop_move_to_pantry(service: &LarderService, json: bool) -> Result<()> {
    let summary = service.move_checked_to_pantry().await?;
    if json {
        return print_json(&summary);
    }
    if summary.moved() == 0 && summary.failed == 0 {
        println!("No checked items to move");
        return Ok(());
    }
    let merged = summary.merged;
    let created = summary.created;
    println!("Moved to pantry: {merged} merged, {created} new");
    for failure in &summary.failures {
        eprintln!("  {} (id: {}): {}", failure.name, failure.item_id, failure.error);
    }
    Ok(())
}

pub(crate) async fn cmd_shop_clear(service: &LarderService, checked: bool, json: bool) -> Result<()> {
    let cleared = if checked {
        service.clear_checked().await?
    } else {
        service.clear_list().await?
    };
    if json {
        println!("{}", serde_json::json!({ "cleared": cleared }));
    } else if checked {
        println!("Removed {cleared} checked items");
    } else {
        println!("Removed {cleared} items");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggest.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Oat milk", "quantity": 2, "unit": "l"},
                {"name": "Coffee", "unit": "bag", "category": "Beverages"},
                {"name": "Limes"}
            ]"#,
        )
        .unwrap();

        let items = FileSuggestions::new(&path).suggest(&[]).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], NewShoppingItem::new("Oat milk", 2.0, "l"));
        assert_eq!(items[1].category.as_deref(), Some("Beverages"));
        assert!((items[2].quantity - 1.0).abs() < f64::EPSILON);
        assert_eq!(items[2].unit, "");
    }

    #[tokio::test]
    async fn test_file_suggestions_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"name\": \"not an array\"}").unwrap();
        assert!(FileSuggestions::new(&path).suggest(&[]).await.is_err());
        assert!(
            FileSuggestions::new(&dir.path().join("missing.json"))
                .suggest(&[])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_suggest_merges_with_list() {
        use larder_core::recompute::DEFAULT_DEBOUNCE;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suggest.json");
        std::fs::write(
            &path,
            r#"[{"name": "milk", "quantity": 1, "unit": "litre"}, {"name": "", "quantity": 1}]"#,
        )
        .unwrap();

        let service = LarderService::open_in_memory(DEFAULT_DEBOUNCE).unwrap();
        service
            .add_shopping_item(ShoppingInput::Line("Milk 1 l".to_string()))
            .await
            .unwrap();

        cmd_shop_suggest(&service, &path, true).await.unwrap();

        let view = service.shopping_list().await.unwrap();
        let items: Vec<_> = view.categories.iter().flat_map(|g| &g.items).collect();
        assert_eq!(items.len(), 1);
        assert!((items[0].quantity - 2.0).abs() < f64::EPSILON);
    }
}
