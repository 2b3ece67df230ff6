use anyhow::{Result, bail};
use chrono::Local;

use larder_core::models::{NewPantryItem, UpdatePantryItem};
use larder_core::service::LarderService;

use super::helpers::{
    exit_empty, exit_not_found, format_quantity, parse_date, parse_expiry, print_json,
    print_pantry_table,
};

pub(crate) struct PantryFields {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub expiry: Option<String>,
    pub category: Option<String>,
    pub min: Option<f64>,
    pub clear_min: bool,
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_pantry_add(
    service: &LarderService,
    name: &str,
    quantity: f64,
    unit: Option<String>,
    expiry: Option<String>,
    category: Option<String>,
    min: Option<f64>,
    json: bool,
) -> Result<()> {
    let expiry_date = match expiry {
        Some(s) => Some(parse_date(Some(s))?),
        None => None,
    };
    let item = service
        .add_pantry_item(NewPantryItem {
            name: name.to_string(),
            quantity,
            unit: unit.unwrap_or_default(),
            expiry_date,
            category,
            min_quantity: min,
        })
        .await?;

    if json {
        print_json(&item)?;
    } else {
        let id = item.id;
        let qty = format_quantity(item.quantity, &item.unit);
        let category = &item.category;
        println!("Added {qty} {} to pantry (id: {id}, category: {category})", item.name);
    }
    Ok(())
}

pub(crate) async fn cmd_pantry_list(service: &LarderService, json: bool) -> Result<()> {
    let items = service.list_pantry().await?;
    if items.is_empty() {
        exit_empty("Pantry is empty", json);
    }
    if json {
        return print_json(&items);
    }
    print_pantry_table(&items);
    Ok(())
}

pub(crate) async fn cmd_pantry_update(
    service: &LarderService,
    id: i64,
    fields: PantryFields,
    json: bool,
) -> Result<()> {
    if fields.min.is_some() && fields.clear_min {
        bail!("Use either --min or --clear-min, not both");
    }
    let expiry_date = fields.expiry.as_deref().map(parse_expiry).transpose()?;
    let min_quantity = if fields.clear_min {
        Some(None)
    } else {
        fields.min.map(Some)
    };
    let update = UpdatePantryItem {
        name: fields.name,
        quantity: fields.quantity,
        unit: fields.unit,
        expiry_date,
        category: fields.category,
        min_quantity,
    };
    if update.name.is_none()
        && update.quantity.is_none()
        && update.unit.is_none()
        && update.expiry_date.is_none()
        && update.category.is_none()
        && update.min_quantity.is_none()
    {
        bail!("Nothing to update. Pass at least one of --name, --quantity, --unit, --expiry, --category, --min, --clear-min");
    }

    if service.get_pantry_item(id).await.is_err() {
        exit_not_found(&format!("Pantry item {id} not found"), json);
    }
    let item = service.update_pantry_item(id, update).await?;

    if json {
        print_json(&item)?;
    } else {
        let qty = format_quantity(item.quantity, &item.unit);
        println!("Updated {} (id: {id}): {qty}", item.name);
    }
    Ok(())
}

pub(crate) async fn cmd_pantry_remove(service: &LarderService, id: i64, json: bool) -> Result<()> {
    if !service.delete_pantry_item(id).await? {
        exit_not_found(&format!("Pantry item {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Removed pantry item {id}");
    }
    Ok(())
}

pub(crate) async fn cmd_pantry_low(service: &LarderService, json: bool) -> Result<()> {
    let items = service.low_stock().await?;
    if items.is_empty() {
        exit_empty("Nothing is running low", json);
    }
    if json {
        return print_json(&items);
    }
    print_pantry_table(&items);
    Ok(())
}

pub(crate) async fn cmd_pantry_expiring(
    service: &LarderService,
    days: i64,
    json: bool,
) -> Result<()> {
    let today = Local::now().date_naive();
    let items = service.expiring_within(today, days).await?;
    if items.is_empty() {
        exit_empty(&format!("Nothing expires in the next {days} days"), json);
    }
    if json {
        return print_json(&items);
    }
    print_pantry_table(&items);
    Ok(())
}
