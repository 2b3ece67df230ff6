use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{PantryItem, PlanRange};
use larder_core::quantity;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Expiry argument: a date, or "none" to clear it.
pub(crate) fn parse_expiry(s: &str) -> Result<Option<NaiveDate>> {
    if s.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse_date(Some(s.to_string())).map(Some)
    }
}

/// `--from` defaults to today; `--to` defaults to `days - 1` days later.
pub(crate) fn parse_plan_range(
    from: Option<String>,
    to: Option<String>,
    days: u32,
) -> Result<PlanRange> {
    if days == 0 {
        bail!("Days must be at least 1");
    }
    let start = parse_date(from)?;
    let end = match to {
        Some(to) => parse_date(Some(to))?,
        None => start + chrono::Duration::days(i64::from(days) - 1),
    };
    PlanRange::new(start, end)
}

pub(crate) fn format_quantity(value: f64, unit: &str) -> String {
    format!("{} {unit}", quantity::format(value))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing record and exit with status 2.
pub(crate) fn exit_not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

/// Report an empty listing and exit with status 2.
pub(crate) fn exit_empty(message: &str, json: bool) -> ! {
    if json {
        println!("[]");
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn print_pantry_table(items: &[PantryItem]) {
    #[derive(Tabled)]
    struct PantryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Min")]
        min: String,
        #[tabled(rename = "Expires")]
        expires: String,
        #[tabled(rename = "Category")]
        category: String,
    }

    let rows: Vec<PantryRow> = items
        .iter()
        .map(|p| PantryRow {
            id: p.id,
            name: if p.is_low() {
                format!("{} (low)", truncate(&p.name, 28))
            } else {
                truncate(&p.name, 34)
            },
            quantity: format_quantity(p.quantity, &p.unit),
            min: p
                .min_quantity
                .map_or("-".into(), |m| format_quantity(m, &p.unit)),
            expires: p.expiry_date.clone().unwrap_or_else(|| "-".into()),
            category: p.category.clone(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
