mod commands;
mod config;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    PantryFields, cmd_pantry_add, cmd_pantry_expiring, cmd_pantry_list, cmd_pantry_low,
    cmd_pantry_remove, cmd_pantry_update, cmd_plan_add, cmd_plan_cooked, cmd_plan_generate,
    cmd_plan_list, cmd_plan_remove, cmd_recipe_add, cmd_recipe_delete, cmd_recipe_import,
    cmd_recipe_list, cmd_recipe_recompute, cmd_recipe_show, cmd_shop_add, cmd_shop_check,
    cmd_shop_clear, cmd_shop_list, cmd_shop_move_to_pantry, cmd_shop_paste, cmd_shop_rebalance,
    cmd_shop_remove, cmd_shop_rename_category, cmd_shop_reorder, cmd_shop_restock,
    cmd_shop_suggest, parse_plan_range,
};
use crate::config::Config;
use larder_core::service::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Pantry, recipes, shopping list and meal plan in one local database"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track what is in the pantry
    Pantry {
        #[command(subcommand)]
        command: PantryCommands,
    },
    /// Manage recipes and their pantry match
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage the shopping list
    Shop {
        #[command(subcommand)]
        command: ShopCommands,
    },
    /// Plan meals and turn the plan into a shopping list
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum PantryCommands {
    /// Add an item to the pantry
    Add {
        /// Item name
        name: String,
        /// Quantity on hand
        quantity: f64,
        /// Unit (g, kg, ml, l, cup, ...; default: piece)
        unit: Option<String>,
        /// Expiry date (YYYY-MM-DD or today/tomorrow)
        #[arg(long)]
        expiry: Option<String>,
        /// Category (default: guessed from the name)
        #[arg(long)]
        category: Option<String>,
        /// Reorder threshold
        #[arg(long)]
        min: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pantry items
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a pantry item
    Update {
        /// Pantry item ID
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        quantity: Option<f64>,
        #[arg(short, long)]
        unit: Option<String>,
        /// New expiry date, or "none" to clear it
        #[arg(long)]
        expiry: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// New reorder threshold
        #[arg(long)]
        min: Option<f64>,
        /// Remove the reorder threshold
        #[arg(long)]
        clear_min: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a pantry item
    Remove {
        /// Pantry item ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show items below their reorder threshold
    Low {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show items expiring soon
    Expiring {
        /// Look-ahead window in days
        #[arg(short, long, default_value = "7")]
        days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe from the command line
    Add {
        /// Recipe name
        name: String,
        /// Declared servings (e.g. "4" or "4-6")
        #[arg(short, long)]
        servings: Option<String>,
        /// Ingredient as name[:quantity[:unit]], repeatable (e.g. "Flour:200:g")
        #[arg(short, long = "ingredient", value_name = "INGREDIENT")]
        ingredients: Vec<String>,
        /// Title for the ingredient group
        #[arg(long)]
        group: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import a recipe from a Cooklang (.cook) file
    Import {
        /// Path to the .cook file
        file: PathBuf,
        /// Override recipe name (defaults to title metadata or filename)
        #[arg(long)]
        name: Option<String>,
        /// Override declared servings
        #[arg(long)]
        servings: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe, optionally scaled to a number of servings
    Show {
        /// Recipe ID
        id: i64,
        /// Scale ingredients to this many servings
        #[arg(short, long)]
        servings: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes with their pantry match
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe and its meal plan entries
    Delete {
        /// Recipe ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recompute the pantry match of every recipe now
    Recompute {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ShopCommands {
    /// Add an item ("2 kg flour", "milk 1 l", "bananas")
    Add {
        /// Item text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Quantity (the text is then taken as the name)
        #[arg(short, long)]
        quantity: Option<f64>,
        /// Unit (the text is then taken as the name)
        #[arg(short, long)]
        unit: Option<String>,
        /// Category (default: guessed from the name)
        #[arg(long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add one item per line from a file or stdin
    Paste {
        /// File to read ("-" or omitted: stdin)
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import suggestions from a JSON file of {name, quantity, unit, category}
    Suggest {
        /// Path to the suggestions file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the shopping list grouped by category
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check or uncheck an item
    Check {
        /// Shopping item ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move an item before another one or to the end of a category
    Reorder {
        /// Shopping item ID to move
        id: i64,
        /// Place before this item
        #[arg(long, conflicts_with = "end_of")]
        before: Option<i64>,
        /// Place at the end of this category
        #[arg(long)]
        end_of: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move every item of a category into another one
    RenameCategory {
        /// Current category name
        old: String,
        /// New category name
        new: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add checked items to the pantry and remove them from the list
    MoveToPantry {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a single item
    Remove {
        /// Shopping item ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove all items (or only checked ones)
    Clear {
        /// Only remove checked items
        #[arg(long)]
        checked: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add low-stock pantry items to the list
    Restock {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Renumber the item order of a category
    Rebalance {
        /// Category name
        category: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Plan a recipe or a note for a meal
    Add {
        /// Meal slot: breakfast, lunch, dinner
        slot: String,
        /// Date (YYYY-MM-DD or today/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Recipe ID
        #[arg(short, long, conflicts_with = "note")]
        recipe: Option<i64>,
        /// Free-text note instead of a recipe
        #[arg(short, long)]
        note: Option<String>,
        /// Servings to cook (scales the recipe)
        #[arg(short, long)]
        servings: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show planned meals
    List {
        /// First day (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Last day (default: from + days - 1)
        #[arg(long)]
        to: Option<String>,
        /// Number of days when --to is not given
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a planned meal as cooked
    Cooked {
        /// Meal plan entry ID
        id: i64,
        /// Mark as not cooked instead
        #[arg(long)]
        undo: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a planned meal
    Remove {
        /// Meal plan entry ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add what the planned meals need to the shopping list
    Generate {
        /// First day (default: today)
        #[arg(long)]
        from: Option<String>,
        /// Last day (default: from + days - 1)
        #[arg(long)]
        to: Option<String>,
        /// Number of days when --to is not given
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("LARDER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let serving = matches!(cli.command, Commands::Serve { .. });
    init_tracing(if serving { "info" } else { "warn" });

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = Arc::new(LarderService::open(&config.db_path, config.debounce)?);

    let result = match cli.command {
        Commands::Pantry { command } => run_pantry(&service, command).await,
        Commands::Recipe { command } => run_recipe(&service, command).await,
        Commands::Shop { command } => run_shop(&service, command).await,
        Commands::Plan { command } => run_plan(&service, command).await,
        Commands::Serve { port, bind } => {
            server::start_server(Arc::clone(&service), port, &bind).await
        }
    };

    // Settle a pantry change made by this command before exiting
    service.shutdown(true).await;
    result
}

async fn run_pantry(service: &LarderService, command: PantryCommands) -> Result<()> {
    match command {
        PantryCommands::Add {
            name,
            quantity,
            unit,
            expiry,
            category,
            min,
            json,
        } => cmd_pantry_add(service, &name, quantity, unit, expiry, category, min, json).await,
        PantryCommands::List { json } => cmd_pantry_list(service, json).await,
        PantryCommands::Update {
            id,
            name,
            quantity,
            unit,
            expiry,
            category,
            min,
            clear_min,
            json,
        } => {
            let fields = PantryFields {
                name,
                quantity,
                unit,
                expiry,
                category,
                min,
                clear_min,
            };
            cmd_pantry_update(service, id, fields, json).await
        }
        PantryCommands::Remove { id, json } => cmd_pantry_remove(service, id, json).await,
        PantryCommands::Low { json } => cmd_pantry_low(service, json).await,
        PantryCommands::Expiring { days, json } => cmd_pantry_expiring(service, days, json).await,
    }
}

async fn run_recipe(service: &LarderService, command: RecipeCommands) -> Result<()> {
    match command {
        RecipeCommands::Add {
            name,
            servings,
            ingredients,
            group,
            json,
        } => cmd_recipe_add(service, &name, servings, group, &ingredients, json).await,
        RecipeCommands::Import {
            file,
            name,
            servings,
            json,
        } => cmd_recipe_import(service, &file, name, servings, json).await,
        RecipeCommands::Show { id, servings, json } => {
            cmd_recipe_show(service, id, servings, json).await
        }
        RecipeCommands::List { json } => cmd_recipe_list(service, json).await,
        RecipeCommands::Delete { id, json } => cmd_recipe_delete(service, id, json).await,
        RecipeCommands::Recompute { json } => cmd_recipe_recompute(service, json).await,
    }
}

async fn run_shop(service: &LarderService, command: ShopCommands) -> Result<()> {
    match command {
        ShopCommands::Add {
            text,
            quantity,
            unit,
            category,
            json,
        } => cmd_shop_add(service, &text, quantity, unit, category, json).await,
        ShopCommands::Paste { file, json } => {
            cmd_shop_paste(service, file.as_deref(), json).await
        }
        ShopCommands::Suggest { file, json } => cmd_shop_suggest(service, &file, json).await,
        ShopCommands::List { json } => cmd_shop_list(service, json).await,
        ShopCommands::Check { id, json } => cmd_shop_check(service, id, json).await,
        ShopCommands::Reorder {
            id,
            before,
            end_of,
            json,
        } => cmd_shop_reorder(service, id, before, end_of, json).await,
        ShopCommands::RenameCategory { old, new, json } => {
            cmd_shop_rename_category(service, &old, &new, json).await
        }
        ShopCommands::MoveToPantry { json } => cmd_shop_move_to_pantry(service, json).await,
        ShopCommands::Remove { id, json } => cmd_shop_remove(service, id, json).await,
        ShopCommands::Clear { checked, json } => cmd_shop_clear(service, checked, json).await,
        ShopCommands::Restock { json } => cmd_shop_restock(service, json).await,
        ShopCommands::Rebalance { category, json } => {
            cmd_shop_rebalance(service, &category, json).await
        }
    }
}

async fn run_plan(service: &LarderService, command: PlanCommands) -> Result<()> {
    match command {
        PlanCommands::Add {
            slot,
            date,
            recipe,
            note,
            servings,
            json,
        } => cmd_plan_add(service, date, &slot, recipe, note, servings, json).await,
        PlanCommands::List {
            from,
            to,
            days,
            json,
        } => cmd_plan_list(service, parse_plan_range(from, to, days)?, json).await,
        PlanCommands::Cooked { id, undo, json } => cmd_plan_cooked(service, id, undo, json).await,
        PlanCommands::Remove { id, json } => cmd_plan_remove(service, id, json).await,
        PlanCommands::Generate {
            from,
            to,
            days,
            json,
        } => cmd_plan_generate(service, parse_plan_range(from, to, days)?, json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_shop_add_words() {
        let cli = Cli::try_parse_from(["larder", "shop", "add", "2", "kg", "flour", "--json"]).unwrap();
        match cli.command {
            Commands::Shop {
                command: ShopCommands::Add { text, json, .. },
            } => {
                assert_eq!(text, ["2", "kg", "flour"]);
                assert!(json);
            }
            _ => panic!("expected shop add"),
        }
    }

    #[test]
    fn plan_add_rejects_recipe_and_note() {
        let result = Cli::try_parse_from([
            "larder", "plan", "add", "dinner", "--recipe", "1", "--note", "pizza",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn recipe_add_collects_ingredients() {
        let cli = Cli::try_parse_from([
            "larder",
            "recipe",
            "add",
            "Pancakes",
            "-i",
            "Flour:200:g",
            "--ingredient",
            "Eggs:2",
        ])
        .unwrap();
        match cli.command {
            Commands::Recipe {
                command: RecipeCommands::Add { ingredients, .. },
            } => assert_eq!(ingredients, ["Flour:200:g", "Eggs:2"]),
            _ => panic!("expected recipe add"),
        }
    }
}
