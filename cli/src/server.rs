use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

use larder_core::models::{
    IngredientGroup, MealPlanItem, NewMealPlanItem, NewPantryItem, NewRecipe, NewShoppingItem,
    PantryItem, PlanRange, Recipe, ShoppingListItem, UpdatePantryItem, validate_new_pantry_item,
    validate_new_plan_entry, validate_new_recipe, validate_pantry_update,
};
use larder_core::planner::PlanGenerationSummary;
use larder_core::recompute::RecomputeReport;
use larder_core::service::LarderService;
use larder_core::shopping::{
    AddOutcome, AddStatus, BatchAddSummary, MoveSummary, ReorderTarget, ShoppingInput,
    ShoppingListView,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// Days covered by a plan query without an explicit end.
const DEFAULT_PLAN_DAYS: i64 = 7;

#[derive(Clone)]
struct AppState {
    service: Arc<LarderService>,
}

// --- Request / Response types ---

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn default_quantity() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct CreatePantryRequest {
    name: String,
    quantity: f64,
    #[serde(default)]
    unit: String,
    expiry_date: Option<String>,
    category: Option<String>,
    min_quantity: Option<f64>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdatePantryRequest {
    name: Option<String>,
    quantity: Option<f64>,
    unit: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    expiry_date: Option<Option<String>>,
    category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    min_quantity: Option<Option<f64>>,
}

#[derive(Deserialize)]
struct ExpiringQuery {
    days: Option<i64>,
}

#[derive(Deserialize)]
struct RecipeRequest {
    name: String,
    #[serde(default)]
    servings: String,
    #[serde(default)]
    ingredient_groups: Vec<IngredientGroup>,
}

impl From<RecipeRequest> for NewRecipe {
    fn from(req: RecipeRequest) -> Self {
        NewRecipe {
            name: req.name,
            servings: req.servings,
            ingredient_groups: req.ingredient_groups,
        }
    }
}

#[derive(Deserialize)]
struct ShoppingItemRequest {
    name: String,
    #[serde(default = "default_quantity")]
    quantity: f64,
    #[serde(default)]
    unit: String,
    category: Option<String>,
}

impl From<ShoppingItemRequest> for NewShoppingItem {
    fn from(req: ShoppingItemRequest) -> Self {
        NewShoppingItem {
            category: req.category,
            ..NewShoppingItem::new(&req.name, req.quantity, &req.unit)
        }
    }
}

/// Either a free-text line or a structured item.
#[derive(Deserialize)]
#[serde(untagged)]
enum AddShoppingRequest {
    Text { text: String },
    Item(ShoppingItemRequest),
}

#[derive(Deserialize)]
struct PasteRequest {
    text: String,
}

#[derive(Deserialize)]
struct RenameCategoryRequest {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct ClearQuery {
    #[serde(default)]
    checked: bool,
}

#[derive(Deserialize)]
struct PlanQuery {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    date: String,
    meal_slot: String,
    recipe_id: Option<i64>,
    note: Option<String>,
    servings_override: Option<f64>,
}

#[derive(Deserialize)]
struct CookedRequest {
    #[serde(default = "default_true")]
    cooked: bool,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err:#}"))
}

fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{s}'. Use YYYY-MM-DD")))
}

fn plan_range(from: Option<&str>, to: Option<&str>) -> Result<PlanRange, ApiError> {
    let start = match from {
        Some(s) => parse_date(s)?,
        None => Local::now().date_naive(),
    };
    let end = match to {
        Some(s) => parse_date(s)?,
        None => start + chrono::Duration::days(DEFAULT_PLAN_DAYS - 1),
    };
    PlanRange::new(start, end).map_err(|e| bad_request(&e))
}

// --- Pantry handlers ---

async fn list_pantry(State(state): State<AppState>) -> Result<Json<Vec<PantryItem>>, ApiError> {
    Ok(Json(state.service.list_pantry().await?))
}

async fn create_pantry_item(
    State(state): State<AppState>,
    Json(req): Json<CreatePantryRequest>,
) -> Result<(StatusCode, Json<PantryItem>), ApiError> {
    let expiry_date = req.expiry_date.as_deref().map(parse_date).transpose()?;
    let item = NewPantryItem {
        name: req.name,
        quantity: req.quantity,
        unit: req.unit,
        expiry_date,
        category: req.category,
        min_quantity: req.min_quantity,
    };
    validate_new_pantry_item(&item).map_err(|e| bad_request(&e))?;
    let created = state.service.add_pantry_item(item).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_pantry_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PantryItem>, ApiError> {
    let item = state
        .service
        .get_pantry_item(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Pantry item {id} not found")))?;
    Ok(Json(item))
}

async fn update_pantry_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePantryRequest>,
) -> Result<Json<PantryItem>, ApiError> {
    let expiry_date = match req.expiry_date {
        Some(Some(s)) => Some(Some(parse_date(&s)?)),
        Some(None) => Some(None),
        None => None,
    };
    let update = UpdatePantryItem {
        name: req.name,
        quantity: req.quantity,
        unit: req.unit,
        expiry_date,
        category: req.category,
        min_quantity: req.min_quantity,
    };
    if update.name.is_none()
        && update.quantity.is_none()
        && update.unit.is_none()
        && update.expiry_date.is_none()
        && update.category.is_none()
        && update.min_quantity.is_none()
    {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }
    validate_pantry_update(&update).map_err(|e| bad_request(&e))?;

    state
        .service
        .get_pantry_item(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Pantry item {id} not found")))?;
    let item = state.service.update_pantry_item(id, update).await?;
    Ok(Json(item))
}

async fn delete_pantry_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service.delete_pantry_item(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Pantry item {id} not found")))
    }
}

async fn low_stock(State(state): State<AppState>) -> Result<Json<Vec<PantryItem>>, ApiError> {
    Ok(Json(state.service.low_stock().await?))
}

async fn expiring(
    State(state): State<AppState>,
    Query(params): Query<ExpiringQuery>,
) -> Result<Json<Vec<PantryItem>>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_PLAN_DAYS);
    if days < 0 {
        return Err(ApiError::BadRequest(
            "days must be zero or greater".to_string(),
        ));
    }
    let today = Local::now().date_naive();
    Ok(Json(state.service.expiring_within(today, days).await?))
}

// --- Recipe handlers ---

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    Ok(Json(state.service.list_recipes().await?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<RecipeRequest>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let recipe = NewRecipe::from(req);
    validate_new_recipe(&recipe).map_err(|e| bad_request(&e))?;
    let created = state.service.create_recipe(recipe).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = state
        .service
        .get_recipe(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(recipe))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RecipeRequest>,
) -> Result<Json<Recipe>, ApiError> {
    let recipe = NewRecipe::from(req);
    validate_new_recipe(&recipe).map_err(|e| bad_request(&e))?;
    state
        .service
        .get_recipe(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(state.service.update_recipe(id, recipe).await?))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service.delete_recipe(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Recipe {id} not found")))
    }
}

async fn recompute_recipes(
    State(state): State<AppState>,
) -> Result<Json<RecomputeReport>, ApiError> {
    Ok(Json(state.service.recompute_all().await?))
}

// --- Shopping handlers ---

async fn get_shopping_list(
    State(state): State<AppState>,
) -> Result<Json<ShoppingListView>, ApiError> {
    Ok(Json(state.service.shopping_list().await?))
}

async fn add_shopping_item(
    State(state): State<AppState>,
    Json(req): Json<AddShoppingRequest>,
) -> Result<(StatusCode, Json<AddOutcome>), ApiError> {
    let input = match req {
        AddShoppingRequest::Text { text } => {
            if text.trim().is_empty() {
                return Err(ApiError::BadRequest("text must not be empty".to_string()));
            }
            ShoppingInput::Line(text)
        }
        AddShoppingRequest::Item(item) => ShoppingInput::Item(item.into()),
    };
    let outcome = state
        .service
        .add_shopping_item(input)
        .await
        .map_err(|e| bad_request(&e))?;
    let status = match outcome.status {
        AddStatus::Added => StatusCode::CREATED,
        AddStatus::Updated => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn add_shopping_batch(
    State(state): State<AppState>,
    Json(items): Json<Vec<ShoppingItemRequest>>,
) -> Result<Json<BatchAddSummary>, ApiError> {
    let items = items.into_iter().map(NewShoppingItem::from).collect();
    Ok(Json(state.service.add_shopping_items(items).await?))
}

async fn paste_shopping_list(
    State(state): State<AppState>,
    Json(req): Json<PasteRequest>,
) -> Result<Json<BatchAddSummary>, ApiError> {
    Ok(Json(state.service.paste_shopping_list(&req.text).await?))
}

async fn clear_shopping_list(
    State(state): State<AppState>,
    Query(params): Query<ClearQuery>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = if params.checked {
        state.service.clear_checked().await?
    } else {
        state.service.clear_list().await?
    };
    Ok(Json(CountResponse { count }))
}

async fn get_shopping_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    let item = state
        .service
        .get_shopping_item(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Shopping item {id} not found")))?;
    Ok(Json(item))
}

async fn delete_shopping_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service.delete_shopping_item(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Shopping item {id} not found")))
    }
}

async fn toggle_checked(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    state
        .service
        .get_shopping_item(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Shopping item {id} not found")))?;
    Ok(Json(state.service.toggle_checked(id).await?))
}

async fn reorder_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(target): Json<ReorderTarget>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    state
        .service
        .get_shopping_item(id)
        .await
        .map_err(|_| ApiError::NotFound(format!("Shopping item {id} not found")))?;
    if let ReorderTarget::BeforeItem(target_id) = target {
        state
            .service
            .get_shopping_item(target_id)
            .await
            .map_err(|_| ApiError::NotFound(format!("Shopping item {target_id} not found")))?;
    }
    let item = state
        .service
        .reorder(id, target)
        .await
        .map_err(|e| bad_request(&e))?;
    Ok(Json(item))
}

async fn rename_category(
    State(state): State<AppState>,
    Json(req): Json<RenameCategoryRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state
        .service
        .rename_category(&req.from, &req.to)
        .await
        .map_err(|e| bad_request(&e))?;
    Ok(Json(CountResponse { count }))
}

async fn rebalance_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.service.rebalance_category(&category).await?;
    Ok(Json(CountResponse { count }))
}

async fn move_to_pantry(State(state): State<AppState>) -> Result<Json<MoveSummary>, ApiError> {
    Ok(Json(state.service.move_checked_to_pantry().await?))
}

async fn restock(State(state): State<AppState>) -> Result<Json<BatchAddSummary>, ApiError> {
    Ok(Json(state.service.restock_low_items().await?))
}

// --- Meal plan handlers ---

async fn list_plan(
    State(state): State<AppState>,
    Query(params): Query<PlanQuery>,
) -> Result<Json<Vec<MealPlanItem>>, ApiError> {
    let range = plan_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.service.list_plan(range).await?))
}

async fn create_plan_entry(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<MealPlanItem>), ApiError> {
    let entry = NewMealPlanItem {
        date: parse_date(&req.date)?,
        meal_slot: req.meal_slot,
        recipe_id: req.recipe_id,
        note: req.note,
        servings_override: req.servings_override,
    };
    validate_new_plan_entry(&entry).map_err(|e| bad_request(&e))?;
    if let Some(recipe_id) = entry.recipe_id {
        state
            .service
            .get_recipe(recipe_id)
            .await
            .map_err(|_| ApiError::BadRequest(format!("Recipe {recipe_id} not found")))?;
    }
    let created = state.service.add_plan_entry(entry).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_plan_cooked(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CookedRequest>,
) -> Result<Json<MealPlanItem>, ApiError> {
    let entry = state
        .service
        .set_plan_cooked(id, req.cooked)
        .await
        .map_err(|_| ApiError::NotFound(format!("Meal plan entry {id} not found")))?;
    Ok(Json(entry))
}

async fn delete_plan_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service.delete_plan_entry(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Meal plan entry {id} not found")))
    }
}

async fn generate_shopping_list(
    State(state): State<AppState>,
    Json(params): Json<PlanQuery>,
) -> Result<Json<PlanGenerationSummary>, ApiError> {
    let range = plan_range(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(state.service.generate_shopping_list(range).await?))
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/pantry", get(list_pantry).post(create_pantry_item))
        .route("/api/pantry/low", get(low_stock))
        .route("/api/pantry/expiring", get(expiring))
        .route(
            "/api/pantry/{id}",
            get(get_pantry_item)
                .put(update_pantry_item)
                .delete(delete_pantry_item),
        )
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route("/api/recipes/recompute", post(recompute_recipes))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route(
            "/api/shopping",
            get(get_shopping_list)
                .post(add_shopping_item)
                .delete(clear_shopping_list),
        )
        .route("/api/shopping/batch", post(add_shopping_batch))
        .route("/api/shopping/paste", post(paste_shopping_list))
        .route("/api/shopping/move-to-pantry", post(move_to_pantry))
        .route("/api/shopping/restock", post(restock))
        .route("/api/shopping/categories/rename", post(rename_category))
        .route(
            "/api/shopping/categories/{category}/rebalance",
            post(rebalance_category),
        )
        .route(
            "/api/shopping/{id}",
            get(get_shopping_item).delete(delete_shopping_item),
        )
        .route("/api/shopping/{id}/check", post(toggle_checked))
        .route("/api/shopping/{id}/reorder", post(reorder_item))
        .route("/api/plan", get(list_plan).post(create_plan_entry))
        .route("/api/plan/generate", post(generate_shopping_list))
        .route("/api/plan/{id}", delete(delete_plan_entry))
        .route("/api/plan/{id}/cooked", post(set_plan_cooked))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

pub async fn start_server(service: Arc<LarderService>, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = build_router(AppState {
        service: Arc::clone(&service),
    });

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind}. Any device on your network can read and change your larder."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    info!(%bind, port, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
