use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::hash_token;
use crate::gemini::GeminiClient;
use pantry_core::backup::{self, BackupData};
use pantry_core::db::Database;
use pantry_core::generator::{GenerateRequest, GeneratedRecipe, GeneratorError, clean_ingredients};
use pantry_core::models::{
    ImportSummary, NewMealPlanEntry, NewRecipe, NewShoppingItem, Notification, Recipe,
    RecipeDetail, ShoppingListItem, normalize_name, validate_meal_type, validate_new_recipe,
    validate_quantity,
};
use pantry_core::planner::{self, PlannedWithShopping, WeekPlan};
use pantry_core::print;
use pantry_core::reconcile::save_recipe;
use pantry_core::reminders::{REMINDER_SLOTS, ReminderSlot, fire_reminder};
use pantry_core::shopping::{self, ShoppingCounts, ShoppingGroup};

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
pub(crate) struct AppState {
    db: Arc<Mutex<Database>>,
    generator: Option<Arc<GeminiClient>>,
    /// When false every request acts as `default_user_id`.
    auth: bool,
    default_user_id: String,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The user a request acts as, resolved by [`require_auth`].
#[derive(Clone)]
struct CurrentUser(String);

// --- Request / Response types ---

#[derive(Deserialize)]
struct RecipeQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct WeekQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct PlanMealRequest {
    #[serde(flatten)]
    entry: NewMealPlanEntry,
    #[serde(default)]
    add_to_shopping_list: bool,
}

#[derive(Deserialize)]
struct BulkPurchaseRequest {
    ids: Vec<String>,
    is_purchased: bool,
}

#[derive(Serialize)]
struct ShoppingListResponse {
    items: Vec<ShoppingListItem>,
    groups: Vec<ShoppingGroup>,
    counts: ShoppingCounts,
}

#[derive(Serialize)]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    unread: i64,
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
    Generator(GeneratorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Generator(err) => match err {
                err if err.is_validation() => (StatusCode::BAD_REQUEST, err.to_string()),
                GeneratorError::MissingCredential => {
                    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                }
                other => {
                    tracing::error!("Recipe generation failed: {other}");
                    let body = serde_json::json!({
                        "error": "Failed to generate recipe",
                        "details": other.to_string(),
                    });
                    return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
                }
            },
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<GeneratorError> for ApiError {
    fn from(err: GeneratorError) -> Self {
        Self::Generator(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err:#}"))
}

fn parse_date(date: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{date}'. Use YYYY-MM-DD")))
}

// --- Middleware ---

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user_id = if state.auth {
        let token_hash = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(hash_token);
        let user = token_hash.and_then(|hash| match state.db().find_user_by_token_hash(&hash) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Token lookup failed: {e:#}");
                None
            }
        });
        match user {
            Some(user) => user.id,
            None => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "Invalid or missing API token".to_string(),
                    }),
                )
                    .into_response();
            }
        }
    } else {
        state.default_user_id.clone()
    };
    request.extensions_mut().insert(CurrentUser(user_id));
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Generator handlers ---

async fn generate_recipe(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if clean_ingredients(&req.ingredients).is_empty() {
        return Err(GeneratorError::EmptyIngredients.into());
    }
    let generator = state
        .generator
        .as_ref()
        .ok_or(GeneratorError::MissingCredential)?;
    let recipe = generator.generate_async(&req).await?;
    Ok(Json(serde_json::json!({ "recipe": recipe })))
}

async fn save_generated_recipe(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(generated): Json<GeneratedRecipe>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    create_recipe_inner(&state, &user_id, &generated.into_new_recipe())
}

// --- Recipe handlers ---

fn create_recipe_inner(
    state: &AppState,
    user_id: &str,
    recipe: &NewRecipe,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    validate_new_recipe(recipe).map_err(|e| bad_request(&e))?;
    let db = state.db();
    let detail = save_recipe(&db, user_id, None, recipe).context("failed to save recipe")?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<NewRecipe>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    create_recipe_inner(&state, &user_id, &req)
}

async fn list_recipes(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(params): Query<RecipeQuery>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let search = params.q.as_deref().filter(|q| !q.trim().is_empty());
    let recipes = state
        .db()
        .list_recipes(&user_id, search)
        .context("database error")?;
    Ok(Json(recipes))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let detail = state
        .db()
        .get_recipe_detail(&user_id, &id)
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(detail))
}

async fn update_recipe(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<NewRecipe>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let db = state.db();
    db.get_recipe(&user_id, &id)
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    validate_new_recipe(&req).map_err(|e| bad_request(&e))?;
    let detail = save_recipe(&db, &user_id, Some(&id), &req).context("failed to update recipe")?;
    Ok(Json(detail))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .db()
        .delete_recipe(&user_id, &id)
        .context("failed to delete recipe")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Recipe {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Meal plan handlers ---

async fn get_week(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(params): Query<WeekQuery>,
) -> Result<Json<WeekPlan>, ApiError> {
    let date = match params.date.as_deref() {
        Some(d) => parse_date(d)?,
        None => Local::now().date_naive(),
    };
    planner::week_bounds(date).map_err(|e| bad_request(&e))?;
    let week = planner::week_plan(&state.db(), &user_id, date).context("database error")?;
    Ok(Json(week))
}

async fn plan_meal(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<PlanMealRequest>,
) -> Result<(StatusCode, Json<PlannedWithShopping>), ApiError> {
    validate_meal_type(&req.entry.meal_type).map_err(|e| bad_request(&e))?;
    parse_date(&req.entry.planned_date)?;

    let db = state.db();
    db.get_recipe(&user_id, &req.entry.recipe_id).map_err(|_| {
        ApiError::NotFound(format!("Recipe {} not found", req.entry.recipe_id))
    })?;
    let planned = planner::plan_meal(&db, &user_id, &req.entry, req.add_to_shopping_list)
        .context("failed to plan meal")?;
    Ok((StatusCode::CREATED, Json(planned)))
}

async fn remove_meal(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .db()
        .delete_meal_plan_entry(&user_id, &id)
        .context("failed to remove meal")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Meal plan entry {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Shopping list handlers ---

async fn get_shopping_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<ShoppingListResponse>, ApiError> {
    let items = state
        .db()
        .list_shopping_items(&user_id)
        .context("database error")?;
    Ok(Json(ShoppingListResponse {
        groups: shopping::aggregate(&items),
        counts: shopping::counts(&items),
        items,
    }))
}

async fn add_shopping_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<NewShoppingItem>,
) -> Result<(StatusCode, Json<ShoppingListItem>), ApiError> {
    if normalize_name(&req.ingredient_name).is_empty() {
        return Err(ApiError::BadRequest(
            "ingredient_name must not be empty".to_string(),
        ));
    }
    validate_quantity(req.quantity).map_err(|e| bad_request(&e))?;
    let item = shopping::add_item(&state.db(), &user_id, &req).context("failed to add item")?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn delete_shopping_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .db()
        .delete_shopping_item(&user_id, &id)
        .context("failed to delete item")?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Shopping item {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_shopping_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    let item = state
        .db()
        .toggle_shopping_item(&user_id, &id)
        .map_err(|_| ApiError::NotFound(format!("Shopping item {id} not found")))?;
    Ok(Json(item))
}

async fn bulk_purchase(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<BulkPurchaseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".to_string()));
    }
    let updated = state
        .db()
        .set_items_purchased(&user_id, &req.ids, req.is_purchased)
        .context("failed to update items")?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn clear_purchased(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .db()
        .clear_purchased(&user_id)
        .context("failed to clear purchased items")?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn print_shopping_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let items = state
        .db()
        .list_shopping_items(&user_id)
        .context("database error")?;
    let rows = print::printable_rows(&shopping::aggregate(&items));
    let pdf = print::render_pdf(&rows, Local::now().date_naive())?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"shopping-list.pdf\"",
            ),
        ],
        pdf,
    )
        .into_response())
}

// --- Export / Import handlers ---

async fn export_data(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<BackupData>, ApiError> {
    let data = backup::export_backup(&state.db(), &user_id).context("failed to export data")?;
    Ok(Json(data))
}

async fn import_data(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    body: String,
) -> Result<Json<ImportSummary>, ApiError> {
    let data = backup::parse_backup(&body).map_err(|e| bad_request(&e))?;
    let summary = backup::import_backup(&state.db(), &user_id, &data);
    Ok(Json(summary))
}

async fn export_csv(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let csv = backup::recipes_csv(&state.db(), &user_id).context("failed to export CSV")?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"recipes.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

// --- Notification handlers ---

async fn list_notifications(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let db = state.db();
    let notifications = db.list_notifications(&user_id).context("database error")?;
    let unread = db
        .unread_notification_count(&user_id)
        .context("database error")?;
    Ok(Json(NotificationsResponse {
        notifications,
        unread,
    }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let updated = state
        .db()
        .mark_notification_read(&user_id, &id)
        .context("database error")?;
    if !updated {
        return Err(ApiError::NotFound(format!("Notification {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state
        .db()
        .mark_all_notifications_read(&user_id)
        .context("database error")?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

async fn clear_notifications(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .db()
        .clear_notifications(&user_id)
        .context("database error")?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai/generate-recipe", post(generate_recipe))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route("/api/recipes/generated", post(save_generated_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/api/meal-plan", get(get_week).post(plan_meal))
        .route("/api/meal-plan/{id}", delete(remove_meal))
        .route(
            "/api/shopping-list",
            get(get_shopping_list).post(add_shopping_item),
        )
        .route("/api/shopping-list/bulk", post(bulk_purchase))
        .route("/api/shopping-list/purchased", delete(clear_purchased))
        .route("/api/shopping-list/print", get(print_shopping_list))
        .route("/api/shopping-list/{id}", delete(delete_shopping_item))
        .route("/api/shopping-list/{id}/toggle", post(toggle_shopping_item))
        .route("/api/export", get(export_data))
        .route("/api/export/recipes.csv", get(export_csv))
        .route("/api/import", post(import_data))
        .route(
            "/api/notifications",
            get(list_notifications).delete(clear_notifications),
        )
        .route(
            "/api/notifications/read-all",
            post(mark_all_notifications_read),
        )
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Reminders ---

async fn run_reminder(db: Arc<Mutex<Database>>, slot: ReminderSlot) {
    loop {
        let now = Local::now().naive_local();
        let next = slot.next_occurrence(now);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(meal = slot.meal_type, %next, "reminder armed");
        tokio::time::sleep(wait).await;

        let fired = {
            let guard = db.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            fire_reminder(&guard, &slot)
        };
        if let Err(e) = fired {
            tracing::error!("Reminder for {} failed: {e:#}", slot.meal_type);
        }
    }
}

fn spawn_reminders(db: &Arc<Mutex<Database>>) {
    for slot in REMINDER_SLOTS {
        tokio::spawn(run_reminder(Arc::clone(db), slot));
    }
}

// --- Server startup ---

pub struct ServerOptions {
    pub port: u16,
    pub bind: String,
    pub auth: bool,
    pub reminders: bool,
}

pub async fn start_server(
    db: Database,
    default_user_id: String,
    generator: Option<GeminiClient>,
    options: ServerOptions,
) -> anyhow::Result<()> {
    let ServerOptions {
        port,
        bind,
        auth,
        reminders,
    } = options;

    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        generator: generator.map(Arc::new),
        auth,
        default_user_id,
    };

    if auth {
        eprintln!("Authentication enabled. Create a token with: pantry user token <email>");
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
        if bind != "127.0.0.1" && bind != "localhost" {
            eprintln!(
                "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
            );
        }
    }
    if state.generator.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; recipe generation will fail");
    }
    if reminders {
        spawn_reminders(&state.db);
        tracing::info!("meal reminders scheduled");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(%bind, port, "server started");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_token;
    use crate::gemini::tests::{RECIPE_REPLY, mock_gemini, settings};
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestServer {
        state: AppState,
        token: String,
    }

    impl TestServer {
        fn new(auth: bool) -> Self {
            Self::with_generator(auth, None)
        }

        fn with_generator(auth: bool, generator: Option<GeminiClient>) -> Self {
            let db = Database::open_in_memory().unwrap();
            let local = db.get_or_create_user("local").unwrap();
            let token = generate_token();
            db.set_user_token_hash(&local.id, &hash_token(&token)).unwrap();
            Self {
                state: AppState {
                    db: Arc::new(Mutex::new(db)),
                    generator: generator.map(Arc::new),
                    auth,
                    default_user_id: local.id,
                },
                token,
            }
        }

        fn app(&self) -> Router {
            build_router(self.state.clone())
        }

        async fn send(&self, request: axum::http::Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.app().oneshot(request).await.unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
            (status, json)
        }

        fn get(&self, uri: &str) -> axum::http::Request<Body> {
            axum::http::Request::get(uri)
                .header("Authorization", format!("Bearer {}", self.token))
                .body(Body::empty())
                .unwrap()
        }

        fn delete(&self, uri: &str) -> axum::http::Request<Body> {
            axum::http::Request::delete(uri)
                .header("Authorization", format!("Bearer {}", self.token))
                .body(Body::empty())
                .unwrap()
        }

        fn json(&self, method: &str, uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
            axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        }

        async fn create_recipe(&self, body: serde_json::Value) -> serde_json::Value {
            let (status, json) = self.send(self.json("POST", "/api/recipes", &body)).await;
            assert_eq!(status, StatusCode::CREATED);
            json
        }
    }

    fn pasta() -> serde_json::Value {
        serde_json::json!({
            "title": "Tomato Pasta",
            "prep_time": 20,
            "ingredients": [
                {"name": "Tomato", "quantity": 200, "unit": "g"},
                {"name": "spaghetti", "quantity": 100, "unit": "g"}
            ]
        })
    }

    // --- Auth and middleware ---

    #[tokio::test]
    async fn auth_missing_token_returns_401() {
        let server = TestServer::new(true);
        let response = server
            .app()
            .oneshot(
                axum::http::Request::get("/api/recipes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid or missing API token");
    }

    #[tokio::test]
    async fn auth_wrong_token_returns_401() {
        let server = TestServer::new(true);
        let (status, _) = server
            .send(
                axum::http::Request::get("/api/recipes")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_correct_token_succeeds() {
        let server = TestServer::new(true);
        let (status, json) = server.send(server.get("/api/recipes")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_auth_mode_acts_as_default_user() {
        let server = TestServer::new(false);
        server.create_recipe(pasta()).await;
        let (status, json) = server
            .send(
                axum::http::Request::get("/api/recipes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tokens_scope_data_per_user() {
        let server = TestServer::new(true);
        let recipe = server.create_recipe(pasta()).await;

        let other_token = generate_token();
        {
            let db = server.state.db();
            let other = db.create_user("other@example.com", None).unwrap();
            db.set_user_token_hash(&other.id, &hash_token(&other_token)).unwrap();
        }
        let (status, _) = server
            .send(
                axum::http::Request::get(format!("/api/recipes/{}", recipe["id"].as_str().unwrap()))
                    .header("Authorization", format!("Bearer {other_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let server = TestServer::new(false);
        let response = server
            .app()
            .oneshot(server.get("/api/recipes"))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let server = TestServer::new(true);
        let response = server
            .app()
            .oneshot(
                axum::http::Request::get("/api/recipes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let server = TestServer::new(false);
        let response = server
            .app()
            .oneshot(
                axum::http::Request::post("/api/import")
                    .header("content-type", "application/json")
                    .body(Body::from(vec![b' '; BODY_LIMIT + 1]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/pantry.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    // --- Generator ---

    #[tokio::test]
    async fn generate_rejects_empty_ingredients() {
        let server = TestServer::new(true);
        let (status, json) = server
            .send(server.json(
                "POST",
                "/api/ai/generate-recipe",
                &serde_json::json!({"ingredients": ["  "]}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "At least one ingredient is required");
    }

    #[tokio::test]
    async fn generate_without_key_returns_500() {
        let server = TestServer::new(true);
        let (status, json) = server
            .send(server.json(
                "POST",
                "/api/ai/generate-recipe",
                &serde_json::json!({"ingredients": ["egg"]}),
            ))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "API key not configured");
    }

    #[tokio::test]
    async fn generate_returns_recipe() {
        let base = mock_gemini(RECIPE_REPLY).await;
        let client = GeminiClient::new(&settings(&base, Some("k"))).unwrap();
        let server = TestServer::with_generator(true, Some(client));

        let (status, json) = server
            .send(server.json(
                "POST",
                "/api/ai/generate-recipe",
                &serde_json::json!({"ingredients": ["tomato", "egg"], "preferences": "vegetarian"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["recipe"]["title"], "Tomato Egg Scramble");

        // Nothing is stored until the client saves it
        assert!(server.state.db().list_recipes(&server.state.default_user_id, None).unwrap().is_empty());

        let (status, saved) = server
            .send(server.json("POST", "/api/recipes/generated", &json["recipe"]))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(saved["ingredients"].as_array().unwrap().len(), 2);
        assert!(saved["macros"].is_object());
    }

    #[tokio::test]
    async fn generate_unparseable_reply_returns_details() {
        let base = mock_gemini("Sorry, I can only talk about cooking in general.").await;
        let client = GeminiClient::new(&settings(&base, Some("k"))).unwrap();
        let server = TestServer::with_generator(true, Some(client));

        let (status, json) = server
            .send(server.json(
                "POST",
                "/api/ai/generate-recipe",
                &serde_json::json!({"ingredients": ["egg"]}),
            ))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Failed to generate recipe");
        assert!(json["details"].as_str().unwrap().contains("No JSON object"));
    }

    // --- Recipes ---

    #[tokio::test]
    async fn recipe_crud() {
        let server = TestServer::new(true);
        let created = server.create_recipe(pasta()).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["ingredients"][0]["ingredient"]["name"], "tomato");

        let (status, found) = server.send(server.get("/api/recipes?q=PASTA")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.as_array().unwrap().len(), 1);

        let (status, updated) = server
            .send(server.json(
                "PUT",
                &format!("/api/recipes/{id}"),
                &serde_json::json!({
                    "title": "Tomato Pasta",
                    "ingredients": [{"name": "tomato", "quantity": 300, "unit": "g"}]
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["ingredients"].as_array().unwrap().len(), 1);
        assert_eq!(updated["ingredients"][0]["quantity"], 300.0);

        let (status, _) = server.send(server.delete(&format!("/api/recipes/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = server.send(server.get(&format!("/api/recipes/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recipe_validation_returns_400() {
        let server = TestServer::new(true);
        let (status, json) = server
            .send(server.json("POST", "/api/recipes", &serde_json::json!({"title": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("title"));

        let (status, _) = server
            .send(server.json("PUT", "/api/recipes/missing", &pasta()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // --- Meal plan and shopping list ---

    #[tokio::test]
    async fn plan_meal_fills_shopping_list() {
        let server = TestServer::new(true);
        let recipe = server.create_recipe(pasta()).await;
        let body = serde_json::json!({
            "recipe_id": recipe["id"],
            "planned_date": "2024-06-12",
            "meal_type": "dinner",
            "add_to_shopping_list": true
        });
        let (status, planned) = server.send(server.json("POST", "/api/meal-plan", &body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(planned["shopping_items"].as_array().unwrap().len(), 2);

        server
            .send(server.json(
                "POST",
                "/api/shopping-list",
                &serde_json::json!({"ingredient_name": "Tomato", "quantity": 300, "unit": "g"}),
            ))
            .await;

        let (_, list) = server.send(server.get("/api/shopping-list")).await;
        assert_eq!(list["items"].as_array().unwrap().len(), 3);
        assert_eq!(list["groups"].as_array().unwrap().len(), 2);
        assert_eq!(list["groups"][0]["quantity"], 500.0);
        assert_eq!(list["counts"]["pending"], 3);

        let (_, week) = server.send(server.get("/api/meal-plan?date=2024-06-15")).await;
        assert_eq!(week["start"], "2024-06-10");
        assert_eq!(week["days"][2]["meals"][0]["recipe"]["title"], "Tomato Pasta");

        let entry = planned["entry"]["id"].as_str().unwrap();
        let (status, _) = server.send(server.delete(&format!("/api/meal-plan/{entry}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn plan_meal_validation() {
        let server = TestServer::new(true);
        let recipe = server.create_recipe(pasta()).await;

        let bad_type = serde_json::json!({
            "recipe_id": recipe["id"], "planned_date": "2024-06-12", "meal_type": "brunch"
        });
        let (status, _) = server.send(server.json("POST", "/api/meal-plan", &bad_type)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = serde_json::json!({
            "recipe_id": "nope", "planned_date": "2024-06-12", "meal_type": "lunch"
        });
        let (status, _) = server.send(server.json("POST", "/api/meal-plan", &unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = server.send(server.get("/api/meal-plan?date=June")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = server
            .send(server.get("/api/meal-plan?date=%2B262142-12-31"))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("out of range"));
    }

    #[tokio::test]
    async fn shopping_toggle_bulk_and_clear() {
        let server = TestServer::new(true);
        let mut ids = Vec::new();
        for (name, qty) in [("milk", 1), ("milk", 2), ("bread", 1)] {
            let (status, item) = server
                .send(server.json(
                    "POST",
                    "/api/shopping-list",
                    &serde_json::json!({"ingredient_name": name, "quantity": qty, "unit": "unit"}),
                ))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            ids.push(item["id"].as_str().unwrap().to_string());
        }

        let (status, toggled) = server
            .send(server.json("POST", &format!("/api/shopping-list/{}/toggle", ids[2]), &serde_json::json!({})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["is_purchased"], true);

        let (_, bulk) = server
            .send(server.json(
                "POST",
                "/api/shopping-list/bulk",
                &serde_json::json!({"ids": [ids[0], ids[1]], "is_purchased": true}),
            ))
            .await;
        assert_eq!(bulk["updated"], 2);

        let (_, list) = server.send(server.get("/api/shopping-list")).await;
        assert_eq!(list["counts"]["completed"], 3);
        assert_eq!(list["groups"].as_array().unwrap().len(), 3);

        let (_, cleared) = server.send(server.delete("/api/shopping-list/purchased")).await;
        assert_eq!(cleared["deleted"], 3);

        let (status, _) = server.send(server.delete(&format!("/api/shopping-list/{}", ids[0]))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = server
            .send(server.json(
                "POST",
                "/api/shopping-list",
                &serde_json::json!({"ingredient_name": "salt", "quantity": 0}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn shopping_add_with_unknown_ingredient_id() {
        let server = TestServer::new(true);
        let (status, item) = server
            .send(server.json(
                "POST",
                "/api/shopping-list",
                &serde_json::json!({
                    "ingredient_name": "saffron", "quantity": 1, "ingredient_id": "not-in-catalog"
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(item["ingredient_id"].is_null());
    }

    #[tokio::test]
    async fn print_returns_pdf() {
        let server = TestServer::new(true);
        server
            .send(server.json(
                "POST",
                "/api/shopping-list",
                &serde_json::json!({"ingredient_name": "eggs", "quantity": 6}),
            ))
            .await;
        let response = server
            .app()
            .oneshot(server.get("/api/shopping-list/print"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/pdf"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.starts_with(b"%PDF"));
    }

    // --- Backup ---

    #[tokio::test]
    async fn export_import_round_trip() {
        let server = TestServer::new(true);
        let recipe = server.create_recipe(pasta()).await;
        server
            .send(server.json(
                "POST",
                "/api/meal-plan",
                &serde_json::json!({
                    "recipe_id": recipe["id"], "planned_date": "2024-06-12", "meal_type": "lunch"
                }),
            ))
            .await;

        let (status, export) = server.send(server.get("/api/export")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(export["version"], "1.0");
        assert_eq!(export["mealPlans"].as_array().unwrap().len(), 1);

        let (status, summary) = server.send(server.json("POST", "/api/import", &export)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["recipes_imported"], 1);
        assert_eq!(summary["meal_plans_imported"], 1);

        let (_, recipes) = server.send(server.get("/api/recipes")).await;
        assert_eq!(recipes.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn import_malformed_returns_400() {
        let server = TestServer::new(true);
        let (status, json) = server
            .send(server.json("POST", "/api/import", &serde_json::json!({"recipes": []})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Invalid backup file"));
    }

    #[tokio::test]
    async fn export_csv_download() {
        let server = TestServer::new(true);
        server.create_recipe(pasta()).await;
        let response = server
            .app()
            .oneshot(server.get("/api/export/recipes.csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/csv")
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"200 g tomato; 100 g spaghetti\""));
    }

    // --- Notifications ---

    #[tokio::test]
    async fn notifications_flow() {
        let server = TestServer::new(true);
        {
            let db = server.state.db();
            fire_reminder(&db, &REMINDER_SLOTS[0]).unwrap();
            fire_reminder(&db, &REMINDER_SLOTS[1]).unwrap();
        }

        let (_, list) = server.send(server.get("/api/notifications")).await;
        assert_eq!(list["unread"], 2);
        let id = list["notifications"][0]["id"].as_str().unwrap().to_string();

        let (status, _) = server
            .send(server.json("POST", &format!("/api/notifications/{id}/read"), &serde_json::json!({})))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, list) = server.send(server.get("/api/notifications")).await;
        assert_eq!(list["unread"], 1);

        let (_, all) = server
            .send(server.json("POST", "/api/notifications/read-all", &serde_json::json!({})))
            .await;
        assert_eq!(all["updated"], 1);

        let (_, cleared) = server.send(server.delete("/api/notifications")).await;
        assert_eq!(cleared["deleted"], 2);

        let (status, _) = server
            .send(server.json("POST", "/api/notifications/missing/read", &serde_json::json!({})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
