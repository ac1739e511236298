//! REST API layer using Axum
//!
//! - Public: `/`, `/health`, `/api/auth/login`, Swagger UI on `/docs`.
//! - Bearer-protected: `/api/auth/me`, `/api/notes[/:id]`, `/api/tenants/:slug[/upgrade]`.
//! - Every response carries helmet-style security headers, and each client IP
//!   is rate limited.
//! - Shared state holds the Sled store, JWT keys and the rate limiter.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;
use validator::Validate;

use crate::access::Principal;
use crate::auth::{bearer_token, verify_password, JwtKeys};
use crate::error::{ApiError, ApiResult, ErrorResponse, FieldError};
use crate::models::{AuthorSummary, NoteView, Role, Subscription, TenantSummary, UserView};
use crate::notes::{self, CreateNoteRequest, UpdateNoteRequest};
use crate::rate_limit::{self, RateLimitConfig, RateLimiter};
use crate::storage::Storage;
use crate::tenants;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    storage: Storage,
    jwt: JwtKeys,
    cors_origins: Vec<String>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        storage: Storage,
        jwt: JwtKeys,
        cors_origins: Vec<String>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            storage,
            jwt,
            cors_origins,
            limiter: Arc::new(RateLimiter::new(rate_limit)),
        }
    }
}

/// Response headers set on every reply unless a handler already set them.
const SECURITY_HEADERS: [(&str, &str); 10] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("cross-origin-opener-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
];

type SharedState = Arc<AppState>;

#[derive(Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserView,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user: UserView,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct TenantResponse {
    pub tenant: TenantSummary,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UpgradeResponse {
    pub message: String,
    pub tenant: TenantSummary,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Tenant Notes API", description = "Multi-tenant notes with per-plan quotas"),
    paths(
        health_handler,
        login_handler,
        me_handler,
        create_note_handler,
        list_notes_handler,
        get_note_handler,
        update_note_handler,
        delete_note_handler,
        tenant_info_handler,
        upgrade_tenant_handler,
    ),
    components(schemas(
        LoginRequest, LoginResponse, MeResponse, UserView, Role,
        CreateNoteRequest, UpdateNoteRequest, NoteView, AuthorSummary,
        TenantResponse, UpgradeResponse, TenantSummary, Subscription,
        MessageResponse, HealthResponse, ErrorResponse, FieldError,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Login and current user"),
        (name = "notes", description = "Notes of the caller's tenant"),
        (name = "tenants", description = "Tenant info and plan upgrade")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized("No token, authorization denied"))?;

    let claims = state
        .jwt
        .validate_jwt(token)
        .map_err(|_| ApiError::Unauthorized("Token is not valid"))?;

    let user = state
        .storage
        .user(claims.sub)?
        .ok_or(ApiError::Unauthorized("Token is not valid"))?;

    req.extensions_mut().insert(Principal::from(&user));
    Ok(next.run(req).await)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
}

fn with_security_headers(router: Router) -> Router {
    SECURITY_HEADERS.iter().fold(router, |router, &(name, value)| {
        router.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ))
    })
}

/// Create Axum router with the notes API
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    let limiter = state.limiter.clone();
    let state = Arc::new(state);

    let auth_routes = Router::new()
        .route("/api/auth/me", get(me_handler))
        .route("/api/notes", post(create_note_handler).get(list_notes_handler))
        .route(
            "/api/notes/:id",
            get(get_note_handler)
                .put(update_note_handler)
                .delete(delete_note_handler),
        )
        .route("/api/tenants/:slug", get(tenant_info_handler))
        .route("/api/tenants/:slug/upgrade", post(upgrade_tenant_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .merge(auth_routes)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(fallback_handler)
        .layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);
    with_security_headers(router)
}

/// Unwrap a JSON body, turning extractor rejections into a validation error.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ApiError::Validation(vec![FieldError {
            field: "body".to_owned(),
            message: rejection.body_text(),
        }])
    })
}

/// Unknown or malformed ids are indistinguishable from foreign ones.
fn note_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Note not found"))
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Tenant Notes API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "auth": "/api/auth",
            "notes": "/api/notes",
            "tenants": "/api/tenants",
            "docs": "/docs"
        }
    }))
}

/// Health check handler
#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
    })
}

async fn fallback_handler() -> ApiError {
    ApiError::NotFound("Route not found")
}

#[utoipa::path(
    post, path = "/api/auth/login", tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, body = LoginResponse),
        (status = 400, body = ErrorResponse),
        (status = 401, body = ErrorResponse)
    )
)]
async fn login_handler(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let payload = json_body(payload)?;
    payload.validate()?;

    let Some(user) = state.storage.user_by_email(&payload.email)? else {
        info!(email = %payload.email, "login for unknown email");
        return Err(ApiError::Unauthorized("Invalid credentials"));
    };

    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&payload.password, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !verified {
        info!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::Unauthorized("Invalid credentials"));
    }

    let tenant = state
        .storage
        .tenant(&Principal::from(&user).scope())?
        .ok_or_else(|| ApiError::Internal(format!("user {} has no tenant", user.id)))?;
    let token = state
        .jwt
        .create_jwt(&user)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(user_id = %user.id, tenant = %tenant.slug, "user logged in");
    Ok(Json(LoginResponse {
        token,
        user: UserView::new(&user, &tenant),
    }))
}

#[utoipa::path(
    get, path = "/api/auth/me", tag = "auth",
    responses((status = 200, body = MeResponse), (status = 401, body = ErrorResponse)),
    security(("bearer" = []))
)]
async fn me_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .storage
        .user(principal.user_id())?
        .ok_or(ApiError::Unauthorized("Token is not valid"))?;
    let tenant = state
        .storage
        .tenant(&principal.scope())?
        .ok_or(ApiError::NotFound("Tenant not found"))?;
    Ok(Json(MeResponse {
        user: UserView::new(&user, &tenant),
    }))
}

#[utoipa::path(
    post, path = "/api/notes", tag = "notes",
    request_body = CreateNoteRequest,
    responses(
        (status = 201, body = NoteView),
        (status = 400, body = ErrorResponse),
        (status = 403, description = "Free plan note limit reached", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
async fn create_note_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateNoteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<NoteView>)> {
    let payload = json_body(payload)?;
    let note = notes::create_note(&state.storage, &principal, payload)?;
    Ok((StatusCode::CREATED, Json(note)))
}

#[utoipa::path(
    get, path = "/api/notes", tag = "notes",
    responses((status = 200, description = "Newest first", body = Vec<NoteView>)),
    security(("bearer" = []))
)]
async fn list_notes_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<NoteView>>> {
    notes::list_notes(&state.storage, &principal).map(Json)
}

#[utoipa::path(
    get, path = "/api/notes/{id}", tag = "notes",
    params(("id" = String, Path, description = "Note id")),
    responses((status = 200, body = NoteView), (status = 404, body = ErrorResponse)),
    security(("bearer" = []))
)]
async fn get_note_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<NoteView>> {
    notes::get_note(&state.storage, &principal, note_id(&id)?).map(Json)
}

#[utoipa::path(
    put, path = "/api/notes/{id}", tag = "notes",
    params(("id" = String, Path, description = "Note id")),
    request_body = UpdateNoteRequest,
    responses(
        (status = 200, body = NoteView),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
async fn update_note_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateNoteRequest>, JsonRejection>,
) -> ApiResult<Json<NoteView>> {
    let payload = json_body(payload)?;
    notes::update_note(&state.storage, &principal, note_id(&id)?, payload).map(Json)
}

#[utoipa::path(
    delete, path = "/api/notes/{id}", tag = "notes",
    params(("id" = String, Path, description = "Note id")),
    responses((status = 200, body = MessageResponse), (status = 404, body = ErrorResponse)),
    security(("bearer" = []))
)]
async fn delete_note_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    notes::delete_note(&state.storage, &principal, note_id(&id)?)?;
    Ok(Json(MessageResponse {
        message: "Note deleted successfully".to_owned(),
    }))
}

#[utoipa::path(
    get, path = "/api/tenants/{slug}", tag = "tenants",
    params(("slug" = String, Path, description = "Caller's own tenant slug")),
    responses((status = 200, body = TenantResponse), (status = 403, body = ErrorResponse)),
    security(("bearer" = []))
)]
async fn tenant_info_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(slug): Path<String>,
) -> ApiResult<Json<TenantResponse>> {
    let tenant = tenants::tenant_info(&state.storage, &principal, &slug)?;
    Ok(Json(TenantResponse { tenant }))
}

#[utoipa::path(
    post, path = "/api/tenants/{slug}/upgrade", tag = "tenants",
    params(("slug" = String, Path, description = "Caller's own tenant slug")),
    responses((status = 200, body = UpgradeResponse), (status = 403, body = ErrorResponse)),
    security(("bearer" = []))
)]
async fn upgrade_tenant_handler(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    Path(slug): Path<String>,
) -> ApiResult<Json<UpgradeResponse>> {
    let tenant = tenants::upgrade_tenant(&state.storage, &principal, &slug)?;
    Ok(Json(UpgradeResponse {
        message: "Successfully upgraded to Pro plan".to_owned(),
        tenant,
    }))
}
