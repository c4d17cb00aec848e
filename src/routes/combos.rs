use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::combos::{ComboDetail, ComboList, CreateComboRequest, UpdateComboRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::combo_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_combos).post(create_combo))
        .route(
            "/{id}",
            get(get_combo).put(update_combo).delete(delete_combo),
        )
}

/// Admins also see inactive combos.
#[utoipa::path(
    get,
    path = "/api/combos",
    responses(
        (status = 200, description = "Combos with pricing", body = ApiResponse<ComboList>)
    ),
    tag = "Combos"
)]
pub async fn list_combos(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> AppResult<Json<ApiResponse<ComboList>>> {
    let include_inactive = user.as_ref().is_some_and(AuthUser::is_admin);
    let resp = combo_service::list_combos(&state, include_inactive).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/combos/{id}",
    params(
        ("id" = Uuid, Path, description = "Combo ID")
    ),
    responses(
        (status = 200, description = "Combo with items and prices", body = ApiResponse<ComboDetail>),
        (status = 404, description = "Not Found"),
    ),
    tag = "Combos"
)]
pub async fn get_combo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ComboDetail>>> {
    let resp = combo_service::get_combo(&state, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/combos",
    request_body = CreateComboRequest,
    responses(
        (status = 200, description = "Combo created", body = ApiResponse<ComboDetail>),
        (status = 400, description = "Invalid combo"),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Combos"
)]
pub async fn create_combo(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateComboRequest>,
) -> AppResult<Json<ApiResponse<ComboDetail>>> {
    let resp = combo_service::create_combo(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/combos/{id}",
    params(
        ("id" = Uuid, Path, description = "Combo ID")
    ),
    request_body = UpdateComboRequest,
    responses(
        (status = 200, description = "Combo updated", body = ApiResponse<ComboDetail>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Combos"
)]
pub async fn update_combo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateComboRequest>,
) -> AppResult<Json<ApiResponse<ComboDetail>>> {
    let resp = combo_service::update_combo(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/combos/{id}",
    params(
        ("id" = Uuid, Path, description = "Combo ID")
    ),
    responses(
        (status = 200, description = "Combo deleted", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Combos"
)]
pub async fn delete_combo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = combo_service::delete_combo(&state, &user, id).await?;
    Ok(Json(resp))
}
