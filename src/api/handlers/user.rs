use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::auth::{hash_password, issue_token, verify_password};
use crate::api::state::AppState;
use crate::domain::user::User;
use crate::error::GophermartError;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthResponse>), (StatusCode, String)> {
    if body.login.trim().is_empty() || body.password.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "login and password are required".into()));
    }

    let password_hash = hash_password(&body.password).map_err(internal_error)?;
    let user = match create_user(&state, &body.login, &password_hash).await {
        Ok(user) => user,
        Err(GophermartError::LoginTaken(login)) => {
            return Err((StatusCode::CONFLICT, format!("login {login} already taken")))
        }
        Err(err) => return Err(internal_error(err)),
    };

    let token = issue_token(user.id, &state.auth.jwt_secret, state.auth.jwt_ttl_secs)
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let user = find_user_by_login(&state, &body.login)
        .await
        .map_err(internal_error)?
        .ok_or((StatusCode::UNAUTHORIZED, "invalid credentials".to_string()))?;

    let valid = verify_password(&body.password, &user.password_hash).map_err(internal_error)?;
    if !valid {
        return Err((StatusCode::UNAUTHORIZED, "invalid credentials".to_string()));
    }

    let token = issue_token(user.id, &state.auth.jwt_secret, state.auth.jwt_ttl_secs)
        .map_err(internal_error)?;
    Ok(Json(AuthResponse { token }))
}

async fn create_user(
    state: &AppState,
    login: &str,
    password_hash: &str,
) -> Result<User, GophermartError> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (login, password_hash)
        VALUES ($1, $2)
        RETURNING id, login, password_hash, created_at
        "#,
    )
    .bind(login)
    .bind(password_hash)
    .fetch_one(state.repository.pool())
    .await;

    match row {
        Ok(row) => Ok(row_to_user(&row)),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(GophermartError::LoginTaken(login.to_string()))
        }
        Err(err) => Err(GophermartError::Database(err)),
    }
}

async fn find_user_by_login(state: &AppState, login: &str) -> Result<Option<User>, GophermartError> {
    let row = sqlx::query("SELECT id, login, password_hash, created_at FROM users WHERE login = $1")
        .bind(login)
        .fetch_optional(state.repository.pool())
        .await?;
    Ok(row.map(|r| row_to_user(&r)))
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> User {
    use sqlx::Row;
    User {
        id: row.get("id"),
        login: row.get("login"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
    }
}

fn internal_error(err: GophermartError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
