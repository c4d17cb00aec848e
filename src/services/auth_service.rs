use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit,
    config::AppConfig,
    dto::auth::{
        Claims, ForgotPasswordRequest, LoginRequest, LoginResponse, OtpPurpose, OtpSent,
        RegisterRequest, RegisterResponse, ResendOtpRequest, ResetPasswordRequest,
        VerifyOtpRequest,
    },
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    error::{AppError, AppResult},
    models::{ROLE_USER, User},
    response::{ApiResponse, Meta},
    services::otp_service,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_secret(secret: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| AppError::internal(e))?
        .to_string();
    Ok(hash)
}

pub(crate) fn verify_secret(secret: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::internal("Invalid password hash"))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn issue_token(config: &AppConfig, user: &UserModel) -> AppResult<LoginResponse> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.jwt_ttl_hours))
        .ok_or_else(|| AppError::internal("Failed to set expiration"))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(e))?;

    Ok(LoginResponse {
        token,
        token_type: "Bearer".into(),
        expires_at: expiration.timestamp(),
        user: User::from(user.clone()),
    })
}

async fn find_by_email(state: &AppState, email: &str) -> AppResult<Option<UserModel>> {
    Ok(Users::find()
        .filter(UserCol::Email.eq(email))
        .one(&state.orm)
        .await?)
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<RegisterResponse>> {
    let email = normalize_email(&payload.email)?;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }
    validate_password(&payload.password)?;

    let user = match find_by_email(state, &email).await? {
        Some(existing) if existing.is_verified => {
            return Err(AppError::Conflict("Email is already taken".to_string()));
        }
        // Unverified accounts may re-register; the newest details win.
        Some(existing) => {
            let mut active: UserActive = existing.into();
            active.name = Set(name);
            active.password_hash = Set(hash_secret(&payload.password)?);
            active.update(&state.orm).await?
        }
        None => {
            UserActive {
                id: Set(Uuid::new_v4()),
                name: Set(name),
                email: Set(email.clone()),
                password_hash: Set(hash_secret(&payload.password)?),
                role: Set(ROLE_USER.into()),
                is_verified: Set(false),
                created_at: Set(Utc::now().into()),
            }
            .insert(&state.orm)
            .await?
        }
    };

    let sent = otp_service::issue(state, &email, OtpPurpose::VerifyEmail).await?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "User created, verification code sent",
        RegisterResponse {
            user: User::from(user),
            resend_after_secs: sent.resend_after_secs,
        },
        None,
    ))
}

pub async fn verify_email(
    state: &AppState,
    payload: VerifyOtpRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let email = normalize_email(&payload.email)?;
    let user = find_by_email(state, &email)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired code".into()))?;
    if user.is_verified {
        return Err(AppError::BadRequest("Email is already verified".into()));
    }

    let txn = state.orm.begin().await?;
    otp_service::verify(state, &txn, &email, OtpPurpose::VerifyEmail, &payload.code).await?;
    let mut active: UserActive = user.into();
    active.is_verified = Set(true);
    let user = active.update(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_verified",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    let resp = issue_token(&state.config, &user)?;
    Ok(ApiResponse::success("Email verified", resp, Some(Meta::empty())))
}

pub async fn resend_otp(
    state: &AppState,
    payload: ResendOtpRequest,
) -> AppResult<ApiResponse<OtpSent>> {
    let email = normalize_email(&payload.email)?;
    let purpose = payload.purpose.unwrap_or(OtpPurpose::VerifyEmail);
    let user = find_by_email(state, &email).await?.ok_or(AppError::NotFound)?;
    if matches!(purpose, OtpPurpose::VerifyEmail) && user.is_verified {
        return Err(AppError::BadRequest("Email is already verified".into()));
    }

    let sent = otp_service::issue(state, &email, purpose).await?;
    Ok(ApiResponse::success("Code sent", sent, Some(Meta::empty())))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let email = payload.email.trim().to_lowercase();
    let user = match find_by_email(state, &email).await? {
        Some(u) => u,
        None => return Err(AppError::Unauthorized("Invalid email or password".into())),
    };

    if !verify_secret(&payload.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }
    if !user.is_verified {
        return Err(AppError::ForbiddenWith(
            "Email is not verified, check your inbox for the code".into(),
        ));
    }

    let resp = issue_token(&state.config, &user)?;

    audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}

/// Always answers the same way so the endpoint cannot be used to discover
/// which emails are registered.
pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let email = normalize_email(&payload.email)?;
    if find_by_email(state, &email).await?.is_some() {
        match otp_service::issue(state, &email, OtpPurpose::ResetPassword).await {
            Ok(_) | Err(AppError::TooManyRequests { .. }) => {}
            Err(err) => return Err(err),
        }
    } else {
        tracing::debug!(email = %email, "password reset requested for unknown email");
    }

    Ok(ApiResponse::success(
        "If the email is registered, a reset code has been sent",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let email = normalize_email(&payload.email)?;
    validate_password(&payload.new_password)?;
    let user = find_by_email(state, &email)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired code".into()))?;

    let txn = state.orm.begin().await?;
    otp_service::verify(state, &txn, &email, OtpPurpose::ResetPassword, &payload.code).await?;
    let user_id = user.id;
    let mut active: UserActive = user.into();
    active.password_hash = Set(hash_secret(&payload.new_password)?);
    // Receiving the code proves ownership of the address.
    active.is_verified = Set(true);
    active.update(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        Some(user_id),
        "password_reset",
        "users",
        serde_json::json!({ "user_id": user_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Password updated",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_validates_email() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@localhost").is_err());
        assert!(normalize_email("a b@example.com").is_err());
    }

    #[test]
    fn enforces_minimum_password_length() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }

    #[test]
    fn secret_hash_round_trip() {
        let hash = hash_secret("482913").unwrap();
        assert!(verify_secret("482913", &hash).unwrap());
        assert!(!verify_secret("000000", &hash).unwrap());
    }

    #[test]
    fn issued_token_decodes_to_same_user() {
        let config = AppConfig {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "test-secret".into(),
            jwt_ttl_hours: 1,
            otp: Default::default(),
            pricing: Default::default(),
            cors_origin: None,
            smtp: None,
        };
        let user = UserModel {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "x".into(),
            role: "admin".into(),
            is_verified: true,
            created_at: Utc::now().into(),
        };
        let resp = issue_token(&config, &user).unwrap();
        assert_eq!(resp.token_type, "Bearer");
        assert!(resp.user.is_admin);
        let decoded =
            crate::middleware::auth::decode_token(&resp.token, &config.jwt_secret).unwrap();
        assert_eq!(decoded.user_id, user.id);
    }
}
