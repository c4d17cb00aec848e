use chrono::{Duration, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    config::OtpConfig,
    db::OrmConn,
    dto::auth::{OtpPurpose, OtpSent},
    entity::otp_codes::{ActiveModel as OtpActive, Column as OtpCol, Entity as OtpCodes},
    error::{AppError, AppResult},
    mailer::otp_email,
    services::auth_service::{hash_secret, verify_secret},
    state::AppState,
};

/// Generate a 6-digit one-time code.
pub fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(100_000..1_000_000);
    code.to_string()
}

/// Issue a fresh code, revoking earlier ones, and email it.
pub async fn issue(state: &AppState, email: &str, purpose: OtpPurpose) -> AppResult<OtpSent> {
    let config = &state.config.otp;
    let now = Utc::now();

    let latest = OtpCodes::find()
        .filter(OtpCol::Email.eq(email))
        .filter(OtpCol::Purpose.eq(purpose.as_str()))
        .order_by_desc(OtpCol::CreatedAt)
        .one(&state.orm)
        .await?;
    if let Some(latest) = latest {
        let elapsed = (now - latest.created_at.with_timezone(&Utc)).num_seconds();
        let retry_after_secs = config.resend_cooldown_secs - elapsed;
        if retry_after_secs > 0 {
            return Err(AppError::TooManyRequests { retry_after_secs });
        }
    }

    OtpCodes::update_many()
        .col_expr(OtpCol::ConsumedAt, Expr::value(Some(now.fixed_offset())))
        .filter(OtpCol::Email.eq(email))
        .filter(OtpCol::Purpose.eq(purpose.as_str()))
        .filter(OtpCol::ConsumedAt.is_null())
        .exec(&state.orm)
        .await?;

    let code = generate_code();
    OtpActive {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        purpose: Set(purpose.as_str().to_string()),
        code_hash: Set(hash_secret(&code)?),
        expires_at: Set((now + Duration::minutes(config.ttl_minutes)).into()),
        attempts: Set(0),
        consumed_at: Set(None),
        created_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    let (subject, body) = otp_email(&code, purpose.as_str(), config.ttl_minutes);
    state
        .mailer
        .send(email, &subject, &body)
        .await
        .map_err(|err| AppError::Internal(anyhow::anyhow!("failed to send OTP email: {err}")))?;

    tracing::info!(email = %email, purpose = purpose.as_str(), "otp issued");
    Ok(OtpSent {
        email: email.to_string(),
        expires_in_secs: config.ttl_minutes * 60,
        resend_after_secs: config.resend_cooldown_secs,
    })
}

/// Check `code` against the newest live code and consume it on success.
///
/// Consumption happens on `txn` so it commits together with the caller's
/// change. A wrong guess is counted on the pool instead, so it survives the
/// caller rolling `txn` back.
pub async fn verify(
    state: &AppState,
    txn: &DatabaseTransaction,
    email: &str,
    purpose: OtpPurpose,
    code: &str,
) -> AppResult<()> {
    let config = &state.config.otp;
    let otp = OtpCodes::find()
        .filter(OtpCol::Email.eq(email))
        .filter(OtpCol::Purpose.eq(purpose.as_str()))
        .filter(OtpCol::ConsumedAt.is_null())
        .order_by_desc(OtpCol::CreatedAt)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired code".into()))?;

    let now = Utc::now();
    if otp.expires_at.with_timezone(&Utc) < now {
        return Err(AppError::BadRequest("Invalid or expired code".into()));
    }
    if otp.attempts >= config.max_attempts {
        return Err(too_many_attempts());
    }

    if !verify_secret(code.trim(), &otp.code_hash)? {
        record_failed_attempt(&state.orm, otp.id, config).await?;
        return Err(AppError::BadRequest("Invalid code".into()));
    }

    let consumed = OtpCodes::update_many()
        .col_expr(OtpCol::ConsumedAt, Expr::value(Some(now.fixed_offset())))
        .filter(OtpCol::Id.eq(otp.id))
        .filter(OtpCol::ConsumedAt.is_null())
        .filter(OtpCol::Attempts.lt(config.max_attempts))
        .exec(txn)
        .await?;
    if consumed.rows_affected == 0 {
        // used up or locked out by a concurrent request
        return Err(too_many_attempts());
    }
    Ok(())
}

fn too_many_attempts() -> AppError {
    AppError::BadRequest("Too many attempts, request a new code".into())
}

/// Increments in SQL so concurrent wrong guesses are all counted.
async fn record_failed_attempt(conn: &OrmConn, id: Uuid, config: &OtpConfig) -> AppResult<()> {
    let result = OtpCodes::update_many()
        .col_expr(OtpCol::Attempts, Expr::col(OtpCol::Attempts).add(1))
        .filter(OtpCol::Id.eq(id))
        .exec(conn)
        .await?;
    tracing::warn!(
        otp_id = %id,
        max_attempts = config.max_attempts,
        updated = result.rows_affected,
        "wrong otp code"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_six_digits() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..1_000_000).contains(&n));
        }
    }
}
