use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use retail_store_api::{
    config::{AppConfig, OtpConfig, PricingConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    dto::auth::{LoginRequest, RegisterRequest, ResendOtpRequest, VerifyOtpRequest},
    entity::{OtpCodes, otp_codes::Column as OtpCol},
    error::AppError,
    mailer::{MailError, Mailer},
    services::auth_service,
    state::AppState,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use uuid::Uuid;

const PASSWORD: &str = "correct-horse-battery";

/// Keeps every sent email so tests can read the codes back.
#[derive(Default)]
struct Inbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Inbox {
    fn count_for(&self, to: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(t, _)| t == to).count()
    }

    fn last_code_for(&self, to: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent
            .iter()
            .rev()
            .find(|(t, _)| t == to)
            .expect("an email to the address");
        let start = body.find("code is ").expect("code in body") + "code is ".len();
        body[start..start + 6].to_string()
    }
}

#[async_trait]
impl Mailer for Inbox {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

async fn setup_state() -> anyhow::Result<Option<(AppState, Arc<Inbox>)>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run auth flow tests.");
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&pool);
    run_migrations(&orm).await?;

    let config = AppConfig {
        database_url,
        host: "127.0.0.1".into(),
        port: 0,
        jwt_secret: "test-secret".into(),
        jwt_ttl_hours: 1,
        otp: OtpConfig::default(),
        pricing: PricingConfig::default(),
        cors_origin: None,
        smtp: None,
    };
    let inbox = Arc::new(Inbox::default());
    let state = AppState {
        pool,
        orm,
        config: Arc::new(config),
        mailer: inbox.clone(),
    };
    Ok(Some((state, inbox)))
}

async fn register(state: &AppState) -> anyhow::Result<String> {
    let email = format!("shopper-{}@example.com", Uuid::new_v4());
    auth_service::register_user(
        state,
        RegisterRequest {
            name: "Shopper".into(),
            email: email.clone(),
            password: PASSWORD.into(),
        },
    )
    .await?;
    Ok(email)
}

async fn verify(state: &AppState, email: &str, code: &str) -> Result<String, AppError> {
    let resp = auth_service::verify_email(
        state,
        VerifyOtpRequest {
            email: email.into(),
            code: code.into(),
        },
    )
    .await?;
    Ok(resp.data.expect("login").token)
}

async fn login(state: &AppState, email: &str) -> Result<String, AppError> {
    let resp = auth_service::login_user(
        state,
        LoginRequest {
            email: email.into(),
            password: PASSWORD.into(),
        },
    )
    .await?;
    Ok(resp.data.expect("login").token)
}

#[tokio::test]
async fn register_then_verify_unlocks_login() -> anyhow::Result<()> {
    let Some((state, inbox)) = setup_state().await? else {
        return Ok(());
    };
    let email = register(&state).await?;
    assert_eq!(inbox.count_for(&email), 1);

    let blocked = login(&state, &email).await;
    assert!(matches!(blocked, Err(AppError::ForbiddenWith(_))), "got {blocked:?}");

    let resend = auth_service::resend_otp(
        &state,
        ResendOtpRequest {
            email: email.clone(),
            purpose: None,
        },
    )
    .await;
    match resend {
        Err(AppError::TooManyRequests { retry_after_secs }) => {
            let cooldown = state.config.otp.resend_cooldown_secs;
            assert!((1..=cooldown).contains(&retry_after_secs), "got {retry_after_secs}");
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    // no second email while cooling down
    assert_eq!(inbox.count_for(&email), 1);

    let code = inbox.last_code_for(&email);
    let token = verify(&state, &email, &code).await?;
    assert!(!token.is_empty());

    // the code is single use
    let again = verify(&state, &email, &code).await;
    assert!(matches!(again, Err(AppError::BadRequest(_))), "got {again:?}");

    assert!(!login(&state, &email).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn wrong_guesses_lock_the_code() -> anyhow::Result<()> {
    let Some((state, inbox)) = setup_state().await? else {
        return Ok(());
    };
    let email = register(&state).await?;
    let code = inbox.last_code_for(&email);
    let max_attempts = state.config.otp.max_attempts;

    // issued codes start at 100000, so this one never matches
    for _ in 0..max_attempts {
        let wrong = verify(&state, &email, "000000").await;
        assert!(matches!(wrong, Err(AppError::BadRequest(_))), "got {wrong:?}");
    }

    let attempts = OtpCodes::find()
        .filter(OtpCol::Email.eq(email.as_str()))
        .one(&state.orm)
        .await?
        .expect("otp row")
        .attempts;
    assert_eq!(attempts, max_attempts);

    let locked = verify(&state, &email, &code).await;
    match locked {
        Err(AppError::BadRequest(msg)) => assert!(msg.contains("Too many attempts"), "got {msg}"),
        other => panic!("expected lockout, got {other:?}"),
    }
    let still_blocked = login(&state, &email).await;
    assert!(matches!(still_blocked, Err(AppError::ForbiddenWith(_))));
    Ok(())
}

#[tokio::test]
async fn expired_code_is_refused() -> anyhow::Result<()> {
    let Some((state, inbox)) = setup_state().await? else {
        return Ok(());
    };
    let email = register(&state).await?;
    let code = inbox.last_code_for(&email);

    let past = (Utc::now() - Duration::minutes(1)).fixed_offset();
    OtpCodes::update_many()
        .col_expr(OtpCol::ExpiresAt, Expr::value(past))
        .filter(OtpCol::Email.eq(email.as_str()))
        .exec(&state.orm)
        .await?;

    let expired = verify(&state, &email, &code).await;
    match expired {
        Err(AppError::BadRequest(msg)) => assert!(msg.contains("expired"), "got {msg}"),
        other => panic!("expected expiry, got {other:?}"),
    }
    Ok(())
}
