use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub otp: OtpConfig,
    pub pricing: PricingConfig,
    pub cors_origin: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_minutes: i64,
    pub resend_cooldown_secs: i64,
    pub max_attempts: i32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 10,
            resend_cooldown_secs: 60,
            max_attempts: 5,
        }
    }
}

/// Amounts are in minor currency units.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub shipping_fee: i64,
    pub free_shipping_threshold: i64,
    /// Basis points, 1500 = 15%.
    pub tax_rate_bps: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            shipping_fee: 1000,
            free_shipping_threshold: 10000,
            tax_rate_bps: 1500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);

        let otp_defaults = OtpConfig::default();
        let otp = OtpConfig {
            ttl_minutes: parse_or("OTP_TTL_MINUTES", otp_defaults.ttl_minutes),
            resend_cooldown_secs: parse_or(
                "OTP_RESEND_COOLDOWN_SECS",
                otp_defaults.resend_cooldown_secs,
            ),
            max_attempts: parse_or("OTP_MAX_ATTEMPTS", otp_defaults.max_attempts),
        };

        let pricing_defaults = PricingConfig::default();
        let pricing = PricingConfig {
            shipping_fee: parse_or("SHIPPING_FEE", pricing_defaults.shipping_fee),
            free_shipping_threshold: parse_or(
                "FREE_SHIPPING_THRESHOLD",
                pricing_defaults.free_shipping_threshold,
            ),
            tax_rate_bps: parse_or("TAX_RATE_BPS", pricing_defaults.tax_rate_bps),
        };

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.is_empty() => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 587),
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_address: env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "no-reply@localhost".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            jwt_ttl_hours: parse_or("JWT_TTL_HOURS", 24),
            otp,
            pricing,
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            smtp,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
