use std::env;
use tracing::warn;

pub const DEFAULT_CONSULTATIONS_TABLE: &str = "consultations";
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub consultations_table: String,
    pub max_message_length: usize,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            consultations_table: env::var("WAITING_ROOM_CONSULTATIONS_TABLE")
                .unwrap_or_else(|_| DEFAULT_CONSULTATIONS_TABLE.to_string()),
            max_message_length: parse_or_default(
                "WAITING_ROOM_MAX_MESSAGE_LENGTH",
                DEFAULT_MAX_MESSAGE_LENGTH,
            ),
            port: parse_or_default("PORT", DEFAULT_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_or_default<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
