use std::env;
use std::time::Duration;

use crate::backend::HttpConfig;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";
const DEFAULT_LOCALE: &str = "en";

/// Bounded exponential backoff for fetching a chat title.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (zero-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub locale: String,
    /// Shown in the assistant bubble when a reply cannot be produced.
    pub error_text: String,
    /// Shown when the reader stops a reply before any text arrived.
    pub stopped_text: String,
    pub title_retry: RetryPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            locale: DEFAULT_LOCALE.to_string(),
            error_text: localized_error_text(DEFAULT_LOCALE).to_string(),
            stopped_text: localized_stopped_text(DEFAULT_LOCALE).to_string(),
            title_retry: RetryPolicy::default(),
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        let locale = env::var("READER_CHAT_LOCALE").unwrap_or_else(|_| DEFAULT_LOCALE.to_string());
        let defaults = RetryPolicy::default();

        Self {
            base_url: env::var("READER_CHAT_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: env::var("READER_CHAT_API_KEY").unwrap_or_default(),
            error_text: env::var("READER_CHAT_ERROR_TEXT")
                .unwrap_or_else(|_| localized_error_text(&locale).to_string()),
            stopped_text: env::var("READER_CHAT_STOPPED_TEXT")
                .unwrap_or_else(|_| localized_stopped_text(&locale).to_string()),
            locale,
            title_retry: RetryPolicy {
                max_attempts: env::var("READER_CHAT_TITLE_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.max_attempts),
                base_delay: env::var("READER_CHAT_TITLE_BASE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_delay),
            },
        }
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

fn language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(DEFAULT_LOCALE)
        .to_ascii_lowercase()
}

/// Error bubble text for `locale`. Region suffixes are ignored and unknown
/// languages fall back to English.
pub fn localized_error_text(locale: &str) -> &'static str {
    match language(locale).as_str() {
        "zh" => "抱歉，出了点问题，请稍后再试。",
        "es" => "Lo sentimos, algo salió mal. Inténtalo de nuevo.",
        "fr" => "Désolé, une erreur s'est produite. Veuillez réessayer.",
        "de" => "Entschuldigung, etwas ist schiefgelaufen. Bitte versuche es erneut.",
        "ja" => "申し訳ありません。問題が発生しました。もう一度お試しください。",
        _ => "Sorry, something went wrong. Please try again.",
    }
}

pub fn localized_stopped_text(locale: &str) -> &'static str {
    match language(locale).as_str() {
        "zh" => "回答已停止。",
        "es" => "Respuesta detenida.",
        "fr" => "Réponse interrompue.",
        "de" => "Antwort abgebrochen.",
        "ja" => "回答を停止しました。",
        _ => "Response stopped.",
    }
}
