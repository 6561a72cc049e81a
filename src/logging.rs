//! # Structured Logging Module
//!
//! Environment-aware structured logging for the engine and the built-in services.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from `JACS_ENV` (`test` and
//! `development` log at debug, `production` at info). `JACS_LOG_FORMAT=json` switches the
//! console output to JSON lines.

use crate::constants::system::{ENVIRONMENT_VAR, LOG_FORMAT_VAR};
use crate::models::ServiceId;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var(LOG_FORMAT_VAR)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(filter);
        let result = if json {
            registry
                .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(true).with_thread_ids(true))
                .try_init()
        };

        // A global subscriber may already be installed by the embedding application
        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for a service lifecycle operation
pub fn log_service_operation(
    operation: &str,
    service_id: Option<ServiceId>,
    service_name: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        service_id = ?service_id,
        service_name = service_name,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 SERVICE_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_repeated_initialization_is_harmless() {
        init_structured_logging();
        init_structured_logging();
        log_service_operation("submit", None, Some("fileCopy"), "created", None);
    }
}
