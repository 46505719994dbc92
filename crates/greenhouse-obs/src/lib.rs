use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,greenhouse=debug,sqlx=warn";

/// Initialize logging.
/// - JSON lines on stdout
/// - RUST_LOG respected; default to [`DEFAULT_FILTER`]
///
/// Calling it twice keeps the first subscriber, so tests may call it freely.
pub fn init(service_name: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());

    let installed = tracing_subscriber::registry()
        .with(EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = %service_name, "Observability initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init("greenhouse-test");
        init("greenhouse-test");
        tracing::debug!("still logging");
    }
}
