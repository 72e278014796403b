use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Env var holding the tracing filter directive.
pub const LOG_ENV: &str = "GALLERYVAULT_LOG";
const DEFAULT_FILTER: &str = "galleryvault=info,sqlx=warn";

/// Initialize logging for standalone binaries.
///
/// JSON lines on stderr with RFC 3339 UTC timestamps; `log` records from
/// dependencies are bridged into tracing. Calling twice is harmless.
pub fn init() {
    let _ = tracing_log::LogTracer::init();
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Collapse SQL to a single short line for log fields.
pub fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let head: String = trimmed.chars().take(160).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("SELECT 1\nFROM\tx"), "SELECT 1 FROM x");
        let long = "x".repeat(400);
        assert_eq!(preview(&long).chars().count(), 161);
    }
}
