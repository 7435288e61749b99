use loanline_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line("database.url", &config.database.url));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
    ));
    lines.push(render_line("database.timeout_secs", &config.database.timeout_secs.to_string()));

    lines.push(render_line("tenant_api.base_url", &config.tenant_api.base_url));
    lines.push(render_line(
        "tenant_api.shared_secret",
        &redact_secret(config.tenant_api.shared_secret.expose_secret()),
    ));
    lines.push(render_line(
        "tenant_api.timeout_secs",
        &config.tenant_api.timeout_secs.to_string(),
    ));

    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
    ));
    lines.push(render_line(
        "llm.api_key",
        &config
            .llm
            .api_key
            .as_ref()
            .map(|key| redact_secret(key.expose_secret()))
            .unwrap_or_else(|| "<unset>".to_string()),
    ));
    lines.push(render_line("llm.model", &config.llm.model));

    lines.push(render_line("server.bind_address", &config.server.bind_address));
    lines.push(render_line(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
    ));

    lines.push(render_line("sweep.interval_secs", &config.sweep.interval_secs.to_string()));
    lines.push(render_line(
        "sweep.purge_horizon_hours",
        &config.sweep.purge_horizon_hours.to_string(),
    ));

    lines.push(render_line("logging.level", &config.logging.level));
    lines.push(render_line("logging.format", &format!("{:?}", config.logging.format)));

    lines.join("\n")
}

fn render_line(key: &str, value: &str) -> String {
    format!("  {key} = {value}")
}

/// Secrets are shown only as a length hint, never in plaintext.
fn redact_secret(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else {
        format!("<redacted:{} chars>", secret.len())
    }
}

#[cfg(test)]
mod tests {
    use super::redact_secret;

    #[test]
    fn secrets_are_never_printed_in_plaintext() {
        assert_eq!(redact_secret("super-secret"), "<redacted:12 chars>");
        assert_eq!(redact_secret(""), "<unset>");
    }
}
