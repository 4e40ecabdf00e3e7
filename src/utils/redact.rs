//! Masking of secrets in configuration dumps.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::Result;
use crate::models::Config;

struct Patterns {
    proxy_credentials: Regex,
    tg_token: Regex,
    tg_chat_ids: Regex,
    change_url: Regex,
    generic_secret: Regex,
    url_host: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                proxy_credentials: Regex::new(r"([\w\-]+):([\w\-]+)@([\w.\-]+):(\d+)").ok()?,
                tg_token: Regex::new(r#"(tg_token["']?\s*[:=]\s*["'])([^"']+)(["'])"#).ok()?,
                tg_chat_ids: Regex::new(r#"(tg_chat_ids["']?\s*[:=]\s*)(\[[^\]]*\])"#).ok()?,
                change_url: Regex::new(r#"(proxy_change_url["']?\s*[:=]\s*["'])([^"']+)(["'])"#)
                    .ok()?,
                generic_secret: Regex::new(
                    r#"(?i)((?:password|token|api_key|secret)["']?\s*[:=]\s*["'])([^"']+)(["'])"#,
                )
                .ok()?,
                url_host: Regex::new(r"https?://([^/]+)/?").ok()?,
            })
        })
        .as_ref()
}

fn mask_url(url: &str, host_re: &Regex) -> String {
    match host_re.captures(url) {
        Some(caps) => format!("https://{}/***", &caps[1]),
        None => "***".to_string(),
    }
}

/// Mask proxy credentials, tokens, chat ids and provider links in `text`.
pub fn mask_sensitive(text: &str) -> String {
    let Some(p) = patterns() else {
        return "***".to_string();
    };

    let masked = p
        .proxy_credentials
        .replace_all(text, |c: &Captures| format!("{}:***@{}:{}", &c[1], &c[3], &c[4]));

    let masked = p.tg_token.replace_all(&masked, |c: &Captures| {
        let prefix: String = c[2].chars().take(5).collect();
        format!("{}{}***{}", &c[1], prefix, &c[3])
    });

    let masked = p
        .tg_chat_ids
        .replace_all(&masked, |c: &Captures| format!("{}['***']", &c[1]));

    let masked = p.change_url.replace_all(&masked, |c: &Captures| {
        format!("{}{}{}", &c[1], mask_url(&c[2], &p.url_host), &c[3])
    });

    // tg_token was already shortened; leave its visible prefix alone
    let masked = p.generic_secret.replace_all(&masked, |c: &Captures| {
        if c[1].to_lowercase().starts_with("tg_token") || c[2].ends_with("***") {
            c[0].to_string()
        } else {
            format!("{}***{}", &c[1], &c[3])
        }
    });

    masked.into_owned()
}

/// Serialize the configuration to TOML with secrets masked.
pub fn redacted_config(config: &Config) -> Result<String> {
    let raw = toml::to_string_pretty(config)?;
    Ok(mask_sensitive(&raw))
}
