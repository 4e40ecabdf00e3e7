//! Message text for each channel.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Ad;

fn markdown_special() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([_\[\]()~`>#+\-=|{}.!*\\])").ok())
        .as_ref()
}

fn normalize(text: &str) -> String {
    text.replace('\u{a0}', " ")
}

/// Escape text for Telegram MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    let text = normalize(text);
    match markdown_special() {
        Some(re) => re.replace_all(&text, r"\$1").into_owned(),
        None => text,
    }
}

/// Telegram caption: bold price, linked title, seller.
pub fn telegram_caption(ad: &Ad, base_url: &str) -> String {
    let mut parts = Vec::new();

    if let Some(price) = ad.price {
        let mut part = format!("*{}*", escape_markdown_v2(&price.to_string()));
        if ad.is_promoted {
            part.push_str(" 🢁");
        }
        parts.push(part);
    }
    if !ad.title.is_empty() {
        parts.push(format!(
            "[{}]({})",
            escape_markdown_v2(&ad.title),
            ad.short_link(base_url)
        ));
    }
    if let Some(seller) = ad.seller_id.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Продавец: {}", escape_markdown_v2(seller)));
    }

    parts.join("\n")
}

/// Plain-text VK message.
pub fn vk_text(ad: &Ad, base_url: &str) -> String {
    let mut parts = Vec::new();

    if let Some(price) = ad.price {
        let mut part = format!("💰 {price}");
        if ad.is_promoted {
            part.push_str(" 🔥");
        }
        parts.push(part);
    }
    if !ad.title.is_empty() {
        parts.push(format!("📦 {}", normalize(&ad.title)));
    }
    if let Some(seller) = ad.seller_id.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("👤 Продавец: {}", normalize(seller)));
    }
    parts.push(format!("🔗 {}", ad.short_link(base_url)));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad() -> Ad {
        Ad {
            id: 42,
            title: "Диван (угловой) 2.0".to_string(),
            price: Some(300),
            seller_id: Some("shop_1".to_string()),
            is_promoted: true,
            ..Ad::default()
        }
    }

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(escape_markdown_v2("a.b-c(d)!"), r"a\.b\-c\(d\)\!");
        assert_eq!(escape_markdown_v2("1\u{a0}000"), "1 000");
    }

    #[test]
    fn test_telegram_caption_has_price_and_title() {
        let caption = telegram_caption(&ad(), "https://www.avito.ru");
        assert_eq!(
            caption,
            "*300* 🢁\n[Диван \\(угловой\\) 2\\.0](https://www.avito.ru/42)\nПродавец: shop\\_1"
        );
    }

    #[test]
    fn test_vk_text_is_plain() {
        let text = vk_text(&ad(), "https://www.avito.ru");
        assert!(text.contains("💰 300 🔥"));
        assert!(text.contains("📦 Диван (угловой) 2.0"));
        assert!(text.ends_with("🔗 https://www.avito.ru/42"));
    }

    #[test]
    fn test_caption_without_price() {
        let mut ad = ad();
        ad.price = None;
        ad.seller_id = None;
        assert!(!telegram_caption(&ad, "https://www.avito.ru").is_empty());
    }
}
