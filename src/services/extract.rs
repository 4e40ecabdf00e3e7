// src/services/extract.rs

//! Listing extraction from raw search and detail pages.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Ad, Coords, PromotionStep};
use crate::utils::parse_digits;

/// Turns a raw page payload into listings.
pub trait AdExtractor: Send + Sync {
    fn extract(&self, payload: &str) -> Result<Vec<Ad>>;
}

/// Reads the embedded catalog state of a search result page.
#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogExtractor;

impl AdExtractor for CatalogExtractor {
    fn extract(&self, payload: &str) -> Result<Vec<Ad>> {
        let state = find_state(payload)?;
        let items = state
            .pointer("/data/catalog/items")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::extract("page state has no data.catalog.items"))?;

        let total = items.len();
        let ads: Vec<Ad> = items.iter().filter_map(ad_from_item).collect();
        if ads.len() < total {
            log::debug!("[extract] dropped {} items without id", total - ads.len());
        }
        Ok(ads)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::extract(format!("bad selector {css}: {e:?}")))
}

/// Locate the first `mime/invalid` script and unwrap its `state` or `data`.
fn find_state(payload: &str) -> Result<Value> {
    let document = Html::parse_document(payload);
    let script_sel = selector(r#"script[type="mime/invalid"]"#)?;
    let script = document
        .select(&script_sel)
        .next()
        .ok_or_else(|| AppError::extract("no embedded state script"))?;

    let text: String = script.text().collect();
    let parsed: Value = serde_json::from_str(&unescape_html(&text))?;

    let state = match parsed {
        Value::Object(mut map) => {
            if let Some(state) = map.remove("state") {
                state
            } else if let Some(data) = map.remove("data") {
                data
            } else {
                Value::Object(map)
            }
        }
        other => other,
    };
    Ok(state)
}

fn entity_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").ok())
        .as_ref()
}

/// Named references seen in listing titles and descriptions.
fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "quot" => '"',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "laquo" => '«',
        "raquo" => '»',
        "lsquo" => '‘',
        "rsquo" => '’',
        "sbquo" => '‚',
        "ldquo" => '“',
        "rdquo" => '”',
        "bdquo" => '„',
        "bull" => '•',
        "middot" => '·',
        "times" => '×',
        "divide" => '÷',
        "plusmn" => '±',
        "minus" => '−',
        "deg" => '°',
        "sup2" => '²',
        "sup3" => '³',
        "frac12" => '½',
        "frac14" => '¼',
        "frac34" => '¾',
        "micro" => 'µ',
        "para" => '¶',
        "sect" => '§',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "euro" => '€',
        "pound" => '£',
        "yen" => '¥',
        "cent" => '¢',
        "numero" => '№',
        "larr" => '←',
        "rarr" => '→',
        "uarr" => '↑',
        "darr" => '↓',
        "harr" => '↔',
        "check" => '✓',
        "shy" => '\u{ad}',
        "thinsp" => '\u{2009}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "zwj" => '\u{200d}',
        "zwnj" => '\u{200c}',
        _ => return None,
    };
    Some(c)
}

/// Decode HTML character references left in script text.
fn unescape_html(text: &str) -> String {
    let Some(re) = entity_regex() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures| {
        let entity = &caps[1];
        let decoded = match entity {
            _ if !entity.starts_with('#') => named_entity(entity),
            _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
            }
            _ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
            _ => None,
        };
        decoded.map_or_else(|| caps[0].to_string(), String::from)
    })
    .into_owned()
}

fn str_at(item: &Value, pointer: &str) -> Option<String> {
    item.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

/// Pick the largest `WxH` variant of one image map.
fn largest_image(variants: &Value) -> Option<String> {
    let map = variants.as_object()?;
    map.iter()
        .filter_map(|(size, url)| {
            let (w, h) = size.split_once('x')?;
            let area = w.parse::<u64>().ok()? * h.parse::<u64>().ok()?;
            Some((area, url.as_str()?))
        })
        .max_by_key(|(area, _)| *area)
        .map(|(_, url)| url.to_string())
}

fn coords_from(value: &Value) -> Option<Coords> {
    let map = value.as_object()?;
    let number = |key: &str| {
        map.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    };
    Some(Coords {
        lat: number("lat"),
        lng: number("lng"),
        address_user: map
            .get("address_user")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn ad_from_item(item: &Value) -> Option<Ad> {
    let id = item.get("id").and_then(Value::as_i64).filter(|id| *id != 0)?;

    let images = item
        .get("images")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(largest_image).collect())
        .unwrap_or_default();

    let promotion_steps = item
        .pointer("/iva/DateInfoStep")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .map(|step| PromotionStep {
                    payload: step.get("payload").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Ad {
        id,
        title: str_at(item, "/title").unwrap_or_default(),
        description: str_at(item, "/description").unwrap_or_default(),
        price: item.pointer("/priceDetailed/value").and_then(Value::as_i64),
        url_path: str_at(item, "/urlPath").unwrap_or_default(),
        published_at_ms: item.get("sortTimeStamp").and_then(Value::as_i64),
        seller_id: str_at(item, "/sellerId"),
        geo_address: str_at(item, "/geo/formattedAddress"),
        location_name: str_at(item, "/location/name"),
        coords: item.get("coords").and_then(coords_from),
        images,
        is_reserved: item
            .get("isReserved")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_promoted: false,
        total_views: None,
        today_views: None,
        promotion_steps,
        raw: item.clone(),
    })
}

/// Total and today's view counters from a listing detail page.
pub fn extract_views(payload: &str) -> Result<(Option<u64>, Option<u64>)> {
    let document = Html::parse_document(payload);
    let total_sel = selector(r#"[data-marker="item-view/total-views"]"#)?;
    let today_sel = selector(r#"[data-marker="item-view/today-views"]"#)?;

    let read = |sel: &Selector| {
        document
            .select(sel)
            .next()
            .and_then(|el| parse_digits(&el.text().collect::<String>()))
    };
    Ok((read(&total_sel), read(&today_sel)))
}
