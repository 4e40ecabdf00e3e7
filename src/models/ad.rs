//! Listing data structures.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Title of the paid-placement marker inside a promotion step.
pub const PROMOTED_MARKER: &str = "Продвинуто";

/// Composite key identifying an already-seen listing state.
///
/// The same id with a different price is a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub id: i64,
    pub price: i64,
}

/// Map coordinates attached to a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Address typed by the seller, when different from the geocoded one
    pub address_user: Option<String>,
}

/// One step of the listing's date/info block.
///
/// Paid services are reported as `payload.vas[]` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionStep {
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PromotionStep {
    /// Whether this step carries the paid-placement marker.
    pub fn is_promoted(&self) -> bool {
        self.payload
            .get("vas")
            .and_then(|vas| vas.as_array())
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|v| v.get("title").and_then(|t| t.as_str()) == Some(PROMOTED_MARKER))
            })
    }
}

/// A single listing extracted from a search result page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ad {
    pub id: i64,
    pub title: String,
    pub description: String,

    /// Price in whole currency units; `None` when the page had no parsable value
    pub price: Option<i64>,

    /// Site-relative path of the listing page
    pub url_path: String,

    /// Publication time in epoch milliseconds
    pub published_at_ms: Option<i64>,

    /// Seller slug, derived from the raw listing
    pub seller_id: Option<String>,

    /// Formatted geo address used by the geo filter
    pub geo_address: Option<String>,

    /// Location (city) name
    pub location_name: Option<String>,

    pub coords: Option<Coords>,

    /// Image URLs, largest variant first per image
    pub images: Vec<String>,

    pub is_reserved: bool,

    /// Derived from `promotion_steps`
    pub is_promoted: bool,

    pub total_views: Option<u64>,
    pub today_views: Option<u64>,

    #[serde(default)]
    pub promotion_steps: Vec<PromotionStep>,

    /// Raw item as found on the page
    #[serde(skip)]
    pub raw: serde_json::Value,
}

fn seller_slug_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/brands/([^/?#]+)").ok())
        .as_ref()
}

impl Ad {
    /// The dedup key, available only when the price is known.
    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.price.map(|price| DedupKey { id: self.id, price })
    }

    /// Title and description concatenated, lowercased.
    pub fn search_text(&self) -> String {
        format!("{}{}", self.title, self.description).to_lowercase()
    }

    /// Absolute listing URL.
    pub fn link(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if self.url_path.starts_with('/') {
            format!("{base}{}", self.url_path)
        } else {
            format!("{base}/{}", self.url_path)
        }
    }

    /// Short id-based URL used in notifications.
    pub fn short_link(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.id)
    }

    /// First image, if any.
    pub fn first_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    /// Fill `seller_id` from a `/brands/<slug>` link anywhere in the raw item.
    pub fn annotate_seller(&mut self) {
        if self.raw.is_null() {
            return;
        }
        let text = self.raw.to_string();
        if let Some(caps) = seller_slug_regex().and_then(|re| re.captures(&text)) {
            self.seller_id = Some(caps[1].to_string());
        }
    }

    /// Recompute `is_promoted` from the promotion steps.
    pub fn annotate_promotion(&mut self) {
        self.is_promoted = self.promotion_steps.iter().any(PromotionStep::is_promoted);
    }
}
