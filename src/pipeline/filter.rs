//! Ordered, fail-open filtering of extracted listings.
//!
//! Stages run in a fixed order, each on the previous stage's output:
//!
//! 1. dedup
//! 2. price range
//! 3. keyword blacklist
//! 4. keyword whitelist
//! 5. geo
//! 6. seller blacklist
//! 7. recency
//! 8. reserved
//! 9. promotion (annotation always, filtering on request)
//!
//! When any predicate of a stage fails, that stage passes its input through
//! unchanged.

use std::fmt;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Ad, FilterConfig};

/// Answers whether an `(id, price)` pair was already seen.
pub type DedupCheck<'a> = &'a dyn Fn(i64, i64) -> Result<bool>;

/// A filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dedup,
    PriceRange,
    BlacklistKeywords,
    WhitelistKeywords,
    Geo,
    SellerBlacklist,
    Recency,
    Reserved,
    Promotion,
}

impl Stage {
    /// Execution order.
    pub const ORDER: [Stage; 9] = [
        Stage::Dedup,
        Stage::PriceRange,
        Stage::BlacklistKeywords,
        Stage::WhitelistKeywords,
        Stage::Geo,
        Stage::SellerBlacklist,
        Stage::Recency,
        Stage::Reserved,
        Stage::Promotion,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dedup => "dedup",
            Stage::PriceRange => "price",
            Stage::BlacklistKeywords => "keywords-black",
            Stage::WhitelistKeywords => "keywords-white",
            Stage::Geo => "geo",
            Stage::SellerBlacklist => "seller-black",
            Stage::Recency => "recency",
            Stage::Reserved => "reserved",
            Stage::Promotion => "promotion",
        };
        f.write_str(name)
    }
}

/// Listing filter built from `[filter]` configuration.
#[derive(Debug, Clone)]
pub struct AdFilterPipeline {
    config: FilterConfig,
    keywords_white: Vec<String>,
    keywords_black: Vec<String>,
}

impl AdFilterPipeline {
    pub fn new(config: FilterConfig) -> Self {
        let lower = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            keywords_white: lower(&config.keywords_white),
            keywords_black: lower(&config.keywords_black),
            config,
        }
    }

    /// Run every stage against the current time.
    pub fn apply(&self, ads: Vec<Ad>, dedup: DedupCheck<'_>) -> Vec<Ad> {
        self.apply_at(ads, dedup, Utc::now().timestamp_millis())
    }

    /// Run every stage with `now_ms` as the current epoch time.
    pub fn apply_at(&self, mut ads: Vec<Ad>, dedup: DedupCheck<'_>, now_ms: i64) -> Vec<Ad> {
        let total = ads.len();
        for stage in Stage::ORDER {
            if ads.is_empty() {
                break;
            }
            let before = ads.len();
            ads = self.run_stage(stage, ads, dedup, now_ms);
            if ads.len() != before {
                log::info!("[filter] {}: {} -> {}", stage, before, ads.len());
            }
        }
        log::info!("[filter] kept {} of {} ads", ads.len(), total);
        ads
    }

    fn run_stage(&self, stage: Stage, ads: Vec<Ad>, dedup: DedupCheck<'_>, now_ms: i64) -> Vec<Ad> {
        let cfg = &self.config;
        match stage {
            Stage::Dedup => retain_by(stage, ads, |ad| {
                let price = required_price(ad)?;
                Ok(!dedup(ad.id, price)?)
            }),
            Stage::PriceRange => retain_by(stage, ads, |ad| {
                let price = required_price(ad)?;
                Ok(cfg.min_price <= price && price <= cfg.max_price)
            }),
            Stage::BlacklistKeywords if !self.keywords_black.is_empty() => {
                retain_by(stage, ads, |ad| Ok(!contains_any(ad, &self.keywords_black)))
            }
            Stage::WhitelistKeywords if !self.keywords_white.is_empty() => {
                retain_by(stage, ads, |ad| Ok(contains_any(ad, &self.keywords_white)))
            }
            Stage::Geo => match cfg.geo.as_deref().filter(|g| !g.is_empty()) {
                Some(geo) => retain_by(stage, ads, |ad| {
                    let address = ad
                        .geo_address
                        .as_deref()
                        .ok_or_else(|| AppError::validation(format!("ad {} has no address", ad.id)))?;
                    Ok(address.contains(geo))
                }),
                None => ads,
            },
            Stage::SellerBlacklist if !cfg.seller_black.is_empty() => retain_by(stage, ads, |ad| {
                Ok(!ad
                    .seller_id
                    .as_ref()
                    .is_some_and(|seller| cfg.seller_black.contains(seller)))
            }),
            Stage::Recency if cfg.max_age_secs > 0 => {
                let max_age_ms = i64::try_from(cfg.max_age_secs)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(1000);
                retain_by(stage, ads, |ad| {
                    let published = ad.published_at_ms.ok_or_else(|| {
                        AppError::validation(format!("ad {} has no publish time", ad.id))
                    })?;
                    Ok(now_ms.saturating_sub(published) <= max_age_ms)
                })
            }
            Stage::Reserved if cfg.ignore_reserved => {
                retain_by(stage, ads, |ad| Ok(!ad.is_reserved))
            }
            Stage::Promotion => {
                let mut ads = ads;
                for ad in &mut ads {
                    ad.annotate_promotion();
                }
                if cfg.ignore_promoted {
                    retain_by(stage, ads, |ad| Ok(!ad.is_promoted))
                } else {
                    ads
                }
            }
            _ => ads,
        }
    }
}

fn required_price(ad: &Ad) -> Result<i64> {
    ad.price
        .ok_or_else(|| AppError::validation(format!("ad {} has no price", ad.id)))
}

fn contains_any(ad: &Ad, phrases: &[String]) -> bool {
    let text = ad.search_text();
    phrases.iter().any(|phrase| text.contains(phrase.as_str()))
}

/// Keep ads the predicate accepts; on any predicate error keep them all.
fn retain_by<F>(stage: Stage, ads: Vec<Ad>, mut keep: F) -> Vec<Ad>
where
    F: FnMut(&Ad) -> Result<bool>,
{
    let decisions = match ads.iter().map(&mut keep).collect::<Result<Vec<bool>>>() {
        Ok(decisions) => decisions,
        Err(e) => {
            log::warn!("[filter] stage {} skipped: {}", stage, e);
            return ads;
        }
    };
    ads.into_iter()
        .zip(decisions)
        .filter_map(|(ad, keep)| keep.then_some(ad))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PromotionStep;
    use serde_json::json;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn never_seen(_: i64, _: i64) -> Result<bool> {
        Ok(false)
    }

    fn ad(id: i64, title: &str, price: Option<i64>) -> Ad {
        Ad {
            id,
            title: title.to_string(),
            price,
            published_at_ms: Some(NOW_MS),
            geo_address: Some("Москва, Тверская 1".to_string()),
            ..Ad::default()
        }
    }

    fn ids(ads: &[Ad]) -> Vec<i64> {
        ads.iter().map(|a| a.id).collect()
    }

    fn pipeline(config: FilterConfig) -> AdFilterPipeline {
        AdFilterPipeline::new(config)
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(Stage::ORDER[0], Stage::Dedup);
        assert_eq!(Stage::ORDER[2], Stage::BlacklistKeywords);
        assert_eq!(Stage::ORDER[3], Stage::WhitelistKeywords);
        assert_eq!(Stage::ORDER[8], Stage::Promotion);
    }

    #[test]
    fn test_blacklist_beats_whitelist() {
        let filter = pipeline(FilterConfig {
            keywords_white: vec!["iphone".to_string()],
            keywords_black: vec!["бу".to_string()],
            ..FilterConfig::default()
        });
        let ads = vec![ad(1, "iPhone 13, бу", Some(100)), ad(2, "iPhone 14", Some(100))];

        let kept = filter.apply_at(ads, &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![2]);
    }

    #[test]
    fn test_price_bounds_are_inclusive() {
        let filter = pipeline(FilterConfig {
            min_price: 100,
            max_price: 500,
            ..FilterConfig::default()
        });
        let ads = vec![
            ad(1, "a", Some(99)),
            ad(2, "b", Some(100)),
            ad(3, "c", Some(500)),
            ad(4, "d", Some(501)),
        ];
        assert_eq!(ids(&filter.apply_at(ads, &never_seen, NOW_MS)), vec![2, 3]);
    }

    #[test]
    fn test_missing_price_makes_price_stage_fail_open() {
        let filter = pipeline(FilterConfig {
            min_price: 100,
            max_price: 500,
            ..FilterConfig::default()
        });
        let ads = vec![ad(1, "a", Some(50)), ad(2, "b", None)];
        assert_eq!(ids(&filter.apply_at(ads, &never_seen, NOW_MS)), vec![1, 2]);
    }

    #[test]
    fn test_dedup_drops_seen_pairs_only() {
        let filter = pipeline(FilterConfig::default());
        let seen = |id: i64, price: i64| -> Result<bool> { Ok(id == 1 && price == 100) };
        let ads = vec![ad(1, "a", Some(100)), ad(1, "a", Some(90)), ad(2, "b", Some(100))];

        let kept = filter.apply_at(ads, &seen, NOW_MS);
        assert_eq!(
            kept.iter().map(|a| (a.id, a.price)).collect::<Vec<_>>(),
            vec![(1, Some(90)), (2, Some(100))]
        );
    }

    #[test]
    fn test_dedup_error_is_fail_open() {
        let filter = pipeline(FilterConfig::default());
        let broken = |_: i64, _: i64| -> Result<bool> { Err(AppError::validation("db gone")) };
        let ads = vec![ad(1, "a", Some(100)), ad(2, "b", Some(100))];
        assert_eq!(ids(&filter.apply_at(ads, &broken, NOW_MS)), vec![1, 2]);
    }

    #[test]
    fn test_geo_and_seller() {
        let filter = pipeline(FilterConfig {
            geo: Some("Тверская".to_string()),
            seller_black: vec!["bad_shop".to_string()],
            ..FilterConfig::default()
        });
        let mut elsewhere = ad(2, "b", Some(1));
        elsewhere.geo_address = Some("Казань".to_string());
        let mut banned = ad(3, "c", Some(1));
        banned.seller_id = Some("bad_shop".to_string());

        let kept = filter.apply_at(vec![ad(1, "a", Some(1)), elsewhere, banned], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1]);
    }

    #[test]
    fn test_recency_window() {
        let filter = pipeline(FilterConfig {
            max_age_secs: 3600,
            ..FilterConfig::default()
        });
        let mut old = ad(2, "b", Some(1));
        old.published_at_ms = Some(NOW_MS - 3_601_000);
        let mut edge = ad(3, "c", Some(1));
        edge.published_at_ms = Some(NOW_MS - 3_600_000);

        let kept = filter.apply_at(vec![ad(1, "a", Some(1)), old, edge], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1, 3]);
    }

    #[test]
    fn test_reserved_dropped_when_ignored() {
        let mut reserved = ad(2, "b", Some(1));
        reserved.is_reserved = true;

        let strict = pipeline(FilterConfig::default());
        let kept = strict.apply_at(vec![ad(1, "a", Some(1)), reserved.clone()], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1]);

        let lenient = pipeline(FilterConfig {
            ignore_reserved: false,
            ..FilterConfig::default()
        });
        let kept = lenient.apply_at(vec![ad(1, "a", Some(1)), reserved], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1, 2]);
    }

    #[test]
    fn test_promotion_annotated_even_when_not_filtered() {
        let mut promoted = ad(2, "b", Some(1));
        promoted.promotion_steps = vec![PromotionStep {
            payload: json!({"vas": [{"title": "Продвинуто"}]}),
        }];

        let keep_all = pipeline(FilterConfig::default());
        let kept = keep_all.apply_at(vec![ad(1, "a", Some(1)), promoted.clone()], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1, 2]);
        assert!(kept[1].is_promoted);

        let drop_promoted = pipeline(FilterConfig {
            ignore_promoted: true,
            ..FilterConfig::default()
        });
        let kept = drop_promoted.apply_at(vec![ad(1, "a", Some(1)), promoted], &never_seen, NOW_MS);
        assert_eq!(ids(&kept), vec![1]);
    }

    #[test]
    fn test_empty_input_stays_empty() {
        let filter = pipeline(FilterConfig::default());
        assert!(filter.apply_at(Vec::new(), &never_seen, NOW_MS).is_empty());
    }
}
