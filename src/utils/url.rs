// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

use crate::error::Result;

/// Query parameter carrying the result page number.
pub const PAGE_PARAM: &str = "p";

/// Current page number of a search URL (1 when absent or unparsable).
pub fn page_number(url: &str) -> Result<u32> {
    let parsed = Url::parse(url)?;
    Ok(parsed
        .query_pairs()
        .find(|(k, _)| k == PAGE_PARAM)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1))
}

/// Build the URL of the next result page by incrementing `p`.
///
/// Other query parameters keep their order; `p` is appended when missing.
pub fn next_page_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    let current = page_number(url)?;
    let next = (current + 1).to_string();

    let mut replaced = false;
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            if k == PAGE_PARAM && !replaced {
                replaced = true;
                (k.into_owned(), next.clone())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    {
        let mut query = parsed.query_pairs_mut();
        query.clear();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
        if !replaced {
            query.append_pair(PAGE_PARAM, &next);
        }
    }

    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_appends_param() {
        let next = next_page_url("https://www.avito.ru/moskva/mebel?q=divan").unwrap();
        assert_eq!(next, "https://www.avito.ru/moskva/mebel?q=divan&p=2");
        assert_eq!(page_number(&next).unwrap(), 2);
    }

    #[test]
    fn test_next_page_increments_existing() {
        let next = next_page_url("https://www.avito.ru/moskva?p=4&q=divan").unwrap();
        assert_eq!(next, "https://www.avito.ru/moskva?p=5&q=divan");
    }

    #[test]
    fn test_next_page_rejects_garbage() {
        assert!(next_page_url("not a url").is_err());
    }
}
