//! Canonical URL form used by source and referer targeting.
//!
//! A canonical URL is the lower-cased host with its labels reversed, followed
//! by the path and the query string: `http://News.Example.com/a?b=1` becomes
//! `com.example.news/a?b=1`. Rules written against a domain or a parent path
//! are then plain string prefixes of the canonical form.
use thiserror::Error;
use url::{ParseError, Url};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Parsing url: {0}")]
    Parse(#[from] ParseError),
    #[error("Url {0:?} has no host")]
    NoHost(String),
}

pub fn normalize_url(url: &str) -> Result<String, Error> {
    let lowered = url.trim().to_lowercase();

    let parsed = match Url::parse(&lowered) {
        Ok(parsed) => parsed,
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{}", lowered))?,
        Err(err) => return Err(err.into()),
    };

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::NoHost(url.to_string()))?;

    let mut normalized = host.rsplit('.').collect::<Vec<_>>().join(".");
    normalized.push_str(parsed.path());

    if let Some(query) = parsed.query().filter(|query| !query.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }

    Ok(normalized)
}

/// Every form of a canonical URL a rule may be written against: the URL
/// itself, each dotted host prefix with a trailing `/`, each path prefix with
/// and without its trailing `/`, and the URL without its query string.
pub fn url_prefixes(normalized: &str) -> Vec<String> {
    let mut prefixes = vec![normalized.to_string()];

    for (pos, _) in normalized.match_indices('.') {
        prefixes.push(format!("{}/", &normalized[..pos]));
    }

    for (pos, _) in normalized.match_indices('/') {
        prefixes.push(normalized[..pos].to_string());
        prefixes.push(normalized[..=pos].to_string());
    }

    if let Some(pos) = normalized.find('?') {
        prefixes.push(normalized[..pos].to_string());
    }

    prefixes
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn host_labels_are_reversed() {
        assert_eq!(
            Ok("com.example.news/world/europe?id=5".to_string()),
            normalize_url("HTTP://News.Example.COM/World/Europe?id=5")
        );
        assert_eq!(
            Ok("com.example/".to_string()),
            normalize_url("example.com")
        );
    }

    #[test]
    fn url_without_host_is_rejected() {
        assert!(normalize_url("mailto:someone").is_err());
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn prefixes_of_a_canonical_url() {
        let prefixes = url_prefixes("com.example.news/a/b?x=1");

        let expected = [
            "com.example.news/a/b?x=1",
            "com/",
            "com.example/",
            "com.example.news",
            "com.example.news/",
            "com.example.news/a",
            "com.example.news/a/",
            "com.example.news/a/b",
        ];

        for prefix in expected {
            assert!(
                prefixes.iter().any(|candidate| candidate == prefix),
                "missing {}",
                prefix
            );
        }
    }
}
