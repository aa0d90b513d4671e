//! Registrable-domain matching for related sources

use url::Url;

use crate::upstream::SearchHit;

/// Host prefixes that point at the same site
const SITE_PREFIXES: &[&str] = &["www.", "m.", "mobile.", "amp.", "wap."];

/// Second-level public suffixes common in our traffic (`cnyes.com.tw` style)
const TWO_LEVEL_SUFFIXES: &[&str] = &[
    "com.tw", "org.tw", "gov.tw", "edu.tw", "net.tw", "idv.tw",
    "co.uk", "org.uk", "ac.uk",
    "com.hk", "org.hk",
    "co.jp", "ne.jp", "or.jp",
    "com.au", "net.au",
    "com.cn", "net.cn",
    "com.sg", "co.kr", "com.my",
];

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    parsed.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

/// Host with a known mobile/site prefix removed
pub fn strip_site_prefix(host: &str) -> &str {
    for prefix in SITE_PREFIXES {
        if let Some(rest) = host.strip_prefix(prefix) {
            if rest.contains('.') {
                return rest;
            }
        }
    }
    host
}

/// Registrable domain (eTLD+1) of a host
pub fn registrable_domain(host: &str) -> String {
    let host = strip_site_prefix(host);
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if TWO_LEVEL_SUFFIXES.contains(&last_two.as_str()) { 3 } else { 2 };
    labels[labels.len() - keep..].join(".")
}

/// Registrable domain of a URL, if it has a host
pub fn domain_of_url(url: &str) -> Option<String> {
    host_of(url).map(|h| registrable_domain(&h))
}

/// Keep only hits whose registrable domain equals `domain`
pub fn filter_sources(hits: Vec<SearchHit>, domain: &str) -> Vec<SearchHit> {
    hits.into_iter()
        .filter(|hit| domain_of_url(&hit.url).as_deref() == Some(domain))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: url.to_string(),
            url: url.to_string(),
            content: String::new(),
        }
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("m.cnyes.com"), "cnyes.com");
        assert_eq!(registrable_domain("news.cnyes.com"), "cnyes.com");
        assert_eq!(registrable_domain("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("udn.com.tw"), "udn.com.tw");
        assert_eq!(registrable_domain("money.udn.com.tw"), "udn.com.tw");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn test_prefix_only_stripped_when_domain_remains() {
        assert_eq!(strip_site_prefix("m.com"), "m.com");
        assert_eq!(strip_site_prefix("www.example.com"), "example.com");
    }

    #[test]
    fn test_mobile_source_keeps_same_site_only() {
        let domain = domain_of_url("https://m.cnyes.com/news/id/1").unwrap();
        assert_eq!(domain, "cnyes.com");

        let kept = filter_sources(
            vec![
                hit("https://news.cnyes.com/news/id/2"),
                hit("https://www.cnyes.com/twstock"),
                hit("https://cnyes.com.evil.example/x"),
                hit("https://www.ettoday.net/news/1"),
                hit("not a url"),
            ],
            &domain,
        );

        let urls: Vec<_> = kept.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://news.cnyes.com/news/id/2", "https://www.cnyes.com/twstock"]
        );
    }
}
