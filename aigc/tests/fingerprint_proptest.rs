//! Property tests for request fingerprints.

use aigc::fingerprint::{normalize_url, Endpoint, Fingerprint};
use proptest::prelude::*;

fn answer_key(url: &str, context: Option<&str>, query: &str, lang: &str) -> String {
    Fingerprint::new(Endpoint::Answer)
        .url(Some(url))
        .context(context)
        .query(Some(query))
        .lang(Some(lang))
        .key()
        .as_str()
        .to_string()
}

fn path_segment() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,12}"
}

proptest! {
    #[test]
    fn prop_same_inputs_same_key(
        path in path_segment(),
        query in "[a-zA-Z ?]{1,40}",
        lang in prop_oneof![Just("zh-tw"), Just("en"), Just("ZH-TW")],
    ) {
        let url = format!("https://news.cnyes.com/news/{}", path);
        prop_assert_eq!(
            answer_key(&url, None, &query, lang),
            answer_key(&url, None, &query, lang)
        );
    }

    #[test]
    fn prop_tracking_and_case_do_not_change_key(
        path in path_segment(),
        campaign in "[a-z]{1,10}",
    ) {
        let plain = format!("https://news.cnyes.com/news/{}", path);
        let noisy = format!("HTTPS://News.Cnyes.com/news/{}/?utm_source={}#top", path, campaign);
        prop_assert_eq!(normalize_url(&plain), normalize_url(&noisy));
        prop_assert_eq!(
            answer_key(&plain, None, "q", "en"),
            answer_key(&noisy, None, "q", "en")
        );
    }

    #[test]
    fn prop_context_overrides_url(
        a in path_segment(),
        b in path_segment(),
        context in "[a-zA-Z ]{1,80}",
    ) {
        prop_assume!(!context.trim().is_empty());
        let first = format!("https://example.com/{}", a);
        let second = format!("https://example.com/{}", b);
        prop_assert_eq!(
            answer_key(&first, Some(&context), "q", "en"),
            answer_key(&second, Some(&context), "q", "en")
        );
    }

    #[test]
    fn prop_different_queries_differ(
        q1 in "[a-z]{1,20}",
        q2 in "[a-z]{1,20}",
    ) {
        prop_assume!(q1 != q2);
        prop_assert_ne!(
            answer_key("https://example.com/a", None, &q1, "en"),
            answer_key("https://example.com/a", None, &q2, "en")
        );
    }

    #[test]
    fn prop_endpoints_never_share_keys(path in path_segment()) {
        let url = format!("https://example.com/{}", path);
        let questions = Fingerprint::new(Endpoint::Questions).url(Some(&url)).key();
        let metadata = Fingerprint::new(Endpoint::Metadata).url(Some(&url)).key();
        prop_assert_ne!(questions.as_str(), metadata.as_str());
    }
}
