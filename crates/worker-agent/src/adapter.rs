use serde_json::Value;

const CRUNCHBASE_ENDPOINTS: &[(&str, &str)] = &[
    ("search_with_rank", "/search/crunchbase/top-similar-with-rank"),
    ("search_similar", "/search/crunchbase/top-similar"),
    ("search_similar_full", "/search/crunchbase/top-similar-full"),
    ("search_batch", "/search/crunchbase/batch"),
    ("search_hashtag", "/search/crunchbase/hashtag"),
    ("enrich", "/search/crunchbase/batch"),
    ("get_all", "/companies/all"),
    ("get_by_names", "/companies/by-names"),
];

const TRACXN_ENDPOINTS: &[(&str, &str)] = &[
    ("search_with_rank", "/scrape-batch-api-with-rank"),
    ("search", "/scrape-batch-api"),
    ("search_batch", "/scrape-batch"),
    ("search_by_references", "/scrape-references"),
    ("get_all", "/companies"),
    ("health", "/health"),
];

const SOCIAL_ENDPOINTS: &[(&str, &str)] = &[
    ("search_tweets", "/search/tweets"),
    ("tweet_replies", "/tweet/replies"),
    ("tweet_thread", "/tweet/{tweet_id}/thread"),
    ("health", "/health"),
];

/// Maps an `api_type`/`action` pair to a local-API endpoint path, falling back
/// to `/${action}` for anything not in the static table (SPEC_FULL.md §4.7).
pub fn endpoint_for(api_type: &str, action: &str) -> String {
    let table = match api_type {
        "crunchbase" => CRUNCHBASE_ENDPOINTS,
        "tracxn" => TRACXN_ENDPOINTS,
        "social" | "twitter" => SOCIAL_ENDPOINTS,
        _ => &[],
    };

    table
        .iter()
        .find(|(key, _)| *key == action)
        .map(|(_, endpoint)| endpoint.to_string())
        .unwrap_or_else(|| format!("/{action}"))
}

/// Shapes the outbound request body per api_type/action quirks.
pub fn prepare_payload(api_type: &str, action: &str, payload: &Value, report_id: &str) -> Value {
    match api_type {
        "social" | "twitter" => prepare_social_payload(action, payload),
        _ => {
            let mut body = payload.clone();
            if let Value::Object(map) = &mut body {
                map.insert("report_id".into(), Value::String(report_id.to_string()));
            }
            body
        }
    }
}

fn prepare_social_payload(action: &str, payload: &Value) -> Value {
    match action {
        "search_tweets" => {
            let keyword = payload
                .get("keywords")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str())
                .or_else(|| payload.get("keyword").and_then(|v| v.as_str()))
                .unwrap_or("")
                .to_string();
            serde_json::json!({
                "keyword": keyword,
                "query_type": payload.get("query_type").cloned().unwrap_or_else(|| Value::String("Top".into())),
                "num_posts": payload.get("limit").cloned().unwrap_or_else(|| Value::from(10)),
                "num_comments": payload.get("num_comments").cloned().unwrap_or_else(|| Value::from(0)),
            })
        }
        "tweet_replies" => {
            serde_json::json!({
                "tweet_id": payload.get("tweet_id").cloned().unwrap_or_else(|| Value::String(String::new())),
                "num_replies": payload.get("limit").cloned().unwrap_or_else(|| Value::from(20)),
            })
        }
        _ => payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_action_maps_to_table_entry() {
        assert_eq!(
            endpoint_for("crunchbase", "search_with_rank"),
            "/search/crunchbase/top-similar-with-rank"
        );
    }

    #[test]
    fn unknown_action_falls_through() {
        assert_eq!(endpoint_for("crunchbase", "mystery_action"), "/mystery_action");
        assert_eq!(endpoint_for("unknown_type", "anything"), "/anything");
    }

    #[test]
    fn social_search_tweets_joins_keyword_list() {
        let payload = serde_json::json!({"keywords": ["ai", "ml"]});
        let prepared = prepare_social_payload("search_tweets", &payload);
        assert_eq!(prepared["keyword"], "ai");
        assert_eq!(prepared["num_posts"], 10);
    }
}
