//! Website discovery.

use std::time::Duration;

use serde::Deserialize;

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::menu_import::links::origin;
use kitchenline_pipeline::menu_import::{SourceCandidate, SourceDiscovery};

use super::http::{LazyClient, check_response, transport_error};

/// Discovery with no search backend: every job without a website override
/// pauses for an operator to supply one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

impl SourceDiscovery for NoDiscovery {
    fn discover(&self, _name: &str, _location: Option<&str>) -> Result<Vec<SourceCandidate>, ServiceError> {
        Ok(Vec::new())
    }
}

/// Review sites, delivery platforms and social networks are never the
/// restaurant's own website.
const AGGREGATOR_DOMAINS: &[&str] = &[
    "yelp.", "tripadvisor.", "facebook.com", "instagram.com", "twitter.com", "x.com",
    "doordash.com", "ubereats.com", "grubhub.com", "opentable.com", "google.",
];

const ORGANIC_RESULTS: usize = 3;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: String,
    #[serde(default)]
    title: Option<String>,
}

fn is_aggregator(url: &str) -> bool {
    let host = origin(url).unwrap_or_default();
    AGGREGATOR_DOMAINS.iter().any(|d| host.contains(d))
}

/// Turn a search response into scored candidates.
///
/// The knowledge-graph website scores 1.0; organic results score by rank
/// (0.9, 0.8, ...). Aggregators are dropped.
fn candidates_from(response: SearchResponse) -> Vec<SourceCandidate> {
    let mut out = Vec::new();
    if let Some(KnowledgeGraph {
        website: Some(site),
        title,
    }) = response.knowledge_graph
    {
        if !is_aggregator(&site) {
            out.push(SourceCandidate {
                url: site,
                score: 1.0,
                title,
            });
        }
    }
    let organic = response
        .organic_results
        .into_iter()
        .filter(|r| !is_aggregator(&r.link))
        .take(ORGANIC_RESULTS);
    for (rank, result) in organic.enumerate() {
        out.push(SourceCandidate {
            url: result.link,
            score: 0.9 - 0.1 * rank as f64,
            title: result.title,
        });
    }
    out
}

/// Web search API returning SerpAPI-shaped JSON (`knowledge_graph.website`,
/// `organic_results[].link`).
#[derive(Debug)]
pub struct SearchApiDiscovery {
    endpoint: String,
    api_key: String,
    client: LazyClient,
}

impl SearchApiDiscovery {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: LazyClient::new(Duration::from_secs(10)),
        }
    }
}

impl SourceDiscovery for SearchApiDiscovery {
    fn discover(
        &self,
        restaurant_name: &str,
        location_hint: Option<&str>,
    ) -> Result<Vec<SourceCandidate>, ServiceError> {
        let query = match location_hint {
            Some(loc) => format!("{restaurant_name} {loc} restaurant official site"),
            None => format!("{restaurant_name} restaurant official site"),
        };
        let response = self
            .client
            .get()?
            .get(&self.endpoint)
            .query(&[("q", query.as_str()), ("api_key", self.api_key.as_str()), ("num", "5")])
            .send()
            .map_err(transport_error)?;
        let body: SearchResponse = check_response(response, &self.endpoint)?
            .json()
            .map_err(|e| ServiceError::invalid_response(format!("search response: {e}")))?;
        Ok(candidates_from(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Vec<SourceCandidate> {
        candidates_from(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn knowledge_graph_ranks_first_and_aggregators_are_skipped() {
        let found = parse(json!({
            "knowledge_graph": {"website": "https://gildedfork.example", "title": "The Gilded Fork"},
            "organic_results": [
                {"link": "https://www.yelp.com/biz/gilded-fork"},
                {"link": "https://gildedfork.example/menu"},
                {"link": "https://news.example/review"}
            ]
        }));
        let urls: Vec<&str> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://gildedfork.example", "https://gildedfork.example/menu", "https://news.example/review"]
        );
        assert_eq!(found[0].score, 1.0);
        assert!(found[1].score > found[2].score);
    }

    #[test]
    fn empty_response_yields_nothing() {
        assert!(parse(json!({})).is_empty());
        assert!(NoDiscovery.discover("GF", None).unwrap().is_empty());
    }
}
