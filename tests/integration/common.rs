//! Shared helpers for the integration tests

use harvest_ripple::config::{
    Config, ExtractConfig, FetchConfig, FieldRule, HarvestConfig, OutputConfig,
};
use harvest_ripple::PageLabel;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with fast retries and the given seeds
pub fn test_config(seeds: Vec<String>) -> Config {
    Config {
        harvest: HarvestConfig {
            max_pages: 10,
            max_records: 10,
            worker_count: 4,
            ..HarvestConfig::with_seeds(seeds)
        },
        fetch: FetchConfig {
            max_retries: 1,
            retry_backoff_ms: 5,
            timeout_ms: 5_000,
            ..FetchConfig::default()
        },
        output: OutputConfig::default(),
        extract: ExtractConfig {
            link_selector: "a.item".to_string(),
            fields: vec![field("title", "h1"), number_field("price", ".price")],
            ..ExtractConfig::default()
        },
    }
}

/// Same as `test_config`, with every seed treated as a detail page
pub fn detail_config(seeds: Vec<String>) -> Config {
    let mut config = test_config(seeds);
    config.extract.seed_label = PageLabel::Detail;
    config
}

pub fn field(name: &str, selector: &str) -> FieldRule {
    FieldRule {
        name: name.to_string(),
        selector: selector.to_string(),
        attribute: None,
        multiple: false,
        separator: "; ".to_string(),
        number: false,
    }
}

pub fn number_field(name: &str, selector: &str) -> FieldRule {
    FieldRule {
        number: true,
        ..field(name, selector)
    }
}

/// Serves `body` as HTML at `route`
pub async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// A detail page with a title and a price
pub fn detail_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><head><title>{0}</title></head><body>
        <h1>{0}</h1>
        <span class="price">{1}</span>
        </body></html>"#,
        title, price
    )
}

/// An index page linking to the given routes
pub fn index_page(base_url: &str, routes: &[&str]) -> String {
    let links: String = routes
        .iter()
        .map(|route| format!(r#"<li><a class="item" href="{}{}">{}</a></li>"#, base_url, route, route))
        .collect();
    format!("<html><body><ul>{}</ul></body></html>", links)
}
