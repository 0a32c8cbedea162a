//! End-to-end harvest runs against mock servers

use crate::common::{detail_config, detail_page, index_page, mount_html, test_config};
use harvest_ripple::config::ImageRule;
use harvest_ripple::sink::{artifact_key, request_id, SinkError, SinkResult};
use harvest_ripple::{
    FieldValue, Frontier, Harvester, MemorySink, PageLabel, Record, RunState, Sink, SqliteSink,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A sink whose every call fails
#[derive(Default)]
struct FailingSink {
    calls: AtomicUsize,
}

impl Sink for FailingSink {
    fn push_records(&self, _records: &[Record]) -> SinkResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("disk full".to_string()))
    }

    fn put_artifact(&self, _key: &str, _bytes: &[u8], _content_type: &str) -> SinkResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("disk full".to_string()))
    }
}

#[tokio::test]
async fn test_index_with_three_details_drains() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    mount_html(&server, "/", index_page(&base_url, &["/a", "/b", "/c"])).await;
    mount_html(&server, "/a", detail_page("Alpha", "$1,200")).await;
    mount_html(&server, "/b", detail_page("Beta", "$950")).await;
    mount_html(&server, "/c", detail_page("Gamma", "$30")).await;

    let sink = Arc::new(MemorySink::new());
    let harvester = Harvester::new(test_config(vec![format!("{}/", base_url)]), sink.clone())
        .expect("Failed to create harvester");

    let summary = harvester
        .run(CancellationToken::new())
        .await
        .expect("Harvest failed");

    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.records_pushed, 3);
    assert_eq!(summary.pages_failed, 0);

    let mut titles: Vec<String> = sink
        .records()
        .iter()
        .filter_map(|r| r.get("title").and_then(|v| v.as_text()).map(str::to_string))
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);

    // Every record comes from a fetched detail page
    let sources: HashSet<String> = sink.records().into_iter().map(|r| r.source_url).collect();
    assert!(sources.contains(&format!("{}/a", base_url)));
    assert!(!sources.contains(&format!("{}/", base_url)));
}

#[tokio::test]
async fn test_record_budget_stops_run() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    for route in ["/1", "/2", "/3"] {
        mount_html(&server, route, detail_page(route, "1")).await;
    }

    let mut config = detail_config(vec![
        format!("{}/1", base_url),
        format!("{}/2", base_url),
        format!("{}/3", base_url),
    ]);
    config.harvest.max_records = 1;

    let sink = Arc::new(MemorySink::new());
    let harvester = Harvester::new(config, sink.clone()).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::BudgetExceeded);
    assert_eq!(summary.records_pushed, 1);
    assert_eq!(sink.record_count(), 1);
    assert!(summary.pages_fetched <= 3);
}

#[tokio::test]
async fn test_page_budget_never_exceeded() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    let routes: Vec<String> = (0..20).map(|i| format!("/item/{}", i)).collect();
    let route_refs: Vec<&str> = routes.iter().map(String::as_str).collect();
    mount_html(&server, "/", index_page(&base_url, &route_refs)).await;
    for route in &routes {
        mount_html(&server, route, detail_page(route, "5")).await;
    }

    let mut config = test_config(vec![format!("{}/", base_url)]);
    config.harvest.max_pages = 6;
    config.harvest.max_records = 100;
    config.harvest.worker_count = 8;

    let harvester = Harvester::new(config, Arc::new(MemorySink::new())).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::BudgetExceeded);
    assert_eq!(summary.pages_fetched, 6);
    assert_eq!(summary.records_pushed, 5);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6);
}

#[tokio::test]
async fn test_missing_field_is_null() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/no-price",
        "<html><body><h1>Mystery box</h1></body></html>".to_string(),
    )
    .await;

    let sink = Arc::new(MemorySink::new());
    let harvester = Harvester::new(
        detail_config(vec![format!("{}/no-price", server.uri())]),
        sink.clone(),
    )
    .unwrap();
    harvester.run(CancellationToken::new()).await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].len(), 2);
    assert_eq!(
        records[0].get("title"),
        Some(&FieldValue::Text("Mystery box".to_string()))
    );
    assert_eq!(records[0].get("price"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn test_shared_links_fetched_once() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    mount_html(&server, "/list1", index_page(&base_url, &["/shared", "/only1"])).await;
    mount_html(&server, "/list2", index_page(&base_url, &["/shared#specs"])).await;
    mount_html(&server, "/only1", detail_page("Only", "2")).await;
    Mock::given(method("GET"))
        .and(path("/shared"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(detail_page("Shared", "3"), "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harvester = Harvester::new(
        test_config(vec![
            format!("{}/list1", base_url),
            format!("{}/list2", base_url),
        ]),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 4);
    assert_eq!(summary.records_pushed, 2);
}

#[tokio::test]
async fn test_pagination_within_depth() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    let page = |detail: &str, next: Option<&str>| {
        let next_link = next
            .map(|n| format!(r#"<a class="next" href="{}{}">Next</a>"#, base_url, n))
            .unwrap_or_default();
        format!(
            r#"<html><body><a class="item" href="{}{}">x</a>{}</body></html>"#,
            base_url, detail, next_link
        )
    };

    mount_html(&server, "/homes", page("/home/1", Some("/homes/2"))).await;
    mount_html(&server, "/homes/2", page("/home/2", Some("/homes/3"))).await;
    mount_html(&server, "/homes/3", page("/home/3", None)).await;
    for i in 1..=3 {
        mount_html(&server, &format!("/home/{}", i), detail_page("Home", "$500,000")).await;
    }

    let mut config = test_config(vec![format!("{}/homes", base_url)]);
    config.harvest.max_depth = 2;
    config.extract.next_page_selector = Some("a.next".to_string());

    let sink = Arc::new(MemorySink::new());
    let harvester = Harvester::new(config, sink.clone()).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    // /homes (0) -> /homes/2 (1) -> /homes/3 (2); /home/3 would be depth 3
    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 5);
    assert_eq!(summary.records_pushed, 2);
    assert!(sink
        .records()
        .iter()
        .all(|r| r.get("price") == Some(&FieldValue::Number(500_000.0))));
}

#[tokio::test]
async fn test_cancellation_aborts_run() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(detail_page("Slow", "1"), "text/html")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let seeds = (0..10).map(|i| format!("{}/slow/{}", base_url, i)).collect();
    let mut config = detail_config(seeds);
    config.harvest.worker_count = 2;
    config.harvest.max_records = 100;

    let harvester = Harvester::new(config, Arc::new(MemorySink::new())).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let summary = harvester.run(cancel).await.unwrap();

    assert_eq!(summary.state, RunState::Aborted);
    assert!(summary.pages_fetched < 10);
    // Dispatched pages still finish
    assert_eq!(summary.records_pushed, summary.pages_fetched);
}

#[tokio::test]
async fn test_sink_failures_abort_run() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    for i in 0..5 {
        mount_html(&server, &format!("/p/{}", i), detail_page("P", "1")).await;
    }

    let seeds = (0..5).map(|i| format!("{}/p/{}", base_url, i)).collect();
    let mut config = detail_config(seeds);
    config.harvest.worker_count = 1;
    config.harvest.sink_failure_threshold = 2;

    let sink = Arc::new(FailingSink::default());
    let harvester = Harvester::new(config, sink.clone()).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::Aborted);
    assert_eq!(summary.sink_errors, 2);
    assert_eq!(summary.records_pushed, 0);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_images_stored_as_artifacts() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    mount_html(
        &server,
        "/gallery",
        r#"<html><body><h1>Gallery</h1>
        <img src="/img/one.png"><img src="/img/two.jpg"><img src="/img/missing.gif">
        </body></html>"#
            .to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/img/one.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/two.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xff, 0xd8, 0xff]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/missing.gif"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let page_url = format!("{}/gallery", base_url);
    let mut config = detail_config(vec![page_url.clone()]);
    config.extract.images = Some(ImageRule {
        selector: "img".to_string(),
        attribute: "src".to_string(),
        max_per_page: 10,
        emit_records: true,
    });

    let sink = Arc::new(MemorySink::new());
    let harvester = Harvester::new(config, sink.clone()).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 1);
    assert_eq!(summary.artifacts_stored, 2);
    assert_eq!(summary.artifacts_failed, 1);

    let rid = request_id(&page_url);
    let png_key = artifact_key(0, &rid, "png");
    let jpg_key = artifact_key(1, &rid, "jpg");
    assert_eq!(sink.artifact_keys(), vec![png_key.clone(), jpg_key]);

    let png = sink.artifact(&png_key).unwrap();
    assert_eq!(png.content_type, "image/png");
    assert_eq!(png.bytes, vec![0x89, 0x50, 0x4e, 0x47]);

    // One page record plus one record per stored image
    assert_eq!(summary.records_pushed, 3);
    let image_record = sink
        .records()
        .into_iter()
        .find(|r| r.get("file_key") == Some(&FieldValue::Text(png_key.clone())))
        .expect("image record");
    assert_eq!(image_record.source_url, page_url);
    assert_eq!(
        image_record.get("image_url").and_then(|v| v.as_text()),
        Some(format!("{}/img/one.png", base_url).as_str())
    );
}

#[tokio::test]
async fn test_run_persisted_in_sqlite() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    mount_html(&server, "/", index_page(&base_url, &["/a", "/b"])).await;
    mount_html(&server, "/a", detail_page("A", "10")).await;
    mount_html(&server, "/b", detail_page("B", "20")).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("harvest.db");
    let sink = Arc::new(SqliteSink::new(&db_path).unwrap());
    let run_id = sink.begin_run("test-hash").unwrap();

    let harvester = Harvester::new(
        test_config(vec![format!("{}/", base_url)]),
        Arc::clone(&sink) as Arc<dyn Sink>,
    )
    .unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();
    sink.finish_run(run_id, &summary).unwrap();

    let run = sink.get_run(run_id).unwrap().expect("run row");
    assert_eq!(run.state, RunState::Drained);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(run.records_pushed, 2);

    let records = sink.load_records().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .any(|r| r.get("price") == Some(&FieldValue::Number(20.0))));
}

#[tokio::test]
async fn test_concurrent_workers_dequeue_each_url_once() {
    let frontier = Arc::new(Frontier::new(0));
    for i in 0..1000 {
        frontier.enqueue(&format!("https://seed.test/{}", i), PageLabel::Detail, 0);
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let frontier = Arc::clone(&frontier);
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(entry) = frontier.dequeue() {
                taken.push(entry.url);
                frontier.complete();
                tokio::task::yield_now().await;
            }
            taken
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 1000);
    assert_eq!(unique.len(), 1000);
    assert!(frontier.is_drained());
}

#[tokio::test]
async fn test_harvester_workers_fetch_each_seed_once() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(detail_page("Lot", "7"), "text/html"))
        .mount(&server)
        .await;

    let seeds = (0..1000).map(|i| format!("{}/lot/{}", base_url, i)).collect();
    let mut config = detail_config(seeds);
    config.harvest.worker_count = 8;
    config.harvest.max_pages = 1000;
    config.harvest.max_records = 2000;

    let harvester = Harvester::new(config, Arc::new(MemorySink::new())).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    // The thousandth dispatch uses up the page budget exactly
    assert_eq!(summary.state, RunState::BudgetExceeded);
    assert_eq!(summary.pages_fetched, 1000);
    assert_eq!(summary.records_pushed, 1000);

    let requests = server.received_requests().await.unwrap();
    let paths: HashSet<String> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(requests.len(), 1000);
    assert_eq!(paths.len(), 1000);
}

#[tokio::test]
async fn test_request_delay_spaces_pages() {
    let server = MockServer::start().await;
    let base_url = server.uri();
    for i in 0..3 {
        mount_html(&server, &format!("/slow/{}", i), detail_page("S", "1")).await;
    }

    let seeds = (0..3).map(|i| format!("{}/slow/{}", base_url, i)).collect();
    let mut config = detail_config(seeds);
    config.harvest.worker_count = 1;
    config.harvest.request_delay_ms = 150;

    let harvester = Harvester::new(config, Arc::new(MemorySink::new())).unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 3);
    assert!(
        summary.elapsed >= Duration::from_millis(300),
        "run took {:?}",
        summary.elapsed
    );
}

#[tokio::test]
async fn test_malformed_links_counted() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    mount_html(
        &server,
        "/",
        format!(
            r#"<html><body>
            <a class="item" href="http://[bad">Broken</a>
            <a class="item" href="ftp://files.test/f">FTP</a>
            <a class="item" href="https://">Empty host</a>
            <a class="item" href="mailto:sales@shop.test">Mail</a>
            <a class="item" href="{}/ok">Fine</a>
            </body></html>"#,
            base_url
        ),
    )
    .await;
    mount_html(&server, "/ok", detail_page("Ok", "1")).await;

    let harvester = Harvester::new(
        test_config(vec![format!("{}/", base_url)]),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    let summary = harvester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.state, RunState::Drained);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.urls_rejected, 3);
}

async fn mount_gallery(server: &MockServer) {
    mount_html(
        server,
        "/gallery",
        r#"<html><body><h1>Gallery</h1><img src="/img/one.png"></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/img/one.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50], "image/png"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rerun_with_stored_artifacts() {
    let server = MockServer::start().await;
    mount_gallery(&server).await;

    let mut config = detail_config(vec![format!("{}/gallery", server.uri())]);
    config.extract.images = Some(ImageRule {
        selector: "img".to_string(),
        attribute: "src".to_string(),
        max_per_page: 10,
        emit_records: true,
    });

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteSink::new(&dir.path().join("harvest.db")).unwrap());

    let first = Harvester::new(config.clone(), Arc::clone(&sink) as Arc<dyn Sink>)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();
    let second = Harvester::new(config, Arc::clone(&sink) as Arc<dyn Sink>)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.artifacts_stored, 1);
    assert_eq!(second.state, RunState::Drained);
    assert_eq!(second.artifacts_stored, 0);
    assert_eq!(second.artifacts_failed, 0);
    assert_eq!(second.sink_errors, 0);
    // The page record and the image record are still emitted
    assert_eq!(second.records_pushed, 2);

    assert_eq!(sink.count_artifacts().unwrap(), 1);
    assert_eq!(sink.count_records().unwrap(), 4);
}
