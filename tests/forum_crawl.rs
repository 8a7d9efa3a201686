//! End-to-end crawl tests against a mock HTTP server.
//!
//! These tests exercise the full traversal machinery: pagination following,
//! retry on transient failures, cycle detection, the circuit breaker and
//! streaming persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forum_archiver::models::Config;
use forum_archiver::pipeline::{Crawler, run_forum_crawl};
use forum_archiver::storage::MarkdownStorage;

/// Config pointed at the mock server, with test-friendly delays.
fn test_config(base: &str) -> Config {
    let mut config = Config::default();
    config.site.base_url = format!("{base}/");
    config.site.domain = "127.0.0.1".to_string();
    config.crawler.timeout_secs = 1;
    config.crawler.request_delay_ms = 20;
    config.crawler.topic_delay_ms = 10;
    config.crawler.min_delay_ms = 10;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.jitter = false;
    config
}

fn crawler_for(server: &MockServer) -> Crawler {
    Crawler::new(Arc::new(test_config(&server.uri()))).unwrap()
}

fn listing_page(topics: &[(&str, &str)], next_href: Option<&str>) -> String {
    let mut html = String::from("<html><body><h2>Тестовый форум</h2><ul>");
    for (title, href) in topics {
        html.push_str(&format!(
            r#"<li><a class="topictitle" href="{href}">{title}</a></li>"#
        ));
    }
    html.push_str("</ul>");
    if let Some(href) = next_href {
        html.push_str(&format!(
            r#"<div class="pagination"><a href="{href}">След.</a></div>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

fn topic_page(posts: &[(&str, &str, &str)], pagination: Option<&str>) -> String {
    let mut html = String::from("<html><body>");
    for (id, author, body) in posts {
        html.push_str(&format!(
            r##"<div class="post bg1" id="{id}">
                 <p class="author"><strong><a href="#">{author}</a></strong> » 12 мая 2024, 10:15</p>
                 <div class="content"><p>{body}</p></div>
               </div>"##
        ));
    }
    if let Some(block) = pagination {
        html.push_str(&format!(r#"<div class="pagination">{block}</div>"#));
    }
    html.push_str("</body></html>");
    html
}

async fn mount_listing(
    server: &MockServer,
    forum: &str,
    start: Option<&str>,
    body: String,
) {
    let mut mock = Mock::given(method("GET"))
        .and(path("/viewforum.php"))
        .and(query_param("f", forum));
    mock = match start {
        Some(start) => mock.and(query_param("start", start)),
        None => mock.and(query_param_is_missing("start")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_topic(server: &MockServer, topic: &str, start: Option<&str>, body: String) {
    let mut mock = Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", topic));
    mock = match start {
        Some(start) => mock.and(query_param("start", start)),
        None => mock.and(query_param_is_missing("start")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Scenario: a 3-page listing yields the union of all pages' topics, with an
/// inter-request delay between each advance.
#[tokio::test]
async fn test_three_page_listing_collects_union() {
    let server = MockServer::start().await;

    mount_listing(
        &server,
        "1",
        None,
        listing_page(
            &[("Тема 1", "./viewtopic.php?t=1"), ("Тема 2", "./viewtopic.php?t=2")],
            Some("./viewforum.php?f=1&start=131"),
        ),
    )
    .await;
    mount_listing(
        &server,
        "1",
        Some("131"),
        listing_page(
            &[("Тема 3", "./viewtopic.php?t=3"), ("Тема 4", "./viewtopic.php?t=4")],
            Some("./viewforum.php?f=1&start=262"),
        ),
    )
    .await;
    mount_listing(
        &server,
        "1",
        Some("262"),
        listing_page(
            &[("Тема 5", "./viewtopic.php?t=5"), ("Тема 6", "./viewtopic.php?t=6")],
            None,
        ),
    )
    .await;

    let mut crawler = crawler_for(&server);
    let started = Instant::now();
    let topics = crawler
        .crawl_listing(&format!("{}/viewforum.php?f=1", server.uri()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(topics.len(), 6);
    for i in 1..=6 {
        assert!(topics.contains_key(&format!("Тема {i}")));
    }
    let snapshot = crawler.metrics().snapshot();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.failed, 0);
    // Two advances, each preceded by an inter-request delay.
    assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
}

/// Scenario: a topic page times out twice, succeeds on the third attempt;
/// all posts arrive and exactly two retries are recorded.
#[tokio::test]
async fn test_topic_retry_after_timeouts() {
    let server = MockServer::start().await;

    mount_topic(
        &server,
        "5",
        None,
        topic_page(
            &[("p1", "alice", "первый"), ("p2", "bob", "второй")],
            Some(r#"<a href="./viewtopic.php?t=5&start=15">След.</a>"#),
        ),
    )
    .await;

    // First two hits on page 2 stall past the client timeout.
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "5"))
        .and(query_param("start", "15"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_topic(
        &server,
        "5",
        Some("15"),
        topic_page(
            &[("p3", "carol", "третий"), ("p4", "dave", "четвёртый")],
            None,
        ),
    )
    .await;

    let mut crawler = crawler_for(&server);
    let posts = crawler
        .crawl_topic(&format!("{}/viewtopic.php?t=5", server.uri()))
        .await
        .unwrap();

    assert_eq!(posts.len(), 4);
    assert_eq!(posts[0].author, "alice");
    assert_eq!(posts[3].author, "dave");
    assert!(posts[0].content_markdown.contains("первый"));

    let snapshot = crawler.metrics().snapshot();
    assert_eq!(snapshot.retry_attempts, 2);
    assert_eq!(snapshot.failed, 0);
}

/// Scenario: a page advertising itself as the next page halts the traversal
/// after a single fetch.
#[tokio::test]
async fn test_pagination_cycle_halts() {
    let server = MockServer::start().await;

    mount_listing(
        &server,
        "9",
        None,
        listing_page(
            &[("Единственная тема", "./viewtopic.php?t=9")],
            Some("./viewforum.php?f=9"),
        ),
    )
    .await;

    let mut crawler = crawler_for(&server);
    let topics = crawler
        .crawl_listing(&format!("{}/viewforum.php?f=9", server.uri()))
        .await
        .unwrap();

    assert_eq!(topics.len(), 1);
    // The self-link was never followed.
    assert_eq!(crawler.metrics().snapshot().total, 1);
}

/// Scenario: consecutive failed pages trip the circuit breaker even though
/// plenty of pages remain under the cap.
#[tokio::test]
async fn test_circuit_breaker_stops_traversal() {
    let server = MockServer::start().await;

    // Page 1 succeeds and links pages 2..6 by number only, so the stale page
    // keeps producing fresh URLs when later pages fail.
    let numbered: String = (2..=6)
        .map(|n| format!(r#"<a href="./viewtopic.php?t=7&start={}">{n}</a>"#, (n - 1) * 15))
        .collect();
    mount_topic(
        &server,
        "7",
        Some("0"),
        topic_page(&[("p1", "alice", "единственный пост")], Some(&numbered)),
    )
    .await;

    // Every later page is a server error.
    Mock::given(method("GET"))
        .and(path("/viewtopic.php"))
        .and(query_param("t", "7"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.crawler.max_consecutive_failures = 3;
    let mut crawler = Crawler::new(Arc::new(config)).unwrap();

    let posts = crawler
        .crawl_topic(&format!("{}/viewtopic.php?t=7&start=0", server.uri()))
        .await
        .unwrap();

    // Partial results survive the abort.
    assert_eq!(posts.len(), 1);

    let snapshot = crawler.metrics().snapshot();
    // One good page plus exactly three failed pages, then no further fetches.
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.failed, 3);
}

/// Two traversals over the same fixed pages yield identical topic sets.
#[tokio::test]
async fn test_listing_traversal_is_idempotent() {
    let server = MockServer::start().await;

    mount_listing(
        &server,
        "2",
        None,
        listing_page(
            &[("Тема А", "./viewtopic.php?t=10"), ("Тема Б", "./viewtopic.php?t=11")],
            Some("./viewforum.php?f=2&start=131"),
        ),
    )
    .await;
    mount_listing(
        &server,
        "2",
        Some("131"),
        listing_page(&[("Тема В", "./viewtopic.php?t=12")], None),
    )
    .await;

    let url = format!("{}/viewforum.php?f=2", server.uri());

    let mut first_crawler = crawler_for(&server);
    let first = first_crawler.crawl_listing(&url).await.unwrap();

    let mut second_crawler = crawler_for(&server);
    let second = second_crawler.crawl_listing(&url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

/// Full-forum crawl: topics are streamed into one archive document and the
/// run report reflects the partial-failure bookkeeping.
#[tokio::test]
async fn test_full_forum_crawl_streams_to_archive() {
    let server = MockServer::start().await;

    mount_listing(
        &server,
        "3",
        None,
        listing_page(
            &[
                ("Хорошая тема", "./viewtopic.php?t=21"),
                ("Пустая тема", "./viewtopic.php?t=22"),
            ],
            None,
        ),
    )
    .await;
    mount_topic(
        &server,
        "21",
        None,
        topic_page(
            &[("p201", "alice", "содержимое поста"), ("p202", "bob", "ответ")],
            None,
        ),
    )
    .await;
    // A topic page with no recognizable posts.
    mount_topic(&server, "22", None, "<html><body>nothing here</body></html>".to_string()).await;

    let tmp = TempDir::new().unwrap();
    let storage = MarkdownStorage::with_root(tmp.path());
    let mut crawler = crawler_for(&server);

    let report = run_forum_crawl(
        &mut crawler,
        &storage,
        &format!("{}/viewforum.php?f=3", server.uri()),
    )
    .await
    .unwrap();

    assert!(report.success);
    assert_eq!(report.total_topics, 1);
    assert_eq!(report.total_posts, 2);
    assert_eq!(report.failed_topics, vec!["Пустая тема".to_string()]);
    assert_eq!(report.forum_title, "Тестовый форум");

    let archive = std::fs::read_to_string(&report.document_path).unwrap();
    assert!(archive.starts_with("# Тестовый форум\n"));
    assert!(archive.contains("## Хорошая тема\n"));
    assert!(archive.contains("### alice"));
    assert!(archive.contains("содержимое поста"));

    let raw_report = std::fs::read_to_string(tmp.path().join("report.json")).unwrap();
    assert!(raw_report.contains("\"total_posts\": 2"));
}

/// A fatal status (404) is not retried and the fetch degrades to a failed
/// page rather than an error.
#[tokio::test]
async fn test_fatal_status_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/viewforum.php"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut crawler = crawler_for(&server);
    let topics = crawler
        .crawl_listing(&format!("{}/viewforum.php?f=4", server.uri()))
        .await
        .unwrap();

    assert!(topics.is_empty());
    let snapshot = crawler.metrics().snapshot();
    assert_eq!(snapshot.retry_attempts, 0);
    assert_eq!(snapshot.failed, 1);
}
