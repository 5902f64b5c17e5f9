// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{MetaTagsConf, MetaTagsHandler, MetaTagsService};

use async_trait::async_trait;
use bytes::Bytes;
use http::header;
use log::{Level, Log, Metadata, Record};
use module_utils::pingora::{
    Error, ErrorType, RequestHeader, ResponseHeader, ResponseSink, Upstream,
};
use module_utils::test_utils::{TestSink, TestUpstream};
use module_utils::FromYaml;
use std::sync::{Arc, Mutex};
use test_log::test;

const PAGE: &str = concat!(
    r#"<html><head><meta property="og:description" content="">"#,
    r#"<meta property="og:image" content=""></head>"#,
    r#"<body><p>Hello</p></body></html>"#,
);

const PAGE_WITH_IMAGE: &str = concat!(
    r#"<html><head><meta property="og:description" content="">"#,
    r#"<meta property="og:image" content=""></head>"#,
    r#"<body><img src="/icon.svg"><img alt="Saw" src="/uploads/saw.png"></body></html>"#,
);

#[derive(Debug, Default)]
struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl CapturingLogger {
    fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

/// Writes part of a response, then never completes
#[derive(Debug)]
struct StalledUpstream;

#[async_trait]
impl Upstream for StalledUpstream {
    async fn handle(
        &self,
        _request: &RequestHeader,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), Box<Error>> {
        sink.write_response_header(Box::new(ResponseHeader::build(200, None)?))
            .await?;
        sink.write_response_body(Bytes::from_static(b"<html><head>"))
            .await?;
        std::future::pending().await
    }
}

fn make_handler(conf_str: &str) -> MetaTagsHandler {
    MetaTagsConf::from_yaml(conf_str)
        .unwrap()
        .try_into()
        .unwrap()
}

fn default_conf() -> &'static str {
    r#"
        default_description: Foo
        default_image_path: /Bar.jpg
    "#
}

fn make_request(path: &str, host: Option<&str>) -> RequestHeader {
    let mut request = RequestHeader::build("GET", path.as_bytes(), None).unwrap();
    if let Some(host) = host {
        request.insert_header(header::HOST, host).unwrap();
    }
    request
}

async fn run(
    handler: &MetaTagsHandler,
    upstream: &TestUpstream,
    request: &RequestHeader,
) -> Result<TestSink, Box<Error>> {
    let mut sink = TestSink::new();
    handler.handle(request, &mut sink, upstream).await?;
    Ok(sink)
}

fn expected_page(description: &str, image: &str, page: &str) -> String {
    page.replace(
        r#"<meta property="og:description" content="">"#,
        &format!(r#"<meta property="og:description" content="{description}">"#),
    )
    .replace(
        r#"<meta property="og:image" content="">"#,
        &format!(r#"<meta property="og:image" content="{image}">"#),
    )
}

#[test(tokio::test)]
async fn default_values() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let upstream = TestUpstream::new(200)
        .with_header(header::CONTENT_TYPE, "text/html")
        .with_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;

    let expected = expected_page("Foo", "https://example.com/Bar.jpg", PAGE);
    assert!(sink.body_str().contains(r#"<meta property="og:description" content="Foo">"#));
    assert!(sink
        .body_str()
        .contains(r#"<meta property="og:image" content="https://example.com/Bar.jpg">"#));
    assert_eq!(sink.body_str(), expected);
    assert_eq!(sink.response_status(), Some(200));
    assert_eq!(sink.header_str("Content-Type"), Some("text/html"));
    assert_eq!(
        sink.header_str("Content-Length"),
        Some(expected.len().to_string().as_str())
    );
    assert_eq!(sink.header_writes(), 1);
    assert_eq!(sink.body_writes(), 1);
    assert_eq!(handler.pool().available(), 1);

    Ok(())
}

#[test(tokio::test)]
async fn without_host() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", None)).await?;
    assert_eq!(sink.body_str(), expected_page("Foo", "/Bar.jpg", PAGE));

    let handler = make_handler(
        r#"
            default_description: Foo
            default_image_path: https://cdn.example.net/Bar.webp
        "#,
    );
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "https://cdn.example.net/Bar.webp", PAGE)
    );

    Ok(())
}

#[test(tokio::test)]
async fn topic() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: Foo
            default_image_path: /Bar.jpg
            insert_topic: true
        "#,
    );
    let upstream = TestUpstream::new(200).with_body(PAGE);

    let sink = run(
        &handler,
        &upstream,
        &make_request("/en/woodworking/page1", Some("example.com")),
    )
    .await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo - Woodworking", "https://example.com/Bar.jpg", PAGE)
    );

    // No match, no separator
    let sink = run(&handler, &upstream, &make_request("/en", Some("example.com"))).await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "https://example.com/Bar.jpg", PAGE)
    );

    // Decoded and escaped
    let sink = run(
        &handler,
        &upstream,
        &make_request("/en/hand%20tools%20%26%20jigs/", Some("example.com")),
    )
    .await?;
    assert_eq!(
        sink.body_str(),
        expected_page(
            "Foo - Hand Tools &amp; Jigs",
            "https://example.com/Bar.jpg",
            PAGE
        )
    );

    // Topic ignored unless enabled
    let handler = make_handler(default_conf());
    let sink = run(
        &handler,
        &upstream,
        &make_request("/en/woodworking/page1", Some("example.com")),
    )
    .await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "https://example.com/Bar.jpg", PAGE)
    );

    Ok(())
}

#[test(tokio::test)]
async fn custom_topic_regex() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: Foo
            insert_topic: true
            topic_regex: "^/topics/([^/]+)\\.html$"
        "#,
    );
    let upstream = TestUpstream::new(200).with_body(PAGE);

    let sink = run(&handler, &upstream, &make_request("/topics/planes.html", None)).await?;
    assert_eq!(sink.body_str(), expected_page("Foo - Planes", "", PAGE));

    let sink = run(&handler, &upstream, &make_request("/en/planes/", None)).await?;
    assert_eq!(sink.body_str(), expected_page("Foo", "", PAGE));

    Ok(())
}

#[test(tokio::test)]
async fn page_image() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let upstream = TestUpstream::new(200).with_body(PAGE_WITH_IMAGE);
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "/uploads/saw.png", PAGE_WITH_IMAGE)
    );

    let handler = make_handler(
        r#"
            default_description: Foo
            image_regex: "<img alt=\"Saw\" src=\"([^\"]+)\""
        "#,
    );
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "/uploads/saw.png", PAGE_WITH_IMAGE)
    );

    Ok(())
}

#[test(tokio::test)]
async fn interpolation() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: "Notes about ${host} & more"
            default_image_path: "/previews${path}.png"
        "#,
    );
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let sink = run(
        &handler,
        &upstream,
        &make_request("/blog/post", Some("example.com")),
    )
    .await?;
    assert_eq!(
        sink.body_str(),
        expected_page(
            "Notes about example.com & more",
            "https://example.com/previews/blog/post.png",
            PAGE
        )
    );

    Ok(())
}

#[test(tokio::test)]
async fn request_values_escaped() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: "${http_x_title} on ${host}"
            default_image_path: "/previews${path}.png"
        "#,
    );
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let mut request = make_request("/a&b", Some("example.com&x"));
    request.insert_header("X-Title", r#"<b>"Saws"</b>"#)?;
    let sink = run(&handler, &upstream, &request).await?;
    assert_eq!(
        sink.body_str(),
        expected_page(
            "&lt;b&gt;&quot;Saws&quot;&lt;/b&gt; on example.com&amp;x",
            "https://example.com&amp;x/previews/a&amp;b.png",
            PAGE
        )
    );

    Ok(())
}

#[test(tokio::test)]
async fn configured_text_verbatim() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: "Tom &amp; Jerry"
            default_image_path: "https://cdn.example.net/tom&amp;jerry.jpg"
            insert_topic: true
        "#,
    );
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let sink = run(
        &handler,
        &upstream,
        &make_request("/en/cats%20%26%20mice/", Some("example.com")),
    )
    .await?;
    assert_eq!(
        sink.body_str(),
        expected_page(
            "Tom &amp; Jerry - Cats &amp; Mice",
            "https://cdn.example.net/tom&amp;jerry.jpg",
            PAGE
        )
    );

    Ok(())
}

#[test(tokio::test)]
async fn filled_tags_untouched() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let page = concat!(
        r#"<meta property="og:description" content="Existing">"#,
        r#"<meta property="og:image" content="https://example.org/a.jpg">"#,
    );
    let upstream = TestUpstream::new(200).with_body(page);
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;
    assert_eq!(sink.body_str(), page);
    assert_eq!(
        sink.header_str("Content-Length"),
        Some(page.len().to_string().as_str())
    );

    Ok(())
}

#[test(tokio::test)]
async fn status_mismatch() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: Foo
            default_image_path: /Bar.jpg
            response_match:
                status: [200]
        "#,
    );
    let upstream = TestUpstream::new(404).with_body(PAGE).chunked(10);
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;

    assert_eq!(sink.body(), PAGE.as_bytes());
    assert_eq!(sink.response_status(), Some(404));
    assert_eq!(
        sink.header_str("Content-Length"),
        Some(PAGE.len().to_string().as_str())
    );
    assert_eq!(sink.body_writes(), PAGE.len().div_ceil(10));
    assert_eq!(handler.pool().available(), 1);

    Ok(())
}

#[test(tokio::test)]
async fn content_type_match() -> Result<(), Box<Error>> {
    let handler = make_handler(
        r#"
            default_description: Foo
            response_match:
                status: [2]
                headers:
                    Content-Type: ["text/html*"]
        "#,
    );

    let upstream = TestUpstream::new(200)
        .with_header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .with_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", None)).await?;
    assert_eq!(sink.body_str(), expected_page("Foo", "", PAGE));

    let upstream = TestUpstream::new(200)
        .with_header(header::CONTENT_TYPE, "text/plain")
        .with_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", None)).await?;
    assert_eq!(sink.body_str(), PAGE);

    let upstream = TestUpstream::new(200).with_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", None)).await?;
    assert_eq!(sink.body_str(), PAGE);

    Ok(())
}

#[test(tokio::test)]
async fn chunked_upstream() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let request = make_request("/", Some("example.com"));
    let expected = expected_page("Foo", "https://example.com/Bar.jpg", PAGE);

    for chunk_size in [1, 7, 45, PAGE.len()] {
        let upstream = TestUpstream::new(200)
            .with_unsized_body(PAGE)
            .chunked(chunk_size);
        let sink = run(&handler, &upstream, &request).await?;
        assert_eq!(sink.body_str(), expected, "chunk size {chunk_size}");
        assert_eq!(sink.body_writes(), 1);
        assert_eq!(sink.header_str("Content-Length"), None);
    }

    Ok(())
}

#[test(tokio::test)]
async fn upstream_failure() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let request = make_request("/", Some("example.com"));

    let upstream = TestUpstream::new(200)
        .with_body(PAGE)
        .with_failure(ErrorType::ConnectionClosed);
    let mut sink = TestSink::new();
    let err = handler
        .handle(&request, &mut sink, &upstream)
        .await
        .unwrap_err();
    assert_eq!(err.etype, ErrorType::ConnectionClosed);
    assert_eq!(sink.header_writes(), 0);
    assert_eq!(sink.body_writes(), 0);
    assert_eq!(handler.pool().available(), 1);

    let upstream = TestUpstream::failing(ErrorType::HTTPStatus(502));
    let mut sink = TestSink::new();
    let err = handler
        .handle(&request, &mut sink, &upstream)
        .await
        .unwrap_err();
    assert_eq!(err.etype, ErrorType::HTTPStatus(502));
    assert_eq!(sink.header_writes(), 0);

    // Whatever was passed through before the failure stays
    let handler = make_handler(
        r#"
            response_match:
                status: [200]
        "#,
    );
    let upstream = TestUpstream::new(500)
        .with_body(PAGE)
        .with_failure(ErrorType::ReadError);
    let mut sink = TestSink::new();
    let err = handler
        .handle(&request, &mut sink, &upstream)
        .await
        .unwrap_err();
    assert_eq!(err.etype, ErrorType::ReadError);
    assert_eq!(sink.body_str(), PAGE);

    Ok(())
}

#[test(tokio::test)]
async fn sink_failure() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let mut sink = TestSink::failing();
    let err = handler
        .handle(&make_request("/", None), &mut sink, &upstream)
        .await
        .unwrap_err();
    assert_eq!(err.etype, ErrorType::WriteError);
    assert_eq!(handler.pool().available(), 1);

    Ok(())
}

#[test(tokio::test)]
async fn cancelled_request() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let request = make_request("/", Some("example.com"));
    let mut sink = TestSink::new();

    {
        let mut future = std::pin::pin!(handler.handle(&request, &mut sink, &StalledUpstream));
        tokio::select! {
            biased;
            result = future.as_mut() => panic!("stalled request completed: {result:?}"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(handler.pool().available(), 0);
    }

    assert_eq!(handler.pool().available(), 1);
    assert_eq!(sink.header_writes(), 0);
    assert_eq!(sink.body_writes(), 0);

    Ok(())
}

#[test(tokio::test)]
async fn empty_responses() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let request = make_request("/", Some("example.com"));

    // Nothing written at all
    let upstream = TestUpstream::new(200).without_header();
    let sink = run(&handler, &upstream, &request).await?;
    assert_eq!(sink.header_writes(), 0);
    assert_eq!(sink.body_writes(), 0);

    // Header only, as for HEAD requests
    let upstream = TestUpstream::new(200).with_header(header::CONTENT_LENGTH, "1234");
    let sink = run(&handler, &upstream, &request).await?;
    assert_eq!(sink.header_writes(), 1);
    assert_eq!(sink.body_writes(), 0);
    assert_eq!(sink.header_str("Content-Length"), Some("1234"));

    Ok(())
}

#[test(tokio::test)]
async fn implicit_status() -> Result<(), Box<Error>> {
    let handler = make_handler(default_conf());
    let upstream = TestUpstream::new(500)
        .without_header()
        .with_unsized_body(PAGE);
    let sink = run(&handler, &upstream, &make_request("/", Some("example.com"))).await?;
    assert_eq!(sink.response_status(), Some(200));
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "https://example.com/Bar.jpg", PAGE)
    );

    Ok(())
}

#[test(tokio::test)]
async fn injected_logger() -> Result<(), Box<Error>> {
    let logger = Arc::new(CapturingLogger::default());
    let handler = make_handler(
        r#"
            default_description: Foo
            default_image_path: /Bar.jpg
            response_match:
                status: [200]
        "#,
    )
    .with_logger(logger.clone());
    let request = make_request("/page", Some("example.com"));

    let upstream = TestUpstream::new(200).with_body(PAGE);
    run(&handler, &upstream, &request).await?;
    let upstream = TestUpstream::new(404).with_body(PAGE);
    run(&handler, &upstream, &request).await?;

    let messages = logger.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("buffered body replacement"));
    assert!(messages[0].contains("\"Foo\""));
    assert!(messages[0].contains("\"https://example.com/Bar.jpg\""));
    assert!(messages[1].starts_with("not buffering body; skipping replacement"));
    assert!(messages[1].contains("404"));
    assert!(messages[1].contains("/page"));

    let levels = logger
        .records
        .lock()
        .unwrap()
        .iter()
        .map(|(level, _)| *level)
        .collect::<Vec<_>>();
    assert_eq!(levels, vec![Level::Debug, Level::Debug]);

    Ok(())
}

#[test(tokio::test)]
async fn service() -> Result<(), Box<Error>> {
    let upstream = TestUpstream::new(200).with_body(PAGE);
    let service = MetaTagsService::new(make_handler(default_conf()), upstream);

    let mut sink = TestSink::new();
    service
        .handle(&make_request("/", Some("example.com")), &mut sink)
        .await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Foo", "https://example.com/Bar.jpg", PAGE)
    );

    // Services can be stacked, the inner one fills the tags first
    let inner = MetaTagsService::new(
        make_handler("default_description: Inner"),
        TestUpstream::new(200).with_body(PAGE),
    );
    let outer = MetaTagsService::new(make_handler(default_conf()), inner);
    let mut sink = TestSink::new();
    outer
        .handle(&make_request("/", Some("example.com")), &mut sink)
        .await?;
    assert_eq!(
        sink.body_str(),
        expected_page("Inner", "https://example.com/Bar.jpg", PAGE)
    );

    Ok(())
}

#[test]
fn invalid_configuration() {
    for conf in [
        "default_image_path: relative.jpg",
        "default_image_path: http://example.com/a.jpg",
        "default_image_path: /x.bmp",
    ] {
        let err = MetaTagsHandler::try_from(MetaTagsConf::from_yaml(conf).unwrap()).unwrap_err();
        assert_eq!(err.etype, ErrorType::InternalError, "{conf}");
    }

    assert!(MetaTagsConf::from_yaml("topic_regex: \"^/(a)/(b)\"").is_err());
    assert!(MetaTagsConf::from_yaml("image_regex: \"<img>\"").is_err());
}
