mod common;

use std::collections::HashMap;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use clickhouse_http_client::{ClientError, DataFormat, ErrorKind, QueryOptions, TransportBody};
use clickhouse_http_core::sentinel::encode_exception_block;
use clickhouse_http_core::{Codec, GzipCodec};
use futures::StreamExt;
use serde::Deserialize;

use common::{TAG, chunked, client, serve};

#[derive(Debug, Deserialize, PartialEq)]
struct Number {
    n: u64,
}

async fn two_rows() -> impl IntoResponse {
    (
        [
            ("x-clickhouse-query-id", "8f0c3c4e-5a59-4a4e-9a53-0d2b7c8d1e11"),
            (
                "x-clickhouse-summary",
                r#"{"read_rows":"2","read_bytes":"16","written_rows":"0","written_bytes":"0","total_rows_to_read":"2","result_rows":"2","result_bytes":"32","elapsed_ns":"1200"}"#,
            ),
        ],
        chunked(
            vec![b"{\"n\":1}\n{\"n\"".to_vec(), b":2}\n".to_vec()],
            Duration::from_millis(10),
        ),
    )
}

#[tokio::test]
async fn test_stream_rows_then_already_consumed() {
    let url = serve(Router::new().route("/", post(two_rows))).await;
    let client = client(&url);

    let mut result = client.query("SELECT n", QueryOptions::new()).await.unwrap();
    assert_eq!(result.query_id(), "8f0c3c4e-5a59-4a4e-9a53-0d2b7c8d1e11");
    let summary = result.summary().unwrap();
    assert_eq!(summary.read_rows, 2);
    assert_eq!(summary.elapsed_ns, 1200);

    let mut rows = result.stream().unwrap();
    let mut numbers = Vec::new();
    while let Some(row) = rows.next().await {
        numbers.push(row.unwrap().json::<Number>().unwrap());
    }
    assert_eq!(numbers, vec![Number { n: 1 }, Number { n: 2 }]);

    let err = result.text().await.unwrap_err();
    assert!(matches!(err, ClientError::AlreadyConsumed));
    assert_eq!(client.pool_status().idle, 1);
}

#[tokio::test]
async fn test_whole_body_accessors_are_repeatable() {
    let url = serve(Router::new().route("/", post(two_rows))).await;
    let client = client(&url);

    let mut result = client.query("SELECT n", QueryOptions::new()).await.unwrap();
    assert_eq!(result.text().await.unwrap(), "{\"n\":1}\n{\"n\":2}\n");
    let numbers: Vec<Number> = result.json().await.unwrap();
    assert_eq!(numbers.len(), 2);
    assert!(matches!(result.stream(), Err(ClientError::AlreadyConsumed)));
}

#[tokio::test]
async fn test_request_carries_query_parameters() {
    async fn echo(Query(params): Query<HashMap<String, String>>, body: Bytes) -> String {
        format!(
            "{}|{}|{}|{}\n",
            params.get("default_format").cloned().unwrap_or_default(),
            params.get("max_threads").cloned().unwrap_or_default(),
            params.get("database").cloned().unwrap_or_default(),
            String::from_utf8_lossy(&body)
        )
    }
    let url = serve(Router::new().route("/", post(echo))).await;
    let client = common::builder(&format!("{url}?database=analytics&ch_max_threads=4"))
        .build()
        .unwrap();

    let mut result = client
        .query(
            "SELECT 1",
            QueryOptions::new().format(DataFormat::TabSeparated),
        )
        .await
        .unwrap();
    assert_eq!(
        result.text().await.unwrap(),
        "TabSeparated|4|analytics|SELECT 1\n"
    );
}

#[tokio::test]
async fn test_gzip_response_is_decompressed() {
    async fn gzipped(headers: HeaderMap) -> impl IntoResponse {
        assert_eq!(headers["accept-encoding"], "gzip");
        let body = GzipCodec::default()
            .compress(b"{\"n\":7}\n{\"n\":8}\n")
            .unwrap();
        ([("content-encoding", "gzip")], body)
    }
    let url = serve(Router::new().route("/", post(gzipped))).await;
    let client = common::builder(&url).compress_response(true).build().unwrap();

    let mut result = client.query("SELECT n", QueryOptions::new()).await.unwrap();
    let rows: Vec<_> = result.stream().unwrap().collect().await;
    let texts: Vec<_> = rows
        .iter()
        .map(|row| row.as_ref().unwrap().text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["{\"n\":7}", "{\"n\":8}"]);
}

#[tokio::test]
async fn test_compressed_body_left_for_raw_stream() {
    async fn gzipped() -> impl IntoResponse {
        let body = GzipCodec::default().compress(b"{\"n\":1}\n").unwrap();
        ([("content-encoding", "gzip")], body)
    }
    let url = serve(Router::new().route("/", post(gzipped))).await;
    let client = common::builder(&url).compress_response(true).build().unwrap();

    let mut result = client
        .query("SELECT n", QueryOptions::new().decompress_response(false))
        .await
        .unwrap();
    assert!(matches!(result.stream(), Err(ClientError::InvalidRequest(_))));

    let mut raw = result.raw_stream().unwrap();
    let mut compressed = Vec::new();
    while let Some(chunk) = raw.next().await {
        compressed.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(
        GzipCodec::default().decompress(&compressed).unwrap(),
        Bytes::from_static(b"{\"n\":1}\n")
    );
}

#[tokio::test]
async fn test_embedded_exception_after_rows() {
    async fn failing() -> impl IntoResponse {
        let mut tail = b"{\"n\":2}\n".to_vec();
        tail.extend(encode_exception_block(
            TAG,
            "Code: 395. DB::Exception: Value passed to 'throwIf' function is non-zero",
        ));
        (
            [("x-clickhouse-exception-tag", TAG)],
            chunked(vec![b"{\"n\":1}\n".to_vec(), tail], Duration::from_millis(10)),
        )
    }
    let url = serve(Router::new().route("/", post(failing))).await;
    let client = client(&url);

    let mut result = client.query("SELECT throwIf(n = 3)", QueryOptions::new()).await.unwrap();
    let mut rows = result.stream().unwrap();
    assert_eq!(rows.next().await.unwrap().unwrap().text().unwrap(), "{\"n\":1}");
    assert_eq!(rows.next().await.unwrap().unwrap().text().unwrap(), "{\"n\":2}");

    let err = rows.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamException);
    assert!(err.message().unwrap().contains("Code: 395"));
    assert_eq!(err.query_id(), Some(result.query_id()));
    assert!(rows.next().await.is_none());
}

#[tokio::test]
async fn test_truncated_exception_is_protocol_error() {
    async fn cut() -> impl IntoResponse {
        let mut body = b"{\"n\":1}\n".to_vec();
        body.extend_from_slice(b"\r\n__excep");
        body
    }
    let url = serve(Router::new().route("/", post(cut))).await;
    let client = client(&url);

    let mut result = client.query("SELECT n", QueryOptions::new()).await.unwrap();
    let rows: Vec<_> = result.stream().unwrap().collect().await;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].is_ok());
    assert!(matches!(rows[1], Err(ClientError::StreamProtocol { .. })));
}

#[tokio::test]
async fn test_whole_body_detects_exception() {
    async fn failing() -> impl IntoResponse {
        let mut body = b"{\"n\":1}\n".to_vec();
        body.extend(encode_exception_block(TAG, "DB::Exception: boom"));
        ([("x-clickhouse-exception-tag", TAG)], body)
    }
    let url = serve(Router::new().route("/", post(failing))).await;
    let client = client(&url);

    let mut result = client.query("SELECT n", QueryOptions::new()).await.unwrap();
    let err = result.text().await.unwrap_err();
    assert!(matches!(err, ClientError::StreamException { ref message, .. } if message.contains("boom")));
    assert_eq!(err.query_id(), Some(result.query_id()));

    // The failure sticks; it is not replaced by AlreadyConsumed.
    let again = result.text().await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::StreamException);
    assert_eq!(again.to_string(), err.to_string());
    assert_eq!(
        result.stream().err().map(|err| err.kind()),
        Some(ErrorKind::StreamException)
    );
}

#[tokio::test]
async fn test_server_error_status() {
    async fn rejected() -> impl IntoResponse {
        (
            StatusCode::NOT_FOUND,
            [("x-clickhouse-exception-code", "60")],
            "Code: 60. DB::Exception: Table default.missing does not exist.\n",
        )
    }
    let url = serve(Router::new().route("/", post(rejected))).await;
    let client = client(&url);

    let id = "9b2f3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d";
    let err = client
        .query("SELECT * FROM missing", QueryOptions::new().query_id(id))
        .await
        .unwrap_err();
    assert_eq!(err.query_id(), Some(id));
    match err {
        ClientError::Server {
            status,
            code,
            message,
            ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(code.as_deref(), Some("60"));
            assert!(message.contains("does not exist"));
        }
        other => panic!("expected a server error, got {other:?}"),
    }
    // A clean error response leaves the channel reusable.
    assert_eq!(client.pool_status().idle, 1);
}

#[tokio::test]
async fn test_command_and_ping() {
    let router = Router::new()
        .route("/", post(|| async { "" }))
        .route("/ping", get(|| async { "Ok.\n" }));
    let url = serve(router).await;
    let client = client(&url);

    let result = client
        .command("CREATE TABLE t (n UInt64) ENGINE = Memory", QueryOptions::new())
        .await
        .unwrap();
    assert!(!result.query_id().is_empty());
    assert!(client.ping().await.unwrap());
    assert_eq!(client.pool_status().busy, 0);
}

#[tokio::test]
async fn test_ping_error_status_is_false() {
    let router = Router::new().route(
        "/ping",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "starting") }),
    );
    let url = serve(router).await;
    assert!(!client(&url).ping().await.unwrap());
}

#[tokio::test]
async fn test_exec_with_body() {
    async fn insert(Query(params): Query<HashMap<String, String>>, body: Bytes) -> String {
        format!(
            "{}\n{}",
            params.get("query").cloned().unwrap_or_default(),
            String::from_utf8_lossy(&body)
        )
    }
    let url = serve(Router::new().route("/", post(insert))).await;
    let client = client(&url);

    let rows = futures::stream::iter(vec![
        Ok::<_, ClientError>(Bytes::from_static(b"{\"n\":1}\n")),
        Ok(Bytes::from_static(b"{\"n\":2}\n")),
    ]);
    let result = client
        .exec(
            "INSERT INTO t FORMAT JSONEachRow",
            Some(TransportBody::streaming(rows)),
            QueryOptions::new(),
        )
        .await
        .unwrap();
    assert!(!result.is_compressed());

    let lines: Vec<_> = result
        .into_rows(DataFormat::TabSeparated)
        .unwrap()
        .map(|row| row.unwrap().text().unwrap().to_string())
        .collect()
        .await;
    assert_eq!(
        lines,
        vec!["INSERT INTO t FORMAT JSONEachRow", "{\"n\":1}", "{\"n\":2}"]
    );
}

#[tokio::test]
async fn test_compressed_request_body() {
    async fn inflate(headers: HeaderMap, body: Bytes) -> String {
        assert_eq!(headers["content-encoding"], "gzip");
        let plain = GzipCodec::default().decompress(&body).unwrap();
        String::from_utf8_lossy(&plain).into_owned()
    }
    let url = serve(Router::new().route("/", post(inflate))).await;
    let client = common::builder(&url).compress_request(true).build().unwrap();

    let mut result = client
        .query("SELECT 'compressed'", QueryOptions::new().format(DataFormat::Csv))
        .await
        .unwrap();
    assert_eq!(result.text().await.unwrap(), "SELECT 'compressed'");
}
