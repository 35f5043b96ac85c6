//! End-to-end scenarios against the request-handling engine
//!
//! Every test builds a fresh server over a temporary data directory and
//! drives it through the typed handlers, the way the transport router
//! would after decoding.

use metrodb::registry::Registry;
use metrodb::server::Server;
use metrodb::store::now_ns;
use metrodb::wire::{
    EditReq, GetReq, IncReq, InfoReq, OpenReq, PutReq, ReqBatch, Request,
};
use metrodb::Error;
use tempfile::TempDir;

const DB: &str = "m";

async fn fresh_server(dir: &TempDir) -> Server {
    let registry = Registry::scan(dir.path(), false).await.unwrap();
    let server = Server::new(registry);
    server
        .open(&OpenReq {
            database: DB.to_string(),
            resolution: 60,
            retention: 36000,
            epoch_time: 3600,
            max_ro_epochs: 2,
            max_rw_epochs: 2,
        })
        .await
        .unwrap();
    server
}

/// Current time in seconds, aligned down to a one-minute bucket
fn now_aligned() -> u32 {
    let now_s = (now_ns() / 1_000_000_000) as u32;
    now_s - now_s % 60
}

fn fields(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_open_info_round_trip() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;

    let res = server.info(&InfoReq {}).await.unwrap();
    assert_eq!(res.databases.len(), 1);
    assert_eq!(res.databases[0].database, DB);
    assert_eq!(res.databases[0].resolution, 60);
}

#[tokio::test]
async fn test_put_then_get() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    server
        .put(&PutReq {
            database: DB.to_string(),
            fields: fields(&["a", "b", "c"]),
            timestamp: now,
            value: 1.1,
            count: 1,
        })
        .await
        .unwrap();

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["a", "b", "c"]),
            group_by: vec![true, true, true],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();

    assert_eq!(res.groups.len(), 1);
    assert_eq!(res.groups[0].fields, fields(&["a", "b", "c"]));
    assert_eq!(res.groups[0].points.len(), 1);
    assert_eq!(res.groups[0].points[0].value, 1.1);
    assert_eq!(res.groups[0].points[0].count, 1);
}

#[tokio::test]
async fn test_inc_then_get() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    server
        .inc(&IncReq {
            database: DB.to_string(),
            fields: fields(&["x", "y", "z"]),
            timestamp: now,
            value: 1.1,
            count: 1,
        })
        .await
        .unwrap();

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["x", "y", "z"]),
            group_by: vec![true, true, true],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();

    assert_eq!(res.groups.len(), 1);
    assert_eq!(res.groups[0].points.len(), 1);
    assert_eq!(res.groups[0].points[0].value, 1.1);
    assert_eq!(res.groups[0].points[0].count, 1);
}

#[tokio::test]
async fn test_inc_accumulates() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();
    let tuple = fields(&["acc"]);

    for (value, count) in [(0.5, 2), (1.5, 3)] {
        server
            .inc(&IncReq {
                database: DB.to_string(),
                fields: tuple.clone(),
                timestamp: now,
                value,
                count,
            })
            .await
            .unwrap();
    }

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: tuple.clone(),
            group_by: vec![true],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();

    assert_eq!(res.groups.len(), 1);
    assert_eq!(res.groups[0].points[0].value, 2.0);
    assert_eq!(res.groups[0].points[0].count, 5);
}

#[tokio::test]
async fn test_edit_changes_epoch_caps() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;

    let store = server.registry().find(DB).unwrap();
    assert_eq!(store.info().max_ro_epochs, 2);
    assert_eq!(store.info().max_rw_epochs, 2);

    server
        .edit(&EditReq {
            database: DB.to_string(),
            max_ro_epochs: 3,
            max_rw_epochs: 3,
        })
        .await
        .unwrap();

    assert_eq!(store.info().max_ro_epochs, 3);
    assert_eq!(store.info().max_rw_epochs, 3);
}

#[tokio::test]
async fn test_batch_of_two_infos() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;

    let res = server
        .batch(&ReqBatch {
            batch: vec![
                Request {
                    info_req: Some(InfoReq {}),
                    ..Default::default()
                },
                Request {
                    info_req: Some(InfoReq {}),
                    ..Default::default()
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(res.batch.len(), 2);
    for response in &res.batch {
        let info = response.info_res.as_ref().unwrap();
        assert_eq!(info.databases.len(), 1);
        assert!(response.open_res.is_none());
        assert!(response.put_res.is_none());
        assert!(response.get_res.is_none());
    }
}

#[tokio::test]
async fn test_batch_aborts_on_first_error() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    // put to a live database, put to a missing one, then another info:
    // the batch must fail at index 1 with the put's side effect applied
    let res = server
        .batch(&ReqBatch {
            batch: vec![
                Request {
                    put_req: Some(PutReq {
                        database: DB.to_string(),
                        fields: fields(&["kept"]),
                        timestamp: now,
                        value: 4.0,
                        count: 1,
                    }),
                    ..Default::default()
                },
                Request {
                    put_req: Some(PutReq {
                        database: "missing".to_string(),
                        fields: fields(&["kept"]),
                        timestamp: now,
                        value: 4.0,
                        count: 1,
                    }),
                    ..Default::default()
                },
                Request {
                    info_req: Some(InfoReq {}),
                    ..Default::default()
                },
            ],
        })
        .await;

    match res {
        Err(Error::BatchAborted { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, Error::DatabaseNotFound));
        }
        other => panic!("expected BatchAborted, got {other:?}"),
    }

    let get = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["kept"]),
            group_by: vec![true],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();
    assert_eq!(get.groups.len(), 1);
    assert_eq!(get.groups[0].points[0].value, 4.0);
}

#[tokio::test]
async fn test_resolution_must_divide() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["a"]),
            group_by: vec![true],
            start_time: now,
            end_time: now + 60,
            resolution: 45,
        })
        .await;
    assert!(matches!(res, Err(Error::Resolution)));
}

#[tokio::test]
async fn test_grouping_collapses_masked_positions() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    for (tuple, value) in [(fields(&["us", "web"]), 1.0), (fields(&["us", "db"]), 2.0)] {
        server
            .put(&PutReq {
                database: DB.to_string(),
                fields: tuple,
                timestamp: now,
                value,
                count: 1,
            })
            .await
            .unwrap();
    }

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["us", ""]),
            group_by: vec![true, false],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();

    assert_eq!(res.groups.len(), 1);
    assert_eq!(res.groups[0].fields, vec!["us".to_string(), String::new()]);
    assert_eq!(res.groups[0].points[0].value, 3.0);
    assert_eq!(res.groups[0].points[0].count, 2);
}

#[tokio::test]
async fn test_get_downsamples_to_coarser_resolution() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let tuple = fields(&["coarse"]);

    // five one-minute buckets inside one five-minute output bucket
    let now = now_aligned();
    let start = now - now % 300;
    for i in 0..5u32 {
        server
            .put(&PutReq {
                database: DB.to_string(),
                fields: tuple.clone(),
                timestamp: start + i * 60,
                value: 1.0,
                count: 1,
            })
            .await
            .unwrap();
    }

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: tuple.clone(),
            group_by: vec![true],
            start_time: start,
            end_time: start + 300,
            resolution: 300,
        })
        .await
        .unwrap();

    assert_eq!(res.groups.len(), 1);
    assert_eq!(res.groups[0].points.len(), 1);
    assert_eq!(res.groups[0].points[0].value, 5.0);
    assert_eq!(res.groups[0].points[0].count, 5);

    // the same window at storage resolution conserves the totals
    let raw = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: tuple,
            group_by: vec![true],
            start_time: start,
            end_time: start + 300,
            resolution: 0,
        })
        .await
        .unwrap();
    let sum: f64 = raw.groups[0].points.iter().map(|p| p.value).sum();
    let count: u32 = raw.groups[0].points.iter().map(|p| p.count).sum();
    assert_eq!(sum, 5.0);
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_get_on_empty_window_returns_no_groups() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: fields(&["nothing"]),
            group_by: vec![true],
            start_time: now,
            end_time: now + 600,
            resolution: 0,
        })
        .await
        .unwrap();
    assert!(res.groups.is_empty());
}

#[tokio::test]
async fn test_unknown_database_is_rejected() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();

    let res = server
        .put(&PutReq {
            database: "ghost".to_string(),
            fields: fields(&["a"]),
            timestamp: now,
            value: 1.0,
            count: 1,
        })
        .await;
    assert!(matches!(res, Err(Error::DatabaseNotFound)));
}

#[tokio::test]
async fn test_scan_restores_databases_for_info() {
    let dir = TempDir::new().unwrap();
    {
        let server = fresh_server(&dir).await;
        drop(server);
    }

    // a second server over the same directory sees the database again
    let registry = Registry::scan(dir.path(), false).await.unwrap();
    let server = Server::new(registry);
    let res = server.info(&InfoReq {}).await.unwrap();
    assert_eq!(res.databases.len(), 1);
    assert_eq!(res.databases[0].database, DB);
    assert_eq!(res.databases[0].resolution, 60);
}

#[tokio::test]
async fn test_zero_inc_leaves_bucket_unchanged() {
    let dir = TempDir::new().unwrap();
    let server = fresh_server(&dir).await;
    let now = now_aligned();
    let tuple = fields(&["idempotent"]);

    server
        .put(&PutReq {
            database: DB.to_string(),
            fields: tuple.clone(),
            timestamp: now,
            value: 2.5,
            count: 4,
        })
        .await
        .unwrap();

    server
        .inc(&IncReq {
            database: DB.to_string(),
            fields: tuple.clone(),
            timestamp: now,
            value: 0.0,
            count: 0,
        })
        .await
        .unwrap();

    let res = server
        .get(&GetReq {
            database: DB.to_string(),
            fields: tuple,
            group_by: vec![true],
            start_time: now,
            end_time: now + 60,
            resolution: 0,
        })
        .await
        .unwrap();
    assert_eq!(res.groups[0].points[0].value, 2.5);
    assert_eq!(res.groups[0].points[0].count, 4);
}
