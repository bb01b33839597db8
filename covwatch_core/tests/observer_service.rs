use covwatch_core::service::{CREATE_FUZZER_PATH, UPDATE_FEATURES_PATH};
use covwatch_core::{
    BitCounter, CoverageProgress, CovwatchConfig, CreateFuzzerRequest, ObserverServer,
    ProgressObserver, RpcStatus, ServiceSettings, StructureGraph, UpdateFeaturesRequest,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Default)]
struct RecordingObserver {
    progress: Mutex<Vec<CoverageProgress>>,
}

impl ProgressObserver for RecordingObserver {
    fn name(&self) -> &'static str {
        "RecordingObserver"
    }

    fn on_progress(&self, progress: &CoverageProgress) -> Result<(), anyhow::Error> {
        self.progress.lock().unwrap().push(*progress);
        Ok(())
    }
}

fn hits(indices: &[i128]) -> UpdateFeaturesRequest {
    UpdateFeaturesRequest {
        fuzzer_id: 0,
        bit_counters: indices
            .iter()
            .map(|&node_index| BitCounter {
                node_index,
                counter: 1,
            })
            .collect(),
        corpus_id: Some(17),
    }
}

#[tokio::test]
async fn fuzzer_session_over_the_wire() {
    let config = CovwatchConfig {
        service: ServiceSettings {
            listen_addr: "127.0.0.1:0".to_string(),
            ..ServiceSettings::default()
        },
        proxy: None,
    };
    let observer = Arc::new(RecordingObserver::default());
    let server = ObserverServer::bind(&config, observer.clone()).await.unwrap();
    let base = server.observer_url();
    let service = server.service();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = rx.await;
    }));

    let client = reqwest::Client::new();
    let post = |path: &str, body: serde_json::Value| {
        client.post(format!("{base}{path}")).json(&body).send()
    };

    let early = post(
        UPDATE_FEATURES_PATH,
        serde_json::to_value(hits(&[0])).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(early.status(), reqwest::StatusCode::PRECONDITION_FAILED);

    let create = CreateFuzzerRequest {
        fuzzer_id: 0,
        structure_graph: Some(StructureGraph::with_nodes(5)),
    };
    let res = post(CREATE_FUZZER_PATH, serde_json::to_value(&create).unwrap())
        .await
        .unwrap();
    assert!(res.status().is_success());

    let ignored = CreateFuzzerRequest {
        fuzzer_id: 1,
        structure_graph: Some(StructureGraph::with_nodes(50)),
    };
    let res = post(CREATE_FUZZER_PATH, serde_json::to_value(&ignored).unwrap())
        .await
        .unwrap();
    assert!(res.status().is_success());

    let res = post(
        CREATE_FUZZER_PATH,
        serde_json::json!({"fuzzer_id": -1, "structure_graph": {"nodes": [{}]}}),
    )
    .await
    .unwrap();
    assert!(res.status().is_success());
    assert_eq!(service.with_tracker(|t| t.total_nodes()), 5);

    for batch in [&[0, 2, 2, 4][..], &[0, 2][..], &[1, 3][..]] {
        let res = post(UPDATE_FEATURES_PATH, serde_json::to_value(hits(batch)).unwrap())
            .await
            .unwrap();
        assert!(res.status().is_success());
    }

    let res = post(UPDATE_FEATURES_PATH, serde_json::to_value(hits(&[5])).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
    let status: RpcStatus = res.json().await.unwrap();
    assert_eq!(status.code, "OUT_OF_RANGE");

    let res = post(
        UPDATE_FEATURES_PATH,
        serde_json::json!({"bit_counters": [{"node_index": "first"}]}),
    )
    .await
    .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
    let status: RpcStatus = res.json().await.unwrap();
    assert_eq!(status.code, "INVALID_ARGUMENT");

    assert_eq!(service.with_tracker(|t| t.covered()), 5);
    assert_eq!(service.with_tracker(|t| t.total_nodes()), 5);
    assert_eq!(
        *observer.progress.lock().unwrap(),
        vec![
            CoverageProgress {
                covered: 3,
                total: 5
            },
            CoverageProgress {
                covered: 5,
                total: 5
            },
        ]
    );

    drop(client);
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Server should shut down")
        .unwrap()
        .unwrap();
}
