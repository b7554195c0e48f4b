//! Benchmarks for request assembly and the async inference path.

use std::sync::mpsc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use tensor_serve::backend::normalize_request_header;
use tensor_serve::model::config::ModelConfig;
use tensor_serve::protocol::{InferRequestHeader, WireMessage};
use tensor_serve::{InferenceRequest, InferenceServer, ServerOptions};

fn add_sub_config() -> serde_json::Value {
    let tensor = |name: &str| json!({"name": name, "data_type": "INT32", "dims": [16]});
    json!({
        "name": "simple",
        "platform": "add_sub",
        "input": [tensor("INPUT0"), tensor("INPUT1")],
        "output": [tensor("OUTPUT0"), tensor("OUTPUT1")],
    })
}

fn bench_header_normalize(c: &mut Criterion) {
    let config: ModelConfig = serde_json::from_value(add_sub_config()).unwrap();
    let bytes = InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0", "OUTPUT1"])
        .to_bytes()
        .unwrap();

    c.bench_function("parse_and_normalize_header", |b| {
        b.iter(|| {
            let mut header = InferRequestHeader::from_bytes(black_box(&bytes)).unwrap();
            normalize_request_header(&config, &mut header).unwrap();
            black_box(header);
        })
    });
}

fn bench_infer_round_trip(c: &mut Criterion) {
    let repo = tempfile::tempdir().unwrap();
    let model = repo.path().join("simple");
    std::fs::create_dir_all(model.join("1")).unwrap();
    std::fs::write(model.join("config.json"), add_sub_config().to_string()).unwrap();

    let server = InferenceServer::new(ServerOptions {
        model_repository_path: repo.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();

    let header = InferRequestHeader::new(1, ["INPUT0", "INPUT1"], ["OUTPUT0", "OUTPUT1"]);
    let input: Vec<u8> = (0..16i32).flat_map(|v| v.to_ne_bytes()).collect();

    c.bench_function("add_sub_16_int32_round_trip", |b| {
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            let request = InferenceRequest::new("simple", -1, &header)
                .with_input("INPUT0", &input)
                .with_input("INPUT1", &input);
            server
                .infer_async(request, move |response| {
                    let _ = tx.send(response);
                })
                .unwrap();
            let response = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            black_box(response.output_data("OUTPUT0").map(<[u8]>::len).unwrap());
        })
    });

    drop(server);
}

criterion_group!(benches, bench_header_normalize, bench_infer_round_trip);
criterion_main!(benches);
