//! In-Memory Training Example
//!
//! Trains a tiny logistic-regression "accident predictor" on synthetic
//! records, end to end: partitioning, preprocessing, the train/validate/test
//! loop, and experiment persistence with per-epoch checkpoints.
//!
//! Run with: cargo run --example train_in_memory
//! Verbose:  RUST_LOG=trueno_train=debug cargo run --example train_in_memory

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use trueno_train::backend::{MetricValues, ModelBackend, ModelSnapshot};
use trueno_train::config::PipelineConfig;
use trueno_train::data::{
    Batch, DataReader, DatasetPartitioner, MemoryDataStore, Phase, ProcessorChain, SampleState,
};
use trueno_train::experiment::{
    BlobStore, ExperimentRecorder, ExperimentStore, MemoryBlobStore, MemoryExperimentStore,
};
use trueno_train::logging::LogContext;
use trueno_train::trainer::Trainer;
use trueno_train::Error;

type State = SampleState<Value, [f64; 2], f64>;

const CONFIG: &str = r#"{
    "partition": { "split": [70, 15, 15], "batch_size": 32, "seed": 42,
                   "sample_failure": "skip_and_log" },
    "trainer":   { "epochs": 4, "max_progress_logs": 2 },
    "recorder":  { "name": "accident-predictor" }
}"#;

/// Logistic regression on `[speed, wet_road]`.
struct Logistic {
    weights: [f64; 2],
    bias: f64,
    learning_rate: f64,
}

impl Logistic {
    fn predict(&self, x: &[f64; 2]) -> f64 {
        let z = self.weights[0].mul_add(x[0], self.weights[1] * x[1]) + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    #[allow(clippy::cast_precision_loss)]
    fn metrics(&self, batch: &Batch<[f64; 2], f64>) -> trueno_train::Result<MetricValues> {
        let n = batch.len() as f64;
        let (mut loss, mut correct) = (0.0, 0.0);
        for (x, &y) in batch.inputs.iter().zip(&batch.labels) {
            let p = self.predict(x).clamp(1e-7, 1.0 - 1e-7);
            loss -= y.mul_add(p.ln(), (1.0 - y) * (1.0 - p).ln());
            if (p >= 0.5) == (y >= 0.5) {
                correct += 1.0;
            }
        }
        MetricValues::from_aligned(&self.metric_names(), &[loss / n, correct / n])
    }
}

impl ModelSnapshot for Logistic {
    fn serialize(&self) -> trueno_train::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&json!({"weights": self.weights, "bias": self.bias}))?)
    }
}

impl ModelBackend for Logistic {
    type Input = [f64; 2];
    type Label = f64;

    #[allow(clippy::cast_precision_loss)]
    fn train_step(&mut self, batch: &Batch<[f64; 2], f64>) -> trueno_train::Result<MetricValues> {
        let n = batch.len() as f64;
        let mut grad = [0.0; 3];
        for (x, &y) in batch.inputs.iter().zip(&batch.labels) {
            let err = self.predict(x) - y;
            grad[0] += err * x[0];
            grad[1] += err * x[1];
            grad[2] += err;
        }
        self.weights[0] -= self.learning_rate * grad[0] / n;
        self.weights[1] -= self.learning_rate * grad[1] / n;
        self.bias -= self.learning_rate * grad[2] / n;
        self.metrics(batch)
    }

    fn evaluate_step(&mut self, batch: &Batch<[f64; 2], f64>) -> trueno_train::Result<MetricValues> {
        self.metrics(batch)
    }

    fn metric_names(&self) -> Vec<String> {
        vec!["loss".into(), "accuracy".into()]
    }

    fn architecture(&self) -> Value {
        json!({"kind": "logistic_regression", "inputs": ["speed", "wet_road"]})
    }
}

/// Synthetic accident records: fast driving on wet roads is risky.
fn synthetic_records(n: u64) -> impl Iterator<Item = (u64, Value)> {
    (0..n).map(|i| {
        let speed = 30 + (i * 37) % 90;
        let wet = i % 3 == 0;
        let accident = speed > 90 || (wet && speed > 70);
        (
            i,
            json!({"sensor": {"speed_kmh": speed}, "road": {"wet": wet}, "accident": accident}),
        )
    })
}

fn features(mut state: State) -> trueno_train::Result<State> {
    let speed = state.raw["sensor"]["speed_kmh"]
        .as_f64()
        .ok_or_else(|| Error::Other("missing speed".into()))?;
    let wet = state.raw["road"]["wet"].as_bool().unwrap_or(false);
    state.input = Some([speed / 120.0, if wet { 1.0 } else { 0.0 }]);
    Ok(state)
}

fn label(mut state: State) -> trueno_train::Result<State> {
    let accident = state.raw["accident"]
        .as_bool()
        .ok_or_else(|| Error::Other("missing label".into()))?;
    state.label = Some(if accident { 1.0 } else { 0.0 });
    Ok(state)
}

fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_json_str(CONFIG).context("invalid pipeline config")?;
    let log = LogContext::new(config.recorder.name.clone());
    log.init_subscriber()?;

    println!("=== Trueno-Train In-Memory Training ===\n");

    // -------------------------------------------------------------------------
    // 1. Data: store -> partitioner -> processor chain
    // -------------------------------------------------------------------------
    let store = MemoryDataStore::from_records(synthetic_records(1_000));
    let partitioner = DatasetPartitioner::new(store, config.partition.clone())?;
    for phase in Phase::ALL {
        println!("   {phase:<10} {} records", partitioner.partition(phase).len());
    }
    let chain = ProcessorChain::new().with_stage(features).with_stage(label);
    let reader = DataReader::new(partitioner, chain);

    // -------------------------------------------------------------------------
    // 2. Persistence: experiment record + checkpoint blobs
    // -------------------------------------------------------------------------
    let experiments = Arc::new(MemoryExperimentStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let model = Logistic {
        weights: [0.0; 2],
        bias: 0.0,
        learning_rate: 0.5,
    };
    let recorder = ExperimentRecorder::new(
        Arc::clone(&experiments),
        Arc::clone(&blobs),
        model.architecture(),
        &config.recorder,
        &log,
    )?;
    let experiment_id = recorder.experiment_id().to_string();
    println!("\n   Experiment: {experiment_id}");

    // -------------------------------------------------------------------------
    // 3. Train, validate each epoch, then test
    // -------------------------------------------------------------------------
    let mut trainer = Trainer::new(model, reader, config.trainer)
        .with_log_context(&log)
        .with_callback(recorder);
    trainer.train()?;
    if let Some(metrics) = trainer.test()? {
        for metric in &metrics {
            println!("   test {:<10} {:.4}", metric.name, metric.value);
        }
    }

    // -------------------------------------------------------------------------
    // 4. Reload what was persisted
    // -------------------------------------------------------------------------
    let record = experiments
        .load(&experiment_id)?
        .context("experiment record missing")?;
    println!("\n   Status:      {}", record.status());
    println!("   Checkpoints: {}", record.checkpoints().len());
    println!(
        "   Val loss:    {:?}",
        record.metrics().series(Phase::Validation, "loss")
    );
    if let Some(last) = record.checkpoints().last() {
        let bytes = blobs.get(last.blob_ref())?.context("checkpoint blob missing")?;
        println!(
            "   Last checkpoint (epoch {}): {}",
            last.epoch(),
            String::from_utf8_lossy(&bytes)
        );
    }

    Ok(())
}
