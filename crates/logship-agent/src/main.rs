#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::{env, sync::Arc};

use prometheus::{Registry, TextEncoder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logship_pipeline::config::Config;
use logship_pipeline::grouping::Chunk;
use logship_pipeline::metrics::PipelineMetrics;
use logship_pipeline::pipeline::ChunkProcessor;
use logship_pipeline::uploader::UploadClient;

const DEFAULT_WORKERS: usize = 4;
const CHUNK_QUEUE_DEPTH: usize = 64;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };

    let registry = Registry::new();
    let metrics = match PipelineMetrics::new(&registry) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Unable to register pipeline metrics: {e}");
            return;
        }
    };
    let client = match UploadClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to build the upload client: {e}");
            return;
        }
    };
    let processor = ChunkProcessor::new(config, metrics, client);

    let workers = env::var("LOGSHIP_WORKERS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_WORKERS);
    info!("Starting logship agent with {workers} workers");

    let (tx, rx) = mpsc::channel::<Chunk>(CHUNK_QUEUE_DEPTH);
    let rx = Arc::new(TokioMutex::new(rx));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let rx = Arc::clone(&rx);
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let chunk = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(chunk) = chunk else {
                    debug!("Worker {worker} shutting down");
                    break;
                };
                if let Err(e) = processor.process_chunk(chunk).await {
                    // Stdin delivery has no re-delivery mechanism; record the
                    // loss and move on.
                    warn!("Chunk lost after retryable upload failure: {e}");
                }
            }
        }));
    }

    // One chunk per stdin line: a JSON array of [timestamp, record] pairs.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Chunk>(&line) {
                    Ok(chunk) => {
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("Skipping malformed chunk: {e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        }
    }
    drop(tx);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {e}");
        }
    }

    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(report) => info!("Final metrics:\n{report}"),
        Err(e) => error!("Unable to encode final metrics: {e}"),
    }
}
