//! Two queues in one process: when a PDF job completes, the crawler queue
//! enqueues a follow-up job correlated with the completion event.
//!
//! Run with `cargo run --example pipeline`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use queuebus::adapter::{QueueAdapter, QueueAddress, QueueBinding, QueueJob};
use queuebus::broker::{LogObserver, MessageBroker};
use queuebus::config::{AdapterSettings, BrokerSettings};
use queuebus::envelope::EventType;
use queuebus::transport::{Credentials, MemoryHub, MemoryTransport};
use queuebus::utils::logging;

struct Job {
    id: String,
    correlation: Option<String>,
}

impl QueueJob for Job {
    fn job_id(&self) -> String {
        self.id.clone()
    }

    fn correlation_id(&self) -> Option<String> {
        self.correlation.clone()
    }
}

async fn broker(hub: &MemoryHub, name: &str) -> Result<MessageBroker, Box<dyn std::error::Error>> {
    let broker = MessageBroker::new(Arc::new(MemoryTransport::new(hub)), BrokerSettings::default());
    broker.start(&Credentials::new(name)).await?;
    Ok(broker)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("info");

    let hub = MemoryHub::new();
    let settings = AdapterSettings::default();

    let pdf_broker = broker(&hub, "pdf-worker").await?;
    let crawler_broker = broker(&hub, "crawler-worker").await?;
    crawler_broker
        .monitor()
        .watch("queue:pdf", Arc::new(LogObserver))?;

    let pdf = QueueAdapter::new(
        QueueBinding::builder("pdf-processing", "queue:pdf").build(),
        pdf_broker.clone(),
        &settings,
    );
    let crawler = QueueAdapter::<Job>::new(
        QueueBinding::builder("crawler", "queue:crawler").build(),
        crawler_broker.clone(),
        &settings,
    );

    // the crawler's local queue
    let (enqueue, mut crawl_jobs) = mpsc::unbounded_channel::<Job>();
    crawler.register_coordination_handler(
        &QueueAddress::new("pdf-processing", "queue:pdf"),
        EventType::JobCompleted,
        move |envelope| {
            let enqueue = enqueue.clone();
            async move {
                let _ = enqueue.send(Job {
                    id: format!("crawl-{}", envelope.job_id),
                    correlation: Some(envelope.id.clone()),
                });
                Ok(())
            }
        },
    )?;

    let job = Job {
        id: "pdf-42".to_string(),
        correlation: None,
    };
    pdf.on_job_created(&job).await;
    pdf.on_job_progress(&job, 50, "page 6 of 12").await;
    let outcome = pdf.on_job_completed(&job, &json!({ "pages": 12 })).wait().await;
    info!("pdf-42 completion: {outcome:?}");

    if let Ok(Some(crawl)) = tokio::time::timeout(Duration::from_secs(1), crawl_jobs.recv()).await {
        crawler.on_job_created(&crawl).await;
        info!(
            "crawler enqueued {} (correlated with {})",
            crawl.id,
            crawl.correlation.as_deref().unwrap_or("-")
        );
    }

    crawler.close();
    pdf_broker.shutdown().await;
    crawler_broker.shutdown().await;
    Ok(())
}
