//! Ingestion and progress-tracking worker.
//!
//! This crate provides:
//! - Upload ingestion (metadata resolution, seeding, work-item publish)
//! - Progress merging with terminal notifications
//! - Port traits with Firestore, S3 and Redis adapters
//! - A stream executor with retry, dead-lettering and graceful shutdown

pub mod adapters;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingestion;
pub mod metrics;
pub mod notifier;
pub mod ports;
pub mod progress;
pub mod resolver;
pub mod resources;

pub use adapters::{FirestoreEntityStore, RedisPublisher, S3MetadataSource};
pub use config::WorkerConfig;
pub use error::{PublishError, ResolutionError, StoreError, WorkerError, WorkerResult};
pub use executor::{EntryDisposition, StreamExecutor};
pub use ingestion::{IngestFailure, IngestReport, IngestionCoordinator, UnitOutcome};
pub use notifier::NotificationEmitter;
pub use ports::{EntityStore, NotificationPublisher, ObjectMetadataSource, WorkItemPublisher};
pub use progress::{ProgressFailure, ProgressOutcome, ProgressReport, ProgressUpdateProcessor, SkipReason};
pub use resolver::{MetadataResolver, ResolvedMetadata};
pub use resources::LazyResource;
