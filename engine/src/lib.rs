//! # relaywatch-engine
//!
//! A headless watch-folder replication engine: detects newly-stabilized
//! video files dropped into one or more source folders, queues them, and
//! copies each to a destination folder with resumable, checkpointed
//! transfers. Designed as the foundation for a daemon binary and, later,
//! any UI that wants to observe the same queue.
//!
//! ## Overview
//!
//! - **job**: the `Job` record and its status machine.
//! - **error**: the per-component error taxonomy (`thiserror`-derived).
//! - **config**: on-disk configuration, defaults, and tunables.
//! - **queue**: the thread-safe FIFO job queue and its event bus.
//! - **state_store**: durable JSON snapshot for crash-safe resume.
//! - **history**: append-only audit log of terminal outcomes.
//! - **copy**: the chunked, resumable, checkpointed copy routine.
//! - **worker**: one thread's dequeue-copy-report loop.
//! - **pool**: a resizable set of worker threads.
//! - **detector**: watch-folder polling and stability detection.
//! - **progress**: the UI-decoupling progress callback trait.
//!
//! ## Basic usage
//!
//! ```no_run
//! use relaywatch_engine::{config::Config, queue::Queue, state_store::StateStore, history::HistorySink, pool::Pool};
//! use std::path::PathBuf;
//! use std::sync::{Arc, Mutex};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(&PathBuf::from("config.json"))?;
//! let queue = Queue::new();
//! let state_store = Arc::new(StateStore::new(PathBuf::from("pipeline_state.json")));
//! let history = Arc::new(HistorySink::new(PathBuf::from("copy_history.txt"))?);
//!
//! let max_download = config.max_download;
//! let pool = Pool::new(queue, state_store, history, Arc::new(Mutex::new(config)));
//! pool.start(max_download);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod copy;
pub mod detector;
pub mod error;
pub mod history;
pub mod job;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod state_store;
pub mod worker;

pub use config::Config;
pub use detector::{Detector, DetectorStats};
pub use error::{ConfigError, CopyError, HistoryError, StateStoreError, WorkerError};
pub use history::HistorySink;
pub use job::{Job, JobStatus};
pub use pool::Pool;
pub use progress::{NullProgressObserver, ProgressObserver};
pub use queue::{Queue, QueueEvent, QueueObserver, QueueStats};
pub use state_store::{StateDocument, StateStore};
