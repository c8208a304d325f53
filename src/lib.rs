//! QSO logging with background forwarding to online logbook services.
//!
//! Saved contacts queue one upload record per registered service. The
//! [`forward::engine::Forwarding`] engine polls those records, delivers them
//! with a bounded pool of network workers, and funnels every resulting
//! storage write through a single DB writer task.
//!
//! # Examples
//!
//! Computing the status write for a failed attempt:
//! ```
//! use qsoforward::{
//!     forward::provider::ForwardError,
//!     qso::QsoRecord,
//!     types::{Band, Mode, UploadAction, UploadStatus},
//!     upload::{resolve_outcome, QsoUpload},
//! };
//!
//! let upload = QsoUpload {
//!     id: 7,
//!     qso_id: 1,
//!     service: "qrz".to_string(),
//!     action: UploadAction::Insert,
//!     status: UploadStatus::Pending,
//!     attempts: 2,
//!     last_error: String::new(),
//!     qso: QsoRecord {
//!         id: 1,
//!         logbook_id: 1,
//!         station_callsign: "M0ABC".to_string(),
//!         call: "K1ABC".to_string(),
//!         band: Band::B20m,
//!         mode: Mode::CW,
//!         freq_hz: 14_025_000,
//!         ts_ms: 1,
//!         rst_sent: "599".to_string(),
//!         rst_rcvd: "579".to_string(),
//!         tx_power_w: None,
//!         comment: String::new(),
//!     },
//! };
//! let failed: Result<(), ForwardError> = Err(ForwardError::Transport("timeout".to_string()));
//! let update = resolve_outcome(&upload, &failed);
//! assert_eq!(update.status, UploadStatus::Failed);
//! assert_eq!(update.attempts, 3);
//! ```
//!
//! Running the full service over SQLite:
//! ```no_run
//! use qsoforward::{
//!     config::ForwardingConfig,
//!     forward::provider::ProviderRegistry,
//!     runtime::service::ForwardingService,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let providers = ProviderRegistry::new(); // register one ProviderDescriptor per service
//! let service = ForwardingService::open("log.db", providers, ForwardingConfig::default())
//!     .expect("open service");
//! service.start(CancellationToken::new()).expect("start");
//! // ... log_qso / update_qso ...
//! service.stop().await.expect("stop");
//! # }
//! ```
#![deny(missing_docs)]

/// Engine configuration.
pub mod config;
/// Forwarding engine: poller, worker pool, DB writer, lifecycle.
pub mod forward;
/// Storage gateway abstraction and SQLite implementation.
pub mod persist;
/// QSO domain records and patches.
pub mod qso;
/// Owning service that wires storage, providers and the engine.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
/// Upload records and outcome resolution.
pub mod upload;
