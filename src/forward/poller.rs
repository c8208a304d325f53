use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::upload::QsoUpload;

use super::{
    engine::{PendingUploads, Signals},
    inflight::{Claim, InFlight},
    stats::EngineStats,
};

/// Forwarding queue item: an upload plus its in-flight claim.
pub(crate) struct Admitted {
    pub(crate) upload: QsoUpload,
    pub(crate) claim: Claim,
}

pub(crate) async fn poller_loop(
    source: Arc<dyn PendingUploads>,
    tx: mpsc::Sender<Admitted>,
    in_flight: InFlight,
    interval: Duration,
    signals: Signals,
    stats: Arc<EngineStats>,
) {
    info!(interval_ms = interval.as_millis() as u64, "starting forwarding poller");

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = signals.fired() => return,
            _ = ticker.tick() => {}
        }

        if signals.is_stopping() {
            return;
        }

        let uploads = match source.fetch_pending().await {
            Ok(uploads) => uploads,
            Err(err) => {
                error!(error = %err, "failed to fetch pending uploads");
                continue;
            }
        };
        if uploads.is_empty() {
            continue;
        }
        debug!(count = uploads.len(), "fetched pending uploads");
        EngineStats::add(&stats.fetched, uploads.len() as u64);

        if !admit_batch(uploads, &tx, &in_flight, &signals, &stats) {
            return;
        }
    }
}

/// Offers each upload to the forwarding queue without blocking.
///
/// Returns false once the loop should exit.
fn admit_batch(
    uploads: Vec<QsoUpload>,
    tx: &mpsc::Sender<Admitted>,
    in_flight: &InFlight,
    signals: &Signals,
    stats: &EngineStats,
) -> bool {
    for upload in uploads {
        if signals.any_fired() {
            return false;
        }

        let Some(claim) = in_flight.try_claim(upload.id) else {
            debug!(upload_id = upload.id, "upload still in flight, skipping");
            EngineStats::bump(&stats.skipped_in_flight);
            continue;
        };

        match tx.try_send(Admitted { upload, claim }) {
            Ok(()) => EngineStats::bump(&stats.enqueued),
            Err(TrySendError::Full(admitted)) => {
                warn!(
                    upload_id = admitted.upload.id,
                    qso_id = admitted.upload.qso_id,
                    service = %admitted.upload.service,
                    "forwarding queue full, dropping upload"
                );
                EngineStats::bump(&stats.dropped);
            }
            Err(TrySendError::Closed(_)) => return false,
        }
    }
    true
}
