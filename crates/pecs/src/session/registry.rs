use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::net::IngestStats;
use crate::sink::SinkError;

use super::mote::{Session, SessionConfig, SessionView, Sinks};

type Slot = Arc<OnceCell<Arc<Session>>>;

/// Serial-keyed session table. Concurrent first datagrams from one mote share
/// a single creation; a failed creation leaves the slot empty for the next try.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u16, Slot>>,
    config: Arc<SessionConfig>,
    sinks: Sinks,
    stats: Arc<IngestStats>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        sinks: Sinks,
        stats: Arc<IngestStats>,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config: Arc::new(config),
            sinks,
            stats,
            tracker,
            cancel,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn slot(&self, serial: u16) -> Slot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(serial).or_default())
    }

    /// Returns the session for `serial` and whether this call created it.
    pub async fn get_or_create(&self, serial: u16) -> Result<(Arc<Session>, bool), SinkError> {
        let slot = self.slot(serial);
        let created = AtomicBool::new(false);

        let session = {
            let created = &created;
            slot.get_or_try_init(|| async move {
                let session = Arc::new(
                    Session::create(
                        serial,
                        Arc::clone(&self.config),
                        self.sinks.clone(),
                        Arc::clone(&self.stats),
                    )
                    .await?,
                );
                session.spawn_metrics(&self.tracker, self.cancel.child_token());
                created.store(true, Ordering::Relaxed);
                log::info!("New session for mote {:04x}", serial);
                Ok::<_, SinkError>(session)
            })
            .await?
        };

        Ok((Arc::clone(session), created.load(Ordering::Relaxed)))
    }

    pub fn get(&self, serial: u16) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&serial).and_then(|slot| slot.get().cloned())
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<_> = sessions.values().filter_map(|slot| slot.get().cloned()).collect();
        live.sort_by_key(|session| session.serial());
        live
    }

    pub fn views(&self) -> Vec<SessionView> {
        self.sessions().iter().map(|session| session.view()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
