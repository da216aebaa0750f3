use std::time::{Duration, Instant};

use crate::config::Config;
use crate::model::PatientRecord;
use crate::pipeline::derive_table;
use crate::store::{Store, StoreError};

/// The joined, derived table as of one fetch.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub records: Vec<PatientRecord>,
    pub fetched_at: Instant,
}

/// One operator session: owns the store handle and a snapshot that is
/// refetched only once it is older than `ttl`.
pub struct Session {
    store: Option<Store>,
    ttl: Duration,
    snapshot: Option<Snapshot>,
    last_error: Option<String>,
}

impl Session {
    /// Connection failures are reported and leave the session without a
    /// store; every snapshot is then empty.
    pub fn open(config: &Config) -> Self {
        match Store::connect(&config.store) {
            Ok(store) => Self::with_store(store, config.dashboard.cache_ttl()),
            Err(err) => {
                tracing::error!("Cannot connect to the store: {err}");
                Self {
                    store: None,
                    ttl: config.dashboard.cache_ttl(),
                    snapshot: None,
                    last_error: Some(err.to_string()),
                }
            }
        }
    }

    pub fn with_store(store: Store, ttl: Duration) -> Self {
        Self {
            store: Some(store),
            ttl,
            snapshot: None,
            last_error: None,
        }
    }

    #[cfg(test)]
    pub fn store_mut(&mut self) -> Option<&mut Store> {
        self.store.as_mut()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn is_stale(&self, now: Instant) -> bool {
        match &self.snapshot {
            Some(snapshot) => now.saturating_duration_since(snapshot.fetched_at) >= self.ttl,
            None => true,
        }
    }

    fn fetch(&self) -> Result<Vec<PatientRecord>, StoreError> {
        match &self.store {
            Some(store) => {
                let (rows, caps) = store.fetch_joined()?;
                Ok(derive_table(rows, &caps))
            }
            None => Ok(Vec::new()),
        }
    }

    /// The working table as seen at `now`.
    pub fn snapshot_at(&mut self, now: Instant) -> &Snapshot {
        if self.is_stale(now) {
            let records = match self.fetch() {
                Ok(records) => records,
                Err(err) => {
                    tracing::error!("Query against the store failed: {err}");
                    self.last_error = Some(err.to_string());
                    Vec::new()
                }
            };
            tracing::info!(rows = records.len(), "Refreshed patient snapshot");
            self.snapshot = Some(Snapshot { records, fetched_at: now });
        }

        self.snapshot.get_or_insert_with(|| Snapshot { records: Vec::new(), fetched_at: now })
    }

    pub fn snapshot(&mut self) -> &Snapshot {
        self.snapshot_at(Instant::now())
    }

    /// Releases the store handle.
    pub fn close(self) -> Result<(), StoreError> {
        match self.store {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::tests::{seeded_store, table};

    #[test]
    fn snapshot_is_reused_until_stale() {
        let mut session = Session::with_store(seeded_store(), Duration::from_secs(600));
        let start = Instant::now();
        assert_eq!(session.snapshot_at(start).records.len(), 4);

        let extra = table(&["CEDULA", "ESTADO"], &[&["D", "PENDIENTE"]]);
        session.store_mut().unwrap().bulk_insert("Pacientes_tmz", &extra).unwrap();

        assert_eq!(session.snapshot_at(start + Duration::from_secs(599)).records.len(), 4);
        assert_eq!(session.snapshot_at(start + Duration::from_secs(600)).records.len(), 5);
    }

    #[test]
    fn unreachable_store_degrades_to_empty() {
        let mut config = Config::default();
        config.store = StoreConfig {
            driver: Some("sqlite".into()),
            server: Some("/nonexistent/dir/for/tmz".into()),
            database: Some("tracking".into()),
            username: Some("u".into()),
            password: Some("p".into()),
            ..StoreConfig::default()
        };
        let mut session = Session::open(&config);
        assert!(session.last_error().is_some());
        assert!(session.snapshot().records.is_empty());
    }

    #[test]
    fn missing_configuration_degrades_to_empty() {
        let mut session = Session::open(&Config::default());
        assert!(session.last_error().unwrap().contains("driver"));
        assert!(session.snapshot().records.is_empty());
        assert!(session.close().is_ok());
    }
}
