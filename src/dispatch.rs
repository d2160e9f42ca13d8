use crate::actuator::Actuator;
use crate::db::{EventLog, PlateRegistry};
use crate::error::{Error, Result};
use crate::types::{AccessDecision, NormalizedPlate, RecognitionResult};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Turns a recognition result into an access decision and drives the
/// barrier, ticket printer, registry and event log accordingly.
pub struct Dispatcher {
    registry: Arc<dyn PlateRegistry>,
    events: Arc<dyn EventLog>,
    actuator: Arc<dyn Actuator>,
    registration_base: Url,
    dwell: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn PlateRegistry>,
        events: Arc<dyn EventLog>,
        actuator: Arc<dyn Actuator>,
        registration_base: &str,
        dwell: Duration,
    ) -> Result<Self> {
        let registration_base = Url::parse(registration_base).map_err(|e| {
            Error::Config(format!("invalid registration URL {}: {}", registration_base, e))
        })?;
        Ok(Dispatcher {
            registry,
            events,
            actuator,
            registration_base,
            dwell,
        })
    }

    /// Only a registry failure is an error, and it leaves the registry as
    /// it was. Actuator and event-log failures are logged and skipped.
    pub async fn decide_and_act(&self, result: &RecognitionResult) -> Result<AccessDecision> {
        let plate = match result {
            RecognitionResult::Recognized(plate) => plate,
            RecognitionResult::NotRecognized => {
                info!("Access denied: no readable plate");
                return Ok(AccessDecision::Deny);
            }
        };

        let decision = if self.registry.exists(plate)? {
            info!("Plate {} is known, opening barrier", plate);
            self.cycle_barrier().await;
            AccessDecision::Allow
        } else {
            info!("Plate {} is new, printing registration ticket", plate);
            self.print_ticket(plate).await;
            match self.registry.insert(plate) {
                Ok(()) => AccessDecision::Register,
                Err(Error::DuplicateKey { .. }) => {
                    info!("Plate {} was registered concurrently, allowing", plate);
                    self.cycle_barrier().await;
                    AccessDecision::Allow
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = self.events.record(plate) {
            warn!("Unable to record access event for {}: {}", plate, e);
        }
        Ok(decision)
    }

    pub fn registration_link(&self, plate: &NormalizedPlate) -> String {
        let mut url = self.registration_base.clone();
        url.query_pairs_mut().append_pair("placa", plate.as_str());
        url.to_string()
    }

    // Close is best-effort: nothing confirms the barrier actually closed.
    async fn cycle_barrier(&self) {
        if let Err(e) = self.actuator.open_barrier().await {
            error!("Error opening barrier: {}", e);
        }
        tokio::time::sleep(self.dwell).await;
        if let Err(e) = self.actuator.close_barrier().await {
            error!("Error closing barrier: {}", e);
        }
    }

    async fn print_ticket(&self, plate: &NormalizedPlate) {
        let link = self.registration_link(plate);
        if let Err(e) = self.actuator.print_ticket(plate, &link).await {
            error!("Error printing ticket for {}: {}", plate, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Log = Arc<Mutex<Vec<(String, Instant)>>>;

    fn push(log: &Log, what: &str) {
        log.lock().unwrap().push((what.to_string(), Instant::now()));
    }

    fn names(log: &Log) -> Vec<String> {
        log.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    struct FakeActuator {
        log: Log,
        reachable: bool,
    }

    impl FakeActuator {
        fn call(&self, what: &str) -> Result<()> {
            push(&self.log, what);
            if self.reachable {
                Ok(())
            } else {
                Err(Error::ActuatorUnreachable {
                    endpoint: what.to_string(),
                    reason: "connection refused".into(),
                })
            }
        }
    }

    #[async_trait]
    impl Actuator for FakeActuator {
        async fn open_barrier(&self) -> Result<()> {
            self.call("open")
        }
        async fn close_barrier(&self) -> Result<()> {
            self.call("close")
        }
        async fn print_ticket(&self, plate: &NormalizedPlate, url: &str) -> Result<()> {
            self.call(&format!("print {} {}", plate, url))
        }
    }

    /// Simulates another lane registering the plate between exists and insert.
    struct RacingRegistry {
        log: Log,
        seen: Mutex<HashSet<String>>,
    }

    impl PlateRegistry for RacingRegistry {
        fn exists(&self, _: &NormalizedPlate) -> Result<bool> {
            Ok(false)
        }
        fn insert(&self, plate: &NormalizedPlate) -> Result<()> {
            push(&self.log, "insert");
            self.seen.lock().unwrap().insert(plate.to_string());
            Err(Error::DuplicateKey {
                plate: plate.to_string(),
            })
        }
    }

    /// Records inserts into the call log before delegating to SQLite.
    struct LoggedRegistry {
        log: Log,
        db: Database,
    }

    impl PlateRegistry for LoggedRegistry {
        fn exists(&self, plate: &NormalizedPlate) -> Result<bool> {
            self.db.exists(plate)
        }
        fn insert(&self, plate: &NormalizedPlate) -> Result<()> {
            push(&self.log, "insert");
            self.db.insert(plate)
        }
    }

    struct BrokenEvents;

    impl EventLog for BrokenEvents {
        fn record(&self, _: &NormalizedPlate) -> Result<()> {
            Err(Error::Database(rusqlite::Error::InvalidQuery))
        }
    }

    fn setup(reachable: bool) -> (Dispatcher, Arc<Database>, Log) {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let db = Arc::new(Database::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(
            db.clone(),
            db.clone(),
            Arc::new(FakeActuator {
                log: log.clone(),
                reachable,
            }),
            "https://example.com/registrar",
            Duration::from_secs(2),
        )
        .unwrap();
        (dispatcher, db, log)
    }

    fn plate(s: &str) -> RecognitionResult {
        RecognitionResult::Recognized(NormalizedPlate::new(s))
    }

    #[tokio::test]
    async fn not_recognized_is_denied_without_calls() {
        let (d, _, log) = setup(true);
        let result = d.decide_and_act(&RecognitionResult::NotRecognized).await;
        assert_eq!(result.unwrap(), AccessDecision::Deny);
        assert!(names(&log).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_plate_prints_then_registers() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let registry = Arc::new(LoggedRegistry {
            log: log.clone(),
            db: Database::open_in_memory().unwrap(),
        });
        let d = Dispatcher::new(
            registry.clone(),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeActuator {
                log: log.clone(),
                reachable: true,
            }),
            "https://example.com/registrar",
            Duration::from_secs(2),
        )
        .unwrap();
        let decision = d.decide_and_act(&plate("new 123")).await.unwrap();
        assert_eq!(decision, AccessDecision::Register);
        assert_eq!(
            names(&log),
            vec![
                "print NEW123 https://example.com/registrar?placa=NEW123".to_string(),
                "insert".to_string(),
            ]
        );
        assert!(registry.db.exists(&NormalizedPlate::new("NEW123")).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn known_plate_opens_waits_and_closes() {
        let (d, db, log) = setup(true);
        db.insert(&NormalizedPlate::new("OLD456")).unwrap();
        let decision = d.decide_and_act(&plate("OLD456")).await.unwrap();
        assert_eq!(decision, AccessDecision::Allow);
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].0.as_str(), calls[1].0.as_str()), ("open", "close"));
        assert!(calls[1].1 - calls[0].1 >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_printer_still_registers() {
        let (d, db, log) = setup(false);
        let decision = d.decide_and_act(&plate("ABC777")).await.unwrap();
        assert_eq!(decision, AccessDecision::Register);
        assert_eq!(names(&log).len(), 1);
        assert!(db.exists(&NormalizedPlate::new("ABC777")).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_barrier_does_not_abort() {
        let (d, db, log) = setup(false);
        db.insert(&NormalizedPlate::new("OLD456")).unwrap();
        let decision = d.decide_and_act(&plate("OLD456")).await.unwrap();
        assert_eq!(decision, AccessDecision::Allow);
        assert_eq!(names(&log), vec!["open", "close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_key_race_is_allow() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let registry = Arc::new(RacingRegistry {
            log: log.clone(),
            seen: Mutex::new(HashSet::new()),
        });
        let d = Dispatcher::new(
            registry.clone(),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeActuator {
                log: log.clone(),
                reachable: true,
            }),
            "https://example.com/registrar",
            Duration::from_secs(2),
        )
        .unwrap();
        let decision = d.decide_and_act(&plate("RACE01")).await.unwrap();
        assert_eq!(decision, AccessDecision::Allow);
        let calls = names(&log);
        assert!(calls[0].starts_with("print RACE01"));
        assert_eq!(&calls[1..], &["insert", "open", "close"]);
        assert!(registry.seen.lock().unwrap().contains("RACE01"));
    }

    #[tokio::test]
    async fn event_log_failure_is_ignored() {
        let log: Log = Arc::new(Mutex::new(vec![]));
        let d = Dispatcher::new(
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(BrokenEvents),
            Arc::new(FakeActuator {
                log,
                reachable: true,
            }),
            "https://example.com/registrar",
            Duration::ZERO,
        )
        .unwrap();
        let decision = d.decide_and_act(&plate("EVT1")).await.unwrap();
        assert_eq!(decision, AccessDecision::Register);
    }

    #[test]
    fn registration_link_escapes_plate() {
        let (d, _, _) = setup(true);
        assert_eq!(
            d.registration_link(&NormalizedPlate::new("ÑA-1&2")),
            "https://example.com/registrar?placa=%C3%91A-1%262"
        );
    }

    #[test]
    fn invalid_registration_base_is_config_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let actuator = Arc::new(FakeActuator {
            log: Arc::new(Mutex::new(vec![])),
            reachable: true,
        });
        let res = Dispatcher::new(db.clone(), db, actuator, "not a url", Duration::ZERO);
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
