use chrono::{DateTime, Duration as ChronoDuration, Utc};
use livescore::adapters::MemoryLeaseBackend;
use livescore::coordination::{run_renewal, GracefulShutdown, LeaderElector, ShutdownSignal};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const LEASE: Duration = Duration::from_secs(30);

/// Wall clock the test moves by hand
#[derive(Clone)]
struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    fn start() -> Self {
        let t0 = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Self(Arc::new(Mutex::new(t0)))
    }

    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }

    fn advance(&self, secs: i64) {
        *self.0.lock().unwrap() += ChronoDuration::seconds(secs);
    }

    fn backend(&self) -> Arc<MemoryLeaseBackend> {
        let clock = self.clone();
        Arc::new(MemoryLeaseBackend::with_clock(Arc::new(move || clock.now())))
    }
}

#[tokio::test]
async fn at_most_one_leader_while_renewing() {
    let clock = ManualClock::start();
    let backend = clock.backend();
    let mut electors: Vec<LeaderElector> = ["a", "b", "c"]
        .iter()
        .map(|owner| LeaderElector::with_owner(backend.clone(), "poller", owner, LEASE))
        .collect();

    let mut first_leader = None;
    for round in 0..40 {
        // Vary who asks first
        electors.rotate_left(round % 3);
        for elector in electors.iter_mut() {
            elector.try_acquire_or_renew().await;
        }

        let leaders: Vec<&str> = electors
            .iter()
            .filter(|e| e.is_leader_at(clock.now()))
            .map(|e| e.owner_id())
            .collect();
        assert_eq!(leaders.len(), 1, "round {round}: leaders {leaders:?}");

        // A renewing leader keeps the role
        let leader = leaders[0].to_string();
        let expected = first_leader.get_or_insert_with(|| leader.clone()).clone();
        assert_eq!(expected, leader);

        clock.advance(10);
    }
}

#[tokio::test]
async fn standby_takes_over_once_the_lease_expires() {
    let clock = ManualClock::start();
    let backend = clock.backend();
    let mut a = LeaderElector::with_owner(backend.clone(), "poller", "a", LEASE);
    let mut b = LeaderElector::with_owner(backend, "poller", "b", LEASE);

    let a_token = a.try_acquire_or_renew().await.unwrap();

    // a stops renewing (crashed); b waits out the lease
    clock.advance(29);
    assert!(b.try_acquire_or_renew().await.is_none());

    clock.advance(1);
    let b_token = b.try_acquire_or_renew().await.unwrap();
    assert_eq!(b_token.owner, "b");
    assert_eq!(b_token.acquired_at, clock.now());
    assert!(!a_token.is_valid_at(clock.now()));

    // The old leader comes back and finds the role taken
    assert!(a.try_acquire_or_renew().await.is_none());
    assert!(!a.is_leader_at(clock.now()));
}

#[tokio::test]
async fn renewal_keeps_acquired_at_and_extends_expiry() {
    let clock = ManualClock::start();
    let mut a = LeaderElector::with_owner(clock.backend(), "poller", "a", LEASE);

    let first = a.try_acquire_or_renew().await.unwrap();
    clock.advance(10);
    let renewed = a.try_acquire_or_renew().await.unwrap();

    assert_eq!(renewed.acquired_at, first.acquired_at);
    assert_eq!(renewed.expires_at, clock.now() + ChronoDuration::seconds(30));
}

#[tokio::test(start_paused = true)]
async fn renewal_task_publishes_leadership_and_clears_it_on_shutdown() {
    let backend = Arc::new(MemoryLeaseBackend::new());
    let elector = LeaderElector::with_owner(backend.clone(), "poller", "a", LEASE);
    let shutdown = GracefulShutdown::with_defaults();
    let (tx, mut rx) = watch::channel(None);

    let handle = tokio::spawn(run_renewal(
        elector,
        Duration::from_secs(10),
        tx,
        shutdown.token(),
    ));

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("leadership was never published")
        .unwrap();
    assert_eq!(rx.borrow().as_ref().map(|l| l.token.owner.clone()), Some("a".to_string()));

    shutdown.request_shutdown(ShutdownSignal::Graceful);
    let mut elector = handle.await.unwrap();
    assert!(rx.borrow().is_none());

    // The caller releases after draining; a standby can then take over at once
    assert!(elector.release().await);
    let mut b = LeaderElector::with_owner(backend, "poller", "b", LEASE);
    assert!(b.try_acquire_or_renew().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn standby_task_publishes_once_the_holder_releases() {
    let backend = Arc::new(MemoryLeaseBackend::new());
    let mut holder = LeaderElector::with_owner(backend.clone(), "poller", "a", LEASE);
    assert!(holder.try_acquire_or_renew().await.is_some());

    let standby = LeaderElector::with_owner(backend, "poller", "b", LEASE);
    let shutdown = GracefulShutdown::with_defaults();
    let (tx, mut rx) = watch::channel(None);
    let handle = tokio::spawn(run_renewal(
        standby,
        Duration::from_secs(10),
        tx,
        shutdown.token(),
    ));

    // Several re-polls go by without anything to publish
    assert!(
        tokio::time::timeout(Duration::from_secs(25), rx.changed())
            .await
            .is_err()
    );
    assert!(rx.borrow().is_none());

    holder.release().await;
    tokio::time::timeout(Duration::from_secs(15), rx.changed())
        .await
        .expect("standby never took over")
        .unwrap();
    assert_eq!(rx.borrow().as_ref().map(|l| l.token.owner.clone()), Some("b".to_string()));

    shutdown.request_shutdown(ShutdownSignal::Graceful);
    handle.await.unwrap();
}
