//! Expiry sweeper
//!
//! Background task that finds expired punishments, schedules their removal on
//! the community platform, and then deletes them from the store in one batch.

use crate::enforcement::Enforcer;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Requests the sweeper accepts between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Sweep immediately instead of waiting for the next tick
    SweepNow,
    /// Stop the sweeper
    Shutdown,
}

/// Result of one sweep
#[derive(Debug)]
pub struct SweepOutcome {
    /// Removal tasks scheduled for the expired records
    pub removals: Vec<JoinHandle<()>>,
    /// Rows deleted from the store
    pub cleaned: usize,
}

impl SweepOutcome {
    /// Wait for every scheduled removal to finish
    pub async fn finish(self) -> usize {
        for removal in self.removals {
            let _ = removal.await;
        }
        self.cleaned
    }
}

pub struct ExpirySweeper {
    enforcer: Enforcer,
    period: Duration,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(enforcer: Enforcer, period: Duration) -> Self {
        Self { enforcer, period }
    }

    /// Spawn the sweeper and return the handle for sending it requests
    pub fn start(self) -> (Sender<SweepRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    async fn run(self, mut rx: Receiver<SweepRequest>) {
        info!(
            "Starting expiry sweeper with {}s interval",
            self.period.as_secs()
        );
        let mut interval = tokio::time::interval(self.period);

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(SweepRequest::SweepNow) => {
                            debug!("Received request to sweep now");
                            self.sweep().await;
                        }
                        Some(SweepRequest::Shutdown) | None => {
                            info!("Received shutdown request for expiry sweeper");
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Expiry sweeper shut down");
    }

    /// Run one sweep
    ///
    /// Removals are spawned rather than awaited, so a slow or failing platform
    /// call never holds up the store cleanup.
    pub async fn sweep(&self) -> SweepOutcome {
        let tracker = self.enforcer.tracker();
        // One instant for both passes, so every row deleted was in the snapshot
        let now = tracker.now();
        let expired = tracker.get_expired_punishments(now).await;

        let removals = expired
            .into_iter()
            .map(|(community_id, record)| {
                let enforcer = self.enforcer.clone();
                tokio::spawn(async move {
                    enforcer.lift_expired(&community_id, &record).await;
                })
            })
            .collect::<Vec<_>>();

        let cleaned = tracker.clean_expired(now).await;
        if cleaned > 0 {
            info!("Cleaned {cleaned} expired punishments");
        }

        SweepOutcome { removals, cleaned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::enforcement::engine::tests::{
        ROLE, capture_channel, expect_member, member, start, test_config,
    };
    use crate::ledger::MockLedger;
    use crate::platform::MockCommunityPlatform;
    use crate::punishment::{
        MemoryPunishmentStore, PunishmentDuration, PunishmentKind, PunishmentRecord,
        PunishmentTracker,
    };
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup(platform: MockCommunityPlatform) -> (ExpirySweeper, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let tracker = PunishmentTracker::new(
            Arc::new(MemoryPunishmentStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let enforcer = Enforcer::new(
            Arc::new(platform),
            Arc::new(MockLedger::new()),
            tracker,
            Arc::new(test_config()),
        );
        (
            ExpirySweeper::new(enforcer, Duration::from_secs(300)),
            clock,
        )
    }

    fn record(kind: PunishmentKind, duration: PunishmentDuration) -> PunishmentRecord {
        PunishmentRecord::issue(Uuid::new_v4(), "Steve", kind, None, duration, start())
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let mut platform = MockCommunityPlatform::new();
        expect_member(&mut platform, member("42", vec![ROLE], false));
        platform
            .expect_remove_role()
            .withf(|id, _, _| id == "42")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let posted = capture_channel(&mut platform);

        let (sweeper, clock) = setup(platform);
        let tracker = sweeper.enforcer.tracker().clone();
        tracker
            .add_punishment(
                "42",
                record(
                    PunishmentKind::Mute,
                    PunishmentDuration::Timed(ChronoDuration::minutes(1)),
                ),
            )
            .await;
        tracker
            .add_punishment("43", record(PunishmentKind::Ban, PunishmentDuration::Permanent))
            .await;

        clock.advance(ChronoDuration::minutes(2));
        let cleaned = sweeper.sweep().await.finish().await;

        assert_eq!(cleaned, 1);
        let remaining = tracker.get_all_punishments().await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("43"));
        assert_eq!(*posted.lock().unwrap(), vec!["expired MUTE of 42".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired() {
        let mut platform = MockCommunityPlatform::new();
        platform.expect_lookup_member().never();

        let (sweeper, _clock) = setup(platform);
        let outcome = sweeper.sweep().await;
        assert!(outcome.removals.is_empty());
        assert_eq!(outcome.finish().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_does_not_wait_for_member_lookup() {
        let mut platform = MockCommunityPlatform::new();
        platform.expect_lookup_member().returning(|id| {
            Err(crate::platform::PlatformError::MemberNotFound(
                id.to_string(),
            ))
        });

        let (sweeper, clock) = setup(platform);
        let tracker = sweeper.enforcer.tracker().clone();
        for id in ["1", "2", "3"] {
            tracker
                .add_punishment(
                    id,
                    record(
                        PunishmentKind::Ban,
                        PunishmentDuration::Timed(ChronoDuration::seconds(30)),
                    ),
                )
                .await;
        }

        clock.advance(ChronoDuration::seconds(30));
        let outcome = sweeper.sweep().await;
        assert_eq!(outcome.removals.len(), 3);
        assert_eq!(outcome.cleaned, 3);
        outcome.finish().await;
        assert!(tracker.get_all_punishments().await.is_empty());
    }

    /// Moves one second forward every time it is read
    struct SteppingClock {
        next: std::sync::Mutex<chrono::DateTime<chrono::Utc>>,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> chrono::DateTime<chrono::Utc> {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next += ChronoDuration::seconds(1);
            now
        }
    }

    #[tokio::test]
    async fn test_record_expiring_mid_sweep_is_lifted_not_dropped() {
        let mut platform = MockCommunityPlatform::new();
        expect_member(&mut platform, member("42", vec![ROLE], false));
        platform
            .expect_remove_role()
            .withf(|id, _, _| id == "42")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let _posted = capture_channel(&mut platform);

        let clock = Arc::new(SteppingClock {
            next: std::sync::Mutex::new(start()),
        });
        let tracker = PunishmentTracker::new(Arc::new(MemoryPunishmentStore::new()), clock);
        let enforcer = Enforcer::new(
            Arc::new(platform),
            Arc::new(MockLedger::new()),
            tracker.clone(),
            Arc::new(test_config()),
        );
        let sweeper = ExpirySweeper::new(enforcer, Duration::from_secs(300));
        tracker
            .add_punishment(
                "42",
                record(
                    PunishmentKind::Mute,
                    PunishmentDuration::Timed(ChronoDuration::milliseconds(500)),
                ),
            )
            .await;

        // Still live at the instant this sweep reads, so it must stay stored
        let first = sweeper.sweep().await;
        assert!(first.removals.is_empty());
        assert_eq!(first.finish().await, 0);
        assert_eq!(tracker.get_all_punishments().await.len(), 1);

        assert_eq!(sweeper.sweep().await.finish().await, 1);
        assert!(tracker.get_all_punishments().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_sweeps_and_shuts_down() {
        let mut platform = MockCommunityPlatform::new();
        expect_member(&mut platform, member("42", vec![ROLE], false));
        platform
            .expect_remove_role()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let _posted = capture_channel(&mut platform);

        let (sweeper, clock) = setup(platform);
        let tracker = sweeper.enforcer.tracker().clone();
        tracker
            .add_punishment(
                "42",
                record(
                    PunishmentKind::Ban,
                    PunishmentDuration::Timed(ChronoDuration::minutes(1)),
                ),
            )
            .await;
        clock.advance(ChronoDuration::minutes(1));

        let (tx, handle) = sweeper.start();
        tx.send(SweepRequest::SweepNow).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(tracker.get_all_punishments().await.is_empty());

        tx.send(SweepRequest::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
