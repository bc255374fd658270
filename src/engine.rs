//! Reminder engine actor.
//!
//! One tokio task owns [`CoreState`]; every entry point is a command sent
//! over a bounded channel with a oneshot reply. Commands run one at a
//! time in arrival order, so a delivered-trigger action and an in-app tap
//! for the same occurrence are serialized and the later one wins.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::badge::{BadgeDisplay, OccurrenceView};
use crate::clock::{Clock, SystemClock};
use crate::config::ReminderConfig;
use crate::core_state::CoreState;
use crate::delivery::{DeliveryService, SyncReport};
use crate::dispatcher::{self, DispatchOutcome};
use crate::error::ReminderError;
use crate::models::{IntakeStatus, MedicationSchedule, TimeSlot, TriggerPayload};
use crate::occurrence::OccurrenceKey;
use crate::store::ReminderStore;

type Reply<T> = oneshot::Sender<Result<T, ReminderError>>;

enum Command {
    SaveMedication {
        medication: MedicationSchedule,
        reply: Reply<SyncReport>,
    },
    DeleteMedication {
        medication_id: String,
        reply: Reply<bool>,
    },
    ScheduleChanged {
        medication_id: String,
        reply: Reply<SyncReport>,
    },
    AppBecameActive {
        reply: Reply<u32>,
    },
    ActionReceived {
        trigger_id: String,
        action_id: String,
        payload: Option<TriggerPayload>,
        reply: Reply<DispatchOutcome>,
    },
    RecordIntake {
        medication_id: String,
        status: IntakeStatus,
        slot: Option<TimeSlot>,
        reply: Reply<DispatchOutcome>,
    },
    WillPresent {
        trigger_id: String,
        reply: oneshot::Sender<bool>,
    },
    Outstanding {
        reply: Reply<u32>,
    },
    Today {
        reply: Reply<Vec<OccurrenceView>>,
    },
    CurrentStatus {
        key: OccurrenceKey,
        reply: Reply<Option<IntakeStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the engine task.
#[derive(Clone)]
pub struct ReminderEngine {
    sender: mpsc::Sender<Command>,
}

impl ReminderEngine {
    /// Build the state on the system clock and start the engine.
    pub fn start(
        store: Box<dyn ReminderStore>,
        delivery: Arc<dyn DeliveryService>,
        badge: Arc<dyn BadgeDisplay>,
        config: ReminderConfig,
    ) -> Result<(Self, JoinHandle<()>), ReminderError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let buffer = config.command_buffer;
        let state = CoreState::new(store, delivery, clock, badge, config)?;
        Ok(Self::spawn(state, buffer))
    }

    /// Move `state` into a new task. Must be called inside a tokio runtime.
    pub fn spawn(state: CoreState, buffer: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(run(state, receiver));
        tracing::info!(buffer, "Reminder engine started");
        (Self { sender }, handle)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ReminderError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| ReminderError::EngineStopped)?;
        response.await.map_err(|_| ReminderError::EngineStopped)?
    }

    pub async fn save_medication(&self, medication: MedicationSchedule) -> Result<SyncReport, ReminderError> {
        self.request(|reply| Command::SaveMedication { medication, reply })
            .await
    }

    pub async fn delete_medication(&self, medication_id: impl Into<String>) -> Result<bool, ReminderError> {
        let medication_id = medication_id.into();
        self.request(|reply| Command::DeleteMedication { medication_id, reply })
            .await
    }

    pub async fn schedule_changed(&self, medication_id: impl Into<String>) -> Result<SyncReport, ReminderError> {
        let medication_id = medication_id.into();
        self.request(|reply| Command::ScheduleChanged { medication_id, reply })
            .await
    }

    /// Full reconciliation; returns the outstanding count.
    pub async fn app_became_active(&self) -> Result<u32, ReminderError> {
        self.request(|reply| Command::AppBecameActive { reply }).await
    }

    /// A user answered a delivered reminder.
    pub async fn action_received(
        &self,
        trigger_id: impl Into<String>,
        action_id: impl Into<String>,
        payload: Option<TriggerPayload>,
    ) -> Result<DispatchOutcome, ReminderError> {
        let trigger_id = trigger_id.into();
        let action_id = action_id.into();
        self.request(|reply| Command::ActionReceived {
            trigger_id,
            action_id,
            payload,
            reply,
        })
        .await
    }

    /// A user answered today's occurrence from inside the app.
    pub async fn record_intake(
        &self,
        medication_id: impl Into<String>,
        status: IntakeStatus,
        slot: Option<TimeSlot>,
    ) -> Result<DispatchOutcome, ReminderError> {
        let medication_id = medication_id.into();
        self.request(|reply| Command::RecordIntake {
            medication_id,
            status,
            slot,
            reply,
        })
        .await
    }

    /// Whether a delivered trigger should be shown.
    pub async fn will_present(&self, trigger_id: impl Into<String>) -> Result<bool, ReminderError> {
        let trigger_id = trigger_id.into();
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::WillPresent { trigger_id, reply })
            .await
            .map_err(|_| ReminderError::EngineStopped)?;
        response.await.map_err(|_| ReminderError::EngineStopped)
    }

    /// Recompute and publish the badge count.
    pub async fn outstanding(&self) -> Result<u32, ReminderError> {
        self.request(|reply| Command::Outstanding { reply }).await
    }

    pub async fn today(&self) -> Result<Vec<OccurrenceView>, ReminderError> {
        self.request(|reply| Command::Today { reply }).await
    }

    pub async fn current_status(&self, key: OccurrenceKey) -> Result<Option<IntakeStatus>, ReminderError> {
        self.request(|reply| Command::CurrentStatus { key, reply })
            .await
    }

    /// Stop after every command already queued has run.
    pub async fn shutdown(&self) -> Result<(), ReminderError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| ReminderError::EngineStopped)?;
        response.await.map_err(|_| ReminderError::EngineStopped)
    }
}

async fn run(mut state: CoreState, mut receiver: mpsc::Receiver<Command>) {
    let mut shutdown_reply = None;

    while let Some(command) = receiver.recv().await {
        match command {
            Command::Shutdown { reply } => {
                // Refuse new commands; queued ones still drain.
                receiver.close();
                shutdown_reply = Some(reply);
            }
            other => handle(&mut state, other).await,
        }
    }

    tracing::info!("Reminder engine stopped");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

async fn handle(state: &mut CoreState, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::SaveMedication { medication, reply } => {
            let _ = reply.send(state.save_medication(&medication).await);
        }
        Command::DeleteMedication { medication_id, reply } => {
            let _ = reply.send(state.delete_medication(&medication_id).await);
        }
        Command::ScheduleChanged { medication_id, reply } => {
            let _ = reply.send(state.schedule_changed(&medication_id).await);
        }
        Command::AppBecameActive { reply } => {
            let _ = reply.send(state.app_became_active().await);
        }
        Command::ActionReceived {
            trigger_id,
            action_id,
            payload,
            reply,
        } => {
            let result = dispatcher::dispatch(state, &trigger_id, &action_id, payload.as_ref()).await;
            if let Err(e) = &result {
                tracing::error!(trigger_id = %trigger_id, error = %e, "Reminder action failed");
            }
            let _ = reply.send(result);
        }
        Command::RecordIntake {
            medication_id,
            status,
            slot,
            reply,
        } => {
            let result = dispatcher::record_intake(state, &medication_id, status, slot).await;
            if let Err(e) = &result {
                tracing::error!(medication_id = %medication_id, error = %e, "Recording intake failed");
            }
            let _ = reply.send(result);
        }
        Command::WillPresent { trigger_id, reply } => {
            let _ = reply.send(state.will_present(&trigger_id));
        }
        Command::Outstanding { reply } => {
            let _ = reply.send(state.refresh_badge().map_err(ReminderError::from));
        }
        Command::Today { reply } => {
            let _ = reply.send(state.today_view().map_err(ReminderError::from));
        }
        Command::CurrentStatus { key, reply } => {
            let _ = reply.send(state.current_status(&key).map_err(ReminderError::from));
        }
        // Handled by the run loop.
        Command::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::InMemoryBadge;
    use crate::clock::FixedClock;
    use crate::delivery::InMemoryDeliveryService;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(h: u32, m: u32) -> TimeSlot {
        TimeSlot::new(h, m).unwrap()
    }

    fn engine(now: NaiveDateTime) -> (ReminderEngine, JoinHandle<()>, MemoryStore, Arc<InMemoryBadge>) {
        let store = MemoryStore::new();
        let badge = Arc::new(InMemoryBadge::new());
        let state = CoreState::new(
            Box::new(store.clone()),
            Arc::new(InMemoryDeliveryService::new()),
            Arc::new(FixedClock::new(now)),
            badge.clone(),
            ReminderConfig::default(),
        )
        .unwrap();
        let (engine, handle) = ReminderEngine::spawn(state, 8);
        (engine, handle, store, badge)
    }

    #[tokio::test]
    async fn commands_round_trip_through_the_task() {
        let (engine, _handle, _store, badge) = engine(at(8, 45));
        let metformin =
            MedicationSchedule::new("metformin", "Metformin", "500mg", vec![slot(8, 0), slot(20, 0)]);
        engine.save_medication(metformin).await.unwrap();
        assert_eq!(engine.outstanding().await.unwrap(), 1);
        assert_eq!(badge.count(), 1);

        engine
            .record_intake("metformin", IntakeStatus::Taken, Some(slot(8, 0)))
            .await
            .unwrap();
        assert_eq!(engine.outstanding().await.unwrap(), 0);

        let today = engine.today().await.unwrap();
        assert_eq!(today.len(), 2);
        assert_eq!(today[0].status, Some(IntakeStatus::Taken));
    }

    #[tokio::test]
    async fn shutdown_drains_then_refuses() {
        let (engine, handle, store, _) = engine(at(9, 0));
        let levo = MedicationSchedule::new("levo", "Levothyroxine", "50mcg", vec![slot(7, 0)]);

        let saving = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.save_medication(levo).await })
        };
        saving.await.unwrap().unwrap();
        engine.shutdown().await.unwrap();
        handle.await.unwrap();

        assert!(store.get_medication("levo").unwrap().is_some());
        assert!(matches!(
            engine.app_became_active().await,
            Err(ReminderError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn concurrent_answers_are_serialized() {
        let (engine, _handle, store, _) = engine(at(8, 5));
        let levo = MedicationSchedule::new("levo", "Levothyroxine", "50mcg", vec![slot(8, 0)]);
        engine.save_medication(levo).await.unwrap();

        let (a, b) = tokio::join!(
            engine.action_received("levo_20250110_08_00", "TAKEN", None),
            engine.record_intake("levo", IntakeStatus::Skipped, None),
        );
        a.unwrap();
        b.unwrap();

        // The later of the two wins.
        let records = store.intake_records();
        assert_eq!(records.len(), 2);
        let key = OccurrenceKey::new("levo", at(0, 0).date(), slot(8, 0));
        assert_eq!(
            engine.current_status(key).await.unwrap(),
            Some(records[1].status)
        );
    }
}
