//! Daily "joke of the day" broadcast to every destination the bot belongs to.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike};
use cron::Schedule;
use jokebot_core::{ApplicationError, JokeStore, MembershipTracker};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actions::{DisplayOptions, MessageSender, OutboundMessage};

#[derive(Clone, Debug)]
pub struct BroadcastSchedule {
    at: NaiveTime,
    cron: Schedule,
}

impl BroadcastSchedule {
    /// Fires once a day at `at` (to the second) in the caller's time zone.
    pub fn daily_at(at: NaiveTime) -> Result<Self, cron::error::Error> {
        let expression = format!("{} {} {} * * *", at.second(), at.minute(), at.hour());
        let cron = Schedule::from_str(&expression)?;
        Ok(Self { at, cron })
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Next trigger strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.cron.after(now).next()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastState {
    Idle,
    Scheduled { next: DateTime<Local> },
    Firing,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Skipped { reason: String },
    Delivered { attempted: usize, failed: usize },
}

pub struct ScheduledBroadcaster {
    jokes: Arc<JokeStore>,
    membership: Arc<MembershipTracker>,
    sender: Arc<dyn MessageSender>,
    schedule: BroadcastSchedule,
    display: DisplayOptions,
    state: watch::Sender<BroadcastState>,
}

impl ScheduledBroadcaster {
    pub fn new(
        jokes: Arc<JokeStore>,
        membership: Arc<MembershipTracker>,
        sender: Arc<dyn MessageSender>,
        schedule: BroadcastSchedule,
        display: DisplayOptions,
    ) -> Self {
        let (state, _) = watch::channel(BroadcastState::Idle);
        Self { jokes, membership, sender, schedule, display, state }
    }

    pub fn schedule(&self) -> &BroadcastSchedule {
        &self.schedule
    }

    pub fn subscribe(&self) -> watch::Receiver<BroadcastState> {
        self.state.subscribe()
    }

    /// Posts one joke to every tracked destination. Never fails: an unseeded
    /// tracker skips the tick and individual send failures are only counted.
    pub async fn fire(&self) -> BroadcastOutcome {
        let Some(snapshot) = self.membership.snapshot() else {
            let skip = ApplicationError::ScheduleSkip("membership has not been seeded".to_owned());
            warn!(
                event_name = "broadcast.skipped",
                correlation_id = "broadcast",
                error_kind = skip.kind(),
                reason = %skip,
                "broadcast tick skipped; retrying at the next tick"
            );
            return BroadcastOutcome::Skipped { reason: skip.to_string() };
        };

        let joke = self.jokes.pick_random();
        let mut attempted = 0;
        let mut failed = 0;

        for (kind, destination) in snapshot.destinations() {
            attempted += 1;
            let message = OutboundMessage::to(destination.id.clone(), joke)
                .with_display(self.display.clone());
            if let Err(send_error) = self.sender.send(message).await {
                failed += 1;
                warn!(
                    event_name = "broadcast.send_failed",
                    correlation_id = "broadcast",
                    destination_kind = kind.as_str(),
                    channel_id = %destination.id,
                    error = %send_error,
                    "broadcast send failed; not retrying"
                );
            }
        }

        info!(
            event_name = "broadcast.delivered",
            correlation_id = "broadcast",
            attempted,
            failed,
            "joke of the day broadcast finished"
        );
        BroadcastOutcome::Delivered { attempted, failed }
    }

    /// Arms the daily timer on the runtime until the handle is stopped or dropped.
    pub fn spawn(self: Arc<Self>) -> BroadcastHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let state = self.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let now = Local::now();
                let Some(next) = self.schedule.next_after(&now) else {
                    warn!(
                        event_name = "broadcast.unschedulable",
                        correlation_id = "broadcast",
                        at = %self.schedule.at(),
                        "no upcoming trigger time; broadcast disarmed"
                    );
                    break;
                };

                self.state.send_replace(BroadcastState::Scheduled { next });
                info!(
                    event_name = "broadcast.scheduled",
                    correlation_id = "broadcast",
                    next = %next.to_rfc3339(),
                    "next broadcast armed"
                );

                let wait = (next - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = tokio::time::sleep(wait) => {
                        self.state.send_replace(BroadcastState::Firing);
                        self.fire().await;
                    }
                }
            }

            self.state.send_replace(BroadcastState::Stopped);
        });

        BroadcastHandle { stop: Some(stop_tx), task, state }
    }
}

pub struct BroadcastHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    state: watch::Receiver<BroadcastState>,
}

impl BroadcastHandle {
    pub fn state(&self) -> BroadcastState {
        self.state.borrow().clone()
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(join_error) = (&mut self.task).await {
            warn!(
                event_name = "broadcast.task_failed",
                correlation_id = "broadcast",
                error = %join_error,
                "broadcast task ended abnormally"
            );
        }
    }
}
