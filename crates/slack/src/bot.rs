use std::future::Future;
use std::sync::Arc;

use chrono::NaiveTime;
use jokebot_core::{ApplicationError, JokeStore, MembershipTracker};
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::info;

use crate::actions::{ActionExecutor, DisplayOptions, MessageSender};
use crate::broadcast::{BroadcastHandle, BroadcastSchedule, ScheduledBroadcaster};
use crate::images::ImageSearch;
use crate::router::{PatternRouter, RouterOptions};
use crate::socket::{
    validate_token, ConnectionState, ConnectionSupervisor, ReconnectPolicy, RtmTransport,
};

pub struct BotSettings {
    pub token: SecretString,
    pub jokes: JokeStore,
    /// Daily broadcast trigger; `None` disables the broadcast.
    pub broadcast_at: Option<NaiveTime>,
    /// Display identity for broadcasts and image posts.
    pub display: DisplayOptions,
    pub reconnect_policy: ReconnectPolicy,
}

pub struct BotCore {
    membership: Arc<MembershipTracker>,
    router: Arc<PatternRouter>,
    broadcaster: Option<Arc<ScheduledBroadcaster>>,
    supervisor: ConnectionSupervisor,
}

impl BotCore {
    pub fn new<T>(
        settings: BotSettings,
        transport: Arc<T>,
        images: Option<Arc<dyn ImageSearch>>,
    ) -> Result<Self, ApplicationError>
    where
        T: RtmTransport + 'static,
    {
        validate_token(&settings.token)?;

        let jokes = Arc::new(settings.jokes);
        let membership = Arc::new(MembershipTracker::new());
        let options = RouterOptions {
            images_enabled: images.is_some(),
            broadcast_time: settings.broadcast_at,
        };
        let router = PatternRouter::standard(Arc::clone(&jokes), options)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let router = Arc::new(router);

        let sender: Arc<dyn MessageSender> = transport.clone();
        let executor =
            Arc::new(ActionExecutor::new(Arc::clone(&sender), images, settings.display.clone()));
        let schedule = settings
            .broadcast_at
            .map(BroadcastSchedule::daily_at)
            .transpose()
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let broadcaster = schedule.map(|schedule| {
            Arc::new(ScheduledBroadcaster::new(
                Arc::clone(&jokes),
                Arc::clone(&membership),
                Arc::clone(&sender),
                schedule,
                settings.display.clone(),
            ))
        });

        let supervisor = ConnectionSupervisor::new(
            settings.token,
            transport,
            Arc::clone(&membership),
            Arc::clone(&router),
            executor,
            settings.reconnect_policy,
        )?;

        Ok(Self { membership, router, broadcaster, supervisor })
    }

    pub fn membership(&self) -> Arc<MembershipTracker> {
        Arc::clone(&self.membership)
    }

    pub fn router(&self) -> &PatternRouter {
        &self.router
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    pub fn broadcaster(&self) -> Option<&ScheduledBroadcaster> {
        self.broadcaster.as_deref()
    }

    /// Runs the connection and the daily broadcast until `shutdown` resolves.
    /// A stream that closes cleanly leaves the broadcast armed until shutdown;
    /// a fatal connection error returns immediately.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ApplicationError>
    where
        F: Future<Output = ()>,
    {
        let broadcast = self.broadcaster.as_ref().map(|broadcaster| {
            info!(
                event_name = "bot.broadcast_armed",
                correlation_id = "bootstrap",
                at = %broadcaster.schedule().at(),
                "daily broadcast enabled"
            );
            Arc::clone(broadcaster).spawn()
        });

        tokio::pin!(shutdown);
        let session = tokio::select! {
            biased;
            result = self.supervisor.run() => Some(result),
            () = &mut shutdown => None,
        };
        let result = match session {
            Some(Ok(())) => {
                shutdown.await;
                Ok(())
            }
            Some(Err(error)) => Err(error),
            None => Ok(()),
        };

        stop_broadcast(broadcast).await;
        result
    }
}

async fn stop_broadcast(handle: Option<BroadcastHandle>) {
    if let Some(handle) = handle {
        handle.stop().await;
    }
}
