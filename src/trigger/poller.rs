use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::{
    errors::TriggerError,
    models::trigger::TriggerKey,
    store::StoreProvider,
    trigger::{
        policy::{BuildQueue, trigger_build},
        state::TriggerState,
    },
};

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct TriggerPoller {
    provider: Arc<dyn StoreProvider>,
    queue: Arc<dyn BuildQueue>,
    poll_interval: Duration,
}

impl TriggerPoller {
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        queue: Arc<dyn BuildQueue>,
        poll_interval: Duration,
    ) -> Self {
        if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = poll_interval.as_millis() as u64,
                "Trigger poll interval too short, using 1s"
            );
        }

        Self {
            provider,
            queue,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    pub async fn run(self) {
        info!(
            interval_seconds = self.poll_interval.as_secs(),
            "Trigger poller started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Evaluates every known trigger once and returns how many builds were queued.
    pub async fn poll_once(&self) -> usize {
        let triggers = match self.provider.known_triggers().await {
            Ok(triggers) => triggers,
            Err(e) => {
                error!(error = %e, "Failed to list SNS triggers");
                return 0;
            }
        };

        let results = join_all(triggers.iter().map(|trigger| self.evaluate(trigger))).await;

        results
            .into_iter()
            .zip(&triggers)
            .filter(|(result, trigger)| match result {
                Ok(queued) => *queued,
                Err(e) => {
                    warn!(trigger = %trigger, error = %e, "Trigger evaluation failed");
                    false
                }
            })
            .count()
    }

    async fn evaluate(&self, trigger: &TriggerKey) -> Result<bool, TriggerError> {
        let mut state = TriggerState::open(self.provider.open(trigger)).await?;
        trigger_build(trigger, &mut state, self.queue.as_ref()).await
    }
}
