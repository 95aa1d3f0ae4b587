use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::handlers::Handler;
use crate::telegram::BotApi;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            current: MIN_BACKOFF,
        }
    }
}

impl Backoff {
    /// Delay to wait now; the next one doubles, capped at 30s.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.current = MIN_BACKOFF;
    }
}

/// Long-polls `getUpdates` and feeds each update to the handler, one at a
/// time, until `shutdown` flips to `true`.
pub struct Dispatcher {
    api: Arc<dyn BotApi>,
    handler: Handler,
    poll_timeout: Duration,
}

impl Dispatcher {
    pub fn new(api: Arc<dyn BotApi>, handler: Handler, poll_timeout: Duration) -> Self {
        Dispatcher {
            api,
            handler,
            poll_timeout,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut offset: Option<i64> = None;
        let mut backoff = Backoff::default();

        info!("🤖 Bot is now running!");
        while !*shutdown.borrow() {
            let polled = tokio::select! {
                polled = self.api.get_updates(offset, self.poll_timeout) => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(updates) => {
                    backoff.reset();
                    debug!(count = updates.len(), "Polled updates");
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Err(error) = self.handler.handle_update(update).await {
                            error!(%error, "Failed to handle update");
                        }
                    }
                }
                Err(error) => {
                    let delay = backoff.next_delay();
                    error!(%error, retry_in = ?delay, "Polling failed");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        info!("Bot stopped");
    }
}
