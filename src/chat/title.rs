use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::config::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOutcome {
    Resolved { chat_id: String, title: String },
    /// The chat exists but has no title yet.
    Untitled,
    /// Every attempt reported "not found".
    Exhausted { attempts: u32 },
    Failed { message: String },
    /// The session moved to another chat while the lookup was running.
    Superseded,
}

/// A title fetch detached from the session so it can run on its own task.
///
/// A freshly created chat may not be readable yet, so "not found" answers
/// are retried with exponential backoff. The guard is checked once the
/// backend answers, never before a wait.
#[derive(Clone)]
pub struct TitleLookup {
    backend: Arc<dyn ChatBackend>,
    chat_id: String,
    policy: RetryPolicy,
    guard: CancellationToken,
}

impl TitleLookup {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        chat_id: impl Into<String>,
        policy: RetryPolicy,
        guard: CancellationToken,
    ) -> Self {
        Self {
            backend,
            chat_id: chat_id.into(),
            policy,
            guard,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub async fn run(self) -> TitleOutcome {
        for attempt in 0..self.policy.max_attempts {
            match self.backend.get_chat_by_id(&self.chat_id).await {
                Ok(meta) => {
                    if self.guard.is_cancelled() {
                        debug!(chat_id = %self.chat_id, "title lookup superseded");
                        return TitleOutcome::Superseded;
                    }
                    return match meta.title.filter(|t| !t.trim().is_empty()) {
                        Some(title) => {
                            info!(chat_id = %self.chat_id, attempt, "chat title resolved");
                            TitleOutcome::Resolved {
                                chat_id: self.chat_id,
                                title,
                            }
                        }
                        None => TitleOutcome::Untitled,
                    };
                }
                Err(err) if err.is_not_found() => {
                    if attempt + 1 >= self.policy.max_attempts {
                        break;
                    }
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        chat_id = %self.chat_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "chat not found yet, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(chat_id = %self.chat_id, error = %err, "chat title lookup failed");
                    return TitleOutcome::Failed {
                        message: err.to_string(),
                    };
                }
            }
        }

        debug!(chat_id = %self.chat_id, "chat title still missing after retries");
        TitleOutcome::Exhausted {
            attempts: self.policy.max_attempts,
        }
    }
}
