/// Conversation engine: drives one scripted dialogue over a session
///
/// The engine is a strict interpreter. It walks the script's step table
/// with a single 1-based cursor, answering each recognized prompt, and
/// rejects the whole run on the first message it cannot place. The only
/// sanctioned detour is the bot's identity-verification challenge, which
/// hands the chat to a human agent and ends with a free-text summary.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::error::EngineError;
use crate::models::User;
use crate::routines::{is_agent_greeting, Script, IDENTITY_CHALLENGE, OPENING_MESSAGE};
use crate::session::{Session, SessionEvent};
use crate::transport::{MessageContent, StubKind};

/// Step at which the bot may substitute the identity challenge for its
/// regular menu.
const IDENTITY_CHALLENGE_STEP: usize = 2;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for the bot's next scripted message.
    pub step_timeout: Duration,
    /// Window for steps where a human types the reply.
    pub freeform_timeout: Duration,
    /// Reduced flow stops one step early and refuses the identity
    /// fallback; used against bot environments without a live agent.
    pub reduced_flow: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            step_timeout: Duration::from_secs(60),
            freeform_timeout: Duration::from_secs(5 * 60),
            reduced_flow: false,
        }
    }
}

/// Run a script against an open session until it completes or fails.
///
/// The engine only borrows the event receiver; the caller keeps owning
/// the session and decides when to close it.
pub async fn run_conversation(
    session: &Session,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    user: &User,
    script: &Script,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    let total = script.len();

    // Wake the bot up; its greeting menu is the first scripted step.
    session.send_text(OPENING_MESSAGE).await?;

    let mut cursor: usize = 1;
    let mut in_fallback = false;
    let mut deadline = Instant::now() + step_window(script, cursor, config);

    loop {
        let event = match timeout_at(deadline, events.recv()).await {
            Ok(event) => event,
            Err(_) => {
                return Err(EngineError::StepTimeout {
                    step: cursor,
                    expected: expected_label(script, cursor, in_fallback),
                });
            }
        };

        let message = match event {
            Some(SessionEvent::Message(message)) => message,
            Some(SessionEvent::Closed) | None => return Err(EngineError::SessionClosed),
            Some(other) => {
                // Saves, errors and the like pass through without
                // touching the deadline.
                log::debug!("conversation for {}: ignoring {:?}", user.user_id, other);
                continue;
            }
        };

        if is_ignorable(&message.content) {
            log::debug!(
                "conversation for {}: ignoring message {}",
                user.user_id,
                message.key.id
            );
        } else if !in_fallback
            && cursor == IDENTITY_CHALLENGE_STEP
            && matches_text(&message.content, IDENTITY_CHALLENGE)
        {
            if config.reduced_flow {
                return Err(EngineError::FallbackUnavailable);
            }
            log::info!(
                "conversation for {}: identity challenge received, switching to agent handover",
                user.user_id
            );
            in_fallback = true;
            session.mark_read(&message.key).await?;
            session.send_text(&user.phone_digits()).await?;
        } else if in_fallback && is_agent_greeting(&message.content) {
            log::info!(
                "conversation for {}: agent took over, sending summary",
                user.user_id
            );
            session.mark_read(&message.key).await?;
            session.send_text(&script.summary).await?;
            cursor = total + 1;
        } else if script.steps[cursor - 1].matches(&message.content) {
            let step = &script.steps[cursor - 1];
            if step.manual_reply {
                log::info!(
                    "conversation for {}: step {} matched, reply left to the user",
                    user.user_id,
                    cursor
                );
            } else {
                session.mark_read(&message.key).await?;
                session.send_text(&step.reply).await?;
            }
            cursor += 1;
        } else {
            return Err(EngineError::StepMismatch {
                step: cursor,
                expected: expected_label(script, cursor, in_fallback),
            });
        }

        // Reduced flow skips the final step; its outcome is not
        // deterministic without a live counterpart.
        let finished = if config.reduced_flow {
            cursor >= total
        } else {
            cursor > total
        };
        if finished {
            log::info!("conversation for {}: completed", user.user_id);
            return Ok(());
        }

        deadline = Instant::now() + step_window(script, cursor, config);
    }
}

fn step_window(script: &Script, cursor: usize, config: &EngineConfig) -> Duration {
    let manual = script
        .steps
        .get(cursor - 1)
        .map(|step| step.manual_reply)
        .unwrap_or(false);
    if manual {
        config.freeform_timeout
    } else {
        config.step_timeout
    }
}

fn expected_label(script: &Script, cursor: usize, in_fallback: bool) -> String {
    if in_fallback {
        return "agent greeting".to_string();
    }
    script
        .steps
        .get(cursor - 1)
        .map(|step| step.prompt.clone())
        .unwrap_or_default()
}

fn is_ignorable(content: &MessageContent) -> bool {
    matches!(
        content,
        MessageContent::Image { .. }
            | MessageContent::Notification {
                stub: StubKind::BusinessPrivacyModeToFb | StubKind::E2eEncrypted,
            }
    )
}

fn matches_text(content: &MessageContent, expected: &str) -> bool {
    matches!(content, MessageContent::Text { body } if body == expected)
}
