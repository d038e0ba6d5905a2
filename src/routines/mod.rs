/// Scripted dialogues against the operator bot
///
/// A routine is a fixed step table: for each step, the label we expect
/// in the bot's next message and the reply we send back. The matching
/// rules for buttons and list menus are brittle on purpose; the bot's
/// menus are stable and an unexpected prompt must fail the run rather
/// than guess.
use crate::models::{RoutineRequest, User};
use crate::transport::MessageContent;

mod park_car;
mod replace_client_car;

/// Placeholder text that wakes the bot up at the start of a run.
pub const OPENING_MESSAGE: &str = ".";

/// Greeting menu shared by every routine.
pub const GREETING_PROMPT: &str = "שלום ותודה רבה שפנית לשירות הדיגיטל של אופרייט";
pub const EMPLOYEE_REPLY: &str = "אני עובד אופרייט";

/// The bot sometimes asks for the caller's phone number instead of
/// showing the request-type menu.
pub const IDENTITY_CHALLENGE: &str = "מה מספר הטלפון שלך לצורכי זיהוי שרשומה במערכת";

const AGENT_GREETING_PREFIX: &str = "היי";
const AGENT_GREETING_SUFFIX: &str = "ואני אטפל בקריאתך.";

/// How a step recognizes the bot's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSelector {
    /// Message body equals the prompt.
    PlainText,
    /// Button message prompt text equals the prompt.
    ButtonText,
    /// List message title equals the prompt.
    ListTitle,
    /// Some list row's description equals the prompt.
    ListRowDescription,
}

/// One exchange in a scripted dialogue.
#[derive(Debug, Clone)]
pub struct Step {
    pub prompt: String,
    pub reply: String,
    pub selector: StepSelector,
    /// A human supplies the reply out of band; the engine only waits
    /// and advances on a match.
    pub manual_reply: bool,
}

impl Step {
    fn new(prompt: &str, selector: StepSelector, reply: impl Into<String>) -> Step {
        Step {
            prompt: prompt.to_string(),
            reply: reply.into(),
            selector,
            manual_reply: false,
        }
    }

    pub fn plain(prompt: &str, reply: impl Into<String>) -> Step {
        Step::new(prompt, StepSelector::PlainText, reply)
    }

    pub fn button(prompt: &str, reply: impl Into<String>) -> Step {
        Step::new(prompt, StepSelector::ButtonText, reply)
    }

    pub fn list_title(prompt: &str, reply: impl Into<String>) -> Step {
        Step::new(prompt, StepSelector::ListTitle, reply)
    }

    pub fn list_row(prompt: &str, reply: impl Into<String>) -> Step {
        Step::new(prompt, StepSelector::ListRowDescription, reply)
    }

    /// Whether a message satisfies this step's selector.
    pub fn matches(&self, content: &MessageContent) -> bool {
        match (self.selector, content) {
            (StepSelector::PlainText, MessageContent::Text { body }) => body == &self.prompt,
            (StepSelector::ButtonText, MessageContent::Buttons { text, .. }) => {
                text == &self.prompt
            }
            (StepSelector::ListTitle, MessageContent::List { title, .. }) => {
                title == &self.prompt
            }
            (StepSelector::ListRowDescription, MessageContent::List { rows, .. }) => {
                rows.iter().any(|row| row.description == self.prompt)
            }
            _ => false,
        }
    }
}

/// A rendered routine: the ordered steps plus the free-text summary
/// sent to a human agent when the bot hands the chat over.
#[derive(Debug, Clone)]
pub struct Script {
    pub steps: Vec<Step>,
    pub summary: String,
}

impl Script {
    pub fn for_request(user: &User, request: &RoutineRequest) -> Script {
        match request {
            RoutineRequest::ParkCar(info) => park_car::script(user, info),
            RoutineRequest::ReplaceClientCar(info) => replace_client_car::script(user, info),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A human agent taking over the chat opens with a fixed greeting shape.
pub fn is_agent_greeting(content: &MessageContent) -> bool {
    match content {
        MessageContent::Text { body } => {
            body.starts_with(AGENT_GREETING_PREFIX) && body.ends_with(AGENT_GREETING_SUFFIX)
        }
        _ => false,
    }
}
