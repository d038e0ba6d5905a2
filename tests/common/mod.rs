//! Common test utilities for the agent integration suites
//! Wires an AgentService (or bare session deps) to the scripted transport
//! and plays the operator-bot side of routine dialogues.
#![allow(dead_code)]

use std::sync::Arc;

use fleet_chat_agent::credentials::CredentialStore;
use fleet_chat_agent::db::{self, Database, DbPool};
use fleet_chat_agent::models::{ParkCarInfo, ReplaceClientCarInfo, RoutineRequest, User};
use fleet_chat_agent::relay::PairingRelay;
use fleet_chat_agent::routines::{Script, Step, StepSelector, OPENING_MESSAGE};
use fleet_chat_agent::service::{AgentService, ServiceSettings};
use fleet_chat_agent::session::registry::ConnectionRegistry;
use fleet_chat_agent::session::{SessionDeps, SessionOptions};
use fleet_chat_agent::transport::jid_from_phone;
use fleet_chat_agent::transport::mock::{
    buttons_message, list_message, text_message, LinkProbe, MockControl, MockTransport,
};
use fleet_chat_agent::transport::MessageEvent;

pub const OPERATOR_PHONE: &str = "972500000001";

pub fn operator_jid() -> String {
    jid_from_phone(OPERATOR_PHONE)
}

pub fn test_user() -> User {
    User {
        user_id: "user-1".to_string(),
        name: "דנה".to_string(),
        company_id: "4821".to_string(),
        phone_number: "052-123-4567".to_string(),
        last_auth: None,
    }
}

/// A directory entry with distinct ids, for multi-user tests.
pub fn user_with(user_id: &str, company_id: &str) -> User {
    User {
        user_id: user_id.to_string(),
        name: format!("עובד {company_id}"),
        company_id: company_id.to_string(),
        phone_number: "052-123-4567".to_string(),
        last_auth: None,
    }
}

pub fn park_car_info() -> ParkCarInfo {
    ParkCarInfo {
        car_id: "398-35-902".to_string(),
        km: 123456,
        starting_point: "חיפה".to_string(),
        destination: "תל אביב".to_string(),
    }
}

pub fn park_car_request() -> RoutineRequest {
    RoutineRequest::ParkCar(park_car_info())
}

pub fn replace_client_car_request() -> RoutineRequest {
    RoutineRequest::ReplaceClientCar(ReplaceClientCarInfo {
        client_car_id: "111-22-333".to_string(),
        replacement_car_id: "444-55-666".to_string(),
        name_of_client_company: "שלמה תחבורה".to_string(),
        replacement_car_origin: None,
    })
}

/// An AgentService wired to the scripted transport.
pub struct TestHarness {
    pub service: AgentService,
    pub control: MockControl,
    pub pool: DbPool,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_reduced_flow(false)
    }

    pub fn with_reduced_flow(reduced_flow: bool) -> Self {
        let pool = db::create_test_pool();
        let (transport, control) = MockTransport::new();
        let settings = ServiceSettings {
            operator_jid: operator_jid(),
            reduced_flow,
        };
        let service = AgentService::new(pool.clone(), Arc::new(transport), settings);
        TestHarness {
            service,
            control,
            pool,
        }
    }

    pub async fn seed_user(&self) -> User {
        let user = test_user();
        Database::insert_user(&self.pool, &user)
            .await
            .expect("Failed to insert user");
        user
    }
}

/// Bare session collaborators for tests that spawn sessions directly.
pub struct SessionFixture {
    pub deps: SessionDeps,
    pub control: MockControl,
    pub pool: DbPool,
}

pub fn session_fixture() -> SessionFixture {
    let pool = db::create_test_pool();
    let (transport, control) = MockTransport::new();
    let deps = SessionDeps {
        registry: Arc::new(ConnectionRegistry::new()),
        relay: Arc::new(PairingRelay::new()),
        store: CredentialStore::new(pool.clone()),
        transport: Arc::new(transport),
    };
    SessionFixture {
        deps,
        control,
        pool,
    }
}

pub fn routine_options() -> SessionOptions {
    SessionOptions {
        operator_jid: operator_jid(),
        login_only: false,
    }
}

pub fn login_options() -> SessionOptions {
    SessionOptions {
        operator_jid: operator_jid(),
        login_only: true,
    }
}

/// Render a step's expected prompt as the message shape its selector
/// looks for, as the operator bot would send it.
pub fn bot_message_for(step: &Step) -> MessageEvent {
    let from = operator_jid();
    match step.selector {
        StepSelector::PlainText => text_message(&from, &step.prompt),
        StepSelector::ButtonText => {
            buttons_message(&from, &step.prompt, &["חנייה", "מסירת רכב חלופי"])
        }
        StepSelector::ListTitle => list_message(&from, &step.prompt, &[("1", "מחלקת שינוע")]),
        StepSelector::ListRowDescription => list_message(&from, "תפריט", &[("1", &step.prompt)]),
    }
}

/// Play the operator-bot side of a scripted dialogue on the given link:
/// consume the opening message, then send the first `steps_to_play`
/// prompts and collect the reply to each. Returns the replies in order.
pub async fn play_bot(probe: &mut LinkProbe, script: &Script, steps_to_play: usize) -> Vec<String> {
    let (to, opening) = probe.next_text().await;
    assert_eq!(to, operator_jid(), "opening message went to the wrong peer");
    assert_eq!(opening, OPENING_MESSAGE);

    let mut replies = Vec::new();
    for step in &script.steps[..steps_to_play] {
        probe.emit_message(bot_message_for(step));
        let (_, reply) = probe.next_text().await;
        replies.push(reply);
    }
    replies
}

/// The replies a script is expected to produce, in step order.
pub fn expected_replies(script: &Script) -> Vec<String> {
    script.steps.iter().map(|step| step.reply.clone()).collect()
}
