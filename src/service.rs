/// Agent orchestration: login, reporting routines, login refresh
///
/// The service owns the shared per-user machinery (registry, relay,
/// credential store, pairing tokens) and turns session event streams
/// into caller-facing outcomes. Each flow resolves on its first decisive
/// event; a spawned watcher keeps following the session afterwards so a
/// browser-paired login can still finish the job.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::credentials::CredentialStore;
use crate::db::{Database, DbPool, REFRESH_FRESHNESS_MS};
use crate::engine::{run_conversation, EngineConfig};
use crate::error::{SessionError, StoreError};
use crate::models::{LoginOutcome, RefreshReport, RoutineOutcome, RoutineRequest, User};
use crate::relay::PairingRelay;
use crate::routines::Script;
use crate::session::registry::ConnectionRegistry;
use crate::session::{Session, SessionDeps, SessionEvent, SessionOptions};
use crate::tokens::PairingTokens;
use crate::transport::{ChatTransport, Jid};

/// Busy error shown when a login is requested while a session runs.
pub const LOGIN_BUSY_ERROR: &str =
    "החיבור נכשל כי המערכת מחוברת לוואצאפ של המשתמש, אנא נסה שנית עוד דקה";
/// Busy error shown when a routine is requested while a session runs.
pub const ROUTINE_BUSY_ERROR: &str = "המערכת כבר בתהליך דיווח";
/// Refresh report error when a supposedly-fresh login asks to pair again.
pub const REFRESH_QR_ERROR: &str = "Session asked for a pairing code";

/// Delay between the first credential save after open and the detach,
/// so the remote side finishes its own post-login bookkeeping.
const LOGIN_CLOSE_DELAY: Duration = Duration::from_secs(60);
/// The bot keeps syncing briefly after the connection opens; starting a
/// dialogue too early loses the opening message.
const ROUTINE_SETTLE_DELAY: Duration = Duration::from_secs(4);
/// Grace before closing the session once a routine resolved.
const ROUTINE_CLOSE_GRACE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub operator_jid: Jid,
    pub reduced_flow: bool,
}

#[derive(Clone)]
pub struct AgentService {
    pool: DbPool,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<PairingRelay>,
    tokens: Arc<PairingTokens>,
    store: CredentialStore,
    transport: Arc<dyn ChatTransport>,
    operator_jid: Jid,
    engine_config: EngineConfig,
}

impl AgentService {
    pub fn new(pool: DbPool, transport: Arc<dyn ChatTransport>, settings: ServiceSettings) -> Self {
        AgentService {
            store: CredentialStore::new(pool.clone()),
            pool,
            registry: Arc::new(ConnectionRegistry::new()),
            relay: Arc::new(PairingRelay::new()),
            tokens: Arc::new(PairingTokens::new()),
            transport,
            operator_jid: settings.operator_jid,
            engine_config: EngineConfig {
                reduced_flow: settings.reduced_flow,
                ..EngineConfig::default()
            },
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<PairingRelay> {
        &self.relay
    }

    pub fn tokens(&self) -> &Arc<PairingTokens> {
        &self.tokens
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            registry: self.registry.clone(),
            relay: self.relay.clone(),
            store: self.store.clone(),
            transport: self.transport.clone(),
        }
    }

    /// Connect a user to the chat network, pairing them if needed.
    pub async fn start_login(&self, user: &User) -> LoginOutcome {
        if self.registry.is_active(&user.user_id) {
            return LoginOutcome::Failed(LOGIN_BUSY_ERROR.to_string());
        }

        let options = SessionOptions {
            operator_jid: self.operator_jid.clone(),
            login_only: true,
        };
        let (session, events) =
            match Session::spawn(user.clone(), options, self.session_deps()).await {
                Ok(pair) => pair,
                Err(SessionError::AlreadyActive(_)) => {
                    return LoginOutcome::Failed(LOGIN_BUSY_ERROR.to_string())
                }
                Err(err) => return LoginOutcome::Failed(err.to_string()),
            };

        let (resolve, outcome) = oneshot::channel();
        tokio::spawn(drive_login(
            self.pool.clone(),
            self.tokens.clone(),
            user.clone(),
            session,
            events,
            resolve,
        ));

        outcome.await.unwrap_or_else(|_| {
            LoginOutcome::Failed("login watcher ended unexpectedly".to_string())
        })
    }

    /// Run a reporting routine for a user. Resolves on the first decisive
    /// event; if pairing is required the routine still runs once the user
    /// pairs through the browser.
    pub async fn run_routine(&self, user: &User, request: &RoutineRequest) -> RoutineOutcome {
        if self.registry.is_active(&user.user_id) {
            return RoutineOutcome::Failed(ROUTINE_BUSY_ERROR.to_string());
        }
        if let Err(error) = request.validate() {
            return RoutineOutcome::Failed(error);
        }

        let script = Script::for_request(user, request);
        let options = SessionOptions {
            operator_jid: self.operator_jid.clone(),
            login_only: false,
        };
        let (session, events) =
            match Session::spawn(user.clone(), options, self.session_deps()).await {
                Ok(pair) => pair,
                Err(SessionError::AlreadyActive(_)) => {
                    return RoutineOutcome::Failed(ROUTINE_BUSY_ERROR.to_string())
                }
                Err(err) => return RoutineOutcome::Failed(err.to_string()),
            };

        let (resolve, outcome) = oneshot::channel();
        tokio::spawn(drive_routine(
            self.pool.clone(),
            user.clone(),
            script,
            self.engine_config.clone(),
            session,
            events,
            resolve,
        ));

        outcome.await.unwrap_or_else(|_| {
            RoutineOutcome::Failed("routine watcher ended unexpectedly".to_string())
        })
    }

    /// Re-authenticate every user whose login is still fresh enough to
    /// renew without pairing. Sequential on purpose; each renewal holds a
    /// full session.
    pub async fn refresh_logins(&self) -> Result<Vec<RefreshReport>, StoreError> {
        let users = Database::users_with_fresh_last_auth(&self.pool, REFRESH_FRESHNESS_MS).await?;
        log::info!("refreshing logins for {} user(s)", users.len());

        let mut reports = Vec::with_capacity(users.len());
        for user in users {
            if self.registry.is_active(&user.user_id) {
                log::info!("refresh: user {} has an active session, skipping", user.user_id);
                continue;
            }
            let report = self.refresh_one(&user).await;
            if let Some(error) = &report.error {
                log::warn!("refresh for {} failed: {}", user.user_id, error);
            }
            reports.push(report);
        }
        Ok(reports)
    }

    async fn refresh_one(&self, user: &User) -> RefreshReport {
        let options = SessionOptions {
            operator_jid: self.operator_jid.clone(),
            login_only: true,
        };
        let (session, mut events) =
            match Session::spawn(user.clone(), options, self.session_deps()).await {
                Ok(pair) => pair,
                Err(err) => return refresh_failure(user, err.to_string()),
            };

        let mut opened = false;
        loop {
            match events.recv().await {
                Some(SessionEvent::Qr(_)) => {
                    // The stored identity was rejected. Leave the session
                    // running; with no relay attached it reaps itself on
                    // the next pairing code.
                    return refresh_failure(user, REFRESH_QR_ERROR.to_string());
                }
                Some(SessionEvent::Open) => {
                    opened = true;
                }
                Some(SessionEvent::Saved) if opened => {
                    tokio::time::sleep(LOGIN_CLOSE_DELAY).await;
                    if let Err(err) = Database::set_last_auth(&self.pool, &user.user_id).await {
                        return refresh_failure(
                            user,
                            format!("failed to record last auth: {}", err),
                        );
                    }
                    if let Err(err) = session.close(None) {
                        log::debug!("refresh for {}: close skipped: {}", user.user_id, err);
                    }
                    return RefreshReport {
                        user_id: user.user_id.clone(),
                        name: user.name.clone(),
                        success: true,
                        error: None,
                    };
                }
                Some(SessionEvent::Error(error)) => {
                    log::warn!("refresh for {}: {}", user.user_id, error);
                }
                Some(SessionEvent::Closed) | None => {
                    return refresh_failure(
                        user,
                        "connection closed before the login was renewed".to_string(),
                    );
                }
                Some(_) => {}
            }
        }
    }
}

fn refresh_failure(user: &User, error: String) -> RefreshReport {
    RefreshReport {
        user_id: user.user_id.clone(),
        name: user.name.clone(),
        success: false,
        error: Some(error),
    }
}

async fn drive_login(
    pool: DbPool,
    tokens: Arc<PairingTokens>,
    user: User,
    session: Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    resolve: oneshot::Sender<LoginOutcome>,
) {
    let mut resolve = Some(resolve);
    let mut opened = false;

    loop {
        match events.recv().await {
            Some(SessionEvent::Qr(code)) => {
                if let Some(tx) = resolve.take() {
                    let pairing_token = tokens.issue(&user.user_id);
                    let _ = tx.send(LoginOutcome::PairingRequired {
                        qr_code: code,
                        pairing_token,
                    });
                }
            }
            Some(SessionEvent::Open) => {
                opened = true;
                if let Some(tx) = resolve.take() {
                    let _ = tx.send(LoginOutcome::Completed);
                }
            }
            Some(SessionEvent::Saved) if opened => {
                tokio::time::sleep(LOGIN_CLOSE_DELAY).await;
                if let Err(err) = Database::set_last_auth(&pool, &user.user_id).await {
                    log::error!("login for {}: failed to record last auth: {}", user.user_id, err);
                }
                if let Err(err) = session.close(None) {
                    log::debug!("login for {}: close skipped: {}", user.user_id, err);
                }
                return;
            }
            Some(SessionEvent::Error(error)) => {
                log::warn!("login for {}: {}", user.user_id, error);
            }
            Some(SessionEvent::Closed) | None => {
                if let Some(tx) = resolve.take() {
                    let _ = tx.send(LoginOutcome::Failed(
                        "connection closed before login completed".to_string(),
                    ));
                }
                return;
            }
            Some(_) => {}
        }
    }
}

async fn drive_routine(
    pool: DbPool,
    user: User,
    script: Script,
    engine_config: EngineConfig,
    session: Session,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    resolve: oneshot::Sender<RoutineOutcome>,
) {
    let mut resolve = Some(resolve);

    loop {
        match events.recv().await {
            Some(SessionEvent::Qr(code)) => {
                if let Some(tx) = resolve.take() {
                    let _ = tx.send(RoutineOutcome::PairingRequired { qr_code: code });
                }
            }
            Some(SessionEvent::Open) => {
                tokio::time::sleep(ROUTINE_SETTLE_DELAY).await;
                if let Err(err) = Database::set_last_auth(&pool, &user.user_id).await {
                    log::error!(
                        "routine for {}: failed to record last auth: {}",
                        user.user_id,
                        err
                    );
                }

                let outcome =
                    match run_conversation(&session, &mut events, &user, &script, &engine_config)
                        .await
                    {
                        Ok(()) => RoutineOutcome::Completed,
                        Err(err) => {
                            log::warn!("routine for {} failed: {}", user.user_id, err);
                            RoutineOutcome::Failed(err.to_string())
                        }
                    };
                if let Some(tx) = resolve.take() {
                    let _ = tx.send(outcome);
                }

                tokio::time::sleep(ROUTINE_CLOSE_GRACE).await;
                if let Err(err) = session.close(None) {
                    log::debug!("routine for {}: close skipped: {}", user.user_id, err);
                }
                return;
            }
            Some(SessionEvent::Error(error)) => {
                log::warn!("routine for {}: {}", user.user_id, error);
            }
            Some(SessionEvent::Closed) | None => {
                if let Some(tx) = resolve.take() {
                    let _ = tx.send(RoutineOutcome::Failed(
                        "connection closed before the routine completed".to_string(),
                    ));
                }
                return;
            }
            Some(_) => {}
        }
    }
}
