use crate::backend::{IdentityService, RowStore};
use crate::error::AutoPulseError;
use crate::service::data_ops::DataOps;
use crate::service::session_state::{SessionSnapshot, SessionState, Transition};
use crate::service::validation::{Credentials, validate_credentials};
use crate::types::{AuthEvent, Identity, UserProfile, Vehicle};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of a successful sign-up call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignUpOutcome {
    /// The account exists but no session could be obtained yet.
    pub requires_email_confirmation: bool,
}

#[derive(Debug)]
pub enum SessionMessage {
    SignIn(Credentials, RpcReplyPort<Result<Identity, AutoPulseError>>),
    SignUp(Credentials, RpcReplyPort<Result<SignUpOutcome, AutoPulseError>>),
    SignOut(RpcReplyPort<()>),
    RefreshVehicles(RpcReplyPort<()>),
    SetCurrentVehicle(Option<Vehicle>, RpcReplyPort<()>),

    // Internal messages (sent by the actor itself)
    /// Look up the persisted session once at startup.
    Restore,
    /// Session transition pushed by the identity service.
    AuthChanged(AuthEvent),
    /// Automatic vehicle load finished for the identity `epoch`.
    VehiclesLoaded {
        epoch: u64,
        result: Result<Vec<Vehicle>, AutoPulseError>,
    },
}

/// Handle to the session actor. Cheap to clone; every clone reads the same
/// snapshot.
#[derive(Clone)]
pub struct SessionManager {
    actor: ActorRef<SessionMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionManager {
    /// Start the actor. Restoration begins immediately; `status()` stays
    /// `Unknown` until it resolves.
    pub async fn spawn(
        identity: Arc<dyn IdentityService>,
        store: Arc<dyn RowStore>,
    ) -> Result<Self, AutoPulseError> {
        let (publisher, snapshot) = watch::channel(SessionSnapshot::default());
        let args = SessionActorArgs {
            identity,
            ops: DataOps::new(store),
            publisher,
        };
        let (actor, _jh) = Actor::spawn(None, SessionActor, args)
            .await
            .map_err(|e| AutoPulseError::RactorError(format!("spawn SessionActor failed: {e}")))?;
        Ok(Self { actor, snapshot })
    }

    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<Identity, AutoPulseError> {
        let creds = validate_credentials(identifier, password)?;
        ractor::call!(self.actor, SessionMessage::SignIn, creds)
            .map_err(|e| AutoPulseError::RactorError(format!("SignIn RPC failed: {e}")))?
    }

    pub async fn sign_up(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<SignUpOutcome, AutoPulseError> {
        let creds = validate_credentials(identifier, password)?;
        ractor::call!(self.actor, SessionMessage::SignUp, creds)
            .map_err(|e| AutoPulseError::RactorError(format!("SignUp RPC failed: {e}")))?
    }

    /// Revoke the session. Local state is cleared even when revocation fails.
    pub async fn sign_out(&self) -> Result<(), AutoPulseError> {
        ractor::call!(self.actor, SessionMessage::SignOut)
            .map_err(|e| AutoPulseError::RactorError(format!("SignOut RPC failed: {e}")))
    }

    /// Reload the vehicle list. Fetch failures keep the previous list.
    pub async fn refresh_vehicles(&self) -> Result<(), AutoPulseError> {
        ractor::call!(self.actor, SessionMessage::RefreshVehicles)
            .map_err(|e| AutoPulseError::RactorError(format!("RefreshVehicles RPC failed: {e}")))
    }

    pub async fn set_current_vehicle(&self, vehicle: Option<Vehicle>) -> Result<(), AutoPulseError> {
        ractor::call!(self.actor, SessionMessage::SetCurrentVehicle, vehicle).map_err(|e| {
            AutoPulseError::RactorError(format!("SetCurrentVehicle RPC failed: {e}"))
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot.borrow().is_authenticated()
    }

    pub fn user(&self) -> Option<Identity> {
        self.snapshot.borrow().user.clone()
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.snapshot.borrow().vehicles.clone()
    }

    pub fn current_vehicle(&self) -> Option<Vehicle> {
        self.snapshot.borrow().current_vehicle.clone()
    }

    /// Receiver that is notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until startup restoration has resolved.
    pub async fn wait_until_resolved(&self) -> Result<SessionSnapshot, AutoPulseError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| s.resolved)
            .await
            .map_err(|_| AutoPulseError::RactorError("SessionActor stopped".to_string()))?;
        Ok(snapshot.clone())
    }

    /// Stop the actor and drop the auth-change subscription.
    pub async fn shutdown(&self) {
        if let Err(e) = self.actor.stop_and_wait(None, None).await {
            warn!("SessionActor stop failed: {e}");
        }
    }
}

struct SessionActorArgs {
    identity: Arc<dyn IdentityService>,
    ops: DataOps,
    publisher: watch::Sender<SessionSnapshot>,
}

struct SessionActorState {
    identity: Arc<dyn IdentityService>,
    ops: DataOps,
    session: SessionState,
    publisher: watch::Sender<SessionSnapshot>,
    listener: JoinHandle<()>,
}

impl SessionActorState {
    fn publish(&self) {
        let next = self.session.snapshot();
        self.publisher.send_if_modified(|current| {
            if *current == *next {
                return false;
            }
            *current = next.clone();
            true
        });
    }
}

struct SessionActor;

#[ractor::async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        // Restore is queued ahead of any forwarded push.
        ractor::cast!(myself, SessionMessage::Restore)
            .map_err(|e| ActorProcessingErr::from(format!("queue restore failed: {e}")))?;

        let mut subscription = args.identity.subscribe();
        let actor = myself.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if ractor::cast!(actor, SessionMessage::AuthChanged(event)).is_err() {
                    break;
                }
            }
            debug!("auth-change forwarding ended");
        });

        info!("SessionActor started");
        Ok(SessionActorState {
            identity: args.identity,
            ops: args.ops,
            session: SessionState::new(),
            publisher: args.publisher,
            listener,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.listener.abort();
        info!("SessionActor stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::SignIn(creds, rp) => {
                let result = self.handle_sign_in(state, &myself, creds).await;
                let _ = rp.send(result);
            }
            SessionMessage::SignUp(creds, rp) => {
                let result = self.handle_sign_up(state, &myself, creds).await;
                let _ = rp.send(result);
            }
            SessionMessage::SignOut(rp) => {
                self.handle_sign_out(state).await;
                let _ = rp.send(());
            }
            SessionMessage::RefreshVehicles(rp) => {
                self.handle_refresh_vehicles(state).await;
                let _ = rp.send(());
            }
            SessionMessage::SetCurrentVehicle(vehicle, rp) => {
                debug!(vehicle_id = ?vehicle.as_ref().map(|v| v.id.as_str()), "current vehicle set");
                state.session.set_current_vehicle(vehicle);
                state.publish();
                let _ = rp.send(());
            }
            SessionMessage::Restore => {
                self.handle_restore(state, &myself).await;
            }
            SessionMessage::AuthChanged(event) => {
                debug!(generation = event.generation, kind = ?event.kind, "auth change received");
                let identity = event.session.map(|s| s.user);
                let transition = state.session.apply(identity, event.generation);
                self.after_transition(state, &myself, transition);
            }
            SessionMessage::VehiclesLoaded { epoch, result } => match result {
                Ok(vehicles) => {
                    let count = vehicles.len();
                    if state.session.replace_vehicles(epoch, vehicles) {
                        debug!(count, "vehicles loaded");
                        state.publish();
                    }
                }
                Err(e) => warn!("vehicle load failed, keeping previous list: {e}"),
            },
        }
        Ok(())
    }
}

impl SessionActor {
    async fn handle_restore(&self, state: &mut SessionActorState, myself: &ActorRef<SessionMessage>) {
        // Stamp before the lookup so pushes racing with it count as newer.
        let generation = state.identity.generation();
        let identity = match state.identity.get_session().await {
            Ok(session) => session.map(|s| s.user),
            Err(e) => {
                warn!("session restoration failed, starting signed out: {e}");
                None
            }
        };
        info!(restored = identity.is_some(), "session restoration resolved");
        let transition = state.session.restore(identity, generation);
        self.after_transition(state, myself, transition);
    }

    async fn handle_sign_in(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        creds: Credentials,
    ) -> Result<Identity, AutoPulseError> {
        let resp = state
            .identity
            .sign_in_with_password(&creds.email, &creds.password)
            .await
            .inspect_err(|e| error!(email = %creds.email, "sign-in failed: {e}"))?;
        info!(user_id = %resp.user.id, "signed in");
        let transition = state.session.apply(Some(resp.user.clone()), resp.generation);
        self.after_transition(state, myself, transition);
        Ok(resp.user)
    }

    async fn handle_sign_up(
        &self,
        state: &mut SessionActorState,
        myself: &ActorRef<SessionMessage>,
        creds: Credentials,
    ) -> Result<SignUpOutcome, AutoPulseError> {
        let resp = state
            .identity
            .sign_up(&creds.email, &creds.password)
            .await
            .inspect_err(|e| error!(email = %creds.email, "sign-up failed: {e}"))?;

        let profile = UserProfile::for_new_account(resp.user.id.clone(), &creds.email);
        if let Err(e) = state.ops.upsert_profile(&profile).await {
            warn!(user_id = %resp.user.id, "profile upsert failed: {e}");
        }

        if resp.session.is_some() {
            info!(user_id = %resp.user.id, "signed up");
            let transition = state.session.apply(Some(resp.user), resp.generation);
            self.after_transition(state, myself, transition);
            return Ok(SignUpOutcome {
                requires_email_confirmation: false,
            });
        }

        match state
            .identity
            .sign_in_with_password(&creds.email, &creds.password)
            .await
        {
            Ok(signed_in) => {
                info!(user_id = %signed_in.user.id, "signed up and signed in");
                let transition = state.session.apply(Some(signed_in.user), signed_in.generation);
                self.after_transition(state, myself, transition);
                Ok(SignUpOutcome {
                    requires_email_confirmation: false,
                })
            }
            Err(e) => {
                info!(user_id = %resp.user.id, "sign-up awaiting email confirmation: {e}");
                Ok(SignUpOutcome {
                    requires_email_confirmation: true,
                })
            }
        }
    }

    async fn handle_sign_out(&self, state: &mut SessionActorState) {
        if let Err(e) = state.identity.sign_out().await {
            warn!("session revoke failed, clearing locally: {e}");
        }
        let floor = state.identity.generation();
        if state.session.sign_out(floor) == Transition::Cleared {
            info!("signed out");
        }
        state.publish();
    }

    async fn handle_refresh_vehicles(&self, state: &mut SessionActorState) {
        let Some(user_id) = state.session.user().map(|u| u.id.clone()) else {
            debug!("vehicle refresh skipped: no user");
            return;
        };
        match state.ops.fetch_vehicles(&user_id).await {
            Ok(vehicles) => {
                let epoch = state.session.epoch();
                state.session.replace_vehicles(epoch, vehicles);
                state.publish();
            }
            Err(e) => warn!(user_id = %user_id, "vehicle refresh failed, keeping previous list: {e}"),
        }
    }

    /// Publish the new snapshot and start the vehicle load for a newly
    /// entered identity.
    fn after_transition(
        &self,
        state: &SessionActorState,
        myself: &ActorRef<SessionMessage>,
        transition: Transition,
    ) {
        match transition {
            Transition::Entered { epoch } => {
                if let Some(user_id) = state.session.user().map(|u| u.id.clone()) {
                    let ops = state.ops.clone();
                    let actor = myself.clone();
                    tokio::spawn(async move {
                        let result = ops.fetch_vehicles(&user_id).await;
                        let _ = ractor::cast!(actor, SessionMessage::VehiclesLoaded { epoch, result });
                    });
                }
            }
            Transition::Cleared => info!("session cleared"),
            Transition::Unchanged | Transition::Stale => {}
        }
        state.publish();
    }
}
