//! Update dispatch and per-chat state machine.
//!
//! A chat's state is never stored as such. Each turn derives it from the
//! membership gate, the user's record and the broadcast session table:
//!
//! - unverified: the gate rejects the user
//! - verified without model: member, no `selected_model`
//! - verified with model: member, `selected_model` set
//! - broadcast pending: administrator chat with an active session
//!
//! Handlers only mutate state after the external call they depend on has
//! resolved, and never let a delivery failure escape.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastEngine;
use crate::directory::{UserDirectory, UserPatch};
use crate::gate::MembershipGate;
use crate::keyboards;
use crate::llm::{Completer, CompletionOutcome};
use crate::models::ModelRegistry;
use crate::platform::{
    CallbackNotice, CallbackQuery, InboundUpdate, IncomingMessage, OutgoingMessage, Transport,
};
use crate::session::SessionStore;

/// Whether an update led to any work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Model,
    Broadcast,
}

impl Command {
    /// Parse the leading command token, tolerating `/cmd@botname` and
    /// trailing arguments
    fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let name = token.split('@').next().unwrap_or(token);
        match name {
            "/start" => Some(Command::Start),
            "/model" => Some(Command::Model),
            "/broadcast" => Some(Command::Broadcast),
            _ => None,
        }
    }
}

/// What one inbound update asks for
#[derive(Debug)]
enum Action<'a> {
    Start(&'a IncomingMessage),
    ShowModels(&'a IncomingMessage),
    BeginBroadcast(&'a IncomingMessage),
    BroadcastPayload(&'a IncomingMessage),
    Chat(&'a IncomingMessage),
    CheckJoin(&'a CallbackQuery),
    SelectModel(&'a CallbackQuery),
    BackToModels(&'a CallbackQuery),
    Ignore,
}

#[derive(Debug, Clone, Default)]
pub struct RouterSettings {
    /// The only user allowed to broadcast
    pub admin_id: Option<u64>,
    /// Model alias for users who never chose one
    pub default_model: Option<String>,
}

pub struct UpdateRouter {
    transport: Arc<dyn Transport>,
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionStore>,
    completer: Arc<dyn Completer>,
    broadcasts: Arc<BroadcastEngine>,
    gate: MembershipGate,
    registry: ModelRegistry,
    settings: RouterSettings,
}

impl UpdateRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionStore>,
        completer: Arc<dyn Completer>,
        broadcasts: Arc<BroadcastEngine>,
        gate: MembershipGate,
        registry: ModelRegistry,
        settings: RouterSettings,
    ) -> Self {
        Self {
            transport,
            directory,
            sessions,
            completer,
            broadcasts,
            gate,
            registry,
            settings,
        }
    }

    /// Process one update to completion. Never fails; the caller acks
    /// the platform regardless of the outcome.
    pub async fn handle(&self, update: InboundUpdate) -> Disposition {
        let action = self.classify(&update).await;
        debug!("Dispatching {:?}", action);

        match action {
            Action::Start(msg) => self.start(msg).await,
            Action::ShowModels(msg) => {
                self.send(
                    msg.chat_id,
                    OutgoingMessage::html(keyboards::SWITCH_MODEL)
                        .with_keyboard(keyboards::model_keyboard(&self.registry)),
                )
                .await
            }
            Action::BeginBroadcast(msg) => self.begin_broadcast(msg).await,
            Action::BroadcastPayload(msg) => self.broadcast(msg).await,
            Action::Chat(msg) => self.chat(msg).await,
            Action::CheckJoin(query) => self.check_join(query).await,
            Action::SelectModel(query) => self.select_model(query).await,
            Action::BackToModels(query) => self.back_to_models(query).await,
            Action::Ignore => return Disposition::Ignored,
        }

        Disposition::Handled
    }

    fn is_admin(&self, user_id: u64) -> bool {
        self.settings.admin_id == Some(user_id)
    }

    async fn classify<'a>(&self, update: &'a InboundUpdate) -> Action<'a> {
        match update {
            InboundUpdate::CallbackQuery(query) => match query.data.as_str() {
                keyboards::CHECK_JOIN => Action::CheckJoin(query),
                keyboards::BACK_TO_MODELS => Action::BackToModels(query),
                alias if self.registry.get(alias).is_some() => Action::SelectModel(query),
                _ => Action::Ignore,
            },
            InboundUpdate::Message(msg) => {
                match Command::parse(&msg.text) {
                    Some(Command::Start) => return Action::Start(msg),
                    Some(Command::Model) => return Action::ShowModels(msg),
                    Some(Command::Broadcast) if self.is_admin(msg.user_id) => {
                        return Action::BeginBroadcast(msg)
                    }
                    _ => {}
                }

                // The session is keyed by chat but only the administrator
                // may consume it
                if self.is_admin(msg.user_id) && self.take_session(msg.chat_id).await {
                    return Action::BroadcastPayload(msg);
                }

                if msg.text.starts_with('/') {
                    Action::Ignore
                } else {
                    Action::Chat(msg)
                }
            }
        }
    }

    async fn take_session(&self, chat_id: i64) -> bool {
        match self.sessions.take(chat_id).await {
            Ok(active) => active,
            Err(e) => {
                error!("Failed to read broadcast session for {}: {:#}", chat_id, e);
                false
            }
        }
    }

    async fn start(&self, msg: &IncomingMessage) {
        let user_id = msg.user_id.to_string();
        let seen_at = chrono::Utc::now().timestamp_millis();

        let is_new = match self
            .directory
            .register(&user_id, &msg.user_name, seen_at)
            .await
        {
            Ok(is_new) => is_new,
            Err(e) => {
                error!("Failed to register user {}: {:#}", user_id, e);
                false
            }
        };

        if is_new {
            info!("New user {} ({})", msg.user_name, user_id);
            self.notify_new_user(msg).await;
        }

        let reply = if self.gate.is_member(msg.user_id).await {
            OutgoingMessage::html(keyboards::WELCOME_BACK)
                .with_keyboard(keyboards::model_keyboard(&self.registry))
        } else {
            OutgoingMessage::html(keyboards::join_prompt(&msg.user_name))
                .with_keyboard(keyboards::join_keyboard(self.gate.channel()))
        };
        self.send(msg.chat_id, reply).await;
    }

    async fn notify_new_user(&self, msg: &IncomingMessage) {
        let Some(admin_id) = self.settings.admin_id else {
            return;
        };

        let total = match self.directory.list().await {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!("Failed to count users: {:#}", e);
                return;
            }
        };

        self.send(
            admin_id as i64,
            OutgoingMessage::html(keyboards::new_user_notice(
                &msg.user_name,
                msg.user_id,
                total,
            )),
        )
        .await;
    }

    async fn begin_broadcast(&self, msg: &IncomingMessage) {
        let pending = self.sessions.is_active(msg.chat_id).await.unwrap_or(false);
        if let Err(e) = self.sessions.begin(msg.chat_id).await {
            error!("Failed to open broadcast session: {:#}", e);
            return;
        }
        if pending {
            info!("Broadcast session renewed for chat {}", msg.chat_id);
        } else {
            info!("Broadcast session opened for chat {}", msg.chat_id);
        }
        self.send(msg.chat_id, OutgoingMessage::html(keyboards::BROADCAST_MODE))
            .await;
    }

    async fn broadcast(&self, msg: &IncomingMessage) {
        self.send(msg.chat_id, OutgoingMessage::plain(keyboards::BROADCAST_STARTING))
            .await;

        let recipients = match self.directory.list().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list users for broadcast: {:#}", e);
                Vec::new()
            }
        };

        self.broadcasts
            .run(msg.chat_id, msg.message_id, recipients)
            .await;
    }

    async fn chat(&self, msg: &IncomingMessage) {
        if !self.gate.is_member(msg.user_id).await {
            self.send(
                msg.chat_id,
                OutgoingMessage::html(keyboards::ACCESS_DENIED)
                    .with_keyboard(keyboards::join_keyboard(self.gate.channel())),
            )
            .await;
            return;
        }

        let selected = match self.directory.get(&msg.user_id.to_string()).await {
            Ok(Some(user)) => {
                debug!(
                    user_id = %user.id,
                    name = %user.display_name,
                    last_seen = ?user.last_seen,
                    model = ?user.selected_model,
                    "Chat from known user"
                );
                user.selected_model
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load user {}: {:#}", msg.user_id, e);
                None
            }
        };

        let Some(model) = self.registry.resolve(
            selected.as_deref(),
            self.settings.default_model.as_deref().unwrap_or_default(),
        ) else {
            self.send(
                msg.chat_id,
                OutgoingMessage::html(keyboards::SELECT_MODEL_FIRST)
                    .with_keyboard(keyboards::model_keyboard(&self.registry)),
            )
            .await;
            return;
        };

        if let Err(e) = self.transport.send_typing(msg.chat_id).await {
            debug!("Typing indicator failed: {:#}", e);
        }

        let reply = match self.completer.complete(&model.slug, &msg.text).await {
            CompletionOutcome::Reply(text) => text,
            CompletionOutcome::Empty => keyboards::NO_REPLY.to_string(),
            CompletionOutcome::Unavailable => keyboards::BACKEND_UNAVAILABLE.to_string(),
        };

        // Model output is not guaranteed to be valid markup
        self.send(
            msg.chat_id,
            OutgoingMessage::markdown(reply).with_plain_fallback(),
        )
        .await;
    }

    async fn check_join(&self, query: &CallbackQuery) {
        if !self.gate.is_member(query.user_id).await {
            self.answer(query, Some(CallbackNotice::alert(keyboards::NOTICE_NOT_JOINED)))
                .await;
            return;
        }

        if let Err(e) = self
            .transport
            .delete_message(query.chat_id, query.message_id)
            .await
        {
            debug!("Failed to delete join prompt: {:#}", e);
        }
        self.answer(query, Some(CallbackNotice::toast(keyboards::NOTICE_VERIFIED)))
            .await;
        self.send(
            query.chat_id,
            OutgoingMessage::html(keyboards::VERIFIED)
                .with_keyboard(keyboards::model_keyboard(&self.registry)),
        )
        .await;
    }

    async fn select_model(&self, query: &CallbackQuery) {
        if !self.gate.is_member(query.user_id).await {
            self.answer(query, Some(CallbackNotice::alert(keyboards::NOTICE_JOIN_FIRST)))
                .await;
            return;
        }

        let alias = query.data.as_str();
        if let Err(e) = self
            .directory
            .patch(&query.user_id.to_string(), &UserPatch::selected_model(alias))
            .await
        {
            error!("Failed to save model for {}: {:#}", query.user_id, e);
            self.answer(query, Some(CallbackNotice::alert(keyboards::NOTICE_SAVE_FAILED)))
                .await;
            return;
        }
        info!("User {} selected model {}", query.user_id, alias);

        self.replace(
            query,
            OutgoingMessage::html(keyboards::model_set(alias))
                .with_keyboard(keyboards::back_keyboard()),
        )
        .await;
        self.answer(
            query,
            Some(CallbackNotice::toast(keyboards::model_selected_notice(alias))),
        )
        .await;
    }

    async fn back_to_models(&self, query: &CallbackQuery) {
        self.replace(
            query,
            OutgoingMessage::html(keyboards::CHOOSE_MODEL)
                .with_keyboard(keyboards::model_keyboard(&self.registry)),
        )
        .await;
        self.answer(query, None).await;
    }

    /// Edit the message the button was on, or send a fresh one if that fails
    async fn replace(&self, query: &CallbackQuery, message: OutgoingMessage) {
        if let Err(e) = self
            .transport
            .edit_message(query.chat_id, query.message_id, &message)
            .await
        {
            debug!("Edit failed, sending instead: {:#}", e);
            self.send(query.chat_id, message).await;
        }
    }

    async fn send(&self, chat_id: i64, message: OutgoingMessage) {
        if let Err(e) = self.transport.send_message(chat_id, &message).await {
            warn!("Failed to send message to {}: {:#}", chat_id, e);
        }
    }

    async fn answer(&self, query: &CallbackQuery, notice: Option<CallbackNotice>) {
        if let Err(e) = self.transport.answer_callback(&query.id, notice).await {
            warn!("Failed to answer callback {}: {:#}", query.id, e);
        }
    }
}
