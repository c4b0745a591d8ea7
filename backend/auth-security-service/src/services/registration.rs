/// User registration with a `user.created` outbox event
///
/// The identity, the binding and the event are written in one transaction. A login that
/// is already bound on the channel is reused together with its identity, and an event id
/// this origin has already recorded is not appended again, so a replay writes nothing.
use crate::db::credentials::{self, NewBinding};
use crate::error::{AuthError, Result};
use crate::models::{RegisterUserRequest, UserCreatedPayload};
use crate::security::hash_password;
use sqlx::PgPool;
use tracing::{debug, info};
use transactional_outbox::{OutboxEvent, OutboxWriter};
use validator::Validate;

pub const USER_CREATED_EVENT: &str = "user.created";

/// What a registration touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub identity_id: i64,
    pub binding_id: i64,
    pub binding_created: bool,
    /// `false` when the event id had already been appended by this origin.
    pub event_appended: bool,
}

struct NewUser<'a> {
    identity_id: Option<i64>,
    /// Announced by another service rather than requested by a client.
    replicated: bool,
    channel: &'a str,
    login_name: &'a str,
    password_hash: &'a str,
    mail: Option<&'a str>,
    phone: Option<&'a str>,
}

#[derive(Clone)]
pub struct UserRegistrationService {
    pool: PgPool,
    writer: OutboxWriter,
    origin: String,
    routing_key: String,
}

impl UserRegistrationService {
    pub fn new(pool: PgPool, origin: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            pool,
            writer: OutboxWriter::new(),
            origin: origin.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Register a user from a client request. `event_id` is the caller's idempotency key.
    pub async fn create_user(
        &self,
        event_id: &str,
        request: RegisterUserRequest,
    ) -> Result<Registration> {
        request.validate()?;
        let password_hash = hash_password(&request.password)?;

        self.register(
            event_id,
            NewUser {
                identity_id: request.identity_id,
                replicated: false,
                channel: &request.channel,
                login_name: &request.login_name,
                password_hash: &password_hash,
                mail: request.mail.as_deref(),
                phone: request.phone.as_deref(),
            },
        )
        .await
    }

    /// Register a user announced by another service's `user.created` event.
    ///
    /// The announced identity id belongs to the sender and is ignored; the login is
    /// matched against local bindings instead.
    pub async fn replicate(
        &self,
        event_id: &str,
        payload: &UserCreatedPayload,
    ) -> Result<Registration> {
        self.register(
            event_id,
            NewUser {
                identity_id: None,
                replicated: true,
                channel: &payload.channel,
                login_name: &payload.login_name,
                password_hash: &payload.password_hash,
                mail: payload.mail.as_deref(),
                phone: payload.phone.as_deref(),
            },
        )
        .await
    }

    async fn register(&self, event_id: &str, user: NewUser<'_>) -> Result<Registration> {
        let mut tx = self.pool.begin().await?;

        if credentials::find_channel_type(&mut *tx, user.channel)
            .await?
            .is_none()
        {
            return Err(AuthError::Validation(format!(
                "unknown channel type: {}",
                user.channel
            )));
        }

        // Checked before any write so a replay of a committed event changes nothing.
        let already_recorded = self.writer.contains(&mut tx, event_id, &self.origin).await?;

        let (identity_id, binding_id, binding_created) =
            match credentials::find_binding_by_login(&mut *tx, user.channel, user.login_name)
                .await?
            {
                Some(binding) if already_recorded || user.replicated => {
                    (binding.identity_id, binding.id, false)
                }
                Some(_) => {
                    return Err(AuthError::Conflict(format!(
                        "login {} on {}",
                        user.login_name, user.channel
                    )));
                }
                None => {
                    let existing_identity = match user.identity_id {
                        Some(id) => credentials::find_identity(&mut *tx, id).await?,
                        None => None,
                    };
                    let identity_id = match existing_identity {
                        Some(identity) => identity.id,
                        None => credentials::insert_identity(&mut *tx).await?,
                    };

                    if let Some(other) =
                        credentials::find_binding(&mut *tx, identity_id, user.channel).await?
                    {
                        return Err(AuthError::Conflict(format!(
                            "identity {} already has login {} on {}",
                            identity_id, other.login_name, user.channel
                        )));
                    }

                    let binding_id = credentials::insert_binding(
                        &mut *tx,
                        NewBinding {
                            identity_id,
                            channel: user.channel,
                            login_name: user.login_name,
                            password_hash: user.password_hash,
                            mail: user.mail,
                            phone: user.phone,
                        },
                    )
                    .await?;
                    (identity_id, binding_id, true)
                }
            };

        if already_recorded {
            tx.commit().await?;
            debug!(event_id, identity_id, binding_id, "user.created already recorded");
            return Ok(Registration {
                identity_id,
                binding_id,
                binding_created,
                event_appended: false,
            });
        }

        let payload = UserCreatedPayload {
            identity_id,
            channel: user.channel.to_string(),
            login_name: user.login_name.to_string(),
            password_hash: user.password_hash.to_string(),
            mail: user.mail.map(str::to_string),
            phone: user.phone.map(str::to_string),
        };
        let event = OutboxEvent::with_payload(
            event_id,
            USER_CREATED_EVENT,
            &self.routing_key,
            &self.origin,
            &payload,
        )?;

        let event_appended = match self.writer.append(&mut tx, &event).await {
            Ok(()) => true,
            Err(e) if e.is_duplicate() => {
                debug!(event_id, "user.created appended concurrently; committing anyway");
                false
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        info!(
            event_id,
            identity_id,
            binding_id,
            binding_created,
            channel = %user.channel,
            "Registered user"
        );

        Ok(Registration {
            identity_id,
            binding_id,
            binding_created,
            event_appended,
        })
    }
}
