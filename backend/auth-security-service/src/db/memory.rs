//! In-memory stores for service unit tests.

use super::{CredentialStore, MfaSecretStore, TokenStore};
use crate::error::{AuthError, Result};
use crate::models::{
    ChannelBinding, ChannelType, ClientKey, ClientKeyStatus, CredentialPair, Identity,
    RevokeCommand, TokenRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct CredentialData {
    identities: HashMap<i64, Identity>,
    channels: HashMap<String, ChannelType>,
    bindings: Vec<ChannelBinding>,
    keys: HashMap<String, ClientKey>,
}

#[derive(Default)]
pub(crate) struct MemoryCredentialStore {
    data: Mutex<CredentialData>,
}

impl MemoryCredentialStore {
    pub fn add_identity(&self, id: i64) {
        self.data.lock().unwrap().identities.insert(
            id,
            Identity {
                id,
                revoked: false,
                created_at: Utc::now(),
            },
        );
    }

    pub fn add_channel(&self, name: &str) {
        self.data.lock().unwrap().channels.insert(
            name.to_string(),
            ChannelType {
                name: name.to_string(),
                revoked: false,
            },
        );
    }

    pub fn add_binding(&self, binding: ChannelBinding) {
        self.data.lock().unwrap().bindings.push(binding);
    }

    pub fn add_key(&self, key: ClientKey) {
        self.data.lock().unwrap().keys.insert(key.key.clone(), key);
    }

    pub fn binding(&self, id: i64) -> Option<ChannelBinding> {
        self.data
            .lock()
            .unwrap()
            .bindings
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    pub fn update_binding(&self, id: i64, f: impl FnOnce(&mut ChannelBinding)) {
        let mut data = self.data.lock().unwrap();
        if let Some(binding) = data.bindings.iter_mut().find(|b| b.id == id) {
            f(binding);
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_identity(&self, identity_id: i64) -> Result<Option<Identity>> {
        Ok(self.data.lock().unwrap().identities.get(&identity_id).cloned())
    }

    async fn find_channel_type(&self, channel: &str) -> Result<Option<ChannelType>> {
        Ok(self.data.lock().unwrap().channels.get(channel).cloned())
    }

    async fn find_binding(
        &self,
        identity_id: i64,
        channel: &str,
    ) -> Result<Option<ChannelBinding>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .bindings
            .iter()
            .find(|b| b.identity_id == identity_id && b.channel == channel)
            .cloned())
    }

    async fn find_binding_by_login(
        &self,
        channel: &str,
        login_name: &str,
    ) -> Result<Option<ChannelBinding>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .bindings
            .iter()
            .find(|b| b.channel == channel && b.login_name == login_name)
            .cloned())
    }

    async fn find_client_key(&self, key: &str) -> Result<Option<ClientKey>> {
        Ok(self.data.lock().unwrap().keys.get(key).cloned())
    }

    async fn find_mail_by_login(&self, login_name: &str) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .bindings
            .iter()
            .filter(|b| b.login_name == login_name)
            .find_map(|b| b.mail.clone().filter(|m| !m.is_empty())))
    }

    async fn update_password_by_login(
        &self,
        login_name: &str,
        password_hash: &str,
    ) -> Result<u64> {
        let mut data = self.data.lock().unwrap();
        let mut updated = 0;
        for binding in data.bindings.iter_mut().filter(|b| b.login_name == login_name) {
            binding.password_hash = password_hash.to_string();
            updated += 1;
        }
        Ok(updated)
    }

    async fn apply_revocation(&self, command: &RevokeCommand) -> Result<u64> {
        let revoked = command.access().revoked();
        let mut data = self.data.lock().unwrap();

        let updated = match command {
            RevokeCommand::Identity { identity_id, .. } => {
                data.identities
                    .get_mut(identity_id)
                    .map(|i| i.revoked = revoked)
                    .is_some() as u64
            }
            RevokeCommand::ChannelType { channel, .. } => {
                data.channels
                    .get_mut(channel)
                    .map(|c| c.revoked = revoked)
                    .is_some() as u64
            }
            RevokeCommand::Binding {
                identity_id,
                channel,
                ..
            } => data
                .bindings
                .iter_mut()
                .find(|b| b.identity_id == *identity_id && &b.channel == channel)
                .map(|b| b.revoked = revoked)
                .is_some() as u64,
            RevokeCommand::ClientKey {
                key, expires_at, ..
            } => data
                .keys
                .get_mut(key)
                .map(|k| {
                    k.status = if revoked {
                        ClientKeyStatus::Inactive
                    } else {
                        ClientKeyStatus::Active
                    };
                    if let Some(expires_at) = expires_at {
                        k.expires_at = *expires_at;
                    }
                })
                .is_some() as u64,
        };

        Ok(updated)
    }

    async fn create_channel_type(&self, channel: &str) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        if data.channels.contains_key(channel) {
            return Err(AuthError::Conflict("channel_types_pkey".into()));
        }
        data.channels.insert(
            channel.to_string(),
            ChannelType {
                name: channel.to_string(),
                revoked: false,
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryTokenStore {
    current: Mutex<HashMap<CredentialPair, TokenRecord>>,
    history: Mutex<Vec<TokenRecord>>,
}

fn pair_of(record: &TokenRecord) -> CredentialPair {
    CredentialPair::new(record.client_key.clone(), record.binding_id)
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn current(&self, pair: &CredentialPair) -> Result<Option<TokenRecord>> {
        Ok(self.current.lock().unwrap().get(pair).cloned())
    }

    async fn replace(&self, record: &TokenRecord) -> Result<()> {
        let previous = self
            .current
            .lock()
            .unwrap()
            .insert(pair_of(record), record.clone());
        if let Some(previous) = previous {
            self.history.lock().unwrap().push(previous);
        }
        Ok(())
    }

    async fn rotate_access(&self, expected: &TokenRecord, next: &TokenRecord) -> Result<bool> {
        let mut current = self.current.lock().unwrap();
        let Some(stored) = current.get_mut(&pair_of(expected)) else {
            return Ok(false);
        };
        if stored.access_token != expected.access_token
            || stored.refresh_token != expected.refresh_token
        {
            return Ok(false);
        }
        let previous = std::mem::replace(stored, next.clone());
        self.history.lock().unwrap().push(previous);
        Ok(true)
    }

    async fn history(&self, pair: &CredentialPair) -> Result<Vec<TokenRecord>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &pair_of(r) == pair)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryMfaSecretStore {
    secrets: Mutex<HashMap<CredentialPair, String>>,
}

#[async_trait]
impl MfaSecretStore for MemoryMfaSecretStore {
    async fn find(&self, pair: &CredentialPair) -> Result<Option<String>> {
        Ok(self.secrets.lock().unwrap().get(pair).cloned())
    }

    async fn get_or_create(
        &self,
        pair: &CredentialPair,
        candidate: &str,
    ) -> Result<(String, bool)> {
        let mut secrets = self.secrets.lock().unwrap();
        match secrets.get(pair) {
            Some(existing) => Ok((existing.clone(), false)),
            None => {
                secrets.insert(pair.clone(), candidate.to_string());
                Ok((candidate.to_string(), true))
            }
        }
    }
}
