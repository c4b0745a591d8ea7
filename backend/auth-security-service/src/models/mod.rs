/// Data models for credentials, sessions and registration
pub mod admin;
pub mod credential;
pub mod session;
pub mod user;

pub use admin::{Access, RevokeCommand};
pub use credential::{
    ChannelBinding, ChannelType, ClientKey, ClientKeyStatus, CredentialPair, Identity,
};
pub use session::{
    AccessTokenCheck, EncryptedChallenge, LoginOutcome, LoginRequest, MfaLoginRequest,
    RefreshRequest, TokenPair, TokenRecord, TokenState,
};
pub use user::{RegisterUserRequest, UserCreatedPayload};
