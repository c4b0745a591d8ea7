/// Service layer for the credential and session engine
///
/// - Token lifecycle (issue, refresh, validate) and MFA challenges
/// - Session orchestration over both
/// - Administrative revocation, registration with outbox events, password recovery
pub mod admin;
pub mod email;
pub mod mfa;
pub mod recovery;
pub mod registration;
pub mod session;
pub mod token_manager;

pub use admin::AdminService;
pub use email::{Mailer, SmtpMailer};
pub use mfa::MfaChallengeEngine;
pub use recovery::PasswordRecoveryService;
pub use registration::{Registration, UserRegistrationService, USER_CREATED_EVENT};
pub use session::SessionService;
pub use token_manager::TokenManager;
