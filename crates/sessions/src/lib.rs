//! Durable session and account state for agentdesk.
//!
//! Holds the CRM-tenant sessions (hashed credentials, access timestamps,
//! activity flag), their append-only chat message logs, saved chats, the
//! restoration matcher that decides when a prior session may be reused, the
//! sweeper that expires stale state, and the platform account store.

pub mod accounts;
pub mod chats;
pub mod crypto;
pub mod hasher;
pub mod lifecycle;
pub mod matcher;
pub mod store;
pub mod transcript;

pub use accounts::{
    AccountRole, AccountSession, AccountStats, AccountStore, AccountSummary, AdminSpec,
    CrmCredentials, ReconcileReport,
};
pub use chats::{ChatArchive, ChatOwner, SavedChat, SavedMessage};
pub use crypto::CredentialCipher;
pub use hasher::{normalize_endpoint, CredentialHasher};
pub use lifecycle::{SweepSummary, Sweeper};
pub use matcher::{MatchedBy, RestorationMatch, RestorationMatcher, RestorationQuery};
pub use store::{NewSession, SessionRecord, SessionStore, StoreStats, SweepReport};
pub use transcript::{ChatMessage, MessageLog, Role};
