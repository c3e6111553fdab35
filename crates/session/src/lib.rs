mod deny;
mod model;
mod store;

pub use deny::{normalize_vault_path, DenyMatcher};
pub use model::{
    BashPolicy, ChatType, LinkedBotChat, PairingRequest, PairingStatus, ResumeInfo, Session,
    SessionPermissions, SessionSource, TitleSource, TrustLevel,
};
pub use store::{SessionStore, SessionStoreError};
