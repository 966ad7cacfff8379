//! Access control: the tiered policy, caller resolution and signed tokens.

pub mod caller;
pub mod policy;
pub mod token;

pub use caller::{Admin, Caller, Member, SESSION_COOKIE_NAME};
pub use policy::{authorize_unit, evaluate, Access, Subject, Viewer};
pub use token::TokenSigner;
