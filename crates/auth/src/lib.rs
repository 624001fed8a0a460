//! `folio-auth`: pure authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: everything here is a function of its
//! inputs (token text, cookie header, policy snapshot).

pub mod access;
pub mod authorize;
pub mod claims;
pub mod cookies;
pub mod hook;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod rls;
pub mod roles;
pub mod route_guard;
pub mod user;

pub use access::{AccessDenied, AccessRequest, CollectionAccess, Operation, UsersAccess};
pub use authorize::{authorize, explain_authorization, AuthzError, RbacRegistry};
pub use claims::{decode_claims, try_decode_claims, Claims, ClaimsError};
pub use cookies::{parse_cookie_header, session_cookies, RequestCookie};
pub use hook::{compute_claims, AccessTokenHookEvent, InjectedClaims};
pub use permissions::{Permission, UnknownPermission};
pub use policy::{PolicyDrift, PolicySnapshot, SEED};
pub use principal::{ExternalIdentity, IdentityRecord, SESSION_STRATEGY, USERS_COLLECTION};
pub use roles::{Role, UnknownRole};
pub use route_guard::{classify, decide, GuardDecision, PathClass};
pub use user::{User, UserUpdate};
