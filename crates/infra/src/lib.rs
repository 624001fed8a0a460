//! Infrastructure layer: DB, migrations, identity provider, config.

pub mod config;
pub mod db;
pub mod hook;
pub mod identity;
pub mod migrations;
pub mod provisioning;

pub use config::{AppConfig, ConfigError};
pub use db::{DbScope, StoreError};
pub use hook::{HookError, StoreTokenHook, TokenHook, WebhookVerifier};
pub use identity::{IdentityProvider, ProviderError, ProviderSession, ProviderUser};
pub use migrations::{MigrationError, Migrator};
pub use provisioning::{ProvisioningError, ProvisioningService};
