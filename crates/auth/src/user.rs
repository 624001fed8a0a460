//! Internally-owned user record mirroring a provider identity.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use folio_core::{DomainError, Email, SubjectId};

use crate::principal::ExternalIdentity;

/// A row of the `users` collection.
///
/// `id` always equals the provider subject id. `first_name`/`last_name` are
/// copied from provider metadata at provisioning time and never edited here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: SubjectId,
    pub email: Email,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// Build the record created on first sight of a provider identity.
    pub fn provision_from(identity: &ExternalIdentity) -> Result<Self, DomainError> {
        let email = identity
            .email
            .as_deref()
            .ok_or_else(|| DomainError::validation("provider identity has no email"))?;
        Ok(Self {
            id: identity.id.clone(),
            email: Email::parse(email)?,
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
        })
    }
}

/// Client-supplied changes to a user record.
///
/// Only `email` is locally editable; naming a provider-owned field is an error
/// even when the value is unchanged.
///
/// Read-only fields are `Some` whenever the key is present, `null` included.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub first_name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub last_name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl UserUpdate {
    /// Validate and return the new email, if any.
    pub fn validate(&self) -> Result<Option<Email>, DomainError> {
        if self.id.is_some() {
            return Err(DomainError::ReadOnly("id"));
        }
        if self.first_name.is_some() {
            return Err(DomainError::ReadOnly("first_name"));
        }
        if self.last_name.is_some() {
            return Err(DomainError::ReadOnly("last_name"));
        }
        self.email.as_deref().map(Email::parse).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: Option<&str>, first: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            id: SubjectId::parse("u-1").unwrap(),
            email: email.map(str::to_string),
            first_name: first.map(str::to_string),
            last_name: None,
        }
    }

    #[test]
    fn provisions_with_metadata_names() {
        let user = User::provision_from(&identity(Some("a@example.com"), Some("Jane"))).unwrap();
        assert_eq!(user.id.as_str(), "u-1");
        assert_eq!(user.email.as_str(), "a@example.com");
        assert_eq!(user.first_name.as_deref(), Some("Jane"));
        assert_eq!(user.last_name, None);
    }

    #[test]
    fn email_is_required() {
        assert!(User::provision_from(&identity(None, None)).is_err());
    }

    #[test]
    fn names_and_id_are_read_only() {
        let update: UserUpdate = serde_json::from_str(r#"{"first_name":"X"}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("first_name")));

        let update: UserUpdate = serde_json::from_str(r#"{"last_name":"Doe","email":"b@example.com"}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("last_name")));

        let update: UserUpdate = serde_json::from_str(r#"{"id":"u-2"}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("id")));
    }

    #[test]
    fn null_read_only_fields_are_still_rejected() {
        let update: UserUpdate = serde_json::from_str(r#"{"first_name":null}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("first_name")));

        let update: UserUpdate =
            serde_json::from_str(r#"{"email":"b@example.com","last_name":null}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("last_name")));

        let update: UserUpdate = serde_json::from_str(r#"{"id":null}"#).unwrap();
        assert_eq!(update.validate(), Err(DomainError::ReadOnly("id")));

        let update: UserUpdate = serde_json::from_str(r#"{"email":"b@example.com"}"#).unwrap();
        assert!(update.validate().is_ok());
    }

    #[test]
    fn email_update_is_validated() {
        let update: UserUpdate = serde_json::from_str(r#"{"email":" B@Example.com "}"#).unwrap();
        assert_eq!(update.validate().unwrap().unwrap().as_str(), "b@example.com");

        let update: UserUpdate = serde_json::from_str(r#"{"email":"nope"}"#).unwrap();
        assert!(update.validate().is_err());
    }
}
