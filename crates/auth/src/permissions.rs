use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permission identifier.
///
/// A closed set shared by the application and database layers. The string
/// form (`"content.update.others"`) is what travels in token claims and what
/// the generated `app_permission` SQL enum contains.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "content.create")]
    ContentCreate,
    #[serde(rename = "content.read")]
    ContentRead,
    #[serde(rename = "content.update")]
    ContentUpdate,
    #[serde(rename = "content.delete")]
    ContentDelete,
    #[serde(rename = "content.update.others")]
    ContentUpdateOthers,
    #[serde(rename = "content.delete.others")]
    ContentDeleteOthers,
    #[serde(rename = "comment.create")]
    CommentCreate,
    #[serde(rename = "comment.read")]
    CommentRead,
    #[serde(rename = "comment.update")]
    CommentUpdate,
    #[serde(rename = "comment.delete")]
    CommentDelete,
    #[serde(rename = "comment.update.others")]
    CommentUpdateOthers,
    #[serde(rename = "comment.delete.others")]
    CommentDeleteOthers,
    /// Gates every administrative capability.
    #[serde(rename = "user.manage")]
    UserManage,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl Permission {
    pub const ALL: [Permission; 13] = [
        Permission::ContentCreate,
        Permission::ContentRead,
        Permission::ContentUpdate,
        Permission::ContentDelete,
        Permission::ContentUpdateOthers,
        Permission::ContentDeleteOthers,
        Permission::CommentCreate,
        Permission::CommentRead,
        Permission::CommentUpdate,
        Permission::CommentDelete,
        Permission::CommentUpdateOthers,
        Permission::CommentDeleteOthers,
        Permission::UserManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ContentCreate => "content.create",
            Permission::ContentRead => "content.read",
            Permission::ContentUpdate => "content.update",
            Permission::ContentDelete => "content.delete",
            Permission::ContentUpdateOthers => "content.update.others",
            Permission::ContentDeleteOthers => "content.delete.others",
            Permission::CommentCreate => "comment.create",
            Permission::CommentRead => "comment.read",
            Permission::CommentUpdate => "comment.update",
            Permission::CommentDelete => "comment.delete",
            Permission::CommentUpdateOthers => "comment.update.others",
            Permission::CommentDeleteOthers => "comment.delete.others",
            Permission::UserManage => "user.manage",
        }
    }

    /// Resource family (`content`, `comment`, `user`).
    pub fn category(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }

    /// True for the cross-owner variants (`*.update.others`, `*.delete.others`).
    pub fn is_cross_owner(&self) -> bool {
        self.as_str().ends_with(".others")
    }

    pub fn description(&self) -> String {
        if *self == Permission::UserManage {
            return "Manage users, roles and the permission policy".to_string();
        }
        let mut parts = self.as_str().split('.');
        let resource = parts.next().unwrap_or_default();
        let action = match parts.next().unwrap_or_default() {
            "create" => "Create",
            "read" => "View",
            "update" => "Edit",
            "delete" => "Delete",
            other => other,
        };
        if self.is_cross_owner() {
            format!("{action} {resource} owned by others")
        } else {
            format!("{action} {resource}")
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}
