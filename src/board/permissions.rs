//! Role-based capability checks for project routes.

use anyhow::Result;
use taskboard_common::Role;

use super::db::BoardDb;
use crate::errors::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Read the project, its tasks and its board.
    View,
    /// Create, edit, move and delete tasks; edit project details.
    Edit,
    /// Manage members and delete the project.
    Manage,
}

impl Capability {
    pub fn allows(self, role: Role) -> bool {
        match self {
            Self::View => true,
            Self::Edit => matches!(role, Role::Owner | Role::Editor),
            Self::Manage => role == Role::Owner,
        }
    }
}

impl BoardDb {
    /// The caller's role in the project, provided it grants `capability`.
    ///
    /// A missing project is `ProjectNotFound`; an existing project the caller
    /// has no (or too weak a) membership in is `PermissionDenied`.
    pub fn authorize(&self, user_id: &str, project_id: &str, capability: Capability) -> Result<Role> {
        match self.role_for(user_id, project_id)? {
            Some(role) if capability.allows(role) => Ok(role),
            Some(_) => Err(BoardError::PermissionDenied.into()),
            None if self.get_project(project_id)?.is_none() => Err(BoardError::ProjectNotFound {
                id: project_id.to_string(),
            }
            .into()),
            None => Err(BoardError::PermissionDenied.into()),
        }
    }
}
