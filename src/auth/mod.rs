pub mod jwt;
pub mod middleware;

use serde::Serialize;

use crate::auth::jwt::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Editor,
    /// May edit schedules, but only with approved content.
    Contributor,
    Viewer,
}

impl Role {
    fn parse(role: &str) -> Role {
        match role {
            "admin" => Role::Admin,
            "editor" => Role::Editor,
            "contributor" => Role::Contributor,
            _ => Role::Viewer,
        }
    }
}

/// The authenticated caller, scoped to one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub user_id: i32,
    pub tenant_id: i32,
    pub role: Role,
}

impl Actor {
    pub fn is_editor(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Editor | Role::Contributor)
    }

    pub fn requires_content_approval(&self) -> bool {
        self.role == Role::Contributor
    }
}

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Actor {
            user_id: claims.user_id,
            tenant_id: claims.tenant_id,
            role: Role::parse(&claims.role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        let actor = |role: &str| {
            Actor::from(&Claims {
                sub: "u".into(),
                user_id: 1,
                tenant_id: 1,
                role: role.into(),
                exp: 0,
            })
        };

        assert!(actor("admin").is_editor());
        assert!(!actor("admin").requires_content_approval());
        assert!(actor("contributor").is_editor());
        assert!(actor("contributor").requires_content_approval());
        assert!(!actor("viewer").is_editor());
        assert_eq!(actor("something-else").role, Role::Viewer);
    }
}
