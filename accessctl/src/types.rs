//! Common type definitions.
//!
//! All entity IDs are `BIGSERIAL` keys wrapped in type aliases so signatures read by intent:
//!
//! - [`UserId`]: principal (user account) identifier
//! - [`RoleId`]: role identifier
//! - [`UserRoleId`]: role assignment identifier

// Type aliases for IDs
pub type UserId = i64;
pub type RoleId = i64;
pub type UserRoleId = i64;

/// Name of the role that gates the administrative API.
pub const ADMIN_ROLE: &str = "ADMIN";

/// Normalize a role name for comparison and display. Role names are case-insensitive.
pub fn normalize_role_name(name: &str) -> String {
    name.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_role_name() {
        assert_eq!(normalize_role_name("admin"), "ADMIN");
        assert_eq!(normalize_role_name("  Auditor "), "AUDITOR");
        assert_eq!(normalize_role_name("ADMIN"), ADMIN_ROLE);
    }
}
