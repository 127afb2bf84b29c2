use serde::{Deserialize, Serialize};

/// Cached projection of the server-side identity.
///
/// Kept in the credential store so the UI has something to show before the
/// server answers. It is never authoritative: roles read from here are for
/// display and optimistic gating only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserSnapshot {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_balance: Option<f64>,
}

impl UserSnapshot {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_user() {
        let json = r#"{"id": 7, "name": "Ada", "email": "ada@example.com", "role": "member", "creditBalance": 12.5, "createdAt": "2024-01-01"}"#;
        let user: UserSnapshot = serde_json::from_str(json).expect("user should parse");
        assert_eq!(user.id, 7);
        assert_eq!(user.credit_balance, Some(12.5));
        assert!(user.has_role("MEMBER"));
        assert!(!user.is_admin());
    }

    #[test]
    fn test_credit_balance_optional() {
        let json = r#"{"id": 1, "name": "Root", "email": "root@example.com", "role": "admin"}"#;
        let user: UserSnapshot = serde_json::from_str(json).expect("user should parse");
        assert_eq!(user.credit_balance, None);
        assert!(user.is_admin());

        let encoded = serde_json::to_string(&user).unwrap();
        assert!(!encoded.contains("creditBalance"));
    }
}
