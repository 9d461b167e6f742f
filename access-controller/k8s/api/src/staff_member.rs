use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A foundation staff member who is granted privileged access to every
/// project workspace.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "maintainer-d.cncf.io",
    version = "v1alpha1",
    kind = "StaffMember",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StaffMemberSpec {
    pub display_name: Option<String>,
    #[serde(default)]
    pub primary_email: String,
    pub github_account: Option<String>,
}

/// Outcome of the most recent sweep triggered by a staff member.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// Every workspace binding was updated.
    Success,
    /// Some, but not all, workspace bindings were updated.
    Partial,
    /// No workspace binding could be updated.
    Error,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidSyncStatus(String);

// === impl StaffMember ===

impl StaffMember {
    /// The member's email, if it is usable as an identity.
    pub fn email(&self) -> Option<&str> {
        let email = self.spec.primary_email.trim();
        if email.is_empty() {
            return None;
        }
        Some(email)
    }
}

// === impl SyncStatus ===

impl SyncStatus {
    /// Classifies a sweep from the number of workspaces that failed out of
    /// the number attempted.
    pub fn from_counts(failed: usize, total: usize) -> Self {
        if failed == 0 {
            Self::Success
        } else if failed < total {
            Self::Partial
        } else {
            Self::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = InvalidSyncStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "error" => Ok(Self::Error),
            s => Err(InvalidSyncStatus(s.to_string())),
        }
    }
}

impl fmt::Display for InvalidSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sync status: {}", self.0)
    }
}

impl std::error::Error for InvalidSyncStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(email: &str) -> StaffMember {
        StaffMember::new(
            "staff",
            StaffMemberSpec {
                primary_email: email.to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn email_requires_content() {
        assert_eq!(member("a@x.io").email(), Some("a@x.io"));
        assert_eq!(member(" b@y.io ").email(), Some("b@y.io"));
        assert_eq!(member("").email(), None);
        assert_eq!(member("   ").email(), None);
    }

    #[test]
    fn status_from_counts() {
        assert_eq!(SyncStatus::from_counts(0, 0), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(0, 3), SyncStatus::Success);
        assert_eq!(SyncStatus::from_counts(1, 3), SyncStatus::Partial);
        assert_eq!(SyncStatus::from_counts(3, 3), SyncStatus::Error);
    }

    #[test]
    fn status_strings() {
        for status in [SyncStatus::Success, SyncStatus::Partial, SyncStatus::Error] {
            assert_eq!(status.to_string().parse::<SyncStatus>(), Ok(status));
        }
        assert!("ok".parse::<SyncStatus>().is_err());
    }
}
