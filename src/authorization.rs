//! Role-based authorization
//!
//! Closed role -> scope mapping. Unknown roles are a typed error, not a
//! silent lookup miss.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    ApplicationRead,
    ApplicationCreate,
    ApplicationMoveStage,
    ApplicationClose,
    WorkflowRead,
    WorkflowWrite,
    ReportingRead,
    AuditRead,
    ComplianceExport,
    CandidateRead,
    CandidateCreate,
    CandidateUpdate,
}

pub const ALL_SCOPES: &[Scope] = &[
    Scope::ApplicationRead,
    Scope::ApplicationCreate,
    Scope::ApplicationMoveStage,
    Scope::ApplicationClose,
    Scope::WorkflowRead,
    Scope::WorkflowWrite,
    Scope::ReportingRead,
    Scope::AuditRead,
    Scope::ComplianceExport,
    Scope::CandidateRead,
    Scope::CandidateCreate,
    Scope::CandidateUpdate,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Recruiter,
    HrAdmin,
    Auditor,
    StageOperator,
    PlatformAdmin,
}

impl Role {
    /// Scopes granted to this role. PlatformAdmin holds every defined scope.
    pub fn scopes(self) -> &'static [Scope] {
        match self {
            Role::Recruiter => &[
                Scope::ApplicationRead,
                Scope::ApplicationCreate,
                Scope::ApplicationMoveStage,
                Scope::ApplicationClose,
                Scope::WorkflowRead,
                Scope::ReportingRead,
                Scope::CandidateRead,
                Scope::CandidateCreate,
                Scope::CandidateUpdate,
            ],
            Role::HrAdmin => &[
                Scope::ApplicationRead,
                Scope::ApplicationCreate,
                Scope::ApplicationMoveStage,
                Scope::ApplicationClose,
                Scope::WorkflowRead,
                Scope::WorkflowWrite,
                Scope::ReportingRead,
                Scope::ComplianceExport,
                Scope::CandidateRead,
                Scope::CandidateCreate,
                Scope::CandidateUpdate,
            ],
            Role::Auditor => &[
                Scope::AuditRead,
                Scope::ReportingRead,
                Scope::ComplianceExport,
                Scope::ApplicationRead,
                Scope::CandidateRead,
            ],
            Role::StageOperator => &[Scope::ApplicationRead, Scope::ApplicationMoveStage],
            Role::PlatformAdmin => ALL_SCOPES,
        }
    }

    pub fn has_scope(self, scope: Scope) -> bool {
        self.scopes().contains(&scope)
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "recruiter" => Ok(Role::Recruiter),
            "hr_admin" => Ok(Role::HrAdmin),
            "auditor" => Ok(Role::Auditor),
            "stage_operator" => Ok(Role::StageOperator),
            "platform_admin" => Ok(Role::PlatformAdmin),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// Typed scope check for callers that resolved a role upstream.
pub fn require_scope(role: Role, scope: Scope) -> Result<(), CoreError> {
    if role.has_scope(scope) {
        Ok(())
    } else {
        Err(CoreError::MissingScope(format!("{:?}", scope)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_is_typed_error() {
        let err = "superuser".parse::<Role>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownRole(r) if r == "superuser"));
    }

    #[test]
    fn test_platform_admin_has_all_scopes() {
        for scope in ALL_SCOPES {
            assert!(Role::PlatformAdmin.has_scope(*scope));
        }
    }

    #[test]
    fn test_stage_operator_is_narrow() {
        assert!(Role::StageOperator.has_scope(Scope::ApplicationMoveStage));
        assert!(!Role::StageOperator.has_scope(Scope::ComplianceExport));
        assert!(require_scope(Role::StageOperator, Scope::WorkflowWrite).is_err());
    }

    #[test]
    fn test_auditor_is_read_only() {
        assert!(Role::Auditor.has_scope(Scope::AuditRead));
        assert!(Role::Auditor.has_scope(Scope::ComplianceExport));
        assert!(!Role::Auditor.has_scope(Scope::ApplicationMoveStage));
    }
}
