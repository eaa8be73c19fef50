//! Inbound heartbeat validation (§4.2), applied before any persistence I/O.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dto::MeshAgentRegistration;
use crate::error::AppError;
use crate::model::{agent_id_pattern, AgentType, VersionConstraint};

static AGENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(agent_id_pattern()).unwrap());

pub fn validate_registration(req: &MeshAgentRegistration) -> Result<(), AppError> {
    if !AGENT_ID_RE.is_match(&req.agent_id) {
        return Err(AppError::Validation(format!(
            "agent_id '{}' does not match pattern {}",
            req.agent_id,
            agent_id_pattern()
        )));
    }

    AgentType::parse(&req.agent_type).map_err(AppError::Validation)?;

    if req.tools.is_empty() {
        return Err(AppError::Validation("tools must have at least one entry".to_string()));
    }

    for tool in &req.tools {
        if tool.function_name.trim().is_empty() {
            return Err(AppError::Validation("tool function_name must not be empty".to_string()));
        }
        if tool.capability.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "tool '{}' has an empty capability",
                tool.function_name
            )));
        }
        for dep in &tool.dependencies {
            if dep.capability.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "dependency of tool '{}' has an empty capability",
                    tool.function_name
                )));
            }
            if let Some(constraint) = &dep.version {
                VersionConstraint::parse(constraint).map_err(AppError::Validation)?;
            }
        }
    }

    Ok(())
}

pub fn validate_trace_id(trace_id: &str) -> Result<(), AppError> {
    if !AGENT_ID_RE.is_match(trace_id) {
        return Err(AppError::Validation(format!(
            "trace_id '{trace_id}' does not match pattern {}",
            agent_id_pattern()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{MeshToolDependencyRegistration, MeshToolRegistration};

    fn base_request() -> MeshAgentRegistration {
        MeshAgentRegistration {
            agent_id: "hello".to_string(),
            agent_type: "mcp_agent".to_string(),
            name: "hello".to_string(),
            version: "1.0.0".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 0,
            timestamp: None,
            namespace: "default".to_string(),
            tools: vec![MeshToolRegistration {
                function_name: "greet".to_string(),
                capability: "greeting".to_string(),
                version: "1.0.0".to_string(),
                tags: vec![],
                dependencies: vec![],
                description: None,
                kwargs: None,
            }],
        }
    }

    #[test]
    fn rejects_bad_agent_id() {
        let mut req = base_request();
        req.agent_id = "not a valid id!".to_string();
        assert!(validate_registration(&req).is_err());
    }

    #[test]
    fn rejects_empty_tools() {
        let mut req = base_request();
        req.tools.clear();
        assert!(validate_registration(&req).is_err());
    }

    #[test]
    fn rejects_unknown_agent_type() {
        let mut req = base_request();
        req.agent_type = "rogue_agent".to_string();
        assert!(validate_registration(&req).is_err());
    }

    #[test]
    fn rejects_unparseable_version_constraint() {
        let mut req = base_request();
        req.tools[0].dependencies.push(MeshToolDependencyRegistration {
            capability: "date_service".to_string(),
            version: Some("not-a-constraint".to_string()),
            tags: vec![],
            namespace: None,
        });
        assert!(validate_registration(&req).is_err());
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate_registration(&base_request()).is_ok());
    }
}
