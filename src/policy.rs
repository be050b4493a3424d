//! Flow-callout policy rendering.
//!
//! A callout policy is a small XML document that hands control to a shared
//! flow. Rendering is pure; writing the result into a bundle is the packager's
//! job.
use crate::error::{AugmentError, Result};
use quick_xml::escape::escape;
use regex::Regex;
use std::sync::OnceLock;

/// A rendered policy ready to be written as `<name>.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub text: String,
}

impl Policy {
    pub fn file_name(&self) -> String {
        format!("{}.xml", self.name)
    }
}

/// Render a `FlowCallout` policy named `policy_name` that invokes `shared_flow`.
pub fn render_flow_callout(policy_name: &str, shared_flow: &str) -> Result<Policy> {
    let shared_flow = shared_flow.trim();
    if shared_flow.is_empty() {
        return Err(AugmentError::EmptySharedFlow {
            policy: policy_name.to_string(),
        });
    }
    let name = escape(policy_name);
    let flow = escape(shared_flow);
    let text = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <FlowCallout continueOnError=\"false\" enabled=\"true\" name=\"{name}\">\n\
         <DisplayName>{name}</DisplayName>\n\
         <Parameters/>\n\
         <SharedFlowBundle>{flow}</SharedFlowBundle>\n\
         </FlowCallout>\n"
    );
    Ok(Policy {
        name: policy_name.to_string(),
        text,
    })
}

/// Check that a policy name is usable both as a step reference and a file name.
pub fn validate_policy_name(name: &str) -> Result<()> {
    static NAME: OnceLock<Regex> = OnceLock::new();
    let pattern =
        NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("regex for policy names"));
    if !pattern.is_match(name) || name.starts_with('.') {
        return Err(AugmentError::InvalidPolicyName {
            name: name.to_string(),
        });
    }
    Ok(())
}
