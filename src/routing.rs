//! Override/base routing of callout policies onto proxy flows.
//!
//! The decision is made once per run and then expanded into an explicit
//! injection plan, so the injection loop never branches on routing mode.
use crate::error::{AugmentError, Result};
use crate::flow::{inject_at_head, Direction, FlowDocument, FlowRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Request/response names applied together: callout policies, or the shared
/// flows those policies call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyPair {
    pub request: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// No overrides: the base pair runs through `PreFlow`/`PostFlow` only.
    Global { base: PolicyPair },
    /// Every conditional flow gets either the override or the base pair.
    /// `PreFlow`/`PostFlow` are left alone.
    PerFlow {
        base: PolicyPair,
        overrides: PolicyPair,
        flows: BTreeSet<String>,
    },
}

/// Steps to prepend, grouped per flow in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InjectionPlan {
    pub flows: Vec<FlowInjections>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowInjections {
    pub flow: FlowRef,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub policy: String,
    pub direction: Direction,
}

impl RoutingDecision {
    /// Pick the routing mode. Override names require an override pair.
    pub fn decide(
        base: PolicyPair,
        overrides: Option<PolicyPair>,
        override_flows: &[String],
    ) -> Result<Self> {
        let flows: BTreeSet<String> = override_flows
            .iter()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect();
        if flows.is_empty() {
            return Ok(RoutingDecision::Global { base });
        }
        let Some(overrides) = overrides else {
            return Err(AugmentError::MissingOverridePolicies {
                flows: flows.into_iter().collect(),
            });
        };
        Ok(RoutingDecision::PerFlow {
            base,
            overrides,
            flows,
        })
    }

    pub fn mode(&self) -> &'static str {
        match self {
            RoutingDecision::Global { .. } => "global",
            RoutingDecision::PerFlow { .. } => "per-flow",
        }
    }

    /// Override names that match none of `flow_names`.
    pub fn unmatched_overrides(&self, flow_names: &[String]) -> Vec<String> {
        match self {
            RoutingDecision::Global { .. } => Vec::new(),
            RoutingDecision::PerFlow { flows, .. } => flows
                .iter()
                .filter(|name| !flow_names.contains(name))
                .cloned()
                .collect(),
        }
    }

    /// Expand the decision against the document's conditional flow names.
    pub fn plan(&self, flow_names: &[String]) -> InjectionPlan {
        match self {
            RoutingDecision::Global { base } => InjectionPlan {
                flows: vec![
                    FlowInjections::single(FlowRef::PreFlow, &base.request, Direction::Request),
                    FlowInjections::single(FlowRef::PostFlow, &base.response, Direction::Response),
                ],
            },
            RoutingDecision::PerFlow {
                base,
                overrides,
                flows,
            } => InjectionPlan {
                flows: flow_names
                    .iter()
                    .map(|name| {
                        let pair = if flows.contains(name) { overrides } else { base };
                        FlowInjections {
                            flow: FlowRef::Conditional(name.clone()),
                            steps: vec![
                                PlannedStep {
                                    policy: pair.request.clone(),
                                    direction: Direction::Request,
                                },
                                PlannedStep {
                                    policy: pair.response.clone(),
                                    direction: Direction::Response,
                                },
                            ],
                        }
                    })
                    .collect(),
            },
        }
    }
}

impl FlowInjections {
    fn single(flow: FlowRef, policy: &str, direction: Direction) -> Self {
        FlowInjections {
            flow,
            steps: vec![PlannedStep {
                policy: policy.to_string(),
                direction,
            }],
        }
    }
}

impl InjectionPlan {
    /// Prepend every planned step; stops at the first failure.
    pub fn apply(&self, doc: &mut FlowDocument) -> Result<()> {
        for entry in &self.flows {
            for step in &entry.steps {
                inject_at_head(doc, &entry.flow, step.direction, &step.policy)?;
            }
        }
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.flows.iter().map(|entry| entry.steps.len()).sum()
    }
}
