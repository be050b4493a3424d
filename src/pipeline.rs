//! One augmentation run over a bundle archive.
//!
//! Stages run strictly in order and the first failure ends the run: unpack,
//! render and write the callout policies, load the proxy document, route and
//! inject, save, repack. A failed run may leave the working directory behind.
use crate::bundle::Bundle;
use crate::flow::FlowDocument;
use crate::policy::{render_flow_callout, Policy};
use crate::routing::{InjectionPlan, PolicyPair, RoutingDecision};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AugmentOptions {
    pub archive: PathBuf,
    /// Defaults to the archive path without its extension.
    pub work_dir: Option<PathBuf>,
    /// Defaults to overwriting `archive`.
    pub output: Option<PathBuf>,
    /// Shared flows called by the base callouts.
    pub base_flows: PolicyPair,
    /// Shared flows called by the override callouts.
    pub override_flows: Option<PolicyPair>,
    /// Conditional flows routed to the override callouts.
    pub override_names: Vec<String>,
    pub base_policies: PolicyPair,
    pub override_policies: PolicyPair,
}

#[derive(Debug, Clone, Serialize)]
pub struct AugmentReport {
    pub archive: PathBuf,
    pub work_dir: PathBuf,
    pub mode: &'static str,
    pub policies: Vec<String>,
    pub flows: Vec<String>,
    pub unmatched_overrides: Vec<String>,
    pub plan: InjectionPlan,
}

pub fn augment(options: &AugmentOptions) -> Result<AugmentReport> {
    let start = Instant::now();
    let decision = RoutingDecision::decide(
        options.base_policies.clone(),
        options
            .override_flows
            .as_ref()
            .map(|_| options.override_policies.clone()),
        &options.override_names,
    )?;

    let bundle = match &options.work_dir {
        Some(work_dir) => Bundle::unpack_into(&options.archive, work_dir),
        None => Bundle::unpack(&options.archive),
    }
    .with_context(|| format!("unpack {}", options.archive.display()))?;
    let work_dir = bundle.root().to_path_buf();

    let mut policies = render_pair(&options.base_policies, &options.base_flows)?;
    if let (RoutingDecision::PerFlow { overrides, .. }, Some(flows)) =
        (&decision, &options.override_flows)
    {
        policies.extend(render_pair(overrides, flows)?);
    }
    for policy in &policies {
        bundle
            .write_policy(policy)
            .with_context(|| format!("write policy {}", policy.name))?;
    }

    let document_path = bundle
        .proxy_document_path()
        .context("locate proxy document")?;
    let mut doc = FlowDocument::load(&document_path)?;
    let flows = doc.flow_names();
    let unmatched_overrides = decision.unmatched_overrides(&flows);
    if !unmatched_overrides.is_empty() {
        tracing::info!(names = ?unmatched_overrides, "override names match no conditional flow");
    }

    let plan = decision.plan(&flows);
    plan.apply(&mut doc)
        .with_context(|| format!("inject steps into {}", document_path.display()))?;
    doc.save(&document_path)?;
    tracing::info!(
        mode = decision.mode(),
        flows = flows.len(),
        steps = plan.step_count(),
        "injected callout steps"
    );

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| options.archive.clone());
    bundle
        .repack(&output)
        .with_context(|| format!("repack {}", output.display()))?;

    let elapsed_ms = start.elapsed().as_millis();
    tracing::info!(elapsed_ms, archive = %output.display(), "augmentation complete");
    Ok(AugmentReport {
        archive: output,
        work_dir,
        mode: decision.mode(),
        policies: policies.into_iter().map(|policy| policy.name).collect(),
        flows,
        unmatched_overrides,
        plan,
    })
}

fn render_pair(policies: &PolicyPair, shared_flows: &PolicyPair) -> Result<Vec<Policy>> {
    Ok(vec![
        render_flow_callout(&policies.request, &shared_flows.request)?,
        render_flow_callout(&policies.response, &shared_flows.response)?,
    ])
}
