//! Command handlers: merge flags over config, call into the core, print.
use crate::apigee::ManagementClient;
use crate::auth::{GcloudToken, StaticToken, TokenSource};
use crate::bundle::Bundle;
use crate::cli::{
    AugmentArgs, AuthArgs, Command, DeploymentArgs, FetchArgs, FlowsArgs, InjectArgs,
    PrepareArgs, RootArgs, RoutingArgs, UploadArgs, ValidateArgs,
};
use crate::config::{load_config, validate_config, Config, ENV_ACCESS_TOKEN};
use crate::flow::{inject_at_head, Direction, FlowDocument, FlowEntry, FlowRef};
use crate::pipeline::{augment, AugmentOptions, AugmentReport};
use crate::policy::render_flow_callout;
use crate::routing::PolicyPair;
use crate::scaffold::{run_scaffold, ScaffoldRequest};
use crate::storage::{object_key, GcsStore, ObjectStore};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::PathBuf;

pub fn run(args: RootArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    match args.command {
        Command::Prepare(args) => run_prepare(&args, config),
        Command::Augment(args) => run_augment(&args, config),
        Command::Inject(args) => run_inject(&args),
        Command::Flows(args) => run_flows(&args),
        Command::Validate(args) => run_validate(&args, &config),
        Command::Deploy(args) => run_deployment(&args, &config, true),
        Command::Undeploy(args) => run_deployment(&args, &config, false),
        Command::Fetch(args) => run_fetch(&args, &config),
        Command::Upload(args) => run_upload(&args, &config),
    }
}

fn run_prepare(args: &PrepareArgs, config: Config) -> Result<()> {
    let config = merge_routing(config, &args.routing)?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("create {}", args.out_dir.display()))?;
    let tokens = token_source(&args.auth);
    let token = if args.pass_token {
        Some(tokens.token().context("obtain access token for scaffolding")?)
    } else {
        None
    };
    let request = scaffold_request(args, token);
    let archive = run_scaffold(&config.apigeecli, &request, &args.out_dir)
        .context("scaffold proxy bundle")?;

    let options = augment_options(&config, archive.clone(), None, None)?;
    let report = augment(&options)?;

    if args.skip_validate {
        tracing::info!("skipping management API validation");
    } else {
        let bytes = fs::read(&archive).with_context(|| format!("read {}", archive.display()))?;
        let client = ManagementClient::new(&config.api_url, &args.org, tokens.as_ref());
        let response = client
            .validate(&args.name, &bytes)
            .with_context(|| format!("validate {}", args.name))?;
        tracing::info!(response = %response, "bundle validated");
    }

    if let Some(bucket) = &args.upload_bucket {
        let key = object_key(args.upload_prefix.as_deref(), &args.name);
        let store = GcsStore::new(&config.storage_url, tokens.as_ref());
        store
            .upload(&archive, bucket, &key)
            .with_context(|| format!("upload {}", archive.display()))?;
    }

    print_report(&report, args.json)
}

/// Without an explicit token the tool is told to resolve its own credentials,
/// keeping the bearer token off its command line.
fn scaffold_request(args: &PrepareArgs, token: Option<String>) -> ScaffoldRequest {
    ScaffoldRequest {
        name: args.name.clone(),
        base_path: args.base_path.clone(),
        oas_dir: args.oas_dir.clone(),
        oas_file: args.oas_file.clone(),
        org: args.org.clone(),
        target_url: args.target_url.clone(),
        default_token: token.is_none(),
        token,
    }
}

fn run_augment(args: &AugmentArgs, config: Config) -> Result<()> {
    let config = merge_routing(config, &args.routing)?;
    let options = augment_options(
        &config,
        args.archive.clone(),
        args.work_dir.clone(),
        args.output.clone(),
    )?;
    let report = augment(&options)?;
    print_report(&report, args.json)
}

fn run_inject(args: &InjectArgs) -> Result<()> {
    let direction: Direction = args.direction.parse()?;
    let bundle = Bundle::open(&args.bundle_dir)?;
    if let Some(shared_flow) = &args.shared_flow {
        let policy = render_flow_callout(&args.policy, shared_flow)?;
        bundle.write_policy(&policy)?;
    }
    let path = bundle.proxy_document_path()?;
    let mut doc = FlowDocument::load(&path)?;
    let flow = FlowRef::from_name(&args.flow);
    inject_at_head(&mut doc, &flow, direction, &args.policy)
        .with_context(|| format!("inject into {}", doc.origin().display()))?;
    doc.save(&path)?;
    let entry = doc.flow(&flow)?;
    tracing::info!(
        flow = %flow,
        direction = %direction,
        steps = ?entry.step_names(direction),
        "step injected"
    );
    Ok(())
}

fn run_flows(args: &FlowsArgs) -> Result<()> {
    let scratch = tempfile::tempdir().context("create scratch directory")?;
    let bundle = Bundle::unpack_into(&args.archive, &scratch.path().join("bundle"))?;
    let doc = FlowDocument::load(&bundle.proxy_document_path()?)?;
    let names = doc.flow_names();
    if args.json {
        let flows = names
            .iter()
            .map(|name| doc.get_flow(name))
            .collect::<std::result::Result<Vec<FlowEntry>, _>>()?;
        let text = serde_json::to_string_pretty(&flows).context("serialize flows")?;
        println!("{text}");
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

fn run_validate(args: &ValidateArgs, config: &Config) -> Result<()> {
    validate_config(config)?;
    let bytes = fs::read(&args.archive)
        .with_context(|| format!("read {}", args.archive.display()))?;
    let tokens = token_source(&args.auth);
    let client = ManagementClient::new(&config.api_url, &args.org, tokens.as_ref());
    let response = client.validate(&args.name, &bytes)?;
    print_json(&response)
}

fn run_deployment(args: &DeploymentArgs, config: &Config, deploy: bool) -> Result<()> {
    validate_config(config)?;
    let tokens = token_source(&args.auth);
    let client = ManagementClient::new(&config.api_url, &args.org, tokens.as_ref());
    let response = if deploy {
        client.deploy(&args.name, &args.env, &args.revision)?
    } else {
        client.undeploy(&args.name, &args.env, &args.revision)?
    };
    tracing::info!(
        name = %args.name,
        env = %args.env,
        revision = %args.revision,
        deployed = deploy,
        "deployment state changed"
    );
    print_json(&response)
}

fn run_fetch(args: &FetchArgs, config: &Config) -> Result<()> {
    validate_config(config)?;
    let key = object_key(args.bucket.prefix.as_deref(), &args.name);
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.zip", args.name)));
    let tokens = token_source(&args.auth);
    let store = GcsStore::new(&config.storage_url, tokens.as_ref());
    store
        .download(&args.bucket.bucket, &key, &out)
        .with_context(|| format!("fetch gs://{}/{key}", args.bucket.bucket))?;
    println!("{}", out.display());
    Ok(())
}

fn run_upload(args: &UploadArgs, config: &Config) -> Result<()> {
    validate_config(config)?;
    let key = object_key(args.bucket.prefix.as_deref(), &args.name);
    let tokens = token_source(&args.auth);
    let store = GcsStore::new(&config.storage_url, tokens.as_ref());
    store
        .upload(&args.archive, &args.bucket.bucket, &key)
        .with_context(|| format!("upload {}", args.archive.display()))?;
    println!("gs://{}/{key}", args.bucket.bucket);
    Ok(())
}

/// Flags win over the config file, per field.
fn merge_routing(mut config: Config, args: &RoutingArgs) -> Result<Config> {
    config.base_shared_flows = merge_pair(
        "base",
        config.base_shared_flows.take(),
        args.base_sf_pre.as_deref(),
        args.base_sf_post.as_deref(),
    )?;
    config.override_shared_flows = merge_pair(
        "override",
        config.override_shared_flows.take(),
        args.override_sf_pre.as_deref(),
        args.override_sf_post.as_deref(),
    )?;
    if !args.override_flows.is_empty() {
        config.override_flows = args.override_flows.clone();
    }
    validate_config(&config)?;
    Ok(config)
}

fn merge_pair(
    label: &str,
    configured: Option<PolicyPair>,
    request: Option<&str>,
    response: Option<&str>,
) -> Result<Option<PolicyPair>> {
    let (configured_request, configured_response) = match configured {
        Some(pair) => (Some(pair.request), Some(pair.response)),
        None => (None, None),
    };
    let request = request.map(str::to_string).or(configured_request);
    let response = response.map(str::to_string).or(configured_response);
    match (request, response) {
        (Some(request), Some(response)) => Ok(Some(PolicyPair { request, response })),
        (None, None) => Ok(None),
        _ => Err(anyhow!(
            "--{label}-sf-pre and --{label}-sf-post must be given together"
        )),
    }
}

fn augment_options(
    config: &Config,
    archive: PathBuf,
    work_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<AugmentOptions> {
    let base_flows = config.base_shared_flows.clone().ok_or_else(|| {
        anyhow!("base shared flows are required (--base-sf-pre/--base-sf-post or base_shared_flows in config)")
    })?;
    Ok(AugmentOptions {
        archive,
        work_dir,
        output,
        base_flows,
        override_flows: config.override_shared_flows.clone(),
        override_names: config.override_flows.clone(),
        base_policies: config.base_policies.clone(),
        override_policies: config.override_policies.clone(),
    })
}

fn token_source(auth: &AuthArgs) -> Box<dyn TokenSource> {
    let explicit = auth
        .access_token
        .clone()
        .or_else(|| std::env::var(ENV_ACCESS_TOKEN).ok())
        .filter(|token| !token.trim().is_empty());
    match explicit {
        Some(token) => Box::new(StaticToken::new(token)),
        None => Box::new(GcloudToken::new()),
    }
}

fn print_report(report: &AugmentReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!("archive: {}", report.archive.display());
    println!("routing: {}", report.mode);
    println!("policies: {}", report.policies.join(", "));
    for entry in &report.plan.flows {
        let steps: Vec<String> = entry
            .steps
            .iter()
            .map(|step| format!("{} ({})", step.policy, step.direction))
            .collect();
        println!("  {}: {}", entry.flow, steps.join(", "));
    }
    if !report.unmatched_overrides.is_empty() {
        println!("unmatched overrides: {}", report.unmatched_overrides.join(", "));
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
