//! CLI argument parsing for bundle preparation and augmentation.
//!
//! Commands map one-to-one onto the run stages so each can be driven on its
//! own: scaffold-and-augment (`prepare`), the offline core (`augment`,
//! `inject`, `flows`) and the service wrappers.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "proxy-augment",
    version,
    about = "Inject shared-flow callouts into API proxy bundles",
    after_help = "Examples:\n  proxy-augment augment --archive petstore.zip --base-sf-pre SF-pre --base-sf-post SF-post\n  proxy-augment augment --archive petstore.zip --base-sf-pre SF-pre --base-sf-post SF-post \\\n      --override-flows GetPet --override-sf-pre SF-override-pre --override-sf-post SF-override-post\n  proxy-augment flows --archive petstore.zip\n  proxy-augment prepare --org acme --name petstore --base-path /pets --oas-dir specs --oas-file petstore.yaml \\\n      --base-sf-pre SF-pre --base-sf-post SF-post",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// JSON config file (default: <config dir>/proxy-augment/config.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Prepare(PrepareArgs),
    Augment(AugmentArgs),
    Inject(InjectArgs),
    Flows(FlowsArgs),
    Validate(ValidateArgs),
    Deploy(DeploymentArgs),
    Undeploy(DeploymentArgs),
    Fetch(FetchArgs),
    Upload(UploadArgs),
}

/// Shared-flow routing inputs; each falls back to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct RoutingArgs {
    /// Shared flow called at the head of the request chain
    #[arg(long, value_name = "NAME")]
    pub base_sf_pre: Option<String>,

    /// Shared flow called at the head of the response chain
    #[arg(long, value_name = "NAME")]
    pub base_sf_post: Option<String>,

    /// Shared flow called on the request side of override flows
    #[arg(long, value_name = "NAME")]
    pub override_sf_pre: Option<String>,

    /// Shared flow called on the response side of override flows
    #[arg(long, value_name = "NAME")]
    pub override_sf_post: Option<String>,

    /// Comma separated conditional flow names routed to the override pair (matched exactly)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub override_flows: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AuthArgs {
    /// Bearer token (default: $APIGEE_ACCESS_TOKEN, else `gcloud auth print-access-token`)
    #[arg(long, value_name = "TOKEN")]
    pub access_token: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BucketArgs {
    /// Storage bucket holding bundle archives
    #[arg(long, value_name = "BUCKET")]
    pub bucket: String,

    /// Object name prefix inside the bucket
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,
}

/// Scaffold a bundle from an OpenAPI document, augment, validate, and
/// optionally upload it.
#[derive(Parser, Debug)]
#[command(about = "Scaffold, augment and validate a proxy bundle")]
pub struct PrepareArgs {
    #[arg(long, value_name = "ORG")]
    pub org: String,

    /// API proxy name; the archive is <out-dir>/<name>.zip
    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[arg(long, value_name = "PATH")]
    pub base_path: String,

    /// Directory holding the OpenAPI document
    #[arg(long, value_name = "DIR")]
    pub oas_dir: PathBuf,

    /// OpenAPI document file name inside --oas-dir
    #[arg(long, value_name = "FILE")]
    pub oas_file: String,

    #[arg(long, value_name = "URL")]
    pub target_url: Option<String>,

    /// Pass the access token to the scaffolding tool as `--token`, where it
    /// shows in the process list (default: the tool resolves its own credentials)
    #[arg(long)]
    pub pass_token: bool,

    /// Directory the scaffolding tool runs in
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Skip the management API validation call
    #[arg(long)]
    pub skip_validate: bool,

    /// Upload the augmented archive to this bucket
    #[arg(long, value_name = "BUCKET")]
    pub upload_bucket: Option<String>,

    #[arg(long, value_name = "PREFIX", requires = "upload_bucket")]
    pub upload_prefix: Option<String>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub routing: RoutingArgs,

    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Inject callout policies into an existing bundle archive")]
pub struct AugmentArgs {
    #[arg(long, value_name = "ZIP")]
    pub archive: PathBuf,

    /// Working directory (default: archive path without extension)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Output archive (default: overwrite --archive)
    #[arg(long, value_name = "ZIP")]
    pub output: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub routing: RoutingArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Prepend one step to a flow of an unpacked bundle")]
pub struct InjectArgs {
    /// Unpacked bundle directory (contains apiproxy/)
    #[arg(long, value_name = "DIR")]
    pub bundle_dir: PathBuf,

    /// PreFlow, PostFlow, or a conditional flow name
    #[arg(long, value_name = "NAME")]
    pub flow: String,

    /// Request or Response
    #[arg(long, value_name = "DIRECTION")]
    pub direction: String,

    /// Policy the new step references
    #[arg(long, value_name = "NAME")]
    pub policy: String,

    /// Also write a callout policy for this shared flow
    #[arg(long, value_name = "NAME")]
    pub shared_flow: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "List the conditional flows of a bundle archive")]
pub struct FlowsArgs {
    #[arg(long, value_name = "ZIP")]
    pub archive: PathBuf,

    /// Emit flows with their steps as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Validate a bundle archive with the management API")]
pub struct ValidateArgs {
    #[arg(long, value_name = "ORG")]
    pub org: String,

    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[arg(long, value_name = "ZIP")]
    pub archive: PathBuf,

    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Deploy or undeploy an API proxy revision")]
pub struct DeploymentArgs {
    #[arg(long, value_name = "ORG")]
    pub org: String,

    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[arg(long, value_name = "ENV")]
    pub env: String,

    #[arg(long, value_name = "REV")]
    pub revision: String,

    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Download a bundle archive from object storage")]
pub struct FetchArgs {
    /// API proxy name; the object is <prefix>/<name>.zip
    #[arg(long, value_name = "NAME")]
    pub name: String,

    /// Local destination (default: <name>.zip)
    #[arg(long, value_name = "ZIP")]
    pub out: Option<PathBuf>,

    #[command(flatten)]
    pub bucket: BucketArgs,

    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Parser, Debug)]
#[command(about = "Upload a bundle archive to object storage")]
pub struct UploadArgs {
    /// API proxy name; the object is <prefix>/<name>.zip
    #[arg(long, value_name = "NAME")]
    pub name: String,

    #[arg(long, value_name = "ZIP")]
    pub archive: PathBuf,

    #[command(flatten)]
    pub bucket: BucketArgs,

    #[command(flatten)]
    pub auth: AuthArgs,
}
