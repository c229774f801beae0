//! Image command - build-or-reuse and reference resolution

use crate::builder::{DockerCli, ExecutionMode};
use crate::cli::args::{ImageAction, ImageArgs, ImageBuildArgs, ImageTargetArgs, ImageUrlArgs};
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::fingerprint::BuildContext;
use crate::orchestrator::{self, BuildOutcome, BuildRequest};
use crate::registry::create_registry;
use crate::tag::{normalize_tag, ImageReference};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::debug;

/// Execute the image command
pub async fn execute(args: ImageArgs, config: &Config) -> KilnResult<()> {
    let env = |var: &str| std::env::var(var).ok();

    match args.action {
        ImageAction::Build(build_args) => build(build_args, config, &env).await,
        ImageAction::Url(url_args) => url(url_args, config, &env).await,
    }
}

/// Flag and environment values after fallback
#[derive(Debug, Clone)]
struct ResolvedTarget {
    reference: ImageReference,
    image_tag: Option<String>,
    prefix: Option<String>,
    dockerfile: Option<PathBuf>,
    build_path: Option<PathBuf>,
}

/// A build context, plus the directory backing it when it was left empty
struct PreparedContext {
    context: BuildContext,
    _empty_dir: Option<TempDir>,
}

/// The flag when set, otherwise the first non-empty variable in `vars`
fn flag_or_env(
    flag: Option<&str>,
    vars: &[&str],
    use_env: bool,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    if let Some(value) = flag {
        return Some(value.to_string());
    }
    if !use_env {
        return None;
    }
    vars.iter()
        .filter_map(|var| env(var))
        .find(|value| !value.is_empty())
}

fn resolve_target(
    args: &ImageTargetArgs,
    use_env: bool,
    env: &dyn Fn(&str) -> Option<String>,
) -> KilnResult<ResolvedTarget> {
    let value = |flag: &Option<String>, vars: &[&str]| {
        flag_or_env(flag.as_deref(), vars, use_env, env).unwrap_or_default()
    };
    let path = |flag: &Option<PathBuf>, var: &str| {
        let flag = flag.as_ref().map(|p| p.to_string_lossy().into_owned());
        flag_or_env(flag.as_deref(), &[var], use_env, env).map(PathBuf::from)
    };

    let reference = ImageReference::new(
        value(&args.image_repo_host, &["IMAGE_REPO_HOST", "DOCKER_REPO_HOST"]),
        value(&args.image_repo_project, &["IMAGE_REPO_PROJECT", "DOCKER_REPO_PROJ"]),
        value(&args.namespace, &["NAMESPACE"]),
        value(&args.image_identifier, &["IMAGE_IDENTIFIER"]),
    )?;

    Ok(ResolvedTarget {
        reference,
        image_tag: flag_or_env(args.image_tag.as_deref(), &["IMAGE_TAG"], use_env, env)
            .filter(|t| !t.trim().is_empty()),
        prefix: args.image_tag_prefix.clone().filter(|p| !p.is_empty()),
        dockerfile: path(&args.dockerfile, "DOCKERFILE"),
        build_path: path(&args.build_path, "BUILD_PATH"),
    })
}

fn prepare_context(target: &ResolvedTarget) -> KilnResult<PreparedContext> {
    let dockerfile = target
        .dockerfile
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| KilnError::MissingInput {
            name: "dockerfile".to_string(),
        })?;

    match target.build_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        Some(build_path) => Ok(PreparedContext {
            context: BuildContext::new(build_path, dockerfile),
            _empty_dir: None,
        }),
        None => {
            let dir = tempfile::Builder::new()
                .prefix("kiln-context-")
                .tempdir()
                .map_err(|e| KilnError::io("creating empty build context", e))?;
            debug!("No build path given, using empty context {}", dir.path().display());
            Ok(PreparedContext {
                context: BuildContext::new(dir.path(), dockerfile),
                _empty_dir: Some(dir),
            })
        }
    }
}

/// Fingerprint on the blocking pool behind a spinner
async fn compute_tag(
    ctx: &UiContext,
    target: &ResolvedTarget,
    context: &BuildContext,
    config: &Config,
) -> KilnResult<String> {
    let explicit = target.image_tag.clone();
    let prefix = target.prefix.clone();
    let context = context.clone();
    let excludes = config.build.exclude.clone();

    let spinner = explicit
        .is_none()
        .then(|| TaskSpinner::start(ctx, "Fingerprinting build context..."));

    let result = tokio::task::spawn_blocking(move || {
        orchestrator::resolve_primary_tag(explicit.as_deref(), prefix.as_deref(), &context, &excludes)
    })
    .await
    .map_err(|e| KilnError::Internal(format!("fingerprint task failed: {}", e)))?;

    if let Some(spinner) = spinner {
        match &result {
            Ok(tag) => spinner.succeed(&format!("Fingerprint {}", tag)),
            Err(e) => spinner.fail(&e.to_string()),
        }
    }

    result
}

async fn url(
    args: ImageUrlArgs,
    config: &Config,
    env: &dyn Fn(&str) -> Option<String>,
) -> KilnResult<()> {
    let use_env = args.target.use_env.unwrap_or(config.general.use_env);
    let target = resolve_target(&args.target, use_env, env)?;

    let tag = match &target.image_tag {
        Some(tag) => tag.clone(),
        None => {
            let ctx = UiContext::non_interactive();
            let prepared = prepare_context(&target)?;
            compute_tag(&ctx, &target, &prepared.context, config).await?
        }
    };

    println!("{}", target.reference.with_tag(&tag));
    Ok(())
}

async fn build(
    args: ImageBuildArgs,
    config: &Config,
    env: &dyn Fn(&str) -> Option<String>,
) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let use_env = args.target.use_env.unwrap_or(config.general.use_env);
    let target = resolve_target(&args.target, use_env, env)?;
    let branch = flag_or_env(args.branchname.as_deref(), &["BRANCHNAME"], use_env, env);

    let prepared = prepare_context(&target)?;
    let primary_tag = compute_tag(&ctx, &target, &prepared.context, config).await?;

    let mode = ExecutionMode::from_dry_run(args.debug);
    let request = BuildRequest {
        reference: target.reference.clone(),
        primary_tag,
        auxiliary_tag: branch.map(|b| normalize_tag(&b)),
        context: prepared.context.clone(),
        reuse: args.image_reuse.unwrap_or(config.build.reuse),
    };

    if mode.is_dry_run() {
        ui::step_info(&ctx, "Dry run: commands are printed, not executed");
    } else if !request.reuse {
        ui::step_warn(&ctx, "Image reuse disabled, building unconditionally");
    }

    let registry = create_registry(&request.reference.host, config)?;
    let builder = DockerCli::new(config.build.container_cli.clone(), mode);

    let report = orchestrator::run(&request, registry.as_ref(), &builder, mode).await?;

    match report.outcome {
        BuildOutcome::Reused => ui::step_ok_detail(
            &ctx,
            "Image already exists, existing image will be used",
            &report.reference,
        ),
        BuildOutcome::AttachedAuxiliary => ui::step_ok_detail(
            &ctx,
            "Image already exists, branch tag attached",
            &report.reference,
        ),
        BuildOutcome::Built if mode.is_dry_run() => {
            ui::step_ok_detail(&ctx, "Dry run complete", &report.reference)
        }
        BuildOutcome::Built => ui::step_ok_detail(&ctx, "Image built and pushed", &report.reference),
    }

    Ok(())
}
