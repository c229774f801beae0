//! Build-or-reuse decision engine
//!
//! One run addresses one registry and walks:
//!
//! ```text
//! AUTHENTICATE -> QUERY_PRIMARY_TAG
//!     exists  -> CHECK_AUXILIARY_TAG
//!                  shared  -> done (no-op)
//!                  missing -> pull primary, tag auxiliary, push auxiliary
//!     missing -> BUILD -> ENSURE_REPOSITORY -> PUSH_PRIMARY -> PUSH_AUXILIARY
//! ```
//!
//! This is the only place that decides whether an error is fatal.
//! Authentication errors abort; query errors are logged and read as
//! "absent", which at worst costs a rebuild.

use crate::builder::{ExecutionMode, ImageBuilder};
use crate::error::KilnResult;
use crate::fingerprint::{fingerprint, BuildContext};
use crate::registry::{AccessScope, Registry, RegistryCredential};
use crate::tag::ImageReference;
use std::fmt;
use tracing::{debug, info, warn};

/// Everything one build-or-reuse run needs
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub reference: ImageReference,
    pub primary_tag: String,
    pub auxiliary_tag: Option<String>,
    pub context: BuildContext,
    /// Query the registry before building
    pub reuse: bool,
}

impl BuildRequest {
    pub fn primary_reference(&self) -> String {
        self.reference.with_tag(&self.primary_tag)
    }

    pub fn auxiliary_reference(&self) -> Option<String> {
        self.auxiliary_tag
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| self.reference.with_tag(t))
    }
}

/// What a run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Primary (and auxiliary, if requested) already present
    Reused,
    /// Primary present; auxiliary tag pushed onto it
    AttachedAuxiliary,
    /// Image built and pushed
    Built,
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reused => write!(f, "reused"),
            Self::AttachedAuxiliary => write!(f, "reused, auxiliary tag attached"),
            Self::Built => write!(f, "built"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    /// `host/project/namespace-identifier:primary_tag`
    pub reference: String,
}

/// Content tag for the request: the explicit tag when given, otherwise the
/// (optionally prefixed) fingerprint of the build context
pub fn resolve_primary_tag(
    explicit: Option<&str>,
    prefix: Option<&str>,
    context: &BuildContext,
    excludes: &[String],
) -> KilnResult<String> {
    if let Some(tag) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        debug!("Using explicit image tag {}", tag);
        return Ok(tag.to_string());
    }

    let hash = fingerprint(context, excludes)?;
    Ok(hash.with_prefix(prefix))
}

/// Read a query result, downgrading query errors to "absent"
fn absent_on_query_error(result: KilnResult<bool>, what: &str) -> KilnResult<bool> {
    match result {
        Ok(found) => Ok(found),
        Err(e) if e.is_query_error() => {
            warn!("Could not check {}, assuming absent: {}", what, e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Run one build-or-reuse cycle
pub async fn run(
    request: &BuildRequest,
    registry: &dyn Registry,
    builder: &dyn ImageBuilder,
    mode: ExecutionMode,
) -> KilnResult<BuildReport> {
    let primary = request.primary_reference();
    let auxiliary = request.auxiliary_reference();

    if request.reuse && !mode.is_dry_run() {
        let reused =
            try_reuse(request, registry, builder, &primary, auxiliary.as_deref()).await?;
        if let Some(outcome) = reused {
            return Ok(BuildReport {
                outcome,
                reference: primary,
            });
        }
    } else {
        debug!("Skipping registry queries (reuse: {}, mode: {:?})", request.reuse, mode);
    }

    build_and_push(request, registry, builder, mode, &primary, auxiliary.as_deref()).await?;

    Ok(BuildReport {
        outcome: BuildOutcome::Built,
        reference: primary,
    })
}

/// `Some(outcome)` when the existing image was reused
async fn try_reuse(
    request: &BuildRequest,
    registry: &dyn Registry,
    builder: &dyn ImageBuilder,
    primary: &str,
    auxiliary: Option<&str>,
) -> KilnResult<Option<BuildOutcome>> {
    let reference = &request.reference;
    let repository = reference.repository();

    let credential: RegistryCredential = registry
        .authenticate(AccessScope::Image, &reference.project, &reference.image_name())
        .await?;

    let exists = absent_on_query_error(
        registry
            .tag_exists(&credential, &repository, &request.primary_tag)
            .await,
        primary,
    )?;

    if !exists {
        info!("{} not found in registry, building", primary);
        return Ok(None);
    }

    let (Some(aux_tag), Some(aux_ref)) = (request.auxiliary_tag.as_deref(), auxiliary) else {
        info!("Image {} already exists, existing image will be used", primary);
        return Ok(Some(BuildOutcome::Reused));
    };

    let shared = absent_on_query_error(
        registry
            .shares_digest(&credential, &repository, &request.primary_tag, aux_tag)
            .await,
        aux_ref,
    )?;

    if shared {
        info!("Image {} already exists and is tagged {}", primary, aux_tag);
        return Ok(Some(BuildOutcome::Reused));
    }

    info!("Image {} already exists, attaching {}", primary, aux_tag);
    builder.pull(primary).await?;
    builder.tag(primary, aux_ref).await?;
    builder.push(aux_ref).await?;

    Ok(Some(BuildOutcome::AttachedAuxiliary))
}

async fn build_and_push(
    request: &BuildRequest,
    registry: &dyn Registry,
    builder: &dyn ImageBuilder,
    mode: ExecutionMode,
    primary: &str,
    auxiliary: Option<&str>,
) -> KilnResult<()> {
    let mut tags = vec![primary.to_string()];
    tags.extend(auxiliary.map(str::to_string));

    info!("Building {} with {}", primary, builder.name());
    builder
        .build(
            &request.context.context_path,
            &request.context.dockerfile_path,
            &tags,
        )
        .await?;

    registry.ensure_repository(&request.reference, mode).await?;

    builder.push(primary).await?;
    if let Some(aux_ref) = auxiliary {
        builder.push(aux_ref).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnError;
    use crate::registry::{RegistryFamily, TagDigestSet};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const HASH: &str = "abc0000000000000000000000000000000000123";

    /// Registry tags, local images and every builder call
    #[derive(Default)]
    struct World {
        remote: BTreeMap<String, String>,
        local: BTreeMap<String, String>,
        calls: Vec<String>,
        queries: usize,
    }

    type Shared = Arc<Mutex<World>>;

    fn tag_of(reference: &str) -> String {
        reference
            .rsplit_once(':')
            .map(|(_, t)| t.to_string())
            .unwrap_or_default()
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Auth,
        Query,
    }

    struct FakeRegistry {
        world: Shared,
        failure: Failure,
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        fn family(&self) -> RegistryFamily {
            RegistryFamily::GenericV2
        }

        fn host(&self) -> &str {
            "registry.test"
        }

        async fn authenticate(
            &self,
            scope: AccessScope,
            repository: &str,
            image: &str,
        ) -> KilnResult<RegistryCredential> {
            if self.failure == Failure::Auth {
                return Err(KilnError::CredentialsNotFound {
                    host: "registry.test".to_string(),
                });
            }
            Ok(RegistryCredential::Bearer {
                token: "t".to_string(),
                host: "registry.test".to_string(),
                scope: scope.scope_string(repository, image)?,
            })
        }

        async fn tag_exists(
            &self,
            _credential: &RegistryCredential,
            _repository: &str,
            tag: &str,
        ) -> KilnResult<bool> {
            let mut world = self.world.lock().unwrap();
            world.queries += 1;
            if self.failure == Failure::Query {
                return Err(KilnError::query("registry.test", "connection reset"));
            }
            Ok(world.remote.contains_key(tag))
        }

        async fn tag_siblings(
            &self,
            _credential: &RegistryCredential,
            _repository: &str,
            tag: &str,
        ) -> KilnResult<BTreeSet<String>> {
            let mut world = self.world.lock().unwrap();
            world.queries += 1;
            let mut set = TagDigestSet::new();
            for (t, digest) in &world.remote {
                set.insert(digest.clone(), t.clone());
            }
            Ok(set.siblings_of(tag))
        }
    }

    struct FakeBuilder {
        world: Shared,
        fail_push: bool,
    }

    #[async_trait]
    impl ImageBuilder for FakeBuilder {
        fn name(&self) -> &str {
            "fake"
        }

        async fn build(&self, _context: &Path, _dockerfile: &Path, tags: &[String]) -> KilnResult<()> {
            let mut world = self.world.lock().unwrap();
            world.calls.push(format!("build {}", tags.join(" ")));
            for tag in tags {
                world.local.insert(tag.clone(), "sha256:built".to_string());
            }
            Ok(())
        }

        async fn push(&self, reference: &str) -> KilnResult<()> {
            let mut world = self.world.lock().unwrap();
            world.calls.push(format!("push {}", reference));
            if self.fail_push {
                return Err(KilnError::tool_failed(
                    format!("docker push {}", reference),
                    "denied: requested access to the resource is denied",
                ));
            }
            let digest = world.local.get(reference).cloned().unwrap();
            world.remote.insert(tag_of(reference), digest);
            Ok(())
        }

        async fn pull(&self, reference: &str) -> KilnResult<()> {
            let mut world = self.world.lock().unwrap();
            world.calls.push(format!("pull {}", reference));
            let digest = world.remote.get(&tag_of(reference)).cloned().unwrap();
            world.local.insert(reference.to_string(), digest);
            Ok(())
        }

        async fn tag(&self, source: &str, target: &str) -> KilnResult<()> {
            let mut world = self.world.lock().unwrap();
            world.calls.push(format!("tag {} {}", source, target));
            let digest = world.local.get(source).cloned().unwrap();
            world.local.insert(target.to_string(), digest);
            Ok(())
        }
    }

    fn request(auxiliary: Option<&str>) -> BuildRequest {
        BuildRequest {
            reference: ImageReference::new("registry.test", "silta", "ns", "php").unwrap(),
            primary_tag: HASH.to_string(),
            auxiliary_tag: auxiliary.map(str::to_string),
            context: BuildContext::new(".", "Dockerfile").with_ignore_file(None),
            reuse: true,
        }
    }

    fn world(remote: &[(&str, &str)]) -> Shared {
        let world = World {
            remote: remote
                .iter()
                .map(|(t, d)| (t.to_string(), d.to_string()))
                .collect(),
            ..World::default()
        };
        Arc::new(Mutex::new(world))
    }

    fn fakes(world: &Shared, failure: Failure) -> (FakeRegistry, FakeBuilder) {
        (
            FakeRegistry {
                world: world.clone(),
                failure,
            },
            FakeBuilder {
                world: world.clone(),
                fail_push: false,
            },
        )
    }

    fn calls(world: &Shared) -> Vec<String> {
        world.lock().unwrap().calls.clone()
    }

    #[tokio::test]
    async fn first_build_pushes_both_tags() {
        let world = world(&[]);
        let (registry, builder) = fakes(&world, Failure::None);

        let report = run(&request(Some("branch--main")), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Built);
        assert_eq!(report.reference, format!("registry.test/silta/ns-php:{}", HASH));
        assert_eq!(
            calls(&world),
            vec![
                format!(
                    "build registry.test/silta/ns-php:{} registry.test/silta/ns-php:branch--main",
                    HASH
                ),
                format!("push registry.test/silta/ns-php:{}", HASH),
                "push registry.test/silta/ns-php:branch--main".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn rebuild_avoided_attaches_auxiliary() {
        let world = world(&[(HASH, "sha256:old")]);
        let (registry, builder) = fakes(&world, Failure::None);

        let report = run(&request(Some("branch--main")), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::AttachedAuxiliary);
        let calls = calls(&world);
        assert_eq!(calls.iter().filter(|c| c.starts_with("pull ")).count(), 1);
        assert_eq!(calls.iter().filter(|c| c.starts_with("tag ")).count(), 1);
        assert_eq!(calls.iter().filter(|c| c.starts_with("push ")).count(), 1);
        assert!(!calls.iter().any(|c| c.starts_with("build ")));

        let world = world.lock().unwrap();
        assert_eq!(world.remote.get("branch--main"), Some(&"sha256:old".to_string()));
        assert_eq!(world.remote.get(HASH), Some(&"sha256:old".to_string()));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let world = world(&[]);
        let (registry, builder) = fakes(&world, Failure::None);
        let request = request(Some("branch--main"));

        run(&request, &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();
        let remote_after_first = world.lock().unwrap().remote.clone();
        let calls_after_first = calls(&world).len();

        let report = run(&request, &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Reused);
        assert_eq!(calls(&world).len(), calls_after_first);
        assert_eq!(world.lock().unwrap().remote, remote_after_first);
    }

    #[tokio::test]
    async fn existing_image_without_auxiliary_is_reused() {
        let world = world(&[(HASH, "sha256:old")]);
        let (registry, builder) = fakes(&world, Failure::None);

        let report = run(&request(None), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Reused);
        assert!(calls(&world).is_empty());
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal() {
        let world = world(&[]);
        let (registry, builder) = fakes(&world, Failure::Auth);

        let err = run(&request(Some("branch--main")), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap_err();

        assert!(err.is_auth_error());
        assert!(calls(&world).is_empty());
    }

    #[tokio::test]
    async fn query_failure_falls_back_to_build() {
        let world = world(&[(HASH, "sha256:old")]);
        let (registry, builder) = fakes(&world, Failure::Query);

        let report = run(&request(None), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Built);
        assert!(calls(&world)[0].starts_with("build "));
    }

    #[tokio::test]
    async fn reuse_disabled_skips_queries() {
        let world = world(&[(HASH, "sha256:old")]);
        let (registry, builder) = fakes(&world, Failure::None);
        let mut request = request(None);
        request.reuse = false;

        let report = run(&request, &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Built);
        assert_eq!(world.lock().unwrap().queries, 0);
    }

    #[tokio::test]
    async fn dry_run_skips_queries() {
        let world = world(&[(HASH, "sha256:old")]);
        let (registry, builder) = fakes(&world, Failure::Auth);

        let report = run(&request(None), &registry, &builder, ExecutionMode::DryRun)
            .await
            .unwrap();

        assert_eq!(report.outcome, BuildOutcome::Built);
        assert_eq!(world.lock().unwrap().queries, 0);
    }

    #[tokio::test]
    async fn push_failure_surfaces_tool_output() {
        let world = world(&[]);
        let registry = FakeRegistry {
            world: world.clone(),
            failure: Failure::None,
        };
        let builder = FakeBuilder {
            world: world.clone(),
            fail_push: true,
        };

        let err = run(&request(Some("branch--main")), &registry, &builder, ExecutionMode::Execute)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("requested access to the resource is denied"));
        // primary push failed, auxiliary never attempted
        assert_eq!(calls(&world).iter().filter(|c| c.starts_with("push ")).count(), 1);
    }

    #[test]
    fn explicit_tag_wins() {
        let context = BuildContext::new("/nonexistent", "/nonexistent/Dockerfile");
        let tag = resolve_primary_tag(Some("v1.2.3"), Some("php"), &context, &[]).unwrap();
        assert_eq!(tag, "v1.2.3");
    }

    #[test]
    fn fingerprint_tag_with_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        let context = BuildContext::new(dir.path(), dir.path().join("Dockerfile"));

        let tag = resolve_primary_tag(None, Some("php"), &context, &[]).unwrap();
        assert!(tag.starts_with("php-"));
        assert_eq!(tag.len(), "php-".len() + 40);
    }

    #[test]
    fn missing_context_is_fatal() {
        let context = BuildContext::new("/nonexistent", "/nonexistent/Dockerfile");
        let err = resolve_primary_tag(None, None, &context, &[]).unwrap_err();
        assert!(matches!(err, KilnError::Io { .. }));
    }
}
