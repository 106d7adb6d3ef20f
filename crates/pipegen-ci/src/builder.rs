//! Pipeline graph construction.
//!
//! The top-level pipeline builds every selected host and fans out one child
//! pipeline per (host, target) pair. A child pipeline builds one target:
//! per stage for software targets, per (project, library) for hardware
//! targets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use pipegen_core::context::{VAR_PLATFORMS, VAR_UPSTREAM_PIPELINE_ID};
use pipegen_core::obs::emit_pipeline_generated;
use pipegen_core::{
    Command, Directive, Inventory, Library, LibraryKind, Model, PipelineContext, Platform, Project,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::{GraphError, GraphResult};
use crate::job::{job_name, Job, Strategy, Trigger};
use crate::pipeline::Pipeline;
use crate::script::{
    platform_includes, ScriptRenderer, VAR_HDL_PLATFORM, VAR_HOST_PLATFORM, VAR_PLATFORM,
    VAR_RCC_PLATFORM,
};
use crate::stage::{PipelineKind, StageCatalog, StageRole};

/// A platform a host fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "location", rename_all = "snake_case")]
pub enum Target {
    /// Built by a child pipeline generated from this tree.
    Local(Platform),
    /// Built by a downstream repository.
    Remote {
        name: String,
        project: String,
        branch: String,
    },
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Local(p) => &p.name,
            Target::Remote { name, .. } => name,
        }
    }
}

/// Hosts that survive the directive and the targets attached to each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub hosts: Vec<Platform>,
    /// Host name to its targets, in platform order.
    pub targets: BTreeMap<String, Vec<Target>>,
}

impl Selection {
    pub fn targets_of(&self, host: &str) -> &[Target] {
        self.targets.get(host).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Filter the inventory through the directive.
///
/// A platform survives iff the directive names it. With no host named,
/// `default_hosts` that were discovered are used instead. A cross platform
/// attaches to the hosts it is linked to, or to every host when linked to
/// none. Directive names with no local platform attach as remote targets when
/// a downstream repository provides them.
pub fn select(
    inventory: &Inventory,
    directive: &Directive,
    config: &GeneratorConfig,
    context: &PipelineContext,
) -> GraphResult<Selection> {
    let known = inventory.platform_names();
    let (mut hosts, cross): (Vec<Platform>, Vec<Platform>) = inventory
        .platforms
        .iter()
        .filter(|p| directive.contains(&p.name))
        .map(|p| p.with_links(directive, &known))
        .partition(Platform::is_host);

    if hosts.is_empty() {
        let defaults = if context.default_hosts.is_empty() {
            &config.default_hosts
        } else {
            &context.default_hosts
        };
        for name in defaults {
            match inventory.platform(name) {
                Some(p) if p.is_host() => hosts.push(p.with_links(directive, &known)),
                _ => debug!(host = %name, "default host not discovered, skipping"),
            }
        }
    }
    if hosts.is_empty() {
        return Err(GraphError::NoHosts);
    }

    let attach_to = |linked: &BTreeSet<String>| -> Vec<String> {
        let linked_hosts: Vec<String> = hosts
            .iter()
            .filter(|h| linked.contains(&h.name))
            .map(|h| h.name.clone())
            .collect();
        if linked_hosts.is_empty() {
            hosts.iter().map(|h| h.name.clone()).collect()
        } else {
            linked_hosts
        }
    };

    let mut targets: BTreeMap<String, Vec<Target>> = hosts
        .iter()
        .map(|h| (h.name.clone(), Vec::new()))
        .collect();

    for platform in &cross {
        for host in attach_to(&platform.linked) {
            targets
                .entry(host)
                .or_default()
                .push(Target::Local(platform.clone()));
        }
    }

    for name in directive.platforms().filter(|n| !known.contains(*n)) {
        let Some(repo) = config.downstream_for(name) else {
            debug!(platform = %name, "directive names an unknown platform, skipping");
            continue;
        };
        let linked = directive.links(name).cloned().unwrap_or_default();
        let branch = repo.resolve_branch(&context.group, &context.branch);
        for host in attach_to(&linked) {
            targets.entry(host).or_default().push(Target::Remote {
                name: name.to_string(),
                project: repo.project.clone(),
                branch: branch.clone(),
            });
        }
    }

    info!(
        hosts = hosts.len(),
        targets = targets.values().map(Vec::len).sum::<usize>(),
        "selected platforms"
    );
    Ok(Selection { hosts, targets })
}

/// Builds the top-level and child pipelines for one run.
pub struct GraphBuilder<'a> {
    config: &'a GeneratorConfig,
    catalog: StageCatalog,
    inventory: &'a Inventory,
    context: &'a PipelineContext,
    directive: Directive,
}

impl<'a> GraphBuilder<'a> {
    /// Parse the run's directive and prepare a builder.
    pub fn new(
        config: &'a GeneratorConfig,
        catalog: StageCatalog,
        inventory: &'a Inventory,
        context: &'a PipelineContext,
    ) -> GraphResult<Self> {
        let directive = context.directive(config.colonless_groups)?;
        Ok(Self::with_directive(
            config, catalog, inventory, context, directive,
        ))
    }

    pub fn with_directive(
        config: &'a GeneratorConfig,
        catalog: StageCatalog,
        inventory: &'a Inventory,
        context: &'a PipelineContext,
        directive: Directive,
    ) -> Self {
        Self {
            config,
            catalog,
            inventory,
            context,
            directive,
        }
    }

    pub fn directive(&self) -> &Directive {
        &self.directive
    }

    pub fn selection(&self) -> GraphResult<Selection> {
        select(self.inventory, &self.directive, self.config, self.context)
    }

    fn renderer(&self) -> ScriptRenderer<'a> {
        ScriptRenderer::new(self.config)
    }

    fn stage(&self, kind: PipelineKind, role: StageRole) -> GraphResult<String> {
        self.catalog
            .stage_for(kind, role)
            .map(str::to_string)
            .ok_or_else(|| GraphError::MissingStage {
                role: role.to_string(),
                pipeline: kind.to_string(),
            })
    }

    /// Scheduled runs fire and forget so one failing child cannot stall them.
    fn strategy(&self) -> Option<Strategy> {
        if self.context.source.is_scheduled() {
            None
        } else {
            Some(Strategy::Depend)
        }
    }

    fn staged_job(
        &self,
        kind: PipelineKind,
        stage: &str,
        name: String,
        include: &[String],
        build: &Command,
        host: &str,
    ) -> Job {
        let later = self.catalog.from_stage(kind, stage);
        let staged = self.renderer().staged(stage, &name, include, &later, build);
        Job::script(name, stage, staged.script)
            .with_after_script(staged.after_script)
            .with_tags(self.config.tags_for(host))
    }

    /// Order jobs by stage and collect them into a pipeline.
    fn finish(&self, kind: PipelineKind, mut jobs: Vec<Job>) -> GraphResult<Pipeline> {
        let stages = self.catalog.names(kind);
        jobs.sort_by_key(|j| stages.iter().position(|s| *s == j.stage));

        let mut pipeline = Pipeline::new(kind, stages);
        if kind != PipelineKind::Host {
            pipeline.set_variable(VAR_UPSTREAM_PIPELINE_ID, self.context.pipeline_id.clone());
        }
        for job in jobs {
            pipeline.add_job(job)?;
        }

        emit_pipeline_generated(kind.as_str(), pipeline.stages().len(), pipeline.jobs().len());
        Ok(pipeline)
    }

    /// The pipeline run directly by the CI provider.
    pub fn top_level(&self) -> GraphResult<Pipeline> {
        let kind = PipelineKind::Host;
        let selection = self.selection()?;
        let r = self.renderer();
        let generate_stage = self.stage(kind, StageRole::GenerateChildren)?;
        let trigger_stage = self.stage(kind, StageRole::TriggerChildren)?;
        let mut jobs = Vec::new();

        for host in &selection.hosts {
            let h = host.name.as_str();
            let include = platform_includes([h]);
            let steps = [
                (StageRole::Prereqs, r.make(None, "prerequisites", &[(VAR_PLATFORM, h)])),
                (StageRole::Build, r.make(None, "build", &[(VAR_PLATFORM, h)])),
                (StageRole::Test, r.test(None, host, h)),
            ];
            for (role, build) in steps {
                let stage = self.stage(kind, role)?;
                let name = job_name([stage.as_str(), h]);
                jobs.push(self.staged_job(kind, &stage, name, &include, &build, h));
            }

            for target in selection.targets_of(h) {
                let t = target.name();
                let trigger_name = job_name([trigger_stage.as_str(), h, t]);
                match target {
                    Target::Local(_) => {
                        let generate_name = job_name([generate_stage.as_str(), h, t]);
                        let output = r.child_descriptor(h, t);
                        jobs.push(
                            Job::script(
                                generate_name.clone(),
                                generate_stage.clone(),
                                vec![r.generate_child(h, t, &output).to_shell()],
                            )
                            .with_artifacts([output.clone()])
                            .with_tags(self.config.tags_for(h)),
                        );
                        jobs.push(Job::trigger(
                            trigger_name,
                            trigger_stage.clone(),
                            Trigger::Child {
                                artifact: output,
                                job: generate_name,
                                strategy: self.strategy(),
                            },
                        ));
                    }
                    Target::Remote {
                        project, branch, ..
                    } => {
                        jobs.push(
                            Job::trigger(
                                trigger_name,
                                trigger_stage.clone(),
                                Trigger::Downstream {
                                    project: project.clone(),
                                    branch: branch.clone(),
                                    strategy: self.strategy(),
                                },
                            )
                            .with_variable(VAR_PLATFORMS, format!("{h}:{t}")),
                        );
                    }
                }
            }
        }

        self.finish(kind, jobs)
    }

    /// The child pipeline that builds `platform` from `host`.
    pub fn child(&self, host: &str, platform: &str) -> GraphResult<Pipeline> {
        let host = self
            .inventory
            .platform(host)
            .filter(|p| p.is_host())
            .ok_or_else(|| GraphError::UnknownPlatform {
                name: host.to_string(),
                reason: "not a discovered host platform".to_string(),
            })?;
        let target = self
            .inventory
            .platform(platform)
            .ok_or_else(|| GraphError::UnknownPlatform {
                name: platform.to_string(),
                reason: "not discovered".to_string(),
            })?
            .with_links(&self.directive, &self.inventory.platform_names());

        match target.model() {
            Model::Rcc => self.rcc_child(host, &target),
            Model::Hdl => self.hdl_child(host, &target),
        }
    }

    fn rcc_child(&self, host: &Platform, target: &Platform) -> GraphResult<Pipeline> {
        let kind = PipelineKind::Rcc;
        let r = self.renderer();
        let (h, t) = (host.name.as_str(), target.name.as_str());
        let include = platform_includes([h, t]);
        let vars = [(VAR_PLATFORM, t), (VAR_HOST_PLATFORM, h)];

        let steps = [
            (StageRole::Prereqs, r.make(None, "prerequisites", &vars)),
            (StageRole::Build, r.make(None, "build", &vars)),
            (StageRole::Test, r.test(None, target, h)),
        ];
        let mut jobs = Vec::new();
        for (role, build) in steps {
            let stage = self.stage(kind, role)?;
            let name = job_name([stage.as_str(), h, t]);
            jobs.push(self.staged_job(kind, &stage, name, &include, &build, h));
        }

        self.finish(kind, jobs)
    }

    /// Stage an hdl library builds in, or `None` when this target skips it.
    fn library_stage(
        &self,
        project: &Project,
        library: &Library,
        target: &Platform,
        role: Option<StageRole>,
    ) -> GraphResult<Option<String>> {
        let role = match role {
            Some(role) => role,
            None => match library.kind {
                LibraryKind::Primitives if project.name == self.config.core_project => {
                    StageRole::BuildPrimitivesCore
                }
                LibraryKind::Primitives => StageRole::BuildPrimitives,
                // Platform libraries only matter to the project that owns the target.
                LibraryKind::Platforms if project.name != target.project => return Ok(None),
                LibraryKind::Platforms => StageRole::BuildPlatforms,
                LibraryKind::Assemblies => StageRole::BuildAssemblies,
                LibraryKind::Devices
                | LibraryKind::Cards
                | LibraryKind::Adapters
                | LibraryKind::Components => StageRole::BuildLibraries,
            },
        };
        self.catalog
            .stage_for(PipelineKind::Hdl, role)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| GraphError::UnknownLibraryKind {
                project: project.name.clone(),
                library: library.name.clone(),
                kind: library.kind.to_string(),
                pipeline: PipelineKind::Hdl.to_string(),
            })
    }

    fn hdl_child(&self, host: &Platform, target: &Platform) -> GraphResult<Pipeline> {
        let kind = PipelineKind::Hdl;
        let r = self.renderer();
        let (h, t) = (host.name.as_str(), target.name.as_str());
        let include = platform_includes([h, t]);
        let vars = [(VAR_HDL_PLATFORM, t), (VAR_HOST_PLATFORM, h)];
        let mut jobs = Vec::new();

        for project in &self.inventory.projects {
            for library in &project.libraries {
                let Some(stage) = self.library_stage(project, library, target, None)? else {
                    continue;
                };
                let dir = self.library_dir(project, library);
                let label = library.label();
                let name = job_name([stage.as_str(), project.name.as_str(), label.as_str(), h, t]);
                let build = r.make(Some(&dir), "build", &vars);
                jobs.push(self.staged_job(kind, &stage, name, &include, &build, h));

                if !library.is_testable() {
                    continue;
                }
                for (role, build) in [
                    (StageRole::BuildTests, r.make(Some(&dir), "build-tests", &vars)),
                    (StageRole::Test, r.test(Some(&dir), target, h)),
                ] {
                    if let Some(stage) = self.library_stage(project, library, target, Some(role))? {
                        let parts = [stage.as_str(), project.name.as_str(), label.as_str(), h, t];
                        let name = job_name(parts);
                        jobs.push(self.staged_job(kind, &stage, name, &include, &build, h));
                    }
                }
            }
        }

        if !target.is_simulator() {
            let stage = self.stage(kind, StageRole::BuildSdcard)?;
            let project_dir = self.config.projects_dir.join(&target.project);
            for rcc in self.linked_rcc(target) {
                let name = job_name([stage.as_str(), h, t, rcc]);
                let build = r.make(
                    Some(&project_dir),
                    "sdcard",
                    &[
                        (VAR_HDL_PLATFORM, t),
                        (VAR_RCC_PLATFORM, rcc),
                        (VAR_HOST_PLATFORM, h),
                    ],
                );
                let include = platform_includes([h, t, rcc]);
                jobs.push(self.staged_job(kind, &stage, name, &include, &build, h));
            }
        }

        self.finish(kind, jobs)
    }

    fn library_dir(&self, project: &Project, library: &Library) -> PathBuf {
        self.config
            .projects_dir
            .join(&project.name)
            .join(&library.path)
    }

    /// Discovered rcc platforms the directive links to `target`.
    fn linked_rcc<'t>(&self, target: &'t Platform) -> Vec<&'t str> {
        target
            .linked
            .iter()
            .filter(|name| {
                self.inventory
                    .platform(name)
                    .is_some_and(|p| p.model() == Model::Rcc)
            })
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegen_core::{PipelineSource, PlatformKind, Role};

    fn context(source: PipelineSource, platforms: &str) -> PipelineContext {
        PipelineContext {
            pipeline_id: "100".to_string(),
            upstream_pipeline_id: None,
            source,
            branch: "feature-x".to_string(),
            group: "ocpi".to_string(),
            commit_message: None,
            platforms: Some(platforms.to_string()),
            mr_platforms: None,
            default_hosts: Vec::new(),
        }
    }

    fn inventory() -> Inventory {
        let p = |name: &str, project: &str, kind| Platform::new(name, project, kind);
        Inventory {
            projects: vec![
                Project {
                    name: "core".to_string(),
                    libraries: vec![
                        Library::new("primitives", LibraryKind::Primitives, "hdl/primitives"),
                        Library::new("platforms", LibraryKind::Platforms, "hdl/platforms"),
                        Library::new("components", LibraryKind::Components, "components"),
                    ],
                },
                Project {
                    name: "platform".to_string(),
                    libraries: vec![
                        Library::new("primitives", LibraryKind::Primitives, "hdl/primitives"),
                        Library::new("platforms", LibraryKind::Platforms, "hdl/platforms"),
                        Library::new("assemblies", LibraryKind::Assemblies, "hdl/assemblies"),
                    ],
                },
            ],
            platforms: vec![
                p("centos7", "core", PlatformKind::Rcc { role: Role::Host }),
                p("ubuntu18_04", "core", PlatformKind::Rcc { role: Role::Host }),
                p("xilinx13_3", "core", PlatformKind::Rcc { role: Role::Cross }),
                p("xsim", "core", PlatformKind::Hdl { role: Role::Cross, simulator: true }),
                p("zed", "platform", PlatformKind::Hdl { role: Role::Cross, simulator: false }),
            ],
        }
    }

    fn names(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.jobs().iter().map(|j| j.name.as_str()).collect()
    }

    #[test]
    fn test_select_defaults_to_configured_host() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "zed");
        let directive = ctx.directive(config.colonless_groups).unwrap();
        let selection = select(&inv, &directive, &config, &ctx).unwrap();
        assert_eq!(selection.hosts.len(), 1);
        assert_eq!(selection.hosts[0].name, "centos7");
        let targets: Vec<_> = selection.targets_of("centos7").iter().map(Target::name).collect();
        assert_eq!(targets, ["zed"]);
    }

    #[test]
    fn test_select_attaches_linked_cross_to_its_host() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "centos7 ubuntu18_04:xilinx13_3 zed");
        let directive = ctx.directive(config.colonless_groups).unwrap();
        let selection = select(&inv, &directive, &config, &ctx).unwrap();

        let of = |h: &str| -> Vec<String> {
            selection.targets_of(h).iter().map(|t| t.name().to_string()).collect()
        };
        assert_eq!(of("ubuntu18_04"), ["xilinx13_3", "zed"]);
        assert_eq!(of("centos7"), ["zed"], "zed links no host so goes everywhere");
    }

    #[test]
    fn test_select_no_hosts() {
        let inv = inventory();
        let config = GeneratorConfig {
            default_hosts: vec!["solaris".to_string()],
            ..GeneratorConfig::default()
        };
        let ctx = context(PipelineSource::Web, "zed");
        let directive = ctx.directive(config.colonless_groups).unwrap();
        assert!(matches!(
            select(&inv, &directive, &config, &ctx),
            Err(GraphError::NoHosts)
        ));
    }

    #[test]
    fn test_hdl_child_jobs() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "centos7 zed:xilinx13_3");
        let builder = GraphBuilder::new(&config, StageCatalog::v2(), &inv, &ctx).unwrap();
        let pipeline = builder.child("centos7", "zed").unwrap();

        assert_eq!(pipeline.kind(), PipelineKind::Hdl);
        assert_eq!(
            names(&pipeline),
            [
                "build-primitives-core:core:primitives:centos7:zed",
                "build-primitives:platform:primitives:centos7:zed",
                "build-libraries:core:components:centos7:zed",
                "build-platforms:platform:platforms:centos7:zed",
                "build-assemblies:platform:assemblies:centos7:zed",
                "build-sdcard:centos7:zed:xilinx13_3",
                "build-tests:core:components:centos7:zed",
                "test:core:components:centos7:zed",
            ]
        );
        assert_eq!(
            pipeline.variables().get(VAR_UPSTREAM_PIPELINE_ID).map(String::as_str),
            Some("100")
        );
        let test = pipeline.job("test:core:components:centos7:zed").unwrap();
        assert!(test.script[2].contains("RemoteTarget=zed"));
    }

    #[test]
    fn test_simulator_child_skips_sdcard_and_tests_locally() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "xsim:xilinx13_3");
        let builder = GraphBuilder::new(&config, StageCatalog::v2(), &inv, &ctx).unwrap();
        let pipeline = builder.child("centos7", "xsim").unwrap();

        assert!(pipeline.jobs_in_stage("build-sdcard").next().is_none());
        assert!(
            pipeline.job("build-platforms:core:platforms:centos7:xsim").is_some(),
            "xsim is owned by core"
        );
        let test = pipeline.job("test:core:components:centos7:xsim").unwrap();
        assert_eq!(
            test.script[2],
            "make -C projects/core/components test HdlPlatform=xsim"
        );
    }

    #[test]
    fn test_child_rejects_unknown_platforms() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "zed");
        let builder = GraphBuilder::new(&config, StageCatalog::v2(), &inv, &ctx).unwrap();
        assert!(matches!(
            builder.child("xilinx13_3", "zed"),
            Err(GraphError::UnknownPlatform { .. })
        ));
        assert!(matches!(
            builder.child("centos7", "e310"),
            Err(GraphError::UnknownPlatform { .. })
        ));
    }

    #[test]
    fn test_catalog_without_library_stage_is_fatal() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Web, "zed");
        let mut catalog = StageCatalog::v2();
        catalog.hdl.retain(|s| s.role != StageRole::BuildAssemblies);
        let builder = GraphBuilder::new(&config, catalog, &inv, &ctx).unwrap();
        let err = builder.child("centos7", "zed").unwrap_err();
        assert!(
            matches!(err, GraphError::UnknownLibraryKind { ref kind, .. } if kind == "assemblies")
        );
    }

    #[test]
    fn test_scheduled_triggers_do_not_wait() {
        let inv = inventory();
        let config = GeneratorConfig::default();
        let ctx = context(PipelineSource::Schedule, "centos7:zed");
        let builder = GraphBuilder::new(&config, StageCatalog::v2(), &inv, &ctx).unwrap();
        let pipeline = builder.top_level().unwrap();
        let trigger = pipeline.job("trigger-children:centos7:zed").unwrap();
        assert_eq!(trigger.trigger.as_ref().unwrap().strategy(), None);
    }
}
