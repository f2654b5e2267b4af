//! Office configuration and the validated metadata graph.
//!
//! [`OfficeBuilder`] collects managed objects, governances, teams, functions
//! and escalation handling. [`OfficeBuilder::build`] validates everything and
//! produces the immutable [`OfficeMetaData`] the execution engine runs.
//!
//! Building never fails as a whole. Every problem becomes a
//! [`ConfigurationIssue`] recorded against one asset; that asset is left out
//! while its siblings are built normally. Functions that reference a left-out
//! function are left out too, until nothing changes.
//!
//! # Example
//!
//! ```
//! use cadre_core::index::ManagedObjectScope;
//! use cadre_core::object::{ManagedObject, source_fn};
//! use cadre_core::office::OfficeBuilder;
//! use cadre_core::config::OfficeConfig;
//!
//! struct Ledger;
//! impl ManagedObject for Ledger {}
//!
//! let mut builder = OfficeBuilder::new(OfficeConfig::default());
//! builder.add_managed_object("ledger", ManagedObjectScope::Process, source_fn(|| Ok(Ledger)));
//! builder
//!     .add_fn("record", |_ctx| Ok(()))
//!     .with_object("ledger")
//!     .with_next("report");
//! builder.add_fn("report", |_ctx| Ok(()));
//!
//! let office = builder.build();
//! assert!(office.issues().is_empty());
//! assert_eq!(office.functions().len(), 2);
//! ```

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use bitvec::vec::BitVec;
use hashbrown::{HashMap, HashSet};

use crate::administration::{
    Administration, AdministrationContext, AdministrationFactory, AdministrationMetaData,
    administration_fn,
};
use crate::config::OfficeConfig;
use crate::escalation::{Escalation, EscalationMatcher, EscalationProcedure};
use crate::function::{
    EscalationHandler, FunctionContext, FunctionFactory, FunctionId, FunctionMetaData,
    ManagedFunction, from_fn,
};
use crate::governance::{Governance, GovernanceFactory, GovernanceMetaData};
use crate::index::{ManagedObjectIndex, ManagedObjectScope, TypeInfo};
use crate::issues::{AssetKind, ConfigurationIssue};
use crate::object::{ManagedObjectMetaData, ManagedObjectSource, ObjectDependency};
use crate::resolver::{ObjectReference, ObjectRegistry};
use crate::team::{Team, TeamId, TeamMetaData};

/// Name issues against the office-wide escalation procedure are recorded under.
pub const OFFICE_ASSET: &str = "<office>";

// ─────────────────────────────────────────────────────────────────────────────
// Declarations
// ─────────────────────────────────────────────────────────────────────────────

/// Declaration of a managed object. Returned by
/// [`OfficeBuilder::add_managed_object`].
pub struct ManagedObjectBuilder {
    name: String,
    scope: ManagedObjectScope,
    source: Arc<dyn ManagedObjectSource>,
    produces: Option<TypeInfo>,
    dependencies: Vec<(String, String)>,
    governances: Vec<String>,
}

impl ManagedObjectBuilder {
    /// Declares that the object depends on `object`, looked up as `key`.
    pub fn with_dependency(&mut self, key: impl Into<String>, object: impl Into<String>) -> &mut Self {
        self.dependencies.push((key.into(), object.into()));
        self
    }

    /// Declares the type the source produces, enabling type checks.
    pub fn produces<T: 'static>(&mut self) -> &mut Self {
        self.produces = Some(TypeInfo::of::<T>());
        self
    }

    /// Subjects the object to the governance `name`.
    pub fn with_governance(&mut self, name: impl Into<String>) -> &mut Self {
        self.governances.push(name.into());
        self
    }
}

struct AdministrationDeclaration {
    name: String,
    factory: AdministrationFactory,
    objects: Vec<String>,
}

/// Declaration of a function. Returned by [`OfficeBuilder::add_function`].
pub struct FunctionBuilder {
    name: String,
    factory: FunctionFactory,
    parameter: Option<TypeInfo>,
    objects: Vec<(String, ObjectReference)>,
    next: Option<String>,
    escalations: Vec<(EscalationMatcher, String)>,
    team: Option<String>,
    governances: Vec<String>,
    pre: Vec<AdministrationDeclaration>,
    post: Vec<AdministrationDeclaration>,
    async_timeout: Option<Duration>,
}

impl FunctionBuilder {
    /// Declares the managed object bound as `name`.
    pub fn with_object(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.objects.push((name.clone(), ObjectReference::managed(name)));
        self
    }

    /// Declares the managed object bound as `name`, which must produce `T`.
    pub fn with_typed_object<T: 'static>(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.objects.push((name.clone(), ObjectReference::typed::<T>(name)));
        self
    }

    /// Declares the parameter type.
    pub fn with_parameter<T: 'static>(&mut self) -> &mut Self {
        self.parameter = Some(TypeInfo::of::<T>());
        self
    }

    /// Declares an object slot satisfied by the parameter.
    pub fn with_parameter_object(&mut self, name: impl Into<String>) -> &mut Self {
        self.objects.push((name.into(), ObjectReference::Parameter));
        self
    }

    /// Sets the function instigated once this one completes.
    pub fn with_next(&mut self, function: impl Into<String>) -> &mut Self {
        self.next = Some(function.into());
        self
    }

    /// Handles escalations caused by `E` with `function`.
    pub fn with_escalation<E: core::error::Error + 'static>(
        &mut self,
        function: impl Into<String>,
    ) -> &mut Self {
        self.escalations.push((EscalationMatcher::of::<E>(), function.into()));
        self
    }

    /// Handles escalations accepted by `matcher` with `function`.
    pub fn with_escalation_matcher(
        &mut self,
        matcher: EscalationMatcher,
        function: impl Into<String>,
    ) -> &mut Self {
        self.escalations.push((matcher, function.into()));
        self
    }

    /// Makes the team `name` responsible for executing the function.
    pub fn with_team(&mut self, name: impl Into<String>) -> &mut Self {
        self.team = Some(name.into());
        self
    }

    /// Requires the governance `name` active while the function executes.
    pub fn with_governance(&mut self, name: impl Into<String>) -> &mut Self {
        self.governances.push(name.into());
        self
    }

    /// Runs `duty` over `objects` before the first execution pass.
    pub fn with_pre_administration<F>(
        &mut self,
        name: impl Into<String>,
        objects: &[&str],
        duty: F,
    ) -> &mut Self
    where
        F: FnMut(&AdministrationContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static,
    {
        let declaration = administration(name.into(), objects, duty);
        self.pre.push(declaration);
        self
    }

    /// Runs `duty` over `objects` after the completing execution pass.
    pub fn with_post_administration<F>(
        &mut self,
        name: impl Into<String>,
        objects: &[&str],
        duty: F,
    ) -> &mut Self
    where
        F: FnMut(&AdministrationContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static,
    {
        let declaration = administration(name.into(), objects, duty);
        self.post.push(declaration);
        self
    }

    /// Overrides the office default asynchronous operation timeout.
    pub fn with_async_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.async_timeout = Some(timeout);
        self
    }
}

fn administration<F>(name: String, objects: &[&str], duty: F) -> AdministrationDeclaration
where
    F: FnMut(&AdministrationContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static,
{
    AdministrationDeclaration {
        name,
        factory: Arc::new(move || -> Box<dyn Administration> {
            Box::new(administration_fn(duty.clone()))
        }),
        objects: objects.iter().map(|object| (*object).to_string()).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OfficeBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Collects the configuration of an office.
pub struct OfficeBuilder {
    config: OfficeConfig,
    objects: Vec<ManagedObjectBuilder>,
    governances: Vec<(String, GovernanceFactory)>,
    teams: Vec<(String, Arc<dyn Team>)>,
    functions: Vec<FunctionBuilder>,
    escalations: Vec<(EscalationMatcher, String)>,
    office_handler: Option<EscalationHandler>,
    floor_handler: Option<EscalationHandler>,
}

impl OfficeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(config: OfficeConfig) -> Self {
        Self {
            config,
            objects: Vec::new(),
            governances: Vec::new(),
            teams: Vec::new(),
            functions: Vec::new(),
            escalations: Vec::new(),
            office_handler: None,
            floor_handler: None,
        }
    }

    /// Binds a managed object under `name`.
    pub fn add_managed_object(
        &mut self,
        name: impl Into<String>,
        scope: ManagedObjectScope,
        source: impl ManagedObjectSource,
    ) -> &mut ManagedObjectBuilder {
        self.objects.push(ManagedObjectBuilder {
            name: name.into(),
            scope,
            source: Arc::new(source),
            produces: None,
            dependencies: Vec::new(),
            governances: Vec::new(),
        });
        let last = self.objects.len() - 1;
        &mut self.objects[last]
    }

    /// Registers a governance created by `factory`.
    pub fn add_governance<G, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        G: Governance,
        F: Fn() -> G + Send + Sync + 'static,
    {
        let factory: GovernanceFactory =
            Arc::new(move || -> Box<dyn Governance> { Box::new(factory()) });
        self.governances.push((name.into(), factory));
        self
    }

    /// Registers a team.
    pub fn add_team(&mut self, name: impl Into<String>, team: impl Team) -> &mut Self {
        self.teams.push((name.into(), Arc::new(team)));
        self
    }

    /// Adds a function whose instances are created by `factory`.
    pub fn add_function<F>(&mut self, name: impl Into<String>, factory: F) -> &mut FunctionBuilder
    where
        F: Fn() -> Box<dyn ManagedFunction> + Send + Sync + 'static,
    {
        self.functions.push(FunctionBuilder {
            name: name.into(),
            factory: Arc::new(factory),
            parameter: None,
            objects: Vec::new(),
            next: None,
            escalations: Vec::new(),
            team: None,
            governances: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
            async_timeout: None,
        });
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    /// Adds a function implemented by a closure. Each invocation starts from a
    /// fresh clone of `body`.
    pub fn add_fn<F>(&mut self, name: impl Into<String>, body: F) -> &mut FunctionBuilder
    where
        F: FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static,
    {
        self.add_function(name, move || -> Box<dyn ManagedFunction> {
            Box::new(from_fn(body.clone()))
        })
    }

    /// Handles escalations caused by `E`, that no function handled, with
    /// `function`.
    pub fn add_escalation<E: core::error::Error + 'static>(
        &mut self,
        function: impl Into<String>,
    ) -> &mut Self {
        self.escalations.push((EscalationMatcher::of::<E>(), function.into()));
        self
    }

    /// Handles escalations accepted by `matcher` with `function` at office level.
    pub fn add_escalation_matcher(
        &mut self,
        matcher: EscalationMatcher,
        function: impl Into<String>,
    ) -> &mut Self {
        self.escalations.push((matcher, function.into()));
        self
    }

    /// Sets the handler for escalations the office escalation procedure does
    /// not handle.
    pub fn with_office_handler(
        &mut self,
        handler: impl Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    ) -> &mut Self {
        self.office_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the last resort handler.
    pub fn with_floor_handler(
        &mut self,
        handler: impl Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    ) -> &mut Self {
        self.floor_handler = Some(Arc::new(handler));
        self
    }

    /// Validates the configuration and builds the metadata graph.
    #[must_use]
    pub fn build(self) -> OfficeMetaData {
        let Self {
            config,
            objects,
            governances,
            teams,
            functions,
            escalations,
            office_handler,
            floor_handler,
        } = self;
        let mut issues = Vec::new();

        let teams = build_teams(teams, &mut issues);
        let governances = build_governances(governances, &mut issues);
        let registry = build_objects(objects, &governances, &mut issues);
        let (functions, procedure) = build_functions(
            &config,
            functions,
            escalations,
            &registry,
            &teams,
            &governances,
            &mut issues,
        );

        for issue in &issues {
            tracing::warn!(asset = issue.asset(), %issue, "configuration issue");
        }

        let by_name = functions
            .iter()
            .enumerate()
            .map(|(position, function)| (function.name.clone(), FunctionId(position)))
            .collect();

        OfficeMetaData {
            config,
            functions,
            by_name,
            objects: registry,
            teams,
            governances,
            procedure,
            office_handler,
            floor_handler,
            issues,
        }
    }
}

/// Keeps the first of each name, recording the rest as duplicates.
fn dedup<T>(
    kind: AssetKind,
    items: Vec<T>,
    name: impl Fn(&T) -> &str,
    issues: &mut Vec<ConfigurationIssue>,
) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let unique = seen.insert(name(item).to_string());
            if !unique {
                issues.push(ConfigurationIssue::DuplicateName {
                    kind,
                    name: name(item).to_string(),
                });
            }
            unique
        })
        .collect()
}

fn build_teams(
    teams: Vec<(String, Arc<dyn Team>)>,
    issues: &mut Vec<ConfigurationIssue>,
) -> Vec<Arc<TeamMetaData>> {
    dedup(AssetKind::Team, teams, |(name, _)| name, issues)
        .into_iter()
        .zip(0_u32..)
        .map(|((name, team), id)| {
            Arc::new(TeamMetaData {
                id: TeamId(id),
                name,
                team,
            })
        })
        .collect()
}

fn build_governances(
    governances: Vec<(String, GovernanceFactory)>,
    issues: &mut Vec<ConfigurationIssue>,
) -> Vec<Arc<GovernanceMetaData>> {
    dedup(AssetKind::Governance, governances, |(name, _)| name, issues)
        .into_iter()
        .enumerate()
        .map(|(index, (name, factory))| Arc::new(GovernanceMetaData { name, index, factory }))
        .collect()
}

fn build_objects(
    objects: Vec<ManagedObjectBuilder>,
    governances: &[Arc<GovernanceMetaData>],
    issues: &mut Vec<ConfigurationIssue>,
) -> ObjectRegistry {
    let objects = dedup(AssetKind::ManagedObject, objects, |object| &object.name, issues);

    let mut slots = [0_usize; 3];
    let indices: HashMap<String, ManagedObjectIndex> = objects
        .iter()
        .map(|object| {
            let slot = &mut slots[object.scope.ordinal()];
            let index = ManagedObjectIndex::new(object.scope, *slot);
            *slot += 1;
            (object.name.clone(), index)
        })
        .collect();
    let governance_index: HashMap<&str, usize> = governances
        .iter()
        .map(|governance| (governance.name.as_str(), governance.index))
        .collect();

    let mut registry = ObjectRegistry::new();
    for object in objects {
        let index = indices[&object.name];
        let mut valid = true;

        let mut dependencies = Vec::with_capacity(object.dependencies.len());
        for (key, dependency) in object.dependencies {
            let Some(&dependency_index) = indices.get(&dependency) else {
                issues.push(ConfigurationIssue::UnknownDependency {
                    object: object.name.clone(),
                    dependency,
                });
                valid = false;
                continue;
            };
            if !object.scope.may_depend_on(dependency_index.scope()) {
                issues.push(ConfigurationIssue::ScopeViolation {
                    object: object.name.clone(),
                    scope: object.scope,
                    dependency,
                    dependency_scope: dependency_index.scope(),
                });
                valid = false;
                continue;
            }
            dependencies.push(ObjectDependency {
                key,
                object: dependency,
                index: dependency_index,
            });
        }

        let mut subject_to = Vec::with_capacity(object.governances.len());
        for governance in object.governances {
            match governance_index.get(governance.as_str()) {
                Some(&index) => subject_to.push(index),
                None => {
                    issues.push(ConfigurationIssue::UnknownGovernance {
                        kind: AssetKind::ManagedObject,
                        asset: object.name.clone(),
                        governance,
                    });
                    valid = false;
                }
            }
        }

        let name = object.name;
        registry.insert(Arc::new(ManagedObjectMetaData {
            name: name.clone(),
            index,
            produces: object.produces,
            source: object.source,
            dependencies,
            governances: subject_to,
        }));
        if !valid {
            registry.invalidate(name);
        }
    }
    registry
}

/// A function that passed its own checks, awaiting reference validation.
struct Candidate {
    declaration: FunctionBuilder,
    resolved: crate::resolver::ResolvedObjects,
    team: Option<TeamId>,
    governance: Option<BitVec>,
}

fn build_functions(
    config: &OfficeConfig,
    functions: Vec<FunctionBuilder>,
    escalations: Vec<(EscalationMatcher, String)>,
    registry: &ObjectRegistry,
    teams: &[Arc<TeamMetaData>],
    governances: &[Arc<GovernanceMetaData>],
    issues: &mut Vec<ConfigurationIssue>,
) -> (Vec<Arc<FunctionMetaData>>, EscalationProcedure<FunctionId>) {
    let functions = dedup(AssetKind::Function, functions, |function| &function.name, issues);
    let parameters: HashMap<String, Option<TypeInfo>> = functions
        .iter()
        .map(|function| (function.name.clone(), function.parameter))
        .collect();

    let mut invalid: HashSet<String> = HashSet::new();
    let mut candidates = Vec::with_capacity(functions.len());
    for declaration in functions {
        let before = issues.len();
        let name = declaration.name.clone();

        let administered: Vec<Vec<String>> = declaration
            .pre
            .iter()
            .chain(&declaration.post)
            .map(|duty| duty.objects.clone())
            .collect();
        let resolved = registry.resolve(&name, &declaration.objects, &administered);

        let references = declaration
            .next
            .iter()
            .chain(declaration.escalations.iter().map(|(_, handler)| handler));
        for reference in references {
            if !parameters.contains_key(reference) {
                issues.push(ConfigurationIssue::UnknownFunction {
                    function: name.clone(),
                    reference: reference.clone(),
                });
            }
        }

        let team = match &declaration.team {
            None => None,
            Some(team) => match teams.iter().find(|candidate| candidate.name == *team) {
                Some(metadata) => Some(metadata.id),
                None => {
                    issues.push(ConfigurationIssue::UnknownTeam {
                        function: name.clone(),
                        team: team.clone(),
                    });
                    None
                }
            },
        };

        let governance = if config.manual_governance() {
            for governance in &declaration.governances {
                issues.push(ConfigurationIssue::ManualGovernance {
                    function: name.clone(),
                    governance: governance.clone(),
                });
            }
            None
        } else {
            let mut required = BitVec::repeat(false, governances.len());
            for governance in &declaration.governances {
                match governances.iter().find(|candidate| candidate.name == *governance) {
                    Some(metadata) => required.set(metadata.index, true),
                    None => issues.push(ConfigurationIssue::UnknownGovernance {
                        kind: AssetKind::Function,
                        asset: name.clone(),
                        governance: governance.clone(),
                    }),
                }
            }
            Some(required)
        };

        match resolved {
            Ok(resolved) if issues.len() == before => candidates.push(Candidate {
                declaration,
                resolved,
                team,
                governance,
            }),
            Ok(_) => {
                invalid.insert(name);
            }
            Err(resolution) => {
                issues.extend(resolution);
                invalid.insert(name);
            }
        }
    }

    // Escalation handlers receive the escalation as their parameter.
    let handlers: HashSet<String> = candidates
        .iter()
        .flat_map(|candidate| &candidate.declaration.escalations)
        .chain(&escalations)
        .map(|(_, handler)| handler.clone())
        .collect();
    for candidate in &candidates {
        let declaration = &candidate.declaration;
        if !handlers.contains(&declaration.name) {
            continue;
        }
        if let Some(parameter) = declaration.parameter
            && parameter.id() != core::any::TypeId::of::<Escalation>()
        {
            issues.push(ConfigurationIssue::InvalidEscalationHandler {
                handler: declaration.name.clone(),
                parameter: parameter.name(),
            });
            invalid.insert(declaration.name.clone());
        }
    }

    // Invalidate functions referencing invalid functions until stable.
    loop {
        let mut changed = false;
        for candidate in &candidates {
            let declaration = &candidate.declaration;
            if invalid.contains(&declaration.name) {
                continue;
            }
            let broken = declaration
                .next
                .iter()
                .chain(declaration.escalations.iter().map(|(_, handler)| handler))
                .find(|reference| invalid.contains(*reference))
                .cloned();
            if let Some(reference) = broken {
                issues.push(ConfigurationIssue::InvalidFunction {
                    function: declaration.name.clone(),
                    reference,
                });
                invalid.insert(declaration.name.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let candidates: Vec<_> = candidates
        .into_iter()
        .filter(|candidate| !invalid.contains(&candidate.declaration.name))
        .collect();
    let ids: HashMap<String, FunctionId> = candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| (candidate.declaration.name.clone(), FunctionId(position)))
        .collect();

    let mut procedure = EscalationProcedure::new();
    for (matcher, handler) in escalations {
        match ids.get(&handler) {
            Some(&id) => procedure.push(matcher, id),
            None if parameters.contains_key(&handler) => {
                issues.push(ConfigurationIssue::InvalidFunction {
                    function: OFFICE_ASSET.to_string(),
                    reference: handler,
                });
            }
            None => issues.push(ConfigurationIssue::UnknownFunction {
                function: OFFICE_ASSET.to_string(),
                reference: handler,
            }),
        }
    }

    let functions = candidates
        .into_iter()
        .enumerate()
        .map(|(position, candidate)| {
            let Candidate {
                declaration,
                resolved,
                team,
                governance,
            } = candidate;

            let mut administered = resolved.administered.into_iter();
            let mut duties = |declarations: Vec<AdministrationDeclaration>| -> Vec<AdministrationMetaData> {
                declarations
                    .into_iter()
                    .map(|duty| AdministrationMetaData {
                        name: duty.name,
                        factory: duty.factory,
                        objects: administered.next().unwrap_or_default(),
                    })
                    .collect()
            };
            let pre_administration = duties(declaration.pre);
            let post_administration = duties(declaration.post);

            let mut escalation_procedure = EscalationProcedure::new();
            for (matcher, handler) in declaration.escalations {
                if let Some(&id) = ids.get(&handler) {
                    escalation_procedure.push(matcher, id);
                }
            }

            Arc::new(FunctionMetaData {
                id: Some(FunctionId(position)),
                name: declaration.name,
                factory: declaration.factory,
                parameter: declaration.parameter,
                objects: resolved.bindings,
                required: resolved.required,
                required_governance: governance,
                pre_administration,
                post_administration,
                escalation_procedure,
                next: declaration.next.and_then(|next| ids.get(&next).copied()),
                team,
                async_timeout: declaration
                    .async_timeout
                    .unwrap_or_else(|| config.default_async_timeout()),
            })
        })
        .collect();

    (functions, procedure)
}

// ─────────────────────────────────────────────────────────────────────────────
// OfficeMetaData
// ─────────────────────────────────────────────────────────────────────────────

/// The validated, immutable metadata graph of an office.
pub struct OfficeMetaData {
    config: OfficeConfig,
    functions: Vec<Arc<FunctionMetaData>>,
    by_name: HashMap<String, FunctionId>,
    objects: ObjectRegistry,
    teams: Vec<Arc<TeamMetaData>>,
    governances: Vec<Arc<GovernanceMetaData>>,
    procedure: EscalationProcedure<FunctionId>,
    office_handler: Option<EscalationHandler>,
    floor_handler: Option<EscalationHandler>,
    issues: Vec<ConfigurationIssue>,
}

impl OfficeMetaData {
    /// Problems found while building. Assets with issues are absent.
    #[must_use]
    pub fn issues(&self) -> &[ConfigurationIssue] {
        &self.issues
    }

    /// The office configuration.
    #[must_use]
    pub fn config(&self) -> &OfficeConfig {
        &self.config
    }

    /// Looks a function up by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Arc<FunctionMetaData>> {
        self.by_name.get(name).map(|id| &self.functions[id.0])
    }

    /// Looks a function up by id.
    #[must_use]
    pub fn function_by_id(&self, id: FunctionId) -> Option<&Arc<FunctionMetaData>> {
        self.functions.get(id.0)
    }

    /// All valid functions.
    #[must_use]
    pub fn functions(&self) -> &[Arc<FunctionMetaData>] {
        &self.functions
    }

    /// The bound managed objects, including invalid ones.
    #[must_use]
    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    /// All registered teams.
    #[must_use]
    pub fn teams(&self) -> &[Arc<TeamMetaData>] {
        &self.teams
    }

    /// Looks a team up by id.
    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<&Arc<TeamMetaData>> {
        self.teams.get(id.index())
    }

    /// All registered governances, in index order.
    #[must_use]
    pub fn governances(&self) -> &[Arc<GovernanceMetaData>] {
        &self.governances
    }

    /// The office-wide escalation procedure.
    #[must_use]
    pub fn procedure(&self) -> &EscalationProcedure<FunctionId> {
        &self.procedure
    }

    /// The office escalation handler.
    #[must_use]
    pub fn office_handler(&self) -> Option<&EscalationHandler> {
        self.office_handler.as_ref()
    }

    /// The last resort escalation handler.
    #[must_use]
    pub fn floor_handler(&self) -> Option<&EscalationHandler> {
        self.floor_handler.as_ref()
    }
}

impl fmt::Debug for OfficeMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfficeMetaData")
            .field("functions", &self.functions.len())
            .field("objects", &self.objects.len())
            .field("teams", &self.teams.len())
            .field("governances", &self.governances.len())
            .field("issues", &self.issues)
            .finish_non_exhaustive()
    }
}
