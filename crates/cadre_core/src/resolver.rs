//! Dependency resolution for function objects.
//!
//! Given the objects a function declares (and the objects its administration
//! duties use), the resolver binds each declaration to a managed object or to
//! the parameter, closes over every transitive dependency and orders the result
//! so each object comes after everything it depends on.
//!
//! Ordering among unrelated objects is deterministic: fewer transitive
//! dependencies first, then shorter lived scope, then lower slot.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::function::FunctionObject;
use crate::index::{ManagedObjectIndex, ObjectBinding, TypeInfo};
use crate::issues::ConfigurationIssue;
use crate::object::ManagedObjectMetaData;

/// A declared reference from a function to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectReference {
    /// A bound managed object, optionally required to produce a type.
    Managed {
        /// Bound name of the object.
        name: String,
        /// Type the function requires, if checked.
        required_type: Option<TypeInfo>,
    },
    /// The parameter the function is instigated with.
    Parameter,
}

impl ObjectReference {
    /// Untyped reference to the managed object bound as `name`.
    #[must_use]
    pub fn managed(name: impl Into<String>) -> Self {
        Self::Managed {
            name: name.into(),
            required_type: None,
        }
    }

    /// Reference to `name` that must produce a `T`.
    #[must_use]
    pub fn typed<T: 'static>(name: impl Into<String>) -> Self {
        Self::Managed {
            name: name.into(),
            required_type: Some(TypeInfo::of::<T>()),
        }
    }
}

/// The bound managed objects of an office.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: Vec<Arc<ManagedObjectMetaData>>,
    by_name: HashMap<String, usize>,
    by_index: HashMap<ManagedObjectIndex, usize>,
    invalid: HashSet<String>,
}

impl ObjectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object. A later registration under the same name or index
    /// replaces the lookup entry.
    pub fn insert(&mut self, metadata: Arc<ManagedObjectMetaData>) {
        let position = self.objects.len();
        self.by_name.insert(metadata.name.clone(), position);
        self.by_index.insert(metadata.index, position);
        self.objects.push(metadata);
    }

    /// Marks the object bound as `name` as misconfigured.
    pub fn invalidate(&mut self, name: impl Into<String>) {
        self.invalid.insert(name.into());
    }

    /// Returns `true` if `name` is bound and not misconfigured.
    #[must_use]
    pub fn is_valid(&self, name: &str) -> bool {
        self.by_name.contains_key(name) && !self.invalid.contains(name)
    }

    /// Looks an object up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ManagedObjectMetaData>> {
        self.by_name.get(name).map(|&position| &self.objects[position])
    }

    /// Looks an object up by index.
    #[must_use]
    pub fn by_index(&self, index: ManagedObjectIndex) -> Option<&Arc<ManagedObjectMetaData>> {
        self.by_index.get(&index).map(|&position| &self.objects[position])
    }

    /// Iterates objects in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ManagedObjectMetaData>> {
        self.objects.iter()
    }

    /// Number of registered objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Resolves the objects of `function`.
    ///
    /// `references` are the declared objects in declaration order;
    /// `administered` lists the object names of each administration duty.
    pub fn resolve(
        &self,
        function: &str,
        references: &[(String, ObjectReference)],
        administered: &[Vec<String>],
    ) -> Result<ResolvedObjects, Vec<ConfigurationIssue>> {
        let mut issues = Vec::new();
        let mut roots = Vec::new();

        let mut bindings = Vec::with_capacity(references.len());
        for (declared, reference) in references {
            let binding = match reference {
                ObjectReference::Parameter => Some(ObjectBinding::Parameter),
                ObjectReference::Managed {
                    name,
                    required_type,
                } => self
                    .bind(function, name, *required_type, &mut issues)
                    .map(ObjectBinding::Managed),
            };
            if let Some(binding) = binding {
                roots.extend(binding.index());
                bindings.push(FunctionObject {
                    name: declared.clone(),
                    binding,
                });
            }
        }

        let mut administered_indices = Vec::with_capacity(administered.len());
        for names in administered {
            let indices: Vec<_> = names
                .iter()
                .filter_map(|name| self.bind(function, name, None, &mut issues))
                .collect();
            roots.extend(indices.iter().copied());
            administered_indices.push(indices);
        }

        if !issues.is_empty() {
            return Err(issues);
        }

        let closure = self.closure(function, &roots, &mut issues);
        if !issues.is_empty() {
            return Err(issues);
        }

        let transitive = self.transitive(&closure);
        self.check_cycles(function, &closure, &transitive, &mut issues);
        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(ResolvedObjects {
            bindings,
            administered: administered_indices,
            required: order(closure, &transitive),
        })
    }

    fn bind(
        &self,
        function: &str,
        name: &str,
        required_type: Option<TypeInfo>,
        issues: &mut Vec<ConfigurationIssue>,
    ) -> Option<ManagedObjectIndex> {
        let Some(metadata) = self.get(name) else {
            issues.push(ConfigurationIssue::UnknownObject {
                function: function.to_string(),
                object: name.to_string(),
            });
            return None;
        };
        if self.invalid.contains(name) {
            issues.push(ConfigurationIssue::InvalidObject {
                function: function.to_string(),
                object: name.to_string(),
            });
            return None;
        }
        if let (Some(expected), Some(actual)) = (required_type, metadata.produces)
            && expected != actual
        {
            issues.push(ConfigurationIssue::TypeMismatch {
                function: function.to_string(),
                object: name.to_string(),
                expected: expected.name(),
                actual: actual.name(),
            });
            return None;
        }
        Some(metadata.index)
    }

    /// Closes over dependencies. Each index is visited once however many
    /// paths reach it.
    fn closure(
        &self,
        function: &str,
        roots: &[ManagedObjectIndex],
        issues: &mut Vec<ConfigurationIssue>,
    ) -> Vec<ManagedObjectIndex> {
        let mut seen = HashSet::new();
        let mut closure = Vec::new();
        let mut stack: Vec<_> = roots.iter().rev().copied().collect();

        while let Some(index) = stack.pop() {
            if !seen.insert(index) {
                continue;
            }
            let Some(metadata) = self.by_index(index) else {
                continue;
            };
            if self.invalid.contains(&metadata.name) {
                issues.push(ConfigurationIssue::InvalidObject {
                    function: function.to_string(),
                    object: metadata.name.clone(),
                });
                continue;
            }
            closure.push(index);
            stack.extend(metadata.dependencies.iter().rev().map(|dependency| dependency.index));
        }
        closure
    }

    fn transitive(
        &self,
        closure: &[ManagedObjectIndex],
    ) -> HashMap<ManagedObjectIndex, HashSet<ManagedObjectIndex>> {
        closure
            .iter()
            .map(|&start| {
                let mut reached = HashSet::new();
                let mut queue = std::collections::VecDeque::from([start]);
                while let Some(index) = queue.pop_front() {
                    let Some(metadata) = self.by_index(index) else {
                        continue;
                    };
                    for dependency in &metadata.dependencies {
                        if reached.insert(dependency.index) {
                            queue.push_back(dependency.index);
                        }
                    }
                }
                (start, reached)
            })
            .collect()
    }

    fn check_cycles(
        &self,
        function: &str,
        closure: &[ManagedObjectIndex],
        transitive: &HashMap<ManagedObjectIndex, HashSet<ManagedObjectIndex>>,
        issues: &mut Vec<ConfigurationIssue>,
    ) {
        let name = |index: ManagedObjectIndex| {
            self.by_index(index)
                .map_or_else(|| index.to_string(), |metadata| metadata.name.clone())
        };

        let mut selves = BTreeSet::new();
        let mut pairs = BTreeSet::new();
        for &index in closure {
            let Some(reached) = transitive.get(&index) else {
                continue;
            };
            if !reached.contains(&index) {
                continue;
            }
            let direct = self.by_index(index).is_some_and(|metadata| {
                metadata
                    .dependencies
                    .iter()
                    .any(|dependency| dependency.index == index)
            });
            if direct {
                selves.insert(name(index));
            }
            for &other in reached {
                if other == index {
                    continue;
                }
                if transitive.get(&other).is_some_and(|back| back.contains(&index)) {
                    let (a, b) = (name(index), name(other));
                    pairs.insert(if a <= b { (a, b) } else { (b, a) });
                }
            }
        }

        issues.extend(selves.into_iter().map(|object| ConfigurationIssue::SelfDependency {
            function: function.to_string(),
            object,
        }));
        issues.extend(
            pairs
                .into_iter()
                .map(|(first, second)| ConfigurationIssue::CyclicDependency {
                    function: function.to_string(),
                    first,
                    second,
                }),
        );
    }
}

/// Orders an acyclic closure dependencies first.
///
/// A dependency always reaches strictly fewer objects than its dependent, so
/// sorting by transitive size puts it first; scope and slot break ties.
fn order(
    mut closure: Vec<ManagedObjectIndex>,
    transitive: &HashMap<ManagedObjectIndex, HashSet<ManagedObjectIndex>>,
) -> Vec<ManagedObjectIndex> {
    closure.sort_by_key(|index| {
        (
            transitive.get(index).map_or(0, HashSet::len),
            index.scope().ordinal(),
            index.slot(),
        )
    });
    closure
}

/// Output of [`ObjectRegistry::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedObjects {
    /// One binding per declared object, in declaration order.
    pub bindings: Vec<FunctionObject>,
    /// Indices administered by each duty.
    pub administered: Vec<Vec<ManagedObjectIndex>>,
    /// Every object to prepare before execution, dependencies first.
    pub required: Vec<ManagedObjectIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::Escalation;
    use crate::index::ManagedObjectScope;
    use crate::object::{ManagedObject, ManagedObjectSource, ManagedObjectUser, ObjectDependency};
    use proptest::prelude::*;

    struct Unit;
    impl ManagedObject for Unit {}

    struct NeverSourced;
    impl ManagedObjectSource for NeverSourced {
        fn source(&self, user: ManagedObjectUser) {
            user.set_failure(Escalation::msg("not used"));
        }
    }

    fn object(
        name: &str,
        scope: ManagedObjectScope,
        slot: usize,
        dependencies: &[(&str, ManagedObjectIndex)],
    ) -> Arc<ManagedObjectMetaData> {
        Arc::new(ManagedObjectMetaData {
            name: name.to_string(),
            index: ManagedObjectIndex::new(scope, slot),
            produces: Some(TypeInfo::of::<Unit>()),
            source: Arc::new(NeverSourced),
            dependencies: dependencies
                .iter()
                .map(|(object, index)| ObjectDependency {
                    key: (*object).to_string(),
                    object: (*object).to_string(),
                    index: *index,
                })
                .collect(),
            governances: Vec::new(),
        })
    }

    fn process(slot: usize) -> ManagedObjectIndex {
        ManagedObjectIndex::new(ManagedObjectScope::Process, slot)
    }

    fn refs(names: &[&str]) -> Vec<(String, ObjectReference)> {
        names
            .iter()
            .map(|name| ((*name).to_string(), ObjectReference::managed(*name)))
            .collect()
    }

    #[test]
    fn dependency_comes_first() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("A", ManagedObjectScope::Process, 0, &[("B", process(1))]));
        registry.insert(object("B", ManagedObjectScope::Process, 1, &[]));

        let resolved = registry.resolve("F", &refs(&["A"]), &[]).unwrap();
        assert_eq!(resolved.required, vec![process(1), process(0)]);
        assert_eq!(resolved.bindings.len(), 1);
    }

    #[test]
    fn unrelated_objects_order_by_scope_then_slot() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("P", ManagedObjectScope::Process, 0, &[]));
        registry.insert(object("T", ManagedObjectScope::Thread, 3, &[]));
        registry.insert(object("F1", ManagedObjectScope::Function, 1, &[]));
        registry.insert(object("F0", ManagedObjectScope::Function, 0, &[]));

        let resolved = registry.resolve("F", &refs(&["P", "T", "F1", "F0"]), &[]).unwrap();
        assert_eq!(
            resolved.required,
            vec![
                ManagedObjectIndex::new(ManagedObjectScope::Function, 0),
                ManagedObjectIndex::new(ManagedObjectScope::Function, 1),
                ManagedObjectIndex::new(ManagedObjectScope::Thread, 3),
                process(0),
            ]
        );
    }

    #[test]
    fn shared_dependency_is_visited_once() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("A", ManagedObjectScope::Process, 0, &[("C", process(2))]));
        registry.insert(object("B", ManagedObjectScope::Process, 1, &[("C", process(2))]));
        registry.insert(object("C", ManagedObjectScope::Process, 2, &[]));

        let resolved = registry.resolve("F", &refs(&["A", "B"]), &[]).unwrap();
        assert_eq!(resolved.required.len(), 3);
        assert_eq!(resolved.required[0], process(2));
    }

    #[test]
    fn self_dependency_is_reported_once() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("B", ManagedObjectScope::Process, 0, &[("B", process(0))]));

        let issues = registry.resolve("F", &refs(&["B"]), &[]).unwrap_err();
        assert_eq!(
            issues,
            vec![ConfigurationIssue::SelfDependency {
                function: "F".into(),
                object: "B".into(),
            }]
        );
    }

    #[test]
    fn mutual_dependency_names_both_in_order() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("zeta", ManagedObjectScope::Process, 0, &[("alpha", process(1))]));
        registry.insert(object("alpha", ManagedObjectScope::Process, 1, &[("zeta", process(0))]));

        let issues = registry.resolve("F", &refs(&["zeta"]), &[]).unwrap_err();
        assert_eq!(
            issues,
            vec![ConfigurationIssue::CyclicDependency {
                function: "F".into(),
                first: "alpha".into(),
                second: "zeta".into(),
            }]
        );
    }

    #[test]
    fn unknown_and_mistyped_objects_are_issues() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("A", ManagedObjectScope::Process, 0, &[]));

        let references = vec![
            ("missing".to_string(), ObjectReference::managed("missing")),
            ("A".to_string(), ObjectReference::typed::<String>("A")),
        ];
        let issues = registry.resolve("F", &references, &[]).unwrap_err();
        assert!(matches!(issues[0], ConfigurationIssue::UnknownObject { .. }));
        assert!(matches!(issues[1], ConfigurationIssue::TypeMismatch { .. }));
    }

    #[test]
    fn invalid_dependency_invalidates_reference() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("A", ManagedObjectScope::Process, 0, &[("B", process(1))]));
        registry.insert(object("B", ManagedObjectScope::Process, 1, &[]));
        registry.invalidate("B");

        let issues = registry.resolve("F", &refs(&["A"]), &[]).unwrap_err();
        assert_eq!(
            issues,
            vec![ConfigurationIssue::InvalidObject {
                function: "F".into(),
                object: "B".into(),
            }]
        );
    }

    #[test]
    fn parameter_and_administered_objects() {
        let mut registry = ObjectRegistry::new();
        registry.insert(object("A", ManagedObjectScope::Process, 0, &[]));
        registry.insert(object("L", ManagedObjectScope::Thread, 0, &[]));

        let references = vec![("order".to_string(), ObjectReference::Parameter)];
        let resolved = registry
            .resolve("F", &references, &[vec!["L".to_string()], vec!["A".to_string()]])
            .unwrap();

        assert_eq!(resolved.bindings[0].binding, ObjectBinding::Parameter);
        assert_eq!(
            resolved.administered,
            vec![
                vec![ManagedObjectIndex::new(ManagedObjectScope::Thread, 0)],
                vec![process(0)],
            ]
        );
        assert_eq!(resolved.required.len(), 2);
    }

    fn dag() -> impl Strategy<Value = (Vec<usize>, Vec<Vec<usize>>)> {
        (1usize..12).prop_flat_map(|n| {
            let slots = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            let edges = proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n);
            (slots, edges).prop_map(move |(slots, edges)| {
                // Object `i` may only depend on objects created before it.
                let dependencies = edges
                    .iter()
                    .enumerate()
                    .map(|(i, row)| (0..i).filter(|&j| row[j]).collect())
                    .collect();
                (slots, dependencies)
            })
        })
    }

    proptest! {
        #[test]
        fn dependencies_always_precede_dependents((slots, dependencies) in dag()) {
            let mut registry = ObjectRegistry::new();
            let names: Vec<String> = (0..slots.len()).map(|i| format!("o{i}")).collect();
            for (i, deps) in dependencies.iter().enumerate() {
                let deps: Vec<(&str, ManagedObjectIndex)> = deps
                    .iter()
                    .map(|&j| (names[j].as_str(), process(slots[j])))
                    .collect();
                registry.insert(object(&names[i], ManagedObjectScope::Process, slots[i], &deps));
            }

            let all: Vec<&str> = names.iter().map(String::as_str).collect();
            let resolved = registry.resolve("F", &refs(&all), &[]).unwrap();
            prop_assert_eq!(resolved.required.len(), slots.len());

            let position: HashMap<ManagedObjectIndex, usize> = resolved
                .required
                .iter()
                .enumerate()
                .map(|(position, index)| (*index, position))
                .collect();
            for (i, deps) in dependencies.iter().enumerate() {
                for &j in deps {
                    prop_assert!(position[&process(slots[j])] < position[&process(slots[i])]);
                }
            }
        }
    }
}
