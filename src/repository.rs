//! Canonical type instances and the class hierarchy they form.
//!
//! Interning is append-only and safe to use from analysis threads. Hierarchy
//! edges can only be added through `&mut self`, so a repository shared behind
//! an `Arc` is frozen for the duration of the analysis phase.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::signature::{JavaType, Wildcard};
use crate::types::{
    BOTTOM_SIGNATURE, BaseType, CLONEABLE_CLASS, NULL_SIGNATURE, OBJECT_CLASS, SERIALIZABLE_CLASS,
    TOP_SIGNATURE, TypeEntry, TypeId, TypeKind, WildcardBound, dotted_name, slashed_name,
};

/// Supertype information for one class, as supplied by a `ClassResolver`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ClassInfo {
    pub(crate) is_interface: bool,
    pub(crate) superclass: Option<String>,
    pub(crate) interfaces: Vec<String>,
}

/// Source of hierarchy information for classes whose edges were never registered.
pub(crate) trait ClassResolver: Send + Sync {
    fn resolve_class(&self, name: &str) -> Option<ClassInfo>;
}

/// How much is known about a class's supertypes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum HierarchyState {
    /// Referenced, but no edges registered yet.
    #[default]
    Unknown,
    Known,
    /// The resolver was asked and could not find the class.
    Missing,
}

/// Hierarchy node for a class type, keyed by its `TypeId`.
#[derive(Clone, Debug, Default)]
struct ClassNode {
    state: HierarchyState,
    is_interface: bool,
    superclass: Option<TypeId>,
    interfaces: BTreeSet<TypeId>,
    subtypes: BTreeSet<TypeId>,
}

#[derive(Default)]
struct Interner {
    entries: Vec<TypeEntry>,
    by_signature: HashMap<String, TypeId>,
}

/// Owner of all types created for one analysis run.
pub(crate) struct TypeRepository {
    interner: RwLock<Interner>,
    classes: BTreeMap<TypeId, ClassNode>,
    resolver: Option<Box<dyn ClassResolver>>,
    supertype_cache: RwLock<HashMap<TypeId, Arc<BTreeSet<TypeId>>>>,
    reported_missing: Mutex<BTreeSet<String>>,
}

impl TypeRepository {
    pub(crate) fn new() -> Self {
        let mut repository = Self {
            interner: RwLock::new(Interner::default()),
            classes: BTreeMap::new(),
            resolver: None,
            supertype_cache: RwLock::new(HashMap::new()),
            reported_missing: Mutex::new(BTreeSet::new()),
        };
        for base in BaseType::ALL {
            repository.insert(TypeKind::Base(base), base.code().to_string());
        }
        repository.insert(TypeKind::Null, NULL_SIGNATURE.to_string());
        repository.insert(TypeKind::Top, TOP_SIGNATURE.to_string());
        repository.insert(TypeKind::Bottom, BOTTOM_SIGNATURE.to_string());
        let object = repository.class_type(OBJECT_CLASS);
        let serializable = repository.class_type(SERIALIZABLE_CLASS);
        let cloneable = repository.class_type(CLONEABLE_CLASS);
        debug_assert_eq!(object, TypeId::OBJECT);
        debug_assert_eq!(serializable, TypeId::SERIALIZABLE);
        debug_assert_eq!(cloneable, TypeId::CLONEABLE);
        repository.mark_known(TypeId::OBJECT);
        repository.set_is_interface(TypeId::SERIALIZABLE, true);
        repository.set_is_interface(TypeId::CLONEABLE, true);
        debug_assert_eq!(repository.len(), TypeId::RESERVED);
        repository
    }

    /// Repository that asks `resolver` about classes whose edges were never registered.
    pub(crate) fn with_resolver(resolver: Box<dyn ClassResolver>) -> Self {
        let mut repository = Self::new();
        repository.resolver = Some(resolver);
        repository
    }

    pub(crate) fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    fn insert(&self, kind: TypeKind, signature: String) -> TypeId {
        if let Some(id) = self.lookup(&signature) {
            return id;
        }
        let mut interner = self.interner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = interner.by_signature.get(&signature) {
            return *id;
        }
        let id = TypeId::from_index(interner.entries.len());
        interner.by_signature.insert(signature.clone(), id);
        interner.entries.push(TypeEntry { kind, signature });
        id
    }

    /// Interned type with the given canonical signature, if any.
    pub(crate) fn lookup(&self, signature: &str) -> Option<TypeId> {
        let interner = self.interner.read().unwrap_or_else(PoisonError::into_inner);
        interner.by_signature.get(signature).copied()
    }

    /// Interned class type for a dotted or slashed name, if any.
    pub(crate) fn lookup_class(&self, name: &str) -> Option<TypeId> {
        self.lookup(&format!("L{};", slashed_name(name)))
    }

    pub(crate) fn len(&self) -> usize {
        let interner = self.interner.read().unwrap_or_else(PoisonError::into_inner);
        interner.entries.len()
    }

    pub(crate) fn kind(&self, id: TypeId) -> TypeKind {
        let interner = self.interner.read().unwrap_or_else(PoisonError::into_inner);
        interner.entries[id.index()].kind.clone()
    }

    /// Canonical signature of an interned type.
    pub(crate) fn signature(&self, id: TypeId) -> String {
        let interner = self.interner.read().unwrap_or_else(PoisonError::into_inner);
        interner.entries[id.index()].signature.clone()
    }

    /// Slashed name of a class type.
    pub(crate) fn class_name(&self, id: TypeId) -> Option<String> {
        match self.kind(id) {
            TypeKind::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Java source rendering of an interned type.
    pub(crate) fn java_name(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Base(base) => base.java_name().to_string(),
            TypeKind::Class(name) => dotted_name(&name),
            TypeKind::Array {
                dimensions,
                element,
            } => format!("{}{}", self.java_name(element), "[]".repeat(dimensions as usize)),
            TypeKind::Null => "null".to_string(),
            TypeKind::Top => "<top>".to_string(),
            TypeKind::Bottom => "<bottom>".to_string(),
            TypeKind::TypeVariable(name) => name,
            TypeKind::Wildcard(WildcardBound::Unbounded) => "?".to_string(),
            TypeKind::Wildcard(WildcardBound::Extends(bound)) => {
                format!("? extends {}", self.java_name(bound))
            }
            TypeKind::Wildcard(WildcardBound::Super(bound)) => {
                format!("? super {}", self.java_name(bound))
            }
            TypeKind::Parameterized { base, arguments } => {
                let arguments: Vec<String> =
                    arguments.iter().map(|argument| self.java_name(*argument)).collect();
                format!("{}<{}>", self.java_name(base), arguments.join(","))
            }
        }
    }

    /// Class type for a dotted or slashed name; both forms yield the same id.
    pub(crate) fn class_type(&self, name: &str) -> TypeId {
        let name = slashed_name(name);
        let signature = format!("L{name};");
        self.insert(TypeKind::Class(name), signature)
    }

    /// Array type; an array element contributes its own dimensions.
    pub(crate) fn array_type(&self, dimensions: u32, element: TypeId) -> TypeId {
        if dimensions == 0 {
            return element;
        }
        let (dimensions, element) = match self.kind(element) {
            TypeKind::Array {
                dimensions: inner,
                element,
            } => (dimensions + inner, element),
            _ => (dimensions, element),
        };
        let signature = format!("{}{}", "[".repeat(dimensions as usize), self.signature(element));
        self.insert(TypeKind::Array { dimensions, element }, signature)
    }

    pub(crate) fn type_variable(&self, name: &str) -> TypeId {
        self.insert(TypeKind::TypeVariable(name.to_string()), format!("T{name};"))
    }

    pub(crate) fn wildcard(&self, bound: WildcardBound) -> TypeId {
        let signature = match bound {
            WildcardBound::Unbounded => "*".to_string(),
            WildcardBound::Extends(bound) => format!("+{}", self.signature(bound)),
            WildcardBound::Super(bound) => format!("-{}", self.signature(bound)),
        };
        self.insert(TypeKind::Wildcard(bound), signature)
    }

    /// Register a parsed type tree and every type it mentions.
    pub(crate) fn intern(&self, java_type: &JavaType) -> TypeId {
        match java_type {
            JavaType::Base(base) => base.type_id(),
            JavaType::Class(class) => {
                let base = self.class_type(&class.binary_name());
                if !class.is_parameterized() {
                    return base;
                }
                let arguments: Vec<TypeId> = class
                    .arguments()
                    .iter()
                    .map(|argument| self.intern(argument))
                    .collect();
                self.insert(
                    TypeKind::Parameterized { base, arguments },
                    java_type.to_string(),
                )
            }
            JavaType::Array {
                dimensions,
                element,
            } => {
                let element = self.intern(element);
                self.array_type(*dimensions, element)
            }
            JavaType::TypeVariable(name) => self.type_variable(name),
            JavaType::Wildcard(Wildcard::Unbounded) => self.wildcard(WildcardBound::Unbounded),
            JavaType::Wildcard(Wildcard::Extends(bound)) => {
                let bound = self.intern(bound);
                self.wildcard(WildcardBound::Extends(bound))
            }
            JavaType::Wildcard(Wildcard::Super(bound)) => {
                let bound = self.intern(bound);
                self.wildcard(WildcardBound::Super(bound))
            }
        }
    }

    fn node_mut(&mut self, id: TypeId) -> &mut ClassNode {
        self.supertype_cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.classes.entry(id).or_default()
    }

    fn is_class(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Class(_))
    }

    /// Record that a class's supertypes are fully registered, even if it has none.
    pub(crate) fn mark_known(&mut self, id: TypeId) {
        if self.is_class(id) {
            self.node_mut(id).state = HierarchyState::Known;
        }
    }

    /// Declare a class or interface. Interfaces receive an implicit link to the root object.
    pub(crate) fn set_is_interface(&mut self, id: TypeId, is_interface: bool) {
        if !self.is_class(id) {
            debug!(signature = %self.signature(id), "ignoring interface flag on non-class type");
            return;
        }
        let node = self.node_mut(id);
        node.is_interface = is_interface;
        node.state = HierarchyState::Known;
        if is_interface && node.superclass.is_none() && id != TypeId::OBJECT {
            self.link_superclass(id, TypeId::OBJECT);
        }
    }

    pub(crate) fn is_interface(&self, id: TypeId) -> bool {
        self.classes.get(&id).is_some_and(|node| node.is_interface)
    }

    pub(crate) fn hierarchy_state(&self, id: TypeId) -> HierarchyState {
        self.classes
            .get(&id)
            .map(|node| node.state)
            .unwrap_or_default()
    }

    /// Idempotent. A target previously flagged as an interface is re-flagged as a class.
    pub(crate) fn add_superclass_link(&mut self, sub: TypeId, sup: TypeId) {
        if !self.is_class(sub) || !self.is_class(sup) || sub == sup {
            debug!(
                sub = %self.signature(sub),
                sup = %self.signature(sup),
                "ignoring superclass link between non-class types"
            );
            return;
        }
        self.node_mut(sup).is_interface = false;
        self.link_superclass(sub, sup);
        self.node_mut(sub).state = HierarchyState::Known;
    }

    fn link_superclass(&mut self, sub: TypeId, sup: TypeId) {
        self.node_mut(sup).subtypes.insert(sub);
        let previous = self.node_mut(sub).superclass.replace(sup);
        if let Some(previous) = previous.filter(|previous| *previous != sup) {
            self.node_mut(previous).subtypes.remove(&sub);
        }
    }

    /// Idempotent. The target is flagged as an interface.
    pub(crate) fn add_interface_link(&mut self, id: TypeId, interface: TypeId) {
        if !self.is_class(id) || !self.is_class(interface) || id == interface {
            debug!(
                sub = %self.signature(id),
                interface = %self.signature(interface),
                "ignoring interface link between non-class types"
            );
            return;
        }
        let target = self.node_mut(interface);
        if !target.is_interface {
            target.is_interface = true;
            if target.superclass.is_none() {
                self.link_superclass(interface, TypeId::OBJECT);
            }
        }
        self.node_mut(interface).subtypes.insert(id);
        let node = self.node_mut(id);
        node.interfaces.insert(interface);
        node.state = HierarchyState::Known;
    }

    pub(crate) fn superclass(&self, id: TypeId) -> Option<TypeId> {
        self.classes.get(&id).and_then(|node| node.superclass)
    }

    pub(crate) fn interfaces(&self, id: TypeId) -> Vec<TypeId> {
        self.classes
            .get(&id)
            .map(|node| node.interfaces.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Superclass followed by interfaces.
    pub(crate) fn direct_supertypes(&self, id: TypeId) -> Vec<TypeId> {
        let mut supertypes: Vec<TypeId> = self.superclass(id).into_iter().collect();
        supertypes.extend(self.interfaces(id));
        supertypes
    }

    /// Classes and interfaces that name `id` as superclass or interface.
    pub(crate) fn direct_subtypes(&self, id: TypeId) -> Vec<TypeId> {
        self.classes
            .get(&id)
            .map(|node| node.subtypes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Register a class declaration by name.
    pub(crate) fn declare_class(&mut self, name: &str, info: &ClassInfo) -> TypeId {
        let id = self.class_type(name);
        self.set_is_interface(id, info.is_interface);
        if let Some(superclass) = &info.superclass {
            let superclass = self.class_type(superclass);
            self.add_superclass_link(id, superclass);
        }
        for interface in &info.interfaces {
            let interface = self.class_type(interface);
            self.add_interface_link(id, interface);
        }
        id
    }

    /// Ask the resolver about every class with unknown supertypes until none remain.
    ///
    /// Returns the slashed names the resolver could not find, which are marked missing.
    pub(crate) fn complete_hierarchy(&mut self) -> Vec<String> {
        let Some(resolver) = self.resolver.take() else {
            return Vec::new();
        };
        let mut missing = Vec::new();
        loop {
            let pending: Vec<TypeId> = (0..self.len())
                .map(TypeId::from_index)
                .filter(|id| {
                    self.is_class(*id) && self.hierarchy_state(*id) == HierarchyState::Unknown
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                let Some(name) = self.class_name(id) else {
                    continue;
                };
                match resolver.resolve_class(&name) {
                    Some(info) => {
                        self.declare_class(&name, &info);
                    }
                    None => {
                        self.node_mut(id).state = HierarchyState::Missing;
                        missing.push(name);
                    }
                }
            }
        }
        self.resolver = Some(resolver);
        missing.sort();
        missing
    }

    pub(crate) fn cached_supertypes(&self, id: TypeId) -> Option<Arc<BTreeSet<TypeId>>> {
        let cache = self
            .supertype_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        cache.get(&id).cloned()
    }

    pub(crate) fn cache_supertypes(&self, id: TypeId, supertypes: Arc<BTreeSet<TypeId>>) {
        let mut cache = self
            .supertype_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cache.insert(id, supertypes);
    }

    /// Log a class missing from the hierarchy, once per class.
    pub(crate) fn report_missing(&self, name: &str) {
        let mut reported = self
            .reported_missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reported.insert(name.to_string()) {
            warn!(class = %dotted_name(name), "class not found in hierarchy; query treated as indeterminate");
        }
    }

    pub(crate) fn reported_missing(&self) -> Vec<String> {
        let reported = self
            .reported_missing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        reported.iter().cloned().collect()
    }
}

impl Default for TypeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::parse_field_signature;

    struct MapResolver(BTreeMap<String, ClassInfo>);

    impl ClassResolver for MapResolver {
        fn resolve_class(&self, name: &str) -> Option<ClassInfo> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn dotted_and_slashed_names_intern_to_one_node() {
        let repository = TypeRepository::new();
        let slashed = repository.class_type("com/foobar/MyClass");
        let dotted = repository.class_type("com.foobar.MyClass");
        assert_eq!(slashed, dotted);
        assert_eq!(repository.signature(slashed), "Lcom/foobar/MyClass;");
        assert_eq!(repository.java_name(slashed), "com.foobar.MyClass");
        assert_eq!(repository.lookup_class("com.foobar.MyClass"), Some(slashed));
    }

    #[test]
    fn fixed_ids_are_preregistered() {
        let repository = TypeRepository::new();
        assert_eq!(repository.class_type("java.lang.Object"), TypeId::OBJECT);
        assert_eq!(repository.kind(TypeId::NULL), TypeKind::Null);
        assert_eq!(repository.lookup("I"), Some(BaseType::Int.type_id()));
        assert!(repository.is_interface(TypeId::SERIALIZABLE));
        assert!(repository.is_interface(TypeId::CLONEABLE));
        assert_eq!(repository.len(), TypeId::RESERVED);
    }

    #[test]
    fn array_types_flatten_dimensions() {
        let repository = TypeRepository::new();
        let string = repository.class_type("java/lang/String");
        let one = repository.array_type(1, string);
        let two = repository.array_type(1, one);
        assert_eq!(repository.array_type(2, string), two);
        assert_eq!(
            repository.kind(two),
            TypeKind::Array {
                dimensions: 2,
                element: string
            }
        );
        assert_eq!(repository.signature(two), "[[Ljava/lang/String;");
        assert_eq!(repository.java_name(two), "java.lang.String[][]");
    }

    #[test]
    fn interning_parsed_trees_reuses_instances() {
        let repository = TypeRepository::new();
        let parsed = parse_field_signature("Ljava/util/Map<Ljava/lang/String;[TV;>;").expect("parse");
        let first = repository.intern(&parsed);
        let second = repository.intern(&parsed);
        assert_eq!(first, second);
        assert_eq!(repository.signature(first), parsed.to_string());
        let TypeKind::Parameterized { base, arguments } = repository.kind(first) else {
            panic!("expected parameterized type");
        };
        assert_eq!(repository.class_name(base).as_deref(), Some("java/util/Map"));
        assert_eq!(arguments.len(), 2);
        assert_eq!(repository.signature(arguments[1]), "[TV;");
        assert_eq!(repository.java_name(first), "java.util.Map<java.lang.String,V[]>");
    }

    #[test]
    fn hierarchy_links_are_idempotent() {
        let mut repository = TypeRepository::new();
        let sub = repository.class_type("MyClass");
        let sup = repository.class_type("MySuperClass");
        let iface = repository.class_type("MyInterface");
        repository.add_superclass_link(sub, sup);
        repository.add_superclass_link(sub, sup);
        repository.add_interface_link(sup, iface);
        repository.add_interface_link(sup, iface);
        assert_eq!(repository.superclass(sub), Some(sup));
        assert_eq!(repository.interfaces(sup), vec![iface]);
        assert_eq!(repository.direct_subtypes(sup), vec![sub]);
        assert_eq!(repository.direct_subtypes(iface), vec![sup]);
        assert!(repository.is_interface(iface));
        assert_eq!(repository.superclass(iface), Some(TypeId::OBJECT));
        assert_eq!(repository.hierarchy_state(sub), HierarchyState::Known);
        assert_eq!(repository.hierarchy_state(iface), HierarchyState::Unknown);
    }

    #[test]
    fn most_recent_interface_flag_wins() {
        let mut repository = TypeRepository::new();
        let sub = repository.class_type("Sub");
        let target = repository.class_type("Target");
        repository.add_interface_link(sub, target);
        assert!(repository.is_interface(target));
        let other = repository.class_type("Other");
        repository.add_superclass_link(other, target);
        assert!(!repository.is_interface(target));
    }

    #[test]
    fn replacing_a_superclass_moves_the_subtype_edge() {
        let mut repository = TypeRepository::new();
        let sub = repository.class_type("Sub");
        let first = repository.class_type("First");
        let second = repository.class_type("Second");
        repository.add_superclass_link(sub, first);
        repository.add_superclass_link(sub, second);
        assert!(repository.direct_subtypes(first).is_empty());
        assert_eq!(repository.direct_subtypes(second), vec![sub]);
    }

    #[test]
    fn resolver_completes_the_hierarchy() {
        let mut classes = BTreeMap::new();
        classes.insert(
            "MySuperClass".to_string(),
            ClassInfo {
                is_interface: false,
                superclass: Some(OBJECT_CLASS.to_string()),
                interfaces: vec!["MyInterface".to_string()],
            },
        );
        classes.insert(
            "MyInterface".to_string(),
            ClassInfo {
                is_interface: true,
                superclass: None,
                interfaces: Vec::new(),
            },
        );
        let mut repository = TypeRepository::with_resolver(Box::new(MapResolver(classes)));
        let sub = repository.class_type("MyClass");
        let sup = repository.class_type("MySuperClass");
        repository.add_superclass_link(sub, sup);
        let unknown = repository.class_type("Unknown");
        let missing = repository.complete_hierarchy();
        assert_eq!(missing, vec!["Unknown".to_string()]);
        assert_eq!(repository.hierarchy_state(unknown), HierarchyState::Missing);
        let iface = repository.lookup_class("MyInterface").expect("interface interned");
        assert!(repository.is_interface(iface));
        assert_eq!(repository.direct_supertypes(sup), vec![TypeId::OBJECT, iface]);
        assert!(repository.has_resolver());
    }

    #[test]
    fn missing_classes_are_reported_once() {
        let repository = TypeRepository::new();
        repository.report_missing("a/B");
        repository.report_missing("a/B");
        assert_eq!(repository.reported_missing(), vec!["a/B".to_string()]);
    }
}
