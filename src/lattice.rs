//! Subtype and join queries over a `TypeRepository`.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::errors::{HierarchyError, HierarchyResult};
use crate::repository::{HierarchyState, TypeRepository};
use crate::types::{TypeId, TypeKind};

impl TypeRepository {
    /// Whether `sub` is `sup` or one of its subtypes.
    pub(crate) fn is_subtype(&self, sub: TypeId, sup: TypeId) -> HierarchyResult<bool> {
        self.check_operand(sub)?;
        self.check_operand(sup)?;
        if sub == sup {
            return Ok(true);
        }
        let sub = self.erasure(sub);
        let sup = self.erasure(sup);
        if sub == sup {
            return Ok(true);
        }
        match (self.kind(sub), self.kind(sup)) {
            (TypeKind::Base(_), _) | (_, TypeKind::Base(_)) => Ok(false),
            (_, TypeKind::Null) => Ok(false),
            (TypeKind::Null, _) => Ok(true),
            _ if sup == TypeId::OBJECT => Ok(true),
            (
                TypeKind::Array {
                    dimensions: sub_dimensions,
                    element: sub_element,
                },
                TypeKind::Array {
                    dimensions: sup_dimensions,
                    element: sup_element,
                },
            ) => {
                if sub_dimensions == sup_dimensions {
                    self.is_subtype(sub_element, sup_element)
                } else if sub_dimensions > sup_dimensions {
                    Ok(self.erasure(sup_element).is_universal_array_supertype())
                } else {
                    Ok(false)
                }
            }
            (TypeKind::Array { .. }, TypeKind::Class(_)) => Ok(sup.is_universal_array_supertype()),
            (TypeKind::Class(_), TypeKind::Class(_)) => Ok(self.supertypes(sub)?.contains(&sup)),
            _ => Ok(false),
        }
    }

    /// `is_subtype` with indeterminate answers reported once and treated as `false`.
    pub(crate) fn is_subtype_or_false(&self, sub: TypeId, sup: TypeId) -> bool {
        match self.is_subtype(sub, sup) {
            Ok(answer) => answer,
            Err(HierarchyError::ClassNotFound(name)) => {
                self.report_missing(&name);
                false
            }
            Err(HierarchyError::UnsupportedOperand(_)) => false,
        }
    }

    /// Least common supertype of `a` and `b`.
    pub(crate) fn first_common_superclass(&self, a: TypeId, b: TypeId) -> HierarchyResult<TypeId> {
        if a == b {
            return Ok(a);
        }
        match (a, b) {
            (TypeId::TOP, other) | (other, TypeId::TOP) => return Ok(other),
            (TypeId::BOTTOM, _) | (_, TypeId::BOTTOM) => return Ok(TypeId::BOTTOM),
            _ => {}
        }
        let a = self.erasure(a);
        let b = self.erasure(b);
        if a == b {
            return Ok(a);
        }
        let (a_kind, b_kind) = (self.kind(a), self.kind(b));
        match (&a_kind, &b_kind) {
            (TypeKind::Base(_), _) | (_, TypeKind::Base(_)) => return Ok(TypeId::BOTTOM),
            (TypeKind::Null, _) => return Ok(b),
            (_, TypeKind::Null) => return Ok(a),
            _ => {}
        }
        if self.is_subtype(a, b)? {
            return Ok(b);
        }
        if self.is_subtype(b, a)? {
            return Ok(a);
        }
        match (a_kind, b_kind) {
            (
                TypeKind::Array {
                    dimensions: a_dimensions,
                    element: a_element,
                },
                TypeKind::Array {
                    dimensions: b_dimensions,
                    element: b_element,
                },
            ) => self.join_arrays((a_dimensions, a_element), (b_dimensions, b_element)),
            (TypeKind::Class(_), TypeKind::Class(_)) => self.join_classes(a, b),
            _ => Ok(TypeId::OBJECT),
        }
    }

    /// `first_common_superclass` with indeterminate answers reported once and treated as the root object.
    pub(crate) fn first_common_superclass_or_object(&self, a: TypeId, b: TypeId) -> TypeId {
        match self.first_common_superclass(a, b) {
            Ok(joined) => joined,
            Err(HierarchyError::ClassNotFound(name)) => {
                self.report_missing(&name);
                TypeId::OBJECT
            }
            Err(HierarchyError::UnsupportedOperand(_)) => TypeId::OBJECT,
        }
    }

    fn join_arrays(&self, a: (u32, TypeId), b: (u32, TypeId)) -> HierarchyResult<TypeId> {
        let ((a_dimensions, a_element), (b_dimensions, b_element)) = (a, b);
        if a_dimensions == b_dimensions {
            if self.is_primitive(a_element) || self.is_primitive(b_element) {
                return Ok(TypeId::OBJECT);
            }
            let element = self.first_common_superclass(a_element, b_element)?;
            return Ok(self.array_type(a_dimensions, element));
        }
        // Excess dimensions of the deeper array reduce to an Object element.
        let (dimensions, element) = if a_dimensions < b_dimensions {
            (a_dimensions, a_element)
        } else {
            (b_dimensions, b_element)
        };
        if self.is_primitive(element) {
            return Ok(TypeId::OBJECT);
        }
        let element = self.first_common_superclass(element, TypeId::OBJECT)?;
        Ok(self.array_type(dimensions, element))
    }

    fn join_classes(&self, a: TypeId, b: TypeId) -> HierarchyResult<TypeId> {
        let a_chain = self.superclass_chain(a)?;
        let b_chain: BTreeSet<TypeId> = self.superclass_chain(b)?.into_iter().collect();
        if let Some(common) = a_chain.iter().find(|ancestor| b_chain.contains(ancestor)) {
            if *common != TypeId::OBJECT {
                return Ok(*common);
            }
        }
        let a_interfaces = self.interface_closure(a)?;
        let b_interfaces = self.interface_closure(b)?;
        let common: Vec<TypeId> = a_interfaces.intersection(&b_interfaces).copied().collect();
        let mut minimal = Vec::new();
        for candidate in &common {
            let mut dominated = false;
            for other in &common {
                if other != candidate && self.supertypes(*other)?.contains(candidate) {
                    dominated = true;
                    break;
                }
            }
            if !dominated {
                minimal.push(*candidate);
            }
        }
        match minimal.as_slice() {
            [unique] => Ok(*unique),
            _ => Ok(TypeId::OBJECT),
        }
    }

    fn check_operand(&self, id: TypeId) -> HierarchyResult<()> {
        if matches!(id, TypeId::TOP | TypeId::BOTTOM) {
            return Err(HierarchyError::UnsupportedOperand(self.signature(id)));
        }
        Ok(())
    }

    fn is_primitive(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Base(_))
    }

    /// Erased form used by lattice queries: generic types reduce to their class.
    pub(crate) fn erasure(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            TypeKind::Parameterized { base, .. } => base,
            TypeKind::TypeVariable(_) | TypeKind::Wildcard(_) => TypeId::OBJECT,
            TypeKind::Array {
                dimensions,
                element,
            } => {
                let erased = self.erasure(element);
                if erased == element {
                    id
                } else {
                    self.array_type(dimensions, erased)
                }
            }
            _ => id,
        }
    }

    fn check_reachable(&self, id: TypeId) -> HierarchyResult<()> {
        let state = self.hierarchy_state(id);
        let missing = state == HierarchyState::Missing
            || (state == HierarchyState::Unknown && self.has_resolver());
        if missing {
            return Err(HierarchyError::ClassNotFound(
                self.class_name(id).unwrap_or_else(|| self.signature(id)),
            ));
        }
        Ok(())
    }

    /// `id` and every class or interface it transitively extends or implements.
    pub(crate) fn supertypes(&self, id: TypeId) -> HierarchyResult<Arc<BTreeSet<TypeId>>> {
        if let Some(cached) = self.cached_supertypes(id) {
            return Ok(cached);
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(id);
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            if current == TypeId::OBJECT {
                continue;
            }
            self.check_reachable(current)?;
            for supertype in self.direct_supertypes(current) {
                if seen.insert(supertype) {
                    queue.push_back(supertype);
                }
            }
        }
        seen.insert(TypeId::OBJECT);
        let supertypes = Arc::new(seen);
        self.cache_supertypes(id, Arc::clone(&supertypes));
        Ok(supertypes)
    }

    /// `id` followed by its superclasses, ending at the root object.
    fn superclass_chain(&self, id: TypeId) -> HierarchyResult<Vec<TypeId>> {
        let mut chain = vec![id];
        let mut seen = BTreeSet::from([id]);
        let mut current = id;
        while current != TypeId::OBJECT {
            self.check_reachable(current)?;
            let Some(superclass) = self.superclass(current) else {
                break;
            };
            if !seen.insert(superclass) {
                break;
            }
            chain.push(superclass);
            current = superclass;
        }
        if chain.last() != Some(&TypeId::OBJECT) {
            chain.push(TypeId::OBJECT);
        }
        Ok(chain)
    }

    fn interface_closure(&self, id: TypeId) -> HierarchyResult<BTreeSet<TypeId>> {
        Ok(self
            .supertypes(id)?
            .iter()
            .copied()
            .filter(|supertype| self.is_interface(*supertype))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::HierarchyError;
    use crate::repository::{ClassInfo, ClassResolver, TypeRepository};
    use crate::signature::parse_field_signature;
    use crate::types::{BaseType, TypeId};

    /// Hierarchy used across the lattice tests.
    struct Fixture {
        repository: TypeRepository,
        my_class: TypeId,
        my_super_class: TypeId,
        my_interface: TypeId,
        sub_interface: TypeId,
        unrelated: TypeId,
        string: TypeId,
        integer: TypeId,
    }

    fn fixture() -> Fixture {
        let mut repository = TypeRepository::new();
        let my_class = repository.class_type("com/foobar/MyClass");
        let my_super_class = repository.class_type("com.foobar.MySuperClass");
        let my_interface = repository.class_type("com/foobar/MyInterface");
        let sub_interface = repository.class_type("com/foobar/SubInterface");
        let unrelated = repository.class_type("com/foobar/UnrelatedThing");
        repository.set_is_interface(my_class, false);
        repository.set_is_interface(my_super_class, false);
        repository.set_is_interface(my_interface, true);
        repository.set_is_interface(sub_interface, true);
        repository.set_is_interface(unrelated, false);
        repository.add_superclass_link(my_class, TypeId::OBJECT);
        repository.add_superclass_link(my_class, my_super_class);
        repository.add_superclass_link(my_super_class, TypeId::OBJECT);
        repository.add_interface_link(my_super_class, my_interface);
        repository.add_interface_link(sub_interface, my_interface);
        repository.add_superclass_link(unrelated, TypeId::OBJECT);

        let comparable = repository.class_type("java/lang/Comparable");
        let char_sequence = repository.class_type("java/lang/CharSequence");
        let number = repository.class_type("java/lang/Number");
        let string = repository.class_type("java/lang/String");
        let integer = repository.class_type("java/lang/Integer");
        repository.set_is_interface(comparable, true);
        repository.set_is_interface(char_sequence, true);
        repository.add_superclass_link(number, TypeId::OBJECT);
        repository.add_interface_link(number, TypeId::SERIALIZABLE);
        repository.add_superclass_link(string, TypeId::OBJECT);
        repository.add_interface_link(string, TypeId::SERIALIZABLE);
        repository.add_interface_link(string, comparable);
        repository.add_interface_link(string, char_sequence);
        repository.add_superclass_link(integer, number);
        repository.add_interface_link(integer, comparable);

        Fixture {
            repository,
            my_class,
            my_super_class,
            my_interface,
            sub_interface,
            unrelated,
            string,
            integer,
        }
    }

    fn all_reference_types(f: &Fixture) -> Vec<TypeId> {
        let r = &f.repository;
        let boolean = BaseType::Boolean.type_id();
        vec![
            TypeId::OBJECT,
            TypeId::SERIALIZABLE,
            TypeId::CLONEABLE,
            TypeId::NULL,
            f.my_class,
            f.my_super_class,
            f.my_interface,
            f.sub_interface,
            f.unrelated,
            f.string,
            f.integer,
            r.array_type(1, f.my_class),
            r.array_type(1, f.my_super_class),
            r.array_type(2, f.my_class),
            r.array_type(1, boolean),
            r.array_type(2, boolean),
            r.array_type(1, TypeId::OBJECT),
            r.array_type(2, TypeId::OBJECT),
            r.array_type(1, f.string),
            r.array_type(1, f.integer),
        ]
    }

    #[test]
    fn class_subtyping_follows_links() {
        let f = fixture();
        let r = &f.repository;
        assert!(r.is_subtype(f.my_class, TypeId::OBJECT).expect("query"));
        assert!(r.is_subtype(f.my_class, f.my_super_class).expect("query"));
        assert!(r.is_subtype(f.my_class, f.my_interface).expect("query"));
        assert!(r.is_subtype(f.sub_interface, f.my_interface).expect("query"));
        assert!(!r.is_subtype(f.my_super_class, f.my_class).expect("query"));
        assert!(!r.is_subtype(f.my_interface, f.sub_interface).expect("query"));
        assert!(!r.is_subtype(f.unrelated, f.my_interface).expect("query"));
        assert!(r.is_subtype(f.my_interface, TypeId::OBJECT).expect("query"));
    }

    #[test]
    fn array_subtyping_is_structural() {
        let f = fixture();
        let r = &f.repository;
        let my_class_array = r.array_type(1, f.my_class);
        let boolean = BaseType::Boolean.type_id();
        let object_array = r.array_type(1, TypeId::OBJECT);
        let object_array_2 = r.array_type(2, TypeId::OBJECT);
        assert!(r.is_subtype(my_class_array, r.array_type(1, f.my_super_class)).expect("query"));
        assert!(r.is_subtype(my_class_array, r.array_type(1, f.my_interface)).expect("query"));
        assert!(r.is_subtype(my_class_array, TypeId::OBJECT).expect("query"));
        let string_array_2 = r.array_type(2, f.string);
        assert!(!r.is_subtype(string_array_2, r.array_type(1, f.string)).expect("query"));
        assert!(r.is_subtype(object_array_2, object_array).expect("query"));
        assert!(r.is_subtype(r.array_type(2, boolean), object_array).expect("query"));
        assert!(r.is_subtype(r.array_type(1, boolean), TypeId::SERIALIZABLE).expect("query"));
        assert!(r.is_subtype(r.array_type(1, boolean), TypeId::CLONEABLE).expect("query"));
        assert!(!r.is_subtype(r.array_type(1, boolean), object_array).expect("query"));
        assert!(!r.is_subtype(r.array_type(1, boolean), r.array_type(1, BaseType::Int.type_id())).expect("query"));
        assert!(!r.is_subtype(my_class_array, f.my_interface).expect("query"));
        assert!(!r.is_subtype(f.my_class, my_class_array).expect("query"));
    }

    #[test]
    fn null_is_below_every_reference() {
        let f = fixture();
        let r = &f.repository;
        assert!(r.is_subtype(TypeId::NULL, f.my_class).expect("query"));
        assert!(r.is_subtype(TypeId::NULL, r.array_type(1, f.my_class)).expect("query"));
        assert!(!r.is_subtype(f.my_class, TypeId::NULL).expect("query"));
        assert!(!r.is_subtype(TypeId::NULL, BaseType::Int.type_id()).expect("query"));
    }

    #[test]
    fn sentinels_are_not_subtype_operands() {
        let f = fixture();
        let r = &f.repository;
        assert!(matches!(
            r.is_subtype(TypeId::TOP, f.my_class),
            Err(HierarchyError::UnsupportedOperand(_))
        ));
        assert!(!r.is_subtype_or_false(f.my_class, TypeId::BOTTOM));
    }

    #[test]
    fn generic_types_compare_by_erasure() {
        let f = fixture();
        let mut r = f.repository;
        let list = r.class_type("java/util/List");
        let collection = r.class_type("java/util/Collection");
        r.set_is_interface(collection, true);
        r.add_interface_link(list, collection);
        let parameterized = r.intern(
            &parse_field_signature("Ljava/util/List<Ljava/lang/String;>;").expect("parse"),
        );
        assert!(r.is_subtype(parameterized, collection).expect("query"));
        assert!(r.is_subtype(parameterized, list).expect("query"));
        let variable = r.type_variable("T");
        assert!(r.is_subtype(variable, TypeId::OBJECT).expect("query"));
    }

    #[test]
    fn subtyping_is_reflexive_and_transitive() {
        let f = fixture();
        let r = &f.repository;
        let types = all_reference_types(&f);
        for a in &types {
            assert!(r.is_subtype(*a, *a).expect("query"));
            for b in &types {
                for c in &types {
                    let chained = r.is_subtype(*a, *b).expect("query") && r.is_subtype(*b, *c).expect("query");
                    if chained {
                        assert!(
                            r.is_subtype(*a, *c).expect("query"),
                            "{} <: {} <: {}",
                            r.signature(*a),
                            r.signature(*b),
                            r.signature(*c)
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn join_of_classes() {
        let f = fixture();
        let r = &f.repository;
        assert_eq!(r.first_common_superclass(f.my_class, f.my_super_class).expect("join"), f.my_super_class);
        assert_eq!(r.first_common_superclass(f.my_class, f.unrelated).expect("join"), TypeId::OBJECT);
        assert_eq!(r.first_common_superclass(f.my_class, f.sub_interface).expect("join"), f.my_interface);
        assert_eq!(r.first_common_superclass(f.string, f.integer).expect("join"), TypeId::OBJECT);
        assert_eq!(r.first_common_superclass(TypeId::NULL, f.my_class).expect("join"), f.my_class);
    }

    #[test]
    fn join_of_arrays() {
        let f = fixture();
        let r = &f.repository;
        let boolean = BaseType::Boolean.type_id();
        let my_class_array = r.array_type(1, f.my_class);
        let object_array = r.array_type(1, TypeId::OBJECT);
        assert_eq!(
            r.first_common_superclass(my_class_array, r.array_type(1, f.my_super_class)).expect("join"),
            r.array_type(1, f.my_super_class)
        );
        assert_eq!(
            r.first_common_superclass(my_class_array, r.array_type(2, f.my_class)).expect("join"),
            object_array
        );
        assert_eq!(
            r.first_common_superclass(my_class_array, r.array_type(2, boolean)).expect("join"),
            object_array
        );
        assert_eq!(
            r.first_common_superclass(r.array_type(1, boolean), r.array_type(2, f.my_class)).expect("join"),
            TypeId::OBJECT
        );
        assert_eq!(
            r.first_common_superclass(r.array_type(1, boolean), r.array_type(1, BaseType::Int.type_id())).expect("join"),
            TypeId::OBJECT
        );
        assert_eq!(
            r.first_common_superclass(r.array_type(1, f.string), r.array_type(1, f.integer)).expect("join"),
            object_array
        );
        assert_eq!(
            r.first_common_superclass(my_class_array, f.my_class).expect("join"),
            TypeId::OBJECT
        );
        assert_eq!(
            r.first_common_superclass(my_class_array, TypeId::CLONEABLE).expect("join"),
            TypeId::CLONEABLE
        );
    }

    #[test]
    fn join_handles_sentinels_and_primitives() {
        let f = fixture();
        let r = &f.repository;
        assert_eq!(r.first_common_superclass(TypeId::TOP, f.my_class).expect("join"), f.my_class);
        assert_eq!(r.first_common_superclass(TypeId::BOTTOM, f.my_class).expect("join"), TypeId::BOTTOM);
        let int = BaseType::Int.type_id();
        assert_eq!(r.first_common_superclass(int, int).expect("join"), int);
        assert_eq!(r.first_common_superclass(int, BaseType::Long.type_id()).expect("join"), TypeId::BOTTOM);
    }

    #[test]
    fn join_is_symmetric() {
        let f = fixture();
        let r = &f.repository;
        let types = all_reference_types(&f);
        for a in &types {
            for b in &types {
                assert_eq!(
                    r.first_common_superclass(*a, *b).expect("join"),
                    r.first_common_superclass(*b, *a).expect("join"),
                    "join of {} and {}",
                    r.signature(*a),
                    r.signature(*b)
                );
            }
        }
    }

    struct EmptyResolver;

    impl ClassResolver for EmptyResolver {
        fn resolve_class(&self, _name: &str) -> Option<ClassInfo> {
            None
        }
    }

    #[test]
    fn unresolved_classes_make_queries_indeterminate() {
        let mut repository = TypeRepository::with_resolver(Box::new(EmptyResolver));
        let known = repository.class_type("a/Known");
        let missing = repository.class_type("a/Missing");
        let target = repository.class_type("a/Target");
        repository.set_is_interface(target, true);
        repository.add_superclass_link(known, missing);
        assert_eq!(repository.complete_hierarchy(), vec!["a/Missing".to_string()]);
        assert_eq!(
            repository.is_subtype(known, target),
            Err(HierarchyError::ClassNotFound("a/Missing".to_string()))
        );
        assert!(!repository.is_subtype_or_false(known, target));
        assert!(repository.is_subtype(known, TypeId::OBJECT).expect("root is always a supertype"));
        assert_eq!(repository.first_common_superclass_or_object(known, target), TypeId::OBJECT);
        assert_eq!(repository.reported_missing(), vec!["a/Missing".to_string()]);
    }

    #[test]
    fn unknown_classes_without_resolver_use_registered_edges() {
        let mut repository = TypeRepository::new();
        let sub = repository.class_type("a/Sub");
        let sup = repository.class_type("a/Sup");
        repository.add_superclass_link(sub, sup);
        assert!(repository.is_subtype(sub, sup).expect("query"));
        assert_eq!(repository.first_common_superclass(sub, sup).expect("join"), sup);
    }
}
