use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use super::{DatabaseProperty, MemberKey, MethodPropertyDatabase};
use crate::repository::TypeRepository;
use crate::types::TypeId;

/// Which hierarchy edges a property travels along.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HierarchyWalkDirection {
    /// From a method to the methods overriding it.
    TowardSubtypes,
    /// From a method to the methods it overrides.
    TowardSupertypes,
}

impl HierarchyWalkDirection {
    pub(crate) fn neighbours(self, repository: &TypeRepository, class: TypeId) -> Vec<TypeId> {
        match self {
            Self::TowardSubtypes => repository.direct_subtypes(class),
            Self::TowardSupertypes => repository.direct_supertypes(class),
        }
    }
}

/// Merges a property found at a source method into the one at a method reached from it.
pub(crate) trait PropertyCombinator<P> {
    fn combine(&self, source: &P, target: &P) -> P;

    /// Property for a target with no entry yet, or `None` to leave it absent.
    fn seed(&self, source: &P) -> Option<P>;
}

/// Push every entry along `direction` until nothing changes.
///
/// `resolve(class, key)` names the member of `class` that corresponds to `key`,
/// or `None` when the class does not declare one; the walk then continues past
/// that class. A target without an entry takes whatever the combinator seeds
/// it with. The combinator must be monotone for the walk to terminate. Returns
/// the number of entries written.
pub(crate) fn propagate<P, C, R>(
    database: &mut MethodPropertyDatabase<P>,
    repository: &TypeRepository,
    direction: HierarchyWalkDirection,
    combinator: &C,
    resolve: R,
) -> usize
where
    P: DatabaseProperty,
    C: PropertyCombinator<P>,
    R: Fn(&str, &MemberKey) -> Option<MemberKey>,
{
    let mut written = 0;
    let mut pass = 0;
    loop {
        pass += 1;
        let mut changed = false;
        let sources: Vec<MemberKey> = database.iter().map(|(key, _)| key.clone()).collect();
        for source in sources {
            let Some(class) = repository.lookup_class(&source.class_name) else {
                continue;
            };
            for target in corresponding_members(repository, direction, class, &source, &resolve) {
                let Some(property) = database.get(&source).cloned() else {
                    continue;
                };
                let combined = match database.get(&target) {
                    Some(existing) => combinator.combine(&property, existing),
                    None => match combinator.seed(&property) {
                        Some(seeded) => seeded,
                        None => continue,
                    },
                };
                if database.get(&target) != Some(&combined) {
                    debug!(source = %source, target = %target, "propagated property");
                    database.set(target, combined);
                    changed = true;
                    written += 1;
                }
            }
        }
        if !changed {
            break;
        }
    }
    debug!(?direction, passes = pass, written, "property propagation finished");
    written
}

/// Nearest members along `direction` that correspond to `key`, skipping classes that do not declare one.
fn corresponding_members<R>(
    repository: &TypeRepository,
    direction: HierarchyWalkDirection,
    class: TypeId,
    key: &MemberKey,
    resolve: &R,
) -> Vec<MemberKey>
where
    R: Fn(&str, &MemberKey) -> Option<MemberKey>,
{
    let mut members = Vec::new();
    let mut visited = BTreeSet::from([class]);
    let mut queue: VecDeque<TypeId> = direction.neighbours(repository, class).into();
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(name) = repository.class_name(current) else {
            continue;
        };
        match resolve(&name, key) {
            Some(member) => members.push(member),
            None => queue.extend(direction.neighbours(repository, current)),
        }
    }
    members
}
