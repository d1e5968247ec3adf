//! Program description supplied by the class loading, CFG, and value-numbering
//! stages, and the type repository built from it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::descriptor::signature_agrees_with_descriptor;
use crate::ir::{Class, InstructionKind, Method};
use crate::repository::{ClassInfo, ClassResolver, TypeRepository};
use crate::signature::{JavaType, parse_class_signature, parse_field_signature, parse_method_signature};
use crate::types::{dotted_name, slashed_name};

#[derive(Debug, Deserialize)]
struct ProgramDocument {
    classes: Vec<Class>,
}

/// Classes of one analysis run keyed by slashed name.
pub(crate) struct Workspace {
    classes: BTreeMap<String, Class>,
}

impl Workspace {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_reader(reader);
        let document: ProgramDocument = serde_path_to_error::deserialize(&mut deserializer)
            .context("invalid program description")?;
        Self::from_classes(document.classes)
    }

    /// Class names may be dotted or slashed; duplicates are rejected.
    pub(crate) fn from_classes(classes: Vec<Class>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        let mut duplicates = BTreeSet::new();
        for mut class in classes {
            class.name = slashed_name(&class.name);
            class.super_name = class.super_name.as_deref().map(slashed_name);
            class.interfaces = class.interfaces.iter().map(|name| slashed_name(name)).collect();
            if by_name.contains_key(&class.name) {
                duplicates.insert(class.name.clone());
                continue;
            }
            by_name.insert(class.name.clone(), class);
        }
        if !duplicates.is_empty() {
            let names: Vec<&str> = duplicates.iter().map(String::as_str).collect();
            anyhow::bail!("duplicate classes found: {}", names.join(", "));
        }
        Ok(Self { classes: by_name })
    }

    pub(crate) fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn class(&self, name: &str) -> Option<&Class> {
        self.classes.get(&slashed_name(name))
    }

    pub(crate) fn application_class_count(&self) -> usize {
        self.classes().filter(|class| class.application).count()
    }

    /// Whether a dotted or slashed class name belongs to the code under analysis.
    pub(crate) fn is_application(&self, name: &str) -> bool {
        self.class(name).is_some_and(|class| class.application)
    }

    /// Method declared directly by `class` with the given name and descriptor.
    pub(crate) fn declared_method(&self, class: &str, name: &str, descriptor: &str) -> Option<&Method> {
        self.class(class)?
            .methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Repository with application classes declared and library classes pulled
    /// in on demand through the workspace resolver.
    ///
    /// Returns the repository and the slashed names of classes referenced but
    /// never supplied.
    pub(crate) fn build_repository(&self) -> (TypeRepository, Vec<String>) {
        let mut repository = TypeRepository::with_resolver(Box::new(self.resolver()));
        for class in self.classes().filter(|class| class.application) {
            repository.declare_class(&class.name, &class_info(class));
        }
        for owner in self.invoked_owners() {
            repository.class_type(owner);
        }
        let missing = repository.complete_hierarchy();
        for name in &missing {
            debug!(class = %dotted_name(name), "class missing from program description");
        }
        (repository, missing)
    }

    /// Described classes that application methods call into.
    fn invoked_owners(&self) -> BTreeSet<&str> {
        self.classes()
            .filter(|class| class.application)
            .flat_map(|class| &class.methods)
            .filter_map(|method| method.cfg.as_ref())
            .flat_map(|cfg| &cfg.blocks)
            .flat_map(|block| &block.instructions)
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::Invoke(callee) if self.class(&callee.owner).is_some() => {
                    Some(callee.owner.as_str())
                }
                _ => None,
            })
            .collect()
    }

    fn resolver(&self) -> WorkspaceResolver {
        WorkspaceResolver {
            classes: self
                .classes()
                .map(|class| (class.name.clone(), class_info(class)))
                .collect(),
        }
    }

    /// Parse every generic signature and intern the parsed types.
    ///
    /// Malformed signatures are skipped with a warning; a method signature whose
    /// layout disagrees with its descriptor is ignored.
    pub(crate) fn register_signatures(&self, repository: &TypeRepository) -> SignatureReport {
        let mut report = SignatureReport::default();
        for class in self.classes() {
            if let Some(signature) = &class.signature {
                match parse_class_signature(signature) {
                    Ok(parsed) => {
                        report.parsed += 1;
                        for supertype in std::iter::once(&parsed.superclass).chain(&parsed.interfaces) {
                            repository.intern(&JavaType::Class(supertype.clone()));
                        }
                    }
                    Err(err) => {
                        report.malformed += 1;
                        warn!(class = %dotted_name(&class.name), "skipping class signature: {err}");
                    }
                }
            }
            for field in &class.fields {
                let Some(signature) = &field.signature else {
                    continue;
                };
                match parse_field_signature(signature) {
                    Ok(parsed) => {
                        report.parsed += 1;
                        repository.intern(&parsed);
                    }
                    Err(err) => {
                        report.malformed += 1;
                        warn!(
                            class = %dotted_name(&class.name),
                            field = %field.name,
                            "skipping field signature: {err}"
                        );
                    }
                }
            }
            for method in &class.methods {
                let Some(signature) = &method.signature else {
                    continue;
                };
                let parsed = match parse_method_signature(signature) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        report.malformed += 1;
                        warn!(
                            class = %dotted_name(&class.name),
                            method = %method.name,
                            "skipping method signature: {err}"
                        );
                        continue;
                    }
                };
                match signature_agrees_with_descriptor(&parsed, &method.descriptor) {
                    Ok(true) => {
                        report.parsed += 1;
                        for parameter in &parsed.parameters {
                            repository.intern(parameter);
                        }
                        repository.intern(&parsed.return_type);
                    }
                    Ok(false) => {
                        report.mismatched += 1;
                        warn!(
                            class = %dotted_name(&class.name),
                            method = %method.name,
                            signature = %signature,
                            descriptor = %method.descriptor,
                            "ignoring generic signature that disagrees with the descriptor"
                        );
                    }
                    Err(err) => {
                        report.malformed += 1;
                        warn!(
                            class = %dotted_name(&class.name),
                            method = %method.name,
                            "skipping method with invalid descriptor: {err:#}"
                        );
                    }
                }
            }
        }
        report
    }
}

/// Outcome of signature registration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct SignatureReport {
    pub(crate) parsed: usize,
    pub(crate) malformed: usize,
    pub(crate) mismatched: usize,
}

fn class_info(class: &Class) -> ClassInfo {
    ClassInfo {
        is_interface: class.is_interface,
        superclass: class.super_name.clone(),
        interfaces: class.interfaces.clone(),
    }
}

/// Supertype information for every class in the program description.
struct WorkspaceResolver {
    classes: BTreeMap<String, ClassInfo>,
}

impl ClassResolver for WorkspaceResolver {
    fn resolve_class(&self, name: &str) -> Option<ClassInfo> {
        self.classes.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::HierarchyState;

    const PROGRAM: &str = r#"{
        "classes": [
            { "name": "com.example.App", "super_name": "com/example/Base",
              "interfaces": ["java/lang/Runnable"], "application": true,
              "signature": "Lcom/example/Base;Ljava/lang/Runnable;",
              "fields": [ { "name": "items", "descriptor": "Ljava/util/List;",
                            "signature": "Ljava/util/List<Ljava/lang/String;>;" },
                          { "name": "broken", "descriptor": "Ljava/util/List;",
                            "signature": "Ljava/util/List<" } ],
              "methods": [
                { "name": "run", "descriptor": "()V", "access_flags": 1 },
                { "name": "first", "descriptor": "(Ljava/util/List;)Ljava/lang/Object;",
                  "signature": "<T:Ljava/lang/Object;>(Ljava/util/List<TT;>;)TT;" },
                { "name": "<init>", "descriptor": "(Lcom/example/Outer;Ljava/util/List;)V",
                  "signature": "(Ljava/util/List<Ljava/lang/String;>;)V" } ] },
            { "name": "com/example/Base", "super_name": "java/lang/Object" },
            { "name": "java/lang/Runnable", "is_interface": true }
        ]
    }"#;

    #[test]
    fn loads_and_normalizes_class_names() {
        let workspace = Workspace::from_reader(PROGRAM.as_bytes()).expect("workspace");
        assert_eq!(workspace.len(), 3);
        assert_eq!(workspace.application_class_count(), 1);
        assert!(workspace.is_application("com.example.App"));
        assert!(!workspace.is_application("com/example/Base"));
        assert!(workspace.declared_method("com/example/App", "run", "()V").is_some());
        assert!(workspace.declared_method("com/example/Base", "run", "()V").is_none());
    }

    #[test]
    fn repository_pulls_library_classes_on_demand() {
        let workspace = Workspace::from_reader(PROGRAM.as_bytes()).expect("workspace");
        let (repository, missing) = workspace.build_repository();
        assert!(missing.is_empty());
        let app = repository.lookup_class("com/example/App").expect("app");
        let base = repository.lookup_class("com/example/Base").expect("base");
        let runnable = repository.lookup_class("java/lang/Runnable").expect("runnable");
        assert_eq!(repository.hierarchy_state(base), HierarchyState::Known);
        assert!(repository.is_interface(runnable));
        assert_eq!(repository.is_subtype(app, base), Ok(true));
        assert_eq!(repository.is_subtype(app, runnable), Ok(true));
    }

    #[test]
    fn described_call_targets_join_the_hierarchy() {
        let workspace = Workspace::from_reader(
            r#"{
                "classes": [
                    { "name": "a/A", "super_name": "java/lang/Object", "application": true,
                      "methods": [ { "name": "go", "descriptor": "()V", "access_flags": 1,
                        "cfg": { "blocks": [ { "id": 0, "instructions": [
                            { "offset": 0, "opcode": 182, "kind": { "invoke":
                              { "owner": "lib/Sub", "name": "name", "descriptor": "()Ljava/lang/String;" } } },
                            { "offset": 3, "opcode": 182, "kind": { "invoke":
                              { "owner": "lib/Undescribed", "name": "x", "descriptor": "()V" } } } ] } ] } } ] },
                    { "name": "lib/Sub", "super_name": "lib/Base" },
                    { "name": "lib/Base", "super_name": "java/lang/Object" }
                ]
            }"#
            .as_bytes(),
        )
        .expect("workspace");
        let (repository, missing) = workspace.build_repository();
        assert!(missing.is_empty());
        let sub = repository.lookup_class("lib/Sub").expect("sub");
        let base = repository.lookup_class("lib/Base").expect("base");
        assert_eq!(repository.direct_supertypes(sub), vec![base]);
        assert!(repository.lookup_class("lib/Undescribed").is_none());
    }

    #[test]
    fn reports_missing_supertypes() {
        let workspace = Workspace::from_reader(
            r#"{ "classes": [ { "name": "a/A", "super_name": "lib/Gone", "application": true } ] }"#
                .as_bytes(),
        )
        .expect("workspace");
        let (repository, missing) = workspace.build_repository();
        assert_eq!(missing, vec!["lib/Gone".to_string()]);
        let a = repository.lookup_class("a/A").expect("a");
        let string = repository.class_type("java/lang/String");
        assert!(repository.is_subtype(a, string).is_err());
    }

    #[test]
    fn registers_signatures_and_skips_bad_ones() {
        let workspace = Workspace::from_reader(PROGRAM.as_bytes()).expect("workspace");
        let (repository, _) = workspace.build_repository();
        let report = workspace.register_signatures(&repository);
        assert_eq!(
            report,
            SignatureReport {
                parsed: 3,
                malformed: 1,
                mismatched: 1,
            }
        );
        assert!(repository.lookup("Ljava/util/List<Ljava/lang/String;>;").is_some());
    }

    #[test]
    fn rejects_duplicate_classes() {
        let result = Workspace::from_reader(
            r#"{ "classes": [ { "name": "a/A" }, { "name": "a.A" } ] }"#.as_bytes(),
        );
        let error = result.err().expect("duplicate class error");
        assert!(format!("{error:#}").contains("duplicate classes found: a/A"));
    }

    #[test]
    fn reports_json_path_of_invalid_input() {
        let result = Workspace::from_reader(
            r#"{ "classes": [ { "name": "a/A", "methods": [ { "name": 3 } ] } ] }"#.as_bytes(),
        );
        let error = result.err().expect("invalid input error");
        assert!(format!("{error:#}").contains("classes[0].methods[0].name"));
    }
}
