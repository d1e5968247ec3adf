use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use opentelemetry::KeyValue;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::dataflow::DEFAULT_MAX_BLOCK_VISITS;
use crate::dataflow::null_set::NullnessValue;
use crate::dataflow::nullness::{MethodNullness, NullnessAnalysis, entry_non_null_values};
use crate::dataflow::worklist::execute;
use crate::interproc::propagation::{HierarchyWalkDirection, propagate};
use crate::interproc::properties::{
    FieldNullness, InheritNonNullParameters, MergeReturnNullness, ParameterNullness,
    ReturnNullness,
};
use crate::interproc::{FieldPropertyDatabase, MemberKey, MethodPropertyDatabase};
use crate::ir::{Class, MemberRef, Method};
use crate::repository::TypeRepository;
use crate::telemetry::{Telemetry, in_phase};
use crate::types::dotted_name;
use crate::workspace::{SignatureReport, Workspace};

const ACC_PRIVATE: u32 = 0x0002;

/// Engine settings.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AnalysisConfig {
    /// Visits of one block after which a method's analysis is abandoned.
    pub(crate) max_block_visits: usize,
    /// Fail instead of warning when the hierarchy references unknown classes.
    pub(crate) strict_hierarchy: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_block_visits: DEFAULT_MAX_BLOCK_VISITS,
            strict_hierarchy: false,
        }
    }
}

/// Property databases read before a run and updated by it.
#[derive(Debug, Default)]
pub(crate) struct Databases {
    pub(crate) return_nullness: MethodPropertyDatabase<ReturnNullness>,
    pub(crate) parameter_nullness: MethodPropertyDatabase<ParameterNullness>,
    pub(crate) field_nullness: FieldPropertyDatabase<FieldNullness>,
}

/// Inputs shared by every method analysis.
pub(crate) struct AnalysisContext {
    pub(crate) workspace: Workspace,
    pub(crate) repository: Arc<TypeRepository>,
    pub(crate) missing_classes: Vec<String>,
    pub(crate) signatures: SignatureReport,
    telemetry: Option<Arc<Telemetry>>,
}

impl AnalysisContext {
    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn in_phase<T, F>(&self, phase: &'static str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        in_phase(self.telemetry(), phase, attributes, f)
    }

    /// Member of `class` that overrides or is overridden by `key`, if declared there.
    fn overriding_member(&self, class: &str, key: &MemberKey) -> Option<MemberKey> {
        let method = self
            .workspace
            .declared_method(class, &key.name, &key.signature)?;
        if !is_overridable(method) {
            return None;
        }
        Some(MemberKey::new(
            class,
            &method.name,
            &method.descriptor,
            method.access_flags,
        ))
    }
}

/// Build the hierarchy and register signatures; the repository is frozen afterwards.
pub(crate) fn build_context(
    workspace: Workspace,
    config: &AnalysisConfig,
    telemetry: Option<Arc<Telemetry>>,
) -> Result<AnalysisContext> {
    let (repository, missing_classes, signatures) = in_phase(
        telemetry.as_deref(),
        "hierarchy",
        &[KeyValue::new("jvmflow.classes", workspace.len() as i64)],
        || {
            let (mut repository, mut missing) = workspace.build_repository();
            let signatures = workspace.register_signatures(&repository);
            missing.extend(repository.complete_hierarchy());
            missing.sort();
            (repository, missing, signatures)
        },
    );
    if !missing_classes.is_empty() {
        let names: Vec<String> = missing_classes.iter().map(|name| dotted_name(name)).collect();
        if config.strict_hierarchy {
            anyhow::bail!("classes missing from the hierarchy: {}", names.join(", "));
        }
        warn!(
            count = names.len(),
            "classes missing from the hierarchy: {}",
            names.join(", ")
        );
    }
    debug!(
        classes = workspace.len(),
        application_classes = workspace.application_class_count(),
        parsed = signatures.parsed,
        malformed = signatures.malformed,
        mismatched = signatures.mismatched,
        types = repository.len(),
        "registered signatures"
    );
    Ok(AnalysisContext {
        workspace,
        repository: Arc::new(repository),
        missing_classes,
        signatures,
        telemetry,
    })
}

/// Counts reported after a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct EngineOutput {
    pub(crate) analyzed_methods: usize,
    pub(crate) failed_methods: usize,
    pub(crate) return_entries: usize,
    pub(crate) field_entries: usize,
    pub(crate) propagated_entries: usize,
}

/// Per-method nullness analysis followed by hierarchy propagation.
pub(crate) struct Engine {
    config: AnalysisConfig,
}

/// Nullness exported by one analysed method.
struct MethodSummary {
    key: MemberKey,
    nullness: MethodNullness,
}

impl Engine {
    pub(crate) fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub(crate) fn analyze(
        &self,
        context: &AnalysisContext,
        databases: &mut Databases,
    ) -> Result<EngineOutput> {
        let jobs: Vec<(&Class, &Method)> = context
            .workspace
            .classes()
            .filter(|class| class.application)
            .flat_map(|class| class.methods.iter().map(move |method| (class, method)))
            .filter(|(_, method)| method.cfg.is_some())
            .collect();

        let inputs: &Databases = databases;
        let repository: &TypeRepository = &context.repository;
        let outcomes: Vec<Result<MethodSummary>> = context.in_phase(
            "analysis",
            &[KeyValue::new("jvmflow.methods", jobs.len() as i64)],
            || {
                jobs.par_iter()
                    .map(|(class, method)| {
                        analyze_method(class, method, inputs, repository, &self.config)
                    })
                    .collect()
            },
        );

        let mut output = EngineOutput::default();
        let mut summaries = Vec::new();
        for ((class, method), outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    output.failed_methods += 1;
                    warn!(
                        class = %dotted_name(&class.name),
                        method = %method.name,
                        descriptor = %method.descriptor,
                        "skipping method: {err:#}"
                    );
                }
            }
        }
        output.analyzed_methods = summaries.len();
        fold_summaries(context, summaries, databases, &mut output);

        output.propagated_entries = context.in_phase(
            "propagation",
            &[],
            || {
                let resolve = |class: &str, key: &MemberKey| context.overriding_member(class, key);
                propagate(
                    &mut databases.return_nullness,
                    &context.repository,
                    HierarchyWalkDirection::TowardSupertypes,
                    &MergeReturnNullness,
                    resolve,
                ) + propagate(
                    &mut databases.parameter_nullness,
                    &context.repository,
                    HierarchyWalkDirection::TowardSubtypes,
                    &InheritNonNullParameters,
                    resolve,
                )
            },
        );

        let missing = context.repository.reported_missing();
        if !missing.is_empty() {
            info!(count = missing.len(), "subtype queries reached missing classes");
        }
        Ok(output)
    }
}

fn analyze_method(
    class: &Class,
    method: &Method,
    databases: &Databases,
    repository: &TypeRepository,
    config: &AnalysisConfig,
) -> Result<MethodSummary> {
    let key = MemberKey::new(
        &class.name,
        &method.name,
        &method.descriptor,
        method.access_flags,
    );
    let (Some(cfg), Some(facts)) = (&method.cfg, &method.value_numbers) else {
        anyhow::bail!("no value numbers for {key}");
    };
    let parameters = databases
        .parameter_nullness
        .find_member(&class.name, &method.name, &method.descriptor)
        .map(|(_, parameters)| parameters)
        .filter(|parameters| !parameters.is_empty());
    let entry = entry_non_null_values(method, cfg, facts, parameters)?;
    let analysis = NullnessAnalysis::new(facts)
        .with_entry_non_null(entry)
        .with_return_nullness(&databases.return_nullness)
        .with_hierarchy(repository);
    let dataflow = execute(&analysis, cfg, config.max_block_visits)?;
    let nullness = analysis.summarize(&dataflow, cfg)?;
    debug!(method = %key, returns = ?nullness.returns, "analysed method");
    Ok(MethodSummary { key, nullness })
}

/// Merge summaries into the databases in method order.
fn fold_summaries(
    context: &AnalysisContext,
    summaries: Vec<MethodSummary>,
    databases: &mut Databases,
    output: &mut EngineOutput,
) {
    let mut field_stores: BTreeMap<MemberRef, NullnessValue> = BTreeMap::new();
    for summary in summaries {
        match summary.nullness.returns {
            Some(returns) => {
                databases
                    .return_nullness
                    .set(summary.key, ReturnNullness(returns));
                output.return_entries += 1;
            }
            None => {
                if databases.return_nullness.remove(&summary.key).is_some() {
                    debug!(method = %summary.key, "dropped stale return entry");
                }
            }
        }
        for (field, nullness) in summary.nullness.field_stores {
            field_stores
                .entry(field)
                .and_modify(|existing| *existing = existing.merge(nullness))
                .or_insert(nullness);
        }
    }
    for (field, nullness) in field_stores {
        let access_flags = context
            .workspace
            .class(&field.owner)
            .and_then(|class| class.fields.iter().find(|declared| declared.name == field.name))
            .map_or(0, |declared| declared.access_flags);
        let key = MemberKey::new(&field.owner, &field.name, &field.descriptor, access_flags);
        databases.field_nullness.set(key, FieldNullness(nullness));
        output.field_entries += 1;
    }
}

/// Instance methods other than constructors and private methods take part in overriding.
fn is_overridable(method: &Method) -> bool {
    !method.is_static() && method.access_flags & ACC_PRIVATE == 0 && !method.name.starts_with('<')
}
