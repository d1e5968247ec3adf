//! Null-definiteness analysis over value numbers.
//!
//! Every value number is tracked as definitely null, definitely not null, or
//! unknown. Null checks (`ifnull`, `ifnonnull`, and `if_acmpeq`/`if_acmpne`
//! against a known null) prune the edge that cannot be taken and refine the
//! tested value on the other one.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;

use super::null_set::{DefinitelyNullSet, NullnessValue};
use super::worklist::Dataflow;
use super::{Condition, DataflowAnalysis, Decision};
use crate::descriptor::{
    field_slots, is_reference_field, method_parameter_slots, parameter_locals, returns_reference,
};
use crate::errors::{DataflowError, DataflowResult};
use crate::interproc::MethodPropertyDatabase;
use crate::interproc::properties::{ParameterNullness, ReturnNullness};
use crate::ir::{
    BasicBlock, ControlFlowGraph, EdgeKind, FlowEdge, Instruction, InstructionKind, Location,
    MemberRef, Method,
};
use crate::opcodes;
use crate::repository::TypeRepository;
use crate::types::TypeId;
use crate::vna::{ValueNumber, ValueNumberFacts, ValueNumberFrame};

/// Which null check ends a block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NullCheckKind {
    IfNull,
    IfNonNull,
    AcmpEq,
    AcmpNe,
}

impl NullCheckKind {
    fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::IFNULL => Some(Self::IfNull),
            opcodes::IFNONNULL => Some(Self::IfNonNull),
            opcodes::IF_ACMPEQ => Some(Self::AcmpEq),
            opcodes::IF_ACMPNE => Some(Self::AcmpNe),
            _ => None,
        }
    }

    /// Edge along which the tested value is null.
    fn null_edge(self) -> EdgeKind {
        match self {
            Self::IfNull | Self::AcmpEq => EdgeKind::Branch,
            Self::IfNonNull | Self::AcmpNe => EdgeKind::FallThrough,
        }
    }
}

/// Null check at the end of a block, with decisions for its two outgoing edges.
#[derive(Clone, Debug)]
pub(crate) struct NullCheckCondition {
    kind: NullCheckKind,
    /// Compared operands, deepest first; one for `ifnull`/`ifnonnull`, two for `if_acmp*`.
    operands: Vec<ValueNumber>,
    value: Option<ValueNumber>,
    taken: Option<Decision<NullnessValue>>,
    not_taken: Option<Decision<NullnessValue>>,
}

impl NullCheckCondition {
    pub(crate) fn new(kind: NullCheckKind, operands: Vec<ValueNumber>) -> Self {
        Self {
            kind,
            operands,
            value: None,
            taken: None,
            not_taken: None,
        }
    }

    pub(crate) fn kind(&self) -> NullCheckKind {
        self.kind
    }

    /// The value whose nullness the check decides, and its current status.
    fn tested_value(&self, fact: &DefinitelyNullSet) -> Option<(ValueNumber, NullnessValue)> {
        match self.operands.as_slice() {
            [value] => Some((*value, fact.nullness(*value))),
            [left, right] => {
                if fact.nullness(*right) == NullnessValue::DefinitelyNull {
                    Some((*left, fact.nullness(*left)))
                } else if fact.nullness(*left) == NullnessValue::DefinitelyNull {
                    Some((*right, fact.nullness(*right)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl Condition<DefinitelyNullSet> for NullCheckCondition {
    type Refinement = NullnessValue;

    fn value_number(&self) -> Option<ValueNumber> {
        self.value
    }

    fn refresh(&mut self, fact: &DefinitelyNullSet) {
        if fact.is_top() {
            self.value = None;
            self.taken = Some(Decision::infeasible(NullnessValue::Unknown));
            self.not_taken = Some(Decision::infeasible(NullnessValue::Unknown));
            return;
        }
        let Some((value, status)) = self.tested_value(fact) else {
            self.value = None;
            self.taken = Some(Decision::feasible(NullnessValue::Unknown));
            self.not_taken = Some(Decision::feasible(NullnessValue::Unknown));
            return;
        };
        let null_edge = match status {
            NullnessValue::DefinitelyNull => Decision::feasible(NullnessValue::DefinitelyNull),
            NullnessValue::DefinitelyNotNull => Decision::infeasible(NullnessValue::DefinitelyNull),
            NullnessValue::Unknown => Decision::feasible(NullnessValue::DefinitelyNull),
        };
        let non_null_edge = match status {
            NullnessValue::DefinitelyNull => Decision::infeasible(NullnessValue::DefinitelyNotNull),
            _ => Decision::feasible(NullnessValue::DefinitelyNotNull),
        };
        self.value = Some(value);
        if self.kind.null_edge() == EdgeKind::Branch {
            self.taken = Some(null_edge);
            self.not_taken = Some(non_null_edge);
        } else {
            self.taken = Some(non_null_edge);
            self.not_taken = Some(null_edge);
        }
    }

    fn decision(&self, edge: EdgeKind) -> Option<Decision<NullnessValue>> {
        match edge {
            EdgeKind::Branch => self.taken,
            EdgeKind::FallThrough => self.not_taken,
            _ => None,
        }
    }
}

/// Null-definiteness analysis of one method.
pub(crate) struct NullnessAnalysis<'a> {
    facts: &'a ValueNumberFacts,
    entry_non_null: Vec<ValueNumber>,
    return_nullness: Option<&'a MethodPropertyDatabase<ReturnNullness>>,
    hierarchy: Option<&'a TypeRepository>,
}

impl<'a> NullnessAnalysis<'a> {
    pub(crate) fn new(facts: &'a ValueNumberFacts) -> Self {
        Self {
            facts,
            entry_non_null: Vec::new(),
            return_nullness: None,
            hierarchy: None,
        }
    }

    /// Values known not null on method entry.
    pub(crate) fn with_entry_non_null(mut self, values: Vec<ValueNumber>) -> Self {
        self.entry_non_null = values;
        self
    }

    /// Callee summaries used to mark invocation results not null.
    pub(crate) fn with_return_nullness(
        mut self,
        database: &'a MethodPropertyDatabase<ReturnNullness>,
    ) -> Self {
        self.return_nullness = Some(database);
        self
    }

    /// Hierarchy used to find summaries of inherited callees.
    pub(crate) fn with_hierarchy(mut self, repository: &'a TypeRepository) -> Self {
        self.hierarchy = Some(repository);
        self
    }

    fn frame_after(&self, location: Location) -> DataflowResult<&'a ValueNumberFrame> {
        let frame = self.facts.frame_after(location).ok_or_else(|| {
            DataflowError::InvalidFact(format!(
                "no value numbers after block {} instruction {}",
                location.block, location.index
            ))
        })?;
        if !frame.valid {
            return Err(DataflowError::InvalidFact(format!(
                "invalid value-number frame after block {} instruction {}",
                location.block, location.index
            )));
        }
        Ok(frame)
    }

    /// Value an instruction dereferences, read from the frame before it.
    fn dereferenced_value(
        &self,
        instruction: &Instruction,
        before: &ValueNumberFrame,
    ) -> Option<ValueNumber> {
        let opcode = instruction.opcode;
        let depth = match opcode {
            opcodes::GETFIELD | opcodes::ARRAYLENGTH | opcodes::MONITORENTER | opcodes::ATHROW => 0,
            opcodes::PUTFIELD => match &instruction.kind {
                InstructionKind::Field(field) => field_slots(&field.descriptor),
                _ => return None,
            },
            opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKEINTERFACE => {
                match &instruction.kind {
                    InstructionKind::Invoke(method) => {
                        method_parameter_slots(&method.descriptor).ok()?
                    }
                    _ => return None,
                }
            }
            _ if opcodes::is_array_load(opcode) => 1,
            _ if opcodes::is_array_store(opcode) => 1 + opcodes::array_store_value_slots(opcode),
            _ => return None,
        };
        before.stack_value(depth)
    }

    /// Nullness of the value an instruction pushes, when the instruction determines it.
    fn produced_nullness(&self, instruction: &Instruction) -> Option<NullnessValue> {
        match instruction.opcode {
            opcodes::ACONST_NULL => Some(NullnessValue::DefinitelyNull),
            opcodes::LDC
            | opcodes::LDC_W
            | opcodes::NEW
            | opcodes::NEWARRAY
            | opcodes::ANEWARRAY
            | opcodes::MULTIANEWARRAY => Some(NullnessValue::DefinitelyNotNull),
            opcode if opcodes::is_invoke(opcode) => {
                let InstructionKind::Invoke(callee) = &instruction.kind else {
                    return None;
                };
                self.callee_returns_non_null(callee)
                    .then_some(NullnessValue::DefinitelyNotNull)
            }
            _ => None,
        }
    }

    fn callee_returns_non_null(&self, callee: &MemberRef) -> bool {
        let Some(database) = self.return_nullness else {
            return false;
        };
        if !returns_reference(&callee.descriptor).unwrap_or(false) {
            return false;
        }
        self.callee_owners(&callee.owner)
            .iter()
            .find_map(|owner| database.find_member(owner, &callee.name, &callee.descriptor))
            .is_some_and(|(_, property)| property.is_non_null())
    }

    /// `owner` followed by its supertypes, nearest first.
    fn callee_owners(&self, owner: &str) -> Vec<String> {
        let mut owners = vec![owner.to_string()];
        let Some(repository) = self.hierarchy else {
            return owners;
        };
        let Some(start) = repository.lookup_class(owner) else {
            return owners;
        };
        let mut seen = BTreeSet::from([start]);
        let mut queue: VecDeque<TypeId> = repository.direct_supertypes(start).into();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            owners.extend(repository.class_name(current));
            queue.extend(repository.direct_supertypes(current));
        }
        owners
    }

    /// Nullness of the returned reference and of every reference stored into a field.
    pub(crate) fn summarize(
        &self,
        dataflow: &Dataflow<'_, Self>,
        cfg: &ControlFlowGraph,
    ) -> DataflowResult<MethodNullness> {
        let mut summary = MethodNullness::default();
        for block in &cfg.blocks {
            let reachable = dataflow
                .start_fact(block.id)
                .is_some_and(DefinitelyNullSet::is_valid);
            if !reachable {
                continue;
            }
            for (index, instruction) in block.instructions.iter().enumerate() {
                let stored_field = match (&instruction.kind, instruction.opcode) {
                    (InstructionKind::Field(field), opcodes::PUTFIELD | opcodes::PUTSTATIC)
                        if is_reference_field(&field.descriptor) =>
                    {
                        Some(field)
                    }
                    _ => None,
                };
                if instruction.opcode != opcodes::ARETURN && stored_field.is_none() {
                    continue;
                }
                let location = Location {
                    block: block.id,
                    index,
                };
                let fact = dataflow.fact_at_location(location)?;
                if !fact.is_valid() {
                    continue;
                }
                let Some(value) = self
                    .facts
                    .frame_before(location)
                    .and_then(ValueNumberFrame::top_value)
                else {
                    continue;
                };
                let nullness = fact.nullness(value);
                match stored_field {
                    Some(field) => {
                        summary
                            .field_stores
                            .entry(field.clone())
                            .and_modify(|existing| *existing = existing.merge(nullness))
                            .or_insert(nullness);
                    }
                    None => {
                        summary.returns = Some(match summary.returns {
                            Some(existing) => existing.merge(nullness),
                            None => nullness,
                        });
                    }
                }
            }
        }
        Ok(summary)
    }
}

impl DataflowAnalysis for NullnessAnalysis<'_> {
    type Fact = DefinitelyNullSet;
    type Condition = NullCheckCondition;

    fn create_fact(&self) -> DefinitelyNullSet {
        DefinitelyNullSet::new(self.facts.num_values())
    }

    fn init_entry_fact(&self, fact: &mut DefinitelyNullSet) {
        fact.clear();
        for value in &self.entry_non_null {
            fact.set_nullness(*value, NullnessValue::DefinitelyNotNull);
        }
    }

    fn make_fact_top(&self, fact: &mut DefinitelyNullSet) {
        fact.set_top();
    }

    fn is_top(&self, fact: &DefinitelyNullSet) -> bool {
        fact.is_top()
    }

    fn is_fact_valid(&self, fact: &DefinitelyNullSet) -> bool {
        fact.is_top() || fact.is_bottom() || fact.is_consistent()
    }

    fn same(&self, left: &DefinitelyNullSet, right: &DefinitelyNullSet) -> bool {
        left == right
    }

    fn meet_into(&self, fact: &DefinitelyNullSet, _edge: &FlowEdge, result: &mut DefinitelyNullSet) {
        result.meet_into(fact);
    }

    fn transfer_instruction(
        &self,
        location: Location,
        instruction: &Instruction,
        fact: &mut DefinitelyNullSet,
    ) -> DataflowResult<()> {
        if !fact.is_valid() {
            return Ok(());
        }
        let after = self.frame_after(location)?;
        let dereferenced = self
            .facts
            .frame_before(location)
            .and_then(|before| self.dereferenced_value(instruction, before));
        if let Some(value) = dereferenced {
            fact.set_nullness(value, NullnessValue::DefinitelyNotNull);
        }
        if let Some(nullness) = self.produced_nullness(instruction) {
            if let Some(value) = after.top_value() {
                fact.set_nullness(value, nullness);
            }
        }
        Ok(())
    }

    fn condition(&self, block: &BasicBlock) -> Option<NullCheckCondition> {
        let instruction = block.last_instruction()?;
        let kind = NullCheckKind::from_opcode(instruction.opcode)?;
        let location = Location {
            block: block.id,
            index: block.instructions.len() - 1,
        };
        let before = self.facts.frame_before(location)?;
        let operands = match kind {
            NullCheckKind::IfNull | NullCheckKind::IfNonNull => vec![before.stack_value(0)?],
            NullCheckKind::AcmpEq | NullCheckKind::AcmpNe => {
                vec![before.stack_value(1)?, before.stack_value(0)?]
            }
        };
        Some(NullCheckCondition::new(kind, operands))
    }

    fn apply_refinement(
        &self,
        value: ValueNumber,
        refinement: NullnessValue,
        fact: &mut DefinitelyNullSet,
    ) {
        if refinement.is_definite() {
            fact.set_nullness(value, refinement);
        }
    }
}

/// Facts a method exports to the property databases.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodNullness {
    /// `None` when no reachable `areturn` exists.
    pub(crate) returns: Option<NullnessValue>,
    pub(crate) field_stores: BTreeMap<MemberRef, NullnessValue>,
}

/// Values not null on entry: the receiver of an instance method and parameters
/// declared not null.
pub(crate) fn entry_non_null_values(
    method: &Method,
    cfg: &ControlFlowGraph,
    facts: &ValueNumberFacts,
    parameters: Option<&ParameterNullness>,
) -> Result<Vec<ValueNumber>> {
    let Some(entry) = cfg.entry() else {
        return Ok(Vec::new());
    };
    let Some(frame) = facts.frame_before(Location {
        block: entry,
        index: 0,
    }) else {
        return Ok(Vec::new());
    };
    let mut values = Vec::new();
    if !method.is_static() {
        values.extend(frame.local(0));
    }
    if let Some(parameters) = parameters {
        for (index, (slot, is_reference)) in parameter_locals(&method.descriptor, method.is_static())?
            .into_iter()
            .enumerate()
        {
            if is_reference && parameters.is_non_null(index) {
                values.extend(frame.local(slot));
            }
        }
    }
    Ok(values)
}
