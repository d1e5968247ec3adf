//! Generic forward dataflow framework over a method's control-flow graph.
//!
//! An analysis supplies a fact lattice and transfer functions through
//! `DataflowAnalysis`; `worklist::execute` iterates to a fixpoint. Branches
//! whose outcome depends on a fact register a `Condition`, which lets the
//! solver prune infeasible edges and refine facts along feasible ones.

pub(crate) mod null_set;
pub(crate) mod nullness;
pub(crate) mod worklist;

use std::fmt;

use crate::errors::DataflowResult;
use crate::ir::{BasicBlock, EdgeKind, FlowEdge, Instruction, Location};
use crate::vna::ValueNumber;

/// Visits of a single block after which the solver gives up on a method.
pub(crate) const DEFAULT_MAX_BLOCK_VISITS: usize = 97;

/// Whether an outgoing edge can be taken, and what it implies for the tested value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Decision<R> {
    pub(crate) feasible: bool,
    pub(crate) refinement: R,
}

impl<R> Decision<R> {
    pub(crate) fn feasible(refinement: R) -> Self {
        Self {
            feasible: true,
            refinement,
        }
    }

    pub(crate) fn infeasible(refinement: R) -> Self {
        Self {
            feasible: false,
            refinement,
        }
    }
}

/// Branch condition bound to the last instruction of a block.
pub(crate) trait Condition<F> {
    type Refinement: Copy + fmt::Debug;

    /// Value the branch inspects, once known.
    fn value_number(&self) -> Option<ValueNumber>;

    /// Recompute decisions from the block's out-fact. Called on every visit of the block.
    fn refresh(&mut self, fact: &F);

    /// Decision for an outgoing edge; `None` for edges the condition does not govern.
    fn decision(&self, edge: EdgeKind) -> Option<Decision<Self::Refinement>>;
}

/// Condition for analyses without edge refinement.
#[cfg(test)]
#[derive(Debug)]
pub(crate) enum NoCondition {}

#[cfg(test)]
impl<F> Condition<F> for NoCondition {
    type Refinement = ();

    fn value_number(&self) -> Option<ValueNumber> {
        match *self {}
    }

    fn refresh(&mut self, _fact: &F) {
        match *self {}
    }

    fn decision(&self, _edge: EdgeKind) -> Option<Decision<()>> {
        match *self {}
    }
}

/// Lattice and transfer functions of a forward analysis.
pub(crate) trait DataflowAnalysis {
    type Fact: Clone + fmt::Debug;
    type Condition: Condition<Self::Fact>;

    /// A new fact in the Top (unreached) state.
    fn create_fact(&self) -> Self::Fact;

    fn init_entry_fact(&self, fact: &mut Self::Fact);

    fn make_fact_top(&self, fact: &mut Self::Fact);

    fn is_top(&self, fact: &Self::Fact) -> bool;

    /// Facts failing this check degrade their block to Top.
    fn is_fact_valid(&self, _fact: &Self::Fact) -> bool {
        true
    }

    fn same(&self, left: &Self::Fact, right: &Self::Fact) -> bool;

    /// Meet `fact`, flowing along `edge`, into `result`.
    fn meet_into(&self, fact: &Self::Fact, edge: &FlowEdge, result: &mut Self::Fact);

    fn transfer_instruction(
        &self,
        location: Location,
        instruction: &Instruction,
        fact: &mut Self::Fact,
    ) -> DataflowResult<()>;

    fn condition(&self, _block: &BasicBlock) -> Option<Self::Condition> {
        None
    }

    /// Apply a feasible edge's refinement of `value` to the fact flowing along it.
    fn apply_refinement(
        &self,
        _value: ValueNumber,
        _refinement: <Self::Condition as Condition<Self::Fact>>::Refinement,
        _fact: &mut Self::Fact,
    ) {
    }
}
