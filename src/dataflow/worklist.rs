use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use super::{Condition, DataflowAnalysis};
use crate::errors::{DataflowError, DataflowResult};
use crate::ir::{BasicBlock, BlockId, ControlFlowGraph, FlowEdge, Location};

/// Fixpoint facts for one method, queryable per block, edge, and instruction.
pub(crate) struct Dataflow<'a, A: DataflowAnalysis> {
    analysis: &'a A,
    graph: MethodGraph<'a>,
    conditions: BTreeMap<BlockId, A::Condition>,
    start_facts: BTreeMap<BlockId, A::Fact>,
    result_facts: BTreeMap<BlockId, A::Fact>,
    visits: BTreeMap<BlockId, usize>,
}

/// Iterate `analysis` over `cfg` until no block's out-fact changes.
pub(crate) fn execute<'a, A>(
    analysis: &'a A,
    cfg: &'a ControlFlowGraph,
    max_block_visits: usize,
) -> DataflowResult<Dataflow<'a, A>>
where
    A: DataflowAnalysis,
{
    let graph = MethodGraph::new(cfg);
    let mut dataflow = Dataflow {
        analysis,
        conditions: BTreeMap::new(),
        start_facts: BTreeMap::new(),
        result_facts: BTreeMap::new(),
        visits: BTreeMap::new(),
        graph,
    };
    for (id, block) in &dataflow.graph.blocks {
        dataflow.start_facts.insert(*id, analysis.create_fact());
        dataflow.result_facts.insert(*id, analysis.create_fact());
        if let Some(condition) = analysis.condition(block) {
            dataflow.conditions.insert(*id, condition);
        }
    }
    let Some(entry) = cfg.entry() else {
        return Ok(dataflow);
    };

    let mut queue = VecDeque::from([entry]);
    let mut queued = BTreeSet::from([entry]);
    while let Some(id) = queue.pop_front() {
        queued.remove(&id);
        let visits = dataflow.visits.entry(id).or_default();
        *visits += 1;
        if *visits > max_block_visits {
            return Err(DataflowError::IterationLimit {
                block: id,
                limit: max_block_visits,
            });
        }
        let block = dataflow.graph.block(id)?;

        let mut start = analysis.create_fact();
        if id == entry {
            analysis.init_entry_fact(&mut start);
        }
        for edge in dataflow.graph.predecessors(id) {
            if let Some(fact) = dataflow.edge_fact(edge) {
                analysis.meet_into(&fact, edge, &mut start);
            }
        }
        if !analysis.is_fact_valid(&start) {
            debug!(block = id, "invalid start fact; block treated as unreachable");
            analysis.make_fact_top(&mut start);
        }

        let result = transfer_prefix(analysis, block, &start, block.instructions.len())?;
        dataflow.start_facts.insert(id, start);
        if let Some(condition) = dataflow.conditions.get_mut(&id) {
            condition.refresh(&result);
        }
        let changed = dataflow
            .result_facts
            .get(&id)
            .is_none_or(|previous| !analysis.same(previous, &result));
        dataflow.result_facts.insert(id, result);
        if changed {
            for successor in dataflow.graph.successors(id) {
                if queued.insert(*successor) {
                    queue.push_back(*successor);
                }
            }
        }
    }
    Ok(dataflow)
}

/// Apply transfer to the first `count` instructions of `block`.
fn transfer_prefix<A>(
    analysis: &A,
    block: &BasicBlock,
    start: &A::Fact,
    count: usize,
) -> DataflowResult<A::Fact>
where
    A: DataflowAnalysis,
{
    let mut fact = start.clone();
    if analysis.is_top(&fact) {
        return Ok(fact);
    }
    for (index, instruction) in block.instructions.iter().take(count).enumerate() {
        let location = Location {
            block: block.id,
            index,
        };
        match analysis.transfer_instruction(location, instruction, &mut fact) {
            Ok(()) => {}
            Err(DataflowError::InvalidFact(reason)) => {
                debug!(block = block.id, index, %reason, "invalid fact; block treated as unreachable");
                analysis.make_fact_top(&mut fact);
                return Ok(fact);
            }
            Err(err) => return Err(err),
        }
    }
    if !analysis.is_fact_valid(&fact) {
        debug!(block = block.id, "invalid result fact; block treated as unreachable");
        analysis.make_fact_top(&mut fact);
    }
    Ok(fact)
}

impl<'a, A: DataflowAnalysis> Dataflow<'a, A> {
    pub(crate) fn start_fact(&self, block: BlockId) -> Option<&A::Fact> {
        self.start_facts.get(&block)
    }

    pub(crate) fn result_fact(&self, block: BlockId) -> Option<&A::Fact> {
        self.result_facts.get(&block)
    }

    pub(crate) fn visits(&self, block: BlockId) -> usize {
        self.visits.get(&block).copied().unwrap_or(0)
    }

    /// Whether the source block is reached and its condition, if any, allows the edge.
    pub(crate) fn is_edge_feasible(&self, edge: &FlowEdge) -> bool {
        self.edge_fact(edge).is_some()
    }

    /// Out-fact of the edge's source with the edge's refinement applied; `None` if pruned.
    pub(crate) fn edge_fact(&self, edge: &FlowEdge) -> Option<A::Fact> {
        let source = self.result_facts.get(&edge.from)?;
        if self.analysis.is_top(source) {
            return None;
        }
        let mut fact = source.clone();
        if let Some(condition) = self.conditions.get(&edge.from) {
            if let Some(decision) = condition.decision(edge.kind) {
                if !decision.feasible {
                    return None;
                }
                if let Some(value) = condition.value_number() {
                    self.analysis
                        .apply_refinement(value, decision.refinement, &mut fact);
                }
            }
        }
        Some(fact)
    }

    /// Fact holding just before the instruction at `location`.
    pub(crate) fn fact_at_location(&self, location: Location) -> DataflowResult<A::Fact> {
        self.replay(location, location.index)
    }

    /// Fact holding just after the instruction at `location`.
    #[cfg(test)]
    pub(crate) fn fact_after_location(&self, location: Location) -> DataflowResult<A::Fact> {
        self.replay(location, location.index + 1)
    }

    fn replay(&self, location: Location, count: usize) -> DataflowResult<A::Fact> {
        let block = self.graph.block(location.block)?;
        let start = self
            .start_facts
            .get(&location.block)
            .ok_or(DataflowError::UnknownBlock(location.block))?;
        transfer_prefix(self.analysis, block, start, count)
    }
}

/// CFG lookup tables used by the worklist loop.
struct MethodGraph<'a> {
    blocks: BTreeMap<BlockId, &'a BasicBlock>,
    predecessors: BTreeMap<BlockId, Vec<&'a FlowEdge>>,
    successors: BTreeMap<BlockId, Vec<BlockId>>,
}

impl<'a> MethodGraph<'a> {
    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let mut blocks = BTreeMap::new();
        for block in &cfg.blocks {
            blocks.insert(block.id, block);
        }

        let mut predecessors: BTreeMap<BlockId, Vec<&FlowEdge>> = BTreeMap::new();
        let mut successors: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for edge in &cfg.edges {
            predecessors.entry(edge.to).or_default().push(edge);
            successors.entry(edge.from).or_default().push(edge.to);
        }
        for targets in successors.values_mut() {
            targets.sort();
            targets.dedup();
        }

        Self {
            blocks,
            predecessors,
            successors,
        }
    }

    fn block(&self, id: BlockId) -> DataflowResult<&'a BasicBlock> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or(DataflowError::UnknownBlock(id))
    }

    fn predecessors(&self, id: BlockId) -> &[&'a FlowEdge] {
        self.predecessors
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn successors(&self, id: BlockId) -> &[BlockId] {
        self.successors
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
