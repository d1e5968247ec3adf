//! Class, member, and control-flow model supplied by the class loading and CFG stages.

use serde::Deserialize;

use crate::vna::ValueNumberFacts;

pub(crate) type BlockId = u32;

pub(crate) const ACC_STATIC: u32 = 0x0008;

/// Class declaration with its members.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Class {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) super_name: Option<String>,
    #[serde(default)]
    pub(crate) interfaces: Vec<String>,
    #[serde(default)]
    pub(crate) is_interface: bool,
    /// Generic class signature, when the class file carries one.
    #[serde(default)]
    pub(crate) signature: Option<String>,
    /// Part of the code under analysis rather than a library dependency.
    #[serde(default)]
    pub(crate) application: bool,
    #[serde(default)]
    pub(crate) fields: Vec<Field>,
    #[serde(default)]
    pub(crate) methods: Vec<Method>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    #[serde(default)]
    pub(crate) signature: Option<String>,
    #[serde(default)]
    pub(crate) access_flags: u32,
}

/// Method with its control-flow graph and value numbering.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    #[serde(default)]
    pub(crate) signature: Option<String>,
    #[serde(default)]
    pub(crate) access_flags: u32,
    /// Absent for abstract and native methods.
    #[serde(default)]
    pub(crate) cfg: Option<ControlFlowGraph>,
    #[serde(default)]
    pub(crate) value_numbers: Option<ValueNumberFacts>,
}

impl Method {
    pub(crate) fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// Basic blocks in program order and typed edges between them.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub(crate) edges: Vec<FlowEdge>,
}

impl ControlFlowGraph {
    /// The entry block is the first block in program order.
    pub(crate) fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|block| block.id)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct BasicBlock {
    pub(crate) id: BlockId,
    #[serde(default)]
    pub(crate) instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub(crate) fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    #[serde(default)]
    pub(crate) kind: InstructionKind,
}

/// Operands the analyses need beyond the opcode.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum InstructionKind {
    Invoke(MemberRef),
    Field(MemberRef),
    #[default]
    Other,
}

/// Symbolic reference to a method or field.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct FlowEdge {
    pub(crate) from: BlockId,
    pub(crate) to: BlockId,
    pub(crate) kind: EdgeKind,
}

/// Edge discriminant. A conditional's taken edge is `Branch`, its not-taken edge `FallThrough`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Goto,
    Switch,
    Exception,
}

/// Instruction position inside a method.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
pub(crate) struct Location {
    pub(crate) block: BlockId,
    pub(crate) index: usize,
}
