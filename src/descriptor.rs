//! Descriptor definitions for vector MAC unit instantiations

use serde::{Deserialize, Serialize};

/// Element kind of an operand vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElemKind {
    /// `U`: unsigned integer
    Unsigned,
    /// `I`: signed integer
    Signed,
    /// `S`: signed accumulator
    SignedAcc,
}

impl ElemKind {
    pub fn letter(&self) -> char {
        match self {
            ElemKind::Unsigned => 'U',
            ElemKind::Signed => 'I',
            ElemKind::SignedAcc => 'S',
        }
    }

    pub fn is_signed(&self) -> bool {
        !matches!(self, ElemKind::Unsigned)
    }
}

/// A group of identical operand vectors: `<count>x<width><kind><bits>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandGroup {
    /// Number of vector registers in the group
    pub count: usize,
    /// Elements per vector register
    pub width: usize,
    pub kind: ElemKind,
    /// Bits per element
    pub bits: usize,
    /// False for the short form, where the count is omitted and `width`
    /// is the total element count of the group
    pub explicit_count: bool,
}

impl OperandGroup {
    pub fn new(count: usize, width: usize, kind: ElemKind, bits: usize) -> Self {
        Self {
            count,
            width,
            kind,
            bits,
            explicit_count: true,
        }
    }

    /// `<width><kind><bits>` with the count left out
    pub fn short(width: usize, kind: ElemKind, bits: usize) -> Self {
        Self {
            explicit_count: false,
            ..Self::new(1, width, kind, bits)
        }
    }

    /// Total elements across all registers of the group
    pub fn elements(&self) -> usize {
        self.count * self.width
    }
}

impl std::fmt::Display for OperandGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.explicit_count {
            write!(f, "{}x", self.count)?;
        }
        write!(f, "{}{}{}", self.width, self.kind.letter(), self.bits)
    }
}

/// Accumulator lanes: `<lanes><kind><bits>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneGroup {
    pub lanes: usize,
    pub kind: ElemKind,
    pub bits: usize,
}

impl std::fmt::Display for LaneGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.lanes, self.kind.letter(), self.bits)
    }
}

/// A parsed accelerator descriptor: data operands, coefficient operands, lanes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub data: OperandGroup,
    pub coef: OperandGroup,
    pub lanes: LaneGroup,
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.data, self.coef, self.lanes)
    }
}
