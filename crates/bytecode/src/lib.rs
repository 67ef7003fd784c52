//! Bytecode tree model for the mixin engine.
//!
//! A constant-pool-free, in-memory representation of a compiled class:
//! class, field and method nodes, annotation trees and an arena-backed
//! instruction list with stable handles. Round-trips to and from class file
//! bytes, recomputes stack and local limits on demand, and reconstructs the
//! local variable picture at arbitrary program points.

pub mod access;
pub mod analysis;
pub mod annotation;
pub mod builder;
pub mod constant;
pub mod descriptor;
pub mod emit;
pub mod error;
pub mod insn;
pub mod node;
pub mod opcode;
mod parse;
pub mod printer;
pub mod resolver;

pub use access::AccessFlags;
pub use analysis::{compute_maxs, local_types_at, LocalSlot};
pub use annotation::{find_annotation, AnnotationNode, AnnotationValue};
pub use builder::{BodyBuilder, ClassBuilder};
pub use constant::ConstantValue;
pub use descriptor::TypeDesc;
pub use emit::{emit_class, emit_class_with, FrameComputer, NoFrames, StackMapFrame, VerifType};
pub use error::{BytecodeError, BytecodeResult};
pub use insn::{BsmArg, Handle, Insn, InsnId, InsnList, LabelId};
pub use node::{
    clone_method, ClassNode, ClassVersion, FieldNode, LocalVar, MethodNode, TryCatchBlock,
};
pub use opcode::Opcode;
pub use parse::{parse_class, parse_class_header, ClassHeader, HeaderMember, MemberKind};
pub use resolver::{ClassResolver, RootResolver};
