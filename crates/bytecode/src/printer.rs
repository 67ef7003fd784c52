//! Textual method dump for diagnostics.

use crate::insn::Insn;
use crate::node::MethodNode;
use std::fmt::Write;

/// Renders a method body as one instruction per line.
///
/// Used by local-capture printing and debug export; the format is for human
/// eyes only and carries no stability promise.
pub fn dump_method(method: &MethodNode) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{} maxs={}/{}",
        method.name, method.desc, method.max_stack, method.max_locals
    );
    for (id, insn) in method.instructions.iter() {
        let rendered = match insn {
            Insn::Label(label) => format!("{label}:"),
            Insn::Line { line, .. } => format!("  .line {line}"),
            Insn::Simple(op) => format!("  {}", op.mnemonic()),
            Insn::IntPush { opcode, value } => format!("  {} {value}", opcode.mnemonic()),
            Insn::Var { opcode, index } => format!("  {} {index}", opcode.mnemonic()),
            Insn::Iinc { index, delta } => format!("  iinc {index} {delta}"),
            Insn::Type { opcode, class } => format!("  {} {class}", opcode.mnemonic()),
            Insn::NewArray { atype } => format!("  newarray {atype}"),
            Insn::MultiANewArray { desc, dims } => format!("  multianewarray {desc} {dims}"),
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            } => format!("  {} {owner}.{name}:{desc}", opcode.mnemonic()),
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                ..
            } => format!("  {} {owner}.{name}{desc}", opcode.mnemonic()),
            Insn::InvokeDynamic { name, desc, .. } => format!("  invokedynamic {name}{desc}"),
            Insn::Jump { opcode, label } => format!("  {} {label}", opcode.mnemonic()),
            Insn::TableSwitch { low, high, .. } => format!("  tableswitch {low}..{high}"),
            Insn::LookupSwitch { pairs, .. } => format!("  lookupswitch ({})", pairs.len()),
            Insn::Ldc(value) => format!("  ldc {value}"),
        };
        let _ = writeln!(out, "{rendered:<40} ; {id}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFlags;
    use crate::opcode::Opcode;

    #[test]
    fn test_dump_contains_mnemonics() {
        let mut method = MethodNode::new(AccessFlags::PUBLIC, "tick", "()V");
        method.instructions.add(Insn::Var {
            opcode: Opcode::ALOAD,
            index: 0,
        });
        method.instructions.add(Insn::Simple(Opcode::RETURN));
        let text = dump_method(&method);
        assert!(text.contains("tick()V"));
        assert!(text.contains("aload 0"));
        assert!(text.contains("return"));
    }
}
