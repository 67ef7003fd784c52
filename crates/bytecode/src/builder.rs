//! Programmatic class construction.
//!
//! A fluent builder used to assemble classes in memory, primarily by tests
//! that need targets and mixins without binary fixtures.

use crate::access::AccessFlags;
use crate::analysis::compute_maxs;
use crate::annotation::AnnotationNode;
use crate::constant::ConstantValue;
use crate::insn::{Insn, LabelId};
use crate::node::{ClassNode, FieldNode, LocalVar, MethodNode, TryCatchBlock};
use crate::opcode::Opcode;

/// Builds a [`ClassNode`] incrementally.
pub struct ClassBuilder {
    class: ClassNode,
}

impl ClassBuilder {
    /// Starts a public class with the given internal name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            class: ClassNode::new(name),
        }
    }

    /// Sets the access flags.
    pub fn access(mut self, access: AccessFlags) -> Self {
        self.class.access = access;
        self
    }

    /// Sets the superclass.
    pub fn super_class<S: Into<String>>(mut self, name: S) -> Self {
        self.class.super_name = Some(name.into());
        self
    }

    /// Adds a declared interface.
    pub fn interface<S: Into<String>>(mut self, name: S) -> Self {
        self.class.interfaces.push(name.into());
        self
    }

    /// Adds a visible class annotation.
    pub fn annotation(mut self, node: AnnotationNode) -> Self {
        self.class.visible_annotations.push(node);
        self
    }

    /// Adds a field.
    pub fn field<S: Into<String>>(mut self, access: AccessFlags, name: S, desc: S) -> Self {
        self.class.fields.push(FieldNode::new(access, name, desc));
        self
    }

    /// Adds a fully built field.
    pub fn field_node(mut self, field: FieldNode) -> Self {
        self.class.fields.push(field);
        self
    }

    /// Adds a method whose body is assembled by `body`.
    ///
    /// Max stack and locals are computed from the finished body.
    pub fn method<S: Into<String>>(
        mut self,
        access: AccessFlags,
        name: S,
        desc: S,
        body: impl FnOnce(&mut BodyBuilder),
    ) -> Self {
        let mut builder = BodyBuilder {
            method: MethodNode::new(access, name, desc),
        };
        body(&mut builder);
        let mut method = builder.method;
        if let Ok((stack, locals)) = compute_maxs(&method, &self.class.name) {
            method.max_stack = stack;
            method.max_locals = locals;
        }
        self.class.methods.push(method);
        self
    }

    /// Adds a fully built method.
    pub fn method_node(mut self, method: MethodNode) -> Self {
        self.class.methods.push(method);
        self
    }

    /// Finishes the class.
    pub fn build(self) -> ClassNode {
        self.class
    }
}

/// Assembles one method body.
pub struct BodyBuilder {
    method: MethodNode,
}

impl BodyBuilder {
    /// Adds a visible method annotation.
    pub fn annotation(&mut self, node: AnnotationNode) -> &mut Self {
        self.method.visible_annotations.push(node);
        self
    }

    /// Allocates a label for later placement.
    pub fn label(&mut self) -> LabelId {
        self.method.instructions.new_label()
    }

    /// Places a previously allocated label here.
    pub fn place(&mut self, label: LabelId) -> &mut Self {
        self.method.instructions.add(Insn::Label(label));
        self
    }

    /// Adds any instruction.
    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.method.instructions.add(insn);
        self
    }

    /// Adds an operand-less instruction.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.insn(Insn::Simple(opcode))
    }

    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.insn(Insn::Var {
            opcode: Opcode::ALOAD,
            index,
        })
    }

    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.insn(Insn::Var {
            opcode: Opcode::ILOAD,
            index,
        })
    }

    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.insn(Insn::Var {
            opcode: Opcode::ISTORE,
            index,
        })
    }

    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.insn(Insn::Var {
            opcode: Opcode::ASTORE,
            index,
        })
    }

    /// Pushes an int using the smallest encoding.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        self.insn(Insn::push_int(value))
    }

    /// Loads a string constant.
    pub fn ldc_str<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.insn(Insn::Ldc(ConstantValue::String(value.into())))
    }

    /// Loads any constant.
    pub fn ldc(&mut self, value: ConstantValue) -> &mut Self {
        self.insn(Insn::Ldc(value))
    }

    pub fn getfield<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.field_insn(Opcode::GETFIELD, owner, name, desc)
    }

    pub fn putfield<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.field_insn(Opcode::PUTFIELD, owner, name, desc)
    }

    pub fn getstatic<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.field_insn(Opcode::GETSTATIC, owner, name, desc)
    }

    pub fn putstatic<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.field_insn(Opcode::PUTSTATIC, owner, name, desc)
    }

    fn field_insn<S: Into<String>>(
        &mut self,
        opcode: Opcode,
        owner: S,
        name: S,
        desc: S,
    ) -> &mut Self {
        self.insn(Insn::Field {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        })
    }

    pub fn invoke_virtual<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.method_insn(Opcode::INVOKEVIRTUAL, owner, name, desc, false)
    }

    pub fn invoke_static<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.method_insn(Opcode::INVOKESTATIC, owner, name, desc, false)
    }

    pub fn invoke_special<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.method_insn(Opcode::INVOKESPECIAL, owner, name, desc, false)
    }

    pub fn invoke_interface<S: Into<String>>(&mut self, owner: S, name: S, desc: S) -> &mut Self {
        self.method_insn(Opcode::INVOKEINTERFACE, owner, name, desc, true)
    }

    fn method_insn<S: Into<String>>(
        &mut self,
        opcode: Opcode,
        owner: S,
        name: S,
        desc: S,
        itf: bool,
    ) -> &mut Self {
        self.insn(Insn::Method {
            opcode,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
            itf,
        })
    }

    pub fn new_type<S: Into<String>>(&mut self, class: S) -> &mut Self {
        self.insn(Insn::Type {
            opcode: Opcode::NEW,
            class: class.into(),
        })
    }

    pub fn checkcast<S: Into<String>>(&mut self, class: S) -> &mut Self {
        self.insn(Insn::Type {
            opcode: Opcode::CHECKCAST,
            class: class.into(),
        })
    }

    /// Adds a branch to `label`.
    pub fn jump(&mut self, opcode: Opcode, label: LabelId) -> &mut Self {
        self.insn(Insn::Jump { opcode, label })
    }

    pub fn goto(&mut self, label: LabelId) -> &mut Self {
        self.jump(Opcode::GOTO, label)
    }

    pub fn vreturn(&mut self) -> &mut Self {
        self.op(Opcode::RETURN)
    }

    pub fn ireturn(&mut self) -> &mut Self {
        self.op(Opcode::IRETURN)
    }

    pub fn areturn(&mut self) -> &mut Self {
        self.op(Opcode::ARETURN)
    }

    /// Adds a line number marker at a fresh label here.
    pub fn line(&mut self, line: u16) -> &mut Self {
        let (label, _) = self.method.instructions.add_label();
        self.insn(Insn::Line { line, label })
    }

    /// Registers an exception handler range.
    pub fn try_catch(
        &mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.method.try_catch_blocks.push(TryCatchBlock {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    /// Declares a local variable table entry.
    pub fn local_var<S: Into<String>>(
        &mut self,
        name: S,
        desc: S,
        start: LabelId,
        end: LabelId,
        index: u16,
    ) -> &mut Self {
        self.method.local_variables.push(LocalVar {
            name: name.into(),
            desc: desc.into(),
            start,
            end,
            index,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assembles_method() {
        let class = ClassBuilder::new("net/example/Target")
            .field(AccessFlags::PRIVATE, "counter", "I")
            .method(AccessFlags::PUBLIC, "increment", "()V", |body| {
                body.aload(0)
                    .aload(0)
                    .getfield("net/example/Target", "counter", "I")
                    .iconst(1)
                    .op(Opcode::IADD)
                    .putfield("net/example/Target", "counter", "I")
                    .vreturn();
            })
            .build();
        assert_eq!(class.fields.len(), 1);
        let method = class.find_method("increment", "()V").unwrap();
        assert_eq!(method.instructions.len(), 7);
        assert_eq!(method.max_stack, 3);
        assert_eq!(method.max_locals, 1);
    }
}
