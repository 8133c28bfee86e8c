//! Semantic actions of the grammar table
//!
//! Each action runs after its transition with the index of the lexeme that
//! triggered it. Actions declare names, register parameters and data fields
//! and emit the structured control-flow commands.

use indexmap::IndexMap;

use crate::block::{state_name, BlockInfo, ContractInfo, FieldInfo, FuncInfo, FuncName, ObjInfo};
use crate::bytecode::{AssignTarget, ByteCode, Cmd, ErrorLevel, Operand, VarRef};
use crate::compiler::{Compiler, FieldStep};
use crate::contract::is_sys_var;
use crate::error::{ErrorKind, Result};
use crate::grammar::Action;
use crate::token::*;
use crate::value::{Value, VarType};

impl<'vm> Compiler<'vm> {
    pub(crate) fn action(&mut self, action: Action, i: usize) -> Result<()> {
        match action {
            Action::None => Ok(()),
            Action::NameBlock => self.f_name_block(i),
            Action::FParam => self.f_fparam(i),
            Action::FType => self.f_ftype(i),
            Action::FTail => self.f_ftail(i),
            Action::FResult => self.f_fresult(i),
            Action::FNameParam => self.f_fname_param(i),
            Action::If => self.push_parent(Cmd::If, i),
            Action::Else => self.f_else(i),
            Action::While => {
                self.push_parent(Cmd::While, i)?;
                let line = self.lexemes[i].line;
                let parent = self.parent();
                self.block_mut(parent).code.push(ByteCode::bare(Cmd::Continue, line));
                Ok(())
            }
            Action::Return => self.push_code(Cmd::Return, Operand::None, i),
            Action::Continue => self.push_code(Cmd::Continue, Operand::None, i),
            Action::Break => self.push_code(Cmd::Break, Operand::None, i),
            Action::CmdError => {
                let level = match self.lexemes[i].value {
                    LexValue::Code(KEY_WARNING) => ErrorLevel::Warning,
                    LexValue::Code(KEY_INFO) => ErrorLevel::Info,
                    _ => ErrorLevel::Error,
                };
                self.push_code(Cmd::Error, Operand::Level(level), i)
            }
            Action::Var => self.f_var(i),
            Action::VarType => self.f_var_type(i),
            Action::AssignVar => self.f_assign_var(i),
            Action::Assign => self.push_code(Cmd::Assign, Operand::None, i),
            Action::Tx => self.f_tx(i),
            Action::Settings => self.in_contract(i, ErrorKind::SettingsOutsideContract).map(|_| ()),
            Action::ConstName => {
                self.const_name = self.ident(i);
                Ok(())
            }
            Action::ConstValue => self.f_const_value(i),
            Action::Field => self.f_field(i),
            Action::FieldType => self.f_field_type(i),
            Action::FieldTag => self.f_field_tag(i),
            Action::FieldComma => self.f_field_comma(i),
            Action::FieldLine => self.f_field_line(i),
            Action::Fields => self.f_fields(i),
        }
    }

    fn ident(&self, i: usize) -> Option<String> {
        self.lexemes[i].ident().map(str::to_string)
    }

    fn push_code(&mut self, cmd: Cmd, value: Operand, i: usize) -> Result<()> {
        let line = self.lexemes[i].line;
        let top = self.top();
        self.block_mut(top).code.push(ByteCode::new(cmd, line, value));
        Ok(())
    }

    /// Wraps the freshly opened block into a command of its parent
    fn push_parent(&mut self, cmd: Cmd, i: usize) -> Result<()> {
        let line = self.lexemes[i].line;
        let child = self.top();
        let parent = self.parent();
        self.block_mut(parent)
            .code
            .push(ByteCode::new(cmd, line, Operand::Block(child)));
        Ok(())
    }

    fn f_else(&mut self, i: usize) -> Result<()> {
        let parent = self.parent();
        if self.block(parent).code.last().map(|c| c.cmd) != Some(Cmd::If) {
            return Err(self.error_at(ErrorKind::ElseWithoutIf, i));
        }
        self.push_parent(Cmd::Else, i)
    }

    fn block_name(&self, id: usize) -> String {
        match &self.block(id).info {
            BlockInfo::Func(info) => info.name.clone(),
            BlockInfo::Contract(info) => info.name.clone(),
            BlockInfo::None => String::new(),
        }
    }

    fn f_name_block(&mut self, i: usize) -> Result<()> {
        let name = self.ident(i).unwrap_or_default();
        let top = self.top();
        let parent = self.parent();
        let is_contract = i > 0 && self.lexemes[i - 1].kind == keyword(KEY_CONTRACT);
        let (kind, key) = if is_contract {
            ("contract", state_name(self.owner.state_id, &name))
        } else {
            ("function", name.clone())
        };
        if self.block(parent).objects.contains_key(&key) {
            return Err(self.error_at(
                ErrorKind::Redeclared {
                    kind,
                    name,
                    parent: self.block_name(parent),
                },
                i,
            ));
        }
        let id = self.block(parent).children.len().saturating_sub(1) as u32;
        let owner = self.owner;
        let (info, obj) = if is_contract {
            let info = ContractInfo {
                id,
                name: key.clone(),
                owner,
                ..Default::default()
            };
            (BlockInfo::Contract(info), ObjInfo::Contract(top))
        } else {
            let info = FuncInfo {
                name: key.clone(),
                id,
                ..Default::default()
            };
            (BlockInfo::Func(info), ObjInfo::Func(top))
        };
        self.block_mut(top).info = info;
        self.block_mut(parent).objects.insert(key, obj);
        Ok(())
    }

    fn f_fparam(&mut self, i: usize) -> Result<()> {
        let name = self.ident(i).unwrap_or_default();
        let top = self.top();
        if self.block(top).objects.contains_key(&name) || self.pending.contains(&name) {
            return Err(self.error_at(ErrorKind::DuplicateParam(name), i));
        }
        self.pending.push(name);
        Ok(())
    }

    /// Turns the pending parameter names into variables of type `ty`
    fn declare_params(&mut self, ty: VarType, variadic: bool, i: usize) -> Result<()> {
        let top = self.top();
        let names = std::mem::take(&mut self.pending);
        if variadic && names.len() > 1 {
            return Err(self.error_at(ErrorKind::VariadicTwice, i));
        }
        for name in names {
            let block = self.block_mut(top);
            let index = block.vars.len();
            block.vars.push(ty);
            block.objects.insert(name, ObjInfo::Var { index });
            let Some(info) = block.func_mut() else {
                continue;
            };
            let twice = match info.chain.clone() {
                Some(chain) => {
                    let segment = info
                        .names
                        .get_or_insert_with(IndexMap::new)
                        .entry(chain)
                        .or_insert_with(FuncName::default);
                    let twice = variadic && segment.variadic;
                    segment.params.push(ty);
                    segment.offsets.push(index);
                    segment.variadic |= variadic;
                    twice
                }
                None => {
                    let twice = variadic && info.variadic;
                    info.params.push(ty);
                    info.variadic |= variadic;
                    twice
                }
            };
            if twice {
                return Err(self.error_at(ErrorKind::VariadicTwice, i));
            }
        }
        Ok(())
    }

    fn f_ftype(&mut self, i: usize) -> Result<()> {
        let ty = match self.lexemes[i].value {
            LexValue::Type(ty) => ty,
            _ => VarType::Any,
        };
        self.declare_params(ty, false, i)
    }

    fn f_ftail(&mut self, i: usize) -> Result<()> {
        self.declare_params(VarType::Array, true, i)
    }

    fn f_fresult(&mut self, i: usize) -> Result<()> {
        let LexValue::Type(ty) = self.lexemes[i].value else {
            return Ok(());
        };
        let top = self.top();
        if let Some(info) = self.block_mut(top).func_mut() {
            info.results.push(ty);
        }
        Ok(())
    }

    fn f_fname_param(&mut self, i: usize) -> Result<()> {
        let name = self.ident(i).unwrap_or_default();
        let top = self.top();
        let duplicate = match self.block_mut(top).func_mut() {
            Some(info) => {
                let names = info.names.get_or_insert_with(IndexMap::new);
                if names.contains_key(&name) {
                    true
                } else {
                    names.insert(name.clone(), FuncName::default());
                    info.chain = Some(name.clone());
                    false
                }
            }
            None => false,
        };
        if duplicate {
            return Err(self.error_at(ErrorKind::DuplicateParam(name), i));
        }
        Ok(())
    }

    fn f_var(&mut self, i: usize) -> Result<()> {
        let name = self.ident(i).unwrap_or_default();
        let top = self.top();
        if self.block(top).objects.contains_key(&name) || self.pending.contains(&name) {
            return Err(self.error_at(ErrorKind::DuplicateVar(name), i));
        }
        self.pending.push(name);
        Ok(())
    }

    fn f_var_type(&mut self, i: usize) -> Result<()> {
        let ty = match self.lexemes[i].value {
            LexValue::Type(ty) => ty,
            _ => VarType::Any,
        };
        let top = self.top();
        for name in std::mem::take(&mut self.pending) {
            let block = self.block_mut(top);
            let index = block.vars.len();
            block.vars.push(ty);
            block.objects.insert(name, ObjInfo::Var { index });
        }
        Ok(())
    }

    /// Looks a variable up through the open blocks
    pub(crate) fn find_var(&self, name: &str) -> Option<AssignTarget> {
        for &id in self.stack.iter().rev() {
            match self.block(id).objects.get(name) {
                Some(ObjInfo::Var { index }) => {
                    return Some(AssignTarget::Var(VarRef {
                        owner: id,
                        index: *index,
                    }))
                }
                Some(ObjInfo::ExtVar(name)) => return Some(AssignTarget::Extend(name.clone())),
                Some(_) => return None,
                None => {}
            }
        }
        None
    }

    fn f_assign_var(&mut self, i: usize) -> Result<()> {
        let lexeme = &self.lexemes[i];
        let name = lexeme.ident().unwrap_or_default().to_string();
        let target = if lexeme.kind == LEX_EXTEND {
            if is_sys_var(&name) {
                return Err(self.error_at(ErrorKind::SysVarAssign(name), i));
            }
            AssignTarget::Extend(name)
        } else {
            match self.find_var(&name) {
                Some(target) => target,
                None => return Err(self.error_at(ErrorKind::UnknownIdent(name), i)),
            }
        };
        let line = self.lexemes[i].line;
        let top = self.top();
        let code = &mut self.block_mut(top).code;
        if let Some(ByteCode {
            cmd: Cmd::AssignVar,
            value: Operand::Assign(targets),
            ..
        }) = code.last_mut()
        {
            targets.push(target);
        } else {
            code.push(ByteCode::new(Cmd::AssignVar, line, Operand::Assign(vec![target])));
        }
        Ok(())
    }

    /// The top block must be a contract
    fn in_contract(&self, i: usize, kind: ErrorKind) -> Result<usize> {
        let top = self.top();
        if self.block(top).contract().is_none() {
            return Err(self.error_at(kind, i));
        }
        Ok(top)
    }

    fn f_tx(&mut self, i: usize) -> Result<()> {
        let top = self.in_contract(i, ErrorKind::DataOutsideContract)?;
        if let Some(info) = self.block_mut(top).contract_mut() {
            info.tx.get_or_insert_with(Vec::new);
        }
        self.pending_fields.clear();
        self.field_step = FieldStep::Start;
        Ok(())
    }

    fn f_const_value(&mut self, i: usize) -> Result<()> {
        let top = self.in_contract(i, ErrorKind::SettingsOutsideContract)?;
        let value = match &self.lexemes[i].value {
            LexValue::Str(s) => Value::Str(s.clone()),
            LexValue::Int(n) => Value::Int(*n),
            LexValue::Float(f) => Value::Float(*f),
            LexValue::Bool(b) => Value::Bool(*b),
            _ => Value::Nil,
        };
        let name = self.const_name.take().unwrap_or_default();
        if let Some(info) = self.block_mut(top).contract_mut() {
            info.settings.insert(name, value);
        }
        Ok(())
    }

    fn tx_fields(&mut self) -> Option<&mut Vec<FieldInfo>> {
        let top = self.top();
        self.block_mut(top).contract_mut().and_then(|info| info.tx.as_mut())
    }

    fn field_error(&self, i: usize, make: fn(u16, u32) -> ErrorKind) -> crate::error::Error {
        let lex = &self.lexemes[i];
        self.error_at(make(lex.line, lex.column), i)
    }

    fn f_field(&mut self, i: usize) -> Result<()> {
        match self.field_step {
            FieldStep::Start | FieldStep::Comma => {}
            FieldStep::Name => return Err(self.field_error(i, ErrorKind::DataType)),
            FieldStep::Type | FieldStep::Tag => return Err(self.field_error(i, ErrorKind::DataName)),
        }
        let name = self.ident(i).unwrap_or_default();
        if is_sys_var(&name) {
            return Err(self.error_at(ErrorKind::DataSysVar(name), i));
        }
        let Some(fields) = self.tx_fields() else {
            return Ok(());
        };
        fields.push(FieldInfo {
            name,
            ty: VarType::Any,
            original: 0,
            tags: String::new(),
        });
        let index = fields.len() - 1;
        self.pending_fields.push(index);
        self.field_step = FieldStep::Name;
        Ok(())
    }

    fn f_field_comma(&mut self, i: usize) -> Result<()> {
        if self.field_step != FieldStep::Name {
            return Err(self.field_error(i, ErrorKind::DataName));
        }
        self.field_step = FieldStep::Comma;
        Ok(())
    }

    fn f_field_type(&mut self, i: usize) -> Result<()> {
        if self.field_step != FieldStep::Name {
            return Err(self.field_error(i, ErrorKind::DataName));
        }
        let LexValue::Type(ty) = self.lexemes[i].value else {
            return Err(self.field_error(i, ErrorKind::DataType));
        };
        let original = self.lexemes[i].ext;
        let pending = self.pending_fields.clone();
        if let Some(fields) = self.tx_fields() {
            for index in pending {
                fields[index].ty = ty;
                fields[index].original = original;
            }
        }
        self.field_step = FieldStep::Type;
        Ok(())
    }

    fn f_field_tag(&mut self, i: usize) -> Result<()> {
        if self.field_step != FieldStep::Type {
            return Err(self.field_error(i, ErrorKind::DataTag));
        }
        let tag = match &self.lexemes[i].value {
            LexValue::Str(s) => s.clone(),
            _ => String::new(),
        };
        let pending = self.pending_fields.clone();
        if let Some(fields) = self.tx_fields() {
            for index in pending {
                fields[index].tags = tag.clone();
            }
        }
        self.field_step = FieldStep::Tag;
        Ok(())
    }

    fn f_field_line(&mut self, i: usize) -> Result<()> {
        if matches!(self.field_step, FieldStep::Name | FieldStep::Comma) {
            return Err(self.field_error(i, ErrorKind::DataType));
        }
        self.pending_fields.clear();
        self.field_step = FieldStep::Start;
        Ok(())
    }

    /// Closes the data section; fields become environment variables
    fn f_fields(&mut self, i: usize) -> Result<()> {
        self.f_field_line(i)?;
        let top = self.top();
        let names: Vec<String> = self
            .block(top)
            .contract()
            .and_then(|info| info.tx.as_ref())
            .map(|fields| fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();
        let block = self.block_mut(top);
        for name in names {
            block.objects.insert(name.clone(), ObjInfo::ExtVar(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{ObjInfo, Owner};
    use crate::compiler::{compile_block, CompileOptions};
    use crate::error::ErrorKind;
    use crate::value::{Value, VarType};
    use crate::vm::VM;

    fn compile(vm: &mut VM, source: &str) -> crate::error::Result<usize> {
        compile_block(vm, source, Owner::state(1), CompileOptions::default())
    }

    #[test]
    fn test_contract_sections() {
        let mut vm = VM::new();
        let root = compile(
            &mut vm,
            r#"contract Token {
                data {
                    Recipient, Sender int
                    Amount money "optional"
                }
                settings {
                    rate = 10
                    label = "tok"
                }
                action { $result = Amount }
            }"#,
        )
        .unwrap();
        let Some(ObjInfo::Contract(id)) = vm.blocks[root].objects.get("@1Token").cloned() else {
            panic!("contract missing");
        };
        let info = vm.blocks[id].contract().unwrap();
        assert_eq!(info.name, "@1Token");
        let tx = info.tx.as_ref().unwrap();
        assert_eq!(tx.len(), 3);
        assert_eq!(tx[1].name, "Sender");
        assert_eq!(tx[1].ty, VarType::Int);
        assert!(tx[2].is_optional());
        assert_eq!(info.settings.get("rate"), Some(&Value::Int(10)));
        assert!(matches!(vm.blocks[id].objects.get("Amount"), Some(ObjInfo::ExtVar(_))));
    }

    #[test]
    fn test_data_errors() {
        let mut vm = VM::new();
        let err = compile(&mut vm, "contract A { data { Name } }").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DataType(..)));
        let err = compile(&mut vm, "contract A { data { int } }").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DataName(..)));
        let err = compile(&mut vm, "contract A { data { \"tag\" } }").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DataTag(..)));
        let err = compile(&mut vm, "func f() { data { A int } }").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DataOutsideContract));
    }

    #[test]
    fn test_redeclared() {
        let mut vm = VM::new();
        let err = compile(&mut vm, "contract A { func f() {} func f() {} }").unwrap_err();
        assert_eq!(
            err.kind.to_string(),
            "function 'f' redeclared in this contract '@1A'"
        );
    }

    #[test]
    fn test_params_and_chain() {
        let mut vm = VM::new();
        let root = compile(&mut vm, "func f(a, b int, c string).Where(w string).Limit(n int) string { return c }").unwrap();
        let Some(ObjInfo::Func(id)) = vm.blocks[root].objects.get("f").cloned() else {
            panic!("func missing");
        };
        let info = vm.blocks[id].func().unwrap();
        assert_eq!(info.params, vec![VarType::Int, VarType::Int, VarType::String]);
        assert_eq!(info.results, vec![VarType::String]);
        let names = info.names.as_ref().unwrap();
        assert_eq!(names.keys().cloned().collect::<Vec<_>>(), vec!["Where", "Limit"]);
        assert_eq!(names["Limit"].offsets, vec![4]);

        let err = compile(&mut vm, "func g(a, b ...) {}").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::VariadicTwice));
        let err = compile(&mut vm, "func g(a int, a int) {}").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateParam(_)));
    }

    #[test]
    fn test_sys_var_assign() {
        let mut vm = VM::new();
        let err = compile(&mut vm, "func f() { $key_id = 1 }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SysVarAssign("key_id".into()));
    }
}
