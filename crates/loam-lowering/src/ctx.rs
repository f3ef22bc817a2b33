//! Pass context: synthetic-variable management, the state list and its
//! parallel exception table, and the scope-tracking counters.
//!
//! One `Ctx` value is threaded through every component of the transform and
//! owns all heap-allocated synthetic variables and state nodes until the
//! transform returns.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;
use loam_ast::{Node, StateLabel, SymId, SymbolTable, Ty, VarDef};

use crate::ice;

/// Well-known names. Synthetic variables use the reserved `:` prefix;
/// runtime entry points are resolved by plain name.
pub(crate) mod names {
    pub const STATE: &str = ":state";
    pub const TMP_RESULT: &str = ":tmpResult";
    pub const UNROLL_FINALLY: &str = ":unrollFinally";
    pub const CUR_EXC: &str = ":curExc";
    pub const STATE_LOOP: &str = ":stateLoop";
    pub const GET_CURRENT_EXCEPTION: &str = "getCurrentException";
    pub const SETUP_EXC: &str = "closureIterSetupExc";
}

/// The generator function handed to the pass: its symbol, declared return
/// type, distinguished result slot, and body.
pub struct GeneratorFn {
    pub sym: SymId,
    pub ret_ty: Ty,
    pub result_sym: SymId,
    pub body: Node,
}

/// Layout of the closure environment object, owned by the closure-conversion
/// pass. When lowering runs post-lifting, synthetic variables become fields
/// of this layout; the state word is its first field (a contract the code
/// generator depends on).
#[derive(Default)]
pub struct EnvLayout {
    pub fields: Vec<SymId>,
}

/// Whether closure conversion has already happened when this pass runs.
pub enum LiftingMode {
    /// Synthetic variables are fresh locals, declared in a section the
    /// dispatcher emitter prepends to the loop body.
    PreLifting,
    /// Synthetic variables are fields of the existing environment object,
    /// accessed through the environment parameter.
    PostLifting {
        env_param: SymId,
        layout: Rc<RefCell<EnvLayout>>,
    },
}

/// Handle to a synthetic variable. `access()` builds the node that reads or
/// writes it: a plain symbol pre-lifting, an environment field post-lifting.
#[derive(Clone)]
pub struct VarHandle {
    pub sym: SymId,
    access: Node,
}

impl VarHandle {
    pub fn access(&self) -> Node {
        self.access.clone()
    }
}

pub(crate) struct State {
    pub body: Node,
}

pub(crate) struct Ctx<'a> {
    pub syms: &'a mut SymbolTable,
    pub mode: LiftingMode,
    pub ret_ty: Ty,
    pub result_sym: SymId,

    pub states: Vec<State>,
    /// Parallel to `states`: handler encoding per state. 0 = no handler,
    /// negative = except state, positive = finally state.
    pub exception_table: Vec<i16>,

    /// Handler encoding copied into the table when a new state is created.
    pub cur_exc_handling_state: i32,
    /// State index of the enclosing finally, or -1.
    pub nearest_finally: i32,
    /// Nesting depth inside breakable constructs during break relocation.
    pub block_level: u32,
    pub exit_state_idx: i32,
    pub has_exceptions: bool,

    temp_var_id: u32,
    /// Registry of synthetic variables, in declaration order. An `IndexMap`
    /// keeps the emitted declaration section deterministic.
    vars: IndexMap<String, VarHandle>,
}

impl<'a> Ctx<'a> {
    pub fn new(syms: &'a mut SymbolTable, gen: &GeneratorFn, mode: LiftingMode) -> Self {
        Ctx {
            syms,
            mode,
            ret_ty: gen.ret_ty.clone(),
            result_sym: gen.result_sym,
            states: Vec::new(),
            exception_table: Vec::new(),
            cur_exc_handling_state: 0,
            nearest_finally: -1,
            block_level: 0,
            exit_state_idx: -1,
            has_exceptions: false,
            temp_var_id: 0,
            vars: IndexMap::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Synthetic variables
    // ---------------------------------------------------------------------

    /// Idempotent: repeated calls with the same logical name return the same
    /// handle.
    pub fn ensure_var(&mut self, name: &str, ty: Ty) -> VarHandle {
        if let Some(h) = self.vars.get(name) {
            return h.clone();
        }
        let handle = match &self.mode {
            LiftingMode::PreLifting => {
                let sym = self.syms.fresh(name.to_string(), ty);
                VarHandle {
                    sym,
                    access: Node::Sym(sym),
                }
            }
            LiftingMode::PostLifting { env_param, layout } => {
                let env_param = *env_param;
                let sym = if name == names::STATE {
                    // Closure conversion placed the state word as the first
                    // field of the environment object.
                    let layout = layout.borrow();
                    match layout.fields.first() {
                        Some(&first) if self.syms.name(first) == names::STATE => first,
                        _ => ice!("environment layout lacks the state field at slot 0"),
                    }
                } else {
                    let sym = self.syms.fresh(name.to_string(), ty);
                    layout.borrow_mut().fields.push(sym);
                    sym
                };
                VarHandle {
                    sym,
                    access: Node::field(Node::Sym(env_param), sym),
                }
            }
        };
        tracing::trace!(name, "allocated synthetic variable");
        self.vars.insert(name.to_string(), handle.clone());
        handle
    }

    pub fn state_var(&mut self) -> VarHandle {
        self.ensure_var(names::STATE, Ty::Int)
    }

    pub fn state_access(&mut self) -> Node {
        self.state_var().access()
    }

    pub fn tmp_result_var(&mut self) -> VarHandle {
        let ty = self.ret_ty.clone();
        self.ensure_var(names::TMP_RESULT, ty)
    }

    pub fn unroll_flag_var(&mut self) -> VarHandle {
        self.ensure_var(names::UNROLL_FINALLY, Ty::Bool)
    }

    pub fn cur_exc_var(&mut self) -> VarHandle {
        self.ensure_var(names::CUR_EXC, Ty::Exc)
    }

    /// Fresh temporary for hoisted expression values. The numbered name
    /// guarantees uniqueness within one transform.
    pub fn new_temp_var(&mut self, ty: Ty) -> VarHandle {
        let name = format!(":tmp{}", self.temp_var_id);
        self.temp_var_id += 1;
        self.ensure_var(&name, ty)
    }

    /// Declarations for the dispatcher to prepend, pre-lifting only.
    pub fn decl_section(&self) -> Option<Node> {
        if !matches!(self.mode, LiftingMode::PreLifting) || self.vars.is_empty() {
            return None;
        }
        let defs = self
            .vars
            .values()
            .map(|h| VarDef {
                sym: h.sym,
                init: None,
            })
            .collect();
        Some(Node::VarSection(defs))
    }

    // ---------------------------------------------------------------------
    // Runtime entry points (resolved by name)
    // ---------------------------------------------------------------------

    pub fn get_current_exception(&mut self) -> Node {
        let sym = self.syms.intern(names::GET_CURRENT_EXCEPTION, Ty::Exc);
        Node::call(sym, vec![])
    }

    pub fn setup_exc_call(&mut self) -> Node {
        let slot = self.cur_exc_var().access();
        let sym = self.syms.intern(names::SETUP_EXC, Ty::Void);
        Node::call(sym, vec![slot])
    }

    pub fn state_loop_label(&mut self) -> SymId {
        self.syms.intern(names::STATE_LOOP, Ty::Void)
    }

    // ---------------------------------------------------------------------
    // States and the exception table
    // ---------------------------------------------------------------------

    /// Append a new state. The parallel exception-table entry is written at
    /// this moment and never rewritten except by elision renumbering. When a
    /// committed goto placeholder is supplied, its target is filled in.
    pub fn new_state(&mut self, body: Node, goto_out: Option<&StateLabel>) -> usize {
        let idx = self.states.len();
        debug_assert_eq!(self.exception_table.len(), idx);
        let handler = self.cur_exc_handling_state;
        if i32::from(handler as i16) != handler {
            ice!("exception-handler encoding {handler} exceeds the table element range");
        }
        self.exception_table.push(handler as i16);
        self.states.push(State { body });
        if let Some(label) = goto_out {
            label.set(idx as i32);
        }
        tracing::trace!(state = idx, handler, "created state");
        idx
    }

    pub fn take_state_body(&mut self, idx: usize) -> Node {
        mem::replace(&mut self.states[idx].body, Node::StmtList(Vec::new()))
    }

    pub fn set_state_body(&mut self, idx: usize, body: Node) {
        self.states[idx].body = body;
    }

    // ---------------------------------------------------------------------
    // Scoped counters
    // ---------------------------------------------------------------------

    pub fn with_exc_handling<R>(&mut self, v: i32, f: impl FnOnce(&mut Self) -> R) -> R {
        let old = mem::replace(&mut self.cur_exc_handling_state, v);
        let r = f(self);
        self.cur_exc_handling_state = old;
        r
    }

    pub fn with_nearest_finally<R>(&mut self, v: i32, f: impl FnOnce(&mut Self) -> R) -> R {
        let old = mem::replace(&mut self.nearest_finally, v);
        let r = f(self);
        self.nearest_finally = old;
        r
    }

    pub fn with_block_level<R>(&mut self, v: u32, f: impl FnOnce(&mut Self) -> R) -> R {
        let old = mem::replace(&mut self.block_level, v);
        let r = f(self);
        self.block_level = old;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gen(syms: &mut SymbolTable) -> GeneratorFn {
        let sym = syms.fresh("it", Ty::Int);
        let result_sym = syms.fresh("result", Ty::Int);
        GeneratorFn {
            sym,
            ret_ty: Ty::Int,
            result_sym,
            body: Node::StmtList(vec![]),
        }
    }

    #[test]
    fn ensure_var_is_idempotent() {
        let mut syms = SymbolTable::new();
        let gen = test_gen(&mut syms);
        let mut ctx = Ctx::new(&mut syms, &gen, LiftingMode::PreLifting);
        let a = ctx.state_var();
        let b = ctx.state_var();
        assert_eq!(a.sym, b.sym);
        // one declaration, not two
        match ctx.decl_section() {
            Some(Node::VarSection(defs)) => assert_eq!(defs.len(), 1),
            other => panic!("expected a var section, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn post_lifting_resolves_state_to_first_field() {
        let mut syms = SymbolTable::new();
        let gen = test_gen(&mut syms);
        let state_field = syms.fresh(names::STATE, Ty::Int);
        let env_param = syms.fresh(":env", Ty::Env);
        let layout = Rc::new(RefCell::new(EnvLayout {
            fields: vec![state_field],
        }));
        let mut ctx = Ctx::new(
            &mut syms,
            &gen,
            LiftingMode::PostLifting {
                env_param,
                layout: Rc::clone(&layout),
            },
        );
        let h = ctx.state_var();
        assert_eq!(h.sym, state_field);
        match h.access() {
            Node::FieldAccess { field, .. } => assert_eq!(field, state_field),
            other => panic!("expected field access, got {:?}", loam_ast::query::kind_name(&other)),
        }
        // a new synthetic var becomes a fresh trailing field
        let f = ctx.cur_exc_var();
        assert_eq!(*layout.borrow().fields.last().unwrap(), f.sym);
        // no declaration section post-lifting
        assert!(ctx.decl_section().is_none());
    }

    #[test]
    fn temp_names_are_unique_and_reserved() {
        let mut syms = SymbolTable::new();
        let gen = test_gen(&mut syms);
        let mut ctx = Ctx::new(&mut syms, &gen, LiftingMode::PreLifting);
        let a = ctx.new_temp_var(Ty::Int);
        let b = ctx.new_temp_var(Ty::Int);
        assert_ne!(a.sym, b.sym);
        assert!(ctx.syms.name(a.sym).starts_with(':'));
    }

    #[test]
    fn scoped_counters_restore() {
        let mut syms = SymbolTable::new();
        let gen = test_gen(&mut syms);
        let mut ctx = Ctx::new(&mut syms, &gen, LiftingMode::PreLifting);
        ctx.with_nearest_finally(7, |ctx| {
            assert_eq!(ctx.nearest_finally, 7);
            ctx.with_exc_handling(-3, |ctx| assert_eq!(ctx.cur_exc_handling_state, -3));
            assert_eq!(ctx.cur_exc_handling_state, 0);
        });
        assert_eq!(ctx.nearest_finally, -1);
    }
}
