//! Shared harness for the lowering integration tests.
//!
//! Holds a small structural-AST evaluator and the runtime dispatch loop
//! that resumes a lowered generator body once per element. The evaluator
//! only ever runs *lowered* bodies, so a surviving `yield` or `goto-state`
//! is a hard failure, which doubles as an invariant check on the pass
//! output.

// Each integration-test binary uses its own slice of the harness.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use loam_ast::{BinOp, Node, SymId, SymbolTable, Ty, UnOp};
use loam_lowering::Lowered;
use rustc_hash::FxHashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Nil,
    Exc(String),
    Arr(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Env(Rc<RefCell<FxHashMap<SymId, Value>>>),
}

#[derive(Clone, Debug)]
pub enum Flow {
    Normal,
    Break(Option<SymId>),
    Continue,
    Return,
    Raise(Value),
}

fn default_value(ty: &Ty) -> Value {
    match ty {
        Ty::Int | Ty::Int16 => Value::Int(0),
        Ty::Bool => Value::Bool(false),
        _ => Value::Nil,
    }
}

pub struct Machine<'a> {
    pub syms: &'a SymbolTable,
    pub vars: FxHashMap<SymId, Value>,
    pub current_exc: Option<Value>,
    result_sym: SymId,
}

impl<'a> Machine<'a> {
    pub fn new(syms: &'a SymbolTable, result_sym: SymId) -> Self {
        Machine {
            syms,
            vars: FxHashMap::default(),
            current_exc: None,
            result_sym,
        }
    }

    pub fn set_var(&mut self, sym: SymId, value: Value) {
        self.vars.insert(sym, value);
    }

    pub fn get_var(&self, sym: SymId) -> Value {
        self.vars
            .get(&sym)
            .cloned()
            .unwrap_or_else(|| default_value(self.syms.ty(sym)))
    }

    fn read_result(&self) -> Value {
        self.get_var(self.result_sym)
    }

    fn write(&mut self, target: &Node, value: Value) {
        match target {
            Node::Sym(sym) => {
                self.vars.insert(*sym, value);
            }
            Node::FieldAccess { obj, field } => match self.eval(obj) {
                Value::Env(map) => {
                    map.borrow_mut().insert(*field, value);
                }
                other => panic!("field store into a non-environment value: {other:?}"),
            },
            other => panic!(
                "unsupported assignment target: {}",
                loam_ast::query::kind_name(other)
            ),
        }
    }

    pub fn exec(&mut self, n: &Node) -> Flow {
        match n {
            Node::StmtList(stmts) => {
                for s in stmts {
                    match self.exec(s) {
                        Flow::Normal => {}
                        flow => return flow,
                    }
                }
                Flow::Normal
            }
            Node::StmtListExpr { stmts, value } => {
                for s in stmts {
                    match self.exec(s) {
                        Flow::Normal => {}
                        flow => return flow,
                    }
                }
                let _ = self.eval(value);
                Flow::Normal
            }
            Node::VarSection(defs) => {
                for d in defs {
                    if let Some(init) = &d.init {
                        let v = self.eval(init);
                        self.vars.insert(d.sym, v);
                    }
                }
                Flow::Normal
            }
            Node::Asgn { target, value } | Node::FastAsgn { target, value } => {
                let v = self.eval(value);
                self.write(target, v);
                Flow::Normal
            }
            Node::If {
                branches,
                else_body,
            } => {
                for b in branches {
                    if matches!(self.eval(&b.cond), Value::Bool(true)) {
                        return self.exec(&b.body);
                    }
                }
                match else_body {
                    Some(e) => self.exec(e),
                    None => Flow::Normal,
                }
            }
            Node::Case {
                selector,
                arms,
                else_body,
            } => {
                let sel = self.eval(selector);
                for a in arms {
                    if a.matches.iter().any(|m| self.eval(m) == sel) {
                        return self.exec(&a.body);
                    }
                }
                match else_body {
                    Some(e) => self.exec(e),
                    None => Flow::Normal,
                }
            }
            Node::While { cond, body } => loop {
                if !matches!(self.eval(cond), Value::Bool(true)) {
                    return Flow::Normal;
                }
                match self.exec(body) {
                    Flow::Normal | Flow::Continue => {}
                    Flow::Break(None) => return Flow::Normal,
                    flow => return flow,
                }
            },
            Node::Block { label, body } => match self.exec(body) {
                Flow::Break(None) => Flow::Normal,
                Flow::Break(Some(l)) if Some(l) == *label => Flow::Normal,
                flow => flow,
            },
            Node::Break { label } => Flow::Break(*label),
            Node::Continue => Flow::Continue,
            Node::Try {
                body,
                excepts,
                finally,
            } => {
                let mut flow = self.exec(body);
                if let Flow::Raise(exc) = flow {
                    let handler = excepts.iter().find(|b| {
                        b.classes.is_empty()
                            || b.classes
                                .iter()
                                .any(|c| matches!(&exc, Value::Exc(n) if *n == c.0))
                    });
                    match handler {
                        Some(h) => {
                            let saved = self.current_exc.clone();
                            self.current_exc = Some(exc);
                            flow = self.exec(&h.body);
                            self.current_exc = saved;
                        }
                        None => flow = Flow::Raise(exc),
                    }
                }
                if let Some(fin) = finally {
                    match self.exec(fin) {
                        Flow::Normal => {}
                        fin_flow => flow = fin_flow,
                    }
                }
                flow
            }
            Node::Raise(op) => match op {
                Some(e) => {
                    let v = self.eval(e);
                    Flow::Raise(v)
                }
                None => Flow::Raise(
                    self.current_exc
                        .clone()
                        .expect("re-raise without a current exception"),
                ),
            },
            Node::Return(op) => {
                if let Some(e) = op {
                    let v = self.eval(e);
                    let result = self.result_sym;
                    self.vars.insert(result, v);
                }
                Flow::Return
            }
            Node::Discard(op) => {
                if let Some(e) = op {
                    let _ = self.eval(e);
                }
                Flow::Normal
            }
            Node::ProcDef { .. } => Flow::Normal,
            Node::Yield(_) => panic!("a yield survived lowering"),
            Node::GotoState(_) => panic!("a goto-state survived lowering"),
            Node::Dispatch {
                selector, states, ..
            } => {
                let sel = match self.eval(selector) {
                    Value::Int(s) => s,
                    other => panic!("non-integer dispatch selector: {other:?}"),
                };
                if sel < 0 {
                    return Flow::Return;
                }
                let start = states
                    .iter()
                    .position(|c| c.label as i64 == sel)
                    .unwrap_or_else(|| panic!("dispatch to unknown state {sel}"));
                // dense-switch semantics: fall through from the selected
                // case; terminating state bodies make this unobservable
                for case in &states[start..] {
                    for s in &case.body {
                        match self.exec(s) {
                            Flow::Normal => {}
                            flow => return flow,
                        }
                    }
                }
                panic!("state {sel} fell through the dispatch");
            }
            // expression in statement position
            other => {
                let _ = self.eval(other);
                Flow::Normal
            }
        }
    }

    pub fn eval(&mut self, n: &Node) -> Value {
        match n {
            Node::IntLit(v) => Value::Int(*v),
            Node::BoolLit(v) => Value::Bool(*v),
            Node::NilLit => Value::Nil,
            Node::Sym(sym) => self.get_var(*sym),
            Node::FieldAccess { obj, field } => match self.eval(obj) {
                Value::Env(map) => {
                    let map = map.borrow();
                    map.get(field)
                        .cloned()
                        .unwrap_or_else(|| default_value(self.syms.ty(*field)))
                }
                other => panic!("field read from a non-environment value: {other:?}"),
            },
            Node::Index { arr, idx } => {
                let arr = self.eval(arr);
                let idx = match self.eval(idx) {
                    Value::Int(i) => i,
                    other => panic!("non-integer index: {other:?}"),
                };
                match arr {
                    Value::Arr(elems) => elems[idx as usize].clone(),
                    other => panic!("indexing a non-array value: {other:?}"),
                }
            }
            Node::BinExpr { op, lhs, rhs } => {
                let l = self.eval(lhs);
                let r = self.eval(rhs);
                match op {
                    BinOp::Eq => Value::Bool(l == r),
                    BinOp::Ne => Value::Bool(l != r),
                    _ => {
                        let (Value::Int(l), Value::Int(r)) = (&l, &r) else {
                            panic!("arithmetic on non-integers: {l:?} {op:?} {r:?}");
                        };
                        match op {
                            BinOp::Add => Value::Int(l + r),
                            BinOp::Sub => Value::Int(l - r),
                            BinOp::Mul => Value::Int(l * r),
                            BinOp::Lt => Value::Bool(l < r),
                            BinOp::Le => Value::Bool(l <= r),
                            BinOp::Gt => Value::Bool(l > r),
                            BinOp::Ge => Value::Bool(l >= r),
                            BinOp::Eq | BinOp::Ne => unreachable!(),
                        }
                    }
                }
            }
            Node::UnExpr { op, operand } => match (op, self.eval(operand)) {
                (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
                (UnOp::Neg, Value::Int(i)) => Value::Int(-i),
                (op, v) => panic!("bad unary operand: {op:?} {v:?}"),
            },
            Node::And { lhs, rhs } => match self.eval(lhs) {
                Value::Bool(false) => Value::Bool(false),
                Value::Bool(true) => self.eval(rhs),
                other => panic!("non-boolean and operand: {other:?}"),
            },
            Node::Or { lhs, rhs } => match self.eval(lhs) {
                Value::Bool(true) => Value::Bool(true),
                Value::Bool(false) => self.eval(rhs),
                other => panic!("non-boolean or operand: {other:?}"),
            },
            Node::Tuple(elems) => {
                Value::Tuple(Rc::new(elems.iter().map(|e| self.eval(e)).collect()))
            }
            Node::ArrayLit { elems, .. } => {
                Value::Arr(Rc::new(elems.iter().map(|e| self.eval(e)).collect()))
            }
            Node::ObjConstr { fields, .. } => Value::Tuple(Rc::new(
                fields.iter().map(|(_, v)| self.eval(v)).collect(),
            )),
            Node::Conv { operand, .. } | Node::Cast { operand, .. } => self.eval(operand),
            Node::ExcTest { operand, class } => {
                let v = self.eval(operand);
                Value::Bool(matches!(&v, Value::Exc(n) if *n == class.0))
            }
            Node::StmtListExpr { stmts, value } => {
                for s in stmts {
                    match self.exec(s) {
                        Flow::Normal => {}
                        flow => panic!("abnormal control flow inside an expression: {flow:?}"),
                    }
                }
                self.eval(value)
            }
            Node::Call { callee, args } => {
                let name = self.syms.name(*callee).to_string();
                match name.as_str() {
                    "getCurrentException" => {
                        self.current_exc.clone().unwrap_or(Value::Nil)
                    }
                    "closureIterSetupExc" => {
                        // re-establish the exception context saved across a
                        // suspension
                        match self.eval(&args[0]) {
                            Value::Nil => self.current_exc = None,
                            v => self.current_exc = Some(v),
                        }
                        Value::Nil
                    }
                    other => panic!("call to unknown runtime symbol {other}"),
                }
            }
            other => panic!(
                "unsupported expression kind: {}",
                loam_ast::query::kind_name(other)
            ),
        }
    }
}

/// How one full drive of a lowered generator ended.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The generator finished; the value is whatever the result slot held
    /// (the return value when the generator returned one).
    Finished(Value),
    /// An exception escaped the generator.
    Raised(Value),
}

#[derive(Debug)]
pub struct DriveResult {
    pub yields: Vec<Value>,
    pub outcome: Outcome,
}

/// Resume the lowered body until the persisted state goes negative,
/// collecting one result-slot value per yield. `setup` seeds the machine
/// (argument values, the environment object post-lifting).
pub fn drive_with(
    syms: &SymbolTable,
    lowered: &Lowered,
    setup: impl FnOnce(&mut Machine),
) -> DriveResult {
    let mut m = Machine::new(syms, lowered.result_sym);
    setup(&mut m);
    let mut yields = Vec::new();
    for _ in 0..1000 {
        match m.exec(&lowered.body) {
            Flow::Normal | Flow::Return => {}
            Flow::Raise(v) => {
                return DriveResult {
                    yields,
                    outcome: Outcome::Raised(v),
                }
            }
            flow => panic!("break/continue escaped the generator body: {flow:?}"),
        }
        match m.eval(&lowered.state_access) {
            Value::Int(state) if state < 0 => {
                return DriveResult {
                    yields,
                    outcome: Outcome::Finished(m.read_result()),
                }
            }
            Value::Int(_) => yields.push(m.read_result()),
            other => panic!("non-integer state value: {other:?}"),
        }
    }
    panic!("generator did not terminate within the resumption bound");
}

pub fn drive(syms: &SymbolTable, lowered: &Lowered) -> DriveResult {
    drive_with(syms, lowered, |_| {})
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}
