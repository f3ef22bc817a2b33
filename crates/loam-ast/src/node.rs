//! The AST node sum type.
//!
//! One enum over every construct the mid-end passes see, with `Box`/`Vec`
//! children so ownership stays tree-shaped. Control-flow edges introduced by
//! the closure-iterator lowering reference states by integer index instead of
//! by pointer ([`GotoState`](Node::GotoState) / [`Dispatch`](Node::Dispatch)).
//!
//! A goto target is a [`StateLabel`]: a shared cell that starts out unset and
//! is filled in when the target state is created. Cloning a goto node shares
//! the cell, so every edge committed to a not-yet-created state observes the
//! fill.

use std::cell::Cell;
use std::rc::Rc;

use crate::sym::{ExcClass, SymId, Ty};

/// Shared, late-bound state index carried by `GotoState` nodes.
pub type StateLabel = Rc<Cell<i32>>;

/// Sentinel for a label whose target state has not been created yet.
pub const UNSET_LABEL: i32 = i32::MIN;

pub fn new_label(target: i32) -> StateLabel {
    Rc::new(Cell::new(target))
}

pub fn unset_label() -> StateLabel {
    Rc::new(Cell::new(UNSET_LABEL))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// `elif` link of an [`Node::If`] chain.
#[derive(Clone, Debug)]
pub struct IfBranch {
    pub cond: Node,
    pub body: Node,
}

/// `of`-arm of a [`Node::Case`].
#[derive(Clone, Debug)]
pub struct CaseArm {
    pub matches: Vec<Node>,
    pub body: Node,
}

/// `except` branch. An empty class list is a catch-all.
#[derive(Clone, Debug)]
pub struct ExceptBranch {
    pub classes: Vec<ExcClass>,
    pub body: Node,
}

#[derive(Clone, Debug)]
pub struct VarDef {
    pub sym: SymId,
    pub init: Option<Node>,
}

/// One state of the dispatch node emitted by the closure-iterator lowering.
#[derive(Clone, Debug)]
pub struct StateCase {
    pub label: usize,
    pub body: Vec<Node>,
}

#[derive(Clone, Debug)]
pub enum Node {
    // Terminals
    IntLit(i64),
    BoolLit(bool),
    NilLit,
    Sym(SymId),

    // Expressions
    Call {
        callee: SymId,
        args: Vec<Node>,
    },
    BinExpr {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    UnExpr {
        op: UnOp,
        operand: Box<Node>,
    },
    /// Short-circuit conjunction; the right operand is evaluated only when
    /// the left is true.
    And {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    /// Short-circuit disjunction.
    Or {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Tuple(Vec<Node>),
    ObjConstr {
        ty: Ty,
        fields: Vec<(SymId, Node)>,
    },
    ArrayLit {
        ty: Ty,
        elems: Vec<Node>,
    },
    /// Closure-environment field access: `obj.field`.
    FieldAccess {
        obj: Box<Node>,
        field: SymId,
    },
    Index {
        arr: Box<Node>,
        idx: Box<Node>,
    },
    /// Hidden conversion inserted by the semantic pass.
    Conv {
        ty: Ty,
        operand: Box<Node>,
    },
    Cast {
        ty: Ty,
        operand: Box<Node>,
    },
    /// Exception-type test: `operand is-of class`.
    ExcTest {
        operand: Box<Node>,
        class: ExcClass,
    },
    /// Expression whose evaluation contains statements; the final
    /// sub-expression is its value.
    StmtListExpr {
        stmts: Vec<Node>,
        value: Box<Node>,
    },

    // Statements
    StmtList(Vec<Node>),
    If {
        branches: Vec<IfBranch>,
        else_body: Option<Box<Node>>,
    },
    Case {
        selector: Box<Node>,
        arms: Vec<CaseArm>,
        else_body: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    Block {
        label: Option<SymId>,
        body: Box<Node>,
    },
    Break {
        label: Option<SymId>,
    },
    Continue,
    Try {
        body: Box<Node>,
        excepts: Vec<ExceptBranch>,
        finally: Option<Box<Node>>,
    },
    /// `Raise(None)` re-raises the currently handled exception.
    Raise(Option<Box<Node>>),
    Return(Option<Box<Node>>),
    VarSection(Vec<VarDef>),
    Asgn {
        target: Box<Node>,
        value: Box<Node>,
    },
    /// Assignment known not to need copy/conversion glue.
    FastAsgn {
        target: Box<Node>,
        value: Box<Node>,
    },
    Yield(Option<Box<Node>>),
    Discard(Option<Box<Node>>),
    /// `for` loops must be desugared to `while` before the mid-end lowering
    /// passes run; the kind exists so they can reject it.
    For {
        var: SymId,
        iter: Box<Node>,
        body: Box<Node>,
    },
    /// Nested routine definition. Opaque to every walk in this crate's
    /// consumers: the nested body belongs to a different function transform.
    ProcDef {
        sym: SymId,
        body: Box<Node>,
    },

    // Introduced by the closure-iterator lowering
    GotoState(StateLabel),
    /// The state dispatch: evaluates `selector` and transfers control to the
    /// state case with that label. `last_state` is a hint for the code
    /// generator to emit a dense switch. A negative selector ends the
    /// current resumption.
    Dispatch {
        selector: Box<Node>,
        last_state: usize,
        states: Vec<StateCase>,
    },
}

impl Node {
    // Builder helpers, used heavily by the lowering passes and tests.

    pub fn sym(id: SymId) -> Node {
        Node::Sym(id)
    }

    pub fn int(v: i64) -> Node {
        Node::IntLit(v)
    }

    pub fn bool_lit(v: bool) -> Node {
        Node::BoolLit(v)
    }

    pub fn call(callee: SymId, args: Vec<Node>) -> Node {
        Node::Call { callee, args }
    }

    pub fn bin(op: BinOp, lhs: Node, rhs: Node) -> Node {
        Node::BinExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(operand: Node) -> Node {
        Node::UnExpr {
            op: UnOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn neg(operand: Node) -> Node {
        Node::UnExpr {
            op: UnOp::Neg,
            operand: Box::new(operand),
        }
    }

    pub fn assign(target: Node, value: Node) -> Node {
        Node::Asgn {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn fast_assign(target: Node, value: Node) -> Node {
        Node::FastAsgn {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn list(stmts: Vec<Node>) -> Node {
        Node::StmtList(stmts)
    }

    pub fn ret(value: Option<Node>) -> Node {
        Node::Return(value.map(Box::new))
    }

    pub fn yield_(value: Option<Node>) -> Node {
        Node::Yield(value.map(Box::new))
    }

    pub fn if_stmt(cond: Node, then: Node, else_body: Option<Node>) -> Node {
        Node::If {
            branches: vec![IfBranch { cond, body: then }],
            else_body: else_body.map(Box::new),
        }
    }

    pub fn while_(cond: Node, body: Node) -> Node {
        Node::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }
    }

    pub fn block(label: Option<SymId>, body: Node) -> Node {
        Node::Block {
            label,
            body: Box::new(body),
        }
    }

    pub fn try_(body: Node, excepts: Vec<ExceptBranch>, finally: Option<Node>) -> Node {
        Node::Try {
            body: Box::new(body),
            excepts,
            finally: finally.map(Box::new),
        }
    }

    pub fn field(obj: Node, field: SymId) -> Node {
        Node::FieldAccess {
            obj: Box::new(obj),
            field,
        }
    }

    pub fn index(arr: Node, idx: Node) -> Node {
        Node::Index {
            arr: Box::new(arr),
            idx: Box::new(idx),
        }
    }

    pub fn goto(label: &StateLabel) -> Node {
        Node::GotoState(label.clone())
    }

    pub fn stmt_list_expr(stmts: Vec<Node>, value: Node) -> Node {
        Node::StmtListExpr {
            stmts,
            value: Box::new(value),
        }
    }

    /// Whether this node can carry no yield and no control flow: safe to
    /// duplicate or reorder around a hoisted temporary.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Node::IntLit(_) | Node::BoolLit(_) | Node::NilLit | Node::Sym(_)
        )
    }

    /// Visit every direct child, statements and expressions alike. Descends
    /// into `ProcDef` bodies; callers that must treat nested routines as
    /// opaque match on `ProcDef` before recursing.
    pub fn visit_children<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        match self {
            Node::IntLit(_)
            | Node::BoolLit(_)
            | Node::NilLit
            | Node::Sym(_)
            | Node::Break { .. }
            | Node::Continue
            | Node::GotoState(_) => {}
            Node::Call { args, .. } => args.iter().for_each(f),
            Node::BinExpr { lhs, rhs, .. } | Node::And { lhs, rhs } | Node::Or { lhs, rhs } => {
                f(lhs);
                f(rhs);
            }
            Node::UnExpr { operand, .. }
            | Node::Conv { operand, .. }
            | Node::Cast { operand, .. }
            | Node::ExcTest { operand, .. } => f(operand),
            Node::Tuple(elems) | Node::StmtList(elems) => elems.iter().for_each(f),
            Node::ArrayLit { elems, .. } => elems.iter().for_each(f),
            Node::ObjConstr { fields, .. } => fields.iter().for_each(|(_, v)| f(v)),
            Node::FieldAccess { obj, .. } => f(obj),
            Node::Index { arr, idx } => {
                f(arr);
                f(idx);
            }
            Node::StmtListExpr { stmts, value } => {
                stmts.iter().for_each(&mut *f);
                f(value);
            }
            Node::If {
                branches,
                else_body,
            } => {
                for b in branches {
                    f(&b.cond);
                    f(&b.body);
                }
                if let Some(e) = else_body {
                    f(e);
                }
            }
            Node::Case {
                selector,
                arms,
                else_body,
            } => {
                f(selector);
                for a in arms {
                    a.matches.iter().for_each(&mut *f);
                    f(&a.body);
                }
                if let Some(e) = else_body {
                    f(e);
                }
            }
            Node::While { cond, body } => {
                f(cond);
                f(body);
            }
            Node::Block { body, .. } => f(body),
            Node::Try {
                body,
                excepts,
                finally,
            } => {
                f(body);
                for e in excepts {
                    f(&e.body);
                }
                if let Some(fin) = finally {
                    f(fin);
                }
            }
            Node::Raise(op) | Node::Return(op) | Node::Yield(op) | Node::Discard(op) => {
                if let Some(op) = op {
                    f(op);
                }
            }
            Node::VarSection(defs) => {
                for d in defs {
                    if let Some(init) = &d.init {
                        f(init);
                    }
                }
            }
            Node::Asgn { target, value } | Node::FastAsgn { target, value } => {
                f(target);
                f(value);
            }
            Node::For { iter, body, .. } => {
                f(iter);
                f(body);
            }
            Node::ProcDef { body, .. } => f(body),
            Node::Dispatch {
                selector, states, ..
            } => {
                f(selector);
                for s in states {
                    s.body.iter().for_each(&mut *f);
                }
            }
        }
    }

    /// Rebuild this node with every direct child passed through `f`.
    /// Same descent rules as [`visit_children`](Node::visit_children).
    pub fn map_children(self, f: &mut impl FnMut(Node) -> Node) -> Node {
        match self {
            n @ (Node::IntLit(_)
            | Node::BoolLit(_)
            | Node::NilLit
            | Node::Sym(_)
            | Node::Break { .. }
            | Node::Continue
            | Node::GotoState(_)) => n,
            Node::Call { callee, args } => Node::Call {
                callee,
                args: args.into_iter().map(f).collect(),
            },
            Node::BinExpr { op, lhs, rhs } => Node::BinExpr {
                op,
                lhs: Box::new(f(*lhs)),
                rhs: Box::new(f(*rhs)),
            },
            Node::And { lhs, rhs } => Node::And {
                lhs: Box::new(f(*lhs)),
                rhs: Box::new(f(*rhs)),
            },
            Node::Or { lhs, rhs } => Node::Or {
                lhs: Box::new(f(*lhs)),
                rhs: Box::new(f(*rhs)),
            },
            Node::UnExpr { op, operand } => Node::UnExpr {
                op,
                operand: Box::new(f(*operand)),
            },
            Node::Conv { ty, operand } => Node::Conv {
                ty,
                operand: Box::new(f(*operand)),
            },
            Node::Cast { ty, operand } => Node::Cast {
                ty,
                operand: Box::new(f(*operand)),
            },
            Node::ExcTest { operand, class } => Node::ExcTest {
                operand: Box::new(f(*operand)),
                class,
            },
            Node::Tuple(elems) => Node::Tuple(elems.into_iter().map(f).collect()),
            Node::StmtList(elems) => Node::StmtList(elems.into_iter().map(f).collect()),
            Node::ArrayLit { ty, elems } => Node::ArrayLit {
                ty,
                elems: elems.into_iter().map(f).collect(),
            },
            Node::ObjConstr { ty, fields } => Node::ObjConstr {
                ty,
                fields: fields.into_iter().map(|(k, v)| (k, f(v))).collect(),
            },
            Node::FieldAccess { obj, field } => Node::FieldAccess {
                obj: Box::new(f(*obj)),
                field,
            },
            Node::Index { arr, idx } => Node::Index {
                arr: Box::new(f(*arr)),
                idx: Box::new(f(*idx)),
            },
            Node::StmtListExpr { stmts, value } => Node::StmtListExpr {
                stmts: stmts.into_iter().map(&mut *f).collect(),
                value: Box::new(f(*value)),
            },
            Node::If {
                branches,
                else_body,
            } => Node::If {
                branches: branches
                    .into_iter()
                    .map(|b| IfBranch {
                        cond: f(b.cond),
                        body: f(b.body),
                    })
                    .collect(),
                else_body: else_body.map(|e| Box::new(f(*e))),
            },
            Node::Case {
                selector,
                arms,
                else_body,
            } => Node::Case {
                selector: Box::new(f(*selector)),
                arms: arms
                    .into_iter()
                    .map(|a| CaseArm {
                        matches: a.matches.into_iter().map(&mut *f).collect(),
                        body: f(a.body),
                    })
                    .collect(),
                else_body: else_body.map(|e| Box::new(f(*e))),
            },
            Node::While { cond, body } => Node::While {
                cond: Box::new(f(*cond)),
                body: Box::new(f(*body)),
            },
            Node::Block { label, body } => Node::Block {
                label,
                body: Box::new(f(*body)),
            },
            Node::Try {
                body,
                excepts,
                finally,
            } => Node::Try {
                body: Box::new(f(*body)),
                excepts: excepts
                    .into_iter()
                    .map(|e| ExceptBranch {
                        classes: e.classes,
                        body: f(e.body),
                    })
                    .collect(),
                finally: finally.map(|n| Box::new(f(*n))),
            },
            Node::Raise(op) => Node::Raise(op.map(|n| Box::new(f(*n)))),
            Node::Return(op) => Node::Return(op.map(|n| Box::new(f(*n)))),
            Node::Yield(op) => Node::Yield(op.map(|n| Box::new(f(*n)))),
            Node::Discard(op) => Node::Discard(op.map(|n| Box::new(f(*n)))),
            Node::VarSection(defs) => Node::VarSection(
                defs.into_iter()
                    .map(|d| VarDef {
                        sym: d.sym,
                        init: d.init.map(&mut *f),
                    })
                    .collect(),
            ),
            Node::Asgn { target, value } => Node::Asgn {
                target: Box::new(f(*target)),
                value: Box::new(f(*value)),
            },
            Node::FastAsgn { target, value } => Node::FastAsgn {
                target: Box::new(f(*target)),
                value: Box::new(f(*value)),
            },
            Node::For { var, iter, body } => Node::For {
                var,
                iter: Box::new(f(*iter)),
                body: Box::new(f(*body)),
            },
            Node::ProcDef { sym, body } => Node::ProcDef {
                sym,
                body: Box::new(f(*body)),
            },
            Node::Dispatch {
                selector,
                last_state,
                states,
            } => Node::Dispatch {
                selector: Box::new(f(*selector)),
                last_state,
                states: states
                    .into_iter()
                    .map(|s| StateCase {
                        label: s.label,
                        body: s.body.into_iter().map(&mut *f).collect(),
                    })
                    .collect(),
            },
        }
    }
}
