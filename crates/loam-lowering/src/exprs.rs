//! Statement-list-expression normalisation.
//!
//! A statement-list expression is an expression whose evaluation contains
//! statements, with the final sub-expression as its value. When a yield is
//! buried inside one used as an argument, a branch condition or an
//! assignment source, the splitter cannot carve states at the yield without
//! tearing the surrounding expression context. This pass rewrites every such
//! occurrence so the statements float up to statement level and the
//! value-carrying tail becomes a plain symbol or literal.
//!
//! Subtrees without yields are left untouched; the rewrite is driven
//! entirely by yield placement.

use loam_ast::query::contains_yield;
use loam_ast::{query, CaseArm, ExceptBranch, IfBranch, Node, Ty, VarDef};

use crate::ctx::Ctx;
use crate::ice;

/// Normalise `n` so that every yield appears in statement position.
/// The bool reports whether anything was reshaped.
pub(crate) fn normalize(ctx: &mut Ctx<'_>, n: Node) -> (Node, bool) {
    let mut changed = false;
    let n = lower_stmt(ctx, n, &mut changed);
    (n, changed)
}

fn is_literal(n: &Node) -> bool {
    matches!(n, Node::IntLit(_) | Node::BoolLit(_) | Node::NilLit)
}

/// Append `s`, splicing nested statement lists produced by deeper rewrites.
fn push_spliced(out: &mut Vec<Node>, s: Node) {
    match s {
        Node::StmtList(list) => out.extend(list),
        other => out.push(other),
    }
}

fn lower_stmt(ctx: &mut Ctx<'_>, n: Node, changed: &mut bool) -> Node {
    match &n {
        Node::For { .. } => {
            ice!("a for statement survived into closure-iterator lowering")
        }
        Node::GotoState(_) | Node::Dispatch { .. } => {
            ice!(
                "unexpected {} before state splitting",
                query::kind_name(&n)
            )
        }
        _ => {}
    }
    if !contains_yield(&n) {
        return n;
    }
    match n {
        Node::StmtList(stmts) => {
            let mut out = Vec::with_capacity(stmts.len());
            for s in stmts {
                let s = lower_stmt(ctx, s, changed);
                push_spliced(&mut out, s);
            }
            Node::StmtList(out)
        }
        Node::StmtListExpr { stmts, value } => {
            // value discarded in statement position
            let mut out = Vec::with_capacity(stmts.len() + 1);
            for s in stmts {
                let s = lower_stmt(ctx, s, changed);
                push_spliced(&mut out, s);
            }
            let v = lower_expr(ctx, *value, changed, &mut out);
            out.push(v);
            Node::StmtList(out)
        }
        Node::Yield(op) => {
            let mut hoisted = Vec::new();
            let op = op.map(|e| lower_expr(ctx, *e, changed, &mut hoisted));
            let y = Node::Yield(op.map(Box::new));
            if hoisted.is_empty() {
                y
            } else {
                *changed = true;
                hoisted.push(y);
                Node::StmtList(hoisted)
            }
        }
        Node::If {
            branches,
            else_body,
        } => lower_if_chain(ctx, branches, else_body.map(|e| *e), changed),
        Node::Case {
            selector,
            arms,
            else_body,
        } => {
            let mut hoisted = Vec::new();
            let selector = lower_expr(ctx, *selector, changed, &mut hoisted);
            let arms = arms
                .into_iter()
                .map(|a| CaseArm {
                    matches: a.matches,
                    body: lower_stmt(ctx, a.body, changed),
                })
                .collect();
            let else_body = else_body.map(|e| Box::new(lower_stmt(ctx, *e, changed)));
            let case = Node::Case {
                selector: Box::new(selector),
                arms,
                else_body,
            };
            if hoisted.is_empty() {
                case
            } else {
                *changed = true;
                hoisted.push(case);
                Node::StmtList(hoisted)
            }
        }
        Node::While { cond, body } => {
            if contains_yield(&cond) {
                // while cond: body
                // ->
                // while true:
                //   <cond statements>
                //   if not cond': break
                //   body
                *changed = true;
                let mut loop_body = Vec::new();
                let cond = lower_expr(ctx, *cond, changed, &mut loop_body);
                loop_body.push(Node::if_stmt(
                    Node::not(cond),
                    Node::Break { label: None },
                    None,
                ));
                push_spliced(&mut loop_body, lower_stmt(ctx, *body, changed));
                Node::while_(Node::bool_lit(true), Node::StmtList(loop_body))
            } else {
                let body = lower_stmt(ctx, *body, changed);
                Node::While {
                    cond,
                    body: Box::new(body),
                }
            }
        }
        Node::Block { label, body } => Node::Block {
            label,
            body: Box::new(lower_stmt(ctx, *body, changed)),
        },
        Node::Try {
            body,
            excepts,
            finally,
        } => {
            let body = lower_stmt(ctx, *body, changed);
            let excepts = excepts
                .into_iter()
                .map(|e| ExceptBranch {
                    classes: e.classes,
                    body: lower_stmt(ctx, e.body, changed),
                })
                .collect();
            let finally = finally.map(|f| Box::new(lower_stmt(ctx, *f, changed)));
            Node::Try {
                body: Box::new(body),
                excepts,
                finally,
            }
        }
        Node::VarSection(defs) => {
            let mut out = Vec::new();
            let mut pending: Vec<VarDef> = Vec::new();
            for def in defs {
                let mut hoisted = Vec::new();
                let init = def
                    .init
                    .map(|i| lower_expr(ctx, i, changed, &mut hoisted));
                if !hoisted.is_empty() {
                    *changed = true;
                    if !pending.is_empty() {
                        out.push(Node::VarSection(std::mem::take(&mut pending)));
                    }
                    out.extend(hoisted);
                }
                pending.push(VarDef { sym: def.sym, init });
            }
            if !pending.is_empty() {
                out.push(Node::VarSection(pending));
            }
            if out.len() == 1 {
                out.pop().unwrap()
            } else {
                Node::StmtList(out)
            }
        }
        Node::Return(op) => lower_operand_stmt(ctx, *op.unwrap(), changed, Node::ret),
        Node::Raise(op) => {
            lower_operand_stmt(ctx, *op.unwrap(), changed, |v| Node::Raise(v.map(Box::new)))
        }
        Node::Discard(op) => lower_operand_stmt(ctx, *op.unwrap(), changed, |v| {
            Node::Discard(v.map(Box::new))
        }),
        Node::Asgn { target, value } => lower_assignment(ctx, *target, *value, changed, false),
        Node::FastAsgn { target, value } => lower_assignment(ctx, *target, *value, changed, true),
        // A yield-carrying expression in statement position (a call, an
        // and/or chain).
        other => {
            let mut hoisted = Vec::new();
            let v = lower_expr(ctx, other, changed, &mut hoisted);
            if hoisted.is_empty() {
                v
            } else {
                hoisted.push(v);
                Node::StmtList(hoisted)
            }
        }
    }
}

/// `return`/`raise`/`discard` with a yield in the operand: hoist the
/// operand's statements above the statement itself.
fn lower_operand_stmt(
    ctx: &mut Ctx<'_>,
    operand: Node,
    changed: &mut bool,
    rebuild: impl FnOnce(Option<Node>) -> Node,
) -> Node {
    let mut hoisted = Vec::new();
    let v = lower_expr(ctx, operand, changed, &mut hoisted);
    let stmt = rebuild(Some(v));
    if hoisted.is_empty() {
        stmt
    } else {
        *changed = true;
        hoisted.push(stmt);
        Node::StmtList(hoisted)
    }
}

/// Hoist the left-hand side first (for indexed targets), then the source.
fn lower_assignment(
    ctx: &mut Ctx<'_>,
    target: Node,
    value: Node,
    changed: &mut bool,
    fast: bool,
) -> Node {
    let mut hoisted = Vec::new();
    let target = lower_expr(ctx, target, changed, &mut hoisted);
    let value = lower_expr(ctx, value, changed, &mut hoisted);
    let asgn = if fast {
        Node::fast_assign(target, value)
    } else {
        Node::assign(target, value)
    };
    if hoisted.is_empty() {
        asgn
    } else {
        *changed = true;
        hoisted.push(asgn);
        Node::StmtList(hoisted)
    }
}

/// Rebuild an if chain so that a branch condition carrying hoisted
/// statements becomes a fresh `if` nested in the else arm of the previous
/// branch: condition statements then run only when the branch is reached.
fn lower_if_chain(
    ctx: &mut Ctx<'_>,
    branches: Vec<IfBranch>,
    else_body: Option<Node>,
    changed: &mut bool,
) -> Node {
    let mut iter = branches.into_iter();
    let Some(first) = iter.next() else {
        return match else_body {
            Some(e) => lower_stmt(ctx, e, changed),
            None => Node::StmtList(Vec::new()),
        };
    };

    let mut cond_stmts = Vec::new();
    let cond = lower_expr(ctx, first.cond, changed, &mut cond_stmts);
    let body = lower_stmt(ctx, first.body, changed);

    let remaining: Vec<IfBranch> = iter.collect();
    let rest = if remaining.is_empty() {
        else_body.map(|e| lower_stmt(ctx, e, changed))
    } else {
        Some(lower_if_chain(ctx, remaining, else_body, changed))
    };

    // Merge a plain nested if back into an elif chain; keep a nested one
    // when its conditions needed hoisting.
    let node = match rest {
        Some(Node::If {
            branches: mut rb,
            else_body: re,
        }) => {
            let mut branches = vec![IfBranch { cond, body }];
            branches.append(&mut rb);
            Node::If {
                branches,
                else_body: re,
            }
        }
        rest => Node::If {
            branches: vec![IfBranch { cond, body }],
            else_body: rest.map(Box::new),
        },
    };

    if cond_stmts.is_empty() {
        node
    } else {
        *changed = true;
        cond_stmts.push(node);
        Node::StmtList(cond_stmts)
    }
}

/// Lower a node in expression position. Hoisted statements are pushed onto
/// `stmts`; the returned node is the residual value expression.
fn lower_expr(ctx: &mut Ctx<'_>, n: Node, changed: &mut bool, stmts: &mut Vec<Node>) -> Node {
    if !contains_yield(&n) {
        return n;
    }
    match n {
        Node::StmtListExpr {
            stmts: inner,
            value,
        } => {
            *changed = true;
            for s in inner {
                let s = lower_stmt(ctx, s, changed);
                push_spliced(stmts, s);
            }
            lower_expr(ctx, *value, changed, stmts)
        }
        Node::Call { callee, args } => {
            let args = lower_arg_list(ctx, args, changed, stmts);
            Node::Call { callee, args }
        }
        Node::BinExpr { op, lhs, rhs } => {
            let mut args = lower_arg_list(ctx, vec![*lhs, *rhs], changed, stmts);
            let rhs = args.pop().unwrap();
            let lhs = args.pop().unwrap();
            Node::bin(op, lhs, rhs)
        }
        Node::Tuple(elems) => Node::Tuple(lower_arg_list(ctx, elems, changed, stmts)),
        Node::ArrayLit { ty, elems } => Node::ArrayLit {
            ty,
            elems: lower_arg_list(ctx, elems, changed, stmts),
        },
        Node::ObjConstr { ty, fields } => {
            let (keys, values): (Vec<_>, Vec<_>) = fields.into_iter().unzip();
            let values = lower_arg_list(ctx, values, changed, stmts);
            Node::ObjConstr {
                ty,
                fields: keys.into_iter().zip(values).collect(),
            }
        }
        Node::And { lhs, rhs } => lower_short_circuit(ctx, *lhs, *rhs, false, changed, stmts),
        Node::Or { lhs, rhs } => lower_short_circuit(ctx, *lhs, *rhs, true, changed, stmts),
        Node::UnExpr { op, operand } => Node::UnExpr {
            op,
            operand: Box::new(lower_expr(ctx, *operand, changed, stmts)),
        },
        Node::Conv { ty, operand } => Node::Conv {
            ty,
            operand: Box::new(lower_expr(ctx, *operand, changed, stmts)),
        },
        Node::Cast { ty, operand } => Node::Cast {
            ty,
            operand: Box::new(lower_expr(ctx, *operand, changed, stmts)),
        },
        Node::ExcTest { operand, class } => Node::ExcTest {
            operand: Box::new(lower_expr(ctx, *operand, changed, stmts)),
            class,
        },
        Node::FieldAccess { obj, field } => Node::FieldAccess {
            obj: Box::new(lower_expr(ctx, *obj, changed, stmts)),
            field,
        },
        Node::Index { arr, idx } => {
            let mut elems = lower_arg_list(ctx, vec![*arr, *idx], changed, stmts);
            let idx = elems.pop().unwrap();
            let arr = elems.pop().unwrap();
            Node::index(arr, idx)
        }
        // Branching expression forms: every branch assigns a shared
        // temporary, and the reshaped statement goes through the statement
        // rules (which hoist branch-condition statements correctly).
        Node::If {
            branches,
            else_body,
        } => {
            *changed = true;
            let tmp = ctx.new_temp_var(Ty::Unknown);
            let branches = branches
                .into_iter()
                .map(|b| IfBranch {
                    cond: b.cond,
                    body: Node::assign(tmp.access(), b.body),
                })
                .collect();
            let else_body = else_body.map(|e| Box::new(Node::assign(tmp.access(), *e)));
            let stmt = lower_stmt(
                ctx,
                Node::If {
                    branches,
                    else_body,
                },
                changed,
            );
            push_spliced(stmts, stmt);
            tmp.access()
        }
        Node::Case {
            selector,
            arms,
            else_body,
        } => {
            *changed = true;
            let tmp = ctx.new_temp_var(Ty::Unknown);
            let arms = arms
                .into_iter()
                .map(|a| CaseArm {
                    matches: a.matches,
                    body: Node::assign(tmp.access(), a.body),
                })
                .collect();
            let else_body = else_body.map(|e| Box::new(Node::assign(tmp.access(), *e)));
            let stmt = lower_stmt(
                ctx,
                Node::Case {
                    selector,
                    arms,
                    else_body,
                },
                changed,
            );
            push_spliced(stmts, stmt);
            tmp.access()
        }
        Node::Try {
            body,
            excepts,
            finally,
        } => {
            // try-expression: body and each handler assign the shared
            // temporary; the finally produces no value and stays as is.
            *changed = true;
            let tmp = ctx.new_temp_var(Ty::Unknown);
            let body = Node::assign(tmp.access(), *body);
            let excepts = excepts
                .into_iter()
                .map(|e| ExceptBranch {
                    classes: e.classes,
                    body: Node::assign(tmp.access(), e.body),
                })
                .collect();
            let stmt = lower_stmt(
                ctx,
                Node::Try {
                    body: Box::new(body),
                    excepts,
                    finally,
                },
                changed,
            );
            push_spliced(stmts, stmt);
            tmp.access()
        }
        other => ice!(
            "yield in unsupported expression context: {}",
            query::kind_name(&other)
        ),
    }
}

/// Lower the children of a call-kind node. When the node has several
/// arguments, every non-literal argument is spilled into a temporary so
/// left-to-right evaluation survives the hoisting.
fn lower_arg_list(
    ctx: &mut Ctx<'_>,
    args: Vec<Node>,
    changed: &mut bool,
    stmts: &mut Vec<Node>,
) -> Vec<Node> {
    *changed = true;
    let spill = args.len() > 1;
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let v = lower_expr(ctx, arg, changed, stmts);
        if spill && !is_literal(&v) {
            let tmp = ctx.new_temp_var(Ty::Unknown);
            stmts.push(Node::assign(tmp.access(), v));
            out.push(tmp.access());
        } else {
            out.push(v);
        }
    }
    out
}

/// `a and b` / `a or b` with a yield inside: rewrite to an explicit `if`
/// with a temporary so the right operand is evaluated only when required.
fn lower_short_circuit(
    ctx: &mut Ctx<'_>,
    lhs: Node,
    rhs: Node,
    is_or: bool,
    changed: &mut bool,
    stmts: &mut Vec<Node>,
) -> Node {
    *changed = true;
    let tmp = ctx.new_temp_var(Ty::Bool);
    let lhs = lower_expr(ctx, lhs, changed, stmts);
    stmts.push(Node::assign(tmp.access(), lhs));

    let mut rhs_stmts = Vec::new();
    let rhs = lower_expr(ctx, rhs, changed, &mut rhs_stmts);
    rhs_stmts.push(Node::assign(tmp.access(), rhs));

    let cond = if is_or {
        Node::not(tmp.access())
    } else {
        tmp.access()
    };
    stmts.push(Node::if_stmt(cond, Node::StmtList(rhs_stmts), None));
    tmp.access()
}
