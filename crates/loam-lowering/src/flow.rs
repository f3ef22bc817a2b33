//! Control-flow relocators used during state splitting.
//!
//! Two small rewrites the splitter invokes on subtrees:
//!
//! - `return` inside a `try` becomes the finally-unroll protocol (store the
//!   value, set the unroll flag, goto the nearest finally state)
//! - unlabelled `break`/`continue` in a `while` body being lowered, and
//!   labelled `break` in a block being lowered, are redirected to freshly
//!   supplied goto targets

use loam_ast::query::contains_yield;
use loam_ast::{new_label, Node, SymId};

use crate::ctx::Ctx;
use crate::ice;

/// Rewrite `return e` into the finally-unroll sequence. Only called inside a
/// try whose finally state index is known.
pub(crate) fn rewrite_returns_in_try(ctx: &mut Ctx<'_>, n: Node) -> Node {
    match n {
        Node::Return(op) => {
            if ctx.nearest_finally < 0 {
                ice!("return-in-try rewrite outside of any finally scope");
            }
            let mut out = Vec::with_capacity(4);
            out.push(Node::assign(
                ctx.unroll_flag_var().access(),
                Node::bool_lit(true),
            ));
            if let Some(e) = op {
                out.push(Node::assign(ctx.tmp_result_var().access(), *e));
            }
            out.push(Node::assign(ctx.cur_exc_var().access(), Node::NilLit));
            out.push(Node::GotoState(new_label(ctx.nearest_finally)));
            Node::StmtList(out)
        }
        Node::ProcDef { .. } => n,
        // A nested try that suspends is lowered by its own splitter case,
        // which updates the finally scope first; rewriting its returns here
        // would bind them to the outer finally and skip the inner one.
        Node::Try { .. } if contains_yield(&n) => n,
        other => other.map_children(&mut |c| rewrite_returns_in_try(ctx, c)),
    }
}

/// Redirect unlabelled `continue` to `before` and unlabelled `break` to
/// `after` in a while body. Nested whiles keep their own break/continue and
/// are not descended into; blocks bump the depth so breaks targeting them
/// are left alone.
pub(crate) fn relocate_breaks_and_continues(
    ctx: &mut Ctx<'_>,
    n: Node,
    before: &Node,
    after: &Node,
) -> Node {
    match n {
        Node::ProcDef { .. } | Node::While { .. } => n,
        Node::Continue => before.clone(),
        Node::Break { label: None } => {
            if ctx.block_level == 0 {
                after.clone()
            } else {
                n
            }
        }
        Node::Block { label, body } => {
            let level = ctx.block_level + 1;
            let body = ctx.with_block_level(level, |ctx| {
                relocate_breaks_and_continues(ctx, *body, before, after)
            });
            Node::Block {
                label,
                body: Box::new(body),
            }
        }
        other => other.map_children(&mut |c| relocate_breaks_and_continues(ctx, c, before, after)),
    }
}

/// Redirect `break <label>` (and bare breaks at depth 0) targeting the given
/// block to `after`.
pub(crate) fn relocate_breaks_in_block(
    ctx: &mut Ctx<'_>,
    n: Node,
    label: Option<SymId>,
    after: &Node,
) -> Node {
    match n {
        Node::ProcDef { .. } => n,
        Node::Break { label: l } => {
            let hit = match (l, label) {
                (None, _) => ctx.block_level == 0,
                (Some(l), Some(target)) => l == target,
                (Some(_), None) => false,
            };
            if hit {
                after.clone()
            } else {
                Node::Break { label: l }
            }
        }
        Node::While { cond, body } => {
            let level = ctx.block_level + 1;
            let body = ctx.with_block_level(level, |ctx| {
                relocate_breaks_in_block(ctx, *body, label, after)
            });
            Node::While {
                cond,
                body: Box::new(body),
            }
        }
        Node::Block { label: inner, body } => {
            // an inner block with the same label shadows the outer one
            if inner.is_some() && inner == label {
                return Node::Block { label: inner, body };
            }
            let level = ctx.block_level + 1;
            let body = ctx.with_block_level(level, |ctx| {
                relocate_breaks_in_block(ctx, *body, label, after)
            });
            Node::Block {
                label: inner,
                body: Box::new(body),
            }
        }
        other => other.map_children(&mut |c| relocate_breaks_in_block(ctx, c, label, after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::{GeneratorFn, LiftingMode};
    use loam_ast::query::bare_goto_label;
    use loam_ast::{SymbolTable, Ty};

    fn with_ctx<R>(f: impl FnOnce(&mut Ctx<'_>) -> R) -> R {
        let mut syms = SymbolTable::new();
        let sym = syms.fresh("it", Ty::Int);
        let result_sym = syms.fresh("result", Ty::Int);
        let gen = GeneratorFn {
            sym,
            ret_ty: Ty::Int,
            result_sym,
            body: Node::StmtList(vec![]),
        };
        let mut ctx = Ctx::new(&mut syms, &gen, LiftingMode::PreLifting);
        f(&mut ctx)
    }

    fn goto(target: i32) -> Node {
        Node::GotoState(new_label(target))
    }

    #[test]
    fn return_becomes_unroll_protocol() {
        with_ctx(|ctx| {
            let out = ctx.with_nearest_finally(5, |ctx| {
                rewrite_returns_in_try(ctx, Node::ret(Some(Node::int(3))))
            });
            let Node::StmtList(stmts) = out else {
                panic!("expected the unroll sequence");
            };
            assert_eq!(stmts.len(), 4);
            assert!(matches!(stmts[0], Node::Asgn { .. }));
            assert!(matches!(stmts[1], Node::Asgn { .. }));
            assert!(matches!(stmts[2], Node::Asgn { .. }));
            assert_eq!(bare_goto_label(&stmts[3]).map(|l| l.get()), Some(5));
        });
    }

    #[test]
    fn valueless_return_skips_result_store() {
        with_ctx(|ctx| {
            let out =
                ctx.with_nearest_finally(2, |ctx| rewrite_returns_in_try(ctx, Node::ret(None)));
            let Node::StmtList(stmts) = out else {
                panic!("expected the unroll sequence");
            };
            assert_eq!(stmts.len(), 3);
        });
    }

    #[test]
    fn suspending_nested_try_is_not_descended() {
        with_ctx(|ctx| {
            let nested = Node::try_(
                Node::list(vec![
                    Node::yield_(Some(Node::int(1))),
                    Node::ret(Some(Node::int(2))),
                ]),
                vec![],
                Some(Node::list(vec![])),
            );
            let out = ctx.with_nearest_finally(9, |ctx| rewrite_returns_in_try(ctx, nested));
            // the return stays a return; the inner try owns it
            assert_eq!(count_returns(&out), 1);
            fn count_returns(n: &Node) -> usize {
                match n {
                    Node::Return(_) => 1,
                    _ => {
                        let mut c = 0;
                        n.visit_children(&mut |x| c += count_returns(x));
                        c
                    }
                }
            }
        });
    }

    #[test]
    fn break_depth_accounting() {
        with_ctx(|ctx| {
            let before = goto(10);
            let after = goto(11);
            // while body: { break; block: break; continue; while true: break }
            let body = Node::list(vec![
                Node::Break { label: None },
                Node::block(None, Node::Break { label: None }),
                Node::Continue,
                Node::while_(Node::bool_lit(true), Node::Break { label: None }),
            ]);
            let out = ctx.with_block_level(0, |ctx| {
                relocate_breaks_and_continues(ctx, body, &before, &after)
            });
            let Node::StmtList(stmts) = out else {
                panic!("expected a statement list");
            };
            // top-level break -> after
            assert_eq!(bare_goto_label(&stmts[0]).map(|l| l.get()), Some(11));
            // break inside a block still targets the block
            let Node::Block { body, .. } = &stmts[1] else {
                panic!("expected the block");
            };
            assert!(matches!(**body, Node::Break { label: None }));
            // continue -> before
            assert_eq!(bare_goto_label(&stmts[2]).map(|l| l.get()), Some(10));
            // the nested while keeps its own break
            let Node::While { body, .. } = &stmts[3] else {
                panic!("expected the nested while");
            };
            assert!(matches!(**body, Node::Break { label: None }));
        });
    }

    #[test]
    fn labelled_break_found_through_nested_loops() {
        with_ctx(|ctx| {
            let label = ctx.syms.fresh("L", Ty::Void);
            let after = goto(7);
            let body = Node::while_(
                Node::bool_lit(true),
                Node::while_(Node::bool_lit(true), Node::Break { label: Some(label) }),
            );
            let out = ctx.with_block_level(0, |ctx| {
                relocate_breaks_in_block(ctx, body, Some(label), &after)
            });
            fn find_goto(n: &Node) -> Option<i32> {
                if let Node::GotoState(l) = n {
                    return Some(l.get());
                }
                let mut found = None;
                n.visit_children(&mut |c| found = found.or_else(|| find_goto(c)));
                found
            }
            assert_eq!(find_goto(&out), Some(7));
        });
    }
}
