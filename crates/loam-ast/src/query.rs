//! Read-only tree queries shared by the lowering passes and their tests.

use crate::node::{Node, StateLabel};

/// Whether `n` contains a `yield` anywhere. Nested routine definitions are
/// opaque: their yields belong to a different function transform.
pub fn contains_yield(n: &Node) -> bool {
    match n {
        Node::Yield(_) => true,
        Node::ProcDef { .. } => false,
        _ => {
            let mut found = false;
            n.visit_children(&mut |c| found = found || contains_yield(c));
            found
        }
    }
}

/// Whether a yield is buried in expression position somewhere under `n`:
/// inside a condition, a call argument, an assignment source, an operand.
/// Such a statement must be normalised before the splitter can carve states
/// at the yield.
pub fn has_yield_in_expr_position(n: &Node) -> bool {
    match n {
        Node::StmtList(stmts) => stmts.iter().any(has_yield_in_expr_position),
        Node::StmtListExpr { .. } => contains_yield(n),
        Node::If {
            branches,
            else_body,
        } => {
            branches
                .iter()
                .any(|b| contains_yield(&b.cond) || has_yield_in_expr_position(&b.body))
                || else_body
                    .as_deref()
                    .is_some_and(has_yield_in_expr_position)
        }
        Node::Case {
            selector,
            arms,
            else_body,
        } => {
            contains_yield(selector)
                || arms.iter().any(|a| has_yield_in_expr_position(&a.body))
                || else_body
                    .as_deref()
                    .is_some_and(has_yield_in_expr_position)
        }
        Node::While { cond, body } => contains_yield(cond) || has_yield_in_expr_position(body),
        Node::Block { body, .. } => has_yield_in_expr_position(body),
        Node::Try {
            body,
            excepts,
            finally,
        } => {
            has_yield_in_expr_position(body)
                || excepts.iter().any(|e| has_yield_in_expr_position(&e.body))
                || finally.as_deref().is_some_and(has_yield_in_expr_position)
        }
        // The yield statement itself is fine; a yield nested in its operand
        // is not.
        Node::Yield(op) => op.as_deref().is_some_and(contains_yield),
        Node::ProcDef { .. } => false,
        // Any remaining kind in statement position is expression-shaped
        // (assignments, calls, returns, raises, declarations); a yield
        // anywhere inside it sits in expression context.
        _ => {
            let mut found = false;
            n.visit_children(&mut |c| found = found || contains_yield(c));
            found
        }
    }
}

/// Unwrap statement-list wrappers with exactly one child.
pub fn skip_stmt_list(n: &Node) -> &Node {
    match n {
        Node::StmtList(stmts) if stmts.len() == 1 => skip_stmt_list(&stmts[0]),
        _ => n,
    }
}

/// If `n` (after skipping statement-list wrappers) is a single forwarding
/// goto, return its label.
pub fn bare_goto_label(n: &Node) -> Option<&StateLabel> {
    match skip_stmt_list(n) {
        Node::GotoState(label) => Some(label),
        _ => None,
    }
}

/// Count the yields under `n` (nested routines excluded).
pub fn count_yields(n: &Node) -> usize {
    match n {
        Node::Yield(_) => 1,
        Node::ProcDef { .. } => 0,
        _ => {
            let mut count = 0;
            n.visit_children(&mut |c| count += count_yields(c));
            count
        }
    }
}

/// Count `GotoState` nodes under `n`. Dispatch nodes are counted as zero:
/// the dispatch is the one place goto edges are allowed to survive.
pub fn count_gotos(n: &Node) -> usize {
    match n {
        Node::GotoState(_) => 1,
        Node::Dispatch { .. } => 0,
        _ => {
            let mut count = 0;
            n.visit_children(&mut |c| count += count_gotos(c));
            count
        }
    }
}

/// Stable name of the node kind, for internal-error reporting.
pub fn kind_name(n: &Node) -> &'static str {
    match n {
        Node::IntLit(_) => "int-literal",
        Node::BoolLit(_) => "bool-literal",
        Node::NilLit => "nil-literal",
        Node::Sym(_) => "symbol",
        Node::Call { .. } => "call",
        Node::BinExpr { .. } => "binary-expr",
        Node::UnExpr { .. } => "unary-expr",
        Node::And { .. } => "and",
        Node::Or { .. } => "or",
        Node::Tuple(_) => "tuple-constructor",
        Node::ObjConstr { .. } => "object-constructor",
        Node::ArrayLit { .. } => "array-literal",
        Node::FieldAccess { .. } => "field-access",
        Node::Index { .. } => "index",
        Node::Conv { .. } => "conversion",
        Node::Cast { .. } => "cast",
        Node::ExcTest { .. } => "exception-test",
        Node::StmtListExpr { .. } => "stmt-list-expr",
        Node::StmtList(_) => "stmt-list",
        Node::If { .. } => "if",
        Node::Case { .. } => "case",
        Node::While { .. } => "while",
        Node::Block { .. } => "block",
        Node::Break { .. } => "break",
        Node::Continue => "continue",
        Node::Try { .. } => "try",
        Node::Raise(_) => "raise",
        Node::Return(_) => "return",
        Node::VarSection(_) => "var-section",
        Node::Asgn { .. } => "assignment",
        Node::FastAsgn { .. } => "fast-assignment",
        Node::Yield(_) => "yield",
        Node::Discard(_) => "discard",
        Node::For { .. } => "for",
        Node::ProcDef { .. } => "proc-def",
        Node::GotoState(_) => "goto-state",
        Node::Dispatch { .. } => "dispatch",
    }
}
