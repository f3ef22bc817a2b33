//! State-assignment materialisation.
//!
//! Rewrites the abstract control nodes left by the splitter into concrete
//! form, post-order:
//!
//! - `{yield e; goto N}`  ->  `{:state = N; result = e; return}`
//! - `return e`           ->  `{:state = -1; return e}`
//! - `goto N`             ->  `{:state = N; break :stateLoop}`
//!
//! After this pass no yield and no goto-state survives anywhere in a state
//! body; every body ends in a return or a break to the state loop.

use loam_ast::{Node, StateLabel, UNSET_LABEL};

use crate::ctx::Ctx;
use crate::ice;

impl<'a> Ctx<'a> {
    pub(crate) fn materialize_states(&mut self) {
        for i in 0..self.states.len() {
            let body = self.take_state_body(i);
            let body = self.materialize(body);
            self.set_state_body(i, body);
        }
    }

    fn materialize(&mut self, n: Node) -> Node {
        match n {
            Node::StmtList(sons) => {
                let mut out = Vec::with_capacity(sons.len());
                let mut iter = sons.into_iter();
                while let Some(s) = iter.next() {
                    match s {
                        Node::Yield(op) => {
                            // The splitter always pairs a yield with its
                            // out-edge.
                            let Some(Node::GotoState(label)) = iter.next() else {
                                ice!("yield without a following goto-state");
                            };
                            out.push(self.state_asgn_to(&label));
                            if let Some(e) = op {
                                out.push(Node::assign(Node::Sym(self.result_sym), *e));
                            }
                            out.push(Node::ret(None));
                        }
                        Node::GotoState(label) => {
                            out.push(self.state_asgn_to(&label));
                            let loop_label = self.state_loop_label();
                            out.push(Node::Break {
                                label: Some(loop_label),
                            });
                        }
                        Node::Return(op) => {
                            out.push(self.state_asgn(-1));
                            out.push(Node::Return(op));
                        }
                        other => out.push(self.materialize(other)),
                    }
                }
                Node::StmtList(out)
            }
            Node::Yield(_) => ice!("yield outside a statement list during materialisation"),
            Node::GotoState(label) => {
                let asgn = self.state_asgn_to(&label);
                let loop_label = self.state_loop_label();
                Node::StmtList(vec![
                    asgn,
                    Node::Break {
                        label: Some(loop_label),
                    },
                ])
            }
            Node::Return(op) => Node::StmtList(vec![self.state_asgn(-1), Node::Return(op)]),
            Node::ProcDef { .. } => n,
            other => other.map_children(&mut |c| self.materialize(c)),
        }
    }

    fn state_asgn(&mut self, target: i32) -> Node {
        Node::assign(self.state_access(), Node::int(i64::from(target)))
    }

    fn state_asgn_to(&mut self, label: &StateLabel) -> Node {
        let target = label.get();
        if target == UNSET_LABEL {
            ice!("unresolved goto-state target at materialisation");
        }
        self.state_asgn(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::{GeneratorFn, LiftingMode};
    use loam_ast::query::{count_gotos, count_yields};
    use loam_ast::{new_label, SymbolTable, Ty};

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

    #[test]
    fn yield_goto_pair_becomes_state_assignment() {
        with_ctx(|ctx| {
            let body = Node::list(vec![
                Node::yield_(Some(Node::int(7))),
                Node::GotoState(new_label(3)),
            ]);
            let out = ctx.materialize(body);
            assert_eq!(count_yields(&out), 0);
            assert_eq!(count_gotos(&out), 0);
            let Node::StmtList(stmts) = &out else {
                panic!("expected a list");
            };
            assert_eq!(stmts.len(), 3);
            assert!(matches!(stmts[0], Node::Asgn { .. }));
            assert!(matches!(stmts[1], Node::Asgn { .. }));
            assert!(matches!(stmts[2], Node::Return(None)));
        });
    }

    #[test]
    fn valueless_yield_omits_result_store() {
        with_ctx(|ctx| {
            let body = Node::list(vec![Node::yield_(None), Node::GotoState(new_label(1))]);
            let out = ctx.materialize(body);
            let Node::StmtList(stmts) = &out else {
                panic!("expected a list");
            };
            assert_eq!(stmts.len(), 2);
        });
    }

    #[test]
    fn bare_goto_becomes_break() {
        with_ctx(|ctx| {
            let out = ctx.materialize(Node::list(vec![Node::GotoState(new_label(5))]));
            let Node::StmtList(stmts) = &out else {
                panic!("expected a list");
            };
            assert!(matches!(stmts[1], Node::Break { label: Some(_) }));
        });
    }

    #[test]
    fn return_gets_exit_state() {
        with_ctx(|ctx| {
            // a return nested inside structured control flow is rewritten too
            let body = Node::if_stmt(Node::bool_lit(true), Node::ret(Some(Node::int(4))), None);
            let out = ctx.materialize(body);
            let Node::If { branches, .. } = &out else {
                panic!("expected the if to survive");
            };
            let Node::StmtList(stmts) = &branches[0].body else {
                panic!("expected the rewritten return sequence");
            };
            assert!(matches!(stmts[0], Node::Asgn { .. }));
            assert!(matches!(stmts[1], Node::Return(Some(_))));
        });
    }

    #[test]
    #[should_panic(expected = "unresolved goto-state")]
    fn unresolved_label_is_fatal() {
        with_ctx(|ctx| {
            let out = ctx.materialize(Node::list(vec![Node::GotoState(
                loam_ast::unset_label(),
            )]));
            drop(out);
        });
    }
}
