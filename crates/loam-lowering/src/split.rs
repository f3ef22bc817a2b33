//! The splitter: carves the generator body into numbered states linked by
//! explicit goto edges.
//!
//! `split(node, goto_out)` receives an uninitialised goto placeholder the
//! caller has committed to; the target is filled in when the continuation
//! state is created. A new state is carved at every yield boundary and at
//! every structured control-flow join; the exception table grows in parallel,
//! one entry per state, written at creation time.

use std::mem;

use loam_ast::query::{self, contains_yield, has_yield_in_expr_position};
use loam_ast::{
    new_label, unset_label, BinOp, CaseArm, ExceptBranch, IfBranch, Node, StateLabel,
};

use crate::ctx::Ctx;
use crate::{exprs, flow, ice};

fn to_list_vec(n: Node) -> Vec<Node> {
    match n {
        Node::StmtList(v) => v,
        other => vec![other],
    }
}

impl<'a> Ctx<'a> {
    /// Wrap `n` so it terminates in `goto_out`, then split it.
    pub(crate) fn split_into_states(&mut self, n: Node, goto_out: &StateLabel) -> Node {
        self.split(Node::StmtList(to_list_vec(n)), goto_out)
    }

    fn split(&mut self, n: Node, goto_out: &StateLabel) -> Node {
        match n {
            Node::StmtList(mut sons) => {
                // The list must hand control somewhere when it runs off the
                // end.
                if !matches!(sons.last(), Some(Node::GotoState(_))) {
                    sons.push(Node::goto(goto_out));
                }
                let mut i = 0;
                while i < sons.len() {
                    if has_yield_in_expr_position(&sons[i]) {
                        let child = mem::replace(&mut sons[i], Node::NilLit);
                        let (child, _) = exprs::normalize(self, child);
                        sons[i] = child;
                    }
                    if contains_yield(&sons[i]) {
                        // Split here: the child gets a fresh out-edge, and
                        // everything after it moves into a new state that
                        // inherits this list's out-edge.
                        let g = unset_label();
                        let child = mem::replace(&mut sons[i], Node::NilLit);
                        sons[i] = self.split(child, &g);
                        let tail = sons.split_off(i + 1);
                        debug_assert!(!tail.is_empty());
                        let tail_idx = self.new_state(Node::StmtList(tail), Some(&g));
                        let tail_body = self.take_state_body(tail_idx);
                        let tail_body = self.split(tail_body, goto_out);
                        self.set_state_body(tail_idx, tail_body);
                        break;
                    }
                    i += 1;
                }
                Node::StmtList(sons)
            }
            Node::Yield(op) => {
                // The yield keeps its payload; materialisation turns the
                // pair into a state assignment plus return.
                Node::StmtList(vec![Node::Yield(op), Node::goto(goto_out)])
            }
            Node::If {
                branches,
                else_body,
            } => {
                let branches = branches
                    .into_iter()
                    .map(|b| IfBranch {
                        cond: b.cond,
                        body: self.split_into_states(b.body, goto_out),
                    })
                    .collect();
                // Without an else, falling through the whole if would
                // silently skip the goto.
                let else_body = match else_body {
                    Some(e) => self.split_into_states(*e, goto_out),
                    None => Node::StmtList(vec![Node::goto(goto_out)]),
                };
                Node::If {
                    branches,
                    else_body: Some(Box::new(else_body)),
                }
            }
            Node::Case {
                selector,
                arms,
                else_body,
            } => {
                let arms = arms
                    .into_iter()
                    .map(|a| CaseArm {
                        matches: a.matches,
                        body: self.split_into_states(a.body, goto_out),
                    })
                    .collect();
                let else_body = match else_body {
                    Some(e) => self.split_into_states(*e, goto_out),
                    None => Node::StmtList(vec![Node::goto(goto_out)]),
                };
                Node::Case {
                    selector,
                    arms,
                    else_body: Some(Box::new(else_body)),
                }
            }
            Node::While { cond, body } => {
                // while cond: body
                // ->
                // HEAD: if cond: (body'; goto HEAD) else: goto-out
                // and the while itself becomes a jump to HEAD.
                debug_assert!(!contains_yield(&cond), "yield in condition survives normalisation");
                let loop_head = unset_label();
                let state_idx = self.new_state(Node::StmtList(Vec::new()), Some(&loop_head));
                let before = Node::goto(&loop_head);
                let after = Node::goto(goto_out);
                let body = self.with_block_level(0, |ctx| {
                    flow::relocate_breaks_and_continues(ctx, *body, &before, &after)
                });
                let body = self.split_into_states(body, &loop_head);
                let head = Node::If {
                    branches: vec![IfBranch { cond: *cond, body }],
                    else_body: Some(Box::new(Node::StmtList(vec![Node::goto(goto_out)]))),
                };
                self.set_state_body(state_idx, Node::StmtList(vec![head]));
                Node::goto(&loop_head)
            }
            Node::Block { label, body } => {
                let after = Node::goto(goto_out);
                let body = self.with_block_level(0, |ctx| {
                    flow::relocate_breaks_in_block(ctx, *body, label, &after)
                });
                let body = self.split_into_states(body, goto_out);
                Node::Block {
                    label,
                    body: Box::new(body),
                }
            }
            Node::Try {
                body,
                excepts,
                finally,
            } => self.split_try(*body, excepts, finally.map(|f| *f), goto_out),
            Node::For { .. } => {
                ice!("a for statement survived into closure-iterator lowering")
            }
            Node::GotoState(_) | Node::Dispatch { .. } => {
                ice!("goto-state node in splitter input")
            }
            other => {
                if contains_yield(&other) {
                    ice!(
                        "yield survives normalisation inside a {} node",
                        query::kind_name(&other)
                    );
                }
                other
            }
        }
    }

    /// Lower a try statement that suspends somewhere inside. Builds the try,
    /// except and finally states at deterministically predicted indices and
    /// records their exception-table entries; the bodies are subdivided
    /// afterwards under the matching handler scopes.
    fn split_try(
        &mut self,
        body: Node,
        excepts: Vec<ExceptBranch>,
        finally: Option<Node>,
        goto_out: &StateLabel,
    ) -> Node {
        self.has_exceptions = true;

        let try_idx = self.states.len() as i32;
        let has_except = !excepts.is_empty();
        // With no except branch the two indices collapse, and the table
        // entry for the try body stays positive: an exception there must
        // still run the finally.
        let (exc_encoding, finally_idx) = if has_except {
            (-(try_idx + 1), try_idx + 2)
        } else {
            (try_idx + 1, try_idx + 1)
        };
        tracing::trace!(try_idx, exc_encoding, finally_idx, "lowering suspending try");

        let out_to_finally = unset_label();

        let except_body = if has_except {
            Some(self.collect_except_state(excepts, &out_to_finally))
        } else {
            None
        };

        // One finally state exists even without an explicit finally clause;
        // the end-finally marker routes unwinding past it.
        let mut fin_list = match finally {
            Some(f) => to_list_vec(f),
            None => Vec::new(),
        };
        fin_list.push(self.end_finally_node());
        let finally_body = Node::StmtList(fin_list);

        // Create the states at their predicted indices.
        let real_try =
            self.with_exc_handling(exc_encoding, |ctx| ctx.new_state(body, None));
        if real_try as i32 != try_idx {
            ice!("try state prediction mismatch: predicted {try_idx}, created {real_try}");
        }
        if let Some(eb) = except_body {
            let real_exc = self.with_exc_handling(finally_idx, |ctx| ctx.new_state(eb, None));
            if real_exc as i32 != try_idx + 1 {
                ice!(
                    "except state prediction mismatch: predicted {}, created {real_exc}",
                    try_idx + 1
                );
            }
        }
        let real_fin = self.new_state(finally_body, Some(&out_to_finally));
        if real_fin as i32 != finally_idx {
            ice!("finally state prediction mismatch: predicted {finally_idx}, created {real_fin}");
        }

        // Subdivide the bodies. Returns inside try and except unroll through
        // this finally; states carved out of them inherit the matching
        // handler encodings.
        self.with_nearest_finally(finally_idx, |ctx| {
            ctx.with_exc_handling(exc_encoding, |ctx| {
                let b = ctx.take_state_body(try_idx as usize);
                let b = flow::rewrite_returns_in_try(ctx, b);
                let b = ctx.split_into_states(b, &out_to_finally);
                ctx.set_state_body(try_idx as usize, b);
            });
            if has_except {
                ctx.with_exc_handling(finally_idx, |ctx| {
                    let b = ctx.take_state_body((try_idx + 1) as usize);
                    let b = flow::rewrite_returns_in_try(ctx, b);
                    let b = ctx.split_into_states(b, &out_to_finally);
                    ctx.set_state_body((try_idx + 1) as usize, b);
                });
            }
        });
        let b = self.take_state_body(finally_idx as usize);
        // Inside an enclosing try, the end-finally's own return must keep
        // unrolling outward instead of ending the generator.
        let b = if self.nearest_finally >= 0 {
            flow::rewrite_returns_in_try(self, b)
        } else {
            b
        };
        let b = self.split_into_states(b, goto_out);
        self.set_state_body(finally_idx as usize, b);

        // Entering the try means jumping to its state.
        Node::GotoState(new_label(try_idx))
    }

    /// Compile the except branches into a chain of exception-type tests. The
    /// synthesized else arm re-raises through the table machinery: it flags
    /// the unroll, saves the exception and jumps to the finally.
    fn collect_except_state(
        &mut self,
        excepts: Vec<ExceptBranch>,
        out_to_finally: &StateLabel,
    ) -> Node {
        let mut branches = Vec::new();
        let mut catch_all = None;
        for e in excepts {
            if e.classes.is_empty() {
                catch_all = Some(e.body);
                break;
            }
            let mut classes = e.classes.into_iter();
            let first = classes.next().unwrap();
            let mut cond = Node::ExcTest {
                operand: Box::new(self.get_current_exception()),
                class: first,
            };
            for class in classes {
                cond = Node::Or {
                    lhs: Box::new(cond),
                    rhs: Box::new(Node::ExcTest {
                        operand: Box::new(self.get_current_exception()),
                        class,
                    }),
                };
            }
            branches.push(IfBranch { cond, body: e.body });
        }

        let else_body = match catch_all {
            Some(b) => b,
            None => Node::StmtList(vec![
                Node::assign(self.unroll_flag_var().access(), Node::bool_lit(true)),
                Node::assign(self.cur_exc_var().access(), self.get_current_exception()),
                Node::goto(out_to_finally),
            ]),
        };

        if branches.is_empty() {
            else_body
        } else {
            Node::If {
                branches,
                else_body: Some(Box::new(else_body)),
            }
        }
    }

    /// The end-finally marker appended to every finally body: continues an
    /// interrupted return, or re-raises a pending exception, once the
    /// finally has completed.
    fn end_finally_node(&mut self) -> Node {
        let cur_exc = self.cur_exc_var().access();
        let tmp_result = self.tmp_result_var().access();
        let inner = Node::If {
            branches: vec![IfBranch {
                cond: Node::bin(BinOp::Eq, cur_exc.clone(), Node::NilLit),
                body: Node::ret(Some(tmp_result)),
            }],
            else_body: Some(Box::new(Node::Raise(Some(Box::new(cur_exc))))),
        };
        Node::if_stmt(self.unroll_flag_var().access(), inner, None)
    }
}
