//! Dispatcher emission: the final body shell.
//!
//! ```text
//! while true:
//!   block :stateLoop:
//!     [declarations, pre-lifting only]
//!     try:                                  (only when states live in trys)
//!       closureIterSetupExc(:curExc)
//!       dispatch :state                     (dense switch over state bodies)
//!     except:
//!       :state = exceptionTable[:state]
//!       if :state == 0: raise
//!       :unrollFinally = :state > 0
//!       if :state < 0: :state = -:state
//!       :curExc = getCurrentException()
//! ```
//!
//! Every `break :stateLoop` produced by materialisation lands on the block;
//! leaving it re-enters the while, which dispatches on the updated state.

use std::mem;

use loam_ast::{BinOp, ExceptBranch, Node, StateCase, Ty};

use crate::ctx::Ctx;

impl<'a> Ctx<'a> {
    pub(crate) fn emit_dispatcher(&mut self) -> Node {
        let state_access = self.state_access();

        let states: Vec<StateCase> = mem::take(&mut self.states)
            .into_iter()
            .enumerate()
            .map(|(label, s)| StateCase {
                label,
                body: match s.body {
                    Node::StmtList(list) => list,
                    other => vec![other],
                },
            })
            .collect();
        let last_state = states.len() - 1;
        // elision keeps creation order, so the exit state dispatches last
        debug_assert_eq!(self.exit_state_idx, last_state as i32);
        let dispatch = Node::Dispatch {
            selector: Box::new(state_access.clone()),
            last_state,
            states,
        };

        let inner = if self.has_exceptions {
            let table = Node::ArrayLit {
                ty: Ty::ArrayInt16 {
                    len: self.exception_table.len(),
                },
                elems: self
                    .exception_table
                    .iter()
                    .map(|&e| Node::int(i64::from(e)))
                    .collect(),
            };
            let handler = Node::StmtList(vec![
                Node::assign(
                    state_access.clone(),
                    Node::index(table, state_access.clone()),
                ),
                Node::if_stmt(
                    Node::bin(BinOp::Eq, state_access.clone(), Node::int(0)),
                    Node::Raise(None),
                    None,
                ),
                Node::assign(
                    self.unroll_flag_var().access(),
                    Node::bin(BinOp::Gt, state_access.clone(), Node::int(0)),
                ),
                Node::if_stmt(
                    Node::bin(BinOp::Lt, state_access.clone(), Node::int(0)),
                    Node::assign(state_access.clone(), Node::neg(state_access.clone())),
                    None,
                ),
                Node::assign(self.cur_exc_var().access(), self.get_current_exception()),
            ]);
            Node::try_(
                Node::list(vec![self.setup_exc_call(), dispatch]),
                vec![ExceptBranch {
                    classes: vec![],
                    body: handler,
                }],
                None,
            )
        } else {
            dispatch
        };

        let mut block_body = Vec::new();
        if let Some(decls) = self.decl_section() {
            block_body.push(decls);
        }
        block_body.push(inner);

        let loop_label = self.state_loop_label();
        Node::while_(
            Node::bool_lit(true),
            Node::block(Some(loop_label), Node::StmtList(block_body)),
        )
    }
}
