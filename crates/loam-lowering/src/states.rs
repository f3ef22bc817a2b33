//! Empty-state elision.
//!
//! The splitter leaves behind states whose whole body is a single forwarding
//! goto (loop exits, block tails). This pass appends the exit state, chases
//! forwarding chains, renumbers the survivors and drops the dead states,
//! keeping the exception table in lockstep.
//!
//! Goto nodes are re-created with fresh labels while forwarding, so a label
//! cell shared between several edges is never rewritten twice.

use loam_ast::query::bare_goto_label;
use loam_ast::{new_label, Node};

use crate::ctx::{Ctx, State};
use crate::ice;

impl<'a> Ctx<'a> {
    pub(crate) fn delete_empty_states(&mut self) {
        // The exit state is appended first; every goto-state(-1) forwards to
        // it. Its own body keeps the -1 edge.
        let exit_old = self.new_state(
            Node::StmtList(vec![Node::GotoState(new_label(-1))]),
            None,
        );

        // Pass 1 - renumber. A state whose body is a bare forwarding goto is
        // dead, unless it is the entry or the exit state.
        let mut new_index: Vec<i32> = Vec::with_capacity(self.states.len());
        let mut next = 0i32;
        for (i, s) in self.states.iter().enumerate() {
            let dead = i != 0 && i != exit_old && bare_goto_label(&s.body).is_some();
            if dead {
                new_index.push(-1);
            } else {
                new_index.push(next);
                next += 1;
            }
        }

        // Pass 2 - forward. Chase every goto target through dead states and
        // rewrite it to the renumbered index; same for the exception table,
        // preserving the handler sign.
        for i in 0..self.states.len() {
            if new_index[i] == -1 || i == exit_old {
                continue;
            }
            let body = self.take_state_body(i);
            let body = forward_gotos(body, &self.states, &new_index, exit_old);
            self.set_state_body(i, body);
        }
        for entry in self.exception_table.iter_mut() {
            if *entry == 0 {
                continue;
            }
            let target = chase(&self.states, exit_old, i32::from(entry.unsigned_abs()));
            let renumbered = new_index[target];
            debug_assert!(renumbered > 0, "handler forwarded into the entry state");
            *entry = if *entry < 0 {
                -(renumbered as i16)
            } else {
                renumbered as i16
            };
        }

        // Drop the dead states and their table entries in parallel.
        let total = self.states.len();
        let old_states = std::mem::take(&mut self.states);
        let old_table = std::mem::take(&mut self.exception_table);
        for ((state, entry), &idx) in old_states
            .into_iter()
            .zip(old_table)
            .zip(new_index.iter())
        {
            if idx >= 0 {
                self.states.push(state);
                self.exception_table.push(entry);
            }
        }
        self.exit_state_idx = new_index[exit_old];
        tracing::debug!(
            removed = total - self.states.len(),
            states = self.states.len(),
            "elided empty states"
        );
    }
}

/// Follow forwarding chains starting at `start` (old index space; -1 means
/// the exit state) and return the first non-forwarding old index. Chains
/// longer than the state count can only come from a cycle.
fn chase(states: &[State], exit_old: usize, start: i32) -> usize {
    let mut idx = start;
    let mut jumps = states.len();
    loop {
        if idx == -1 {
            idx = exit_old as i32;
        }
        let cur = idx as usize;
        if cur == exit_old {
            return cur;
        }
        match bare_goto_label(&states[cur].body) {
            Some(label) if label.get() != idx => idx = label.get(),
            _ => return cur,
        }
        if jumps == 0 {
            ice!("forwarding chain exceeds the state count");
        }
        jumps -= 1;
    }
}

fn forward_gotos(n: Node, states: &[State], new_index: &[i32], exit_old: usize) -> Node {
    match n {
        Node::GotoState(label) => {
            let target = chase(states, exit_old, label.get());
            let renumbered = new_index[target];
            debug_assert!(renumbered >= 0, "goto forwarded into a dead state");
            Node::GotoState(new_label(renumbered))
        }
        Node::ProcDef { .. } => n,
        other => other.map_children(&mut |c| forward_gotos(c, states, new_index, exit_old)),
    }
}
