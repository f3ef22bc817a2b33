//! Closure-iterator lowering for the loam compiler.
//!
//! Rewrites the body of a resumable generator function into a flat state
//! machine expressed in ordinary structured control flow. After the pass the
//! body has no suspension points: it dispatches on a persisted integer state
//! at entry, runs one straight-line segment, updates the state, and returns
//! (yielding a value through the generator's result slot) or exits. The
//! runtime resumes the generator by calling the body again; `state < 0`
//! means finished.
//!
//! Exception handling that spans yield points cannot rely on the host
//! stack, so the pass also compiles `try`/`except`/`finally` dispatch into a
//! static table indexed by state, and synthesises unwind-to-finally as data
//! movement plus goto.
//!
//! Pipeline, in order:
//!
//! 1. [`exprs`]: hoist yields buried in compound expressions up to
//!    statement position
//! 2. [`split`]: carve the body into numbered states linked by goto edges
//!    (invoking the return and break relocators in [`flow`])
//! 3. [`states`]: collapse empty forwarding states and renumber
//! 4. [`materialize`]: turn abstract yields/gotos/returns into state
//!    assignments plus return/break
//! 5. [`dispatch`]: wrap everything in the dispatch loop shell
//!
//! The pass is a single-threaded, purely in-memory AST rewrite; the one
//! `Ctx` value threaded through the components owns every synthetic variable
//! and state node until the transform returns.

use loam_ast::{new_label, Node, SymId, SymbolTable};

/// Fatal compiler-internal error. These indicate a bug in an upstream pass
/// or in this one and must not be recovered from.
macro_rules! ice {
    ($($arg:tt)*) => {
        panic!(
            "internal compiler error (closure-iterator lowering): {}",
            format_args!($($arg)*)
        )
    };
}
pub(crate) use ice;

mod ctx;
mod dispatch;
mod exprs;
mod flow;
mod materialize;
mod split;
mod states;

pub use ctx::{EnvLayout, GeneratorFn, LiftingMode, VarHandle};

use ctx::Ctx;

/// The transformed generator body plus the artifacts the code generator
/// depends on.
pub struct Lowered {
    /// The dispatch-loop body replacing the generator's original body.
    pub body: Node,
    /// Number of states, exit state included.
    pub state_count: usize,
    /// Per-state handler encoding: 0 none, negative except, positive
    /// finally. Also embedded in `body` when any state lives inside a try.
    pub exception_table: Vec<i16>,
    pub has_exceptions: bool,
    /// Access expression for the persisted state word (a local pre-lifting,
    /// the first environment field post-lifting).
    pub state_access: Node,
    /// The generator's result slot; yields and returns write through it.
    pub result_sym: SymId,
}

/// Lower one closure-iterator body. The input must already have passed
/// semantic analysis, with `for` loops desugared to `while`.
pub fn lower_closure_iterator(
    syms: &mut SymbolTable,
    gen: GeneratorFn,
    mode: LiftingMode,
) -> Lowered {
    let fn_name = syms.name(gen.sym).to_string();
    if loam_ast::query::count_gotos(&gen.body) != 0 {
        ice!("goto-state node in closure-iterator input");
    }
    let mut ctx = Ctx::new(syms, &gen, mode);
    let body = gen.body;

    let (body, reshaped) = exprs::normalize(&mut ctx, body);
    tracing::debug!(function = %fn_name, reshaped, "lowering closure iterator");

    // State 0 is the entry; the top-level out-edge is the exit (-1),
    // forwarded to the exit state during elision.
    let exit_label = new_label(-1);
    let entry = ctx.new_state(Node::StmtList(Vec::new()), None);
    debug_assert_eq!(entry, 0);
    let body = ctx.split_into_states(body, &exit_label);
    ctx.set_state_body(entry, body);

    ctx.delete_empty_states();
    ctx.materialize_states();

    let state_count = ctx.states.len();
    let exception_table = ctx.exception_table.clone();
    let has_exceptions = ctx.has_exceptions;
    let state_access = ctx.state_access();
    let result_sym = ctx.result_sym;
    let body = ctx.emit_dispatcher();
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(
            body = %loam_ast::pretty::pretty(&body, &*ctx.syms),
            "dispatch loop"
        );
    }

    tracing::debug!(
        function = %fn_name,
        states = state_count,
        has_exceptions,
        "lowered closure iterator"
    );

    Lowered {
        body,
        state_count,
        exception_table,
        has_exceptions,
        state_access,
        result_sym,
    }
}
