//! Debug printer for AST trees.
//!
//! Renders a `Node` as indented pseudo-source. Used by test failure messages
//! and trace output; this is not a code generator.

use crate::node::{BinOp, Node, UnOp};
use crate::sym::SymbolTable;

pub fn pretty(n: &Node, syms: &SymbolTable) -> String {
    let mut p = Printer {
        syms,
        out: String::new(),
        indent: 0,
    };
    p.emit_stmt(n);
    p.out
}

struct Printer<'a> {
    syms: &'a SymbolTable,
    out: String,
    indent: usize,
}

impl<'a> Printer<'a> {
    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn open(&mut self, head: &str) {
        self.line(head);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
    }

    fn emit_stmt(&mut self, n: &Node) {
        match n {
            Node::StmtList(stmts) => {
                for s in stmts {
                    self.emit_stmt(s);
                }
            }
            Node::If {
                branches,
                else_body,
            } => {
                for (i, b) in branches.iter().enumerate() {
                    let kw = if i == 0 { "if" } else { "elif" };
                    let head = format!("{} {}:", kw, self.expr(&b.cond));
                    self.open(&head);
                    self.emit_stmt(&b.body);
                    self.close();
                }
                if let Some(e) = else_body {
                    self.open("else:");
                    self.emit_stmt(e);
                    self.close();
                }
            }
            Node::Case {
                selector,
                arms,
                else_body,
            } => {
                let head = format!("case {}:", self.expr(selector));
                self.open(&head);
                for a in arms {
                    let vals: Vec<String> = a.matches.iter().map(|m| self.expr(m)).collect();
                    self.open(&format!("of {}:", vals.join(", ")));
                    self.emit_stmt(&a.body);
                    self.close();
                }
                if let Some(e) = else_body {
                    self.open("else:");
                    self.emit_stmt(e);
                    self.close();
                }
                self.close();
            }
            Node::While { cond, body } => {
                let head = format!("while {}:", self.expr(cond));
                self.open(&head);
                self.emit_stmt(body);
                self.close();
            }
            Node::Block { label, body } => {
                let head = match label {
                    Some(l) => format!("block {}:", self.syms.name(*l)),
                    None => "block:".to_string(),
                };
                self.open(&head);
                self.emit_stmt(body);
                self.close();
            }
            Node::Break { label } => match label {
                Some(l) => {
                    let s = format!("break {}", self.syms.name(*l));
                    self.line(&s);
                }
                None => self.line("break"),
            },
            Node::Continue => self.line("continue"),
            Node::Try {
                body,
                excepts,
                finally,
            } => {
                self.open("try:");
                self.emit_stmt(body);
                self.close();
                for e in excepts {
                    let head = if e.classes.is_empty() {
                        "except:".to_string()
                    } else {
                        let names: Vec<&str> = e.classes.iter().map(|c| c.0.as_str()).collect();
                        format!("except {}:", names.join(", "))
                    };
                    self.open(&head);
                    self.emit_stmt(&e.body);
                    self.close();
                }
                if let Some(fin) = finally {
                    self.open("finally:");
                    self.emit_stmt(fin);
                    self.close();
                }
            }
            Node::Raise(op) => match op {
                Some(e) => {
                    let s = format!("raise {}", self.expr(e));
                    self.line(&s);
                }
                None => self.line("raise"),
            },
            Node::Return(op) => match op {
                Some(e) => {
                    let s = format!("return {}", self.expr(e));
                    self.line(&s);
                }
                None => self.line("return"),
            },
            Node::Yield(op) => match op {
                Some(e) => {
                    let s = format!("yield {}", self.expr(e));
                    self.line(&s);
                }
                None => self.line("yield"),
            },
            Node::Discard(op) => match op {
                Some(e) => {
                    let s = format!("discard {}", self.expr(e));
                    self.line(&s);
                }
                None => self.line("discard"),
            },
            Node::VarSection(defs) => {
                for d in defs {
                    let s = match &d.init {
                        Some(init) => {
                            format!("var {} = {}", self.syms.name(d.sym), self.expr(init))
                        }
                        None => format!("var {}", self.syms.name(d.sym)),
                    };
                    self.line(&s);
                }
            }
            Node::Asgn { target, value } => {
                let s = format!("{} = {}", self.expr(target), self.expr(value));
                self.line(&s);
            }
            Node::FastAsgn { target, value } => {
                let s = format!("{} =fast {}", self.expr(target), self.expr(value));
                self.line(&s);
            }
            Node::For { var, iter, body } => {
                let head = format!("for {} in {}:", self.syms.name(*var), self.expr(iter));
                self.open(&head);
                self.emit_stmt(body);
                self.close();
            }
            Node::ProcDef { sym, body } => {
                let head = format!("proc {}:", self.syms.name(*sym));
                self.open(&head);
                self.emit_stmt(body);
                self.close();
            }
            Node::GotoState(label) => {
                let s = format!("goto-state {}", label.get());
                self.line(&s);
            }
            Node::Dispatch {
                selector,
                last_state,
                states,
            } => {
                let head = format!("dispatch {} (last {}):", self.expr(selector), last_state);
                self.open(&head);
                for case in states {
                    self.open(&format!("state {}:", case.label));
                    for s in &case.body {
                        self.emit_stmt(s);
                    }
                    self.close();
                }
                self.close();
            }
            // expression in statement position
            other => {
                let s = self.expr(other);
                self.line(&s);
            }
        }
    }

    fn expr(&mut self, n: &Node) -> String {
        match n {
            Node::IntLit(v) => v.to_string(),
            Node::BoolLit(v) => v.to_string(),
            Node::NilLit => "nil".to_string(),
            Node::Sym(id) => self.syms.name(*id).to_string(),
            Node::Call { callee, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                format!("{}({})", self.syms.name(*callee), args.join(", "))
            }
            Node::BinExpr { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(lhs), bin_op(*op), self.expr(rhs))
            }
            Node::UnExpr { op, operand } => match op {
                UnOp::Not => format!("not {}", self.expr(operand)),
                UnOp::Neg => format!("-{}", self.expr(operand)),
            },
            Node::And { lhs, rhs } => format!("({} and {})", self.expr(lhs), self.expr(rhs)),
            Node::Or { lhs, rhs } => format!("({} or {})", self.expr(lhs), self.expr(rhs)),
            Node::Tuple(elems) => {
                let elems: Vec<String> = elems.iter().map(|e| self.expr(e)).collect();
                format!("({})", elems.join(", "))
            }
            Node::ObjConstr { fields, .. } => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", self.syms.name(*k), self.expr(v)))
                    .collect();
                format!("obj({})", fields.join(", "))
            }
            Node::ArrayLit { elems, .. } => {
                let elems: Vec<String> = elems.iter().map(|e| self.expr(e)).collect();
                format!("[{}]", elems.join(", "))
            }
            Node::FieldAccess { obj, field } => {
                format!("{}.{}", self.expr(obj), self.syms.name(*field))
            }
            Node::Index { arr, idx } => format!("{}[{}]", self.expr(arr), self.expr(idx)),
            Node::Conv { operand, .. } => format!("conv({})", self.expr(operand)),
            Node::Cast { operand, .. } => format!("cast({})", self.expr(operand)),
            Node::ExcTest { operand, class } => {
                format!("({} of {})", self.expr(operand), class.0)
            }
            Node::StmtListExpr { stmts, value } => {
                let mut sub = Printer {
                    syms: self.syms,
                    out: String::new(),
                    indent: 0,
                };
                for s in stmts {
                    sub.emit_stmt(s);
                }
                let stmts = sub.out.trim_end().replace('\n', "; ");
                format!("({}; {})", stmts, self.expr(value))
            }
            // statement-shaped node in expression position: render flat
            other => {
                let mut sub = Printer {
                    syms: self.syms,
                    out: String::new(),
                    indent: 0,
                };
                sub.emit_stmt(other);
                sub.out.trim_end().replace('\n', "; ")
            }
        }
    }
}

fn bin_op(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
    }
}
