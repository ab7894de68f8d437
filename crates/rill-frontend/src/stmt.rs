//! Statement AST.
//!
//! Scopes are ordered statement sequences; emission threads the current
//! block through each statement in turn. Loop statements record their
//! break/continue branches in the enclosing-loop frame and patch them
//! exactly once after the body is emitted. Function definitions compile
//! lazily, after type resolution, into dedicated module functions.

use std::rc::Rc;

use rill_ir::{BlockId, InstId, Span, ValueId};

use crate::error::{err, Result};
use crate::expr::Expr;
use crate::func::{FnCtx, Function, Unit, Var};
use crate::generic::CloneCtx;
use crate::types::Ty;

/// An ordered sequence of statements.
#[derive(Default)]
pub struct Scope {
    pub stmts: Vec<Stmt>,
}

impl Scope {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn resolve_types(&mut self, unit: &Unit) -> Result<()> {
        for stmt in &mut self.stmts {
            stmt.resolve_types(unit)?;
        }
        Ok(())
    }

    pub fn codegen(&mut self, unit: &mut Unit, fx: &mut FnCtx, block: &mut BlockId) -> Result<()> {
        for stmt in &mut self.stmts {
            stmt.codegen(unit, fx, block)?;
        }
        Ok(())
    }

    pub fn clone_under(&self, ctx: &mut CloneCtx) -> Scope {
        Scope {
            stmts: self.stmts.iter().map(|s| s.clone_under(ctx)).collect(),
        }
    }
}

pub struct Stmt {
    pub kind: StmtKind,
    pub span: Option<Span>,
}

pub enum StmtKind {
    Expr(Expr),
    /// `let name = init`: immutable binding.
    Let { var: Rc<Var>, init: Expr },
    /// `var name = init`: mutable cell.
    Cell { var: Rc<Var>, init: Expr },
    /// `name = value`.
    Assign { var: Rc<Var>, value: Expr },
    /// `name.memb = value` (record field by 1-based index, or named field).
    AssignMember {
        var: Rc<Var>,
        memb: String,
        value: Expr,
    },
    /// `arr[idx] = value`.
    AssignIndex {
        array: Expr,
        index: Expr,
        value: Expr,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    /// `if/elif/.../else`: conditional branches in order, then an optional
    /// else body.
    If {
        branches: Vec<(Expr, Scope)>,
        else_body: Option<Scope>,
    },
    While {
        cond: Expr,
        body: Scope,
    },
    /// `range from to step as name: body end`; `from` defaults to 0 and
    /// `step` to 1.
    Range {
        from: Option<Expr>,
        to: Expr,
        step: Option<Expr>,
        var: Rc<Var>,
        body: Scope,
    },
    /// `source expr as name: body end` drives a generator to completion.
    Source {
        source: Expr,
        var: Option<Rc<Var>>,
        body: Scope,
    },
    FuncDef(Rc<Function>),
}

fn node(kind: StmtKind) -> Stmt {
    Stmt { kind, span: None }
}

impl Stmt {
    // ── factories ───────────────────────────────────────────────────

    pub fn expr(expr: Expr) -> Stmt {
        node(StmtKind::Expr(expr))
    }

    pub fn let_(var: Rc<Var>, init: Expr) -> Stmt {
        node(StmtKind::Let { var, init })
    }

    pub fn cell(var: Rc<Var>, init: Expr) -> Stmt {
        node(StmtKind::Cell { var, init })
    }

    pub fn assign(var: Rc<Var>, value: Expr) -> Stmt {
        node(StmtKind::Assign { var, value })
    }

    pub fn assign_member(var: Rc<Var>, memb: impl Into<String>, value: Expr) -> Stmt {
        node(StmtKind::AssignMember {
            var,
            memb: memb.into(),
            value,
        })
    }

    pub fn assign_index(array: Expr, index: Expr, value: Expr) -> Stmt {
        node(StmtKind::AssignIndex {
            array,
            index,
            value,
        })
    }

    pub fn ret(value: Option<Expr>) -> Stmt {
        node(StmtKind::Return(value))
    }

    pub fn brk() -> Stmt {
        node(StmtKind::Break)
    }

    pub fn cont() -> Stmt {
        node(StmtKind::Continue)
    }

    pub fn if_(branches: Vec<(Expr, Scope)>, else_body: Option<Scope>) -> Stmt {
        node(StmtKind::If {
            branches,
            else_body,
        })
    }

    pub fn while_(cond: Expr, body: Scope) -> Stmt {
        node(StmtKind::While { cond, body })
    }

    pub fn range(
        from: Option<Expr>,
        to: Expr,
        step: Option<Expr>,
        var: Rc<Var>,
        body: Scope,
    ) -> Stmt {
        node(StmtKind::Range {
            from,
            to,
            step,
            var,
            body,
        })
    }

    pub fn source(source: Expr, var: Option<Rc<Var>>, body: Scope) -> Stmt {
        node(StmtKind::Source { source, var, body })
    }

    pub fn func_def(func: Rc<Function>) -> Stmt {
        node(StmtKind::FuncDef(func))
    }

    pub fn with_span(mut self, span: Span) -> Stmt {
        self.span = Some(span);
        self
    }

    // ── contracts ───────────────────────────────────────────────────

    pub fn resolve_types(&mut self, unit: &Unit) -> Result<()> {
        let span = self.span.clone();
        self.resolve0(unit).map_err(|e| e.annotate(span.as_ref()))
    }

    fn resolve0(&mut self, unit: &Unit) -> Result<()> {
        match &mut self.kind {
            StmtKind::Expr(e) => e.resolve_types(unit),
            StmtKind::Let { var, init } | StmtKind::Cell { var, init } => {
                init.resolve_types(unit)?;
                var.set_ty(init.get_type(unit)?);
                Ok(())
            }
            StmtKind::Assign { var, value } => {
                value.resolve_types(unit)?;
                if !var.is_assignable() {
                    return Err(err!("cannot assign to immutable variable '{}'", var.name()));
                }
                value.ensure(unit, &var.ty()?)
            }
            StmtKind::AssignMember { value, .. } => value.resolve_types(unit),
            StmtKind::AssignIndex {
                array,
                index,
                value,
            } => {
                array.resolve_types(unit)?;
                index.resolve_types(unit)?;
                value.resolve_types(unit)
            }
            StmtKind::Return(value) => match value {
                Some(e) => e.resolve_types(unit),
                None => Ok(()),
            },
            StmtKind::Break | StmtKind::Continue => Ok(()),
            StmtKind::If {
                branches,
                else_body,
            } => {
                for (cond, body) in branches {
                    cond.resolve_types(unit)?;
                    body.resolve_types(unit)?;
                }
                if let Some(body) = else_body {
                    body.resolve_types(unit)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                cond.resolve_types(unit)?;
                body.resolve_types(unit)
            }
            StmtKind::Range {
                from,
                to,
                step,
                var,
                body,
            } => {
                if let Some(from) = from {
                    from.resolve_types(unit)?;
                }
                to.resolve_types(unit)?;
                if let Some(step) = step {
                    step.resolve_types(unit)?;
                }
                var.set_ty(Ty::Int);
                body.resolve_types(unit)
            }
            StmtKind::Source { source, var, body } => {
                source.resolve_types(unit)?;
                let src_ty = source.get_type(unit)?;
                match &src_ty {
                    Ty::Gen(g) => {
                        if let Some(var) = var {
                            var.set_ty(g.yields.clone());
                        }
                    }
                    _ => {
                        return Err(err!(
                            "cannot iterate over value of type '{}'",
                            src_ty.name()
                        ))
                    }
                }
                body.resolve_types(unit)
            }
            StmtKind::FuncDef(func) => func.resolve_types(unit),
        }
    }

    pub fn codegen(&mut self, unit: &mut Unit, fx: &mut FnCtx, block: &mut BlockId) -> Result<()> {
        let span = self.span.clone();
        if span.is_some() {
            fx.fb.set_current_span(span.clone());
        }
        self.codegen0(unit, fx, block)
            .map_err(|e| e.annotate(span.as_ref()))
    }

    fn codegen0(&mut self, unit: &mut Unit, fx: &mut FnCtx, block: &mut BlockId) -> Result<()> {
        match &mut self.kind {
            StmtKind::Expr(e) => {
                e.codegen(unit, fx, block)?;
                Ok(())
            }
            StmtKind::Let { var, init } | StmtKind::Cell { var, init } => {
                let value = init.codegen_value(unit, fx, block)?;
                var.store(unit, fx, *block, value)
            }
            StmtKind::Assign { var, value } => {
                let v = value.codegen_value(unit, fx, block)?;
                var.store(unit, fx, *block, v)
            }
            StmtKind::AssignMember { var, memb, value } => {
                let ty = var.ty()?;
                if let Some(fields) = ty.field_list() {
                    if let Some((_, fty)) = fields.iter().find(|(n, _)| n == memb.as_str()) {
                        value.ensure(unit, fty)?;
                    }
                }
                let cur = var.load(fx, *block)?;
                let v = value.codegen_value(unit, fx, block)?;
                let updated = ty.set_memb(unit, fx, block, cur, memb, v)?;
                var.store(unit, fx, *block, updated)
            }
            StmtKind::AssignIndex {
                array,
                index,
                value,
            } => {
                let arr_ty = array.get_type(unit)?;
                let idx_ty = index.get_type(unit)?;
                let val_ty = value.get_type(unit)?;
                let arr = array.codegen_value(unit, fx, block)?;
                let idx = index.codegen_value(unit, fx, block)?;
                let v = value.codegen_value(unit, fx, block)?;
                arr_ty.call_magic(
                    unit,
                    fx,
                    block,
                    "__setitem__",
                    &[idx_ty, val_ty],
                    Some(arr),
                    &[idx, v],
                )?;
                Ok(())
            }
            StmtKind::Return(value) => {
                let out = fx.out.clone();
                match value {
                    Some(e) => {
                        e.ensure(unit, &out)?;
                        let v = e.codegen_value(unit, fx, block)?;
                        fx.at(*block).ret(Some(v));
                    }
                    None => {
                        if !out.is(&Ty::Void) {
                            return Err(err!("function must return a value of type '{}'", out.name()));
                        }
                        fx.at(*block).ret(None);
                    }
                }
                Ok(())
            }
            StmtKind::Break => {
                let inst = placeholder_jump(fx, *block);
                match fx.loop_frame_mut() {
                    Some(frame) => {
                        frame.add_break(inst);
                        Ok(())
                    }
                    None => Err(err!("break or continue outside of loop")),
                }
            }
            StmtKind::Continue => {
                let inst = placeholder_jump(fx, *block);
                match fx.loop_frame_mut() {
                    Some(frame) => {
                        frame.add_continue(inst);
                        Ok(())
                    }
                    None => Err(err!("break or continue outside of loop")),
                }
            }
            StmtKind::If {
                branches,
                else_body,
            } => {
                let mut exit_jumps: Vec<InstId> = Vec::new();
                for (cond, body) in branches.iter_mut() {
                    let cond_ty = cond.get_type(unit)?;
                    let cv = cond.codegen_value(unit, fx, block)?;
                    let cb = cond_ty.bool_value(unit, fx, block, cv)?;

                    let then_block = fx.fb.create_block();
                    // Else edge patched to the next test below.
                    let test = fx.at(*block).br_if(cb, then_block, &[], then_block, &[]);

                    let mut tb = then_block;
                    body.codegen(unit, fx, &mut tb)?;
                    fx.fb.switch_to_block(tb);
                    if !fx.fb.is_terminated() {
                        exit_jumps.push(fx.fb.br(tb, &[])); // patched to exit below
                    }

                    let next = fx.fb.create_block();
                    fx.fb.set_successor(test, 1, next);
                    *block = next;
                }
                if let Some(body) = else_body {
                    body.codegen(unit, fx, block)?;
                }
                fx.fb.switch_to_block(*block);
                let exit = fx.fb.create_block();
                if !fx.fb.is_terminated() {
                    fx.fb.br(exit, &[]);
                }
                for jump in exit_jumps {
                    fx.fb.set_successor(jump, 0, exit);
                }
                *block = exit;
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let header = fx.fb.create_block();
                fx.at(*block).br(header, &[]);

                let mut cblock = header;
                let cond_ty = cond.get_type(unit)?;
                let cv = cond.codegen_value(unit, fx, &mut cblock)?;
                let cb = cond_ty.bool_value(unit, fx, &mut cblock, cv)?;

                let body_block = fx.fb.create_block();
                // False edge patched to the exit below.
                let branch = fx.at(cblock).br_if(cb, body_block, &[], body_block, &[]);

                fx.push_loop();
                let mut bblock = body_block;
                body.codegen(unit, fx, &mut bblock)?;
                fx.fb.switch_to_block(bblock);
                if !fx.fb.is_terminated() {
                    fx.fb.br(header, &[]);
                }

                let exit = fx.fb.create_block();
                fx.fb.set_successor(branch, 1, exit);
                let frame = fx.pop_loop();
                frame.set_breaks(&mut fx.fb, exit);
                frame.set_continues(&mut fx.fb, header);
                *block = exit;
                Ok(())
            }
            StmtKind::Range {
                from,
                to,
                step,
                var,
                body,
            } => {
                let from_val = match from {
                    Some(e) => {
                        e.ensure(unit, &Ty::Int)?;
                        e.codegen_value(unit, fx, block)?
                    }
                    None => fx.at(*block).const_int(0),
                };
                to.ensure(unit, &Ty::Int)?;
                let to_val = to.codegen_value(unit, fx, block)?;
                let step_val = match step {
                    Some(e) => {
                        e.ensure(unit, &Ty::Int)?;
                        e.codegen_value(unit, fx, block)?
                    }
                    None => fx.at(*block).const_int(1),
                };
                var.store(unit, fx, *block, from_val)?;

                let header = fx.fb.create_block();
                fx.at(*block).br(header, &[]);
                let cur = var.load(fx, header)?;
                let cond = fx
                    .at(header)
                    .cmp(rill_ir::CmpKind::Lt, cur, to_val);

                let body_block = fx.fb.create_block();
                // False edge patched to the exit below.
                let branch = fx.at(header).br_if(cond, body_block, &[], body_block, &[]);

                fx.push_loop();
                let mut bblock = body_block;
                body.codegen(unit, fx, &mut bblock)?;
                let latch = fx.fb.create_block();
                fx.fb.switch_to_block(bblock);
                if !fx.fb.is_terminated() {
                    fx.fb.br(latch, &[]);
                }
                let cur = var.load(fx, latch)?;
                let next: ValueId = fx.at(latch).add(cur, step_val);
                var.store(unit, fx, latch, next)?;
                fx.at(latch).br(header, &[]);

                let exit = fx.fb.create_block();
                fx.fb.set_successor(branch, 1, exit);
                let frame = fx.pop_loop();
                frame.set_breaks(&mut fx.fb, exit);
                frame.set_continues(&mut fx.fb, latch);
                *block = exit;
                Ok(())
            }
            StmtKind::Source { source, var, body } => {
                let src_ty = source.get_type(unit)?;
                let gen_ty = match &src_ty {
                    Ty::Gen(g) => g.clone(),
                    _ => {
                        return Err(err!(
                            "cannot iterate over value of type '{}'",
                            src_ty.name()
                        ))
                    }
                };
                let gen = source.codegen_value(unit, fx, block)?;

                let header = fx.fb.create_block();
                fx.at(*block).br(header, &[]);
                gen_ty.resume(unit, fx, header, gen);
                let done = gen_ty.done(unit, fx, header, gen);
                let body_block = fx.fb.create_block();
                // Done edge patched to the cleanup block below.
                let branch = fx.at(header).br_if(done, body_block, &[], body_block, &[]);

                fx.push_loop();
                let mut bblock = body_block;
                if let Some(var) = var {
                    if !gen_ty.yields.is(&Ty::Void) {
                        let promised = gen_ty.promise(unit, fx, bblock, gen)?;
                        var.store(unit, fx, bblock, promised)?;
                    }
                }
                body.codegen(unit, fx, &mut bblock)?;
                fx.fb.switch_to_block(bblock);
                if !fx.fb.is_terminated() {
                    fx.fb.br(header, &[]);
                }

                let cleanup = fx.fb.create_block();
                fx.fb.set_successor(branch, 0, cleanup);
                gen_ty.destroy(unit, fx, cleanup, gen);
                let exit = fx.fb.create_block();
                fx.at(cleanup).br(exit, &[]);

                let frame = fx.pop_loop();
                frame.set_breaks(&mut fx.fb, exit);
                frame.set_continues(&mut fx.fb, header);
                *block = exit;
                Ok(())
            }
            StmtKind::FuncDef(func) => {
                func.codegen(unit)?;
                Ok(())
            }
        }
    }

    pub fn clone_under(&self, ctx: &mut CloneCtx) -> Stmt {
        let kind = match &self.kind {
            StmtKind::Expr(e) => StmtKind::Expr(e.clone_under(ctx)),
            StmtKind::Let { var, init } => StmtKind::Let {
                var: var.clone_under(ctx),
                init: init.clone_under(ctx),
            },
            StmtKind::Cell { var, init } => StmtKind::Cell {
                var: var.clone_under(ctx),
                init: init.clone_under(ctx),
            },
            StmtKind::Assign { var, value } => StmtKind::Assign {
                var: var.clone_under(ctx),
                value: value.clone_under(ctx),
            },
            StmtKind::AssignMember { var, memb, value } => StmtKind::AssignMember {
                var: var.clone_under(ctx),
                memb: memb.clone(),
                value: value.clone_under(ctx),
            },
            StmtKind::AssignIndex {
                array,
                index,
                value,
            } => StmtKind::AssignIndex {
                array: array.clone_under(ctx),
                index: index.clone_under(ctx),
                value: value.clone_under(ctx),
            },
            StmtKind::Return(value) => {
                StmtKind::Return(value.as_ref().map(|e| e.clone_under(ctx)))
            }
            StmtKind::Break => StmtKind::Break,
            StmtKind::Continue => StmtKind::Continue,
            StmtKind::If {
                branches,
                else_body,
            } => StmtKind::If {
                branches: branches
                    .iter()
                    .map(|(c, b)| (c.clone_under(ctx), b.clone_under(ctx)))
                    .collect(),
                else_body: else_body.as_ref().map(|b| b.clone_under(ctx)),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: cond.clone_under(ctx),
                body: body.clone_under(ctx),
            },
            StmtKind::Range {
                from,
                to,
                step,
                var,
                body,
            } => StmtKind::Range {
                from: from.as_ref().map(|e| e.clone_under(ctx)),
                to: to.clone_under(ctx),
                step: step.as_ref().map(|e| e.clone_under(ctx)),
                var: var.clone_under(ctx),
                body: body.clone_under(ctx),
            },
            StmtKind::Source { source, var, body } => StmtKind::Source {
                source: source.clone_under(ctx),
                var: var.as_ref().map(|v| v.clone_under(ctx)),
                body: body.clone_under(ctx),
            },
            StmtKind::FuncDef(func) => StmtKind::FuncDef(func.clone_under(ctx)),
        };
        Stmt {
            kind,
            span: self.span.clone(),
        }
    }
}

/// An unconditional jump whose successor is patched later; until then it
/// targets its own block.
fn placeholder_jump(fx: &mut FnCtx, block: BlockId) -> InstId {
    fx.at(block).br(block, &[])
}
