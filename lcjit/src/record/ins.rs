//! Recording of individual bytecode instructions.

use crate::{
    errors::RecordingError,
    interp::{BcIns, ExecContext, InfoKind, Pc, Word, WordInt, EVAL_INS_WORDS},
    ir::{IRRef, IrOp, IrTy, LitKind},
    jitstate::JitState,
    AbortReason,
};

impl JitState {
    /// Record the instruction `ins` at the current PC, reading interpreter state from `ctx`.
    pub(super) fn record_ins<C: ExecContext + ?Sized>(
        &mut self,
        ins: &BcIns,
        ctx: &C,
    ) -> Result<(), RecordingError> {
        match *ins {
            BcIns::IsLt { a, d }
            | BcIns::IsGe { a, d }
            | BcIns::IsLe { a, d }
            | BcIns::IsGt { a, d }
            | BcIns::IsEq { a, d }
            | BcIns::IsNe { a, d } => {
                let op = match ins {
                    BcIns::IsLt { .. } => IrOp::Lt,
                    BcIns::IsGe { .. } => IrOp::Ge,
                    BcIns::IsLe { .. } => IrOp::Le,
                    BcIns::IsGt { .. } => IrOp::Gt,
                    BcIns::IsEq { .. } => IrOp::Eq,
                    _ => IrOp::Ne,
                };
                // All comparisons are treated as integer comparisons.
                let ra = self.get_slot(i32::from(a))?;
                let rc = self.get_slot(i32::from(d))?;
                let x = ctx.slot(i32::from(a)) as WordInt;
                let y = ctx.slot(i32::from(d)) as WordInt;
                // The guard must hold for the direction actually taken.
                let op = if op.eval_comparison(x, y) {
                    op
                } else {
                    op.inverted()
                };
                self.emit(op, IrTy::Void, ra.raw(), rc.raw())?;
            }
            BcIns::Mov { a, d } => {
                let rc = self.get_slot(i32::from(d))?;
                self.set_slot(i32::from(a), Some(rc))?;
            }
            BcIns::MovRes { a } => {
                let r = match self.last_result {
                    Some(r) => r,
                    None => {
                        let r = self.emit_raw(IrOp::RLoad, IrTy::Unk, 0, 0)?;
                        self.last_result = Some(r);
                        r
                    }
                };
                self.set_slot(i32::from(a), Some(r))?;
            }
            BcIns::AddRR { a, b, c } | BcIns::SubRR { a, b, c } | BcIns::MulRR { a, b, c } => {
                let op = match ins {
                    BcIns::AddRR { .. } => IrOp::Add,
                    BcIns::SubRR { .. } => IrOp::Sub,
                    _ => IrOp::Mul,
                };
                let rb = self.get_slot(i32::from(b))?;
                let rc = self.get_slot(i32::from(c))?;
                let r = self.emit_val(op, IrTy::I32, rb, rc.raw())?;
                self.set_slot(i32::from(a), Some(r))?;
            }
            BcIns::Jmp => (),
            BcIns::LoadK { a, d } => {
                let (w, kind) = ctx.literal(d);
                let kind = LitKind::from_raw(kind)?;
                if kind == LitKind::Closure {
                    self.register_static_closure(w, ctx.info_of(w));
                }
                // Integer literals that fit are interned as `kint`s so that arithmetic on them
                // folds. Wider ones keep their full word.
                let k = match (kind, i32::try_from(w as WordInt)) {
                    (LitKind::Int, Ok(x)) => self.intern_int(x)?,
                    _ => self.intern_word(w, kind)?,
                };
                self.set_slot(i32::from(a), Some(k))?;
            }
            BcIns::LoadFV { a, d } => {
                let rb = self.get_slot(-1)?;
                let r = self.load_field(rb, d)?;
                self.set_slot(i32::from(a), Some(r))?;
            }
            BcIns::LoadF { a, b, c } => {
                let rb = self.get_slot(i32::from(b))?;
                let r = self.load_field(rb, u16::from(c))?;
                self.set_slot(i32::from(a), Some(r))?;
            }
            BcIns::Eval { a } => self.record_eval(a, ctx)?,
            BcIns::CallT { a, nargs } => self.record_callt(a, nargs, ctx)?,
            BcIns::Update { a, d } => {
                let ra = self.get_slot(i32::from(a))?;
                let rb = self.get_slot(i32::from(d))?;
                self.emit(IrOp::Update, IrTy::Void, ra.raw(), rb.raw())?;
                self.last_result = Some(rb);
                self.need_snap = true;
                self.record_return(ctx)?;
            }
            BcIns::Ret1 { a } => {
                self.last_result = Some(self.get_slot(i32::from(a))?);
                self.record_return(ctx)?;
            }
            BcIns::Alloc1 { a, b, c } => self.record_alloc(a, b, &[c], ctx)?,
            BcIns::Alloc { a, b, ref args } => self.record_alloc(a, b, args, ctx)?,
            BcIns::Case { a } => {
                // Which alternative is taken doesn't matter, only that the info table is the same.
                let ra = self.get_slot(i32::from(a))?;
                let ri = self.emit_val(IrOp::ILoad, IrTy::Info, ra, 0)?;
                self.guard_eq_kword(ri, ctx.info_of(ctx.slot(i32::from(a))), LitKind::Info)?;
            }
            BcIns::Unsupported(name) => {
                return Err(AbortReason::UnsupportedInstruction(name).into())
            }
        }
        Ok(())
    }

    /// Load field `idx` of the closure `r`.
    fn load_field(&mut self, r: IRRef, idx: u16) -> Result<IRRef, RecordingError> {
        let fref = self.emit_val(IrOp::FRef, IrTy::Ptr, r, idx)?;
        self.emit_val(IrOp::FLoad, IrTy::Unk, fref, 0)
    }

    /// Emit a guard that the info table of the closure `r` is `info`.
    fn guard_info(&mut self, r: IRRef, info: Word) -> Result<(), RecordingError> {
        let rinfo = self.intern_word(info, LitKind::Info)?;
        let ri = self.emit_val(IrOp::ILoad, IrTy::Info, r, 0)?;
        self.emit(IrOp::Eq, IrTy::Void, ri.raw(), rinfo.raw())?;
        Ok(())
    }

    fn record_eval<C: ExecContext + ?Sized>(
        &mut self,
        a: u8,
        ctx: &C,
    ) -> Result<(), RecordingError> {
        let ra = self.get_slot(i32::from(a))?;
        let node = ctx.slot(i32::from(a));
        let info = ctx.info_of(node);
        let kind = ctx.info_kind(info);
        if kind == InfoKind::Indirection {
            return Err(AbortReason::Indirection.into());
        }
        // Specialise on the info table seen now.
        self.guard_info(ra, info)?;
        if kind.is_hnf() {
            // The guard ensures `ra` is in normal form: it is its own value.
            self.last_result = Some(ra);
            return Ok(());
        }
        let InfoKind::Thunk { framesize } = kind else {
            return Err(AbortReason::UnsupportedInstruction("EVAL").into());
        };
        if !ctx.stack_has_room(8 + framesize) {
            return Err(AbortReason::StackOverflow.into());
        }
        // Push an update frame for `ra` and then the thunk's own frame. `t` is the slot name of
        // the top of the stack.
        let t = i32::try_from(ctx.top()).map_err(|_| AbortReason::StackOverflow)?;
        let return_pc: Pc = self.pc().offset(EVAL_INS_WORDS);
        let k = self.intern_base_offset(0)?;
        self.set_slot(t, Some(k))?;
        let k = self.intern_word(return_pc.0 as Word, LitKind::Pc)?;
        self.set_slot(t + 1, Some(k))?;
        let k = self.intern_word(ctx.update_closure(), LitKind::Closure)?;
        self.set_slot(t + 2, Some(k))?;
        // The thing to update.
        self.set_slot(t + 3, Some(ra))?;
        self.set_slot(t + 4, None)?;
        let k = self.intern_base_offset(t + 3)?;
        self.set_slot(t + 5, Some(k))?;
        let k = self.intern_word(ctx.update_return_pc().0 as Word, LitKind::Pc)?;
        self.set_slot(t + 6, Some(k))?;
        self.set_slot(t + 7, Some(ra))?;

        let delta = u16::try_from(t + 8).map_err(|_| AbortReason::StackOverflow)?;
        let framesize_op = u16::try_from(framesize).map_err(|_| AbortReason::StackOverflow)?;
        self.shift_frame(t + 8, framesize)?;
        self.emit_raw(IrOp::Frame, IrTy::Void, delta, framesize_op)?;
        self.clear_slots(0, framesize as i32)?;
        self.framedepth += 2;
        Ok(())
    }

    fn record_callt<C: ExecContext + ?Sized>(
        &mut self,
        a: u8,
        nargs: u16,
        ctx: &C,
    ) -> Result<(), RecordingError> {
        let info = ctx.info_of(ctx.slot(i32::from(a)));
        // Only exact calls are supported.
        let framesize = match ctx.info_kind(info) {
            InfoKind::Function { arity, framesize } if arity == u32::from(nargs) => framesize,
            _ => return Err(AbortReason::NotExactCall.into()),
        };
        let ra = self.get_slot(i32::from(a))?;
        self.guard_info(ra, info)?;
        self.set_slot(-1, Some(ra))?;
        // Invalidate the non-argument slots.
        self.slots.set_maxslot(framesize);
        self.clear_slots(i32::from(nargs), framesize as i32)?;
        let framesize = u16::try_from(framesize).map_err(|_| AbortReason::StackOverflow)?;
        self.emit_raw(IrOp::Frame, IrTy::Void, 0, framesize)?;
        Ok(())
    }

    /// Record a return to the caller's frame, which must have been entered in this trace.
    fn record_return<C: ExecContext + ?Sized>(&mut self, ctx: &C) -> Result<(), RecordingError> {
        if self.framedepth <= 0 {
            return Err(AbortReason::FrameUnderflow.into());
        }
        let return_pc = ctx.slot(-2);
        let basediff = ctx.caller_base_distance();
        // The caller's frame starts 3 slots below its callee's base.
        let maxslot = basediff.checked_sub(3).ok_or(AbortReason::FrameUnderflow)?;
        self.framedepth -= 1;

        // Protect against returning to a different caller than the one seen now.
        let r = self.get_slot(-2)?;
        self.guard_eq_kword(r, return_pc, LitKind::Pc)?;

        self.clear_slots(-3, self.slots.maxslot() as i32)?;
        let delta = i32::try_from(basediff).map_err(|_| AbortReason::FrameUnderflow)?;
        let basediff_op = u16::try_from(basediff).map_err(|_| AbortReason::FrameUnderflow)?;
        self.shift_frame(-delta, maxslot)?;
        self.emit_raw(IrOp::Ret, IrTy::Void, basediff_op, 0)?;
        Ok(())
    }

    /// Record the allocation of an object with the info table in slot `b` and the payload in
    /// `args` into slot `a`.
    fn record_alloc<C: ExecContext + ?Sized>(
        &mut self,
        a: u8,
        b: u8,
        args: &[u8],
        ctx: &C,
    ) -> Result<(), RecordingError> {
        let info = ctx.slot(i32::from(b));
        let rinfo = self.intern_word(info, LitKind::Info)?;
        // Ensure that `b` really contains the info table expected: usually this folds away.
        let rb = self.get_slot(i32::from(b))?;
        self.emit(IrOp::Eq, IrTy::Void, rb.raw(), rinfo.raw())?;

        let nfields = match ctx.info_kind(info) {
            InfoKind::Constructor { fields } => fields as usize,
            _ => args.len(),
        };
        let nfields_op = u16::try_from(nfields).map_err(|_| AbortReason::TraceTooLong)?;
        let rnew = self.emit_val(IrOp::New, IrTy::Clos, rinfo, nfields_op)?;
        let h = self.heap.new_heap_info(rnew, info, nfields)?;
        let h_op = u16::try_from(h.index()).map_err(|_| AbortReason::TraceTooLong)?;
        self.buf.ins_mut(rnew).set_op2(h_op);
        for (i, arg) in args.iter().enumerate() {
            let rc = self.get_slot(i32::from(*arg))?;
            let field = u16::try_from(i + 1).map_err(|_| AbortReason::TraceTooLong)?;
            let fref = self.emit_val(IrOp::FRef, IrTy::Ptr, rnew, field)?;
            self.emit(IrOp::FStore, IrTy::Void, fref.raw(), rc.raw())?;
            self.heap.set_field(h, i, rc)?;
        }
        self.set_slot(i32::from(a), Some(rnew))?;
        Ok(())
    }
}
