//! Peephole folding of fold candidates.

use super::FoldResult;
use crate::{
    errors::RecordingError,
    ir::{IRRef, IrIns, IrOp, IrTy, LitKind},
    jitstate::JitState,
};

impl JitState {
    /// Try to fold `ins` using only local knowledge.
    pub(super) fn fold(&mut self, ins: &IrIns) -> Result<FoldResult, RecordingError> {
        match ins.op() {
            IrOp::Eq if ins.op1() == ins.op2() => {
                self.log_opt(|| format!("trivial guard eq {}", ins.op1_ref()));
                return Ok(FoldResult::NoOp);
            }
            op if op.is_comparison() => {
                if let (Some(x), Some(y)) = (self.kint(ins.op1_ref()), self.kint(ins.op2_ref())) {
                    if op.eval_comparison(i64::from(x), i64::from(y)) {
                        self.log_opt(|| format!("constant guard {} {x} {y}", op.mnemonic()));
                        return Ok(FoldResult::NoOp);
                    }
                }
            }
            IrOp::ILoad => {
                let op1 = ins.op1_ref();
                if op1.is_const() {
                    let k = self.buf.ins(op1);
                    if k.op() == IrOp::KWord && k.ty() == IrTy::Clos {
                        let closure = self.buf.kword(k.op1());
                        if let Some(info) = self.static_closure_info(closure) {
                            self.log_opt(|| format!("iload of static closure {closure:#x}"));
                            return Ok(FoldResult::Ref(self.intern_word(info, LitKind::Info)?));
                        }
                    }
                } else {
                    let left = self.buf.ins(op1);
                    if left.op() == IrOp::New {
                        self.log_opt(|| format!("iload of new closure {op1}"));
                        return Ok(FoldResult::Ref(left.op1_ref()));
                    }
                }
            }
            IrOp::SLoad => {
                if let Some(r) = self.slots.get_abs(usize::from(ins.op1())) {
                    return Ok(FoldResult::Ref(r));
                }
            }
            IrOp::Add | IrOp::Sub | IrOp::Mul => return self.fold_arith(ins),
            _ => (),
        }
        Ok(FoldResult::Emit)
    }

    /// The value of `r` if it is an integer constant.
    fn kint(&self, r: IRRef) -> Option<i32> {
        if !r.is_const() {
            return None;
        }
        let k = self.buf.ins(r);
        (k.op() == IrOp::KInt).then(|| k.lit_i32())
    }

    /// Fold integer arithmetic on constants and the trivial algebraic identities.
    fn fold_arith(&mut self, ins: &IrIns) -> Result<FoldResult, RecordingError> {
        let op = ins.op();
        let (op1, op2) = (ins.op1_ref(), ins.op2_ref());
        let (x, y) = (self.kint(op1), self.kint(op2));
        if let (Some(x), Some(y)) = (x, y) {
            let v = match op {
                IrOp::Add => x.wrapping_add(y),
                IrOp::Sub => x.wrapping_sub(y),
                IrOp::Mul => x.wrapping_mul(y),
                _ => unreachable!(),
            };
            self.log_opt(|| format!("constant {} {x} {y} = {v}", op.mnemonic()));
            return Ok(FoldResult::Ref(self.intern_int(v)?));
        }
        let r = match (op, x, y) {
            (IrOp::Add, _, Some(0)) | (IrOp::Sub, _, Some(0)) | (IrOp::Mul, _, Some(1)) => op1,
            (IrOp::Add, Some(0), _) | (IrOp::Mul, Some(1), _) => op2,
            _ => return Ok(FoldResult::Emit),
        };
        self.log_opt(|| format!("identity {} {op1} {op2}", op.mnemonic()));
        Ok(FoldResult::Ref(r))
    }
}

#[cfg(test)]
mod test {
    use super::super::test::jit;
    use crate::{
        ir::{IrOp, IrTy, LitKind},
        opt::OptFlags,
    };

    #[test]
    fn trivial_guards() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let before = j.buf.nins();
        assert_eq!(j.emit(IrOp::Eq, IrTy::Void, x.raw(), x.raw()).unwrap(), None);
        let k1 = j.intern_int(1).unwrap();
        let k2 = j.intern_int(2).unwrap();
        assert_eq!(j.emit(IrOp::Lt, IrTy::Void, k1.raw(), k2.raw()).unwrap(), None);
        assert_eq!(j.buf.nins(), before);
        assert!(j.snaps.is_empty());
        // A constant guard that fails is kept: the trace will always exit here.
        assert!(j
            .emit(IrOp::Gt, IrTy::Void, k1.raw(), k2.raw())
            .unwrap()
            .is_some());
        assert_eq!(j.counts.folded, 2);

        let mut j = jit(OptFlags::all().minus_fold());
        let x = j.get_slot(0).unwrap();
        assert!(j
            .emit(IrOp::Eq, IrTy::Void, x.raw(), x.raw())
            .unwrap()
            .is_some());
    }

    #[test]
    fn arithmetic() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let k0 = j.intern_int(0).unwrap();
        let k1 = j.intern_int(1).unwrap();
        let k7 = j.intern_int(7).unwrap();
        let kmax = j.intern_int(i32::MAX).unwrap();
        let r = j.emit_val(IrOp::Add, IrTy::I32, k7, k7.raw()).unwrap();
        assert_eq!(j.buf.ins(r).lit_i32(), 14);
        let r = j.emit_val(IrOp::Add, IrTy::I32, kmax, k1.raw()).unwrap();
        assert_eq!(j.buf.ins(r).lit_i32(), i32::MIN);
        let r = j.emit_val(IrOp::Sub, IrTy::I32, k1, k7.raw()).unwrap();
        assert_eq!(r, j.intern_int(-6).unwrap());
        assert_eq!(j.emit_val(IrOp::Add, IrTy::I32, x, k0.raw()).unwrap(), x);
        assert_eq!(j.emit_val(IrOp::Add, IrTy::I32, k0, x.raw()).unwrap(), x);
        assert_eq!(j.emit_val(IrOp::Sub, IrTy::I32, x, k0.raw()).unwrap(), x);
        assert_eq!(j.emit_val(IrOp::Mul, IrTy::I32, k1, x.raw()).unwrap(), x);
        let r = j.emit_val(IrOp::Sub, IrTy::I32, k0, x.raw()).unwrap();
        assert_eq!(j.buf.ins(r).op(), IrOp::Sub);
    }

    #[test]
    fn info_loads() {
        let mut j = jit(OptFlags::all());
        let kc = j.intern_word(0x2000, LitKind::Closure).unwrap();
        // Not a registered static closure: a real load.
        let r = j.emit_val(IrOp::ILoad, IrTy::Info, kc, 0).unwrap();
        assert_eq!(j.buf.ins(r).op(), IrOp::ILoad);
        j.register_static_closure(0x2000, 0x3000);
        let r = j.emit_val(IrOp::ILoad, IrTy::Info, kc, 0).unwrap();
        assert_eq!(r, j.intern_word(0x3000, LitKind::Info).unwrap());

        let ki = j.intern_word(0x4000, LitKind::Info).unwrap();
        let n = j.emit_val(IrOp::New, IrTy::Clos, ki, 0).unwrap();
        assert_eq!(j.emit_val(IrOp::ILoad, IrTy::Info, n, 0).unwrap(), ki);
    }
}
