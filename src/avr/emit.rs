// This module translates IR instructions into AVR machine words using the register
// assignment from the allocator. Binary operations materialize the left operand into
// the destination register and then apply the right operand in register or immediate
// form; short-circuit logical ops and relational comparisons synthesize fixed-shape
// test/compare-and-branch ladders that leave 0/1 in the destination (exploiting that
// ldi does not touch SREG); prologue/epilogue bracket functions with the callee-saved
// Y pair and the stack-pointer I/O registers; named variables live at bump-allocated
// SRAM addresses accessed with the two-word lds/sts forms. Jump and call targets are
// emitted as two-word instructions with a zeroed address word plus an explicit
// relocation record that the fixup pass patches once every label has a word address.
// Emitting a Label records the label's current word address in the label table; the
// designated bootstrap label `main` additionally emits one-time stack initialization.

//! IR-to-machine-word emission.

use hashbrown::HashMap;

use crate::avr::{
    encode, Reg, ARG_BASE, DATA_BASE, FRAME_HI, FRAME_LO, IO_SPH, IO_SPL, RAMEND, RET_REG,
    SCRATCH0, SCRATCH1, ZPTR_HI, ZPTR_LO,
};
use crate::core::{BackendError, BackendResult, CompilationSession};
use crate::ir::{IrInst, IrUnit, LabelRef, LabelTable, Opcode, Operand, TempId};
use crate::regalloc::RegisterAssignment;

/// A pending address patch: `words[word_index]` must become the absolute
/// word address of `target` once emission has placed every label.
#[derive(Debug, Clone)]
pub struct Reloc {
    pub word_index: usize,
    pub target: LabelRef,
}

/// The emitted word stream plus its unresolved relocations.
#[derive(Debug, Default)]
pub struct CodeImage {
    pub words: Vec<u16>,
    pub relocs: Vec<Reloc>,
}

/// Translate the whole unit. Label word addresses are recorded into the
/// unit's label table as emission passes them.
pub fn emit(
    unit: &mut IrUnit,
    regs: &RegisterAssignment,
    session: &mut CompilationSession,
) -> BackendResult<CodeImage> {
    let IrUnit { insts, labels } = unit;
    let mut emitter = Emitter {
        regs,
        words: Vec::new(),
        relocs: Vec::new(),
        data_addrs: HashMap::new(),
        next_data: DATA_BASE,
    };

    for inst in insts.iter() {
        emitter.emit_inst(inst, labels)?;
    }

    session.stats_mut().words_emitted = emitter.words.len();
    log::debug!(
        "emit: {} words, {} relocations, {} named variables",
        emitter.words.len(),
        emitter.relocs.len(),
        emitter.data_addrs.len()
    );
    Ok(CodeImage {
        words: emitter.words,
        relocs: emitter.relocs,
    })
}

struct Emitter<'a> {
    regs: &'a RegisterAssignment,
    words: Vec<u16>,
    relocs: Vec<Reloc>,
    /// SRAM byte address of each named variable, assigned on first use.
    data_addrs: HashMap<String, u16>,
    next_data: u16,
}

impl Emitter<'_> {
    fn word(&mut self, w: u16) {
        self.words.push(w);
    }

    fn words2(&mut self, pair: [u16; 2]) {
        self.words.extend_from_slice(&pair);
    }

    fn reg_of(&self, t: TempId) -> BackendResult<Reg> {
        self.regs
            .reg(t)
            .ok_or(BackendError::MissingAssignment { temp: t })
    }

    fn data_addr(&mut self, name: &str) -> u16 {
        if let Some(&addr) = self.data_addrs.get(name) {
            return addr;
        }
        let addr = self.next_data;
        self.next_data += 1;
        self.data_addrs.insert(name.to_string(), addr);
        addr
    }

    /// 8-bit payload of an integer immediate, if it fits the target width.
    fn imm_byte(op: &Operand) -> Option<u8> {
        let value = match op {
            Operand::Imm8(v) => return Some(*v as u8),
            Operand::Imm16(v) => i64::from(*v),
            Operand::Imm32(v) => i64::from(*v),
            Operand::Imm64(v) => *v,
            _ => return None,
        };
        (-128..=255).contains(&value).then_some(value as u8)
    }

    fn no_rule(op: Opcode, detail: impl Into<String>) -> BackendError {
        BackendError::NoEmissionRule {
            op,
            detail: detail.into(),
        }
    }

    /// Bring an operand's value into `dest` (move, load-immediate or
    /// absolute load).
    fn materialize(&mut self, dest: Reg, op: &Operand, ctx: Opcode) -> BackendResult<()> {
        match op {
            Operand::Temp(t) => {
                let r = self.reg_of(*t)?;
                if r != dest {
                    self.word(encode::mov(dest, r));
                }
                Ok(())
            }
            Operand::Var(name) => {
                let addr = self.data_addr(name);
                self.words2(encode::lds(dest, addr));
                Ok(())
            }
            Operand::Phi { temp, .. } => Err(BackendError::PhiUnresolved { temp: *temp }),
            _ => {
                let k = Self::imm_byte(op)
                    .ok_or_else(|| Self::no_rule(ctx, format!("cannot materialize operand {op}")))?;
                self.word(encode::ldi(dest, k));
                Ok(())
            }
        }
    }

    /// A register holding the operand's value, using `scratch` when the
    /// operand is not already register-resident.
    fn operand_to_reg(&mut self, op: &Operand, scratch: Reg, ctx: Opcode) -> BackendResult<Reg> {
        match op {
            Operand::Temp(t) => self.reg_of(*t),
            _ => {
                self.materialize(scratch, op, ctx)?;
                Ok(scratch)
            }
        }
    }

    fn dest_reg(&self, inst: &IrInst) -> BackendResult<Reg> {
        match &inst.dest {
            Operand::Temp(t) => self.reg_of(*t),
            other => Err(Self::no_rule(
                inst.op,
                format!("destination {other} is not a temporary"),
            )),
        }
    }

    /// Emit a two-word jump with a relocation for its address word.
    fn emit_jump(&mut self, target: &LabelRef) {
        let [w0, _] = encode::jmp(0);
        self.word(w0);
        self.relocs.push(Reloc {
            word_index: self.words.len(),
            target: target.clone(),
        });
        self.word(0);
    }

    fn emit_call(&mut self, target: &LabelRef) {
        let [w0, _] = encode::call(0);
        self.word(w0);
        self.relocs.push(Reloc {
            word_index: self.words.len(),
            target: target.clone(),
        });
        self.word(0);
    }

    fn branch_target(inst: &IrInst, op: &Operand) -> BackendResult<LabelRef> {
        op.as_label().cloned().ok_or_else(|| {
            Self::no_rule(inst.op, format!("branch operand {op} is not a label"))
        })
    }

    fn emit_inst(&mut self, inst: &IrInst, labels: &mut LabelTable) -> BackendResult<()> {
        match inst.op {
            Opcode::Nop => {
                self.word(encode::nop());
                Ok(())
            }
            Opcode::Label => self.emit_label(inst, labels),
            Opcode::Enter => {
                // Prologue: save the callee-saved Y pair, then capture the
                // frame pointer from the stack-pointer I/O registers.
                self.word(encode::push(FRAME_LO));
                self.word(encode::push(FRAME_HI));
                self.word(encode::in_io(FRAME_LO, IO_SPL));
                self.word(encode::in_io(FRAME_HI, IO_SPH));
                Ok(())
            }
            Opcode::Mov => self.emit_mov(inst),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => self.emit_binary(inst),
            Opcode::LogAnd | Opcode::LogOr => self.emit_logical(inst),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                self.emit_relational(inst)
            }
            Opcode::Neg | Opcode::Com | Opcode::Not => self.emit_unary(inst),
            Opcode::Deref => self.emit_deref(inst),
            Opcode::Jmp => {
                let target = Self::branch_target(inst, &inst.src1)?;
                self.emit_jump(&target);
                Ok(())
            }
            Opcode::Jz => {
                let target = Self::branch_target(inst, &inst.src2)?;
                let rt = self.operand_to_reg(&inst.src1, SCRATCH0, inst.op)?;
                self.word(encode::tst(rt));
                // Skip the two-word jump when the condition is non-zero.
                self.word(encode::brne(2));
                self.emit_jump(&target);
                Ok(())
            }
            Opcode::Push => {
                let r = self.operand_to_reg(&inst.src1, SCRATCH1, inst.op)?;
                self.word(encode::push(r));
                Ok(())
            }
            Opcode::Pop => {
                let rd = self.dest_reg(inst)?;
                self.word(encode::pop(rd));
                Ok(())
            }
            Opcode::Arg => {
                let rd = self.dest_reg(inst)?;
                let n = Self::imm_byte(&inst.src1).ok_or_else(|| {
                    Self::no_rule(inst.op, "argument number must be an immediate")
                })?;
                self.word(encode::ldd_y(rd, ARG_BASE + n));
                Ok(())
            }
            Opcode::Call => {
                let target = Self::branch_target(inst, &inst.src1)?;
                self.emit_call(&target);
                if let Operand::Temp(t) = inst.dest {
                    let rd = self.reg_of(t)?;
                    self.word(encode::mov(rd, RET_REG));
                }
                Ok(())
            }
            Opcode::Ret => {
                if !inst.src1.is_none() {
                    self.materialize(RET_REG, &inst.src1, inst.op)?;
                }
                // Epilogue: restore the Y pair in reverse push order.
                self.word(encode::pop(FRAME_HI));
                self.word(encode::pop(FRAME_LO));
                self.word(encode::ret());
                Ok(())
            }
        }
    }

    fn emit_label(&mut self, inst: &IrInst, labels: &mut LabelTable) -> BackendResult<()> {
        let re = inst
            .src1
            .as_label()
            .ok_or_else(|| Self::no_rule(Opcode::Label, "label instruction without a label"))?;
        labels.set_word_addr(re, self.words.len() as u16);

        // Program entry: one-time stack initialization before any code of
        // the function body runs.
        if matches!(re, LabelRef::Named(name) if name == "main") {
            self.word(encode::ldi(SCRATCH0, (RAMEND & 0xff) as u8));
            self.word(encode::out_io(IO_SPL, SCRATCH0));
            self.word(encode::ldi(SCRATCH0, (RAMEND >> 8) as u8));
            self.word(encode::out_io(IO_SPH, SCRATCH0));
        }
        Ok(())
    }

    fn emit_mov(&mut self, inst: &IrInst) -> BackendResult<()> {
        match &inst.dest {
            Operand::Temp(t) => {
                let rd = self.reg_of(*t)?;
                self.materialize(rd, &inst.src1, inst.op)
            }
            Operand::Var(name) => {
                let addr = self.data_addr(name);
                let r = self.operand_to_reg(&inst.src1, SCRATCH1, inst.op)?;
                self.words2(encode::sts(addr, r));
                Ok(())
            }
            other => Err(Self::no_rule(
                inst.op,
                format!("destination {other} is not assignable"),
            )),
        }
    }

    fn emit_binary(&mut self, inst: &IrInst) -> BackendResult<()> {
        let rd = self.dest_reg(inst)?;
        self.materialize(rd, &inst.src1, inst.op)?;

        // Immediate right-hand forms where the architecture has them; no
        // addi exists, so add-immediate is subtract of the negation.
        if let Some(k) = Self::imm_byte(&inst.src2) {
            match inst.op {
                Opcode::Add => self.word(encode::subi(rd, k.wrapping_neg())),
                Opcode::Sub => self.word(encode::subi(rd, k)),
                Opcode::And => self.word(encode::andi(rd, k)),
                Opcode::Or => self.word(encode::ori(rd, k)),
                Opcode::Xor => {
                    self.word(encode::ldi(SCRATCH1, k));
                    self.word(encode::eor(rd, SCRATCH1));
                }
                Opcode::Mul => {
                    self.word(encode::ldi(SCRATCH1, k));
                    self.word(encode::mul(rd, SCRATCH1));
                    self.word(encode::mov(rd, Reg(0)));
                }
                Opcode::Shl => {
                    for _ in 0..k {
                        self.word(encode::lsl(rd));
                    }
                }
                Opcode::Shr => {
                    for _ in 0..k {
                        self.word(encode::lsr(rd));
                    }
                }
                _ => unreachable!("non-binary opcode in emit_binary"),
            }
            return Ok(());
        }

        let rb = self.operand_to_reg(&inst.src2, SCRATCH1, inst.op)?;
        match inst.op {
            Opcode::Add => self.word(encode::add(rd, rb)),
            Opcode::Sub => self.word(encode::sub(rd, rb)),
            Opcode::And => self.word(encode::and(rd, rb)),
            Opcode::Or => self.word(encode::or(rd, rb)),
            Opcode::Xor => self.word(encode::eor(rd, rb)),
            Opcode::Mul => {
                // Hardware multiply leaves the low byte in r0.
                self.word(encode::mul(rd, rb));
                self.word(encode::mov(rd, Reg(0)));
            }
            Opcode::Shl | Opcode::Shr => {
                return Err(Self::no_rule(
                    inst.op,
                    "shift amount must be an immediate",
                ))
            }
            _ => unreachable!("non-binary opcode in emit_binary"),
        }
        Ok(())
    }

    /// `&&`/`||` as a short-circuit test ladder.
    ///
    /// The destination is written only after both operands are read, so the
    /// sequence is safe even when the destination register aliases one of
    /// them; `ldi` leaves SREG untouched.
    fn emit_logical(&mut self, inst: &IrInst) -> BackendResult<()> {
        let rd = self.dest_reg(inst)?;
        let ra = self.operand_to_reg(&inst.src1, SCRATCH0, inst.op)?;
        let rb = self.operand_to_reg(&inst.src2, SCRATCH1, inst.op)?;

        self.word(encode::tst(ra));
        self.word(match inst.op {
            // a == 0 decides && immediately; a != 0 decides ||.
            Opcode::LogAnd => encode::breq(1),
            Opcode::LogOr => encode::brne(1),
            _ => unreachable!(),
        });
        self.word(encode::tst(rb));
        self.word(encode::ldi(rd, 1));
        self.word(encode::brne(1));
        self.word(encode::ldi(rd, 0));
        Ok(())
    }

    /// Relational compare: flags first, then default-true with a
    /// conditional flip to false.
    fn emit_relational(&mut self, inst: &IrInst) -> BackendResult<()> {
        let rd = self.dest_reg(inst)?;

        // gt/le have no branch of their own; compare the swapped operands.
        let (lhs, rhs) = match inst.op {
            Opcode::Gt | Opcode::Le => (&inst.src2, &inst.src1),
            _ => (&inst.src1, &inst.src2),
        };

        match (lhs, Self::imm_byte(rhs)) {
            (Operand::Temp(t), Some(k)) => {
                let rl = self.reg_of(*t)?;
                self.word(encode::cpi(rl, k));
            }
            _ => {
                let rl = self.operand_to_reg(lhs, SCRATCH0, inst.op)?;
                let rr = self.operand_to_reg(rhs, SCRATCH1, inst.op)?;
                self.word(encode::cp(rl, rr));
            }
        }

        self.word(encode::ldi(rd, 1));
        self.word(match inst.op {
            Opcode::Eq => encode::breq(1),
            Opcode::Ne => encode::brne(1),
            Opcode::Lt | Opcode::Gt => encode::brlt(1),
            Opcode::Le | Opcode::Ge => encode::brge(1),
            _ => unreachable!(),
        });
        self.word(encode::ldi(rd, 0));
        Ok(())
    }

    fn emit_unary(&mut self, inst: &IrInst) -> BackendResult<()> {
        let rd = self.dest_reg(inst)?;
        self.materialize(rd, &inst.src1, inst.op)?;
        match inst.op {
            Opcode::Neg => self.word(encode::neg(rd)),
            Opcode::Com => self.word(encode::com(rd)),
            Opcode::Not => {
                self.word(encode::tst(rd));
                self.word(encode::ldi(rd, 1));
                self.word(encode::breq(1));
                self.word(encode::ldi(rd, 0));
            }
            _ => unreachable!("non-unary opcode in emit_unary"),
        }
        Ok(())
    }

    /// Rvalue dereference through the Z pair. There is no store-through-
    /// pointer counterpart.
    fn emit_deref(&mut self, inst: &IrInst) -> BackendResult<()> {
        let rd = self.dest_reg(inst)?;
        self.materialize(ZPTR_LO, &inst.src1, inst.op)?;
        self.word(encode::clr(ZPTR_HI));
        self.word(encode::ld_z(rd));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::ir::parse_unit;
    use crate::liveness;
    use crate::regalloc::{self, InterferenceGraph};

    fn compile(text: &str) -> (IrUnit, CodeImage) {
        let mut session = CompilationSession::new();
        let mut unit = parse_unit(text, &mut session).expect("parse failed");
        let cfg = Cfg::build(&mut unit, &mut session).expect("cfg failed");
        liveness::analyze(&mut unit, &cfg, &mut session);
        let graph = InterferenceGraph::build(&unit);
        let regs = regalloc::color(&graph, &mut session).expect("coloring failed");
        let image = emit(&mut unit, &regs, &mut session).expect("emission failed");
        (unit, image)
    }

    #[test]
    fn straight_line_arithmetic_words() {
        let (_, image) = compile("main:\n    enter\n    t0 = 5\n    t1 = 10\n    t2 = t0 + t1\n    ret t2\n");
        // bootstrap(4) + prologue(4) + ldi t0 + ldi t1 + mov/add for the sum
        // + mov into r24 + two pops + ret
        let expected = vec![
            encode::ldi(SCRATCH0, 0xff),
            encode::out_io(IO_SPL, SCRATCH0),
            encode::ldi(SCRATCH0, 0x08),
            encode::out_io(IO_SPH, SCRATCH0),
            encode::push(FRAME_LO),
            encode::push(FRAME_HI),
            encode::in_io(FRAME_LO, IO_SPL),
            encode::in_io(FRAME_HI, IO_SPH),
            encode::ldi(Reg(16), 5),
            encode::ldi(Reg(17), 10),
            encode::mov(Reg(16), Reg(16)), // elided: same register
            encode::add(Reg(16), Reg(17)),
            encode::mov(RET_REG, Reg(16)),
            encode::pop(FRAME_HI),
            encode::pop(FRAME_LO),
            encode::ret(),
        ];
        // t2 reuses t0's register, so the materializing mov is skipped.
        let expected: Vec<u16> = expected
            .into_iter()
            .filter(|&w| w != encode::mov(Reg(16), Reg(16)))
            .collect();
        assert_eq!(image.words, expected);
    }

    #[test]
    fn jump_emits_relocation_with_zero_placeholder() {
        let (_, image) = compile("main:\n    jmp L0\nL0:\n    ret\n");
        assert_eq!(image.relocs.len(), 1);
        let reloc = &image.relocs[0];
        assert_eq!(image.words[reloc.word_index], 0);
        assert_eq!(image.words[reloc.word_index - 1] & 0xfe0e, 0x940c);
    }

    #[test]
    fn label_addresses_recorded_during_emission() {
        let (unit, image) = compile("main:\n    t0 = 1\n    jmp L0\nL0:\n    ret t0\n");
        let addr = unit.labels.word_addr(&LabelRef::Id(0)).expect("L0 unplaced");
        // L0 sits right after the jump; everything before it is bootstrap +
        // ldi + the two-word jump.
        assert_eq!(addr as usize, image.words.len() - 4);
    }

    #[test]
    fn conditional_jump_skips_over_long_jump() {
        let (_, image) = compile("main:\n    t0 = 1\n    jz t0, L0\n    ret\nL0:\n    ret\n");
        let pos = image
            .words
            .iter()
            .position(|&w| w == encode::brne(2))
            .expect("no skip branch");
        assert_eq!(image.words[pos - 1], encode::tst(Reg(16)));
        assert_eq!(image.words[pos + 1] & 0xfe0e, 0x940c);
    }

    #[test]
    fn named_variable_round_trips_through_sram() {
        let (_, image) = compile("main:\n    t0 = 7\n    x = t0\n    t1 = x\n    ret t1\n");
        let sts = encode::sts(DATA_BASE, Reg(16));
        let pos = image
            .words
            .windows(2)
            .position(|w| w == sts)
            .expect("no sts to the variable address");
        // The later read loads the same address.
        let lds_first = encode::lds(Reg(16), DATA_BASE)[0] & 0xfe0f;
        assert!(image.words[pos + 2..]
            .windows(2)
            .any(|w| w[0] & 0xfe0f == lds_first && w[1] == DATA_BASE));
    }

    #[test]
    fn call_moves_result_out_of_return_register() {
        let (_, image) = compile(
            "main:\n    t0 = call f\n    ret t0\nf:\n    enter\n    t1 = 3\n    ret t1\n",
        );
        assert_eq!(image.relocs.len(), 1);
        let reloc = &image.relocs[0];
        assert_eq!(image.words[reloc.word_index - 1] & 0xfe0e, 0x940e);
        assert_eq!(image.words[reloc.word_index + 1], encode::mov(Reg(16), RET_REG));
    }

    #[test]
    fn phi_placeholder_is_fatal() {
        let mut session = CompilationSession::new();
        let mut unit = IrUnit::new();
        unit.push(IrInst::new(
            Opcode::Mov,
            Operand::Temp(0),
            Operand::Phi {
                temp: 1,
                origin: LabelRef::Id(0),
            },
            Operand::None,
        ));
        unit.push(IrInst::new(Opcode::Ret, Operand::None, Operand::None, Operand::None));
        let cfg = Cfg::build(&mut unit, &mut session).unwrap();
        liveness::analyze(&mut unit, &cfg, &mut session);
        let graph = InterferenceGraph::build(&unit);
        let regs = regalloc::color(&graph, &mut session).unwrap();
        let result = emit(&mut unit, &regs, &mut session);
        assert!(matches!(result, Err(BackendError::PhiUnresolved { temp: 1 })));
    }

    #[test]
    fn float_immediate_has_no_rule() {
        let mut session = CompilationSession::new();
        let mut unit = parse_unit("main:\n    t0 = 2.5\n    ret t0\n", &mut session).unwrap();
        let cfg = Cfg::build(&mut unit, &mut session).unwrap();
        liveness::analyze(&mut unit, &cfg, &mut session);
        let graph = InterferenceGraph::build(&unit);
        let regs = regalloc::color(&graph, &mut session).unwrap();
        let result = emit(&mut unit, &regs, &mut session);
        assert!(matches!(result, Err(BackendError::NoEmissionRule { .. })));
    }
}
