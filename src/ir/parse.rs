//! Parser for the textual three-address listing.
//!
//! Reads the same format [`IrUnit`]'s `Display` writes, so listings round-trip.
//! This is the front door used by the driver binary and the test suites; the
//! real front end hands the back end an [`IrUnit`] directly.
//!
//! ```text
//! ; comments start with a semicolon
//! main:
//!     enter
//!     t0 = 5
//!     t1 = 10
//!     t2 = t0 + t1
//!     ret t2
//! ```

use crate::core::{BackendError, BackendResult, CompilationSession};
use crate::ir::{IrInst, IrUnit, LabelRef, Opcode, Operand};

/// Parse a whole listing into an [`IrUnit`].
///
/// Temp and numeric label ids found in the text are reported to the session
/// so its counters stay ahead of them.
pub fn parse_unit(text: &str, session: &mut CompilationSession) -> BackendResult<IrUnit> {
    let mut unit = IrUnit::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = match raw.find(';') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let inst = parse_line(line, lineno + 1, session)?;
        unit.push(inst);
    }
    Ok(unit)
}

fn err(line: usize, reason: impl Into<String>) -> BackendError {
    BackendError::IrParse {
        line,
        reason: reason.into(),
    }
}

fn parse_line(line: &str, lineno: usize, session: &mut CompilationSession) -> BackendResult<IrInst> {
    // Label definition: `main:` / `L3:`
    if let Some(name) = line.strip_suffix(':') {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(err(lineno, format!("bad label definition '{line}'")));
        }
        let re = parse_label(name, session);
        return Ok(IrInst::new(
            Opcode::Label,
            Operand::None,
            Operand::Label(re),
            Operand::None,
        ));
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["nop"] => Ok(IrInst::new(Opcode::Nop, Operand::None, Operand::None, Operand::None)),
        ["enter"] => Ok(IrInst::new(Opcode::Enter, Operand::None, Operand::None, Operand::None)),
        ["jmp", target] => Ok(IrInst::new(
            Opcode::Jmp,
            Operand::None,
            Operand::Label(parse_label(target, session)),
            Operand::None,
        )),
        ["jz", cond, target] => {
            let cond = cond.trim_end_matches(',');
            Ok(IrInst::new(
                Opcode::Jz,
                Operand::None,
                parse_operand(cond, lineno, session)?,
                Operand::Label(parse_label(target, session)),
            ))
        }
        ["push", src] => Ok(IrInst::new(
            Opcode::Push,
            Operand::None,
            parse_operand(src, lineno, session)?,
            Operand::None,
        )),
        ["pop", dest] => Ok(IrInst::new(
            Opcode::Pop,
            parse_operand(dest, lineno, session)?,
            Operand::None,
            Operand::None,
        )),
        ["call", target] => Ok(IrInst::new(
            Opcode::Call,
            Operand::None,
            Operand::Label(parse_label(target, session)),
            Operand::None,
        )),
        ["ret"] => Ok(IrInst::new(Opcode::Ret, Operand::None, Operand::None, Operand::None)),
        ["ret", src] => Ok(IrInst::new(
            Opcode::Ret,
            Operand::None,
            parse_operand(src, lineno, session)?,
            Operand::None,
        )),
        [dest, "=", rhs @ ..] => parse_assign(dest, rhs, lineno, session),
        _ => Err(err(lineno, format!("unrecognized instruction '{line}'"))),
    }
}

fn parse_assign(
    dest: &str,
    rhs: &[&str],
    lineno: usize,
    session: &mut CompilationSession,
) -> BackendResult<IrInst> {
    let dest = parse_operand(dest, lineno, session)?;
    match rhs {
        ["arg", n] => Ok(IrInst::new(
            Opcode::Arg,
            dest,
            parse_operand(n, lineno, session)?,
            Operand::None,
        )),
        ["call", target] => Ok(IrInst::new(
            Opcode::Call,
            dest,
            Operand::Label(parse_label(target, session)),
            Operand::None,
        )),
        [a, op, b] => {
            let opcode = binop_opcode(op).ok_or_else(|| err(lineno, format!("unknown operator '{op}'")))?;
            Ok(IrInst::new(
                opcode,
                dest,
                parse_operand(a, lineno, session)?,
                parse_operand(b, lineno, session)?,
            ))
        }
        [single] => {
            // Unary forms bind tighter than a negative literal: `-5` is an
            // immediate, `-t0` a negation.
            for (prefix, opcode) in [
                ('-', Opcode::Neg),
                ('~', Opcode::Com),
                ('!', Opcode::Not),
                ('*', Opcode::Deref),
            ] {
                if let Some(rest) = single.strip_prefix(prefix) {
                    if !rest.is_empty() && !rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                        return Ok(IrInst::new(
                            opcode,
                            dest,
                            parse_operand(rest, lineno, session)?,
                            Operand::None,
                        ));
                    }
                }
            }
            Ok(IrInst::new(
                Opcode::Mov,
                dest,
                parse_operand(single, lineno, session)?,
                Operand::None,
            ))
        }
        _ => Err(err(lineno, format!("unrecognized right-hand side '{}'", rhs.join(" ")))),
    }
}

fn binop_opcode(symbol: &str) -> Option<Opcode> {
    Some(match symbol {
        "+" => Opcode::Add,
        "-" => Opcode::Sub,
        "*" => Opcode::Mul,
        "&" => Opcode::And,
        "|" => Opcode::Or,
        "^" => Opcode::Xor,
        "<<" => Opcode::Shl,
        ">>" => Opcode::Shr,
        "&&" => Opcode::LogAnd,
        "||" => Opcode::LogOr,
        "==" => Opcode::Eq,
        "!=" => Opcode::Ne,
        "<" => Opcode::Lt,
        "<=" => Opcode::Le,
        ">" => Opcode::Gt,
        ">=" => Opcode::Ge,
        _ => return None,
    })
}

fn parse_label(token: &str, session: &mut CompilationSession) -> LabelRef {
    if let Some(digits) = token.strip_prefix('L') {
        if let Ok(id) = digits.parse::<u32>() {
            session.observe_label(id);
            return LabelRef::Id(id);
        }
    }
    LabelRef::Named(token.to_string())
}

fn parse_operand(token: &str, lineno: usize, session: &mut CompilationSession) -> BackendResult<Operand> {
    if let Some(digits) = token.strip_prefix('t') {
        if let Ok(id) = digits.parse::<u32>() {
            session.observe_temp(id);
            return Ok(Operand::Temp(id));
        }
    }
    if token.starts_with(|c: char| c.is_ascii_digit()) || token.starts_with('-') {
        if token.contains('.') {
            return token
                .parse::<f64>()
                .map(Operand::ImmF64)
                .map_err(|_| err(lineno, format!("bad float literal '{token}'")));
        }
        let value = token
            .parse::<i64>()
            .map_err(|_| err(lineno, format!("bad integer literal '{token}'")))?;
        return Ok(narrow_imm(value));
    }
    if token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !token.is_empty() {
        if let Some(digits) = token.strip_prefix('L') {
            if digits.chars().all(|c| c.is_ascii_digit()) && !digits.is_empty() {
                return Ok(Operand::Label(parse_label(token, session)));
            }
        }
        return Ok(Operand::Var(token.to_string()));
    }
    Err(err(lineno, format!("bad operand '{token}'")))
}

/// Pick the narrowest immediate variant that holds the value.
fn narrow_imm(value: i64) -> Operand {
    if let Ok(v) = i8::try_from(value) {
        Operand::Imm8(v)
    } else if let Ok(v) = i16::try_from(value) {
        Operand::Imm16(v)
    } else if let Ok(v) = i32::try_from(value) {
        Operand::Imm32(v)
    } else {
        Operand::Imm64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> IrUnit {
        let mut session = CompilationSession::new();
        parse_unit(text, &mut session).expect("parse failed")
    }

    #[test]
    fn parses_straight_line_unit() {
        let unit = parse(
            "main:\n    enter\n    t0 = 5\n    t1 = 10\n    t2 = t0 + t1\n    ret t2\n",
        );
        assert_eq!(unit.insts.len(), 6);
        assert_eq!(unit.insts[0].op, Opcode::Label);
        assert_eq!(unit.insts[4].op, Opcode::Add);
        assert_eq!(unit.insts[4].src2, Operand::Temp(1));
        assert_eq!(unit.labels.ir_index(&LabelRef::Named("main".into())), Some(0));
    }

    #[test]
    fn distinguishes_negative_literal_from_negation() {
        let unit = parse("    t0 = -5\n    t1 = -t0\n");
        assert_eq!(unit.insts[0].op, Opcode::Mov);
        assert_eq!(unit.insts[0].src1, Operand::Imm8(-5));
        assert_eq!(unit.insts[1].op, Opcode::Neg);
    }

    #[test]
    fn round_trips_with_display() {
        let text = "main:\n    enter\n    t0 = arg 0\n    jz t0, L1\n    t1 = t0 * 3\n    jmp L2\nL1:\n    t1 = 0\nL2:\n    ret t1\n";
        let unit = parse(text);
        assert_eq!(unit.to_string(), text);
    }

    #[test]
    fn session_counters_track_parsed_ids() {
        let mut session = CompilationSession::new();
        parse_unit("    t7 = 1\n    jmp L4\nL4:\n    ret\n", &mut session).unwrap();
        assert_eq!(session.fresh_temp(), 8);
        assert_eq!(session.fresh_label(), 5);
    }

    #[test]
    fn rejects_garbage() {
        let mut session = CompilationSession::new();
        let result = parse_unit("    t0 += 1\n", &mut session);
        assert!(matches!(result, Err(BackendError::IrParse { line: 1, .. })));
    }
}
