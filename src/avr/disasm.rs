// This module decodes an emitted word stream back into mnemonic text for diagnostics
// and the `.asm` artifact. Decoding is strict mask-and-match over the closed set of
// encodings the emitter produces: the two-word forms (lds/sts/jmp/call) are detected
// first and consume their second word, then the single-word patterns are tried from
// most to least specific. Any bit pattern that matches nothing is a fatal
// invented-instruction error; there is no silent fallback, because a decode slip here
// means the emitter or the fixup pass corrupted the stream.

//! Word-stream disassembler.

use std::fmt;
use std::fmt::Write as _;

use crate::avr::Reg;
use crate::core::{BackendError, BackendResult};

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvrInstr {
    Nop,
    Mov { d: Reg, r: Reg },
    Add { d: Reg, r: Reg },
    Sub { d: Reg, r: Reg },
    Cp { d: Reg, r: Reg },
    And { d: Reg, r: Reg },
    Or { d: Reg, r: Reg },
    Eor { d: Reg, r: Reg },
    Mul { d: Reg, r: Reg },
    Ldi { d: Reg, k: u8 },
    Subi { d: Reg, k: u8 },
    Andi { d: Reg, k: u8 },
    Ori { d: Reg, k: u8 },
    Cpi { d: Reg, k: u8 },
    Com { d: Reg },
    Neg { d: Reg },
    Lsr { d: Reg },
    Push { r: Reg },
    Pop { d: Reg },
    Ret,
    In { d: Reg, a: u8 },
    Out { a: u8, r: Reg },
    Breq { k: i8 },
    Brne { k: i8 },
    Brlt { k: i8 },
    Brge { k: i8 },
    LdZ { d: Reg },
    LddY { d: Reg, q: u8 },
    /// Two-word absolute load.
    Lds { d: Reg, addr: u16 },
    /// Two-word absolute store.
    Sts { addr: u16, r: Reg },
    /// Two-word absolute jump; `addr` is a word address.
    Jmp { addr: u32 },
    /// Two-word absolute call; `addr` is a word address.
    Call { addr: u32 },
}

impl AvrInstr {
    /// Number of 16-bit words this instruction occupies.
    pub fn width(&self) -> usize {
        match self {
            AvrInstr::Lds { .. } | AvrInstr::Sts { .. } | AvrInstr::Jmp { .. } | AvrInstr::Call { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for AvrInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvrInstr::Nop => write!(f, "nop"),
            AvrInstr::Mov { d, r } => write!(f, "mov {d}, {r}"),
            AvrInstr::Add { d, r } => write!(f, "add {d}, {r}"),
            AvrInstr::Sub { d, r } => write!(f, "sub {d}, {r}"),
            AvrInstr::Cp { d, r } => write!(f, "cp {d}, {r}"),
            AvrInstr::And { d, r } if d == r => write!(f, "tst {d}"),
            AvrInstr::And { d, r } => write!(f, "and {d}, {r}"),
            AvrInstr::Or { d, r } => write!(f, "or {d}, {r}"),
            AvrInstr::Eor { d, r } if d == r => write!(f, "clr {d}"),
            AvrInstr::Eor { d, r } => write!(f, "eor {d}, {r}"),
            AvrInstr::Mul { d, r } => write!(f, "mul {d}, {r}"),
            AvrInstr::Ldi { d, k } => write!(f, "ldi {d}, {k:#04x}"),
            AvrInstr::Subi { d, k } => write!(f, "subi {d}, {k:#04x}"),
            AvrInstr::Andi { d, k } => write!(f, "andi {d}, {k:#04x}"),
            AvrInstr::Ori { d, k } => write!(f, "ori {d}, {k:#04x}"),
            AvrInstr::Cpi { d, k } => write!(f, "cpi {d}, {k:#04x}"),
            AvrInstr::Com { d } => write!(f, "com {d}"),
            AvrInstr::Neg { d } => write!(f, "neg {d}"),
            AvrInstr::Lsr { d } => write!(f, "lsr {d}"),
            AvrInstr::Push { r } => write!(f, "push {r}"),
            AvrInstr::Pop { d } => write!(f, "pop {d}"),
            AvrInstr::Ret => write!(f, "ret"),
            AvrInstr::In { d, a } => write!(f, "in {d}, {a:#04x}"),
            AvrInstr::Out { a, r } => write!(f, "out {a:#04x}, {r}"),
            AvrInstr::Breq { k } => write!(f, "breq .{k:+}"),
            AvrInstr::Brne { k } => write!(f, "brne .{k:+}"),
            AvrInstr::Brlt { k } => write!(f, "brlt .{k:+}"),
            AvrInstr::Brge { k } => write!(f, "brge .{k:+}"),
            AvrInstr::LdZ { d } => write!(f, "ld {d}, Z"),
            AvrInstr::LddY { d, q } => write!(f, "ldd {d}, Y+{q}"),
            AvrInstr::Lds { d, addr } => write!(f, "lds {d}, {addr:#06x}"),
            AvrInstr::Sts { addr, r } => write!(f, "sts {addr:#06x}, {r}"),
            AvrInstr::Jmp { addr } => write!(f, "jmp {addr:#06x}"),
            AvrInstr::Call { addr } => write!(f, "call {addr:#06x}"),
        }
    }
}

fn field_d(w: u16) -> Reg {
    Reg(((w >> 4) & 0x1f) as u8)
}

fn field_r(w: u16) -> Reg {
    Reg((((w >> 5) & 0x10) | (w & 0x0f)) as u8)
}

fn field_k8(w: u16) -> u8 {
    (((w >> 4) & 0xf0) | (w & 0x0f)) as u8
}

fn field_d16(w: u16) -> Reg {
    Reg((16 + ((w >> 4) & 0x0f)) as u8)
}

fn field_io(w: u16) -> u8 {
    (((w >> 5) & 0x30) | (w & 0x0f)) as u8
}

/// Sign-extend the 7-bit branch offset.
fn field_k7(w: u16) -> i8 {
    let raw = ((w >> 3) & 0x7f) as u8;
    ((raw << 1) as i8) >> 1
}

fn field_q(w: u16) -> u8 {
    (((w >> 8) & 0x20) | ((w >> 7) & 0x18) | (w & 0x07)) as u8
}

fn field_addr22(w0: u16, w1: u16) -> u32 {
    let high = (u32::from(w0 & 0x01f0) >> 3) | u32::from(w0 & 0x0001);
    (high << 16) | u32::from(w1)
}

/// The mandatory second word of a two-word form; running off the end of the
/// stream means the stream itself is corrupt.
fn second_word(words: &[u16], idx: usize, w: u16) -> BackendResult<u16> {
    words
        .get(idx + 1)
        .copied()
        .ok_or(BackendError::InventedInstruction { word: w, index: idx })
}

/// Decode one instruction at word index `idx`.
///
/// Returns the instruction and the number of words consumed.
pub fn decode(words: &[u16], idx: usize) -> BackendResult<(AvrInstr, usize)> {
    let w = words[idx];

    if w == 0x0000 {
        return Ok((AvrInstr::Nop, 1));
    }
    if w == 0x9508 {
        return Ok((AvrInstr::Ret, 1));
    }

    // Two-word forms first; their second word can look like anything.
    match w & 0xfe0f {
        0x9000 => {
            let w1 = second_word(words, idx, w)?;
            return Ok((AvrInstr::Lds { d: field_d(w), addr: w1 }, 2));
        }
        0x9200 => {
            let w1 = second_word(words, idx, w)?;
            return Ok((AvrInstr::Sts { addr: w1, r: field_d(w) }, 2));
        }
        _ => {}
    }
    match w & 0xfe0e {
        0x940c => {
            let w1 = second_word(words, idx, w)?;
            return Ok((AvrInstr::Jmp { addr: field_addr22(w, w1) }, 2));
        }
        0x940e => {
            let w1 = second_word(words, idx, w)?;
            return Ok((AvrInstr::Call { addr: field_addr22(w, w1) }, 2));
        }
        _ => {}
    }

    let instr = match w & 0xfe0f {
        0x9400 => Some(AvrInstr::Com { d: field_d(w) }),
        0x9401 => Some(AvrInstr::Neg { d: field_d(w) }),
        0x9406 => Some(AvrInstr::Lsr { d: field_d(w) }),
        0x920f => Some(AvrInstr::Push { r: field_d(w) }),
        0x900f => Some(AvrInstr::Pop { d: field_d(w) }),
        0x8000 => Some(AvrInstr::LdZ { d: field_d(w) }),
        _ => None,
    };
    if let Some(instr) = instr {
        return Ok((instr, 1));
    }

    let instr = match w & 0xfc00 {
        0x0c00 => Some(AvrInstr::Add { d: field_d(w), r: field_r(w) }),
        0x1800 => Some(AvrInstr::Sub { d: field_d(w), r: field_r(w) }),
        0x1400 => Some(AvrInstr::Cp { d: field_d(w), r: field_r(w) }),
        0x2000 => Some(AvrInstr::And { d: field_d(w), r: field_r(w) }),
        0x2400 => Some(AvrInstr::Eor { d: field_d(w), r: field_r(w) }),
        0x2800 => Some(AvrInstr::Or { d: field_d(w), r: field_r(w) }),
        0x2c00 => Some(AvrInstr::Mov { d: field_d(w), r: field_r(w) }),
        0x9c00 => Some(AvrInstr::Mul { d: field_d(w), r: field_r(w) }),
        _ => None,
    };
    if let Some(instr) = instr {
        return Ok((instr, 1));
    }

    let instr = match w & 0xf000 {
        0x3000 => Some(AvrInstr::Cpi { d: field_d16(w), k: field_k8(w) }),
        0x5000 => Some(AvrInstr::Subi { d: field_d16(w), k: field_k8(w) }),
        0x6000 => Some(AvrInstr::Ori { d: field_d16(w), k: field_k8(w) }),
        0x7000 => Some(AvrInstr::Andi { d: field_d16(w), k: field_k8(w) }),
        0xe000 => Some(AvrInstr::Ldi { d: field_d16(w), k: field_k8(w) }),
        _ => None,
    };
    if let Some(instr) = instr {
        return Ok((instr, 1));
    }

    let instr = match w & 0xfc07 {
        0xf001 => Some(AvrInstr::Breq { k: field_k7(w) }),
        0xf401 => Some(AvrInstr::Brne { k: field_k7(w) }),
        0xf004 => Some(AvrInstr::Brlt { k: field_k7(w) }),
        0xf404 => Some(AvrInstr::Brge { k: field_k7(w) }),
        _ => None,
    };
    if let Some(instr) = instr {
        return Ok((instr, 1));
    }

    match w & 0xf800 {
        0xb000 => return Ok((AvrInstr::In { d: field_d(w), a: field_io(w) }, 1)),
        0xb800 => return Ok((AvrInstr::Out { a: field_io(w), r: field_d(w) }, 1)),
        _ => {}
    }

    // ldd through Y: 10q0 qq0d dddd 1qqq
    if w & 0xd208 == 0x8008 {
        return Ok((AvrInstr::LddY { d: field_d(w), q: field_q(w) }, 1));
    }

    Err(BackendError::InventedInstruction { word: w, index: idx })
}

/// Decode a whole stream into `(word address, instruction)` pairs.
pub fn decode_stream(words: &[u16]) -> BackendResult<Vec<(usize, AvrInstr)>> {
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < words.len() {
        let (instr, width) = decode(words, idx)?;
        out.push((idx, instr));
        idx += width;
    }
    Ok(out)
}

/// Render the `.asm` artifact: address, raw word(s), mnemonic.
pub fn disassemble(words: &[u16]) -> BackendResult<String> {
    let mut out = String::new();
    for (addr, instr) in decode_stream(words)? {
        let raw = match instr.width() {
            2 => format!("{:04x} {:04x}", words[addr], words[addr + 1]),
            _ => format!("{:04x}     ", words[addr]),
        };
        let _ = writeln!(out, "{addr:#06x}:  {raw}  {instr}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avr::encode;

    #[test]
    fn decodes_single_word_forms() {
        let words = [
            encode::ldi(Reg(16), 5),
            encode::mov(Reg(17), Reg(16)),
            encode::add(Reg(17), Reg(16)),
            encode::ret(),
        ];
        let decoded = decode_stream(&words).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].1, AvrInstr::Ldi { d: Reg(16), k: 5 });
        assert_eq!(decoded[1].1, AvrInstr::Mov { d: Reg(17), r: Reg(16) });
        assert_eq!(decoded[3].1, AvrInstr::Ret);
    }

    #[test]
    fn two_word_forms_consume_their_payload() {
        // The jump payload 0x9508 must not decode as a stray ret.
        let words = [encode::jmp(0x9508)[0], 0x9508, encode::ret()];
        let decoded = decode_stream(&words).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].1, AvrInstr::Jmp { addr: 0x9508 });
        assert_eq!(decoded[0].0, 0);
        assert_eq!(decoded[1].0, 2);
    }

    #[test]
    fn branch_offsets_decode_signed() {
        let (instr, _) = decode(&[encode::brne(-3)], 0).unwrap();
        assert_eq!(instr, AvrInstr::Brne { k: -3 });
    }

    #[test]
    fn invented_instruction_is_fatal() {
        // 0xff07 matches no encoding in the target subset.
        let result = decode_stream(&[encode::ret(), 0xff07]);
        assert!(matches!(
            result,
            Err(BackendError::InventedInstruction { word: 0xff07, index: 1 })
        ));
    }

    #[test]
    fn truncated_two_word_form_is_fatal() {
        let result = decode_stream(&[encode::call(0x10)[0]]);
        assert!(result.is_err());
    }

    #[test]
    fn alias_display_forms() {
        let (tst, _) = decode(&[encode::tst(Reg(16))], 0).unwrap();
        assert_eq!(tst.to_string(), "tst r16");
        let (clr, _) = decode(&[encode::clr(Reg(31))], 0).unwrap();
        assert_eq!(clr.to_string(), "clr r31");
    }
}
