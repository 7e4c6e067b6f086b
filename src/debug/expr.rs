/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The trigger condition expression language.
//!
//! A condition is a chain of comparisons over CPU registers, flags, memory
//! references and literals, combined left-to-right with `&` and `|`:
//!
//! ```text
//! HL == 1234h & (IX+2) != 0 | NZ
//! ```
//!
//! Literals are decimal when they consist of digits only, and hexadecimal
//! with an `h` suffix or when they contain the digits A..F. `val` and
//! `port` refer to the data and port of the access being checked, `ts` to
//! the frame T-state counter.
use core::fmt;
use core::iter::Peekable;
use core::str::Chars;

use z80emu::{Cpu, CpuFlags, Prefix, Reg8, StkReg16};

use crate::clock::FTs;
use crate::memory::BankedMemory;

/// A CPU register readable by a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegName {
    A, F, B, C, D, E, H, L,
    AF, BC, DE, HL, IX, IY, SP, PC, I, R,
    AltA, AltF, AltAF, AltBC, AltDE, AltHL,
}

/// An indirect memory operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemRef {
    Bc,
    De,
    Hl,
    Sp,
    Ix(i8),
    Iy(i8),
    Addr(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(RegName),
    Mem(MemRef),
    Lit(u16),
    Val,
    Port,
    TStates,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// One of the Z80 conditional flags usable as a standalone term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagCond {
    Z, Nz, C, Nc, P, M, Pe, Po,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Term {
    Cmp(Operand, CmpOp, Operand),
    Flag(FlagCond),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogicOp {
    And,
    Or,
}

/// A parsed trigger condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    first: Term,
    rest: Vec<(LogicOp, Term)>,
}

/// An error reported when a condition fails to parse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CondParseError {
    pub message: String,
}

impl std::error::Error for CondParseError {}

impl fmt::Display for CondParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition parse error: {}", self.message)
    }
}

fn err<T>(message: impl Into<String>) -> Result<T, CondParseError> {
    Err(CondParseError { message: message.into() })
}

/// The state a condition is evaluated against.
///
/// `val` and `port` are present only for the access kinds that carry them;
/// a condition referring to an absent one evaluates to false.
pub struct EvalContext<'a> {
    pub memory: &'a BankedMemory,
    pub ts: FTs,
    pub val: Option<u8>,
    pub port: Option<u16>,
}

impl Condition {
    /// Parses a condition, rejecting it on any syntax error.
    pub fn parse(source: &str) -> Result<Condition, CondParseError> {
        let mut parser = Parser { chars: source.chars().peekable() };
        let first = parser.parse_term()?;
        let mut rest = Vec::new();
        loop {
            parser.skip_ws();
            match parser.chars.next() {
                Some('&') => rest.push((LogicOp::And, parser.parse_term()?)),
                Some('|') => rest.push((LogicOp::Or, parser.parse_term()?)),
                Some(c) => return err(format!("unexpected character: {}", c)),
                None => break,
            }
        }
        Ok(Condition { first, rest })
    }

    /// Evaluates the condition; `None` signals an evaluation failure which
    /// the trigger engine treats as false.
    pub fn evaluate<C: Cpu>(&self, cpu: &C, ctx: &EvalContext<'_>) -> Option<bool> {
        let mut acc = eval_term(&self.first, cpu, ctx)?;
        for (op, term) in self.rest.iter() {
            let rhs = eval_term(term, cpu, ctx)?;
            acc = match op {
                LogicOp::And => acc && rhs,
                LogicOp::Or => acc || rhs,
            };
        }
        Some(acc)
    }
}

fn eval_term<C: Cpu>(term: &Term, cpu: &C, ctx: &EvalContext<'_>) -> Option<bool> {
    match term {
        Term::Flag(flag) => {
            let flags = cpu.get_flags();
            Some(match flag {
                FlagCond::Z => flags.contains(CpuFlags::Z),
                FlagCond::Nz => !flags.contains(CpuFlags::Z),
                FlagCond::C => flags.contains(CpuFlags::C),
                FlagCond::Nc => !flags.contains(CpuFlags::C),
                FlagCond::M => flags.contains(CpuFlags::S),
                FlagCond::P => !flags.contains(CpuFlags::S),
                FlagCond::Pe => flags.contains(CpuFlags::PV),
                FlagCond::Po => !flags.contains(CpuFlags::PV),
            })
        }
        Term::Cmp(lhs, op, rhs) => {
            let lhs = eval_operand(lhs, cpu, ctx)?;
            let rhs = eval_operand(rhs, cpu, ctx)?;
            Some(match op {
                CmpOp::Eq => lhs == rhs,
                CmpOp::Ne => lhs != rhs,
                CmpOp::Lt => lhs < rhs,
                CmpOp::Gt => lhs > rhs,
                CmpOp::Le => lhs <= rhs,
                CmpOp::Ge => lhs >= rhs,
            })
        }
    }
}

fn eval_operand<C: Cpu>(op: &Operand, cpu: &C, ctx: &EvalContext<'_>) -> Option<i64> {
    Some(match op {
        Operand::Lit(val) => i64::from(*val),
        Operand::Val => i64::from(ctx.val?),
        Operand::Port => i64::from(ctx.port?),
        Operand::TStates => i64::from(ctx.ts),
        Operand::Reg(reg) => i64::from(eval_register(*reg, cpu)),
        Operand::Mem(mem) => {
            let addr = match mem {
                MemRef::Bc => cpu.get_reg16(StkReg16::BC),
                MemRef::De => cpu.get_reg16(StkReg16::DE),
                MemRef::Hl => cpu.get_reg16(StkReg16::HL),
                MemRef::Sp => cpu.get_sp(),
                MemRef::Ix(offset) => {
                    cpu.get_index16(Prefix::Xdd).wrapping_add(*offset as u16)
                }
                MemRef::Iy(offset) => {
                    cpu.get_index16(Prefix::Yfd).wrapping_add(*offset as u16)
                }
                MemRef::Addr(addr) => *addr,
            };
            i64::from(ctx.memory.read(addr))
        }
    })
}

fn eval_register<C: Cpu>(reg: RegName, cpu: &C) -> u16 {
    use RegName::*;
    match reg {
        A => cpu.get_acc().into(),
        F => cpu.get_flags().bits().into(),
        B => cpu.get_reg(Reg8::B, None).into(),
        C => cpu.get_reg(Reg8::C, None).into(),
        D => cpu.get_reg(Reg8::D, None).into(),
        E => cpu.get_reg(Reg8::E, None).into(),
        H => cpu.get_reg(Reg8::H, None).into(),
        L => cpu.get_reg(Reg8::L, None).into(),
        AF => u16::from(cpu.get_acc()) << 8 | u16::from(cpu.get_flags().bits()),
        BC => cpu.get_reg16(StkReg16::BC),
        DE => cpu.get_reg16(StkReg16::DE),
        HL => cpu.get_reg16(StkReg16::HL),
        IX => cpu.get_index16(Prefix::Xdd),
        IY => cpu.get_index16(Prefix::Yfd),
        SP => cpu.get_sp(),
        PC => cpu.get_pc(),
        I => cpu.get_i().into(),
        R => cpu.get_r().into(),
        AltA => cpu.get_alt_reg2(StkReg16::AF).0.into(),
        AltF => cpu.get_alt_reg2(StkReg16::AF).1.into(),
        AltAF => {
            let (a, f) = cpu.get_alt_reg2(StkReg16::AF);
            u16::from(a) << 8 | u16::from(f)
        }
        AltBC => cpu.get_alt_reg16(StkReg16::BC),
        AltDE => cpu.get_alt_reg16(StkReg16::DE),
        AltHL => cpu.get_alt_reg16(StkReg16::HL),
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_term(&mut self) -> Result<Term, CondParseError> {
        self.skip_ws();
        let lhs = self.parse_operand()?;
        self.skip_ws();
        let op = match self.peek_cmp_op() {
            Some(op) => op,
            None => {
                return match lhs {
                    // a lone flag name is a complete term
                    ParsedOperand::Flag(flag) => Ok(Term::Flag(flag)),
                    // a lone C means the carry flag
                    ParsedOperand::Op(Operand::Reg(RegName::C)) => {
                        Ok(Term::Flag(FlagCond::C))
                    }
                    _ => err("expected a comparison operator"),
                };
            }
        };
        let rhs = self.parse_operand()?;
        match (lhs, rhs) {
            (ParsedOperand::Op(lhs), ParsedOperand::Op(rhs)) => {
                Ok(Term::Cmp(lhs, op, rhs))
            }
            _ => err("a flag cannot be compared"),
        }
    }

    fn peek_cmp_op(&mut self) -> Option<CmpOp> {
        let op = match self.chars.peek() {
            Some('=') => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                }
                CmpOp::Eq
            }
            Some('!') => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                }
                CmpOp::Ne
            }
            Some('<') => {
                self.chars.next();
                match self.chars.peek() {
                    Some('>') => {
                        self.chars.next();
                        CmpOp::Ne
                    }
                    Some('=') => {
                        self.chars.next();
                        CmpOp::Le
                    }
                    _ => CmpOp::Lt,
                }
            }
            Some('>') => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    CmpOp::Ge
                }
                else {
                    CmpOp::Gt
                }
            }
            _ => return None,
        };
        Some(op)
    }

    fn parse_operand(&mut self) -> Result<ParsedOperand, CondParseError> {
        self.skip_ws();
        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            return self.parse_memref().map(ParsedOperand::Op);
        }
        let word = self.take_word()?;
        classify_word(&word)
    }

    fn parse_memref(&mut self) -> Result<Operand, CondParseError> {
        self.skip_ws();
        let word = self.take_word()?;
        let upper = word.to_ascii_uppercase();
        let mem = match upper.as_str() {
            "BC" => MemRef::Bc,
            "DE" => MemRef::De,
            "HL" => MemRef::Hl,
            "SP" => MemRef::Sp,
            "IX" | "IY" => {
                self.skip_ws();
                let offset = match self.chars.peek() {
                    Some('+') | Some('-') => {
                        let negative = self.chars.next() == Some('-');
                        self.skip_ws();
                        let num = self.take_word()?;
                        let num = parse_number(&num)
                            .ok_or_else(|| CondParseError {
                                message: format!("bad index offset: {}", num)
                            })?;
                        if num > if negative { 128 } else { 127 } {
                            return err("index offset out of range");
                        }
                        if negative { -(num as i16) as i8 } else { num as i8 }
                    }
                    _ => 0,
                };
                if upper == "IX" { MemRef::Ix(offset) } else { MemRef::Iy(offset) }
            }
            _ => match parse_number(&word) {
                Some(addr) => MemRef::Addr(addr),
                None => return err(format!("bad memory reference: ({})", word)),
            },
        };
        self.skip_ws();
        if self.chars.next() != Some(')') {
            return err("expected `)`");
        }
        Ok(Operand::Mem(mem))
    }

    fn take_word(&mut self) -> Result<String, CondParseError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '\'' {
                word.push(c);
                self.chars.next();
            }
            else {
                break;
            }
        }
        if word.is_empty() {
            return err("expected an operand");
        }
        Ok(word)
    }
}

/// An operand or a lone flag name, resolved by the term parser.
#[derive(Clone, Copy, Debug)]
enum ParsedOperand {
    Op(Operand),
    Flag(FlagCond),
}

fn classify_word(word: &str) -> Result<ParsedOperand, CondParseError> {
    use RegName::*;
    let upper = word.to_ascii_uppercase();
    let reg = match upper.as_str() {
        "A" => Some(A), "F" => Some(F), "B" => Some(B), "C" => Some(C),
        "D" => Some(D), "E" => Some(E), "H" => Some(H), "L" => Some(L),
        "AF" => Some(AF), "BC" => Some(BC), "DE" => Some(DE), "HL" => Some(HL),
        "IX" => Some(IX), "IY" => Some(IY), "SP" => Some(SP), "PC" => Some(PC),
        "I" => Some(I), "R" => Some(R),
        "A'" => Some(AltA), "F'" => Some(AltF), "AF'" => Some(AltAF),
        "BC'" => Some(AltBC), "DE'" => Some(AltDE), "HL'" => Some(AltHL),
        _ => None,
    };
    if let Some(reg) = reg {
        return Ok(ParsedOperand::Op(Operand::Reg(reg)));
    }
    let flag = match upper.as_str() {
        "Z" => Some(FlagCond::Z),
        "NZ" => Some(FlagCond::Nz),
        "NC" => Some(FlagCond::Nc),
        "M" => Some(FlagCond::M),
        "P" => Some(FlagCond::P),
        "PE" => Some(FlagCond::Pe),
        "PO" => Some(FlagCond::Po),
        _ => None,
    };
    if let Some(flag) = flag {
        return Ok(ParsedOperand::Flag(flag));
    }
    match upper.as_str() {
        "VAL" => return Ok(ParsedOperand::Op(Operand::Val)),
        "PORT" => return Ok(ParsedOperand::Op(Operand::Port)),
        "TS" => return Ok(ParsedOperand::Op(Operand::TStates)),
        _ => {}
    }
    match parse_number(word) {
        Some(num) => Ok(ParsedOperand::Op(Operand::Lit(num))),
        None => err(format!("unrecognized operand: {}", word)),
    }
}

/// Parses a literal: decimal when all digits, hex with an `h` suffix or
/// when a hex digit A..F appears.
fn parse_number(word: &str) -> Option<u16> {
    let upper = word.to_ascii_uppercase();
    let (digits, hex) = match upper.strip_suffix('H') {
        Some(digits) => (digits, true),
        None => (upper.as_str(), upper.bytes().any(|b| (b'A'..=b'F').contains(&b))),
    };
    if digits.is_empty() {
        return None;
    }
    if hex {
        u16::from_str_radix(digits, 16).ok()
    }
    else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z80emu::Z80NMOS;
    use crate::chip::profile::MachineModel;

    fn context(memory: &BankedMemory) -> EvalContext<'_> {
        EvalContext { memory, ts: 1000, val: Some(0x42), port: Some(0x7FFD) }
    }

    fn assert_cond<F: FnOnce(&mut Z80NMOS, &mut BankedMemory)>(
            source: &str,
            setup: F,
            expect: bool,
        )
    {
        let mut cpu = Z80NMOS::default();
        cpu.reset();
        let mut memory = BankedMemory::new(MachineModel::Spectrum48.profile(), false);
        setup(&mut cpu, &mut memory);
        let cond = Condition::parse(source).unwrap();
        let ctx = context(&memory);
        assert_eq!(cond.evaluate(&cpu, &ctx), Some(expect), "{}", source);
    }

    #[test]
    fn literal_forms() {
        assert_eq!(parse_number("1234"), Some(1234));
        assert_eq!(parse_number("1234h"), Some(0x1234));
        assert_eq!(parse_number("0AF"), Some(0xAF));
        assert_eq!(parse_number("FFFFh"), Some(0xFFFF));
        assert_eq!(parse_number("12G3"), None);
    }

    #[test]
    fn register_comparisons() {
        assert_cond("HL == 1234", |cpu, _| {
            cpu.set_reg16(StkReg16::HL, 1234);
        }, true);
        assert_cond("HL == 1234h", |cpu, _| {
            cpu.set_reg16(StkReg16::HL, 0x1234);
        }, true);
        assert_cond("A <> 5", |cpu, _| cpu.set_acc(5), false);
        assert_cond("BC >= 100 & BC <= 200", |cpu, _| {
            cpu.set_reg16(StkReg16::BC, 150);
        }, true);
        assert_cond("SP < 8000h | PC == 0", |cpu, _| {
            cpu.set_sp(0x9000);
        }, true);
    }

    #[test]
    fn shadow_registers_read_the_alternate_set() {
        let mut cpu = Z80NMOS::default();
        cpu.reset();
        cpu.set_reg16(StkReg16::HL, 0x1111);
        cpu.exx();
        cpu.set_reg16(StkReg16::HL, 0x2222);
        let memory = BankedMemory::new(MachineModel::Spectrum48.profile(), false);
        let ctx = context(&memory);
        let cond = Condition::parse("HL' == 1111h").unwrap();
        assert_eq!(cond.evaluate(&cpu, &ctx), Some(true));
        let cond = Condition::parse("HL == 2222h").unwrap();
        assert_eq!(cond.evaluate(&cpu, &ctx), Some(true));
    }

    #[test]
    fn memory_references() {
        assert_cond("(HL) == 99", |cpu, memory| {
            cpu.set_reg16(StkReg16::HL, 0x8000);
            memory.write(0x8000, 99);
        }, true);
        assert_cond("(IX+2) == 7", |cpu, memory| {
            cpu.set_index16(Prefix::Xdd, 0x8000);
            memory.write(0x8002, 7);
        }, true);
        assert_cond("(IX-1) == 3", |cpu, memory| {
            cpu.set_index16(Prefix::Xdd, 0x8001);
            memory.write(0x8000, 3);
        }, true);
        assert_cond("(4000h) == 0", |_, _| {}, true);
    }

    #[test]
    fn flags_and_context_values() {
        assert_cond("Z", |cpu, _| {
            cpu.set_flags(CpuFlags::Z);
        }, true);
        assert_cond("NZ", |cpu, _| {
            cpu.set_flags(CpuFlags::Z);
        }, false);
        assert_cond("C", |cpu, _| {
            cpu.set_flags(CpuFlags::C);
        }, true);
        assert_cond("val == 42h", |_, _| {}, true);
        assert_cond("port == 7FFDh", |_, _| {}, true);
        assert_cond("ts > 100", |_, _| {}, true);
    }

    #[test]
    fn parse_failures_are_reported() {
        assert!(Condition::parse("HL == ").is_err());
        assert!(Condition::parse("QQ == 5").is_err());
        assert!(Condition::parse("HL ==== 5").is_err());
        assert!(Condition::parse("(ZZ) == 5").is_err());
        assert!(Condition::parse("HL == 5 &").is_err());
    }

    #[test]
    fn missing_context_value_fails_evaluation() {
        let mut cpu = Z80NMOS::default();
        cpu.reset();
        let memory = BankedMemory::new(MachineModel::Spectrum48.profile(), false);
        let cond = Condition::parse("val == 1").unwrap();
        let ctx = EvalContext { memory: &memory, ts: 0, val: None, port: None };
        assert_eq!(cond.evaluate(&cpu, &ctx), None);
    }
}
