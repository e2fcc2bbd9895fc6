//! Instruction execution for the 8080.
//!
//! One `match` over the latched opcode. Multi-cycle instructions carry a
//! stage counter; every stage ends at a bus transaction (`Step::Read` /
//! `Step::Write`) or at retirement (`Step::Done`), and the stepper
//! re-enters at the next stage once the machine loop has serviced the
//! transaction. T-state counts follow the 8080 Programmer's Manual.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_truncation)]

use emu80_core::{Signal, SystemBus};

use crate::alu;
use crate::flags::CF;

use super::{Intel8080, Step};

impl Intel8080 {
    /// Register by its 3-bit encoding (0=B 1=C 2=D 3=E 4=H 5=L 7=A).
    /// Encoding 6 is the memory operand and is handled by the caller.
    fn reg8(&self, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => 0,
        }
    }

    fn set_reg8(&mut self, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => {}
        }
    }

    /// Register pair by its 2-bit encoding (0=BC 1=DE 2=HL 3=SP).
    fn pair(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_pair(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// Evaluate a condition code (0=NZ 1=Z 2=NC 3=C 4=PO 5=PE 6=P 7=M).
    fn condition(&self, code: u8) -> bool {
        use crate::flags::{PF, SF, ZF};
        match code & 7 {
            0 => self.regs.s & ZF == 0,
            1 => self.regs.s & ZF != 0,
            2 => self.regs.s & CF == 0,
            3 => self.regs.s & CF != 0,
            4 => self.regs.s & PF == 0,
            5 => self.regs.s & PF != 0,
            6 => self.regs.s & SF == 0,
            _ => self.regs.s & SF != 0,
        }
    }

    /// Post a read of the byte at PC and advance PC past it.
    fn imm_read(&mut self) -> Step {
        let pc = self.regs.pc;
        self.regs.pc = pc.wrapping_add(1);
        Step::Read(Signal::MEMORY_READ, pc)
    }

    /// Pop one byte: read at SP and advance SP.
    fn pop_read(&mut self) -> Step {
        let sp = self.regs.sp;
        self.regs.sp = sp.wrapping_add(1);
        Step::Read(Signal::MEMORY_READ, sp)
    }

    /// Push one byte: retreat SP and write at it.
    fn push_write(&mut self, value: u8) -> Step {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        Step::Write(Signal::MEMORY_WRITE, self.regs.sp, value)
    }

    /// Apply an accumulator ALU operation selected by bits 5-3 of the
    /// opcode (0=ADD 1=ADC 2=SUB 3=SBB 4=ANA 5=XRA 6=ORA 7=CMP).
    fn alu_apply(&mut self, kind: u8, operand: u8) {
        let carry = self.regs.s & CF != 0;
        let a = self.regs.a;
        match kind & 7 {
            0 => {
                let r = alu::add8(a, operand, false);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            1 => {
                let r = alu::add8(a, operand, carry);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            2 => {
                let r = alu::sub8(a, operand, false);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            3 => {
                let r = alu::sub8(a, operand, carry);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            4 => {
                let r = alu::and8(a, operand);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            5 => {
                let r = alu::xor8(a, operand);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            6 => {
                let r = alu::or8(a, operand);
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
            }
            _ => {
                // CMP: flags as SUB, accumulator untouched.
                let r = alu::sub8(a, operand, false);
                self.regs.set_status(r.flags);
            }
        }
    }

    /// Execute one stage of the latched instruction.
    pub(super) fn execute(&mut self, bus: &SystemBus) -> Step {
        let op = self.opcode;

        match op {
            // NOP, and the undefined encodings that behave as NOP.
            0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => {
                self.tstates = 4;
                Step::Done
            }

            // LXI rp, d16
            0x01 | 0x11 | 0x21 | 0x31 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                _ => {
                    let value = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    self.set_pair(op >> 4, value);
                    Step::Done
                }
            },

            // STAX B / STAX D
            0x02 | 0x12 => match self.stage {
                0 => {
                    self.tstates = 7;
                    self.stage = 1;
                    Step::Write(Signal::MEMORY_WRITE, self.pair(op >> 4), self.regs.a)
                }
                _ => Step::Done,
            },

            // INX rp
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.tstates = 5;
                let value = self.pair(op >> 4).wrapping_add(1);
                self.set_pair(op >> 4, value);
                Step::Done
            }

            // INR r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                self.tstates = 5;
                let code = op >> 3;
                let r = alu::inc8(self.reg8(code));
                self.set_reg8(code, r.value);
                self.regs.set_status((self.regs.s & CF) | r.flags);
                Step::Done
            }

            // INR M
            0x34 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    Step::Read(Signal::MEMORY_READ, self.regs.hl())
                }
                1 => {
                    let r = alu::inc8(bus.data.receive());
                    self.regs.set_status((self.regs.s & CF) | r.flags);
                    self.stage = 2;
                    Step::Write(Signal::MEMORY_WRITE, self.regs.hl(), r.value)
                }
                _ => Step::Done,
            },

            // DCR r
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                self.tstates = 5;
                let code = op >> 3;
                let r = alu::dec8(self.reg8(code));
                self.set_reg8(code, r.value);
                self.regs.set_status((self.regs.s & CF) | r.flags);
                Step::Done
            }

            // DCR M
            0x35 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    Step::Read(Signal::MEMORY_READ, self.regs.hl())
                }
                1 => {
                    let r = alu::dec8(bus.data.receive());
                    self.regs.set_status((self.regs.s & CF) | r.flags);
                    self.stage = 2;
                    Step::Write(Signal::MEMORY_WRITE, self.regs.hl(), r.value)
                }
                _ => Step::Done,
            },

            // MVI r, d8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => match self.stage {
                0 => {
                    self.tstates = 7;
                    self.stage = 1;
                    self.imm_read()
                }
                _ => {
                    let value = bus.data.receive();
                    self.set_reg8(op >> 3, value);
                    Step::Done
                }
            },

            // MVI M, d8
            0x36 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    Step::Write(Signal::MEMORY_WRITE, self.regs.hl(), self.lo)
                }
                _ => Step::Done,
            },

            // RLC: carry takes the high bit, which wraps to bit 0.
            0x07 => {
                self.tstates = 4;
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a << 1 | carry;
                self.regs.set_status((self.regs.s & !CF) | carry);
                Step::Done
            }

            // RRC: carry takes the low bit, which wraps to bit 7.
            0x0F => {
                self.tstates = 4;
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a >> 1 | carry << 7;
                self.regs.set_status((self.regs.s & !CF) | carry);
                Step::Done
            }

            // RAL: rotate left through the carry bit.
            0x17 => {
                self.tstates = 4;
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a << 1 | (self.regs.s & CF);
                self.regs.set_status((self.regs.s & !CF) | carry);
                Step::Done
            }

            // RAR: rotate right through the carry bit.
            0x1F => {
                self.tstates = 4;
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a >> 1 | (self.regs.s & CF) << 7;
                self.regs.set_status((self.regs.s & !CF) | carry);
                Step::Done
            }

            // DAD rp: HL += rp, carry only.
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.tstates = 10;
                let (value, carry) = alu::add16(self.regs.hl(), self.pair(op >> 4));
                self.regs.set_hl(value);
                self.regs
                    .set_status((self.regs.s & !CF) | u8::from(carry));
                Step::Done
            }

            // LDAX B / LDAX D
            0x0A | 0x1A => match self.stage {
                0 => {
                    self.tstates = 7;
                    self.stage = 1;
                    Step::Read(Signal::MEMORY_READ, self.pair(op >> 4))
                }
                _ => {
                    self.regs.a = bus.data.receive();
                    Step::Done
                }
            },

            // DCX rp
            0x0B | 0x1B | 0x2B | 0x3B => {
                self.tstates = 5;
                let value = self.pair(op >> 4).wrapping_sub(1);
                self.set_pair(op >> 4, value);
                Step::Done
            }

            // SHLD a16
            0x22 => match self.stage {
                0 => {
                    self.tstates = 16;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                2 => {
                    self.addr = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    self.stage = 3;
                    Step::Write(Signal::MEMORY_WRITE, self.addr, self.regs.l)
                }
                3 => {
                    self.stage = 4;
                    Step::Write(Signal::MEMORY_WRITE, self.addr.wrapping_add(1), self.regs.h)
                }
                _ => Step::Done,
            },

            // LHLD a16
            0x2A => match self.stage {
                0 => {
                    self.tstates = 16;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                2 => {
                    self.addr = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    self.stage = 3;
                    Step::Read(Signal::MEMORY_READ, self.addr)
                }
                3 => {
                    self.regs.l = bus.data.receive();
                    self.stage = 4;
                    Step::Read(Signal::MEMORY_READ, self.addr.wrapping_add(1))
                }
                _ => {
                    self.regs.h = bus.data.receive();
                    Step::Done
                }
            },

            // DAA
            0x27 => {
                self.tstates = 4;
                use crate::flags::AC;
                let r = alu::daa(
                    self.regs.a,
                    self.regs.s & CF != 0,
                    self.regs.s & AC != 0,
                );
                self.regs.a = r.value;
                self.regs.set_status(r.flags);
                Step::Done
            }

            // CMA: complement the accumulator, no flags.
            0x2F => {
                self.tstates = 4;
                self.regs.a = !self.regs.a;
                Step::Done
            }

            // STA a16
            0x32 => match self.stage {
                0 => {
                    self.tstates = 13;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                2 => {
                    self.addr = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    self.stage = 3;
                    Step::Write(Signal::MEMORY_WRITE, self.addr, self.regs.a)
                }
                _ => Step::Done,
            },

            // LDA a16
            0x3A => match self.stage {
                0 => {
                    self.tstates = 13;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                2 => {
                    self.addr = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    self.stage = 3;
                    Step::Read(Signal::MEMORY_READ, self.addr)
                }
                _ => {
                    self.regs.a = bus.data.receive();
                    Step::Done
                }
            },

            // STC
            0x37 => {
                self.tstates = 4;
                self.regs.set_status(self.regs.s | CF);
                Step::Done
            }

            // CMC
            0x3F => {
                self.tstates = 4;
                self.regs.set_status(self.regs.s ^ CF);
                Step::Done
            }

            // HLT: retire, then stop at the next fetch.
            0x76 => {
                self.tstates = 7;
                self.halted = true;
                Step::Done
            }

            // MOV family.
            0x40..=0x75 | 0x77..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    // MOV r, M
                    match self.stage {
                        0 => {
                            self.tstates = 7;
                            self.stage = 1;
                            Step::Read(Signal::MEMORY_READ, self.regs.hl())
                        }
                        _ => {
                            let value = bus.data.receive();
                            self.set_reg8(dst, value);
                            Step::Done
                        }
                    }
                } else if dst == 6 {
                    // MOV M, r
                    match self.stage {
                        0 => {
                            self.tstates = 7;
                            self.stage = 1;
                            Step::Write(Signal::MEMORY_WRITE, self.regs.hl(), self.reg8(src))
                        }
                        _ => Step::Done,
                    }
                } else {
                    self.tstates = 5;
                    let value = self.reg8(src);
                    self.set_reg8(dst, value);
                    Step::Done
                }
            }

            // Accumulator ALU on register or memory operand.
            0x80..=0xBF => {
                let src = op & 7;
                if src == 6 {
                    match self.stage {
                        0 => {
                            self.tstates = 7;
                            self.stage = 1;
                            Step::Read(Signal::MEMORY_READ, self.regs.hl())
                        }
                        _ => {
                            let value = bus.data.receive();
                            self.alu_apply(op >> 3, value);
                            Step::Done
                        }
                    }
                } else {
                    self.tstates = 4;
                    let value = self.reg8(src);
                    self.alu_apply(op >> 3, value);
                    Step::Done
                }
            }

            // RET and conditional returns; 0xD9 is the undefined RET alias.
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 | 0xC9 | 0xD9 => {
                let unconditional = matches!(op, 0xC9 | 0xD9);
                match self.stage {
                    0 => {
                        if unconditional || self.condition(op >> 3) {
                            self.tstates = if unconditional { 10 } else { 11 };
                            self.stage = 1;
                            self.pop_read()
                        } else {
                            self.tstates = 5;
                            Step::Done
                        }
                    }
                    1 => {
                        self.lo = bus.data.receive();
                        self.stage = 2;
                        self.pop_read()
                    }
                    _ => {
                        self.regs.pc = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                        Step::Done
                    }
                }
            }

            // POP rp / POP PSW
            0xC1 | 0xD1 | 0xE1 | 0xF1 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    self.pop_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.pop_read()
                }
                _ => {
                    let high = bus.data.receive();
                    match (op >> 4) & 3 {
                        0 => {
                            self.regs.b = high;
                            self.regs.c = self.lo;
                        }
                        1 => {
                            self.regs.d = high;
                            self.regs.e = self.lo;
                        }
                        2 => {
                            self.regs.h = high;
                            self.regs.l = self.lo;
                        }
                        _ => {
                            self.regs.a = high;
                            self.regs.set_status(self.lo);
                        }
                    }
                    Step::Done
                }
            },

            // JMP and conditional jumps; 0xCB is the undefined JMP alias.
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA | 0xC3 | 0xCB => {
                match self.stage {
                    0 => {
                        self.tstates = 10;
                        self.stage = 1;
                        self.imm_read()
                    }
                    1 => {
                        self.lo = bus.data.receive();
                        self.stage = 2;
                        self.imm_read()
                    }
                    _ => {
                        let target = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                        let taken =
                            matches!(op, 0xC3 | 0xCB) || self.condition(op >> 3);
                        if taken {
                            self.regs.pc = target;
                        }
                        Step::Done
                    }
                }
            }

            // CALL and conditional calls; 0xDD/0xED/0xFD are the undefined
            // CALL aliases.
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC | 0xCD | 0xDD | 0xED
            | 0xFD => match self.stage {
                0 => {
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    self.imm_read()
                }
                2 => {
                    self.addr = u16::from(bus.data.receive()) << 8 | u16::from(self.lo);
                    let taken = matches!(op, 0xCD | 0xDD | 0xED | 0xFD)
                        || self.condition(op >> 3);
                    if taken {
                        self.tstates = 17;
                        self.stage = 3;
                        self.push_write((self.regs.pc >> 8) as u8)
                    } else {
                        self.tstates = 11;
                        Step::Done
                    }
                }
                3 => {
                    self.stage = 4;
                    self.push_write(self.regs.pc as u8)
                }
                _ => {
                    self.regs.pc = self.addr;
                    Step::Done
                }
            },

            // PUSH rp / PUSH PSW
            0xC5 | 0xD5 | 0xE5 | 0xF5 => match self.stage {
                0 => {
                    self.tstates = 11;
                    let (high, low) = match (op >> 4) & 3 {
                        0 => (self.regs.b, self.regs.c),
                        1 => (self.regs.d, self.regs.e),
                        2 => (self.regs.h, self.regs.l),
                        _ => (self.regs.a, self.regs.s),
                    };
                    self.lo = low;
                    self.stage = 1;
                    self.push_write(high)
                }
                1 => {
                    self.stage = 2;
                    self.push_write(self.lo)
                }
                _ => Step::Done,
            },

            // Accumulator ALU on an immediate operand.
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => match self.stage {
                0 => {
                    self.tstates = 7;
                    self.stage = 1;
                    self.imm_read()
                }
                _ => {
                    let value = bus.data.receive();
                    self.alu_apply(op >> 3, value);
                    Step::Done
                }
            },

            // RST n: push PC, jump to the vector. Also synthesised for an
            // acknowledged interrupt, in which case no fetch preceded it
            // and PC already addresses the interrupted instruction.
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => match self.stage {
                0 => {
                    self.tstates = 11;
                    self.stage = 1;
                    self.push_write((self.regs.pc >> 8) as u8)
                }
                1 => {
                    self.stage = 2;
                    self.push_write(self.regs.pc as u8)
                }
                _ => {
                    self.regs.pc = u16::from(op & 0x38);
                    Step::Done
                }
            },

            // OUT d8: write the accumulator to the 8-bit I/O address.
            0xD3 => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.stage = 2;
                    Step::Write(Signal::IO_WRITE, u16::from(bus.data.receive()), self.regs.a)
                }
                _ => Step::Done,
            },

            // IN d8: read the accumulator from the 8-bit I/O address.
            0xDB => match self.stage {
                0 => {
                    self.tstates = 10;
                    self.stage = 1;
                    self.imm_read()
                }
                1 => {
                    self.stage = 2;
                    Step::Read(Signal::IO_READ, u16::from(bus.data.receive()))
                }
                _ => {
                    self.regs.a = bus.data.receive();
                    Step::Done
                }
            },

            // XTHL: exchange HL with the word at the stack pointer.
            0xE3 => match self.stage {
                0 => {
                    self.tstates = 18;
                    self.stage = 1;
                    Step::Read(Signal::MEMORY_READ, self.regs.sp)
                }
                1 => {
                    self.lo = bus.data.receive();
                    self.stage = 2;
                    Step::Read(Signal::MEMORY_READ, self.regs.sp.wrapping_add(1))
                }
                2 => {
                    let stack_high = bus.data.receive();
                    let old_l = self.regs.l;
                    let old_h = self.regs.h;
                    self.regs.l = self.lo;
                    self.regs.h = stack_high;
                    self.lo = old_l;
                    self.hi = old_h;
                    self.stage = 3;
                    Step::Write(Signal::MEMORY_WRITE, self.regs.sp, self.lo)
                }
                3 => {
                    self.stage = 4;
                    Step::Write(
                        Signal::MEMORY_WRITE,
                        self.regs.sp.wrapping_add(1),
                        self.hi,
                    )
                }
                _ => Step::Done,
            },

            // PCHL
            0xE9 => {
                self.tstates = 5;
                self.regs.pc = self.regs.hl();
                Step::Done
            }

            // XCHG
            0xEB => {
                self.tstates = 4;
                core::mem::swap(&mut self.regs.h, &mut self.regs.d);
                core::mem::swap(&mut self.regs.l, &mut self.regs.e);
                Step::Done
            }

            // DI
            0xF3 => {
                self.tstates = 4;
                self.iff = false;
                Step::Done
            }

            // SPHL
            0xF9 => {
                self.tstates = 5;
                self.regs.sp = self.regs.hl();
                Step::Done
            }

            // EI: takes effect on the very next fetch.
            0xFB => {
                self.tstates = 4;
                self.iff = true;
                Step::Done
            }
        }
    }
}
