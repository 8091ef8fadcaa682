//! Decoder bytecode.
//!
//! Code is a sequence of `u32` words. The low byte of the first word of
//! an instruction is the opcode and the upper 24 bits are its argument.
//! Most instructions are one word; `SETBIGGROUPNUM` is followed by the
//! group number and `TAGN` by the two words of its expected tag.

use crate::wire::DescriptorType;

// Opcodes 1 to 18 parse a value of the descriptor type with that number.
const STARTMSG: u8 = 19;
const ENDMSG: u8 = 20;
const STARTSEQ: u8 = 21;
const ENDSEQ: u8 = 22;
const STARTSUBMSG: u8 = 23;
const ENDSUBMSG: u8 = 24;
const STARTSTR: u8 = 25;
const STRING: u8 = 26;
const ENDSTR: u8 = 27;
const PUSHTAGDELIM: u8 = 28;
const PUSHLENDELIM: u8 = 29;
const POP: u8 = 30;
const SETBIGGROUPNUM: u8 = 32;
const CHECKDELIM: u8 = 33;
const CALL: u8 = 34;
const RET: u8 = 35;
const BRANCH: u8 = 36;
const TAG1: u8 = 37;
const TAG2: u8 = 38;
const TAGN: u8 = 39;
const SETDISPATCH: u8 = 40;
const DISPATCH: u8 = 41;
const HALT: u8 = 42;

/// Largest argument a single word can carry.
pub const MAX_ARG: u32 = (1 << 24) - 1;

/// Encoded tag a `TAG` instruction expects next in the input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExpectedTag
{
    pub bytes: [u8; 5],
    pub len: u8,
}

impl ExpectedTag
{
    /// The varint encoding of `tag`.
    pub fn new(tag: u32) -> Self
    {
        let mut out = Vec::with_capacity(5);
        crate::wire::encode_varint(tag.into(), &mut out);
        let mut bytes = [0; 5];
        bytes[.. out.len()].copy_from_slice(&out);
        Self{bytes, len: out.len() as u8}
    }

    pub fn as_slice(&self) -> &[u8]
    {
        &self.bytes[.. self.len as usize]
    }

    /// Number of words the instruction matching this tag takes.
    pub fn width(&self) -> usize
    {
        if self.len <= 2 { 1 } else { 3 }
    }
}

/// Decoded instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op
{
    /// Parse a value and push it to the selector.
    Parse(DescriptorType, u32),
    StartMsg,
    EndMsg,
    StartSeq(u32),
    EndSeq(u32),
    StartSubMsg(u32),
    EndSubMsg(u32),
    StartStr(u32),
    String(u32),
    EndStr(u32),

    /// Push a frame ending where its parent ends.
    /// A nonzero argument is the number of the group the frame is for.
    PushTagDelim(u32),

    /// Read a length and push a frame ending after that many bytes.
    PushLenDelim,
    Pop,

    /// Set the group number of the top frame to a number too large for an argument.
    SetBigGroupNum(u32),

    /// Branch if the top frame has ended.
    CheckDelim(u32),
    Call(u32),
    Ret,
    Branch(u32),

    /// Consume the tag and jump by the offset if the input starts with it.
    Tag(ExpectedTag, i16),

    /// Use the dispatch table of the method.
    SetDispatch(u32),

    /// Read a tag and jump to the code for its field.
    Dispatch,
    Halt,
}

impl Op
{
    /// Number of words the instruction takes.
    pub fn width(&self) -> usize
    {
        match self {
            Op::SetBigGroupNum(_) => 2,
            Op::Tag(tag, _) => tag.width(),
            _ => 1,
        }
    }

    /// Append the encoding of the instruction.
    pub fn encode(&self, code: &mut Vec<u32>)
    {
        let word = |op: u8, arg: u32| {
            debug_assert!(arg <= MAX_ARG, "Argument fits in 24 bits");
            u32::from(op) | arg << 8
        };
        match *self {
            Op::Parse(dtype, sel)  => code.push(word(dtype as u8, sel)),
            Op::StartMsg           => code.push(word(STARTMSG, 0)),
            Op::EndMsg             => code.push(word(ENDMSG, 0)),
            Op::StartSeq(sel)      => code.push(word(STARTSEQ, sel)),
            Op::EndSeq(sel)        => code.push(word(ENDSEQ, sel)),
            Op::StartSubMsg(sel)   => code.push(word(STARTSUBMSG, sel)),
            Op::EndSubMsg(sel)     => code.push(word(ENDSUBMSG, sel)),
            Op::StartStr(sel)      => code.push(word(STARTSTR, sel)),
            Op::String(sel)        => code.push(word(STRING, sel)),
            Op::EndStr(sel)        => code.push(word(ENDSTR, sel)),
            Op::PushTagDelim(n)    => code.push(word(PUSHTAGDELIM, n)),
            Op::PushLenDelim       => code.push(word(PUSHLENDELIM, 0)),
            Op::Pop                => code.push(word(POP, 0)),
            Op::SetBigGroupNum(n)  => code.extend([word(SETBIGGROUPNUM, 0), n]),
            Op::CheckDelim(target) => code.push(word(CHECKDELIM, target)),
            Op::Call(target)       => code.push(word(CALL, target)),
            Op::Ret                => code.push(word(RET, 0)),
            Op::Branch(target)     => code.push(word(BRANCH, target)),
            Op::SetDispatch(m)     => code.push(word(SETDISPATCH, m)),
            Op::Dispatch           => code.push(word(DISPATCH, 0)),
            Op::Halt               => code.push(word(HALT, 0)),
            Op::Tag(tag, jump) => {
                let b = tag.bytes;
                match tag.len {
                    1 => code.push(u32::from_le_bytes([TAG1, b[0], 0, jump as i8 as u8])),
                    2 => code.push(u32::from_le_bytes([TAG2, b[0], b[1], jump as i8 as u8])),
                    len => {
                        let [lo, hi] = jump.to_le_bytes();
                        code.push(u32::from_le_bytes([TAGN, len, lo, hi]));
                        code.push(u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                        code.push(u32::from(b[4]));
                    },
                }
            },
        }
    }

    /// Decode the instruction at `pc`.
    ///
    /// Code is only ever produced by [`Op::encode`],
    /// so every word sequence it sees is valid.
    pub fn decode(code: &[u32], pc: usize) -> Op
    {
        let word = code[pc];
        let [op, b1, b2, b3] = word.to_le_bytes();
        let arg = word >> 8;
        match op {
            1 ..= 18 => {
                let dtype = DescriptorType::from_u8(op)
                    .unwrap_or_else(|| unreachable!("Opcodes 1 to 18 are descriptor types"));
                Op::Parse(dtype, arg)
            },
            STARTMSG       => Op::StartMsg,
            ENDMSG         => Op::EndMsg,
            STARTSEQ       => Op::StartSeq(arg),
            ENDSEQ         => Op::EndSeq(arg),
            STARTSUBMSG    => Op::StartSubMsg(arg),
            ENDSUBMSG      => Op::EndSubMsg(arg),
            STARTSTR       => Op::StartStr(arg),
            STRING         => Op::String(arg),
            ENDSTR         => Op::EndStr(arg),
            PUSHTAGDELIM   => Op::PushTagDelim(arg),
            PUSHLENDELIM   => Op::PushLenDelim,
            POP            => Op::Pop,
            SETBIGGROUPNUM => Op::SetBigGroupNum(code[pc + 1]),
            CHECKDELIM     => Op::CheckDelim(arg),
            CALL           => Op::Call(arg),
            RET            => Op::Ret,
            BRANCH         => Op::Branch(arg),
            SETDISPATCH    => Op::SetDispatch(arg),
            DISPATCH       => Op::Dispatch,
            HALT           => Op::Halt,
            TAG1 => Op::Tag(ExpectedTag{bytes: [b1, 0, 0, 0, 0], len: 1}, b3 as i8 as i16),
            TAG2 => Op::Tag(ExpectedTag{bytes: [b1, b2, 0, 0, 0], len: 2}, b3 as i8 as i16),
            TAGN => {
                let [c0, c1, c2, c3] = code[pc + 1].to_le_bytes();
                let bytes = [c0, c1, c2, c3, code[pc + 2] as u8];
                Op::Tag(ExpectedTag{bytes, len: b1}, i16::from_le_bytes([b2, b3]))
            },
            _ => unreachable!("Invalid opcode {op}"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::wire::{WireType, make_tag}, proptest::proptest};

    #[test]
    fn tags_pick_their_width()
    {
        for (number, width) in [(1, 1), (16, 1), (1 << 11, 3), (1 << 20, 3), (crate::wire::MAX_FIELDNUMBER, 3)] {
            let tag = ExpectedTag::new(make_tag(number, WireType::Varint));
            let op = Op::Tag(tag, -3);
            let mut code = Vec::new();
            op.encode(&mut code);
            assert_eq!(code.len(), width);
            assert_eq!(op.width(), width);
            assert_eq!(Op::decode(&code, 0), op);
        }
    }

    proptest!
    {
        #[test]
        fn words_decode(sel in 0 .. MAX_ARG, dtype in 1u8 ..= 18, big in proptest::num::u32::ANY)
        {
            let dtype = DescriptorType::from_u8(dtype).unwrap();
            let ops = [
                Op::Parse(dtype, sel), Op::StartSeq(sel), Op::String(sel),
                Op::SetBigGroupNum(big), Op::CheckDelim(sel), Op::Dispatch,
            ];
            let mut code = Vec::new();
            for op in ops {
                op.encode(&mut code);
            }
            let mut pc = 0;
            for op in ops {
                assert_eq!(Op::decode(&code, pc), op);
                pc += op.width();
            }
        }
    }
}
