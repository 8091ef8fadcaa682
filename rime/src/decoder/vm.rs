//! The bytecode interpreter.
//!
//! The interpreter runs until it needs input it does not have, and can
//! resume from there on the next buffer. Every instruction that reads
//! input reads one indivisible item (a tag, a varint, a fixed-width value)
//! and emits its events only once the whole item is read, so a suspended
//! instruction can simply run again when more input arrives.
//! String data is the exception: it is delivered in whatever pieces
//! the input arrives in.

use {
    super::{
        Decoder,
        compile::{NO_WIRE_TYPE, split_entry},
        opcode::Op,
    },
    crate::{
        Error,
        handlers::ContinueOrBreak,
        sink::Sink,
        wire::{
            DescriptorType, MAX_FIELDNUMBER, WireType, decode_varint, split_tag,
            zigzag_decode32, zigzag_decode64,
        },
    },
    tracing::{debug, trace},
};

/// Deepest nesting of frames a decoder accepts.
pub const MAX_NESTING: usize = 64;

/// Parse state of one level of nesting.
pub (super) struct Frame
{
    pub sink: Sink,

    /// Stream offset the frame ends at, if it ends before the stream does.
    pub end: Option<u64>,

    /// Zero for length-delimited frames,
    /// the group number for groups being parsed,
    /// and the negated group number for groups being skipped.
    pub group: i64,

    /// Method whose dispatch table applies.
    pub method: usize,
}

/// Why [`Decoder::run`] returned, with the number of bytes it consumed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub (super) enum Outcome
{
    /// An item starting at this position needs more input.
    NeedMore(usize),

    /// A string handler consumed less than it was given.
    Short(usize),

    /// Reached the requested stop position.
    Stopped(usize),

    /// The message ended.
    Done(usize),

    /// Parsing failed; the status says why.
    Failed(usize),
}

enum Short
{
    More,
    Fail(Error),
}

macro_rules! read
{
    ($self:ident, $read:expr, $at:expr) => {
        match $read {
            Ok(value) => value,
            Err(Short::More) => return Outcome::NeedMore($at),
            Err(Short::Fail(error)) => return $self.fail($at, error),
        }
    };
}

impl Decoder
{
    fn top(&self) -> &Frame
    {
        self.frames.last().expect("The message frame is never popped")
    }

    fn top_mut(&mut self) -> &mut Frame
    {
        self.frames.last_mut().expect("The message frame is never popped")
    }

    fn parent(&self) -> &Frame
    {
        &self.frames[self.frames.len() - 2]
    }

    fn push(&mut self, frame: Frame) -> Result<(), Error>
    {
        if self.frames.len() >= MAX_NESTING {
            return Err(Error::DepthExceeded);
        }
        self.frames.push(frame);
        Ok(())
    }

    fn fail(&mut self, pos: usize, error: Error) -> Outcome
    {
        debug!(offset = self.offset + pos as u64, %error, "decoding failed");
        self.status.set_error(&error);
        Outcome::Failed(pos)
    }

    fn stop(&mut self, pos: usize) -> Outcome
    {
        if self.status.ok() {
            self.status.set_message("handler stopped the parse");
        }
        Outcome::Failed(pos)
    }

    /// Input available to the top frame, and whether the frame end limits it.
    fn window<'d>(&self, data: &'d [u8], pos: usize) -> (&'d [u8], bool)
    {
        let rest = &data[pos ..];
        match self.top().end {
            Some(end) => {
                let left = end.saturating_sub(self.offset + pos as u64);
                match usize::try_from(left) {
                    Ok(left) if left <= rest.len() => (&rest[.. left], true),
                    _ => (rest, false),
                }
            },
            None => (rest, false),
        }
    }

    fn read_varint(&self, data: &[u8], pos: &mut usize) -> Result<u64, Short>
    {
        let (window, limited) = self.window(data, *pos);
        match decode_varint(window) {
            Err(error) => Err(Short::Fail(error)),
            Ok(Some((value, len))) => {
                *pos += len;
                Ok(value)
            },
            Ok(None) if limited => Err(Short::Fail(Error::MalformedDelimited)),
            Ok(None) if self.eof => Err(Short::Fail(Error::Truncated)),
            Ok(None) => Err(Short::More),
        }
    }

    fn read_fixed(&self, data: &[u8], pos: &mut usize, len: usize) -> Result<u64, Short>
    {
        let (window, limited) = self.window(data, *pos);
        if window.len() >= len {
            let mut bytes = [0; 8];
            bytes[.. len].copy_from_slice(&window[.. len]);
            *pos += len;
            return Ok(u64::from_le_bytes(bytes));
        }
        if limited {
            Err(Short::Fail(Error::MalformedDelimited))
        } else if self.eof {
            Err(Short::Fail(Error::Truncated))
        } else {
            Err(Short::More)
        }
    }

    fn read_value(&self, data: &[u8], pos: &mut usize, wire_type: WireType)
        -> Result<u64, Short>
    {
        match wire_type {
            WireType::Fixed32 => self.read_fixed(data, pos, 4),
            WireType::Fixed64 => self.read_fixed(data, pos, 8),
            _ => self.read_varint(data, pos),
        }
    }

    /// Push a parsed value to the top sink.
    fn put(&self, dtype: DescriptorType, sel: u32, v: u64) -> bool
    {
        use DescriptorType::*;
        let sink = &self.top().sink;
        match dtype {
            Double              => sink.put_double(sel, f64::from_bits(v)),
            Float               => sink.put_float(sel, f32::from_bits(v as u32)),
            Int64 | SFixed64    => sink.put_int64(sel, v as i64),
            UInt64 | Fixed64    => sink.put_uint64(sel, v),
            Int32 | Enum | SFixed32 => sink.put_int32(sel, v as i32),
            UInt32 | Fixed32    => sink.put_uint32(sel, v as u32),
            Bool                => sink.put_bool(sel, v != 0),
            SInt32              => sink.put_int32(sel, zigzag_decode32(v as u32)),
            SInt64              => sink.put_int64(sel, zigzag_decode64(v)),
            String | Bytes | Message | Group =>
                unreachable!("Only scalar values are parsed by PARSE"),
        }
    }

    /// Replace the top sink with the result of a start handler.
    fn start_child(&mut self, child: ContinueOrBreak<Sink>) -> bool
    {
        match child {
            ContinueOrBreak::Continue(sink) => {
                self.top_mut().sink = sink;
                true
            },
            ContinueOrBreak::Break => false,
        }
    }

    /// Run the program over `data`, which starts at stream offset `self.offset`.
    ///
    /// Returns before the first instruction at or past `stop_at`, if given.
    pub (super) fn run(&mut self, data: &[u8], stop_at: Option<usize>) -> Outcome
    {
        let program = self.program.clone();
        let code = &program.code;
        let mut pos = 0;
        loop {
            if stop_at.map_or(false, |stop| pos >= stop) {
                return Outcome::Stopped(pos);
            }
            let op = Op::decode(code, self.pc);
            let next = self.pc + op.width();
            let at = self.offset + pos as u64;

            match op {
                Op::Parse(dtype, sel) => {
                    let start = pos;
                    let v = read!(self, self.read_value(data, &mut pos, dtype.wire_type()), start);
                    if !self.put(dtype, sel, v) {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::StartMsg => {
                    if !self.top().sink.start_msg() {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::EndMsg => {
                    let sink = self.top().sink.clone();
                    let ok = sink.end_msg(&mut self.status);
                    if !self.status.ok() {
                        return Outcome::Failed(pos);
                    }
                    if !ok {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::StartSeq(sel) => {
                    let child = self.parent().sink.start_seq(sel);
                    if !self.start_child(child) {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::StartSubMsg(sel) => {
                    let child = self.parent().sink.start_submsg(sel);
                    if !self.start_child(child) {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::StartStr(sel) => {
                    let hint = self.top().end.map_or(0, |end| (end - at) as usize);
                    let child = self.parent().sink.start_str(sel, hint);
                    if !self.start_child(child) {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::String(sel) => {
                    let (window, _) = self.window(data, pos);
                    let left = self.top().end.map_or(0, |end| end - at);
                    if left == 0 {
                        self.pc = next;
                        continue;
                    }
                    if window.is_empty() {
                        return match self.eof {
                            true => self.fail(pos, Error::Truncated),
                            false => Outcome::NeedMore(pos),
                        };
                    }
                    let used = self.top().sink.put_string(sel, window).min(window.len());
                    pos += used;
                    if used < window.len() {
                        return Outcome::Short(pos);
                    }
                },

                Op::EndSeq(sel) | Op::EndSubMsg(sel) | Op::EndStr(sel) => {
                    let sink = &self.top().sink;
                    let ok = match op {
                        Op::EndSeq(_) => sink.end_seq(sel),
                        Op::EndSubMsg(_) => sink.end_submsg(sel),
                        _ => sink.end_str(sel),
                    };
                    if !ok {
                        return self.stop(pos);
                    }
                    self.pc = next;
                },

                Op::PushTagDelim(group) => {
                    let top = self.top();
                    let frame = Frame{
                        sink: top.sink.clone(),
                        end: top.end,
                        group: group.into(),
                        method: top.method,
                    };
                    if let Err(error) = self.push(frame) {
                        return self.fail(pos, error);
                    }
                    self.pc = next;
                },

                Op::PushLenDelim => {
                    let start = pos;
                    let len = read!(self, self.read_varint(data, &mut pos), start);
                    let end = (self.offset + pos as u64).checked_add(len);
                    let top = self.top();
                    let end = match (end, top.end) {
                        (Some(end), Some(limit)) if end <= limit => end,
                        (Some(end), None) => end,
                        _ => return self.fail(start, Error::MalformedDelimited),
                    };
                    let frame = Frame{sink: top.sink.clone(), end: Some(end), group: 0, method: top.method};
                    if let Err(error) = self.push(frame) {
                        return self.fail(start, error);
                    }
                    self.pc = next;
                },

                Op::Pop => {
                    self.frames.pop();
                    self.pc = next;
                },

                Op::SetBigGroupNum(group) => {
                    self.top_mut().group = group.into();
                    self.pc = next;
                },

                Op::CheckDelim(target) => {
                    let top = self.top();
                    self.pc = match top.end == Some(at) {
                        true if top.group > 0 => return self.fail(pos, Error::MalformedDelimited),
                        true => target as usize,
                        false => next,
                    };
                },

                Op::Call(target) => {
                    self.calls.push(next);
                    self.pc = target as usize;
                },

                Op::Ret => {
                    self.pc = self.calls.pop().unwrap_or(0);
                },

                Op::Branch(target) => {
                    self.pc = target as usize;
                },

                Op::Tag(tag, jump) => {
                    let expected = tag.as_slice();
                    let (window, limited) = self.window(data, pos);
                    let n = window.len().min(expected.len());
                    let matches = window[.. n] == expected[.. n];
                    if matches && n == expected.len() {
                        pos += n;
                        self.pc = (self.pc as isize + isize::from(jump)) as usize;
                    } else if matches && !limited && !self.eof {
                        return Outcome::NeedMore(pos);
                    } else {
                        self.pc = next;
                    }
                },

                Op::SetDispatch(method) => {
                    self.top_mut().method = method as usize;
                    self.pc = next;
                },

                Op::Dispatch => {
                    match self.dispatch(data, &mut pos) {
                        Ok(()) => (),
                        Err(outcome) => return outcome,
                    }
                },

                Op::Halt => {
                    return Outcome::Done(pos);
                },
            }
        }
    }

    /// Read a tag and go to the code for its field, or skip the field.
    ///
    /// Stays on the dispatch instruction while skipping unknown data.
    fn dispatch(&mut self, data: &[u8], pos: &mut usize) -> Result<(), Outcome>
    {
        if self.skip > 0 {
            let n = self.skip.min((data.len() - *pos) as u64);
            *pos += n as usize;
            self.skip -= n;
            if self.skip > 0 {
                return Err(match self.eof {
                    true => self.fail(*pos, Error::Truncated),
                    false => Outcome::NeedMore(*pos),
                });
            }
            return Ok(());
        }

        let program = self.program.clone();
        let at = self.offset + *pos as u64;
        let top = self.top();
        let method = &program.methods[top.method];
        if top.end == Some(at) {
            if top.group != 0 {
                return Err(self.fail(*pos, Error::MalformedDelimited));
            }
            self.pc = method.end_pc as usize;
            return Ok(());
        }
        if self.eof && *pos == data.len() && self.frames.len() == 1 {
            self.pc = method.end_pc as usize;
            return Ok(());
        }

        let start = *pos;
        let tag = match self.read_varint(data, pos) {
            Ok(tag) => tag,
            Err(Short::More) => return Err(Outcome::NeedMore(start)),
            Err(Short::Fail(error)) => return Err(self.fail(start, error)),
        };
        let (number, wire_type) = match split_tag(tag) {
            Ok(split) => split,
            Err(error) => return Err(self.fail(start, error)),
        };
        trace!(number, ?wire_type, offset = at, "dispatching field");

        let top = self.top();
        let group = top.group;
        if wire_type == WireType::EndGroup {
            return match group {
                g if g < 0 && g.unsigned_abs() == u64::from(number) => {
                    self.frames.pop();
                    Ok(())
                },
                g if g > 0 && g as u64 == u64::from(number) => {
                    self.pc = method.end_pc as usize;
                    Ok(())
                },
                _ => Err(self.fail(start, Error::MismatchedEndGroup)),
            };
        }

        if group >= 0 {
            if let Some(&entry) = method.dispatch.lookup(number.into()) {
                let (offset, wt1, wt2) = split_entry(entry);
                let wt = wire_type as u8;
                if wt == wt1 {
                    self.pc = offset as usize;
                    return Ok(());
                }
                if wt2 != NO_WIRE_TYPE && wt == wt2 {
                    let alt = u64::from(MAX_FIELDNUMBER) + u64::from(number);
                    if let Some(&alt) = method.dispatch.lookup(alt) {
                        self.pc = split_entry(alt).0 as usize;
                        return Ok(());
                    }
                }
            }
        }

        // Unknown field, or a known one with an unexpected wire type.
        match wire_type {
            WireType::Varint | WireType::Fixed32 | WireType::Fixed64 => {
                match self.read_value(data, pos, wire_type) {
                    Ok(_) => Ok(()),
                    Err(Short::More) => Err(Outcome::NeedMore(start)),
                    Err(Short::Fail(error)) => Err(self.fail(start, error)),
                }
            },
            WireType::LengthDelimited => {
                let len = match self.read_varint(data, pos) {
                    Ok(len) => len,
                    Err(Short::More) => return Err(Outcome::NeedMore(start)),
                    Err(Short::Fail(error)) => return Err(self.fail(start, error)),
                };
                let end = (self.offset + *pos as u64).checked_add(len);
                match (end, self.top().end) {
                    (Some(end), Some(limit)) if end > limit =>
                        return Err(self.fail(start, Error::MalformedDelimited)),
                    (None, _) => return Err(self.fail(start, Error::MalformedDelimited)),
                    _ => (),
                }
                self.skip = len;
                Ok(())
            },
            WireType::StartGroup => {
                let top = self.top();
                let frame = Frame{
                    sink: top.sink.clone(),
                    end: top.end,
                    group: -i64::from(number),
                    method: top.method,
                };
                self.push(frame).map_err(|error| self.fail(start, error))
            },
            WireType::EndGroup => unreachable!("End-group tags are handled above"),
        }
    }
}
