//! Streaming protobuf decoder.
//!
//! A handler table is compiled into a [`Program`] once,
//! and any number of [`Decoder`]s run it over input buffers.
//! Input may be split anywhere; the decoder keeps the few bytes of an
//! item that straddles two buffers and resumes from them.

pub use self::{
    cache::CodeCache,
    compile::{CompileOptions, Program, compile},
    vm::MAX_NESTING,
};

use {
    self::vm::{Frame, Outcome},
    crate::{
        Error, Result, Status,
        handlers::BytesHandler,
        sink::{BytesSink, Sink},
    },
    smallvec::SmallVec,
    std::{cell::RefCell, mem, rc::Rc, sync::Arc},
    tracing::trace,
};

mod cache;
mod compile;
mod opcode;
mod vm;

/// Bytes of a new buffer joined to the residual when resuming.
/// An incomplete item is never longer than this.
const RESUME_WINDOW: usize = 16;

/// Parse state of one input stream.
pub struct Decoder
{
    program: Arc<Program>,
    pc: usize,
    frames: Vec<Frame>,
    calls: Vec<usize>,

    /// Stream offset of the buffer being run.
    offset: u64,

    /// Bytes of an unknown field still to be skipped.
    skip: u64,

    /// Start of an item the previous buffer ended in.
    residual: SmallVec<[u8; RESUME_WINDOW]>,

    eof: bool,
    done: bool,
    status: Status,
}

impl Decoder
{
    /// Create a decoder delivering events to `sink`.
    ///
    /// The sink's handlers must be those `program` was compiled for.
    pub fn new(program: Arc<Program>, sink: Sink) -> Self
    {
        let pc = program.root().base as usize;
        let frames = vec![Frame{sink, end: None, group: 0, method: 0}];
        Self{
            program, pc, frames,
            calls: Vec::new(),
            offset: 0,
            skip: 0,
            residual: SmallVec::new(),
            eof: false,
            done: false,
            status: Status::new(),
        }
    }

    /// Start over on a new stream.
    pub fn reset(&mut self, sink: Sink)
    {
        self.pc = self.program.root().base as usize;
        self.frames.clear();
        self.frames.push(Frame{sink, end: None, group: 0, method: 0});
        self.calls.clear();
        self.offset = 0;
        self.skip = 0;
        self.residual.clear();
        self.eof = false;
        self.done = false;
        self.status.clear();
    }

    #[allow(missing_docs)]
    pub fn status(&self) -> &Status
    {
        &self.status
    }

    /// Bytes of the stream parsed so far, excluding any residual.
    pub fn bytes_parsed(&self) -> u64
    {
        self.offset
    }

    /// Whether the message has been completely parsed.
    pub fn is_done(&self) -> bool
    {
        self.done
    }

    /// Parse the next buffer of the stream.
    ///
    /// Returns the number of bytes consumed. Less than `buf.len()` means
    /// either an error, which the status records, or a string handler that
    /// consumed less than it was offered. In the latter case the caller feeds
    /// the rest of the buffer again once the handler can take it.
    pub fn feed(&mut self, buf: &[u8]) -> usize
    {
        if self.done || self.eof || !self.status.ok() {
            return 0;
        }
        trace!(offset = self.offset, len = buf.len(), residual = self.residual.len(), "feed");

        let mut consumed = 0;
        if !self.residual.is_empty() {
            let held = self.residual.len();
            let take = buf.len().min(RESUME_WINDOW);
            let mut window: SmallVec<[u8; 2 * RESUME_WINDOW]> = SmallVec::new();
            window.extend_from_slice(&self.residual);
            window.extend_from_slice(&buf[.. take]);

            match self.run(&window, Some(held)) {
                Outcome::Stopped(pos) => {
                    self.offset += pos as u64;
                    self.residual.clear();
                    consumed = pos - held;
                },
                Outcome::NeedMore(pos) => {
                    self.offset += pos as u64;
                    self.residual = SmallVec::from_slice(&window[pos ..]);
                    return take;
                },
                Outcome::Short(pos) | Outcome::Done(pos) | Outcome::Failed(pos) => {
                    self.offset += pos as u64;
                    if pos < held {
                        self.residual.drain(.. pos);
                        return 0;
                    }
                    self.residual.clear();
                    return pos - held;
                },
            }
        }

        let rest = &buf[consumed ..];
        match self.run(rest, None) {
            Outcome::NeedMore(pos) => {
                self.offset += pos as u64;
                self.residual = SmallVec::from_slice(&rest[pos ..]);
                buf.len()
            },
            Outcome::Short(pos) | Outcome::Failed(pos) => {
                self.offset += pos as u64;
                consumed + pos
            },
            Outcome::Done(pos) => {
                self.offset += pos as u64;
                self.done = true;
                consumed + pos
            },
            Outcome::Stopped(_) => unreachable!("Runs without a stop position never stop"),
        }
    }

    /// Signal the end of the stream.
    ///
    /// Fails if the stream ended inside a field or submessage.
    pub fn end(&mut self) -> Result<()>
    {
        self.status.to_result()?;
        if self.done {
            return Ok(());
        }
        self.eof = true;
        let residual = mem::take(&mut self.residual);
        match self.run(&residual, None) {
            Outcome::Done(pos) => {
                self.offset += pos as u64;
                self.done = true;
                Ok(())
            },
            Outcome::Failed(_) => self.status.to_result(),
            _ => {
                if self.status.ok() {
                    self.status.set_error(&Error::Truncated);
                }
                Err(Error::Truncated)
            },
        }
    }

    /// Parse a complete message held in one buffer.
    pub fn decode(program: Arc<Program>, sink: Sink, buf: &[u8]) -> Result<()>
    {
        let mut decoder = Self::new(program, sink);
        let consumed = decoder.feed(buf);
        decoder.status.to_result()?;
        if consumed < buf.len() {
            return Err(Error::HandlerError("string handler did not consume its input".into()));
        }
        decoder.end()
    }

    /// Byte sink that feeds the decoder.
    ///
    /// Data put to the sink is fed to the decoder,
    /// and ending the sink ends the stream.
    pub fn input(this: &Rc<RefCell<Decoder>>) -> BytesSink
    {
        let mut handler = BytesHandler::new();
        handler.set_string(|d: &RefCell<Decoder>, buf| d.borrow_mut().feed(buf))
            .expect("Fresh handlers accept any closure type");
        handler.set_end_str(|d: &RefCell<Decoder>| d.borrow_mut().end().is_ok())
            .expect("Fresh handlers accept any closure type");
        BytesSink::new(Arc::new(handler), this.clone())
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            def::{FieldDef, FieldType, Label, MessageDef, MessageView, freeze},
            handlers::{Handlers, HandlersView},
            testing::{Recorder, install},
            wire::encode_varint,
        },
        proptest::{collection::vec, prelude::any, proptest},
    };

    /// `Foo{x: int32 = 1, y: Bar = 2}` and `Bar{s: string = 1}`.
    fn foo(lazy: bool) -> MessageView
    {
        let foo = MessageDef::named("Foo").unwrap();
        let bar = MessageDef::named("Bar").unwrap();
        let y = FieldDef::named("y", 2, FieldType::Message).unwrap();
        y.set_subdef(&bar.as_def()).unwrap();
        y.set_lazy(lazy).unwrap();
        foo.add_field(&FieldDef::named("x", 1, FieldType::Int32).unwrap()).unwrap();
        foo.add_field(&y).unwrap();
        bar.add_field(&FieldDef::named("s", 1, FieldType::String).unwrap()).unwrap();
        freeze(&[foo.as_def(), bar.as_def()]).unwrap()[0].as_message().unwrap()
    }

    const FOO: [u8; 8] = [0x08, 0x07, 0x12, 0x04, 0x0A, 0x02, 0x68, 0x69];

    /// A message with one field of most kinds.
    fn sample() -> MessageView
    {
        let m = MessageDef::named("M").unwrap();
        let sub = MessageDef::named("Sub").unwrap();
        let r = FieldDef::named("r", 4, FieldType::Int32).unwrap();
        r.set_label(Label::Repeated).unwrap();
        let c = FieldDef::named("c", 3, FieldType::Message).unwrap();
        c.set_subdef(&sub.as_def()).unwrap();
        m.add_field(&FieldDef::named("a", 1, FieldType::Int32).unwrap()).unwrap();
        m.add_field(&FieldDef::named("s", 2, FieldType::String).unwrap()).unwrap();
        m.add_field(&c).unwrap();
        m.add_field(&r).unwrap();
        m.add_field(&FieldDef::named("d", 5, FieldType::Double).unwrap()).unwrap();
        sub.add_field(&FieldDef::named("v", 1, FieldType::UInt64).unwrap()).unwrap();
        freeze(&[m.as_def(), sub.as_def()]).unwrap()[0].as_message().unwrap()
    }

    fn sample_bytes() -> Vec<u8>
    {
        let mut buf = vec![0x08, 0x96, 0x01];
        buf.extend([0x12, 0x05]);
        buf.extend(b"hello");
        buf.extend([0x1A, 0x03, 0x08, 0xFF, 0x01]);
        buf.extend([0x22, 0x04, 0x01, 0xAC, 0x02, 0x05]);
        buf.push(0x29);
        buf.extend(1.5f64.to_le_bytes());
        // Unknown fields 9 and 10.
        buf.extend([0x48, 0x01, 0x52, 0x02, 0xAA, 0xBB]);
        buf
    }

    fn parse(handlers: &HandlersView, options: CompileOptions, chunks: &[&[u8]])
        -> (Vec<String>, Result<()>)
    {
        let rec = Recorder::new();
        let program = Arc::new(compile(handlers, options).unwrap());
        let mut decoder = Decoder::new(program, Sink::new(handlers, rec.clone()));
        for chunk in chunks {
            if decoder.feed(chunk) < chunk.len() {
                break;
            }
        }
        let result = decoder.end();
        (rec.events(), result)
    }

    fn parse_all(msg: &MessageView, buf: &[u8]) -> (Vec<String>, Result<()>)
    {
        parse(&Recorder::handlers(msg, false), CompileOptions::default(), &[buf])
    }

    fn split<'a>(buf: &'a [u8], cuts: &[usize]) -> Vec<&'a [u8]>
    {
        let mut cuts = cuts.to_vec();
        cuts.sort_unstable();
        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunks.push(&buf[start .. cut]);
            start = cut;
        }
        chunks.push(&buf[start ..]);
        chunks
    }

    #[test]
    fn nested_message()
    {
        let (events, result) = parse_all(&foo(false), &FOO);
        result.unwrap();
        assert_eq!(events, [
            "startmsg Foo", "x=7", "start y", "startmsg Bar",
            "s=hi", "endmsg Bar", "end y", "endmsg Foo",
        ]);
    }

    #[test]
    fn split_input()
    {
        let handlers = Recorder::handlers(&foo(false), false);
        let (whole, _) = parse(&handlers, CompileOptions::default(), &[&FOO]);
        let chunks: [&[u8]; 3] = [&FOO[.. 1], &FOO[1 .. 5], &FOO[5 ..]];
        let (events, result) = parse(&handlers, CompileOptions::default(), &chunks);
        result.unwrap();
        assert_eq!(events, whole);
    }

    #[test]
    fn overlong_varint()
    {
        let handlers = Recorder::handlers(&foo(false), false);
        let program = Arc::new(compile(&handlers, CompileOptions::default()).unwrap());
        let mut decoder = Decoder::new(program, Sink::new(&handlers, Recorder::new()));
        assert_eq!(decoder.feed(&[0xFF; 11]), 0);
        assert_eq!(decoder.status().to_result(), Err(Error::MalformedVarint));
        assert_eq!(decoder.end(), Err(Error::MalformedVarint));
    }

    #[test]
    fn sample_values()
    {
        let (events, result) = parse_all(&sample(), &sample_bytes());
        result.unwrap();
        let values: Vec<_> = events.iter().filter(|e| e.contains('=')).collect();
        assert_eq!(values, ["a=150", "s=hello", "v=255", "r=1", "r=300", "r=5", "d=1.5"]);
    }

    #[test]
    fn unknown_fields_are_skipped()
    {
        let mut buf = vec![0x48, 0x01];                       // 9: varint
        buf.extend([0x55, 1, 2, 3, 4]);                       // 10: fixed32
        buf.extend([0x59, 1, 2, 3, 4, 5, 6, 7, 8]);           // 11: fixed64
        buf.extend([0x62, 0x03, 0x08, 0x01, 0x02]);           // 12: bytes
        buf.extend([0x6B, 0x08, 0x05, 0x73, 0x74, 0x6C]);     // 13: group with a nested group
        buf.extend([0x08, 0x2A]);
        let (events, result) = parse_all(&sample(), &buf);
        result.unwrap();
        assert_eq!(events, ["startmsg M", "a=42", "endmsg M"]);
    }

    #[test]
    fn mismatched_end_group()
    {
        let (_, result) = parse_all(&sample(), &[0x6B, 0x08, 0x01, 0x74]);
        assert_eq!(result, Err(Error::MismatchedEndGroup));
    }

    #[test]
    fn invalid_tags()
    {
        assert_eq!(parse_all(&sample(), &[0x00, 0x01]).1, Err(Error::InvalidTag));
        assert_eq!(parse_all(&sample(), &[0x0E, 0x01]).1, Err(Error::InvalidTag));
    }

    #[test]
    fn truncated_input()
    {
        assert_eq!(parse_all(&foo(false), &FOO[.. 1]).1, Err(Error::Truncated));
        assert_eq!(parse_all(&foo(false), &FOO[.. 7]).1, Err(Error::Truncated));
    }

    #[test]
    fn string_overruns_submessage()
    {
        let buf = [0x12, 0x02, 0x0A, 0x05, 0x68, 0x69];
        assert_eq!(parse_all(&foo(false), &buf).1, Err(Error::MalformedDelimited));
    }

    #[test]
    fn nesting_is_limited()
    {
        let n = MessageDef::named("N").unwrap();
        let f = FieldDef::named("n", 1, FieldType::Message).unwrap();
        f.set_subdef(&n.as_def()).unwrap();
        n.add_field(&f).unwrap();
        let n = freeze(&[n.as_def()]).unwrap()[0].as_message().unwrap();

        let nested = |depth| {
            let mut buf = Vec::new();
            for _ in 0 .. depth {
                let mut outer = vec![0x0A];
                encode_varint(buf.len() as u64, &mut outer);
                outer.extend(buf);
                buf = outer;
            }
            buf
        };
        parse_all(&n, &nested(MAX_NESTING - 1)).1.unwrap();
        assert_eq!(parse_all(&n, &nested(MAX_NESTING + 6)).1, Err(Error::DepthExceeded));
    }

    #[test]
    fn lazy_fields_arrive_as_strings()
    {
        let msg = foo(true);
        let handlers = Recorder::handlers(&msg, true);
        let (events, result) = parse(&handlers, CompileOptions{lazy: true}, &[&FOO]);
        result.unwrap();
        assert_eq!(events, ["startmsg Foo", "x=7", "y=\\n\\x02hi", "endmsg Foo"]);

        let (events, result) = parse(&handlers, CompileOptions::default(), &[&FOO]);
        result.unwrap();
        assert!(events.contains(&"s=hi".to_owned()));
    }

    #[test]
    fn handlers_can_stop_the_parse()
    {
        let msg = foo(false);
        let handlers = Handlers::new_frozen(&msg, |h| {
            install(h, false)?;
            match h.message().field_by_name("x") {
                Some(x) => h.set_int32(&x, |_: &Recorder, v| v != 7),
                None => Ok(()),
            }
        }).unwrap();
        let (events, result) = parse(&handlers, CompileOptions::default(), &[&FOO]);
        assert_eq!(events, ["startmsg Foo"]);
        assert!(matches!(result, Err(Error::HandlerError(m)) if m == "handler stopped the parse"));
    }

    #[test]
    fn short_string_consumption_resumes()
    {
        let msg = foo(false);
        let handlers = Handlers::new_frozen(&msg, |h| {
            install(h, false)?;
            match h.message().field_by_name("s") {
                Some(s) => h.set_string(&s, |r: &Recorder, buf| r.append(&buf[.. 1])),
                None => Ok(()),
            }
        }).unwrap();
        let rec = Recorder::new();
        let program = Arc::new(compile(&handlers, CompileOptions::default()).unwrap());
        let mut decoder = Decoder::new(program, Sink::new(&handlers, rec.clone()));
        let mut buf = &FOO[..];
        let mut feeds = 0;
        while !buf.is_empty() {
            let n = decoder.feed(buf);
            assert!(decoder.status().ok());
            buf = &buf[n ..];
            feeds += 1;
        }
        decoder.end().unwrap();
        assert_eq!(feeds, 2);
        assert!(rec.events().contains(&"s=hi".to_owned()));
    }

    #[test]
    fn byte_sink_input()
    {
        let msg = foo(false);
        let handlers = Recorder::handlers(&msg, false);
        let rec = Recorder::new();
        let program = Arc::new(compile(&handlers, CompileOptions::default()).unwrap());
        let decoder = Rc::new(RefCell::new(Decoder::new(program, Sink::new(&handlers, rec.clone()))));
        let input = Decoder::input(&decoder);
        let closure = match input.start(FOO.len()) {
            crate::handlers::ContinueOrBreak::Continue(c) => c,
            crate::handlers::ContinueOrBreak::Break => panic!("input refused to start"),
        };
        for chunk in FOO.chunks(3) {
            assert_eq!(input.put_buf(&closure, chunk), chunk.len());
        }
        assert!(input.end());
        assert!(decoder.borrow().is_done());
        assert_eq!(rec.values(), ["x=7", "s=hi"]);
    }

    fn packed(values: &[i32]) -> Vec<u8>
    {
        let mut body = Vec::new();
        for &v in values {
            encode_varint(v as i64 as u64, &mut body);
        }
        let mut buf = vec![0x22];
        encode_varint(body.len() as u64, &mut buf);
        buf.extend(body);
        buf
    }

    fn unpacked(values: &[i32]) -> Vec<u8>
    {
        let mut buf = Vec::new();
        for &v in values {
            buf.push(0x20);
            encode_varint(v as i64 as u64, &mut buf);
        }
        buf
    }

    proptest!
    {
        #[test]
        fn any_split_gives_the_same_events(cuts in vec(0 ..= sample_bytes().len(), 0 .. 6))
        {
            let msg = sample();
            let handlers = Recorder::handlers(&msg, false);
            let buf = sample_bytes();
            let (whole, _) = parse(&handlers, CompileOptions::default(), &[&buf]);
            let (events, result) = parse(&handlers, CompileOptions::default(), &split(&buf, &cuts));
            assert_eq!(result, Ok(()));
            assert_eq!(events, whole);
        }

        #[test]
        fn packed_and_unpacked_agree(values in vec(any::<i32>(), 1 .. 20))
        {
            let msg = sample();
            let expected: Vec<_> = values.iter().map(|v| format!("r={v}")).collect();
            for buf in [packed(&values), unpacked(&values)] {
                let rec = Recorder::new();
                let handlers = Recorder::handlers(&msg, false);
                let program = Arc::new(compile(&handlers, CompileOptions::default()).unwrap());
                Decoder::decode(program, Sink::new(&handlers, rec.clone()), &buf).unwrap();
                assert_eq!(rec.values(), expected);
            }
        }
    }
}
