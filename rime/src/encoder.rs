//! Binary wire format encoder.
//!
//! The encoder is a handler table like any other: its handlers serialize
//! the events they receive. Length-delimited values are written before
//! their length is known, so each open one is recorded as a segment and
//! its length is spliced in front of it when it ends.

use {
    crate::{
        Result,
        def::{FieldType, FieldView, MessageView},
        handlers::{ContinueOrBreak, Handlers, HandlersView},
        sink::Sink,
        wire::{
            DescriptorType, WireType, encode_varint, make_tag,
            zigzag_encode32, zigzag_encode64,
        },
    },
    std::{cell::RefCell, mem, rc::Rc},
    tracing::trace,
};

/// Encoder state, the closure of the encoder's handlers.
#[derive(Debug, Default)]
pub struct Encoder
{
    out: RefCell<Vec<u8>>,

    /// Offsets of the payloads of open length-delimited values.
    segments: RefCell<Vec<usize>>,
}

/// What a value handler needs to know about its field.
#[derive(Clone, Copy)]
struct Target
{
    number: u32,
    dtype: DescriptorType,
    packed: bool,
}

impl Encoder
{
    /// Create an encoder with empty output.
    pub fn new() -> Rc<Self>
    {
        Rc::new(Self::default())
    }

    /// Build frozen encoder handlers for `msg` and every message it reaches.
    pub fn handlers(msg: &MessageView) -> Result<HandlersView>
    {
        Handlers::new_frozen(msg, install)
    }

    /// Sink that encodes into this encoder.
    pub fn sink(self: &Rc<Self>, handlers: &HandlersView) -> Sink
    {
        Sink::new(handlers, self.clone())
    }

    /// Take the bytes written so far.
    pub fn take_output(&self) -> Vec<u8>
    {
        self.segments.borrow_mut().clear();
        mem::take(&mut *self.out.borrow_mut())
    }

    /// Whether every length-delimited value that was started has ended.
    pub fn is_balanced(&self) -> bool
    {
        self.segments.borrow().is_empty()
    }

    fn tag(&self, number: u32, wire_type: WireType)
    {
        encode_varint(make_tag(number, wire_type).into(), &mut self.out.borrow_mut());
    }

    fn value(&self, target: Target, bits: u64) -> bool
    {
        let wire_type = target.dtype.wire_type();
        if !target.packed {
            self.tag(target.number, wire_type);
        }
        let mut out = self.out.borrow_mut();
        match wire_type {
            WireType::Fixed32 => out.extend_from_slice(&(bits as u32).to_le_bytes()),
            WireType::Fixed64 => out.extend_from_slice(&bits.to_le_bytes()),
            _ => encode_varint(bits, &mut out),
        }
        true
    }

    fn start_delimited(&self, number: u32)
    {
        self.tag(number, WireType::LengthDelimited);
        let offset = self.out.borrow().len();
        self.segments.borrow_mut().push(offset);
    }

    fn end_delimited(&self) -> bool
    {
        let Some(start) = self.segments.borrow_mut().pop() else { return false };
        let mut out = self.out.borrow_mut();
        let mut prefix = Vec::new();
        encode_varint((out.len() - start) as u64, &mut prefix);
        trace!(start, len = out.len() - start, "closing segment");
        out.splice(start .. start, prefix);
        true
    }

    fn bytes(&self, buf: &[u8]) -> usize
    {
        self.out.borrow_mut().extend_from_slice(buf);
        buf.len()
    }
}

fn cont(e: &Rc<Encoder>) -> ContinueOrBreak<Rc<Encoder>>
{
    ContinueOrBreak::Continue(e.clone())
}

/// Set the encoding handlers of every field of the table's message.
fn install(h: &Handlers) -> Result<()>
{
    let msg = h.message();
    for field in msg.fields() {
        install_field(h, &field)?;
    }
    Ok(())
}

fn install_field(h: &Handlers, field: &FieldView) -> Result<()>
{
    let t = Target{
        number: field.number(),
        dtype: field.descriptor_type(),
        packed: field.packed(),
    };
    match field.field_type() {
        FieldType::Int32 | FieldType::Enum => h.set_int32(field, move |e: &Encoder, v| {
            let bits = match t.dtype {
                DescriptorType::SInt32 => zigzag_encode32(v).into(),
                DescriptorType::SFixed32 => (v as u32).into(),
                _ => v as i64 as u64,
            };
            e.value(t, bits)
        })?,
        FieldType::Int64 => h.set_int64(field, move |e: &Encoder, v| {
            let bits = match t.dtype {
                DescriptorType::SInt64 => zigzag_encode64(v),
                _ => v as u64,
            };
            e.value(t, bits)
        })?,
        FieldType::UInt32 => h.set_uint32(field, move |e: &Encoder, v| e.value(t, v.into()))?,
        FieldType::UInt64 => h.set_uint64(field, move |e: &Encoder, v| e.value(t, v))?,
        FieldType::Float =>
            h.set_float(field, move |e: &Encoder, v| e.value(t, v.to_bits().into()))?,
        FieldType::Double =>
            h.set_double(field, move |e: &Encoder, v| e.value(t, v.to_bits()))?,
        FieldType::Bool => h.set_bool(field, move |e: &Encoder, v| e.value(t, v.into()))?,
        FieldType::String | FieldType::Bytes => {
            h.set_start_str(field, move |e: &Rc<Encoder>, _| {
                e.start_delimited(t.number);
                cont(e)
            })?;
            h.set_string(field, |e: &Encoder, buf| e.bytes(buf))?;
            h.set_end_str(field, |e: &Encoder| e.end_delimited())?;
        },
        FieldType::Message if field.is_tag_delimited() => {
            h.set_start_submsg(field, move |e: &Rc<Encoder>| {
                e.tag(t.number, WireType::StartGroup);
                cont(e)
            })?;
            h.set_end_submsg(field, move |e: &Encoder| {
                e.tag(t.number, WireType::EndGroup);
                true
            })?;
        },
        FieldType::Message => {
            h.set_start_submsg(field, move |e: &Rc<Encoder>| {
                e.start_delimited(t.number);
                cont(e)
            })?;
            h.set_end_submsg(field, |e: &Encoder| e.end_delimited())?;
        },
    }
    if t.packed {
        h.set_start_seq(field, move |e: &Rc<Encoder>| {
            e.start_delimited(t.number);
            cont(e)
        })?;
        h.set_end_seq(field, |e: &Encoder| e.end_delimited())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            def::{FieldDef, IntFmt, Label, MessageDef, freeze},
            handlers::{HandlerType, get_selector},
        },
    };

    fn sel(field: &FieldView, ty: HandlerType) -> u32
    {
        get_selector(field, ty).unwrap()
    }

    fn open(c: ContinueOrBreak<Sink>) -> Sink
    {
        match c {
            ContinueOrBreak::Continue(s) => s,
            ContinueOrBreak::Break => panic!("encoder never breaks"),
        }
    }

    #[test]
    fn nested_message()
    {
        let foo = MessageDef::named("Foo").unwrap();
        let bar = MessageDef::named("Bar").unwrap();
        let x = FieldDef::named("x", 1, FieldType::Int32).unwrap();
        let y = FieldDef::named("y", 2, FieldType::Message).unwrap();
        y.set_subdef(&bar.as_def()).unwrap();
        let s = FieldDef::named("s", 1, FieldType::String).unwrap();
        foo.add_field(&x).unwrap();
        foo.add_field(&y).unwrap();
        bar.add_field(&s).unwrap();
        let views = freeze(&[foo.as_def(), bar.as_def()]).unwrap();
        let foo = views[0].as_message().unwrap();
        let bar = views[1].as_message().unwrap();
        let (x, y) = (foo.field_by_name("x").unwrap(), foo.field_by_name("y").unwrap());
        let s = bar.field_by_name("s").unwrap();

        let enc = Encoder::new();
        let sink = enc.sink(&Encoder::handlers(&foo).unwrap());
        assert!(sink.start_msg());
        assert!(sink.put_int32(x.selector_base(), 7));
        let sub = open(sink.start_submsg(sel(&y, HandlerType::StartSubMsg)));
        let string = open(sub.start_str(sel(&s, HandlerType::StartStr), 2));
        assert_eq!(string.put_string(sel(&s, HandlerType::String), b"hi"), 2);
        assert!(sub.end_str(sel(&s, HandlerType::EndStr)));
        assert!(sink.end_submsg(sel(&y, HandlerType::EndSubMsg)));
        assert!(enc.is_balanced());
        assert_eq!(enc.take_output(), [0x08, 0x07, 0x12, 0x04, 0x0A, 0x02, 0x68, 0x69]);
    }

    #[test]
    fn packed_and_fixed()
    {
        let m = MessageDef::named("M").unwrap();
        let p = FieldDef::named("p", 4, FieldType::Int32).unwrap();
        p.set_label(Label::Repeated).unwrap();
        let z = FieldDef::named("z", 5, FieldType::Int64).unwrap();
        z.set_int_fmt(IntFmt::ZigZag).unwrap();
        let f = FieldDef::named("f", 6, FieldType::UInt32).unwrap();
        f.set_int_fmt(IntFmt::Fixed).unwrap();
        m.add_field(&p).unwrap();
        m.add_field(&z).unwrap();
        m.add_field(&f).unwrap();
        let m = freeze(&[m.as_def()]).unwrap()[0].as_message().unwrap();
        let p = m.field_by_name("p").unwrap();
        assert!(p.packed());

        let enc = Encoder::new();
        let sink = enc.sink(&Encoder::handlers(&m).unwrap());
        let seq = open(sink.start_seq(sel(&p, HandlerType::StartSeq)));
        for v in [1, 300] {
            assert!(seq.put_int32(p.selector_base(), v));
        }
        assert!(sink.end_seq(sel(&p, HandlerType::EndSeq)));
        assert!(sink.put_int64(m.field_by_name("z").unwrap().selector_base(), -2));
        assert!(sink.put_uint32(m.field_by_name("f").unwrap().selector_base(), 1));
        assert_eq!(enc.take_output(), [
            0x22, 0x03, 0x01, 0xAC, 0x02,
            0x28, 0x03,
            0x35, 0x01, 0x00, 0x00, 0x00,
        ]);
    }
}
