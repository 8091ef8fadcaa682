//! Compilation of handler tables into decoder bytecode.
//!
//! Each message type reached from the root handlers becomes a method:
//!
//! ```text
//! base:     SETDISPATCH m
//!           STARTMSG
//!           CHECKDELIM end
//! dispatch: DISPATCH
//!           <one block per field, in field number order>
//! end:      ENDMSG
//!           RET
//! ```
//!
//! Every field block ends by checking the frame delimiter, trying the tag
//! of the next field by number, and branching back to `dispatch`.
//! All methods of one root share a code buffer, the *program*.

use {
    super::opcode::{ExpectedTag, MAX_ARG, Op},
    crate::{
        Error, Result,
        def::{FieldView, MessageView},
        handlers::{HandlerType, HandlersView, get_selector},
        wire::{DescriptorType, MAX_FIELDNUMBER, WireType, make_tag},
    },
    rime_table::IntTable,
    tracing::debug,
};

/// Options that change the code generated for a handler table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CompileOptions
{
    /// Deliver lazy submessage fields to their string handlers, if set,
    /// instead of parsing them.
    pub lazy: bool,
}

/// Dispatch entry wire type meaning "none".
pub (super) const NO_WIRE_TYPE: u8 = 0xFF;

/// Compiled decoder for one root message and everything it reaches.
pub struct Program
{
    pub (super) code: Vec<u32>,
    pub (super) methods: Vec<Method>,
}

/// Code for one message type.
pub (super) struct Method
{
    pub base: u32,
    pub dispatch_pc: u32,
    pub end_pc: u32,

    /// Field number to packed `offset << 16 | wire type 2 << 8 | wire type 1`.
    /// Alternate encodings are keyed at `MAX_FIELDNUMBER + number`.
    pub dispatch: IntTable<u64>,
}

impl Program
{
    /// Number of methods in the program.
    pub fn method_count(&self) -> usize
    {
        self.methods.len()
    }

    /// Number of code words in the program.
    pub fn code_len(&self) -> usize
    {
        self.code.len()
    }

    pub (super) fn root(&self) -> &Method
    {
        &self.methods[0]
    }
}

/// Split a dispatch entry into code offset and the two wire types.
pub (super) fn split_entry(entry: u64) -> (u32, u8, u8)
{
    ((entry >> 16) as u32, entry as u8, (entry >> 8) as u8)
}

/// Compile `handlers` and every table reachable from it.
///
/// Fails with [`Error::ProgramTooLarge`] if an address or a relative jump
/// does not fit its instruction.
pub fn compile(handlers: &HandlersView, options: CompileOptions) -> Result<Program>
{
    let mut c = Compiler{
        options,
        code: Vec::new(),
        labels: Vec::new(),
        fixups: Vec::new(),
        methods: Vec::new(),
        keys: IntTable::new(),
        queue: Vec::new(),
    };
    Op::Halt.encode(&mut c.code);
    c.method_for(Source{msg: handlers.message().clone(), handlers: Some(handlers.clone())})?;
    while let Some((index, source)) = c.queue.pop() {
        c.compile_method(index, &source)?;
    }
    c.finish()
}

type Label = usize;

enum Fixup
{
    Arg{at: usize, label: Label},
    Tag{at: usize, label: Label, tag: ExpectedTag},
}

struct PendingMethod
{
    base: Label,
    dispatch_pc: u32,
    end: Label,
    entries: Vec<(u64, Label, u8, u8)>,
}

/// Message type and the handlers its events go to, if any.
struct Source
{
    msg: MessageView,
    handlers: Option<HandlersView>,
}

impl Source
{
    fn key(&self) -> u64
    {
        self.handlers.as_ref().map_or(self.msg.addr(), HandlersView::addr)
    }
}

struct Compiler
{
    options: CompileOptions,
    code: Vec<u32>,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    methods: Vec<PendingMethod>,
    keys: IntTable<usize>,
    queue: Vec<(usize, Source)>,
}

/// Where a field block goes when it is done.
struct Epilogue
{
    end: Label,
    dispatch_pc: u32,
    next: Option<(Label, ExpectedTag)>,
}

impl Compiler
{
    fn pc(&self) -> u32
    {
        self.code.len() as u32
    }

    fn label(&mut self) -> Label
    {
        self.labels.push(None);
        self.labels.len() - 1
    }

    fn bind(&mut self, label: Label)
    {
        self.labels[label] = Some(self.pc());
    }

    fn emit(&mut self, op: Op)
    {
        op.encode(&mut self.code);
    }

    /// Emit an instruction whose argument is the address of `label`.
    fn emit_to(&mut self, op: fn(u32) -> Op, label: Label)
    {
        self.fixups.push(Fixup::Arg{at: self.code.len(), label});
        self.emit(op(0));
    }

    fn emit_tag(&mut self, tag: ExpectedTag, label: Label)
    {
        self.fixups.push(Fixup::Tag{at: self.code.len(), label, tag});
        self.emit(Op::Tag(tag, 0));
    }

    /// Index of the method for `source`, queueing it if new.
    fn method_for(&mut self, source: Source) -> Result<usize>
    {
        if let Some(&index) = self.keys.lookup(source.key()) {
            return Ok(index);
        }
        let index = self.methods.len();
        let (base, end) = (self.label(), self.label());
        self.methods.push(PendingMethod{base, dispatch_pc: 0, end, entries: Vec::new()});
        self.keys.insert(source.key(), index)?;
        self.queue.push((index, source));
        Ok(index)
    }

    fn compile_method(&mut self, index: usize, source: &Source) -> Result<()>
    {
        let (base, end) = (self.methods[index].base, self.methods[index].end);
        self.bind(base);
        self.emit(Op::SetDispatch(index as u32));
        self.emit(Op::StartMsg);
        self.emit_to(Op::CheckDelim, end);
        let dispatch_pc = self.pc();
        self.methods[index].dispatch_pc = dispatch_pc;
        self.emit(Op::Dispatch);

        let fields: Vec<FieldView> = source.msg.fields().collect();
        let entries: Vec<Label> = fields.iter().map(|_| self.label()).collect();
        for (i, field) in fields.iter().enumerate() {
            let next = fields.get(i + 1).map(|f| (entries[i + 1], primary_tag(f)));
            let epilogue = Epilogue{end, dispatch_pc, next};
            self.compile_field(index, source, field, entries[i], &epilogue)?;
        }

        self.bind(end);
        self.emit(Op::EndMsg);
        self.emit(Op::Ret);
        Ok(())
    }

    fn epilogue(&mut self, e: &Epilogue)
    {
        self.emit_to(Op::CheckDelim, e.end);
        if let Some((label, tag)) = e.next {
            self.emit_tag(tag, label);
        }
        self.emit(Op::Branch(e.dispatch_pc));
    }

    fn add_entry(&mut self, method: usize, key: u64, label: Label, wt1: u8, wt2: u8)
    {
        self.methods[method].entries.push((key, label, wt1, wt2));
    }

    fn compile_field(
        &mut self,
        method: usize,
        source: &Source,
        field: &FieldView,
        entry: Label,
        epilogue: &Epilogue,
    ) -> Result<()>
    {
        let number = u64::from(field.number());
        let dtype = field.descriptor_type();
        let value_wt = dtype.wire_type() as u8;

        if field.is_primitive() && field.is_sequence() {
            let alt = self.label();
            let packed_wt = WireType::LengthDelimited as u8;
            let (primary_wt, alt_wt) = match field.packed() {
                true => (packed_wt, value_wt),
                false => (value_wt, packed_wt),
            };
            self.bind(alt);
            self.primitive_seq(field, !field.packed(), epilogue);
            self.bind(entry);
            self.primitive_seq(field, field.packed(), epilogue);
            self.add_entry(method, number, entry, primary_wt, alt_wt);
            self.add_entry(method, u64::from(MAX_FIELDNUMBER) + number, alt, alt_wt, NO_WIRE_TYPE);
            return Ok(());
        }

        let lazy = self.options.lazy && field.lazy() && source.handlers.as_ref()
            .zip(get_selector(field, HandlerType::String))
            .map_or(false, |(h, sel)| h.has_handler(sel));
        self.bind(entry);
        let sub = match field.is_submessage() && !lazy {
            true => {
                let sub = Source{
                    msg: field.message_subdef()
                        .unwrap_or_else(|| unreachable!("Frozen message fields have a subdef")),
                    handlers: source.handlers.as_ref().and_then(|h| h.sub_for_field(field)),
                };
                Some(self.method_for(sub)?)
            },
            false => None,
        };

        if field.is_sequence() {
            let (item, exit) = (self.label(), self.label());
            self.emit(Op::PushTagDelim(0));
            self.emit(Op::StartSeq(selector(field, HandlerType::StartSeq)));
            self.bind(item);
            self.item(field, sub);
            self.emit_to(Op::CheckDelim, exit);
            self.emit_tag(primary_tag(field), item);
            self.bind(exit);
            self.emit(Op::Pop);
            self.emit(Op::EndSeq(selector(field, HandlerType::EndSeq)));
        } else if field.is_primitive() {
            self.emit(Op::Parse(dtype, field.selector_base()));
        } else {
            self.item(field, sub);
        }
        self.epilogue(epilogue);
        self.add_entry(method, number, entry, value_wt, NO_WIRE_TYPE);
        Ok(())
    }

    /// Code for one string or submessage value, tag already read.
    fn item(&mut self, field: &FieldView, sub: Option<usize>)
    {
        let Some(sub) = sub else {
            self.emit(Op::PushLenDelim);
            self.emit(Op::StartStr(selector(field, HandlerType::StartStr)));
            self.emit(Op::String(selector(field, HandlerType::String)));
            self.emit(Op::Pop);
            self.emit(Op::EndStr(selector(field, HandlerType::EndStr)));
            return;
        };
        if field.is_tag_delimited() {
            match field.number() {
                n if n <= MAX_ARG => self.emit(Op::PushTagDelim(n)),
                n => {
                    self.emit(Op::PushTagDelim(0));
                    self.emit(Op::SetBigGroupNum(n));
                },
            }
        } else {
            self.emit(Op::PushLenDelim);
        }
        self.emit(Op::StartSubMsg(selector(field, HandlerType::StartSubMsg)));
        let base = self.methods[sub].base;
        self.emit_to(Op::Call, base);
        self.emit(Op::Pop);
        self.emit(Op::EndSubMsg(selector(field, HandlerType::EndSubMsg)));
    }

    /// Code for a repeated primitive field in one of its two encodings.
    fn primitive_seq(&mut self, field: &FieldView, packed: bool, epilogue: &Epilogue)
    {
        let dtype = field.descriptor_type();
        let (item, exit) = (self.label(), self.label());
        match packed {
            true => self.emit(Op::PushLenDelim),
            false => self.emit(Op::PushTagDelim(0)),
        }
        self.emit(Op::StartSeq(selector(field, HandlerType::StartSeq)));
        self.bind(item);
        if packed {
            self.emit_to(Op::CheckDelim, exit);
            self.emit(Op::Parse(dtype, field.selector_base()));
            self.emit_to(Op::Branch, item);
        } else {
            self.emit(Op::Parse(dtype, field.selector_base()));
            self.emit_to(Op::CheckDelim, exit);
            let tag = ExpectedTag::new(make_tag(field.number(), dtype.wire_type()));
            self.emit_tag(tag, item);
        }
        self.bind(exit);
        self.emit(Op::Pop);
        self.emit(Op::EndSeq(selector(field, HandlerType::EndSeq)));
        self.epilogue(epilogue);
    }

    fn finish(mut self) -> Result<Program>
    {
        if self.code.len() > MAX_ARG as usize {
            return Err(Error::ProgramTooLarge);
        }
        let addr = |labels: &[Option<u32>], label: Label| {
            labels[label].unwrap_or_else(|| unreachable!("Every label is bound"))
        };
        for fixup in &self.fixups {
            match *fixup {
                Fixup::Arg{at, label} => {
                    let target = addr(&self.labels, label);
                    self.code[at] = (self.code[at] & 0xFF) | target << 8;
                },
                Fixup::Tag{at, label, tag} => {
                    let jump = relative_jump(at, addr(&self.labels, label), tag.width())?;
                    let mut words = Vec::with_capacity(3);
                    Op::Tag(tag, jump).encode(&mut words);
                    self.code[at .. at + words.len()].copy_from_slice(&words);
                },
            }
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for m in &self.methods {
            let mut dispatch = IntTable::new();
            for &(key, label, wt1, wt2) in &m.entries {
                let offset = u64::from(addr(&self.labels, label));
                dispatch.insert(key, offset << 16 | u64::from(wt2) << 8 | u64::from(wt1))?;
            }
            methods.push(Method{
                base: addr(&self.labels, m.base),
                dispatch_pc: m.dispatch_pc,
                end_pc: addr(&self.labels, m.end),
                dispatch,
            });
        }

        debug!(methods = methods.len(), words = self.code.len(), "compiled decoder program");
        Ok(Program{code: self.code, methods})
    }
}

/// Offset from a `TAG` instruction at `from` to `to`,
/// if it fits the instruction of the given width.
fn relative_jump(from: usize, to: u32, width: usize) -> Result<i16>
{
    let jump = i64::from(to) - from as i64;
    let jump = match width {
        1 => i8::try_from(jump).map(i16::from).ok(),
        _ => i16::try_from(jump).ok(),
    };
    jump.ok_or(Error::ProgramTooLarge)
}

fn selector(field: &FieldView, ty: HandlerType) -> u32
{
    get_selector(field, ty)
        .unwrap_or_else(|| unreachable!("Compiled fields have a {ty:?} selector"))
}

/// Tag a field's values are most likely encoded with.
fn primary_tag(field: &FieldView) -> ExpectedTag
{
    let dtype = field.descriptor_type();
    let wt = match dtype {
        _ if field.packed() => WireType::LengthDelimited,
        DescriptorType::Group => WireType::StartGroup,
        _ => dtype.wire_type(),
    };
    ExpectedTag::new(make_tag(field.number(), wt))
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            def::{FieldDef, FieldType, Label as FieldLabel, MessageDef, freeze},
            handlers::Handlers,
        },
    };

    #[test]
    fn methods_are_shared()
    {
        let node = MessageDef::named("Node").unwrap();
        let child = FieldDef::named("child", 1, FieldType::Message).unwrap();
        child.set_subdef(&node.as_def()).unwrap();
        child.set_label(FieldLabel::Repeated).unwrap();
        let v = FieldDef::named("v", 2, FieldType::Int32).unwrap();
        v.set_label(FieldLabel::Repeated).unwrap();
        node.add_field(&child).unwrap();
        node.add_field(&v).unwrap();
        let node = freeze(&[node.as_def()]).unwrap()[0].as_message().unwrap();

        let handlers = Handlers::new_frozen(&node, |_| Ok(())).unwrap();
        let program = compile(&handlers, CompileOptions::default()).unwrap();
        assert_eq!(program.method_count(), 1);

        let root = program.root();
        assert_eq!(Op::decode(&program.code, root.base as usize), Op::SetDispatch(0));
        assert_eq!(Op::decode(&program.code, root.dispatch_pc as usize), Op::Dispatch);
        assert_eq!(Op::decode(&program.code, root.end_pc as usize), Op::EndMsg);

        let (_, wt1, wt2) = split_entry(*root.dispatch.lookup(2).unwrap());
        assert_eq!((wt1, wt2), (WireType::LengthDelimited as u8, WireType::Varint as u8));
        let alt = root.dispatch.lookup(u64::from(MAX_FIELDNUMBER) + 2).unwrap();
        let (offset, wt1, _) = split_entry(*alt);
        assert_eq!(wt1, WireType::Varint as u8);
        assert_eq!(Op::decode(&program.code, offset as usize), Op::PushTagDelim(0));
    }

    #[test]
    fn jumps_must_fit_their_tag()
    {
        assert_eq!(relative_jump(300, 200, 1), Ok(-100));
        assert_eq!(relative_jump(300, 100, 1), Err(Error::ProgramTooLarge));
        assert_eq!(relative_jump(300, 100, 3), Ok(-200));
        assert_eq!(relative_jump(0, 1 << 16, 3), Err(Error::ProgramTooLarge));
    }
}
