//! Handler tables: the callbacks a parse delivers its events to.
//!
//! A [`Handlers`] table belongs to one message type and has one slot per
//! selector of that message (see [`get_selector`]).
//! Each slot holds a callback and the type of the closure it expects.
//! Closures flow from handler to handler: start handlers return the closure
//! the nested handlers receive, so slot types are checked as they are set.
//!
//! Tables are frozen like definitions, after which they are immutable,
//! and may be shared between threads and used by any number of sinks.

pub use self::{bytes::*, selector::*};

use {
    crate::{
        Error, Result, Status,
        def::{FieldView, MessageView},
        refcounted::{Handle, Link, MAX_SCHEMA_DEPTH, Obj, Owner, Plan, Ref, RefCounted, SubRef},
    },
    rime_table::IntTable,
    std::{any::{Any, TypeId}, fmt, rc::Rc, sync::Arc},
    tracing::debug,
};

mod bytes;
mod selector;

/// Value handlers receive and start handlers create.
pub type Closure = Rc<dyn Any>;

/// Data a handler table keeps alive for its handlers.
pub type HandlerData = Arc<dyn Any + Send + Sync>;

/// Result of a start handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContinueOrBreak<T>
{
    /// Keep parsing, with this closure for the nested events.
    Continue(T),

    /// Suspend the parse.
    Break,
}

impl<T> ContinueOrBreak<T>
{
    /// Apply `f` to the continued value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ContinueOrBreak<U>
    {
        match self {
            ContinueOrBreak::Continue(t) => ContinueOrBreak::Continue(f(t)),
            ContinueOrBreak::Break => ContinueOrBreak::Break,
        }
    }
}

type Callback<F> = Arc<F>;

/// Untyped callback in a handler slot.
#[derive(Clone)]
pub (crate) enum HandlerFn
{
    StartMsg(Callback<dyn Fn(&Closure) -> bool + Send + Sync>),
    EndMsg(Callback<dyn Fn(&Closure, &mut Status) -> bool + Send + Sync>),
    Int32(Callback<dyn Fn(&Closure, i32) -> bool + Send + Sync>),
    Int64(Callback<dyn Fn(&Closure, i64) -> bool + Send + Sync>),
    UInt32(Callback<dyn Fn(&Closure, u32) -> bool + Send + Sync>),
    UInt64(Callback<dyn Fn(&Closure, u64) -> bool + Send + Sync>),
    Float(Callback<dyn Fn(&Closure, f32) -> bool + Send + Sync>),
    Double(Callback<dyn Fn(&Closure, f64) -> bool + Send + Sync>),
    Bool(Callback<dyn Fn(&Closure, bool) -> bool + Send + Sync>),
    Start(Callback<dyn Fn(&Closure) -> ContinueOrBreak<Closure> + Send + Sync>),
    StartStr(Callback<dyn Fn(&Closure, usize) -> ContinueOrBreak<Closure> + Send + Sync>),
    String(Callback<dyn Fn(&Closure, &[u8]) -> usize + Send + Sync>),
    End(Callback<dyn Fn(&Closure) -> bool + Send + Sync>),
}

/// Callback with the closure types it was registered with.
#[derive(Clone)]
pub (crate) struct Handler
{
    pub func: HandlerFn,
    pub closure_type: TypeId,
    pub return_type: Option<TypeId>,
}

/// Wrap a typed start handler into an untyped one.
fn start_fn<C, R>(f: impl Fn(&Rc<C>) -> ContinueOrBreak<Rc<R>> + Send + Sync + 'static)
    -> HandlerFn
    where C: 'static, R: 'static
{
    HandlerFn::Start(Arc::new(move |c: &Closure| match c.clone().downcast::<C>() {
        Ok(c) => f(&c).map(|r| r as Closure),
        Err(_) => ContinueOrBreak::Break,
    }))
}

fn end_fn<C>(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> HandlerFn
    where C: 'static
{
    HandlerFn::End(Arc::new(move |c: &Closure| c.downcast_ref::<C>().map_or(false, &f)))
}

/* -------------------------------------------------------------------------- */
/*                               Table data                                   */
/* -------------------------------------------------------------------------- */

pub (crate) struct HandlersData
{
    msg: MessageView,
    table: Vec<Option<Handler>>,

    /// Handlers for submessages, by field index.
    sub: Vec<Option<SubRef<HandlersData>>>,

    top_closure_type: Option<TypeId>,
    cleanup: Vec<HandlerData>,
}

pub (crate) struct FrozenHandlers
{
    msg: MessageView,
    table: Vec<Option<Handler>>,
    sub: Vec<Option<Link<FrozenHandlers>>>,
    top_closure_type: Option<TypeId>,
    _cleanup: Vec<HandlerData>,
}

impl RefCounted for HandlersData
{
    type Frozen = FrozenHandlers;

    fn visit(&self, f: &mut dyn FnMut(&Obj<Self>))
    {
        self.sub.iter().flatten().filter_map(SubRef::as_mutable).for_each(f);
    }

    fn freeze(self, link: &mut dyn FnMut(&SubRef<Self>) -> Link<Self::Frozen>)
        -> Self::Frozen
    {
        FrozenHandlers{
            msg: self.msg,
            table: self.table,
            sub: self.sub.iter().map(|s| s.as_ref().map(&mut *link)).collect(),
            top_closure_type: self.top_closure_type,
            _cleanup: self.cleanup,
        }
    }
}

/// Which slot a handler is being set for.
#[derive(Clone, Copy)]
enum Slot
{
    StartMsg,
    EndMsg,
    Field(HandlerType),
}

impl HandlersData
{
    fn return_type(&self, sel: Option<u32>) -> Option<TypeId>
    {
        let sel = sel?;
        self.table[sel as usize].as_ref()?.return_type
    }

    /// Closure type the handler in `slot` must take, if already fixed.
    fn expected_closure(&self, field: Option<&FieldView>, slot: Slot) -> Option<TypeId>
    {
        let top = self.top_closure_type;
        let Some(field) = field else { return top };
        let seq = self.return_type(get_selector(field, HandlerType::StartSeq));
        match slot {
            Slot::StartMsg | Slot::EndMsg
                | Slot::Field(HandlerType::StartSeq | HandlerType::EndSeq) => top,
            Slot::Field(HandlerType::String) =>
                self.return_type(get_selector(field, HandlerType::StartStr))
                    .or(seq).or(top),
            Slot::Field(_) => seq.or(top),
        }
    }

    /// Check that handlers already set inside a start handler take `ret`.
    fn check_inner(&self, field: &FieldView, ty: HandlerType, ret: TypeId) -> Result<()>
    {
        let string_has_own = self.return_type(get_selector(field, HandlerType::StartStr)).is_some();
        let inner = |t: HandlerType| match ty {
            HandlerType::StartStr => t == HandlerType::String,
            HandlerType::StartSeq =>
                !matches!(t, HandlerType::StartSeq | HandlerType::EndSeq)
                    && !(t == HandlerType::String && string_has_own),
            _ => false,
        };
        for t in HandlerType::ALL.into_iter().filter(|&t| inner(t)) {
            let Some(sel) = get_selector(field, t) else { continue };
            match &self.table[sel as usize] {
                Some(h) if h.closure_type != ret => return Err(Error::ClosureTypeMismatch),
                _ => (),
            }
        }
        Ok(())
    }

    fn set(&mut self, field: Option<&FieldView>, slot: Slot, sel: u32, handler: Handler)
        -> Result<()>
    {
        let expected = self.expected_closure(field, slot);
        if expected.map_or(false, |t| t != handler.closure_type) {
            return Err(Error::ClosureTypeMismatch);
        }
        if let (Some(field), Slot::Field(ty), Some(ret)) = (field, slot, handler.return_type) {
            self.check_inner(field, ty, ret)?;
        }
        if expected.is_none() {
            self.top_closure_type = Some(handler.closure_type);
        }
        self.table[sel as usize] = Some(handler);
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/*                             Mutable tables                                 */
/* -------------------------------------------------------------------------- */

/// Mutable handler table for one message type.
#[derive(Clone)]
pub struct Handlers(Ref<HandlersData>);

macro_rules! value_setters
{
    ($($name:ident, $variant:ident, $ty:ty;)*) => {
        $(
            #[allow(missing_docs)]
            pub fn $name<C>(
                &self,
                field: &FieldView,
                f: impl Fn(&C, $ty) -> bool + Send + Sync + 'static,
            ) -> Result<()>
                where C: 'static
            {
                let func = HandlerFn::$variant(Arc::new(move |c: &Closure, v: $ty| {
                    c.downcast_ref::<C>().map_or(false, |c| f(c, v))
                }));
                self.set_field(field, HandlerType::$variant, func, TypeId::of::<C>(), None)
            }
        )*
    };
}

impl Handlers
{
    /// Create an empty table for `msg`.
    pub fn new(msg: &MessageView) -> Self
    {
        let data = HandlersData{
            msg: msg.clone(),
            table: vec![None; msg.selector_count() as usize],
            sub: vec![None; msg.submsg_field_count() as usize],
            top_closure_type: None,
            cleanup: Vec::new(),
        };
        Self(Ref::new(data, Owner::UNTRACKED))
    }

    /// Message the table handles.
    pub fn message(&self) -> MessageView
    {
        match self.0.frozen() {
            Some(frozen) => frozen.get().msg.clone(),
            None => self.0.with(|d| d.msg.clone())
                .expect("Tables are either frozen or mutable"),
        }
    }

    /// Whether the table was frozen.
    pub fn is_frozen(&self) -> bool
    {
        self.0.is_frozen()
    }

    /// The frozen table, once frozen.
    pub fn view(&self) -> Option<HandlersView>
    {
        self.0.frozen().map(HandlersView)
    }

    /// Keep `data` alive for as long as the table.
    pub fn add_cleanup(&self, data: HandlerData) -> Result<()>
    {
        self.0.with_mut(|d| d.cleanup.push(data))
    }

    fn set_field(
        &self,
        field: &FieldView,
        ty: HandlerType,
        func: HandlerFn,
        closure_type: TypeId,
        return_type: Option<TypeId>,
    ) -> Result<()>
    {
        self.0.with_mut(|d| {
            if !field.containing_type().map_or(false, |m| m.ptr_eq(&d.msg)) {
                return Err(Error::InvalidField("field is not in the handled message".into()));
            }
            let sel = get_selector(field, ty).ok_or_else(|| {
                Error::InvalidField(format!("{ty:?} handler for {:?}", field.name()))
            })?;
            let handler = Handler{func, closure_type, return_type};
            d.set(Some(field), Slot::Field(ty), sel, handler)
        })?
    }

    /// Set the handler called when a message starts.
    pub fn set_start_msg<C>(&self, f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Result<()>
        where C: 'static
    {
        let func = HandlerFn::StartMsg(Arc::new(move |c: &Closure| {
            c.downcast_ref::<C>().map_or(false, &f)
        }));
        let handler = Handler{func, closure_type: TypeId::of::<C>(), return_type: None};
        self.0.with_mut(|d| d.set(None, Slot::StartMsg, STARTMSG_SELECTOR, handler))?
    }

    /// Set the handler called when a message ends.
    ///
    /// The handler may record an error in the status.
    pub fn set_end_msg<C>(
        &self,
        f: impl Fn(&C, &mut Status) -> bool + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static
    {
        let func = HandlerFn::EndMsg(Arc::new(move |c: &Closure, s: &mut Status| {
            c.downcast_ref::<C>().map_or(false, |c| f(c, s))
        }));
        let handler = Handler{func, closure_type: TypeId::of::<C>(), return_type: None};
        self.0.with_mut(|d| d.set(None, Slot::EndMsg, ENDMSG_SELECTOR, handler))?
    }

    value_setters!
    {
        set_int32,  Int32,  i32;
        set_int64,  Int64,  i64;
        set_uint32, UInt32, u32;
        set_uint64, UInt64, u64;
        set_float,  Float,  f32;
        set_double, Double, f64;
        set_bool,   Bool,   bool;
    }

    /// Set the handler called when a repeated field starts.
    pub fn set_start_seq<C, R>(
        &self,
        field: &FieldView,
        f: impl Fn(&Rc<C>) -> ContinueOrBreak<Rc<R>> + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static, R: 'static
    {
        let (c, r) = (TypeId::of::<C>(), Some(TypeId::of::<R>()));
        self.set_field(field, HandlerType::StartSeq, start_fn(f), c, r)
    }

    #[allow(missing_docs)]
    pub fn set_end_seq<C>(&self, field: &FieldView, f: impl Fn(&C) -> bool + Send + Sync + 'static)
        -> Result<()>
        where C: 'static
    {
        self.set_field(field, HandlerType::EndSeq, end_fn(f), TypeId::of::<C>(), None)
    }

    /// Set the handler called when a string starts.
    ///
    /// The handler receives the length of the string if known, or zero.
    pub fn set_start_str<C, R>(
        &self,
        field: &FieldView,
        f: impl Fn(&Rc<C>, usize) -> ContinueOrBreak<Rc<R>> + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static, R: 'static
    {
        let func = HandlerFn::StartStr(Arc::new(move |c: &Closure, hint| {
            match c.clone().downcast::<C>() {
                Ok(c) => f(&c, hint).map(|r| r as Closure),
                Err(_) => ContinueOrBreak::Break,
            }
        }));
        let (c, r) = (TypeId::of::<C>(), Some(TypeId::of::<R>()));
        self.set_field(field, HandlerType::StartStr, func, c, r)
    }

    /// Set the handler receiving string data.
    ///
    /// The handler returns how many bytes it consumed;
    /// fewer than it was given suspends the parse.
    pub fn set_string<C>(
        &self,
        field: &FieldView,
        f: impl Fn(&C, &[u8]) -> usize + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static
    {
        let func = HandlerFn::String(Arc::new(move |c: &Closure, buf: &[u8]| {
            c.downcast_ref::<C>().map_or(0, |c| f(c, buf))
        }));
        self.set_field(field, HandlerType::String, func, TypeId::of::<C>(), None)
    }

    #[allow(missing_docs)]
    pub fn set_end_str<C>(&self, field: &FieldView, f: impl Fn(&C) -> bool + Send + Sync + 'static)
        -> Result<()>
        where C: 'static
    {
        self.set_field(field, HandlerType::EndStr, end_fn(f), TypeId::of::<C>(), None)
    }

    /// Set the handler called when a submessage starts.
    ///
    /// The returned closure is the top closure of the submessage's handlers.
    pub fn set_start_submsg<C, R>(
        &self,
        field: &FieldView,
        f: impl Fn(&Rc<C>) -> ContinueOrBreak<Rc<R>> + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static, R: 'static
    {
        let (c, r) = (TypeId::of::<C>(), Some(TypeId::of::<R>()));
        self.set_field(field, HandlerType::StartSubMsg, start_fn(f), c, r)
    }

    #[allow(missing_docs)]
    pub fn set_end_submsg<C>(
        &self,
        field: &FieldView,
        f: impl Fn(&C) -> bool + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static
    {
        self.set_field(field, HandlerType::EndSubMsg, end_fn(f), TypeId::of::<C>(), None)
    }

    /// Use `sub` for the values of the message field `field`.
    pub fn set_sub_handlers(&self, field: &FieldView, sub: &Handlers) -> Result<()>
    {
        self.set_sub(field, &sub.message(), |from| SubRef::new(from, sub.0.obj()))
    }

    /// Use the frozen table `sub` for the values of the message field `field`.
    pub fn set_sub_handlers_view(&self, field: &FieldView, sub: &HandlersView) -> Result<()>
    {
        self.set_sub(field, sub.message(), |_| SubRef::frozen(sub.0.clone()))
    }

    fn set_sub(
        &self,
        field: &FieldView,
        sub_msg: &MessageView,
        make: impl FnOnce(&Obj<HandlersData>) -> SubRef<HandlersData>,
    ) -> Result<()>
    {
        let ok = self.0.with(|d| {
            field.containing_type().map_or(false, |m| m.ptr_eq(&d.msg))
                && field.message_subdef().map_or(false, |m| m.ptr_eq(sub_msg))
        })?;
        if !ok {
            return Err(Error::InvalidField("sub-handlers do not match the field".into()));
        }
        let sub = make(self.0.obj());
        self.0.with_mut(|d| d.sub[field.index() as usize] = Some(sub))
    }

    /// Freeze `handlers` together.
    ///
    /// Every mutable table reachable from `handlers` must be in it.
    /// On failure no table is modified.
    pub fn freeze(handlers: &[Handlers]) -> Result<Vec<HandlersView>>
    {
        let roots: Vec<_> = handlers.iter().map(|h| h.0.obj().clone()).collect();
        let plan = Plan::new(&roots, MAX_SCHEMA_DEPTH)?;

        let mut listed = IntTable::new();
        for root in &roots {
            let _ = listed.insert(root.addr(), ());
        }
        if plan.objects().any(|obj| !listed.contains(obj.addr())) {
            return Err(Error::NotFrozen);
        }

        Ok(plan.commit().into_iter().map(HandlersView).collect())
    }

    /// Build and freeze tables for `msg` and every message reachable from it.
    ///
    /// `callback` is called once per table to install its handlers.
    /// Each message gets one table, so recursive schemas get cyclic tables.
    pub fn new_frozen(
        msg: &MessageView,
        mut callback: impl FnMut(&Handlers) -> Result<()>,
    ) -> Result<HandlersView>
    {
        let mut built = IntTable::new();
        let mut all = Vec::new();
        let root = Self::build(msg, &mut callback, &mut built, &mut all)?;
        debug!(tables = all.len(), "freezing handler tables");
        let views = Self::freeze(&all)?;
        Ok(views[root].clone())
    }

    fn build(
        msg: &MessageView,
        callback: &mut dyn FnMut(&Handlers) -> Result<()>,
        built: &mut IntTable<usize>,
        all: &mut Vec<Handlers>,
    ) -> Result<usize>
    {
        if let Some(&i) = built.lookup(msg.addr()) {
            return Ok(i);
        }
        let handlers = Handlers::new(msg);
        let index = all.len();
        let _ = built.insert(msg.addr(), index);
        all.push(handlers.clone());
        callback(&handlers)?;

        for field in msg.fields().filter(FieldView::is_submessage) {
            let Some(sub_msg) = field.message_subdef() else { continue };
            let i = Self::build(&sub_msg, callback, built, all)?;
            handlers.set_sub_handlers(&field, &all[i].clone())?;
        }
        Ok(index)
    }
}

impl fmt::Debug for Handlers
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Handlers({:?})", self.message().full_name())
    }
}

/* -------------------------------------------------------------------------- */
/*                              Frozen tables                                 */
/* -------------------------------------------------------------------------- */

/// Frozen handler table.
#[derive(Clone)]
pub struct HandlersView(pub (crate) Handle<FrozenHandlers>);

impl HandlersView
{
    /// Message the table handles.
    pub fn message(&self) -> &MessageView
    {
        &self.0.get().msg
    }

    pub (crate) fn handler(&self, sel: u32) -> Option<&Handler>
    {
        self.0.get().table.get(sel as usize)?.as_ref()
    }

    /// Whether a handler is set for `sel`.
    pub fn has_handler(&self, sel: u32) -> bool
    {
        self.handler(sel).is_some()
    }

    /// Type of the closure the table's message-level handlers take.
    pub fn top_closure_type(&self) -> Option<TypeId>
    {
        self.0.get().top_closure_type
    }

    /// Handlers for the values of the message field `field`.
    pub fn sub_for_field(&self, field: &FieldView) -> Option<HandlersView>
    {
        self.sub_for_index(field.index())
    }

    /// Handlers for the submessage whose STARTSUBMSG selector is `sel`.
    pub fn sub_for_selector(&self, sel: u32) -> Option<HandlersView>
    {
        self.sub_for_index(sel.checked_sub(STATIC_SELECTOR_COUNT)?)
    }

    fn sub_for_index(&self, index: u32) -> Option<HandlersView>
    {
        let link = self.0.get().sub.get(index as usize)?.as_ref()?;
        Some(HandlersView(self.0.follow(link)))
    }

    /// Whether both views are of the same table.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        self.0.ptr_eq(&other.0)
    }

    /// Address of the table, as a cache key.
    pub fn addr(&self) -> u64
    {
        self.0.addr()
    }
}

impl fmt::Debug for HandlersView
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "HandlersView({:?})", self.message().full_name())
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::def::{FieldDef, FieldType, Label, MessageDef, freeze},
        std::cell::Cell,
    };

    fn schema() -> (MessageView, MessageView)
    {
        let m = MessageDef::named("M").unwrap();
        let n = MessageDef::named("N").unwrap();
        let a = FieldDef::named("a", 1, FieldType::Int32).unwrap();
        let s = FieldDef::named("s", 2, FieldType::String).unwrap();
        s.set_label(Label::Repeated).unwrap();
        let sub = FieldDef::named("sub", 3, FieldType::Message).unwrap();
        sub.set_subdef(&n.as_def()).unwrap();
        let again = FieldDef::named("again", 1, FieldType::Message).unwrap();
        again.set_subdef(&m.as_def()).unwrap();
        m.add_field(&a).unwrap();
        m.add_field(&s).unwrap();
        m.add_field(&sub).unwrap();
        n.add_field(&again).unwrap();
        let views = freeze(&[m.as_def(), n.as_def()]).unwrap();
        (views[0].as_message().unwrap(), views[1].as_message().unwrap())
    }

    struct Top;
    struct Seq;
    struct Str;

    #[test]
    fn closure_types_are_checked()
    {
        let (m, _) = schema();
        let h = Handlers::new(&m);
        let a = m.field_by_name("a").unwrap();
        let s = m.field_by_name("s").unwrap();

        h.set_start_msg(|_: &Top| true).unwrap();
        h.set_int32(&a, |_: &Top, _| true).unwrap();
        assert_eq!(h.set_int32(&a, |_: &Seq, _| true), Err(Error::ClosureTypeMismatch));

        h.set_start_seq(&s, |_: &Rc<Top>| ContinueOrBreak::Continue(Rc::new(Seq))).unwrap();
        h.set_start_str(&s, |_: &Rc<Seq>, _| ContinueOrBreak::Continue(Rc::new(Str))).unwrap();
        h.set_string(&s, |_: &Str, buf| buf.len()).unwrap();
        assert_eq!(h.set_end_str(&s, |_: &Str| true), Err(Error::ClosureTypeMismatch));
        h.set_end_str(&s, |_: &Seq| true).unwrap();
        h.set_end_seq(&s, |_: &Top| true).unwrap();
    }

    #[test]
    fn start_handlers_check_inner_handlers()
    {
        let (m, _) = schema();
        let h = Handlers::new(&m);
        let s = m.field_by_name("s").unwrap();
        h.set_end_str(&s, |_: &Top| true).unwrap();
        let r = h.set_start_seq(&s, |_: &Rc<Top>| ContinueOrBreak::Continue(Rc::new(Seq)));
        assert_eq!(r, Err(Error::ClosureTypeMismatch));
        h.set_start_seq(&s, |t: &Rc<Top>| ContinueOrBreak::Continue(t.clone())).unwrap();
    }

    #[test]
    fn foreign_fields_are_rejected()
    {
        let (m, n) = schema();
        let h = Handlers::new(&m);
        let again = n.field_by_name("again").unwrap();
        assert!(matches!(h.set_start_submsg(&again, |t: &Rc<Top>| ContinueOrBreak::Continue(t.clone())),
                         Err(Error::InvalidField(_))));
        let a = m.field_by_name("a").unwrap();
        assert!(matches!(h.set_bool(&a, |_: &Top, _| true), Err(Error::InvalidField(_))));
    }

    #[test]
    fn freeze_needs_every_reachable_table()
    {
        let (m, n) = schema();
        let hm = Handlers::new(&m);
        let hn = Handlers::new(&n);
        hm.set_sub_handlers(&m.field_by_name("sub").unwrap(), &hn).unwrap();
        assert!(matches!(hm.set_sub_handlers(&m.field_by_name("sub").unwrap(), &hm),
                         Err(Error::InvalidField(_))));

        assert_eq!(Handlers::freeze(&[hm.clone()]).err(), Some(Error::NotFrozen));
        assert!(!hm.is_frozen());
        let views = Handlers::freeze(&[hm.clone(), hn]).unwrap();
        let sub = views[0].sub_for_field(&m.field_by_name("sub").unwrap()).unwrap();
        assert!(sub.message().ptr_eq(&n));
        assert_eq!(hm.set_start_msg(|_: &Top| true), Err(Error::Frozen));
    }

    #[test]
    fn new_frozen_builds_cyclic_tables()
    {
        let (m, n) = schema();
        let calls = Cell::new(0);
        let view = Handlers::new_frozen(&m, |h| {
            calls.set(calls.get() + 1);
            h.set_start_msg(|_: &Top| true)
        }).unwrap();
        assert_eq!(calls.get(), 2);

        let sub_field = m.field_by_name("sub").unwrap();
        let hn = view.sub_for_field(&sub_field).unwrap();
        assert!(hn.message().ptr_eq(&n));
        let sel = get_selector(&n.field_by_name("again").unwrap(), HandlerType::StartSubMsg).unwrap();
        assert!(hn.sub_for_selector(sel).unwrap().ptr_eq(&view));
        assert!(view.has_handler(STARTMSG_SELECTOR));
        assert_eq!(view.top_closure_type(), Some(TypeId::of::<Top>()));
    }
}
