//! Push-based event targets.
//!
//! A [`Sink`] pairs a frozen handler table with the closure its handlers
//! receive. Codecs push events into sinks; each event finds the slot at
//! its selector and calls the handler there, or succeeds silently if the
//! slot is empty. Start events return the sink for the nested events.

use {
    crate::{
        Status,
        handlers::{
            BytesHandler, Closure, ContinueOrBreak, ENDMSG_SELECTOR, ENDSTR_SELECTOR,
            HandlerFn, HandlersView, STARTMSG_SELECTOR, STARTSTR_SELECTOR, STRING_SELECTOR,
        },
    },
    std::{fmt, rc::Rc, sync::Arc},
};

/// Target of message events.
#[derive(Clone)]
pub struct Sink
{
    handlers: Option<HandlersView>,
    closure: Closure,
}

macro_rules! put_value
{
    ($($name:ident, $variant:ident, $ty:ty;)*) => {
        $(
            #[allow(missing_docs)]
            pub fn $name(&self, sel: u32, value: $ty) -> bool
            {
                match self.func(sel) {
                    Some(HandlerFn::$variant(f)) => f(&self.closure, value),
                    _ => true,
                }
            }
        )*
    };
}

impl Sink
{
    /// Sink delivering to `handlers` with `closure`.
    pub fn new(handlers: &HandlersView, closure: Closure) -> Self
    {
        Self{handlers: Some(handlers.clone()), closure}
    }

    /// Sink that accepts and drops every event.
    pub fn discard() -> Self
    {
        Self{handlers: None, closure: Rc::new(())}
    }

    /// Point the sink at other handlers and closure.
    pub fn reset(&mut self, handlers: &HandlersView, closure: Closure)
    {
        self.handlers = Some(handlers.clone());
        self.closure = closure;
    }

    /// Handlers events are delivered to.
    pub fn handlers(&self) -> Option<&HandlersView>
    {
        self.handlers.as_ref()
    }

    /// Closure handlers receive.
    pub fn closure(&self) -> &Closure
    {
        &self.closure
    }

    fn func(&self, sel: u32) -> Option<&HandlerFn>
    {
        Some(&self.handlers.as_ref()?.handler(sel)?.func)
    }

    fn child(&self, handlers: Option<HandlersView>, sel: u32) -> ContinueOrBreak<Sink>
    {
        let closure = match self.func(sel) {
            Some(HandlerFn::Start(f)) => f(&self.closure),
            _ => ContinueOrBreak::Continue(self.closure.clone()),
        };
        closure.map(|closure| Sink{handlers, closure})
    }

    #[allow(missing_docs)]
    pub fn start_msg(&self) -> bool
    {
        match self.func(STARTMSG_SELECTOR) {
            Some(HandlerFn::StartMsg(f)) => f(&self.closure),
            _ => true,
        }
    }

    /// End a message; the handler may record an error in `status`.
    pub fn end_msg(&self, status: &mut Status) -> bool
    {
        match self.func(ENDMSG_SELECTOR) {
            Some(HandlerFn::EndMsg(f)) => f(&self.closure, status),
            _ => true,
        }
    }

    put_value!
    {
        put_int32,  Int32,  i32;
        put_int64,  Int64,  i64;
        put_uint32, UInt32, u32;
        put_uint64, UInt64, u64;
        put_float,  Float,  f32;
        put_double, Double, f64;
        put_bool,   Bool,   bool;
    }

    /// Start a repeated field, returning the sink for its values.
    pub fn start_seq(&self, sel: u32) -> ContinueOrBreak<Sink>
    {
        self.child(self.handlers.clone(), sel)
    }

    #[allow(missing_docs)]
    pub fn end_seq(&self, sel: u32) -> bool
    {
        self.end(sel)
    }

    /// Start a string, returning the sink for its data.
    ///
    /// `size_hint` is the length of the string if known, or zero.
    pub fn start_str(&self, sel: u32, size_hint: usize) -> ContinueOrBreak<Sink>
    {
        let closure = match self.func(sel) {
            Some(HandlerFn::StartStr(f)) => f(&self.closure, size_hint),
            _ => ContinueOrBreak::Continue(self.closure.clone()),
        };
        closure.map(|closure| Sink{handlers: self.handlers.clone(), closure})
    }

    /// Deliver string data, returning how many bytes were consumed.
    pub fn put_string(&self, sel: u32, buf: &[u8]) -> usize
    {
        match self.func(sel) {
            Some(HandlerFn::String(f)) => f(&self.closure, buf),
            _ => buf.len(),
        }
    }

    #[allow(missing_docs)]
    pub fn end_str(&self, sel: u32) -> bool
    {
        self.end(sel)
    }

    /// Start a submessage, returning the sink for its fields.
    ///
    /// The child sink delivers to the sub-handlers of the field,
    /// or drops its events if there are none.
    pub fn start_submsg(&self, sel: u32) -> ContinueOrBreak<Sink>
    {
        let sub = self.handlers.as_ref().and_then(|h| h.sub_for_selector(sel));
        self.child(sub, sel)
    }

    #[allow(missing_docs)]
    pub fn end_submsg(&self, sel: u32) -> bool
    {
        self.end(sel)
    }

    fn end(&self, sel: u32) -> bool
    {
        match self.func(sel) {
            Some(HandlerFn::End(f)) => f(&self.closure),
            _ => true,
        }
    }
}

impl fmt::Debug for Sink
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Sink").field("handlers", &self.handlers).finish_non_exhaustive()
    }
}

/* -------------------------------------------------------------------------- */
/*                               Byte sinks                                   */
/* -------------------------------------------------------------------------- */

/// Target of a plain byte stream.
#[derive(Clone)]
pub struct BytesSink
{
    handler: Arc<BytesHandler>,
    closure: Closure,
}

impl BytesSink
{
    /// Sink delivering to `handler` with `closure`.
    pub fn new(handler: Arc<BytesHandler>, closure: Closure) -> Self
    {
        Self{handler, closure}
    }

    /// Point the sink at another handler and closure.
    pub fn reset(&mut self, handler: Arc<BytesHandler>, closure: Closure)
    {
        self.handler = handler;
        self.closure = closure;
    }

    fn func(&self, sel: u32) -> Option<&HandlerFn>
    {
        Some(&self.handler.handler(sel)?.func)
    }

    /// Start the stream, returning the closure for its data.
    pub fn start(&self, size_hint: usize) -> ContinueOrBreak<Closure>
    {
        match self.func(STARTSTR_SELECTOR) {
            Some(HandlerFn::StartStr(f)) => f(&self.closure, size_hint),
            _ => ContinueOrBreak::Continue(self.closure.clone()),
        }
    }

    /// Deliver bytes to the closure `start` returned.
    pub fn put_buf(&self, closure: &Closure, buf: &[u8]) -> usize
    {
        match self.func(STRING_SELECTOR) {
            Some(HandlerFn::String(f)) => f(closure, buf),
            _ => buf.len(),
        }
    }

    /// End the stream.
    pub fn end(&self) -> bool
    {
        match self.func(ENDSTR_SELECTOR) {
            Some(HandlerFn::End(f)) => f(&self.closure),
            _ => true,
        }
    }
}

impl fmt::Debug for BytesSink
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("BytesSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            def::{FieldDef, FieldType, Label, MessageDef, freeze},
            handlers::{HandlerType, Handlers, get_selector},
        },
        std::cell::RefCell,
    };

    #[test]
    fn events_reach_handlers()
    {
        let n = MessageDef::named("N").unwrap();
        let m = MessageDef::named("M").unwrap();
        let a = FieldDef::named("a", 1, FieldType::Int32).unwrap();
        a.set_label(Label::Repeated).unwrap();
        let sub = FieldDef::named("sub", 2, FieldType::Message).unwrap();
        sub.set_subdef(&n.as_def()).unwrap();
        m.add_field(&a).unwrap();
        m.add_field(&sub).unwrap();
        let views = freeze(&[m.as_def(), n.as_def()]).unwrap();
        let m = views[0].as_message().unwrap();
        let a = m.field_by_name("a").unwrap();
        let sub = m.field_by_name("sub").unwrap();

        let h = Handlers::new(&m);
        h.set_int32(&a, |log: &RefCell<Vec<i32>>, v| { log.borrow_mut().push(v); true }).unwrap();
        h.set_end_seq(&a, |log: &RefCell<Vec<i32>>| { log.borrow_mut().push(-1); true }).unwrap();
        h.set_start_submsg(&sub, |_: &Rc<RefCell<Vec<i32>>>| ContinueOrBreak::<Rc<()>>::Break)
            .unwrap();
        let h = Handlers::freeze(&[h]).unwrap().remove(0);

        let log = Rc::new(RefCell::new(Vec::<i32>::new()));
        let sink = Sink::new(&h, log.clone());
        assert!(sink.start_msg());
        let seq = match sink.start_seq(get_selector(&a, HandlerType::StartSeq).unwrap()) {
            ContinueOrBreak::Continue(s) => s,
            ContinueOrBreak::Break => panic!("sequence should start"),
        };
        assert!(seq.put_int32(a.selector_base(), 7));
        assert!(sink.end_seq(get_selector(&a, HandlerType::EndSeq).unwrap()));
        let start = get_selector(&sub, HandlerType::StartSubMsg).unwrap();
        assert!(matches!(sink.start_submsg(start), ContinueOrBreak::Break));
        assert_eq!(*log.borrow(), [7, -1]);

        let mut status = Status::new();
        assert!(sink.end_msg(&mut status));
        assert!(status.ok());
    }

    #[test]
    fn discard_accepts_everything()
    {
        let sink = Sink::discard();
        assert!(sink.start_msg());
        assert!(sink.put_double(5, 1.0));
        assert_eq!(sink.put_string(3, b"abc"), 3);
        assert!(matches!(sink.start_submsg(2), ContinueOrBreak::Continue(_)));
    }
}
