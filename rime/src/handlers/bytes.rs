use {
    super::{
        Closure, ContinueOrBreak, ENDSTR_SELECTOR, Handler, HandlerFn,
        STARTSTR_SELECTOR, STRING_SELECTOR,
    },
    crate::{Error, Result},
    std::{any::TypeId, rc::Rc, sync::Arc},
};

/// Handlers for a plain byte stream, as consumed by a decoder's input.
///
/// Slots are indexed by [`STARTSTR_SELECTOR`], [`STRING_SELECTOR`]
/// and [`ENDSTR_SELECTOR`].
#[derive(Clone, Default)]
pub struct BytesHandler
{
    table: [Option<Handler>; 3],
}

impl BytesHandler
{
    /// Handler with no slots set.
    pub fn new() -> Self
    {
        Self::default()
    }

    pub (crate) fn handler(&self, sel: u32) -> Option<&Handler>
    {
        self.table.get(sel as usize)?.as_ref()
    }

    fn set(&mut self, sel: u32, handler: Handler) -> Result<()>
    {
        let start = self.table[STARTSTR_SELECTOR as usize].as_ref();
        let ok = match sel {
            STRING_SELECTOR => start
                .map_or(true, |h| h.return_type == Some(handler.closure_type)),
            _ => self.table.iter().enumerate()
                .filter(|&(i, _)| i as u32 != STRING_SELECTOR && i as u32 != sel)
                .flat_map(|(_, h)| h)
                .all(|h| h.closure_type == handler.closure_type),
        };
        if !ok {
            return Err(Error::ClosureTypeMismatch);
        }
        self.table[sel as usize] = Some(handler);
        Ok(())
    }

    /// Set the handler called before the first bytes.
    pub fn set_start_str<C, R>(
        &mut self,
        f: impl Fn(&Rc<C>, usize) -> ContinueOrBreak<Rc<R>> + Send + Sync + 'static,
    ) -> Result<()>
        where C: 'static, R: 'static
    {
        let ret = TypeId::of::<R>();
        if let Some(h) = &self.table[STRING_SELECTOR as usize] {
            if h.closure_type != ret {
                return Err(Error::ClosureTypeMismatch);
            }
        }
        let func = HandlerFn::StartStr(Arc::new(move |c: &Closure, hint| {
            match c.clone().downcast::<C>() {
                Ok(c) => f(&c, hint).map(|r| r as Closure),
                Err(_) => ContinueOrBreak::Break,
            }
        }));
        let handler = Handler{func, closure_type: TypeId::of::<C>(), return_type: Some(ret)};
        self.set(STARTSTR_SELECTOR, handler)
    }

    /// Set the handler receiving the bytes.
    ///
    /// The handler returns how many bytes it consumed.
    pub fn set_string<C>(&mut self, f: impl Fn(&C, &[u8]) -> usize + Send + Sync + 'static)
        -> Result<()>
        where C: 'static
    {
        let func = HandlerFn::String(Arc::new(move |c: &Closure, buf: &[u8]| {
            c.downcast_ref::<C>().map_or(0, |c| f(c, buf))
        }));
        self.set(STRING_SELECTOR, Handler{func, closure_type: TypeId::of::<C>(), return_type: None})
    }

    /// Set the handler called after the last bytes.
    pub fn set_end_str<C>(&mut self, f: impl Fn(&C) -> bool + Send + Sync + 'static)
        -> Result<()>
        where C: 'static
    {
        let func = HandlerFn::End(Arc::new(move |c: &Closure| {
            c.downcast_ref::<C>().map_or(false, &f)
        }));
        self.set(ENDSTR_SELECTOR, Handler{func, closure_type: TypeId::of::<C>(), return_type: None})
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct Outer;
    struct Inner;

    #[test]
    fn string_takes_start_closure()
    {
        let mut h = BytesHandler::new();
        h.set_start_str(|_: &Rc<Outer>, _| ContinueOrBreak::Continue(Rc::new(Inner))).unwrap();
        assert_eq!(h.set_string(|_: &Outer, b| b.len()), Err(Error::ClosureTypeMismatch));
        h.set_string(|_: &Inner, b| b.len()).unwrap();
        assert_eq!(h.set_end_str(|_: &Inner| true), Err(Error::ClosureTypeMismatch));
        h.set_end_str(|_: &Outer| true).unwrap();
        assert!(h.handler(STRING_SELECTOR).is_some());
    }
}
