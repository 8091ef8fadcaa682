//! Handlers that record every event they receive, for comparing parses.

use {
    crate::{
        Result,
        def::{FieldType, FieldView, MessageView},
        handlers::{ContinueOrBreak, Handlers, HandlersView},
    },
    std::{cell::RefCell, fmt::Display, rc::Rc},
};

/// Log of events, one line each.
///
/// String data is appended to the line of the string it belongs to,
/// so a string delivered in pieces records the same as one delivered whole.
#[derive(Debug, Default)]
pub struct Recorder
{
    events: RefCell<Vec<String>>,
}

impl Recorder
{
    pub fn new() -> Rc<Self>
    {
        Rc::new(Self::default())
    }

    /// Recording handlers for `msg` and every message it reaches.
    ///
    /// With `lazy`, lazy message fields are recorded as strings.
    pub fn handlers(msg: &MessageView, lazy: bool) -> HandlersView
    {
        Handlers::new_frozen(msg, |h| install(h, lazy)).unwrap()
    }

    pub fn events(&self) -> Vec<String>
    {
        self.events.borrow().clone()
    }

    /// Only the value events, without the structure around them.
    pub fn values(&self) -> Vec<String>
    {
        self.events.borrow().iter().filter(|e| e.contains('=')).cloned().collect()
    }

    pub fn push(&self, event: String) -> bool
    {
        self.events.borrow_mut().push(event);
        true
    }

    pub fn append(&self, buf: &[u8]) -> usize
    {
        let mut events = self.events.borrow_mut();
        if let Some(last) = events.last_mut() {
            last.extend(buf.escape_ascii().map(char::from));
        }
        buf.len()
    }
}

fn value<T: Display + 'static>(name: &str) -> impl Fn(&Recorder, T) -> bool + Send + Sync + 'static
{
    let name = name.to_owned();
    move |r: &Recorder, v: T| r.push(format!("{name}={v}"))
}

fn event(what: &str, name: &str) -> impl Fn(&Recorder) -> bool + Send + Sync + 'static
{
    let event = format!("{what} {name}");
    move |r: &Recorder| r.push(event.clone())
}

fn cont(r: &Rc<Recorder>) -> ContinueOrBreak<Rc<Recorder>>
{
    ContinueOrBreak::Continue(r.clone())
}

/// Install recording handlers into one table.
pub fn install(h: &Handlers, lazy: bool) -> Result<()>
{
    let msg = h.message();
    let msg_name = msg.full_name().unwrap_or_default().to_owned();
    h.set_start_msg(event("startmsg", &msg_name))?;
    let end = event("endmsg", &msg_name);
    h.set_end_msg(move |r: &Recorder, _| end(r))?;
    for field in msg.fields() {
        install_field(h, &field, lazy)?;
    }
    Ok(())
}

fn install_field(h: &Handlers, field: &FieldView, lazy: bool) -> Result<()>
{
    let name = field.name().unwrap_or_default().to_owned();
    if field.is_sequence() {
        let start = event("startseq", &name);
        h.set_start_seq(field, move |r: &Rc<Recorder>| {
            start(r.as_ref());
            cont(r)
        })?;
        h.set_end_seq(field, event("endseq", &name))?;
    }
    let as_string = field.is_string() || (lazy && field.lazy());
    if as_string {
        let prefix = format!("{name}=");
        h.set_start_str(field, move |r: &Rc<Recorder>, _| {
            r.push(prefix.clone());
            cont(r)
        })?;
        h.set_string(field, |r: &Recorder, buf| r.append(buf))?;
        if field.is_string() {
            return Ok(());
        }
    }
    match field.field_type() {
        FieldType::Int32 | FieldType::Enum => h.set_int32(field, value::<i32>(&name)),
        FieldType::Int64  => h.set_int64(field, value::<i64>(&name)),
        FieldType::UInt32 => h.set_uint32(field, value::<u32>(&name)),
        FieldType::UInt64 => h.set_uint64(field, value::<u64>(&name)),
        FieldType::Float  => h.set_float(field, value::<f32>(&name)),
        FieldType::Double => h.set_double(field, value::<f64>(&name)),
        FieldType::Bool   => h.set_bool(field, value::<bool>(&name)),
        FieldType::Message => {
            let start = event("start", &name);
            h.set_start_submsg(field, move |r: &Rc<Recorder>| {
                start(r.as_ref());
                cont(r)
            })?;
            h.set_end_submsg(field, event("end", &name))
        },
        FieldType::String | FieldType::Bytes => Ok(()),
    }
}
