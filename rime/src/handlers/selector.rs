use crate::def::{FieldType, FieldView};

/// Selector of the start-of-message handler.
pub const STARTMSG_SELECTOR: u32 = 0;

/// Selector of the end-of-message handler.
pub const ENDMSG_SELECTOR: u32 = 1;

/// Number of selectors every message has regardless of its fields.
pub const STATIC_SELECTOR_COUNT: u32 = 2;

/// Selectors of a [`BytesHandler`].
///
/// [`BytesHandler`]: `super::BytesHandler`
pub const STARTSTR_SELECTOR: u32 = 0;
#[allow(missing_docs)]
pub const STRING_SELECTOR: u32 = 1;
#[allow(missing_docs)]
pub const ENDSTR_SELECTOR: u32 = 2;

/// Kind of handler a field can have.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandlerType
{
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    Bool,
    StartStr,
    String,
    EndStr,
    StartSeq,
    EndSeq,
    StartSubMsg,
    EndSubMsg,
}

impl HandlerType
{
    /// Every handler type.
    pub const ALL: [HandlerType; 14] = {
        use HandlerType::*;
        [Int32, Int64, UInt32, UInt64, Float, Double, Bool,
         StartStr, String, EndStr, StartSeq, EndSeq, StartSubMsg, EndSubMsg]
    };

    /// Handler type of the values of a primitive field.
    pub fn for_primitive(field_type: FieldType) -> Option<Self>
    {
        Some(match field_type {
            FieldType::Int32 | FieldType::Enum => HandlerType::Int32,
            FieldType::Int64  => HandlerType::Int64,
            FieldType::UInt32 => HandlerType::UInt32,
            FieldType::UInt64 => HandlerType::UInt64,
            FieldType::Float  => HandlerType::Float,
            FieldType::Double => HandlerType::Double,
            FieldType::Bool   => HandlerType::Bool,
            FieldType::String | FieldType::Bytes | FieldType::Message => return None,
        })
    }
}

/// Selector of the handler of type `ty` for `field`.
///
/// Returns [`None`] if the field cannot have such a handler.
pub fn get_selector(field: &FieldView, ty: HandlerType) -> Option<u32>
{
    let base = field.selector_base();
    let lazy = field.is_submessage() && field.lazy();
    let string_base = if field.is_string() {
        Some(base)
    } else if lazy {
        Some(base + 1)
    } else {
        None
    };
    match ty {
        HandlerType::Int32 | HandlerType::Int64 | HandlerType::UInt32 | HandlerType::UInt64
            | HandlerType::Float | HandlerType::Double | HandlerType::Bool =>
            (HandlerType::for_primitive(field.field_type()) == Some(ty)).then_some(base),
        HandlerType::StartStr => string_base,
        HandlerType::String => string_base.map(|s| s + 1),
        HandlerType::EndStr => string_base.map(|s| s + 2),
        HandlerType::StartSeq => field.is_sequence().then(|| base - 2),
        HandlerType::EndSeq => field.is_sequence().then(|| base - 1),
        HandlerType::StartSubMsg =>
            field.is_submessage().then(|| STATIC_SELECTOR_COUNT + field.index()),
        HandlerType::EndSubMsg => field.is_submessage().then_some(base),
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::def::{FieldDef, Label, MessageDef, freeze},
        proptest::{prelude::*, proptest},
        std::collections::HashSet,
    };

    fn field_type() -> impl Strategy<Value=FieldType>
    {
        prop_oneof![
            Just(FieldType::Int32), Just(FieldType::UInt64), Just(FieldType::Bool),
            Just(FieldType::Double), Just(FieldType::String), Just(FieldType::Bytes),
            Just(FieldType::Message),
        ]
    }

    proptest!
    {
        #[test]
        fn selectors_are_unique(
            fields in proptest::collection::vec((field_type(), any::<bool>(), any::<bool>()), 0 .. 12),
        )
        {
            let sub = MessageDef::named("Sub").unwrap();
            let m = MessageDef::named("M").unwrap();
            for (i, &(ty, repeated, lazy)) in fields.iter().enumerate() {
                let f = FieldDef::named(&format!("f{i}"), 20 - i as u32, ty).unwrap();
                if repeated {
                    f.set_label(Label::Repeated).unwrap();
                }
                if ty == FieldType::Message {
                    f.set_subdef(&sub.as_def()).unwrap();
                    f.set_lazy(lazy).unwrap();
                }
                m.add_field(&f).unwrap();
            }
            let views = freeze(&[m.as_def(), sub.as_def()]).unwrap();
            let m = views[0].as_message().unwrap();

            let mut seen = HashSet::new();
            seen.insert(STARTMSG_SELECTOR);
            seen.insert(ENDMSG_SELECTOR);
            for field in m.fields() {
                for ty in HandlerType::ALL {
                    if let Some(sel) = get_selector(&field, ty) {
                        prop_assert!(sel < m.selector_count());
                        prop_assert!(seen.insert(sel), "{sel} used twice");
                    }
                }
            }
        }
    }
}
