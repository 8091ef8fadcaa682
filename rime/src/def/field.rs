use {
    super::{Def, DefData, DefKind, DefType, FrozenDef, SymRef, check_name, def_handle},
    crate::{
        Error, Result,
        refcounted::{Link, Obj, Owner, Ref, SubRef},
        wire::{DescriptorType, MAX_FIELDNUMBER},
    },
};

/// Type of a field's values.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FieldType
{
    Float,
    Double,
    Bool,
    String,
    Bytes,
    Message,
    Enum,
    Int32,
    UInt32,
    Int64,
    UInt64,
}

impl FieldType
{
    /// Whether values are strings or bytes.
    pub fn is_string(self) -> bool
    {
        matches!(self, FieldType::String | FieldType::Bytes)
    }

    /// Whether values are single scalars.
    pub fn is_primitive(self) -> bool
    {
        !self.is_string() && self != FieldType::Message
    }
}

/// Cardinality of a field.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Label
{
    #[default]
    Optional,
    Required,
    Repeated,
}

/// Wire encoding of an integer field.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IntFmt
{
    #[default]
    Variable,
    Fixed,
    ZigZag,
}

/// Default value of a field.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue
{
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(Vec<u8>),

    /// Name of an enum value, resolved when frozen.
    EnumName(String),
}

impl DefaultValue
{
    /// Default of a field of type `field_type` with no explicit default.
    pub fn zero(field_type: FieldType) -> Option<Self>
    {
        Some(match field_type {
            FieldType::Float   => DefaultValue::Float(0.0),
            FieldType::Double  => DefaultValue::Double(0.0),
            FieldType::Bool    => DefaultValue::Bool(false),
            FieldType::String | FieldType::Bytes => DefaultValue::Str(Vec::new()),
            FieldType::Message => return None,
            FieldType::Enum | FieldType::Int32 => DefaultValue::Int32(0),
            FieldType::UInt32  => DefaultValue::UInt32(0),
            FieldType::Int64   => DefaultValue::Int64(0),
            FieldType::UInt64  => DefaultValue::UInt64(0),
        })
    }

    fn fits(&self, field_type: FieldType) -> bool
    {
        use {DefaultValue as D, FieldType as T};
        matches!(
            (self, field_type),
            (D::Int32(_), T::Int32 | T::Enum)
                | (D::EnumName(_), T::Enum)
                | (D::Int64(_), T::Int64)
                | (D::UInt32(_), T::UInt32)
                | (D::UInt64(_), T::UInt64)
                | (D::Float(_), T::Float)
                | (D::Double(_), T::Double)
                | (D::Bool(_), T::Bool)
                | (D::Str(_), T::String | T::Bytes)
        )
    }
}

/// Descriptor type for a combination of field properties.
///
/// Returns [`None`] for combinations with no wire encoding,
/// such as zig-zag unsigned integers.
pub fn descriptor_type(field_type: FieldType, int_fmt: IntFmt, tag_delim: bool)
    -> Option<DescriptorType>
{
    use {DescriptorType as D, FieldType as T, IntFmt as F};
    Some(match (field_type, int_fmt) {
        (T::Float, _)  => D::Float,
        (T::Double, _) => D::Double,
        (T::Bool, _)   => D::Bool,
        (T::String, _) => D::String,
        (T::Bytes, _)  => D::Bytes,
        (T::Enum, _)   => D::Enum,
        (T::Message, _) if tag_delim => D::Group,
        (T::Message, _) => D::Message,
        (T::Int32, F::Variable)  => D::Int32,
        (T::Int32, F::Fixed)     => D::SFixed32,
        (T::Int32, F::ZigZag)    => D::SInt32,
        (T::Int64, F::Variable)  => D::Int64,
        (T::Int64, F::Fixed)     => D::SFixed64,
        (T::Int64, F::ZigZag)    => D::SInt64,
        (T::UInt32, F::Variable) => D::UInt32,
        (T::UInt32, F::Fixed)    => D::Fixed32,
        (T::UInt64, F::Variable) => D::UInt64,
        (T::UInt64, F::Fixed)    => D::Fixed64,
        (T::UInt32 | T::UInt64, F::ZigZag) => return None,
    })
}

/// Field properties encoded by a descriptor type.
fn split_descriptor_type(dt: DescriptorType) -> (FieldType, IntFmt, bool)
{
    use {DescriptorType as D, FieldType as T, IntFmt as F};
    match dt {
        D::Double   => (T::Double, F::Variable, false),
        D::Float    => (T::Float, F::Variable, false),
        D::Int64    => (T::Int64, F::Variable, false),
        D::UInt64   => (T::UInt64, F::Variable, false),
        D::Int32    => (T::Int32, F::Variable, false),
        D::Fixed64  => (T::UInt64, F::Fixed, false),
        D::Fixed32  => (T::UInt32, F::Fixed, false),
        D::Bool     => (T::Bool, F::Variable, false),
        D::String   => (T::String, F::Variable, false),
        D::Group    => (T::Message, F::Variable, true),
        D::Message  => (T::Message, F::Variable, false),
        D::Bytes    => (T::Bytes, F::Variable, false),
        D::UInt32   => (T::UInt32, F::Variable, false),
        D::Enum     => (T::Enum, F::Variable, false),
        D::SFixed32 => (T::Int32, F::Fixed, false),
        D::SFixed64 => (T::Int64, F::Fixed, false),
        D::SInt32   => (T::Int32, F::ZigZag, false),
        D::SInt64   => (T::Int64, F::ZigZag, false),
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Data                                     */
/* -------------------------------------------------------------------------- */

pub (crate) struct FieldData
{
    pub field_type: Option<FieldType>,
    pub label: Label,
    pub number: u32,
    pub default: Option<DefaultValue>,
    pub has_default: bool,
    pub containing: Option<SymRef>,
    pub subdef: Option<SymRef>,
    pub oneof: Option<SubRef<DefData>>,
    pub int_fmt: IntFmt,
    pub tag_delim: bool,
    pub packed: bool,
    pub packed_set: bool,
    pub lazy: bool,
    pub is_extension: bool,

    /// Assigned when frozen.
    pub index: u32,
    pub selector_base: u32,
}

impl Default for FieldData
{
    fn default() -> Self
    {
        Self{
            field_type: None,
            label: Label::Optional,
            number: 0,
            default: None,
            has_default: false,
            containing: None,
            subdef: None,
            oneof: None,
            int_fmt: IntFmt::Variable,
            tag_delim: false,
            packed: true,
            packed_set: false,
            lazy: false,
            is_extension: false,
            index: 0,
            selector_base: 0,
        }
    }
}

pub (crate) struct FrozenField
{
    pub field_type: FieldType,
    pub label: Label,
    pub number: u32,
    pub default: Option<DefaultValue>,
    pub containing: Option<Link<FrozenDef>>,
    pub containing_name: Option<String>,
    pub subdef: Option<Link<FrozenDef>>,
    pub oneof: Option<Link<FrozenDef>>,
    pub int_fmt: IntFmt,
    pub tag_delim: bool,
    pub packed: bool,
    pub lazy: bool,
    pub is_extension: bool,
    pub index: u32,
    pub selector_base: u32,
}

impl FieldData
{
    pub fn descriptor_type(&self) -> Option<DescriptorType>
    {
        descriptor_type(self.field_type?, self.int_fmt, self.tag_delim)
    }

    pub (super) fn freeze(self, link: &mut dyn FnMut(&SubRef<DefData>) -> Link<FrozenDef>)
        -> FrozenField
    {
        // Symbolic references are resolved or rejected before freezing.
        let mut direct = |s: &Option<SymRef>| match s {
            Some(SymRef::Direct(s)) => Some(link(s)),
            _ => None,
        };
        let containing = direct(&self.containing);
        let subdef = direct(&self.subdef);
        let containing_name = match &self.containing {
            Some(SymRef::Symbolic(name)) => Some(name.clone()),
            _ => None,
        };
        let oneof = self.oneof.as_ref().map(link);

        let field_type = self.field_type.unwrap_or(FieldType::Int32);
        let is_repeated_primitive =
            self.label == Label::Repeated && field_type.is_primitive();

        FrozenField{
            field_type,
            label: self.label,
            number: self.number,
            default: self.default,
            containing,
            containing_name,
            subdef,
            oneof,
            int_fmt: self.int_fmt,
            tag_delim: self.tag_delim,
            packed: self.packed && is_repeated_primitive,
            lazy: self.lazy,
            is_extension: self.is_extension,
            index: self.index,
            selector_base: self.selector_base,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Handle                                   */
/* -------------------------------------------------------------------------- */

/// Mutable handle to a field definition.
#[derive(Clone)]
pub struct FieldDef(pub (crate) Ref<DefData>);

def_handle!(FieldDef, FieldView, Field, FieldData);

impl FieldDef
{
    /// Create a field with no name, number or type.
    pub fn new() -> Self
    {
        let data = DefData::new(DefKind::Field(FieldData::default()));
        FieldDef(Ref::new(data, Owner::UNTRACKED))
    }

    /// Create a field with the given name, number and type.
    pub fn named(name: &str, number: u32, field_type: FieldType) -> Result<Self>
    {
        let field = Self::new();
        field.set_name(name)?;
        field.set_number(number)?;
        field.set_type(field_type)?;
        Ok(field)
    }

    /// Short name of the field.
    pub fn name(&self) -> Option<String>
    {
        self.as_def().full_name()
    }

    /// Set the short name of the field.
    ///
    /// Fails with [`Error::InvalidField`] once the field is in a message
    /// or oneof.
    pub fn set_name(&self, name: &str) -> Result<()>
    {
        check_name(name, false)?;
        self.with_mut(|n, d| {
            if d.is_installed() {
                return Err(Error::InvalidField(format!("cannot rename installed field {name}")));
            }
            *n = Some(name.to_owned());
            Ok(())
        })?
    }

    /// Field number, or zero if unset.
    pub fn number(&self) -> u32
    {
        match self.view() {
            Some(view) => view.number(),
            None => self.with(|_, d| d.number).unwrap_or(0),
        }
    }

    /// Set the field number.
    pub fn set_number(&self, number: u32) -> Result<()>
    {
        if number == 0 || number > MAX_FIELDNUMBER {
            return Err(Error::InvalidField(format!("field number {number} out of range")));
        }
        self.with_mut(|_, d| {
            if d.is_installed() {
                return Err(Error::InvalidField(format!("cannot renumber installed field {number}")));
            }
            d.number = number;
            Ok(())
        })?
    }

    /// Type of the field, if set.
    pub fn field_type(&self) -> Option<FieldType>
    {
        match self.view() {
            Some(view) => Some(view.field_type()),
            None => self.with(|_, d| d.field_type).ok().flatten(),
        }
    }

    /// Set the type of the field.
    ///
    /// Resets the default to the type's zero and clears the subdef.
    pub fn set_type(&self, field_type: FieldType) -> Result<()>
    {
        self.with_mut(|_, d| {
            d.field_type = Some(field_type);
            d.default = DefaultValue::zero(field_type);
            d.has_default = false;
            d.subdef = None;
            if field_type != FieldType::Message {
                d.tag_delim = false;
            }
        })
    }

    /// Descriptor type of the field, if its type is set.
    pub fn descriptor_type(&self) -> Option<DescriptorType>
    {
        match self.view() {
            Some(view) => Some(view.descriptor_type()),
            None => self.with(|_, d| d.descriptor_type()).ok().flatten(),
        }
    }

    /// Set type, integer format and delimiting from a descriptor type.
    pub fn set_descriptor_type(&self, dt: DescriptorType) -> Result<()>
    {
        let (field_type, int_fmt, tag_delim) = split_descriptor_type(dt);
        self.set_type(field_type)?;
        self.with_mut(|_, d| {
            d.int_fmt = int_fmt;
            d.tag_delim = tag_delim;
        })
    }

    /// Set the cardinality of the field.
    pub fn set_label(&self, label: Label) -> Result<()>
    {
        self.with_mut(|_, d| d.label = label)
    }

    /// Set the integer encoding of the field.
    ///
    /// Fails with [`Error::InvalidField`] for zig-zag unsigned fields.
    pub fn set_int_fmt(&self, int_fmt: IntFmt) -> Result<()>
    {
        self.with_mut(|_, d| {
            if let Some(t) = d.field_type {
                if descriptor_type(t, int_fmt, d.tag_delim).is_none() {
                    return Err(Error::InvalidField(format!("{int_fmt:?} is invalid for {t:?}")));
                }
            }
            d.int_fmt = int_fmt;
            Ok(())
        })?
    }

    /// Encode a message field as a group.
    pub fn set_tag_delim(&self, tag_delim: bool) -> Result<()>
    {
        self.with_mut(|_, d| {
            if tag_delim && d.field_type != Some(FieldType::Message) {
                return Err(Error::InvalidField("only message fields are groups".into()));
            }
            d.tag_delim = tag_delim;
            Ok(())
        })?
    }

    /// Whether repeated values are packed when encoded.
    pub fn set_packed(&self, packed: bool) -> Result<()>
    {
        self.with_mut(|_, d| {
            d.packed = packed;
            d.packed_set = true;
        })
    }

    /// Whether the field may be parsed lazily.
    pub fn set_lazy(&self, lazy: bool) -> Result<()>
    {
        self.with_mut(|_, d| d.lazy = lazy)
    }

    /// Mark the field as an extension of its containing type.
    pub fn set_is_extension(&self, is_extension: bool) -> Result<()>
    {
        self.with_mut(|_, d| d.is_extension = is_extension)
    }

    /// Default value of the field.
    pub fn default_value(&self) -> Option<DefaultValue>
    {
        match self.view() {
            Some(view) => view.default_value().cloned(),
            None => self.with(|_, d| d.default.clone()).ok().flatten(),
        }
    }

    /// Set the default value of the field.
    ///
    /// Fails with [`Error::InvalidField`] if the value does not fit the type.
    pub fn set_default(&self, value: DefaultValue) -> Result<()>
    {
        self.with_mut(|_, d| {
            match d.field_type {
                Some(t) if value.fits(t) => (),
                t => return Err(Error::InvalidField(format!("default {value:?} for {t:?}"))),
            }
            d.default = Some(value);
            d.has_default = true;
            Ok(())
        })?
    }

    /// Set the message or enum the field's values are instances of.
    pub fn set_subdef(&self, subdef: &Def) -> Result<()>
    {
        let wanted = self.with(|_, d| match d.field_type {
            Some(FieldType::Message) => Ok(DefType::MSG),
            Some(FieldType::Enum) => Ok(DefType::ENUM),
            t => Err(Error::InvalidField(format!("{t:?} fields have no subdef"))),
        })??;
        let kind = match subdef.view() {
            Some(view) => view.def_type(),
            None => subdef.def_type()?,
        };
        if kind != wanted {
            return Err(Error::InvalidField(format!("subdef of kind {kind:?}, wanted {wanted:?}")));
        }
        let sub = SubRef::new(self.obj(), subdef.obj());
        self.with_mut(|_, d| d.subdef = Some(SymRef::Direct(sub)))
    }

    /// Refer to the subdef by name, to be resolved by a symbol table.
    pub fn set_subdef_name(&self, name: &str) -> Result<()>
    {
        check_name(name.strip_prefix('.').unwrap_or(name), true)?;
        self.with_mut(|_, d| match d.field_type {
            Some(FieldType::Message | FieldType::Enum) => {
                d.subdef = Some(SymRef::Symbolic(name.to_owned()));
                Ok(())
            },
            t => Err(Error::InvalidField(format!("{t:?} fields have no subdef"))),
        })?
    }

    /// Name of the subdef, direct or symbolic.
    pub fn subdef_name(&self) -> Option<String>
    {
        if let Some(view) = self.view() {
            return view.subdef().and_then(|s| s.full_name().map(str::to_owned));
        }
        self.with(|_, d| match &d.subdef {
            Some(SymRef::Symbolic(name)) => Some(name.clone()),
            Some(SymRef::Direct(s)) => sub_name(s),
            None => None,
        }).ok().flatten()
    }

    /// Name the message an extension extends.
    pub fn set_containing_type_name(&self, name: &str) -> Result<()>
    {
        check_name(name.strip_prefix('.').unwrap_or(name), true)?;
        self.with_mut(|_, d| match d.containing {
            Some(SymRef::Direct(_)) => Err(Error::OwnedElsewhere),
            _ => {
                d.containing = Some(SymRef::Symbolic(name.to_owned()));
                Ok(())
            },
        })?
    }

    /// Message the field is in.
    pub fn containing_type(&self) -> Option<super::MessageDef>
    {
        self.with(|_, d| match &d.containing {
            Some(SymRef::Direct(SubRef::Mutable(obj))) => Some(obj.clone()),
            _ => None,
        }).ok().flatten()
            .map(|obj| super::MessageDef(obj.take_ref(Owner::UNTRACKED)))
    }
}

impl Default for FieldDef
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl FieldData
{
    /// Whether the field was added to a message or oneof.
    pub fn is_installed(&self) -> bool
    {
        matches!(self.containing, Some(SymRef::Direct(_))) || self.oneof.is_some()
    }
}

/// Name of the target of a sub-ref, frozen or not.
pub (crate) fn sub_name(sub: &SubRef<DefData>) -> Option<String>
{
    match sub.as_frozen() {
        Some(handle) => handle.get().name.clone(),
        None => sub.as_mutable().and_then(|obj: &Obj<DefData>| {
            obj.with(|d| d.name.clone()).ok().flatten()
        }),
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn set_type_resets()
    {
        let f = FieldDef::named("x", 1, FieldType::Int32).unwrap();
        f.set_default(DefaultValue::Int32(5)).unwrap();
        assert_eq!(f.default_value(), Some(DefaultValue::Int32(5)));
        f.set_type(FieldType::String).unwrap();
        assert_eq!(f.default_value(), Some(DefaultValue::Str(Vec::new())));
        assert!(f.set_default(DefaultValue::Int32(1)).is_err());
    }

    #[test]
    fn descriptor_type_groups()
    {
        let f = FieldDef::named("x", 1, FieldType::Int64).unwrap();
        f.set_int_fmt(IntFmt::ZigZag).unwrap();
        assert_eq!(f.descriptor_type(), Some(DescriptorType::SInt64));
        f.set_descriptor_type(DescriptorType::Fixed32).unwrap();
        assert_eq!(f.field_type(), Some(FieldType::UInt32));
        assert!(f.set_int_fmt(IntFmt::ZigZag).is_err());
        f.set_descriptor_type(DescriptorType::Group).unwrap();
        assert_eq!(f.field_type(), Some(FieldType::Message));
    }

    #[test]
    fn numbers_and_names()
    {
        let f = FieldDef::new();
        assert!(f.set_number(0).is_err());
        assert!(f.set_number(MAX_FIELDNUMBER + 1).is_err());
        assert!(f.set_name("a.b").is_err());
        f.set_number(MAX_FIELDNUMBER).unwrap();
        assert_eq!(f.number(), MAX_FIELDNUMBER);
    }

    proptest!
    {
        #[test]
        fn descriptor_type_splits(n in 1u8 ..= 18)
        {
            let dt = DescriptorType::from_u8(n).unwrap();
            let (t, fmt, delim) = split_descriptor_type(dt);
            assert_eq!(descriptor_type(t, fmt, delim), Some(dt));
        }
    }
}
